//! Connectivity resolution
//!
//! Three sources say whether the sensor node is reachable: the explicit status
//! message, the flag in a live snapshot and the flag in a live delta. The most
//! recent one wins, with one exception: a delta saying `true` means data just
//! arrived, so it always marks the node connected and a delta never clears it.

/// One connectivity assertion. `None` means the payload had no boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Status(Option<bool>),
    Snapshot(Option<bool>),
    Delta(Option<bool>),
}

/// Apply a signal to the current flag.
pub fn resolve(current: bool, signal: Signal) -> bool {
    match signal {
        Signal::Status(Some(flag)) | Signal::Snapshot(Some(flag)) => flag,
        Signal::Delta(Some(true)) => true,
        Signal::Delta(Some(false)) => current,
        Signal::Status(None) | Signal::Snapshot(None) | Signal::Delta(None) => current,
    }
}

/// Process-wide flag, starting disconnected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Connectivity {
    connected: bool,
}

impl Connectivity {
    /// Returns true if the flag changed.
    pub fn apply(&mut self, signal: Signal) -> bool {
        let next = resolve(self.connected, signal);
        let changed = next != self.connected;
        self.connected = next;
        changed
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
