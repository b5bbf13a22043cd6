//! ==============================================================================
//! sync.rs - the synchronization engine
//! ==============================================================================
//!
//! purpose:
//!     owns the live telemetry state and is the only thing that mutates it.
//!     hydrates from a snapshot, then applies push messages as they arrive,
//!     publishing an immutable `TelemetryView` after every change.
//!
//! lifecycle:
//!
//! ```text
//!     Uninitialized ──► Hydrating ──► Live ◄──┐
//!                                       │      │ refresh (subscription stays open)
//!                                       └──────┘
//! ```
//!
//! concurrency:
//!     a single task runs the dispatch loop, so snapshot completions, push
//!     messages and commands are handled one at a time in arrival order.
//!     snapshot fetches run in their own task and post the result back into
//!     the loop; results arriving after shutdown are dropped.
//!
//! relationships:
//!     - uses: snapshot.rs (pull side), stream.rs (push side)
//!     - feeds: peaks/history/chart/connectivity state
//!     - read by: server.rs and any embedding UI through `SyncHandle`
//!
//! ==============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::chart::{ChartSet, ChartSnapshot};
use crate::connectivity::{Connectivity, Signal};
use crate::domain::{LiveState, LiveUpdate, PeakEvent, RawEntry};
use crate::error::SyncError;
use crate::history::BoundedHistory;
use crate::peaks::{self, PeakSummary};
use crate::snapshot::{fetch_snapshot, Snapshot, SnapshotSource};
use crate::stream::{PushMessage, PushTransport, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    Hydrating,
    Live,
}

/// Read-only copy of everything presentation needs.
///
/// Collections are shared with the engine; a publish only rebuilds the ones
/// the last change touched.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryView {
    pub phase: Phase,
    /// true until the first hydration lands, and again while refreshing
    pub loading: bool,
    pub refreshing: bool,
    pub connected: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub live: Arc<LiveState>,
    /// newest first
    pub peak_events: Arc<[PeakEvent]>,
    /// newest last
    pub raw_entries: Arc<[RawEntry]>,
    pub charts: Arc<[ChartSnapshot]>,
}

impl TelemetryView {
    pub fn peak_summary(&self) -> PeakSummary {
        peaks::reduce(self.peak_events.iter())
    }
}

/// Last published copy of each collection.
#[derive(Debug, Clone)]
struct Shared {
    live: Arc<LiveState>,
    peak_events: Arc<[PeakEvent]>,
    raw_entries: Arc<[RawEntry]>,
    charts: Arc<[ChartSnapshot]>,
}

// ==============================================================================
// state - pure, no i/o
// ==============================================================================

/// All live collections plus the connectivity flag.
#[derive(Debug, Clone)]
pub struct TelemetryState {
    phase: Phase,
    refreshing: bool,
    live: LiveState,
    peak_events: BoundedHistory<PeakEvent>,
    raw_entries: BoundedHistory<RawEntry>,
    connectivity: Connectivity,
    charts: ChartSet,
    last_update: Option<DateTime<Utc>>,
    shared: Shared,
}

impl TelemetryState {
    pub fn new(peak_capacity: usize, raw_capacity: usize, charts: ChartSet) -> Self {
        let shared = Shared {
            live: Arc::new(LiveState::default()),
            peak_events: Arc::from(Vec::new()),
            raw_entries: Arc::from(Vec::new()),
            charts: charts.snapshot().into(),
        };
        Self {
            phase: Phase::Uninitialized,
            refreshing: false,
            live: LiveState::default(),
            peak_events: BoundedHistory::newest_first(peak_capacity),
            raw_entries: BoundedHistory::newest_last(raw_capacity),
            connectivity: Connectivity::default(),
            charts,
            last_update: None,
            shared,
        }
    }

    /// Mark a snapshot fetch as started. The first one moves to `Hydrating`;
    /// later ones only raise the refreshing flag and keep live data in place.
    pub fn begin_fetch(&mut self) {
        match self.phase {
            Phase::Uninitialized => self.phase = Phase::Hydrating,
            Phase::Hydrating => {}
            Phase::Live => self.refreshing = true,
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.phase == Phase::Hydrating || self.refreshing
    }

    /// Install a snapshot wholesale and go `Live`.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot, now: DateTime<Utc>) {
        // status resource first, so the live payload's own flag wins a tie
        self.connectivity.apply(Signal::Status(snapshot.status));

        let embedded = snapshot.live.get("connected").and_then(Value::as_bool);
        self.live.apply(LiveUpdate::Replace(snapshot.live));
        self.connectivity.apply(Signal::Snapshot(embedded));
        self.sync_live();

        self.peak_events.replace(snapshot.peak_events);
        self.raw_entries.replace(snapshot.raw_entries);
        self.sync_peaks();
        self.sync_raw();

        self.last_update = Some(now);
        self.phase = Phase::Live;
        self.refreshing = false;
    }

    /// Apply one push message. Returns true if it carried data (and so moved
    /// `last_update`); connectivity-only messages return false.
    pub fn apply_message(&mut self, message: PushMessage, now: DateTime<Utc>) -> bool {
        match message {
            PushMessage::Connect => {
                tracing::info!("push stream connected");
                return false;
            }
            PushMessage::Disconnect => {
                tracing::info!("push stream disconnected");
                return false;
            }
            PushMessage::Status(flag) => {
                if self.connectivity.apply(Signal::Status(flag)) {
                    tracing::info!(connected = self.connectivity.is_connected(), "sensor node status changed");
                }
                return false;
            }
            PushMessage::LiveDelta(delta) => {
                let embedded = delta.get("connected").and_then(Value::as_bool);
                self.live.apply(LiveUpdate::Merge(delta));
                self.connectivity.apply(Signal::Delta(embedded));
                self.sync_live();
            }
            PushMessage::PeakSingle(event) => {
                self.peak_events.append(event);
                self.sync_peaks();
            }
            PushMessage::PeakBatch(events) => {
                self.peak_events.replace(events);
                self.sync_peaks();
            }
            PushMessage::RawSingle(entry) => {
                self.raw_entries.append(entry);
                self.sync_raw();
            }
            PushMessage::RawBatch(entries) => {
                self.raw_entries.replace(entries);
                self.sync_raw();
            }
        }

        self.last_update = Some(now);
        true
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn live(&self) -> &LiveState {
        &self.live
    }

    pub fn peak_events(&self) -> &BoundedHistory<PeakEvent> {
        &self.peak_events
    }

    pub fn raw_entries(&self) -> &BoundedHistory<RawEntry> {
        &self.raw_entries
    }

    pub fn charts(&self) -> &ChartSet {
        &self.charts
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity.is_connected()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn view(&self) -> TelemetryView {
        TelemetryView {
            phase: self.phase,
            loading: self.phase != Phase::Live || self.refreshing,
            refreshing: self.refreshing,
            connected: self.connectivity.is_connected(),
            last_update: self.last_update,
            live: Arc::clone(&self.shared.live),
            peak_events: Arc::clone(&self.shared.peak_events),
            raw_entries: Arc::clone(&self.shared.raw_entries),
            charts: Arc::clone(&self.shared.charts),
        }
    }

    // live state changed: re-sample the charts and refresh both copies
    fn sync_live(&mut self) {
        self.shared.live = Arc::new(self.live.clone());
        if self.charts.observe(&self.live) {
            self.shared.charts = self.charts.snapshot().into();
        }
    }

    fn sync_peaks(&mut self) {
        self.shared.peak_events = self.peak_events.iter().cloned().collect();
    }

    fn sync_raw(&mut self) {
        self.shared.raw_entries = self.raw_entries.iter().cloned().collect();
    }
}

// ==============================================================================
// engine - the dispatch loop
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Refresh,
    Shutdown,
}

/// Cheap, clonable handle to a running engine.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<Arc<TelemetryView>>,
}

impl SyncHandle {
    /// Re-fetch the snapshot; the push subscription stays open.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.commands
            .send(Command::Refresh)
            .await
            .map_err(|_| SyncError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| SyncError::Closed)
    }

    /// Latest published view.
    pub fn view(&self) -> Arc<TelemetryView> {
        self.view.borrow().clone()
    }

    /// Receiver that wakes on every publish.
    pub fn watch(&self) -> watch::Receiver<Arc<TelemetryView>> {
        self.view.clone()
    }
}

pub struct SyncEngine<S, T> {
    source: Arc<S>,
    transport: T,
    state: TelemetryState,
    publisher: watch::Sender<Arc<TelemetryView>>,
    subscription: Option<Subscription>,
    show_stream_data: bool,
}

impl<S, T> SyncEngine<S, T>
where
    S: SnapshotSource,
    T: PushTransport,
{
    pub fn new(source: S, transport: T, state: TelemetryState) -> Self {
        let (publisher, _) = watch::channel(Arc::new(state.view()));
        Self {
            source: Arc::new(source),
            transport,
            state,
            publisher,
            subscription: None,
            show_stream_data: false,
        }
    }

    /// Log every push message at info instead of debug.
    pub fn show_stream_data(mut self, show: bool) -> Self {
        self.show_stream_data = show;
        self
    }

    /// Start the dispatch loop on its own task.
    pub fn spawn(self) -> (SyncHandle, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(16);
        let handle = SyncHandle {
            commands,
            view: self.publisher.subscribe(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (snapshot_tx, mut snapshots) = mpsc::channel::<Snapshot>(1);

        self.start_fetch(&snapshot_tx);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Refresh) => {
                        if self.state.is_fetching() {
                            tracing::debug!("refresh requested while a fetch is in flight");
                        } else {
                            tracing::info!("manual refresh");
                            self.start_fetch(&snapshot_tx);
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(snapshot) = snapshots.recv() => self.install(snapshot),
                message = next_message(&mut self.subscription), if self.subscription.is_some() => {
                    match message {
                        Some(message) => self.dispatch(message),
                        None => {
                            tracing::warn!("push subscription closed by transport");
                            self.subscription = None;
                        }
                    }
                }
            }
        }

        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
        tracing::info!("sync engine stopped");
    }

    fn start_fetch(&mut self, tx: &mpsc::Sender<Snapshot>) {
        self.state.begin_fetch();
        self.publish();

        let source = Arc::clone(&self.source);
        let tx = tx.clone();
        tokio::spawn(async move {
            let snapshot = fetch_snapshot(source.as_ref()).await;
            if tx.send(snapshot).await.is_err() {
                tracing::debug!("discarding snapshot that finished after shutdown");
            }
        });
    }

    fn install(&mut self, snapshot: Snapshot) {
        let hydrating = self.state.phase() != Phase::Live;
        tracing::info!(
            live_keys = snapshot.live.len(),
            peak_events = snapshot.peak_events.len(),
            raw_entries = snapshot.raw_entries.len(),
            "snapshot applied"
        );
        self.state.apply_snapshot(snapshot, Utc::now());
        if hydrating {
            self.open_subscription();
        }
        self.publish();
    }

    /// Only reached on the Hydrating -> Live transition, which happens once,
    /// so the engine holds at most one subscription for its whole life.
    fn open_subscription(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        match self.transport.subscribe() {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(e) => tracing::warn!("could not open push subscription: {}", e),
        }
    }

    fn dispatch(&mut self, message: PushMessage) {
        if self.show_stream_data {
            tracing::info!("[STREAM] {:?}", message);
        } else {
            tracing::debug!(kind = message.kind(), "push message");
        }
        self.state.apply_message(message, Utc::now());
        self.publish();
    }

    fn publish(&self) {
        self.publisher.send_replace(Arc::new(self.state.view()));
    }
}

async fn next_message(subscription: &mut Option<Subscription>) -> Option<PushMessage> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{RollingChart, Series};
    use crate::snapshot::Resource;
    use crate::stream::ChannelTransport;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn state() -> TelemetryState {
        let charts = ChartSet::new(vec![RollingChart::new(
            "Orientation",
            vec![Series::new("Roll", "roll"), Series::new("Pitch", "pitch")],
            100,
        )]);
        TelemetryState::new(1000, 1000, charts)
    }

    fn live_state() -> TelemetryState {
        let mut state = state();
        state.begin_fetch();
        state.apply_snapshot(Snapshot::default(), at(0));
        state
    }

    #[test]
    fn test_lifecycle_and_loading_flag() {
        let mut state = state();
        assert_eq!(state.phase(), Phase::Uninitialized);
        assert!(state.view().loading);

        state.begin_fetch();
        assert_eq!(state.phase(), Phase::Hydrating);
        assert!(state.is_fetching());

        state.apply_snapshot(Snapshot::default(), at(1));
        let view = state.view();
        assert_eq!(view.phase, Phase::Live);
        assert!(!view.loading);
        assert_eq!(view.last_update, Some(at(1)));

        state.begin_fetch();
        assert_eq!(state.phase(), Phase::Live);
        assert!(state.view().refreshing);
        assert!(state.view().loading);
    }

    #[test]
    fn test_snapshot_seeds_everything() {
        let mut state = state();
        state.begin_fetch();
        state.apply_snapshot(
            Snapshot {
                live: map(json!({"roll": 1.5, "temp": 20, "connected": true})),
                peak_events: vec![PeakEvent::new("Height", 2.0)],
                raw_entries: vec![RawEntry::new("t0", "LIVE,T=20")],
                status: Some(false),
            },
            at(0),
        );

        // live payload flag is applied after the status resource
        assert!(state.is_connected());
        assert_eq!(state.live().numeric("temp"), Some(20.0));
        assert_eq!(state.peak_events().len(), 1);
        assert_eq!(state.raw_entries().len(), 1);
        assert_eq!(state.charts().get("Orientation").unwrap().len(), 1);
    }

    #[test]
    fn test_refresh_replaces_wholesale() {
        let mut state = live_state();
        state.apply_message(PushMessage::LiveDelta(map(json!({"temp": 1, "flex": 2}))), at(1));
        state.apply_message(PushMessage::RawSingle(RawEntry::new("t1", "a")), at(2));

        state.begin_fetch();
        state.apply_snapshot(
            Snapshot {
                live: map(json!({"temp": 5})),
                ..Snapshot::default()
            },
            at(3),
        );

        assert_eq!(state.live().get("flex"), None);
        assert_eq!(state.live().numeric("temp"), Some(5.0));
        assert!(state.raw_entries().is_empty());
        assert!(!state.view().refreshing);
    }

    #[test]
    fn test_status_false_then_delta_true() {
        let mut state = live_state();
        state.apply_message(PushMessage::Status(Some(false)), at(1));
        state.apply_message(PushMessage::LiveDelta(map(json!({"connected": true}))), at(2));
        assert!(state.is_connected());
    }

    #[test]
    fn test_connectivity_messages_do_not_touch_last_update() {
        let mut state = live_state();
        assert!(!state.apply_message(PushMessage::Connect, at(5)));
        assert!(!state.apply_message(PushMessage::Status(Some(true)), at(6)));
        assert!(!state.apply_message(PushMessage::Disconnect, at(7)));
        assert_eq!(state.last_update(), Some(at(0)));
        assert!(state.is_connected());
    }

    #[test]
    fn test_every_data_message_moves_last_update() {
        let messages = vec![
            PushMessage::LiveDelta(map(json!({"g": 1.1}))),
            PushMessage::PeakSingle(PeakEvent::new("G-Force", 1.1)),
            PushMessage::PeakBatch(vec![PeakEvent::new("G-Force", 2.0)]),
            PushMessage::RawSingle(RawEntry::new("t", "x")),
            PushMessage::RawBatch(vec![RawEntry::new("t", "y")]),
        ];

        let mut state = live_state();
        for (i, message) in messages.into_iter().enumerate() {
            let now = at(10 + i as i64);
            assert!(state.apply_message(message, now));
            assert_eq!(state.last_update(), Some(now));
        }
    }

    #[test]
    fn test_peak_and_raw_orderings() {
        let mut state = live_state();
        state.apply_message(PushMessage::PeakSingle(PeakEvent::new("A", 1.0)), at(1));
        state.apply_message(PushMessage::PeakSingle(PeakEvent::new("B", 2.0)), at(2));
        state.apply_message(PushMessage::RawSingle(RawEntry::new("1", "first")), at(3));
        state.apply_message(PushMessage::RawSingle(RawEntry::new("2", "second")), at(4));

        let view = state.view();
        let peaks: Vec<_> = view.peak_events.iter().map(|e| e.parameter.clone().unwrap()).collect();
        let raw: Vec<_> = view.raw_entries.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(peaks, vec!["B", "A"]);
        assert_eq!(raw, vec!["first", "second"]);
    }

    #[test]
    fn test_delta_merges_and_feeds_chart() {
        let mut state = live_state();
        state.apply_message(PushMessage::LiveDelta(map(json!({"roll": 1.0, "temp": 20}))), at(1));
        state.apply_message(PushMessage::LiveDelta(map(json!({"pitch": 2.0}))), at(2));

        assert_eq!(state.live().numeric("roll"), Some(1.0));
        let chart = state.charts().get("Orientation").unwrap();
        let last = chart.points().last().unwrap();
        assert_eq!(last.index, 1);
        // merged state still carries roll from the first delta
        assert_eq!(last.get("Roll"), Some(1.0));
        assert_eq!(last.get("Pitch"), Some(2.0));
    }

    #[test]
    fn test_view_summary() {
        let mut state = live_state();
        for value in [3.0, 7.5, 1.0] {
            state.apply_message(PushMessage::PeakSingle(PeakEvent::new("LDR", value)), at(1));
        }
        let summary = state.view().peak_summary();
        assert_eq!(summary.get("LDR").unwrap().value, 7.5);
    }

    #[test]
    fn test_publish_rebuilds_only_what_changed() {
        let mut state = live_state();
        state.apply_message(PushMessage::PeakSingle(PeakEvent::new("A", 1.0)), at(1));
        let before = state.view();

        state.apply_message(PushMessage::RawSingle(RawEntry::new("1", "x")), at(2));
        let after = state.view();
        assert!(Arc::ptr_eq(&before.peak_events, &after.peak_events));
        assert!(Arc::ptr_eq(&before.live, &after.live));
        assert!(Arc::ptr_eq(&before.charts, &after.charts));
        assert!(!Arc::ptr_eq(&before.raw_entries, &after.raw_entries));
        assert_eq!(after.raw_entries.len(), 1);

        // no chart key in the delta, so the chart copy is reused
        state.apply_message(PushMessage::LiveDelta(map(json!({"temp": 20}))), at(3));
        let delta = state.view();
        assert!(!Arc::ptr_eq(&after.live, &delta.live));
        assert!(Arc::ptr_eq(&after.charts, &delta.charts));
        assert!(Arc::ptr_eq(&after.raw_entries, &delta.raw_entries));

        state.apply_message(PushMessage::LiveDelta(map(json!({"roll": 0.5}))), at(4));
        let sampled = state.view();
        assert!(!Arc::ptr_eq(&delta.charts, &sampled.charts));
        assert_eq!(sampled.charts[0].points.len(), 1);
    }

    struct OfflineSource;

    impl SnapshotSource for OfflineSource {
        async fn fetch(&self, _resource: Resource) -> Result<Value, SyncError> {
            Err(SyncError::Unavailable("offline".into()))
        }
    }

    async fn wait_until<F>(handle: &SyncHandle, ready: F) -> Arc<TelemetryView>
    where
        F: Fn(&TelemetryView) -> bool,
    {
        let mut rx = handle.watch();
        loop {
            let view = rx.borrow_and_update().clone();
            if ready(&view) {
                return view;
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_engine_subscribes_once_across_refreshes() {
        let transport = ChannelTransport::new(8);
        let (handle, task) = SyncEngine::new(OfflineSource, transport.clone(), state()).spawn();

        let mut previous = wait_until(&handle, |v| v.phase == Phase::Live).await;
        for _ in 0..2 {
            handle.refresh().await.unwrap();
            // every installed snapshot publishes a fresh live copy
            let seen = Arc::clone(&previous.live);
            previous = wait_until(&handle, |v| !v.refreshing && !Arc::ptr_eq(&v.live, &seen)).await;
        }
        assert_eq!(transport.subscriptions(), 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(transport.sender().unwrap().is_closed());
    }
}
