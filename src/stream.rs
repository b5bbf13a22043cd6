//! ==============================================================================
//! stream.rs - push-stream messages and transports
//! ==============================================================================
//!
//! purpose:
//!     turns the telemetry server's push events into typed `PushMessage`s and
//!     hands them to the sync engine through a `Subscription`.
//!
//! wire format:
//!     one JSON frame per line: {"event": "<name>", "data": <payload>}
//!
//! ```text
//!         connect / disconnect   -> transport notifications, no payload
//!         esp_status             -> {"connected": bool}
//!         live_data              -> partial live-state mapping
//!         peak_event             -> one peak event
//!         peak_events_batch      -> array of peak events
//!         raw_data               -> one raw entry
//!         raw_data_batch         -> array of raw entries
//! ```
//!
//! relationships:
//!     - used by: sync.rs (subscribes once hydration completes)
//!     - uses: domain.rs (payload decoding)
//!
//! reconnecting a dropped transport is the transport's job. the engine only
//! sees connect/disconnect notifications.
//!
//! ==============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{decode_list, PeakEvent, RawEntry};
use crate::error::SyncError;

/// A decoded push event.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Connect,
    Disconnect,
    Status(Option<bool>),
    LiveDelta(Map<String, Value>),
    PeakSingle(PeakEvent),
    PeakBatch(Vec<PeakEvent>),
    RawSingle(RawEntry),
    RawBatch(Vec<RawEntry>),
}

#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl PushMessage {
    /// Decode one wire line. `Ok(None)` for events this host doesn't handle.
    pub fn from_frame(line: &str) -> Result<Option<Self>, SyncError> {
        let frame: Frame = serde_json::from_str(line)?;
        Self::decode(&frame.event, frame.data)
    }

    /// Decode an event payload, checking its container shape.
    pub fn decode(event: &str, data: Value) -> Result<Option<Self>, SyncError> {
        let message = match event {
            "connect" => PushMessage::Connect,
            "disconnect" => PushMessage::Disconnect,
            "esp_status" => {
                let obj = data
                    .as_object()
                    .ok_or_else(|| SyncError::shape("status object", &data))?;
                PushMessage::Status(obj.get("connected").and_then(Value::as_bool))
            }
            "live_data" => match data {
                Value::Object(delta) => PushMessage::LiveDelta(delta),
                other => return Err(SyncError::shape("live data object", &other)),
            },
            "peak_event" => PushMessage::PeakSingle(PeakEvent::from_json(&data)?),
            "peak_events_batch" => {
                PushMessage::PeakBatch(decode_list(&data, "peak events", PeakEvent::from_json)?)
            }
            "raw_data" => PushMessage::RawSingle(RawEntry::from_json(&data)?),
            "raw_data_batch" => {
                PushMessage::RawBatch(decode_list(&data, "raw entries", RawEntry::from_json)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::Connect => "connect",
            PushMessage::Disconnect => "disconnect",
            PushMessage::Status(_) => "status",
            PushMessage::LiveDelta(_) => "live-delta",
            PushMessage::PeakSingle(_) => "peak-single",
            PushMessage::PeakBatch(_) => "peak-batch",
            PushMessage::RawSingle(_) => "raw-single",
            PushMessage::RawBatch(_) => "raw-batch",
        }
    }
}

/// A live push subscription. Dropping it tears the transport down.
pub struct Subscription {
    rx: mpsc::Receiver<PushMessage>,
    reader: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<PushMessage>, reader: Option<JoinHandle<()>>) -> Self {
        Self { rx, reader }
    }

    /// Next message, or None once the transport is gone for good.
    pub async fn next(&mut self) -> Option<PushMessage> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Something that can open a push subscription.
pub trait PushTransport: Send + Sync + 'static {
    fn subscribe(&self) -> Result<Subscription, SyncError>;
}

// ==============================================================================
// in-process transport
// ==============================================================================

/// Channel-backed transport for embedding the engine behind another client.
///
/// Each `subscribe` replaces the previous feed, so the old subscription sees
/// its channel close.
#[derive(Clone)]
pub struct ChannelTransport {
    capacity: usize,
    feed: Arc<Mutex<Option<mpsc::Sender<PushMessage>>>>,
    subscriptions: Arc<AtomicUsize>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            feed: Arc::new(Mutex::new(None)),
            subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sender for the current subscription, if one is open.
    pub fn sender(&self) -> Option<mpsc::Sender<PushMessage>> {
        self.feed.lock().ok().and_then(|feed| feed.clone())
    }

    /// How many times a subscription has been opened.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

impl PushTransport for ChannelTransport {
    fn subscribe(&self) -> Result<Subscription, SyncError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut feed = self
            .feed
            .lock()
            .map_err(|_| SyncError::Unavailable("channel transport poisoned".into()))?;
        *feed = Some(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Subscription::new(rx, None))
    }
}

// ==============================================================================
// ndjson-over-http transport
// ==============================================================================

/// Holds a long-lived HTTP response open and reads one JSON frame per line.
///
/// Emits `Connect` when the response starts and `Disconnect` when it ends,
/// then retries after `reconnect_delay`.
#[derive(Clone)]
pub struct NdjsonTransport {
    client: reqwest::Client,
    url: String,
    reconnect_delay: Duration,
    capacity: usize,
}

impl NdjsonTransport {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration, capacity: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            reconnect_delay,
            capacity: capacity.max(1),
        }
    }
}

impl PushTransport for NdjsonTransport {
    fn subscribe(&self) -> Result<Subscription, SyncError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let reader = tokio::spawn(read_loop(
            self.client.clone(),
            self.url.clone(),
            self.reconnect_delay,
            tx,
        ));
        Ok(Subscription::new(rx, Some(reader)))
    }
}

async fn read_loop(
    client: reqwest::Client,
    url: String,
    reconnect_delay: Duration,
    tx: mpsc::Sender<PushMessage>,
) {
    loop {
        match stream_once(&client, &url, &tx).await {
            Ok(()) => tracing::info!("push stream {} ended", url),
            Err(e) => tracing::warn!("push stream {} failed: {}", url, e),
        }
        if tx.is_closed() || tx.send(PushMessage::Disconnect).await.is_err() {
            return;
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn stream_once(
    client: &reqwest::Client,
    url: &str,
    tx: &mpsc::Sender<PushMessage>,
) -> Result<(), SyncError> {
    let response = client.get(url).send().await?.error_for_status()?;
    if tx.send(PushMessage::Connect).await.is_err() {
        return Ok(());
    }

    let mut body = response.bytes_stream();
    let mut lines = LineBuffer::new(MAX_FRAME_BYTES);

    while let Some(chunk) = body.next().await {
        for line in lines.push(&chunk?) {
            if let Some(message) = decode_line(&line) {
                if tx.send(message).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

/// Longest push frame kept; anything longer is dropped up to its newline.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Splits a chunked body into newline-terminated frames.
///
/// Only the incoming chunk is scanned for newlines, and the partial line
/// carried between chunks never grows past `max_len`.
#[derive(Debug)]
struct LineBuffer {
    pending: Vec<u8>,
    max_len: usize,
    /// inside an oversized line, waiting for its newline
    skipping: bool,
}

impl LineBuffer {
    fn new(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_len,
            skipping: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let head = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.skipping {
                self.skipping = false;
                continue;
            }
            if self.pending.len() + head.len() > self.max_len {
                tracing::warn!("dropping push frame longer than {} bytes", self.max_len);
                self.pending.clear();
                continue;
            }
            self.pending.extend_from_slice(head);
            lines.push(std::mem::take(&mut self.pending));
        }

        if !self.skipping {
            if self.pending.len() + rest.len() > self.max_len {
                tracing::warn!("dropping push frame longer than {} bytes", self.max_len);
                self.pending.clear();
                self.skipping = true;
            } else {
                self.pending.extend_from_slice(rest);
            }
        }

        lines
    }
}

fn decode_line(line: &[u8]) -> Option<PushMessage> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match PushMessage::from_frame(text) {
        Ok(Some(message)) => Some(message),
        Ok(None) => {
            tracing::debug!("ignoring unknown push event: {}", text);
            None
        }
        Err(e) => {
            tracing::warn!("dropping malformed push frame: {}", e);
            None
        }
    }
}
