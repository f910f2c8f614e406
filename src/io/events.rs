// src/io/events.rs
//
// Classified telemetry lines and the event queue between the read loop and
// whatever renders them. The producer side never blocks: when the consumer
// falls behind, new lines are dropped and counted.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{now_us, LinkState};

// ============================================================================
// Classification
// ============================================================================

/// Heartbeat markers. Matched as case-sensitive substrings.
const PING_MARKERS: [&str; 2] = ["Ping", "Pong"];

/// Which channel a line belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineCategory {
    Message,
    Ping,
}

impl LineCategory {
    /// Classify a trimmed line.
    ///
    /// Any line containing "Ping" or "Pong" anywhere is a heartbeat, so
    /// "Stopping the Ping sweep" lands on the ping channel too. Lowercase
    /// "ping" does not match.
    pub fn classify(text: &str) -> Self {
        if PING_MARKERS.iter().any(|marker| text.contains(marker)) {
            LineCategory::Ping
        } else {
            LineCategory::Message
        }
    }
}

/// One decoded line of telemetry. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClassifiedLine {
    text: String,
    category: LineCategory,
    /// Host UNIX timestamp in microseconds at capture
    timestamp_us: u64,
}

impl ClassifiedLine {
    /// Build a line captured now. The category is derived from the text.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_timestamp(text, now_us())
    }

    pub fn with_timestamp(text: impl Into<String>, timestamp_us: u64) -> Self {
        let text = text.into();
        let category = LineCategory::classify(&text);
        Self {
            text,
            category,
            timestamp_us,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn category(&self) -> LineCategory {
        self.category
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Capture time as local wall clock `HH:MM:SS`
    pub fn clock(&self) -> String {
        let micros = i64::try_from(self.timestamp_us).unwrap_or(i64::MAX);
        match chrono::DateTime::from_timestamp_micros(micros) {
            Some(utc) => utc
                .with_timezone(&chrono::Local)
                .format("%H:%M:%S")
                .to_string(),
            None => "--:--:--".to_string(),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Everything the link reports to its consumer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    StatusChanged { state: LinkState, port: String },
    Message { line: ClassifiedLine },
    Ping { line: ClassifiedLine },
    Error { cause: String },
}

impl LinkEvent {
    /// Route a line to the channel its category names
    pub fn from_line(line: ClassifiedLine) -> Self {
        match line.category() {
            LineCategory::Message => LinkEvent::Message { line },
            LineCategory::Ping => LinkEvent::Ping { line },
        }
    }

    /// Telemetry line rather than a control event
    fn is_line(&self) -> bool {
        matches!(self, LinkEvent::Message { .. } | LinkEvent::Ping { .. })
    }
}

/// Consumer of link events (a log view, a terminal, a test recorder)
pub trait EventSink {
    fn on_message(&mut self, line: &ClassifiedLine);
    fn on_ping(&mut self, line: &ClassifiedLine);
    fn on_status_change(&mut self, state: LinkState, port: &str);
    fn on_error(&mut self, cause: &str);

    fn dispatch(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::StatusChanged { state, port } => self.on_status_change(*state, port),
            LinkEvent::Message { line } => self.on_message(line),
            LinkEvent::Ping { line } => self.on_ping(line),
            LinkEvent::Error { cause } => self.on_error(cause),
        }
    }
}

// ============================================================================
// Event Queue
// ============================================================================

/// Default number of line events the queue holds before dropping
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Create an event queue holding at most `capacity` undelivered lines.
///
/// Only `Message` and `Ping` events count against the capacity. Status and
/// error events are always queued, in order with the lines around them, so a
/// consumer that fell behind still learns the link went down.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queued_lines = Arc::new(AtomicUsize::new(0));
    let sender = EventSender {
        tx,
        line_capacity: capacity.max(1),
        queued_lines: queued_lines.clone(),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, EventReceiver { rx, queued_lines })
}

/// Producer half. Cheap to clone; safe to use from any thread.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<LinkEvent>,
    line_capacity: usize,
    /// Line events sent but not yet taken by the receiver
    queued_lines: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Queue an event without waiting.
    /// A line arriving at a full queue is dropped; a closed queue ignores everything.
    pub fn emit(&self, event: LinkEvent) {
        if !event.is_line() {
            let _ = self.tx.send(event);
            return;
        }

        let reserved = self
            .queued_lines
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.line_capacity).then_some(n + 1)
            });
        if reserved.is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tlog!(
                "[link] Event queue full, dropped {:?} event (total dropped: {})",
                event_kind(&event),
                total
            );
            return;
        }

        if self.tx.send(event).is_err() {
            self.queued_lines.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Number of line events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn event_kind(event: &LinkEvent) -> &'static str {
    match event {
        LinkEvent::StatusChanged { .. } => "status_changed",
        LinkEvent::Message { .. } => "message",
        LinkEvent::Ping { .. } => "ping",
        LinkEvent::Error { .. } => "error",
    }
}

/// Consumer half. Drained on the consumer's own schedule.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<LinkEvent>,
    queued_lines: Arc<AtomicUsize>,
}

impl EventReceiver {
    /// Take every queued event without waiting
    pub fn drain(&mut self) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_next() {
            events.push(event);
        }
        events
    }

    /// Drain queued events straight into a sink. Returns how many were delivered.
    pub fn drain_into<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.try_next() {
            sink.dispatch(&event);
            delivered += 1;
        }
        delivered
    }

    /// Wait for the next event. `None` once every sender is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        let event = self.rx.recv().await?;
        Some(self.release(event))
    }

    fn try_next(&mut self) -> Option<LinkEvent> {
        let event = self.rx.try_recv().ok()?;
        Some(self.release(event))
    }

    /// Give the slot of a taken line back to the producers
    fn release(&self, event: LinkEvent) -> LinkEvent {
        if event.is_line() {
            self.queued_lines.fetch_sub(1, Ordering::AcqRel);
        }
        event
    }
}

// ============================================================================
// Tests
// ============================================================================
