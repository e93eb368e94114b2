//! # Runtime events emitted by the supervisor, counters and snapshot controller.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Worker lifecycle**: spawn, callback open/close, play/pause acknowledgements
//! - **Fan-in**: the terminal `FinalCount` of a counter
//! - **Snapshot**: activation / deactivation of a version set
//! - **Runtime**: subscriber overflow/panic, shutdown
//!
//! The [`Event`] struct carries the yuno id, a JSON payload (`kw`) used by
//! counter filters, and, for `FinalCount`, the requester and the totals.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use serde_json::json;
//! use yunovisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::YunoOpened)
//!     .with_yuno("0b1c")
//!     .with_kw(json!({"identity_card": {"yuno_id": "0b1c", "pid": 4242}}));
//!
//! assert_eq!(ev.kind, EventKind::YunoOpened);
//! assert_eq!(ev.lookup("identity_card.pid"), Some(&json!(4242)));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use serde_json::Value;

use crate::counter::FinalCount;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    // === Worker lifecycle ===
    /// Worker process spawned, waiting for its callback.
    ///
    /// Sets: `yuno_id`, `kw` = `{pid, launch_id}`
    YunoSpawned,

    /// Spawning the worker process failed.
    ///
    /// Sets: `yuno_id`, `reason`
    YunoSpawnFailed,

    /// Worker connected back and its identity card matched (`ON_OPEN`).
    ///
    /// Sets: `yuno_id`, `kw` = `{yuno_id, identity_card}`
    YunoOpened,

    /// Worker channel closed or its process vanished (`ON_CLOSE`).
    ///
    /// Sets: `yuno_id`, `kw` = `{yuno_id}`
    YunoClosed,

    /// Worker acknowledged a play request.
    ///
    /// Sets: `yuno_id`, `kw` = `{yuno_id, ...ack}`
    YunoPlayed,

    /// Worker acknowledged a pause request.
    ///
    /// Sets: `yuno_id`, `kw` = `{yuno_id, ...ack}`
    YunoPaused,

    /// Identity card mismatch; the connection was rejected and the process killed.
    ///
    /// Sets: `yuno_id`, `reason`
    YunoRejected,

    // === Fan-in ===
    /// Terminal event of a fan-in counter (exactly one per counter).
    ///
    /// Sets: `requester`, `final_count`
    FinalCount,

    // === Snapshot ===
    /// A snapshot was activated and the graph restarted.
    ///
    /// Sets: `reason` = snapshot name
    SnapshotActivated,

    /// A snapshot was deactivated and the graph restarted.
    ///
    /// Sets: `reason` = snapshot name
    SnapshotDeactivated,

    // === Runtime ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason` = `subscriber=<name> info=<panic>`
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` = `subscriber=<name> reason=<full|closed>`
    SubscriberOverflow,

    /// Agent shutdown requested.
    ShutdownRequested,
}

impl EventKind {
    /// Stable wire-style name (used in logs and remote event payloads).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::YunoSpawned => "EV_YUNO_SPAWNED",
            EventKind::YunoSpawnFailed => "EV_YUNO_SPAWN_FAILED",
            EventKind::YunoOpened => "EV_ON_OPEN",
            EventKind::YunoClosed => "EV_ON_CLOSE",
            EventKind::YunoPlayed => "EV_PLAY_YUNO_ACK",
            EventKind::YunoPaused => "EV_PAUSE_YUNO_ACK",
            EventKind::YunoRejected => "EV_YUNO_REJECTED",
            EventKind::FinalCount => "EV_FINAL_COUNT",
            EventKind::SnapshotActivated => "EV_SNAP_ACTIVATED",
            EventKind::SnapshotDeactivated => "EV_SNAP_DEACTIVATED",
            EventKind::SubscriberPanicked => "EV_SUBSCRIBER_PANICKED",
            EventKind::SubscriberOverflow => "EV_SUBSCRIBER_OVERFLOW",
            EventKind::ShutdownRequested => "EV_SHUTDOWN_REQUESTED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of whoever issued a command; terminal fan-in events are addressed to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requester(Arc<str>);

impl Requester {
    /// Creates a requester identity.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Yuno the event is about, if applicable.
    pub yuno_id: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, snapshot name).
    pub reason: Option<Arc<str>>,
    /// Event payload; counter filters match against it.
    pub kw: Option<Arc<Value>>,
    /// Addressee of a `FinalCount`.
    pub requester: Option<Requester>,
    /// Totals of a `FinalCount`.
    pub final_count: Option<FinalCount>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            yuno_id: None,
            reason: None,
            kw: None,
            requester: None,
            final_count: None,
        }
    }

    /// Attaches a yuno id.
    #[inline]
    pub fn with_yuno(mut self, yuno_id: impl Into<Arc<str>>) -> Self {
        self.yuno_id = Some(yuno_id.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a JSON payload.
    #[inline]
    pub fn with_kw(mut self, kw: Value) -> Self {
        self.kw = Some(Arc::new(kw));
        self
    }

    /// Attaches the requester identity.
    #[inline]
    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = Some(requester);
        self
    }

    /// Attaches counter totals.
    #[inline]
    pub fn with_final_count(mut self, count: FinalCount) -> Self {
        self.final_count = Some(count);
        self
    }

    /// Resolves a dotted path (`"identity_card.yuno_id"`) inside `kw`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut cur = self.kw.as_deref()?;
        for part in path.split('.') {
            cur = cur.get(part)?;
        }
        Some(cur)
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }
}
