//! # LogWriter: tracing-backed event logger
//!
//! A subscriber that renders every bus [`Event`] through `tracing`.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO yunovisor: spawned yuno_id=1f0e.. pid=4242 launch_id=1729..
//! INFO yunovisor: on_open yuno_id=1f0e..
//! WARN yunovisor: rejected yuno_id=1f0e.. reason="role is \"x\", expected \"y\""
//! INFO yunovisor: final count requester=cli-1 ok=true cur_count=2 max_count=2
//! ```

use async_trait::async_trait;
use tracing::{info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let yuno_id = e.yuno_id.as_deref().unwrap_or("");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::YunoSpawned => {
                let pid = e.lookup("pid").and_then(|v| v.as_u64());
                let launch_id = e.lookup("launch_id").and_then(|v| v.as_u64());
                info!(yuno_id, ?pid, ?launch_id, "spawned");
            }
            EventKind::YunoSpawnFailed => warn!(yuno_id, reason, "spawn failed"),
            EventKind::YunoOpened => info!(yuno_id, "on_open"),
            EventKind::YunoClosed => info!(yuno_id, "on_close"),
            EventKind::YunoPlayed => info!(yuno_id, "playing"),
            EventKind::YunoPaused => info!(yuno_id, "paused"),
            EventKind::YunoRejected => warn!(yuno_id, reason, "rejected"),
            EventKind::FinalCount => {
                let requester = e.requester.as_ref().map(|r| r.as_str()).unwrap_or("");
                match &e.final_count {
                    Some(fc) if fc.ok => info!(
                        requester,
                        ok = fc.ok,
                        cur_count = fc.cur_count,
                        max_count = fc.max_count,
                        info = %fc.info,
                        "final count"
                    ),
                    Some(fc) => warn!(
                        requester,
                        ok = fc.ok,
                        cur_count = fc.cur_count,
                        max_count = fc.max_count,
                        info = %fc.info,
                        "final count"
                    ),
                    None => warn!(requester, "final count without totals"),
                }
            }
            EventKind::SnapshotActivated => info!(snap = reason, "snapshot activated"),
            EventKind::SnapshotDeactivated => info!(snap = reason, "snapshot deactivated"),
            EventKind::SubscriberOverflow => warn!(reason, "subscriber overflow"),
            EventKind::SubscriberPanicked => warn!(reason, "subscriber panicked"),
            EventKind::ShutdownRequested => info!("shutdown requested"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
