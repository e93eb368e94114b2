//! # Worker supervisor: the yuno lifecycle state machine.
//!
//! [`WorkerSupervisor`] drives OS processes for yuno records. It never trusts a
//! cached record: every operation re-fetches the yuno from the graph before
//! acting on it.
//!
//! ## State machine
//! ```text
//!                 enable                 run (spawn)            on_open (card ok)
//!   Disabled ◄──────────► Stopped ─────────────────► Launching ─────────────────► Running
//!      ▲        disable      ▲                                                    │    ▲
//!      │                     │ on_close / ESRCH                          play ack │    │ pause ack
//!      │                     └──────────────────────────────────────────────┐     ▼    │
//!      └──── disable (pause, then kill under force) ◄──────────────────── Playing ─────┘
//! ```
//!
//! ## Rules
//! - `running` flips to true only in [`on_open`](WorkerSupervisor::on_open),
//!   never at spawn time; `playing` only on the play/pause acknowledgement.
//! - Runtime fields are written with `WriteMode::Volatile`; `disabled`,
//!   `must_play` and `traced` are durable.
//! - An operation whose precondition does not hold returns
//!   [`Outcome::Skipped`], not an error.
//! - A play requested while Launching is latched in `must_play` and replayed
//!   by `on_open`.
//! - Acknowledgements arriving on a channel whose yuno was detached (by a
//!   force-kill) are ignored.

mod callbacks;
mod lifecycle;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::channel::{Channel, ChannelId};
use crate::config::{AgentConfig, AgentState};
use crate::error::AgentError;
use crate::events::Bus;
use crate::graph::ResourceGraph;
use crate::process::ProcessControl;
use crate::resources::{ResourceKind, Yuno};

/// Result of a lifecycle operation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The action was performed (or sent).
    Done,
    /// Precondition not met; nothing was done.
    Skipped { reason: String },
    /// Play stored in `must_play`, replayed when the worker calls back.
    Latched,
}

impl Outcome {
    pub(crate) fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done => f.write_str("done"),
            Outcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            Outcome::Latched => f.write_str("latched until the yuno opens"),
        }
    }
}

/// One open connection and the yuno it belongs to (if any).
struct ChannelSlot {
    channel: Arc<dyn Channel>,
    yuno_id: Option<String>,
}

/// Lifecycle driver for yuno processes.
pub struct WorkerSupervisor {
    graph: ResourceGraph,
    process: Arc<dyn ProcessControl>,
    bus: Bus,
    cfg: Arc<AgentConfig>,
    state: Arc<AgentState>,
    channels: RwLock<HashMap<ChannelId, ChannelSlot>>,
}

impl WorkerSupervisor {
    pub fn new(
        graph: ResourceGraph,
        process: Arc<dyn ProcessControl>,
        bus: Bus,
        cfg: Arc<AgentConfig>,
        state: Arc<AgentState>,
    ) -> Self {
        Self {
            graph,
            process,
            bus,
            cfg,
            state,
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Re-fetches the current record of `yuno_id`.
    pub(crate) async fn fetch(&self, yuno_id: &str) -> Result<Yuno, AgentError> {
        self.graph
            .get_by_id(yuno_id)
            .await?
            .ok_or_else(|| AgentError::not_found(ResourceKind::Yuno, yuno_id))
    }

    /// Channel currently owned by `yuno_id`.
    pub async fn channel_of(&self, yuno_id: &str) -> Option<Arc<dyn Channel>> {
        self.channels
            .read()
            .await
            .values()
            .find(|slot| slot.yuno_id.as_deref() == Some(yuno_id))
            .map(|slot| slot.channel.clone())
    }

    /// Any open channel by id (yuno or console connection).
    pub async fn channel(&self, id: ChannelId) -> Option<Arc<dyn Channel>> {
        self.channels
            .read()
            .await
            .get(&id)
            .map(|slot| slot.channel.clone())
    }

    /// Yuno bound to channel `id`, if still attached.
    pub async fn yuno_of(&self, id: ChannelId) -> Option<String> {
        self.channels
            .read()
            .await
            .get(&id)
            .and_then(|slot| slot.yuno_id.clone())
    }

    /// Registers a connection that is not (yet) bound to a yuno.
    pub async fn register_channel(&self, channel: Arc<dyn Channel>) {
        self.channels
            .write()
            .await
            .entry(channel.id())
            .or_insert(ChannelSlot {
                channel,
                yuno_id: None,
            });
    }

    /// Drops the yuno binding of every channel, so late acks are ignored.
    pub(crate) async fn detach_all(&self) -> usize {
        let mut guard = self.channels.write().await;
        let mut n = 0;
        for slot in guard.values_mut() {
            if slot.yuno_id.take().is_some() {
                n += 1;
            }
        }
        n
    }

    async fn bind_channel(&self, channel: Arc<dyn Channel>, yuno_id: &str) {
        let mut guard = self.channels.write().await;
        for slot in guard.values_mut() {
            if slot.yuno_id.as_deref() == Some(yuno_id) {
                slot.yuno_id = None;
            }
        }
        guard.insert(
            channel.id(),
            ChannelSlot {
                channel,
                yuno_id: Some(yuno_id.to_string()),
            },
        );
    }

    async fn unbind_yuno(&self, yuno_id: &str) {
        let mut guard = self.channels.write().await;
        for slot in guard.values_mut() {
            if slot.yuno_id.as_deref() == Some(yuno_id) {
                slot.yuno_id = None;
            }
        }
    }
}
