//! # Agent: the command surface of one host.
//!
//! The [`Agent`] owns every component and exposes the commands an operator
//! (or a remote controller) issues. Each command answers with a
//! [`CommandReply`]; fan-in commands answer with [`Response::Pending`] whose
//! counter settles once every targeted yuno acknowledged.
//!
//! ## Architecture
//! ```text
//!   execute("run-yuno", kw, requester)
//!        │
//!        ▼
//!   Agent ──► ResourceGraph ──► Persistence (store)
//!     │  └──► WorkerSupervisor ──► ProcessControl (spawn / signal)
//!     │             │        └──► Channel (play_yuno, pause_yuno, ...)
//!     │             └── publish ──► Bus ──► FanInCounter ──► FinalCount
//!     │                              └────► subscriber_listener ──► SubscriberSet
//!     ├──► SnapshotController (stop-the-world switches)
//!     └──► ConsoleRouter (terminal sessions)
//!
//!   worker callbacks: on_open / on_close / on_play_ack / on_pause_ack
//! ```
//!
//! ## Lifecycle
//! - [`Agent::start`] runs every enabled yuno (the boot sweep).
//! - [`Agent::serve`] starts, waits for a termination signal, then shuts down.
//! - [`Agent::shutdown`] force-kills live yunos, closes consoles, stops the
//!   store and drains subscribers within `grace_ms`.

mod builder;
mod commands;
mod dispatch;
mod fanin;
mod params;
mod reply;

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelId, IdentityCard};
use crate::config::{AgentConfig, AgentState};
use crate::console::ConsoleRouter;
use crate::core::shutdown;
use crate::error::AgentError;
use crate::events::{Bus, Event, EventKind};
use crate::graph::ResourceGraph;
use crate::resources::Yuno;
use crate::snapshot::SnapshotController;
use crate::supervisor::WorkerSupervisor;

pub use builder::AgentBuilder;
pub use fanin::{FanIn, Verb};
pub use params::{NewBinary, NewConfig, NewRealm, NewYuno, Removal, YunoSelector};
pub use reply::{CommandReply, Response};

/// One host's agent.
pub struct Agent {
    cfg: Arc<AgentConfig>,
    state: Arc<AgentState>,
    bus: Bus,
    graph: ResourceGraph,
    supervisor: Arc<WorkerSupervisor>,
    snapshots: SnapshotController,
    console: ConsoleRouter,
    token: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn builder(cfg: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(cfg)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    pub fn supervisor(&self) -> &Arc<WorkerSupervisor> {
        &self.supervisor
    }

    pub fn console(&self) -> &ConsoleRouter {
        &self.console
    }

    /// Boot sweep: runs every enabled, non-running yuno.
    pub async fn start(&self) -> Result<Vec<String>, AgentError> {
        let launched = self.supervisor.run_enabled_yunos().await?;
        info!(launched = launched.len(), "agent started");
        Ok(launched)
    }

    /// Starts, then blocks until a termination signal and shuts down.
    pub async fn serve(&self) -> Result<(), AgentError> {
        self.start().await?;
        let signal = shutdown::wait_for_shutdown_signal().await?;
        info!(signal, "termination signal received");
        self.shutdown().await
    }

    /// Force-kills every live yuno and drains the subscribers.
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        let killed = self.supervisor.force_kill_all().await?;
        for console in self.console.list_consoles().await {
            if let Err(e) = self.console.close_console(&console.name).await {
                debug!(console = %console.name, error = %e, "console already gone");
            }
        }
        self.graph.store().stop().await?;

        self.token.cancel();
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = listener {
            if let Err(e) = handle.await {
                warn!(error = %e, "subscriber listener ended abnormally");
            }
        }
        info!(killed, "agent stopped");
        Ok(())
    }

    /// A worker connected back with its identity card.
    pub async fn on_open(
        &self,
        channel: Arc<dyn Channel>,
        card: IdentityCard,
    ) -> Result<Yuno, AgentError> {
        self.supervisor.on_open(channel, card).await
    }

    /// A connection went away: yuno cleanup, then console routes.
    pub async fn on_close(&self, channel: ChannelId) -> Result<Option<String>, AgentError> {
        let yuno = self.supervisor.on_close(channel).await;
        let closed = self.console.on_disconnect(channel).await;
        if !closed.is_empty() {
            debug!(channel = %channel, consoles = ?closed, "consoles closed with their last viewer");
        }
        yuno
    }

    pub async fn on_play_ack(&self, channel: ChannelId) -> Result<(), AgentError> {
        self.supervisor.on_play_ack(channel).await
    }

    pub async fn on_pause_ack(&self, channel: ChannelId) -> Result<(), AgentError> {
        self.supervisor.on_pause_ack(channel).await
    }
}
