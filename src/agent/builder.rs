use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::Agent;
use crate::config::{AgentConfig, AgentState};
use crate::console::{ConsoleRouter, TerminalFactory};
use crate::error::AgentError;
use crate::events::Bus;
use crate::graph::ResourceGraph;
use crate::process::{OsProcess, ProcessControl};
use crate::snapshot::SnapshotController;
use crate::store::{MemoryStore, Persistence};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::supervisor::WorkerSupervisor;

/// Builder for an [`Agent`] with pluggable collaborators.
///
/// Defaults: [`MemoryStore`] persistence, [`OsProcess`] spawning, no
/// terminal factory (consoles unavailable), no subscribers.
pub struct AgentBuilder {
    cfg: AgentConfig,
    store: Option<Arc<dyn Persistence>>,
    process: Option<Arc<dyn ProcessControl>>,
    terminals: Option<Arc<dyn TerminalFactory>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl AgentBuilder {
    pub fn new(cfg: AgentConfig) -> Self {
        Self {
            cfg,
            store: None,
            process: None,
            terminals: None,
            subscribers: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Persistence>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_process(mut self, process: Arc<dyn ProcessControl>) -> Self {
        self.process = Some(process);
        self
    }

    /// Enables consoles.
    pub fn with_terminals(mut self, terminals: Arc<dyn TerminalFactory>) -> Self {
        self.terminals = Some(terminals);
        self
    }

    /// Sets event subscribers.
    ///
    /// Each one receives every bus event through its own bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Wires every component and spawns the subscriber listener.
    ///
    /// Must be called inside a tokio runtime. Fails on an unknown
    /// `signal2kill`.
    pub fn build(self) -> Result<Arc<Agent>, AgentError> {
        let signal = self.cfg.kill_signal()?;
        let grace = self.cfg.grace();
        let cfg = Arc::new(self.cfg);
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let process = self.process.unwrap_or_else(|| Arc::new(OsProcess::new()));
        let graph = ResourceGraph::new(store);
        let state = Arc::new(AgentState::new(signal));
        let supervisor = Arc::new(WorkerSupervisor::new(
            graph.clone(),
            process,
            bus.clone(),
            cfg.clone(),
            state.clone(),
        ));
        let snapshots = SnapshotController::new(graph.clone(), supervisor.clone(), bus.clone());
        let console = match self.terminals {
            Some(factory) => ConsoleRouter::new(factory),
            None => ConsoleRouter::disabled(),
        };

        let token = CancellationToken::new();
        let listener = subscriber_listener(&bus, subs, token.clone(), grace);

        Ok(Arc::new(Agent {
            cfg,
            state,
            bus,
            graph,
            supervisor,
            snapshots,
            console,
            token,
            listener: Mutex::new(Some(listener)),
        }))
    }
}

/// Forwards bus events to the subscribers until `token` is cancelled, then
/// drains them within `grace`.
fn subscriber_listener(
    bus: &Bus,
    set: SubscriberSet,
    token: CancellationToken,
    grace: Duration,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber listener lagged behind the bus");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        while let Ok(ev) = rx.try_recv() {
            set.emit(&ev);
        }
        set.shutdown(grace).await;
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::events::{Event, EventKind};

    #[derive(Default)]
    struct Collect(StdMutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Collect {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.kind);
        }

        fn name(&self) -> &'static str {
            "collect"
        }
    }

    #[tokio::test]
    async fn bad_kill_signal_is_rejected() {
        let cfg = AgentConfig {
            signal2kill: "SIGNOPE".into(),
            ..AgentConfig::default()
        };
        let err = AgentBuilder::new(cfg).build().err().unwrap();
        assert_eq!(err.as_label(), "invalid_input");
    }

    #[tokio::test]
    async fn subscribers_see_events_until_shutdown() {
        let collect = Arc::new(Collect::default());
        let cfg = AgentConfig {
            grace_ms: 500,
            ..AgentConfig::default()
        };
        let agent = AgentBuilder::new(cfg)
            .with_store(Arc::new(MemoryStore::new()))
            .with_process(Arc::new(crate::testing::FakeProcess::new()))
            .with_subscribers(vec![collect.clone()])
            .build()
            .unwrap();

        agent.shutdown().await.unwrap();
        assert!(collect.0.lock().unwrap().contains(&EventKind::ShutdownRequested));
    }
}
