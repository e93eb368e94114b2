//! # Snapshot controller: stop-the-world version switches.
//!
//! Activating or deactivating a snapshot changes which binary/configuration
//! instance every lookup resolves to. Yunos resolve their versions at run
//! time, so the only safe way to apply a switch is to restart everything:
//!
//! ```text
//!   activate(name) / deactivate(name)
//!     1. store.activate_snap / deactivate_snap
//!     2. supervisor.force_kill_all()        SIGKILL + watchers, channels detached
//!     3. store.stop(); store.start()        re-read the active versions
//!     4. supervisor.run_enabled_yunos()     same sweep as agent boot
//!     5. publish SnapshotActivated / SnapshotDeactivated
//! ```
//!
//! Step 1 failing aborts with nothing changed; steps 2-4 always run once the
//! switch is made.

use std::sync::Arc;

use tracing::info;

use crate::error::AgentError;
use crate::events::{Bus, Event, EventKind};
use crate::graph::ResourceGraph;
use crate::store::Snap;
use crate::supervisor::WorkerSupervisor;

/// Applies snapshot switches across the graph and the running yunos.
pub struct SnapshotController {
    graph: ResourceGraph,
    supervisor: Arc<WorkerSupervisor>,
    bus: Bus,
}

/// What a switch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    pub snap: String,
    pub killed: usize,
    pub launched: Vec<String>,
}

impl SnapshotController {
    pub fn new(graph: ResourceGraph, supervisor: Arc<WorkerSupervisor>, bus: Bus) -> Self {
        Self {
            graph,
            supervisor,
            bus,
        }
    }

    pub async fn list(&self) -> Result<Vec<Snap>, AgentError> {
        Ok(self.graph.store().list_snaps().await?)
    }

    /// Records the currently active instances under `name`.
    pub async fn shoot(&self, name: &str, description: &str) -> Result<Snap, AgentError> {
        let snap = self.graph.store().shoot_snap(name, description).await?;
        info!(snap = name, nodes = snap.nodes.len(), "snapshot shot");
        Ok(snap)
    }

    pub async fn activate(&self, name: &str) -> Result<SwitchReport, AgentError> {
        self.graph.store().activate_snap(name).await?;
        let report = self.restart_world(name).await?;
        self.bus
            .publish(Event::new(EventKind::SnapshotActivated).with_reason(name));
        Ok(report)
    }

    pub async fn deactivate(&self, name: &str) -> Result<SwitchReport, AgentError> {
        self.graph.store().deactivate_snap(name).await?;
        let report = self.restart_world(name).await?;
        self.bus
            .publish(Event::new(EventKind::SnapshotDeactivated).with_reason(name));
        Ok(report)
    }

    async fn restart_world(&self, name: &str) -> Result<SwitchReport, AgentError> {
        let killed = self.supervisor.force_kill_all().await?;
        let store = self.graph.store();
        store.stop().await?;
        store.start().await?;
        let launched = self.supervisor.run_enabled_yunos().await?;
        info!(snap = name, killed, launched = launched.len(), "snapshot applied");
        Ok(SwitchReport {
            snap: name.to_string(),
            killed,
            launched,
        })
    }
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::Signal;

    use super::*;
    use crate::channel::Channel;
    use crate::resources::{Binary, Yuno};
    use crate::testing::Rig;

    fn controller(rig: &Rig) -> SnapshotController {
        SnapshotController::new(rig.graph.clone(), rig.supervisor.clone(), rig.bus.clone())
    }

    #[tokio::test]
    async fn activate_restarts_every_enabled_yuno() {
        let rig = Rig::new().await;
        let a = rig.yuno("emailsender", "a").await;
        let b = rig.yuno("emailsender", "b").await;
        let ch = rig.start(&a.id).await;
        rig.supervisor.disable(&b.id).await.unwrap();
        let ctl = controller(&rig);
        ctl.shoot("v1", "baseline").await.unwrap();
        let mut rx = rig.bus.subscribe();

        let report = ctl.activate("v1").await.unwrap();
        assert_eq!(report.killed, 1);
        assert_eq!(report.launched, vec![a.id.clone()]);
        assert!(rig.process.signalled().contains(&(1000, Signal::SIGKILL)));
        assert_eq!(rig.supervisor.yuno_of(ch.id()).await, None);

        let relaunched: Yuno = rig.fetch(&a.id).await;
        assert_eq!(relaunched.pid, 1001);
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert_eq!(kinds.last(), Some(&EventKind::SnapshotActivated));
    }

    #[tokio::test]
    async fn snapshot_switches_which_release_runs() {
        let rig = Rig::new().await;
        let y = rig.yuno("emailsender", "a").await;
        let ctl = controller(&rig);
        ctl.shoot("old", "").await.unwrap();

        let mut newer = Binary::new("emailsender", "2.0");
        newer.binary = "/opt/emailsender-2".into();
        rig.graph.create(&newer).await.unwrap();
        let mut next = Yuno::new(&rig.realm.id, "emailsender", "a", "2.0", "1");
        next.id = y.id.clone();
        rig.graph.create(&next).await.unwrap();
        assert_eq!(rig.fetch(&y.id).await.yuno_release, "2.0-1");

        ctl.activate("old").await.unwrap();
        assert_eq!(rig.fetch(&y.id).await.yuno_release, "1.0-1");
        let spawned = rig.process.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].0.to_str(), Some("/opt/emailsender"));

        let report = ctl.deactivate("old").await.unwrap();
        // the 1.0-1 release was still launching and is no longer current
        assert_eq!(report.killed, 1);
        assert!(rig.process.signalled().contains(&(1000, Signal::SIGKILL)));
        let spawned = rig.process.spawned();
        assert_eq!(spawned.len(), 2);
        assert_eq!(spawned[1].0.to_str(), Some("/opt/emailsender-2"));
        assert_eq!(rig.fetch(&y.id).await.yuno_release, "2.0-1");
    }

    #[tokio::test]
    async fn unknown_snapshot_changes_nothing() {
        let rig = Rig::new().await;
        let a = rig.yuno("emailsender", "a").await;
        rig.start(&a.id).await;
        let err = controller(&rig).activate("missing").await.unwrap_err();
        assert_eq!(err.as_label(), "store_error");
        assert!(rig.fetch(&a.id).await.running);
        assert!(rig.process.signalled().is_empty());
    }
}
