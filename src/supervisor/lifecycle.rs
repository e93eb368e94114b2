//! Commands the agent issues to yunos: run, kill, play, pause, disable ...

use std::cmp::Ordering;

use nix::sys::signal::Signal;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{Outcome, WorkerSupervisor};
use crate::config::KillMode;
use crate::error::AgentError;
use crate::events::{Event, EventKind};
use crate::process::{LaunchScript, ProcessError};
use crate::resources::{Binary, Configuration, Filter, Realm, Resource, ResourceKind, Yuno, version};
use crate::store::WriteMode;

impl WorkerSupervisor {
    /// Resolves the instance `(id, version)` of `R`, falling back to the
    /// current instance of `id` when that exact version is gone.
    async fn resolve<R: Resource>(&self, id: &str, ver: &str) -> Result<R, AgentError> {
        let exact: Vec<R> = self
            .graph
            .list_instances(&Filter::new().eq("id", id).eq("version", ver))
            .await?;
        if let Some(rec) = exact.into_iter().next() {
            return Ok(rec);
        }
        let current: Option<R> = self.graph.get_by_id(id).await?;
        match current {
            Some(rec) => {
                warn!(kind = %R::KIND, id, wanted = ver, using = rec.version(), "version not found, using current");
                Ok(rec)
            }
            None => Err(AgentError::not_found(R::KIND, format!("{id} {ver}"))),
        }
    }

    /// Spawns the process of an enabled, non-running yuno.
    ///
    /// The record keeps `running = false`; it flips when the worker calls back.
    pub async fn run(&self, yuno_id: &str) -> Result<Outcome, AgentError> {
        let mut yuno = self.fetch(yuno_id).await?;
        if yuno.disabled {
            return Ok(Outcome::skipped("yuno is disabled"));
        }
        if yuno.running {
            return Ok(Outcome::skipped("yuno is already running"));
        }

        let binary: Binary = self.resolve(&yuno.yuno_role, &yuno.role_version).await?;
        let config: Configuration = self.resolve(&yuno.config_id(), &yuno.name_version).await?;
        let realm: Realm = self
            .graph
            .get_by_id(&yuno.realm_id)
            .await?
            .ok_or_else(|| AgentError::not_found(ResourceKind::Realm, &yuno.realm_id))?;

        let mut wanted = binary.required_services.clone();
        for svc in config.required_services() {
            if !wanted.contains(&svc) {
                wanted.push(svc);
            }
        }
        let mut services = Vec::with_capacity(wanted.len());
        for name in &wanted {
            match self.graph.resolve_service(name, &yuno.realm_id).await? {
                Some(svc) => services.push(svc),
                None => warn!(yuno_id, service = %name, "required service not found"),
            }
        }

        let launch_id = self.state.next_launch_id();
        let script = LaunchScript::build(&self.cfg, &realm, &yuno, &config, &services, launch_id);
        let path = LaunchScript::path_for(&self.cfg.run_root(), &yuno);
        script.write(&path).await?;

        let pid = match self
            .process
            .spawn(&binary.binary, &LaunchScript::argv(&path), &self.cfg.environment)
            .await
        {
            Ok(pid) => pid,
            Err(e) => {
                warn!(yuno_id, error = %e, "spawn failed");
                self.bus.publish(
                    Event::new(EventKind::YunoSpawnFailed)
                        .with_yuno(yuno_id)
                        .with_reason(e.to_string())
                        .with_kw(json!({"yuno_id": yuno_id})),
                );
                return Err(e.into());
            }
        };

        yuno.pid = pid;
        yuno.launch_id = launch_id;
        yuno.running = false;
        self.graph.update(&yuno, WriteMode::Volatile).await?;
        info!(yuno_id, pid, launch_id, "yuno spawned");
        self.bus.publish(
            Event::new(EventKind::YunoSpawned)
                .with_yuno(yuno_id)
                .with_kw(json!({"yuno_id": yuno_id, "pid": pid, "launch_id": launch_id})),
        );
        Ok(Outcome::Done)
    }

    /// Signals a running yuno with the configured kill signal.
    ///
    /// `ESRCH` counts as success: the record is cleared and `YunoClosed` published.
    pub async fn kill(&self, yuno_id: &str) -> Result<Outcome, AgentError> {
        let yuno = self.fetch(yuno_id).await?;
        if !yuno.running {
            return Ok(Outcome::skipped("yuno is not running"));
        }
        self.kill_with(yuno, KillMode::Ordered).await
    }

    /// Signals the process of `yuno` in `mode`; the watcher goes down too
    /// when the mode says so.
    async fn kill_with(&self, yuno: Yuno, mode: KillMode) -> Result<Outcome, AgentError> {
        let signal = self.state.signal_for(mode);
        match self.process.signal(yuno.pid, signal).await {
            Ok(()) => {
                debug!(yuno_id = %yuno.id, pid = yuno.pid, %signal, "kill signal sent");
            }
            Err(ProcessError::NoSuchProcess { pid }) => {
                info!(yuno_id = %yuno.id, pid, "process already gone");
                self.kill_watcher(&yuno, mode).await;
                self.mark_closed(yuno).await?;
                return Ok(Outcome::Done);
            }
            Err(e) => return Err(e.into()),
        }
        self.kill_watcher(&yuno, mode).await;
        Ok(Outcome::Done)
    }

    async fn kill_watcher(&self, yuno: &Yuno, mode: KillMode) {
        if !mode.kills_watcher() || yuno.watcher_pid == 0 {
            return;
        }
        match self.process.signal(yuno.watcher_pid, Signal::SIGKILL).await {
            Ok(()) | Err(ProcessError::NoSuchProcess { .. }) => {}
            Err(e) => warn!(yuno_id = %yuno.id, watcher_pid = yuno.watcher_pid, error = %e, "watcher kill failed"),
        }
    }

    /// Clears the runtime fields, detaches the channel and publishes `YunoClosed`.
    pub(crate) async fn mark_closed(&self, mut yuno: Yuno) -> Result<(), AgentError> {
        self.unbind_yuno(&yuno.id).await;
        yuno.mark_stopped();
        self.graph.update(&yuno, WriteMode::Volatile).await?;
        self.bus.publish(
            Event::new(EventKind::YunoClosed)
                .with_yuno(yuno.id.as_str())
                .with_kw(json!({"yuno_id": yuno.id})),
        );
        Ok(())
    }

    /// Asks a running yuno to start serving; sets `must_play`.
    pub async fn play(&self, yuno_id: &str) -> Result<Outcome, AgentError> {
        let mut yuno = self.fetch(yuno_id).await?;
        if yuno.disabled {
            return Ok(Outcome::skipped("yuno is disabled"));
        }
        if !yuno.must_play {
            yuno.must_play = true;
            yuno = self.graph.update(&yuno, WriteMode::Durable).await?;
        }
        if !yuno.running {
            if yuno.pid != 0 {
                debug!(yuno_id, "play latched while launching");
                return Ok(Outcome::Latched);
            }
            return Ok(Outcome::skipped("yuno is not running"));
        }
        if yuno.playing {
            return Ok(Outcome::skipped("yuno is already playing"));
        }
        self.send(&yuno, "play_yuno", json!({"yuno_id": yuno.id, "launch_id": yuno.launch_id}))
            .await
    }

    /// Asks a playing yuno to stop serving; clears `must_play`.
    pub async fn pause(&self, yuno_id: &str) -> Result<Outcome, AgentError> {
        let mut yuno = self.fetch(yuno_id).await?;
        if yuno.must_play {
            yuno.must_play = false;
            yuno = self.graph.update(&yuno, WriteMode::Durable).await?;
        }
        if !yuno.running {
            return Ok(Outcome::skipped("yuno is not running"));
        }
        if !yuno.playing {
            return Ok(Outcome::skipped("yuno is not playing"));
        }
        self.send(&yuno, "pause_yuno", json!({"yuno_id": yuno.id, "launch_id": yuno.launch_id}))
            .await
    }

    async fn send(&self, yuno: &Yuno, command: &str, payload: serde_json::Value) -> Result<Outcome, AgentError> {
        let Some(channel) = self.channel_of(&yuno.id).await else {
            return Ok(Outcome::skipped("yuno has no open channel"));
        };
        channel.send_command(command, payload).await?;
        debug!(yuno_id = %yuno.id, command, channel = %channel.id(), "command sent");
        Ok(Outcome::Done)
    }

    /// Pauses and force-kills whatever is alive, then marks the yuno disabled.
    pub async fn disable(&self, yuno_id: &str) -> Result<Outcome, AgentError> {
        let yuno = self.fetch(yuno_id).await?;
        if yuno.disabled && yuno.pid == 0 {
            return Ok(Outcome::skipped("yuno is already disabled"));
        }
        let yuno = if yuno.playing {
            self.pause(yuno_id).await?;
            self.fetch(yuno_id).await?
        } else {
            yuno
        };
        if yuno.running {
            self.kill_with(yuno, KillMode::Force).await?;
        } else if yuno.pid != 0 {
            // launching: the process never called back, kill it by pid
            match self.process.signal(yuno.pid, self.state.signal_for(KillMode::Force)).await {
                Ok(()) | Err(ProcessError::NoSuchProcess { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            let mut y = self.fetch(yuno_id).await?;
            y.pid = 0;
            self.graph.update(&y, WriteMode::Volatile).await?;
        }
        let mut yuno = self.fetch(yuno_id).await?;
        yuno.disabled = true;
        yuno.must_play = false;
        self.graph.update(&yuno, WriteMode::Durable).await?;
        info!(yuno_id, "yuno disabled");
        Ok(Outcome::Done)
    }

    pub async fn enable(&self, yuno_id: &str) -> Result<Outcome, AgentError> {
        let mut yuno = self.fetch(yuno_id).await?;
        if !yuno.disabled {
            return Ok(Outcome::skipped("yuno is already enabled"));
        }
        yuno.disabled = false;
        self.graph.update(&yuno, WriteMode::Durable).await?;
        info!(yuno_id, "yuno enabled");
        Ok(Outcome::Done)
    }

    /// Persists `traced` and forwards the switch to a running yuno.
    pub async fn set_trace(&self, yuno_id: &str, on: bool) -> Result<Outcome, AgentError> {
        let mut yuno = self.fetch(yuno_id).await?;
        if yuno.traced != on {
            yuno.traced = on;
            yuno = self.graph.update(&yuno, WriteMode::Durable).await?;
        }
        if !yuno.running {
            return Ok(Outcome::skipped("yuno is not running"));
        }
        let command = if on { "trace_on" } else { "trace_off" };
        self.send(&yuno, command, json!({"yuno_id": yuno.id})).await
    }

    /// Forwards a raw command to a running yuno.
    pub async fn command(
        &self,
        yuno_id: &str,
        command: &str,
        payload: serde_json::Value,
    ) -> Result<Outcome, AgentError> {
        let yuno = self.fetch(yuno_id).await?;
        if !yuno.running {
            return Ok(Outcome::skipped("yuno is not running"));
        }
        self.send(&yuno, command, payload).await
    }

    /// Kills every live yuno instance with `SIGKILL` (watchers included) and
    /// detaches all channels first so late acknowledgements are ignored.
    ///
    /// Walks every stored release, not only the current one: after a
    /// snapshot switch the live instance may no longer be current.
    pub async fn force_kill_all(&self) -> Result<usize, AgentError> {
        let detached = self.detach_all().await;
        let live: Vec<Yuno> = self
            .graph
            .list_instances::<Yuno>(&Filter::new())
            .await?
            .into_iter()
            .filter(|y| y.running || y.pid != 0)
            .collect();
        let signal = self.state.signal_for(KillMode::Force);
        for yuno in &live {
            match self.process.signal(yuno.pid, signal).await {
                Ok(()) | Err(ProcessError::NoSuchProcess { .. }) => {}
                Err(e) => warn!(yuno_id = %yuno.id, pid = yuno.pid, error = %e, "force kill failed"),
            }
            self.kill_watcher(yuno, KillMode::Force).await;
            self.mark_closed(yuno.clone()).await?;
        }
        info!(killed = live.len(), detached, "force killed all yunos");
        Ok(live.len())
    }

    /// Runs every enabled, non-running yuno. Returns the ids launched.
    pub async fn run_enabled_yunos(&self) -> Result<Vec<String>, AgentError> {
        let mut idle: Vec<Yuno> = self
            .graph
            .list(&Filter::new().eq("disabled", false).eq("running", false))
            .await?;
        idle.sort_by(|a, b| match a.yuno_role.cmp(&b.yuno_role) {
            Ordering::Equal => version::compare(&a.yuno_release, &b.yuno_release),
            other => other,
        });
        let mut launched = Vec::new();
        for yuno in idle {
            match self.run(&yuno.id).await {
                Ok(Outcome::Done) => launched.push(yuno.id),
                Ok(other) => debug!(yuno_id = %yuno.id, outcome = %other, "not launched"),
                Err(e) => warn!(yuno_id = %yuno.id, error = %e.as_message(), "run failed"),
            }
        }
        Ok(launched)
    }
}
