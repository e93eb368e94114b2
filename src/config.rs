//! # Agent configuration and process-wide mutable state.
//!
//! Provides [`AgentConfig`] centralized settings for the agent runtime, and
//! [`AgentState`] the small amount of mutable state shared by supervisor
//! operations (kill signal, launch-id counter).
//!
//! ## Sentinel values
//! - `counter_timeout_ms = 0` → fan-in counters never expire
//! - `bin_dir = ""` / `run_dir = ""` → derived from `work_dir`
//! - `bus_capacity = 0` → clamped to 1

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AgentError;

/// Global configuration for the agent.
///
/// ## Field semantics
/// - `work_dir`: root of agent data
/// - `bin_dir`: binary install root (`""` = `{work_dir}/repos`)
/// - `run_dir`: launch scripts root (`""` = `{work_dir}/realms`)
/// - `agent_url`: callback connector url injected into every launch script
/// - `signal2kill`: ordered kill signal name (e.g. `"SIGQUIT"`)
/// - `counter_timeout_ms`: default fan-in expiration (`0` = never)
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `grace_ms`: time allowed for subscribers to drain on shutdown
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Root of agent data.
    pub work_dir: PathBuf,
    /// Binary install root.
    pub bin_dir: PathBuf,
    /// Launch scripts root.
    pub run_dir: PathBuf,
    /// Url workers use to call back into the agent.
    pub agent_url: String,
    /// Owner of this node, injected into launch scripts.
    pub node_owner: String,
    /// Ordered kill signal.
    pub signal2kill: String,
    /// Default fan-in counter expiration in milliseconds.
    pub counter_timeout_ms: u64,
    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
    /// Shutdown grace in milliseconds.
    pub grace_ms: u64,
    /// Extra entries merged into the `global` section of every launch script.
    pub global_variables: Map<String, Value>,
    /// Extra environment variables passed to every spawned worker.
    pub environment: BTreeMap<String, String>,
}

impl AgentConfig {
    /// Loads the configuration from a JSON file; missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: AgentConfig = serde_json::from_str(&raw)
            .map_err(|e| AgentError::InvalidInput(format!("config {}: {e}", path.display())))?;
        cfg.kill_signal()?;
        Ok(cfg)
    }

    /// Returns the binary install root.
    pub fn bin_root(&self) -> PathBuf {
        if self.bin_dir.as_os_str().is_empty() {
            self.work_dir.join("repos")
        } else {
            self.bin_dir.clone()
        }
    }

    /// Returns the launch scripts root.
    pub fn run_root(&self) -> PathBuf {
        if self.run_dir.as_os_str().is_empty() {
            self.work_dir.join("realms")
        } else {
            self.run_dir.clone()
        }
    }

    /// Returns the default counter expiration as an `Option`.
    ///
    /// - `None` → counters wait forever
    /// - `Some(d)` → counters give up after `d`
    #[inline]
    pub fn counter_timeout(&self) -> Option<Duration> {
        match self.counter_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the shutdown grace period.
    #[inline]
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Parses [`signal2kill`](Self::signal2kill).
    pub fn kill_signal(&self) -> Result<Signal, AgentError> {
        Signal::from_str(&self.signal2kill).map_err(|_| {
            AgentError::InvalidInput(format!("unknown signal2kill {:?}", self.signal2kill))
        })
    }
}

impl Default for AgentConfig {
    /// Default configuration:
    ///
    /// - `work_dir = /yuneta`
    /// - `agent_url = ws://127.0.0.1:1991`
    /// - `signal2kill = SIGQUIT`
    /// - `counter_timeout_ms = 10000`
    /// - `bus_capacity = 1024`
    /// - `grace_ms = 5000`
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/yuneta"),
            bin_dir: PathBuf::new(),
            run_dir: PathBuf::new(),
            agent_url: "ws://127.0.0.1:1991".to_string(),
            node_owner: String::new(),
            signal2kill: "SIGQUIT".to_string(),
            counter_timeout_ms: 10_000,
            bus_capacity: 1024,
            grace_ms: 5_000,
            global_variables: Map::new(),
            environment: BTreeMap::new(),
        }
    }
}

/// How one supervisor action delivers a kill.
///
/// Chosen per action and passed down explicitly; nothing about it is shared
/// between concurrent actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    /// Configured `signal2kill`; the watcher process is left alone.
    Ordered,
    /// `SIGKILL` to the process and to its watcher.
    Force,
}

impl KillMode {
    #[inline]
    pub fn kills_watcher(self) -> bool {
        matches!(self, KillMode::Force)
    }
}

/// Mutable process-wide state used by supervisor operations.
///
/// ### Rules
/// - `signal2kill` is fixed at construction; escalation to `SIGKILL` is a
///   [`KillMode`] argument of the action, never a change of this state.
/// - Launch ids are seeded from wall-clock milliseconds so they keep
///   increasing across agent restarts.
#[derive(Debug)]
pub struct AgentState {
    signal2kill: Signal,
    launch_seq: AtomicU64,
}

impl AgentState {
    /// Creates the state from the parsed kill signal.
    pub fn new(signal2kill: Signal) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            signal2kill,
            launch_seq: AtomicU64::new(seed),
        }
    }

    /// Configured ordered kill signal.
    pub fn signal2kill(&self) -> Signal {
        self.signal2kill
    }

    /// Signal a kill in `mode` sends to the yuno process.
    pub fn signal_for(&self, mode: KillMode) -> Signal {
        match mode {
            KillMode::Ordered => self.signal2kill,
            KillMode::Force => Signal::SIGKILL,
        }
    }

    /// Returns the next launch id (strictly increasing).
    pub fn next_launch_id(&self) -> u64 {
        self.launch_seq.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_dirs_from_work_dir() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.bin_root(), PathBuf::from("/yuneta/repos"));
        assert_eq!(cfg.run_root(), PathBuf::from("/yuneta/realms"));
        assert_eq!(cfg.kill_signal().unwrap(), Signal::SIGQUIT);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: AgentConfig =
            serde_json::from_str(r#"{"signal2kill": "SIGTERM", "counter_timeout_ms": 0}"#).unwrap();
        assert_eq!(cfg.kill_signal().unwrap(), Signal::SIGTERM);
        assert!(cfg.counter_timeout().is_none());
        assert_eq!(cfg.bus_capacity, 1024);
    }

    #[test]
    fn unknown_signal_is_rejected() {
        let cfg = AgentConfig {
            signal2kill: "SIGNOPE".into(),
            ..AgentConfig::default()
        };
        assert!(cfg.kill_signal().is_err());
    }

    #[test]
    fn kill_mode_picks_signal_without_touching_state() {
        let state = AgentState::new(Signal::SIGQUIT);
        assert_eq!(state.signal_for(KillMode::Force), Signal::SIGKILL);
        assert_eq!(state.signal_for(KillMode::Ordered), Signal::SIGQUIT);
        assert_eq!(state.signal2kill(), Signal::SIGQUIT);
        assert!(KillMode::Force.kills_watcher());
        assert!(!KillMode::Ordered.kills_watcher());
    }

    #[test]
    fn launch_ids_increase() {
        let state = AgentState::new(Signal::SIGQUIT);
        let a = state.next_launch_id();
        let b = state.next_launch_id();
        assert!(b > a);
        assert!(a > 1_000_000);
    }
}
