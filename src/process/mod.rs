//! # Process collaborator.
//!
//! The supervisor launches and signals worker processes only through
//! [`ProcessControl`]:
//!
//! ```text
//!   WorkerSupervisor::run  ── LaunchScript::write ──► {run_root}/{realm}/{yuno}.json
//!                          └─ spawn(exe, ["--start", "--config-file", path], env) ──► pid
//!   WorkerSupervisor::kill ── signal(pid, signal2kill) ──► Ok | NoSuchProcess
//! ```

mod os;
mod script;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use thiserror::Error;

pub use os::OsProcess;
pub use script::LaunchScript;

/// Errors produced by the process collaborator.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The executable could not be started.
    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    /// The target pid does not exist (`ESRCH`).
    #[error("no such process: {pid}")]
    NoSuchProcess { pid: u32 },

    /// Any other signalling failure.
    #[error("signal {signal} to {pid} failed: {reason}")]
    SignalFailed {
        pid: u32,
        signal: Signal,
        reason: String,
    },
}

/// Launches and signals operating-system processes.
#[async_trait]
pub trait ProcessControl: Send + Sync + 'static {
    /// Starts `exe` with `argv` and extra environment; returns its pid.
    async fn spawn(
        &self,
        exe: &Path,
        argv: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<u32, ProcessError>;

    /// Sends `signal` to `pid`.
    async fn signal(&self, pid: u32, signal: Signal) -> Result<(), ProcessError>;
}
