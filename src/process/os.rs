//! Real [`ProcessControl`] backed by `tokio::process` and `kill(2)`.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ProcessControl, ProcessError};

/// Spawns detached worker processes.
///
/// Children outlive the agent (`kill_on_drop(false)`); a background task
/// reaps each one so no zombie is left behind.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcess;

impl OsProcess {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessControl for OsProcess {
    async fn spawn(
        &self,
        exe: &Path,
        argv: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<u32, ProcessError> {
        let mut cmd = Command::new(exe);
        cmd.args(argv)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(format!("{}: {e}", exe.display())))?;
        let pid = child
            .id()
            .ok_or_else(|| ProcessError::SpawnFailed("failed to get process ID".to_string()))?;

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(pid, %status, "child exited"),
                Err(e) => warn!(pid, error = %e, "waiting for child failed"),
            }
        });
        Ok(pid)
    }

    async fn signal(&self, pid: u32, signal: Signal) -> Result<(), ProcessError> {
        let Ok(raw) = i32::try_from(pid) else {
            return Err(ProcessError::NoSuchProcess { pid });
        };
        if raw <= 0 {
            return Err(ProcessError::NoSuchProcess { pid });
        }
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(ProcessError::NoSuchProcess { pid }),
            Err(e) => Err(ProcessError::SignalFailed {
                pid,
                signal,
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_missing_executable_fails() {
        let err = OsProcess::new()
            .spawn(Path::new("/nonexistent/yuno"), &[], &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn zero_pid_is_never_signalled() {
        let err = OsProcess::new().signal(0, Signal::SIGTERM).await.unwrap_err();
        assert!(matches!(err, ProcessError::NoSuchProcess { pid: 0 }));
    }

    #[tokio::test]
    async fn spawned_child_can_be_killed() {
        let os = OsProcess::new();
        let pid = os
            .spawn(Path::new("sleep"), &["30".to_string()], &BTreeMap::new())
            .await
            .unwrap();
        assert!(pid > 0);
        os.signal(pid, Signal::SIGKILL).await.unwrap();
    }
}
