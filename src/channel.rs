//! # Channel collaborator.
//!
//! A [`Channel`] is the bidirectional connection between the agent and one
//! running worker (or a console viewer). The transport is not this crate's
//! concern: inbound traffic reaches the agent as `on_open` / `on_close` /
//! acknowledgement calls, outbound traffic goes through this trait.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Process-unique channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl ChannelId {
    /// Allocates a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChannelId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// What a freshly launched worker says about itself when it connects back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCard {
    pub yuno_id: String,
    pub pid: u32,
    #[serde(default)]
    pub watcher_pid: u32,
    pub yuno_role: String,
    #[serde(default)]
    pub yuno_name: String,
    pub yuno_release: String,
    pub realm_id: String,
    #[serde(default)]
    pub playing: bool,
}

/// Errors produced by a channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel {0} is closed")]
    Closed(ChannelId),

    #[error("send on channel {channel} failed: {reason}")]
    Send { channel: ChannelId, reason: String },
}

/// Outbound half of a worker connection.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    fn id(&self) -> ChannelId;

    /// Sends a named command the worker executes (`play_yuno`, `set-trace` ...).
    async fn send_command(&self, name: &str, payload: Value) -> Result<(), ChannelError>;

    /// Sends a named event (console output, notifications).
    async fn send_event(&self, name: &str, payload: Value) -> Result<(), ChannelError>;
}
