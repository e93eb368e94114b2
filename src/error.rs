//! Error types used by the agent core and its collaborators.
//!
//! This module defines the main error enum:
//!
//! - [`AgentError`]: every failure the orchestration engine can surface.
//!
//! Collaborator errors ([`StoreError`], [`ProcessError`], [`ChannelError`])
//! live next to their traits and convert into [`AgentError`] via `From`.
//!
//! Like every error enum in this crate it provides `as_label` / `as_message`
//! helpers for logging and for building command replies.

use thiserror::Error;

use crate::channel::ChannelError;
use crate::console::ConsoleError;
use crate::process::ProcessError;
use crate::resources::ResourceKind;
use crate::store::StoreError;

/// # Errors produced by the agent core.
///
/// The first six variants form the public taxonomy reported to callers;
/// the remaining ones wrap collaborator failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AgentError {
    /// A document with the same identity tuple already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Resource kind.
        kind: ResourceKind,
        /// Identity that collided.
        id: String,
    },

    /// Delete blocked by live references (overridable with `force`).
    #[error("{kind} {id} in use by {count} yuno(s)")]
    InUse {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource id.
        id: String,
        /// Number of referencing (or running) yunos.
        count: usize,
    },

    /// Resource or worker absent.
    #[error("{kind} not found: {what}")]
    NotFound {
        /// Resource kind.
        kind: ResourceKind,
        /// Description of what was searched for.
        what: String,
    },

    /// No free port left in the realm's configured ranges.
    #[error("port range exhausted in realm {realm_id}")]
    RangeExhausted {
        /// Realm whose ranges are exhausted.
        realm_id: String,
    },

    /// A worker presented an identity card that does not match its record.
    #[error("identity mismatch for yuno {yuno_id}: {field} expected {expected:?} got {got:?}")]
    IntegrityViolation {
        /// Yuno id claimed by the connection.
        yuno_id: String,
        /// First mismatching field.
        field: &'static str,
        /// Value stored in the graph.
        expected: String,
        /// Value presented by the process.
        got: String,
    },

    /// Signal sent to a pid that no longer exists.
    #[error("no such process: {pid}")]
    NoSuchProcess {
        /// Target pid.
        pid: u32,
    },

    /// Caller supplied an unusable parameter.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persistence collaborator failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Process collaborator failure.
    #[error(transparent)]
    Process(ProcessError),

    /// Channel collaborator failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Console router or terminal failure.
    #[error(transparent)]
    Console(#[from] ConsoleError),

    /// Local filesystem failure (binary install, launch scripts).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProcessError> for AgentError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::NoSuchProcess { pid } => AgentError::NoSuchProcess { pid },
            other => AgentError::Process(other),
        }
    }
}

impl AgentError {
    /// Shorthand for [`AgentError::NotFound`].
    pub fn not_found(kind: ResourceKind, what: impl Into<String>) -> Self {
        AgentError::NotFound {
            kind,
            what: what.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use yunovisor::AgentError;
    ///
    /// let err = AgentError::RangeExhausted { realm_id: "r1".into() };
    /// assert_eq!(err.as_label(), "range_exhausted");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            AgentError::AlreadyExists { .. } => "already_exists",
            AgentError::InUse { .. } => "in_use",
            AgentError::NotFound { .. } => "not_found",
            AgentError::RangeExhausted { .. } => "range_exhausted",
            AgentError::IntegrityViolation { .. } => "integrity_violation",
            AgentError::NoSuchProcess { .. } => "no_such_process",
            AgentError::InvalidInput(_) => "invalid_input",
            AgentError::Store(_) => "store_error",
            AgentError::Process(_) => "process_error",
            AgentError::Channel(_) => "channel_error",
            AgentError::Console(e) => e.as_label(),
            AgentError::Io(_) => "io_error",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            AgentError::AlreadyExists { kind, id } => format!("{kind} already exists: {id}"),
            AgentError::InUse { kind, id, count } => {
                format!("cannot delete {kind} {id}: used by {count} yuno(s), use force")
            }
            AgentError::NotFound { kind, what } => format!("{kind} not found: {what}"),
            AgentError::RangeExhausted { realm_id } => {
                format!("no free port in realm {realm_id}")
            }
            AgentError::IntegrityViolation {
                yuno_id,
                field,
                expected,
                got,
            } => format!("yuno {yuno_id} rejected: {field} is {got:?}, expected {expected:?}"),
            AgentError::NoSuchProcess { pid } => format!("process {pid} not found"),
            AgentError::InvalidInput(msg) => msg.clone(),
            AgentError::Store(e) => format!("store: {e}"),
            AgentError::Process(e) => format!("process: {e}"),
            AgentError::Channel(e) => format!("channel: {e}"),
            AgentError::Console(e) => format!("console: {e}"),
            AgentError::Io(e) => format!("io: {e}"),
        }
    }

    /// Indicates whether the error is benign for kill-like operations.
    ///
    /// # Example
    /// ```
    /// use yunovisor::AgentError;
    ///
    /// assert!(AgentError::NoSuchProcess { pid: 42 }.is_benign());
    /// assert!(!AgentError::InvalidInput("x".into()).is_benign());
    /// ```
    pub fn is_benign(&self) -> bool {
        matches!(self, AgentError::NoSuchProcess { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_no_such_process_maps_to_taxonomy() {
        let err: AgentError = ProcessError::NoSuchProcess { pid: 7 }.into();
        assert!(matches!(err, AgentError::NoSuchProcess { pid: 7 }));
        assert_eq!(err.as_label(), "no_such_process");
    }

    #[test]
    fn other_process_errors_are_wrapped() {
        let err: AgentError = ProcessError::SpawnFailed("boom".into()).into();
        assert_eq!(err.as_label(), "process_error");
        assert!(err.as_message().contains("boom"));
    }

    #[test]
    fn in_use_message_mentions_force() {
        let err = AgentError::InUse {
            kind: ResourceKind::Binary,
            id: "emailsender".into(),
            count: 2,
        };
        assert!(err.as_message().contains("force"));
        assert!(err.as_message().contains("2"));
    }
}
