//! # Persistence collaborator.
//!
//! The agent never touches storage directly: every read and write of a
//! resource document goes through the [`Persistence`] trait. Documents are
//! opaque JSON keyed by `(kind, id, version)`; several versions of one id may
//! coexist ("instances") and exactly one of them is *current*.
//!
//! ```text
//!   ResourceGraph ──► Persistence ──► MemoryStore (in-process)
//!                         │
//!                         └──► any other backend implementing the trait
//! ```
//!
//! ## Rules
//! - `list`/`get` only see current instances; `list_instances` sees all.
//! - The current instance of an id is its latest version, unless an active
//!   snapshot pinned another one.
//! - Every write carries a [`WriteMode`]. `Volatile` writes change the document
//!   but leave the durable history untouched.
//! - Returned documents carry `md.active` (true for the current instance).

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::resources::{Filter, NodeRef, ResourceKind};

pub use memory::{HistoryEntry, MemoryStore};

/// Durability of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Recorded in the durable history.
    Durable,
    /// Runtime flag flips (running, playing, pid ...); skips history.
    Volatile,
}

/// Named marker of which instance of each id is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snap {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: u64,
    #[serde(default)]
    pub active: bool,
    /// Instances that were current when the snapshot was shot.
    #[serde(default)]
    pub nodes: Vec<NodeRef>,
}

/// Errors produced by a persistence backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No instance with that key.
    #[error("no such node: {0}")]
    NoSuchNode(NodeRef),

    /// An instance with the same `(kind, id, version)` already exists.
    #[error("duplicate node: {0}")]
    Duplicate(NodeRef),

    /// Document lacks a string `id` or `version`.
    #[error("invalid {kind} document: {reason}")]
    InvalidDocument { kind: ResourceKind, reason: String },

    #[error("no such snapshot: {0}")]
    NoSuchSnap(String),

    #[error("snapshot already exists: {0}")]
    SnapExists(String),

    /// The backend is stopped (between `stop` and `start`).
    #[error("store is stopped")]
    Stopped,

    /// Any backend-specific failure.
    #[error("store backend: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::NoSuchNode(_) => "store_no_such_node",
            StoreError::Duplicate(_) => "store_duplicate",
            StoreError::InvalidDocument { .. } => "store_invalid_document",
            StoreError::NoSuchSnap(_) => "store_no_such_snap",
            StoreError::SnapExists(_) => "store_snap_exists",
            StoreError::Stopped => "store_stopped",
            StoreError::Backend(_) => "store_backend",
        }
    }
}

/// Key-indexed versioned document store with links and snapshots.
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    /// Inserts a new instance. `doc` must carry string `id` and `version`.
    async fn create(&self, kind: ResourceKind, doc: Value) -> Result<Value, StoreError>;

    /// First current instance matching `filter`.
    async fn get(&self, kind: ResourceKind, filter: &Filter) -> Result<Option<Value>, StoreError>;

    /// Current instances matching `filter`.
    async fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<Value>, StoreError>;

    /// Every instance matching `filter`, current or not.
    async fn list_instances(
        &self,
        kind: ResourceKind,
        filter: &Filter,
    ) -> Result<Vec<Value>, StoreError>;

    /// Replaces the instance addressed by the document's `id` and `version`.
    async fn update(
        &self,
        kind: ResourceKind,
        doc: Value,
        mode: WriteMode,
    ) -> Result<Value, StoreError>;

    /// Removes one instance and every link touching it.
    async fn delete(&self, node: &NodeRef) -> Result<(), StoreError>;

    /// Links two instances. Linking twice is a no-op.
    async fn link(&self, a: &NodeRef, b: &NodeRef) -> Result<(), StoreError>;

    /// Removes a link. Unknown links are ignored.
    async fn unlink(&self, a: &NodeRef, b: &NodeRef) -> Result<(), StoreError>;

    /// Instances of `kind` linked to `node`.
    async fn linked(&self, node: &NodeRef, kind: ResourceKind)
    -> Result<Vec<NodeRef>, StoreError>;

    async fn list_snaps(&self) -> Result<Vec<Snap>, StoreError>;

    /// Records the current instance of every id under `name`.
    async fn shoot_snap(&self, name: &str, description: &str) -> Result<Snap, StoreError>;

    /// Makes `name` the active snapshot (replacing any other).
    async fn activate_snap(&self, name: &str) -> Result<(), StoreError>;

    /// Deactivates `name`; current instances fall back to latest versions.
    async fn deactivate_snap(&self, name: &str) -> Result<(), StoreError>;

    async fn start(&self) -> Result<(), StoreError>;

    async fn stop(&self) -> Result<(), StoreError>;
}

/// Extracts the `(kind, id, version)` key of a document.
pub fn node_ref_of(kind: ResourceKind, doc: &Value) -> Result<NodeRef, StoreError> {
    let field = |name: &str| {
        doc.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidDocument {
                kind,
                reason: format!("missing string field {name:?}"),
            })
    };
    Ok(NodeRef::new(kind, field("id")?, field("version")?))
}
