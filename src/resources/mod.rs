//! # Typed resource records stored in the graph.
//!
//! Five kinds of versioned documents make up the agent's world:
//!
//! ```text
//!   Realm ──owns──► Yuno ──runs──► Binary
//!                    │  └─reads──► Configuration
//!                    └─exposes──► PublicService
//! ```
//!
//! Every record serializes to a JSON document with at least `id` and
//! `version`; the persistence collaborator treats them as opaque documents
//! keyed by `(kind, id, version)`. Several versions of the same id may coexist
//! ("instances"); only one is current for normal queries.

mod binary;
mod configuration;
mod filter;
mod realm;
mod service;
pub mod version;
mod yuno;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub use binary::Binary;
pub use configuration::Configuration;
pub use filter::Filter;
pub use realm::{PortRange, Realm};
pub use service::PublicService;
pub use yuno::{Yuno, YunoState};

/// Resource kinds known to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Realm,
    Binary,
    Configuration,
    Yuno,
    PublicService,
}

impl ResourceKind {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Realm => "realm",
            ResourceKind::Binary => "binary",
            ResourceKind::Configuration => "configuration",
            ResourceKind::Yuno => "yuno",
            ResourceKind::PublicService => "public_service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one instance of a node: `(kind, id, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: ResourceKind,
    pub id: String,
    pub version: String,
}

impl NodeRef {
    pub fn new(kind: ResourceKind, id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}^{}^{}", self.kind, self.id, self.version)
    }
}

/// Creation/update metadata maintained by the store.
///
/// `active` is true when the instance is the one normal queries resolve to
/// (the latest version, or the one pinned by the active snapshot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub active: bool,
}

/// A typed record the graph can persist.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind of every record of this type.
    const KIND: ResourceKind;

    fn id(&self) -> &str;

    fn version(&self) -> &str;

    /// Exact-field filter that must match no existing document on create.
    fn identity(&self) -> Filter;

    /// When true, create skips the identity check.
    fn allows_duplicates(&self) -> bool {
        false
    }

    /// Human-readable identity for error messages.
    fn identity_label(&self) -> String {
        self.id().to_string()
    }

    fn node_ref(&self) -> NodeRef {
        NodeRef::new(Self::KIND, self.id(), self.version())
    }
}

/// Current time in seconds since the epoch (0 if the clock is before it).
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
