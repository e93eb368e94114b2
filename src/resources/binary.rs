use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Filter, Metadata, Resource, ResourceKind};

/// Installed executable artifact. `id` is the role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binary {
    pub id: String,
    pub version: String,
    /// Installed executable path.
    #[serde(default)]
    pub binary: PathBuf,
    #[serde(default)]
    pub size: u64,
    /// Services this role exposes.
    #[serde(default)]
    pub public_services: Vec<String>,
    /// Services this role connects to.
    #[serde(default)]
    pub required_services: Vec<String>,
    /// Connector descriptors keyed by service name.
    #[serde(default)]
    pub service_descriptor: Map<String, Value>,
    /// Namespace of the install directory.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub md: Metadata,
}

impl Binary {
    pub fn new(role: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: role.into(),
            version: version.into(),
            binary: PathBuf::new(),
            size: 0,
            public_services: Vec::new(),
            required_services: Vec::new(),
            service_descriptor: Map::new(),
            tags: Vec::new(),
            description: String::new(),
            md: Metadata::default(),
        }
    }

    /// Descriptor declared for `service`, if any.
    pub fn descriptor(&self, service: &str) -> Option<&Value> {
        self.service_descriptor.get(service)
    }
}

impl Resource for Binary {
    const KIND: ResourceKind = ResourceKind::Binary;

    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn identity(&self) -> Filter {
        Filter::new()
            .eq("id", self.id.as_str())
            .eq("version", self.version.as_str())
    }

    fn identity_label(&self) -> String {
        format!("{} {}", self.id, self.version)
    }
}
