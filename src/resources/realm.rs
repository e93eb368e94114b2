use serde::{Deserialize, Serialize};

use super::{Filter, Metadata, Resource, ResourceKind};

/// Inclusive `[low, high]` port range, serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange(pub u16, pub u16);

/// Organizational and network scope owning yunos and a port range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Realm {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub realm_owner: String,
    pub realm_role: String,
    pub realm_name: String,
    pub realm_env: String,
    #[serde(default)]
    pub bind_ip: String,
    #[serde(default)]
    pub range_ports: Vec<PortRange>,
    /// Last port handed out by the allocator (0 = none yet).
    #[serde(default)]
    pub last_port: u16,
    #[serde(default)]
    pub md: Metadata,
}

fn default_version() -> String {
    "1".to_string()
}

impl Realm {
    /// New realm with a fresh uuid.
    pub fn new(
        owner: impl Into<String>,
        role: impl Into<String>,
        name: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: default_version(),
            realm_owner: owner.into(),
            realm_role: role.into(),
            realm_name: name.into(),
            realm_env: env.into(),
            bind_ip: String::new(),
            range_ports: Vec::new(),
            last_port: 0,
            md: Metadata::default(),
        }
    }

    pub fn with_bind_ip(mut self, ip: impl Into<String>) -> Self {
        self.bind_ip = ip.into();
        self
    }

    pub fn with_ports(mut self, ranges: Vec<PortRange>) -> Self {
        self.range_ports = ranges;
        self
    }
}

impl Resource for Realm {
    const KIND: ResourceKind = ResourceKind::Realm;

    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn identity(&self) -> Filter {
        Filter::new()
            .eq("realm_owner", self.realm_owner.as_str())
            .eq("realm_role", self.realm_role.as_str())
            .eq("realm_name", self.realm_name.as_str())
            .eq("realm_env", self.realm_env.as_str())
    }

    fn identity_label(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.realm_owner, self.realm_role, self.realm_name, self.realm_env
        )
    }
}
