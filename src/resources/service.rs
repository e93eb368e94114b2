use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Filter, Metadata, Resource, ResourceKind};

/// Named network endpoint exposed by a yuno.
///
/// Survives redeploys of its owner: re-registration rewrites `yuno_id` and
/// keeps `port`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicService {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub service: String,
    #[serde(default)]
    pub description: String,
    /// Url scheme, `tcp` unless the descriptor says otherwise.
    #[serde(default)]
    pub schema: String,
    pub yuno_id: String,
    pub yuno_role: String,
    #[serde(default)]
    pub yuno_name: String,
    pub realm_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub url: String,
    /// Connector descriptor copied from the binary.
    #[serde(default)]
    pub connector: Value,
    #[serde(default)]
    pub md: Metadata,
}

fn default_version() -> String {
    "1".to_string()
}

impl PublicService {
    pub fn compose_url(schema: &str, ip: &str, port: u16) -> String {
        format!("{schema}://{ip}:{port}")
    }
}

impl Resource for PublicService {
    const KIND: ResourceKind = ResourceKind::PublicService;

    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn identity(&self) -> Filter {
        Filter::new()
            .eq("service", self.service.as_str())
            .eq("realm_id", self.realm_id.as_str())
            .eq("yuno_role", self.yuno_role.as_str())
            .eq("yuno_name", self.yuno_name.as_str())
    }

    fn identity_label(&self) -> String {
        format!("{} of {}^{}", self.service, self.yuno_role, self.yuno_name)
    }
}
