//! Command parameters, deserialized from the `kw` of a command.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::resources::{Filter, PortRange, ResourceKind};

/// Which yunos a command applies to. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct YunoSelector {
    pub id: Option<String>,
    pub realm_id: Option<String>,
    pub yuno_role: Option<String>,
    pub yuno_name: Option<String>,
    pub yuno_release: Option<String>,
    pub yuno_tag: Option<String>,
}

impl YunoSelector {
    /// Every yuno.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn by_role(role: impl Into<String>) -> Self {
        Self {
            yuno_role: Some(role.into()),
            ..Self::default()
        }
    }

    pub fn to_filter(&self) -> Filter {
        Filter::new()
            .eq_opt("id", self.id.clone())
            .eq_opt("realm_id", self.realm_id.clone())
            .eq_opt("yuno_role", self.yuno_role.clone())
            .eq_opt("yuno_name", self.yuno_name.clone())
            .eq_opt("yuno_release", self.yuno_release.clone())
            .eq_opt("yuno_tag", self.yuno_tag.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRealm {
    pub realm_owner: String,
    pub realm_role: String,
    pub realm_name: String,
    pub realm_env: String,
    #[serde(default)]
    pub bind_ip: String,
    #[serde(default)]
    pub range_ports: Vec<PortRange>,
}

/// Executable to copy into the binary repository, with its declarations.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBinary {
    pub source: PathBuf,
    pub role: String,
    pub version: String,
    #[serde(default)]
    pub public_services: Vec<String>,
    #[serde(default)]
    pub required_services: Vec<String>,
    #[serde(default)]
    pub service_descriptor: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewConfig {
    /// `{role}.{name}`.
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub zcontent: Value,
}

/// Yuno to create. Versions left out resolve to the latest instance.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewYuno {
    pub realm_id: String,
    pub yuno_role: String,
    pub yuno_name: String,
    pub role_version: Option<String>,
    pub name_version: Option<String>,
    pub yuno_tag: String,
    pub multiple: bool,
    pub global: bool,
    pub disabled: bool,
}

/// `{id, version?, force}` of the delete commands.
#[derive(Debug, Clone, Deserialize)]
pub struct Removal {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct YunoRemoval {
    #[serde(flatten)]
    pub select: YunoSelector,
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawCommand {
    #[serde(flatten)]
    pub select: YunoSelector,
    pub command: String,
    #[serde(default)]
    pub kw: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Instances {
    pub kind: ResourceKind,
    #[serde(default)]
    pub filter: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SnapName {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ConsoleName {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn selector_only_filters_on_given_fields() {
        let sel: YunoSelector =
            serde_json::from_value(json!({"yuno_role": "emailsender"})).unwrap();
        let f = sel.to_filter();
        assert_eq!(f.as_map().len(), 1);
        assert!(f.matches(&json!({"yuno_role": "emailsender", "yuno_name": "x"})));
        assert!(YunoSelector::all().to_filter().is_empty());
    }

    #[test]
    fn removal_flattens_the_selector() {
        let r: YunoRemoval =
            serde_json::from_value(json!({"yuno_name": "mail", "force": true})).unwrap();
        assert!(r.force);
        assert_eq!(r.select.yuno_name.as_deref(), Some("mail"));
    }
}
