use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Filter, Metadata, Resource, ResourceKind};

/// Versioned settings document bound to a `(role, name)` pair.
///
/// `id` is `{role}.{name}`. `zcontent` is kept as raw JSON: it is merged into
/// the launch script verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub zcontent: Value,
    #[serde(default)]
    pub md: Metadata,
}

impl Configuration {
    pub fn new(id: impl Into<String>, version: impl Into<String>, zcontent: Value) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            description: String::new(),
            zcontent,
            md: Metadata::default(),
        }
    }

    /// Composite id for a role and yuno name.
    pub fn id_for(role: &str, name: &str) -> String {
        format!("{role}.{name}")
    }

    /// Services the payload declares under `required_services`.
    pub fn required_services(&self) -> Vec<String> {
        self.zcontent
            .get("required_services")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Resource for Configuration {
    const KIND: ResourceKind = ResourceKind::Configuration;

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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_services_ignores_non_strings() {
        let c = Configuration::new(
            "emailsender.mail",
            "1",
            json!({"required_services": ["smtp", 3, "dns"]}),
        );
        assert_eq!(c.required_services(), vec!["smtp", "dns"]);
    }

    #[test]
    fn missing_required_services_is_empty() {
        let c = Configuration::new("a.b", "1", json!({"x": 1}));
        assert!(c.required_services().is_empty());
    }
}
