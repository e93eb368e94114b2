//! # Launch script.
//!
//! Every worker starts from a JSON document written next to the realm:
//!
//! ```text
//! {
//!   "environment":  { realm identity, work_dir, node_owner },
//!   "yuno":         { yuno_id, role, name, tag, release, launch_id },
//!   "global":       { config globals, "{service}.__json_config_variables__": {...} },
//!   "services":     [ { service, url, connector }, ... ],
//!   ...configuration zcontent deep-merged here...
//!   "agent_client": { url, yuno_id, launch_id }
//! }
//! ```
//!
//! `agent_client` is applied last so a configuration payload can never
//! redirect the worker's callback.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};

use crate::config::AgentConfig;
use crate::resources::{Configuration, PublicService, Realm, Yuno};

/// Rendered launch script of one yuno.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchScript {
    doc: Value,
}

/// Recursively merges `over` into `base`; non-object values replace.
pub fn deep_merge(base: &mut Value, over: &Value) {
    match (base, over) {
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(k) {
                    Some(slot) => deep_merge(slot, v),
                    None => {
                        b.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (slot, v) => *slot = v.clone(),
    }
}

impl LaunchScript {
    pub fn build(
        cfg: &AgentConfig,
        realm: &Realm,
        yuno: &Yuno,
        config: &Configuration,
        services: &[PublicService],
        launch_id: u64,
    ) -> Self {
        let mut global: Map<String, Value> = cfg.global_variables.clone();
        for svc in services {
            global.insert(
                format!("{}.__json_config_variables__", svc.service),
                json!({
                    "__url__": svc.url,
                    "__ip__": svc.ip,
                    "__port__": svc.port,
                }),
            );
        }
        let service_list: Vec<Value> = services
            .iter()
            .map(|svc| {
                json!({
                    "service": svc.service,
                    "url": svc.url,
                    "connector": svc.connector,
                })
            })
            .collect();

        let mut doc = json!({
            "environment": {
                "realm_id": realm.id,
                "realm_owner": realm.realm_owner,
                "realm_role": realm.realm_role,
                "realm_name": realm.realm_name,
                "realm_env": realm.realm_env,
                "work_dir": cfg.work_dir,
                "node_owner": cfg.node_owner,
            },
            "yuno": {
                "yuno_id": yuno.id,
                "yuno_role": yuno.yuno_role,
                "yuno_name": yuno.yuno_name,
                "yuno_tag": yuno.yuno_tag,
                "yuno_release": yuno.yuno_release,
                "launch_id": launch_id,
            },
            "global": global,
            "services": service_list,
        });
        deep_merge(&mut doc, &config.zcontent);
        if let Some(obj) = doc.as_object_mut() {
            obj.insert(
                "agent_client".into(),
                json!({
                    "url": cfg.agent_url,
                    "yuno_id": yuno.id,
                    "launch_id": launch_id,
                }),
            );
        }
        Self { doc }
    }

    pub fn as_value(&self) -> &Value {
        &self.doc
    }

    /// `{run_root}/{realm_id}/{yuno_id}.json`.
    pub fn path_for(run_root: &Path, yuno: &Yuno) -> PathBuf {
        run_root
            .join(&yuno.realm_id)
            .join(format!("{}.json", yuno.id))
    }

    /// Arguments the worker is started with.
    pub fn argv(path: &Path) -> Vec<String> {
        vec![
            "--start".to_string(),
            "--config-file".to_string(),
            path.display().to_string(),
        ]
    }

    /// Writes the script, creating parent directories.
    pub async fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&self.doc)?;
        tokio::fs::write(path, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (AgentConfig, Realm, Yuno, Configuration) {
        let mut cfg = AgentConfig::default();
        cfg.global_variables.insert("tz".into(), json!("UTC"));
        let realm = Realm::new("me", "mail", "main", "prod");
        let yuno = Yuno::new(&realm.id, "emailsender", "mail", "1.1", "3");
        let config = Configuration::new(
            "emailsender.mail",
            "3",
            json!({
                "global": {"tz": "CET", "retries": 3},
                "agent_client": {"url": "ws://evil"},
            }),
        );
        (cfg, realm, yuno, config)
    }

    #[test]
    fn zcontent_merges_over_generated_sections() {
        let (cfg, realm, yuno, config) = fixture();
        let script = LaunchScript::build(&cfg, &realm, &yuno, &config, &[], 42);
        let doc = script.as_value();
        assert_eq!(doc["global"]["tz"], "CET");
        assert_eq!(doc["global"]["retries"], 3);
        assert_eq!(doc["yuno"]["yuno_release"], "1.1-3");
        assert_eq!(doc["yuno"]["launch_id"], 42);
        assert_eq!(doc["environment"]["realm_id"], realm.id.as_str());
    }

    #[test]
    fn agent_client_cannot_be_overridden() {
        let (cfg, realm, yuno, config) = fixture();
        let script = LaunchScript::build(&cfg, &realm, &yuno, &config, &[], 1);
        assert_eq!(script.as_value()["agent_client"]["url"], "ws://127.0.0.1:1991");
        assert_eq!(script.as_value()["agent_client"]["yuno_id"], yuno.id.as_str());
    }

    #[test]
    fn required_services_become_global_connectors() {
        let (cfg, realm, yuno, config) = fixture();
        let svc = PublicService {
            id: "s".into(),
            version: "1".into(),
            service: "smtp".into(),
            description: String::new(),
            schema: "tcp".into(),
            yuno_id: "other".into(),
            yuno_role: "smtpd".into(),
            yuno_name: String::new(),
            realm_id: realm.id.clone(),
            ip: "127.0.0.1".into(),
            port: 2525,
            url: "tcp://127.0.0.1:2525".into(),
            connector: json!({"kind": "tcp"}),
            md: Default::default(),
        };
        let script = LaunchScript::build(&cfg, &realm, &yuno, &config, &[svc], 1);
        let doc = script.as_value();
        assert_eq!(doc["global"]["smtp.__json_config_variables__"]["__port__"], 2525);
        assert_eq!(doc["services"][0]["url"], "tcp://127.0.0.1:2525");
    }

    #[tokio::test]
    async fn write_creates_realm_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (cfg, realm, yuno, config) = fixture();
        let script = LaunchScript::build(&cfg, &realm, &yuno, &config, &[], 1);
        let path = LaunchScript::path_for(dir.path(), &yuno);
        script.write(&path).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let back: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(&back, script.as_value());
        assert_eq!(
            LaunchScript::argv(&path),
            vec!["--start", "--config-file", path.to_str().unwrap()]
        );
    }
}
