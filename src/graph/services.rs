//! Public-service registration and port allocation on top of the graph.

use serde_json::{Value, json};
use tracing::info;

use super::{PortAllocator, ResourceGraph};
use crate::error::AgentError;
use crate::resources::{Binary, Filter, PublicService, Realm, ResourceKind, Yuno};
use crate::store::WriteMode;

const LOOPBACK: &str = "127.0.0.1";
const DEFAULT_SCHEMA: &str = "tcp";

impl ResourceGraph {
    /// Allocates the next port of `realm_id` and persists it as `last_port`.
    pub async fn allocate_port(&self, realm_id: &str) -> Result<u16, AgentError> {
        let mut realm: Realm = self
            .get_by_id(realm_id)
            .await?
            .ok_or_else(|| AgentError::not_found(ResourceKind::Realm, realm_id))?;
        let has_services = !self
            .list::<PublicService>(&Filter::new().eq("realm_id", realm_id))
            .await?
            .is_empty();

        let port = PortAllocator::new(&realm.range_ports)
            .next(realm.last_port, has_services)
            .ok_or_else(|| AgentError::RangeExhausted {
                realm_id: realm_id.to_string(),
            })?;
        realm.last_port = port;
        self.update(&realm, WriteMode::Durable).await?;
        Ok(port)
    }

    /// Registers every service `binary` exposes on behalf of `yuno`.
    ///
    /// Existing services with the same `(service, realm, role, name)` are
    /// taken over: `yuno_id`, `ip` and connector are rewritten, `port` kept.
    pub async fn register_public_services(
        &self,
        yuno: &Yuno,
        binary: &Binary,
    ) -> Result<Vec<PublicService>, AgentError> {
        if binary.public_services.is_empty() {
            return Ok(Vec::new());
        }
        let realm: Realm = self
            .get_by_id(&yuno.realm_id)
            .await?
            .ok_or_else(|| AgentError::not_found(ResourceKind::Realm, &yuno.realm_id))?;
        let ip = if yuno.global {
            realm.bind_ip.clone()
        } else {
            LOOPBACK.to_string()
        };

        let mut out = Vec::with_capacity(binary.public_services.len());
        for service in &binary.public_services {
            let connector = binary.descriptor(service).cloned().unwrap_or_else(|| json!({}));
            let schema = connector
                .get("schema")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SCHEMA)
                .to_string();
            let description = connector
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let filter = Filter::new()
                .eq("service", service.as_str())
                .eq("realm_id", yuno.realm_id.as_str())
                .eq("yuno_role", yuno.yuno_role.as_str())
                .eq("yuno_name", yuno.yuno_name.as_str());

            let svc = match self.get::<PublicService>(&filter).await? {
                Some(mut svc) => {
                    svc.yuno_id = yuno.id.clone();
                    svc.ip = ip.clone();
                    svc.schema = schema;
                    svc.description = description;
                    svc.connector = connector;
                    svc.url = PublicService::compose_url(&svc.schema, &svc.ip, svc.port);
                    self.update(&svc, WriteMode::Durable).await?
                }
                None => {
                    let port = self.allocate_port(&yuno.realm_id).await?;
                    let svc = PublicService {
                        id: uuid::Uuid::new_v4().to_string(),
                        version: "1".to_string(),
                        service: service.clone(),
                        description,
                        url: PublicService::compose_url(&schema, &ip, port),
                        schema,
                        yuno_id: yuno.id.clone(),
                        yuno_role: yuno.yuno_role.clone(),
                        yuno_name: yuno.yuno_name.clone(),
                        realm_id: yuno.realm_id.clone(),
                        ip: ip.clone(),
                        port,
                        connector,
                        md: Default::default(),
                    };
                    self.create(&svc).await?
                }
            };
            self.link(yuno, &svc).await?;
            info!(
                service = %svc.service,
                yuno_id = %yuno.id,
                realm_id = %yuno.realm_id,
                port = svc.port,
                url = %svc.url,
                "public service registered"
            );
            out.push(svc);
        }
        Ok(out)
    }

    /// Finds the provider of `service` for a yuno in `realm_id`.
    ///
    /// Same-realm services win; otherwise any realm's service is used.
    pub async fn resolve_service(
        &self,
        service: &str,
        realm_id: &str,
    ) -> Result<Option<PublicService>, AgentError> {
        let mut candidates: Vec<PublicService> =
            self.list(&Filter::new().eq("service", service)).await?;
        if let Some(pos) = candidates.iter().position(|s| s.realm_id == realm_id) {
            return Ok(Some(candidates.swap_remove(pos)));
        }
        Ok(candidates.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::resources::PortRange;
    use crate::store::MemoryStore;

    async fn setup(ranges: Vec<PortRange>) -> (ResourceGraph, Realm) {
        let g = ResourceGraph::new(Arc::new(MemoryStore::new()));
        let realm = Realm::new("me", "web", "front", "prod")
            .with_bind_ip("10.0.0.5")
            .with_ports(ranges);
        let realm = g.create(&realm).await.unwrap();
        (g, realm)
    }

    fn binary_with(services: &[&str]) -> Binary {
        let mut b = Binary::new("gate", "1.0");
        b.public_services = services.iter().map(|s| s.to_string()).collect();
        b
    }

    #[tokio::test]
    async fn ports_follow_range_until_exhausted() {
        let (g, realm) = setup(vec![PortRange(9000, 9002)]).await;
        let mut ports = Vec::new();
        for (i, svc) in ["svcA", "svcB", "svcC"].iter().enumerate() {
            let y = Yuno::new(&realm.id, "gate", format!("g{i}"), "1.0", "1");
            let y = g.create(&y).await.unwrap();
            let out = g
                .register_public_services(&y, &binary_with(&[svc]))
                .await
                .unwrap();
            assert_eq!(out[0].ip, "127.0.0.1");
            ports.push(out[0].port);
        }
        assert_eq!(ports, vec![9000, 9001, 9002]);

        let y = g.create(&Yuno::new(&realm.id, "gate", "g9", "1.0", "1")).await.unwrap();
        let err = g
            .register_public_services(&y, &binary_with(&["svcD"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::RangeExhausted { .. }));

        let stored: Realm = g.get_by_id(&realm.id).await.unwrap().unwrap();
        assert_eq!(stored.last_port, 9002);
    }

    #[tokio::test]
    async fn reregistration_keeps_port_and_moves_owner() {
        let (g, realm) = setup(vec![PortRange(7000, 7010)]).await;
        let mut bin = binary_with(&["api"]);
        bin.service_descriptor
            .insert("api".into(), json!({"schema": "ws", "description": "api gate"}));

        let first = g.create(&Yuno::new(&realm.id, "gate", "main", "1.0", "1")).await.unwrap();
        let a = g.register_public_services(&first, &bin).await.unwrap();
        assert_eq!(a[0].url, "ws://127.0.0.1:7000");

        g.delete(&first, true).await.unwrap();
        let mut second = Yuno::new(&realm.id, "gate", "main", "1.1", "1");
        second.global = true;
        let second = g.create(&second).await.unwrap();
        let b = g.register_public_services(&second, &bin).await.unwrap();

        assert_eq!(b[0].id, a[0].id);
        assert_eq!(b[0].port, 7000);
        assert_eq!(b[0].yuno_id, second.id);
        assert_eq!(b[0].url, "ws://10.0.0.5:7000");
    }

    #[tokio::test]
    async fn resolve_prefers_same_realm() {
        let (g, realm) = setup(vec![PortRange(7000, 7010)]).await;
        let other = g
            .create(&Realm::new("me", "web", "back", "prod").with_ports(vec![PortRange(8000, 8001)]))
            .await
            .unwrap();
        let bin = binary_with(&["db"]);
        let y1 = g.create(&Yuno::new(&other.id, "gate", "x", "1.0", "1")).await.unwrap();
        g.register_public_services(&y1, &bin).await.unwrap();
        let y2 = g.create(&Yuno::new(&realm.id, "gate", "y", "1.0", "1")).await.unwrap();
        g.register_public_services(&y2, &bin).await.unwrap();

        let found = g.resolve_service("db", &realm.id).await.unwrap().unwrap();
        assert_eq!(found.realm_id, realm.id);
        let any = g.resolve_service("db", "elsewhere").await.unwrap();
        assert!(any.is_some());
        assert!(g.resolve_service("nope", &realm.id).await.unwrap().is_none());
    }
}
