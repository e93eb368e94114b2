//! # Versioned resource graph.
//!
//! [`ResourceGraph`] is the typed facade over the [`Persistence`] collaborator.
//! It adds the rules the store does not know about:
//!
//! ```text
//!   create(rec)  ── identity filter ──► AlreadyExists?  ──► store.create
//!   delete(rec)  ── linked yunos    ──► InUse (unless force) ──► store.delete
//!   update(rec, Durable | Volatile) ──► store.update
//! ```
//!
//! ## Rules
//! - Identity is checked with an exact-field query over *all* instances before
//!   insert; it is not a uniqueness constraint of the store.
//! - Deleting a realm, binary or configuration that still has linked yunos
//!   fails with `InUse`; `force` unlinks and deletes regardless.
//! - Callers re-fetch before mutating: every write takes a full record.

mod ports;
mod services;

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::AgentError;
use crate::resources::{Filter, NodeRef, Resource, ResourceKind, Yuno};
use crate::store::{Persistence, StoreError, WriteMode};

pub use ports::PortAllocator;

/// Typed access to the resource documents.
#[derive(Clone)]
pub struct ResourceGraph {
    store: Arc<dyn Persistence>,
}

fn decode<R: Resource>(doc: Value) -> Result<R, AgentError> {
    serde_json::from_value(doc).map_err(|e| {
        StoreError::InvalidDocument {
            kind: R::KIND,
            reason: e.to_string(),
        }
        .into()
    })
}

fn encode<R: Resource>(rec: &R) -> Result<Value, AgentError> {
    serde_json::to_value(rec).map_err(|e| {
        StoreError::InvalidDocument {
            kind: R::KIND,
            reason: e.to_string(),
        }
        .into()
    })
}

impl ResourceGraph {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self { store }
    }

    /// Underlying persistence collaborator.
    pub fn store(&self) -> &Arc<dyn Persistence> {
        &self.store
    }

    /// Inserts `rec` after checking its identity is free.
    pub async fn create<R: Resource>(&self, rec: &R) -> Result<R, AgentError> {
        if !rec.allows_duplicates() {
            let clash = self.store.list_instances(R::KIND, &rec.identity()).await?;
            if !clash.is_empty() {
                return Err(AgentError::AlreadyExists {
                    kind: R::KIND,
                    id: rec.identity_label(),
                });
            }
        }
        let doc = self
            .store
            .create(R::KIND, encode(rec)?)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(node) => AgentError::AlreadyExists {
                    kind: R::KIND,
                    id: node.to_string(),
                },
                other => other.into(),
            })?;
        debug!(kind = %R::KIND, id = rec.id(), version = rec.version(), "created");
        decode(doc)
    }

    /// First current record matching `filter`.
    pub async fn get<R: Resource>(&self, filter: &Filter) -> Result<Option<R>, AgentError> {
        self.store
            .get(R::KIND, filter)
            .await?
            .map(decode::<R>)
            .transpose()
    }

    /// Current record with `id`.
    pub async fn get_by_id<R: Resource>(&self, id: &str) -> Result<Option<R>, AgentError> {
        self.get(&Filter::new().eq("id", id)).await
    }

    /// Like [`get`](Self::get) but absent is `NotFound`.
    pub async fn require<R: Resource>(&self, filter: &Filter, what: &str) -> Result<R, AgentError> {
        self.get(filter)
            .await?
            .ok_or_else(|| AgentError::not_found(R::KIND, what))
    }

    /// Current records matching `filter`.
    pub async fn list<R: Resource>(&self, filter: &Filter) -> Result<Vec<R>, AgentError> {
        self.store
            .list(R::KIND, filter)
            .await?
            .into_iter()
            .map(decode::<R>)
            .collect()
    }

    /// All instances matching `filter`.
    pub async fn list_instances<R: Resource>(&self, filter: &Filter) -> Result<Vec<R>, AgentError> {
        self.store
            .list_instances(R::KIND, filter)
            .await?
            .into_iter()
            .map(decode::<R>)
            .collect()
    }

    /// Raw documents, for the command surface.
    pub async fn list_docs(
        &self,
        kind: ResourceKind,
        filter: &Filter,
        instances: bool,
    ) -> Result<Vec<Value>, AgentError> {
        let docs = if instances {
            self.store.list_instances(kind, filter).await?
        } else {
            self.store.list(kind, filter).await?
        };
        Ok(docs)
    }

    pub async fn update<R: Resource>(&self, rec: &R, mode: WriteMode) -> Result<R, AgentError> {
        let doc = self.store.update(R::KIND, encode(rec)?, mode).await?;
        decode(doc)
    }

    /// Deletes one instance, guarded by its linked yunos.
    pub async fn delete<R: Resource>(&self, rec: &R, force: bool) -> Result<(), AgentError> {
        let node = rec.node_ref();
        if R::KIND != ResourceKind::Yuno {
            let users = self.store.linked(&node, ResourceKind::Yuno).await?;
            if !users.is_empty() {
                if !force {
                    return Err(AgentError::InUse {
                        kind: R::KIND,
                        id: rec.identity_label(),
                        count: users.len(),
                    });
                }
                for user in &users {
                    self.store.unlink(&node, user).await?;
                }
                info!(kind = %R::KIND, id = rec.id(), count = users.len(), "force delete unlinked yunos");
            }
        }
        self.store.delete(&node).await?;
        debug!(kind = %R::KIND, id = rec.id(), version = rec.version(), "deleted");
        Ok(())
    }

    pub async fn link<A: Resource, B: Resource>(&self, a: &A, b: &B) -> Result<(), AgentError> {
        self.store.link(&a.node_ref(), &b.node_ref()).await?;
        Ok(())
    }

    pub async fn unlink<A: Resource, B: Resource>(&self, a: &A, b: &B) -> Result<(), AgentError> {
        self.store.unlink(&a.node_ref(), &b.node_ref()).await?;
        Ok(())
    }

    /// Refs of kind `kind` linked to `rec`.
    pub async fn linked<R: Resource>(
        &self,
        rec: &R,
        kind: ResourceKind,
    ) -> Result<Vec<NodeRef>, AgentError> {
        Ok(self.store.linked(&rec.node_ref(), kind).await?)
    }

    /// Yuno records linked to `rec`.
    pub async fn linked_yunos<R: Resource>(&self, rec: &R) -> Result<Vec<Yuno>, AgentError> {
        let mut out = Vec::new();
        for node in self.linked(rec, ResourceKind::Yuno).await? {
            if let Some(y) = self.get_by_id::<Yuno>(&node.id).await? {
                out.push(y);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Binary, Realm};
    use crate::store::MemoryStore;

    fn graph() -> ResourceGraph {
        ResourceGraph::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn duplicate_realm_identity_is_rejected() {
        let g = graph();
        g.create(&Realm::new("me", "db", "main", "prod")).await.unwrap();
        let err = g
            .create(&Realm::new("me", "db", "main", "prod"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::AlreadyExists { kind: ResourceKind::Realm, .. }));
        g.create(&Realm::new("me", "db", "main", "dev")).await.unwrap();
    }

    #[tokio::test]
    async fn older_binary_instance_still_blocks_reinstall() {
        let g = graph();
        g.create(&Binary::new("emailsender", "1.0")).await.unwrap();
        g.create(&Binary::new("emailsender", "1.1")).await.unwrap();
        let err = g.create(&Binary::new("emailsender", "1.0")).await.unwrap_err();
        assert_eq!(err.as_label(), "already_exists");

        let current: Vec<Binary> = g.list(&Filter::new()).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].version, "1.1");
        let all: Vec<Binary> = g.list_instances(&Filter::new()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn multiple_yunos_skip_identity_check() {
        let g = graph();
        let mut a = Yuno::new("r1", "worker", "w", "1", "1");
        a.multiple = true;
        let mut b = Yuno::new("r1", "worker", "w", "1", "1");
        b.multiple = true;
        g.create(&a).await.unwrap();
        g.create(&b).await.unwrap();
        let single = Yuno::new("r1", "worker", "w", "1", "1");
        assert!(g.create(&single).await.is_err());
    }

    #[tokio::test]
    async fn new_release_becomes_current_instance() {
        let g = graph();
        let first = g.create(&Yuno::new("r1", "worker", "w", "1", "1")).await.unwrap();
        let mut next = Yuno::new("r1", "worker", "w", "2", "1");
        next.id = first.id.clone();
        g.create(&next).await.unwrap();

        let current: Yuno = g.get_by_id(&first.id).await.unwrap().unwrap();
        assert_eq!(current.yuno_release, "2-1");
        let all: Vec<Yuno> = g
            .list_instances(&Filter::new().eq("id", first.id.as_str()))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let mut again = Yuno::new("r1", "worker", "w", "2", "1");
        again.id = first.id.clone();
        assert_eq!(g.create(&again).await.unwrap_err().as_label(), "already_exists");
    }

    #[tokio::test]
    async fn delete_guard_counts_linked_yunos() {
        let g = graph();
        let bin = g.create(&Binary::new("emailsender", "1.0")).await.unwrap();
        let y1 = g.create(&Yuno::new("r", "emailsender", "a", "1.0", "1")).await.unwrap();
        let y2 = g.create(&Yuno::new("r", "emailsender", "b", "1.0", "1")).await.unwrap();
        g.link(&y1, &bin).await.unwrap();
        g.link(&y2, &bin).await.unwrap();

        match g.delete(&bin, false).await {
            Err(AgentError::InUse { count, .. }) => assert_eq!(count, 2),
            other => panic!("expected InUse, got {other:?}"),
        }
        g.delete(&bin, true).await.unwrap();
        assert!(g.get_by_id::<Binary>("emailsender").await.unwrap().is_none());
        assert!(g.linked(&y1, ResourceKind::Binary).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreferenced_binary_deletes_without_force() {
        let g = graph();
        let bin = g.create(&Binary::new("emailsender", "1.0")).await.unwrap();
        g.delete(&bin, false).await.unwrap();
    }

    #[tokio::test]
    async fn volatile_update_round_trips_runtime_fields() {
        let g = graph();
        let mut y = g.create(&Yuno::new("r", "a", "b", "1", "1")).await.unwrap();
        y.pid = 77;
        y.running = true;
        let y = g.update(&y, WriteMode::Volatile).await.unwrap();
        assert_eq!(y.pid, 77);
        assert!(y.md.active);
        let again: Yuno = g.get_by_id(&y.id).await.unwrap().unwrap();
        assert!(again.running);
    }
}
