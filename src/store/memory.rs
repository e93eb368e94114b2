//! # In-process [`Persistence`] backend.
//!
//! Keeps every instance in memory behind one `RwLock`. Used by the daemon
//! when no external storage is configured, and by the tests.
//!
//! ## Rules
//! - Instances of one id are kept in insertion order; "latest" uses
//!   [`version::latest`](crate::version::latest), so ties keep the first inserted.
//! - A snapshot pins `(kind, id)` to a version only while that instance still
//!   exists; otherwise the id falls back to its latest version.
//! - Only `Durable` writes, creates and deletes append to [`MemoryStore::history`].

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use super::{Persistence, Snap, StoreError, WriteMode, node_ref_of};
use crate::resources::{Filter, NodeRef, ResourceKind, now_secs, version};

/// One entry of the durable history log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub op: &'static str,
    pub node: NodeRef,
    pub at: u64,
}

#[derive(Default)]
struct Inner {
    running: bool,
    nodes: BTreeMap<(ResourceKind, String), Vec<Value>>,
    links: BTreeSet<(NodeRef, NodeRef)>,
    history: Vec<HistoryEntry>,
    snaps: Vec<Snap>,
}

/// Memory-backed versioned document store.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty, started store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                running: true,
                ..Inner::default()
            }),
        }
    }

    /// Durable history, oldest first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.read().await.history.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn version_of(doc: &Value) -> &str {
    doc.get("version").and_then(Value::as_str).unwrap_or("")
}

fn md_mut(doc: &mut Value) -> Option<&mut serde_json::Map<String, Value>> {
    let obj = doc.as_object_mut()?;
    let md = obj.entry("md").or_insert_with(|| json!({}));
    if !md.is_object() {
        *md = json!({});
    }
    md.as_object_mut()
}

fn annotate(mut doc: Value, active: bool) -> Value {
    if let Some(md) = md_mut(&mut doc) {
        md.insert("active".into(), Value::Bool(active));
    }
    doc
}

fn link_key(a: &NodeRef, b: &NodeRef) -> (NodeRef, NodeRef) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl Inner {
    fn ensure_running(&self) -> Result<(), StoreError> {
        if self.running {
            Ok(())
        } else {
            Err(StoreError::Stopped)
        }
    }

    fn record(&mut self, op: &'static str, node: NodeRef) {
        self.history.push(HistoryEntry {
            op,
            node,
            at: now_secs(),
        });
    }

    fn exists(&self, node: &NodeRef) -> bool {
        self.nodes
            .get(&(node.kind, node.id.clone()))
            .is_some_and(|v| v.iter().any(|d| version_of(d) == node.version))
    }

    /// Version normal queries resolve `(kind, id)` to.
    fn current_version(&self, kind: ResourceKind, id: &str, instances: &[Value]) -> Option<String> {
        let pinned = self
            .snaps
            .iter()
            .find(|s| s.active)
            .and_then(|s| s.nodes.iter().find(|n| n.kind == kind && n.id == id))
            .filter(|n| instances.iter().any(|d| version_of(d) == n.version));
        if let Some(n) = pinned {
            return Some(n.version.clone());
        }
        version::latest(instances, version_of).map(|d| version_of(d).to_string())
    }

    /// Every instance of `kind`, annotated with `md.active`.
    fn instances(&self, kind: ResourceKind) -> impl Iterator<Item = Value> + '_ {
        self.nodes
            .range((kind, String::new())..)
            .take_while(move |((k, _), _)| *k == kind)
            .flat_map(move |((_, id), docs)| {
                let current = self.current_version(kind, id, docs);
                docs.iter().map(move |d| {
                    let active = current.as_deref() == Some(version_of(d));
                    annotate(d.clone(), active)
                })
            })
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn create(&self, kind: ResourceKind, mut doc: Value) -> Result<Value, StoreError> {
        let node = node_ref_of(kind, &doc)?;
        let mut inner = self.inner.write().await;
        inner.ensure_running()?;
        if inner.exists(&node) {
            return Err(StoreError::Duplicate(node));
        }
        let now = now_secs();
        if let Some(md) = md_mut(&mut doc) {
            md.insert("created_at".into(), json!(now));
            md.insert("updated_at".into(), json!(now));
            md.remove("active");
        }
        inner
            .nodes
            .entry((kind, node.id.clone()))
            .or_default()
            .push(doc);
        inner.record("create", node.clone());

        let docs = &inner.nodes[&(kind, node.id.clone())];
        let current = inner.current_version(kind, &node.id, docs);
        let stored = docs
            .iter()
            .find(|d| version_of(d) == node.version)
            .cloned()
            .ok_or_else(|| StoreError::NoSuchNode(node.clone()))?;
        Ok(annotate(stored, current.as_deref() == Some(node.version.as_str())))
    }

    async fn get(&self, kind: ResourceKind, filter: &Filter) -> Result<Option<Value>, StoreError> {
        Ok(self.list(kind, filter).await?.into_iter().next())
    }

    async fn list(&self, kind: ResourceKind, filter: &Filter) -> Result<Vec<Value>, StoreError> {
        let inner = self.inner.read().await;
        inner.ensure_running()?;
        Ok(inner
            .instances(kind)
            .filter(|d| d.pointer("/md/active") == Some(&Value::Bool(true)))
            .filter(|d| filter.matches(d))
            .collect())
    }

    async fn list_instances(
        &self,
        kind: ResourceKind,
        filter: &Filter,
    ) -> Result<Vec<Value>, StoreError> {
        let inner = self.inner.read().await;
        inner.ensure_running()?;
        Ok(inner.instances(kind).filter(|d| filter.matches(d)).collect())
    }

    async fn update(
        &self,
        kind: ResourceKind,
        mut doc: Value,
        mode: WriteMode,
    ) -> Result<Value, StoreError> {
        let node = node_ref_of(kind, &doc)?;
        let mut inner = self.inner.write().await;
        inner.ensure_running()?;

        let key = (kind, node.id.clone());
        let slot = inner
            .nodes
            .get_mut(&key)
            .and_then(|docs| docs.iter_mut().find(|d| version_of(d) == node.version))
            .ok_or_else(|| StoreError::NoSuchNode(node.clone()))?;

        let created_at = slot.pointer("/md/created_at").cloned().unwrap_or(json!(0));
        if let Some(md) = md_mut(&mut doc) {
            md.insert("created_at".into(), created_at);
            md.insert("updated_at".into(), json!(now_secs()));
            md.remove("active");
        }
        *slot = doc.clone();

        if mode == WriteMode::Durable {
            inner.record("update", node.clone());
        }
        let docs = &inner.nodes[&key];
        let current = inner.current_version(kind, &node.id, docs);
        Ok(annotate(doc, current.as_deref() == Some(node.version.as_str())))
    }

    async fn delete(&self, node: &NodeRef) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.ensure_running()?;
        let key = (node.kind, node.id.clone());
        let docs = inner
            .nodes
            .get_mut(&key)
            .ok_or_else(|| StoreError::NoSuchNode(node.clone()))?;
        let before = docs.len();
        docs.retain(|d| version_of(d) != node.version);
        if docs.len() == before {
            return Err(StoreError::NoSuchNode(node.clone()));
        }
        if docs.is_empty() {
            inner.nodes.remove(&key);
        }
        inner.links.retain(|(a, b)| a != node && b != node);
        inner.record("delete", node.clone());
        Ok(())
    }

    async fn link(&self, a: &NodeRef, b: &NodeRef) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.ensure_running()?;
        for n in [a, b] {
            if !inner.exists(n) {
                return Err(StoreError::NoSuchNode(n.clone()));
            }
        }
        if inner.links.insert(link_key(a, b)) {
            inner.record("link", a.clone());
        }
        Ok(())
    }

    async fn unlink(&self, a: &NodeRef, b: &NodeRef) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.ensure_running()?;
        if inner.links.remove(&link_key(a, b)) {
            inner.record("unlink", a.clone());
        }
        Ok(())
    }

    async fn linked(
        &self,
        node: &NodeRef,
        kind: ResourceKind,
    ) -> Result<Vec<NodeRef>, StoreError> {
        let inner = self.inner.read().await;
        inner.ensure_running()?;
        Ok(inner
            .links
            .iter()
            .filter_map(|(a, b)| {
                if a == node && b.kind == kind {
                    Some(b.clone())
                } else if b == node && a.kind == kind {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect())
    }

    async fn list_snaps(&self) -> Result<Vec<Snap>, StoreError> {
        let inner = self.inner.read().await;
        inner.ensure_running()?;
        Ok(inner.snaps.clone())
    }

    async fn shoot_snap(&self, name: &str, description: &str) -> Result<Snap, StoreError> {
        let mut inner = self.inner.write().await;
        inner.ensure_running()?;
        if inner.snaps.iter().any(|s| s.name == name) {
            return Err(StoreError::SnapExists(name.to_string()));
        }
        let nodes = inner
            .nodes
            .iter()
            .filter_map(|((kind, id), docs)| {
                inner
                    .current_version(*kind, id, docs)
                    .map(|v| NodeRef::new(*kind, id.clone(), v))
            })
            .collect();
        let snap = Snap {
            name: name.to_string(),
            description: description.to_string(),
            created_at: now_secs(),
            active: false,
            nodes,
        };
        inner.snaps.push(snap.clone());
        Ok(snap)
    }

    async fn activate_snap(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.ensure_running()?;
        if !inner.snaps.iter().any(|s| s.name == name) {
            return Err(StoreError::NoSuchSnap(name.to_string()));
        }
        for s in inner.snaps.iter_mut() {
            s.active = s.name == name;
        }
        Ok(())
    }

    async fn deactivate_snap(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.ensure_running()?;
        let snap = inner
            .snaps
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| StoreError::NoSuchSnap(name.to_string()))?;
        snap.active = false;
        Ok(())
    }

    async fn start(&self) -> Result<(), StoreError> {
        self.inner.write().await.running = true;
        Ok(())
    }

    async fn stop(&self) -> Result<(), StoreError> {
        self.inner.write().await.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(version: &str) -> Value {
        json!({"id": "emailsender", "version": version, "size": 1})
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected() {
        let store = MemoryStore::new();
        store.create(ResourceKind::Binary, bin("1.0")).await.unwrap();
        let err = store.create(ResourceKind::Binary, bin("1.0")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn list_sees_only_latest_instance() {
        let store = MemoryStore::new();
        store.create(ResourceKind::Binary, bin("1.10")).await.unwrap();
        store.create(ResourceKind::Binary, bin("1.9")).await.unwrap();

        let current = store.list(ResourceKind::Binary, &Filter::new()).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0]["version"], "1.10");
        assert_eq!(current[0]["md"]["active"], true);

        let all = store
            .list_instances(ResourceKind::Binary, &Filter::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn volatile_updates_skip_history() {
        let store = MemoryStore::new();
        let mut doc = store.create(ResourceKind::Binary, bin("1")).await.unwrap();
        doc["size"] = json!(2);
        store
            .update(ResourceKind::Binary, doc.clone(), WriteMode::Volatile)
            .await
            .unwrap();
        assert_eq!(store.history().await.len(), 1);

        doc["size"] = json!(3);
        let out = store
            .update(ResourceKind::Binary, doc, WriteMode::Durable)
            .await
            .unwrap();
        assert_eq!(out["size"], 3);
        let history = store.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].op, "update");
    }

    #[tokio::test]
    async fn active_snapshot_pins_recorded_versions() {
        let store = MemoryStore::new();
        store.create(ResourceKind::Binary, bin("1.0")).await.unwrap();
        store.shoot_snap("before", "").await.unwrap();
        store.create(ResourceKind::Binary, bin("2.0")).await.unwrap();
        store
            .create(ResourceKind::Configuration, json!({"id": "a.b", "version": "1"}))
            .await
            .unwrap();

        store.activate_snap("before").await.unwrap();
        let b = store
            .get(ResourceKind::Binary, &Filter::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b["version"], "1.0");
        // ids unknown to the snapshot still resolve to their latest
        let c = store
            .get(ResourceKind::Configuration, &Filter::new())
            .await
            .unwrap();
        assert!(c.is_some());

        store.deactivate_snap("before").await.unwrap();
        let b = store
            .get(ResourceKind::Binary, &Filter::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b["version"], "2.0");
    }

    #[tokio::test]
    async fn delete_drops_links() {
        let store = MemoryStore::new();
        store.create(ResourceKind::Binary, bin("1")).await.unwrap();
        store
            .create(ResourceKind::Yuno, json!({"id": "y1", "version": "1-1"}))
            .await
            .unwrap();
        let b = NodeRef::new(ResourceKind::Binary, "emailsender", "1");
        let y = NodeRef::new(ResourceKind::Yuno, "y1", "1-1");
        store.link(&y, &b).await.unwrap();
        assert_eq!(store.linked(&b, ResourceKind::Yuno).await.unwrap(), vec![y.clone()]);

        store.delete(&y).await.unwrap();
        assert!(store.linked(&b, ResourceKind::Yuno).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stopped_store_refuses_work() {
        let store = MemoryStore::new();
        store.stop().await.unwrap();
        let err = store
            .list(ResourceKind::Realm, &Filter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Stopped));
        store.start().await.unwrap();
        assert!(store.list(ResourceKind::Realm, &Filter::new()).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_snapshot_is_an_error() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.activate_snap("nope").await,
            Err(StoreError::NoSuchSnap(_))
        ));
    }
}
