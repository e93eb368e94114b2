//! Resource commands: realms, binaries, configurations, yunos, snapshots.

use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use super::params::{NewBinary, NewConfig, NewRealm, NewYuno, YunoSelector};
use super::Agent;
use crate::error::AgentError;
use crate::resources::{
    Binary, Configuration, Filter, PublicService, Realm, Resource, ResourceKind, Yuno,
};
use crate::snapshot::SwitchReport;
use crate::store::Snap;

impl Agent {
    pub async fn create_realm(&self, p: NewRealm) -> Result<Realm, AgentError> {
        if let Some(bad) = p.range_ports.iter().find(|r| r.0 > r.1) {
            return Err(AgentError::InvalidInput(format!(
                "port range [{}, {}] is reversed",
                bad.0, bad.1
            )));
        }
        let realm = Realm::new(p.realm_owner, p.realm_role, p.realm_name, p.realm_env)
            .with_bind_ip(p.bind_ip)
            .with_ports(p.range_ports);
        let realm = self.graph.create(&realm).await?;
        info!(realm_id = %realm.id, name = %realm.realm_name, "realm created");
        Ok(realm)
    }

    /// Deletes a realm; refused while it owns yunos unless `force`.
    pub async fn delete_realm(&self, id: &str, force: bool) -> Result<Realm, AgentError> {
        let realm: Realm = self
            .graph
            .get_by_id(id)
            .await?
            .ok_or_else(|| AgentError::not_found(ResourceKind::Realm, id))?;
        self.graph.delete(&realm, force).await?;
        info!(realm_id = id, force, "realm deleted");
        Ok(realm)
    }

    /// Copies the executable into `{bin_root}/{tags...}/{role}/{version}/`
    /// and records it.
    pub async fn install_binary(&self, p: NewBinary) -> Result<Binary, AgentError> {
        let mut bin = Binary::new(p.role, p.version);
        let existing: Vec<Binary> = self.graph.list_instances(&bin.identity()).await?;
        if !existing.is_empty() {
            return Err(AgentError::AlreadyExists {
                kind: ResourceKind::Binary,
                id: bin.identity_label(),
            });
        }
        let file_name = p.source.file_name().ok_or_else(|| {
            AgentError::InvalidInput(format!("not a file: {}", p.source.display()))
        })?;

        let mut dir = self.cfg.bin_root();
        dir.extend(&p.tags);
        dir.push(&bin.id);
        dir.push(&bin.version);
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(file_name);
        let size = tokio::fs::copy(&p.source, &dest).await?;

        bin.binary = dest;
        bin.size = size;
        bin.public_services = p.public_services;
        bin.required_services = p.required_services;
        bin.service_descriptor = p.service_descriptor;
        bin.tags = p.tags;
        bin.description = p.description;

        match self.graph.create(&bin).await {
            Ok(bin) => {
                info!(role = %bin.id, version = %bin.version, path = %bin.binary.display(), size, "binary installed");
                Ok(bin)
            }
            Err(e) => {
                remove_installed(&bin.binary).await;
                Err(e)
            }
        }
    }

    /// Deletes the matching instances of a binary and their installed files.
    pub async fn delete_binary(
        &self,
        id: &str,
        version: Option<&str>,
        force: bool,
    ) -> Result<Vec<Binary>, AgentError> {
        let doomed: Vec<Binary> = self.instances(id, version).await?;
        self.guard_unused(&doomed, force).await?;
        for bin in &doomed {
            self.graph.delete(bin, force).await?;
            remove_installed(&bin.binary).await;
            info!(role = id, version = %bin.version, "binary deleted");
        }
        Ok(doomed)
    }

    pub async fn create_config(&self, p: NewConfig) -> Result<Configuration, AgentError> {
        if !p.id.contains('.') {
            return Err(AgentError::InvalidInput(format!(
                "configuration id {:?} is not role.name",
                p.id
            )));
        }
        let mut config = Configuration::new(p.id, p.version, p.zcontent);
        config.description = p.description;
        let config = self.graph.create(&config).await?;
        info!(config = %config.id, version = %config.version, "configuration created");
        Ok(config)
    }

    pub async fn delete_config(
        &self,
        id: &str,
        version: Option<&str>,
        force: bool,
    ) -> Result<Vec<Configuration>, AgentError> {
        let doomed: Vec<Configuration> = self.instances(id, version).await?;
        self.guard_unused(&doomed, force).await?;
        for config in &doomed {
            self.graph.delete(config, force).await?;
            info!(config = id, version = %config.version, "configuration deleted");
        }
        Ok(doomed)
    }

    /// Creates a yuno bound to resolved binary and configuration instances,
    /// then registers the public services its binary declares.
    ///
    /// A new release of an existing `(realm, role, name)` is stored as a new
    /// instance of the same yuno id and becomes current. The current release
    /// must not be live while that happens.
    pub async fn create_yuno(&self, p: NewYuno) -> Result<Yuno, AgentError> {
        let realm: Realm = self
            .graph
            .get_by_id(&p.realm_id)
            .await?
            .ok_or_else(|| AgentError::not_found(ResourceKind::Realm, &p.realm_id))?;
        let binary: Binary = self
            .pick_version(&p.yuno_role, p.role_version.as_deref())
            .await?;
        let config_id = Configuration::id_for(&p.yuno_role, &p.yuno_name);
        let config: Configuration = self
            .pick_version(&config_id, p.name_version.as_deref())
            .await?;

        let mut yuno = Yuno::new(
            &realm.id,
            &p.yuno_role,
            &p.yuno_name,
            &binary.version,
            &config.version,
        );
        if !p.multiple {
            if let Some(prev) = self.current_release(&realm.id, &p.yuno_role, &p.yuno_name).await? {
                if prev.running || prev.pid != 0 {
                    return Err(AgentError::InUse {
                        kind: ResourceKind::Yuno,
                        id: prev.identity_label(),
                        count: 1,
                    });
                }
                yuno.id = prev.id;
            }
        }
        yuno.yuno_tag = p.yuno_tag;
        yuno.multiple = p.multiple;
        yuno.global = p.global;
        yuno.disabled = p.disabled;
        let yuno = self.graph.create(&yuno).await?;

        let wired = async {
            self.graph.link(&realm, &yuno).await?;
            self.graph.link(&yuno, &binary).await?;
            self.graph.link(&yuno, &config).await?;
            self.graph.register_public_services(&yuno, &binary).await
        };
        match wired.await {
            Ok(services) => {
                info!(
                    yuno_id = %yuno.id,
                    realm_id = %realm.id,
                    release = %yuno.yuno_release,
                    services = services.len(),
                    "yuno created"
                );
                Ok(yuno)
            }
            Err(e) => {
                warn!(yuno_id = %yuno.id, error = %e.as_message(), "yuno wiring failed, rolling back");
                if let Err(undo) = self.graph.delete(&yuno, true).await {
                    warn!(yuno_id = %yuno.id, error = %undo.as_message(), "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Deletes the current release of each selected yuno; an older release,
    /// if one is stored, becomes current.
    ///
    /// Running or tagged yunos are refused unless `force`, in which case
    /// live ones are disabled (force-killed) first. Nothing is deleted when
    /// any target is refused.
    pub async fn delete_yunos(
        &self,
        sel: &YunoSelector,
        force: bool,
    ) -> Result<Vec<Yuno>, AgentError> {
        let doomed = self.select_yunos(sel).await?;
        if !force {
            if let Some(y) = doomed.iter().find(|y| y.running || y.pid != 0) {
                return Err(AgentError::InUse {
                    kind: ResourceKind::Yuno,
                    id: y.id.clone(),
                    count: 1,
                });
            }
            if let Some(y) = doomed.iter().find(|y| !y.yuno_tag.is_empty()) {
                return Err(AgentError::InvalidInput(format!(
                    "yuno {} is tagged {:?}, use force",
                    y.id, y.yuno_tag
                )));
            }
        }
        for yuno in &doomed {
            if yuno.running || yuno.pid != 0 {
                self.supervisor.disable(&yuno.id).await?;
            }
            self.graph.delete(yuno, true).await?;
            info!(yuno_id = %yuno.id, force, "yuno deleted");
        }
        Ok(doomed)
    }

    pub async fn list_realms(&self, filter: &Filter) -> Result<Vec<Realm>, AgentError> {
        self.graph.list(filter).await
    }

    pub async fn list_binaries(&self, filter: &Filter) -> Result<Vec<Binary>, AgentError> {
        self.graph.list(filter).await
    }

    pub async fn list_configs(&self, filter: &Filter) -> Result<Vec<Configuration>, AgentError> {
        self.graph.list(filter).await
    }

    pub async fn list_yunos(&self, sel: &YunoSelector) -> Result<Vec<Yuno>, AgentError> {
        self.graph.list(&sel.to_filter()).await
    }

    pub async fn list_public_services(
        &self,
        filter: &Filter,
    ) -> Result<Vec<PublicService>, AgentError> {
        self.graph.list(filter).await
    }

    /// Every stored version of `kind` matching `filter`.
    pub async fn list_instances(
        &self,
        kind: ResourceKind,
        filter: &Filter,
    ) -> Result<Vec<Value>, AgentError> {
        self.graph.list_docs(kind, filter, true).await
    }

    pub async fn list_snaps(&self) -> Result<Vec<Snap>, AgentError> {
        self.snapshots.list().await
    }

    pub async fn shoot_snap(&self, name: &str, description: &str) -> Result<Snap, AgentError> {
        self.snapshots.shoot(name, description).await
    }

    pub async fn activate_snap(&self, name: &str) -> Result<SwitchReport, AgentError> {
        self.snapshots.activate(name).await
    }

    pub async fn deactivate_snap(&self, name: &str) -> Result<SwitchReport, AgentError> {
        self.snapshots.deactivate(name).await
    }

    /// Selected yunos; an empty selection is `NotFound`.
    pub(crate) async fn select_yunos(&self, sel: &YunoSelector) -> Result<Vec<Yuno>, AgentError> {
        let found = self.list_yunos(sel).await?;
        if found.is_empty() {
            return Err(AgentError::not_found(
                ResourceKind::Yuno,
                serde_json::to_string(sel.to_filter().as_map()).unwrap_or_default(),
            ));
        }
        Ok(found)
    }

    /// Exact instance when `wanted` is given, else the current one (latest,
    /// or the version an active snapshot pins).
    async fn pick_version<R: Resource>(&self, id: &str, wanted: Option<&str>) -> Result<R, AgentError> {
        let found: Option<R> = match wanted {
            Some(v) => self
                .graph
                .list_instances(&Filter::new().eq("id", id).eq("version", v))
                .await?
                .into_iter()
                .next(),
            None => self.graph.get_by_id(id).await?,
        };
        found.ok_or_else(|| {
            AgentError::not_found(R::KIND, format!("{id} {}", wanted.unwrap_or("(any version)")))
        })
    }

    /// Current release of the single-instance yuno `(realm, role, name)`.
    async fn current_release(
        &self,
        realm_id: &str,
        role: &str,
        name: &str,
    ) -> Result<Option<Yuno>, AgentError> {
        let filter = Filter::new()
            .eq("realm_id", realm_id)
            .eq("yuno_role", role)
            .eq("yuno_name", name)
            .eq("multiple", false);
        self.graph.get(&filter).await
    }

    async fn instances<R: Resource>(&self, id: &str, version: Option<&str>) -> Result<Vec<R>, AgentError> {
        let filter = Filter::new().eq("id", id).eq_opt("version", version);
        let found: Vec<R> = self.graph.list_instances(&filter).await?;
        if found.is_empty() {
            return Err(AgentError::not_found(
                R::KIND,
                format!("{id} {}", version.unwrap_or("(any version)")),
            ));
        }
        Ok(found)
    }

    async fn guard_unused<R: Resource>(&self, recs: &[R], force: bool) -> Result<(), AgentError> {
        if force {
            return Ok(());
        }
        for rec in recs {
            let users = self.graph.linked(rec, ResourceKind::Yuno).await?;
            if !users.is_empty() {
                return Err(AgentError::InUse {
                    kind: R::KIND,
                    id: rec.identity_label(),
                    count: users.len(),
                });
            }
        }
        Ok(())
    }
}

async fn remove_installed(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "installed file not removed"),
    }
}
