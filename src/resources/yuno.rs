use serde::{Deserialize, Serialize};

use super::{Filter, Metadata, Resource, ResourceKind};
use crate::channel::ChannelId;

/// Supervised worker instance.
///
/// Fields below `must_play` are runtime state: they are only ever written with
/// [`WriteMode::Volatile`](crate::store::WriteMode::Volatile).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Yuno {
    /// Shared by every release of one `(realm, role, name)`.
    pub id: String,
    /// Equal to `yuno_release`: each release is one stored instance.
    pub version: String,
    pub realm_id: String,
    pub yuno_role: String,
    #[serde(default)]
    pub yuno_name: String,
    pub role_version: String,
    pub name_version: String,
    pub yuno_release: String,
    #[serde(default)]
    pub yuno_tag: String,

    #[serde(default)]
    pub disabled: bool,
    /// Allows several yunos with the same `(realm, role, name, release)`.
    #[serde(default)]
    pub multiple: bool,
    /// Public services bind to the realm ip instead of loopback.
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub must_play: bool,
    #[serde(default)]
    pub traced: bool,

    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub playing: bool,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub watcher_pid: u32,
    #[serde(default)]
    pub channel: Option<ChannelId>,
    #[serde(default)]
    pub launch_id: u64,

    #[serde(default)]
    pub md: Metadata,
}

/// Lifecycle position derived from the runtime flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YunoState {
    Disabled,
    Stopped,
    /// Spawned, waiting for the process to call back.
    Launching,
    Running,
    Playing,
}

impl Yuno {
    /// New enabled yuno with a fresh uuid. Versions must already be resolved.
    pub fn new(
        realm_id: impl Into<String>,
        role: impl Into<String>,
        name: impl Into<String>,
        role_version: impl Into<String>,
        name_version: impl Into<String>,
    ) -> Self {
        let role_version = role_version.into();
        let name_version = name_version.into();
        let release = Self::release_of(&role_version, &name_version);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: release.clone(),
            realm_id: realm_id.into(),
            yuno_role: role.into(),
            yuno_name: name.into(),
            role_version,
            name_version,
            yuno_release: release,
            yuno_tag: String::new(),
            disabled: false,
            multiple: false,
            global: false,
            must_play: false,
            traced: false,
            running: false,
            playing: false,
            pid: 0,
            watcher_pid: 0,
            channel: None,
            launch_id: 0,
            md: Metadata::default(),
        }
    }

    /// `{role_version}-{name_version}`.
    pub fn release_of(role_version: &str, name_version: &str) -> String {
        format!("{role_version}-{name_version}")
    }

    /// Id of the configuration this yuno reads.
    pub fn config_id(&self) -> String {
        super::Configuration::id_for(&self.yuno_role, &self.yuno_name)
    }

    pub fn state(&self) -> YunoState {
        if self.running {
            if self.playing {
                YunoState::Playing
            } else {
                YunoState::Running
            }
        } else if self.pid != 0 {
            YunoState::Launching
        } else if self.disabled {
            YunoState::Disabled
        } else {
            YunoState::Stopped
        }
    }

    /// Clears the runtime fields after the process went away.
    pub fn mark_stopped(&mut self) {
        self.running = false;
        self.playing = false;
        self.pid = 0;
        self.watcher_pid = 0;
        self.channel = None;
    }
}

impl Resource for Yuno {
    const KIND: ResourceKind = ResourceKind::Yuno;

    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn identity(&self) -> Filter {
        Filter::new()
            .eq("realm_id", self.realm_id.as_str())
            .eq("yuno_role", self.yuno_role.as_str())
            .eq("yuno_name", self.yuno_name.as_str())
            .eq("yuno_release", self.yuno_release.as_str())
    }

    fn allows_duplicates(&self) -> bool {
        self.multiple
    }

    fn identity_label(&self) -> String {
        format!(
            "{}^{} {} in realm {}",
            self.yuno_role, self.yuno_name, self.yuno_release, self.realm_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_joins_versions() {
        let y = Yuno::new("r", "emailsender", "mail", "1.1", "3");
        assert_eq!(y.yuno_release, "1.1-3");
        assert_eq!(y.version, "1.1-3");
        assert_eq!(y.config_id(), "emailsender.mail");
    }

    #[test]
    fn state_follows_runtime_flags() {
        let mut y = Yuno::new("r", "a", "b", "1", "1");
        assert_eq!(y.state(), YunoState::Stopped);
        y.pid = 42;
        assert_eq!(y.state(), YunoState::Launching);
        y.running = true;
        assert_eq!(y.state(), YunoState::Running);
        y.playing = true;
        assert_eq!(y.state(), YunoState::Playing);
        y.mark_stopped();
        y.disabled = true;
        assert_eq!(y.state(), YunoState::Disabled);
    }
}
