//! Named command entry point: `execute("create-yuno", kw, requester)`.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::fanin::{Verb, outcomes_json};
use super::params::{
    ConsoleName, Instances, NewBinary, NewConfig, NewRealm, NewYuno, RawCommand, Removal,
    SnapName, YunoRemoval, YunoSelector,
};
use super::reply::{CommandReply, Response};
use super::Agent;
use crate::error::AgentError;
use crate::events::Requester;
use crate::resources::Filter;

/// Every command [`Agent::execute`] understands.
pub const COMMANDS: &[&str] = &[
    "create-realm",
    "delete-realm",
    "list-realms",
    "install-binary",
    "delete-binary",
    "list-binaries",
    "create-config",
    "delete-config",
    "list-configs",
    "create-yuno",
    "delete-yuno",
    "list-yunos",
    "run-yuno",
    "kill-yuno",
    "play-yuno",
    "pause-yuno",
    "enable-yuno",
    "disable-yuno",
    "trace-on-yuno",
    "trace-off-yuno",
    "command-yuno",
    "list-public-services",
    "list-instances",
    "list-snaps",
    "shoot-snap",
    "activate-snap",
    "deactivate-snap",
    "list-consoles",
    "close-console",
];

fn params<T: DeserializeOwned>(command: &str, kw: Value) -> Result<T, AgentError> {
    serde_json::from_value(kw).map_err(|e| AgentError::InvalidInput(format!("{command}: {e}")))
}

fn data<T: Serialize>(value: &T) -> Result<Value, AgentError> {
    serde_json::to_value(value).map_err(|e| AgentError::InvalidInput(e.to_string()))
}

impl Agent {
    /// Runs a named command. Never fails: errors become `result: -1` replies.
    pub async fn execute(&self, command: &str, kw: Value, requester: Requester) -> Response {
        debug!(command, requester = %requester, "command received");
        match self.dispatch(command, kw, requester).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(command, label = e.as_label(), error = %e.as_message(), "command failed");
                Response::Ready(CommandReply::from_error(&e))
            }
        }
    }

    async fn dispatch(
        &self,
        command: &str,
        kw: Value,
        requester: Requester,
    ) -> Result<Response, AgentError> {
        let kw = if kw.is_null() { json!({}) } else { kw };
        let out = match command {
            "create-realm" => data(&self.create_realm(params::<NewRealm>(command, kw)?).await?)?,
            "delete-realm" => {
                let p: Removal = params(command, kw)?;
                data(&self.delete_realm(&p.id, p.force).await?)?
            }
            "list-realms" => data(&self.list_realms(&filter(command, kw)?).await?)?,

            "install-binary" => {
                data(&self.install_binary(params::<NewBinary>(command, kw)?).await?)?
            }
            "delete-binary" => {
                let p: Removal = params(command, kw)?;
                data(&self.delete_binary(&p.id, p.version.as_deref(), p.force).await?)?
            }
            "list-binaries" => data(&self.list_binaries(&filter(command, kw)?).await?)?,

            "create-config" => data(&self.create_config(params::<NewConfig>(command, kw)?).await?)?,
            "delete-config" => {
                let p: Removal = params(command, kw)?;
                data(&self.delete_config(&p.id, p.version.as_deref(), p.force).await?)?
            }
            "list-configs" => data(&self.list_configs(&filter(command, kw)?).await?)?,

            "create-yuno" => data(&self.create_yuno(params::<NewYuno>(command, kw)?).await?)?,
            "delete-yuno" => {
                let p: YunoRemoval = params(command, kw)?;
                data(&self.delete_yunos(&p.select, p.force).await?)?
            }
            "list-yunos" => data(&self.list_yunos(&params::<YunoSelector>(command, kw)?).await?)?,

            "run-yuno" | "kill-yuno" | "play-yuno" | "pause-yuno" => {
                let verb = match command {
                    "run-yuno" => Verb::Run,
                    "kill-yuno" => Verb::Kill,
                    "play-yuno" => Verb::Play,
                    _ => Verb::Pause,
                };
                let sel: YunoSelector = params(command, kw)?;
                return Ok(self.fan_out(verb, &sel, requester).await?.into_response());
            }

            "enable-yuno" => outcomes_json(&self.enable_yunos(&params(command, kw)?).await?),
            "disable-yuno" => outcomes_json(&self.disable_yunos(&params(command, kw)?).await?),
            "trace-on-yuno" => outcomes_json(&self.trace_yunos(&params(command, kw)?, true).await?),
            "trace-off-yuno" => {
                outcomes_json(&self.trace_yunos(&params(command, kw)?, false).await?)
            }
            "command-yuno" => {
                let p: RawCommand = params(command, kw)?;
                outcomes_json(&self.command_yunos(&p.select, &p.command, p.kw).await?)
            }

            "list-public-services" => {
                data(&self.list_public_services(&filter(command, kw)?).await?)?
            }
            "list-instances" => {
                let p: Instances = params(command, kw)?;
                Value::Array(self.list_instances(p.kind, &Filter::from(p.filter)).await?)
            }

            "list-snaps" => data(&self.list_snaps().await?)?,
            "shoot-snap" => {
                let p: SnapName = params(command, kw)?;
                data(&self.shoot_snap(&p.name, &p.description).await?)?
            }
            "activate-snap" | "deactivate-snap" => {
                let p: SnapName = params(command, kw)?;
                let report = if command == "activate-snap" {
                    self.activate_snap(&p.name).await?
                } else {
                    self.deactivate_snap(&p.name).await?
                };
                json!({
                    "snap": report.snap,
                    "killed": report.killed,
                    "launched": report.launched,
                })
            }

            "list-consoles" => data(&self.console.list_consoles().await)?,
            "close-console" => {
                let p: ConsoleName = params(command, kw)?;
                self.console.close_console(&p.name).await?;
                json!({"name": p.name})
            }

            other => {
                return Err(AgentError::InvalidInput(format!("unknown command {other:?}")));
            }
        };
        Ok(Response::Ready(CommandReply::ok(out)))
    }
}

fn filter(command: &str, kw: Value) -> Result<Filter, AgentError> {
    Ok(Filter::from(params::<Map<String, Value>>(command, kw)?))
}
