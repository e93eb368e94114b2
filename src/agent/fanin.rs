//! Lifecycle commands over a selection of yunos.
//!
//! `run`, `kill`, `play` and `pause` fan out to every eligible yuno and are
//! answered by one [`FanInCounter`] waiting for the matching
//! acknowledgements. The per-yuno switches (`enable`, `disable`, `trace`,
//! raw commands) answer synchronously with one [`Outcome`] per yuno.

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::params::YunoSelector;
use super::reply::{CommandReply, Response};
use super::Agent;
use crate::counter::{CounterHandle, EventFilter, FanInCounter, InputSchema};
use crate::error::AgentError;
use crate::events::{EventKind, Requester};
use crate::resources::{ResourceKind, Yuno};
use crate::supervisor::Outcome;

/// Fan-in lifecycle command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Run,
    Kill,
    Play,
    Pause,
}

impl Verb {
    pub fn command(&self) -> &'static str {
        match self {
            Verb::Run => "run-yuno",
            Verb::Kill => "kill-yuno",
            Verb::Play => "play-yuno",
            Verb::Pause => "pause-yuno",
        }
    }

    /// Event that acknowledges this verb for one yuno.
    pub fn ack(&self) -> EventKind {
        match self {
            Verb::Run => EventKind::YunoOpened,
            Verb::Kill => EventKind::YunoClosed,
            Verb::Play => EventKind::YunoPlayed,
            Verb::Pause => EventKind::YunoPaused,
        }
    }

    /// Whether `yuno` is in a state this verb acts on.
    pub fn eligible(&self, yuno: &Yuno) -> bool {
        match self {
            Verb::Run => !yuno.disabled && !yuno.running,
            Verb::Kill => yuno.running,
            Verb::Play => !yuno.disabled && !yuno.playing && (yuno.running || yuno.pid != 0),
            Verb::Pause => yuno.running && yuno.playing,
        }
    }
}

/// A fan-in command in flight.
#[derive(Debug)]
pub struct FanIn {
    pub verb: Verb,
    pub targets: Vec<String>,
    pub schema: InputSchema,
    pub counter: CounterHandle,
}

impl FanIn {
    pub fn into_response(self) -> Response {
        let reply = CommandReply::ok(Value::Null)
            .with_comment(format!(
                "{}: waiting for {} yuno(s)",
                self.verb.command(),
                self.targets.len()
            ))
            .with_schema(self.schema.to_json());
        Response::Pending {
            reply,
            counter: self.counter,
        }
    }
}

impl Agent {
    /// Applies `verb` to every eligible selected yuno and starts the counter
    /// of their acknowledgements, addressed to `requester`.
    ///
    /// No eligible yuno is `NotFound`: there is nothing to wait for.
    pub async fn fan_out(
        &self,
        verb: Verb,
        sel: &YunoSelector,
        requester: Requester,
    ) -> Result<FanIn, AgentError> {
        let targets: Vec<Yuno> = self
            .list_yunos(sel)
            .await?
            .into_iter()
            .filter(|y| verb.eligible(y))
            .collect();
        if targets.is_empty() {
            return Err(AgentError::not_found(
                ResourceKind::Yuno,
                format!("no eligible yuno for {}", verb.command()),
            ));
        }

        let schema: InputSchema = targets
            .iter()
            .map(|y| EventFilter::for_yuno(verb.ack(), &y.id))
            .collect();
        // the counter subscribes before any action is issued
        let counter = FanInCounter::new(targets.len(), schema.clone(), requester.clone())
            .with_expiration(self.cfg.counter_timeout())
            .with_info(format!("{}: {} yuno(s) done", verb.command(), targets.len()))
            .start(&self.bus);

        for yuno in &targets {
            let res = match verb {
                Verb::Run => self.supervisor.run(&yuno.id).await,
                Verb::Kill => self.supervisor.kill(&yuno.id).await,
                Verb::Play => self.supervisor.play(&yuno.id).await,
                Verb::Pause => self.supervisor.pause(&yuno.id).await,
            };
            match res {
                Ok(Outcome::Skipped { reason }) => {
                    debug!(yuno_id = %yuno.id, command = verb.command(), %reason, "skipped after selection");
                }
                Ok(_) => {}
                Err(e) => warn!(yuno_id = %yuno.id, command = verb.command(), error = %e.as_message(), "action failed"),
            }
        }
        info!(command = verb.command(), targets = targets.len(), requester = %requester, "fan-out issued");
        Ok(FanIn {
            verb,
            targets: targets.into_iter().map(|y| y.id).collect(),
            schema,
            counter,
        })
    }

    pub async fn run_yunos(&self, sel: &YunoSelector, requester: Requester) -> Result<FanIn, AgentError> {
        self.fan_out(Verb::Run, sel, requester).await
    }

    pub async fn kill_yunos(&self, sel: &YunoSelector, requester: Requester) -> Result<FanIn, AgentError> {
        self.fan_out(Verb::Kill, sel, requester).await
    }

    pub async fn play_yunos(&self, sel: &YunoSelector, requester: Requester) -> Result<FanIn, AgentError> {
        self.fan_out(Verb::Play, sel, requester).await
    }

    pub async fn pause_yunos(&self, sel: &YunoSelector, requester: Requester) -> Result<FanIn, AgentError> {
        self.fan_out(Verb::Pause, sel, requester).await
    }

    pub async fn enable_yunos(&self, sel: &YunoSelector) -> Result<Vec<(String, Outcome)>, AgentError> {
        let mut out = Vec::new();
        for yuno in self.select_yunos(sel).await? {
            out.push((yuno.id.clone(), self.supervisor.enable(&yuno.id).await?));
        }
        Ok(out)
    }

    pub async fn disable_yunos(&self, sel: &YunoSelector) -> Result<Vec<(String, Outcome)>, AgentError> {
        let mut out = Vec::new();
        for yuno in self.select_yunos(sel).await? {
            out.push((yuno.id.clone(), self.supervisor.disable(&yuno.id).await?));
        }
        Ok(out)
    }

    pub async fn trace_yunos(
        &self,
        sel: &YunoSelector,
        on: bool,
    ) -> Result<Vec<(String, Outcome)>, AgentError> {
        let mut out = Vec::new();
        for yuno in self.select_yunos(sel).await? {
            out.push((yuno.id.clone(), self.supervisor.set_trace(&yuno.id, on).await?));
        }
        Ok(out)
    }

    /// Forwards `command` to every selected yuno that is running.
    pub async fn command_yunos(
        &self,
        sel: &YunoSelector,
        command: &str,
        kw: Value,
    ) -> Result<Vec<(String, Outcome)>, AgentError> {
        let mut out = Vec::new();
        for yuno in self.select_yunos(sel).await? {
            let outcome = self.supervisor.command(&yuno.id, command, kw.clone()).await?;
            out.push((yuno.id, outcome));
        }
        Ok(out)
    }
}

/// `[{"yuno_id", "outcome"}]` view of per-yuno results.
pub(crate) fn outcomes_json(outcomes: &[(String, Outcome)]) -> Value {
    Value::Array(
        outcomes
            .iter()
            .map(|(id, outcome)| json!({"yuno_id": id, "outcome": outcome.to_string()}))
            .collect(),
    )
}
