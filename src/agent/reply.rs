//! Command replies.
//!
//! Every command answers with a [`CommandReply`]; `result < 0` is a failure.
//! Fan-in commands answer twice in effect: an immediate [`Response::Pending`]
//! acknowledging the request, and the settled reply built from the counter's
//! [`FinalCount`].

use serde::Serialize;
use serde_json::{Value, json};

use crate::counter::{CounterHandle, FinalCount};
use crate::error::AgentError;

/// `{result, comment, schema?, data}` answer of a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply {
    pub result: i32,
    pub comment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    pub data: Value,
}

impl CommandReply {
    pub fn ok(data: Value) -> Self {
        Self {
            result: 0,
            comment: String::new(),
            schema: None,
            data,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn error(comment: impl Into<String>) -> Self {
        Self {
            result: -1,
            comment: comment.into(),
            schema: None,
            data: Value::Null,
        }
    }

    /// Maps any error to `{result: -1, comment: as_message()}`.
    pub fn from_error(err: &AgentError) -> Self {
        Self::error(err.as_message())
    }

    /// Reply of a finished fan-in counter.
    pub fn from_final_count(fc: &FinalCount) -> Self {
        Self {
            result: if fc.ok { 0 } else { -1 },
            comment: fc.info.clone(),
            schema: None,
            data: json!(fc),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result >= 0
    }
}

impl From<Result<Value, AgentError>> for CommandReply {
    fn from(res: Result<Value, AgentError>) -> Self {
        match res {
            Ok(data) => CommandReply::ok(data),
            Err(e) => CommandReply::from_error(&e),
        }
    }
}

/// What a command produced.
#[derive(Debug)]
pub enum Response {
    /// Final answer.
    Ready(CommandReply),
    /// Request accepted; the final answer comes from `counter`.
    Pending {
        reply: CommandReply,
        counter: CounterHandle,
    },
}

impl Response {
    /// Immediate reply (the acknowledgement for pending commands).
    pub fn reply(&self) -> &CommandReply {
        match self {
            Response::Ready(reply) | Response::Pending { reply, .. } => reply,
        }
    }

    /// Waits for the final answer.
    pub async fn settle(self) -> CommandReply {
        match self {
            Response::Ready(reply) => reply,
            Response::Pending { counter, .. } => {
                CommandReply::from_final_count(&counter.wait().await)
            }
        }
    }
}

impl From<CommandReply> for Response {
    fn from(reply: CommandReply) -> Self {
        Response::Ready(reply)
    }
}
