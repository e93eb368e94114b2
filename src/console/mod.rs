//! # Consoles: one pseudo-terminal, many viewers.
//!
//! A console is a named terminal session opened through a [`TerminalFactory`].
//! Viewers subscribe with a [`RouteKey`] `(service, child)` on one of their
//! channels; terminal output is fanned out to every route as `EV_TTY_DATA`.
//!
//! ```text
//!   viewer A ──route(svc, c1)──┐
//!   viewer B ──route(svc, c2)──┼──► ConsoleRouter["bash"] ──► Terminal (pty)
//!   viewer A ──route(svc, c3)──┘         ▲ on_output             │
//!                                        └──────────────────────┘
//! ```
//!
//! ## Rules
//! - Input from any route goes to the one terminal.
//! - A route whose channel reports `Closed` is dropped during fan-out.
//! - When a channel disconnects all its routes go away; a console left with
//!   no routes is closed.

mod router;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use router::{ConsoleInfo, ConsoleRouter, RouteKey};

/// Errors produced by consoles and their terminals.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// The terminal was already closed.
    #[error("terminal closed")]
    Closed,

    #[error("console not found: {0}")]
    NotFound(String),

    #[error("console already open: {0}")]
    AlreadyExists(String),

    /// No terminal factory is configured on this agent.
    #[error("consoles are not available")]
    Unavailable,

    #[error("terminal error: {0}")]
    Terminal(String),
}

impl ConsoleError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConsoleError::Closed => "console_closed",
            ConsoleError::NotFound(_) => "console_not_found",
            ConsoleError::AlreadyExists(_) => "console_exists",
            ConsoleError::Unavailable => "console_unavailable",
            ConsoleError::Terminal(_) => "terminal_error",
        }
    }
}

/// An open pseudo-terminal.
#[async_trait]
pub trait Terminal: Send + Sync + 'static {
    /// Writes keyboard input to the terminal.
    async fn write(&self, data: &[u8]) -> Result<(), ConsoleError>;

    /// Closes the terminal; later writes fail with [`ConsoleError::Closed`].
    async fn close(&self);
}

/// Opens terminals running `command` with the given window size.
#[async_trait]
pub trait TerminalFactory: Send + Sync + 'static {
    async fn open(
        &self,
        name: &str,
        command: &str,
        cols: u16,
        rows: u16,
    ) -> Result<Arc<dyn Terminal>, ConsoleError>;
}
