//! # yunovisor
//!
//! **Yunovisor** is the per-host agent of a fleet of long-running worker
//! processes ("yunos"). It keeps a versioned graph of what is deployed on the
//! host, drives the worker processes through their lifecycle and answers
//! fan-out commands with exactly one aggregated reply.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!      commands (execute)                worker callbacks
//!   create-yuno, run-yuno ...      on_open / on_close / play & pause acks
//!              │                                 │
//!              ▼                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Agent (command surface)                                          │
//! │  - ResourceGraph      realms, binaries, configs, yunos, services  │
//! │  - WorkerSupervisor   spawn / signal / play / pause / disable     │
//! │  - SnapshotController stop-the-world version switches             │
//! │  - ConsoleRouter      terminal sessions fanned out to viewers     │
//! └──────┬──────────────────┬──────────────────┬───────────────┬──────┘
//!        ▼                  ▼                  ▼               │
//!  ┌────────────┐    ┌──────────────┐   ┌──────────────┐       │
//!  │ Persistence│    │ProcessControl│   │   Channel    │       │
//!  │  (store)   │    │(spawn/signal)│   │ (to workers) │       │
//!  └────────────┘    └──────────────┘   └──────────────┘       │
//!                                                              ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │     YunoSpawned, YunoOpened, YunoClosed, YunoPlayed, FinalCount   │
//! └──────────────┬──────────────────────────────────┬─────────────────┘
//!                ▼                                  ▼
//!       ┌─────────────────┐               ┌────────────────────┐
//!       │  FanInCounter   │               │ subscriber_listener│
//!       │ (one per fan-out│               └─────────┬──────────┘
//!       │  command)       │                         ▼
//!       └────────┬────────┘                   SubscriberSet
//!                ▼                          ┌───────┼────────┐
//!          FinalCount{ok, cur, max}         ▼       ▼        ▼
//!          to the requester             LogWriter  sub2     subN
//! ```
//!
//! ### Yuno lifecycle
//! ```text
//! create-yuno ──► Stopped ──run──► Launching ──on_open──► Running ──play ack──► Playing
//!                   ▲                                        │                    │
//!                   └──────────── on_close / ESRCH ──────────┴────────────────────┘
//! disable: pause, then force kill (SIGKILL + watcher), then disabled = true
//! ```
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                          |
//! |-------------------|-------------------------------------------------------------|---------------------------------------------|
//! | **Commands**      | Named commands answering `{result, comment, schema, data}`. | [`Agent`], [`CommandReply`], [`Response`]   |
//! | **Graph**         | Versioned resources with identity checks and delete guards. | [`ResourceGraph`], [`Persistence`]          |
//! | **Supervision**   | Worker lifecycle state machine and identity verification.   | [`WorkerSupervisor`], [`ProcessControl`]    |
//! | **Fan-in**        | N acknowledgements, one reply, with expiration.             | [`FanInCounter`], [`FinalCount`]            |
//! | **Snapshots**     | Switch every active version at once.                        | [`SnapshotController`]                      |
//! | **Consoles**      | One terminal, many viewers.                                 | [`ConsoleRouter`], [`Terminal`]             |
//! | **Subscriber API**| Observe every bus event.                                    | [`Subscribe`]                               |
//! | **Errors**        | Typed errors with stable labels.                            | [`AgentError`]                              |
//!
//! ## Optional features
//! - `logging`: exports the tracing-backed [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use serde_json::json;
//! use yunovisor::{Agent, AgentConfig, Requester};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let agent = Agent::builder(AgentConfig::default()).build()?;
//!
//!     let reply = agent
//!         .execute(
//!             "create-realm",
//!             json!({
//!                 "realm_owner": "me",
//!                 "realm_role": "mail",
//!                 "realm_name": "main",
//!                 "realm_env": "prod",
//!                 "range_ports": [[9000, 9010]],
//!             }),
//!             Requester::new("doc"),
//!         )
//!         .await
//!         .settle()
//!         .await;
//!     assert_eq!(reply.result, 0);
//!
//!     agent.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod channel;
pub mod config;
pub mod console;
pub mod core;
pub mod counter;
mod error;
pub mod events;
pub mod graph;
pub mod process;
pub mod resources;
pub mod snapshot;
pub mod store;
pub mod subscribers;
pub mod supervisor;

#[cfg(test)]
mod testing;

// ---- Public re-exports ----

pub use agent::{Agent, AgentBuilder, CommandReply, Response, YunoSelector};
pub use channel::{Channel, ChannelError, ChannelId, IdentityCard};
pub use config::{AgentConfig, AgentState, KillMode};
pub use console::{ConsoleError, ConsoleRouter, Terminal, TerminalFactory};
pub use counter::{FanInCounter, FinalCount};
pub use error::AgentError;
pub use events::{Bus, Event, EventKind, Requester};
pub use graph::ResourceGraph;
pub use process::{ProcessControl, ProcessError};
pub use resources::{Filter, ResourceKind, version};
pub use snapshot::SnapshotController;
pub use store::{MemoryStore, Persistence, StoreError, WriteMode};
pub use subscribers::{Subscribe, SubscriberSet};
pub use supervisor::{Outcome, WorkerSupervisor};

// Optional: the tracing-backed logger subscriber.
// Enable with: `--features logging` (on by default)
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
