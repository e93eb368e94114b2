//! # Fan-in counter: N acknowledgements, one reply.
//!
//! A command that fans out to many workers (run, kill, play, pause) must answer
//! its caller exactly once. [`FanInCounter::start`] subscribes to the bus,
//! then a task counts matching acknowledgements until the target is reached or
//! the expiration fires:
//!
//! ```text
//!   FanInCounter::start ── bus.subscribe() ──► counter task
//!   (caller issues actions afterwards)            │
//!                                                 ├─ select! {
//!                                                 │    deadline      ──► ok = false
//!                                                 │    rx.recv()     ──► match schema, dedup by filter index
//!                                                 │  }                   cur == max ──► ok = true
//!                                                 ▼
//!                                   Bus ◄── Event::FinalCount{requester, ok, info, cur, max}
//!                                   CounterHandle::wait() ◄── same FinalCount
//! ```
//!
//! ## Rules
//! - The bus receiver is created **before** `start` returns, so acknowledgements
//!   produced by actions issued after it are never missed.
//! - Each schema filter counts at most once; duplicate deliveries are ignored.
//! - `max_count == 0` finishes immediately with `ok = false`.
//! - Expiration `None` waits forever; expiration with `cur < max` reports the
//!   partial count with `ok = false`.
//! - Exactly one `FinalCount` is published per counter.

mod schema;

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::{Bus, Event, EventKind, Requester};

pub use schema::{EventFilter, InputSchema};

/// Terminal totals of a counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalCount {
    pub ok: bool,
    pub info: String,
    pub cur_count: usize,
    pub max_count: usize,
}

/// Parameters of one counter.
#[derive(Debug, Clone)]
pub struct FanInCounter {
    pub max_count: usize,
    pub schema: InputSchema,
    pub expiration: Option<Duration>,
    pub requester: Requester,
    /// Text reported on success.
    pub info: String,
}

/// Handle to a running counter task.
pub struct CounterHandle {
    join: JoinHandle<FinalCount>,
    max_count: usize,
}

impl CounterHandle {
    /// Waits for the terminal totals.
    pub async fn wait(self) -> FinalCount {
        match self.join.await {
            Ok(fc) => fc,
            Err(e) => FinalCount {
                ok: false,
                info: format!("counter task failed: {e}"),
                cur_count: 0,
                max_count: self.max_count,
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl std::fmt::Debug for CounterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterHandle")
            .field("max_count", &self.max_count)
            .field("finished", &self.join.is_finished())
            .finish()
    }
}

impl FanInCounter {
    pub fn new(max_count: usize, schema: InputSchema, requester: Requester) -> Self {
        Self {
            max_count,
            schema,
            expiration: None,
            requester,
            info: String::new(),
        }
    }

    pub fn with_expiration(mut self, expiration: Option<Duration>) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    /// Subscribes to `bus` and spawns the counting task.
    pub fn start(self, bus: &Bus) -> CounterHandle {
        let rx = bus.subscribe();
        let max_count = self.max_count;
        let join = tokio::spawn(self.run(rx, bus.clone()));
        CounterHandle { join, max_count }
    }

    async fn run(self, mut rx: tokio::sync::broadcast::Receiver<Event>, bus: Bus) -> FinalCount {
        let FanInCounter {
            max_count,
            schema,
            expiration,
            requester,
            info,
        } = self;

        let fc = if max_count == 0 {
            FinalCount {
                ok: false,
                info: "no eligible target".to_string(),
                cur_count: 0,
                max_count,
            }
        } else {
            let deadline = async move {
                match expiration {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(deadline);

            let mut seen = vec![false; schema.len()];
            let mut cur_count = 0usize;
            let outcome = loop {
                tokio::select! {
                    _ = &mut deadline => break Err("timeout"),
                    msg = rx.recv() => match msg {
                        Ok(ev) => {
                            if let Some(idx) = schema.first_unseen_match(&ev, &seen) {
                                seen[idx] = true;
                                cur_count += 1;
                                debug!(requester = %requester, cur_count, max_count, "ack counted");
                                if cur_count >= max_count {
                                    break Ok(());
                                }
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(requester = %requester, skipped, "counter lagged behind the bus");
                        }
                        Err(RecvError::Closed) => break Err("bus closed"),
                    }
                }
            };
            match outcome {
                Ok(()) => FinalCount {
                    ok: true,
                    info: if info.is_empty() { "done".to_string() } else { info },
                    cur_count,
                    max_count,
                },
                Err(why) => FinalCount {
                    ok: false,
                    info: format!("{why}: {cur_count} of {max_count} acknowledged"),
                    cur_count,
                    max_count,
                },
            }
        };

        bus.publish(
            Event::new(EventKind::FinalCount)
                .with_requester(requester)
                .with_reason(fc.info.clone())
                .with_final_count(fc.clone()),
        );
        fc
    }
}
