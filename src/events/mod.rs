//! Agent events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the supervisor callbacks, fan-in
//! counters and the snapshot controller.
//!
//! ## Contents
//! - [`EventKind`], [`Event`], [`Requester`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `WorkerSupervisor` (spawn, on_open, on_close, acks),
//!   `FanInCounter` (final count), `SnapshotController`, `SubscriberSet` workers.
//! - **Consumers**: `Agent::subscriber_listener()` (fans out to `SubscriberSet`)
//!   and every live `FanInCounter`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind, Requester};
