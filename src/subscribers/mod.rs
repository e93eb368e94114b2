//! # Event subscribers for the agent runtime.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`]
//! fan-out used to deliver bus events to observers without blocking publishers.
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Supervisor/Counter ── publish(Event) ──► Bus ──► subscriber_listener
//!                                                         │
//!                                                  SubscriberSet::emit
//!                                               ┌─────────┼─────────┐
//!                                               ▼         ▼         ▼
//!                                           LogWriter   Custom     ...
//! ```

#[cfg(feature = "logging")]
mod log;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
