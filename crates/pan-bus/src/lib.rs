//! # pan-bus — the in-process Message Bus
//!
//! A synchronous-dispatch, asynchronous-delivery fan-out: subscribers
//! register a filter over `(event_name, handler)`; publishers `emit`.
//! Built on `tokio::sync::broadcast` so publishing never runs a handler on
//! the publisher's own stack and one slow/panicking subscriber cannot
//! starve the others — each drives its own receiver independently.
//!
//! Components communicate cross-cutting concerns (Agent Router → peer
//! relay) exclusively through this bus rather than direct calls, so that
//! a peer relay can be wired in later as just another subscriber.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{EventFilter, EventTopic, PanEvent};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, EventSubscriber, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before the oldest are dropped
/// (a lagging subscriber observes a gap rather than blocking the bus).
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
