//! Bera Host event bus.
//!
//! Log producers (the deploy pipeline, app runtimes) publish [`LogEvent`]s
//! to the [`EventBus`]. Each event is appended to the log store and then
//! pushed to every live subscriber whose [`Topic`] matches. There is no
//! replay: a subscriber sees only events published after it registered.
//!
//! # Components
//!
//! - **`bus`**: `EventBus`, persistence hook plus fan-out
//! - **`registry`**: `SubscriberRegistry`, topics and sinks
//! - **`message`**: JSON wire frames sent to subscribers
//!
//! [`LogEvent`]: bera_state::LogEvent

pub mod bus;
pub mod error;
pub mod message;
pub mod registry;

pub use bus::EventBus;
pub use error::StreamError;
pub use message::{LogPayload, StreamMessage};
pub use registry::{EventSink, SinkError, SubscriberId, SubscriberRegistry, Topic};
