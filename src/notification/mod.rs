//! Delivery of notifications and replies through the chat platform.
//!
//! The [`dispatcher`] isolates delivery failures from the event pipeline, and
//! [`onebot`] talks to a OneBot v11 HTTP API endpoint.
pub mod dispatcher;
pub mod onebot;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use onebot::{OneBotClient, OneBotError};
