//! Core domain types and service traits for GroupWatch
//!
//! This module defines the fundamental data structures and trait contracts
//! that govern component interactions throughout the application.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single, untyped event as delivered by the chat transport.
///
/// The payload is never inspected outside of the classifier and the command
/// router; everything downstream works on typed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Name of the platform integration that produced the event (e.g. "aiocqhttp").
    pub platform: String,
    /// The raw event record.
    pub payload: Value,
}

impl InboundEvent {
    pub fn new(platform: impl Into<String>, payload: Value) -> Self {
        Self {
            platform: platform.into(),
            payload,
        }
    }
}

/// Why a member left a monitored group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartureReason {
    /// The member left on their own ("leave").
    SelfLeft,
    /// The member was removed by an operator ("kick").
    Kicked,
    /// The bot account itself was removed ("kick_me").
    SelfKicked,
}

impl DepartureReason {
    /// Maps the transport's sub-type discriminator to a reason.
    ///
    /// Unknown values fall back to [`DepartureReason::SelfLeft`].
    pub fn from_sub_type(sub_type: &str) -> Self {
        match sub_type {
            "kick" => Self::Kicked,
            "kick_me" => Self::SelfKicked,
            _ => Self::SelfLeft,
        }
    }
}

/// A classified "member departed" event for a monitored group.
#[derive(Debug, Clone, PartialEq)]
pub struct DepartureEvent {
    pub source_id: String,
    pub departed_user_id: String,
    pub operator_id: Option<String>,
    pub reason: DepartureReason,
    pub timestamp: DateTime<Utc>,
}

/// The outcome of classifying an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// A departure from a monitored group, with the destination it routes to.
    Departure {
        event: DepartureEvent,
        destination: String,
    },
    /// Anything else. This is a normal outcome, not a failure.
    NotApplicable,
}

// =============================================================================
// Service Traits
// =============================================================================

/// Best-effort metadata lookups against the chat platform.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Returns the display name of a group.
    async fn group_name(&self, group_id: &str) -> Result<String>;

    /// Returns the display name of a user.
    async fn user_nickname(&self, user_id: &str) -> Result<String>;
}

/// Delivers text messages through the chat platform.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Sends a message to a group.
    ///
    /// # Returns
    /// * `Ok(())` if the platform accepted the message
    /// * `Err` on network errors or when the platform rejected the call
    async fn send_group_message(&self, group_id: &str, text: &str) -> Result<()>;

    /// Sends a direct message to a user.
    async fn send_private_message(&self, user_id: &str, text: &str) -> Result<()>;
}

/// Decides whether a caller may run admin commands.
pub trait AdminCheck: Send + Sync {
    fn is_authorized(&self, user_id: &str) -> bool;
}

/// An [`AdminCheck`] backed by a fixed list of user ids.
#[derive(Debug, Clone, Default)]
pub struct AdminList {
    admins: Vec<String>,
}

impl AdminList {
    pub fn new(admins: Vec<String>) -> Self {
        Self { admins }
    }
}

impl AdminCheck for AdminList {
    fn is_authorized(&self, user_id: &str) -> bool {
        self.admins.iter().any(|admin| admin == user_id)
    }
}

/// Renders an id-like JSON value as a string.
///
/// OneBot implementations disagree on whether ids are numbers or strings, so
/// both are accepted. Missing and other values yield `None`.
pub fn id_from_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reason_from_sub_type() {
        assert_eq!(DepartureReason::from_sub_type("leave"), DepartureReason::SelfLeft);
        assert_eq!(DepartureReason::from_sub_type("kick"), DepartureReason::Kicked);
        assert_eq!(DepartureReason::from_sub_type("kick_me"), DepartureReason::SelfKicked);
        assert_eq!(DepartureReason::from_sub_type("something_new"), DepartureReason::SelfLeft);
        assert_eq!(DepartureReason::from_sub_type(""), DepartureReason::SelfLeft);
    }

    #[test]
    fn test_id_from_value() {
        let payload = json!({ "a": 123, "b": "456", "c": "", "d": null, "e": [1] });
        assert_eq!(id_from_value(payload.get("a")), Some("123".to_string()));
        assert_eq!(id_from_value(payload.get("b")), Some("456".to_string()));
        assert_eq!(id_from_value(payload.get("c")), None);
        assert_eq!(id_from_value(payload.get("d")), None);
        assert_eq!(id_from_value(payload.get("e")), None);
        assert_eq!(id_from_value(payload.get("missing")), None);
    }

    #[test]
    fn test_admin_list() {
        let admins = AdminList::new(vec!["10001".to_string()]);
        assert!(admins.is_authorized("10001"));
        assert!(!admins.is_authorized("10002"));
        assert!(!AdminList::default().is_authorized("10001"));
    }
}
