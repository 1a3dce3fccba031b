// src/formatting.rs

use crate::core::{DepartureEvent, DepartureReason, MetadataProvider};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::warn;

pub const UNKNOWN_USER: &str = "unknown user";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Renders the human-readable reason for a departure.
pub fn reason_text(reason: DepartureReason, operator_id: Option<&str>) -> String {
    match reason {
        DepartureReason::SelfLeft => "voluntarily left".to_string(),
        DepartureReason::Kicked => {
            format!("removed by operator {}", operator_id.unwrap_or("unknown"))
        }
        DepartureReason::SelfKicked => "bot account was removed".to_string(),
    }
}

/// Resolves `name(id)` for a group, or `unknown group(id)` if the lookup fails.
pub async fn group_label(metadata: &dyn MetadataProvider, group_id: &str) -> String {
    match metadata.group_name(group_id).await {
        Ok(name) => format!("{}({})", name, group_id),
        Err(e) => {
            warn!(group_id, error = %e, "Failed to resolve group name");
            format!("unknown group({})", group_id)
        }
    }
}

/// Resolves a user's nickname, or [`UNKNOWN_USER`] if the lookup fails.
pub async fn user_label(metadata: &dyn MetadataProvider, user_id: &str) -> String {
    match metadata.user_nickname(user_id).await {
        Ok(nickname) if !nickname.is_empty() => nickname,
        Ok(_) => UNKNOWN_USER.to_string(),
        Err(e) => {
            warn!(user_id, error = %e, "Failed to resolve departed user's nickname");
            UNKNOWN_USER.to_string()
        }
    }
}

/// Builds departure notifications. Lookups are best-effort; composing never fails.
#[derive(Clone)]
pub struct NotificationComposer {
    metadata: Arc<dyn MetadataProvider>,
}

impl NotificationComposer {
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self { metadata }
    }

    /// Composes the notification for `event` as sent at `sent_at`.
    pub async fn compose(&self, event: &DepartureEvent, sent_at: DateTime<Local>) -> String {
        let (group, nickname) = tokio::join!(
            group_label(self.metadata.as_ref(), &event.source_id),
            user_label(self.metadata.as_ref(), &event.departed_user_id),
        );

        format_notification(
            &sent_at.format(TIME_FORMAT).to_string(),
            &group,
            &event.departed_user_id,
            &nickname,
            &reason_text(event.reason, event.operator_id.as_deref()),
        )
    }
}

fn format_notification(time: &str, group: &str, user_id: &str, nickname: &str, reason: &str) -> String {
    format!(
        "[Group Member Departure]\n\
         Time: {}\n\
         Group: {}\n\
         User ID: {}\n\
         Nickname: {}\n\
         Reason: {}",
        time, group, user_id, nickname, reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct FixedMetadata;

    #[async_trait]
    impl MetadataProvider for FixedMetadata {
        async fn group_name(&self, group_id: &str) -> Result<String> {
            match group_id {
                "111" => Ok("Rust Learners".to_string()),
                _ => Err(anyhow!("group not found")),
            }
        }

        async fn user_nickname(&self, user_id: &str) -> Result<String> {
            match user_id {
                "222" => Ok("ferris".to_string()),
                "444" => Ok(String::new()),
                _ => Err(anyhow!("user not found")),
            }
        }
    }

    fn event(source: &str, user: &str, reason: DepartureReason, operator: Option<&str>) -> DepartureEvent {
        DepartureEvent {
            source_id: source.to_string(),
            departed_user_id: user.to_string(),
            operator_id: operator.map(str::to_string),
            reason,
            timestamp: Utc::now(),
        }
    }

    fn sent_at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(reason_text(DepartureReason::SelfLeft, Some("333")), "voluntarily left");
        assert_eq!(
            reason_text(DepartureReason::Kicked, Some("333")),
            "removed by operator 333"
        );
        assert_eq!(
            reason_text(DepartureReason::Kicked, None),
            "removed by operator unknown"
        );
        assert_eq!(
            reason_text(DepartureReason::SelfKicked, None),
            "bot account was removed"
        );
    }

    #[tokio::test]
    async fn test_compose_with_metadata() {
        let composer = NotificationComposer::new(Arc::new(FixedMetadata));
        let message = composer
            .compose(&event("111", "222", DepartureReason::SelfLeft, None), sent_at())
            .await;

        let expected = "[Group Member Departure]\n\
                        Time: 2026-03-14 09:26:53\n\
                        Group: Rust Learners(111)\n\
                        User ID: 222\n\
                        Nickname: ferris\n\
                        Reason: voluntarily left";
        assert_eq!(message, expected);
    }

    #[tokio::test]
    async fn test_compose_falls_back_when_lookups_fail() {
        let composer = NotificationComposer::new(Arc::new(FixedMetadata));
        let message = composer
            .compose(
                &event("555", "666", DepartureReason::Kicked, Some("333")),
                sent_at(),
            )
            .await;

        assert!(message.contains("Group: unknown group(555)"));
        assert!(message.contains("User ID: 666"));
        assert!(message.contains("Nickname: unknown user"));
        assert!(message.contains("Reason: removed by operator 333"));
    }

    #[tokio::test]
    async fn test_empty_nickname_falls_back() {
        assert_eq!(user_label(&FixedMetadata, "444").await, UNKNOWN_USER);
    }
}
