//! Decides whether an inbound event is a departure from a monitored group.
//!
//! Classification never fails: anything that is not a well-formed
//! `notice/group_decrease` event for a monitored group is `NotApplicable`.

use crate::core::{id_from_value, Classification, DepartureEvent, DepartureReason, InboundEvent};
use crate::registry::RegistrySnapshot;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::trace;

const POST_TYPE_NOTICE: &str = "notice";
const NOTICE_GROUP_DECREASE: &str = "group_decrease";

/// Filters inbound events down to monitored departures.
#[derive(Debug, Clone)]
pub struct Classifier {
    platform: String,
}

impl Classifier {
    /// Creates a classifier that only accepts events from `platform`.
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
        }
    }

    /// Classifies `event` against the current registry snapshot.
    pub fn classify(&self, event: &InboundEvent, registry: &RegistrySnapshot) -> Classification {
        if event.platform != self.platform {
            return Classification::NotApplicable;
        }

        let Value::Object(record) = &event.payload else {
            return Classification::NotApplicable;
        };

        let post_type = record.get("post_type").and_then(Value::as_str);
        let notice_type = record.get("notice_type").and_then(Value::as_str);
        if post_type != Some(POST_TYPE_NOTICE) || notice_type != Some(NOTICE_GROUP_DECREASE) {
            return Classification::NotApplicable;
        }

        let source_id = id_from_value(record.get("group_id")).unwrap_or_default();
        let departed_user_id = id_from_value(record.get("user_id")).unwrap_or_default();
        let operator_id = id_from_value(record.get("operator_id"));
        let sub_type = record
            .get("sub_type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let Some(destination) = registry.destination_for(&source_id) else {
            trace!(source_id = %source_id, "Departure from an unmonitored group, ignoring.");
            return Classification::NotApplicable;
        };

        let timestamp = record
            .get("time")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        Classification::Departure {
            event: DepartureEvent {
                source_id,
                departed_user_id,
                operator_id,
                reason: DepartureReason::from_sub_type(sub_type),
                timestamp,
            },
            destination: destination.to_string(),
        }
    }
}
