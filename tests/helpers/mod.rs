//! Fakes for the chat platform collaborators.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use groupwatch::core::{MessageTransport, MetadataProvider};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A message recorded by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Group { group_id: String, text: String },
    Private { user_id: String, text: String },
}

/// A transport that records every message and can be told to reject some targets.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    failing_groups: Mutex<HashSet<String>>,
    notify: Notify,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_group(&self, group_id: &str) {
        self.failing_groups
            .lock()
            .unwrap()
            .insert(group_id.to_string());
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn group_messages(&self, group_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Group { group_id: g, text } if g == group_id => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Waits until at least `count` messages were recorded.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Sent> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.sent.lock().unwrap().len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .expect("Timed out waiting for sent messages");
        self.sent()
    }

    fn record(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send_group_message(&self, group_id: &str, text: &str) -> Result<()> {
        if self.failing_groups.lock().unwrap().contains(group_id) {
            return Err(anyhow!("group {} rejected the message", group_id));
        }
        self.record(Sent::Group {
            group_id: group_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_private_message(&self, user_id: &str, text: &str) -> Result<()> {
        self.record(Sent::Private {
            user_id: user_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Metadata backed by fixed tables; unknown ids fail the lookup.
#[derive(Debug, Default)]
pub struct TableMetadata {
    pub groups: HashMap<String, String>,
    pub users: HashMap<String, String>,
}

impl TableMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, id: &str, name: &str) -> Self {
        self.groups.insert(id.to_string(), name.to_string());
        self
    }

    pub fn with_user(mut self, id: &str, nickname: &str) -> Self {
        self.users.insert(id.to_string(), nickname.to_string());
        self
    }
}

#[async_trait]
impl MetadataProvider for TableMetadata {
    async fn group_name(&self, group_id: &str) -> Result<String> {
        self.groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| anyhow!("no such group {}", group_id))
    }

    async fn user_nickname(&self, user_id: &str) -> Result<String> {
        self.users
            .get(user_id)
            .cloned()
            .ok_or_else(|| anyhow!("no such user {}", user_id))
    }
}

/// A OneBot `group_decrease` notice.
pub fn group_decrease(group_id: u64, user_id: u64, operator_id: u64, sub_type: &str) -> Value {
    json!({
        "time": 1_700_000_000,
        "self_id": 42,
        "post_type": "notice",
        "notice_type": "group_decrease",
        "sub_type": sub_type,
        "group_id": group_id,
        "operator_id": operator_id,
        "user_id": user_id
    })
}

/// A OneBot group chat message.
pub fn group_message(group_id: u64, user_id: u64, text: &str) -> Value {
    json!({
        "time": 1_700_000_000,
        "self_id": 42,
        "post_type": "message",
        "message_type": "group",
        "sub_type": "normal",
        "group_id": group_id,
        "user_id": user_id,
        "message": text,
        "raw_message": text
    })
}
