//! A client for the OneBot v11 HTTP API.

use crate::config::OneBotConfig;
use crate::core::{MessageTransport, MetadataProvider};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors returned by OneBot API calls.
#[derive(Debug, Error)]
pub enum OneBotError {
    #[error("id {0:?} is not numeric")]
    InvalidId(String),

    #[error("HTTP request to {action} failed: {source}")]
    Http {
        action: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{action} returned HTTP {status}")]
    Status {
        action: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("{action} failed with retcode {retcode}: {message}")]
    Api {
        action: &'static str,
        retcode: i64,
        message: String,
    },

    #[error("{action} response is missing `{field}`")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: String,
    #[serde(default)]
    wording: String,
}

/// Calls OneBot actions over HTTP.
#[derive(Debug, Clone)]
pub struct OneBotClient {
    http: reqwest::Client,
    api_url: String,
    access_token: Option<String>,
}

impl OneBotClient {
    pub fn new(api_url: impl Into<String>, access_token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }

    pub fn from_config(config: &OneBotConfig) -> Result<Self> {
        Self::new(
            config.api_url.clone(),
            config.access_token.clone(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    /// Calls `action` and returns the response's `data` field.
    #[instrument(skip(self, params))]
    async fn call(&self, action: &'static str, params: Value) -> Result<Value, OneBotError> {
        let url = format!("{}/{}", self.api_url, action);
        let mut request = self.http.post(&url).json(&params);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|source| OneBotError::Http { action, source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(OneBotError::Status { action, status });
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|source| OneBotError::Http { action, source })?;
        if body.status != "ok" || body.retcode != 0 {
            return Err(OneBotError::Api {
                action,
                retcode: body.retcode,
                message: if body.wording.is_empty() {
                    body.message
                } else {
                    body.wording
                },
            });
        }

        debug!(action, "OneBot call succeeded");
        Ok(body.data)
    }
}

fn numeric_id(id: &str) -> Result<i64, OneBotError> {
    id.trim()
        .parse()
        .map_err(|_| OneBotError::InvalidId(id.to_string()))
}

#[async_trait]
impl MetadataProvider for OneBotClient {
    async fn group_name(&self, group_id: &str) -> Result<String> {
        let action = "get_group_info";
        let data = self
            .call(action, json!({ "group_id": numeric_id(group_id)? }))
            .await?;
        let name = data
            .get("group_name")
            .and_then(Value::as_str)
            .ok_or(OneBotError::MissingField {
                action,
                field: "group_name",
            })?;
        Ok(name.to_string())
    }

    async fn user_nickname(&self, user_id: &str) -> Result<String> {
        let action = "get_stranger_info";
        let data = self
            .call(action, json!({ "user_id": numeric_id(user_id)? }))
            .await?;
        let nickname = data
            .get("nickname")
            .and_then(Value::as_str)
            .ok_or(OneBotError::MissingField {
                action,
                field: "nickname",
            })?;
        Ok(nickname.to_string())
    }
}

#[async_trait]
impl MessageTransport for OneBotClient {
    async fn send_group_message(&self, group_id: &str, text: &str) -> Result<()> {
        self.call(
            "send_group_msg",
            json!({ "group_id": numeric_id(group_id)?, "message": text }),
        )
        .await?;
        Ok(())
    }

    async fn send_private_message(&self, user_id: &str, text: &str) -> Result<()> {
        self.call(
            "send_private_msg",
            json!({ "user_id": numeric_id(user_id)?, "message": text }),
        )
        .await?;
        Ok(())
    }
}
