//! Slack Web API calls used by the bot: posting and updating messages, and
//! opening Socket Mode connections.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use taskpilot_core::config::SlackConfig;

use crate::blocks::{Block, MessageTemplate};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlackApiError {
    #[error("slack http failure: {0}")]
    Http(String),
    #[error("slack returned status {0}")]
    Status(u16),
    #[error("slack api error: {0}")]
    Api(String),
    #[error("slack response could not be decoded: {0}")]
    Decode(String),
    #[error("invalid slack token: {0}")]
    Token(String),
}

/// Where agent replies go. Delivery is best effort: callers log failures and
/// move on.
#[async_trait]
pub trait MessagingSurface: Send + Sync {
    /// Posts a new message and returns its timestamp.
    async fn post_message(
        &self,
        channel_id: &str,
        message: &MessageTemplate,
        thread_ts: Option<&str>,
    ) -> Result<String, SlackApiError>;

    async fn update_message(
        &self,
        channel_id: &str,
        message_ts: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError>;
}

#[derive(Clone)]
pub struct SlackWebClient {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: SecretString,
}

impl SlackWebClient {
    pub fn new(config: &SlackConfig) -> Result<Self, SlackApiError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|error| SlackApiError::Http(error.to_string()))?;
        Ok(Self::with_client(http, &config.api_base_url, config.bot_token.clone()))
    }

    pub fn with_client(http: reqwest::Client, api_base_url: &str, bot_token: SecretString) -> Self {
        Self { http, api_base_url: api_base_url.trim_end_matches('/').to_owned(), bot_token }
    }

    pub fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base_url)
    }

    /// Calls `apps.connections.open` with the app-level token and returns the
    /// WebSocket URL for a fresh Socket Mode session.
    pub async fn open_connection(&self, app_token: &SecretString) -> Result<String, SlackApiError> {
        let response = self.call("apps.connections.open", app_token, &serde_json::json!({})).await?;
        response.url.ok_or_else(|| SlackApiError::Decode("missing url".to_owned()))
    }

    async fn call<B>(
        &self,
        method: &str,
        token: &SecretString,
        body: &B,
    ) -> Result<ApiResponse, SlackApiError>
    where
        B: Serialize + ?Sized,
    {
        let auth = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|error| SlackApiError::Token(error.to_string()))?;
        let response = self
            .http
            .post(self.method_url(method))
            .header(AUTHORIZATION, auth)
            .json(body)
            .send()
            .await
            .map_err(|error| SlackApiError::Http(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SlackApiError::Status(status.as_u16()));
        }
        let text = response.text().await.map_err(|error| SlackApiError::Http(error.to_string()))?;
        parse_api_response(&text)
    }
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    blocks: &'a [Block],
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpdateMessageRequest<'a> {
    channel: &'a str,
    ts: &'a str,
    text: &'a str,
    blocks: &'a [Block],
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Slack answers HTTP 200 for most failures; `ok: false` carries the error.
fn parse_api_response(body: &str) -> Result<ApiResponse, SlackApiError> {
    let response: ApiResponse =
        serde_json::from_str(body).map_err(|error| SlackApiError::Decode(error.to_string()))?;
    if !response.ok {
        return Err(SlackApiError::Api(response.error.unwrap_or_else(|| "unknown_error".to_owned())));
    }
    Ok(response)
}

#[async_trait]
impl MessagingSurface for SlackWebClient {
    async fn post_message(
        &self,
        channel_id: &str,
        message: &MessageTemplate,
        thread_ts: Option<&str>,
    ) -> Result<String, SlackApiError> {
        let body = PostMessageRequest {
            channel: channel_id,
            text: &message.fallback_text,
            blocks: &message.blocks,
            thread_ts,
        };
        let response = self.call("chat.postMessage", &self.bot_token, &body).await?;
        Ok(response.ts.unwrap_or_default())
    }

    async fn update_message(
        &self,
        channel_id: &str,
        message_ts: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError> {
        let body = UpdateMessageRequest {
            channel: channel_id,
            ts: message_ts,
            text: &message.fallback_text,
            blocks: &message.blocks,
        };
        self.call("chat.update", &self.bot_token, &body).await.map(|_| ())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentMessage {
    Posted { channel_id: String, thread_ts: Option<String>, message: MessageTemplate },
    Updated { channel_id: String, message_ts: String, message: MessageTemplate },
}

/// In-memory surface that records every delivery.
#[derive(Clone, Default)]
pub struct RecordingSurface {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    fail: bool,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MessagingSurface for RecordingSurface {
    async fn post_message(
        &self,
        channel_id: &str,
        message: &MessageTemplate,
        thread_ts: Option<&str>,
    ) -> Result<String, SlackApiError> {
        if self.fail {
            return Err(SlackApiError::Api("channel_not_found".to_owned()));
        }
        let mut sent = self.sent.lock().await;
        sent.push(SentMessage::Posted {
            channel_id: channel_id.to_owned(),
            thread_ts: thread_ts.map(str::to_owned),
            message: message.clone(),
        });
        Ok(format!("1700000000.{:06}", sent.len()))
    }

    async fn update_message(
        &self,
        channel_id: &str,
        message_ts: &str,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError> {
        if self.fail {
            return Err(SlackApiError::Api("message_not_found".to_owned()));
        }
        self.sent.lock().await.push(SentMessage::Updated {
            channel_id: channel_id.to_owned(),
            message_ts: message_ts.to_owned(),
            message: message.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{parse_api_response, MessagingSurface, RecordingSurface, SentMessage, SlackApiError, SlackWebClient};
    use crate::blocks::reply_message;

    #[test]
    fn ok_false_surfaces_the_slack_error_code() {
        let error = parse_api_response(r#"{"ok":false,"error":"not_in_channel"}"#)
            .expect_err("ok=false must fail");
        assert_eq!(error, SlackApiError::Api("not_in_channel".to_owned()));
    }

    #[test]
    fn ok_response_keeps_ts_and_url() {
        let response = parse_api_response(r#"{"ok":true,"ts":"1.2","url":"wss://x"}"#)
            .expect("ok response");
        assert_eq!(response.ts.as_deref(), Some("1.2"));
        assert_eq!(response.url.as_deref(), Some("wss://x"));
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        assert!(matches!(parse_api_response("<html>"), Err(SlackApiError::Decode(_))));
    }

    #[test]
    fn method_url_ignores_trailing_slash() {
        let client = SlackWebClient::with_client(
            reqwest::Client::new(),
            "https://slack.com/api/",
            SecretString::from("xoxb-test".to_owned()),
        );
        assert_eq!(client.method_url("chat.postMessage"), "https://slack.com/api/chat.postMessage");
    }

    #[tokio::test]
    async fn recording_surface_keeps_delivery_order() {
        let surface = RecordingSurface::new();
        let ts = surface
            .post_message("D1", &reply_message("hi", Vec::new()), Some("1.0"))
            .await
            .expect("post");
        surface.update_message("D1", &ts, &reply_message("done", Vec::new())).await.expect("update");

        let sent = surface.sent().await;
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], SentMessage::Posted { thread_ts: Some(ts), .. } if ts == "1.0"));
        assert!(matches!(&sent[1], SentMessage::Updated { message_ts, .. } if *message_ts == ts));
    }
}
