//! Chat client.
//!
//! `POST /api/chat` with `{"message", "conversationHistory"}` and read
//! `{"response", "usage"}` back.  The history sent is the log as it stood
//! before the current user message was appended.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ServiceConfig;
use crate::http;
use crate::llm::history::ExchangeEntry;

// ---------------------------------------------------------------------------
// ChatError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    Request(String),

    #[error("chat request timed out")]
    Timeout,

    #[error("chat service error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("failed to parse chat response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::Timeout
        } else {
            ChatError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Token accounting reported by the service, when it reports any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl ChatReply {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            usage: None,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(rename = "conversationHistory")]
    conversation_history: &'a [ExchangeEntry],
}

// ---------------------------------------------------------------------------
// ChatService trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn reply(&self, message: &str, history: &[ExchangeEntry])
        -> Result<ChatReply, ChatError>;
}

// ---------------------------------------------------------------------------
// HttpChatClient
// ---------------------------------------------------------------------------

pub struct HttpChatClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChatClient {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            client: http::build_client(config),
            endpoint: config.endpoint("/api/chat"),
        }
    }
}

#[async_trait]
impl ChatService for HttpChatClient {
    async fn reply(
        &self,
        message: &str,
        history: &[ExchangeEntry],
    ) -> Result<ChatReply, ChatError> {
        let body = ChatRequest {
            message,
            conversation_history: history,
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                message: http::error_message(response).await,
            });
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))?;
        if let Some(usage) = &reply.usage {
            log::debug!(
                "chat: {} input / {} output tokens",
                usage.input_tokens,
                usage.output_tokens
            );
        }
        Ok(reply)
    }
}

// ---------------------------------------------------------------------------
// MockChat  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub struct MockChat {
    script: crate::testing::Script<Result<ChatReply, ChatError>>,
    requests: std::sync::Mutex<Vec<(String, Vec<ExchangeEntry>)>>,
}

#[cfg(test)]
impl MockChat {
    pub fn ok(response: impl Into<String>) -> Self {
        Self::scripted(vec![(std::time::Duration::ZERO, Ok(ChatReply::text(response)))])
    }

    pub fn err(error: ChatError) -> Self {
        Self::scripted(vec![(std::time::Duration::ZERO, Err(error))])
    }

    pub fn scripted(replies: Vec<(std::time::Duration, Result<ChatReply, ChatError>)>) -> Self {
        Self {
            script: crate::testing::Script::new(replies),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Every `(message, history)` pair received so far.
    pub fn requests(&self) -> Vec<(String, Vec<ExchangeEntry>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ChatService for MockChat {
    async fn reply(
        &self,
        message: &str,
        history: &[ExchangeEntry],
    ) -> Result<ChatReply, ChatError> {
        self.requests
            .lock()
            .unwrap()
            .push((message.to_string(), history.to_vec()));
        self.script.next().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::history::Speaker;

    #[test]
    fn request_body_shape() {
        let history = vec![
            ExchangeEntry::new(Speaker::User, "Hello"),
            ExchangeEntry::new(Speaker::Assistant, "Hi!"),
        ];
        let body = ChatRequest {
            message: "How are you?",
            conversation_history: &history,
        };
        let json = serde_json::to_value(&body).expect("serialise");
        assert_eq!(
            json,
            serde_json::json!({
                "message": "How are you?",
                "conversationHistory": [
                    {"role": "user", "content": "Hello"},
                    {"role": "assistant", "content": "Hi!"}
                ]
            })
        );
    }

    #[test]
    fn reply_with_usage_parses() {
        let reply: ChatReply = serde_json::from_str(
            r#"{"response":"Hi there!","usage":{"input_tokens":12,"output_tokens":4,"cache_read_input_tokens":8}}"#,
        )
        .expect("parse");
        assert_eq!(reply.response, "Hi there!");
        let usage = reply.usage.expect("usage");
        assert_eq!(usage.output_tokens, 4);
        assert_eq!(usage.cache_read_input_tokens, Some(8));
        assert_eq!(usage.cache_creation_input_tokens, None);
    }

    #[test]
    fn reply_without_usage_parses() {
        let reply: ChatReply = serde_json::from_str(r#"{"response":"ok"}"#).expect("parse");
        assert!(reply.usage.is_none());
    }

    #[test]
    fn from_config_targets_chat_endpoint() {
        let client = HttpChatClient::from_config(&ServiceConfig::default());
        assert_eq!(client.endpoint, "http://localhost:3000/api/chat");
    }
}
