//! Conversation with the language model.
//!
//! * [`ChatService`] / [`HttpChatClient`]: one reply per user message.
//! * [`ExchangeLog`]: the ordered user/assistant log sent as history.
//! * [`HistoryStore`]: keeps the log in `conversation.json` between runs.

pub mod chat;
pub mod history;

pub use chat::{ChatError, ChatReply, ChatService, HttpChatClient, TokenUsage};
pub use history::{ExchangeEntry, ExchangeLog, HistoryStore, Speaker};

#[cfg(test)]
pub use chat::MockChat;
