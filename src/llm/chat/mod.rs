pub mod openai;
pub mod stream;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::LlmConfig;
use crate::config::persona::Persona;
use self::openai::OpenAIChatClient;

const UNKNOWN_ERROR: &str = "unknown error";

#[derive(Debug, Error)]
pub enum ChatError {
    /// Upstream answered with a non-success status.
    #[error("HTTP error! status: {status} - {detail}")]
    Http {
        status: u16,
        detail: String,
    },
    /// The request never completed: connect, DNS, TLS or a broken body stream.
    #[error("{}", transport_message(.0))]
    Transport(String),
    #[error("Invalid client configuration: {0}")]
    Config(String),
    /// The exchange was abandoned before the upstream answered.
    #[error("the request was cancelled before a reply arrived")]
    Cancelled,
}

fn transport_message(message: &str) -> &str {
    if message.is_empty() { UNKNOWN_ERROR } else { message }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

/// Dispatches one user message for a persona and returns the assembled reply.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, persona: &Persona, message: &str) -> Result<String, ChatError>;

    /// Diagnostic model listing; not part of the send path.
    async fn list_models(&self) -> Result<serde_json::Value, ChatError>;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, ChatError> {
    let client = OpenAIChatClient::from_config(config)?;
    Ok(Arc::new(client))
}
