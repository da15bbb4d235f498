mod file;
mod memory;
mod redis;

pub use self::file::FileHistoryStore;
pub use self::memory::MemoryHistoryStore;
pub use self::redis::RedisHistoryStore;

use async_trait::async_trait;
use log::{ info, warn };
use std::sync::Arc;
use thiserror::Error;

use crate::cli::Args;
use crate::config::persona::PersonaId;
use crate::models::chat::Message;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("History serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("History redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("Unsupported history store type: {0}")]
    UnsupportedType(String),
}

/// Per-persona message history kept on the local device.
///
/// `save` replaces the whole stored sequence. `load` never fails: missing or
/// unreadable data comes back as an empty history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn load(&self, persona: PersonaId) -> Vec<Message>;

    async fn save(&self, persona: PersonaId, messages: &[Message]) -> Result<(), HistoryError>;

    async fn clear(&self, persona: PersonaId) -> Result<(), HistoryError>;
}

pub(crate) fn storage_key(prefix: &str, persona: PersonaId) -> String {
    format!("{}{}", prefix, persona)
}

pub(crate) fn encode_history(messages: &[Message]) -> Result<String, HistoryError> {
    Ok(serde_json::to_string(messages)?)
}

/// Parses a stored value; anything unparseable counts as no history.
pub(crate) fn decode_history(key: &str, raw: &str) -> Vec<Message> {
    match serde_json::from_str::<Vec<Message>>(raw) {
        Ok(messages) => messages,
        Err(e) => {
            warn!("Discarding unreadable history under '{}': {}", key, e);
            Vec::new()
        }
    }
}

pub fn create_history_store(args: &Args) -> Result<Arc<dyn HistoryStore>, HistoryError> {
    let prefix = args.history_key_prefix.clone();
    match args.history_type.to_lowercase().as_str() {
        "file" => Ok(Arc::new(FileHistoryStore::new(&args.history_host, prefix))),
        "redis" => Ok(Arc::new(RedisHistoryStore::new(&args.history_host, prefix)?)),
        "memory" => Ok(Arc::new(MemoryHistoryStore::new())),
        other => Err(HistoryError::UnsupportedType(other.to_string())),
    }
}

pub fn initialize_history_store(args: &Args) -> Result<Arc<dyn HistoryStore>, HistoryError> {
    info!("Chat history will be stored in: {} at {}", args.history_type, args.history_host);
    create_history_store(args)
}
