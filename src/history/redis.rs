use async_trait::async_trait;
use log::error;
use redis::{ AsyncCommands, Client };

use super::{ decode_history, encode_history, storage_key, HistoryError, HistoryStore };
use crate::config::persona::PersonaId;
use crate::models::chat::Message;

/// Whole history stored as one JSON string per persona key.
pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
}

impl RedisHistoryStore {
    pub fn new(url: &str, key_prefix: String) -> Result<Self, HistoryError> {
        Ok(Self {
            client: Client::open(url)?,
            key_prefix,
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn load(&self, persona: PersonaId) -> Vec<Message> {
        let key = storage_key(&self.key_prefix, persona);
        let mut conn = match self.get_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Redis connection failed while loading '{}': {}", key, e);
                return Vec::new();
            }
        };
        match conn.get::<_, Option<String>>(&key).await {
            Ok(Some(raw)) => decode_history(&key, &raw),
            Ok(None) => Vec::new(),
            Err(e) => {
                error!("Error reading history '{}': {}", key, e);
                Vec::new()
            }
        }
    }

    async fn save(&self, persona: PersonaId, messages: &[Message]) -> Result<(), HistoryError> {
        let mut conn = self.get_connection().await?;
        let key = storage_key(&self.key_prefix, persona);
        let json = encode_history(messages)?;
        let _: () = conn.set(&key, json).await?;
        Ok(())
    }

    async fn clear(&self, persona: PersonaId) -> Result<(), HistoryError> {
        let mut conn = self.get_connection().await?;
        let key = storage_key(&self.key_prefix, persona);
        let _: i64 = conn.del(&key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_url() {
        assert!(RedisHistoryStore::new("not a url", "p:".into()).is_err());
    }

    #[tokio::test]
    async fn unreachable_server_loads_empty() {
        let store = RedisHistoryStore::new("redis://127.0.0.1:1", "p:".into()).unwrap();
        assert!(store.load(PersonaId::Random).await.is_empty());
        assert!(store.save(PersonaId::Random, &[]).await.is_err());
    }
}
