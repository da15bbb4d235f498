use async_trait::async_trait;
use log::{ debug, warn };
use std::io::ErrorKind;
use std::path::{ Path, PathBuf };
use tokio::fs;

use super::{ decode_history, encode_history, storage_key, HistoryError, HistoryStore };
use crate::config::persona::PersonaId;
use crate::models::chat::Message;

/// One JSON file per persona inside a directory.
pub struct FileHistoryStore {
    dir: PathBuf,
    key_prefix: String,
}

impl FileHistoryStore {
    pub fn new(dir: impl AsRef<Path>, key_prefix: String) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            key_prefix,
        }
    }

    fn path_for(&self, persona: PersonaId) -> PathBuf {
        // ':' is not portable in file names
        let key = storage_key(&self.key_prefix, persona).replace(':', "_");
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn load(&self, persona: PersonaId) -> Vec<Message> {
        let path = self.path_for(persona);
        match fs::read_to_string(&path).await {
            Ok(raw) => decode_history(&path.display().to_string(), &raw),
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed to read history file {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    async fn save(&self, persona: PersonaId, messages: &[Message]) -> Result<(), HistoryError> {
        let path = self.path_for(persona);
        let json = encode_history(messages)?;
        fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Saved {} message(s) to {}", messages.len(), path.display());
        Ok(())
    }

    async fn clear(&self, persona: PersonaId) -> Result<(), HistoryError> {
        match fs::remove_file(self.path_for(persona)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Message> {
        vec![Message::user(1, "hello"), Message::bot(2, "Hi there")]
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path(), "chat_history:".into());
        store.save(PersonaId::Random, &sample()).await.unwrap();
        assert_eq!(store.load(PersonaId::Random).await, sample());
    }

    #[tokio::test]
    async fn unused_key_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path().join("not-created-yet"), "p:".into());
        assert!(store.load(PersonaId::Security).await.is_empty());
    }

    #[tokio::test]
    async fn personas_are_disjoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path(), "p:".into());
        store.save(PersonaId::Security, &sample()).await.unwrap();
        assert!(store.load(PersonaId::Security2).await.is_empty());
        store.clear(PersonaId::Security2).await.unwrap();
        assert_eq!(store.load(PersonaId::Security).await.len(), 2);
    }

    #[tokio::test]
    async fn save_overwrites_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path(), "p:".into());
        store.save(PersonaId::Random, &sample()).await.unwrap();
        let shorter = vec![Message::user(9, "only")];
        store.save(PersonaId::Random, &shorter).await.unwrap();
        assert_eq!(store.load(PersonaId::Random).await, shorter);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path(), "p:".into());
        store.save(PersonaId::Random, &sample()).await.unwrap();
        store.clear(PersonaId::Random).await.unwrap();
        assert!(store.load(PersonaId::Random).await.is_empty());
        store.clear(PersonaId::Random).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistoryStore::new(dir.path(), "p:".into());
        std::fs::write(store.path_for(PersonaId::Random), "[{broken").unwrap();
        assert!(store.load(PersonaId::Random).await.is_empty());
    }
}
