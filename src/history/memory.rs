use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{ Mutex, MutexGuard };

use super::{ decode_history, encode_history, HistoryError, HistoryStore };
use crate::config::persona::PersonaId;
use crate::models::chat::Message;

/// Process-local store. Values are kept serialized so it behaves like the
/// other backends, including on corrupt data.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: Mutex<HashMap<PersonaId, String>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PersonaId, String>> {
        // entries are whole serialized values, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn put_raw(&self, persona: PersonaId, raw: &str) {
        self.entries().insert(persona, raw.to_string());
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self, persona: PersonaId) -> Vec<Message> {
        let raw = self.entries().get(&persona).cloned();
        raw.map(|raw| decode_history(persona.as_str(), &raw)).unwrap_or_default()
    }

    async fn save(&self, persona: PersonaId, messages: &[Message]) -> Result<(), HistoryError> {
        let json = encode_history(messages)?;
        self.entries().insert(persona, json);
        Ok(())
    }

    async fn clear(&self, persona: PersonaId) -> Result<(), HistoryError> {
        self.entries().remove(&persona);
        Ok(())
    }
}
