use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::sync::atomic::{ AtomicI64, Ordering };

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// One entry in a conversation. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub text: String,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn user(id: i64, text: impl Into<String>) -> Self {
        Self::new(id, text, Sender::User)
    }

    pub fn bot(id: i64, text: impl Into<String>) -> Self {
        Self::new(id, text, Sender::Bot)
    }

    fn new(id: i64, text: impl Into<String>, sender: Sender) -> Self {
        Self {
            id,
            text: text.into(),
            sender,
            timestamp: Some(Utc::now()),
        }
    }
}

/// Hands out epoch-millisecond ids, bumped when two land in the same millisecond.
/// Saturates at `i64::MAX` rather than wrapping.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    last: AtomicI64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the generator so new ids sort after an existing history.
    pub fn starting_after(last_id: i64) -> Self {
        Self { last: AtomicI64::new(last_id) }
    }

    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current.saturating_add(1));
            match
                self.last.compare_exchange_weak(
                    current,
                    candidate,
                    Ordering::Relaxed,
                    Ordering::Relaxed
                )
            {
                Ok(_) => {
                    return candidate;
                }
                Err(observed) => {
                    current = observed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let ids = MessageIdGenerator::new();
        let mut prev = ids.next_id();
        for _ in 0..1000 {
            let id = ids.next_id();
            assert!(id > prev, "{id} should follow {prev}");
            prev = id;
        }
    }

    #[test]
    fn seeded_generator_skips_past_existing_ids() {
        let far_future = Utc::now().timestamp_millis() + 60_000;
        let ids = MessageIdGenerator::starting_after(far_future);
        assert_eq!(ids.next_id(), far_future + 1);
    }

    #[test]
    fn seed_at_the_top_of_the_range_does_not_overflow() {
        let ids = MessageIdGenerator::starting_after(i64::MAX);
        assert_eq!(ids.next_id(), i64::MAX);
        assert_eq!(ids.next_id(), i64::MAX);
    }

    #[test]
    fn message_serializes_sender_in_lowercase() {
        let msg = Message {
            id: 7,
            text: "hi".into(),
            sender: Sender::Bot,
            timestamp: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({ "id": 7, "text": "hi", "sender": "bot" }));
    }

    #[test]
    fn message_without_timestamp_deserializes() {
        let msg: Message = serde_json
            ::from_str(r#"{"id":1,"text":"hello","sender":"user"}"#)
            .unwrap();
        assert_eq!(msg.sender, Sender::User);
        assert!(msg.timestamp.is_none());
    }
}
