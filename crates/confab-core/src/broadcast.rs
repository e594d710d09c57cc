use std::collections::VecDeque;

use serde_json::{Map, Value};

use crate::errors::SessionError;
use crate::session::SessionHandle;

/// Arbitrary JSON object sent out-of-band to every participant.
pub type BroadcastPayload = Map<String, Value>;

/// Largest serialized payload accepted for sending.
pub const MAX_PAYLOAD_BYTES: usize = 15 * 1024;

/// A message received from the room.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastMessage {
    pub id: String,
    /// Sending peer, when the engine knows it.
    pub from_peer: Option<String>,
    pub payload: BroadcastPayload,
    pub received_at_ms: u64,
}

/// Transport-level acceptance of a sent message. Says nothing about
/// remote receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastAck {
    pub request_id: u64,
}

pub(crate) fn validate_payload(payload: &BroadcastPayload) -> Result<(), SessionError> {
    let size = serde_json::to_vec(payload)
        .map_err(|e| SessionError::Config(format!("unserializable payload: {e}")))?
        .len();
    if size > MAX_PAYLOAD_BYTES {
        return Err(SessionError::Config(format!(
            "payload is {size} bytes, limit is {MAX_PAYLOAD_BYTES}"
        )));
    }
    Ok(())
}

/// Received messages, oldest dropped first once `capacity` is reached.
#[derive(Debug)]
pub(crate) struct MessageLog {
    messages: VecDeque<BroadcastMessage>,
    capacity: usize,
}

impl MessageLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, message: BroadcastMessage) {
        if self.capacity == 0 {
            return;
        }
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub(crate) fn to_vec(&self) -> Vec<BroadcastMessage> {
        self.messages.iter().cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Out-of-band application messages over a session.
///
/// Incoming messages arrive as
/// [`SessionEvent::BroadcastReceived`](crate::events::SessionEvent::BroadcastReceived).
#[derive(Clone)]
pub struct BroadcastChannel {
    session: SessionHandle,
}

impl BroadcastChannel {
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }

    /// Send `payload` to the room. Resolves once the engine accepted it.
    pub async fn send(&self, payload: BroadcastPayload) -> Result<BroadcastAck, SessionError> {
        validate_payload(&payload)?;
        self.session.broadcast(payload).await
    }

    /// Messages received in this session, oldest first.
    pub async fn messages(&self) -> Result<Vec<BroadcastMessage>, SessionError> {
        self.session.messages().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(id: &str) -> BroadcastMessage {
        BroadcastMessage {
            id: id.to_string(),
            from_peer: Some("p1".to_string()),
            payload: Map::new(),
            received_at_ms: 0,
        }
    }

    #[test]
    fn log_drops_oldest() {
        let mut log = MessageLog::new(2);
        log.push(message("m1"));
        log.push(message("m2"));
        log.push(message("m3"));
        let ids: Vec<_> = log.to_vec().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["m2", "m3"]);
    }

    #[test]
    fn zero_capacity_log_keeps_nothing() {
        let mut log = MessageLog::new(0);
        log.push(message("m1"));
        assert!(log.to_vec().is_empty());
    }

    #[test]
    fn small_payload_accepted() {
        let payload = json!({"type": "chat", "text": "hello"});
        let payload = payload.as_object().unwrap().clone();
        assert!(validate_payload(&payload).is_ok());
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut payload = Map::new();
        payload.insert("blob".into(), Value::String("x".repeat(MAX_PAYLOAD_BYTES)));
        assert!(matches!(
            validate_payload(&payload),
            Err(SessionError::Config(_))
        ));
    }
}
