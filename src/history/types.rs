use serde::{Deserialize, Serialize};

use crate::assistant::PipelineDetails;

/// Conversation identifier (the Discord user the assistant talks to).
pub type SessionId = u64;

/// One archived turn: request, pipeline record and response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Content-addressed turn ID (blake3 hex hash).
    pub id: String,
    pub session: SessionId,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub details: Option<PipelineDetails>,
    /// Answered by the stateless pipeline rather than the session.
    #[serde(default)]
    pub single_shot: bool,
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
}

impl TurnRecord {
    pub fn new(
        session: SessionId,
        question: &str,
        answer: &str,
        details: Option<PipelineDetails>,
        single_shot: bool,
    ) -> Self {
        let timestamp = chrono::Utc::now().timestamp_micros();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&session.to_le_bytes());
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(question.as_bytes());
        let id = hasher.finalize().to_hex().to_string();

        Self {
            id,
            session,
            question: question.to_string(),
            answer: answer.to_string(),
            details,
            single_shot,
            timestamp,
        }
    }
}
