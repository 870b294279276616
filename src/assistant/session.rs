use std::sync::Arc;

use tracing::debug;

use crate::llm::{AnswerStream, ChatBackend, GenerationParams, LlmError, Message};

/// One conversation with the model. Every exchange is appended to the
/// transcript, so later requests see all earlier ones.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    transcript: Vec<Message>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, system_prompt: String) -> Self {
        Self {
            backend,
            transcript: vec![Message::system(system_prompt)],
        }
    }

    /// Send a prompt and wait for the whole reply.
    pub async fn send(
        &mut self,
        prompt: String,
        params: &GenerationParams,
    ) -> Result<String, LlmError> {
        self.transcript.push(Message::user(prompt));
        match self.backend.complete(&self.transcript, params).await {
            Ok(reply) => {
                self.transcript.push(Message::assistant(reply.clone()));
                debug!(transcript_len = self.transcript.len(), "session exchange recorded");
                Ok(reply)
            }
            Err(e) => {
                self.transcript.pop();
                Err(e)
            }
        }
    }

    /// Send a prompt and receive the reply as fragments. The caller must
    /// hand the assembled reply back through [`ChatSession::record_reply`],
    /// or call [`ChatSession::abandon_prompt`] if the stream failed.
    pub async fn send_stream(
        &mut self,
        prompt: String,
        params: &GenerationParams,
    ) -> Result<AnswerStream, LlmError> {
        self.transcript.push(Message::user(prompt));
        match self.backend.stream(&self.transcript, params).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                self.transcript.pop();
                Err(e)
            }
        }
    }

    pub fn record_reply(&mut self, reply: String) {
        self.transcript.push(Message::assistant(reply));
        debug!(transcript_len = self.transcript.len(), "session exchange recorded");
    }

    /// Drop a prompt whose reply never arrived.
    pub fn abandon_prompt(&mut self) {
        if self.transcript.last().is_some_and(|m| m.role == "user") {
            self.transcript.pop();
        }
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }
}
