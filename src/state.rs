use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::assistant::Assistant;
use crate::history::types::SessionId;
use crate::history::HistoryStore;
use crate::llm::{ChatBackend, GenerationParams, LlmClient};
use crate::records::Dataset;

/// One assistant per conversation. Each sits behind its own lock, so turns
/// within a session run one at a time while sessions proceed independently.
pub struct SessionRegistry {
    dataset: Arc<Dataset>,
    backend: Arc<dyn ChatBackend>,
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<Assistant>>>>,
}

impl SessionRegistry {
    pub fn new(dataset: Arc<Dataset>, backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            dataset,
            backend,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, id: SessionId) -> Arc<Mutex<Assistant>> {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(id)
            .or_insert_with(|| {
                debug!(session = id, "new assistant session");
                Arc::new(Mutex::new(Assistant::new(
                    self.dataset.clone(),
                    self.backend.clone(),
                )))
            })
            .clone()
    }

    /// Discard a session's assistant; the next turn starts a fresh conversation.
    pub async fn reset(&self, id: SessionId) -> bool {
        self.sessions.lock().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

pub struct AppState {
    pub dataset: Arc<Dataset>,
    pub llm: Arc<LlmClient>,
    pub history: Arc<HistoryStore>,
    pub sessions: SessionRegistry,
    pub admin_ids: HashSet<u64>,
    pub params: Arc<RwLock<GenerationParams>>,
}

impl AppState {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
