pub mod types;

use std::path::Path;

use anyhow::{Context, Result};
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use tracing::{debug, warn};

use types::{SessionId, TurnRecord};

// Key prefix (no trailing slash — cnidarium convention)
const HISTORY_PREFIX: &str = "history";

fn session_prefix(session: SessionId) -> String {
    format!("{}/{}/", HISTORY_PREFIX, session)
}

/// Zero-padded timestamp first, so keys sort chronologically within a session.
fn turn_key(record: &TurnRecord) -> String {
    format!(
        "{}{:020}:{}",
        session_prefix(record.session),
        record.timestamp.max(0),
        &record.id[..16]
    )
}

/// Append-only archive of answered turns. Only read for display.
pub struct HistoryStore {
    storage: Storage,
}

impl HistoryStore {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let storage = Storage::load(data_dir.to_path_buf(), vec![HISTORY_PREFIX.to_string()])
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self { storage })
    }

    pub async fn append(&self, record: &TurnRecord) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(
            turn_key(record),
            serde_json::to_vec(record).context("serialize TurnRecord")?,
        );
        self.storage.commit(delta).await?;
        debug!(turn_id = %record.id, session = record.session, "turn archived");
        Ok(())
    }

    /// The `limit` most recent turns of a session, oldest first.
    pub async fn list(&self, session: SessionId, limit: usize) -> Result<Vec<TurnRecord>> {
        let snapshot = self.storage.latest_snapshot();
        let prefix = session_prefix(session);
        let mut stream = snapshot.prefix_raw(&prefix);
        let mut results = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((_key, value)) => match serde_json::from_slice::<TurnRecord>(&value) {
                    Ok(record) => results.push(record),
                    Err(e) => warn!("Skipping unreadable turn record: {}", e),
                },
                Err(e) => {
                    warn!("Error reading history stream: {}", e);
                }
            }
        }

        results.sort_by_key(|r| r.timestamp);
        let skip = results.len().saturating_sub(limit);
        Ok(results.split_off(skip))
    }

    /// Delete every archived turn of a session. Returns how many were removed.
    pub async fn clear(&self, session: SessionId) -> Result<usize> {
        let snapshot = self.storage.latest_snapshot();
        let prefix = session_prefix(session);
        let mut keys = Vec::new();
        {
            let mut stream = snapshot.prefix_raw(&prefix);
            while let Some(entry) = stream.next().await {
                match entry {
                    Ok((key, _)) => keys.push(key),
                    Err(e) => warn!("Error reading history stream: {}", e),
                }
            }
        }

        if keys.is_empty() {
            return Ok(0);
        }

        let mut delta = StateDelta::new(snapshot);
        for key in &keys {
            delta.delete(key.clone());
        }
        self.storage.commit(delta).await?;
        debug!(session, removed = keys.len(), "history cleared");
        Ok(keys.len())
    }
}
