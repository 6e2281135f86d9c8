use super::state::ConversationState;
use crate::survey::RespondentId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Persistence for per-respondent conversation state.
///
/// One record per respondent. `archive_state` moves the record out of the
/// live set (into history, where the backend keeps one) and returns it.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_state(&self, respondent_id: RespondentId)
        -> anyhow::Result<Option<ConversationState>>;

    async fn save_state(&self, state: &ConversationState) -> anyhow::Result<()>;

    async fn archive_state(
        &self,
        respondent_id: RespondentId,
    ) -> anyhow::Result<Option<ConversationState>>;
}

/// In-memory store tracking one conversation per respondent.
#[derive(Default)]
pub struct MemoryStateStore {
    live: Mutex<HashMap<RespondentId, ConversationState>>,
    archive: Mutex<Vec<ConversationState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archived conversations, oldest first.
    pub fn archived(&self) -> Vec<ConversationState> {
        self.archive
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_state(
        &self,
        respondent_id: RespondentId,
    ) -> anyhow::Result<Option<ConversationState>> {
        Ok(self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&respondent_id)
            .cloned())
    }

    async fn save_state(&self, state: &ConversationState) -> anyhow::Result<()> {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(state.respondent_id, state.clone());
        Ok(())
    }

    async fn archive_state(
        &self,
        respondent_id: RespondentId,
    ) -> anyhow::Result<Option<ConversationState>> {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&respondent_id);
        if let Some(ref state) = removed {
            self.archive
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(state.clone());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn save_get_archive() {
        let store = MemoryStateStore::new();
        assert!(store.get_state(1).await.unwrap().is_none());

        let mut state = ConversationState::new(1, 10, Utc::now());
        state.start(3, Utc::now()).unwrap();
        store.save_state(&state).await.unwrap();
        assert_eq!(store.get_state(1).await.unwrap(), Some(state.clone()));
        assert_eq!(store.live_count(), 1);

        let archived = store.archive_state(1).await.unwrap();
        assert_eq!(archived, Some(state));
        assert!(store.get_state(1).await.unwrap().is_none());
        assert_eq!(store.archived().len(), 1);
    }

    #[tokio::test]
    async fn archive_missing_is_none() {
        let store = MemoryStateStore::new();
        assert!(store.archive_state(5).await.unwrap().is_none());
        assert!(store.archived().is_empty());
    }
}
