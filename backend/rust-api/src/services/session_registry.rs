use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::models::SupervisorCommand;
use crate::services::client_bridge::ClientBridge;
use crate::services::providers::SessionControl;
use crate::services::session_service::{wait_for_termination, SessionHandle};

/// A running session together with the bridge its client posts to.
#[derive(Clone)]
pub struct SessionEntry {
    pub handle: SessionHandle,
    pub bridge: Arc<ClientBridge>,
}

/// Live sessions of the process.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    by_participant: DashMap<(String, String), String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: SessionEntry) {
        let key = (
            entry.handle.test_id().to_string(),
            entry.handle.participant_id().to_string(),
        );
        let session_id = entry.handle.session_id().to_string();
        if let Some(previous) = self.by_participant.insert(key, session_id.clone()) {
            tracing::warn!(
                "Participant started a new session, replacing session={} with session={}",
                previous,
                session_id
            );
        }
        self.sessions.insert(session_id, entry);
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.get(session_id).map(|e| e.clone())
    }

    pub fn find_participant(&self, test_id: &str, participant_id: &str) -> Option<SessionEntry> {
        let session_id = self
            .by_participant
            .get(&(test_id.to_string(), participant_id.to_string()))?
            .clone();
        self.get(&session_id)
    }

    /// Forgets a session. Once no handle remains the session is abandoned.
    pub fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        let (_, entry) = self.sessions.remove(session_id)?;
        self.by_participant.remove_if(
            &(
                entry.handle.test_id().to_string(),
                entry.handle.participant_id().to_string(),
            ),
            |_, current| current == session_id,
        );
        Some(entry)
    }

    /// Drops the session from the registry `retention` after it terminates.
    /// The watcher only holds the view, so it never keeps the session alive.
    pub fn evict_after_termination(
        self: &Arc<Self>,
        handle: &SessionHandle,
        retention: Duration,
    ) {
        let registry = Arc::downgrade(self);
        let view = handle.subscribe();
        let session_id = handle.session_id().to_string();

        tokio::spawn(async move {
            let finished = wait_for_termination(view).await;
            tokio::time::sleep(retention).await;

            let Some(registry) = registry.upgrade() else {
                return;
            };
            if registry.remove(&session_id).is_some() {
                tracing::debug!(
                    "Session evicted: session={}, status={:?}",
                    session_id,
                    finished.status
                );
            }
        });
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionControl for SessionRegistry {
    async fn dispatch(&self, test_id: &str, participant_id: &str, command: SupervisorCommand) {
        let Some(entry) = self.find_participant(test_id, participant_id) else {
            tracing::warn!(
                "Supervisor command for unknown participant: test={}, participant={}",
                test_id,
                participant_id
            );
            return;
        };

        let result = match command {
            SupervisorCommand::Flag => entry.handle.flag(),
            SupervisorCommand::Message { text } => entry.handle.send_message(text),
            SupervisorCommand::ForceEnd => entry.handle.force_end().await.map(|_| ()),
        };
        if let Err(e) = result {
            tracing::warn!(
                "Supervisor command not delivered: session={}, error={}",
                entry.handle.session_id(),
                e
            );
        }
    }
}
