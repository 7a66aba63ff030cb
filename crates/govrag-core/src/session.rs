//! Session Store.
//!
//! One JSON file per session, made crash-safe: every flush writes a sibling
//! temp file, `fsync`s it, then renames it over the session's file, so a
//! crash mid-flush leaves either the old or the new file intact, never a
//! truncated one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::GovRagError;
use crate::types::{CitationMap, ConversationSummary, Evidence, Session, Turn};

#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    pub storage_path: PathBuf,
    pub recent_doc_ids_cap: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStoreStats {
    pub session_count: usize,
    pub total_turns: usize,
}

/// Persistent key-value store keyed by `session_id`. Reads are served from
/// an in-memory snapshot (`sessions`); writes are serialised per-session by
/// a dedicated `tokio::sync::Mutex` in `writers` so two concurrent flushes
/// for the same session can never interleave.
pub struct SessionStore {
    config: SessionStoreConfig,
    sessions: RwLock<HashMap<Uuid, Session>>,
    writers: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig) -> Result<Self, GovRagError> {
        std::fs::create_dir_all(&config.storage_path)?;
        let mut loaded = HashMap::new();
        if let Ok(entries) = std::fs::read_dir(&config.storage_path) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(json) => match serde_json::from_str::<Session>(&json) {
                        Ok(session) => {
                            loaded.insert(session.session_id, session);
                        }
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "corrupt session file, skipping"),
                    },
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to read session file"),
                }
            }
        }
        Ok(Self {
            config,
            sessions: RwLock::new(loaded),
            writers: DashMap::new(),
        })
    }

    fn writer_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.writers.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.config.storage_path.join(format!("{id}.json"))
    }

    /// Atomic flush: write to a sibling temp file, fsync, then rename over
    /// the session's file.
    async fn flush(&self, session: &Session) -> Result<(), GovRagError> {
        let writer = self.writer_for(session.session_id);
        let _guard = writer.lock().await;

        let path = self.path_for(session.session_id);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(session)?;
        let path2 = path.clone();
        let tmp_path2 = tmp_path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), std::io::Error> {
            let file = std::fs::File::create(&tmp_path2)?;
            use std::io::Write;
            { let mut w = std::io::BufWriter::new(&file); w.write_all(json.as_bytes())?; w.flush()?; }
            file.sync_all()?;
            std::fs::rename(&tmp_path2, &path2)?;
            Ok(())
        })
        .await
        .map_err(|e| GovRagError::Internal(format!("flush join error: {e}")))??;

        Ok(())
    }

    pub async fn create(&self, title: Option<String>) -> Session {
        self.create_with_doc_ids(title, Vec::new()).await
    }

    /// `initial_doc_ids` seeds `recent_source_doc_ids` so a session created
    /// with explicit document scope starts there rather than at
    /// `full_corpus` on its first turn.
    pub async fn create_with_doc_ids(&self, title: Option<String>, initial_doc_ids: Vec<String>) -> Session {
        let mut session = Session::new(title);
        session.recent_source_doc_ids = initial_doc_ids;
        self.sessions.write().await.insert(session.session_id, session.clone());
        if let Err(e) = self.flush(&session).await {
            tracing::warn!(session_id = %session.session_id, error = %e, "initial session flush failed");
        }
        session
    }

    /// Fetch a consistent point-in-time snapshot of a session.
    pub async fn fetch(&self, id: Uuid) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn list(&self, page: usize, page_size: usize) -> Vec<Session> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<&Session> = sessions.values().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.into_iter().skip(page * page_size).take(page_size).cloned().collect()
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), GovRagError> {
        self.sessions.write().await.remove(&id);
        self.writers.remove(&id);
        let path = self.path_for(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub async fn append_turn(&self, id: Uuid, turn: Turn) -> Result<(), GovRagError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&id)
                .ok_or_else(|| GovRagError::SessionNotFound { session_id: id.to_string() })?;
            session.turns.push(turn);
            session.updated_at = chrono::Utc::now();
            session.clone()
        };
        self.flush(&session).await
    }

    pub async fn update_summary(&self, id: Uuid, summary: ConversationSummary) -> Result<(), GovRagError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&id)
                .ok_or_else(|| GovRagError::SessionNotFound { session_id: id.to_string() })?;
            session.conversation_summary = Some(summary);
            session.updated_at = chrono::Utc::now();
            session.clone()
        };
        self.flush(&session).await
    }

    pub async fn update_entities(&self, id: Uuid, entities: Vec<String>) -> Result<(), GovRagError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&id)
                .ok_or_else(|| GovRagError::SessionNotFound { session_id: id.to_string() })?;
            session.recent_entities = entities;
            session.updated_at = chrono::Utc::now();
            session.clone()
        };
        self.flush(&session).await
    }

    pub async fn record_recent_doc_ids(&self, id: Uuid, doc_ids: Vec<String>) -> Result<(), GovRagError> {
        let cap = self.config.recent_doc_ids_cap;
        let session = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&id)
                .ok_or_else(|| GovRagError::SessionNotFound { session_id: id.to_string() })?;
            session.record_recent_doc_ids(doc_ids, cap);
            session.updated_at = chrono::Utc::now();
            session.clone()
        };
        self.flush(&session).await
    }

    /// Persist the frozen citation map for the session's first successful
    /// answer. No-op (and never overwrites) if one is already frozen.
    pub async fn freeze_citation_map(
        &self,
        id: Uuid,
        evidences: Vec<Evidence>,
        citation_map: CitationMap,
    ) -> Result<(), GovRagError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&id)
                .ok_or_else(|| GovRagError::SessionNotFound { session_id: id.to_string() })?;
            if session.first_response_citation_map.is_none() {
                session.first_response_evidences = Some(evidences);
                session.first_response_citation_map = Some(citation_map);
            }
            session.updated_at = chrono::Utc::now();
            session.clone()
        };
        self.flush(&session).await
    }

    /// Clears a session's transcript. Leaves
    /// the frozen first-answer citation map and recent-doc-ids scope intact
    /// — only the turn history is wiped.
    pub async fn clear_turns(&self, id: Uuid) -> Result<(), GovRagError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(&id)
                .ok_or_else(|| GovRagError::SessionNotFound { session_id: id.to_string() })?;
            session.turns.clear();
            session.updated_at = chrono::Utc::now();
            session.clone()
        };
        self.flush(&session).await
    }

    pub async fn stats(&self) -> SessionStoreStats {
        let sessions = self.sessions.read().await;
        SessionStoreStats {
            session_count: sessions.len(),
            total_turns: sessions.values().map(|s| s.turns.len()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(SessionStoreConfig {
            storage_path: dir.path().to_path_buf(),
            recent_doc_ids_cap: 20,
        })
        .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn create_then_fetch_round_trips() {
        let (store, _dir) = test_store();
        let session = store.create(Some("t".into())).await;
        let fetched = store.fetch(session.session_id).await.unwrap();
        assert_eq!(fetched.session_id, session.session_id);
    }

    #[tokio::test]
    async fn flush_survives_reopen_of_the_store() {
        let (store, dir) = test_store();
        let session = store.create(None).await;
        store.update_entities(session.session_id, vec!["예산".into()]).await.unwrap();

        let reopened = SessionStore::new(SessionStoreConfig {
            storage_path: dir.path().to_path_buf(),
            recent_doc_ids_cap: 20,
        })
        .unwrap();
        let fetched = reopened.fetch(session.session_id).await.unwrap();
        assert_eq!(fetched.recent_entities, vec!["예산".to_string()]);
    }

    #[tokio::test]
    async fn append_turn_against_unknown_session_errors() {
        let (store, _dir) = test_store();
        let turn = Turn {
            turn_id: Uuid::new_v4(),
            role: crate::types::TurnRole::User,
            content: "hi".into(),
            timestamp: chrono::Utc::now(),
            evidences: None,
            citation_map: None,
            metadata: Default::default(),
        };
        let err = store.append_turn(Uuid::new_v4(), turn).await.unwrap_err();
        assert_eq!(err.code(), "session_not_found");
    }

    #[tokio::test]
    async fn freeze_citation_map_is_first_write_wins() {
        let (store, _dir) = test_store();
        let session = store.create(None).await;
        let mut map1 = CitationMap::new();
        map1.append("D1".into(), crate::types::Locator { page: 1, char_start: 0, char_end: 5 });
        store.freeze_citation_map(session.session_id, vec![], map1.clone()).await.unwrap();

        let mut map2 = CitationMap::new();
        map2.append("D2".into(), crate::types::Locator { page: 2, char_start: 0, char_end: 5 });
        store.freeze_citation_map(session.session_id, vec![], map2).await.unwrap();

        let fetched = store.fetch(session.session_id).await.unwrap();
        assert_eq!(fetched.first_response_citation_map.unwrap().entries[0].1, "D1");
    }

    #[tokio::test]
    async fn clear_turns_empties_transcript_but_keeps_frozen_map() {
        let (store, _dir) = test_store();
        let session = store.create(None).await;
        let turn = Turn {
            turn_id: Uuid::new_v4(),
            role: crate::types::TurnRole::User,
            content: "hi".into(),
            timestamp: chrono::Utc::now(),
            evidences: None,
            citation_map: None,
            metadata: Default::default(),
        };
        store.append_turn(session.session_id, turn).await.unwrap();
        let mut map = CitationMap::new();
        map.append("D1".into(), crate::types::Locator { page: 1, char_start: 0, char_end: 5 });
        store.freeze_citation_map(session.session_id, vec![], map).await.unwrap();

        store.clear_turns(session.session_id).await.unwrap();

        let fetched = store.fetch(session.session_id).await.unwrap();
        assert!(fetched.turns.is_empty());
        assert!(fetched.first_response_citation_map.is_some());
    }
}
