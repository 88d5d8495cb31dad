//! Per-user hierarchical memory (C11): episodic conversation ring, semantic
//! preferences/facts, and procedural recent topics. Distinct from the
//! generic importance-scored [`crate::memory::MemorySystem`] above — this is
//! the lean, per-user contract the orchestrator actually calls: `recall`,
//! `remember`, `profile`. All access is best-effort; failures never block
//! generation (MemorySoftError, §7).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAX_CONVERSATIONS: usize = 50;
const MAX_PREFERENCES: usize = 20;
const MAX_RECENT_TOPICS: usize = 10;

/// Heuristic trigger words for preference extraction. Source-language
/// specific (§9 open question) — a host can swap this list without touching
/// the extraction algorithm.
pub const PREFERENCE_TRIGGERS: &[&str] = &["prefer", "like", "favorite", "always use", "never use"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub ts: DateTime<Utc>,
    pub query: String,
    pub response: String,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryRecord {
    /// Bounded ring of the last `MAX_CONVERSATIONS` turns, oldest first.
    pub conversations: Vec<ConversationTurn>,
    /// Deduplicated, bounded to `MAX_PREFERENCES`, recency order preserved.
    pub preferences: Vec<String>,
    /// Deduplicated facts extracted from conversation.
    pub facts: Vec<String>,
    /// Deduplicated, bounded to `MAX_RECENT_TOPICS`, recency order preserved.
    pub recent_topics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub conversation_count: usize,
    pub preferences: Vec<String>,
    pub facts: Vec<String>,
    pub recent_topics: Vec<String>,
}

/// File-backed store of one [`MemoryRecord`] per user, persisted at
/// `<data_dir>/memory/user_<id>.json` (§6 persisted state layout).
pub struct UserMemoryStore {
    data_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<RwLock<MemoryRecord>>>>,
}

impl UserMemoryStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        self.data_dir.join("memory").join(format!("user_{}.json", sanitize(user_id)))
    }

    fn load(&self, user_id: &str) -> Arc<RwLock<MemoryRecord>> {
        if let Some(existing) = self.cache.read().get(user_id) {
            return existing.clone();
        }

        let record = Self::read_from_disk(&self.path_for(user_id)).unwrap_or_default();
        let handle = Arc::new(RwLock::new(record));
        self.cache.write().insert(user_id.to_string(), handle.clone());
        handle
    }

    fn read_from_disk(path: &Path) -> Option<MemoryRecord> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Corrupt memory record, starting fresh");
                None
            }
        }
    }

    fn persist(&self, user_id: &str, record: &MemoryRecord) {
        let path = self.path_for(user_id);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(error = %e, "Failed to create memory directory");
                return;
            }
        }
        match serde_json::to_string(record) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::warn!(path = %path.display(), error = %e, "Memory persist failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Memory serialization failed"),
        }
    }

    /// Most recent conversation entries whose query or response contains any
    /// token of `query`, most recent first, up to `limit`. Best-effort: an
    /// empty result is a valid (non-error) outcome.
    pub fn recall(&self, user_id: &str, query: &str, limit: usize) -> Vec<ConversationTurn> {
        let handle = self.load(user_id);
        let record = handle.read();

        let query_tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|t| t.len() > 2)
            .map(str::to_string)
            .collect();

        if query_tokens.is_empty() {
            return record.conversations.iter().rev().take(limit).cloned().collect();
        }

        record
            .conversations
            .iter()
            .rev()
            .filter(|turn| {
                let haystack = format!("{} {}", turn.query, turn.response).to_lowercase();
                query_tokens.iter().any(|t| haystack.contains(t.as_str()))
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Append a turn to the episodic ring and run the semantic/procedural
    /// extraction pass. Fire-and-forget from the caller's perspective — the
    /// answer has already been returned by the time this typically runs
    /// (§5 caching/write policy).
    pub fn remember(
        &self,
        user_id: &str,
        query: &str,
        response: &str,
        meta: HashMap<String, String>,
    ) {
        let handle = self.load(user_id);
        {
            let mut record = handle.write();

            record.conversations.push(ConversationTurn {
                ts: Utc::now(),
                query: query.to_string(),
                response: response.to_string(),
                meta,
            });
            if record.conversations.len() > MAX_CONVERSATIONS {
                let excess = record.conversations.len() - MAX_CONVERSATIONS;
                record.conversations.drain(0..excess);
            }

            extract_semantic(&mut record, query);
        }

        let record = handle.read();
        self.persist(user_id, &record);
    }

    /// Counts plus the three semantic/procedural lists.
    pub fn profile(&self, user_id: &str) -> UserProfile {
        let handle = self.load(user_id);
        let record = handle.read();
        UserProfile {
            conversation_count: record.conversations.len(),
            preferences: record.preferences.clone(),
            facts: record.facts.clone(),
            recent_topics: record.recent_topics.clone(),
        }
    }
}

/// Lightweight heuristic extraction: trigger-word preferences, the query
/// itself as a "fact" candidate when it reads declaratively, and the query's
/// leading noun phrase as a recent topic. All three lists are deduplicated
/// and bounded, preserving recency order (most recent last, matching the
/// conversations ring's append order).
fn extract_semantic(record: &mut MemoryRecord, query: &str) {
    let lower = query.to_lowercase();

    if PREFERENCE_TRIGGERS.iter().any(|trigger| lower.contains(trigger)) {
        push_deduped(&mut record.preferences, query.trim().to_string(), MAX_PREFERENCES);
    }

    if !lower.starts_with("what")
        && !lower.starts_with("why")
        && !lower.starts_with("how")
        && !lower.ends_with('?')
        && query.split_whitespace().count() >= 4
    {
        push_deduped(&mut record.facts, query.trim().to_string(), MAX_PREFERENCES);
    }

    let topic = query
        .split_whitespace()
        .take(5)
        .collect::<Vec<_>>()
        .join(" ");
    if !topic.is_empty() {
        push_deduped(&mut record.recent_topics, topic, MAX_RECENT_TOPICS);
    }
}

/// Push a value onto a bounded, deduplicated list, moving it to the end
/// (most-recent position) if it already exists.
fn push_deduped(list: &mut Vec<String>, value: String, max_len: usize) {
    list.retain(|existing| existing != &value);
    list.push(value);
    if list.len() > max_len {
        let excess = list.len() - max_len;
        list.drain(0..excess);
    }
}

fn sanitize(user_id: &str) -> String {
    user_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, UserMemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = UserMemoryStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn remember_then_recall_round_trips() {
        let (_dir, store) = store();
        store.remember("u1", "what is the refund policy", "30 days", HashMap::new());
        let hits = store.recall("u1", "refund policy", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].response, "30 days");
    }

    #[test]
    fn recall_filters_by_token_overlap() {
        let (_dir, store) = store();
        store.remember("u1", "tell me about widgets", "widgets are great", HashMap::new());
        store.remember("u1", "tell me about gadgets", "gadgets are fine", HashMap::new());
        let hits = store.recall("u1", "widgets", 5);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].query.contains("widgets"));
    }

    #[test]
    fn conversation_ring_is_bounded() {
        let (_dir, store) = store();
        for i in 0..(MAX_CONVERSATIONS + 10) {
            store.remember("u1", &format!("query {}", i), "ok", HashMap::new());
        }
        let profile = store.profile("u1");
        assert_eq!(profile.conversation_count, MAX_CONVERSATIONS);
    }

    #[test]
    fn preference_trigger_is_captured() {
        let (_dir, store) = store();
        store.remember("u1", "I prefer dark mode in the editor", "noted", HashMap::new());
        let profile = store.profile("u1");
        assert!(profile.preferences.iter().any(|p| p.contains("prefer")));
    }

    #[test]
    fn preferences_are_deduplicated_and_bounded() {
        let (_dir, store) = store();
        for i in 0..(MAX_PREFERENCES + 5) {
            store.remember("u1", &format!("I like option {}", i), "ok", HashMap::new());
        }
        let profile = store.profile("u1");
        assert!(profile.preferences.len() <= MAX_PREFERENCES);
    }

    #[test]
    fn separate_users_do_not_share_memory() {
        let (_dir, store) = store();
        store.remember("u1", "secret project alpha", "noted", HashMap::new());
        let hits = store.recall("u2", "secret project alpha", 5);
        assert!(hits.is_empty());
    }

    #[test]
    fn persists_and_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = UserMemoryStore::new(dir.path());
            store.remember("u1", "what is engunity ai", "a rag assistant", HashMap::new());
        }
        let store2 = UserMemoryStore::new(dir.path());
        let hits = store2.recall("u1", "engunity", 5);
        assert_eq!(hits.len(), 1);
    }
}
