//! Question history
//!
//! Bounded, most-recent-first list of asked questions, deduplicated
//! case-insensitively and persisted as a JSON array under one key.

mod kv;
mod sqlite;

pub use kv::{KeyValueStore, KvError, KvResult, MemoryStore};
pub use sqlite::SqliteStore;

use serde_json::Value;
use std::sync::Arc;

pub const HISTORY_KEY: &str = "gptlov.history";

/// Loads, updates and persists the question history
///
/// Persistence is best effort: a missing, failing or corrupted store
/// degrades to an empty history and never surfaces an error.
#[derive(Clone)]
pub struct HistoryManager {
    store: Option<Arc<dyn KeyValueStore>>,
    limit: usize,
}

impl HistoryManager {
    pub fn new(store: Option<Arc<dyn KeyValueStore>>, limit: usize) -> Self {
        Self { store, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Stored history, keeping only string entries
    pub fn load(&self) -> Vec<String> {
        let Some(store) = &self.store else {
            return vec![];
        };

        let raw = match store.get(HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return vec![],
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load question history");
                return vec![];
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .take(self.limit)
                .collect(),
            Ok(_) | Err(_) => {
                tracing::warn!("Stored question history is not a JSON array, ignoring it");
                vec![]
            }
        }
    }

    /// History after asking `question`, persisted; `None` for blank input
    pub fn record(&self, history: &[String], question: &str) -> Option<Vec<String>> {
        let next = push_question(history, question, self.limit)?;
        self.persist(&next);
        Some(next)
    }

    fn persist(&self, history: &[String]) {
        let Some(store) = &self.store else {
            return;
        };
        let result = serde_json::to_string(history)
            .map_err(|e| KvError::Unavailable(e.to_string()))
            .and_then(|json| store.set(HISTORY_KEY, &json));
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist question history");
        }
    }
}

/// Move `question` to the front, dropping case-insensitive duplicates
pub fn push_question(history: &[String], question: &str, limit: usize) -> Option<Vec<String>> {
    let question = question.trim();
    if question.is_empty() {
        return None;
    }

    let folded = question.to_lowercase();
    let mut next = Vec::with_capacity(limit.min(history.len() + 1));
    next.push(question.to_string());
    next.extend(
        history
            .iter()
            .filter(|entry| entry.to_lowercase() != folded)
            .cloned(),
    );
    next.truncate(limit);
    Some(next)
}
