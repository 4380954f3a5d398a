//! Conversation message thread shared by every agent's dispatch loop.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Populated on `Role::Tool` messages: which tool-call id this is a
    /// result for.
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_call_id: None }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn to_wire(&self) -> Value {
        let mut obj = json!({ "role": self.role, "content": self.content });
        if let Some(id) = &self.tool_call_id {
            obj["tool_call_id"] = json!(id);
        }
        obj
    }
}

/// A cached message thread, keyed by the set of test-case ids it was built
/// from. The scheduler reuses a cached thread when the current scheduling
/// view's id set is a subset of what the thread has already seen
/// (SPEC_FULL.md §4.5 step 2).
#[derive(Debug, Clone, Default)]
pub struct ThreadCache {
    seen_ids: std::collections::BTreeSet<u64>,
    messages: Vec<Message>,
}

impl ThreadCache {
    pub fn reusable_for(&self, current_ids: &std::collections::BTreeSet<u64>) -> bool {
        !self.messages.is_empty() && current_ids.is_subset(&self.seen_ids)
    }

    pub fn replace(&mut self, seen_ids: std::collections::BTreeSet<u64>, messages: Vec<Message>) {
        self.seen_ids = seen_ids;
        self.messages = messages;
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_of_seen_ids_is_reusable() {
        let mut cache = ThreadCache::default();
        cache.replace([1, 2, 3].into_iter().collect(), vec![Message::user("x")]);
        assert!(cache.reusable_for(&[1, 2].into_iter().collect()));
        assert!(!cache.reusable_for(&[1, 4].into_iter().collect()));
    }

    #[test]
    fn empty_cache_is_never_reusable() {
        let cache = ThreadCache::default();
        assert!(!cache.reusable_for(&std::collections::BTreeSet::new()));
    }
}
