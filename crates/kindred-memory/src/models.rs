use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use kindred_schema::{ContextTurn, PersonalityTag, Speaker};
use serde::{Deserialize, Serialize};

fn default_context_window() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Cap on stored entries per conversation; `None` keeps everything.
    #[serde(default)]
    pub history_limit: Option<usize>,
    /// How many trailing entries are handed to the responder as context.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            history_limit: None,
            context_window: default_context_window(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub conversation_id: String,
    pub scripted_id: String,
    pub human_id: String,
    pub personality: PersonalityTag,
    pub started_at: DateTime<Utc>,
    /// Every append ever made, independent of `history_limit`.
    pub message_count: u64,
    pub entries: VecDeque<MemoryEntry>,
}

impl ConversationMemory {
    pub fn new(
        conversation_id: &str,
        scripted_id: &str,
        human_id: &str,
        personality: PersonalityTag,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            scripted_id: scripted_id.to_string(),
            human_id: human_id.to_string(),
            personality,
            started_at,
            message_count: 0,
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, entry: MemoryEntry, history_limit: Option<usize>) -> u64 {
        self.entries.push_back(entry);
        if let Some(limit) = history_limit {
            while self.entries.len() > limit {
                self.entries.pop_front();
            }
        }
        self.message_count += 1;
        self.message_count
    }

    /// Later of conversation start and the newest entry.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.entries
            .back()
            .map(|entry| entry.at.max(self.started_at))
            .unwrap_or(self.started_at)
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_activity()
    }

    pub fn recent(&self, window: usize) -> Vec<ContextTurn> {
        let skip = self.entries.len().saturating_sub(window);
        self.entries
            .iter()
            .skip(skip)
            .map(|entry| ContextTurn {
                speaker: entry.speaker,
                text: entry.text.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub conversations: usize,
    pub messages: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn entry(text: &str, at: DateTime<Utc>) -> MemoryEntry {
        MemoryEntry {
            speaker: Speaker::Human,
            text: text.to_string(),
            at,
        }
    }

    #[test]
    fn history_limit_keeps_counting() {
        let now = Utc::now();
        let mut memory = ConversationMemory::new("c1", "bot", "h1", PersonalityTag::Casual, now);
        for i in 0..5 {
            memory.push(entry(&format!("m{i}"), now), Some(3));
        }
        assert_eq!(memory.message_count, 5);
        assert_eq!(memory.entries.len(), 3);
        assert_eq!(memory.entries.front().unwrap().text, "m2");
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let now = Utc::now();
        let mut memory = ConversationMemory::new("c1", "bot", "h1", PersonalityTag::Casual, now);
        for i in 0..4 {
            memory.push(entry(&format!("m{i}"), now), None);
        }
        let texts: Vec<_> = memory.recent(2).into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["m2", "m3"]);
        assert_eq!(memory.recent(10).len(), 4);
    }

    #[test]
    fn last_activity_is_later_of_start_and_newest_entry() {
        let start = Utc::now();
        let mut memory =
            ConversationMemory::new("c1", "bot", "h1", PersonalityTag::Friendly, start);
        assert_eq!(memory.last_activity(), start);

        memory.push(entry("old", start - TimeDelta::hours(1)), None);
        assert_eq!(memory.last_activity(), start);

        let later = start + TimeDelta::minutes(5);
        memory.push(entry("new", later), None);
        assert_eq!(memory.last_activity(), later);
        assert_eq!(memory.idle_for(later + TimeDelta::minutes(1)), TimeDelta::minutes(1));
    }
}
