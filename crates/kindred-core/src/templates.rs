use std::collections::HashMap;

use kindred_schema::PersonalityTag;
use serde::{Deserialize, Serialize};

/// Message categories in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Greeting,
    Question,
    Positive,
    Negative,
    Work,
    Personal,
    Hobby,
    Default,
}

impl Category {
    pub const PRIORITY: [Category; 8] = [
        Category::Greeting,
        Category::Question,
        Category::Positive,
        Category::Negative,
        Category::Work,
        Category::Personal,
        Category::Hobby,
        Category::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Greeting => "greeting",
            Category::Question => "question",
            Category::Positive => "positive",
            Category::Negative => "negative",
            Category::Work => "work",
            Category::Personal => "personal",
            Category::Hobby => "hobby",
            Category::Default => "default",
        }
    }
}

// Columns follow PersonalityTag::ALL: friendly, flirty, casual, intellectual.
const BUILTIN: [(Category, [&str; 4]); 8] = [
    (
        Category::Greeting,
        [
            "Hey there! 😊 How's your day going?",
            "Well hello there! 😉 You're looking quite lovely today!",
            "Hey! What's up?",
            "Hello! I'm curious about your day. What's been on your mind?",
        ],
    ),
    (
        Category::Question,
        [
            "That's really interesting! Tell me more about that! 😊",
            "I love how passionate you are about that! Tell me everything! 💕",
            "Cool! I'd love to hear more about that.",
            "Fascinating! I'd really like to understand your perspective on that.",
        ],
    ),
    (
        Category::Positive,
        [
            "I totally agree with you! That's such a great point! 👍",
            "You're absolutely right! I love how we think alike! 💫",
            "Yeah, I'm with you on that one.",
            "Excellent observation! I think you've hit on something important there.",
        ],
    ),
    (
        Category::Negative,
        [
            "I'm sorry you're going through that. I'm here to listen and support you! 💙",
            "I hate seeing you down! You're too amazing to feel that way. Let me cheer you up! 💕",
            "That sounds rough. Want to talk about it?",
            "That's a challenging situation. I'd like to understand more about what you're experiencing.",
        ],
    ),
    (
        Category::Work,
        [
            "Work can be challenging sometimes! I hope you're finding ways to stay positive! 😊",
            "I love how dedicated you are to your work! That's really attractive! 💫",
            "Work stuff, huh? Sometimes it's just part of life.",
            "Work dynamics can be quite complex. I find it interesting how different people approach their careers.",
        ],
    ),
    (
        Category::Personal,
        [
            "Relationships and personal connections are so important! I love that you're thinking about that! 💕",
            "I love how you think about relationships! It shows you have a beautiful heart! 💖",
            "Personal stuff is always interesting to talk about.",
            "Personal relationships are fascinating. They reveal so much about human nature and connection.",
        ],
    ),
    (
        Category::Hobby,
        [
            "I love that you're passionate about your interests! That's so inspiring! ✨",
            "I love how passionate you are! It's really attractive when someone has interests they care about! 💫",
            "That's cool! Hobbies make life more interesting.",
            "Personal interests are fascinating. They often reveal a lot about someone's personality and values.",
        ],
    ),
    (
        Category::Default,
        [
            "That's really interesting! I'd love to hear more about your thoughts on that! 😊",
            "I love how you think! You're really fascinating! 💕",
            "That's cool! Tell me more.",
            "That's an interesting perspective. I'd like to understand your thoughts better.",
        ],
    ),
];

const LAST_RESORT: &str = BUILTIN[7].1[0];

/// `category × personality → text`.
///
/// Adding a category or personality is a data change: deserialize a partial
/// table from config and merge it over the built-in one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateTable {
    entries: HashMap<Category, HashMap<PersonalityTag, String>>,
}

impl TemplateTable {
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for (category, row) in BUILTIN {
            for (personality, text) in PersonalityTag::ALL.into_iter().zip(row) {
                table.insert(category, personality, text);
            }
        }
        table
    }

    pub fn insert(&mut self, category: Category, personality: PersonalityTag, text: &str) {
        self.entries
            .entry(category)
            .or_default()
            .insert(personality, text.to_string());
    }

    /// Overlays every entry of `overrides` onto this table.
    pub fn merged(mut self, overrides: &TemplateTable) -> Self {
        for (category, row) in &overrides.entries {
            for (personality, text) in row {
                self.insert(*category, *personality, text);
            }
        }
        self
    }

    /// Falls back to the friendly entry of the same category.
    pub fn lookup(&self, category: Category, personality: PersonalityTag) -> &str {
        let Some(row) = self.entries.get(&category) else {
            return LAST_RESORT;
        };
        row.get(&personality)
            .or_else(|| row.get(&PersonalityTag::Friendly))
            .map(String::as_str)
            .unwrap_or(LAST_RESORT)
    }
}
