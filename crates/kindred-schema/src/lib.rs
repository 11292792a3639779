use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Template set a scripted identity speaks with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum PersonalityTag {
    Friendly,
    Flirty,
    Casual,
    Intellectual,
}

impl PersonalityTag {
    pub const ALL: [PersonalityTag; 4] = [
        PersonalityTag::Friendly,
        PersonalityTag::Flirty,
        PersonalityTag::Casual,
        PersonalityTag::Intellectual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PersonalityTag::Friendly => "friendly",
            PersonalityTag::Flirty => "flirty",
            PersonalityTag::Casual => "casual",
            PersonalityTag::Intellectual => "intellectual",
        }
    }

    /// Unknown tags resolve to `Friendly`.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PersonalityTag::Friendly => "Friendly",
            PersonalityTag::Flirty => "Flirty",
            PersonalityTag::Casual => "Casual",
            PersonalityTag::Intellectual => "Intellectual",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PersonalityTag::Friendly => "Warm, approachable, and genuinely interested in others",
            PersonalityTag::Flirty => "Playful, charming, and romantic",
            PersonalityTag::Casual => "Relaxed, easy-going, and natural",
            PersonalityTag::Intellectual => "Thoughtful, curious, and engaging",
        }
    }

    pub fn traits(&self) -> [&'static str; 4] {
        match self {
            PersonalityTag::Friendly => ["empathetic", "supportive", "curious", "positive"],
            PersonalityTag::Flirty => ["playful", "charming", "romantic", "confident"],
            PersonalityTag::Casual => ["relaxed", "natural", "easy-going", "authentic"],
            PersonalityTag::Intellectual => ["thoughtful", "curious", "analytical", "engaging"],
        }
    }
}

impl Default for PersonalityTag {
    fn default() -> Self {
        PersonalityTag::Friendly
    }
}

impl fmt::Display for PersonalityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPersonality(pub String);

impl fmt::Display for UnknownPersonality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown personality tag: {}", self.0)
    }
}

impl std::error::Error for UnknownPersonality {}

impl FromStr for PersonalityTag {
    type Err = UnknownPersonality;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "friendly" => Ok(PersonalityTag::Friendly),
            "flirty" => Ok(PersonalityTag::Flirty),
            "casual" => Ok(PersonalityTag::Casual),
            "intellectual" => Ok(PersonalityTag::Intellectual),
            _ => Err(UnknownPersonality(s.to_string())),
        }
    }
}

impl From<String> for PersonalityTag {
    fn from(raw: String) -> Self {
        PersonalityTag::parse_lenient(&raw)
    }
}

/// Who said a line in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Human,
    Script,
}

impl Speaker {
    /// Chat-completion style role name.
    pub fn role(&self) -> &'static str {
        match self {
            Speaker::Human => "user",
            Speaker::Script => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// Profile fields of an identity as the identity store reports them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub personality: PersonalityTag,
    #[serde(default)]
    pub scripted: bool,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
}

/// Read-only view of a match between a human and a scripted identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRef {
    pub conversation_id: String,
    pub human_id: String,
    pub scripted_id: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl ConversationRef {
    pub fn pairs(&self, human_id: &str, scripted_id: &str) -> bool {
        self.human_id == human_id && self.scripted_id == scripted_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundChat {
    pub sender_id: String,
    pub receiver_id: String,
    pub conversation_id: String,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Voice,
    Emoji,
    System,
}

/// Write request for the message store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub conversation_id: String,
    pub text: String,
    pub kind: MessageKind,
    pub is_scripted: bool,
    pub at: DateTime<Utc>,
}

/// Handle the message store hands back after a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub conversation_id: String,
    pub text: String,
    pub kind: MessageKind,
    pub is_scripted: bool,
    pub created_at: DateTime<Utc>,
}

/// Events fanned out to a conversation's subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    Typing {
        identity_id: String,
        conversation_id: String,
        is_typing: bool,
    },
    MessageDelivered {
        message: StoredMessage,
        sender_name: String,
        is_scripted: bool,
    },
}

impl ChatEvent {
    /// Name clients listen for.
    pub fn event_name(&self) -> &'static str {
        match self {
            ChatEvent::Typing { .. } => "user_typing",
            ChatEvent::MessageDelivered { .. } => "receive_message",
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            ChatEvent::Typing {
                conversation_id, ..
            } => conversation_id,
            ChatEvent::MessageDelivered { message, .. } => &message.conversation_id,
        }
    }
}

fn default_true() -> bool {
    true
}
