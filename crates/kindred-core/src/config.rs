use kindred_memory::MemoryConfig;
use serde::{Deserialize, Serialize};

use crate::delay::TypingDelayConfig;

pub const DEFAULT_FALLBACK_REPLY: &str =
    "I'm having trouble thinking of a response right now. Can we talk about something else?";

fn default_fallback_reply() -> String {
    DEFAULT_FALLBACK_REPLY.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub typing: TypingDelayConfig,
    /// Sent in place of a reply the responder could not produce.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
    /// Fixed seed for the session's random source; entropy when unset.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            memory: MemoryConfig::default(),
            typing: TypingDelayConfig::default(),
            fallback_reply: default_fallback_reply(),
            rng_seed: None,
        }
    }
}
