use std::sync::LazyLock;

use anyhow::Result;
use kindred_schema::{ContextTurn, IdentityProfile, PersonalityTag};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use regex::Regex;

use crate::templates::{Category, TemplateTable};

const INITIATIVE_LINES: [&str; 5] = [
    "Hey! I noticed we matched and I think you're really interesting! Would love to chat! 😊",
    "Hi there! I'm excited to get to know you better! You seem amazing! ✨",
    "Hello! I couldn't help but be drawn to your profile. Let's talk! 💫",
    "Hey! I think we might have something special here. Want to find out? 😉",
    "Hi! I'm really looking forward to our conversation! You seem wonderful! 💕",
];

struct Predicates {
    greeting: Regex,
    question: Regex,
    positive: Regex,
    negative: Regex,
    work: Regex,
    personal: Regex,
    hobby: Regex,
}

static PREDICATES: LazyLock<Predicates> = LazyLock::new(|| {
    let re = |pattern: &str| Regex::new(pattern).expect("classifier pattern is valid");
    Predicates {
        greeting: re(r"(?i)^\s*(hi|hello|hey|good morning|good afternoon|good evening)\b"),
        question: re(r"\?\s*$"),
        positive: re(r"(?i)(great|amazing|wonderful|awesome|love|like|good|happy|excited)"),
        negative: re(r"(?i)(bad|terrible|awful|hate|dislike|sad|angry|frustrated)"),
        work: re(r"(?i)(work|job|career|office|meeting|project|boss)"),
        personal: re(r"(?i)(family|friend|relationship|dating|love|heart)"),
        hobby: re(r"(?i)(hobby|interest|passion|fun|enjoy|music|sport|travel)"),
    }
});

/// First category in priority order whose predicate matches.
pub fn classify(text: &str) -> Category {
    let p = &*PREDICATES;
    Category::PRIORITY
        .into_iter()
        .find(|category| match category {
            Category::Greeting => p.greeting.is_match(text),
            Category::Question => p.question.is_match(text),
            Category::Positive => p.positive.is_match(text),
            Category::Negative => p.negative.is_match(text),
            Category::Work => p.work.is_match(text),
            Category::Personal => p.personal.is_match(text),
            Category::Hobby => p.hobby.is_match(text),
            Category::Default => true,
        })
        .unwrap_or(Category::Default)
}

pub struct ReplyRequest<'a> {
    pub text: &'a str,
    pub personality: PersonalityTag,
    pub context: &'a [ContextTurn],
    pub profile: &'a IdentityProfile,
}

/// Produces reply and initiative text for the session manager.
pub trait ReplySource: Send + Sync {
    fn reply(&self, request: &ReplyRequest<'_>, rng: &mut dyn RngCore) -> Result<String>;
    fn initiative(&self, personality: PersonalityTag, rng: &mut dyn RngCore) -> Result<String>;
}

/// Template-driven responder. Pure apart from the injected random source.
#[derive(Debug, Clone)]
pub struct Responder {
    templates: TemplateTable,
    initiative_lines: Vec<String>,
}

impl Default for Responder {
    fn default() -> Self {
        Self::new(TemplateTable::builtin())
    }
}

impl Responder {
    pub fn new(templates: TemplateTable) -> Self {
        Self {
            templates,
            initiative_lines: INITIATIVE_LINES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn templates(&self) -> &TemplateTable {
        &self.templates
    }

    pub fn base_reply(&self, text: &str, personality: PersonalityTag) -> (Category, &str) {
        let category = classify(text);
        (category, self.templates.lookup(category, personality))
    }

    pub fn reply<R: Rng + ?Sized>(
        &self,
        text: &str,
        personality: PersonalityTag,
        profile: &IdentityProfile,
        rng: &mut R,
    ) -> String {
        let (_, base) = self.base_reply(text, personality);
        match profile.interests.choose(rng) {
            Some(interest) => format!(
                "{base}\n\nBy the way, I love {interest}! We should definitely talk about that sometime! 💫"
            ),
            None => base.to_string(),
        }
    }

    /// Opening line for an idle conversation. Personality does not change the pool.
    pub fn initiative_text<R: Rng + ?Sized>(&self, _personality: PersonalityTag, rng: &mut R) -> String {
        self.initiative_lines
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| INITIATIVE_LINES[0].to_string())
    }

    pub fn initiative_lines(&self) -> &[String] {
        &self.initiative_lines
    }
}

impl ReplySource for Responder {
    fn reply(&self, request: &ReplyRequest<'_>, rng: &mut dyn RngCore) -> Result<String> {
        Ok(Responder::reply(
            self,
            request.text,
            request.personality,
            request.profile,
            rng,
        ))
    }

    fn initiative(&self, personality: PersonalityTag, rng: &mut dyn RngCore) -> Result<String> {
        Ok(self.initiative_text(personality, rng))
    }
}
