use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use kindred_core::{InMemoryDirectory, SessionConfig, TemplateTable, MAX_TYPING_DELAY_MS};
use kindred_scheduler::{InitiativeConfig, MAX_PERIOD_SECS};
use kindred_schema::{ConversationRef, IdentityProfile};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KindredConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub initiative: InitiativeConfig,
    #[serde(default)]
    pub bus: BusConfig,
    /// Partial table merged over the built-in templates.
    #[serde(default)]
    pub templates: Option<TemplateTable>,
    #[serde(default)]
    pub seed: SeedConfig,
}

impl KindredConfig {
    pub fn templates(&self) -> TemplateTable {
        match &self.templates {
            Some(overrides) => TemplateTable::builtin().merged(overrides),
            None => TemplateTable::builtin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    256
}

/// Profiles and matches loaded into the in-memory directory at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub identities: Vec<IdentityProfile>,
    #[serde(default)]
    pub conversations: Vec<ConversationRef>,
}

impl SeedConfig {
    pub async fn populate(&self, dir: &InMemoryDirectory) {
        for identity in &self.identities {
            dir.put_identity(identity.clone()).await;
        }
        for conversation in &self.conversations {
            dir.put_conversation(conversation.clone()).await;
        }
    }
}

/// Reads `path`, or returns defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<KindredConfig> {
    if !path.exists() {
        tracing::info!("no config at {}, using defaults", path.display());
        return Ok(KindredConfig::default());
    }
    let config: KindredConfig = read_yaml_file(path)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &KindredConfig) -> Result<()> {
    if config.bus.capacity == 0 {
        return Err(anyhow!("bus.capacity must be greater than zero"));
    }
    if config.session.fallback_reply.trim().is_empty() {
        return Err(anyhow!("session.fallback_reply must not be empty"));
    }
    if config.session.typing.max_ms > MAX_TYPING_DELAY_MS {
        return Err(anyhow!(
            "session.typing.max_ms must be at most {MAX_TYPING_DELAY_MS}"
        ));
    }
    if let Some(field) = config.initiative.out_of_range() {
        return Err(anyhow!(
            "initiative.{field} must be between 1 and {MAX_PERIOD_SECS} seconds"
        ));
    }

    let mut scripted = HashSet::new();
    let mut seen = HashSet::new();
    for identity in &config.seed.identities {
        if !seen.insert(identity.id.as_str()) {
            return Err(anyhow!("duplicate identity id: {}", identity.id));
        }
        if identity.scripted {
            scripted.insert(identity.id.as_str());
        }
    }

    let mut conversations = HashSet::new();
    for conversation in &config.seed.conversations {
        if !conversations.insert(conversation.conversation_id.as_str()) {
            return Err(anyhow!(
                "duplicate conversation id: {}",
                conversation.conversation_id
            ));
        }
        if !scripted.contains(conversation.scripted_id.as_str()) {
            return Err(anyhow!(
                "conversation {} references unknown scripted identity: {}",
                conversation.conversation_id,
                conversation.scripted_id
            ));
        }
        if !seen.contains(conversation.human_id.as_str()) {
            return Err(anyhow!(
                "conversation {} references unknown identity: {}",
                conversation.conversation_id,
                conversation.human_id
            ));
        }
    }

    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}
