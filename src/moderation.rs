//! Moderation backends
//!
//! A final safety pass over model output. Unsafe verdicts are never
//! corrected, only blocked.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum ModerationVerdict {
    Safe,
    Unsafe { reason: String },
}

#[derive(Error, Debug)]
pub enum ModerationError {
    #[error("moderation backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ModerationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, text: &str) -> Result<ModerationVerdict, ModerationError>;
}

/// Phrases that make an answer unsafe to publish as financial guidance
const BLOCKED_PHRASES: &[(&str, &str)] = &[
    ("guaranteed return", "promises guaranteed returns"),
    ("guaranteed profit", "promises guaranteed returns"),
    ("risk-free profit", "promises guaranteed returns"),
    ("can't lose", "promises guaranteed returns"),
    ("cannot lose", "promises guaranteed returns"),
    ("insider information", "encourages insider trading"),
    ("insider tip", "encourages insider trading"),
    ("non-public information", "encourages insider trading"),
    ("pump and dump", "encourages market manipulation"),
    ("spoofing orders", "encourages market manipulation"),
    ("wash trade", "encourages market manipulation"),
    ("launder", "references money laundering"),
    ("evade taxes", "encourages tax evasion"),
    ("tax evasion", "encourages tax evasion"),
];

/// Rule-based moderator
#[derive(Debug, Clone, Default)]
pub struct KeywordModerator {
    extra: Vec<(String, String)>,
}

impl KeywordModerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a deployment-specific phrase
    pub fn with_phrase(mut self, phrase: &str, reason: &str) -> Self {
        self.extra.push((phrase.to_lowercase(), reason.to_string()));
        self
    }
}

#[async_trait]
impl ModerationBackend for KeywordModerator {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn check(&self, text: &str) -> Result<ModerationVerdict, ModerationError> {
        let lowered = text.to_lowercase();

        let builtin = BLOCKED_PHRASES
            .iter()
            .map(|(phrase, reason)| (*phrase, *reason));
        let extra = self
            .extra
            .iter()
            .map(|(phrase, reason)| (phrase.as_str(), reason.as_str()));

        let hit = builtin
            .chain(extra)
            .find(|(phrase, _)| lowered.contains(phrase));

        Ok(match hit {
            Some((_, reason)) => ModerationVerdict::Unsafe {
                reason: reason.to_string(),
            },
            None => ModerationVerdict::Safe,
        })
    }
}
