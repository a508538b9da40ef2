//! External collaborators consumed by the engine
//!
//! Fact extraction, adversarial-text classification and credential checks
//! happen outside the engine. Each is a narrow trait with a simple local
//! implementation for tests and demos.

use async_trait::async_trait;
use engram_core::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, info};

// ============== Fact Extraction ==============

/// A fact tuple produced by an extractor
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    /// Fact label, used as the dedup key
    pub label: String,
    pub value: String,

    /// How much the fact matters (0.0 - 1.0), becomes node salience
    pub importance: f32,

    /// Extractor confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl ExtractedFact {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            importance: 0.5,
            confidence: 1.0,
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Trait for fact extractors
#[async_trait]
pub trait FactExtractor: Send + Sync {
    /// Get the extractor name
    fn name(&self) -> &str;

    /// Extract fact tuples from free text
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedFact>>;
}

/// Extracts "my X is Y" and "I like Y" statements
#[derive(Debug, Clone, Default)]
pub struct PatternFactExtractor;

impl PatternFactExtractor {
    pub fn new() -> Self {
        info!("Created pattern fact extractor");
        Self
    }

    fn extract_sentence(sentence: &str) -> Option<ExtractedFact> {
        // ASCII lowering keeps byte offsets aligned with `sentence`
        let lower = sentence.to_ascii_lowercase();

        if let Some(start) = word_start(&lower, "my ") {
            let after = start + 3;
            let (copula, len) = [" is ", " are "]
                .iter()
                .filter_map(|c| lower[after..].find(c).map(|p| (after + p, c.len())))
                .min()?;

            let words: Vec<String> = sentence[after..copula]
                .split_whitespace()
                .map(|w| w.to_ascii_lowercase())
                .collect();
            let value = clean_value(&sentence[copula + len..]);
            if words.is_empty() || words.len() > 4 || value.is_empty() {
                return None;
            }
            return Some(
                ExtractedFact::new(words.join("_"), value)
                    .with_importance(0.6)
                    .with_confidence(0.9),
            );
        }

        if let Some(start) = word_start(&lower, "i like ") {
            let value = clean_value(&sentence[start + 7..]);
            if !value.is_empty() {
                return Some(
                    ExtractedFact::new("likes", value)
                        .with_importance(0.4)
                        .with_confidence(0.7),
                );
            }
        }
        None
    }
}

fn word_start(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .match_indices(needle)
        .map(|(i, _)| i)
        .find(|i| *i == 0 || !haystack.as_bytes()[i - 1].is_ascii_alphanumeric())
}

fn clean_value(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .trim()
        .to_string()
}

#[async_trait]
impl FactExtractor for PatternFactExtractor {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn extract(&self, text: &str) -> Result<Vec<ExtractedFact>> {
        let facts: Vec<ExtractedFact> = text
            .split(['.', '!', '?', '\n'])
            .filter_map(Self::extract_sentence)
            .collect();
        debug!("Extracted {} facts from {} bytes", facts.len(), text.len());
        Ok(facts)
    }
}

// ============== Adversarial Classification ==============

/// Verdict of an adversarial-text classifier
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub is_attack: bool,
    pub attack_kind: Option<String>,
    pub confidence: f32,
}

impl Classification {
    pub fn benign() -> Self {
        Self {
            is_attack: false,
            attack_kind: None,
            confidence: 0.0,
        }
    }

    pub fn attack(kind: impl Into<String>, confidence: f32) -> Self {
        Self {
            is_attack: true,
            attack_kind: Some(kind.into()),
            confidence,
        }
    }
}

/// Trait for adversarial-text classifiers
pub trait AdversarialClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Classification;
}

/// Accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllClassifier;

impl AdversarialClassifier for AllowAllClassifier {
    fn classify(&self, _text: &str) -> Classification {
        Classification::benign()
    }
}

/// Flags text containing known injection phrases
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<(String, Vec<String>)>,
    confidence: f32,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(0.95)
            .with_rule(
                "prompt_injection",
                &[
                    "ignore previous instructions",
                    "ignore all previous",
                    "disregard your instructions",
                    "forget your instructions",
                    "system prompt",
                ],
            )
            .with_rule(
                "role_override",
                &["you are now", "act as an unrestricted", "developer mode", "jailbreak"],
            )
    }
}

impl KeywordClassifier {
    /// Empty rule set reporting `confidence` on a match
    pub fn new(confidence: f32) -> Self {
        Self {
            rules: Vec::new(),
            confidence,
        }
    }

    pub fn with_rule(mut self, kind: &str, phrases: &[&str]) -> Self {
        self.rules.push((
            kind.to_string(),
            phrases.iter().map(|p| p.to_lowercase()).collect(),
        ));
        self
    }
}

impl AdversarialClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();
        for (kind, phrases) in &self.rules {
            if phrases.iter().any(|p| lower.contains(p.as_str())) {
                debug!("Classifier matched {} rule", kind);
                return Classification::attack(kind.clone(), self.confidence);
            }
        }
        Classification::benign()
    }
}

// ============== Authorization ==============

/// Trait for credential checks
pub trait Authorizer: Send + Sync {
    fn authorize(&self, token: &str) -> bool;

    /// Authorize an optional token; a missing token is rejected
    fn check(&self, token: Option<&str>) -> bool {
        token.is_some_and(|t| self.authorize(t))
    }

    /// Like `check`, but as an `Unauthorized` error
    fn require(&self, token: Option<&str>, action: &str) -> Result<()> {
        if self.check(token) {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!("{} requires a valid token", action)))
        }
    }
}

/// Accepts a fixed set of tokens
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthorizer {
    tokens: HashSet<String>,
}

impl StaticTokenAuthorizer {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authorizer for StaticTokenAuthorizer {
    fn authorize(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }
}

/// Rejects every token
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllAuthorizer;

impl Authorizer for DenyAllAuthorizer {
    fn authorize(&self, _token: &str) -> bool {
        false
    }
}
