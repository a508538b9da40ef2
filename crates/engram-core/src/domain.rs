//! Semantic domains and the static isolation table
//!
//! Domains gate cross-referencing between unrelated or sensitive categories.
//! Credentials only ever match Credentials.

use serde::{Deserialize, Serialize};

/// Semantic category of a node or a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    Identity,
    Possessions,
    Relationships,
    Preferences,
    Work,
    Temporal,
    Credentials,
    General,
}

/// Keyword table for domain inference. Credentials is listed first so that a
/// query mentioning a secret is never classified as something broader.
const KEYWORDS: &[(Domain, &[&str])] = &[
    (
        Domain::Credentials,
        &[
            "password", "passcode", "passphrase", "pin code", "api key", "apikey", "token",
            "secret", "ssn", "social security", "credential", "credentials", "login",
        ],
    ),
    (
        Domain::Identity,
        &["name", "called", "identity", "pronoun", "pronouns", "age", "nationality", "born"],
    ),
    (
        Domain::Relationships,
        &[
            "wife", "husband", "partner", "friend", "friends", "mother", "father", "mom", "dad",
            "sister", "brother", "son", "daughter", "family", "girlfriend", "boyfriend",
        ],
    ),
    (
        Domain::Preferences,
        &[
            "like", "likes", "love", "loves", "prefer", "prefers", "favorite", "favourite",
            "hate", "hates", "enjoy", "enjoys",
        ],
    ),
    (
        Domain::Possessions,
        &["own", "owns", "bought", "car", "house", "phone", "laptop", "pet", "dog", "cat", "bike"],
    ),
    (
        Domain::Work,
        &[
            "job", "work", "works", "office", "boss", "colleague", "project", "company",
            "employer", "meeting", "career", "salary",
        ],
    ),
    (
        Domain::Temporal,
        &[
            "yesterday", "tomorrow", "today", "tonight", "schedule", "date", "birthday",
            "anniversary", "week", "month", "year", "deadline", "when",
        ],
    ),
];

impl Domain {
    /// All domains, in discriminant order
    pub const ALL: [Domain; 8] = [
        Domain::Identity,
        Domain::Possessions,
        Domain::Relationships,
        Domain::Preferences,
        Domain::Work,
        Domain::Temporal,
        Domain::Credentials,
        Domain::General,
    ];

    /// Persisted discriminant
    pub fn as_u8(self) -> u8 {
        match self {
            Domain::Identity => 0,
            Domain::Possessions => 1,
            Domain::Relationships => 2,
            Domain::Preferences => 3,
            Domain::Work => 4,
            Domain::Temporal => 5,
            Domain::Credentials => 6,
            Domain::General => 7,
        }
    }

    /// Decode a persisted discriminant
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Whether nodes of `self` may be returned for queries in `other`.
    ///
    /// The table is symmetric. Credentials is compatible with itself only,
    /// General with everything else.
    pub fn is_compatible(self, other: Domain) -> bool {
        use Domain::*;

        if self == other {
            return true;
        }
        if self == Credentials || other == Credentials {
            return false;
        }
        if self == General || other == General {
            return true;
        }

        matches!(
            (self, other),
            (Identity, Relationships)
                | (Relationships, Identity)
                | (Identity, Preferences)
                | (Preferences, Identity)
                | (Possessions, Preferences)
                | (Preferences, Possessions)
                | (Relationships, Temporal)
                | (Temporal, Relationships)
                | (Work, Temporal)
                | (Temporal, Work)
        )
    }

    /// Infer a domain from free text or a fact label.
    ///
    /// Keywords are matched on word boundaries after lower-casing and
    /// replacing punctuation and underscores with spaces. The domain with the
    /// most hits wins; ties go to the earlier table entry. No hits → General.
    pub fn infer(text: &str) -> Domain {
        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();
        let padded = format!(" {} ", normalized.split_whitespace().collect::<Vec<_>>().join(" "));

        if KEYWORDS[0]
            .1
            .iter()
            .any(|kw| padded.contains(&format!(" {} ", kw)))
        {
            return Domain::Credentials;
        }

        let mut best = (Domain::General, 0usize);
        for (domain, words) in KEYWORDS.iter().skip(1) {
            let hits = words
                .iter()
                .filter(|kw| padded.contains(&format!(" {} ", kw)))
                .count();
            if hits > best.1 {
                best = (*domain, hits);
            }
        }
        best.0
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Domain::Identity => "identity",
            Domain::Possessions => "possessions",
            Domain::Relationships => "relationships",
            Domain::Preferences => "preferences",
            Domain::Work => "work",
            Domain::Temporal => "temporal",
            Domain::Credentials => "credentials",
            Domain::General => "general",
        };
        write!(f, "{}", name)
    }
}
