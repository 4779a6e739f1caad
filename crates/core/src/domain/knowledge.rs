use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CHARS: usize = 6_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceTier {
    Sop,
    Internal,
    SimilarTask,
    External,
}

impl EvidenceTier {
    pub const ALL: [Self; 4] = [Self::Sop, Self::Internal, Self::SimilarTask, Self::External];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sop => "sop",
            Self::Internal => "internal",
            Self::SimilarTask => "similar_task",
            Self::External => "external",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSource {
    pub tier: EvidenceTier,
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub confidence: f64,
    pub meta: BTreeMap<String, String>,
}

impl RetrievedSource {
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub sources: Vec<RetrievedSource>,
    pub overall_confidence: f64,
    pub total_chars: usize,
    pub tiers_searched: Vec<EvidenceTier>,
    pub tiers_hit: Vec<EvidenceTier>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn best(&self) -> Option<&RetrievedSource> {
        self.sources.first()
    }
}

/// What the caller is looking for. Hints are optional narrowing signals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetrievalQuery {
    pub text: String,
    pub category_hint: Option<String>,
    pub client_id: Option<String>,
    pub skill_id: Option<String>,
    pub max_chars: usize,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), max_chars: DEFAULT_MAX_CHARS, ..Self::default() }
    }
}

/// Canonical procedure document, matched by category or alias.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SopDocument {
    pub id: String,
    pub category: String,
    pub aliases: Vec<String>,
    pub title: String,
    pub content: String,
}

/// Secondary reference document, matched by keywords.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalDocument {
    pub id: String,
    pub title: String,
    pub content: String,
}
