//! Tiered evidence retrieval.
//!
//! Tiers are searched in fixed priority order. A tier that fails is logged and
//! counted as a miss so one broken source never aborts the cascade. After the
//! cascade the admitted sources are capped by a hard character budget.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::client::normalize_name;
use crate::domain::knowledge::{
    EvidenceTier, InternalDocument, RetrievalQuery, RetrievalResult, RetrievedSource, SopDocument,
};
use crate::ports::{KnowledgeBase, StoreError, TaskHistory};

pub const SOP_CATEGORY_CONFIDENCE: f64 = 0.9;
pub const SOP_ALIAS_CONFIDENCE: f64 = 0.7;
pub const INTERNAL_CONFIDENCE: f64 = 0.5;
pub const SIMILAR_TASK_CONFIDENCE: f64 = 0.4;
pub const INTERNAL_MAX_RESULTS: usize = 2;
pub const INTERNAL_PREVIEW_CHARS: usize = 500;
pub const SIMILAR_TASK_LIMIT: usize = 5;
const MIN_KEYWORD_CHARS: usize = 3;

#[derive(Clone)]
pub struct TieredRetriever {
    knowledge: Arc<dyn KnowledgeBase>,
    history: Arc<dyn TaskHistory>,
}

impl TieredRetriever {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>, history: Arc<dyn TaskHistory>) -> Self {
        Self { knowledge, history }
    }

    pub async fn retrieve(&self, query: &RetrievalQuery) -> RetrievalResult {
        let mut tiers_searched = Vec::new();
        let mut tiers_hit = Vec::new();
        let mut sources = Vec::new();

        tiers_searched.push(EvidenceTier::Sop);
        let sop = tier_or_miss(EvidenceTier::Sop, self.search_sop(query).await);
        let sop_hit = !sop.is_empty();
        if sop_hit {
            tiers_hit.push(EvidenceTier::Sop);
        }
        sources.extend(sop);

        if !sop_hit {
            tiers_searched.push(EvidenceTier::Internal);
            let internal = tier_or_miss(EvidenceTier::Internal, self.search_internal(query).await);
            if !internal.is_empty() {
                tiers_hit.push(EvidenceTier::Internal);
            }
            sources.extend(internal);
        }

        tiers_searched.push(EvidenceTier::SimilarTask);
        let similar =
            tier_or_miss(EvidenceTier::SimilarTask, self.search_similar_tasks(query).await);
        if !similar.is_empty() {
            tiers_hit.push(EvidenceTier::SimilarTask);
        }
        sources.extend(similar);

        // External evidence is not wired up yet; the tier is searched and always misses.
        tiers_searched.push(EvidenceTier::External);

        let mut result = apply_budget(sources, query.max_chars);
        result.tiers_searched = tiers_searched;
        result.tiers_hit = tiers_hit;
        debug!(
            event_name = "knowledge.retrieval.completed",
            sources = result.sources.len(),
            total_chars = result.total_chars,
            overall_confidence = result.overall_confidence,
            "tiered retrieval finished"
        );
        result
    }

    async fn search_sop(&self, query: &RetrievalQuery) -> Result<Vec<RetrievedSource>, StoreError> {
        let normalized_query = normalize_phrase(&query.text);

        if let Some(hint) = query.category_hint.as_deref() {
            if let Some(document) = self.knowledge.find_sop_by_category(hint).await? {
                return Ok(vec![sop_source(document, SOP_CATEGORY_CONFIDENCE, "category")]);
            }
        }

        let documents = self.knowledge.list_sop_documents().await?;
        let hint = query.category_hint.as_deref().map(normalize_phrase);

        if hint.is_none() {
            if let Some(document) = documents
                .iter()
                .find(|document| contains_phrase(&normalized_query, &document.category))
            {
                return Ok(vec![sop_source(document.clone(), SOP_CATEGORY_CONFIDENCE, "category")]);
            }
        }

        let alias_match = documents.into_iter().find(|document| {
            document.aliases.iter().any(|alias| {
                let alias = normalize_phrase(alias);
                !alias.is_empty()
                    && (hint.as_deref() == Some(alias.as_str())
                        || contains_phrase(&normalized_query, &alias))
            })
        });
        Ok(alias_match
            .map(|document| vec![sop_source(document, SOP_ALIAS_CONFIDENCE, "alias")])
            .unwrap_or_default())
    }

    async fn search_internal(
        &self,
        query: &RetrievalQuery,
    ) -> Result<Vec<RetrievedSource>, StoreError> {
        let keywords = keywords(&query.text);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored = self
            .knowledge
            .list_internal_documents()
            .await?
            .into_iter()
            .filter_map(|document| {
                let score = keyword_score(&document, &keywords);
                (score > 0).then_some((score, document))
            })
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| right.0.cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(INTERNAL_MAX_RESULTS)
            .map(|(score, document)| RetrievedSource {
                tier: EvidenceTier::Internal,
                source_id: document.id,
                title: document.title,
                content: document.content,
                confidence: INTERNAL_CONFIDENCE,
                meta: BTreeMap::from([("keyword_hits".to_string(), score.to_string())]),
            })
            .collect())
    }

    async fn search_similar_tasks(
        &self,
        query: &RetrievalQuery,
    ) -> Result<Vec<RetrievedSource>, StoreError> {
        let (Some(client_id), Some(skill_id)) = (&query.client_id, &query.skill_id) else {
            return Ok(Vec::new());
        };

        let completed = self.history.recent_completed(client_id, skill_id, SIMILAR_TASK_LIMIT).await?;
        if completed.is_empty() {
            return Ok(Vec::new());
        }

        let content = completed
            .iter()
            .map(|task| {
                format!(
                    "- {} ({}, created {})",
                    task.title,
                    task.external_ref,
                    task.completed_at.format("%Y-%m-%d")
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(vec![RetrievedSource {
            tier: EvidenceTier::SimilarTask,
            source_id: format!("similar:{client_id}:{skill_id}"),
            title: "Recent similar tasks".to_string(),
            content,
            confidence: SIMILAR_TASK_CONFIDENCE,
            meta: BTreeMap::from([("task_count".to_string(), completed.len().to_string())]),
        }])
    }
}

fn tier_or_miss(
    tier: EvidenceTier,
    outcome: Result<Vec<RetrievedSource>, StoreError>,
) -> Vec<RetrievedSource> {
    outcome.unwrap_or_else(|error| {
        warn!(
            event_name = "knowledge.tier.failed",
            tier = tier.as_str(),
            error = %error,
            "retrieval tier failed; treating as no hit"
        );
        Vec::new()
    })
}

/// Sorts by confidence and admits sources until `max_chars` is spent. The
/// first source that does not fit is cut to the remaining budget and nothing
/// after it is admitted.
pub fn apply_budget(mut sources: Vec<RetrievedSource>, max_chars: usize) -> RetrievalResult {
    sources.sort_by(|left, right| right.confidence.total_cmp(&left.confidence));

    let mut remaining = max_chars;
    let mut admitted = Vec::new();
    for mut source in sources {
        if remaining == 0 {
            break;
        }
        let length = source.char_len();
        if length <= remaining {
            remaining -= length;
            admitted.push(source);
            continue;
        }
        source.content = source.content.chars().take(remaining).collect();
        source.meta.insert("truncated".to_string(), "true".to_string());
        admitted.push(source);
        break;
    }

    let total_chars = admitted.iter().map(RetrievedSource::char_len).sum();
    let overall_confidence =
        admitted.iter().map(|source| source.confidence).fold(0.0_f64, f64::max);

    RetrievalResult {
        sources: admitted,
        overall_confidence,
        total_chars,
        tiers_searched: Vec::new(),
        tiers_hit: Vec::new(),
    }
}

fn sop_source(document: SopDocument, confidence: f64, matched_by: &str) -> RetrievedSource {
    RetrievedSource {
        tier: EvidenceTier::Sop,
        source_id: document.id,
        title: document.title,
        content: document.content,
        confidence,
        meta: BTreeMap::from([
            ("category".to_string(), document.category),
            ("matched_by".to_string(), matched_by.to_string()),
        ]),
    }
}

/// Lowercase words with punctuation treated as separators.
fn normalize_phrase(text: &str) -> String {
    let cleaned = text
        .chars()
        .map(|ch| if ch.is_alphanumeric() || ch == '+' { ch } else { ' ' })
        .collect::<String>();
    normalize_name(&cleaned)
}

fn contains_phrase(normalized_haystack: &str, phrase: &str) -> bool {
    let phrase = normalize_phrase(phrase);
    if phrase.is_empty() {
        return false;
    }
    format!(" {normalized_haystack} ").contains(&format!(" {phrase} "))
}

fn keywords(text: &str) -> Vec<String> {
    let mut keywords = Vec::new();
    for word in normalize_phrase(text).split(' ') {
        if word.chars().count() >= MIN_KEYWORD_CHARS && !keywords.iter().any(|seen| seen == word) {
            keywords.push(word.to_string());
        }
    }
    keywords
}

fn keyword_score(document: &InternalDocument, keywords: &[String]) -> usize {
    let preview = document.content.chars().take(INTERNAL_PREVIEW_CHARS).collect::<String>();
    let haystack = format!("{} {}", document.title, preview).to_lowercase();
    keywords.iter().filter(|keyword| haystack.contains(keyword.as_str())).count()
}
