//! Draft enrichment: turns retrieved evidence into a task description.

use std::sync::Arc;

use tracing::info;

use taskpilot_core::domain::knowledge::{RetrievalQuery, RetrievalResult};
use taskpilot_core::domain::pending::TaskDraft;
use taskpilot_core::knowledge::TieredRetriever;

use crate::pending::{find_product_identifier, is_product_scoped};
use crate::tools::CREATE_TASK;

const MAX_CHECKLIST_ITEMS: usize = 8;
const FALLBACK_CHECKLIST_LINES: usize = 3;
pub const ASIN_QUESTION: &str = "Which ASIN does this task apply to?";

#[derive(Clone, Debug)]
pub struct DraftRequest<'a> {
    pub client_id: &'a str,
    pub client_name: &'a str,
    pub brand_name: Option<&'a str>,
    pub title: &'a str,
    pub details: Option<&'a str>,
}

#[derive(Clone)]
pub struct TaskDrafter {
    retriever: Arc<TieredRetriever>,
    max_chars: usize,
}

impl TaskDrafter {
    pub fn new(retriever: Arc<TieredRetriever>, max_chars: usize) -> Self {
        Self { retriever, max_chars }
    }

    pub async fn draft(&self, request: &DraftRequest<'_>, correlation_id: &str) -> TaskDraft {
        let query_text = match request.details {
            Some(details) => format!("{} {details}", request.title),
            None => request.title.to_string(),
        };
        let query = RetrievalQuery {
            client_id: Some(request.client_id.to_string()),
            skill_id: Some(CREATE_TASK.to_string()),
            max_chars: self.max_chars,
            ..RetrievalQuery::new(query_text)
        };

        let evidence = self.retriever.retrieve(&query).await;
        let draft = build_draft(request, &evidence);
        info!(
            event_name = "agent.draft.built",
            correlation_id,
            sources = evidence.sources.len(),
            confidence = draft.confidence,
            open_questions = draft.open_questions.len(),
            "task draft built"
        );
        draft
    }
}

/// Deterministic draft from a request and its retrieval result.
pub fn build_draft(request: &DraftRequest<'_>, evidence: &RetrievalResult) -> TaskDraft {
    let mut sections = Vec::new();

    let scope = match request.brand_name {
        Some(brand) => format!("{} / {brand}", request.client_name),
        None => request.client_name.to_string(),
    };
    sections.push(format!("Task: {}\nClient: {scope}", request.title));

    if let Some(details) = request.details.map(str::trim).filter(|details| !details.is_empty()) {
        sections.push(format!("Details:\n{details}"));
    }

    let checklist = evidence.best().map(|source| checklist_from(&source.content)).unwrap_or_default();
    if !checklist.is_empty() {
        let items = checklist.iter().map(|item| format!("- {item}")).collect::<Vec<_>>();
        sections.push(format!("Checklist:\n{}", items.join("\n")));
    }

    let references = evidence
        .sources
        .iter()
        .map(|source| format!("[{}] {}", source.tier.as_str(), source.title))
        .collect::<Vec<_>>();
    if !references.is_empty() {
        sections.push(format!("References:\n{}", references.join("\n")));
    }

    let mut open_questions = Vec::new();
    let scoped_text = format!("{} {}", request.title, request.details.unwrap_or(""));
    if is_product_scoped(&scoped_text) && find_product_identifier(&scoped_text).is_none() {
        open_questions.push(ASIN_QUESTION.to_string());
    }

    TaskDraft {
        description: sections.join("\n\n"),
        references,
        open_questions,
        confidence: evidence.overall_confidence,
    }
}

/// List items from the source, or its first lines when it has none.
fn checklist_from(content: &str) -> Vec<String> {
    let lines = content.lines().map(str::trim).filter(|line| !line.is_empty());

    let items = lines
        .clone()
        .filter_map(strip_list_marker)
        .take(MAX_CHECKLIST_ITEMS)
        .map(str::to_string)
        .collect::<Vec<_>>();
    if !items.is_empty() {
        return items;
    }

    lines.take(FALLBACK_CHECKLIST_LINES).map(str::to_string).collect()
}

fn strip_list_marker(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest.trim()).filter(|rest| !rest.is_empty());
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim()).filter(|rest| !rest.is_empty());
        }
    }
    None
}
