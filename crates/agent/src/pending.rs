//! Continuation of a multi-turn task creation.
//!
//! The resolver is pure: it reads the pending state, the new text and the
//! brands already loaded for the client, and returns what should happen
//! next. It never calls the task service; execution is handed back to the
//! caller.

use chrono::{DateTime, Duration, Utc};

use taskpilot_core::domain::client::{normalize_name, Brand};
use taskpilot_core::domain::pending::{Awaiting, PendingTaskCreate, TaskDraft};
use taskpilot_core::domain::session::ContextPatch;

use crate::conversation::{is_cancel_text, KnownIntent};

const PROCEED_PHRASES: [&str; 16] = [
    "yes",
    "y",
    "yep",
    "yeah",
    "ok",
    "okay",
    "sure",
    "go",
    "go ahead",
    "proceed",
    "confirm",
    "create",
    "create it",
    "do it",
    "draft it",
    "looks good",
];

const IDENTIFIER_PENDING_PHRASES: [&str; 10] = [
    "asin pending",
    "pending asin",
    "no asin",
    "asin later",
    "without asin",
    "without the asin",
    "skip asin",
    "asin tbd",
    "don't have the asin",
    "dont have the asin",
];

const PRODUCT_KEYWORDS: [&str; 12] = [
    "asin",
    "listing",
    "product",
    "sku",
    "variation",
    "bullet",
    "a+ content",
    "main image",
    "images",
    "title optimization",
    "backend keywords",
    "pdp",
];

pub const IDENTIFIER_PENDING_NOTE: &str =
    "ASIN: pending. The requester did not have the identifier yet; confirm it before starting.";

/// Classification of a reply while a confirmation is outstanding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationReply {
    Cancel,
    ProceedDraft,
    ProceedWithIdentifierPending,
    OffTopic,
    ProvideDetails,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResolverOutcome {
    /// Stay in, or move to, a state and ask the user something.
    Prompt { pending: PendingTaskCreate, message: String },
    Cancelled,
    Expired,
    /// The flow cannot continue; pending state is dropped.
    Failed { message: String },
    /// A higher-priority intent arrived; pending state is dropped and the
    /// caller handles the intent.
    Interrupt,
    /// The caller should enrich a draft and then execute.
    Draft { pending: PendingTaskCreate },
    /// The caller should create the task with this description.
    Execute { pending: PendingTaskCreate, description: String },
}

impl ResolverOutcome {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Prompt { .. } => "prompt",
            Self::Cancelled => "cancel",
            Self::Expired => "expired",
            Self::Failed { .. } => "failed",
            Self::Interrupt => "interrupt",
            Self::Draft { .. } => "draft",
            Self::Execute { .. } => "execute",
        }
    }

    /// Session update implied by the outcome.
    ///
    /// Drafting keeps the pending state until the caller knows whether
    /// enrichment raised open questions.
    pub fn context_patch(&self) -> ContextPatch {
        match self {
            Self::Prompt { pending, .. } | Self::Draft { pending } => {
                ContextPatch::pending(pending.clone())
            }
            Self::Cancelled
            | Self::Expired
            | Self::Failed { .. }
            | Self::Interrupt
            | Self::Execute { .. } => ContextPatch::clear_pending(),
        }
    }
}

pub struct ResolverInput<'a> {
    pub pending: &'a PendingTaskCreate,
    pub text: &'a str,
    pub intent: &'a KnownIntent,
    pub brands: &'a [Brand],
    pub now: DateTime<Utc>,
    pub timeout: Duration,
}

/// Intents that never interrupt a pending flow. A fresh create request is
/// not one of them: it replaces the held task instead of feeding it.
pub fn is_control_intent(intent: &KnownIntent) -> bool {
    matches!(intent, KnownIntent::Unknown | KnownIntent::Cancel)
}

pub fn resolve_pending(input: ResolverInput<'_>) -> ResolverOutcome {
    let text = input.text.trim();

    if is_cancel_text(text) || matches!(input.intent, KnownIntent::Cancel) {
        return ResolverOutcome::Cancelled;
    }
    if !is_control_intent(input.intent) {
        return ResolverOutcome::Interrupt;
    }
    if input.pending.awaiting.checks_timeout() && input.pending.is_expired(input.now, input.timeout)
    {
        return ResolverOutcome::Expired;
    }

    let pending = input.pending.clone();
    match pending.awaiting {
        Awaiting::Brand => resolve_brand(pending, text, input.brands),
        Awaiting::Title => resolve_title(pending, text, input.brands),
        Awaiting::ConfirmOrDetails => resolve_confirmation(pending, text, input.intent),
        Awaiting::AsinOrPending => resolve_identifier(pending, text),
    }
}

fn resolve_brand(mut pending: PendingTaskCreate, text: &str, brands: &[Brand]) -> ResolverOutcome {
    match match_brands(brands, text).as_slice() {
        [] => ResolverOutcome::Failed {
            message: format!(
                "I couldn't find a brand matching \"{text}\" for {}. Start the task again when you have the brand name.",
                pending.client_name
            ),
        },
        [brand] => {
            set_brand(&mut pending, brand);
            advance_after_scope(pending)
        }
        candidates => {
            pending.brand_hint = Some(text.to_string());
            let names = candidates.iter().map(|brand| brand.name.as_str()).collect::<Vec<_>>();
            ResolverOutcome::Prompt {
                message: format!("Which brand did you mean? {}", names.join(", ")),
                pending,
            }
        }
    }
}

fn resolve_title(mut pending: PendingTaskCreate, text: &str, brands: &[Brand]) -> ResolverOutcome {
    if text.is_empty() {
        return ResolverOutcome::Prompt {
            message: "What should the task be called?".to_string(),
            pending,
        };
    }

    pending.task_title = Some(text.to_string());
    if !pending.has_brand() {
        if let Some(hint) = pending.brand_hint.clone() {
            if let [brand] = match_brands(brands, &hint).as_slice() {
                set_brand(&mut pending, brand);
            }
        }
    }
    advance_after_scope(pending)
}

fn resolve_confirmation(
    mut pending: PendingTaskCreate,
    text: &str,
    intent: &KnownIntent,
) -> ResolverOutcome {
    let Some(title) = pending.task_title.clone() else {
        pending.awaiting = Awaiting::Title;
        return ResolverOutcome::Prompt {
            message: "What should the task be called?".to_string(),
            pending,
        };
    };

    match classify_confirmation(text, intent) {
        ConfirmationReply::Cancel => ResolverOutcome::Cancelled,
        ConfirmationReply::ProceedDraft => ResolverOutcome::Draft { pending },
        ConfirmationReply::ProceedWithIdentifierPending => {
            let description = with_note(&base_description(&pending), IDENTIFIER_PENDING_NOTE);
            ResolverOutcome::Execute { pending, description }
        }
        ConfirmationReply::OffTopic => ResolverOutcome::Prompt {
            message: format!(
                "I'm still holding *{title}* for {}. {}",
                pending.client_name,
                confirmation_hint()
            ),
            pending,
        },
        ConfirmationReply::ProvideDetails => {
            pending.details = Some(text.to_string());
            let scoped_text = format!("{title} {text}");
            if is_product_scoped(&scoped_text) && find_product_identifier(&scoped_text).is_none() {
                pending.awaiting = Awaiting::AsinOrPending;
                return ResolverOutcome::Prompt {
                    message: identifier_prompt(),
                    pending,
                };
            }
            let description = base_description(&pending);
            ResolverOutcome::Execute { pending, description }
        }
    }
}

fn resolve_identifier(pending: PendingTaskCreate, text: &str) -> ResolverOutcome {
    let normalized = normalize_name(text);
    if IDENTIFIER_PENDING_PHRASES.iter().any(|phrase| normalized.contains(phrase)) {
        let description = with_note(&base_description(&pending), IDENTIFIER_PENDING_NOTE);
        return ResolverOutcome::Execute { pending, description };
    }
    if let Some(asin) = find_product_identifier(text) {
        let description = with_note(&base_description(&pending), &format!("ASIN: {asin}"));
        return ResolverOutcome::Execute { pending, description };
    }

    ResolverOutcome::Prompt { message: identifier_prompt(), pending }
}

pub fn classify_confirmation(text: &str, intent: &KnownIntent) -> ConfirmationReply {
    let normalized = normalize_name(text);
    let normalized = normalized.trim_end_matches(['.', '!']);

    if is_cancel_text(text) || matches!(intent, KnownIntent::Cancel) {
        return ConfirmationReply::Cancel;
    }
    if PROCEED_PHRASES.contains(&normalized) {
        return ConfirmationReply::ProceedDraft;
    }
    if IDENTIFIER_PENDING_PHRASES.iter().any(|phrase| normalized.contains(phrase)) {
        return ConfirmationReply::ProceedWithIdentifierPending;
    }
    if normalized.is_empty() || normalized.ends_with('?') {
        return ConfirmationReply::OffTopic;
    }
    ConfirmationReply::ProvideDetails
}

/// Finds an Amazon-style product identifier: `B0` followed by eight
/// alphanumerics, returned uppercased.
pub fn find_product_identifier(text: &str) -> Option<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .find(|token| {
            token.len() == 10
                && token[..2].eq_ignore_ascii_case("b0")
                && token.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_ascii_uppercase)
}

pub fn is_product_scoped(text: &str) -> bool {
    let normalized = normalize_name(text);
    PRODUCT_KEYWORDS.iter().any(|keyword| normalized.contains(keyword))
}

/// Prompt shown when the flow reaches the confirmation stage.
pub fn confirmation_prompt(pending: &PendingTaskCreate) -> String {
    let title = pending.task_title.as_deref().unwrap_or("this task");
    let scope = match pending.brand_name.as_deref() {
        Some(brand) => format!("{} / {brand}", pending.client_name),
        None => pending.client_name.clone(),
    };
    format!("Ready to create *{title}* for {scope}. {}", confirmation_hint())
}

fn confirmation_hint() -> &'static str {
    "Reply *yes* to draft and create it, send more details, or say *cancel*."
}

fn identifier_prompt() -> String {
    "This looks product-specific. Reply with the ASIN, or say *asin pending* to create it without one."
        .to_string()
}

fn advance_after_scope(mut pending: PendingTaskCreate) -> ResolverOutcome {
    if pending.task_title.is_none() {
        pending.awaiting = Awaiting::Title;
        let message = match pending.brand_name.as_deref() {
            Some(brand) => format!("Got it, {brand}. What should the task be called?"),
            None => "What should the task be called?".to_string(),
        };
        return ResolverOutcome::Prompt { pending, message };
    }

    pending.awaiting = Awaiting::ConfirmOrDetails;
    ResolverOutcome::Prompt { message: confirmation_prompt(&pending), pending }
}

fn set_brand(pending: &mut PendingTaskCreate, brand: &Brand) {
    pending.brand_id = Some(brand.id.clone());
    pending.brand_name = Some(brand.name.clone());
    pending.brand_hint = None;
}

/// Exact name matches win; otherwise every brand whose name contains the
/// hint is a candidate.
pub fn match_brands<'a>(brands: &'a [Brand], hint: &str) -> Vec<&'a Brand> {
    let hint = normalize_name(hint);
    if hint.is_empty() {
        return Vec::new();
    }
    let exact = brands
        .iter()
        .filter(|brand| normalize_name(&brand.name) == hint || brand.id == hint)
        .collect::<Vec<_>>();
    if !exact.is_empty() {
        return exact;
    }
    brands.iter().filter(|brand| normalize_name(&brand.name).contains(&hint)).collect()
}

/// Opens a new flow for a resolved client.
///
/// A brand hint must match exactly one brand to be applied. Without a hint,
/// a client with several brands is asked which one; a single brand is
/// applied directly.
pub fn start_pending(
    mut pending: PendingTaskCreate,
    brands: &[Brand],
    brand_hint: Option<&str>,
) -> ResolverOutcome {
    match brand_hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        Some(hint) => match match_brands(brands, hint).as_slice() {
            [] => {
                return ResolverOutcome::Failed {
                    message: format!(
                        "I couldn't find a brand matching \"{hint}\" for {}.",
                        pending.client_name
                    ),
                }
            }
            [brand] => set_brand(&mut pending, brand),
            candidates => {
                pending.awaiting = Awaiting::Brand;
                pending.brand_hint = Some(hint.to_string());
                let names = candidates.iter().map(|brand| brand.name.as_str()).collect::<Vec<_>>();
                return ResolverOutcome::Prompt {
                    message: format!("Which brand did you mean? {}", names.join(", ")),
                    pending,
                };
            }
        },
        None => match brands {
            [] => {}
            [brand] => set_brand(&mut pending, brand),
            _ => {
                pending.awaiting = Awaiting::Brand;
                let names = brands.iter().map(|brand| brand.name.as_str()).collect::<Vec<_>>();
                return ResolverOutcome::Prompt {
                    message: format!(
                        "Which brand is this for? {} has {}.",
                        pending.client_name,
                        names.join(", ")
                    ),
                    pending,
                };
            }
        },
    }

    advance_after_scope(pending)
}

/// Folds an enrichment draft into the flow: open questions move to the
/// identifier stage, otherwise the task is ready to create.
pub fn apply_draft(mut pending: PendingTaskCreate, draft: TaskDraft) -> ResolverOutcome {
    let questions = draft.open_questions.clone();
    pending.draft = Some(draft);
    if !questions.is_empty() {
        pending.awaiting = Awaiting::AsinOrPending;
        let listed = questions.iter().map(|q| format!("- {q}")).collect::<Vec<_>>().join("\n");
        return ResolverOutcome::Prompt {
            message: format!("{listed}\n{}", identifier_prompt()),
            pending,
        };
    }

    let description = base_description(&pending);
    ResolverOutcome::Execute { pending, description }
}

fn base_description(pending: &PendingTaskCreate) -> String {
    let draft = pending.draft.as_ref().map(|draft| draft.description.trim()).unwrap_or("");
    let details = pending.details.as_deref().map(str::trim).unwrap_or("");
    match (draft.is_empty(), details.is_empty()) {
        (false, false) => format!("{draft}\n\nRequester notes:\n{details}"),
        (false, true) => draft.to_string(),
        (true, _) => details.to_string(),
    }
}

fn with_note(description: &str, note: &str) -> String {
    if description.is_empty() {
        note.to_string()
    } else {
        format!("{description}\n\n{note}")
    }
}
