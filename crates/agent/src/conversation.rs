//! Deterministic intent classification for inbound chat text.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KnownIntent {
    CreateTask { title: Option<String>, client_hint: Option<String>, brand_hint: Option<String> },
    ListClients,
    ListBrands { client_hint: Option<String> },
    SwitchClient { client_hint: String },
    Help,
    Cancel,
    Unknown,
}

impl KnownIntent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateTask { .. } => "create_task",
            Self::ListClients => "list_clients",
            Self::ListBrands { .. } => "list_brands",
            Self::SwitchClient { .. } => "switch_client",
            Self::Help => "help",
            Self::Cancel => "cancel",
            Self::Unknown => "unknown",
        }
    }
}

const CANCEL_PHRASES: [&str; 9] = [
    "cancel",
    "cancel it",
    "cancel that",
    "stop",
    "abort",
    "nevermind",
    "never mind",
    "forget it",
    "nvm",
];

const CREATE_PREFIXES: [&str; 8] = [
    "create a task",
    "create task",
    "create a new task",
    "new task",
    "add a task",
    "add task",
    "make a task",
    "open a task",
];

const SWITCH_PREFIXES: [&str; 5] =
    ["switch client to", "switch to", "use client", "work on client", "change client to"];

#[derive(Clone, Debug, Default)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str) -> KnownIntent {
        let trimmed = text.trim();
        let normalized = normalize_text(trimmed);
        if normalized.is_empty() {
            return KnownIntent::Unknown;
        }

        if is_cancel_text(trimmed) {
            return KnownIntent::Cancel;
        }
        if matches!(normalized.as_str(), "help" | "?" | "what can you do" | "commands") {
            return KnownIntent::Help;
        }
        if let Some(rest) = strip_any_prefix(trimmed, &CREATE_PREFIXES) {
            return parse_create_task(rest);
        }
        if let Some(rest) = strip_any_prefix(trimmed, &SWITCH_PREFIXES) {
            let hint = clean_hint(rest);
            if !hint.is_empty() {
                return KnownIntent::SwitchClient { client_hint: hint };
            }
        }
        if mentions_listing(&normalized, "brands") {
            let client_hint = after_keyword(trimmed, " for ").map(clean_hint).filter(|h| !h.is_empty());
            return KnownIntent::ListBrands { client_hint };
        }
        if mentions_listing(&normalized, "clients") {
            return KnownIntent::ListClients;
        }

        KnownIntent::Unknown
    }
}

/// True when the whole message is a cancellation phrase.
pub fn is_cancel_text(text: &str) -> bool {
    let normalized = normalize_text(text);
    let normalized = normalized.trim_end_matches(['.', '!']);
    CANCEL_PHRASES.contains(&normalized)
}

/// Lowercases ASCII only so byte offsets stay aligned with the original text.
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase()
}

fn strip_any_prefix<'a>(text: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    let lowered = text.to_ascii_lowercase();
    prefixes.iter().find_map(|prefix| {
        let rest_start = prefix.len();
        let matches = lowered.starts_with(prefix)
            && lowered[rest_start..].chars().next().map_or(true, |next| !next.is_alphanumeric());
        matches.then(|| &text[rest_start..])
    })
}

fn after_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let lowered = text.to_ascii_lowercase();
    lowered.find(keyword).map(|index| &text[index + keyword.len()..])
}

fn clean_hint(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '?' | '.' | '!' | ':'))
        .trim()
        .to_string()
}

fn mentions_listing(normalized: &str, noun: &str) -> bool {
    let verbs = ["list", "show", "which", "what", "my", "all"];
    normalized.split(' ').any(|token| token.trim_matches(|c: char| !c.is_alphanumeric()) == noun)
        && verbs.iter().any(|verb| normalized.split(' ').any(|token| token == *verb))
}

/// Parses the remainder of a create-task request.
///
/// Accepted shapes: `for <client>[ / <brand>]: <title>`, `for <client>` and
/// a bare `<title>`.
fn parse_create_task(rest: &str) -> KnownIntent {
    let rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ':' || c == '-').trim();

    let (scope, title) = match rest.to_ascii_lowercase().strip_prefix("for ") {
        Some(_) => {
            let scoped = &rest[4..];
            match scoped.split_once(':') {
                Some((scope, title)) => (Some(scope), Some(title)),
                None => (Some(scoped), None),
            }
        }
        None => (None, Some(rest)),
    };

    let (client_hint, brand_hint) = match scope {
        Some(scope) => match scope.split_once('/') {
            Some((client, brand)) => (Some(clean_hint(client)), Some(clean_hint(brand))),
            None => (Some(clean_hint(scope)), None),
        },
        None => (None, None),
    };

    KnownIntent::CreateTask {
        title: title.map(str::trim).filter(|title| !title.is_empty()).map(str::to_string),
        client_hint: client_hint.filter(|hint| !hint.is_empty()),
        brand_hint: brand_hint.filter(|hint| !hint.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::{is_cancel_text, IntentClassifier, KnownIntent};

    #[test]
    fn parses_scoped_create_task_requests() {
        let classifier = IntentClassifier::new();

        assert_eq!(
            classifier.classify("Create task for Acme / Trailhead: Refresh main images"),
            KnownIntent::CreateTask {
                title: Some("Refresh main images".to_string()),
                client_hint: Some("Acme".to_string()),
                brand_hint: Some("Trailhead".to_string()),
            }
        );
        assert_eq!(
            classifier.classify("new task for Acme"),
            KnownIntent::CreateTask {
                title: None,
                client_hint: Some("Acme".to_string()),
                brand_hint: None,
            }
        );
        assert_eq!(
            classifier.classify("add a task: audit PPC spend"),
            KnownIntent::CreateTask {
                title: Some("audit PPC spend".to_string()),
                client_hint: None,
                brand_hint: None,
            }
        );
    }

    #[test]
    fn classifies_common_phrases() {
        let classifier = IntentClassifier::new();
        let cases = [
            ("cancel", "cancel"),
            ("Never mind!", "cancel"),
            ("help", "help"),
            ("list clients", "list_clients"),
            ("show me all clients", "list_clients"),
            ("which brands does Acme have", "list_brands"),
            ("list brands for Acme", "list_brands"),
            ("switch to Acme Outdoors", "switch_client"),
            ("use client zephyr", "switch_client"),
            ("create task", "create_task"),
            ("Create a task for Acme: new A+ content", "create_task"),
            ("createtask now", "unknown"),
            ("how is the weather", "unknown"),
            ("", "unknown"),
        ];

        for (index, (text, expected)) in cases.iter().enumerate() {
            assert_eq!(classifier.classify(text).name(), *expected, "case {index}: {text}");
        }
    }

    #[test]
    fn list_brands_extracts_client_hint() {
        let classifier = IntentClassifier::new();

        assert_eq!(
            classifier.classify("list brands for Acme Outdoors?"),
            KnownIntent::ListBrands { client_hint: Some("Acme Outdoors".to_string()) }
        );
        assert_eq!(classifier.classify("show brands"), KnownIntent::ListBrands { client_hint: None });
    }

    #[test]
    fn cancel_text_requires_whole_message() {
        assert!(is_cancel_text("  Cancel. "));
        assert!(!is_cancel_text("cancel the subscription audit"));
    }
}
