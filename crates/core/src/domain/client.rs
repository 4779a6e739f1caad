use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub aliases: Vec<String>,
}

impl Client {
    pub fn matches_hint(&self, hint: &str) -> bool {
        let hint = normalize_name(hint);
        if hint.is_empty() {
            return false;
        }
        normalize_name(&self.id) == hint
            || normalize_name(&self.name) == hint
            || self.aliases.iter().any(|alias| normalize_name(alias) == hint)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brand {
    pub id: String,
    pub client_id: String,
    pub name: String,
}

/// Lowercased, whitespace-collapsed form used for name and hint comparisons.
pub fn normalize_name(value: &str) -> String {
    value.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::{normalize_name, Client};

    #[test]
    fn client_matches_name_id_or_alias_ignoring_case_and_spacing() {
        let client = Client {
            id: "cl-acme".to_string(),
            name: "Acme  Outdoors".to_string(),
            aliases: vec!["acme".to_string()],
        };

        assert!(client.matches_hint("acme outdoors"));
        assert!(client.matches_hint("ACME"));
        assert!(client.matches_hint("cl-acme"));
        assert!(!client.matches_hint("acme gear"));
        assert!(!client.matches_hint("   "));
    }

    #[test]
    fn normalize_name_collapses_whitespace() {
        assert_eq!(normalize_name("  Big \t Brand "), "big brand");
    }
}
