//! Bounded rolling history of chat exchanges.
//!
//! Everything here is a pure function over a list of exchanges so the same
//! input and limits always produce the same output.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_EXCHANGES: usize = 5;
pub const DEFAULT_MAX_TOKENS: usize = 1_500;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationExchange {
    pub user_text: String,
    pub assistant_text: String,
}

impl ConversationExchange {
    pub fn new(user_text: impl Into<String>, assistant_text: impl Into<String>) -> Self {
        Self { user_text: user_text.into(), assistant_text: assistant_text.into() }
    }

    pub fn estimated_tokens(&self) -> usize {
        text_tokens(&self.user_text) + text_tokens(&self.assistant_text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryLimits {
    pub max_count: usize,
    pub max_tokens: usize,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self { max_count: DEFAULT_MAX_EXCHANGES, max_tokens: DEFAULT_MAX_TOKENS }
    }
}

pub fn estimate_tokens(exchanges: &[ConversationExchange]) -> usize {
    exchanges.iter().map(ConversationExchange::estimated_tokens).sum()
}

/// Drops the oldest exchanges until both the count and token limits hold.
pub fn compact(
    exchanges: Vec<ConversationExchange>,
    limits: HistoryLimits,
) -> Vec<ConversationExchange> {
    let mut exchanges = exchanges;

    if exchanges.len() > limits.max_count {
        let excess = exchanges.len() - limits.max_count;
        exchanges.drain(..excess);
    }

    let mut total = estimate_tokens(&exchanges);
    let mut drop_count = 0;
    while total > limits.max_tokens && drop_count < exchanges.len() {
        total -= exchanges[drop_count].estimated_tokens();
        drop_count += 1;
    }
    exchanges.drain(..drop_count);

    exchanges
}

/// Appends one exchange and compacts the result.
pub fn push_exchange(
    history: &[ConversationExchange],
    exchange: ConversationExchange,
    limits: HistoryLimits,
) -> Vec<ConversationExchange> {
    let mut next = history.to_vec();
    next.push(exchange);
    compact(next, limits)
}

fn text_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::{compact, estimate_tokens, push_exchange, ConversationExchange, HistoryLimits};

    fn exchange(index: usize, len: usize) -> ConversationExchange {
        ConversationExchange::new(format!("{index}{}", "u".repeat(len)), "a".repeat(len))
    }

    #[test]
    fn empty_text_still_counts_one_token_per_side() {
        let exchanges = vec![ConversationExchange::new("", "")];
        assert_eq!(estimate_tokens(&exchanges), 2);
    }

    #[test]
    fn compact_keeps_most_recent_exchanges_by_count() {
        let exchanges = (0..8).map(|index| exchange(index, 4)).collect::<Vec<_>>();

        let compacted = compact(exchanges, HistoryLimits { max_count: 3, max_tokens: 1_500 });

        assert_eq!(compacted.len(), 3);
        assert!(compacted[0].user_text.starts_with('5'));
        assert!(compacted[2].user_text.starts_with('7'));
    }

    #[test]
    fn compact_drops_oldest_until_token_budget_fits() {
        let exchanges = vec![exchange(0, 400), exchange(1, 400), exchange(2, 40)];

        let compacted = compact(exchanges, HistoryLimits { max_count: 5, max_tokens: 250 });

        assert_eq!(compacted.len(), 2);
        assert!(compacted[0].user_text.starts_with('1'));
        assert!(estimate_tokens(&compacted) <= 250);
    }

    #[test]
    fn compact_holds_limits_for_many_inputs_including_zero_limits() {
        for count in 0..12 {
            for len in [0, 3, 17, 200, 2_000] {
                for (max_count, max_tokens) in [(0, 0), (1, 1), (5, 1_500), (3, 40), (10, 0)] {
                    let exchanges = (0..count).map(|index| exchange(index, len)).collect();
                    let limits = HistoryLimits { max_count, max_tokens };
                    let compacted = compact(exchanges, limits);
                    assert!(compacted.len() <= max_count);
                    assert!(estimate_tokens(&compacted) <= max_tokens);
                }
            }
        }
    }

    #[test]
    fn compact_is_deterministic() {
        let exchanges = (0..9).map(|index| exchange(index, index * 30)).collect::<Vec<_>>();
        let limits = HistoryLimits { max_count: 4, max_tokens: 200 };

        assert_eq!(compact(exchanges.clone(), limits), compact(exchanges, limits));
    }

    #[test]
    fn push_exchange_appends_then_compacts() {
        let history = (0..5).map(|index| exchange(index, 4)).collect::<Vec<_>>();

        let next = push_exchange(&history, exchange(9, 4), HistoryLimits::default());

        assert_eq!(next.len(), 5);
        assert!(next[4].user_text.starts_with('9'));
        assert!(next[0].user_text.starts_with('1'));
    }
}
