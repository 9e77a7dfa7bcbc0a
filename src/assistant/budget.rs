//! Context-window budget for the outgoing user message.
//!
//! Token counts are estimated at four characters per token. The message is
//! clipped from the end so the front of the document survives.

use crate::config::ServiceConfig;

/// Marker appended to a clipped message.
pub const TRUNCATION_MARKER: &str = "\n\n[...truncated to fit context window...]\n";

const CHARS_PER_TOKEN: usize = 4;
const LARGE_CONTEXT_WINDOW: usize = 128_000;
const DEFAULT_CONTEXT_WINDOW: usize = 32_000;

/// Rough token estimate: 0 for empty text, otherwise `max(1, chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        0
    } else {
        (chars / CHARS_PER_TOKEN).max(1)
    }
}

/// Context window for a model name; unknown families get the smaller window.
pub fn context_window(model: &str) -> usize {
    let model = model.to_ascii_lowercase();
    if model.contains("gpt-5") || model.contains("gpt-4") {
        LARGE_CONTEXT_WINDOW
    } else {
        DEFAULT_CONTEXT_WINDOW
    }
}

/// Budget knobs, copied out of the service configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub completion_tokens: usize,
    pub safety_tokens: usize,
    pub trim_margin_tokens: usize,
    pub min_input_tokens: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

impl From<&ServiceConfig> for ContextBudget {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            completion_tokens: config.completion_budget_tokens,
            safety_tokens: config.input_safety_tokens,
            trim_margin_tokens: config.trim_margin_tokens,
            min_input_tokens: config.min_input_tokens,
        }
    }
}

impl ContextBudget {
    /// Input tokens the model accepts after reserving completion and safety
    /// headroom, never below the configured floor.
    pub fn allowed_input_tokens(&self, model: &str) -> usize {
        context_window(model)
            .saturating_sub(self.completion_tokens)
            .saturating_sub(self.safety_tokens)
            .max(self.min_input_tokens)
    }

    /// Tokens available to the user message once the trim margin is taken off.
    pub fn max_message_tokens(&self, model: &str) -> usize {
        self.allowed_input_tokens(model)
            .saturating_sub(self.trim_margin_tokens)
    }

    /// Clips `text` to the model's message budget. Returns the text unchanged
    /// when it already fits.
    pub fn fit(&self, model: &str, text: String) -> String {
        clip_to_budget(text, self.max_message_tokens(model))
    }
}

/// Keeps the first `max_tokens * 4` characters and appends the truncation marker.
pub fn clip_to_budget(text: String, max_tokens: usize) -> String {
    if text.is_empty() {
        return text;
    }
    if max_tokens == 0 {
        return String::new();
    }
    if estimate_tokens(&text) <= max_tokens {
        return text;
    }

    let keep_chars = max_tokens * CHARS_PER_TOKEN;
    let mut clipped: String = text.chars().take(keep_chars).collect();
    clipped.push_str(TRUNCATION_MARKER);
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_quarter_of_chars_with_floor() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(4001)), 1000);
    }

    #[test]
    fn context_window_by_model_family() {
        assert_eq!(context_window("gpt-4o"), 128_000);
        assert_eq!(context_window("GPT-5-mini"), 128_000);
        assert_eq!(context_window("o3"), 32_000);
    }

    #[test]
    fn default_budget_for_large_models() {
        let budget = ContextBudget::default();
        assert_eq!(budget.allowed_input_tokens("gpt-4o"), 128_000 - 1024 - 512);
        assert_eq!(budget.max_message_tokens("gpt-4o"), 128_000 - 1024 - 512 - 512);
    }

    #[test]
    fn floor_applies_when_reservations_exceed_window() {
        let budget = ContextBudget {
            completion_tokens: 40_000,
            safety_tokens: 0,
            trim_margin_tokens: 100,
            min_input_tokens: 1024,
        };
        assert_eq!(budget.allowed_input_tokens("o3"), 1024);
        assert_eq!(budget.max_message_tokens("o3"), 924);
    }

    #[test]
    fn short_text_is_untouched() {
        let budget = ContextBudget::default();
        let text = "Excel Content from a.xlsx".to_string();
        assert_eq!(budget.fit("gpt-4o", text.clone()), text);
    }

    #[test]
    fn long_text_keeps_front_and_gets_marker() {
        let text = format!("{}{}", "a".repeat(40), "b".repeat(40));
        let clipped = clip_to_budget(text, 10);
        assert_eq!(clipped, format!("{}{}", "a".repeat(40), TRUNCATION_MARKER));
    }

    #[test]
    fn zero_budget_drops_everything() {
        assert_eq!(clip_to_budget("abcdefgh".into(), 0), "");
        assert_eq!(clip_to_budget(String::new(), 0), "");
    }

    #[test]
    fn clipping_respects_char_boundaries() {
        let text = "é".repeat(100);
        let clipped = clip_to_budget(text, 5);
        assert!(clipped.starts_with(&"é".repeat(20)));
        assert!(clipped.ends_with(TRUNCATION_MARKER));
    }
}
