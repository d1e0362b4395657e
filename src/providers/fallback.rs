use crate::models::{ids, AiResponse, ProviderId, Role, Usage};
use crate::providers::types::ChatMessage;

const FALLBACK_RESPONSES: &[&str] = &[
    "I'm here to help! What would you like to know?",
    "That's an interesting question. Let me think about that...",
    "I understand what you're saying. Here's what I think about it...",
    "Thanks for sharing. Based on what you've told me, I would suggest...",
    "I've analyzed your message and here's my response...",
];

const FALLBACK_MODEL: &str = "fallback-model";

/// Offline reply generator. The same last user message always selects the
/// same reply.
pub struct FallbackResponder;

impl FallbackResponder {
    pub fn respond(history: &[ChatMessage]) -> AiResponse {
        let index = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.chars().last())
            // Keyed on the final UTF-16 code unit, so astral characters use their low surrogate.
            .and_then(|c| c.encode_utf16(&mut [0; 2]).last().copied())
            .map(|unit| unit as usize % FALLBACK_RESPONSES.len())
            .unwrap_or(0);

        let content = FALLBACK_RESPONSES[index].to_string();
        let history_chars: usize = history.iter().map(|m| m.content.chars().count()).sum();

        AiResponse {
            id: ids::new_response_id("fallback"),
            provider: ProviderId::LocalFallback.as_str().to_string(),
            model: FALLBACK_MODEL.to_string(),
            usage: Usage::new(
                estimate_tokens(history_chars),
                estimate_tokens(content.chars().count()),
            ),
            content,
        }
    }
}

/// Rough four-characters-per-token estimate.
pub fn estimate_tokens(chars: usize) -> i64 {
    chars.div_ceil(4) as i64
}
