use std::sync::Arc;

use crate::config::TITLE_MAX_CHARS;
use crate::providers::{AiProvider, ChatMessage, ChatRequest};

const SENTENCE_BREAKS: [&str; 3] = [". ", "? ", "! "];
// A word cut this early would leave a title of one or two words.
const MIN_WORD_CUT_CHARS: usize = 10;

/// Derive a title locally from the opening message.
///
/// Short messages are used as is. Longer ones are cut at the first sentence
/// break inside the limit, else at the last word boundary, else hard.
pub fn generate_basic_title(message: &str) -> String {
    if message.chars().count() <= TITLE_MAX_CHARS {
        return message.to_string();
    }

    for brk in SENTENCE_BREAKS {
        if let Some(byte_idx) = message.find(brk) {
            let char_idx = message[..byte_idx].chars().count();
            if char_idx > 0 && char_idx < TITLE_MAX_CHARS {
                // Keep the punctuation, drop the space.
                return message[..byte_idx + 1].to_string();
            }
        }
    }

    let truncated: String = message.chars().take(TITLE_MAX_CHARS).collect();
    match truncated.rfind(' ') {
        Some(space) if truncated[..space].chars().count() > MIN_WORD_CUT_CHARS => {
            format!("{}...", &truncated[..space])
        }
        _ => format!("{}...", truncated),
    }
}

fn title_prompt(message: &str) -> String {
    format!(
        "Generate a very short, concise title (max 4-5 words) for a chat that starts with this message: \"{}\". \
         The title should be catchy and descriptive of the main topic. \
         Return ONLY the title text, nothing else.",
        message
    )
}

/// Tidy a model-produced title. `None` when nothing usable is left.
fn clean_generated_title(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix(['"', '\''])
        .unwrap_or(trimmed);
    let trimmed = trimmed
        .strip_suffix(['"', '\''])
        .unwrap_or(trimmed)
        .trim();

    if trimmed.is_empty() {
        return None;
    }

    if trimmed.chars().count() > TITLE_MAX_CHARS {
        let cut: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        return Some(format!("{}...", cut));
    }
    Some(trimmed.to_string())
}

#[derive(Clone, Default)]
pub struct TitleGenerator {
    backend: Option<Arc<dyn AiProvider>>,
}

impl TitleGenerator {
    pub fn new(backend: Option<Arc<dyn AiProvider>>) -> Self {
        Self { backend }
    }

    pub fn local_only() -> Self {
        Self { backend: None }
    }

    /// Never fails: any backend problem degrades to `generate_basic_title`.
    pub async fn generate_title(&self, message: &str) -> String {
        let backend = match self.backend.as_ref().filter(|b| b.is_available()) {
            Some(backend) => backend,
            None => {
                tracing::debug!("No title backend configured, using local title");
                return generate_basic_title(message);
            }
        };

        let request = ChatRequest {
            max_tokens: Some(24),
            ..ChatRequest::new(vec![ChatMessage::user(title_prompt(message))])
        };

        match backend.send_message(request).await {
            Ok(response) => match clean_generated_title(&response.content) {
                Some(title) => {
                    tracing::debug!("Generated title: {}", title);
                    title
                }
                None => generate_basic_title(message),
            },
            Err(e) => {
                tracing::warn!("Title generation failed, using local title: {}", e);
                generate_basic_title(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderId;
    use crate::providers::router::testing::ScriptedProvider;
    use crate::providers::ProviderError;

    #[test]
    fn test_short_message_unchanged() {
        assert_eq!(generate_basic_title("This is a short message"), "This is a short message");
        let exactly_thirty = "a".repeat(30);
        assert_eq!(generate_basic_title(&exactly_thirty), exactly_thirty);
    }

    #[test]
    fn test_long_message_cut_at_word() {
        let message = "This is a very long opening message that exceeds thirty characters";
        let title = generate_basic_title(message);
        assert_eq!(title, "This is a very long opening...");
        assert!(title.chars().count() <= 33);
    }

    #[test]
    fn test_sentence_break_preferred() {
        let title =
            generate_basic_title("Hi there. I need help planning a trip to Japan next spring");
        assert_eq!(title, "Hi there.");
    }

    #[test]
    fn test_question_break() {
        let title = generate_basic_title("What is Rust? I keep hearing about it everywhere lately");
        assert_eq!(title, "What is Rust?");
    }

    #[test]
    fn test_break_beyond_limit_ignored() {
        let title =
            generate_basic_title("Please summarize the following article for me. It is long");
        assert_eq!(title, "Please summarize the...");
    }

    #[test]
    fn test_no_word_boundary_hard_truncates() {
        let title = generate_basic_title(&"x".repeat(45));
        assert_eq!(title, format!("{}...", "x".repeat(30)));
    }

    #[test]
    fn test_early_space_only_hard_truncates() {
        let message = format!("tiny {}", "y".repeat(40));
        let title = generate_basic_title(&message);
        assert_eq!(title.chars().count(), 33);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_multibyte_counts_chars() {
        let message = "Привет! Расскажи мне подробно о квантовых компьютерах";
        let title = generate_basic_title(message);
        assert_eq!(title, "Привет!");
    }

    #[test]
    fn test_clean_generated_title() {
        assert_eq!(
            clean_generated_title("\"Quantum Basics\"\n").as_deref(),
            Some("Quantum Basics")
        );
        assert_eq!(clean_generated_title("'Rust Ownership'").as_deref(), Some("Rust Ownership"));
        assert_eq!(clean_generated_title("  \"\" "), None);
        let long = clean_generated_title(&"word ".repeat(10)).unwrap();
        assert!(long.ends_with("..."));
        assert_eq!(long.chars().count(), 33);
    }

    #[tokio::test]
    async fn test_backend_title_used() {
        let backend = Arc::new(ScriptedProvider::replying(ProviderId::Gemini, "\"Quantum Leap\""));
        let generator = TitleGenerator::new(Some(backend.clone()));

        let title = generator.generate_title("Explain quantum computing").await;
        assert_eq!(title, "Quantum Leap");

        let requests = backend.requests.lock().unwrap();
        assert!(requests[0].messages[0].content.contains("Explain quantum computing"));
    }

    #[tokio::test]
    async fn test_backend_error_falls_back() {
        let backend = Arc::new(ScriptedProvider::replying(ProviderId::Gemini, "unused"));
        backend.push(Err(ProviderError::RateLimited {
            retry_after_secs: Some(3),
        }));
        let generator = TitleGenerator::new(Some(backend));

        let title = generator
            .generate_title("This is a very long opening message that exceeds thirty characters")
            .await;
        assert_eq!(title, "This is a very long opening...");
    }

    #[tokio::test]
    async fn test_blank_backend_title_falls_back() {
        let backend = Arc::new(ScriptedProvider::replying(ProviderId::Gemini, "   "));
        let generator = TitleGenerator::new(Some(backend));
        assert_eq!(generator.generate_title("Short one").await, "Short one");
    }

    #[tokio::test]
    async fn test_unavailable_backend_not_called() {
        let backend = Arc::new(ScriptedProvider::unavailable(ProviderId::Gemini));
        let generator = TitleGenerator::new(Some(backend.clone()));
        assert_eq!(generator.generate_title("Hello").await, "Hello");
        assert_eq!(backend.request_count(), 0);
    }
}
