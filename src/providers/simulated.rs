use crate::models::{ids, AiResponse, ProviderId, Usage};
use crate::providers::fallback::estimate_tokens;

const NORMAL_RESPONSES: &[&str] = &[
    "I'm here to help! What would you like to know?",
    "That's an interesting point. Could you tell me more?",
    "I understand what you're saying. Let me help you with that.",
    "Thanks for sharing. Is there anything specific you'd like to explore?",
    "I'm processing your message. What aspects would you like me to focus on?",
];

const MATH_EXAMPLES: &[&str] = &[
    "$E = mc^2$ - Einstein's famous equation",
    "The quadratic formula: $x = \\frac{-b \\pm \\sqrt{b^2 - 4ac}}{2a}$",
    "$$\\begin{bmatrix} a & b \\\\ c & d \\end{bmatrix}$$ - A 2x2 matrix",
    "The integral: $$\\int_{0}^{\\infty} e^{-x^2} dx = \\frac{\\sqrt{\\pi}}{2}$$",
    "$e^{i\\pi} + 1 = 0$ - Euler's identity",
];

const LONG_RESPONSES: &[&str] = &[
    "The concept of artificial intelligence has evolved significantly over the decades. From early rule-based systems to modern deep learning approaches, AI has transformed how we interact with technology. Neural networks, inspired by the human brain, have enabled breakthroughs in image recognition, natural language processing, and decision-making systems.",
    "React Native has revolutionized mobile app development by allowing developers to build cross-platform applications using JavaScript. Unlike traditional approaches that required separate codebases for iOS and Android, React Native enables sharing of logic and UI components across platforms. The framework leverages native components under the hood, resulting in performance comparable to fully native apps.",
    "The history of computing spans centuries, from mechanical calculators to modern quantum computers. Charles Babbage's Analytical Engine in the 19th century laid the theoretical groundwork for programmable computers. The mid-20th century saw the development of ENIAC, one of the first general-purpose electronic computers. The invention of the transistor in 1947 led to smaller, more reliable computers.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePool {
    Normal,
    Math,
    Long,
}

impl ResponsePool {
    pub fn for_prompt(text: &str) -> Self {
        let lowered = text.trim().to_lowercase();
        if lowered == "math" {
            ResponsePool::Math
        } else if lowered.contains("long") {
            ResponsePool::Long
        } else {
            ResponsePool::Normal
        }
    }

    fn entries(&self) -> &'static [&'static str] {
        match self {
            ResponsePool::Normal => NORMAL_RESPONSES,
            ResponsePool::Math => MATH_EXAMPLES,
            ResponsePool::Long => LONG_RESPONSES,
        }
    }
}

/// Canned replies for demo/offline mode. Each pool cycles on its own.
#[derive(Debug, Default)]
pub struct SimulatedResponder {
    normal: usize,
    math: usize,
    long: usize,
}

impl SimulatedResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&mut self, prompt: &str) -> AiResponse {
        let pool = ResponsePool::for_prompt(prompt);
        let cursor = match pool {
            ResponsePool::Normal => &mut self.normal,
            ResponsePool::Math => &mut self.math,
            ResponsePool::Long => &mut self.long,
        };
        let entries = pool.entries();
        let content = entries[*cursor % entries.len()].to_string();
        *cursor = (*cursor + 1) % entries.len();

        AiResponse {
            id: ids::new_response_id("simulated"),
            provider: ProviderId::Simulated.as_str().to_string(),
            model: "simulated".to_string(),
            usage: Usage::new(
                estimate_tokens(prompt.chars().count()),
                estimate_tokens(content.chars().count()),
            ),
            content,
        }
    }
}
