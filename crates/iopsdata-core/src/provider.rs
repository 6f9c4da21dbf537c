/// LLM backend the chat service routes a question to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    Groq,
    OpenAI,
    Anthropic,
    Gemini,
    OpenRouter,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Groq => "groq",
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::OpenRouter => "openrouter",
            Provider::Ollama => "ollama",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Some(Provider::Groq),
            "openai" => Some(Provider::OpenAI),
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "gemini" => Some(Provider::Gemini),
            "openrouter" => Some(Provider::OpenRouter),
            "ollama" => Some(Provider::Ollama),
            _ => None,
        }
    }

    pub fn all() -> Vec<Provider> {
        vec![
            Provider::Groq,
            Provider::OpenAI,
            Provider::Anthropic,
            Provider::Gemini,
            Provider::OpenRouter,
            Provider::Ollama,
        ]
    }

    /// Next provider in [`Provider::all`] order, wrapping around
    pub fn next(&self) -> Provider {
        let all = Self::all();
        let idx = all.iter().position(|p| p == self).unwrap_or(0);
        all[(idx + 1) % all.len()]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Groq => "Groq",
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Claude (Anthropic)",
            Provider::Gemini => "Gemini (Google)",
            Provider::OpenRouter => "OpenRouter",
            Provider::Ollama => "Ollama (Local)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_ids() {
        for provider in Provider::all() {
            assert_eq!(Provider::from_str(provider.as_str()), Some(provider));
        }
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!(Provider::from_str(" Claude "), Some(Provider::Anthropic));
        assert_eq!(Provider::from_str("bard"), None);
    }

    #[test]
    fn test_next_wraps() {
        assert_eq!(Provider::Groq.next(), Provider::OpenAI);
        assert_eq!(Provider::Ollama.next(), Provider::Groq);
    }
}
