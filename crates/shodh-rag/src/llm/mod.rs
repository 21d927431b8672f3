//! External LLM provider abstraction (C6): a closed set of HTTP-backed
//! chat providers behind one narrow trait. See `provider` for the trait
//! and concrete variants.

pub mod provider;

pub use provider::{
    provider_for_id, AnthropicProvider, ChatMessage, OllamaProvider, OpenAiCompatibleKind,
    OpenAiCompatibleProvider, PerplexityProvider, Provider,
};
