pub mod limiter;
pub mod openai;
pub mod provider;
pub mod types;

pub use limiter::{throttle_embedder, throttle_llm, RateLimitedEmbedder, RateLimitedLlm};
pub use openai::OpenAiCompatible;
pub use provider::{Embedder, Llm};
pub use types::{ChatMessage, Completion, Embedding, FinishReason};
