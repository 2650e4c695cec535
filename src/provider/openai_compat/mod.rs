//! Adapter for OpenAI chat-completions compatible endpoints.

mod provider;
mod request;
mod types;

pub use provider::{DEFAULT_BASE_URL, OpenAiCompatProvider};
