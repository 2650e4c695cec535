//! Adapter for AWS Bedrock's converse API, authenticated with SigV4.

mod provider;
mod request;
mod types;

pub use provider::{BedrockProvider, SUPPORTED_MODELS, runtime_endpoint};
