//! Resilient transport and streaming core for multi-vendor LLM clients.
//!
//! - [`executor`]: retrying, cancellable request execution with jittered backoff.
//! - [`classify`] and [`error`]: one error taxonomy for every vendor.
//! - [`stream`]: SSE / NDJSON bodies normalized into `Start`, `Delta`, `End` | `Error`.
//! - [`sigv4`]: AWS Signature Version 4 signing for Bedrock.
//!
//! [`provider`] holds the adapters built on these pieces and [`client`] routes calls to
//! them by handle.

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod provider;
pub mod sigv4;
pub mod stream;
pub mod types;

pub use classify::{classify, classify_response};
pub use client::LLMClient;
pub use error::{ErrorKind, LLMError};
pub use executor::{RequestExecutor, RetryPolicy};
pub use provider::{DynProvider, LLMProvider};
pub use sigv4::{SigningContext, sign};
pub use stream::{Event, EventStream, normalize};
pub use types::*;
