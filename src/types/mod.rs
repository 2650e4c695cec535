//! Conversation, option and response records shared by every provider adapter.
//!
//! These are plain data: the core never enforces role ordering or alternation, and
//! adapters translate them into their vendor's wire schema.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default completion budget applied before any [`ChatOption`].
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default nucleus sampling mass.
pub const DEFAULT_TOP_P: f32 = 1.0;

/// Author of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a conversation.
///
/// # Examples
///
/// ```
/// use relaycore::types::{Message, Role};
///
/// let conversation = vec![Message::system("Be terse"), Message::user("Hello")];
/// assert_eq!(conversation[1].role, Role::User);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Token accounting reported by the vendor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Builds usage from the two counts, deriving the total.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Result of a non-streaming call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

/// Resolved call options.
///
/// Built from [`ChatOptions::default`] by applying an ordered list of [`ChatOption`]
/// overrides; see [`ChatOptions::resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            stop_sequences: Vec::new(),
            system_prompt: None,
            stream: false,
            metadata: HashMap::new(),
        }
    }
}

impl ChatOptions {
    /// Applies `options` in order over the defaults.
    ///
    /// Scalars follow last-applied-wins. Metadata entries insert or overwrite per key,
    /// and [`ChatOption::StopSequences`] replaces the whole list.
    ///
    /// # Examples
    ///
    /// ```
    /// use relaycore::types::{ChatOption, ChatOptions};
    ///
    /// let options = ChatOptions::resolve(&[
    ///     ChatOption::Model("gpt-4".into()),
    ///     ChatOption::MaxTokens(2048),
    ///     ChatOption::Model("gpt-4o".into()),
    /// ]);
    /// assert_eq!(options.model, "gpt-4o");
    /// assert_eq!(options.max_tokens, 2048);
    /// assert_eq!(options.temperature, 0.7);
    /// ```
    pub fn resolve(options: &[ChatOption]) -> Self {
        let mut resolved = Self::default();
        for option in options {
            option.apply(&mut resolved);
        }
        resolved
    }

    /// Same as [`ChatOptions::resolve`] with `stream` forced on.
    pub fn resolve_stream(options: &[ChatOption]) -> Self {
        let mut resolved = Self::resolve(options);
        resolved.stream = true;
        resolved
    }
}

/// A single override applied by [`ChatOptions::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOption {
    Model(String),
    MaxTokens(u32),
    Temperature(f32),
    TopP(f32),
    StopSequences(Vec<String>),
    SystemPrompt(String),
    Stream(bool),
    Metadata(String, String),
}

impl ChatOption {
    pub fn metadata(key: impl Into<String>, value: impl Into<String>) -> Self {
        ChatOption::Metadata(key.into(), value.into())
    }

    pub fn stop_sequences<I, S>(sequences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ChatOption::StopSequences(sequences.into_iter().map(Into::into).collect())
    }

    fn apply(&self, options: &mut ChatOptions) {
        match self {
            ChatOption::Model(model) => options.model = model.clone(),
            ChatOption::MaxTokens(max_tokens) => options.max_tokens = *max_tokens,
            ChatOption::Temperature(temperature) => options.temperature = *temperature,
            ChatOption::TopP(top_p) => options.top_p = *top_p,
            ChatOption::StopSequences(sequences) => options.stop_sequences = sequences.clone(),
            ChatOption::SystemPrompt(prompt) => options.system_prompt = Some(prompt.clone()),
            ChatOption::Stream(stream) => options.stream = *stream,
            ChatOption::Metadata(key, value) => {
                options.metadata.insert(key.clone(), value.clone());
            }
        }
    }
}
