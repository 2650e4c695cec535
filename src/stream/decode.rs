use std::fmt;
use std::sync::Arc;

use crate::classify::VendorErrorBody;

use super::framing::{Frame, Framing};

/// What a vendor decoder extracted from one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Text fragments in arrival order; empty fragments are ignored.
    pub deltas: Vec<String>,
    /// The vendor signalled the end of the message.
    pub terminal: bool,
    /// The vendor withheld content for safety reasons; the text is the block reason.
    pub blocked: Option<String>,
}

impl Decoded {
    /// A frame that carries nothing of interest (pings, metadata, role markers).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            deltas: vec![text.into()],
            ..Self::default()
        }
    }

    pub fn terminal() -> Self {
        Self {
            terminal: true,
            ..Self::default()
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            blocked: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_delta(mut self, text: impl Into<String>) -> Self {
        self.deltas.push(text.into());
        self
    }

    pub fn and_terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

/// Why a frame produced no [`Decoded`] value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame could not be parsed; it is skipped.
    Malformed(String),
    /// The vendor reported an error in-band; the stream ends with an error event.
    Vendor(VendorErrorBody),
}

impl DecodeError {
    pub fn malformed(err: impl fmt::Display) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

/// Frame-to-delta mapping supplied by a vendor adapter.
pub type DecodeFn = dyn Fn(&Frame) -> Result<Decoded, DecodeError> + Send + Sync;

/// Strategy value plugged into [`crate::stream::normalize`].
///
/// The decoder knows the vendor's framing and field names and nothing about
/// transport or retries. `provider` and `model` only label the errors the normalizer
/// raises on the vendor's behalf.
///
/// # Examples
///
/// ```
/// use relaycore::stream::{Decoded, DecodeError, Framing, VendorDecoder};
///
/// let decoder = VendorDecoder::new("echo", Framing::Lines, |frame| {
///     if frame.data == "bye" {
///         Ok(Decoded::terminal())
///     } else {
///         Ok(Decoded::delta(frame.data.clone()))
///     }
/// })
/// .with_model("echo-1");
/// assert_eq!(decoder.provider(), "echo");
/// assert_eq!(decoder.framing(), Framing::Lines);
/// ```
#[derive(Clone)]
pub struct VendorDecoder {
    provider: String,
    model: String,
    framing: Framing,
    decode: Arc<DecodeFn>,
}

impl VendorDecoder {
    pub fn new<F>(provider: impl Into<String>, framing: Framing, decode: F) -> Self
    where
        F: Fn(&Frame) -> Result<Decoded, DecodeError> + Send + Sync + 'static,
    {
        Self {
            provider: provider.into(),
            model: String::new(),
            framing,
            decode: Arc::new(decode),
        }
    }

    /// Relabels the decoder for a specific provider, e.g. `azure` reusing the OpenAI format.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn decode(&self, frame: &Frame) -> Result<Decoded, DecodeError> {
        (self.decode)(frame)
    }
}

impl fmt::Debug for VendorDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorDecoder")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}
