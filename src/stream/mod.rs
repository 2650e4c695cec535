//! Streaming normalization: vendor wire formats in, one [`Event`] sequence out.
//!
//! [`normalize`] spawns one background task per stream. The task emits
//! [`Event::Start`], then a [`Event::Delta`] per text fragment, then exactly one
//! terminal [`Event::End`] or [`Event::Error`], and then drops its sender so the
//! [`EventStream`] ends. This holds on every exit path: terminal signal, end of body,
//! read failure, vendor error, safety block and cancellation.

mod decode;
mod framing;
pub mod vendors;

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::classify::classify_vendor_error;
use crate::error::{CancelStage, LLMError};
use crate::http::HttpBodyStream;

pub use decode::{DecodeError, DecodeFn, Decoded, VendorDecoder};
pub use framing::{Frame, FrameDecoder, Framing};

/// The streaming unit delivered to callers.
#[derive(Debug)]
pub enum Event {
    /// Always the first event.
    Start,
    /// One text fragment, in arrival order.
    Delta(String),
    /// Successful end. `content` is the accumulated text when
    /// [`NormalizerConfig::emit_full_text`] is set; `done` is `false` when the body ended
    /// without the vendor's terminal signal.
    End { content: String, done: bool },
    /// Failed end: read error, vendor error, safety block or cancellation.
    Error(LLMError),
}

/// Discriminant of [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Delta,
    End,
    Error,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Start => EventKind::Start,
            Event::Delta(_) => EventKind::Delta,
            Event::End { .. } => EventKind::End,
            Event::Error(_) => EventKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::End { .. } | Event::Error(_))
    }

    /// Text carried by the event; empty for `Start` and `Error`.
    pub fn content(&self) -> &str {
        match self {
            Event::Delta(text) | Event::End { content: text, .. } => text,
            Event::Start | Event::Error(_) => "",
        }
    }

    pub fn error(&self) -> Option<&LLMError> {
        match self {
            Event::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Event::End { done: true, .. })
    }
}

/// Tuning knobs for [`normalize_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizerConfig {
    /// Events buffered ahead of a slow consumer before the task waits.
    pub channel_capacity: usize,
    /// Put the accumulated text on [`Event::End`].
    pub emit_full_text: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            emit_full_text: true,
        }
    }
}

/// Receiving half of a normalized stream.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::Receiver<Event>,
}

impl EventStream {
    /// Wraps a receiver fed by a custom producer.
    pub fn from_receiver(receiver: mpsc::Receiver<Event>) -> Self {
        Self { receiver }
    }

    /// Receives the next event; `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Drains the stream and returns the final text, or the terminal error.
    ///
    /// # Errors
    ///
    /// Returns the error carried by [`Event::Error`], or [`LLMError::Validation`] if the
    /// stream closed without a terminal event.
    pub async fn collect_text(mut self) -> Result<String, LLMError> {
        let mut text = String::new();
        while let Some(event) = self.receiver.recv().await {
            match event {
                Event::Start => {}
                Event::Delta(delta) => text.push_str(&delta),
                Event::End { content, .. } => {
                    return Ok(if content.is_empty() { text } else { content });
                }
                Event::Error(err) => return Err(err),
            }
        }
        Err(LLMError::Validation {
            message: "stream closed without a terminal event".into(),
        })
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

/// Normalizes `body` with the default [`NormalizerConfig`].
///
/// Must be called inside a Tokio runtime.
///
/// # Examples
///
/// ```
/// use futures_util::{StreamExt, stream};
/// use relaycore::error::LLMError;
/// use relaycore::http::HttpBodyStream;
/// use relaycore::stream::{Event, normalize, vendors};
/// use tokio_util::sync::CancellationToken;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let body: HttpBodyStream = Box::pin(stream::iter(vec![Ok::<_, LLMError>(
///     b"data: {\"text\":\"Hi\"}\n\ndata: [DONE]\n\n".to_vec(),
/// )]));
/// let events: Vec<Event> = normalize(CancellationToken::new(), body, vendors::plain_text())
///     .collect()
///     .await;
/// assert_eq!(events.len(), 3);
/// assert_eq!(events[2].content(), "Hi");
/// # });
/// ```
pub fn normalize(cancel: CancellationToken, body: HttpBodyStream, decoder: VendorDecoder) -> EventStream {
    normalize_with(cancel, body, decoder, NormalizerConfig::default())
}

/// Normalizes `body` on a background task and returns the receiving end.
pub fn normalize_with(
    cancel: CancellationToken,
    body: HttpBodyStream,
    decoder: VendorDecoder,
    config: NormalizerConfig,
) -> EventStream {
    let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
    let task = Normalizer {
        cancel,
        decoder,
        emit_full_text: config.emit_full_text,
        sender,
    };
    tokio::spawn(task.run(body));
    EventStream { receiver }
}

/// Consumer went away; nothing left to deliver to.
struct Disconnected;

struct Normalizer {
    cancel: CancellationToken,
    decoder: VendorDecoder,
    emit_full_text: bool,
    sender: mpsc::Sender<Event>,
}

impl Normalizer {
    async fn run(self, body: HttpBodyStream) {
        if self.sender.send(Event::Start).await.is_err() {
            return;
        }
        let terminal = match self.pump(body).await {
            Ok(terminal) => terminal,
            Err(Disconnected) => {
                tracing::debug!(provider = %self.decoder.provider(), "stream consumer dropped");
                return;
            }
        };
        // The sender drops on return, closing the stream after the terminal event.
        let _ = self.sender.send(terminal).await;
    }

    async fn pump(&self, body: HttpBodyStream) -> Result<Event, Disconnected> {
        let mut frames = FrameDecoder::new(body, self.decoder.framing());
        let mut text = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(self.cancelled()),
                _ = self.sender.closed() => return Err(Disconnected),
                next = frames.next() => next,
            };

            let frame = match next {
                None => return Ok(self.end(text, false)),
                Some(Err(err)) => {
                    tracing::warn!(provider = %self.decoder.provider(), error = %err, "stream read failed");
                    return Ok(Event::Error(err));
                }
                Some(Ok(frame)) => frame,
            };
            if frame.is_done_sentinel() {
                return Ok(self.end(text, true));
            }

            let decoded = match self.decoder.decode(&frame) {
                Ok(decoded) => decoded,
                Err(DecodeError::Malformed(reason)) => {
                    tracing::debug!(provider = %self.decoder.provider(), %reason, "skipping malformed frame");
                    continue;
                }
                Err(DecodeError::Vendor(body)) => {
                    tracing::warn!(provider = %self.decoder.provider(), message = %body.message, "vendor reported stream error");
                    return Ok(Event::Error(classify_vendor_error(
                        &body,
                        self.decoder.provider(),
                        self.decoder.model(),
                    )));
                }
            };

            for delta in decoded.deltas.into_iter().filter(|d| !d.is_empty()) {
                text.push_str(&delta);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(self.cancelled()),
                    sent = self.sender.send(Event::Delta(delta)) => sent.map_err(|_| Disconnected)?,
                }
            }
            if let Some(reason) = decoded.blocked {
                tracing::warn!(provider = %self.decoder.provider(), %reason, "content blocked by vendor");
                return Ok(Event::Error(LLMError::provider(
                    self.decoder.provider(),
                    Some(self.decoder.model().to_string()),
                    reason,
                )));
            }
            if decoded.terminal {
                return Ok(self.end(text, true));
            }
        }
    }

    fn end(&self, text: String, done: bool) -> Event {
        Event::End {
            content: if self.emit_full_text { text } else { String::new() },
            done,
        }
    }

    fn cancelled(&self) -> Event {
        Event::Error(LLMError::cancelled(CancelStage::Streaming))
    }
}
