use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::error::LLMError;
use crate::http::HttpBodyStream;

/// Wire-level delimiting rule of a streaming body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Server-Sent Events: blank-line separated events made of `data:` lines.
    Sse,
    /// One JSON document per line (NDJSON).
    Lines,
}

/// One delimited unit of a streaming body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// SSE `event:` name, when the server sent one.
    pub event: Option<String>,
    /// Joined `data:` payload for SSE, the whole line for [`Framing::Lines`].
    pub data: String,
}

impl Frame {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    /// `true` for the OpenAI-style `[DONE]` sentinel.
    pub fn is_done_sentinel(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Splits an [`HttpBodyStream`] into [`Frame`]s.
///
/// Bytes are buffered until a full line is available, so multi-byte characters split
/// across chunks decode correctly. Frames that are not valid UTF-8 are dropped. A read
/// error from the body is yielded once and ends the stream.
pub struct FrameDecoder {
    body: HttpBodyStream,
    framing: Framing,
    buffer: Vec<u8>,
    event_name: Option<String>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Frame>,
    stream_closed: bool,
    failed: bool,
}

impl FrameDecoder {
    pub fn new(body: HttpBodyStream, framing: Framing) -> Self {
        Self {
            body,
            framing,
            buffer: Vec::new(),
            event_name: None,
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            stream_closed: false,
            failed: false,
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        match self.framing {
            Framing::Lines => {
                if !line.iter().all(u8::is_ascii_whitespace) {
                    self.push_frame(None, line);
                }
            }
            Framing::Sse => {
                if line.is_empty() {
                    self.flush_event();
                } else if let Some(data) = line.strip_prefix(b"data:") {
                    self.data_lines.push(strip_leading_space(data).to_vec());
                } else if let Some(name) = line.strip_prefix(b"event:") {
                    self.event_name =
                        Some(String::from_utf8_lossy(strip_leading_space(name)).into_owned());
                }
                // `id:`, `retry:` and `:` comment lines carry nothing we need.
            }
        }
    }

    fn flush_event(&mut self) {
        let event = self.event_name.take();
        if self.data_lines.is_empty() {
            return;
        }
        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        if joined.is_empty() {
            return;
        }
        self.push_frame(event, joined);
    }

    fn push_frame(&mut self, event: Option<String>, bytes: Vec<u8>) {
        match String::from_utf8(bytes) {
            Ok(data) => self.pending.push_back(Frame { event, data }),
            Err(err) => tracing::debug!(error = %err, "skipping stream frame with invalid UTF-8"),
        }
    }

    fn finish(&mut self) {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = trim_line_ending(line);
            self.handle_line(line);
        }
        if self.framing == Framing::Sse {
            self.flush_event();
        }
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer
            .iter()
            .position(|b| *b == b'\n')
            .map(|pos| trim_line_ending(buffer.drain(..=pos).collect()))
    }
}

fn trim_line_ending(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line
}

fn strip_leading_space(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b" ").unwrap_or(bytes)
}

impl Stream for FrameDecoder {
    type Item = Result<Frame, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if this.stream_closed || this.failed {
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = Self::drain_line(&mut this.buffer) {
                        this.handle_line(line);
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.failed = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.stream_closed = true;
                    this.finish();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
