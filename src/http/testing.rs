//! In-memory transport used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::stream;

use crate::error::LLMError;

use super::{HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};

/// One scripted reaction of [`ScriptedTransport`].
pub(crate) enum Step {
    Respond {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        chunks: Vec<Vec<u8>>,
    },
    Fail(LLMError),
    Hang,
}

impl Step {
    pub(crate) fn status(status: u16) -> Self {
        Step::Respond {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub(crate) fn body(status: u16, body: &str) -> Self {
        Step::Respond {
            status,
            headers: Vec::new(),
            chunks: vec![body.as_bytes().to_vec()],
        }
    }

    pub(crate) fn chunks(status: u16, chunks: &[&str]) -> Self {
        Step::Respond {
            status,
            headers: Vec::new(),
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
        }
    }

    pub(crate) fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        if let Step::Respond { headers, .. } = &mut self {
            headers.push((name, value));
        }
        self
    }
}

/// Replays a fixed script, then falls back to the generator given to `always`.
pub(crate) struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    repeat: Mutex<Option<Box<dyn Fn() -> Step + Send>>>,
    attempts: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
    closed: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            repeat: Mutex::new(None),
            attempts: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        }
    }

    /// Script that answers every request with the step built by `make`.
    pub(crate) fn always(make: impl Fn() -> Step + Send + 'static) -> Self {
        let transport = Self::new(Vec::new());
        *transport.repeat.lock().expect("repeat lock") = Some(Box::new(make));
        transport
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    async fn next(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests lock").push(request);
        let step = {
            let scripted = self.steps.lock().expect("steps lock").pop_front();
            match scripted {
                Some(step) => step,
                None => match self.repeat.lock().expect("repeat lock").as_ref() {
                    Some(make) => make(),
                    None => panic!("transport script exhausted"),
                },
            }
        };
        match step {
            Step::Respond {
                status,
                headers,
                chunks,
            } => {
                let headers: HashMap<String, String> = headers
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                let body: HttpBodyStream =
                    Box::pin(stream::iter(chunks.into_iter().map(Ok::<_, LLMError>)));
                Ok(HttpStreamResponse {
                    status,
                    headers,
                    body,
                })
            }
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        self.next(request).await?.into_buffered().await
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        self.next(request).await
    }

    fn close_idle_connections(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
