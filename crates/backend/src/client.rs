//! Generation backend contract and its HTTP implementation.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::credentials::Credential;
use crate::events::{parse_line, BackendEvent, JobSpec};

/// Errors from the generation backend transport.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The submission request itself failed (connect, TLS, non-2xx).
    #[error("Submission error: {0}")]
    Submit(String),

    /// The event stream broke mid-flight.
    #[error("Stream error: {0}")]
    Stream(String),
}

/// The incremental event stream returned by a submission.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<BackendEvent, BackendError>> + Send>>;

/// A backend that executes generation jobs and streams progress.
///
/// The runner depends only on this trait; tests substitute scripted
/// implementations.
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Submit a job under the leased credential and return its event
    /// stream. The stream ends when the backend finishes (with or
    /// without a `Done` marker) or errors.
    async fn submit(&self, credential: &Credential, spec: &JobSpec)
        -> Result<EventStream, BackendError>;
}

/// HTTP implementation speaking the upstream SSE-style protocol.
pub struct HttpGenerationBackend {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGenerationBackend {
    /// `base_url` is the upstream origin, e.g. `https://api.example.com`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait::async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn submit(
        &self,
        credential: &Credential,
        spec: &JobSpec,
    ) -> Result<EventStream, BackendError> {
        let url = format!("{}/v1/generations", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(credential.secret())
            .json(spec)
            .send()
            .await
            .map_err(|e| BackendError::Submit(format!("Request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Submit(format!(
                "Upstream returned {status}: {body}"
            )));
        }

        tracing::debug!(model = %spec.model, "Generation stream opened");
        Ok(line_events(response.bytes_stream()))
    }
}

/// Split a byte stream into lines and decode each into a
/// [`BackendEvent`], skipping lines that decode to nothing.
fn line_events(
    bytes: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> EventStream {
    struct State<S> {
        inner: S,
        // Raw bytes until a full line arrives; a multi-byte character
        // may span chunk boundaries.
        buf: Vec<u8>,
        pending: VecDeque<String>,
        done: bool,
    }

    let state = State {
        inner: Box::pin(bytes),
        buf: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            while let Some(line) = st.pending.pop_front() {
                if let Some(event) = parse_line(&line) {
                    return Some((Ok(event), st));
                }
            }
            if st.done {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    st.buf.extend_from_slice(&chunk);
                    while let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = st.buf.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw).trim().to_string();
                        if !line.is_empty() {
                            st.pending.push_back(line);
                        }
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(BackendError::Stream(e.to_string())), st));
                }
                None => {
                    st.done = true;
                    let tail = String::from_utf8_lossy(&st.buf).trim().to_string();
                    st.buf.clear();
                    if !tail.is_empty() {
                        st.pending.push_back(tail);
                    }
                }
            }
        }
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
