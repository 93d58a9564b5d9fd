use crate::config::Config;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("failed to parse response line {line:?}: {source}")]
    Parse {
        line: String,
        source: serde_json::Error,
    },

    #[error("model server reported an error: {0}")]
    Server(String),

    #[error("response line exceeded {limit} bytes without a newline")]
    LineTooLong { limit: usize },
}

/// Upper bound on one buffered NDJSON line.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Parses one NDJSON line of a `/api/generate` stream. Blank lines yield
/// `Ok(None)`.
pub fn parse_line(line: &[u8]) -> Result<Option<String>, InferenceError> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let parsed: GenerateLine =
        serde_json::from_slice(line).map_err(|source| InferenceError::Parse {
            line: String::from_utf8_lossy(line).trim().to_string(),
            source,
        })?;

    if let Some(message) = parsed.error {
        return Err(InferenceError::Server(message));
    }
    if parsed.done {
        debug!("generation reported done");
    }

    Ok(Some(parsed.response.unwrap_or_default()))
}

/// Lazily yields the `response` fragments of one streaming generation.
///
/// Ends when the server closes the connection. After an error nothing more
/// is yielded.
pub struct FragmentStream {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    pending: Vec<u8>,
    body_closed: bool,
    failed: bool,
}

impl FragmentStream {
    fn new(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> Self {
        Self {
            body,
            pending: Vec::new(),
            body_closed: false,
            failed: false,
        }
    }

    fn fail(&mut self, error: InferenceError) -> Option<Result<String, InferenceError>> {
        self.failed = true;
        Some(Err(error))
    }

    pub async fn next_fragment(&mut self) -> Option<Result<String, InferenceError>> {
        if self.failed {
            return None;
        }

        loop {
            if let Some(line_end) = self.pending.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=line_end).collect();
                match parse_line(&line) {
                    Ok(Some(fragment)) => return Some(Ok(fragment)),
                    Ok(None) => continue,
                    Err(err) => return self.fail(err),
                }
            }

            if self.pending.len() > MAX_LINE_BYTES {
                warn!(buffered = self.pending.len(), "response line too long");
                return self.fail(InferenceError::LineTooLong {
                    limit: MAX_LINE_BYTES,
                });
            }

            if self.body_closed {
                if self.pending.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut self.pending);
                return match parse_line(&line) {
                    Ok(Some(fragment)) => Some(Ok(fragment)),
                    Ok(None) => None,
                    Err(err) => self.fail(err),
                };
            }

            match self.body.next().await {
                Some(Ok(chunk)) => self.pending.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    warn!(error = %err, "response body read failed");
                    return self.fail(InferenceError::Transport(err));
                }
                None => self.body_closed = true,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<String, InferenceError>> + Send {
        stream::unfold(self, |mut fragments| async move {
            fragments
                .next_fragment()
                .await
                .map(|item| (item, fragments))
        })
    }
}

#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &Config) -> Result<Self, InferenceError> {
        // No overall timeout: a generation may stream for minutes.
        let http = Client::builder()
            .no_proxy()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            url: config.generate_url(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, InferenceError> {
        debug!(url = %self.url, model = %self.model, prompt_len = prompt.len(), "generate_stream");
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        };

        let response = self.http.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(FragmentStream::new(body))
    }
}
