//! Ollama engine backend.
//!
//! Talks to a local Ollama server. Loading preloads the weights with an
//! empty-prompt request; generation streams a raw (already templated)
//! prompt as NDJSON; dropping the model asks the server to evict it
//! with `keep_alive: 0`.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{InferenceBackend, InferenceContext, LoadedModel, SamplingParams};
use crate::error::{BackendError, Error, Result};
use crate::runtime::{FinishReason, TokenSink};

/// Default Ollama host.
pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// How long the server keeps weights resident between requests.
const KEEP_ALIVE: &str = "30m";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    raw: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
    keep_alive: KeepAlive<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum KeepAlive<'a> {
    Duration(&'a str),
    Evict(u8),
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for a local Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    host: String,
}

impl OllamaBackend {
    /// Creates a client for `host` (e.g. `http://localhost:11434`).
    ///
    /// `timeout` bounds connection setup and each read; whole-operation
    /// bounds are enforced by the runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client cannot be built.
    pub fn new(host: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
        })
    }

    /// Returns the server base URL.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }
}

fn generate_url(host: &str) -> String {
    format!("{host}/api/generate")
}

fn map_request_error(host: &str, err: &reqwest::Error) -> BackendError {
    if err.is_connect() {
        BackendError::Unavailable(format!(
            "cannot connect to Ollama at {host}; is `ollama serve` running?"
        ))
    } else if err.is_timeout() {
        BackendError::Unavailable(format!("Ollama at {host} did not respond in time"))
    } else {
        BackendError::Engine(err.to_string())
    }
}

async fn check_status(
    response: reqwest::Response,
    model_id: &str,
) -> std::result::Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(BackendError::ModelNotFound(format!(
            "{model_id} (try: ollama pull {model_id})"
        )));
    }
    Err(classify_engine_message(&format!("status {status}: {body}")))
}

fn classify_engine_message(message: &str) -> BackendError {
    let lower = message.to_lowercase();
    if lower.contains("out of memory") || lower.contains("insufficient memory") {
        BackendError::Exhausted(message.to_string())
    } else {
        BackendError::Engine(message.to_string())
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn load_model(
        &self,
        model_id: &str,
    ) -> std::result::Result<Box<dyn LoadedModel>, BackendError> {
        let request = GenerateRequest {
            model: model_id,
            prompt: "",
            stream: false,
            raw: false,
            options: None,
            keep_alive: KeepAlive::Duration(KEEP_ALIVE),
        };

        let response = self
            .client
            .post(generate_url(&self.host))
            .json(&request)
            .send()
            .await
            .map_err(|e| map_request_error(&self.host, &e))?;
        check_status(response, model_id).await?;

        debug!(model = model_id, host = %self.host, "ollama model resident");
        Ok(Box::new(OllamaModel {
            client: self.client.clone(),
            host: self.host.clone(),
            model_id: model_id.to_string(),
        }))
    }
}

struct OllamaModel {
    client: reqwest::Client,
    host: String,
    model_id: String,
}

#[async_trait]
impl LoadedModel for OllamaModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn new_context(&self) -> std::result::Result<Box<dyn InferenceContext>, BackendError> {
        // Raw-mode requests carry no server-side conversation state, so a
        // context is just the request target.
        Ok(Box::new(OllamaContext {
            client: self.client.clone(),
            host: self.host.clone(),
            model_id: self.model_id.clone(),
        }))
    }
}

impl Drop for OllamaModel {
    fn drop(&mut self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let url = generate_url(&self.host);
        let model_id = std::mem::take(&mut self.model_id);
        handle.spawn(async move {
            let request = GenerateRequest {
                model: &model_id,
                prompt: "",
                stream: false,
                raw: false,
                options: None,
                keep_alive: KeepAlive::Evict(0),
            };
            if let Err(e) = client.post(url).json(&request).send().await {
                warn!(model = %model_id, error = %e, "failed to evict ollama model");
            }
        });
    }
}

struct OllamaContext {
    client: reqwest::Client,
    host: String,
    model_id: String,
}

#[async_trait]
impl InferenceContext for OllamaContext {
    async fn generate(
        &mut self,
        prompt: &str,
        sampling: &SamplingParams,
        sink: &mut TokenSink,
    ) -> std::result::Result<FinishReason, BackendError> {
        let request = GenerateRequest {
            model: &self.model_id,
            prompt,
            stream: true,
            raw: true,
            options: Some(GenerateOptions {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
                num_predict: sampling.max_tokens,
            }),
            keep_alive: KeepAlive::Duration(KEEP_ALIVE),
        };

        let response = self
            .client
            .post(generate_url(&self.host))
            .json(&request)
            .send()
            .await
            .map_err(|e| map_request_error(&self.host, &e))?;
        let response = check_status(response, &self.model_id).await?;

        let mut bytes = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let next = tokio::select! {
                () = sink.cancelled() => return Ok(FinishReason::Cancelled),
                next = bytes.next() => next,
            };
            let Some(part) = next else {
                break;
            };
            let part = part.map_err(|e| map_request_error(&self.host, &e))?;
            buf.extend_from_slice(&part);

            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if let Some(reason) = handle_line(&line, sink).await? {
                    return Ok(reason);
                }
            }
        }

        if !buf.is_empty()
            && let Some(reason) = handle_line(&buf, sink).await?
        {
            return Ok(reason);
        }

        Err(BackendError::Protocol(
            "stream ended without a done marker".to_string(),
        ))
    }
}

/// Handles one NDJSON line; returns the finish reason once the stream is over.
async fn handle_line(
    line: &[u8],
    sink: &mut TokenSink,
) -> std::result::Result<Option<FinishReason>, BackendError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let chunk: GenerateChunk =
        serde_json::from_str(text).map_err(|e| BackendError::Protocol(e.to_string()))?;

    if let Some(error) = chunk.error {
        return Err(classify_engine_message(&error));
    }
    if !sink.send(chunk.response).await {
        return Ok(Some(FinishReason::Cancelled));
    }
    if chunk.done {
        let reason = match chunk.done_reason.as_deref() {
            Some("length") => FinishReason::MaxTokens,
            Some("unload") => FinishReason::Cancelled,
            _ => FinishReason::EndOfOutput,
        };
        return Ok(Some(reason));
    }
    Ok(None)
}
