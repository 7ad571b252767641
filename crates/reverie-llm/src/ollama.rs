//! Ollama-backed [`TextGenerator`].
//!
//! Talks to a local Ollama instance over its `/api/generate` endpoint.
//! Non-streaming calls read one JSON body; streaming calls parse the NDJSON
//! reply line by line and yield each line's `response` fragment.
//!
//! The client is an explicitly-constructed handle. The composition root
//! builds one at startup and threads it through the orchestrator — nothing
//! here is process-global.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, instrument};

use reverie_core::text::preview;

use crate::generator::{FragmentStream, GenerateError, GenerateRequest, TextGenerator};

/// Default Ollama endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Generous request timeout — model generation can take minutes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Max bytes of an error body carried into an [`GenerateError::Api`].
const ERROR_BODY_PREVIEW: usize = 512;

/// One line of an Ollama reply, streaming or not.
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

/// Client for a single Ollama instance.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client for `base_url` (or [`DEFAULT_BASE_URL`]).
    pub fn new(base_url: Option<String>) -> Result<Self, GenerateError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a client reusing an existing `reqwest::Client`.
    #[must_use]
    pub fn with_client(base_url: Option<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn request_body(req: &GenerateRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": req.model,
            "prompt": req.prompt,
            "stream": stream,
            "options": { "temperature": req.temperature },
        });
        if let Some(system) = &req.system {
            body["system"] = json!(system);
        }
        body
    }

    async fn send(
        &self,
        req: &GenerateRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GenerateError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(&Self::request_body(req, stream))
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %preview(&body, ERROR_BODY_PREVIEW), "ollama api error");
            return Err(GenerateError::Api {
                status: status.as_u16(),
                message: preview(&body, ERROR_BODY_PREVIEW).into_owned(),
            });
        }
        Ok(response)
    }
}

/// reqwest timeouts get their own variant; everything else stays transport.
fn map_transport(err: reqwest::Error) -> GenerateError {
    if err.is_timeout() {
        GenerateError::Timeout
    } else {
        GenerateError::Http(err)
    }
}

/// Split complete NDJSON lines off the front of `buffer`.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        let _ = line.pop(); // the newline
        if line.last() == Some(&b'\r') {
            let _ = line.pop();
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

fn parse_chunk(line: &[u8]) -> Result<GenerateChunk, GenerateError> {
    serde_json::from_slice(line).map_err(|e| {
        GenerateError::Malformed(format!(
            "bad ndjson line: {e} ({})",
            preview(&String::from_utf8_lossy(line), 120)
        ))
    })
}

#[async_trait]
impl TextGenerator for OllamaClient {
    #[instrument(skip_all, fields(model = %req.model))]
    async fn generate(&self, req: &GenerateRequest) -> Result<String, GenerateError> {
        debug!(prompt_bytes = req.prompt.len(), "ollama generate");
        let response = self.send(req, false).await?;
        let chunk: GenerateChunk = response.json().await.map_err(map_transport)?;
        Ok(chunk.response)
    }

    #[instrument(skip_all, fields(model = %req.model))]
    async fn generate_stream(
        &self,
        req: &GenerateRequest,
    ) -> Result<FragmentStream, GenerateError> {
        debug!(prompt_bytes = req.prompt.len(), "ollama generate (streaming)");
        let response = self.send(req, true).await?;
        let mut bytes = response.bytes_stream();

        Ok(Box::pin(async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk: Bytes = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(map_transport(e));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);
                for line in drain_lines(&mut buffer) {
                    match parse_chunk(&line) {
                        Ok(parsed) => {
                            if !parsed.response.is_empty() {
                                yield Ok(parsed.response);
                            }
                            if parsed.done {
                                return;
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            // Stream ended without `done: true`; a trailing unterminated
            // line still counts if it parses.
            if !buffer.is_empty() {
                match parse_chunk(&buffer) {
                    Ok(parsed) if !parsed.response.is_empty() => yield Ok(parsed.response),
                    Ok(_) => {}
                    Err(e) => yield Err(e),
                }
            }
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> OllamaClient {
        OllamaClient::new(Some(server.uri())).unwrap()
    }

    // ── generate ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn generate_returns_response_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "qwen2.5:7b",
                "prompt": "hello",
                "stream": false,
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "world", "done": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let text = client
            .generate(&GenerateRequest::new("qwen2.5:7b", "hello"))
            .await
            .unwrap();
        assert_eq!(text, "world");
    }

    #[tokio::test]
    async fn generate_sends_system_when_present() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"system": "be brief"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "ok", "done": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let text = client
            .generate(&GenerateRequest::new("m", "p").with_system("be brief"))
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn generate_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .generate(&GenerateRequest::new("m", "p"))
            .await
            .unwrap_err();
        match err {
            GenerateError::Api { status, message } => {
                assert_eq!(status, 500);
                assert!(message.contains("model not loaded"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    // ── generate_stream ──────────────────────────────────────────────────

    #[tokio::test]
    async fn stream_yields_fragments_in_order() {
        let server = MockServer::start().await;
        let ndjson = concat!(
            "{\"response\": \"fly\", \"done\": false}\n",
            "{\"response\": \"ing\", \"done\": false}\n",
            "{\"response\": \"\", \"done\": true}\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut stream = client
            .generate_stream(&GenerateRequest::new("m", "p"))
            .await
            .unwrap();

        let mut fragments = Vec::new();
        while let Some(item) = stream.next().await {
            fragments.push(item.unwrap());
        }
        assert_eq!(fragments, vec!["fly", "ing"]);
    }

    #[tokio::test]
    async fn stream_surfaces_malformed_lines() {
        let server = MockServer::start().await;
        let ndjson = "{\"response\": \"ok\", \"done\": false}\nnot json at all\n";
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut stream = client
            .generate_stream(&GenerateRequest::new("m", "p"))
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "ok");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, GenerateError::Malformed(_)));
        assert!(stream.next().await.is_none());
    }

    // ── line framing ─────────────────────────────────────────────────────

    #[test]
    fn drain_lines_handles_partial_tail() {
        let mut buffer = b"{\"a\":1}\n{\"b\":".to_vec();
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec![b"{\"a\":1}".to_vec()]);
        assert_eq!(buffer, b"{\"b\":".to_vec());
    }

    #[test]
    fn drain_lines_strips_carriage_returns() {
        let mut buffer = b"{\"a\":1}\r\n".to_vec();
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec![b"{\"a\":1}".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_lines_skips_blank_lines() {
        let mut buffer = b"\n\n{\"a\":1}\n".to_vec();
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines.len(), 1);
    }
}
