use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use super::{AiMessage, AiMessageChunk, ChatMessage, ChatModel, ChunkStream, LlmError};
use crate::config::LlmConfig;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Chat model served by a local Ollama instance over `/api/chat`.
pub struct OllamaChatModel {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl OllamaChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        // No client-wide timeout: it would cap the whole body of a stream.
        // Single-shot calls set one per request instead.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            client,
            request_timeout: config.request_timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn request_body<'a>(&'a self, messages: &'a [ChatMessage], stream: bool) -> OllamaChatRequest<'a> {
        OllamaChatRequest {
            model: &self.model,
            messages,
            stream,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_connect() {
            LlmError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            LlmError::Timeout(format!(
                "no response after {}s",
                self.request_timeout.as_secs()
            ))
        } else {
            LlmError::HttpClient(e.to_string())
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let mut request = self
            .client
            .post(self.chat_url())
            .json(&self.request_body(messages, stream));
        if !stream {
            request = request.timeout(self.request_timeout);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Request body for Ollama /api/chat
#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// One response object from /api/chat. Streaming sends one per line.
#[derive(Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<AiMessage, LlmError> {
        let response = self.send(messages, false).await?;
        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseParsing(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(LlmError::ResponseParsing(error));
        }

        let content = parsed.message.map(|m| m.content).unwrap_or_default();
        tracing::debug!(model = %self.model, chars = content.len(), "Chat completion received");
        Ok(AiMessage {
            content: content.into(),
        })
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, LlmError> {
        let response = self.send(messages, true).await?;
        tracing::debug!(model = %self.model, "Chat stream opened");

        let bytes = response
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()))
            .boxed();
        Ok(ndjson_chunks(bytes))
    }
}

// ═══════════════════════════════════════════════════════════
// NDJSON stream decoding
// ═══════════════════════════════════════════════════════════

struct NdjsonState<E> {
    bytes: BoxStream<'static, Result<Vec<u8>, E>>,
    buffer: Vec<u8>,
    eof: bool,
    finished: bool,
}

impl<E> NdjsonState<E> {
    /// Pop the next complete line. At end of input the remainder counts as one.
    fn next_line(&mut self) -> Option<String> {
        let end = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None if self.eof && !self.buffer.is_empty() => self.buffer.len(),
            None => return None,
        };
        let line: Vec<u8> = self.buffer.drain(..end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

/// Turn a byte stream of newline-delimited `/api/chat` objects into chunks.
///
/// Stops after the object flagged `done`, or after the first error.
fn ndjson_chunks<E>(bytes: BoxStream<'static, Result<Vec<u8>, E>>) -> ChunkStream
where
    E: std::fmt::Display + Send + 'static,
{
    let state = NdjsonState {
        bytes,
        buffer: Vec::new(),
        eof: false,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }
        loop {
            if let Some(line) = st.next_line() {
                if line.is_empty() {
                    continue;
                }
                let item = match serde_json::from_str::<OllamaChatResponse>(&line) {
                    Ok(OllamaChatResponse {
                        error: Some(error), ..
                    }) => {
                        st.finished = true;
                        Err(LlmError::Stream(error))
                    }
                    Ok(parsed) => {
                        st.finished = parsed.done;
                        let delta = parsed.message.map(|m| m.content).unwrap_or_default();
                        Ok(AiMessageChunk {
                            content: delta.into(),
                        })
                    }
                    Err(e) => {
                        st.finished = true;
                        Err(LlmError::ResponseParsing(e.to_string()))
                    }
                };
                return Some((item, st));
            }

            if st.eof {
                return None;
            }

            match st.bytes.next().await {
                Some(Ok(data)) => st.buffer.extend_from_slice(&data),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(LlmError::Stream(e.to_string())), st));
                }
                None => st.eof = true,
            }
        }
    })
    .boxed()
}
