//! Scripted chat model for tests and offline runs.
//!
//! Replies are consumed in order: each `invoke` pops one scripted reply and
//! each `stream` pops one scripted stream. Every call's messages are recorded
//! so tests can assert on the prompts the pipeline built.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use super::{AiMessage, AiMessageChunk, ChatMessage, ChatModel, ChunkStream, LlmError, MessageContent};

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum StreamStep {
    Chunk(MessageContent),
    /// Yield an error item; the stream ends after it.
    Fail(LlmError),
    /// Wait before the next step.
    Stall(Duration),
}

enum StreamScript {
    Steps(Vec<StreamStep>),
    OpenError(LlmError),
}

#[derive(Default)]
pub struct MockChatModel {
    replies: Mutex<VecDeque<Result<AiMessage, LlmError>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    invoke_calls: Mutex<Vec<Vec<ChatMessage>>>,
    stream_calls: Mutex<Vec<Vec<ChatMessage>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockChatModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain-text reply for the next `invoke`.
    pub fn with_reply(self, text: &str) -> Self {
        lock(&self.replies).push_back(Ok(AiMessage {
            content: text.into(),
        }));
        self
    }

    pub fn with_reply_content(self, content: MessageContent) -> Self {
        lock(&self.replies).push_back(Ok(AiMessage { content }));
        self
    }

    pub fn with_invoke_error(self, error: LlmError) -> Self {
        lock(&self.replies).push_back(Err(error));
        self
    }

    /// Queue a stream yielding these text deltas.
    pub fn with_stream(self, deltas: &[&str]) -> Self {
        let steps = deltas
            .iter()
            .map(|d| StreamStep::Chunk((*d).into()))
            .collect();
        self.with_stream_steps(steps)
    }

    pub fn with_stream_steps(self, steps: Vec<StreamStep>) -> Self {
        lock(&self.streams).push_back(StreamScript::Steps(steps));
        self
    }

    /// Queue a stream that fails before yielding anything.
    pub fn with_stream_open_error(self, error: LlmError) -> Self {
        lock(&self.streams).push_back(StreamScript::OpenError(error));
        self
    }

    pub fn invoke_calls(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.invoke_calls).clone()
    }

    pub fn stream_calls(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.stream_calls).clone()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<AiMessage, LlmError> {
        lock(&self.invoke_calls).push(messages.to_vec());
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Connection("mock: no scripted reply".into())))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<ChunkStream, LlmError> {
        lock(&self.stream_calls).push(messages.to_vec());
        let steps = match lock(&self.streams).pop_front() {
            Some(StreamScript::Steps(steps)) => steps,
            Some(StreamScript::OpenError(error)) => return Err(error),
            None => return Err(LlmError::Connection("mock: no scripted stream".into())),
        };

        let stream = stream::unfold(VecDeque::from(steps), |mut steps| async move {
            while let Some(step) = steps.pop_front() {
                match step {
                    StreamStep::Chunk(content) => {
                        return Some((Ok(AiMessageChunk { content }), steps));
                    }
                    StreamStep::Fail(error) => {
                        steps.clear();
                        return Some((Err(error), steps));
                    }
                    StreamStep::Stall(delay) => tokio::time::sleep(delay).await,
                }
            }
            None
        });
        Ok(stream.boxed())
    }
}
