use std::path::PathBuf;

use async_stream::stream;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio_stream::{Stream, StreamExt};

use crate::config::{AppConfig, SystemPromptSource};
use crate::error::{ChatError, Result};
use crate::history::History;
use crate::models::{ChatCompletionRequest, ImageData, StreamChunk, Turn};
use crate::storage;

/// Resolved once per send so edits to the prompt file apply to the next message.
#[derive(Clone, Debug)]
pub enum SystemPrompt {
  File(PathBuf),
  Fixed(String),
}

impl SystemPrompt {
  pub fn from_config(source: &SystemPromptSource, file: PathBuf) -> Self {
    match source {
      SystemPromptSource::File => SystemPrompt::File(file),
      SystemPromptSource::Fixed { text } => SystemPrompt::Fixed(text.clone()),
    }
  }

  pub fn resolve(&self) -> String {
    match self {
      SystemPrompt::File(path) => storage::read_system_prompt(path),
      SystemPrompt::Fixed(text) if !text.trim().is_empty() => text.clone(),
      SystemPrompt::Fixed(_) => storage::DEFAULT_SYSTEM_PROMPT.to_string(),
    }
  }
}

pub struct ConversationClient {
  http: reqwest::Client,
  api_key: String,
  endpoint: String,
  model: String,
  prompt: SystemPrompt,
  history: History,
}

impl ConversationClient {
  /// Fails with [`ChatError::MissingApiKey`] before touching the network.
  pub fn new(api_key: Option<String>, config: &AppConfig, prompt: SystemPrompt) -> Result<Self> {
    let api_key = api_key
      .map(|k| k.trim().to_string())
      .filter(|k| !k.is_empty())
      .ok_or(ChatError::MissingApiKey)?;

    Ok(Self {
      http: reqwest::Client::new(),
      api_key,
      endpoint: config.completions_url(),
      model: config.model.clone(),
      prompt,
      history: History::new(config.history_limit),
    })
  }

  pub fn history(&self) -> &History {
    &self.history
  }

  pub fn clear_history(&mut self) {
    self.history.clear();
  }

  pub fn set_api_key(&mut self, api_key: &str) {
    self.api_key = api_key.trim().to_string();
  }

  /// Sends without observing deltas; returns the full reply.
  pub async fn send(&mut self, text: &str, image: Option<&ImageData>) -> Result<String> {
    self.send_streaming(text, image, |_| {}).await
  }

  /// Sends a turn and calls `on_delta` with every non-empty fragment as it arrives.
  ///
  /// The user turn is recorded before the request goes out; the assistant turn is
  /// recorded only once the stream completes without an error.
  pub async fn send_streaming<F>(
    &mut self,
    text: &str,
    image: Option<&ImageData>,
    mut on_delta: F,
  ) -> Result<String>
  where
    F: FnMut(&str),
  {
    let mut headers = HeaderMap::new();
    headers.insert(
      AUTHORIZATION,
      HeaderValue::from_str(&format!("Bearer {}", self.api_key))
        .map_err(|_| ChatError::InvalidApiKey)?,
    );

    self.history.push(Turn::user(text, image));
    let payload = self.build_request();

    let resp = self
      .http
      .post(&self.endpoint)
      .headers(headers)
      .json(&payload)
      .send()
      .await?;

    if !resp.status().is_success() {
      let status = resp.status().as_u16();
      let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "completion request failed".to_string());
      return Err(ChatError::Api { status, body });
    }

    let deltas = delta_stream(resp.bytes_stream());
    tokio::pin!(deltas);

    let mut full = String::new();
    while let Some(delta) = deltas.next().await {
      let delta = delta?;
      full.push_str(&delta);
      on_delta(&delta);
    }

    self.history.push(Turn::assistant(full.clone()));
    Ok(full)
  }

  fn build_request(&self) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(self.history.len() + 1);
    messages.push(Turn::system(self.prompt.resolve()));
    messages.extend(self.history.iter().cloned());

    ChatCompletionRequest {
      model: self.model.clone(),
      messages,
      stream: true,
    }
  }
}

#[derive(Debug, PartialEq)]
pub enum SseEvent {
  Delta(String),
  Done,
}

/// Incremental decoder for `text/event-stream` completion bodies.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
#[derive(Default)]
pub struct SseDecoder {
  buffer: Vec<u8>,
}

impl SseDecoder {
  /// Fails on the first `data:` line that is not JSON or carries an `error` object.
  pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
    self.buffer.extend_from_slice(chunk);
    let mut events = Vec::new();

    while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
      let line: Vec<u8> = self.buffer.drain(..=pos).collect();
      if let Some(event) = parse_line(&String::from_utf8_lossy(&line))? {
        events.push(event);
      }
    }

    Ok(events)
  }

  /// Flushes a final line that arrived without a trailing newline.
  pub fn finish(&mut self) -> Result<Option<SseEvent>> {
    let rest = std::mem::take(&mut self.buffer);
    parse_line(&String::from_utf8_lossy(&rest))
  }
}

/// Comments, `event:` lines, blank data and role-only deltas yield `Ok(None)`.
fn parse_line(line: &str) -> Result<Option<SseEvent>> {
  let Some(data) = line.trim().strip_prefix("data:").map(str::trim) else {
    return Ok(None);
  };
  if data.is_empty() {
    return Ok(None);
  }
  if data == "[DONE]" {
    return Ok(Some(SseEvent::Done));
  }

  let value: serde_json::Value = serde_json::from_str(data)?;
  if let Some(error) = value.get("error") {
    let message = error
      .get("message")
      .unwrap_or(error)
      .as_str()
      .map(str::to_string)
      .unwrap_or_else(|| error.to_string());
    return Err(ChatError::Stream(message));
  }

  let chunk: StreamChunk = serde_json::from_value(value)?;
  let content = chunk
    .choices
    .into_iter()
    .next()
    .and_then(|choice| choice.delta.content)
    .filter(|content| !content.is_empty());
  Ok(content.map(SseEvent::Delta))
}

/// Turns a raw body stream into text deltas, ending at `[DONE]` or end of body.
pub fn delta_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>>
where
  S: Stream<Item = std::result::Result<B, E>>,
  B: AsRef<[u8]>,
  ChatError: From<E>,
{
  stream! {
    tokio::pin!(bytes);
    let mut decoder = SseDecoder::default();

    while let Some(chunk) = bytes.next().await {
      let chunk = match chunk {
        Ok(c) => c,
        Err(err) => {
          yield Err(ChatError::from(err));
          return;
        }
      };

      let events = match decoder.feed(chunk.as_ref()) {
        Ok(events) => events,
        Err(err) => {
          yield Err(err);
          return;
        }
      };

      for event in events {
        match event {
          SseEvent::Delta(text) => yield Ok(text),
          SseEvent::Done => return,
        }
      }
    }

    match decoder.finish() {
      Ok(Some(SseEvent::Delta(text))) => yield Ok(text),
      Ok(_) => {}
      Err(err) => yield Err(err),
    }
  }
}
