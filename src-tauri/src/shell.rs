use std::sync::{Arc, Mutex as StdMutex};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tauri::async_runtime::JoinHandle;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::capture;
use crate::client::{ConversationClient, SystemPrompt};
use crate::config::AppConfig;
use crate::error::ChatError;
use crate::logger::Logger;
use crate::models::{ImageData, Role, TranscriptEntry};
use crate::storage::Storage;

pub const DELTA_EVENT: &str = "chat://delta";
pub const DONE_EVENT: &str = "chat://done";
pub const ERROR_EVENT: &str = "chat://error";

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineItem {
  DateSeparator { date: String, label: String },
  Bubble { entry: TranscriptEntry },
}

#[derive(Serialize, Clone, Debug)]
pub struct SendStarted {
  pub id: String,
  pub items: Vec<TimelineItem>,
}

#[derive(Serialize, Clone, Debug)]
pub struct DeltaPayload {
  pub id: String,
  pub text: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct DonePayload {
  pub id: String,
  pub items: Vec<TimelineItem>,
}

#[derive(Serialize, Clone, Debug)]
pub struct ErrorPayload {
  pub id: String,
  pub message: String,
}

/// Tracks the last rendered date so a separator precedes each new day.
#[derive(Default)]
pub struct Timeline {
  last_date: Option<String>,
}

impl Timeline {
  pub fn push(&mut self, mut entry: TranscriptEntry) -> Vec<TimelineItem> {
    let date = entry.date.clone().unwrap_or_else(today);
    entry.date = Some(date.clone());

    let mut items = Vec::with_capacity(2);
    if self.last_date.as_deref() != Some(date.as_str()) {
      items.push(TimelineItem::DateSeparator {
        label: date_label(&date),
        date: date.clone(),
      });
      self.last_date = Some(date);
    }
    items.push(TimelineItem::Bubble { entry });
    items
  }

  pub fn replay(&mut self, entries: Vec<TranscriptEntry>) -> Vec<TimelineItem> {
    self.last_date = None;
    entries.into_iter().flat_map(|e| self.push(e)).collect()
  }
}

fn today() -> String {
  chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// `2025-01-05` renders as `2025년 1월 5일`. Unparsable dates are shown as-is.
pub fn date_label(date: &str) -> String {
  match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
    Ok(d) => format!("{}년 {}월 {}일", d.year(), d.month(), d.day()),
    Err(_) => date.to_string(),
  }
}

pub type ClientSlot = Arc<Mutex<Option<ConversationClient>>>;

/// Handle of the reply task most recently spawned by a send.
#[derive(Default)]
pub struct PendingReply {
  handle: StdMutex<Option<JoinHandle<()>>>,
}

impl PendingReply {
  pub fn set(&self, handle: JoinHandle<()>) {
    *self.lock() = Some(handle);
  }

  /// Aborts the in-flight reply. Returns false when none was running.
  pub fn cancel(&self) -> bool {
    match self.lock().take() {
      Some(handle) if !handle.inner().is_finished() => {
        handle.abort();
        true
      }
      _ => false,
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

/// Everything the window drives: transcript, timeline, the client, and a staged paste.
pub struct ChatShell {
  pub storage: Storage,
  pub logger: Arc<Logger>,
  client: ClientSlot,
  timeline: StdMutex<Timeline>,
  staged_image: StdMutex<Option<ImageData>>,
}

impl ChatShell {
  pub fn new(storage: Storage, logger: Arc<Logger>) -> Self {
    Self {
      storage,
      logger,
      client: ClientSlot::default(),
      timeline: StdMutex::new(Timeline::default()),
      staged_image: StdMutex::new(None),
    }
  }

  /// Builds a fresh client. A missing key leaves the slot empty and is reported.
  pub async fn rebuild_client(&self, config: &AppConfig, api_key: Option<String>) -> Result<(), ChatError> {
    let prompt = SystemPrompt::from_config(
      &config.system_prompt,
      self.storage.system_prompt_path().to_path_buf(),
    );
    let built = ConversationClient::new(api_key, config, prompt);
    let mut slot = self.client.lock().await;
    match built {
      Ok(client) => {
        *slot = Some(client);
        Ok(())
      }
      Err(err) => {
        *slot = None;
        Err(err)
      }
    }
  }

  /// Swaps the key on the live client so the context window survives.
  pub async fn update_api_key(&self, config: &AppConfig, api_key: String) -> Result<(), ChatError> {
    {
      let mut slot = self.client.lock().await;
      if let Some(client) = slot.as_mut() {
        client.set_api_key(&api_key);
        return Ok(());
      }
    }
    self.rebuild_client(config, Some(api_key)).await
  }

  pub async fn clear_context(&self) {
    if let Some(client) = self.client.lock().await.as_mut() {
      client.clear_history();
    }
  }

  pub fn load_timeline(&self) -> Vec<TimelineItem> {
    let entries = self.storage.load_transcript();
    self.lock_timeline().replay(entries)
  }

  /// Persists one transcript entry and returns what to render for it.
  pub fn record(&self, role: Role, text: &str, img: Option<String>) -> anyhow::Result<Vec<TimelineItem>> {
    let entry = TranscriptEntry::now(role, text, img);
    self.storage.append_entry(&entry)?;
    Ok(self.lock_timeline().push(entry))
  }

  /// Stores a pasted image as its own bubble and holds it for the next send.
  pub fn paste_image(&self, base64: &str) -> anyhow::Result<Vec<TimelineItem>> {
    let image = capture::normalize_pasted(base64)?;
    let items = self.record(Role::User, "", Some(image.base64.clone()))?;
    *self.lock_staged() = Some(image);
    Ok(items)
  }

  pub fn take_staged_image(&self) -> Option<ImageData> {
    self.lock_staged().take()
  }

  /// Claims the client for one reply. Fails fast when another reply holds it.
  pub fn begin_reply(&self) -> Result<OwnedMutexGuard<Option<ConversationClient>>, ChatError> {
    let guard = self
      .client
      .clone()
      .try_lock_owned()
      .map_err(|_| ChatError::Busy)?;
    if guard.is_none() {
      return Err(ChatError::MissingApiKey);
    }
    Ok(guard)
  }

  /// Streams the reply through `on_delta`, then persists the assistant bubble.
  pub async fn complete_reply<F>(
    &self,
    mut guard: OwnedMutexGuard<Option<ConversationClient>>,
    text: &str,
    image: Option<&ImageData>,
    on_delta: F,
  ) -> anyhow::Result<Vec<TimelineItem>>
  where
    F: FnMut(&str),
  {
    let client = guard.as_mut().ok_or(ChatError::MissingApiKey)?;
    let reply = client.send_streaming(text, image, on_delta).await?;
    drop(guard);
    self.record(Role::Assistant, &reply, None)
  }

  fn lock_timeline(&self) -> std::sync::MutexGuard<'_, Timeline> {
    self.timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn lock_staged(&self) -> std::sync::MutexGuard<'_, Option<ImageData>> {
    self.staged_image.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[cfg(test)]
mod tests {
  use axum::http::StatusCode;
  use base64::Engine;
  use screenshots::image::{DynamicImage, ImageFormat, RgbaImage};

  use super::*;
  use crate::test_support::{mock_server, sse_body, temp_dir};

  fn entry(role: Role, text: &str, date: &str) -> TranscriptEntry {
    TranscriptEntry {
      role,
      text: text.to_string(),
      img: None,
      timestamp: "09:00".to_string(),
      date: Some(date.to_string()),
    }
  }

  fn shell() -> ChatShell {
    let dir = temp_dir("shell");
    let logger = Arc::new(Logger::new(&dir.join("capturechat.log")).unwrap());
    ChatShell::new(Storage::new(&dir).unwrap(), logger)
  }

  fn bubbles(items: &[TimelineItem]) -> Vec<String> {
    items
      .iter()
      .map(|item| match item {
        TimelineItem::DateSeparator { date, .. } => format!("--{date}"),
        TimelineItem::Bubble { entry } => entry.text.clone(),
      })
      .collect()
  }

  #[test]
  fn separators_only_between_differing_dates() {
    let mut timeline = Timeline::default();
    let items = timeline.replay(vec![
      entry(Role::User, "a", "2025-01-05"),
      entry(Role::Assistant, "b", "2025-01-05"),
      entry(Role::User, "c", "2025-01-06"),
      entry(Role::User, "d", "2025-01-05"),
    ]);
    assert_eq!(
      bubbles(&items),
      vec!["--2025-01-05", "a", "b", "--2025-01-06", "c", "--2025-01-05", "d"]
    );
  }

  #[test]
  fn replay_resets_last_date() {
    let mut timeline = Timeline::default();
    let entries = vec![entry(Role::User, "a", "2025-01-05")];
    let first = timeline.replay(entries.clone());
    let second = timeline.replay(entries);
    assert_eq!(first, second);
  }

  #[test]
  fn missing_date_falls_into_today() {
    let mut timeline = Timeline::default();
    let mut undated = entry(Role::User, "x", "");
    undated.date = None;
    let items = timeline.push(undated);
    match &items[1] {
      TimelineItem::Bubble { entry } => assert_eq!(entry.date.as_deref(), Some(today().as_str())),
      other => panic!("expected bubble, got {other:?}"),
    }
  }

  #[test]
  fn labels_are_human_readable() {
    assert_eq!(date_label("2025-01-05"), "2025년 1월 5일");
    assert_eq!(date_label("2024-12-31"), "2024년 12월 31일");
    assert_eq!(date_label("someday"), "someday");
  }

  #[test]
  fn reload_reproduces_recorded_timeline() {
    let shell = shell();
    let mut live = Vec::new();
    live.extend(shell.record(Role::User, "hello", None).unwrap());
    live.extend(shell.record(Role::Assistant, "hi", None).unwrap());
    live.extend(shell.record(Role::User, "again", None).unwrap());

    let reloaded = shell.load_timeline();
    assert_eq!(reloaded, live);
    assert_eq!(shell.storage.load_transcript().len(), 3);
  }

  #[test]
  fn cancel_reports_only_running_replies() {
    let pending = PendingReply::default();
    assert!(!pending.cancel());

    let done = tauri::async_runtime::spawn(async {});
    for _ in 0..200 {
      if done.inner().is_finished() {
        break;
      }
      std::thread::sleep(std::time::Duration::from_millis(5));
    }
    pending.set(done);
    assert!(!pending.cancel());

    pending.set(tauri::async_runtime::spawn(std::future::pending::<()>()));
    assert!(pending.cancel());
    assert!(!pending.cancel());
  }

  #[test]
  fn paste_persists_and_stages_png() {
    let shell = shell();
    let mut png = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::new(3, 3))
      .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
      .unwrap();
    let encoded = base64::engine::general_purpose::STANDARD.encode(png);

    let items = shell.paste_image(&encoded).unwrap();
    assert!(matches!(items.last(), Some(TimelineItem::Bubble { entry }) if entry.img.is_some()));

    let staged = shell.take_staged_image().expect("staged image");
    assert_eq!(staged.mime, "image/png");
    assert!(shell.take_staged_image().is_none());
    assert_eq!(shell.storage.load_transcript().len(), 1);
  }

  #[tokio::test]
  async fn reply_requires_a_client() {
    let shell = shell();
    let err = shell
      .rebuild_client(&AppConfig::default(), None)
      .await
      .unwrap_err();
    assert!(matches!(err, ChatError::MissingApiKey));
    assert!(matches!(shell.begin_reply(), Err(ChatError::MissingApiKey)));
  }

  #[tokio::test]
  async fn second_reply_is_rejected_while_first_holds_client() {
    let shell = shell();
    shell
      .rebuild_client(&AppConfig::default(), Some("sk-test".to_string()))
      .await
      .unwrap();

    let first = shell.begin_reply().unwrap();
    assert!(matches!(shell.begin_reply(), Err(ChatError::Busy)));
    drop(first);
    assert!(shell.begin_reply().is_ok());
  }

  #[tokio::test]
  async fn complete_reply_streams_and_persists_assistant() {
    let (config, requests) = mock_server(StatusCode::OK, sse_body(&["Looks ", "fine."])).await;
    let shell = shell();
    shell
      .rebuild_client(&config, Some("sk-test".to_string()))
      .await
      .unwrap();

    shell.record(Role::User, "check this", None).unwrap();
    let guard = shell.begin_reply().unwrap();
    let mut deltas = Vec::new();
    let items = shell
      .complete_reply(guard, "check this", None, |d| deltas.push(d.to_string()))
      .await
      .unwrap();

    assert_eq!(deltas, vec!["Looks ", "fine."]);
    assert_eq!(bubbles(&items), vec!["Looks fine."]);

    let transcript = shell.storage.load_transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].role, Role::Assistant);
    assert_eq!(requests.lock().unwrap().len(), 1);

    shell.clear_context().await;
    shell
      .update_api_key(&config, "sk-rotated".to_string())
      .await
      .unwrap();
    assert!(shell.begin_reply().is_ok());
  }

  #[tokio::test]
  async fn failed_reply_persists_nothing() {
    let (config, _requests) = mock_server(StatusCode::TOO_MANY_REQUESTS, "slow down".to_string()).await;
    let shell = shell();
    shell
      .rebuild_client(&config, Some("sk-test".to_string()))
      .await
      .unwrap();

    let guard = shell.begin_reply().unwrap();
    let err = shell
      .complete_reply(guard, "hello", None, |_| {})
      .await
      .unwrap_err();
    assert!(err.to_string().contains("429"));
    assert!(shell.storage.load_transcript().is_empty());
  }

  #[tokio::test]
  async fn in_band_stream_error_persists_nothing() {
    let body = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n\
                data: {\"error\":{\"message\":\"context_length_exceeded\"}}\n\n"
      .to_string();
    let (config, _requests) = mock_server(StatusCode::OK, body).await;
    let shell = shell();
    shell
      .rebuild_client(&config, Some("sk-test".to_string()))
      .await
      .unwrap();

    let guard = shell.begin_reply().unwrap();
    let err = shell
      .complete_reply(guard, "hello", None, |_| {})
      .await
      .unwrap_err();
    assert!(err.to_string().contains("context_length_exceeded"));
    assert!(shell.storage.load_transcript().is_empty());
    assert!(shell.begin_reply().is_ok());
  }
}
