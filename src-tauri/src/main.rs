#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod capture;
mod client;
mod config;
mod error;
mod history;
mod logger;
mod models;
mod shell;
mod storage;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tauri::{GlobalShortcutManager, Manager, State, Window};
use tokio::sync::RwLock;

use capture::CaptureSettings;
use config::{load_or_init, save_config, AppConfig};
use error::ChatError;
use logger::Logger;
use models::Role;
use shell::{ChatShell, DeltaPayload, DonePayload, ErrorPayload, PendingReply, SendStarted, TimelineItem};
use storage::Storage;

struct AppState {
  config_path: PathBuf,
  config: Arc<RwLock<AppConfig>>,
  shell: Arc<ChatShell>,
  pending: PendingReply,
}

/// `OPENAI_API_KEY` wins over the stored key when set.
fn resolve_api_key(storage: &Storage) -> Option<String> {
  std::env::var("OPENAI_API_KEY")
    .ok()
    .map(|k| k.trim().to_string())
    .filter(|k| !k.is_empty())
    .or_else(|| storage.load_api_key())
}

#[tauri::command]
fn has_api_key(state: State<'_, AppState>) -> bool {
  resolve_api_key(&state.shell.storage).is_some()
}

#[tauri::command]
fn get_api_key(state: State<'_, AppState>) -> Option<String> {
  state.shell.storage.load_api_key()
}

#[tauri::command]
async fn save_api_key(state: State<'_, AppState>, key: String) -> Result<(), String> {
  state.shell.storage.save_api_key(&key).map_err(|e| e.to_string())?;
  let config = state.config.read().await.clone();
  state
    .shell
    .update_api_key(&config, key.trim().to_string())
    .await
    .map_err(|e| e.to_string())?;
  state.shell.logger.info("API key saved");
  Ok(())
}

#[tauri::command]
fn get_system_prompt(state: State<'_, AppState>) -> String {
  state.shell.storage.load_system_prompt()
}

#[tauri::command]
fn save_system_prompt(state: State<'_, AppState>, prompt: String) -> Result<(), String> {
  state
    .shell
    .storage
    .save_system_prompt(&prompt)
    .map_err(|e| e.to_string())
}

#[tauri::command]
async fn get_config(state: State<'_, AppState>) -> Result<AppConfig, String> {
  Ok(state.config.read().await.clone())
}

#[tauri::command]
async fn set_config(state: State<'_, AppState>, config: AppConfig) -> Result<(), String> {
  save_config(&state.config_path, &config).map_err(|e| e.to_string())?;
  let api_key = resolve_api_key(&state.shell.storage);
  if let Err(err) = state.shell.rebuild_client(&config, api_key).await {
    state.shell.logger.warn(&format!("client not rebuilt: {err}"));
  }
  *state.config.write().await = config;
  state.shell.logger.info("config updated, context window reset");
  Ok(())
}

#[tauri::command]
fn load_timeline(state: State<'_, AppState>) -> Vec<TimelineItem> {
  state.shell.load_timeline()
}

#[tauri::command]
fn paste_image(state: State<'_, AppState>, base64: String) -> Result<Vec<TimelineItem>, String> {
  state.shell.paste_image(&base64).map_err(|e| {
    state.shell.logger.warn(&format!("paste rejected: {e}"));
    e.to_string()
  })
}

#[tauri::command]
async fn clear_context(state: State<'_, AppState>) -> Result<(), String> {
  state.shell.clear_context().await;
  Ok(())
}

#[tauri::command]
async fn send_message(
  window: Window,
  state: State<'_, AppState>,
  text: String,
  capture: bool,
) -> Result<Option<SendStarted>, String> {
  let shell = state.shell.clone();
  let text = text.trim().to_string();

  let guard = shell.begin_reply().map_err(|e| e.to_string())?;

  let (image, stored_image) = if capture {
    let settings = CaptureSettings::from(&*state.config.read().await);
    let (hide_window, show_window) = (window.clone(), window.clone());
    let captured = tauri::async_runtime::spawn_blocking(move || {
      capture::capture_full_screen(
        move || {
          let _ = hide_window.hide();
        },
        move || {
          let _ = show_window.show();
        },
        settings,
      )
    })
    .await
    .map_err(|e| e.to_string())?
    .map_err(|e| {
      shell.logger.error(&format!("capture failed: {e}"));
      e.to_string()
    })?;
    let stored = Some(captured.base64.clone());
    (Some(captured), stored)
  } else {
    (shell.take_staged_image(), None)
  };

  if text.is_empty() && image.is_none() {
    return Ok(None);
  }

  let items = if capture || !text.is_empty() {
    shell
      .record(Role::User, &text, stored_image)
      .map_err(|e| e.to_string())?
  } else {
    Vec::new()
  };

  let id = uuid::Uuid::new_v4().to_string();
  shell.logger.info(&format!(
    "send {id}: {} chars, image attached: {}",
    text.chars().count(),
    image.is_some()
  ));

  let task_id = id.clone();
  let handle = tauri::async_runtime::spawn(async move {
    let delta_window = window.clone();
    let delta_id = task_id.clone();
    let result = shell
      .complete_reply(guard, &text, image.as_ref(), move |delta| {
        let _ = delta_window.emit(
          shell::DELTA_EVENT,
          DeltaPayload {
            id: delta_id.clone(),
            text: delta.to_string(),
          },
        );
      })
      .await;

    match result {
      Ok(items) => {
        shell.logger.info(&format!("send {task_id}: reply complete"));
        let _ = window.emit(shell::DONE_EVENT, DonePayload { id: task_id, items });
      }
      Err(err) => {
        shell.logger.error(&format!("send {task_id}: {err}"));
        let _ = window.emit(
          shell::ERROR_EVENT,
          ErrorPayload {
            id: task_id,
            message: err.to_string(),
          },
        );
      }
    }
  });

  state.pending.set(handle);

  Ok(Some(SendStarted { id, items }))
}

#[tauri::command]
fn cancel_send(state: State<'_, AppState>) -> bool {
  let cancelled = state.pending.cancel();
  if cancelled {
    state.shell.logger.info("send cancelled");
  }
  cancelled
}

#[tauri::command]
fn get_log_path(state: State<'_, AppState>) -> String {
  state.shell.logger.path().display().to_string()
}

fn main() {
  tauri::Builder::default()
    .setup(|app| {
      (|| -> anyhow::Result<()> {
        let data_dir = app
          .path_resolver()
          .app_data_dir()
          .context("missing app data dir")?;
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join("config.json");
        let log_path = data_dir.join("capturechat.log");

        let config = load_or_init(&config_path)?;

        let logger = Arc::new(Logger::new(&log_path)?);
        logger.info("CaptureChat starting up");

        let storage = Storage::new(&data_dir)?;
        let shell = Arc::new(ChatShell::new(storage, logger.clone()));

        let api_key = resolve_api_key(&shell.storage);
        match tauri::async_runtime::block_on(shell.rebuild_client(&config, api_key)) {
          Ok(()) => logger.info("conversation client ready"),
          Err(ChatError::MissingApiKey) => logger.warn("no API key stored; waiting for key dialog"),
          Err(err) => logger.error(&format!("conversation client failed: {err}")),
        }

        let shortcut = config.shortcut.clone();
        let config = Arc::new(RwLock::new(config));

        app.manage(AppState {
          config_path,
          config,
          shell,
          pending: PendingReply::default(),
        });

        let handle = app.handle();
        let mut gsm = handle.global_shortcut_manager();
        let toggle = handle.clone();
        if let Err(err) = gsm.register(&shortcut, move || {
          if let Some(window) = toggle.get_window("main") {
            let visible = window.is_visible().unwrap_or(true);
            if visible {
              let _ = window.hide();
            } else {
              let _ = window.show();
              let _ = window.set_focus();
            }
          }
        }) {
          logger.warn(&format!("shortcut {shortcut} not registered: {err}"));
        }

        Ok(())
      })()
      .map_err(|e| e.into())
    })
    .invoke_handler(tauri::generate_handler![
      has_api_key,
      get_api_key,
      save_api_key,
      get_system_prompt,
      save_system_prompt,
      get_config,
      set_config,
      load_timeline,
      paste_image,
      clear_context,
      send_message,
      cancel_send,
      get_log_path
    ])
    .run(tauri::generate_context!())
    .expect("error while running capturechat");
}
