use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::TranscriptEntry;

pub const DEFAULT_SYSTEM_PROMPT: &str =
  "You are a helpful assistant. The user may attach a screenshot of their screen; use it to answer.";

#[derive(Serialize, Deserialize)]
struct ApiKeyFile {
  api_key: String,
}

/// Whole-file JSON persistence rooted in the app data dir.
#[derive(Clone, Debug)]
pub struct Storage {
  api_key_path: PathBuf,
  system_prompt_path: PathBuf,
  history_path: PathBuf,
}

impl Storage {
  pub fn new(dir: &Path) -> anyhow::Result<Self> {
    std::fs::create_dir_all(dir)?;
    Ok(Self {
      api_key_path: dir.join("api_key.json"),
      system_prompt_path: dir.join("system_prompt.json"),
      history_path: dir.join("chat_history.json"),
    })
  }

  pub fn system_prompt_path(&self) -> &Path {
    &self.system_prompt_path
  }

  /// Returns `None` when the file is absent, malformed, or holds a blank key.
  pub fn load_api_key(&self) -> Option<String> {
    let data = std::fs::read_to_string(&self.api_key_path).ok()?;
    let file: ApiKeyFile = serde_json::from_str(&data).ok()?;
    let key = file.api_key.trim();
    (!key.is_empty()).then(|| key.to_string())
  }

  pub fn save_api_key(&self, key: &str) -> anyhow::Result<()> {
    let key = key.trim();
    if key.is_empty() {
      return Err(anyhow::anyhow!("API key is empty."));
    }
    write_json(
      &self.api_key_path,
      &ApiKeyFile {
        api_key: key.to_string(),
      },
    )
  }

  pub fn load_system_prompt(&self) -> String {
    read_system_prompt(&self.system_prompt_path)
  }

  pub fn save_system_prompt(&self, prompt: &str) -> anyhow::Result<()> {
    write_json(&self.system_prompt_path, &prompt)
  }

  pub fn load_transcript(&self) -> Vec<TranscriptEntry> {
    std::fs::read_to_string(&self.history_path)
      .ok()
      .and_then(|data| serde_json::from_str(&data).ok())
      .unwrap_or_default()
  }

  /// Appends one entry and rewrites the whole transcript file. Returns the new length.
  pub fn append_entry(&self, entry: &TranscriptEntry) -> anyhow::Result<usize> {
    let mut transcript = self.load_transcript();
    transcript.push(entry.clone());
    write_json(&self.history_path, &transcript)?;
    Ok(transcript.len())
  }
}

/// Accepts a JSON string, a `{"system_prompt": "..."}` object, or free text.
/// Blank or missing prompts fall back to [`DEFAULT_SYSTEM_PROMPT`].
pub fn read_system_prompt(path: &Path) -> String {
  let Ok(data) = std::fs::read_to_string(path) else {
    return DEFAULT_SYSTEM_PROMPT.to_string();
  };

  let prompt = match serde_json::from_str::<serde_json::Value>(&data) {
    Ok(serde_json::Value::String(text)) => text,
    Ok(serde_json::Value::Object(map)) => map
      .get("system_prompt")
      .and_then(|v| v.as_str())
      .unwrap_or("")
      .to_string(),
    _ => data,
  };

  if prompt.trim().is_empty() {
    DEFAULT_SYSTEM_PROMPT.to_string()
  } else {
    prompt
  }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value)?;
  std::fs::write(path, json)?;
  Ok(())
}
