use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::history::DEFAULT_HISTORY_LIMIT;

/// Where the system instruction comes from on each send.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SystemPromptSource {
  File,
  Fixed { text: String },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
  pub model: String,
  pub api_base: String,
  pub history_limit: usize,
  pub system_prompt: SystemPromptSource,
  pub capture_max_width: Option<u32>,
  pub capture_delay_ms: u64,
  pub shortcut: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      model: "gpt-5.1".to_string(),
      api_base: "https://api.openai.com/v1".to_string(),
      history_limit: DEFAULT_HISTORY_LIMIT,
      system_prompt: SystemPromptSource::File,
      capture_max_width: None,
      capture_delay_ms: 200,
      shortcut: "CmdOrCtrl+Shift+Space".to_string(),
    }
  }
}

impl AppConfig {
  pub fn completions_url(&self) -> String {
    format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
  }
}

pub fn load_or_init(path: &Path) -> anyhow::Result<AppConfig> {
  if path.exists() {
    let data = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&data)?;
    Ok(config)
  } else {
    let config = AppConfig::default();
    save_config(path, &config)?;
    Ok(config)
  }
}

pub fn save_config(path: &Path, config: &AppConfig) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(config)?;
  std::fs::write(path, json)?;
  Ok(())
}
