use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
  #[error("API key not found. Set it before sending messages.")]
  MissingApiKey,

  #[error("API key contains characters that cannot be sent in a header")]
  InvalidApiKey,

  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("completion API error ({status}): {body}")]
  Api { status: u16, body: String },

  #[error("malformed stream payload: {0}")]
  Json(#[from] serde_json::Error),

  #[error("completion stream error: {0}")]
  Stream(String),

  #[error("a reply is already in progress")]
  Busy,
}

pub type Result<T> = std::result::Result<T, ChatError>;
