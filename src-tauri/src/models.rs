use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  System,
  User,
  Assistant,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageData {
  pub mime: String,
  pub base64: String,
}

impl ImageData {
  pub fn png(base64: impl Into<String>) -> Self {
    Self {
      mime: "image/png".to_string(),
      base64: base64.into(),
    }
  }

  pub fn data_url(&self) -> String {
    format!("data:{};base64,{}", self.mime, self.base64)
  }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageUrl {
  pub url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
  Text { text: String },
  ImageUrl { image_url: ImageUrl },
}

/// Either a bare string or the composite array used for vision input.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum TurnContent {
  Text(String),
  Parts(Vec<ContentPart>),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Turn {
  pub role: Role,
  pub content: TurnContent,
}

impl Turn {
  pub fn system(text: impl Into<String>) -> Self {
    Self {
      role: Role::System,
      content: TurnContent::Text(text.into()),
    }
  }

  pub fn user(text: impl Into<String>, image: Option<&ImageData>) -> Self {
    let text = text.into();
    let content = match image {
      Some(img) => TurnContent::Parts(vec![
        ContentPart::Text { text },
        ContentPart::ImageUrl {
          image_url: ImageUrl { url: img.data_url() },
        },
      ]),
      None => TurnContent::Text(text),
    };
    Self {
      role: Role::User,
      content,
    }
  }

  pub fn assistant(text: impl Into<String>) -> Self {
    Self {
      role: Role::Assistant,
      content: TurnContent::Text(text.into()),
    }
  }
}

#[derive(Serialize, Clone, Debug)]
pub struct ChatCompletionRequest {
  pub model: String,
  pub messages: Vec<Turn>,
  pub stream: bool,
}

#[derive(Deserialize, Debug)]
pub struct StreamChunk {
  #[serde(default)]
  pub choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
pub struct StreamChoice {
  #[serde(default)]
  pub delta: StreamDelta,
}

#[derive(Deserialize, Debug, Default)]
pub struct StreamDelta {
  pub content: Option<String>,
}

/// One persisted line of the chat transcript.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TranscriptEntry {
  pub role: Role,
  #[serde(default)]
  pub text: String,
  #[serde(default, alias = "image")]
  pub img: Option<String>,
  #[serde(default)]
  pub timestamp: String,
  #[serde(default)]
  pub date: Option<String>,
}

impl TranscriptEntry {
  pub fn now(role: Role, text: impl Into<String>, img: Option<String>) -> Self {
    let now = chrono::Local::now();
    Self {
      role,
      text: text.into(),
      img,
      timestamp: now.format("%H:%M").to_string(),
      date: Some(now.format("%Y-%m-%d").to_string()),
    }
  }
}
