use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{EndpointPreset, EndpointSettings, HttpMethod};

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct AppConfig {
  pub request_timeout_secs: u64,
  pub max_message_chars: usize,
  pub max_attachment_name_chars: usize,
  pub welcome_message: String,
  pub default_endpoint: EndpointSettings,
  pub presets: Vec<EndpointPreset>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      request_timeout_secs: 30,
      max_message_chars: 5000,
      max_attachment_name_chars: 255,
      welcome_message: "Hi! Configure the endpoint for this conversation and send me a message to test the integration.".to_string(),
      default_endpoint: EndpointSettings::default(),
      presets: default_presets(),
    }
  }
}

impl AppConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs.max(1))
  }

  pub fn preset(&self, id: &str) -> Option<&EndpointPreset> {
    self.presets.iter().find(|p| p.id == id)
  }
}

fn default_presets() -> Vec<EndpointPreset> {
  let openai_body = serde_json::json!({
    "model": "gpt-4o-mini",
    "messages": [{ "role": "user", "content": "{{message}}" }],
    "max_tokens": 1000
  });
  let anthropic_body = serde_json::json!({
    "model": "claude-3-5-sonnet-latest",
    "max_tokens": 1000,
    "messages": [{ "role": "user", "content": "{{message}}" }]
  });
  let webhook_body = serde_json::json!({
    "message": "{{message}}",
    "timestamp": "{{timestamp}}",
    "attachments": "{{attachments}}"
  });

  let mut openai = EndpointSettings {
    url: "https://api.openai.com/v1/chat/completions".to_string(),
    method: HttpMethod::Post,
    body: serde_json::to_string_pretty(&openai_body).unwrap_or_default(),
    ..EndpointSettings::default()
  };
  openai.add_header("Authorization", "Bearer your-api-key");

  let mut anthropic = EndpointSettings {
    url: "https://api.anthropic.com/v1/messages".to_string(),
    method: HttpMethod::Post,
    body: serde_json::to_string_pretty(&anthropic_body).unwrap_or_default(),
    ..EndpointSettings::default()
  };
  anthropic.add_header("x-api-key", "your-api-key");
  anthropic.add_header("anthropic-version", "2023-06-01");

  let mut webhook = EndpointSettings {
    url: "https://your-endpoint.example.com/webhook".to_string(),
    method: HttpMethod::Post,
    body: serde_json::to_string_pretty(&webhook_body).unwrap_or_default(),
    ..EndpointSettings::default()
  };
  webhook.add_header("Authorization", "Bearer your-token");
  webhook.add_query_param("user_id", "123");
  webhook.add_query_param("session", "abc");

  vec![
    EndpointPreset {
      id: "openai-chat".to_string(),
      title: "OpenAI Chat Completions".to_string(),
      description: "POST /v1/chat/completions".to_string(),
      settings: openai,
    },
    EndpointPreset {
      id: "anthropic-messages".to_string(),
      title: "Anthropic Messages".to_string(),
      description: "POST /v1/messages".to_string(),
      settings: anthropic,
    },
    EndpointPreset {
      id: "webhook".to_string(),
      title: "Custom webhook".to_string(),
      description: "Message, timestamp and attachments as JSON".to_string(),
      settings: webhook,
    },
  ]
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
