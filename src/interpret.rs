use reqwest::StatusCode;
use serde_json::Value;

use crate::error::ChatError;

/// One provider shape the interpreter knows how to read a reply out of.
pub struct Extractor {
  pub name: &'static str,
  pub extract: fn(&Value) -> Option<String>,
}

/// Checked in order; the first extractor that yields text wins. New provider
/// shapes go here.
pub const EXTRACTORS: &[Extractor] = &[
  Extractor {
    name: "openai_chat_completion",
    extract: openai_chat_completion,
  },
  Extractor {
    name: "anthropic_messages",
    extract: anthropic_messages,
  },
  Extractor {
    name: "message_field",
    extract: message_field,
  },
  Extractor {
    name: "response_field",
    extract: response_field,
  },
];

fn openai_chat_completion(v: &Value) -> Option<String> {
  text_at(&v["choices"][0]["message"]["content"])
}

fn anthropic_messages(v: &Value) -> Option<String> {
  text_at(&v["content"][0]["text"])
}

fn message_field(v: &Value) -> Option<String> {
  text_at(&v["message"])
}

fn response_field(v: &Value) -> Option<String> {
  text_at(&v["response"])
}

fn text_at(value: &Value) -> Option<String> {
  value
    .as_str()
    .filter(|s| !s.is_empty())
    .map(|s| s.to_string())
}

pub fn extractor_names() -> Vec<&'static str> {
  EXTRACTORS.iter().map(|e| e.name).collect()
}

/// Turns a raw HTTP exchange into display text.
pub fn interpret(raw_body: &str, status: u16, ok: bool) -> Result<String, ChatError> {
  if !ok {
    let trimmed = raw_body.trim();
    let detail = if trimmed.is_empty() {
      status_text(status)
    } else {
      trimmed.to_string()
    };
    return Err(ChatError::Endpoint { status, detail });
  }

  let parsed: Value = match serde_json::from_str(raw_body) {
    Ok(v) => v,
    Err(_) => return Ok(raw_body.to_string()),
  };

  Ok(extract_reply(&parsed))
}

pub fn extract_reply(parsed: &Value) -> String {
  EXTRACTORS
    .iter()
    .find_map(|e| (e.extract)(parsed))
    .unwrap_or_else(|| serde_json::to_string_pretty(parsed).unwrap_or_else(|_| parsed.to_string()))
}

pub fn status_text(status: u16) -> String {
  StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("Unknown Status")
    .to_string()
}
