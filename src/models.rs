use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
  Get,
  #[default]
  Post,
  Put,
  Delete,
  Patch,
}

impl HttpMethod {
  pub fn as_str(&self) -> &'static str {
    match self {
      HttpMethod::Get => "GET",
      HttpMethod::Post => "POST",
      HttpMethod::Put => "PUT",
      HttpMethod::Delete => "DELETE",
      HttpMethod::Patch => "PATCH",
    }
  }
}

impl fmt::Display for HttpMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for HttpMethod {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_uppercase().as_str() {
      "GET" => Ok(HttpMethod::Get),
      "POST" => Ok(HttpMethod::Post),
      "PUT" => Ok(HttpMethod::Put),
      "DELETE" => Ok(HttpMethod::Delete),
      "PATCH" => Ok(HttpMethod::Patch),
      other => Err(format!("unsupported HTTP method: {other}")),
    }
  }
}

/// Everything needed to issue one HTTP call on behalf of a conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSettings {
  pub url: String,
  pub method: HttpMethod,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  #[serde(default)]
  pub query_params: BTreeMap<String, String>,
  /// Body template; may contain `{{message}}`, `{{timestamp}}` and `{{attachments}}`.
  #[serde(default)]
  pub body: String,
}

impl Default for EndpointSettings {
  fn default() -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    Self {
      url: String::new(),
      method: HttpMethod::Post,
      headers,
      query_params: BTreeMap::new(),
      body: String::new(),
    }
  }
}

impl EndpointSettings {
  /// Adds or overwrites a header. Blank keys or values are ignored.
  pub fn add_header(&mut self, key: &str, value: &str) -> bool {
    if key.is_empty() || value.is_empty() {
      return false;
    }
    self.headers.insert(key.to_string(), value.to_string());
    true
  }

  pub fn remove_header(&mut self, key: &str) -> Option<String> {
    self.headers.remove(key)
  }

  /// Adds or overwrites a query parameter. Blank keys or values are ignored.
  pub fn add_query_param(&mut self, key: &str, value: &str) -> bool {
    if key.is_empty() || value.is_empty() {
      return false;
    }
    self.query_params.insert(key.to_string(), value.to_string());
    true
  }

  pub fn remove_query_param(&mut self, key: &str) -> Option<String> {
    self.query_params.remove(key)
  }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
  Image,
  Audio,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
  #[serde(rename = "type")]
  pub kind: AttachmentKind,
  pub url: String,
  pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
}

/// Delivery state of a message. User messages start `Pending` and resolve once
/// their send completes; anything still pending at load time was cut off.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
  Pending,
  #[default]
  Delivered,
  Failed,
  Interrupted,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
  pub id: String,
  pub role: Role,
  pub content: String,
  pub timestamp: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub attachments: Vec<Attachment>,
  #[serde(default)]
  pub status: MessageStatus,
}

impl ChatMessage {
  pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      role: Role::User,
      content: content.into(),
      timestamp: Utc::now(),
      attachments,
      status: MessageStatus::Pending,
    }
  }

  pub fn assistant(content: impl Into<String>) -> Self {
    Self {
      id: uuid::Uuid::new_v4().to_string(),
      role: Role::Assistant,
      content: content.into(),
      timestamp: Utc::now(),
      attachments: Vec::new(),
      status: MessageStatus::Delivered,
    }
  }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: String,
  pub endpoint_settings: EndpointSettings,
  #[serde(default)]
  pub messages: Vec<ChatMessage>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
  pub id: String,
  pub title: String,
  pub description: String,
  pub last_message: Option<String>,
  pub updated_at: DateTime<Utc>,
  pub message_count: usize,
  pub is_loading: bool,
}

impl ConversationSummary {
  pub fn from_conversation(conversation: &Conversation, is_loading: bool) -> Self {
    Self {
      id: conversation.id.clone(),
      title: conversation.title.clone(),
      description: conversation.description.clone(),
      last_message: conversation.messages.last().map(|m| m.content.clone()),
      updated_at: conversation.updated_at,
      message_count: conversation.messages.len(),
      is_loading,
    }
  }
}

/// A starting endpoint configuration offered when creating a conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EndpointPreset {
  pub id: String,
  pub title: String,
  pub description: String,
  pub settings: EndpointSettings,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
  pub conversation: Conversation,
  pub is_loading: bool,
  pub is_active: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConversationList {
  pub active_id: Option<String>,
  pub conversations: Vec<ConversationSummary>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
  pub title: Option<String>,
  pub description: Option<String>,
  pub preset_id: Option<String>,
  pub settings: Option<EndpointSettings>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RenameConversationRequest {
  pub title: Option<String>,
  pub description: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SendMessageRequest {
  pub content: String,
  #[serde(default)]
  pub attachments: Vec<Attachment>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SelectConversationRequest {
  pub id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CurlImportRequest {
  pub command: String,
  /// When set, the parsed settings replace this conversation's configuration.
  pub conversation_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CurlExportResponse {
  pub command: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UrlPreviewResponse {
  pub url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
  /// The user message as appended, absent when validation rejected the input.
  pub user_message: Option<ChatMessage>,
  /// The assistant reply or the error message shown in its place.
  pub reply: ChatMessage,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn method_parses_case_insensitively() {
    assert_eq!("patch".parse::<HttpMethod>(), Ok(HttpMethod::Patch));
    assert_eq!(" Get ".parse::<HttpMethod>(), Ok(HttpMethod::Get));
    assert!("TRACE".parse::<HttpMethod>().is_err());
  }

  #[test]
  fn settings_editing_ignores_blank_entries() {
    let mut settings = EndpointSettings::default();
    assert!(!settings.add_header("X-Empty", ""));
    assert!(!settings.add_query_param("", "value"));
    assert!(settings.add_header("Authorization", "Bearer abc"));
    assert!(settings.add_query_param("user_id", "123"));
    assert_eq!(settings.headers.len(), 2);
    assert_eq!(settings.remove_query_param("user_id").as_deref(), Some("123"));
    assert!(settings.query_params.is_empty());
  }

  #[test]
  fn message_serializes_with_iso_timestamp_and_type_field() {
    let mut msg = ChatMessage::user(
      "hi",
      vec![Attachment {
        kind: AttachmentKind::Image,
        url: "https://example.com/a.png".to_string(),
        name: "a.png".to_string(),
      }],
    );
    msg.timestamp = "2024-05-01T12:00:00Z".parse().expect("timestamp should parse");
    let value = serde_json::to_value(&msg).expect("message should serialize");
    assert_eq!(value["role"], "user");
    assert_eq!(value["status"], "pending");
    assert_eq!(value["attachments"][0]["type"], "image");
    assert_eq!(value["timestamp"], "2024-05-01T12:00:00Z");

    let back: ChatMessage = serde_json::from_value(value).expect("message should deserialize");
    assert_eq!(back, msg);
  }

  #[test]
  fn stored_message_without_status_loads_as_delivered() {
    let raw = r#"{"id":"1","role":"assistant","content":"hello","timestamp":"2024-05-01T12:00:00.000Z"}"#;
    let msg: ChatMessage = serde_json::from_str(raw).expect("legacy message should load");
    assert_eq!(msg.status, MessageStatus::Delivered);
    assert!(msg.attachments.is_empty());
  }
}
