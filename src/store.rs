use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::error::ChatError;
use crate::models::{
  ChatMessage, Conversation, ConversationSummary, EndpointPreset, EndpointSettings, MessageStatus,
};
use crate::storage::KvStore;

pub const CONVERSATIONS_KEY: &str = "conversations";
pub const ACTIVE_CONVERSATION_KEY: &str = "active_conversation_id";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreEventKind {
  ConversationCreated,
  ConversationUpdated,
  ConversationDeleted,
  ActiveChanged,
  LoadingChanged,
}

/// Change notification for whoever renders the store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreEvent {
  pub kind: StoreEventKind,
  pub conversation_id: Option<String>,
}

/// Owns every conversation and the active selection. Each mutation is written
/// through to the key-value store and announced on the event channel.
pub struct ConversationStore {
  conversations: Vec<Conversation>,
  active_id: Option<String>,
  kv: Arc<dyn KvStore>,
  welcome_message: String,
  default_settings: EndpointSettings,
  events: broadcast::Sender<StoreEvent>,
}

impl ConversationStore {
  pub fn load(kv: Arc<dyn KvStore>, config: &AppConfig) -> anyhow::Result<Self> {
    let mut conversations: Vec<Conversation> = match kv.get(CONVERSATIONS_KEY)? {
      Some(raw) => serde_json::from_str(&raw)?,
      None => Vec::new(),
    };
    let stored_active: Option<String> = match kv.get(ACTIVE_CONVERSATION_KEY)? {
      Some(raw) => serde_json::from_str(&raw)?,
      None => None,
    };

    // sends cut off by a crash or restart stay visible, but marked
    for msg in conversations.iter_mut().flat_map(|c| c.messages.iter_mut()) {
      if msg.status == MessageStatus::Pending {
        msg.status = MessageStatus::Interrupted;
      }
    }

    let active_id = match stored_active {
      Some(id) if conversations.iter().any(|c| c.id == id) => Some(id),
      _ => conversations.first().map(|c| c.id.clone()),
    };

    let (events, _) = broadcast::channel(64);
    Ok(Self {
      conversations,
      active_id,
      kv,
      welcome_message: config.welcome_message.clone(),
      default_settings: config.default_endpoint.clone(),
      events,
    })
  }

  pub fn event_sender(&self) -> broadcast::Sender<StoreEvent> {
    self.events.clone()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
    self.events.subscribe()
  }

  pub fn emit(&self, kind: StoreEventKind, conversation_id: Option<&str>) {
    let _ = self.events.send(StoreEvent {
      kind,
      conversation_id: conversation_id.map(|s| s.to_string()),
    });
  }

  pub fn list(&self) -> &[Conversation] {
    &self.conversations
  }

  /// Sidebar entries, filtered by a case-insensitive match on title,
  /// description or last message. `is_loading` reports in-flight sends.
  pub fn summaries(
    &self,
    query: Option<&str>,
    is_loading: impl Fn(&str) -> bool,
  ) -> Vec<ConversationSummary> {
    let needle = query
      .map(|q| q.trim().to_lowercase())
      .filter(|q| !q.is_empty());
    self
      .conversations
      .iter()
      .filter(|c| match needle.as_deref() {
        None => true,
        Some(n) => {
          c.title.to_lowercase().contains(n)
            || c.description.to_lowercase().contains(n)
            || c
              .messages
              .last()
              .map(|m| m.content.to_lowercase().contains(n))
              .unwrap_or(false)
        }
      })
      .map(|c| ConversationSummary::from_conversation(c, is_loading(&c.id)))
      .collect()
  }

  pub fn get(&self, id: &str) -> Option<&Conversation> {
    self.conversations.iter().find(|c| c.id == id)
  }

  pub fn active_id(&self) -> Option<&str> {
    self.active_id.as_deref()
  }

  pub fn active(&self) -> Option<&Conversation> {
    self.active_id.as_deref().and_then(|id| self.get(id))
  }

  /// Creates a conversation seeded with the welcome message and makes it active.
  pub fn create(
    &mut self,
    title: Option<String>,
    description: Option<String>,
    settings: Option<EndpointSettings>,
  ) -> Result<Conversation, ChatError> {
    let now = Utc::now();
    let title = title
      .map(|t| t.trim().to_string())
      .filter(|t| !t.is_empty())
      .unwrap_or_else(|| format!("Conversation {}", self.conversations.len() + 1));

    let conversation = Conversation {
      id: uuid::Uuid::new_v4().to_string(),
      title,
      description: description.unwrap_or_default(),
      endpoint_settings: settings.unwrap_or_else(|| self.default_settings.clone()),
      messages: vec![ChatMessage::assistant(self.welcome_message.clone())],
      created_at: now,
      updated_at: now,
    };

    self.conversations.insert(0, conversation.clone());
    self.active_id = Some(conversation.id.clone());
    self.persist()?;
    self.emit(StoreEventKind::ConversationCreated, Some(&conversation.id));
    self.emit(StoreEventKind::ActiveChanged, Some(&conversation.id));
    Ok(conversation)
  }

  pub fn create_from_preset(
    &mut self,
    preset: &EndpointPreset,
    title: Option<String>,
    description: Option<String>,
  ) -> Result<Conversation, ChatError> {
    let title = title.or_else(|| Some(preset.title.clone()));
    let description = description.or_else(|| Some(preset.description.clone()));
    self.create(title, description, Some(preset.settings.clone()))
  }

  pub fn select(&mut self, id: &str) -> Result<(), ChatError> {
    if self.get(id).is_none() {
      return Err(ChatError::NotFound(id.to_string()));
    }
    self.active_id = Some(id.to_string());
    self.persist()?;
    self.emit(StoreEventKind::ActiveChanged, Some(id));
    Ok(())
  }

  /// Removes a conversation. If it was active, the first remaining one (or
  /// nothing) becomes active.
  pub fn delete(&mut self, id: &str) -> Result<Option<String>, ChatError> {
    let idx = self.index_of(id)?;
    self.conversations.remove(idx);

    let was_active = self.active_id.as_deref() == Some(id);
    if was_active {
      self.active_id = self.conversations.first().map(|c| c.id.clone());
    }
    self.persist()?;
    self.emit(StoreEventKind::ConversationDeleted, Some(id));
    if was_active {
      self.emit(StoreEventKind::ActiveChanged, self.active_id.as_deref());
    }
    Ok(self.active_id.clone())
  }

  pub fn rename(
    &mut self,
    id: &str,
    title: Option<String>,
    description: Option<String>,
  ) -> Result<Conversation, ChatError> {
    self.update(id, |c| {
      if let Some(title) = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        c.title = title;
      }
      if let Some(description) = description {
        c.description = description;
      }
    })
  }

  pub fn update_settings(
    &mut self,
    id: &str,
    settings: EndpointSettings,
  ) -> Result<Conversation, ChatError> {
    self.update(id, |c| c.endpoint_settings = settings)
  }

  pub fn clear_messages(&mut self, id: &str) -> Result<Conversation, ChatError> {
    self.update(id, |c| c.messages.clear())
  }

  pub fn push_message(&mut self, id: &str, message: ChatMessage) -> Result<(), ChatError> {
    self.update(id, |c| c.messages.push(message)).map(|_| ())
  }

  pub fn set_message_status(
    &mut self,
    id: &str,
    message_id: &str,
    status: MessageStatus,
  ) -> Result<(), ChatError> {
    self
      .update(id, |c| {
        if let Some(msg) = c.messages.iter_mut().find(|m| m.id == message_id) {
          msg.status = status;
        }
      })
      .map(|_| ())
  }

  fn index_of(&self, id: &str) -> Result<usize, ChatError> {
    self
      .conversations
      .iter()
      .position(|c| c.id == id)
      .ok_or_else(|| ChatError::NotFound(id.to_string()))
  }

  /// Memory stays authoritative for the session. A failed write keeps the
  /// change and reports `Storage`; the next successful write saves the whole
  /// list again.
  fn update(
    &mut self,
    id: &str,
    apply: impl FnOnce(&mut Conversation),
  ) -> Result<Conversation, ChatError> {
    let idx = self.index_of(id)?;
    let conversation = &mut self.conversations[idx];
    apply(conversation);
    conversation.updated_at = Utc::now();
    let snapshot = conversation.clone();
    let persisted = self.persist();
    self.emit(StoreEventKind::ConversationUpdated, Some(id));
    persisted.map(|_| snapshot)
  }

  fn persist(&self) -> Result<(), ChatError> {
    let conversations = serde_json::to_string(&self.conversations)
      .map_err(|err| ChatError::Storage(err.to_string()))?;
    let active = serde_json::to_string(&self.active_id)
      .map_err(|err| ChatError::Storage(err.to_string()))?;
    self.kv.set(CONVERSATIONS_KEY, &conversations)?;
    self.kv.set(ACTIVE_CONVERSATION_KEY, &active)?;
    Ok(())
  }
}
