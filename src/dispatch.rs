use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use url::Url;

use crate::config::AppConfig;
use crate::error::ChatError;
use crate::interpret::interpret;
use crate::logger::Logger;
use crate::models::{
  Attachment, ChatMessage, Conversation, EndpointSettings, MessageStatus, SendOutcome,
};
use crate::request::RequestBuilder;
use crate::store::{ConversationStore, StoreEvent, StoreEventKind};
use crate::transport::HttpTransport;

pub const INVALID_INPUT_REPLY: &str = "Error: the message contains invalid data.";

#[derive(Clone, Copy, Debug)]
pub struct InputLimits {
  pub max_message_chars: usize,
  pub max_attachment_name_chars: usize,
}

impl From<&AppConfig> for InputLimits {
  fn from(config: &AppConfig) -> Self {
    Self {
      max_message_chars: config.max_message_chars,
      max_attachment_name_chars: config.max_attachment_name_chars,
    }
  }
}

/// Checks a trimmed message and its attachments before anything is sent.
pub fn validate(content: &str, attachments: &[Attachment], limits: InputLimits) -> Result<(), ChatError> {
  let chars = content.chars().count();
  if chars == 0 {
    return Err(ChatError::Validation("message is empty".to_string()));
  }
  if chars > limits.max_message_chars {
    return Err(ChatError::Validation(format!(
      "message is {chars} characters, limit is {}",
      limits.max_message_chars
    )));
  }
  for attachment in attachments {
    if Url::parse(&attachment.url).is_err() {
      return Err(ChatError::Validation(format!(
        "attachment {} has an invalid url",
        attachment.name
      )));
    }
    if attachment.name.chars().count() > limits.max_attachment_name_chars {
      return Err(ChatError::Validation("attachment name is too long".to_string()));
    }
  }
  Ok(())
}

/// Marks a conversation as sending for as long as it lives.
struct InFlight {
  ids: Arc<StdMutex<HashSet<String>>>,
  id: String,
  events: broadcast::Sender<StoreEvent>,
}

impl Drop for InFlight {
  fn drop(&mut self) {
    self
      .ids
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .remove(&self.id);
    let _ = self.events.send(StoreEvent {
      kind: StoreEventKind::LoadingChanged,
      conversation_id: Some(self.id.clone()),
    });
  }
}

/// Runs the send cycle: validate, append the user message, call the endpoint,
/// append the reply. At most one send per conversation is in flight.
pub struct Dispatcher {
  store: Arc<Mutex<ConversationStore>>,
  transport: HttpTransport,
  config: Arc<RwLock<AppConfig>>,
  logger: Arc<Logger>,
  in_flight: Arc<StdMutex<HashSet<String>>>,
  events: broadcast::Sender<StoreEvent>,
}

impl Dispatcher {
  pub fn new(
    store: ConversationStore,
    transport: HttpTransport,
    config: Arc<RwLock<AppConfig>>,
    logger: Arc<Logger>,
  ) -> Self {
    let events = store.event_sender();
    Self {
      store: Arc::new(Mutex::new(store)),
      transport,
      config,
      logger,
      in_flight: Arc::new(StdMutex::new(HashSet::new())),
      events,
    }
  }

  pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
    self.store.clone()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
    self.events.subscribe()
  }

  pub fn is_loading(&self, conversation_id: &str) -> bool {
    self.loading_ids().contains(conversation_id)
  }

  pub fn loading_ids(&self) -> HashSet<String> {
    self
      .in_flight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .clone()
  }

  fn begin(&self, conversation_id: &str) -> Result<InFlight, ChatError> {
    let mut ids = self
      .in_flight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if !ids.insert(conversation_id.to_string()) {
      return Err(ChatError::Busy);
    }
    drop(ids);
    let _ = self.events.send(StoreEvent {
      kind: StoreEventKind::LoadingChanged,
      conversation_id: Some(conversation_id.to_string()),
    });
    Ok(InFlight {
      ids: self.in_flight.clone(),
      id: conversation_id.to_string(),
      events: self.events.clone(),
    })
  }

  pub async fn send_to_active(
    &self,
    content: &str,
    attachments: Vec<Attachment>,
  ) -> Result<SendOutcome, ChatError> {
    let active = self.store.lock().await.active_id().map(|s| s.to_string());
    match active {
      Some(id) => self.send_message(&id, content, attachments).await,
      None => Err(ChatError::NotFound("no active conversation".to_string())),
    }
  }

  /// Failures of the exchange itself come back as an error reply in the
  /// outcome and failed writes are logged; `Err` is reserved for unknown
  /// conversations and a send already in flight.
  pub async fn send_message(
    &self,
    conversation_id: &str,
    content: &str,
    attachments: Vec<Attachment>,
  ) -> Result<SendOutcome, ChatError> {
    let (limits, timeout) = {
      let config = self.config.read().await;
      (InputLimits::from(&*config), config.request_timeout())
    };

    // begin under the store lock so a concurrent delete sees the send
    let _in_flight = {
      let store = self.store.lock().await;
      if store.get(conversation_id).is_none() {
        return Err(ChatError::NotFound(conversation_id.to_string()));
      }
      self.begin(conversation_id)?
    };

    let content = content.trim();
    if let Err(err) = validate(content, &attachments, limits) {
      self
        .logger
        .warn(&format!("rejected message for {conversation_id}: {err}"));
      let reply = ChatMessage::assistant(INVALID_INPUT_REPLY);
      let pushed = self
        .store
        .lock()
        .await
        .push_message(conversation_id, reply.clone());
      self.tolerate_storage(conversation_id, pushed)?;
      return Ok(SendOutcome {
        user_message: None,
        reply,
      });
    }

    let mut user_message = ChatMessage::user(content, attachments);
    let settings = {
      let mut store = self.store.lock().await;
      let pushed = store.push_message(conversation_id, user_message.clone());
      self.tolerate_storage(conversation_id, pushed)?;
      store
        .get(conversation_id)
        .map(|c| c.endpoint_settings.clone())
        .ok_or_else(|| ChatError::NotFound(conversation_id.to_string()))?
    };

    let (reply, status) = match self
      .exchange(&settings, content, &user_message.attachments, timeout)
      .await
    {
      Ok(text) => (ChatMessage::assistant(text), MessageStatus::Delivered),
      Err(err) => {
        self
          .logger
          .error(&format!("send failed for {conversation_id}: {err}"));
        (ChatMessage::assistant(format!("Error: {err}")), MessageStatus::Failed)
      }
    };

    {
      let mut store = self.store.lock().await;
      let marked = store.set_message_status(conversation_id, &user_message.id, status);
      self.tolerate_storage(conversation_id, marked)?;
      let pushed = store.push_message(conversation_id, reply.clone());
      self.tolerate_storage(conversation_id, pushed)?;
    }
    user_message.status = status;

    Ok(SendOutcome {
      user_message: Some(user_message),
      reply,
    })
  }

  /// Deletes a conversation unless a send to it is in flight.
  pub async fn delete_conversation(&self, conversation_id: &str) -> Result<Option<String>, ChatError> {
    let mut store = self.store.lock().await;
    if self.is_loading(conversation_id) {
      return Err(ChatError::Busy);
    }
    store.delete(conversation_id)
  }

  /// Empties a conversation's log unless a send to it is in flight.
  pub async fn clear_conversation(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
    let mut store = self.store.lock().await;
    if self.is_loading(conversation_id) {
      return Err(ChatError::Busy);
    }
    store.clear_messages(conversation_id)
  }

  // the store keeps the change in memory on a failed write, so the send goes
  // on and the reply still lands in the conversation
  fn tolerate_storage(&self, conversation_id: &str, result: Result<(), ChatError>) -> Result<(), ChatError> {
    match result {
      Err(ChatError::Storage(err)) => {
        self
          .logger
          .error(&format!("could not save conversation {conversation_id}: {err}"));
        Ok(())
      }
      other => other,
    }
  }

  async fn exchange(
    &self,
    settings: &EndpointSettings,
    message: &str,
    attachments: &[Attachment],
    timeout: Duration,
  ) -> Result<String, ChatError> {
    let request = RequestBuilder::new(timeout).build(settings, message, attachments)?;
    self.logger.info(&format!(
      "{} {}{}",
      request.method,
      request.url.host_str().unwrap_or(""),
      request.url.path()
    ));
    let response = self.transport.execute(&request).await?;
    if !response.ok {
      self
        .logger
        .warn(&format!("endpoint answered {} {}", response.status, response.status_text));
    }
    interpret(&response.body, response.status, response.ok)
  }
}
