#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use tauri::{GlobalShortcutManager, Manager, State};
use tokio::sync::RwLock;

use endpoint_chat::capture;
use endpoint_chat::config::{load_or_init, save_config, AppConfig};
use endpoint_chat::curl;
use endpoint_chat::dispatch::Dispatcher;
use endpoint_chat::logger::Logger;
use endpoint_chat::models::{
  Attachment, Conversation, ConversationList, ConversationView, EndpointPreset, EndpointSettings,
  SendOutcome,
};
use endpoint_chat::request::preview_url;
use endpoint_chat::router::{run_router, RouterState};
use endpoint_chat::storage::SqliteKvStore;
use endpoint_chat::store::ConversationStore;
use endpoint_chat::transport::HttpTransport;

struct AppState {
  router_port: u16,
  config_path: PathBuf,
  config: Arc<RwLock<AppConfig>>,
  log_path: PathBuf,
  dispatcher: Arc<Dispatcher>,
}

#[tauri::command]
fn router_port(state: State<'_, AppState>) -> u16 {
  state.router_port
}

#[tauri::command]
async fn get_config(state: State<'_, AppState>) -> Result<AppConfig, String> {
  Ok(state.config.read().await.clone())
}

#[tauri::command]
async fn set_config(state: State<'_, AppState>, config: AppConfig) -> Result<(), String> {
  save_config(&state.config_path, &config).map_err(|e| e.to_string())?;
  *state.config.write().await = config;
  Ok(())
}

#[tauri::command]
fn get_log_path(state: State<'_, AppState>) -> String {
  state.log_path.display().to_string()
}

#[tauri::command]
async fn list_conversations(
  state: State<'_, AppState>,
  query: Option<String>,
) -> Result<ConversationList, String> {
  let loading = state.dispatcher.loading_ids();
  let store = state.dispatcher.store();
  let store = store.lock().await;
  Ok(ConversationList {
    active_id: store.active_id().map(|s| s.to_string()),
    conversations: store.summaries(query.as_deref(), |id| loading.contains(id)),
  })
}

#[tauri::command]
async fn get_conversation(state: State<'_, AppState>, id: String) -> Result<ConversationView, String> {
  let is_loading = state.dispatcher.is_loading(&id);
  let store = state.dispatcher.store();
  let store = store.lock().await;
  let conversation = store
    .get(&id)
    .cloned()
    .ok_or_else(|| format!("conversation not found: {id}"))?;
  Ok(ConversationView {
    is_active: store.active_id() == Some(id.as_str()),
    conversation,
    is_loading,
  })
}

#[tauri::command]
async fn create_conversation(
  state: State<'_, AppState>,
  title: Option<String>,
  description: Option<String>,
  preset_id: Option<String>,
) -> Result<Conversation, String> {
  let preset = match preset_id {
    Some(id) => Some(
      state
        .config
        .read()
        .await
        .preset(&id)
        .cloned()
        .ok_or_else(|| format!("unknown preset: {id}"))?,
    ),
    None => None,
  };
  let store = state.dispatcher.store();
  let mut store = store.lock().await;
  match preset {
    Some(preset) => store.create_from_preset(&preset, title, description),
    None => store.create(title, description, None),
  }
  .map_err(|e| e.to_string())
}

#[tauri::command]
async fn delete_conversation(state: State<'_, AppState>, id: String) -> Result<Option<String>, String> {
  state
    .dispatcher
    .delete_conversation(&id)
    .await
    .map_err(|e| e.to_string())
}

#[tauri::command]
async fn select_conversation(state: State<'_, AppState>, id: String) -> Result<(), String> {
  let store = state.dispatcher.store();
  let result = store.lock().await.select(&id);
  result.map_err(|e| e.to_string())
}

#[tauri::command]
async fn rename_conversation(
  state: State<'_, AppState>,
  id: String,
  title: Option<String>,
  description: Option<String>,
) -> Result<Conversation, String> {
  let store = state.dispatcher.store();
  let result = store.lock().await.rename(&id, title, description);
  result.map_err(|e| e.to_string())
}

#[tauri::command]
async fn update_endpoint_settings(
  state: State<'_, AppState>,
  id: String,
  settings: EndpointSettings,
) -> Result<Conversation, String> {
  let store = state.dispatcher.store();
  let result = store.lock().await.update_settings(&id, settings);
  result.map_err(|e| e.to_string())
}

#[tauri::command]
async fn clear_conversation(state: State<'_, AppState>, id: String) -> Result<Conversation, String> {
  state
    .dispatcher
    .clear_conversation(&id)
    .await
    .map_err(|e| e.to_string())
}

#[tauri::command]
async fn send_message(
  state: State<'_, AppState>,
  id: Option<String>,
  content: String,
  attachments: Option<Vec<Attachment>>,
) -> Result<SendOutcome, String> {
  let attachments = attachments.unwrap_or_default();
  let result = match id {
    Some(id) => state.dispatcher.send_message(&id, &content, attachments).await,
    None => state.dispatcher.send_to_active(&content, attachments).await,
  };
  result.map_err(|e| e.to_string())
}

#[tauri::command]
async fn import_curl(
  state: State<'_, AppState>,
  command: String,
  id: Option<String>,
) -> Result<EndpointSettings, String> {
  let settings = curl::import_curl(&command).map_err(|e| e.to_string())?;
  if let Some(id) = id {
    let store = state.dispatcher.store();
    let result = store.lock().await.update_settings(&id, settings.clone());
    result.map_err(|e| e.to_string())?;
  }
  Ok(settings)
}

#[tauri::command]
fn export_curl(settings: EndpointSettings) -> String {
  curl::export_curl(&settings)
}

#[tauri::command]
fn preview_endpoint_url(settings: EndpointSettings) -> String {
  preview_url(&settings)
}

#[tauri::command]
async fn list_presets(state: State<'_, AppState>) -> Result<Vec<EndpointPreset>, String> {
  Ok(state.config.read().await.presets.clone())
}

#[tauri::command]
fn attach_file(path: String) -> Result<Attachment, String> {
  capture::attachment_from_path(std::path::Path::new(&path)).map_err(|e| e.to_string())
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
        let db_path = data_dir.join("endpoint-chat.sqlite3");
        let log_path = data_dir.join("endpoint-chat.log");

        let config = load_or_init(&config_path)?;

        let logger = Arc::new(Logger::new(&log_path)?);
        logger.info("Endpoint Chat starting up");

        let kv = Arc::new(SqliteKvStore::open(&db_path)?);
        let store = ConversationStore::load(kv, &config)?;
        logger.info(&format!("loaded {} conversations", store.list().len()));

        let config = Arc::new(RwLock::new(config));
        let dispatcher = Arc::new(Dispatcher::new(
          store,
          HttpTransport::new(),
          config.clone(),
          logger.clone(),
        ));

        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();

        let router_state = RouterState {
          started_at: Instant::now(),
          config: config.clone(),
          dispatcher: dispatcher.clone(),
          logger: logger.clone(),
        };

        let router_logger = logger.clone();
        tauri::async_runtime::spawn(async move {
          if let Err(err) = run_router(listener, router_state).await {
            router_logger.error(&format!("router error: {err}"));
          }
        });

        app.manage(AppState {
          router_port: port,
          config_path,
          config,
          log_path,
          dispatcher,
        });

        let handle = app.handle();
        let mut gsm = handle.global_shortcut_manager();
        let _ = gsm.register("CmdOrCtrl+Shift+Space", move || {
          if let Some(window) = handle.get_window("main") {
            let visible = window.is_visible().unwrap_or(true);
            if visible {
              let _ = window.hide();
            } else {
              let _ = window.show();
              let _ = window.set_focus();
            }
          }
        });

        Ok(())
      })()
      .map_err(|e| e.into())
    })
    .invoke_handler(tauri::generate_handler![
      router_port,
      get_config,
      set_config,
      get_log_path,
      list_conversations,
      get_conversation,
      create_conversation,
      delete_conversation,
      select_conversation,
      rename_conversation,
      update_endpoint_settings,
      clear_conversation,
      send_message,
      import_curl,
      export_curl,
      preview_endpoint_url,
      list_presets,
      attach_file
    ])
    .run(tauri::generate_context!())
    .expect("error while running tauri application");
}
