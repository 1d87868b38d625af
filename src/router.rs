use std::convert::Infallible;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::{broadcast, RwLock};
use tower_http::cors::{Any, CorsLayer};

use crate::config::AppConfig;
use crate::curl;
use crate::dispatch::Dispatcher;
use crate::error::ChatError;
use crate::logger::Logger;
use crate::models::{
  ConversationList, ConversationView, CreateConversationRequest, CurlExportResponse,
  CurlImportRequest, EndpointSettings, RenameConversationRequest, SelectConversationRequest,
  SendMessageRequest, UrlPreviewResponse,
};
use crate::request::preview_url;

pub struct RouterState {
  pub started_at: Instant,
  pub config: Arc<RwLock<AppConfig>>,
  pub dispatcher: Arc<Dispatcher>,
  pub logger: Arc<Logger>,
}

pub fn build_router(state: RouterState) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/v1/presets", get(presets))
    .route("/v1/conversations", get(list_conversations).post(create_conversation))
    .route(
      "/v1/conversations/:id",
      get(get_conversation)
        .patch(rename_conversation)
        .delete(delete_conversation),
    )
    .route("/v1/conversations/:id/settings", put(update_settings))
    .route(
      "/v1/conversations/:id/messages",
      post(send_message).delete(clear_messages),
    )
    .route("/v1/conversations/:id/curl", get(export_curl))
    .route("/v1/conversations/:id/preview", get(preview))
    .route("/v1/active", post(select_active))
    .route("/v1/curl/import", post(import_curl))
    .route("/v1/events", get(events))
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    .with_state(Arc::new(state))
}

pub async fn run_router(listener: TcpListener, state: RouterState) -> anyhow::Result<()> {
  let logger = state.logger.clone();
  let app = build_router(state);

  listener.set_nonblocking(true)?;
  let listener = tokio::net::TcpListener::from_std(listener)?;
  logger.info(&format!("router listening on {}", listener.local_addr()?));
  axum::serve(listener, app).await?;
  Ok(())
}

async fn health(State(state): State<Arc<RouterState>>) -> Json<serde_json::Value> {
  let uptime = state.started_at.elapsed().as_millis();
  Json(serde_json::json!({
    "status": "ok",
    "version": env!("CARGO_PKG_VERSION"),
    "uptime_ms": uptime
  }))
}

async fn presets(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
  Json(state.config.read().await.presets.clone())
}

#[derive(Deserialize)]
struct ListQuery {
  query: Option<String>,
}

async fn list_conversations(
  State(state): State<Arc<RouterState>>,
  Query(params): Query<ListQuery>,
) -> impl IntoResponse {
  let loading = state.dispatcher.loading_ids();
  let store = state.dispatcher.store();
  let store = store.lock().await;
  Json(ConversationList {
    active_id: store.active_id().map(|s| s.to_string()),
    conversations: store.summaries(params.query.as_deref(), |id| loading.contains(id)),
  })
}

async fn create_conversation(
  State(state): State<Arc<RouterState>>,
  Json(req): Json<CreateConversationRequest>,
) -> impl IntoResponse {
  let preset = match req.preset_id.as_deref() {
    Some(preset_id) => match state.config.read().await.preset(preset_id) {
      Some(p) => Some(p.clone()),
      None => {
        return error_response(
          StatusCode::NOT_FOUND,
          "preset_not_found",
          &format!("unknown preset: {preset_id}"),
        )
      }
    },
    None => None,
  };

  let store = state.dispatcher.store();
  let mut store = store.lock().await;
  let created = match preset {
    Some(preset) => store.create_from_preset(&preset, req.title, req.description),
    None => store.create(req.title, req.description, req.settings),
  };
  match created {
    Ok(conversation) => (StatusCode::CREATED, Json(conversation)).into_response(),
    Err(err) => chat_error_response(err),
  }
}

async fn get_conversation(
  State(state): State<Arc<RouterState>>,
  Path(id): Path<String>,
) -> impl IntoResponse {
  let is_loading = state.dispatcher.is_loading(&id);
  let store = state.dispatcher.store();
  let store = store.lock().await;
  match store.get(&id) {
    Some(conversation) => Json(ConversationView {
      conversation: conversation.clone(),
      is_loading,
      is_active: store.active_id() == Some(id.as_str()),
    })
    .into_response(),
    None => chat_error_response(ChatError::NotFound(id)),
  }
}

async fn rename_conversation(
  State(state): State<Arc<RouterState>>,
  Path(id): Path<String>,
  Json(req): Json<RenameConversationRequest>,
) -> impl IntoResponse {
  let store = state.dispatcher.store();
  let result = store.lock().await.rename(&id, req.title, req.description);
  respond(result)
}

async fn delete_conversation(
  State(state): State<Arc<RouterState>>,
  Path(id): Path<String>,
) -> impl IntoResponse {
  match state.dispatcher.delete_conversation(&id).await {
    Ok(active_id) => Json(serde_json::json!({ "activeId": active_id })).into_response(),
    Err(err) => chat_error_response(err),
  }
}

async fn update_settings(
  State(state): State<Arc<RouterState>>,
  Path(id): Path<String>,
  Json(settings): Json<EndpointSettings>,
) -> impl IntoResponse {
  let store = state.dispatcher.store();
  let result = store.lock().await.update_settings(&id, settings);
  respond(result)
}

async fn send_message(
  State(state): State<Arc<RouterState>>,
  Path(id): Path<String>,
  Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
  respond(
    state
      .dispatcher
      .send_message(&id, &req.content, req.attachments)
      .await,
  )
}

async fn clear_messages(
  State(state): State<Arc<RouterState>>,
  Path(id): Path<String>,
) -> impl IntoResponse {
  respond(state.dispatcher.clear_conversation(&id).await)
}

async fn export_curl(
  State(state): State<Arc<RouterState>>,
  Path(id): Path<String>,
) -> impl IntoResponse {
  let store = state.dispatcher.store();
  let store = store.lock().await;
  match store.get(&id) {
    Some(c) => Json(CurlExportResponse {
      command: curl::export_curl(&c.endpoint_settings),
    })
    .into_response(),
    None => chat_error_response(ChatError::NotFound(id)),
  }
}

async fn preview(
  State(state): State<Arc<RouterState>>,
  Path(id): Path<String>,
) -> impl IntoResponse {
  let store = state.dispatcher.store();
  let store = store.lock().await;
  match store.get(&id) {
    Some(c) => Json(UrlPreviewResponse {
      url: preview_url(&c.endpoint_settings),
    })
    .into_response(),
    None => chat_error_response(ChatError::NotFound(id)),
  }
}

async fn select_active(
  State(state): State<Arc<RouterState>>,
  Json(req): Json<SelectConversationRequest>,
) -> impl IntoResponse {
  let store = state.dispatcher.store();
  let result = store.lock().await.select(&req.id);
  match result {
    Ok(()) => Json(serde_json::json!({ "activeId": req.id })).into_response(),
    Err(err) => chat_error_response(err),
  }
}

async fn import_curl(
  State(state): State<Arc<RouterState>>,
  Json(req): Json<CurlImportRequest>,
) -> impl IntoResponse {
  let settings = match curl::import_curl(&req.command) {
    Ok(s) => s,
    Err(err) => {
      state.logger.warn(&format!("cURL import failed: {err}"));
      return chat_error_response(err);
    }
  };

  if let Some(id) = req.conversation_id.as_deref() {
    let store = state.dispatcher.store();
    let result = store.lock().await.update_settings(id, settings.clone());
    if let Err(err) = result {
      return chat_error_response(err);
    }
  }
  Json(settings).into_response()
}

async fn events(
  State(state): State<Arc<RouterState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
  let mut rx = state.dispatcher.subscribe();

  let stream = stream! {
    loop {
      match rx.recv().await {
        Ok(event) => {
          let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
          yield Ok(Event::default().event("store").data(data));
        }
        Err(broadcast::error::RecvError::Lagged(_)) => {
          yield Ok(Event::default().event("resync").data("{}"));
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  };

  Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn respond<T: serde::Serialize>(result: Result<T, ChatError>) -> Response {
  match result {
    Ok(value) => (StatusCode::OK, Json(value)).into_response(),
    Err(err) => chat_error_response(err),
  }
}

fn chat_error_response(err: ChatError) -> Response {
  let status = match &err {
    ChatError::NotFound(_) => StatusCode::NOT_FOUND,
    ChatError::Busy => StatusCode::CONFLICT,
    ChatError::Configuration(_) | ChatError::Validation(_) | ChatError::Parse(_) => {
      StatusCode::BAD_REQUEST
    }
    ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    ChatError::Timeout | ChatError::Transport(_) | ChatError::Endpoint { .. } => {
      StatusCode::BAD_GATEWAY
    }
  };
  error_response(status, err.code(), &err.to_string())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
  let body = Json(serde_json::json!({ "error": message, "code": code }));
  (status, body).into_response()
}

#[cfg(test)]
mod tests {
  use axum::routing::post as post_route;
  use serde_json::{json, Value};

  use super::*;
  use crate::test_support::{loopback_client, spawn_endpoint, test_dispatcher};

  async fn spawn_router(config: AppConfig) -> String {
    let state = RouterState {
      started_at: Instant::now(),
      config: Arc::new(RwLock::new(config.clone())),
      dispatcher: Arc::new(test_dispatcher(config)),
      logger: Arc::new(Logger::discard()),
    };
    spawn_endpoint(build_router(state)).await
  }

  async fn echo_endpoint() -> String {
    let app = Router::new().route(
      "/agent",
      post_route(|Json(body): Json<Value>| async move {
        Json(json!({ "response": format!("echo: {}", body["message"].as_str().unwrap_or("")) }))
      }),
    );
    spawn_endpoint(app).await
  }

  #[tokio::test]
  async fn health_reports_ok() {
    let base = spawn_router(AppConfig::default()).await;
    let body: Value = loopback_client()
      .get(format!("{base}/health"))
      .send()
      .await
      .expect("health request")
      .json()
      .await
      .expect("health body");
    assert_eq!(body["status"], "ok");
  }

  #[tokio::test]
  async fn conversation_lifecycle() {
    let base = spawn_router(AppConfig::default()).await;
    let agent = echo_endpoint().await;
    let client = loopback_client();

    let created = client
      .post(format!("{base}/v1/conversations"))
      .json(&json!({
        "title": "Echo agent",
        "settings": {
          "url": format!("{agent}/agent"),
          "method": "POST",
          "headers": {},
          "queryParams": { "user_id": "123" },
          "body": "{\"message\":\"{{message}}\"}"
        }
      }))
      .send()
      .await
      .expect("create request");
    assert_eq!(created.status(), reqwest::StatusCode::CREATED);
    let created: Value = created.json().await.expect("create body");
    let id = created["id"].as_str().expect("id").to_string();

    let sent: Value = client
      .post(format!("{base}/v1/conversations/{id}/messages"))
      .json(&json!({ "content": "hello" }))
      .send()
      .await
      .expect("send request")
      .json()
      .await
      .expect("send body");
    assert_eq!(sent["reply"]["content"], "echo: hello");
    assert_eq!(sent["userMessage"]["status"], "delivered");

    let view: Value = client
      .get(format!("{base}/v1/conversations/{id}"))
      .send()
      .await
      .expect("view request")
      .json()
      .await
      .expect("view body");
    assert_eq!(view["isLoading"], false);
    assert_eq!(view["isActive"], true);
    assert_eq!(view["conversation"]["messages"].as_array().map(|m| m.len()), Some(3));

    let listed: Value = client
      .get(format!("{base}/v1/conversations?query=echo"))
      .send()
      .await
      .expect("list request")
      .json()
      .await
      .expect("list body");
    assert_eq!(listed["activeId"], id.as_str());
    assert_eq!(listed["conversations"][0]["lastMessage"], "echo: hello");

    let preview: Value = client
      .get(format!("{base}/v1/conversations/{id}/preview"))
      .send()
      .await
      .expect("preview request")
      .json()
      .await
      .expect("preview body");
    assert_eq!(preview["url"], format!("{agent}/agent?user_id=123"));

    let exported: Value = client
      .get(format!("{base}/v1/conversations/{id}/curl"))
      .send()
      .await
      .expect("curl request")
      .json()
      .await
      .expect("curl body");
    assert!(exported["command"]
      .as_str()
      .expect("command")
      .starts_with("curl -X POST"));

    let deleted: Value = client
      .delete(format!("{base}/v1/conversations/{id}"))
      .send()
      .await
      .expect("delete request")
      .json()
      .await
      .expect("delete body");
    assert_eq!(deleted["activeId"], Value::Null);
  }

  #[tokio::test]
  async fn unknown_conversation_is_not_found() {
    let base = spawn_router(AppConfig::default()).await;
    let resp = loopback_client()
      .post(format!("{base}/v1/conversations/missing/messages"))
      .json(&json!({ "content": "hi" }))
      .send()
      .await
      .expect("send request");
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.expect("error body");
    assert_eq!(body["code"], "not_found");
  }

  #[tokio::test]
  async fn preset_creation_and_unknown_preset() {
    let base = spawn_router(AppConfig::default()).await;
    let client = loopback_client();

    let created: Value = client
      .post(format!("{base}/v1/conversations"))
      .json(&json!({ "presetId": "openai-chat" }))
      .send()
      .await
      .expect("create request")
      .json()
      .await
      .expect("create body");
    assert_eq!(
      created["endpointSettings"]["url"],
      "https://api.openai.com/v1/chat/completions"
    );

    let missing = client
      .post(format!("{base}/v1/conversations"))
      .json(&json!({ "presetId": "nope" }))
      .send()
      .await
      .expect("create request");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn curl_import_applies_to_conversation() {
    let base = spawn_router(AppConfig::default()).await;
    let client = loopback_client();
    let created: Value = client
      .post(format!("{base}/v1/conversations"))
      .json(&json!({}))
      .send()
      .await
      .expect("create request")
      .json()
      .await
      .expect("create body");
    let id = created["id"].as_str().expect("id").to_string();

    let imported = client
      .post(format!("{base}/v1/curl/import"))
      .json(&json!({
        "command": "curl -X PATCH https://api.example.com/x -H \"A: b\"",
        "conversationId": id
      }))
      .send()
      .await
      .expect("import request");
    assert_eq!(imported.status(), reqwest::StatusCode::OK);

    let view: Value = client
      .get(format!("{base}/v1/conversations/{id}"))
      .send()
      .await
      .expect("view request")
      .json()
      .await
      .expect("view body");
    assert_eq!(view["conversation"]["endpointSettings"]["method"], "PATCH");
    assert_eq!(view["conversation"]["endpointSettings"]["headers"]["A"], "b");

    let bad = client
      .post(format!("{base}/v1/curl/import"))
      .json(&json!({ "command": "curl -X POST" }))
      .send()
      .await
      .expect("import request");
    assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = bad.json().await.expect("error body");
    assert_eq!(body["code"], "parse_error");
  }

  #[tokio::test]
  async fn events_stream_announces_changes() {
    let base = spawn_router(AppConfig::default()).await;
    let client = loopback_client();
    let mut stream = client
      .get(format!("{base}/v1/events"))
      .send()
      .await
      .expect("events request");

    client
      .post(format!("{base}/v1/conversations"))
      .json(&json!({ "title": "watched" }))
      .send()
      .await
      .expect("create request");

    let seen = tokio::time::timeout(Duration::from_secs(5), async {
      let mut buf = String::new();
      while let Ok(Some(chunk)) = stream.chunk().await {
        buf.push_str(&String::from_utf8_lossy(&chunk));
        if buf.contains("conversation_created") {
          return true;
        }
      }
      false
    })
    .await
    .unwrap_or(false);
    assert!(seen);
  }
}
