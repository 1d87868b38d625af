use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::Router;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::dispatch::Dispatcher;
use crate::logger::Logger;
use crate::storage::{KvStore, MemoryKvStore};
use crate::store::ConversationStore;
use crate::transport::HttpTransport;

/// Serves `app` on an ephemeral loopback port and returns its base URL.
pub async fn spawn_endpoint(app: Router) -> String {
  let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
    .await
    .expect("loopback bind should succeed");
  let addr = listener.local_addr().expect("listener should have an address");
  tokio::spawn(async move {
    let _ = axum::serve(listener, app).await;
  });
  format!("http://{addr}")
}

/// A client that ignores proxy settings from the environment.
pub fn loopback_client() -> reqwest::Client {
  reqwest::Client::builder()
    .no_proxy()
    .build()
    .expect("client should build")
}

pub fn test_store(config: &AppConfig) -> ConversationStore {
  ConversationStore::load(Arc::new(MemoryKvStore::default()), config).expect("empty store should load")
}

pub fn test_dispatcher(config: AppConfig) -> Dispatcher {
  Dispatcher::new(
    test_store(&config),
    HttpTransport::with_client(loopback_client()),
    Arc::new(RwLock::new(config)),
    Arc::new(Logger::discard()),
  )
}

/// Memory-backed storage whose writes can be switched off to simulate a full
/// or read-only disk.
#[derive(Default)]
pub struct FlakyKvStore {
  inner: MemoryKvStore,
  fail_writes: AtomicBool,
}

impl FlakyKvStore {
  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }
}

impl KvStore for FlakyKvStore {
  fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
    self.inner.get(key)
  }

  fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      anyhow::bail!("disk full");
    }
    self.inner.set(key, value)
  }
}
