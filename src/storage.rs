use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Durable string key-value storage behind the conversation store.
pub trait KvStore: Send + Sync {
  fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
  fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

pub fn init_db(path: &Path) -> anyhow::Result<Connection> {
  let conn = Connection::open(path)?;
  create_schema(&conn)?;
  Ok(conn)
}

fn create_schema(conn: &Connection) -> anyhow::Result<()> {
  conn.execute_batch(
    "
    CREATE TABLE IF NOT EXISTS kv (
      key TEXT PRIMARY KEY,
      value_json TEXT NOT NULL,
      updated_at TEXT NOT NULL
    );
    ",
  )?;
  Ok(())
}

pub struct SqliteKvStore {
  conn: Mutex<Connection>,
}

impl SqliteKvStore {
  pub fn open(path: &Path) -> anyhow::Result<Self> {
    Ok(Self {
      conn: Mutex::new(init_db(path)?),
    })
  }

  pub fn open_in_memory() -> anyhow::Result<Self> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|_| anyhow::anyhow!("sqlite connection lock poisoned"))
  }
}

impl KvStore for SqliteKvStore {
  fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value_json FROM kv WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
    let updated_at = Utc::now().to_rfc3339();
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO kv (key, value_json, updated_at) VALUES (?1, ?2, ?3)
       ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
      params![key, value, updated_at],
    )?;
    Ok(())
  }
}

/// Process-lifetime storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryKvStore {
  values: Mutex<HashMap<String, String>>,
}

impl KvStore for MemoryKvStore {
  fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
    let values = self
      .values
      .lock()
      .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
    Ok(values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
    values.insert(key.to_string(), value.to_string());
    Ok(())
  }
}
