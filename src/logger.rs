use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;

/// Append-only line logger. A logger without a file swallows everything.
pub struct Logger {
  file: Option<Mutex<std::fs::File>>,
}

impl Logger {
  pub fn new(path: &Path) -> anyhow::Result<Self> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Self {
      file: Some(Mutex::new(file)),
    })
  }

  pub fn discard() -> Self {
    Self { file: None }
  }

  pub fn log(&self, level: &str, message: &str) {
    let Some(file) = self.file.as_ref() else {
      return;
    };
    let ts = Utc::now().to_rfc3339();
    let line = format!("[{ts}] {level}: {message}\n");
    if let Ok(mut file) = file.lock() {
      let _ = file.write_all(line.as_bytes());
    }
  }

  pub fn info(&self, message: &str) {
    self.log("INFO", message);
  }

  pub fn warn(&self, message: &str) {
    self.log("WARN", message);
  }

  pub fn error(&self, message: &str) {
    self.log("ERROR", message);
  }
}
