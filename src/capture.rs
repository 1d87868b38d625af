use std::path::Path;

use base64::Engine;

use crate::models::{Attachment, AttachmentKind};

fn classify(path: &Path) -> Option<(AttachmentKind, &'static str)> {
  let ext = path.extension()?.to_str()?.to_lowercase();
  let found = match ext.as_str() {
    "png" => (AttachmentKind::Image, "image/png"),
    "jpg" | "jpeg" => (AttachmentKind::Image, "image/jpeg"),
    "gif" => (AttachmentKind::Image, "image/gif"),
    "webp" => (AttachmentKind::Image, "image/webp"),
    "svg" => (AttachmentKind::Image, "image/svg+xml"),
    "mp3" => (AttachmentKind::Audio, "audio/mpeg"),
    "wav" => (AttachmentKind::Audio, "audio/wav"),
    "ogg" | "oga" => (AttachmentKind::Audio, "audio/ogg"),
    "m4a" => (AttachmentKind::Audio, "audio/mp4"),
    "webm" => (AttachmentKind::Audio, "audio/webm"),
    "flac" => (AttachmentKind::Audio, "audio/flac"),
    _ => return None,
  };
  Some(found)
}

/// Reads an image or audio file into an attachment carrying a data URL.
pub fn attachment_from_path(path: &Path) -> anyhow::Result<Attachment> {
  let (kind, mime) = classify(path)
    .ok_or_else(|| anyhow::anyhow!("unsupported attachment type: {}", path.display()))?;
  let name = path
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| anyhow::anyhow!("attachment has no file name"))?
    .to_string();

  let bytes = std::fs::read(path)?;
  let base64 = base64::engine::general_purpose::STANDARD.encode(bytes);

  Ok(Attachment {
    kind,
    url: format!("data:{mime};base64,{base64}"),
    name,
  })
}
