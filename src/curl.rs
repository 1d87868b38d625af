//! cURL import and export for endpoint settings. Import is a best-effort scan,
//! not a shell parser: nested quotes and exotic flags are not understood.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::ChatError;
use crate::models::{EndpointSettings, HttpMethod};
use crate::request::preview_url;

static CONTINUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\\r?\n").expect("valid regex"));
static METHOD: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"(?:^|\s)(?:-X|--request)\s*['"]?([A-Za-z]+)['"]?"#).expect("valid regex")
});
static HEADER: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"(?:^|\s)(?:-H|--header)\s+(?:"((?:[^"\\]|\\.)*)"|'((?:[^']|'\\'')*)')"#)
    .expect("valid regex")
});
static DATA: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r#"(?:^|\s)(?:-d|--data|--data-raw|--data-binary)\s+(?:'((?:[^']|'\\'')*)'|"((?:[^"\\]|\\.)*)"|(\S+))"#,
  )
  .expect("valid regex")
});
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s"']+"#).expect("valid regex"));

/// Renders settings as a one-line cURL command.
pub fn export_curl(settings: &EndpointSettings) -> String {
  let mut parts = vec![
    "curl".to_string(),
    "-X".to_string(),
    settings.method.as_str().to_string(),
    format!("\"{}\"", escape_double(&preview_url(settings))),
  ];
  for (key, value) in &settings.headers {
    parts.push(format!("-H \"{}\"", escape_double(&format!("{key}: {value}"))));
  }
  if settings.method != HttpMethod::Get && !settings.body.is_empty() {
    parts.push(format!("-d '{}'", settings.body.replace('\'', r"'\''")));
  }
  parts.join(" ")
}

/// Reads URL, method, headers and payload out of a cURL command.
pub fn import_curl(command: &str) -> Result<EndpointSettings, ChatError> {
  let text = CONTINUATION.replace_all(command.trim(), " ").into_owned();
  if text.is_empty() {
    return Err(ChatError::Parse("empty cURL command".to_string()));
  }

  let mut settings = EndpointSettings {
    url: String::new(),
    method: HttpMethod::Get,
    headers: Default::default(),
    query_params: Default::default(),
    body: String::new(),
  };

  // headers and payload are cut out first so URLs inside them are not
  // mistaken for the target
  let mut remainder = text.clone();
  for caps in HEADER.captures_iter(&text) {
    let raw = match (caps.get(1), caps.get(2)) {
      (Some(m), _) => unescape_double(m.as_str()),
      (_, Some(m)) => unescape_single(m.as_str()),
      _ => continue,
    };
    if let Some((key, value)) = raw.split_once(':') {
      let key = key.trim();
      if !key.is_empty() {
        settings.headers.insert(key.to_string(), value.trim().to_string());
      }
    }
    remainder = remainder.replacen(&caps[0], " ", 1);
  }

  let mut has_data = false;
  if let Some(caps) = DATA.captures(&text) {
    settings.body = match (caps.get(1), caps.get(2), caps.get(3)) {
      (Some(m), _, _) => unescape_single(m.as_str()),
      (_, Some(m), _) => unescape_double(m.as_str()),
      (_, _, Some(m)) => m.as_str().to_string(),
      _ => String::new(),
    };
    has_data = true;
    remainder = remainder.replacen(&caps[0], " ", 1);
  }

  settings.method = match METHOD.captures(&remainder) {
    Some(caps) => caps[1]
      .parse()
      .map_err(|err: String| ChatError::Parse(err))?,
    None if has_data => HttpMethod::Post,
    None => HttpMethod::Get,
  };

  let raw_url = URL
    .find(&remainder)
    .map(|m| m.as_str().to_string())
    .ok_or_else(|| ChatError::Parse("no URL found in cURL command".to_string()))?;
  split_query(&raw_url, &mut settings);

  Ok(settings)
}

fn split_query(raw_url: &str, settings: &mut EndpointSettings) {
  match Url::parse(raw_url) {
    Ok(mut url) if url.query().is_some() => {
      for (key, value) in url.query_pairs() {
        settings.query_params.insert(key.into_owned(), value.into_owned());
      }
      url.set_query(None);
      settings.url = url.to_string();
    }
    _ => settings.url = raw_url.to_string(),
  }
}

fn escape_double(value: &str) -> String {
  value.replace('\\', r"\\").replace('"', "\\\"")
}

fn unescape_double(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  let mut chars = value.chars();
  while let Some(c) = chars.next() {
    if c == '\\' {
      match chars.next() {
        Some(next @ ('"' | '\\' | '$' | '`')) => out.push(next),
        Some(other) => {
          out.push('\\');
          out.push(other);
        }
        None => out.push('\\'),
      }
    } else {
      out.push(c);
    }
  }
  out
}

fn unescape_single(value: &str) -> String {
  value.replace(r"'\''", "'")
}
