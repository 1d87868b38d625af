use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use url::Url;

use crate::error::ChatError;
use crate::models::{Attachment, EndpointSettings, HttpMethod};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MESSAGE_TOKEN: &str = "{{message}}";
const TIMESTAMP_TOKEN: &str = "{{timestamp}}";
const ATTACHMENTS_TOKEN: &str = "{{attachments}}";

/// A fully assembled call, ready for the transport.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
  pub method: HttpMethod,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<String>,
  pub timeout: Duration,
}

impl OutboundRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k == name)
      .map(|(_, v)| v.as_str())
  }
}

#[derive(Clone, Debug)]
pub struct RequestBuilder {
  timeout: Duration,
}

impl Default for RequestBuilder {
  fn default() -> Self {
    Self::new(REQUEST_TIMEOUT)
  }
}

impl RequestBuilder {
  pub fn new(timeout: Duration) -> Self {
    Self { timeout }
  }

  pub fn build(
    &self,
    settings: &EndpointSettings,
    message: &str,
    attachments: &[Attachment],
  ) -> Result<OutboundRequest, ChatError> {
    self.build_at(settings, message, attachments, Utc::now())
  }

  pub fn build_at(
    &self,
    settings: &EndpointSettings,
    message: &str,
    attachments: &[Attachment],
    now: DateTime<Utc>,
  ) -> Result<OutboundRequest, ChatError> {
    let url = build_url(settings)?;

    let mut headers: Vec<(String, String)> = settings
      .headers
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();

    let body = if settings.method == HttpMethod::Get {
      None
    } else {
      if !settings.headers.contains_key("Content-Type") {
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
      }
      Some(render_body(&settings.body, message, attachments, now))
    };

    Ok(OutboundRequest {
      method: settings.method,
      url,
      headers,
      body,
      timeout: self.timeout,
    })
  }
}

/// Substitutes the placeholder tokens in one left-to-right pass. Inserted text
/// is never scanned again, and unknown `{{...}}` sequences are kept verbatim.
pub fn render_body(
  template: &str,
  message: &str,
  attachments: &[Attachment],
  now: DateTime<Utc>,
) -> String {
  let mut out = String::with_capacity(template.len() + message.len());
  let mut rest = template;

  while let Some(start) = rest.find("{{") {
    out.push_str(&rest[..start]);
    let tail = &rest[start..];
    if tail.starts_with(MESSAGE_TOKEN) {
      out.push_str(&escape_json_fragment(message));
      rest = &tail[MESSAGE_TOKEN.len()..];
    } else if tail.starts_with(TIMESTAMP_TOKEN) {
      out.push_str(&now.to_rfc3339_opts(SecondsFormat::Millis, true));
      rest = &tail[TIMESTAMP_TOKEN.len()..];
    } else if tail.starts_with(ATTACHMENTS_TOKEN) {
      out.push_str(&serde_json::to_string(attachments).unwrap_or_else(|_| "[]".to_string()));
      rest = &tail[ATTACHMENTS_TOKEN.len()..];
    } else {
      out.push_str("{{");
      rest = &tail[2..];
    }
  }
  out.push_str(rest);
  out
}

/// JSON string escaping without the surrounding quotes, so the result can sit
/// inside a string literal of the template.
pub fn escape_json_fragment(value: &str) -> String {
  let quoted = serde_json::Value::String(value.to_string()).to_string();
  quoted[1..quoted.len() - 1].to_string()
}

pub fn build_url(settings: &EndpointSettings) -> Result<Url, ChatError> {
  let raw = settings.url.trim();
  if raw.is_empty() {
    return Err(ChatError::Configuration("endpoint URL not set".to_string()));
  }

  let mut url =
    Url::parse(raw).map_err(|_| ChatError::Configuration("invalid endpoint URL".to_string()))?;
  if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
    return Err(ChatError::Configuration("invalid endpoint URL".to_string()));
  }

  if let Some(extra) = encode_query(settings) {
    let query = match url.query() {
      Some(existing) if !existing.is_empty() => format!("{existing}&{extra}"),
      _ => extra,
    };
    url.set_query(Some(&query));
  }
  Ok(url)
}

/// The URL as the editor previews it. Never fails, even for unparseable URLs.
pub fn preview_url(settings: &EndpointSettings) -> String {
  let base = settings.url.trim();
  match encode_query(settings) {
    Some(query) if base.contains('?') => format!("{base}&{query}"),
    Some(query) => format!("{base}?{query}"),
    None => base.to_string(),
  }
}

fn encode_query(settings: &EndpointSettings) -> Option<String> {
  let pairs: Vec<String> = settings
    .query_params
    .iter()
    .filter(|(_, v)| !v.is_empty())
    .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
    .collect();
  if pairs.is_empty() {
    None
  } else {
    Some(pairs.join("&"))
  }
}

/// Percent-encodes a query component, spaces as `%20` rather than `+`.
pub fn encode_component(value: &str) -> String {
  // form encoding escapes a literal '+' as %2B, so any '+' left is a space
  url::form_urlencoded::byte_serialize(value.as_bytes())
    .collect::<String>()
    .replace('+', "%20")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::AttachmentKind;

  fn fixed_now() -> DateTime<Utc> {
    "2024-05-01T12:00:00Z".parse().expect("fixed time should parse")
  }

  fn settings(url: &str, method: HttpMethod, body: &str) -> EndpointSettings {
    EndpointSettings {
      url: url.to_string(),
      method,
      headers: Default::default(),
      query_params: Default::default(),
      body: body.to_string(),
    }
  }

  #[test]
  fn empty_url_is_a_configuration_error() {
    let err = RequestBuilder::default()
      .build(&settings("  ", HttpMethod::Post, ""), "hi", &[])
      .expect_err("empty URL must fail");
    assert!(matches!(err, ChatError::Configuration(_)));
    assert_eq!(err.to_string(), "endpoint URL not set");
  }

  #[test]
  fn relative_or_odd_urls_are_rejected() {
    for url in ["/v1/chat", "not a url", "mailto:someone@example.com", "ftp://example.com/x"] {
      let err = RequestBuilder::default()
        .build(&settings(url, HttpMethod::Post, ""), "hi", &[])
        .expect_err("URL must be rejected");
      assert_eq!(err.to_string(), "invalid endpoint URL", "url: {url}");
    }
  }

  #[test]
  fn message_is_escaped_inside_string_literal() {
    let s = settings("https://example.com/chat", HttpMethod::Post, r#"{"message":"{{message}}"}"#);
    let req = RequestBuilder::default()
      .build(&s, r#"He said "hi""#, &[])
      .expect("request should build");
    assert_eq!(req.body.as_deref(), Some(r#"{"message":"He said \"hi\""}"#));
  }

  #[test]
  fn escaping_covers_backslashes_and_control_characters() {
    assert_eq!(escape_json_fragment("a\\b"), "a\\\\b");
    assert_eq!(escape_json_fragment("line1\nline2\t"), "line1\\nline2\\t");
    assert_eq!(escape_json_fragment("\u{1}"), "\\u0001");
    assert_eq!(escape_json_fragment("plain"), "plain");
  }

  #[test]
  fn every_occurrence_is_replaced() {
    let body = render_body("{{message}}|{{message}}|{{timestamp}}", "x", &[], fixed_now());
    assert_eq!(body, "x|x|2024-05-01T12:00:00.000Z");
  }

  #[test]
  fn substituted_text_is_not_rescanned() {
    let body = render_body(r#"{"m":"{{message}}"}"#, "{{timestamp}}", &[], fixed_now());
    assert_eq!(body, r#"{"m":"{{timestamp}}"}"#);
  }

  #[test]
  fn unknown_tokens_are_left_alone() {
    let body = render_body("{{user}} {{ message }} {{", "x", &[], fixed_now());
    assert_eq!(body, "{{user}} {{ message }} {{");
  }

  #[test]
  fn attachments_render_as_json_array() {
    let attachments = vec![Attachment {
      kind: AttachmentKind::Audio,
      url: "https://cdn.example.com/a.mp3".to_string(),
      name: "a.mp3".to_string(),
    }];
    let empty = render_body(r#"{"a":{{attachments}}}"#, "", &[], fixed_now());
    assert_eq!(empty, r#"{"a":[]}"#);

    let body = render_body(r#"{"a":{{attachments}}}"#, "", &attachments, fixed_now());
    let parsed: serde_json::Value = serde_json::from_str(&body).expect("body should be JSON");
    assert_eq!(parsed["a"][0]["type"], "audio");
    assert_eq!(parsed["a"][0]["name"], "a.mp3");
  }

  #[test]
  fn query_params_are_percent_encoded_and_empty_values_dropped() {
    let mut s = settings("https://example.com/hook", HttpMethod::Post, "");
    s.query_params.insert("a b".to_string(), "c&d".to_string());
    s.query_params.insert("skip".to_string(), String::new());
    let req = RequestBuilder::default().build(&s, "", &[]).expect("request should build");
    assert_eq!(req.url.as_str(), "https://example.com/hook?a%20b=c%26d");
    assert!(!req.url.as_str().contains("skip"));
  }

  #[test]
  fn params_append_to_existing_query() {
    let mut s = settings("https://example.com/hook?v=1", HttpMethod::Get, "");
    s.query_params.insert("session".to_string(), "abc".to_string());
    let url = build_url(&s).expect("url should build");
    assert_eq!(url.as_str(), "https://example.com/hook?v=1&session=abc");
  }

  #[test]
  fn content_type_is_injected_for_bodies_only() {
    let post = RequestBuilder::default()
      .build(&settings("https://example.com", HttpMethod::Post, "{}"), "", &[])
      .expect("post should build");
    assert_eq!(post.header("Content-Type"), Some("application/json"));

    let get = RequestBuilder::default()
      .build(&settings("https://example.com", HttpMethod::Get, "{}"), "", &[])
      .expect("get should build");
    assert_eq!(get.header("Content-Type"), None);
    assert!(get.body.is_none());
  }

  #[test]
  fn existing_content_type_is_kept() {
    let mut s = settings("https://example.com", HttpMethod::Post, "hello");
    s.headers.insert("Content-Type".to_string(), "text/plain".to_string());
    let req = RequestBuilder::default().build(&s, "", &[]).expect("request should build");
    let content_types: Vec<_> = req.headers.iter().filter(|(k, _)| k == "Content-Type").collect();
    assert_eq!(content_types.len(), 1);
    assert_eq!(req.header("Content-Type"), Some("text/plain"));
  }

  #[test]
  fn content_type_check_is_case_sensitive() {
    let mut s = settings("https://example.com", HttpMethod::Put, "{}");
    s.headers.insert("content-type".to_string(), "application/xml".to_string());
    let req = RequestBuilder::default().build(&s, "", &[]).expect("request should build");
    assert_eq!(req.header("content-type"), Some("application/xml"));
    assert_eq!(req.header("Content-Type"), Some("application/json"));
  }

  #[test]
  fn timeout_is_attached() {
    let req = RequestBuilder::default()
      .build(&settings("https://example.com", HttpMethod::Delete, ""), "", &[])
      .expect("request should build");
    assert_eq!(req.timeout, Duration::from_secs(30));
    assert_eq!(req.body.as_deref(), Some(""));
  }

  #[test]
  fn preview_never_fails() {
    let mut s = settings("not a url", HttpMethod::Post, "");
    s.query_params.insert("q".to_string(), "a b".to_string());
    assert_eq!(preview_url(&s), "not a url?q=a%20b");
  }
}
