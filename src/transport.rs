use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;

use crate::error::ChatError;
use crate::interpret::status_text;
use crate::models::HttpMethod;
use crate::request::OutboundRequest;

#[derive(Clone, Debug)]
pub struct RawResponse {
  pub status: u16,
  pub ok: bool,
  pub status_text: String,
  pub body: String,
}

/// Issues built requests. One client is shared by every conversation.
#[derive(Clone, Default)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }

  pub async fn execute(&self, request: &OutboundRequest) -> Result<RawResponse, ChatError> {
    let headers = to_header_map(&request.headers)?;

    let mut builder = self
      .client
      .request(to_method(request.method), request.url.clone())
      .headers(headers)
      .timeout(request.timeout);
    if let Some(body) = request.body.as_ref() {
      builder = builder.body(body.clone());
    }

    let resp = builder.send().await.map_err(map_reqwest_error)?;
    let status = resp.status();
    let body = resp.text().await.map_err(map_reqwest_error)?;

    Ok(RawResponse {
      status: status.as_u16(),
      ok: status.is_success(),
      status_text: status_text(status.as_u16()),
      body,
    })
  }
}

fn to_method(method: HttpMethod) -> Method {
  match method {
    HttpMethod::Get => Method::GET,
    HttpMethod::Post => Method::POST,
    HttpMethod::Put => Method::PUT,
    HttpMethod::Delete => Method::DELETE,
    HttpMethod::Patch => Method::PATCH,
  }
}

fn to_header_map(headers: &[(String, String)]) -> Result<HeaderMap, ChatError> {
  let mut map = HeaderMap::new();
  for (name, value) in headers {
    let header_name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|_| ChatError::Configuration(format!("invalid header name: {name}")))?;
    let header_value = HeaderValue::from_str(value)
      .map_err(|_| ChatError::Configuration(format!("invalid value for header {name}")))?;
    map.insert(header_name, header_value);
  }
  Ok(map)
}

fn map_reqwest_error(err: reqwest::Error) -> ChatError {
  if err.is_timeout() {
    ChatError::Timeout
  } else {
    ChatError::Transport(err.to_string())
  }
}
