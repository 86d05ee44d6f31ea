//! Request/response snapshots and the network seam.
//!
//! Everything the worker intercepts is expressed as a [`Request`], and
//! everything it serves or stores is a [`Response`]. The [`Network`] trait is
//! the only way the worker reaches the outside world.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use url::Url;

pub use reqwest::Method;

/// What kind of resource a request is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  Document,
  Script,
  Style,
  Font,
  Image,
  Manifest,
  /// Plain programmatic fetch with no resource type
  #[default]
  Empty,
}

/// An intercepted outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  /// Top-level navigation to a document
  pub navigate: bool,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// A plain GET with no resource type.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Empty,
      navigate: false,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A top-level navigation to a document.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      navigate: true,
      ..Self::get(url)
    }
  }

  /// An authenticated PUT carrying a JSON body.
  pub fn put_json(url: Url, body: &serde_json::Value, bearer: &str) -> Result<Self> {
    let body =
      serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;

    Ok(Self {
      method: Method::PUT,
      url,
      destination: Destination::Empty,
      navigate: false,
      headers: vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("authorization".to_string(), format!("Bearer {}", bearer)),
      ],
      body: Some(body),
    })
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  /// Only GET requests take part in caching.
  pub fn is_read(&self) -> bool {
    self.method == Method::GET
  }

  pub fn is_navigation(&self) -> bool {
    self.navigate || self.destination == Destination::Document
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

/// A full response snapshot: status, headers and body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
    }
  }

  /// The synthetic response served when neither network nor cache can help.
  pub fn service_unavailable() -> Self {
    Self::new(
      503,
      vec![("content-type".to_string(), "text/plain".to_string())],
      "Service Unavailable",
    )
  }

  /// Any 2xx status.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only exact 200 responses are ever written to a partition.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(k, _)| k.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}

/// Transport used for every outgoing request.
///
/// `Err` means the request never produced a response (unreachable host,
/// aborted connection). Any status code, including 4xx/5xx, is `Ok`.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Network transport backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("offline-worker/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response::new(status, headers, body.to_vec()))
  }
}
