//! HTTP implementation of the remote tree source.

use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::api_types::{normalize_folder, normalize_special};
use super::{RemoteError, SpecialRoot, TreeSource};
use crate::cache::{Listing, NodeId};

/// Remote content API client. Authenticates with a bearer token and maps
/// HTTP statuses onto the error taxonomy: 404 is `NotFound`, 401/403 is
/// `PermissionDenied`, everything else (including I/O) is `Transport`.
#[derive(Clone)]
pub struct HttpTreeSource {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl HttpTreeSource {
  pub fn new(base_url: &str, token: String) -> Result<Self, RemoteError> {
    // Url::join treats a path without a trailing slash as a file.
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{base_url}/")
    };
    let base = Url::parse(&normalized)
      .map_err(|e| RemoteError::Transport(format!("invalid base URL {base_url:?}: {e}")))?;

    Ok(Self {
      http: reqwest::Client::new(),
      base,
      token,
    })
  }

  async fn get_json(&self, path: &str) -> Result<Value, RemoteError> {
    let url = self
      .base
      .join(path)
      .map_err(|e| RemoteError::Transport(format!("invalid request path {path:?}: {e}")))?;

    debug!(%url, "remote fetch");
    let resp = self
      .http
      .get(url)
      .bearer_auth(&self.token)
      .send()
      .await?;

    match resp.status() {
      StatusCode::NOT_FOUND => Err(RemoteError::NotFound(path.to_string())),
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
        Err(RemoteError::PermissionDenied(path.to_string()))
      }
      status if !status.is_success() => Err(RemoteError::Transport(format!(
        "unexpected status {status} for {path}"
      ))),
      _ => Ok(resp.json().await?),
    }
  }
}

impl TreeSource for HttpTreeSource {
  /// Fetch and normalize a listing. Well-known special roots use the export
  /// endpoint (children under `entries`); everything else is a regular
  /// folder fetch.
  async fn fetch_listing(&self, workspace: &str, id: &NodeId) -> Result<Listing, RemoteError> {
    match SpecialRoot::from_id(id) {
      Some(category) => {
        let raw = self
          .get_json(&format!("v2/content/{}/export", category.as_str()))
          .await?;
        normalize_special(workspace, category, raw)
      }
      None => {
        let raw = self.get_json(&format!("v2/content/folders/{id}")).await?;
        normalize_folder(workspace, raw)
      }
    }
  }

  async fn fetch_item(&self, id: &NodeId) -> Result<Value, RemoteError> {
    self.get_json(&format!("v2/content/items/{id}/export")).await
  }
}
