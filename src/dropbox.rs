//! Provider data-API client the TV uses once linked.
//!
//! Authenticated with the short-lived provider access token obtained from
//! the device endpoint; the first call the viewer needs is the root
//! folder listing.

use crate::errors::ApiError;
use serde::{Deserialize, Serialize};

const DEFAULT_API_BASE: &str = "https://api.dropboxapi.com";

#[derive(Debug, Clone, Serialize)]
struct ListFolderRequest<'a> {
    path: &'a str,
    recursive: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderEntry {
    /// Entry kind discriminator ("folder", "file", "deleted").
    #[serde(rename = ".tag")]
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListFolderPage {
    pub entries: Vec<FolderEntry>,
    pub cursor: String,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct DropboxClient {
    http: reqwest::Client,
    access_token: String,
    api_base: String,
}

impl DropboxClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_api_base(access_token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(access_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token: access_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Folders at the account root.
    pub async fn list_root_folders(&self) -> Result<Vec<FolderEntry>, ApiError> {
        let response = self
            .http
            .post(format!("{}/2/files/list_folder", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&ListFolderRequest {
                path: "",
                recursive: false,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            return Err(ApiError::Client(status.as_u16()));
        }
        if status.is_server_error() {
            return Err(ApiError::Server(status.as_u16()));
        }

        let page: ListFolderPage = response.json().await?;
        Ok(page
            .entries
            .into_iter()
            .filter(|entry| entry.tag == "folder")
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_list_root_folders_filters_files() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/files/list_folder"))
            .and(header("authorization", "Bearer provider-at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    {".tag": "folder", "name": "Photos", "path_lower": "/photos"},
                    {".tag": "file", "name": "notes.txt", "path_lower": "/notes.txt"},
                    {".tag": "folder", "name": "Movies", "path_lower": "/movies"}
                ],
                "cursor": "cursor-1",
                "has_more": false
            })))
            .mount(&server)
            .await;

        let client = DropboxClient::with_api_base("provider-at", server.uri());
        let folders = client.list_root_folders().await.unwrap();
        assert_eq!(folders.len(), 2);
        assert_eq!(folders[0].name, "Photos");
        assert_eq!(folders[1].name, "Movies");
    }

    #[tokio::test]
    async fn test_expired_token_maps_to_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/files/list_folder"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = DropboxClient::with_api_base("stale-at", server.uri());
        let err = client.list_root_folders().await.unwrap_err();
        assert!(matches!(err, ApiError::Client(401)));
    }
}
