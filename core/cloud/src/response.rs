//! Responses returned by cloud providers.

use serde::{Deserialize, Serialize};
use url::Url;

use filerelay_common::Error;

/// One entry of a provider folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudItem {
    /// Display name.
    pub name: String,
    /// Provider path, usable as the `path` of a follow-up request.
    pub path: String,
    /// Whether the entry is a folder.
    #[serde(default)]
    pub folder: bool,
    /// Size in bytes (None for folders).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// MIME type, when the provider reports one.
    #[serde(default, rename = "mimetype", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Thumbnail link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Contents of one page of a folder listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderListing {
    pub contents: Vec<CloudItem>,
    /// Page token for the next page, if any.
    #[serde(default, rename = "next", skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// A file copied into storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Public link to the stored file.
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
    /// Storage key.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
}

/// Operation-specific body of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    FolderList(FolderListing),
    Store(StoredFile),
}

/// Response to a cloud request.
///
/// Which fields are populated tells the caller what happened: `auth_url`
/// set means the provider wants the user to authenticate first; `error` set
/// means the transport or the provider failed.
#[derive(Debug, Default)]
pub struct CloudResponse {
    pub payload: Option<Payload>,
    pub auth_url: Option<Url>,
    /// Session token handed out by the cloud API.
    pub token: Option<String>,
    pub error: Option<Error>,
}

impl CloudResponse {
    /// Successful folder listing.
    pub fn listing(listing: FolderListing) -> Self {
        Self {
            payload: Some(Payload::FolderList(listing)),
            ..Default::default()
        }
    }

    /// Successful store.
    pub fn stored(file: StoredFile) -> Self {
        Self {
            payload: Some(Payload::Store(file)),
            ..Default::default()
        }
    }

    /// Response demanding interactive authentication.
    pub fn auth_required(auth_url: Url) -> Self {
        Self {
            auth_url: Some(auth_url),
            ..Default::default()
        }
    }

    /// Response carrying a transport or provider failure.
    pub fn failed(error: Error) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// Attach the session token returned alongside the body.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn requires_auth(&self) -> bool {
        self.auth_url.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.auth_url.is_none()
    }

    /// Folder entries, if this is a listing.
    pub fn contents(&self) -> Option<&[CloudItem]> {
        match &self.payload {
            Some(Payload::FolderList(listing)) => Some(&listing.contents),
            _ => None,
        }
    }

    pub fn next_token(&self) -> Option<&str> {
        match &self.payload {
            Some(Payload::FolderList(listing)) => listing.next_token.as_deref(),
            _ => None,
        }
    }

    /// Stored file, if this is a store response.
    pub fn stored_file(&self) -> Option<&StoredFile> {
        match &self.payload {
            Some(Payload::Store(file)) => Some(file),
            _ => None,
        }
    }
}

/// Account settings returned by the warm-up request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrefetchResponse {
    /// Whether the api key is blocked.
    #[serde(default)]
    pub blocked: bool,
    /// Everything else the API reported.
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_discrimination() {
        let listing = CloudResponse::listing(FolderListing {
            contents: vec![CloudItem {
                name: "a.txt".to_string(),
                path: "/a.txt".to_string(),
                folder: false,
                size: Some(3),
                mime_type: Some("text/plain".to_string()),
                thumbnail: None,
            }],
            next_token: Some("2".to_string()),
        });
        assert!(listing.is_success());
        assert_eq!(listing.contents().map(|c| c.len()), Some(1));
        assert_eq!(listing.next_token(), Some("2"));
        assert!(listing.stored_file().is_none());

        let auth = CloudResponse::auth_required(Url::parse("https://auth.example/x").unwrap());
        assert!(auth.requires_auth());
        assert!(!auth.is_success());
        assert!(auth.contents().is_none());
    }

    #[test]
    fn test_cloud_item_wire_names() {
        let item: CloudItem = serde_json::from_value(serde_json::json!({
            "name": "pics",
            "path": "/pics/",
            "folder": true,
            "mimetype": "application/x-directory"
        }))
        .unwrap();

        assert!(item.folder);
        assert_eq!(item.mime_type.as_deref(), Some("application/x-directory"));
        assert_eq!(item.size, None);
    }

    #[test]
    fn test_prefetch_keeps_unknown_settings() {
        let response: PrefetchResponse = serde_json::from_value(serde_json::json!({
            "blocked": false,
            "permissions": {"whitelabel": true}
        }))
        .unwrap();

        assert!(!response.blocked);
        assert!(response.settings.contains_key("permissions"));
    }
}
