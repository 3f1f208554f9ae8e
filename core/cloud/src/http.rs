//! Cloud API transport over HTTP.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{header, Body, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;
use url::Url;

use filerelay_common::{Error, Provider, Result};

use crate::request::{CloudRequest, PrefetchRequest, RequestKind, UploadRequest};
use crate::response::{CloudResponse, FolderListing, PrefetchResponse, StoredFile};
use crate::service::{CloudService, Progress, ProgressSink, ServiceReply, Uploader};

/// Default cloud API base URL.
const CLOUD_API_BASE: &str = "https://cloud.filestackapi.com";
/// Default upload API base URL.
const UPLOAD_API_BASE: &str = "https://www.filestackapi.com/api/store";

/// Base URLs of the remote APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Cloud API (folder listing, store, prefetch).
    pub cloud: Url,
    /// Direct upload API.
    pub upload: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            cloud: Url::parse(CLOUD_API_BASE).expect("static cloud URL is valid"),
            upload: Url::parse(UPLOAD_API_BASE).expect("static upload URL is valid"),
        }
    }
}

fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

/// HTTP transport for the cloud API.
pub struct HttpCloudService {
    http: Client,
    endpoints: Endpoints,
}

impl HttpCloudService {
    /// Create a new HTTP transport.
    ///
    /// # Errors
    /// - HTTP client could not be built
    pub fn new(endpoints: Endpoints) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("filerelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, endpoints })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn post_json<T: serde::de::DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T> {
        let response = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request to {} failed: {}", url, e)))?;

        self.handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound("Resource not found".to_string()))
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(Error::Authentication(format!("API rejected credentials ({})", status)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Network(format!("API error: {} - {}", status, body)))
        }
    }
}

#[async_trait]
impl CloudService for HttpCloudService {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, request: &CloudRequest) -> ServiceReply {
        let url = match request.kind() {
            RequestKind::FolderList => endpoint(&self.endpoints.cloud, "folder/list"),
            RequestKind::Store(_) => endpoint(&self.endpoints.cloud, "store/"),
        };
        let body = request_body(request);

        tracing::debug!(request = %request.id(), provider = %request.provider(), "POST {}", url);

        match self.post_json::<Value>(&url, &body).await {
            Ok(value) => {
                let response = parse_reply(request.provider(), request.kind(), &value);
                if response.requires_auth() {
                    ServiceReply::new(response).with_redirect(request.app_url().clone())
                } else {
                    ServiceReply::new(response)
                }
            }
            Err(err) => ServiceReply::new(CloudResponse::failed(err)),
        }
    }

    async fn prefetch(&self, request: &PrefetchRequest) -> Result<PrefetchResponse> {
        let url = endpoint(&self.endpoints.cloud, "prefetch");
        self.post_json(&url, &json!({ "apikey": request.api_key })).await
    }
}

#[async_trait]
impl Uploader for HttpCloudService {
    async fn upload(&self, request: &UploadRequest, progress: ProgressSink) -> Result<StoredFile> {
        let file = tokio::fs::File::open(&request.local_path).await?;
        let total = file.metadata().await?.len();
        progress.report(Progress::new(0, Some(total)));

        let sink = progress.clone();
        let mut sent = 0u64;
        let stream = ReaderStream::new(file).map(move |chunk: std::io::Result<Bytes>| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                sink.report(Progress::new(sent, Some(total)));
            }
            chunk
        });

        let url = endpoint(&self.endpoints.upload, request.options.location.wire_name());
        let mut query = vec![
            ("key", request.api_key.clone()),
            ("filename", request.filename()),
        ];
        if let Some(path) = &request.options.path {
            query.push(("path", path.clone()));
        }
        if let Some(container) = &request.options.container {
            query.push(("container", container.clone()));
        }
        if let Some(access) = request.options.access {
            let access = serde_json::to_value(access)?;
            query.push(("access", access.as_str().unwrap_or_default().to_string()));
        }
        if let Some(security) = &request.security {
            query.push(("policy", security.policy.clone()));
            query.push(("signature", security.signature.clone()));
        }

        tracing::debug!(request = %request.id, bytes = total, "Uploading {}", request.local_path.display());

        let response = self
            .http
            .post(&url)
            .query(&query)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, total)
            .body(Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Upload failed: {}", e)))?;

        let stored = self.handle_response(response).await?;
        progress.report(Progress::done(total));
        Ok(stored)
    }
}

/// JSON body for a cloud API call.
pub(crate) fn request_body(request: &CloudRequest) -> Value {
    let mut cloud = json!({ "path": request.path() });
    if let Some(next) = request.page_token() {
        cloud["next"] = json!(next);
    }
    if let RequestKind::Store(options) = request.kind() {
        cloud["store"] = serde_json::to_value(options).unwrap_or_default();
    }

    let mut clouds = serde_json::Map::new();
    clouds.insert(request.provider().wire_name().to_string(), cloud);

    let mut body = json!({
        "apikey": request.api_key(),
        "flow": "mobile",
        "appurl": request.app_url().as_str(),
        "clouds": clouds,
    });
    if let Some(token) = request.auth_token() {
        body["token"] = json!(token);
    }
    if let Some(security) = request.security() {
        body["policy"] = json!(security.policy);
        body["signature"] = json!(security.signature);
    }
    body
}

/// Interpret a cloud API reply for one provider.
pub(crate) fn parse_reply(provider: Provider, kind: &RequestKind, value: &Value) -> CloudResponse {
    let token = value.get("token").and_then(Value::as_str).map(String::from);

    let Some(section) = value.get(provider.wire_name()) else {
        return CloudResponse::failed(Error::Serialization(format!(
            "Reply has no '{}' section",
            provider
        )))
        .with_token(token);
    };

    if let Some(raw) = section.pointer("/auth/redirect_url").and_then(Value::as_str) {
        return match Url::parse(raw) {
            Ok(auth_url) => CloudResponse::auth_required(auth_url).with_token(token),
            Err(e) => CloudResponse::failed(Error::Serialization(format!(
                "Invalid auth URL '{}': {}",
                raw, e
            )))
            .with_token(token),
        };
    }

    if let Some(message) = section.get("error").and_then(Value::as_str) {
        return CloudResponse::failed(Error::Network(message.to_string())).with_token(token);
    }

    let response = match kind {
        RequestKind::FolderList => serde_json::from_value::<FolderListing>(section.clone())
            .map(CloudResponse::listing),
        RequestKind::Store(_) => {
            serde_json::from_value::<StoredFile>(section.clone()).map(CloudResponse::stored)
        }
    };

    response
        .unwrap_or_else(|e| CloudResponse::failed(e.into()))
        .with_token(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CallbackBase, StoreOptions};
    use filerelay_common::Security;

    fn callback() -> CallbackBase {
        CallbackBase::new("app", "cb").unwrap()
    }

    #[test]
    fn test_folder_list_body() {
        let request = CloudRequest::folder_list(
            Provider::Dropbox,
            "/photos",
            Some("page-2".to_string()),
            "KEY",
            &callback(),
        )
        .unwrap()
        .with_auth_token(Some("tok".to_string()))
        .with_security(Some(Security::new("pol", "sig").unwrap()));

        let body = request_body(&request);

        assert_eq!(body["apikey"], "KEY");
        assert_eq!(body["flow"], "mobile");
        assert_eq!(body["token"], "tok");
        assert_eq!(body["policy"], "pol");
        assert_eq!(body["signature"], "sig");
        assert_eq!(body["appurl"], request.app_url().as_str());
        assert_eq!(body["clouds"]["dropbox"]["path"], "/photos");
        assert_eq!(body["clouds"]["dropbox"]["next"], "page-2");
    }

    #[test]
    fn test_store_body_carries_options() {
        let options = StoreOptions {
            container: Some("bucket".to_string()),
            ..Default::default()
        };
        let request =
            CloudRequest::store(Provider::GoogleDrive, "/x.png", options, "KEY", &callback())
                .unwrap();

        let body = request_body(&request);

        assert!(body.get("token").is_none());
        assert_eq!(body["clouds"]["googledrive"]["store"]["location"], "s3");
        assert_eq!(body["clouds"]["googledrive"]["store"]["container"], "bucket");
    }

    #[test]
    fn test_parse_auth_reply() {
        let reply = json!({
            "token": "session-1",
            "dropbox": { "auth": { "redirect_url": "https://www.dropbox.com/oauth2/authorize?x=1" } }
        });

        let response = parse_reply(Provider::Dropbox, &RequestKind::FolderList, &reply);

        assert!(response.requires_auth());
        assert_eq!(response.token.as_deref(), Some("session-1"));
        assert_eq!(
            response.auth_url.unwrap().host_str(),
            Some("www.dropbox.com")
        );
    }

    #[test]
    fn test_parse_listing_reply() {
        let reply = json!({
            "token": "session-1",
            "dropbox": {
                "contents": [
                    { "name": "a.png", "path": "/a.png", "folder": false, "size": 10, "mimetype": "image/png" },
                    { "name": "docs", "path": "/docs/", "folder": true }
                ],
                "next": "n2"
            }
        });

        let response = parse_reply(Provider::Dropbox, &RequestKind::FolderList, &reply);

        assert!(response.is_success());
        assert_eq!(response.contents().unwrap().len(), 2);
        assert_eq!(response.next_token(), Some("n2"));
    }

    #[test]
    fn test_parse_store_reply() {
        let reply = json!({
            "googledrive": {
                "url": "https://cdn.example/abc",
                "filename": "x.png",
                "size": 42,
                "type": "image/png",
                "key": "uploads/x.png"
            }
        });

        let response = parse_reply(
            Provider::GoogleDrive,
            &RequestKind::Store(StoreOptions::default()),
            &reply,
        );

        let stored = response.stored_file().unwrap();
        assert_eq!(stored.url, "https://cdn.example/abc");
        assert_eq!(stored.size, Some(42));
        assert!(response.token.is_none());
    }

    #[test]
    fn test_parse_missing_section_and_provider_error() {
        let response = parse_reply(Provider::Box, &RequestKind::FolderList, &json!({}));
        assert!(matches!(response.error, Some(Error::Serialization(_))));

        let reply = json!({ "box": { "error": "quota exceeded" } });
        let response = parse_reply(Provider::Box, &RequestKind::FolderList, &reply);
        assert!(matches!(response.error, Some(Error::Network(ref m)) if m == "quota exceeded"));
    }

    #[test]
    fn test_endpoint_join() {
        let endpoints = Endpoints::default();
        assert_eq!(
            endpoint(&endpoints.cloud, "folder/list"),
            "https://cloud.filestackapi.com/folder/list"
        );
        assert_eq!(
            endpoint(&endpoints.upload, "s3"),
            "https://www.filestackapi.com/api/store/s3"
        );
    }
}
