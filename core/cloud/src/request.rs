//! Requests issued against a cloud provider.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use filerelay_common::{Error, Provider, RequestId, Result, Security};

/// Where stored files end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    #[default]
    S3,
    Azure,
    Dropbox,
    Rackspace,
    Gcs,
}

impl StorageLocation {
    /// Name used on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            StorageLocation::S3 => "s3",
            StorageLocation::Azure => "azure",
            StorageLocation::Dropbox => "dropbox",
            StorageLocation::Rackspace => "rackspace",
            StorageLocation::Gcs => "gcs",
        }
    }
}

impl std::str::FromStr for StorageLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(StorageLocation::S3),
            "azure" => Ok(StorageLocation::Azure),
            "dropbox" => Ok(StorageLocation::Dropbox),
            "rackspace" => Ok(StorageLocation::Rackspace),
            "gcs" => Ok(StorageLocation::Gcs),
            other => Err(Error::InvalidInput(format!(
                "Unknown storage location '{}'",
                other
            ))),
        }
    }
}

/// Access level of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Public,
    Private,
}

/// Options describing where and how a file is stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Storage backend.
    #[serde(default)]
    pub location: StorageLocation,
    /// Key prefix inside the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Bucket or container name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Override for the stored file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Access level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<Access>,
    /// Storage region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Kind of operation a cloud request performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// List the contents of a provider folder.
    FolderList,
    /// Copy a provider file into storage.
    Store(StoreOptions),
}

/// One outstanding operation against a cloud provider.
///
/// Everything except the auth token is fixed at construction. There is no
/// `PartialEq`: two requests are the same only if their ids are.
#[derive(Debug, Clone)]
pub struct CloudRequest {
    id: RequestId,
    kind: RequestKind,
    provider: Provider,
    path: String,
    page_token: Option<String>,
    auth_token: Option<String>,
    api_key: String,
    security: Option<Security>,
    app_url: Url,
}

impl CloudRequest {
    /// Build a folder listing request.
    ///
    /// # Errors
    /// - Empty api key
    /// - Callback scheme/host that do not form a valid URL
    pub fn folder_list(
        provider: Provider,
        path: impl Into<String>,
        page_token: Option<String>,
        api_key: impl Into<String>,
        callback: &CallbackBase,
    ) -> Result<Self> {
        Self::build(RequestKind::FolderList, provider, path.into(), page_token, api_key.into(), callback)
    }

    /// Build a store request.
    pub fn store(
        provider: Provider,
        path: impl Into<String>,
        options: StoreOptions,
        api_key: impl Into<String>,
        callback: &CallbackBase,
    ) -> Result<Self> {
        Self::build(RequestKind::Store(options), provider, path.into(), None, api_key.into(), callback)
    }

    fn build(
        kind: RequestKind,
        provider: Provider,
        path: String,
        page_token: Option<String>,
        api_key: String,
        callback: &CallbackBase,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::InvalidInput("API key cannot be empty".to_string()));
        }
        let id = RequestId::new();
        let app_url = callback.redirect_for(&id)?;

        Ok(Self {
            id,
            kind,
            provider,
            path: normalize_path(&path),
            page_token,
            auth_token: None,
            api_key,
            security: None,
            app_url,
        })
    }

    /// Attach security credentials.
    pub fn with_security(mut self, security: Option<Security>) -> Self {
        self.security = security;
        self
    }

    /// Seed the auth token (e.g. from the last token seen by the client).
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn page_token(&self) -> Option<&str> {
        self.page_token.as_deref()
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn security(&self) -> Option<&Security> {
        self.security.as_ref()
    }

    /// URL the provider redirects to once the user has authenticated.
    pub fn app_url(&self) -> &Url {
        &self.app_url
    }

    /// Replace the token after an execution handed out a new one.
    pub fn set_auth_token(&mut self, token: impl Into<String>) {
        self.auth_token = Some(token.into());
    }
}

/// Scheme and host from which per-request redirect URLs are derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackBase {
    scheme: String,
    host: String,
}

impl CallbackBase {
    /// Create a callback base.
    ///
    /// # Errors
    /// - Scheme is empty, does not start with a letter, or has characters
    ///   outside `[A-Za-z0-9+.-]`
    /// - Host is empty
    pub fn new(scheme: impl Into<String>, host: impl Into<String>) -> Result<Self> {
        let scheme = scheme.into();
        let host = host.into();

        let valid_scheme = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid_scheme {
            return Err(Error::InvalidInput(format!(
                "Invalid callback scheme '{}'",
                scheme
            )));
        }
        if host.is_empty() || host.contains('/') {
            return Err(Error::InvalidInput(format!("Invalid callback host '{}'", host)));
        }

        Ok(Self { scheme, host })
    }

    /// Redirect URL unique to `id`.
    pub fn redirect_for(&self, id: &RequestId) -> Result<Url> {
        let raw = format!("{}://{}/{}", self.scheme, self.host, id);
        Url::parse(&raw).map_err(|e| Error::InvalidInput(format!("Invalid redirect URL {}: {}", raw, e)))
    }
}

/// A local file headed for storage.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub id: RequestId,
    pub local_path: PathBuf,
    pub options: StoreOptions,
    pub api_key: String,
    pub security: Option<Security>,
}

impl UploadRequest {
    pub fn new(
        local_path: impl Into<PathBuf>,
        options: StoreOptions,
        api_key: impl Into<String>,
        security: Option<Security>,
    ) -> Self {
        Self {
            id: RequestId::new(),
            local_path: local_path.into(),
            options,
            api_key: api_key.into(),
            security,
        }
    }

    /// File name used when the options do not override it.
    pub fn filename(&self) -> String {
        self.options.filename.clone().unwrap_or_else(|| {
            self.local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string())
        })
    }
}

/// Warm-up request issued when the client starts.
#[derive(Debug, Clone)]
pub struct PrefetchRequest {
    pub api_key: String,
}

/// Provider paths are always absolute.
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
