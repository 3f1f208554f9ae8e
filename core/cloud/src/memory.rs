//! In-memory cloud transport for development and testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use url::Url;
use uuid::Uuid;

use filerelay_common::{Error, Provider, Result};

use crate::request::{CloudRequest, PrefetchRequest, RequestKind, UploadRequest};
use crate::response::{CloudItem, CloudResponse, FolderListing, PrefetchResponse, StoredFile};
use crate::service::{CloudService, Progress, ProgressSink, ServiceReply, Uploader};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Default)]
struct State {
    /// Folder path -> entries, per provider.
    folders: HashMap<(Provider, String), Vec<CloudItem>>,
    /// Providers that demand authentication until granted.
    locked: HashSet<Provider>,
    /// Providers that demand authentication for the next N executions.
    challenges: HashMap<Provider, u32>,
    /// Everything stored so far, in order.
    stored: Vec<StoredFile>,
    /// Transport failure injected into the next execution.
    fail_next: Option<String>,
    /// Api keys reported as blocked by prefetch.
    blocked_keys: HashSet<String>,
}

/// In-memory cloud transport.
///
/// Useful for testing and development. Providers can be made to demand
/// authentication, either until [`grant`](Self::grant) is called or for a
/// fixed number of executions. Auth responses redirect to the request's
/// app URL, just like the real API.
pub struct MemoryCloudService {
    state: RwLock<State>,
    page_size: usize,
    executions: AtomicUsize,
    prefetches: AtomicUsize,
}

impl MemoryCloudService {
    /// Create a new empty transport.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a transport that pages listings every `page_size` entries.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            page_size: page_size.max(1),
            executions: AtomicUsize::new(0),
            prefetches: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an entry to a provider folder.
    pub fn add_item(&self, provider: Provider, folder: &str, item: CloudItem) {
        self.write()
            .folders
            .entry((provider, folder.to_string()))
            .or_default()
            .push(item);
    }

    /// Convenience for adding a plain file.
    pub fn add_file(&self, provider: Provider, folder: &str, name: &str, size: u64) {
        let path = format!("{}/{}", folder.trim_end_matches('/'), name);
        self.add_item(
            provider,
            folder,
            CloudItem {
                name: name.to_string(),
                path,
                folder: false,
                size: Some(size),
                mime_type: None,
                thumbnail: None,
            },
        );
    }

    /// Demand authentication for every request to `provider` until granted.
    pub fn require_auth(&self, provider: Provider) {
        self.write().locked.insert(provider);
    }

    /// Let requests to `provider` through.
    pub fn grant(&self, provider: Provider) {
        let mut state = self.write();
        state.locked.remove(&provider);
        state.challenges.remove(&provider);
    }

    /// Demand authentication for the next `times` executions against `provider`.
    pub fn challenge(&self, provider: Provider, times: u32) {
        self.write().challenges.insert(provider, times);
    }

    /// Make the next execution fail with a network error.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.write().fail_next = Some(message.into());
    }

    /// Report `api_key` as blocked on prefetch.
    pub fn block_key(&self, api_key: impl Into<String>) {
        self.write().blocked_keys.insert(api_key.into());
    }

    /// Number of `prefetch` calls so far.
    pub fn prefetches(&self) -> usize {
        self.prefetches.load(Ordering::SeqCst)
    }

    /// Number of `execute` calls so far.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Files stored so far.
    pub fn stored(&self) -> Vec<StoredFile> {
        self.read().stored.clone()
    }

    fn auth_url(provider: Provider) -> Url {
        let raw = format!("https://auth.memory.invalid/{}", provider.wire_name());
        Url::parse(&raw).expect("static auth URL is valid")
    }

    fn needs_auth(state: &mut State, provider: Provider) -> bool {
        if state.locked.contains(&provider) {
            return true;
        }
        match state.challenges.get_mut(&provider) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn list(&self, state: &State, request: &CloudRequest) -> Result<FolderListing> {
        let key = (request.provider(), request.path().to_string());
        let entries = state
            .folders
            .get(&key)
            .ok_or_else(|| Error::NotFound(format!("Folder not found: {}", request.path())))?;

        let start = match request.page_token() {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| Error::InvalidInput(format!("Invalid page token '{}'", token)))?,
            None => 0,
        };
        let end = start.saturating_add(self.page_size).min(entries.len());
        let contents = entries.get(start..end).unwrap_or_default().to_vec();
        let next_token = (end < entries.len()).then(|| end.to_string());

        Ok(FolderListing {
            contents,
            next_token,
        })
    }

    fn store(state: &mut State, request: &CloudRequest) -> Result<StoredFile> {
        let RequestKind::Store(options) = request.kind() else {
            return Err(Error::InvalidInput("Not a store request".to_string()));
        };

        let item = state
            .folders
            .values()
            .flatten()
            .find(|item| item.path == request.path() && !item.folder)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", request.path())))?;

        let filename = options.filename.clone().unwrap_or(item.name);
        let key = match &options.path {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), filename),
            None => format!("{}_{}", Uuid::new_v4().simple(), filename),
        };
        let stored = StoredFile {
            url: format!("https://cdn.memory.invalid/{}", Uuid::new_v4().simple()),
            filename: Some(filename),
            size: item.size,
            mime_type: item.mime_type,
            key: Some(key),
            container: options.container.clone(),
        };

        state.stored.push(stored.clone());
        Ok(stored)
    }
}

impl Default for MemoryCloudService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudService for MemoryCloudService {
    fn name(&self) -> &str {
        "memory"
    }

    async fn execute(&self, request: &CloudRequest) -> ServiceReply {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let mut state = self.write();

        if let Some(message) = state.fail_next.take() {
            return ServiceReply::new(CloudResponse::failed(Error::Network(message)));
        }

        let provider = request.provider();
        if Self::needs_auth(&mut state, provider) {
            let response = CloudResponse::auth_required(Self::auth_url(provider))
                .with_token(Some(format!("pending-{}", request.id())));
            return ServiceReply::new(response).with_redirect(request.app_url().clone());
        }

        let token = Some(format!("memory-{}", provider.wire_name()));
        let response = match request.kind() {
            RequestKind::FolderList => self.list(&state, request).map(CloudResponse::listing),
            RequestKind::Store(_) => Self::store(&mut state, request).map(CloudResponse::stored),
        };

        ServiceReply::new(response.unwrap_or_else(CloudResponse::failed).with_token(token))
    }

    async fn prefetch(&self, request: &PrefetchRequest) -> Result<PrefetchResponse> {
        self.prefetches.fetch_add(1, Ordering::SeqCst);
        Ok(PrefetchResponse {
            blocked: self.read().blocked_keys.contains(&request.api_key),
            ..Default::default()
        })
    }
}

#[async_trait]
impl Uploader for MemoryCloudService {
    async fn upload(&self, request: &UploadRequest, progress: ProgressSink) -> Result<StoredFile> {
        let data = tokio::fs::read(&request.local_path).await?;
        let total = data.len() as u64;
        progress.report(Progress::new(0, Some(total)));

        let filename = request.filename();
        let stored = StoredFile {
            url: format!("https://cdn.memory.invalid/{}", Uuid::new_v4().simple()),
            filename: Some(filename.clone()),
            size: Some(total),
            mime_type: None,
            key: Some(match &request.options.path {
                Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), filename),
                None => filename,
            }),
            container: request.options.container.clone(),
        };

        self.write().stored.push(stored.clone());
        progress.report(Progress::done(total));
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CallbackBase, StoreOptions};

    fn callback() -> CallbackBase {
        CallbackBase::new("app", "cb").unwrap()
    }

    fn list_request(provider: Provider, path: &str, page: Option<&str>) -> CloudRequest {
        CloudRequest::folder_list(provider, path, page.map(String::from), "key", &callback())
            .unwrap()
    }

    #[tokio::test]
    async fn test_listing_pages() {
        let service = MemoryCloudService::with_page_size(2);
        for name in ["a", "b", "c"] {
            service.add_file(Provider::Dropbox, "/", name, 1);
        }

        let first = service.execute(&list_request(Provider::Dropbox, "/", None)).await;
        assert_eq!(first.response.contents().unwrap().len(), 2);
        assert_eq!(first.response.next_token(), Some("2"));
        assert_eq!(first.response.token.as_deref(), Some("memory-dropbox"));

        let second = service
            .execute(&list_request(Provider::Dropbox, "/", Some("2")))
            .await;
        assert_eq!(second.response.contents().unwrap()[0].name, "c");
        assert!(second.response.next_token().is_none());
        assert_eq!(service.executions(), 2);
    }

    #[tokio::test]
    async fn test_listing_past_the_end() {
        let service = MemoryCloudService::with_page_size(2);
        service.add_file(Provider::Dropbox, "/", "a", 1);

        let token = usize::MAX.to_string();
        let reply = service
            .execute(&list_request(Provider::Dropbox, "/", Some(&token)))
            .await;
        assert!(reply.response.error.is_none());
        assert!(reply.response.contents().unwrap().is_empty());
        assert!(reply.response.next_token().is_none());
    }

    #[tokio::test]
    async fn test_locked_provider_redirects_to_app_url() {
        let service = MemoryCloudService::new();
        service.add_file(Provider::Box, "/", "a", 1);
        service.require_auth(Provider::Box);

        let request = list_request(Provider::Box, "/", None);
        let reply = service.execute(&request).await;
        assert!(reply.response.requires_auth());
        assert_eq!(reply.redirect_url.as_ref(), Some(request.app_url()));

        service.grant(Provider::Box);
        let reply = service.execute(&request).await;
        assert!(reply.response.is_success());
        assert!(reply.redirect_url.is_none());
    }

    #[tokio::test]
    async fn test_challenge_counts_down() {
        let service = MemoryCloudService::new();
        service.add_file(Provider::Gmail, "/", "a", 1);
        service.challenge(Provider::Gmail, 2);

        let request = list_request(Provider::Gmail, "/", None);
        assert!(service.execute(&request).await.response.requires_auth());
        assert!(service.execute(&request).await.response.requires_auth());
        assert!(service.execute(&request).await.response.is_success());
    }

    #[tokio::test]
    async fn test_store_and_missing_file() {
        let service = MemoryCloudService::new();
        service.add_file(Provider::GoogleDrive, "/", "x.png", 42);

        let options = StoreOptions {
            path: Some("uploads/".to_string()),
            ..Default::default()
        };
        let request = CloudRequest::store(Provider::GoogleDrive, "/x.png", options, "key", &callback())
            .unwrap();
        let reply = service.execute(&request).await;
        let stored = reply.response.stored_file().unwrap();
        assert_eq!(stored.key.as_deref(), Some("uploads/x.png"));
        assert_eq!(stored.size, Some(42));
        assert_eq!(service.stored().len(), 1);

        let missing = CloudRequest::store(
            Provider::GoogleDrive,
            "/nope.png",
            StoreOptions::default(),
            "key",
            &callback(),
        )
        .unwrap();
        let reply = service.execute(&missing).await;
        assert!(matches!(reply.response.error, Some(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let service = MemoryCloudService::new();
        service.add_file(Provider::Dropbox, "/", "a", 1);
        service.fail_next("offline");

        let request = list_request(Provider::Dropbox, "/", None);
        assert!(matches!(
            service.execute(&request).await.response.error,
            Some(Error::Network(_))
        ));
        assert!(service.execute(&request).await.response.is_success());
    }

    #[tokio::test]
    async fn test_upload_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("note.txt");
        tokio::fs::write(&file, b"hello world").await.unwrap();

        let service = MemoryCloudService::new();
        let (sink, rx) = ProgressSink::channel();
        let request = UploadRequest::new(&file, StoreOptions::default(), "key", None);

        let stored = service.upload(&request, sink).await.unwrap();

        assert_eq!(stored.filename.as_deref(), Some("note.txt"));
        assert_eq!(stored.size, Some(11));
        assert_eq!(*rx.borrow(), Progress::done(11));
    }

    #[tokio::test]
    async fn test_prefetch_reports_blocked_keys() {
        let service = MemoryCloudService::new();
        service.block_key("bad");

        let ok = service
            .prefetch(&PrefetchRequest { api_key: "good".to_string() })
            .await
            .unwrap();
        let blocked = service
            .prefetch(&PrefetchRequest { api_key: "bad".to_string() })
            .await
            .unwrap();

        assert!(!ok.blocked);
        assert!(blocked.blocked);
        assert_eq!(service.prefetches(), 2);
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let service = MemoryCloudService::new();
        let (sink, _rx) = ProgressSink::channel();
        let request = UploadRequest::new("/definitely/not/here", StoreOptions::default(), "key", None);

        let result = service.upload(&request, sink).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
