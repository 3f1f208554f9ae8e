//! Cloud request orchestrator.
//!
//! A request chain runs: execute, and if the provider wants the user to
//! authenticate, show the auth URL, wait for the redirect, execute again.
//! With an in-process surface the wait happens inside the chain. With an
//! external handoff the chain is parked in the coordinator and a resume
//! signal picks it up later.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use filerelay_cloud::{
    CallbackBase, CloudRequest, CloudResponse, CloudService, HttpCloudService, ProgressSink,
    ServiceReply, StoreOptions, UploadRequest, Uploader,
};
use filerelay_common::{Error, Provider, RequestId, Result};

use crate::auth::{matches_callback, AuthSurface, UrlOpener, WebAuthSession};
use crate::config::ClientConfig;
use crate::coordinator::{AuthResumptionCoordinator, SignalHandler};
use crate::handle::RequestHandle;
use crate::pending::{Parked, PendingInfo, Withdrawn};
use crate::signal::ResumeSignals;

/// Terminal callback of a request chain.
///
/// `Ok` carries the final response (which may hold a transport error);
/// `Err` carries authentication failures, timeouts and cancellation.
pub type Completion = Box<dyn FnOnce(Result<CloudResponse>) + Send + 'static>;

/// One logical cloud operation in progress.
pub(crate) struct Chain {
    request: CloudRequest,
    /// Where the completion runs.
    queue: Handle,
    completion: Completion,
    cancel: CancellationToken,
    /// Authentication challenges seen so far.
    auth_attempts: u32,
}

impl Chain {
    fn complete(self, outcome: Result<CloudResponse>) {
        let Chain {
            request,
            queue,
            completion,
            ..
        } = self;

        match &outcome {
            Ok(response) => debug!(request = %request.id(), success = response.is_success(), "Request finished"),
            Err(err) => debug!(request = %request.id(), error = %err, "Request failed"),
        }
        queue.spawn(async move { completion(outcome) });
    }
}

pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    callback: CallbackBase,
    pub(crate) service: Arc<dyn CloudService>,
    uploader: Arc<dyn Uploader>,
    surface: AuthSurface,
    /// Context owning user-facing surfaces.
    ui: Handle,
    pub(crate) runtime: Handle,
    /// Most recent token handed out by the cloud API.
    last_token: RwLock<Option<String>>,
    coordinator: AuthResumptionCoordinator<Chain>,
}

impl Shared {
    fn spawn_chain(self: &Arc<Self>, chain: Chain) {
        let shared = self.clone();
        self.runtime.spawn(async move { shared.drive(chain, None).await });
    }

    fn absorb_token(&self, request: &mut CloudRequest, token: &str) {
        request.set_auth_token(token);
        *self.last_token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
    }

    /// Finish a chain, releasing its registry slot if it was resumed.
    fn settle(&self, parked_key: Option<String>, chain: Chain, outcome: Result<CloudResponse>) {
        if let Some(key) = parked_key {
            self.coordinator.finish(&key);
        }
        chain.complete(outcome);
    }

    /// Run a chain until it completes or parks.
    ///
    /// `parked_key` is set when the chain was claimed from the registry by a
    /// resume signal.
    async fn drive(self: Arc<Self>, mut chain: Chain, parked_key: Option<String>) {
        loop {
            let reply = tokio::select! {
                biased;
                _ = chain.cancel.cancelled() => None,
                reply = self.service.execute(&chain.request) => Some(reply),
            };
            let Some(ServiceReply {
                response,
                redirect_url,
            }) = reply
            else {
                return self.settle(parked_key, chain, Err(Error::Cancelled));
            };

            if let Some(token) = response.token.as_deref() {
                self.absorb_token(&mut chain.request, token);
            }

            let (Some(auth_url), Some(redirect)) = (response.auth_url.clone(), redirect_url) else {
                return self.settle(parked_key, chain, Ok(response));
            };

            chain.auth_attempts += 1;
            if chain.auth_attempts > self.config.max_auth_retries {
                warn!(
                    request = %chain.request.id(),
                    attempts = chain.auth_attempts,
                    "Provider keeps demanding authentication"
                );
                let err = Error::AuthRetriesExhausted(self.config.max_auth_retries);
                return self.settle(parked_key, chain, Err(err));
            }

            match &self.surface {
                AuthSurface::InProcess(session) => {
                    let outcome = self
                        .run_session(session.clone(), auth_url, redirect.clone(), &chain.cancel)
                        .await;
                    match outcome {
                        Ok(callback) if matches_callback(&callback, &redirect) => {
                            debug!(request = %chain.request.id(), "Authenticated, retrying request");
                        }
                        Ok(callback) => {
                            let err = Error::CallbackMismatch {
                                expected: redirect.to_string(),
                                received: callback.to_string(),
                            };
                            return self.settle(parked_key, chain, Err(err));
                        }
                        Err(err) => return self.settle(parked_key, chain, Err(err)),
                    }
                }
                AuthSurface::ExternalHandoff(opener) => {
                    if let Err(err) = self.open_external(opener.clone(), auth_url).await {
                        return self.settle(parked_key, chain, Err(err));
                    }
                    return self.park(parked_key, redirect, chain);
                }
            }
        }
    }

    async fn run_session(
        &self,
        session: Arc<dyn WebAuthSession>,
        auth_url: Url,
        redirect: Url,
        cancel: &CancellationToken,
    ) -> Result<Url> {
        info!(%auth_url, %redirect, "Starting in-process authentication");

        // The session is owned by the UI task and released as soon as it reports.
        let task = self
            .ui
            .spawn(async move { session.authenticate(&auth_url, &redirect).await });
        let abort = task.abort_handle();
        let timeout = self.config.pending_timeout();
        let expiry = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abort.abort();
                Err(Error::Cancelled)
            }
            joined = task => joined.map_err(|e| {
                Error::Authentication(format!("Authentication session failed: {}", e))
            })?,
            _ = expiry => {
                abort.abort();
                warn!("Authentication session did not report in time");
                Err(Error::AuthTimeout(timeout.unwrap_or_default()))
            }
        }
    }

    async fn open_external(&self, opener: Arc<dyn UrlOpener>, auth_url: Url) -> Result<()> {
        info!(%auth_url, "Handing authentication off to external browser");

        self.ui
            .spawn(async move { opener.open(&auth_url) })
            .await
            .map_err(|e| Error::Authentication(format!("Failed to launch browser: {}", e)))?
    }

    fn park(self: &Arc<Self>, parked_key: Option<String>, redirect: Url, chain: Chain) {
        if chain.cancel.is_cancelled() {
            return self.settle(parked_key, chain, Err(Error::Cancelled));
        }

        let request_id = chain.request.id();
        let cancel = chain.cancel.clone();
        let key = parked_key.clone().unwrap_or_else(|| redirect.to_string());

        let parked = match parked_key {
            Some(_) => self.coordinator.repark(&key, chain),
            None => self
                .coordinator
                .park(key.clone(), request_id, cancel.clone(), chain),
        };

        match parked {
            Ok(parked) => {
                info!(request = %request_id, redirect = %key, "Request waiting for authentication redirect");
                self.spawn_watchdog(key, parked, cancel);
            }
            Err((err, chain)) => {
                warn!(request = %request_id, error = %err, "Could not park request");
                self.settle(parked_key, chain, Err(err));
            }
        }
    }

    /// Evicts a parked chain on cancellation or timeout.
    fn spawn_watchdog(self: &Arc<Self>, key: String, parked: Parked, cancel: CancellationToken) {
        let shared = Arc::downgrade(self);
        let timeout = self.config.pending_timeout();

        self.runtime.spawn(async move {
            let expiry = async {
                match timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let err = tokio::select! {
                biased;
                _ = parked.released.cancelled() => return,
                _ = cancel.cancelled() => Error::Cancelled,
                _ = expiry => Error::AuthTimeout(timeout.unwrap_or_default()),
            };

            let Some(shared) = shared.upgrade() else {
                return;
            };
            if let Some(chain) = shared.coordinator.evict(&key, parked.generation) {
                warn!(redirect = %key, error = %err, "Dropping pending request");
                chain.complete(Err(err));
            }
        });
    }

    /// Re-drive the chain whose redirect prefixes `url`.
    async fn resume(self: Arc<Self>, url: Url) -> bool {
        let Some((key, chain)) = self.coordinator.claim(&url) else {
            debug!(%url, "Resume signal matched no pending request");
            return false;
        };

        info!(request = %chain.request.id(), redirect = %key, "Resuming request");
        self.drive(chain, Some(key)).await;
        true
    }
}

/// Builder for [`CloudClient`].
pub struct CloudClientBuilder {
    config: ClientConfig,
    service: Option<Arc<dyn CloudService>>,
    uploader: Option<Arc<dyn Uploader>>,
    surface: Option<AuthSurface>,
    signals: Option<ResumeSignals>,
    ui: Option<Handle>,
}

impl CloudClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            service: None,
            uploader: None,
            surface: None,
            signals: None,
            ui: None,
        }
    }

    /// Use one transport for cloud requests and uploads.
    pub fn transport<T>(mut self, transport: Arc<T>) -> Self
    where
        T: CloudService + Uploader + 'static,
    {
        self.service = Some(transport.clone());
        self.uploader = Some(transport);
        self
    }

    pub fn service(mut self, service: Arc<dyn CloudService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn auth_surface(mut self, surface: AuthSurface) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Listen on a private signal bus instead of the process-wide one.
    pub fn signals(mut self, signals: ResumeSignals) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Listen on a private bus sized by `signal_capacity`.
    pub fn isolated_signals(mut self) -> Self {
        self.signals = Some(ResumeSignals::new(self.config.signal_capacity));
        self
    }

    /// Context on which authentication surfaces are launched.
    pub fn ui_handle(mut self, ui: Handle) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Build the client.
    ///
    /// # Preconditions
    /// - Called from within a Tokio runtime
    ///
    /// # Errors
    /// - Invalid configuration
    /// - No runtime
    /// - Default HTTP transport could not be created
    pub fn build(self) -> Result<CloudClient> {
        self.config.validate()?;
        let callback = self.config.callback_base()?;
        let runtime = Handle::try_current()
            .map_err(|_| Error::Config("CloudClient must be built inside a Tokio runtime".to_string()))?;

        let (service, uploader) = match (self.service, self.uploader) {
            (Some(service), Some(uploader)) => (service, uploader),
            (service, uploader) => {
                let http = Arc::new(HttpCloudService::new(self.config.endpoints.clone())?);
                (
                    service.unwrap_or_else(|| http.clone()),
                    uploader.unwrap_or_else(|| http),
                )
            }
        };
        let surface = self.surface.unwrap_or_else(AuthSurface::system_browser);
        let signals = self.signals.unwrap_or_else(ResumeSignals::shared);
        let ui = self.ui.unwrap_or_else(|| runtime.clone());
        let config = self.config;

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            let spawner = runtime.clone();
            let handler: SignalHandler = Arc::new(move |url: Url| {
                if let Some(shared) = weak.upgrade() {
                    spawner.spawn(async move {
                        shared.resume(url).await;
                    });
                }
            });

            Shared {
                coordinator: AuthResumptionCoordinator::new(
                    signals,
                    runtime.clone(),
                    config.max_pending,
                    handler,
                ),
                config,
                callback,
                service,
                uploader,
                surface,
                ui,
                runtime,
                last_token: RwLock::new(None),
            }
        });

        info!(
            transport = shared.service.name(),
            surface = shared.surface.kind(),
            "Cloud client ready"
        );

        let client = CloudClient { shared };
        if client.shared.config.prefetch_on_start {
            client.prefetch();
        }
        Ok(client)
    }
}

/// Facade exposing cloud operations.
///
/// Cheap to clone; clones share pending requests and the last token.
#[derive(Clone)]
pub struct CloudClient {
    shared: Arc<Shared>,
}

impl CloudClient {
    pub fn builder(config: ClientConfig) -> CloudClientBuilder {
        CloudClientBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Folder listing request seeded with credentials and the last token.
    pub fn folder_list_request(
        &self,
        provider: Provider,
        path: impl Into<String>,
        page_token: Option<String>,
    ) -> Result<CloudRequest> {
        let request = CloudRequest::folder_list(
            provider,
            path,
            page_token,
            self.shared.config.api_key.clone(),
            &self.shared.callback,
        )?;
        Ok(self.seed(request))
    }

    /// Store request seeded with credentials and the last token.
    pub fn store_request(
        &self,
        provider: Provider,
        path: impl Into<String>,
        options: StoreOptions,
    ) -> Result<CloudRequest> {
        let request = CloudRequest::store(
            provider,
            path,
            options,
            self.shared.config.api_key.clone(),
            &self.shared.callback,
        )?;
        Ok(self.seed(request))
    }

    fn seed(&self, request: CloudRequest) -> CloudRequest {
        request
            .with_security(self.shared.config.security.clone())
            .with_auth_token(self.last_token())
    }

    /// List a provider folder.
    pub fn folder_list(
        &self,
        provider: Provider,
        path: impl Into<String>,
        page_token: Option<String>,
    ) -> Result<RequestHandle> {
        let request = self.folder_list_request(provider, path, page_token)?;
        Ok(self.submit(request))
    }

    /// Copy a provider file into storage.
    pub fn store(
        &self,
        provider: Provider,
        path: impl Into<String>,
        options: StoreOptions,
    ) -> Result<RequestHandle> {
        let request = self.store_request(provider, path, options)?;
        Ok(self.submit(request))
    }

    fn submit(&self, request: CloudRequest) -> RequestHandle {
        let (handle, parts) = RequestHandle::channel(request.id());
        let (cancel, completion) = parts.into_completion();
        self.start_chain(request, self.caller_queue(), Box::new(completion), cancel);
        handle
    }

    fn caller_queue(&self) -> Handle {
        Handle::try_current().unwrap_or_else(|_| self.shared.runtime.clone())
    }

    /// Run `request` and deliver its outcome to `completion` on `queue`.
    ///
    /// Returns a token cancelling the chain.
    pub fn perform<F>(&self, request: CloudRequest, queue: Handle, completion: F) -> CancellationToken
    where
        F: FnOnce(Result<CloudResponse>) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        self.start_chain(request, queue, Box::new(completion), cancel.clone());
        cancel
    }

    fn start_chain(&self, request: CloudRequest, queue: Handle, completion: Completion, cancel: CancellationToken) {
        debug!(request = %request.id(), provider = %request.provider(), path = request.path(), "Starting request");
        self.shared.spawn_chain(Chain {
            request,
            queue,
            completion,
            cancel,
            auth_attempts: 0,
        });
    }

    /// Upload a local file to storage.
    ///
    /// Transfer errors arrive inside the response; only cancellation is an `Err`.
    pub fn upload_file(&self, local_path: impl Into<PathBuf>, options: StoreOptions) -> RequestHandle {
        let config = &self.shared.config;
        let request = UploadRequest::new(
            local_path,
            options,
            config.api_key.clone(),
            config.security.clone(),
        );
        let (handle, parts) = RequestHandle::channel(request.id);
        let sink: ProgressSink = parts.progress.clone();
        let (cancel, completion) = parts.into_completion();
        let uploader = self.shared.uploader.clone();
        let queue = self.caller_queue();

        debug!(request = %request.id, path = %request.local_path.display(), "Starting upload");
        self.shared.runtime.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                stored = uploader.upload(&request, sink) => Ok(match stored {
                    Ok(file) => CloudResponse::stored(file),
                    Err(err) => CloudResponse::failed(err),
                }),
            };
            queue.spawn(async move { completion(outcome) });
        });

        handle
    }

    /// Resume the parked request whose redirect URL prefixes `url`.
    ///
    /// Returns whether a pending request was found; the request has been
    /// re-executed by the time this returns.
    pub async fn resume(&self, url: &Url) -> bool {
        self.shared.clone().resume(url.clone()).await
    }

    /// Cancel a parked request by id.
    ///
    /// A request being re-executed by a resumption is cancelled in place and
    /// completes with `Cancelled` once it notices.
    pub fn cancel_pending(&self, request_id: RequestId) -> bool {
        match self.shared.coordinator.cancel(request_id) {
            Some(Withdrawn::Parked(chain)) => {
                chain.complete(Err(Error::Cancelled));
                true
            }
            Some(Withdrawn::InFlight) => true,
            None => false,
        }
    }

    /// Cancel every pending request and stop listening for resume signals.
    ///
    /// Requests being re-executed by a resumption are cancelled in place.
    pub fn shutdown(&self) {
        let drained = self.shared.coordinator.stop();
        if !drained.is_empty() {
            info!(count = drained.len(), "Cancelling pending requests");
        }
        for chain in drained {
            chain.complete(Err(Error::Cancelled));
        }
    }

    /// Most recent token handed out by the cloud API.
    pub fn last_token(&self) -> Option<String> {
        self.shared
            .last_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.coordinator.pending_count()
    }

    pub fn pending_requests(&self) -> Vec<PendingInfo> {
        self.shared.coordinator.pending_requests()
    }

    /// Whether the resume listener is installed.
    pub fn is_listening(&self) -> bool {
        self.shared.coordinator.is_listening()
    }

    /// Bus on which the host posts redirect URLs.
    pub fn signals(&self) -> &ResumeSignals {
        self.shared.coordinator.signals()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}
