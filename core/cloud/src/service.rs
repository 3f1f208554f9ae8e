//! Transport traits executing cloud requests.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

use filerelay_common::Result;

use crate::request::{CloudRequest, PrefetchRequest, UploadRequest};
use crate::response::{CloudResponse, PrefetchResponse, StoredFile};

/// What the transport hands back after executing a request.
#[derive(Debug)]
pub struct ServiceReply {
    pub response: CloudResponse,
    /// Redirect the authentication surface must land on. Only meaningful
    /// when `response.auth_url` is set.
    pub redirect_url: Option<Url>,
}

impl ServiceReply {
    pub fn new(response: CloudResponse) -> Self {
        Self {
            response,
            redirect_url: None,
        }
    }

    pub fn with_redirect(mut self, redirect_url: Url) -> Self {
        self.redirect_url = Some(redirect_url);
        self
    }
}

/// Transport executing cloud requests against the network.
///
/// Implementations must be safe to call from several request chains at once.
#[async_trait]
pub trait CloudService: Send + Sync {
    /// Get the transport name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Execute a request.
    ///
    /// # Postconditions
    /// - Never fails: network and provider errors are reported in
    ///   `response.error`
    /// - When the provider needs the user to authenticate, `response.auth_url`
    ///   is set and `redirect_url` names where the provider will redirect
    async fn execute(&self, request: &CloudRequest) -> ServiceReply;

    /// Warm-up call made once the client starts.
    async fn prefetch(&self, request: &PrefetchRequest) -> Result<PrefetchResponse>;
}

/// Byte progress of a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn new(completed: u64, total: Option<u64>) -> Self {
        Self { completed, total }
    }

    /// Progress that is finished.
    pub fn done(total: u64) -> Self {
        Self {
            completed: total,
            total: Some(total),
        }
    }

    /// Completed fraction in `[0, 1]`, if the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Cloneable writer side of a progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSink(Arc<watch::Sender<Progress>>);

impl ProgressSink {
    /// Create a sink and the receiver observing it.
    pub fn channel() -> (Self, watch::Receiver<Progress>) {
        let (tx, rx) = watch::channel(Progress::default());
        (Self(Arc::new(tx)), rx)
    }

    /// Publish the latest progress. Ignored once every observer is gone.
    pub fn report(&self, progress: Progress) {
        self.0.send_replace(progress);
    }

    pub fn current(&self) -> Progress {
        *self.0.borrow()
    }
}

/// Transport sending local files to storage.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload a local file.
    ///
    /// # Postconditions
    /// - `progress` receives byte counts as the transfer advances
    ///
    /// # Errors
    /// - Local file unreadable
    /// - Network errors
    async fn upload(&self, request: &UploadRequest, progress: ProgressSink) -> Result<StoredFile>;
}
