//! Interactive authentication surfaces.
//!
//! A provider that wants the user to sign in answers with an auth URL. The
//! client shows that URL through one of two surfaces, chosen once when the
//! client is built:
//! - an in-process session that reports the callback URL (or an error)
//!   directly, exactly once
//! - an external handoff that only opens the URL; the outcome comes back
//!   later as a resume signal

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use url::Url;

use filerelay_common::{Error, Result};

/// Browser session running inside the host process.
#[async_trait]
pub trait WebAuthSession: Send + Sync {
    /// Present `auth_url` and wait for the user to finish.
    ///
    /// # Postconditions
    /// - Returns the URL the session landed on, normally starting with
    ///   `callback_prefix`
    ///
    /// # Errors
    /// - `AuthCancelled` when the user dismisses the session
    /// - `Authentication` when the session cannot be presented
    async fn authenticate(&self, auth_url: &Url, callback_prefix: &Url) -> Result<Url>;
}

/// Fire-and-forget URL handoff to another application.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &Url) -> Result<()>;
}

/// Opens URLs in the system browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl UrlOpener for SystemBrowser {
    fn open(&self, url: &Url) -> Result<()> {
        open::that(url.as_str())
            .map_err(|e| Error::Authentication(format!("Failed to open browser: {}", e)))
    }
}

/// The authentication surface a client uses.
#[derive(Clone)]
pub enum AuthSurface {
    /// Session reporting its outcome directly.
    InProcess(Arc<dyn WebAuthSession>),
    /// Handoff whose outcome arrives as a resume signal.
    ExternalHandoff(Arc<dyn UrlOpener>),
}

impl AuthSurface {
    pub fn in_process(session: impl WebAuthSession + 'static) -> Self {
        AuthSurface::InProcess(Arc::new(session))
    }

    pub fn external(opener: impl UrlOpener + 'static) -> Self {
        AuthSurface::ExternalHandoff(Arc::new(opener))
    }

    /// External handoff to the system browser.
    pub fn system_browser() -> Self {
        Self::external(SystemBrowser)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthSurface::InProcess(_) => "in-process",
            AuthSurface::ExternalHandoff(_) => "external",
        }
    }
}

impl fmt::Debug for AuthSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthSurface").field(&self.kind()).finish()
    }
}

/// Whether `callback` belongs to the redirect `prefix`.
pub fn matches_callback(callback: &Url, prefix: &Url) -> bool {
    callback.as_str().starts_with(prefix.as_str())
}
