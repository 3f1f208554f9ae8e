//! Resume signal bus.
//!
//! The host application captures authentication redirects (typically through
//! a URL scheme registered with the OS) and posts them here. Whoever has
//! parked requests listens.

use std::sync::OnceLock;
use tokio::sync::broadcast;
use url::Url;

use filerelay_common::{Error, Result};

/// Name of the resume signal.
pub const RESUME_SIGNAL: &str = "resume-cloud-request";

const SHARED_CAPACITY: usize = 64;

static SHARED: OnceLock<ResumeSignals> = OnceLock::new();

/// Broadcast channel carrying redirect URLs.
#[derive(Debug, Clone)]
pub struct ResumeSignals {
    tx: broadcast::Sender<Url>,
}

impl ResumeSignals {
    /// Create a private bus buffering `capacity` signals per listener.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// The process-wide bus.
    pub fn shared() -> Self {
        SHARED.get_or_init(|| Self::new(SHARED_CAPACITY)).clone()
    }

    /// Post a redirect URL.
    ///
    /// Returns how many listeners received it. Zero is not an error: it just
    /// means nothing is parked.
    pub fn post(&self, url: Url) -> usize {
        match self.tx.send(url) {
            Ok(listeners) => listeners,
            Err(broadcast::error::SendError(url)) => {
                tracing::debug!(%url, "No listener for {}", RESUME_SIGNAL);
                0
            }
        }
    }

    /// Parse and post a redirect URL.
    pub fn post_str(&self, raw: &str) -> Result<usize> {
        let url = Url::parse(raw.trim())
            .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL '{}': {}", raw, e)))?;
        Ok(self.post(url))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Url> {
        self.tx.subscribe()
    }

    /// Number of active listeners.
    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ResumeSignals {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_post_reaches_subscribers() {
        let signals = ResumeSignals::new(4);
        let mut rx = signals.subscribe();

        let delivered = signals.post_str("app://cb/123?code=x").unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap().as_str(), "app://cb/123?code=x");
    }

    #[test]
    fn test_post_without_listeners() {
        let signals = ResumeSignals::new(4);
        assert_eq!(signals.listeners(), 0);
        assert_eq!(signals.post_str("app://cb").unwrap(), 0);
        assert!(signals.post_str("not a url").is_err());
    }

    #[test]
    fn test_shared_bus_is_single_instance() {
        let a = ResumeSignals::shared();
        let b = ResumeSignals::shared();
        let _rx = a.subscribe();
        assert!(b.listeners() >= 1);
    }
}
