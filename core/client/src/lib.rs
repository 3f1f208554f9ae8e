//! filerelay client
//!
//! This module provides the request orchestrator for filerelay, including:
//! - Folder listing, store and upload operations behind cancellable handles
//! - Detection of provider responses that demand interactive authentication
//! - In-process and external-browser authentication surfaces
//! - Parking of requests until an authentication redirect resumes them
//! - Bounded retries, pending timeouts and explicit cancellation

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod handle;
pub mod orchestrator;
pub mod pending;
pub mod prefetch;
pub mod signal;

// Re-export main types
pub use auth::{matches_callback, AuthSurface, SystemBrowser, UrlOpener, WebAuthSession};
pub use config::ClientConfig;
pub use coordinator::{AuthResumptionCoordinator, SignalHandler};
pub use handle::RequestHandle;
pub use orchestrator::{CloudClient, CloudClientBuilder, Completion};
pub use pending::{Parked, PendingInfo, PendingRequestRegistry, Withdrawn};
pub use signal::{ResumeSignals, RESUME_SIGNAL};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _config = ClientConfig::default();
        let _registry: PendingRequestRegistry<()> = PendingRequestRegistry::new();
        let _signals = ResumeSignals::new(4);
        assert_eq!(RESUME_SIGNAL, "resume-cloud-request");
    }
}
