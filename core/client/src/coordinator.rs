//! Resumption of parked requests.
//!
//! The coordinator owns the pending registry and the resume listener. Both
//! live behind one mutex: the listener is installed when the first request
//! is parked and torn down when the last one leaves, so the registry is
//! non-empty exactly when a listener is installed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use filerelay_common::{Error, RequestId};

use crate::pending::{Parked, PendingInfo, PendingRequestRegistry, Withdrawn};
use crate::signal::{ResumeSignals, RESUME_SIGNAL};

/// Called with every redirect URL the listener receives.
///
/// Runs on the listener task and must not block.
pub type SignalHandler = Arc<dyn Fn(Url) + Send + Sync>;

struct Inner<T> {
    registry: PendingRequestRegistry<T>,
    /// Stops the listener task.
    listener: Option<CancellationToken>,
    /// Whether new requests may be parked.
    running: bool,
}

/// Owner of parked requests and of the resume listener.
pub struct AuthResumptionCoordinator<T> {
    inner: Mutex<Inner<T>>,
    signals: ResumeSignals,
    handler: SignalHandler,
    runtime: Handle,
    max_pending: usize,
}

impl<T: Send + 'static> AuthResumptionCoordinator<T> {
    /// Create a running coordinator.
    pub fn new(
        signals: ResumeSignals,
        runtime: Handle,
        max_pending: usize,
        handler: SignalHandler,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                registry: PendingRequestRegistry::new(),
                listener: None,
                running: true,
            }),
            signals,
            handler,
            runtime,
            max_pending,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept parked requests again after [`stop`](Self::stop).
    pub fn start(&self) {
        let mut inner = self.lock();
        if !inner.running {
            debug!("Resumption coordinator started");
            inner.running = true;
        }
    }

    /// Stop accepting parked requests.
    ///
    /// Returns every chain that was still parked so the caller can finish it.
    /// Chains being re-executed are cancelled; the listener goes away once
    /// they have settled.
    pub fn stop(&self) -> Vec<T> {
        let mut inner = self.lock();
        inner.running = false;
        let drained = inner.registry.drain();
        Self::remove_listener_if_idle(&mut inner);
        debug!(drained = drained.len(), "Resumption coordinator stopped");
        drained
    }

    fn install_listener(&self, inner: &mut Inner<T>) {
        if inner.listener.is_some() {
            return;
        }

        let stop = CancellationToken::new();
        let mut rx = self.signals.subscribe();
        let handler = self.handler.clone();
        let token = stop.clone();

        self.runtime.spawn(async move {
            debug!("Listening for {}", RESUME_SIGNAL);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(url) => handler(url),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Resume listener fell behind, signals dropped");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Stopped listening for {}", RESUME_SIGNAL);
        });

        inner.listener = Some(stop);
    }

    fn remove_listener(inner: &mut Inner<T>) {
        if let Some(stop) = inner.listener.take() {
            stop.cancel();
        }
    }

    fn remove_listener_if_idle(inner: &mut Inner<T>) {
        if inner.registry.is_empty() {
            Self::remove_listener(inner);
        }
    }

    /// Park a chain under its redirect URL.
    ///
    /// # Errors
    /// - Coordinator stopped
    /// - `max_pending` requests already parked
    /// - Redirect URL already registered
    ///
    /// On error the chain is handed back untouched.
    pub fn park(
        &self,
        key: String,
        request_id: RequestId,
        cancel: CancellationToken,
        chain: T,
    ) -> std::result::Result<Parked, (Error, T)> {
        let mut inner = self.lock();
        if !inner.running {
            return Err((Error::Cancelled, chain));
        }
        if inner.registry.len() >= self.max_pending {
            return Err((Error::TooManyPending(self.max_pending), chain));
        }

        let parked = inner.registry.insert(key, request_id, cancel, chain)?;
        self.install_listener(&mut inner);
        Ok(parked)
    }

    /// Take the chain whose redirect URL prefixes `url`.
    pub fn claim(&self, url: &Url) -> Option<(String, T)> {
        self.lock().registry.claim(url.as_str())
    }

    /// Park a claimed chain again.
    ///
    /// # Errors
    /// - Coordinator stopped
    /// - `key` is not in flight
    pub fn repark(&self, key: &str, chain: T) -> std::result::Result<Parked, (Error, T)> {
        let mut inner = self.lock();
        if !inner.running {
            return Err((Error::Cancelled, chain));
        }
        inner.registry.restore(key, chain)
    }

    /// Drop the slot of a claimed chain that has reached a terminal state.
    pub fn finish(&self, key: &str) {
        let mut inner = self.lock();
        inner.registry.remove(key);
        Self::remove_listener_if_idle(&mut inner);
    }

    /// Remove a chain that is still parked under `generation`.
    pub fn evict(&self, key: &str, generation: u64) -> Option<T> {
        let mut inner = self.lock();
        let chain = inner.registry.evict(key, generation);
        Self::remove_listener_if_idle(&mut inner);
        chain
    }

    /// Withdraw the chain of `request_id`, if it is registered.
    pub fn cancel(&self, request_id: RequestId) -> Option<Withdrawn<T>> {
        let mut inner = self.lock();
        let withdrawn = inner.registry.withdraw(request_id);
        Self::remove_listener_if_idle(&mut inner);
        withdrawn
    }

    pub fn is_listening(&self) -> bool {
        self.lock().listener.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn pending_count(&self) -> usize {
        self.lock().registry.len()
    }

    pub fn pending_requests(&self) -> Vec<PendingInfo> {
        self.lock().registry.snapshot()
    }

    pub fn signals(&self) -> &ResumeSignals {
        &self.signals
    }
}

impl<T> Drop for AuthResumptionCoordinator<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(stop) = inner.listener.take() {
            stop.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn coordinator(
        max_pending: usize,
    ) -> (
        AuthResumptionCoordinator<&'static str>,
        ResumeSignals,
        mpsc::UnboundedReceiver<Url>,
    ) {
        let signals = ResumeSignals::new(8);
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: SignalHandler = Arc::new(move |url| {
            let _ = tx.send(url);
        });
        let coordinator =
            AuthResumptionCoordinator::new(signals.clone(), Handle::current(), max_pending, handler);
        (coordinator, signals, rx)
    }

    async fn wait_for_listeners(signals: &ResumeSignals, expected: usize) {
        for _ in 0..100 {
            if signals.listeners() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} listeners, found {}", expected, signals.listeners());
    }

    #[tokio::test]
    async fn test_listener_follows_occupancy() {
        let (coordinator, signals, _rx) = coordinator(8);
        assert!(!coordinator.is_listening());
        assert_eq!(signals.listeners(), 0);

        coordinator
            .park("app://cb/1".to_string(), RequestId::new(), CancellationToken::new(), "a")
            .unwrap();
        assert!(coordinator.is_listening());
        assert_eq!(signals.listeners(), 1);

        coordinator
            .park("app://cb/2".to_string(), RequestId::new(), CancellationToken::new(), "b")
            .unwrap();
        // Still one listener for any number of entries.
        assert_eq!(signals.listeners(), 1);

        let (key, _) = coordinator.claim(&Url::parse("app://cb/1").unwrap()).unwrap();
        coordinator.finish(&key);
        assert!(coordinator.is_listening());

        let (key, _) = coordinator.claim(&Url::parse("app://cb/2").unwrap()).unwrap();
        coordinator.finish(&key);
        assert!(!coordinator.is_listening());
        assert_eq!(coordinator.pending_count(), 0);
        wait_for_listeners(&signals, 0).await;
    }

    #[tokio::test]
    async fn test_listener_forwards_signals() {
        let (coordinator, signals, mut rx) = coordinator(8);
        coordinator
            .park("app://cb/1".to_string(), RequestId::new(), CancellationToken::new(), "a")
            .unwrap();

        signals.post_str("app://cb/1?code=ok").unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.as_str(), "app://cb/1?code=ok");
    }

    #[tokio::test]
    async fn test_unmatched_claim_leaves_state() {
        let (coordinator, _signals, _rx) = coordinator(8);
        coordinator
            .park("app://cb/1".to_string(), RequestId::new(), CancellationToken::new(), "a")
            .unwrap();

        assert!(coordinator.claim(&Url::parse("app://nowhere").unwrap()).is_none());
        assert_eq!(coordinator.pending_count(), 1);
        assert!(coordinator.is_listening());
    }

    #[tokio::test]
    async fn test_capacity_and_stop() {
        let (coordinator, _signals, _rx) = coordinator(1);
        coordinator
            .park("app://cb/1".to_string(), RequestId::new(), CancellationToken::new(), "a")
            .unwrap();

        let (err, chain) = coordinator
            .park("app://cb/2".to_string(), RequestId::new(), CancellationToken::new(), "b")
            .unwrap_err();
        assert!(matches!(err, Error::TooManyPending(1)));
        assert_eq!(chain, "b");

        assert_eq!(coordinator.stop(), vec!["a"]);
        assert!(!coordinator.is_listening());
        assert!(!coordinator.is_running());

        let (err, _) = coordinator
            .park("app://cb/3".to_string(), RequestId::new(), CancellationToken::new(), "c")
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        coordinator.start();
        assert!(coordinator
            .park("app://cb/3".to_string(), RequestId::new(), CancellationToken::new(), "c")
            .is_ok());
    }

    #[tokio::test]
    async fn test_evict_and_cancel_by_id() {
        let (coordinator, _signals, _rx) = coordinator(8);
        let id = RequestId::new();
        let parked = coordinator
            .park("app://cb/1".to_string(), id, CancellationToken::new(), "a")
            .unwrap();
        coordinator
            .park("app://cb/2".to_string(), RequestId::new(), CancellationToken::new(), "b")
            .unwrap();

        assert!(matches!(coordinator.cancel(id), Some(Withdrawn::Parked("a"))));
        assert!(coordinator.evict("app://cb/1", parked.generation).is_none());
        assert!(coordinator.is_listening());

        let info = coordinator.pending_requests();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].redirect_url, "app://cb/2");
    }

    #[tokio::test]
    async fn test_stop_keeps_listener_for_in_flight_chain() {
        let (coordinator, _signals, _rx) = coordinator(8);
        let cancel = CancellationToken::new();
        coordinator
            .park("app://cb/1".to_string(), RequestId::new(), cancel.clone(), "a")
            .unwrap();
        let (key, chain) = coordinator.claim(&Url::parse("app://cb/1").unwrap()).unwrap();

        assert!(coordinator.stop().is_empty());
        assert!(cancel.is_cancelled());
        assert!(coordinator.is_listening());

        let (err, _) = coordinator.repark(&key, chain).unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        coordinator.finish(&key);
        assert_eq!(coordinator.pending_count(), 0);
        assert!(!coordinator.is_listening());
    }
}
