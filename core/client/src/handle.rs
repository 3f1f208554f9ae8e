//! Handles returned to callers of public operations.

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use filerelay_cloud::{CloudResponse, Progress, ProgressSink};
use filerelay_common::{Error, RequestId, Result};

/// Cancellable, progress-observable handle on one operation.
///
/// Exactly one terminal outcome is delivered; [`wait`](Self::wait) returns it.
#[derive(Debug)]
pub struct RequestHandle {
    id: RequestId,
    cancel: CancellationToken,
    progress: watch::Receiver<Progress>,
    outcome: oneshot::Receiver<Result<CloudResponse>>,
}

/// Producer side of a handle, kept by the operation.
pub(crate) struct HandleParts {
    pub cancel: CancellationToken,
    pub progress: ProgressSink,
    pub outcome: oneshot::Sender<Result<CloudResponse>>,
}

impl RequestHandle {
    pub(crate) fn channel(id: RequestId) -> (Self, HandleParts) {
        let cancel = CancellationToken::new();
        let (sink, progress) = ProgressSink::channel();
        let (tx, rx) = oneshot::channel();

        let handle = Self {
            id,
            cancel: cancel.clone(),
            progress,
            outcome: rx,
        };
        let parts = HandleParts {
            cancel,
            progress: sink,
            outcome: tx,
        };
        (handle, parts)
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Cancel the operation, wherever it currently is.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels the operation, usable after the handle is consumed.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    /// Receiver notified on every progress change.
    pub fn progress_updates(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }

    /// Wait for the terminal outcome.
    ///
    /// `Ok` carries the response, which may itself hold a transport error.
    /// `Err` carries failures of the authentication step, timeouts and
    /// cancellation.
    pub async fn wait(self) -> Result<CloudResponse> {
        self.outcome.await.unwrap_or(Err(Error::Cancelled))
    }
}

impl HandleParts {
    /// Completion callback that resolves the handle.
    pub fn into_completion(self) -> (CancellationToken, impl FnOnce(Result<CloudResponse>) + Send) {
        let HandleParts {
            cancel,
            progress,
            outcome,
        } = self;

        let completion = move |result: Result<CloudResponse>| {
            if result.is_ok() {
                let total = progress.current().total.unwrap_or(1);
                progress.report(Progress::done(total));
            }
            let _ = outcome.send(result);
        };
        (cancel, completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_resolves_handle() {
        let (handle, parts) = RequestHandle::channel(RequestId::new());
        let (_cancel, completion) = parts.into_completion();

        completion(Ok(CloudResponse::default()));

        assert_eq!(handle.progress(), Progress::done(1));
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_producer_reads_as_cancelled() {
        let (handle, parts) = RequestHandle::channel(RequestId::new());
        drop(parts);

        assert!(matches!(handle.wait().await, Err(Error::Cancelled)));
    }

    #[test]
    fn test_cancel_reaches_producer() {
        let (handle, parts) = RequestHandle::channel(RequestId::new());
        let (cancel, _completion) = parts.into_completion();

        let token = handle.cancel_token();
        handle.cancel();
        assert!(cancel.is_cancelled());
        assert!(token.is_cancelled());
        assert!(handle.is_cancelled());
    }
}
