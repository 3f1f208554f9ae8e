//! Warm-up request issued when a client starts.

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use filerelay_cloud::{PrefetchRequest, PrefetchResponse};
use filerelay_common::Result;

use crate::orchestrator::CloudClient;

fn handle_prefetch(result: &Result<PrefetchResponse>) {
    match result {
        Ok(response) if response.blocked => {
            warn!("Api key is blocked, cloud requests will be rejected");
        }
        Ok(response) => debug!(settings = response.settings.len(), "Prefetch complete"),
        Err(err) => warn!(error = %err, "Prefetch failed"),
    }
}

impl CloudClient {
    /// Fetch account settings in the background.
    ///
    /// Failures are logged; nothing depends on the result.
    pub fn prefetch(&self) -> JoinHandle<Result<PrefetchResponse>> {
        let shared = self.shared().clone();
        let request = PrefetchRequest {
            api_key: shared.config.api_key.clone(),
        };

        shared.runtime.clone().spawn(async move {
            let result = shared.service.prefetch(&request).await;
            handle_prefetch(&result);
            result
        })
    }
}
