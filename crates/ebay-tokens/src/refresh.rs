//! Batch token refresh
//!
//! Walks every eligible credential once and pushes it through the manager.
//! One credential failing never stops the batch; the summary carries the
//! tally so a scheduled caller can turn it into an exit status.

use std::sync::Arc;
use std::time::Duration;

use ebay_auth::CredentialId;
use rand::RngExt;
use tracing::{debug, error, info, warn};

use crate::manager::TokenManager;

/// Jittered pause between two credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshDelay {
    pub min: Duration,
    pub max: Duration,
}

impl RefreshDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// No pause at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Uniform sample in `[min, max]`, millisecond resolution.
    pub fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if max <= min {
            return self.min;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

impl Default for RefreshDelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(5))
    }
}

#[derive(Debug, Default)]
pub struct RefreshSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<(CredentialId, String)>,
}

impl RefreshSummary {
    /// True iff no credential failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Refresh every active credential of the manager's environment whose
/// refresh token is still usable.
///
/// Per-credential failures, undecryptable tokens included, land in the
/// summary.
pub async fn refresh_all(manager: &TokenManager, delay: RefreshDelay) -> RefreshSummary {
    let environment = manager.environment();
    let credentials = manager
        .credential_store()
        .list_active_with_usable_refresh_token(environment)
        .await;

    info!(
        environment = %environment,
        credentials = credentials.len(),
        "starting eBay token refresh"
    );

    let mut summary = RefreshSummary::default();
    for (index, credential) in credentials.iter().enumerate() {
        if index > 0 {
            let pause = delay.sample();
            debug!(pause_ms = pause.as_millis() as u64, "pausing before next credential");
            tokio::time::sleep(pause).await;
        }

        match manager.get_seller_access_token(credential.id).await {
            Ok(_) => {
                info!(credential_id = credential.id, "refreshed eBay token");
                summary.succeeded += 1;
                metrics::counter!("ebay_batch_refresh_total", "outcome" => "succeeded").increment(1);
            }
            Err(e) => {
                error!(credential_id = credential.id, error = %e, "failed to refresh eBay token");
                summary.failed += 1;
                summary.failures.push((credential.id, e.to_string()));
                metrics::counter!("ebay_batch_refresh_total", "outcome" => "failed").increment(1);
            }
        }
    }

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        "eBay token refresh finished"
    );
    summary
}

/// Run [`refresh_all`] every `interval` in the background.
///
/// The first run happens one full interval after spawn.
pub fn spawn_refresh_task(
    manager: Arc<TokenManager>,
    interval: Duration,
    delay: RefreshDelay,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let summary = refresh_all(&manager, delay).await;
            if !summary.is_success() {
                warn!(failed = summary.failed, "scheduled refresh had failures");
            }
        }
    })
}
