//! Prometheus metrics exposition
//!
//! Counters recorded by the token crates:
//!
//! - `ebay_token_requests_total` (counter): labels `kind` (seller, application),
//!   `result` (cache_hit, refreshed, failed)
//! - `ebay_batch_refresh_total` (counter): label `outcome` (succeeded, failed)

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe the known counters.
///
/// The handle's `render()` output is served on `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!(
        "ebay_token_requests_total",
        "Access token requests by token kind and result"
    );
    metrics::describe_counter!(
        "ebay_batch_refresh_total",
        "Credentials processed by batch refresh runs, by outcome"
    );
}
