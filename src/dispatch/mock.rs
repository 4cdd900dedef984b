//! Mock backends.

use std::time::Duration;

use serde_json::Value;

use super::ResponseEnvelope;

/// Answer with the route's canned body after the configured delay.
///
/// Mocks let an API be published before its backend exists, and give
/// load tests a zero-dependency target with realistic latency.
pub(super) async fn respond(body: &Value, delay_ms: u64) -> ResponseEnvelope {
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    ResponseEnvelope::ok(body.clone())
}
