//! Single-use nonce claims backed by the shared store.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::store::SharedStore;
use crate::{Error, Result};

/// Records nonces so a captured signed request cannot be replayed.
pub struct NonceStore {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

impl NonceStore {
    /// Create a nonce store.
    ///
    /// Claims are kept for twice the timestamp tolerance: once a nonce's
    /// timestamp falls outside the window on either side, the timestamp
    /// check rejects the request and the claim no longer matters.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, tolerance: Duration) -> Self {
        Self {
            store,
            ttl: tolerance * 2,
        }
    }

    /// Claim `(app_key, nonce)` for single use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] when the nonce was already used,
    /// and also when the store is unreachable. Replay protection fails
    /// closed: an outage must not open a replay window.
    pub async fn claim_once(&self, app_key: &str, nonce: &str) -> Result<()> {
        let key = format!("nonce:{app_key}:{nonce}");
        match self.store.claim(&key, self.ttl).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Authentication("nonce already used".into())),
            Err(e) => {
                warn!(error = %e, app_key, "Nonce store unavailable, rejecting signed request");
                Err(Error::Authentication("replay protection unavailable".into()))
            }
        }
    }
}
