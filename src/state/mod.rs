use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use sea_orm::DatabaseConnection;

use crate::chain::ChainClient;
use crate::http::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub database: Arc<DatabaseConnection>,
    pub chain: Arc<ChainClient>,
    pub limiter: Arc<RateLimiter>,
    pub inflight: Arc<InflightClaims>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        database: DatabaseConnection,
        chain: Arc<ChainClient>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        assert!(
            Arc::strong_count(&chain) >= 1,
            "Chain client must be shared"
        );
        Self {
            database: Arc::new(database),
            chain,
            limiter,
            inflight: Arc::new(InflightClaims::default()),
            start_time: Instant::now(),
        }
    }
}

/// Wallet addresses with a claim currently in flight. Rejecting a second
/// concurrent request for the same wallet closes the window between the
/// eligibility reads and the claim upsert.
#[derive(Default)]
pub struct InflightClaims {
    inner: Mutex<HashSet<String>>,
}

impl InflightClaims {
    /// Reserves `wallet` for the duration of the returned ticket; `None`
    /// when a claim for it is already being processed.
    pub fn begin(&self, wallet: &str) -> Option<InflightTicket<'_>> {
        let mut set = self.inner.lock().expect("in-flight claim set poisoned");
        if !set.insert(wallet.to_string()) {
            return None;
        }
        Some(InflightTicket {
            owner: self,
            wallet: wallet.to_string(),
        })
    }
}

pub struct InflightTicket<'a> {
    owner: &'a InflightClaims,
    wallet: String,
}

impl Drop for InflightTicket<'_> {
    fn drop(&mut self) {
        let mut set = self
            .owner
            .inner
            .lock()
            .expect("in-flight claim set poisoned");
        set.remove(&self.wallet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflight_reservation_is_exclusive() {
        let claims = InflightClaims::default();
        let ticket = claims.begin("0xabc").expect("first reservation");
        assert!(claims.begin("0xabc").is_none());
        assert!(claims.begin("0xdef").is_some());
        drop(ticket);
        assert!(claims.begin("0xabc").is_some());
    }
}
