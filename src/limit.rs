//! Admission control for outgoing requests
//!
//! A thin layer above [`Client::call`] that bounds how many requests
//! are outstanding at once and how closely spaced their starts may
//! be. Purely a consumer of the correlation engine; the engine itself
//! imposes no limits.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::common::config::LimitConfig;
use crate::common::Result;
use crate::rpc::Client;

/// Rate/concurrency limiter for daemon calls
#[derive(Clone)]
pub struct RequestLimiter {
    permits: Arc<Semaphore>,
    min_interval: Duration,
    last_start: Arc<Mutex<Option<Instant>>>,
}

impl RequestLimiter {
    pub fn new(config: &LimitConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            min_interval: config.min_request_interval(),
            last_start: Arc::new(Mutex::new(None)),
        }
    }

    /// Issue a call once a permit is free and the spacing allows
    pub async fn call(&self, client: &Client, method: &str, params: Option<Value>) -> Result<Value> {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("limiter semaphore closed");

        self.wait_for_slot().await;
        client.call(method, params).await
    }

    /// Enforce the minimum spacing between request starts
    async fn wait_for_slot(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last_start = self.last_start.lock().await;
        let now = Instant::now();
        if let Some(last) = *last_start {
            let next_allowed = last + self.min_interval;
            if next_allowed > now {
                tokio::time::sleep(next_allowed - now).await;
            }
        }
        *last_start = Some(Instant::now());
    }
}
