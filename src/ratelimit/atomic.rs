//! Quota evaluator backed by a store-side atomic increment.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::QuotaBackend;
use super::counter::{Clock, Interval, SystemClock};
use super::key::{CountingKey, Dimension};
use super::rules::Rule;
use super::store::AtomicCounterStore;
use crate::error::Result;

/// Evaluates fixed-window quotas with one atomic store operation per interval.
///
/// Concurrent requests on the same key never observe the same count, so the
/// quota is exact under contention. Unlike [`QuotaEvaluator`](super::QuotaEvaluator),
/// requests rejected by an interval are counted in that interval's window.
pub struct AtomicQuotaEvaluator<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: AtomicCounterStore + ?Sized> AtomicQuotaEvaluator<S> {
    /// Create an evaluator using the system clock.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<S: AtomicCounterStore + ?Sized> QuotaBackend for AtomicQuotaEvaluator<S> {
    async fn evaluate(
        &self,
        rule: &Rule,
        dimension: &Dimension,
        method: &str,
        client: Option<&str>,
    ) -> Result<Option<Interval>> {
        let Some(client) = client.filter(|c| !c.is_empty()) else {
            return Ok(None);
        };

        for interval in Interval::ALL {
            let Some(limit) = rule.limit(interval) else {
                continue;
            };
            let key = CountingKey::new(method, dimension, client, interval);
            let now = self.clock.now();
            let record = self
                .store
                .increment(key.as_str(), now, interval.duration())
                .await?;

            trace!(
                key = %key,
                count = record.count,
                window_start = record.window_start,
                limit = limit,
                "Incremented quota interval"
            );

            if record.count > limit {
                debug!(
                    key = %key,
                    count = record.count,
                    limit = limit,
                    interval = %interval,
                    "Quota exceeded"
                );
                return Ok(Some(interval));
            }
        }
        Ok(None)
    }
}
