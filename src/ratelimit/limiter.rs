//! Read-then-write quota evaluator.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use super::backend::QuotaBackend;
use super::counter::{Clock, CounterRecord, Interval, SystemClock};
use super::key::{CountingKey, Dimension};
use super::rules::Rule;
use super::store::CounterStore;
use crate::error::Result;

/// Evaluates fixed-window quotas with a plain `get` followed by `set`.
///
/// Two concurrent requests on the same key can read the same count, so
/// under contention this evaluator may admit up to `concurrency - 1`
/// extra requests per window. Use
/// [`AtomicQuotaEvaluator`](super::AtomicQuotaEvaluator) when the store
/// supports an atomic increment.
pub struct QuotaEvaluator<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: CounterStore + ?Sized> QuotaEvaluator<S> {
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

    /// Count one request against a single interval.
    ///
    /// Returns `true` if the request violates the quota. A violating request
    /// leaves the stored counter untouched. A record whose window has ended
    /// is replaced by a fresh window opened by this request.
    pub async fn check_interval(
        &self,
        key: &CountingKey,
        limit: u64,
        interval: Interval,
    ) -> Result<bool> {
        let now = self.clock.now();
        let record = match self.store.get(key.as_str()).await? {
            Some(record) if record.is_live(now, interval) => CounterRecord {
                count: record.count + 1,
                window_start: record.window_start,
            },
            _ => CounterRecord::fresh(now),
        };

        trace!(
            key = %key,
            count = record.count,
            window_start = record.window_start,
            limit = limit,
            "Checking quota interval"
        );

        if record.count > limit {
            debug!(
                key = %key,
                count = record.count,
                limit = limit,
                interval = %interval,
                "Quota exceeded"
            );
            return Ok(true);
        }

        self.store
            .set(key.as_str(), record, interval.duration())
            .await?;
        Ok(false)
    }
}

#[async_trait]
impl<S: CounterStore + ?Sized> QuotaBackend for QuotaEvaluator<S> {
    async fn evaluate(
        &self,
        rule: &Rule,
        dimension: &Dimension,
        method: &str,
        client: Option<&str>,
    ) -> Result<Option<Interval>> {
        let Some(client) = client.filter(|c| !c.is_empty()) else {
            trace!("No client address, skipping quota evaluation");
            return Ok(None);
        };

        for interval in Interval::ALL {
            let Some(limit) = rule.limit(interval) else {
                continue;
            };
            let key = CountingKey::new(method, dimension, client, interval);
            if self.check_interval(&key, limit, interval).await? {
                return Ok(Some(interval));
            }
        }
        Ok(None)
    }
}
