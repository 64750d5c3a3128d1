//! Quota evaluator trait for abstracting the counter update strategies.

use async_trait::async_trait;

use super::counter::Interval;
use super::key::Dimension;
use super::rules::Rule;
use crate::error::Result;

/// Trait for quota evaluator implementations.
///
/// This trait abstracts over the read-then-write `QuotaEvaluator` and the
/// `AtomicQuotaEvaluator` so the admission guard can work with either.
#[async_trait]
pub trait QuotaBackend: Send + Sync {
    /// Evaluate every configured interval of `rule` for one request.
    ///
    /// Returns the first violated interval, or `None` when the request is
    /// within quota (or the client is unknown).
    async fn evaluate(
        &self,
        rule: &Rule,
        dimension: &Dimension,
        method: &str,
        client: Option<&str>,
    ) -> Result<Option<Interval>>;
}
