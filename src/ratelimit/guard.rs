//! The admission guard: rule matching plus quota evaluation for one request.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::backend::QuotaBackend;
use super::matcher::match_rules;
use super::request::RequestDescriptor;
use super::rules::RuleSet;
use super::violation::{Violation, ViolationObserver};

/// Log target for the per-violation log line.
pub const VIOLATION_LOG_TARGET: &str = "quotaguard::violation";

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Continue normal request processing
    Admit,
    /// Abort the request
    Reject(Violation),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit)
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Decision::Admit => None,
            Decision::Reject(violation) => Some(violation),
        }
    }
}

/// Counters describing what the guard has decided so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    pub checked: u64,
    pub rejected: u64,
    pub store_failures: u64,
}

/// Decides whether requests are admitted.
///
/// Owns the rule set and the quota backend. The rule set can be replaced
/// at runtime; in-flight checks finish against the rules they started with.
pub struct AdmissionGuard {
    rules: RwLock<Arc<RuleSet>>,
    backend: Arc<dyn QuotaBackend>,
    observers: Vec<Arc<dyn ViolationObserver>>,
    checked: AtomicU64,
    rejected: AtomicU64,
    store_failures: AtomicU64,
}

impl AdmissionGuard {
    /// Create a new guard over `rules`, counting with `backend`.
    pub fn new(rules: RuleSet, backend: Arc<dyn QuotaBackend>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            backend,
            observers: Vec::new(),
            checked: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
        }
    }

    /// Register an observer notified of every violation.
    pub fn with_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replace the rule set.
    pub fn replace_rules(&self, rules: RuleSet) {
        let mut current = self.rules.write();
        *current = Arc::new(rules);
    }

    /// Get the current rule set.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.read().clone()
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            checked: self.checked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }

    /// Check a request against every matching rule.
    ///
    /// Rules are evaluated in configuration order and the first violation
    /// rejects the request. Counter store failures admit the request for
    /// the failing rule.
    pub async fn check(&self, request: &RequestDescriptor) -> Decision {
        if request.console {
            trace!("Console request, skipping admission check");
            return Decision::Admit;
        }

        let rules = self.rules();
        if rules.is_empty() {
            return Decision::Admit;
        }
        self.checked.fetch_add(1, Ordering::Relaxed);

        for matched in match_rules(&rules, request) {
            let rule = matched.rule.rule();
            let dimension = matched.dimension(request);

            trace!(
                method = %request.method,
                path = %request.path,
                dimension = %dimension,
                "Rule matched"
            );

            let interval = match self
                .backend
                .evaluate(rule, &dimension, &request.method, request.client())
                .await
            {
                Ok(Some(interval)) => interval,
                Ok(None) => continue,
                Err(e) => {
                    self.store_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        error = %e,
                        dimension = %dimension,
                        "Quota evaluation failed, admitting request"
                    );
                    continue;
                }
            };

            // evaluate only reports a violation for a known client
            let client = request.client().unwrap_or_default();
            let violation = Violation::new(rule, &dimension, request, client, interval);

            warn!(
                target: VIOLATION_LOG_TARGET,
                limit = violation.triggered_limit(),
                interval = %interval,
                client = %client,
                method = %request.method,
                "Rate limit of {}/{} exceeded for IP: {}, {}, method: {}",
                violation.triggered_limit().unwrap_or_default(),
                interval,
                client,
                dimension,
                request.method
            );

            for observer in &self.observers {
                observer.on_violation(&violation);
            }
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Decision::Reject(violation);
        }

        debug!(method = %request.method, path = %request.path, "Request admitted");
        Decision::Admit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GuardError, Result};
    use crate::ratelimit::counter::{Interval, ManualClock};
    use crate::ratelimit::key::Dimension;
    use crate::ratelimit::limiter::QuotaEvaluator;
    use crate::ratelimit::rules::Rule;
    use crate::ratelimit::store::MemoryCounterStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn guard(rules: Vec<Rule>) -> (Arc<ManualClock>, AdmissionGuard) {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let store = Arc::new(MemoryCounterStore::with_clock(clock.clone()));
        let backend = Arc::new(QuotaEvaluator::with_clock(store, clock.clone()));
        (
            clock,
            AdmissionGuard::new(RuleSet::compile(rules).unwrap(), backend),
        )
    }

    fn post_login(client: &str) -> RequestDescriptor {
        RequestDescriptor::new("POST", "/api/login").with_client(client)
    }

    struct FailingBackend;

    #[async_trait]
    impl QuotaBackend for FailingBackend {
        async fn evaluate(
            &self,
            _rule: &Rule,
            _dimension: &Dimension,
            _method: &str,
            _client: Option<&str>,
        ) -> Result<Option<Interval>> {
            Err(GuardError::Store("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_login_scenario() {
        let (_, guard) = guard(vec![Rule::new()
            .with_methods(["POST"])
            .for_url_path("api/login")
            .per_minute(3)]);

        for _ in 0..3 {
            assert!(guard.check(&post_login("1.2.3.4")).await.is_admitted());
        }
        let decision = guard.check(&post_login("1.2.3.4")).await;
        let violation = decision.violation().unwrap();
        assert_eq!(violation.triggered_interval, Interval::Minute);
        assert_eq!(violation.client_address, "1.2.3.4");
        assert_eq!(
            guard.stats(),
            GuardStats {
                checked: 4,
                rejected: 1,
                store_failures: 0
            }
        );
    }

    #[tokio::test]
    async fn test_first_violating_rule_is_reported() {
        let (_, guard) = guard(vec![
            Rule::new().for_url_path("api/{name}").per_hour(100),
            Rule::new()
                .for_url_path("api/login")
                .per_second(1)
                .with_meta([("rule", serde_json::json!("login-burst"))]),
            Rule::new().for_url_path("api/{name}").per_second(1),
        ]);

        assert!(guard.check(&post_login("1.2.3.4")).await.is_admitted());
        let decision = guard.check(&post_login("1.2.3.4")).await;
        let violation = decision.violation().unwrap();
        assert_eq!(violation.meta["rule"], serde_json::json!("login-burst"));
        assert_eq!(violation.triggered_interval, Interval::Second);
    }

    #[tokio::test]
    async fn test_console_and_unknown_clients_are_admitted() {
        let (_, guard) = guard(vec![Rule::new().for_url_path("api/login").per_second(1)]);

        for _ in 0..3 {
            let console = post_login("1.2.3.4").as_console();
            assert!(guard.check(&console).await.is_admitted());
            let anonymous = RequestDescriptor::new("POST", "/api/login");
            assert!(guard.check(&anonymous).await.is_admitted());
        }
    }

    #[tokio::test]
    async fn test_empty_rule_set_admits() {
        let (_, guard) = guard(Vec::new());
        assert!(guard.check(&post_login("1.2.3.4")).await.is_admitted());
        assert_eq!(guard.stats().checked, 0);
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let rules = RuleSet::compile(vec![Rule::new().for_url_path("api/login").per_second(1)])
            .unwrap();
        let guard = AdmissionGuard::new(rules, Arc::new(FailingBackend));

        for _ in 0..3 {
            assert!(guard.check(&post_login("1.2.3.4")).await.is_admitted());
        }
        assert_eq!(guard.stats().store_failures, 3);
    }

    #[tokio::test]
    async fn test_observers_receive_violations() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (_, guard) = guard(vec![Rule::new().for_url_path("api/login").per_second(1)]);
        let guard = guard.with_observer(Arc::new(move |v: &Violation| {
            sink.lock().push(v.triggered_interval);
        }));

        guard.check(&post_login("1.2.3.4")).await;
        guard.check(&post_login("1.2.3.4")).await;

        assert_eq!(*seen.lock(), vec![Interval::Second]);
    }

    #[tokio::test]
    async fn test_replace_rules() {
        let (_, guard) = guard(vec![Rule::new().for_url_path("api/login").per_second(1)]);
        guard.check(&post_login("1.2.3.4")).await;
        assert!(!guard.check(&post_login("1.2.3.4")).await.is_admitted());

        guard.replace_rules(RuleSet::new());
        assert!(guard.check(&post_login("1.2.3.4")).await.is_admitted());
    }

    #[tokio::test]
    async fn test_pattern_quota_is_shared_across_paths() {
        let (_, guard) = guard(vec![Rule::new()
            .with_methods(["GET"])
            .for_url_path("api/products/{sku}")
            .per_hour(5)]);
        let get = |sku: &str| {
            RequestDescriptor::new("GET", format!("/api/products/{}", sku)).with_client("1.2.3.4")
        };

        for sku in ["ABC", "ABC", "ABC", "XYZ", "XYZ"] {
            assert!(guard.check(&get(sku)).await.is_admitted());
        }
        let decision = guard.check(&get("XYZ")).await;
        let violation = decision.violation().unwrap();
        assert_eq!(violation.triggered_interval, Interval::Hour);
        assert_eq!(violation.url_pattern.as_deref(), Some("api/products/{sku}"));
        assert_eq!(violation.url_path.as_deref(), Some("/api/products/XYZ"));
    }

    #[tokio::test]
    async fn test_clients_are_counted_independently() {
        let (_, guard) = guard(vec![Rule::new().for_url_path("api/login").per_minute(2)]);

        for _ in 0..2 {
            assert!(guard.check(&post_login("10.0.0.1")).await.is_admitted());
            assert!(guard.check(&post_login("10.0.0.2")).await.is_admitted());
        }
        assert!(!guard.check(&post_login("10.0.0.1")).await.is_admitted());
        assert!(!guard.check(&post_login("10.0.0.2")).await.is_admitted());
        assert!(guard.check(&post_login("10.0.0.3")).await.is_admitted());
    }

    #[tokio::test]
    async fn test_window_resets_after_interval() {
        let (clock, guard) = guard(vec![Rule::new().for_url_path("api/login").per_minute(1)]);

        assert!(guard.check(&post_login("1.2.3.4")).await.is_admitted());
        clock.advance(59);
        assert!(!guard.check(&post_login("1.2.3.4")).await.is_admitted());
        clock.advance(1);
        assert!(guard.check(&post_login("1.2.3.4")).await.is_admitted());
        assert!(!guard.check(&post_login("1.2.3.4")).await.is_admitted());
    }

    #[tokio::test]
    async fn test_later_rules_not_counted_after_violation() {
        let (_, guard) = guard(vec![
            Rule::new().for_url_path("api/login").per_second(1),
            Rule::new().for_url_path("api/{name}").per_minute(2),
        ]);

        assert!(guard.check(&post_login("1.2.3.4")).await.is_admitted());
        for _ in 0..3 {
            assert!(!guard.check(&post_login("1.2.3.4")).await.is_admitted());
        }

        // the second rule only saw the admitted request
        guard.replace_rules(
            RuleSet::compile(vec![Rule::new().for_url_path("api/{name}").per_minute(2)]).unwrap(),
        );
        assert!(guard.check(&post_login("1.2.3.4")).await.is_admitted());
        assert!(!guard.check(&post_login("1.2.3.4")).await.is_admitted());
    }
}
