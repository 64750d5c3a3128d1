//! Rate limiting logic and state management.

mod atomic;
mod backend;
mod counter;
mod guard;
mod key;
mod limiter;
mod matcher;
mod pattern;
mod request;
pub mod rules;
mod store;
mod violation;

pub use atomic::AtomicQuotaEvaluator;
pub use backend::QuotaBackend;
pub use counter::{Clock, CounterRecord, Interval, ManualClock, SystemClock};
pub use guard::{AdmissionGuard, Decision, GuardStats, VIOLATION_LOG_TARGET};
pub use key::{CountingKey, Dimension};
pub use limiter::QuotaEvaluator;
pub use matcher::{match_rule, match_rules, RuleMatch};
pub use pattern::PathPattern;
pub use request::RequestDescriptor;
pub use rules::{ActionSet, CompiledRule, Rule, RuleSet, RulesConfig};
pub use store::{AtomicCounterStore, CounterStore, MemoryCounterStore};
pub use violation::{BroadcastObserver, Violation, ViolationObserver};
