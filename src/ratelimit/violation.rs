//! Violation notifications and the observers that receive them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::counter::Interval;
use super::key::Dimension;
use super::request::RequestDescriptor;
use super::rules::Rule;

/// Details of one blocked request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Unique id of this notification
    pub id: Uuid,
    /// When the decision was made
    pub occurred_at: DateTime<Utc>,
    pub request_method: String,
    /// Endpoint identifier, when the rule matched on endpoint
    pub endpoint: Option<String>,
    /// Action identifier, when the rule matched on endpoint
    pub action: Option<String>,
    /// Configured URL pattern, when the rule matched on URL path
    pub url_pattern: Option<String>,
    /// Concrete request path, when the rule matched on URL path
    pub url_path: Option<String>,
    pub client_address: String,
    /// The interval whose quota was exceeded
    pub triggered_interval: Interval,
    pub requests_per_second: Option<u64>,
    pub requests_per_minute: Option<u64>,
    pub requests_per_hour: Option<u64>,
    /// The rule's annotations
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Violation {
    pub fn new(
        rule: &Rule,
        dimension: &Dimension,
        request: &RequestDescriptor,
        client_address: &str,
        triggered_interval: Interval,
    ) -> Self {
        let (endpoint, action, url_pattern, url_path) = match dimension {
            Dimension::Endpoint { endpoint, action } => {
                (Some(endpoint.clone()), action.clone(), None, None)
            }
            Dimension::UrlPattern(pattern) => {
                (None, None, Some(pattern.clone()), Some(request.path.clone()))
            }
        };

        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            request_method: request.method.clone(),
            endpoint,
            action,
            url_pattern,
            url_path,
            client_address: client_address.to_string(),
            triggered_interval,
            requests_per_second: rule.requests_per_second,
            requests_per_minute: rule.requests_per_minute,
            requests_per_hour: rule.requests_per_hour,
            meta: rule.meta.clone(),
        }
    }

    /// The limit of the interval that was exceeded.
    pub fn triggered_limit(&self) -> Option<u64> {
        match self.triggered_interval {
            Interval::Second => self.requests_per_second,
            Interval::Minute => self.requests_per_minute,
            Interval::Hour => self.requests_per_hour,
        }
    }
}

/// Receives a notification for every blocked request.
pub trait ViolationObserver: Send + Sync {
    fn on_violation(&self, violation: &Violation);
}

/// Publishes violations on a broadcast channel.
///
/// Sending never blocks; subscribers that fall behind miss the oldest
/// notifications.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<Violation>,
}

impl BroadcastObserver {
    /// Create an observer whose channel buffers up to `capacity` notifications.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Violation> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream of notifications.
    pub fn stream(&self) -> BroadcastStream<Violation> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl ViolationObserver for BroadcastObserver {
    fn on_violation(&self, violation: &Violation) {
        // no subscribers is fine
        let _ = self.sender.send(violation.clone());
    }
}

impl<F> ViolationObserver for F
where
    F: Fn(&Violation) + Send + Sync,
{
    fn on_violation(&self, violation: &Violation) {
        self(violation)
    }
}
