//! Counting key generation.

use std::fmt;

use super::counter::Interval;

/// The rule dimension a request was matched on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Matched by endpoint identifier and action
    Endpoint {
        endpoint: String,
        action: Option<String>,
    },
    /// Matched by URL path pattern; holds the configured pattern, not the concrete path
    UrlPattern(String),
}

impl Dimension {
    /// The dimension as it appears inside a counting key.
    pub fn key_segment(&self) -> String {
        match self {
            Dimension::Endpoint { endpoint, action } => {
                format!("{}_{}", endpoint, action.as_deref().unwrap_or_default())
            }
            Dimension::UrlPattern(pattern) => pattern
                .chars()
                .map(|c| if matches!(c, '/' | '{' | '}') { '_' } else { c })
                .collect(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Endpoint { endpoint, action } => match action {
                Some(action) => write!(f, "endpoint: {}, action: {}", endpoint, action),
                None => write!(f, "endpoint: {}", endpoint),
            },
            Dimension::UrlPattern(pattern) => write!(f, "url pattern: {}", pattern),
        }
    }
}

/// A key that uniquely identifies one counter in the store.
///
/// Two requests share a key iff they share method, matched dimension,
/// client address and interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CountingKey(String);

impl CountingKey {
    /// Build the key for one interval of one matched rule.
    pub fn new(method: &str, dimension: &Dimension, client: &str, interval: Interval) -> Self {
        let key = format!(
            "{}_{}_{}_{}",
            method,
            dimension.key_segment(),
            client,
            interval.as_str()
        );
        Self(key.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CountingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
