//! URL path patterns with `{name}` variable segments.

use regex::Regex;

use crate::error::{GuardError, Result};

/// A compiled URL path pattern.
///
/// Patterns are slash-separated. A segment written as `{name}` matches one
/// non-empty path segment; everything else is matched literally. Leading
/// slashes are ignored on both the pattern and the path being tested.
#[derive(Debug, Clone)]
pub struct PathPattern {
    /// The pattern exactly as configured
    source: String,
    /// The pattern with leading slashes removed
    normalized: String,
    /// Anchored matcher, present only when the pattern has variable segments
    regex: Option<Regex>,
}

impl PathPattern {
    /// Compile a pattern, rejecting malformed brace usage.
    pub fn parse(source: &str) -> Result<Self> {
        let normalized = trim_separator(source).to_string();
        let mut has_variables = false;
        let mut expr = String::with_capacity(normalized.len() + 8);
        expr.push('^');

        for (i, segment) in normalized.split('/').enumerate() {
            if i > 0 {
                expr.push('/');
            }
            if is_variable(segment) {
                if segment.len() == 2 {
                    return Err(invalid(source, "variable segment has no name"));
                }
                has_variables = true;
                expr.push_str("[^/]+");
            } else if segment.contains('{') || segment.contains('}') {
                return Err(invalid(
                    source,
                    "braces must enclose a whole, balanced path segment",
                ));
            } else {
                expr.push_str(&regex::escape(segment));
            }
        }
        expr.push('$');

        let regex = if has_variables {
            Some(Regex::new(&expr).map_err(|e| invalid(source, &e.to_string()))?)
        } else {
            None
        };

        Ok(Self {
            source: source.to_string(),
            normalized,
            regex,
        })
    }

    /// Test a request path against this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let path = trim_separator(path);
        match &self.regex {
            Some(regex) => regex.is_match(path),
            None => self.normalized == path,
        }
    }

    /// The pattern as it was configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern contains at least one variable segment.
    pub fn has_variables(&self) -> bool {
        self.regex.is_some()
    }
}

fn is_variable(segment: &str) -> bool {
    segment.len() >= 2
        && segment.starts_with('{')
        && segment.ends_with('}')
        && !segment[1..segment.len() - 1].contains(['{', '}'])
}

fn trim_separator(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn invalid(pattern: &str, reason: &str) -> GuardError {
    GuardError::Pattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern_exact_match() {
        let pattern = PathPattern::parse("api/login").unwrap();
        assert!(!pattern.has_variables());
        assert!(pattern.matches("/api/login"));
        assert!(pattern.matches("api/login"));
        assert!(!pattern.matches("/api/login/extra"));
        assert!(!pattern.matches("/api/logins"));
    }

    #[test]
    fn test_leading_separator_ignored_on_pattern() {
        let pattern = PathPattern::parse("/api/login").unwrap();
        assert!(pattern.matches("api/login"));
        assert_eq!(pattern.as_str(), "/api/login");
    }

    #[test]
    fn test_variable_segment() {
        let pattern = PathPattern::parse("api/products/{sku}").unwrap();
        assert!(pattern.has_variables());
        assert!(pattern.matches("/api/products/ABC"));
        assert!(pattern.matches("/api/products/x-y_z.1"));
        assert!(!pattern.matches("/api/products/"));
        assert!(!pattern.matches("/api/products/ABC/reviews"));
        assert!(!pattern.matches("/api/products"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let err = PathPattern::parse("files/{name}.json").unwrap_err();
        assert!(matches!(err, GuardError::Pattern { .. }));

        let pattern = PathPattern::parse("v1.0/{id}").unwrap();
        assert!(pattern.matches("v1.0/7"));
        assert!(!pattern.matches("v1x0/7"));
    }

    #[test]
    fn test_multiple_variables() {
        let pattern = PathPattern::parse("users/{user}/orders/{order}").unwrap();
        assert!(pattern.matches("/users/42/orders/abc"));
        assert!(!pattern.matches("/users/42/orders"));
    }

    #[test]
    fn test_malformed_patterns_rejected() {
        assert!(PathPattern::parse("api/{sku").is_err());
        assert!(PathPattern::parse("api/sku}").is_err());
        assert!(PathPattern::parse("api/{}").is_err());
        assert!(PathPattern::parse("api/{{sku}}").is_err());
    }
}
