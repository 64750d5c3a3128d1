//! Matching requests against configured rules.

use super::key::Dimension;
use super::request::RequestDescriptor;
use super::rules::{CompiledRule, RuleSet};

/// How a rule matched a request.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    /// The matched rule
    pub rule: &'a CompiledRule,
    /// The request's endpoint and action are covered by the rule
    pub endpoint_matched: bool,
    /// The first configured URL pattern that matched the request path
    pub url_pattern: Option<&'a str>,
}

impl RuleMatch<'_> {
    /// The dimension the request is counted under.
    ///
    /// When both dimensions matched, the endpoint is used so the request
    /// is counted once per rule.
    pub fn dimension(&self, request: &RequestDescriptor) -> Dimension {
        match (&request.endpoint, self.url_pattern) {
            (Some(endpoint), _) if self.endpoint_matched => Dimension::Endpoint {
                endpoint: endpoint.clone(),
                action: request.action.clone(),
            },
            (_, Some(pattern)) => Dimension::UrlPattern(pattern.to_string()),
            // a RuleMatch always has at least one matched dimension
            (_, None) => Dimension::UrlPattern(String::new()),
        }
    }
}

/// Test a single rule against a request.
pub fn match_rule<'a>(rule: &'a CompiledRule, request: &RequestDescriptor) -> Option<RuleMatch<'a>> {
    let config = rule.rule();
    if !config.applies_to_method(&request.method) {
        return None;
    }

    let endpoint_matched = match (&config.controller_actions, &request.endpoint) {
        (Some(actions), Some(endpoint)) => actions
            .get(endpoint)
            .is_some_and(|set| set.contains(request.action.as_deref())),
        _ => false,
    };

    let url_pattern = rule
        .patterns()
        .iter()
        .find(|p| p.matches(&request.path))
        .map(|p| p.as_str());

    if !endpoint_matched && url_pattern.is_none() {
        return None;
    }

    Some(RuleMatch {
        rule,
        endpoint_matched,
        url_pattern,
    })
}

/// Lazily yield every rule in `rules` that applies to `request`, in configuration order.
pub fn match_rules<'a>(
    rules: &'a RuleSet,
    request: &'a RequestDescriptor,
) -> impl Iterator<Item = RuleMatch<'a>> + 'a {
    rules.iter().filter_map(move |rule| match_rule(rule, request))
}
