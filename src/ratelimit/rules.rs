//! Rate limit rules configuration and compilation.
//!
//! Rules are loaded from a YAML document keyed by deployment environment.
//! The `*` key applies to every environment; rules listed under a specific
//! environment are appended after the `*` rules, preserving order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{info, warn};

use super::counter::Interval;
use super::pattern::PathPattern;
use crate::error::{GuardError, Result};

/// Environment key whose rules apply everywhere.
pub const ALL_ENVIRONMENTS: &str = "*";

/// Methods a rule applies to when built without an explicit method list.
pub const DEFAULT_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Actions of one endpoint that a rule covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ActionSetRepr", into = "ActionSetRepr")]
pub enum ActionSet {
    /// Every action of the endpoint (`"*"` in configuration)
    Any,
    /// Only the listed actions
    Only(Vec<String>),
}

impl ActionSet {
    /// Whether `action` is covered by this set.
    pub fn contains(&self, action: Option<&str>) -> bool {
        match self {
            ActionSet::Any => true,
            ActionSet::Only(actions) => {
                action.is_some_and(|action| actions.iter().any(|a| a == action))
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ActionSetRepr {
    Wildcard(String),
    List(Vec<String>),
}

impl TryFrom<ActionSetRepr> for ActionSet {
    type Error = String;

    fn try_from(repr: ActionSetRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ActionSetRepr::Wildcard(s) if s == "*" => Ok(ActionSet::Any),
            ActionSetRepr::Wildcard(s) => Err(format!(
                "controller actions must be \"*\" or a list of action ids, got \"{}\"",
                s
            )),
            ActionSetRepr::List(actions) => Ok(ActionSet::Only(actions)),
        }
    }
}

impl From<ActionSet> for ActionSetRepr {
    fn from(set: ActionSet) -> Self {
        match set {
            ActionSet::Any => ActionSetRepr::Wildcard("*".to_string()),
            ActionSet::Only(actions) => ActionSetRepr::List(actions),
        }
    }
}

/// One configured limiting policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// HTTP methods this rule applies to; empty means the rule never matches
    #[serde(default)]
    pub request_methods: Vec<String>,
    /// Endpoint identifier to covered actions
    #[serde(default)]
    pub controller_actions: Option<HashMap<String, ActionSet>>,
    /// URL path patterns, tested in order
    #[serde(default)]
    pub url_paths: Vec<String>,
    /// Requests allowed per second
    #[serde(default)]
    pub requests_per_second: Option<u64>,
    /// Requests allowed per minute
    #[serde(default)]
    pub requests_per_minute: Option<u64>,
    /// Requests allowed per hour
    #[serde(default)]
    pub requests_per_hour: Option<u64>,
    /// Free-form annotations carried into violation notifications
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl Rule {
    /// A rule covering the default write methods, with no limits or targets yet.
    pub fn new() -> Self {
        Self {
            request_methods: DEFAULT_METHODS.iter().map(|m| m.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request_methods = methods.into_iter().map(Into::into).collect();
        self
    }

    pub fn per_second(mut self, limit: u64) -> Self {
        self.requests_per_second = Some(limit);
        self
    }

    pub fn per_minute(mut self, limit: u64) -> Self {
        self.requests_per_minute = Some(limit);
        self
    }

    pub fn per_hour(mut self, limit: u64) -> Self {
        self.requests_per_hour = Some(limit);
        self
    }

    /// Cover the listed actions of `endpoint`.
    pub fn for_controller_action<I, S>(mut self, endpoint: impl Into<String>, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let actions = ActionSet::Only(actions.into_iter().map(Into::into).collect());
        self.controller_actions
            .get_or_insert_with(HashMap::new)
            .insert(endpoint.into(), actions);
        self
    }

    /// Cover every action of `endpoint`.
    pub fn for_any_action_of(mut self, endpoint: impl Into<String>) -> Self {
        self.controller_actions
            .get_or_insert_with(HashMap::new)
            .insert(endpoint.into(), ActionSet::Any);
        self
    }

    pub fn for_url_path(mut self, pattern: impl Into<String>) -> Self {
        self.url_paths.push(pattern.into());
        self
    }

    /// Merge annotations into the rule's meta; later keys win.
    pub fn with_meta<I, K>(mut self, meta: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        self.meta
            .extend(meta.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    /// The configured limit for `interval`, if any.
    pub fn limit(&self, interval: Interval) -> Option<u64> {
        match interval {
            Interval::Second => self.requests_per_second,
            Interval::Minute => self.requests_per_minute,
            Interval::Hour => self.requests_per_hour,
        }
    }

    /// Whether `method` is one of this rule's request methods.
    pub fn applies_to_method(&self, method: &str) -> bool {
        self.request_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    fn has_limits(&self) -> bool {
        Interval::ALL.iter().any(|i| self.limit(*i).is_some())
    }

    fn has_targets(&self) -> bool {
        self.controller_actions.as_ref().is_some_and(|c| !c.is_empty()) || !self.url_paths.is_empty()
    }
}

/// A validated rule with its URL patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    patterns: Vec<PathPattern>,
}

impl CompiledRule {
    /// Validate `rule` and compile its URL patterns.
    pub fn compile(rule: Rule) -> Result<Self> {
        for interval in Interval::ALL {
            if rule.limit(interval) == Some(0) {
                return Err(GuardError::Config(format!(
                    "requests per {} must be a positive integer",
                    interval
                )));
            }
        }

        let patterns = rule
            .url_paths
            .iter()
            .map(|p| PathPattern::parse(p))
            .collect::<Result<Vec<_>>>()?;

        if !rule.has_limits() {
            warn!(rule = ?rule, "Rule has no limits configured and will never block");
        }
        if rule.request_methods.is_empty() || !rule.has_targets() {
            warn!(rule = ?rule, "Rule has no request methods or targets and will never match");
        }

        Ok(Self { rule, patterns })
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// Compiled URL patterns, in configuration order.
    pub fn patterns(&self) -> &[PathPattern] {
        &self.patterns
    }
}

/// An ordered, compiled set of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every rule, failing on the first invalid one.
    pub fn compile(rules: Vec<Rule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| {
                CompiledRule::compile(rule).map_err(|e| {
                    GuardError::Config(format!("rule #{} is invalid: {}", index + 1, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompiledRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a CompiledRule;
    type IntoIter = std::slice::Iter<'a, CompiledRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// A rules document: environment name to ordered rule list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RulesConfig {
    pub environments: HashMap<String, Vec<Rule>>,
}

impl RulesConfig {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse rate limit rules: {}", e)))
    }

    /// Rules for `environment`: the `*` rules followed by the environment's own.
    pub fn rules_for(&self, environment: &str) -> Vec<Rule> {
        let mut rules = self
            .environments
            .get(ALL_ENVIRONMENTS)
            .cloned()
            .unwrap_or_default();
        if environment != ALL_ENVIRONMENTS {
            if let Some(specific) = self.environments.get(environment) {
                rules.extend(specific.iter().cloned());
            }
        }
        rules
    }

    /// Compile the rules for `environment`.
    pub fn compile_for(&self, environment: &str) -> Result<RuleSet> {
        RuleSet::compile(self.rules_for(environment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environment_rules() {
        let yaml = r#"
"*":
  - request_methods: [POST]
    url_paths: ["api/login"]
    requests_per_minute: 3
production:
  - request_methods: [GET]
    url_paths: ["api/products/{sku}"]
    requests_per_hour: 5
    meta:
      team: catalog
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.environments.len(), 2);

        let rules = config.rules_for("production");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].url_paths, vec!["api/login"]);
        assert_eq!(rules[1].requests_per_hour, Some(5));
        assert_eq!(rules[1].meta["team"], serde_json::json!("catalog"));

        let rules = config.rules_for("staging");
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn test_parse_controller_actions() {
        let yaml = r#"
"*":
  - request_methods: [POST]
    requests_per_second: 2
    controller_actions:
      users: [login, register]
      entries: "*"
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        let rules = config.rules_for("*");
        let actions = rules[0].controller_actions.as_ref().unwrap();
        assert_eq!(
            actions["users"],
            ActionSet::Only(vec!["login".to_string(), "register".to_string()])
        );
        assert_eq!(actions["entries"], ActionSet::Any);
    }

    #[test]
    fn test_bad_action_wildcard_rejected() {
        let yaml = r#"
"*":
  - request_methods: [POST]
    controller_actions:
      users: "all"
"#;
        assert!(RulesConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_absent_methods_parse_as_empty() {
        let yaml = r#"
"*":
  - url_paths: ["api/login"]
    requests_per_minute: 1
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert!(config.rules_for("*")[0].request_methods.is_empty());
    }

    #[test]
    fn test_builder_defaults_and_merging() {
        let rule = Rule::new()
            .per_minute(2)
            .for_controller_action("users", ["login"])
            .for_any_action_of("entries")
            .for_url_path("api/login")
            .with_meta([("a", serde_json::json!(1))])
            .with_meta([("b", serde_json::json!(2)), ("a", serde_json::json!(3))]);

        assert_eq!(rule.request_methods, DEFAULT_METHODS.to_vec());
        assert_eq!(rule.limit(Interval::Minute), Some(2));
        assert_eq!(rule.limit(Interval::Second), None);
        assert_eq!(rule.controller_actions.as_ref().unwrap().len(), 2);
        assert_eq!(rule.meta["a"], serde_json::json!(3));
        assert_eq!(rule.meta["b"], serde_json::json!(2));
    }

    #[test]
    fn test_method_match_is_case_insensitive() {
        let rule = Rule::new().with_methods(["post"]);
        assert!(rule.applies_to_method("POST"));
        assert!(!rule.applies_to_method("GET"));
    }

    #[test]
    fn test_action_set_contains() {
        assert!(ActionSet::Any.contains(None));
        assert!(ActionSet::Any.contains(Some("x")));
        let only = ActionSet::Only(vec!["login".to_string()]);
        assert!(only.contains(Some("login")));
        assert!(!only.contains(Some("logout")));
        assert!(!only.contains(None));
    }

    #[test]
    fn test_compile_rejects_zero_limit() {
        let rule = Rule::new().per_minute(0).for_url_path("api/login");
        assert!(matches!(
            CompiledRule::compile(rule),
            Err(GuardError::Config(_))
        ));
    }

    #[test]
    fn test_compile_rejects_malformed_pattern() {
        let rules = vec![
            Rule::new().per_minute(1).for_url_path("api/login"),
            Rule::new().per_minute(1).for_url_path("api/{sku"),
        ];
        let err = RuleSet::compile(rules).unwrap_err();
        assert!(err.to_string().contains("rule #2"));
    }

    #[test]
    fn test_compile_keeps_order() {
        let rules = vec![
            Rule::new().per_second(1).for_url_path("a"),
            Rule::new().per_second(1).for_url_path("b/{id}"),
        ];
        let set = RuleSet::compile(rules).unwrap();
        assert_eq!(set.len(), 2);
        let sources: Vec<_> = set
            .iter()
            .map(|r| r.patterns()[0].as_str().to_string())
            .collect();
        assert_eq!(sources, vec!["a", "b/{id}"]);
    }
}
