//! Choice Conditions
//!
//! Pure predicates over an [`ExecutionContext`], evaluated by Choice nodes.
//! Branches are tried in declaration order and the first match wins.
//!
//! # Example YAML Format
//!
//! ```yaml
//! type: choice
//! branches:
//!   - when:
//!       any_of:
//!         - numeric_equals: { path: $.second_step.status_code, value: 200 }
//!         - string_equals: { path: $.second_step.status_code, value: "{}" }
//!     next: data_load_more
//! otherwise: wait_after_data_load_initial
//! ```

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::{ExecutionContext, JsonPath};

/// A `*` wildcard pattern matched against a whole string.
///
/// `*` matches any run of characters (including none); everything else is
/// literal.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WildcardPattern {
    source: String,
    regex: Regex,
}

impl WildcardPattern {
    pub fn new(source: impl Into<String>) -> Result<Self, regex::Error> {
        let source = source.into();
        let body = source
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^(?s){}$", body))?;
        Ok(Self { source, regex })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for WildcardPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WildcardPattern({:?})", self.source)
    }
}

impl PartialEq for WildcardPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl TryFrom<String> for WildcardPattern {
    type Error = regex::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WildcardPattern> for String {
    fn from(pattern: WildcardPattern) -> Self {
        pattern.source
    }
}

/// A predicate on the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The path resolves to any value (including null).
    IsPresent(JsonPath),
    StringEquals { path: JsonPath, value: String },
    NumericEquals { path: JsonPath, value: f64 },
    NumericLessThanEquals { path: JsonPath, value: f64 },
    /// Compares two numeric fields of the context: `path < other`.
    NumericLessThanPath { path: JsonPath, other: JsonPath },
    StringMatches { path: JsonPath, pattern: WildcardPattern },
    StartsWith { path: JsonPath, prefix: String },
    AnyOf(Vec<Condition>),
}

impl Condition {
    pub fn is_present(path: JsonPath) -> Self {
        Self::IsPresent(path)
    }

    pub fn string_equals(path: JsonPath, value: impl Into<String>) -> Self {
        Self::StringEquals {
            path,
            value: value.into(),
        }
    }

    pub fn numeric_equals(path: JsonPath, value: f64) -> Self {
        Self::NumericEquals { path, value }
    }

    pub fn numeric_less_than_equals(path: JsonPath, value: f64) -> Self {
        Self::NumericLessThanEquals { path, value }
    }

    pub fn numeric_less_than_path(path: JsonPath, other: JsonPath) -> Self {
        Self::NumericLessThanPath { path, other }
    }

    pub fn string_matches(path: JsonPath, pattern: WildcardPattern) -> Self {
        Self::StringMatches { path, pattern }
    }

    pub fn starts_with(path: JsonPath, prefix: impl Into<String>) -> Self {
        Self::StartsWith {
            path,
            prefix: prefix.into(),
        }
    }

    pub fn any_of(conditions: Vec<Condition>) -> Self {
        Self::AnyOf(conditions)
    }

    /// True when the string at `path` equals any of `values`.
    pub fn string_in(path: &JsonPath, values: &[&str]) -> Self {
        Self::AnyOf(
            values
                .iter()
                .map(|value| Self::string_equals(path.clone(), *value))
                .collect(),
        )
    }

    /// True when any of `paths` is present.
    pub fn any_present(paths: Vec<JsonPath>) -> Self {
        Self::AnyOf(paths.into_iter().map(Self::IsPresent).collect())
    }

    /// Evaluates the condition. Type mismatches evaluate to false.
    pub fn evaluate(&self, context: &ExecutionContext) -> bool {
        match self {
            Self::IsPresent(path) => context.contains(path),
            Self::StringEquals { path, value } => {
                string_at(context, path).is_some_and(|s| s == value.as_str())
            }
            Self::NumericEquals { path, value } => {
                number_at(context, path).is_some_and(|n| n == *value)
            }
            Self::NumericLessThanEquals { path, value } => {
                number_at(context, path).is_some_and(|n| n <= *value)
            }
            Self::NumericLessThanPath { path, other } => {
                match (number_at(context, path), number_at(context, other)) {
                    (Some(left), Some(right)) => left < right,
                    _ => false,
                }
            }
            Self::StringMatches { path, pattern } => {
                string_at(context, path).is_some_and(|s| pattern.is_match(s))
            }
            Self::StartsWith { path, prefix } => {
                string_at(context, path).is_some_and(|s| s.starts_with(prefix.as_str()))
            }
            Self::AnyOf(conditions) => conditions.iter().any(|c| c.evaluate(context)),
        }
    }
}

/// One `when → next` arm of a Choice node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceBranch {
    pub when: Condition,
    pub next: String,
}

impl ChoiceBranch {
    pub fn new(when: Condition, next: impl Into<String>) -> Self {
        Self {
            when,
            next: next.into(),
        }
    }
}

/// Picks the first matching branch target, or `otherwise`.
pub fn route<'a>(branches: &'a [ChoiceBranch], otherwise: &'a str, context: &ExecutionContext) -> &'a str {
    branches
        .iter()
        .find(|branch| branch.when.evaluate(context))
        .map(|branch| branch.next.as_str())
        .unwrap_or(otherwise)
}

fn string_at<'a>(context: &'a ExecutionContext, path: &JsonPath) -> Option<&'a str> {
    context.get(path).and_then(Value::as_str)
}

fn number_at(context: &ExecutionContext, path: &JsonPath) -> Option<f64> {
    context.get(path).and_then(Value::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(expr: &str) -> JsonPath {
        JsonPath::parse(expr).unwrap()
    }

    fn ctx(value: Value) -> ExecutionContext {
        ExecutionContext::from_value(value).unwrap()
    }

    #[test]
    fn test_wildcard_pattern() {
        let pattern = WildcardPattern::new(
            "Stack with id * does not exist (Service: CloudFormation, Status Code: 400, Request ID*",
        )
        .unwrap();

        assert!(pattern.is_match(
            "Stack with id app-api-dev does not exist (Service: CloudFormation, Status Code: 400, Request ID: 1234)"
        ));
        assert!(!pattern.is_match("Rate exceeded"));
        assert!(!pattern.is_match("Stack with id x does not exist"));
    }

    #[test]
    fn test_wildcard_escapes_regex_characters() {
        let pattern = WildcardPattern::new("a.b(c)*").unwrap();
        assert!(pattern.is_match("a.b(c) anything"));
        assert!(!pattern.is_match("aXb(c)"));
    }

    #[test]
    fn test_is_present_includes_null() {
        let context = ctx(json!({"run-rds-init": null}));
        assert!(Condition::is_present(path("$.run-rds-init")).evaluate(&context));
        assert!(!Condition::is_present(path("$.runRdsInit")).evaluate(&context));
    }

    #[test]
    fn test_string_and_numeric_equality() {
        let context = ctx(json!({"code": 200, "text": "{}"}));

        assert!(Condition::numeric_equals(path("$.code"), 200.0).evaluate(&context));
        assert!(!Condition::numeric_equals(path("$.text"), 200.0).evaluate(&context));
        assert!(Condition::string_equals(path("$.text"), "{}").evaluate(&context));
        assert!(!Condition::string_equals(path("$.code"), "200").evaluate(&context));
    }

    #[test]
    fn test_numeric_comparisons() {
        let context = ctx(json!({"counter": 2, "max_iterations": 3, "inner": 4}));

        assert!(Condition::numeric_less_than_path(path("$.counter"), path("$.max_iterations"))
            .evaluate(&context));
        assert!(!Condition::numeric_less_than_path(path("$.max_iterations"), path("$.counter"))
            .evaluate(&context));
        assert!(Condition::numeric_less_than_equals(path("$.counter"), 3.0).evaluate(&context));
        assert!(!Condition::numeric_less_than_equals(path("$.inner"), 3.0).evaluate(&context));
    }

    #[test]
    fn test_any_of_and_helpers() {
        let context = ctx(json!({"stack": {"status": "ROLLBACK_COMPLETE"}}));
        let status = path("$.stack.status");

        assert!(Condition::string_in(&status, &["CREATE_FAILED", "ROLLBACK_COMPLETE"]).evaluate(&context));
        assert!(!Condition::string_in(&status, &["DELETE_IN_PROGRESS"]).evaluate(&context));
        assert!(!Condition::any_of(vec![]).evaluate(&context));
        assert!(Condition::starts_with(status, "ROLLBACK").evaluate(&context));
    }

    #[test]
    fn test_route_first_match_wins() {
        let context = ctx(json!({"a": 1, "b": 2}));
        let branches = vec![
            ChoiceBranch::new(Condition::is_present(path("$.missing")), "first"),
            ChoiceBranch::new(Condition::is_present(path("$.a")), "second"),
            ChoiceBranch::new(Condition::is_present(path("$.b")), "third"),
        ];

        assert_eq!(route(&branches, "fallback", &context), "second");
        assert_eq!(route(&branches[..1], "fallback", &context), "fallback");
    }

    #[test]
    fn test_condition_from_yaml() {
        let yaml = r#"
any_of:
  - numeric_equals: { path: $.step.status_code, value: 200 }
  - string_equals: { path: $.step.status_code, value: "null" }
"#;
        let value: serde_json::Value = serde_yaml::from_str(yaml).unwrap();
        let condition: Condition = serde_json::from_value(value).unwrap();
        assert!(condition.evaluate(&ctx(json!({"step": {"status_code": "null"}}))));
        assert!(!condition.evaluate(&ctx(json!({"step": {"status_code": 500}}))));
    }
}
