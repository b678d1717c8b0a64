//! Assertion engine
//!
//! Each key of an action's `Assert` map is checked against the handler's
//! result. Keys with a registered [`AssertionChecker`] use it; every other
//! key is a plain equality check on the same-named result field.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::{Map, Value};

use super::config::Action;
use super::context::{ExecutionState, RunContext};
use super::handlers::value_to_string;
use crate::store::MatchingKeyRegistry;

/// Record field naming the object type of a DataPack record
const SOBJECT_TYPE_FIELD: &str = "VlocityRecordSObjectType";

/// Checks one assertion key
pub trait AssertionChecker: Send + Sync {
    fn check(
        &self,
        run: &RunContext,
        state: &mut ExecutionState,
        action: &Action,
        result: &Value,
        spec: &Map<String, Value>,
    );
}

/// Assertion key -> checker
pub struct AssertionEngine {
    checkers: HashMap<String, Box<dyn AssertionChecker>>,
}

impl AssertionEngine {
    /// Engine with only equality checks
    pub fn empty() -> Self {
        Self {
            checkers: HashMap::new(),
        }
    }

    /// Engine with every built-in checker
    pub fn builtin() -> Self {
        let mut engine = Self::empty();
        engine.register("fields", FieldsChecker);
        engine.register("totalSize", TotalSizeChecker);
        engine.register("matchingKey", MatchingKeyChecker);
        engine
    }

    pub fn register(&mut self, key: &str, checker: impl AssertionChecker + 'static) {
        self.checkers.insert(key.to_string(), Box::new(checker));
    }

    /// Check every expectation of `action` against `result`
    ///
    /// Failures are recorded on `state`; all keys are checked.
    pub fn assert(&self, run: &RunContext, state: &mut ExecutionState, action: &Action, result: &Value) {
        let Some(spec) = &action.assert else {
            return;
        };

        for (key, expected) in spec {
            match self.checkers.get(key) {
                Some(checker) => checker.check(run, state, action, result, spec),
                None => assert_equals(run, state, action, key, result.get(key), expected),
            }
        }
    }
}

impl Default for AssertionEngine {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Equality with numbers compared by value (`1` equals `1.0`)
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

fn assert_true(run: &RunContext, state: &mut ExecutionState, condition: bool, message: String) {
    if !condition {
        tracing::error!("Assert Failed {}", message);
        state.fail(run, message);
    }
}

fn assert_equals(
    run: &RunContext,
    state: &mut ExecutionState,
    action: &Action,
    key: &str,
    actual: Option<&Value>,
    expected: &Value,
) {
    let actual = actual.unwrap_or(&Value::Null);
    if values_equal(actual, expected) {
        return;
    }
    let message = format!(
        "Assert Failed {} {} Actual Result {} Expected Result {}",
        action.display_name(),
        key,
        value_to_string(actual),
        value_to_string(expected)
    );
    tracing::error!("{}", message);
    state.fail(run, message);
}

/// `fields`: every listed field equals its expected value
pub struct FieldsChecker;

impl AssertionChecker for FieldsChecker {
    fn check(&self, run: &RunContext, state: &mut ExecutionState, action: &Action, result: &Value, spec: &Map<String, Value>) {
        let Some(fields) = spec.get("fields").and_then(Value::as_object) else {
            assert_true(run, state, false, format!("{} fields: expected a map of fields", action.display_name()));
            return;
        };
        for (field, expected) in fields {
            assert_equals(run, state, action, field, result.get(field), expected);
        }
    }
}

/// Numeric comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Gt,
    Lt,
    Ge,
    Le,
}

impl Comparator {
    fn parse(token: &str) -> Option<Self> {
        match token {
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            _ => None,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        };
        f.write_str(symbol)
    }
}

/// An expected value like `"5 >"` or `">= 3"`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub comparator: Comparator,
    pub value: f64,
}

impl Comparison {
    /// Parse whitespace separated tokens in any order
    pub fn parse(expression: &str) -> Option<Self> {
        let mut comparator = None;
        let mut value = None;
        for token in expression.split_whitespace() {
            match token.parse::<f64>() {
                Ok(number) => value = Some(number),
                Err(_) => comparator = Some(Comparator::parse(token)?),
            }
        }
        Some(Self {
            comparator: comparator?,
            value: value?,
        })
    }

    /// Whether `actual <comparator> value` holds
    pub fn holds(&self, actual: f64) -> bool {
        match self.comparator {
            Comparator::Gt => actual > self.value,
            Comparator::Lt => actual < self.value,
            Comparator::Ge => actual >= self.value,
            Comparator::Le => actual <= self.value,
        }
    }
}

/// `totalSize`: equality, or a comparison when the expectation is a string
pub struct TotalSizeChecker;

impl AssertionChecker for TotalSizeChecker {
    fn check(&self, run: &RunContext, state: &mut ExecutionState, action: &Action, result: &Value, spec: &Map<String, Value>) {
        let key = "totalSize";
        let actual = result.get(key);
        let expected = spec.get(key).unwrap_or(&Value::Null);

        let Some(expression) = expected.as_str() else {
            assert_equals(run, state, action, key, actual, expected);
            return;
        };

        let Some(comparison) = Comparison::parse(expression) else {
            assert_true(
                run,
                state,
                false,
                format!("{} {} invalid comparison '{}'", action.display_name(), key, expression),
            );
            return;
        };

        let actual_size = actual.and_then(Value::as_f64);
        assert_true(
            run,
            state,
            actual_size.map(|size| comparison.holds(size)).unwrap_or(false),
            format!(
                "{} {} actual value: {} is not {} {}",
                action.display_name(),
                key,
                value_to_string(actual.unwrap_or(&Value::Null)),
                comparison.comparator,
                comparison.value
            ),
        );
    }
}

/// Sub-checks of `matchingKey`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchingKeyCheck {
    NotNull,
    NoDuplicates,
}

impl MatchingKeyCheck {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "NotNull" => Some(Self::NotNull),
            "NoDuplicates" => Some(Self::NoDuplicates),
            _ => None,
        }
    }
}

/// `matchingKey`: identity checks on a DataPack record
pub struct MatchingKeyChecker;

impl AssertionChecker for MatchingKeyChecker {
    fn check(&self, run: &RunContext, state: &mut ExecutionState, action: &Action, result: &Value, spec: &Map<String, Value>) {
        let name = spec.get("matchingKey").and_then(Value::as_str).unwrap_or("");
        let Some(check) = MatchingKeyCheck::parse(name) else {
            tracing::warn!("Unknown matchingKey check '{}' in {}", name, action.display_name());
            return;
        };

        let sobject_type = result.get(SOBJECT_TYPE_FIELD).and_then(Value::as_str).unwrap_or("");
        let Some(key_fields) = run.matching_keys.get(sobject_type) else {
            report_missing_key_field(run, result);
            return;
        };

        match check {
            MatchingKeyCheck::NotNull => {
                let present = key_fields.split(',').all(|field| match result.get(field.trim()) {
                    None | Some(Value::Null) => false,
                    Some(Value::String(s)) => !s.is_empty(),
                    Some(_) => true,
                });
                assert_true(run, state, present, "Value is null.".to_string());
            }
            MatchingKeyCheck::NoDuplicates => {
                let (issues, keyless) = run.with_matching_keys_seen(|seen| {
                    let mut issues = Vec::new();
                    let mut keyless = Vec::new();
                    find_duplicates(&run.matching_keys, result, seen, &mut issues, &mut keyless);
                    (issues, keyless)
                });
                for record in keyless {
                    report_missing_key_field(run, record);
                }
                for issue in issues {
                    assert_true(run, state, false, issue);
                }
            }
        }
    }
}

/// A record type without a matching key definition flags the run but
/// leaves the action passing
fn report_missing_key_field(run: &RunContext, record: &Value) {
    tracing::error!(
        "Matching Key Field Missing: {} with Name: {}",
        record.get(SOBJECT_TYPE_FIELD).and_then(serde_json::Value::as_str).unwrap_or("unknown"),
        value_to_string(record.get("Name").unwrap_or(&serde_json::Value::Null))
    );
    run.flag_error();
}

/// Identity of a record from its matching key field(s)
///
/// Composite keys concatenate their components in field order; a component
/// holding a reference contributes the referenced record's source key.
pub fn composite_key(record: &Value, key_fields: &str) -> String {
    if !key_fields.contains(',') {
        let sobject_type = record.get(SOBJECT_TYPE_FIELD).and_then(Value::as_str).unwrap_or("");
        let value = record.get(key_fields).map(value_to_string).unwrap_or_else(|| "null".to_string());
        return format!("{}{}", sobject_type, value);
    }

    let mut key = String::new();
    for field in key_fields.split(',') {
        match record.get(field.trim()) {
            Some(Value::Object(reference)) => {
                let source_key = reference
                    .get("VlocityMatchingRecordSourceKey")
                    .or_else(|| reference.get("VlocityLookupRecordSourceKey"))
                    .and_then(Value::as_str);
                if let Some(source_key) = source_key {
                    key.push_str(source_key);
                }
            }
            Some(value) if !value.is_null() && value.as_str() != Some("") => {
                key.push_str(&value_to_string(value));
            }
            _ => key.push_str("null"),
        }
    }
    key
}

/// Walk a record and its child records, reporting repeated identities
///
/// Records whose type has no matching key definition are collected in
/// `keyless` and not descended into.
fn find_duplicates<'a>(
    keys: &MatchingKeyRegistry,
    record: &'a Value,
    seen: &mut HashSet<String>,
    issues: &mut Vec<String>,
    keyless: &mut Vec<&'a Value>,
) {
    let sobject_type = record.get(SOBJECT_TYPE_FIELD).and_then(Value::as_str).unwrap_or("");
    let Some(key_fields) = keys.get(sobject_type) else {
        keyless.push(record);
        return;
    };

    let key = composite_key(record, key_fields);
    if key.is_empty() {
        return;
    }
    if !seen.insert(key.clone()) {
        issues.push(format!("Duplicate Found: {}", key));
    }

    let Some(fields) = record.as_object() else {
        return;
    };
    for value in fields.values() {
        let Some(children) = value.as_array() else {
            continue;
        };
        for child in children {
            if child.get(SOBJECT_TYPE_FIELD).is_some() {
                find_duplicates(keys, child, seen, issues, keyless);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake::{fake_run, fake_state, FakeStore};
    use serde_json::json;
    use std::sync::Arc;

    fn action(yaml: &str) -> Action {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn run() -> RunContext {
        fake_run(Arc::new(FakeStore::default())).with_matching_keys(MatchingKeyRegistry::from_map(
            HashMap::from([
                ("Product2".to_string(), "ProductCode".to_string()),
                ("Attribute".to_string(), "Code".to_string()),
                ("Assignment".to_string(), "Product__c,Attribute__c".to_string()),
            ]),
        ))
    }

    #[test]
    fn test_comparison_parsing_is_order_independent() {
        assert_eq!(
            Comparison::parse("5 >"),
            Some(Comparison { comparator: Comparator::Gt, value: 5.0 })
        );
        assert_eq!(
            Comparison::parse(">= 3"),
            Some(Comparison { comparator: Comparator::Ge, value: 3.0 })
        );
        assert_eq!(Comparison::parse("<= 2").unwrap().comparator, Comparator::Le);
        assert_eq!(Comparison::parse("> "), None);
        assert_eq!(Comparison::parse("3"), None);
        assert_eq!(Comparison::parse("~ 3"), None);
    }

    #[test]
    fn test_comparison_holds() {
        assert!(Comparison::parse("1 >").unwrap().holds(2.0));
        assert!(!Comparison::parse("1 >").unwrap().holds(1.0));
        assert!(Comparison::parse("<= 2").unwrap().holds(2.0));
        assert!(!Comparison::parse("<= 2").unwrap().holds(3.0));
        assert!(Comparison::parse("< 2").unwrap().holds(1.0));
    }

    #[test]
    fn test_plain_equality() {
        let run = run();
        let mut state = fake_state();
        let engine = AssertionEngine::builtin();

        engine.assert(&run, &mut state, &action("Action: query\nAssert:\n  done: true"), &json!({"done": true}));
        assert!(!state.action_failed);

        engine.assert(&run, &mut state, &action("Action: query\nAssert:\n  Name: Phone"), &json!({"Name": "Tablet"}));
        assert!(state.action_failed);
        assert_eq!(
            state.action_message,
            "Assert Failed query Name Actual Result Tablet Expected Result Phone"
        );
        assert!(run.error_happened());
    }

    #[test]
    fn test_total_size() {
        let engine = AssertionEngine::builtin();
        let result = json!({"totalSize": 2});

        for (spec, passes) in [("1 >", true), ("> 2", false), (">= 2", true), ("<= 1", false), ("2", false)] {
            let run = run();
            let mut state = fake_state();
            let action = Action {
                assert: Some(Map::from_iter([("totalSize".to_string(), json!(spec))])),
                ..Action::named("query")
            };
            engine.assert(&run, &mut state, &action, &result);
            assert_eq!(!state.action_failed, passes, "{}", spec);
        }

        let run = run();
        let mut state = fake_state();
        engine.assert(&run, &mut state, &action("Action: query\nAssert:\n  totalSize: 2.0"), &result);
        assert!(!state.action_failed);
    }

    #[test]
    fn test_fields() {
        let run = run();
        let mut state = fake_state();
        let engine = AssertionEngine::builtin();
        let result = json!({"Name": "Phone", "IsActive": true});

        engine.assert(
            &run,
            &mut state,
            &action("Action: createSObject\nAssert:\n  fields:\n    Name: Phone\n    IsActive: true"),
            &result,
        );
        assert!(!state.action_failed);

        engine.assert(
            &run,
            &mut state,
            &action("Action: createSObject\nAssert:\n  fields:\n    IsActive: false"),
            &result,
        );
        assert!(state.action_failed);
        assert!(state.action_message.contains("IsActive"));
    }

    #[test]
    fn test_matching_key_not_null() {
        let engine = AssertionEngine::builtin();
        let spec = action("Action: validateDataPackFields\nAssert:\n  matchingKey: NotNull");

        let run = run();
        let mut state = fake_state();
        engine.assert(&run, &mut state, &spec, &json!({"VlocityRecordSObjectType": "Product2", "ProductCode": "P1"}));
        assert!(!state.action_failed);

        engine.assert(&run, &mut state, &spec, &json!({"VlocityRecordSObjectType": "Product2", "ProductCode": ""}));
        assert!(state.action_failed);
        assert_eq!(state.action_message, "Value is null.");
    }

    #[test]
    fn test_missing_matching_key_field() {
        let run = run();
        let mut state = fake_state();
        AssertionEngine::builtin().assert(
            &run,
            &mut state,
            &action("Action: validateDataPackFields\nAssert:\n  matchingKey: NoDuplicates"),
            &json!({"VlocityRecordSObjectType": "Unknown", "Name": "x"}),
        );
        assert!(!state.action_failed);
        assert!(run.error_happened());

        let not_null_run = self::run();
        let mut state = fake_state();
        AssertionEngine::builtin().assert(
            &not_null_run,
            &mut state,
            &action("Action: validateDataPackFields\nAssert:\n  matchingKey: NotNull"),
            &json!({"VlocityRecordSObjectType": "Pricing", "Name": "x"}),
        );
        assert!(!state.action_failed);
        assert!(not_null_run.error_happened());
    }

    #[test]
    fn test_keyless_child_is_skipped_and_siblings_still_checked() {
        let spec = action("Action: validateDataPackFields\nAssert:\n  matchingKey: NoDuplicates");
        let record = |code: &str| {
            json!({
                "VlocityRecordSObjectType": "Product2",
                "ProductCode": "P1",
                "Children": [
                    {"VlocityRecordSObjectType": "NoKeyChild", "Name": "c"},
                    {"VlocityRecordSObjectType": "Attribute", "Code": "COLOR"},
                    {"VlocityRecordSObjectType": "Attribute", "Code": code}
                ]
            })
        };

        let distinct = run();
        let mut state = fake_state();
        AssertionEngine::builtin().assert(&distinct, &mut state, &spec, &record("SIZE"));
        assert!(!state.action_failed);
        assert!(distinct.error_happened());

        let repeated = run();
        let mut state = fake_state();
        AssertionEngine::builtin().assert(&repeated, &mut state, &spec, &record("COLOR"));
        assert!(state.action_failed);
        assert_eq!(state.action_message, "Duplicate Found: AttributeCOLOR");
    }

    #[test]
    fn test_sibling_duplicates_fail_and_set_is_cleared() {
        let run = run();
        let mut state = fake_state();
        let record = json!({
            "VlocityRecordSObjectType": "Product2",
            "ProductCode": "P1",
            "Attributes": [
                {"VlocityRecordSObjectType": "Attribute", "Code": "COLOR"},
                {"VlocityRecordSObjectType": "Attribute", "Code": "COLOR"}
            ]
        });

        AssertionEngine::builtin().assert(
            &run,
            &mut state,
            &action("Action: validateDataPackFields\nAssert:\n  matchingKey: NoDuplicates"),
            &record,
        );

        assert!(state.action_failed);
        assert_eq!(state.action_message, "Duplicate Found: AttributeCOLOR");
        assert!(run.with_matching_keys_seen(|seen| seen.is_empty()));
    }

    #[test]
    fn test_distinct_children_pass() {
        let run = run();
        let mut state = fake_state();
        let record = json!({
            "VlocityRecordSObjectType": "Product2",
            "ProductCode": "P1",
            "Attributes": [
                {"VlocityRecordSObjectType": "Attribute", "Code": "COLOR"},
                {"VlocityRecordSObjectType": "Attribute", "Code": "SIZE"}
            ],
            "Tags": ["a", "a"]
        });

        let spec = action("Action: validateDataPackFields\nAssert:\n  matchingKey: NoDuplicates");
        AssertionEngine::builtin().assert(&run, &mut state, &spec, &record);
        assert!(!state.action_failed);

        // A second check of the same record starts from an empty set
        AssertionEngine::builtin().assert(&run, &mut state, &spec, &record);
        assert!(!state.action_failed);
    }

    #[test]
    fn test_composite_key() {
        let record = json!({
            "VlocityRecordSObjectType": "Assignment",
            "Product__c": {"VlocityMatchingRecordSourceKey": "Product2/P1"},
            "Attribute__c": {"VlocityLookupRecordSourceKey": "Attribute/COLOR"}
        });
        assert_eq!(composite_key(&record, "Product__c,Attribute__c"), "Product2/P1Attribute/COLOR");

        let partial = json!({"Product__c": "P1"});
        assert_eq!(composite_key(&partial, "Product__c,Attribute__c"), "P1null");

        let single = json!({"VlocityRecordSObjectType": "Attribute", "Code": "COLOR"});
        assert_eq!(composite_key(&single, "Code"), "AttributeCOLOR");
    }

    #[test]
    fn test_unknown_key_without_checker_uses_equality() {
        let run = run();
        let mut state = fake_state();
        AssertionEngine::empty().assert(
            &run,
            &mut state,
            &action("Action: query\nAssert:\n  totalSize: \"1 >\""),
            &json!({"totalSize": 2}),
        );
        assert!(state.action_failed);
    }
}
