use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator for a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    /// Substring match on strings, element match on arrays.
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    /// Membership in the set given as `value` (a JSON array).
    In,
    NotIn,
}

/// How a condition joins the result accumulated from the conditions before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

/// A single comparison against a dot-path into the run context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Dot-separated path into the context (e.g. `"policy.status"`).
    pub field: String,
    pub operator: ConditionOperator,
    /// Right-hand operand. Must be an array for `in` / `not_in`.
    #[serde(default)]
    pub value: Value,
    /// Ignored on the first condition of a list.
    #[serde(default)]
    pub combine_with: Combinator,
}

impl Condition {
    /// Create a condition joined with AND.
    #[must_use]
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            combine_with: Combinator::And,
        }
    }

    /// Switch this condition to OR-combination with its predecessors.
    #[must_use]
    pub fn or(mut self) -> Self {
        self.combine_with = Combinator::Or;
        self
    }

    /// Evaluate this condition alone against `context`.
    ///
    /// A field that is absent from the context never matches, whatever the
    /// operator.
    #[must_use]
    pub fn matches(&self, context: &Value) -> bool {
        let Some(actual) = resolve_path(context, &self.field) else {
            return false;
        };
        match self.operator {
            ConditionOperator::Equals => values_equal(actual, &self.value),
            ConditionOperator::NotEquals => !values_equal(actual, &self.value),
            ConditionOperator::Contains => contains(actual, &self.value).unwrap_or(false),
            ConditionOperator::NotContains => contains(actual, &self.value).is_some_and(|c| !c),
            ConditionOperator::GreaterThan => {
                compare_numbers(actual, &self.value).is_some_and(|o| o.is_gt())
            }
            ConditionOperator::LessThan => {
                compare_numbers(actual, &self.value).is_some_and(|o| o.is_lt())
            }
            ConditionOperator::In => member_of(actual, &self.value).unwrap_or(false),
            ConditionOperator::NotIn => member_of(actual, &self.value).is_some_and(|m| !m),
        }
    }
}

/// Fold a condition list left to right.
///
/// An empty list is no gate and evaluates to `true`. There is no operator
/// precedence: `a OR b AND c` is `(a OR b) AND c`.
#[must_use]
pub fn evaluate(conditions: &[Condition], context: &Value) -> bool {
    let Some((first, rest)) = conditions.split_first() else {
        return true;
    };
    rest.iter().fold(first.matches(context), |acc, next| {
        match next.combine_with {
            Combinator::And => acc && next.matches(context),
            Combinator::Or => acc || next.matches(context),
        }
    })
}

/// Resolve a dotted path against a JSON value.
///
/// Returns `None` when any segment is missing. Numeric segments index into
/// arrays.
#[must_use]
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// JSON equality, except that numbers compare by value (`15` equals `15.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    as_number(a)?.partial_cmp(&as_number(b)?)
}

/// `None` when the operands are not a string/string or array/any pair.
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => Some(h.contains(n.as_str())),
        (Value::Array(items), n) => Some(items.iter().any(|item| values_equal(item, n))),
        _ => None,
    }
}

/// `None` when `set` is not an array.
fn member_of(item: &Value, set: &Value) -> Option<bool> {
    match set {
        Value::Array(items) => Some(items.iter().any(|candidate| values_equal(item, candidate))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx() -> Value {
        json!({
            "new_phase": "Application Review",
            "days_until_expiration": 15,
            "policy": { "status": "active", "premium": "1200.50", "tags": ["term", "life"] },
            "attempts": [1, 2, 3],
            "empty": null
        })
    }

    #[test]
    fn empty_list_is_true() {
        assert!(evaluate(&[], &ctx()));
    }

    #[test]
    fn equals_on_nested_path() {
        let c = Condition::new("policy.status", ConditionOperator::Equals, json!("active"));
        assert!(c.matches(&ctx()));
        let c = Condition::new("policy.status", ConditionOperator::NotEquals, json!("active"));
        assert!(!c.matches(&ctx()));
    }

    #[test]
    fn numbers_compare_by_value() {
        let c = Condition::new("days_until_expiration", ConditionOperator::Equals, json!(15.0));
        assert!(c.matches(&ctx()));
    }

    #[test]
    fn missing_field_never_matches() {
        for op in [
            ConditionOperator::Equals,
            ConditionOperator::NotEquals,
            ConditionOperator::Contains,
            ConditionOperator::NotContains,
            ConditionOperator::GreaterThan,
            ConditionOperator::LessThan,
            ConditionOperator::In,
            ConditionOperator::NotIn,
        ] {
            let c = Condition::new("policy.missing", op, json!(["x"]));
            assert!(!c.matches(&ctx()), "{op:?} matched a missing field");
        }
    }

    #[test]
    fn explicit_null_is_present() {
        let c = Condition::new("empty", ConditionOperator::Equals, Value::Null);
        assert!(c.matches(&ctx()));
    }

    #[test]
    fn contains_on_strings_and_arrays() {
        let c = Condition::new("new_phase", ConditionOperator::Contains, json!("Review"));
        assert!(c.matches(&ctx()));
        let c = Condition::new("policy.tags", ConditionOperator::Contains, json!("life"));
        assert!(c.matches(&ctx()));
        let c = Condition::new("policy.tags", ConditionOperator::NotContains, json!("whole"));
        assert!(c.matches(&ctx()));
        let c = Condition::new("days_until_expiration", ConditionOperator::NotContains, json!("1"));
        assert!(!c.matches(&ctx()), "type mismatch is not a match");
    }

    #[test]
    fn ordering_coerces_numeric_strings() {
        let c = Condition::new("policy.premium", ConditionOperator::GreaterThan, json!(1000));
        assert!(c.matches(&ctx()));
        let c = Condition::new("policy.premium", ConditionOperator::LessThan, json!("1000"));
        assert!(!c.matches(&ctx()));
        let c = Condition::new("policy.status", ConditionOperator::GreaterThan, json!(1));
        assert!(!c.matches(&ctx()));
    }

    #[test]
    fn in_requires_a_set() {
        let c = Condition::new(
            "days_until_expiration",
            ConditionOperator::In,
            json!([30, 15, 7, 1]),
        );
        assert!(c.matches(&ctx()));
        let c = Condition::new("days_until_expiration", ConditionOperator::NotIn, json!([30, 7]));
        assert!(c.matches(&ctx()));
        let c = Condition::new("days_until_expiration", ConditionOperator::In, json!(15));
        assert!(!c.matches(&ctx()));
        let c = Condition::new("days_until_expiration", ConditionOperator::NotIn, json!(15));
        assert!(!c.matches(&ctx()));
    }

    #[test]
    fn array_index_segments() {
        let c = Condition::new("attempts.2", ConditionOperator::Equals, json!(3));
        assert!(c.matches(&ctx()));
    }

    #[test]
    fn folds_left_to_right_without_precedence() {
        let f = Condition::new("policy.status", ConditionOperator::Equals, json!("lapsed"));
        let t = Condition::new("policy.status", ConditionOperator::Equals, json!("active"));

        // (true OR false) AND false == false; precedence would give true.
        let list = vec![t.clone(), f.clone().or(), f.clone()];
        assert!(!evaluate(&list, &ctx()));

        // (false AND true) OR true == true
        let list = vec![f.clone(), t.clone(), t.clone().or()];
        assert!(evaluate(&list, &ctx()));

        // combine_with on the first entry is ignored
        assert!(evaluate(&[t.or()], &ctx()));
        assert!(!evaluate(&[f], &ctx()));
    }

    #[test]
    fn deserializes_camel_case() {
        let c: Condition = serde_json::from_value(json!({
            "field": "policy.status",
            "operator": "not_in",
            "value": ["lapsed", "cancelled"],
            "combineWith": "or"
        }))
        .unwrap();
        assert_eq!(c.operator, ConditionOperator::NotIn);
        assert_eq!(c.combine_with, Combinator::Or);
    }
}
