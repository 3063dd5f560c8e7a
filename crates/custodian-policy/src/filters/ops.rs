//! Comparison operators and value type coercions
//!
//! Resolution distinguishes a missing key ([`Operand::Absent`]) from a key
//! holding `null`, `false` or `0`. Only the presence operators and the
//! negative operators (`ne`, `not-in`) succeed on a missing key; every other
//! operator fails closed.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::Value;

use crate::time::parse_date;

/// One side of a comparison after resolution and coercion
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The key path did not resolve
    Absent,
    Json(Value),
    Time(DateTime<Utc>),
}

impl Operand {
    pub fn from_resolved(value: Option<&Value>) -> Self {
        match value {
            Some(v) => Operand::Json(v.clone()),
            None => Operand::Absent,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Operand::Absent)
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Operand::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Comparison operator of a value filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Glob,
    Regex,
    RegexCase,
    In,
    NotIn,
    Contains,
    Difference,
    Intersect,
    Absent,
    Present,
    NotNull,
    Empty,
    NotEmpty,
}

impl Operator {
    /// Every accepted spelling, aliases included
    pub const NAMES: &'static [&'static str] = &[
        "eq",
        "equal",
        "==",
        "ne",
        "not-equal",
        "!=",
        "gt",
        "greater-than",
        ">",
        "ge",
        "gte",
        ">=",
        "lt",
        "less-than",
        "<",
        "le",
        "lte",
        "<=",
        "glob",
        "regex",
        "regex-case",
        "in",
        "ni",
        "not-in",
        "contains",
        "difference",
        "intersect",
        "absent",
        "present",
        "not-null",
        "empty",
        "not-empty",
    ];

    /// Parse an operator name or alias
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "eq" | "equal" | "==" => Operator::Eq,
            "ne" | "not-equal" | "!=" => Operator::Ne,
            "gt" | "greater-than" | ">" => Operator::Gt,
            "ge" | "gte" | ">=" => Operator::Ge,
            "lt" | "less-than" | "<" => Operator::Lt,
            "le" | "lte" | "<=" => Operator::Le,
            "glob" => Operator::Glob,
            "regex" => Operator::Regex,
            "regex-case" => Operator::RegexCase,
            "in" => Operator::In,
            "ni" | "not-in" => Operator::NotIn,
            "contains" => Operator::Contains,
            "difference" => Operator::Difference,
            "intersect" => Operator::Intersect,
            "absent" => Operator::Absent,
            "present" => Operator::Present,
            "not-null" => Operator::NotNull,
            "empty" => Operator::Empty,
            "not-empty" => Operator::NotEmpty,
            _ => return None,
        };
        Some(op)
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Glob => "glob",
            Operator::Regex => "regex",
            Operator::RegexCase => "regex-case",
            Operator::In => "in",
            Operator::NotIn => "not-in",
            Operator::Contains => "contains",
            Operator::Difference => "difference",
            Operator::Intersect => "intersect",
            Operator::Absent => "absent",
            Operator::Present => "present",
            Operator::NotNull => "not-null",
            Operator::Empty => "empty",
            Operator::NotEmpty => "not-empty",
        }
    }

    /// Presence operators test the resource side only and take no value
    pub fn is_presence(&self) -> bool {
        matches!(
            self,
            Operator::Absent
                | Operator::Present
                | Operator::NotNull
                | Operator::Empty
                | Operator::NotEmpty
        )
    }

    /// Operators whose value must be a list
    pub fn takes_list(&self) -> bool {
        matches!(
            self,
            Operator::In | Operator::NotIn | Operator::Difference | Operator::Intersect
        )
    }

    /// Operators whose value is a pattern
    pub fn takes_pattern(&self) -> bool {
        matches!(self, Operator::Glob | Operator::Regex | Operator::RegexCase)
    }

    /// Build a pattern matcher for `pattern`
    pub fn compile(&self, pattern: &str) -> Result<Matcher, String> {
        match self {
            Operator::Glob => glob::Pattern::new(pattern)
                .map(Matcher::Glob)
                .map_err(|e| e.to_string()),
            Operator::Regex | Operator::RegexCase => {
                regex::RegexBuilder::new(&format!("^(?:{})", pattern))
                    .case_insensitive(*self == Operator::Regex)
                    .build()
                    .map(Matcher::Regex)
                    .map_err(|e| e.to_string())
            }
            _ => Err(format!("{} does not take a pattern", self.name())),
        }
    }

    /// Apply the operator, resource side on the left
    ///
    /// `matcher` is the precompiled pattern for glob and regex operators;
    /// without one the right operand is compiled on the spot.
    pub fn apply(&self, left: &Operand, right: &Operand, matcher: Option<&Matcher>) -> bool {
        match self {
            Operator::Absent => return left.is_absent(),
            Operator::Present => return !left.is_absent(),
            Operator::NotNull => {
                return match left {
                    Operand::Absent | Operand::Json(Value::Null) => false,
                    _ => true,
                }
            }
            Operator::Empty => return is_empty(left),
            Operator::NotEmpty => return !is_empty(left),
            Operator::Ne => return !operand_eq(left, right),
            Operator::NotIn => return !list_contains(right, left),
            _ => {}
        }
        if left.is_absent() {
            return false;
        }

        match self {
            Operator::Eq => operand_eq(left, right),
            Operator::Gt => compare(left, right) == Some(Ordering::Greater),
            Operator::Ge => matches!(
                compare(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => compare(left, right) == Some(Ordering::Less),
            Operator::Le => matches!(compare(left, right), Some(Ordering::Less | Ordering::Equal)),
            Operator::Glob | Operator::Regex | Operator::RegexCase => {
                let Some(subject) = left.as_str() else {
                    return false;
                };
                match matcher {
                    Some(m) => m.is_match(subject),
                    None => right
                        .as_str()
                        .and_then(|p| self.compile(p).ok())
                        .is_some_and(|m| m.is_match(subject)),
                }
            }
            Operator::In => list_contains(right, left),
            Operator::Contains => list_contains(left, right),
            Operator::Intersect => match (left, right) {
                (Operand::Json(Value::Array(a)), Operand::Json(Value::Array(b))) => {
                    a.iter().any(|x| b.iter().any(|y| json_eq(x, y)))
                }
                _ => false,
            },
            Operator::Difference => match (left, right) {
                (Operand::Json(Value::Array(a)), Operand::Json(Value::Array(b))) => {
                    a.iter().any(|x| !b.iter().any(|y| json_eq(x, y)))
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Precompiled glob or regex pattern
#[derive(Debug, Clone)]
pub enum Matcher {
    Glob(glob::Pattern),
    Regex(Regex),
}

impl Matcher {
    pub fn is_match(&self, subject: &str) -> bool {
        match self {
            Matcher::Glob(p) => p.matches(subject),
            Matcher::Regex(r) => r.is_match(subject),
        }
    }
}

fn is_empty(operand: &Operand) -> bool {
    match operand {
        Operand::Absent => true,
        Operand::Json(Value::Null) => true,
        Operand::Json(Value::String(s)) => s.is_empty(),
        Operand::Json(Value::Array(a)) => a.is_empty(),
        Operand::Json(Value::Object(o)) => o.is_empty(),
        _ => false,
    }
}

/// Equality where `1` and `1.0` are the same number
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_eq(a, b))
        }
        _ => a == b,
    }
}

fn operand_eq(left: &Operand, right: &Operand) -> bool {
    match (left, right) {
        (Operand::Json(a), Operand::Json(b)) => json_eq(a, b),
        (Operand::Time(a), Operand::Time(b)) => a == b,
        _ => false,
    }
}

/// Order two operands of the same kind; mixed kinds are incomparable
fn compare(left: &Operand, right: &Operand) -> Option<Ordering> {
    match (left, right) {
        (Operand::Json(Value::Number(a)), Operand::Json(Value::Number(b))) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Operand::Json(Value::String(a)), Operand::Json(Value::String(b))) => Some(a.cmp(b)),
        (Operand::Time(a), Operand::Time(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Membership of `needle` in `haystack` (list element or substring)
fn list_contains(haystack: &Operand, needle: &Operand) -> bool {
    match (haystack, needle) {
        (Operand::Json(Value::Array(items)), Operand::Json(n)) => {
            items.iter().any(|item| json_eq(item, n))
        }
        (Operand::Json(Value::String(h)), Operand::Json(Value::String(n))) => h.contains(n.as_str()),
        _ => false,
    }
}

/// Coercion applied to both sides before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Trim and lowercase the resource value
    Normalize,
    /// Parse the resource value as an integer
    Integer,
    /// Compare the length of the resource value
    Size,
    /// Swap the sides
    Swap,
    /// Resource value is a date; value is a number of days in the past
    Age,
    /// Resource value is a date; value is a number of days in the future
    Expiration,
    /// Both sides are dates
    Date,
}

impl ValueType {
    pub const NAMES: &'static [&'static str] = &[
        "normalize",
        "integer",
        "size",
        "swap",
        "age",
        "expiration",
        "date",
    ];

    pub fn parse(name: &str) -> Option<Self> {
        let vt = match name {
            "normalize" => ValueType::Normalize,
            "integer" => ValueType::Integer,
            "size" => ValueType::Size,
            "swap" => ValueType::Swap,
            "age" => ValueType::Age,
            "expiration" => ValueType::Expiration,
            "date" => ValueType::Date,
            _ => return None,
        };
        Some(vt)
    }

    /// Whether the filter value must be a number of days
    pub fn takes_days(&self) -> bool {
        matches!(self, ValueType::Age | ValueType::Expiration)
    }

    /// Coerce `(resource, value)` into the pair handed to the operator
    ///
    /// A missing resource value stays missing. A value that cannot be
    /// coerced becomes incomparable, so ordering operators fail.
    pub fn coerce(&self, left: Operand, right: Operand, now: DateTime<Utc>) -> (Operand, Operand) {
        match self {
            ValueType::Normalize => (map_json(left, normalize), right),
            ValueType::Integer => (map_json(left, integer), right),
            ValueType::Size => (map_json(left, size), right),
            ValueType::Swap => (right, left),
            ValueType::Age => {
                // gt means older than N days: compare the cutoff against the date
                let cutoff = days_from(now, &right, -1);
                (cutoff, to_time(left))
            }
            ValueType::Expiration => {
                let cutoff = days_from(now, &right, 1);
                (to_time(left), cutoff)
            }
            ValueType::Date => (to_time(left), to_time(right)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Normalize => "normalize",
            ValueType::Integer => "integer",
            ValueType::Size => "size",
            ValueType::Swap => "swap",
            ValueType::Age => "age",
            ValueType::Expiration => "expiration",
            ValueType::Date => "date",
        };
        f.write_str(name)
    }
}

fn map_json(operand: Operand, f: fn(Value) -> Value) -> Operand {
    match operand {
        Operand::Json(v) => Operand::Json(f(v)),
        other => other,
    }
}

fn normalize(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_lowercase()),
        other => other,
    }
}

fn integer(value: Value) -> Value {
    let parsed = match &value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    Value::from(parsed.unwrap_or(0))
}

fn size(value: Value) -> Value {
    let len = match &value {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        _ => 0,
    };
    Value::from(len)
}

fn to_time(operand: Operand) -> Operand {
    match operand {
        Operand::Json(v) => match parse_date(&v) {
            Some(t) => Operand::Time(t),
            None => Operand::Json(Value::Null),
        },
        other => other,
    }
}

fn days_from(now: DateTime<Utc>, days: &Operand, sign: i64) -> Operand {
    let days = match days {
        Operand::Json(v) => v.as_f64(),
        _ => None,
    };
    match days {
        Some(days) => {
            let seconds = (days * 86_400.0) as i64;
            Operand::Time(now + Duration::seconds(sign * seconds))
        }
        None => Operand::Json(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn j(v: Value) -> Operand {
        Operand::Json(v)
    }

    #[test]
    fn test_aliases_parse_to_same_operator() {
        for (alias, op) in [
            ("equal", Operator::Eq),
            ("==", Operator::Eq),
            ("not-equal", Operator::Ne),
            ("greater-than", Operator::Gt),
            ("gte", Operator::Ge),
            ("less-than", Operator::Lt),
            ("lte", Operator::Le),
            ("ni", Operator::NotIn),
        ] {
            assert_eq!(Operator::parse(alias), Some(op), "{}", alias);
        }
        assert!(Operator::NAMES.iter().all(|n| Operator::parse(n).is_some()));
        assert_eq!(Operator::parse("approximately"), None);
    }

    #[test]
    fn test_absent_fails_closed() {
        let absent = Operand::Absent;
        assert!(!Operator::Eq.apply(&absent, &j(json!(null)), None));
        assert!(!Operator::Gt.apply(&absent, &j(json!(0)), None));
        assert!(!Operator::In.apply(&absent, &j(json!(["a"])), None));
        assert!(!Operator::Regex.apply(&absent, &j(json!(".*")), None));
        assert!(Operator::Ne.apply(&absent, &j(json!("a")), None));
        assert!(Operator::NotIn.apply(&absent, &j(json!(["a"])), None));
    }

    #[test]
    fn test_presence_operators() {
        assert!(Operator::Absent.apply(&Operand::Absent, &Operand::Absent, None));
        assert!(!Operator::Absent.apply(&j(json!(null)), &Operand::Absent, None));
        assert!(Operator::Present.apply(&j(json!(false)), &Operand::Absent, None));
        assert!(!Operator::NotNull.apply(&j(json!(null)), &Operand::Absent, None));
        assert!(Operator::NotNull.apply(&j(json!(0)), &Operand::Absent, None));

        for empty in [json!(null), json!(""), json!([]), json!({})] {
            assert!(Operator::Empty.apply(&j(empty), &Operand::Absent, None));
        }
        assert!(Operator::Empty.apply(&Operand::Absent, &Operand::Absent, None));
        assert!(!Operator::Empty.apply(&j(json!(0)), &Operand::Absent, None));
        assert!(Operator::NotEmpty.apply(&j(json!(["x"])), &Operand::Absent, None));
    }

    #[test]
    fn test_null_is_not_absent() {
        assert!(Operator::Eq.apply(&j(json!(null)), &j(json!(null)), None));
        assert!(Operator::Eq.apply(&j(json!(false)), &j(json!(false)), None));
        assert!(!Operator::Eq.apply(&j(json!(0)), &j(json!(false)), None));
    }

    #[test]
    fn test_ordering() {
        assert!(Operator::Gt.apply(&j(json!(5)), &j(json!(3.5)), None));
        assert!(Operator::Le.apply(&j(json!(3)), &j(json!(3.0)), None));
        assert!(Operator::Lt.apply(&j(json!("a")), &j(json!("b")), None));
        // mixed kinds are incomparable
        assert!(!Operator::Gt.apply(&j(json!("5")), &j(json!(3)), None));
        assert!(!Operator::Lt.apply(&j(json!("5")), &j(json!(3)), None));
    }

    #[test]
    fn test_patterns() {
        assert!(Operator::Glob.apply(&j(json!("prod-web-1")), &j(json!("prod-*")), None));
        assert!(!Operator::Glob.apply(&j(json!("dev-web-1")), &j(json!("prod-*")), None));
        assert!(Operator::Regex.apply(&j(json!("PROD-1")), &j(json!("prod-\\d")), None));
        assert!(!Operator::RegexCase.apply(&j(json!("PROD-1")), &j(json!("prod-\\d")), None));
        // anchored at the start only
        assert!(Operator::Regex.apply(&j(json!("prod-1-old")), &j(json!("prod")), None));
        assert!(!Operator::Regex.apply(&j(json!("old-prod")), &j(json!("prod")), None));
        assert!(!Operator::Regex.apply(&j(json!(12)), &j(json!("1")), None));

        let matcher = Operator::Regex.compile("web").unwrap();
        assert!(Operator::Regex.apply(&j(json!("web-1")), &Operand::Absent, Some(&matcher)));
    }

    #[test]
    fn test_collections() {
        let tags = j(json!(["a", "b"]));
        assert!(Operator::In.apply(&j(json!("a")), &tags, None));
        assert!(Operator::NotIn.apply(&j(json!("c")), &tags, None));
        assert!(Operator::Contains.apply(&tags, &j(json!("b")), None));
        assert!(Operator::Intersect.apply(&tags, &j(json!(["b", "z"])), None));
        assert!(!Operator::Intersect.apply(&tags, &j(json!(["z"])), None));
        assert!(Operator::Difference.apply(&tags, &j(json!(["a"])), None));
        assert!(!Operator::Difference.apply(&tags, &j(json!(["a", "b", "c"])), None));
        assert!(Operator::In.apply(&j(json!(2)), &j(json!([1.0, 2.0])), None));
    }

    #[test]
    fn test_value_type_coercions() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let (l, r) = ValueType::Normalize.coerce(j(json!("  RUNNING ")), j(json!("running")), now);
        assert!(Operator::Eq.apply(&l, &r, None));

        let (l, r) = ValueType::Integer.coerce(j(json!("42")), j(json!(40)), now);
        assert!(Operator::Gt.apply(&l, &r, None));

        let (l, r) = ValueType::Size.coerce(j(json!([1, 2, 3])), j(json!(3)), now);
        assert!(Operator::Eq.apply(&l, &r, None));

        let (l, r) = ValueType::Swap.coerce(j(json!(1)), j(json!(2)), now);
        assert!(Operator::Gt.apply(&l, &r, None));

        let (l, r) = ValueType::Integer.coerce(Operand::Absent, j(json!(1)), now);
        assert!(l.is_absent());
        assert!(!Operator::Eq.apply(&l, &r, None));
    }

    #[test]
    fn test_age_and_expiration() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let old = j(json!("2024-05-01T00:00:00Z"));
        let recent = j(json!("2024-05-30T00:00:00Z"));

        // older than 7 days
        let (l, r) = ValueType::Age.coerce(old.clone(), j(json!(7)), now);
        assert!(Operator::Gt.apply(&l, &r, None));
        let (l, r) = ValueType::Age.coerce(recent, j(json!(7)), now);
        assert!(!Operator::Gt.apply(&l, &r, None));

        // expires within 30 days
        let (l, r) = ValueType::Expiration.coerce(j(json!("2024-06-10")), j(json!(30)), now);
        assert!(Operator::Lt.apply(&l, &r, None));

        // unparseable dates never compare
        let (l, r) = ValueType::Age.coerce(j(json!("someday")), j(json!(7)), now);
        assert!(!Operator::Gt.apply(&l, &r, None));
        assert!(!Operator::Lt.apply(&l, &r, None));
    }
}
