use std::cmp::Ordering;
use std::fmt;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

lazy_static! {
    static ref VERSION_NUMERIC_COMPONENTS_REGEX: Regex =
        Regex::new(r"^\d+(\.\d+)?(\.\d+)?").unwrap();
}

/// A scalar configuration value: a condition operand, a parameter value or a remote config value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HackleValue {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
}

/// The declared type of a [HackleValue] or of a condition's operands.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    String,
    Number,
    #[serde(rename = "BOOLEAN")]
    Bool,
    Version,
    Json,
    Null,
    #[serde(other)]
    Unknown,
}

impl From<&str> for HackleValue {
    fn from(s: &str) -> Self {
        HackleValue::String(s.to_owned())
    }
}

impl From<String> for HackleValue {
    fn from(s: String) -> Self {
        HackleValue::String(s)
    }
}

impl From<f64> for HackleValue {
    fn from(f: f64) -> Self {
        HackleValue::Number(f)
    }
}

impl From<i32> for HackleValue {
    fn from(i: i32) -> Self {
        HackleValue::Number(i as f64)
    }
}

impl From<i64> for HackleValue {
    fn from(i: i64) -> Self {
        HackleValue::Number(i as f64)
    }
}

impl From<bool> for HackleValue {
    fn from(b: bool) -> Self {
        HackleValue::Bool(b)
    }
}

impl From<&Value> for HackleValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::String(s) => HackleValue::String(s.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) => HackleValue::Number(f),
                None => {
                    warn!("could not interpret '{:?}' as f64", n);
                    HackleValue::String(n.to_string())
                }
            },
            Value::Bool(b) => HackleValue::Bool(*b),
            Value::Null | Value::Array(_) | Value::Object(_) => HackleValue::Null,
        }
    }
}

impl HackleValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            HackleValue::String(_) => ValueType::String,
            HackleValue::Number(_) => ValueType::Number,
            HackleValue::Bool(_) => ValueType::Bool,
            HackleValue::Null => ValueType::Null,
        }
    }

    /// Returns None unless self is a String. It will not convert.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HackleValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Strings as-is, numbers in their shortest decimal form.
    pub fn to_string_value(&self) -> Option<String> {
        match self {
            HackleValue::String(s) => Some(s.clone()),
            HackleValue::Number(f) => Some(format_number(*f)),
            _ => None,
        }
    }

    /// Numbers as-is, strings parsed as decimal numbers.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            HackleValue::Number(f) => Some(*f),
            HackleValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Booleans as-is, and the strings `"true"` / `"false"`.
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            HackleValue::Bool(b) => Some(*b),
            HackleValue::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            HackleValue::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    pub fn to_version(&self) -> Option<Version> {
        Version::parse(self.as_str()?)
    }
}

fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

/// A semantic version whose minor and patch components may be omitted (`"1"` is `1.0.0`).
///
/// Build metadata is dropped on parse and never participates in comparison.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Version(semver::Version);

impl Version {
    pub fn parse(version_str: &str) -> Option<Version> {
        semver::Version::parse(version_str)
            .ok()
            .or_else(|| Self::parse_loose(version_str))
            .map(|mut version| {
                version.build = semver::BuildMetadata::EMPTY;
                Version(version)
            })
    }

    fn parse_loose(version_str: &str) -> Option<semver::Version> {
        let parts = VERSION_NUMERIC_COMPONENTS_REGEX.captures(version_str)?;
        let numeric_parts = parts.get(0)?;
        let mut transformed = numeric_parts.as_str().to_string();

        for i in 1..parts.len() {
            if parts.get(i).is_none() {
                transformed.push_str(".0");
            }
        }

        transformed.push_str(&version_str[numeric_parts.end()..]);
        semver::Version::parse(&transformed).ok()
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn deserializes_untagged_values() {
        let values: Vec<HackleValue> =
            serde_json::from_str(r#"["a", 1, 1.5, true, null]"#).unwrap();
        assert_that!(values).is_equal_to(vec![
            HackleValue::from("a"),
            HackleValue::Number(1.0),
            HackleValue::Number(1.5),
            HackleValue::Bool(true),
            HackleValue::Null,
        ]);
    }

    #[test_case("\"STRING\"", ValueType::String)]
    #[test_case("\"BOOLEAN\"", ValueType::Bool)]
    #[test_case("\"JSON\"", ValueType::Json)]
    #[test_case("\"VERSION\"", ValueType::Version)]
    #[test_case("\"DATETIME\"", ValueType::Unknown)]
    fn deserializes_value_types(json: &str, expected: ValueType) {
        let value_type: ValueType = serde_json::from_str(json).unwrap();
        assert_that!(value_type).is_equal_to(expected);
    }

    #[test_case(HackleValue::from("42"), Some("42"))]
    #[test_case(HackleValue::Number(42.0), Some("42"))]
    #[test_case(HackleValue::Number(42.5), Some("42.5"))]
    #[test_case(HackleValue::Bool(true), None)]
    #[test_case(HackleValue::Null, None)]
    fn converts_to_string(value: HackleValue, expected: Option<&str>) {
        assert_that!(value.to_string_value()).is_equal_to(expected.map(String::from));
    }

    #[test_case(HackleValue::from("42"), Some(42.0))]
    #[test_case(HackleValue::from("4.2"), Some(4.2))]
    #[test_case(HackleValue::from("abc"), None)]
    #[test_case(HackleValue::Number(3.0), Some(3.0))]
    #[test_case(HackleValue::Bool(true), None)]
    fn converts_to_number(value: HackleValue, expected: Option<f64>) {
        assert_that!(value.to_f64()).is_equal_to(expected);
    }

    #[test_case(HackleValue::Bool(false), Some(false))]
    #[test_case(HackleValue::from("TRUE"), Some(true))]
    #[test_case(HackleValue::from("yes"), None)]
    #[test_case(HackleValue::Number(1.0), None)]
    fn converts_to_bool(value: HackleValue, expected: Option<bool>) {
        assert_that!(value.to_bool()).is_equal_to(expected);
    }

    #[test]
    fn converts_json_values() {
        assert_that!(HackleValue::from(&json!("a"))).is_equal_to(HackleValue::from("a"));
        assert_that!(HackleValue::from(&json!(3))).is_equal_to(HackleValue::Number(3.0));
        assert_that!(HackleValue::from(&json!(false))).is_equal_to(HackleValue::Bool(false));
        assert_that!(HackleValue::from(&json!({"a": 1}))).is_equal_to(HackleValue::Null);
    }

    #[test_case("1", "1.0.0")]
    #[test_case("1.2", "1.2.0")]
    #[test_case("1.2.3", "1.2.3")]
    #[test_case("1.2.3-beta.1", "1.2.3-beta.1")]
    #[test_case("1.2.3+build.5", "1.2.3")]
    #[test_case("2-rc.1", "2.0.0-rc.1")]
    fn parses_versions(input: &str, expected: &str) {
        let version = Version::parse(input).unwrap();
        assert_that!(version.to_string()).is_equal_to(expected.to_string());
    }

    #[test_case("")]
    #[test_case("a.b.c")]
    #[test_case("01.2.3")]
    #[test_case("1.2.3.4")]
    fn rejects_invalid_versions(input: &str) {
        assert_that!(Version::parse(input)).is_none();
    }

    #[test_case("1.0.0", "2.0.0", Ordering::Less)]
    #[test_case("1.1", "1.0.9", Ordering::Greater)]
    #[test_case("1.0.0", "1.0.0+build", Ordering::Equal)]
    #[test_case("1.0.0-alpha", "1.0.0", Ordering::Less)]
    #[test_case("1.0.0-alpha", "1.0.0-alpha.1", Ordering::Less)]
    #[test_case("1.0.0-beta.11", "1.0.0-beta.2", Ordering::Greater)]
    fn compares_versions(lhs: &str, rhs: &str, expected: Ordering) {
        let lhs = Version::parse(lhs).unwrap();
        let rhs = Version::parse(rhs).unwrap();
        assert_that!(lhs.cmp(&rhs)).is_equal_to(expected);
    }
}
