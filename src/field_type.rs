//! Field value types: deserialization, validation and serialization.
//!
//! A [`FieldType`] converts a wire value into its internal representation
//! (`deserialize`), checks it against constraints (`validate`) and converts it
//! back for output (`serialize`). Validation never stops at the first problem:
//! every violation is returned with a JSON Pointer relative to the value.
//!
//! Null is handled uniformly: it passes only when the type is wrapped in
//! [`FieldType::Nullable`], and otherwise yields a single null violation before
//! any concrete check runs.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::Violation;
use crate::types::json_type_name;

/// Constraints for string values.
#[derive(Debug, Clone, Default)]
pub struct StringType {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Regex>,
    pub enumeration: Option<Vec<String>>,
}

impl StringType {
    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn enumeration<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enumeration = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Constraints shared by number and integer values.
#[derive(Debug, Clone, Default)]
pub struct NumberType {
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub exclusive_minimum: bool,
    pub exclusive_maximum: bool,
    pub multiple_of: Option<f64>,
}

impl NumberType {
    pub fn minimum(mut self, min: f64, exclusive: bool) -> Self {
        self.minimum = Some(min);
        self.exclusive_minimum = exclusive;
        self
    }

    pub fn maximum(mut self, max: f64, exclusive: bool) -> Self {
        self.maximum = Some(max);
        self.exclusive_maximum = exclusive;
        self
    }

    pub fn multiple_of(mut self, step: f64) -> Self {
        self.multiple_of = Some(step);
        self
    }
}

/// Constraints for array values.
#[derive(Debug, Clone, Default)]
pub struct ArrayType {
    pub items: Option<Box<FieldType>>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub unique_items: bool,
}

impl ArrayType {
    pub fn items(mut self, items: impl Into<FieldType>) -> Self {
        self.items = Some(Box::new(items.into()));
        self
    }

    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn unique_items(mut self) -> Self {
        self.unique_items = true;
        self
    }
}

/// Constraints for object values.
#[derive(Debug, Clone)]
pub struct ObjectType {
    pub properties: Vec<(String, FieldType)>,
    pub required: Vec<String>,
    pub additional_properties: bool,
}

impl Default for ObjectType {
    fn default() -> Self {
        Self {
            properties: Vec::new(),
            required: Vec::new(),
            additional_properties: true,
        }
    }
}

impl ObjectType {
    pub fn property(mut self, name: impl Into<String>, ty: impl Into<FieldType>) -> Self {
        self.properties.push((name.into(), ty.into()));
        self
    }

    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn additional_properties(mut self, allowed: bool) -> Self {
        self.additional_properties = allowed;
        self
    }

    fn property_type(&self, name: &str) -> Option<&FieldType> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| ty)
    }
}

/// The type of a field value.
#[derive(Debug, Clone)]
pub enum FieldType {
    String(StringType),
    Number(NumberType),
    Integer(NumberType),
    Boolean,
    /// Calendar date, `YYYY-MM-DD`.
    Date,
    /// RFC 3339 timestamp, normalized to UTC.
    DateTime,
    Array(ArrayType),
    Object(ObjectType),
    /// Exactly one member must accept the value.
    OneOf(Vec<FieldType>),
    /// Every member must accept the value.
    AllOf(Vec<FieldType>),
    /// The inner type must reject the value.
    Not(Box<FieldType>),
    Any,
    /// Accepts null in addition to the inner type.
    Nullable(Box<FieldType>),
}

impl From<StringType> for FieldType {
    fn from(ty: StringType) -> Self {
        FieldType::String(ty)
    }
}

impl From<ArrayType> for FieldType {
    fn from(ty: ArrayType) -> Self {
        FieldType::Array(ty)
    }
}

impl From<ObjectType> for FieldType {
    fn from(ty: ObjectType) -> Self {
        FieldType::Object(ty)
    }
}

impl FieldType {
    pub fn string() -> Self {
        FieldType::String(StringType::default())
    }

    pub fn number() -> Self {
        FieldType::Number(NumberType::default())
    }

    pub fn integer() -> Self {
        FieldType::Integer(NumberType::default())
    }

    /// Wrap the type so null is accepted.
    pub fn nullable(self) -> Self {
        match self {
            FieldType::Nullable(_) => self,
            other => FieldType::Nullable(Box::new(other)),
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, FieldType::Nullable(_))
    }

    /// Type name used in messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String(_) => "string",
            FieldType::Number(_) => "number",
            FieldType::Integer(_) => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "date-time",
            FieldType::Array(_) => "array",
            FieldType::Object(_) => "object",
            FieldType::OneOf(_) => "oneOf",
            FieldType::AllOf(_) => "allOf",
            FieldType::Not(_) => "not",
            FieldType::Any => "any",
            FieldType::Nullable(inner) => inner.name(),
        }
    }

    /// Convert a wire value into its internal form.
    ///
    /// Conversion is best-effort: values that cannot be converted are returned
    /// unchanged and rejected later by [`FieldType::validate`].
    pub fn deserialize(&self, value: Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (FieldType::Nullable(inner), value) => inner.deserialize(value),
            (FieldType::Number(_), Value::String(s)) => parse_number(&s).unwrap_or(Value::String(s)),
            (FieldType::Integer(_), Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or(Value::String(s)),
            (FieldType::Integer(_), Value::Number(n)) => match n.as_f64() {
                Some(f) if n.as_i64().is_none() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                    Value::from(f as i64)
                }
                _ => Value::Number(n),
            },
            (FieldType::Boolean, Value::String(s)) => match s.as_str() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => Value::String(s),
            },
            (FieldType::Date, Value::String(s)) => match parse_date(&s) {
                Some(date) => Value::String(date.format("%Y-%m-%d").to_string()),
                None => Value::String(s),
            },
            (FieldType::DateTime, Value::String(s)) => match parse_date_time(&s) {
                Some(dt) => Value::String(format_date_time(&dt)),
                None => Value::String(s),
            },
            (FieldType::Array(array), Value::Array(items)) => match &array.items {
                Some(item_type) => Value::Array(
                    items
                        .into_iter()
                        .map(|item| item_type.deserialize(item))
                        .collect(),
                ),
                None => Value::Array(items),
            },
            (FieldType::Object(object), Value::Object(map)) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        let v = match object.property_type(&k) {
                            Some(ty) => ty.deserialize(v),
                            None => v,
                        };
                        (k, v)
                    })
                    .collect::<Map<String, Value>>(),
            ),
            (FieldType::OneOf(members), value) => {
                let matched = members.iter().find_map(|member| {
                    let converted = member.deserialize(value.clone());
                    member.validate(&converted).is_empty().then_some(converted)
                });
                matched.unwrap_or(value)
            }
            (FieldType::AllOf(members), value) => members
                .iter()
                .fold(value, |value, member| member.deserialize(value)),
            (_, value) => value,
        }
    }

    /// Convert an internal value into its wire form.
    pub fn serialize(&self, value: Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (FieldType::Nullable(inner), value) => inner.serialize(value),
            (FieldType::Date, Value::String(s)) => match parse_date(&s) {
                Some(date) => Value::String(date.format("%Y-%m-%d").to_string()),
                None => Value::String(s),
            },
            (FieldType::DateTime, Value::String(s)) => match parse_date_time(&s) {
                Some(dt) => Value::String(format_date_time(&dt)),
                None => Value::String(s),
            },
            (FieldType::Array(array), Value::Array(items)) => match &array.items {
                Some(item_type) => Value::Array(
                    items
                        .into_iter()
                        .map(|item| item_type.serialize(item))
                        .collect(),
                ),
                None => Value::Array(items),
            },
            (FieldType::Object(object), Value::Object(map)) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        let v = match object.property_type(&k) {
                            Some(ty) => ty.serialize(v),
                            None => v,
                        };
                        (k, v)
                    })
                    .collect::<Map<String, Value>>(),
            ),
            (FieldType::OneOf(members), value) => {
                match members.iter().find(|m| m.validate(&value).is_empty()) {
                    Some(member) => member.serialize(value),
                    None => value,
                }
            }
            (_, value) => value,
        }
    }

    /// Check a value against this type, collecting every violation.
    pub fn validate(&self, value: &Value) -> Vec<Violation> {
        if let FieldType::Nullable(inner) = self {
            return if value.is_null() {
                Vec::new()
            } else {
                inner.validate(value)
            };
        }
        if value.is_null() {
            return vec![Violation::new("must not be null")];
        }

        match self {
            FieldType::String(string) => validate_string(string, value),
            FieldType::Number(number) => match value.as_f64() {
                Some(n) => validate_range(number, n),
                None => vec![type_mismatch("number", value)],
            },
            FieldType::Integer(number) => {
                if value.as_i64().is_some() || value.as_u64().is_some() {
                    validate_range(number, value.as_f64().unwrap_or_default())
                } else {
                    vec![type_mismatch("integer", value)]
                }
            }
            FieldType::Boolean => {
                if value.is_boolean() {
                    Vec::new()
                } else {
                    vec![type_mismatch("boolean", value)]
                }
            }
            FieldType::Date => match value.as_str() {
                Some(s) if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => Vec::new(),
                Some(_) => vec![Violation::new("must be a date (YYYY-MM-DD)")],
                None => vec![type_mismatch("date string", value)],
            },
            FieldType::DateTime => match value.as_str() {
                Some(s) if DateTime::parse_from_rfc3339(s).is_ok() => Vec::new(),
                Some(_) => vec![Violation::new("must be an RFC 3339 date-time")],
                None => vec![type_mismatch("date-time string", value)],
            },
            FieldType::Array(array) => validate_array(array, value),
            FieldType::Object(object) => validate_object(object, value),
            FieldType::OneOf(members) => {
                let matching = members
                    .iter()
                    .filter(|m| m.validate(value).is_empty())
                    .count();
                if matching == 1 {
                    Vec::new()
                } else {
                    vec![Violation::new(format!(
                        "must match exactly one allowed type, matched {}",
                        matching
                    ))]
                }
            }
            FieldType::AllOf(members) => members.iter().flat_map(|m| m.validate(value)).collect(),
            FieldType::Not(inner) => {
                if inner.validate(value).is_empty() {
                    vec![Violation::new(format!("must not be a valid {}", inner.name()))]
                } else {
                    Vec::new()
                }
            }
            FieldType::Any => Vec::new(),
            FieldType::Nullable(_) => unreachable!("handled above"),
        }
    }
}

// --- Internal implementation ---

fn type_mismatch(expected: &str, value: &Value) -> Violation {
    Violation::new(format!(
        "expected {}, got {}",
        expected,
        json_type_name(value)
    ))
}

fn validate_string(string: &StringType, value: &Value) -> Vec<Violation> {
    let Some(s) = value.as_str() else {
        return vec![type_mismatch("string", value)];
    };

    let mut violations = Vec::new();
    let length = s.chars().count();
    if let Some(min) = string.min_length {
        if length < min {
            violations.push(Violation::new(format!(
                "must be at least {} characters",
                min
            )));
        }
    }
    if let Some(max) = string.max_length {
        if length > max {
            violations.push(Violation::new(format!(
                "must be at most {} characters",
                max
            )));
        }
    }
    if let Some(pattern) = &string.pattern {
        if !pattern.is_match(s) {
            violations.push(Violation::new(format!(
                "must match pattern {}",
                pattern.as_str()
            )));
        }
    }
    if let Some(allowed) = &string.enumeration {
        if !allowed.iter().any(|a| a == s) {
            violations.push(Violation::new(format!(
                "must be one of: {}",
                allowed.join(", ")
            )));
        }
    }
    violations
}

fn validate_range(number: &NumberType, n: f64) -> Vec<Violation> {
    let mut violations = Vec::new();
    if let Some(min) = number.minimum {
        if (number.exclusive_minimum && n <= min) || n < min {
            let op = if number.exclusive_minimum { ">" } else { ">=" };
            violations.push(Violation::new(format!("must be {} {}", op, min)));
        }
    }
    if let Some(max) = number.maximum {
        if (number.exclusive_maximum && n >= max) || n > max {
            let op = if number.exclusive_maximum { "<" } else { "<=" };
            violations.push(Violation::new(format!("must be {} {}", op, max)));
        }
    }
    if let Some(step) = number.multiple_of {
        let quotient = n / step;
        if (quotient - quotient.round()).abs() > 1e-9 {
            violations.push(Violation::new(format!("must be a multiple of {}", step)));
        }
    }
    violations
}

fn validate_array(array: &ArrayType, value: &Value) -> Vec<Violation> {
    let Some(items) = value.as_array() else {
        return vec![type_mismatch("array", value)];
    };

    let mut violations = Vec::new();
    if let Some(min) = array.min_items {
        if items.len() < min {
            violations.push(Violation::new(format!("must have at least {} items", min)));
        }
    }
    if let Some(max) = array.max_items {
        if items.len() > max {
            violations.push(Violation::new(format!("must have at most {} items", max)));
        }
    }
    if array.unique_items {
        for (i, item) in items.iter().enumerate() {
            if items[..i].contains(item) {
                violations.push(Violation::new("duplicate item").under(&i.to_string()));
            }
        }
    }
    if let Some(item_type) = &array.items {
        for (i, item) in items.iter().enumerate() {
            let index = i.to_string();
            violations.extend(
                item_type
                    .validate(item)
                    .into_iter()
                    .map(|v| v.under(&index)),
            );
        }
    }
    violations
}

fn validate_object(object: &ObjectType, value: &Value) -> Vec<Violation> {
    let Some(map) = value.as_object() else {
        return vec![type_mismatch("object", value)];
    };

    let mut violations = Vec::new();
    for name in &object.required {
        if !map.contains_key(name) {
            violations.push(Violation::new("is required").under(name));
        }
    }
    for (key, child) in map {
        match object.property_type(key) {
            Some(ty) => {
                violations.extend(ty.validate(child).into_iter().map(|v| v.under(key)));
            }
            None if !object.additional_properties => {
                violations.push(Violation::new("unknown property").under(key));
            }
            None => {}
        }
    }
    violations
}

fn parse_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    let f = s.parse::<f64>().ok()?;
    serde_json::Number::from_f64(f).map(Value::Number)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_date_time(s).map(|dt| dt.date_naive()))
}

fn parse_date_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn format_date_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(ty: &FieldType, value: Value) {
        assert!(ty.validate(&value).is_empty(), "{} rejected {}", ty.name(), value);
        assert_eq!(ty.deserialize(ty.serialize(value.clone())), value);
    }

    // === Round Trip ===

    #[test]
    fn scalar_round_trips() {
        round_trip(&FieldType::string(), json!("hello"));
        round_trip(&FieldType::integer(), json!(42));
        round_trip(&FieldType::number(), json!(2.5));
        round_trip(&FieldType::Boolean, json!(false));
        round_trip(&FieldType::Date, json!("2024-02-29"));
        round_trip(&FieldType::DateTime, json!("2024-01-02T03:04:05Z"));
    }

    #[test]
    fn integer_rejects_non_numeric() {
        let ty = FieldType::integer();
        let value = ty.deserialize(json!("abc"));
        assert_eq!(ty.validate(&value).len(), 1);
        assert!(!ty.validate(&json!(1.5)).is_empty());
    }

    #[test]
    fn deserialize_converts_query_strings() {
        assert_eq!(FieldType::integer().deserialize(json!("7")), json!(7));
        assert_eq!(FieldType::number().deserialize(json!("1.5")), json!(1.5));
        assert_eq!(FieldType::Boolean.deserialize(json!("true")), json!(true));
    }

    #[test]
    fn date_time_normalizes_to_utc() {
        let value = FieldType::DateTime.deserialize(json!("2024-01-02T03:04:05+02:00"));
        assert_eq!(value, json!("2024-01-02T01:04:05Z"));
    }

    #[test]
    fn invalid_date_rejected() {
        assert!(!FieldType::Date.validate(&json!("2023-02-30")).is_empty());
    }

    // === Null Handling ===

    #[test]
    fn null_rejected_before_type_checks() {
        let ty: FieldType = StringType::default().min_length(3).into();
        let violations = ty.validate(&Value::Null);
        assert_eq!(violations, vec![Violation::new("must not be null")]);
    }

    #[test]
    fn nullable_passes_null() {
        let ty = FieldType::integer().nullable();
        assert!(ty.validate(&Value::Null).is_empty());
        assert!(!ty.validate(&json!("x")).is_empty());
        assert!(ty.is_nullable());
    }

    // === Constraints ===

    #[test]
    fn string_collects_all_violations() {
        let ty: FieldType = StringType::default()
            .max_length(3)
            .pattern(Regex::new("^[a-z]+$").unwrap())
            .enumeration(["ab", "cd"])
            .into();
        assert_eq!(ty.validate(&json!("ABCDE")).len(), 3);
    }

    #[test]
    fn number_range_and_step() {
        let ty = FieldType::Number(
            NumberType::default()
                .minimum(0.0, true)
                .maximum(10.0, false)
                .multiple_of(0.5),
        );
        assert!(ty.validate(&json!(10)).is_empty());
        assert!(ty.validate(&json!(2.5)).is_empty());
        assert_eq!(ty.validate(&json!(0)).len(), 1);
        assert_eq!(ty.validate(&json!(10.3)).len(), 2);
    }

    #[test]
    fn array_items_extend_pointer() {
        let ty: FieldType = ArrayType::default()
            .items(FieldType::integer())
            .unique_items()
            .into();
        let violations = ty.validate(&json!([1, "x", 1]));
        let paths: Vec<_> = violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["/2", "/1"]);
    }

    #[test]
    fn object_required_and_additional() {
        let ty: FieldType = ObjectType::default()
            .property("street", FieldType::string())
            .required(["street"])
            .additional_properties(false)
            .into();
        let violations = ty.validate(&json!({ "zip": "123" }));
        let paths: Vec<_> = violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["/street", "/zip"]);
    }

    // === Composition ===

    #[test]
    fn one_of_requires_exactly_one() {
        let ty = FieldType::OneOf(vec![FieldType::number(), FieldType::integer()]);
        // 3 is both a number and an integer.
        assert_eq!(ty.validate(&json!(3)).len(), 1);
        assert!(ty.validate(&json!(3.5)).is_empty());
        assert_eq!(ty.validate(&json!("x")).len(), 1);
    }

    #[test]
    fn all_of_requires_every_member() {
        let ty = FieldType::AllOf(vec![
            StringType::default().min_length(2).into(),
            StringType::default().max_length(4).into(),
        ]);
        assert!(ty.validate(&json!("abc")).is_empty());
        assert_eq!(ty.validate(&json!("a")).len(), 1);
    }

    #[test]
    fn not_requires_inner_failure() {
        let ty = FieldType::Not(Box::new(FieldType::Boolean));
        assert!(ty.validate(&json!("yes")).is_empty());
        assert_eq!(ty.validate(&json!(true)).len(), 1);
    }
}
