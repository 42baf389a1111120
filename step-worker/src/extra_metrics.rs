//! Extraction of user-declared fields from a consumed unit into the metrics
//! record.
//!
//! Specs come from configuration as a JSON list:
//!
//! ```json
//! ["oid", {"key": "candid", "alias": "c", "format": "str"}]
//! ```
//!
//! A bare string extracts that field under its own name. A detailed spec needs
//! a `key`, may rename it with `alias` and may convert it with `format`, either
//! one of the named formatters or a function registered from code. Specs are
//! only checked when a unit is extracted, so a broken spec fails the first
//! cycle that uses it.

use std::fmt;
use std::sync::Arc;

use common_kafka::record::{Record, Unit};
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Name under which the unit size is always reported.
pub const N_MESSAGES: &str = "n_messages";

#[derive(Debug, Error, PartialEq)]
pub enum MetricSpecError {
    #[error("extra metric spec {0} has no string \"key\"")]
    MissingKey(Value),
    #[error("format {format} of extra metric {key:?} is not a known formatter")]
    FormatNotCallable { key: String, format: Value },
    #[error("alias {alias} of extra metric {key:?} must be a string")]
    AliasNotString { key: String, alias: Value },
    #[error("formatter {format:?} cannot convert {value} of extra metric {key:?}")]
    FormatFailed {
        key: String,
        format: String,
        value: Value,
    },
}

pub type FormatFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Conversion applied to an extracted value.
#[derive(Clone, Deserialize)]
#[serde(from = "Value")]
pub enum Format {
    Named(String),
    Custom(FormatFn),
    /// Anything configuration provided that cannot name a formatter.
    Invalid(Value),
}

impl Format {
    pub fn custom(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Format::Custom(Arc::new(f))
    }
}

impl fmt::Debug for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Format::Custom(_) => f.write_str("Custom(..)"),
            Format::Invalid(value) => f.debug_tuple("Invalid").field(value).finish(),
        }
    }
}

impl From<Value> for Format {
    fn from(value: Value) -> Self {
        match value {
            Value::String(name) => Format::Named(name),
            other => Format::Invalid(other),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailedSpec {
    #[serde(default)]
    pub key: Option<Value>,
    #[serde(default)]
    pub alias: Option<Value>,
    #[serde(default)]
    pub format: Option<Format>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MetricSpec {
    Field(String),
    Detailed(DetailedSpec),
    /// Neither a field name nor an object, rejected at extraction.
    Invalid(Value),
}

impl MetricSpec {
    pub fn field(key: impl Into<String>) -> Self {
        MetricSpec::Field(key.into())
    }

    pub fn detailed(key: impl Into<String>) -> Self {
        MetricSpec::Detailed(DetailedSpec {
            key: Some(Value::String(key.into())),
            ..Default::default()
        })
    }

    pub fn alias(self, alias: impl Into<String>) -> Self {
        let mut spec = self.into_detailed();
        spec.alias = Some(Value::String(alias.into()));
        MetricSpec::Detailed(spec)
    }

    pub fn format(self, format: Format) -> Self {
        let mut spec = self.into_detailed();
        spec.format = Some(format);
        MetricSpec::Detailed(spec)
    }

    fn into_detailed(self) -> DetailedSpec {
        match self {
            MetricSpec::Field(key) => DetailedSpec {
                key: Some(Value::String(key)),
                ..Default::default()
            },
            MetricSpec::Detailed(spec) => spec,
            MetricSpec::Invalid(_) => DetailedSpec::default(),
        }
    }

    fn resolve(&self) -> Result<Extractor<'_>, MetricSpecError> {
        let spec = match self {
            MetricSpec::Field(key) => {
                return Ok(Extractor {
                    key,
                    name: key,
                    format: None,
                })
            }
            MetricSpec::Detailed(spec) => spec,
            MetricSpec::Invalid(value) => return Err(MetricSpecError::MissingKey(value.clone())),
        };

        let key = match &spec.key {
            Some(Value::String(key)) => key.as_str(),
            _ => {
                return Err(MetricSpecError::MissingKey(Value::Object(spec_summary(
                    spec,
                ))))
            }
        };
        let name = match &spec.alias {
            None => key,
            Some(Value::String(alias)) => alias.as_str(),
            Some(other) => {
                return Err(MetricSpecError::AliasNotString {
                    key: key.to_string(),
                    alias: other.clone(),
                })
            }
        };
        let format = match &spec.format {
            None => None,
            Some(Format::Custom(f)) => Some(Formatter::Custom(f.as_ref())),
            Some(Format::Named(name)) => match builtin(name) {
                Some(f) => Some(Formatter::Builtin(name, f)),
                None => {
                    return Err(MetricSpecError::FormatNotCallable {
                        key: key.to_string(),
                        format: Value::String(name.clone()),
                    })
                }
            },
            Some(Format::Invalid(value)) => {
                return Err(MetricSpecError::FormatNotCallable {
                    key: key.to_string(),
                    format: value.clone(),
                })
            }
        };

        Ok(Extractor { key, name, format })
    }
}

fn spec_summary(spec: &DetailedSpec) -> Map<String, Value> {
    let mut summary = Map::new();
    if let Some(key) = &spec.key {
        summary.insert("key".into(), key.clone());
    }
    if let Some(alias) = &spec.alias {
        summary.insert("alias".into(), alias.clone());
    }
    summary
}

type BuiltinFn = fn(&Value) -> Option<Value>;

enum Formatter<'a> {
    Builtin(&'a str, BuiltinFn),
    Custom(&'a (dyn Fn(&Value) -> Value + Send + Sync)),
}

struct Extractor<'a> {
    key: &'a str,
    name: &'a str,
    format: Option<Formatter<'a>>,
}

impl Extractor<'_> {
    fn extract(&self, record: &Record) -> Result<Value, MetricSpecError> {
        // a field the message does not carry is reported as null, unformatted
        let Some(value) = record.get(self.key) else {
            return Ok(Value::Null);
        };
        match &self.format {
            None => Ok(value.clone()),
            Some(Formatter::Custom(f)) => Ok(f(value)),
            Some(Formatter::Builtin(name, f)) => {
                f(value).ok_or_else(|| MetricSpecError::FormatFailed {
                    key: self.key.to_string(),
                    format: name.to_string(),
                    value: value.clone(),
                })
            }
        }
    }
}

fn builtin(name: &str) -> Option<BuiltinFn> {
    let f: BuiltinFn = match name {
        "str" => format_str,
        "int" => format_int,
        "float" => format_float,
        "bool" => format_bool,
        "lower" => format_lower,
        "upper" => format_upper,
        _ => return None,
    };
    Some(f)
}

fn format_str(value: &Value) -> Option<Value> {
    Some(match value {
        Value::String(s) => Value::String(s.clone()),
        other => Value::String(other.to_string()),
    })
}

fn format_lower(value: &Value) -> Option<Value> {
    value.as_str().map(|s| Value::String(s.to_lowercase()))
}

fn format_upper(value: &Value) -> Option<Value> {
    value.as_str().map(|s| Value::String(s.to_uppercase()))
}

fn format_int(value: &Value) -> Option<Value> {
    let int = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))?,
        Value::String(s) => s.trim().parse().ok()?,
        Value::Bool(b) => i64::from(*b),
        _ => return None,
    };
    Some(Value::from(int))
}

fn format_float(value: &Value) -> Option<Value> {
    let float = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Number::from_f64(float).map(Value::Number)
}

fn format_bool(value: &Value) -> Option<Value> {
    Some(Value::Bool(match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }))
}

/// Apply every spec to `unit`. A batch yields one list per spec, aligned with
/// batch order. [`N_MESSAGES`] is always included.
pub fn extract(specs: &[MetricSpec], unit: &Unit) -> Result<Map<String, Value>, MetricSpecError> {
    let mut metrics = Map::new();
    for spec in specs {
        let extractor = spec.resolve()?;
        let value = match unit {
            Unit::Single(record) => extractor.extract(record)?,
            Unit::Batch(records) => Value::Array(
                records
                    .iter()
                    .map(|record| extractor.extract(record))
                    .collect::<Result<_, _>>()?,
            ),
        };
        metrics.insert(extractor.name.to_string(), value);
    }
    metrics.insert(N_MESSAGES.to_string(), Value::from(unit.len()));
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_kafka::record::Position;
    use rstest::rstest;
    use serde_json::json;

    fn record(offset: i64, value: Value) -> Record {
        let Value::Object(data) = value else {
            panic!("test records must be objects");
        };
        Record::new(Position::new("alerts", 0, offset), Some(0), data)
    }

    fn specs(raw: Value) -> Vec<MetricSpec> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_field_alias_and_format() {
        let unit = Unit::Single(record(0, json!({"oid": "X", "candid": 1})));
        let metrics = extract(
            &specs(json!(["oid", {"key": "candid", "alias": "c", "format": "str"}])),
            &unit,
        )
        .unwrap();
        assert_eq!(
            Value::Object(metrics),
            json!({"oid": "X", "c": "1", "n_messages": 1})
        );
    }

    #[test]
    fn test_batch_values_follow_batch_order() {
        let unit = Unit::Batch(vec![
            record(0, json!({"oid": "a", "candid": 10})),
            record(1, json!({"oid": "b"})),
            record(2, json!({"oid": "c", "candid": 30})),
        ]);
        let metrics = extract(&specs(json!(["oid", "candid"])), &unit).unwrap();
        assert_eq!(
            Value::Object(metrics),
            json!({"oid": ["a", "b", "c"], "candid": [10, null, 30], "n_messages": 3})
        );
    }

    #[test]
    fn test_custom_format_from_code() {
        let unit = Unit::Single(record(0, json!({"mag": 17.25})));
        let spec = MetricSpec::detailed("mag")
            .alias("magnitude")
            .format(Format::custom(|v| json!(v.as_f64().map(f64::round))));
        let metrics = extract(&[spec], &unit).unwrap();
        assert_eq!(metrics.get("magnitude"), Some(&json!(17.0)));
    }

    #[test]
    fn test_no_specs_still_counts_messages() {
        let unit = Unit::Batch(vec![record(0, json!({})), record(1, json!({}))]);
        assert_eq!(
            Value::Object(extract(&[], &unit).unwrap()),
            json!({"n_messages": 2})
        );
    }

    #[rstest]
    #[case(json!([{"alias": "c"}]), "missing key")]
    #[case(json!([{"key": 3}]), "missing key")]
    #[case(json!([5]), "missing key")]
    #[case(json!(["oid", null]), "missing key")]
    #[case(json!([{"key": "candid", "alias": 5}]), "alias")]
    #[case(json!([{"key": "candid", "format": "nope"}]), "format")]
    #[case(json!([{"key": "candid", "format": 12}]), "format")]
    #[case(json!([{"key": "oid", "format": "int"}]), "failed")]
    fn test_bad_specs_fail_at_extraction(#[case] raw: Value, #[case] kind: &str) {
        let parsed = specs(raw);
        let unit = Unit::Single(record(0, json!({"oid": "X", "candid": 1})));
        let err = extract(&parsed, &unit).unwrap_err();
        match kind {
            "missing key" => assert!(matches!(err, MetricSpecError::MissingKey(_))),
            "alias" => assert!(matches!(err, MetricSpecError::AliasNotString { .. })),
            "format" => assert!(matches!(err, MetricSpecError::FormatNotCallable { .. })),
            _ => assert!(matches!(err, MetricSpecError::FormatFailed { .. })),
        }
    }

    #[rstest]
    #[case("int", json!("42"), json!(42))]
    #[case("int", json!(4.9), json!(4))]
    #[case("float", json!("1.5"), json!(1.5))]
    #[case("bool", json!(0), json!(false))]
    #[case("lower", json!("ZTF"), json!("ztf"))]
    #[case("str", json!(true), json!("true"))]
    fn test_named_formatters(#[case] name: &str, #[case] input: Value, #[case] expected: Value) {
        let f = builtin(name).unwrap();
        assert_eq!(f(&input), Some(expected));
    }
}
