//! Physical parameter values with units and definedness.

use chrono::NaiveDate;
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;

/// A parameter value: numeric, free text, or a timestamp.
///
/// Undefined states are first-class: `NaN`, the empty string and the literal
/// string `"None"` all count as undefined, while `0` and `0.0` are defined.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Timestamp(NaiveDate),
}

impl Value {
    /// Whether the value is well-defined (not `NaN`, `""` or `"None"`).
    #[must_use]
    pub fn is_defined(&self) -> bool {
        match self {
            Value::Number(v) => !v.is_nan(),
            Value::Text(s) => !(s.is_empty() || s == "None"),
            Value::Timestamp(_) => true,
        }
    }

    /// The numeric value, if this is a number.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// The text value, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            // NaN is not representable in JSON; undefined numbers map to null.
            Value::Number(v) => json!(v),
            Value::Text(s) => json!(s),
            Value::Timestamp(d) => json!(d.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Timestamp(d) => write!(f, "{d}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Timestamp(d)
    }
}

/// A named instrument parameter with units.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    value: Value,
    units: String,
}

impl Parameter {
    /// Creates a new parameter.
    pub fn new(name: &str, value: impl Into<Value>, units: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            units: units.to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn units(&self) -> &str {
        &self.units
    }

    /// Sets the value.
    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = value.into();
    }

    /// Whether the value is well-defined.
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.value.is_defined()
    }

    /// Metadata key for this parameter: lowercase, spaces as underscores.
    #[must_use]
    pub fn key(&self) -> String {
        self.name.to_lowercase().replace(' ', "_")
    }

    /// JSON projection: `{"value": ..., "units": ...}`.
    #[must_use]
    pub fn as_json(&self) -> JsonValue {
        let mut map = Map::new();
        map.insert("value".to_string(), self.value.to_json());
        map.insert("units".to_string(), json!(self.units));
        JsonValue::Object(map)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.name, self.value, self.units)
    }
}

/// A parameter carrying both the operator-requested (nominal) setting and the
/// resolved/measured actual value.
///
/// Calibration resolution updates `value` only; `nominal_value` always stays
/// what the operator dialed in.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedParameter {
    name: String,
    value: Value,
    nominal_value: Value,
    units: String,
}

impl CalibratedParameter {
    /// Creates a new calibrated parameter.
    pub fn new(
        name: &str,
        value: impl Into<Value>,
        units: &str,
        nominal_value: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            nominal_value: nominal_value.into(),
            units: units.to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn nominal_value(&self) -> &Value {
        &self.nominal_value
    }

    #[must_use]
    pub fn units(&self) -> &str {
        &self.units
    }

    /// Sets the actual (calibrated) value.
    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = value.into();
    }

    /// Sets the nominal (requested) value.
    pub fn set_nominal_value(&mut self, value: impl Into<Value>) {
        self.nominal_value = value.into();
    }

    /// Whether the actual value is well-defined.
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.value.is_defined()
    }

    /// Whether the nominal value is well-defined.
    #[must_use]
    pub fn nominal_is_defined(&self) -> bool {
        self.nominal_value.is_defined()
    }

    /// Metadata key for this parameter: lowercase, spaces as underscores.
    #[must_use]
    pub fn key(&self) -> String {
        self.name.to_lowercase().replace(' ', "_")
    }

    /// JSON projection: `{"nominal_value": ..., "value": ..., "units": ...}`.
    #[must_use]
    pub fn as_json(&self) -> JsonValue {
        let mut map = Map::new();
        map.insert("nominal_value".to_string(), self.nominal_value.to_json());
        map.insert("value".to_string(), self.value.to_json());
        map.insert("units".to_string(), json!(self.units));
        JsonValue::Object(map)
    }
}

impl fmt::Display for CalibratedParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({}) {}",
            self.name, self.value, self.nominal_value, self.units
        )
    }
}

/// A borrowed view over either parameter flavor, for uniform iteration.
#[derive(Debug, Clone, Copy)]
pub enum ParameterRef<'a> {
    Plain(&'a Parameter),
    Calibrated(&'a CalibratedParameter),
}

impl ParameterRef<'_> {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ParameterRef::Plain(p) => p.name(),
            ParameterRef::Calibrated(p) => p.name(),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        match self {
            ParameterRef::Plain(p) => p.key(),
            ParameterRef::Calibrated(p) => p.key(),
        }
    }

    #[must_use]
    pub fn is_defined(&self) -> bool {
        match self {
            ParameterRef::Plain(p) => p.is_defined(),
            ParameterRef::Calibrated(p) => p.is_defined(),
        }
    }

    #[must_use]
    pub fn as_json(&self) -> JsonValue {
        match self {
            ParameterRef::Plain(p) => p.as_json(),
            ParameterRef::Calibrated(p) => p.as_json(),
        }
    }
}
