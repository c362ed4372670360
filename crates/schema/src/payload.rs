use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::registry::{self, FieldKind, FieldSpec};
use crate::{FieldValue, ValidationError, parse_integer_text, parse_numeric_text};

/// Typed values for editable columns, keyed by column name.
///
/// Values can only be inserted under allow-listed names and with the kind the
/// registry declares. A payload handed to the store must also be complete,
/// see [`Payload::ensure_complete`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    values: BTreeMap<&'static str, FieldValue>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: FieldValue) -> Result<(), ValidationError> {
        let spec = registry::spec_of(name)
            .filter(|spec| spec.kind.is_editable())
            .ok_or_else(|| ValidationError::not_editable(name))?;

        if value.kind() != spec.kind {
            return Err(ValidationError::kind_mismatch(
                spec.name,
                spec.kind,
                value.kind(),
            ));
        }

        if let FieldValue::Numeric(n) = &value
            && !n.is_finite()
        {
            return Err(ValidationError::invalid_numeric(spec.name));
        }

        self.values.insert(spec.name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fails on the first allow-listed field (in table order) that is absent.
    pub fn ensure_complete(&self) -> Result<(), ValidationError> {
        match registry::editable_fields().find(|spec| !self.values.contains_key(spec.name)) {
            Some(spec) => Err(ValidationError::missing(spec.name)),
            None => Ok(()),
        }
    }

    /// Present values in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static FieldSpec, &FieldValue)> {
        registry::editable_fields()
            .filter_map(|spec| self.values.get(spec.name).map(|value| (spec, value)))
    }

    /// Parses an update body. Every allow-listed key must be present; keys
    /// outside the allow-list are ignored.
    pub fn from_json_object(input: &Map<String, Value>) -> Result<Self, ValidationError> {
        let mut payload = Self::new();
        for spec in registry::editable_fields() {
            let raw = input
                .get(spec.name)
                .ok_or_else(|| ValidationError::missing(spec.name))?;
            let value = coerce_json(spec, raw)?;
            payload.values.insert(spec.name, value);
        }
        Ok(payload)
    }

    pub fn to_json_object(&self) -> Map<String, Value> {
        self.iter()
            .map(|(spec, value)| (spec.name.to_string(), value.to_json()))
            .collect()
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (spec, value) in self.iter() {
            map.serialize_entry(spec.name, value)?;
        }
        map.end()
    }
}

fn coerce_json(spec: &FieldSpec, raw: &Value) -> Result<FieldValue, ValidationError> {
    match spec.kind {
        FieldKind::Text => match raw {
            Value::Null => Ok(FieldValue::Text(String::new())),
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            Value::Array(_) | Value::Object(_) => Err(ValidationError::invalid_text(spec.name)),
        },
        FieldKind::Integer => match raw {
            Value::Number(n) => integer_from_number(spec.name, n),
            Value::String(s) => parse_integer_text(spec.name, s).map(FieldValue::Integer),
            _ => Err(ValidationError::invalid_integer(spec.name)),
        },
        FieldKind::Numeric => match raw {
            Value::Number(n) => n
                .as_f64()
                .filter(|n| n.is_finite())
                .map(FieldValue::Numeric)
                .ok_or_else(|| ValidationError::invalid_numeric(spec.name)),
            Value::String(s) => parse_numeric_text(spec.name, s).map(FieldValue::Numeric),
            _ => Err(ValidationError::invalid_numeric(spec.name)),
        },
        // Structured values are stored as sent; text-to-JSON parsing is the
        // collector's job.
        FieldKind::Json => Ok(FieldValue::Json(raw.clone())),
        FieldKind::Identifier | FieldKind::ReadOnly => Err(ValidationError::not_editable(spec.name)),
    }
}

fn integer_from_number(field: &str, n: &serde_json::Number) -> Result<FieldValue, ValidationError> {
    let whole = match n.as_i64() {
        Some(v) => Some(v),
        None => n
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64),
    };

    whole
        .filter(|v| i32::try_from(*v).is_ok())
        .map(FieldValue::Integer)
        .ok_or_else(|| ValidationError::invalid_integer(field))
}
