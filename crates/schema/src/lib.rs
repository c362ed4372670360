use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

pub mod form;
pub mod payload;
pub mod registry;

pub use payload::Payload;
pub use registry::{FieldKind, FieldSpec};

/// A value already coerced to the declared kind of an editable column.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Numeric(f64),
    Json(Value),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Integer(_) => FieldKind::Integer,
            FieldValue::Numeric(_) => FieldKind::Numeric,
            FieldValue::Json(_) => FieldKind::Json,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(n) => Value::from(*n),
            FieldValue::Numeric(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Json(v) => v.clone(),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Integer(n) => serializer.serialize_i64(*n),
            FieldValue::Numeric(n) => serializer.serialize_f64(*n),
            FieldValue::Json(v) => v.serialize(serializer),
        }
    }
}

/// User-correctable failure to coerce a submitted value. Always names the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub const CODE: &'static str = "ERR_VALIDATION";

    pub fn missing(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: format!("Missing field: {}", field),
        }
    }

    pub fn invalid_text(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: format!("Invalid text value for {}", field),
        }
    }

    pub fn invalid_integer(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: format!("Invalid integer value for {}", field),
        }
    }

    pub fn invalid_numeric(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: format!("Invalid numeric value for {}", field),
        }
    }

    pub fn invalid_json(field: &str, err: &serde_json::Error) -> Self {
        Self {
            field: field.to_string(),
            message: format!("Invalid JSON in field \"{}\": {}", field, err),
        }
    }

    pub fn not_editable(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: format!("Field {} is not editable", field),
        }
    }

    pub fn kind_mismatch(field: &str, expected: FieldKind, actual: FieldKind) -> Self {
        Self {
            field: field.to_string(),
            message: format!(
                "Field {} expects a {} value, got {}",
                field,
                expected.as_str(),
                actual.as_str()
            ),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Parses operator input for an integer column: trimmed, base 10, optional
/// sign, and within the `integer` column range.
pub fn parse_integer_text(field: &str, raw: &str) -> Result<i64, ValidationError> {
    raw.trim()
        .parse::<i32>()
        .map(i64::from)
        .map_err(|_| ValidationError::invalid_integer(field))
}

/// Parses operator input for a numeric column. Non-finite values are rejected.
pub fn parse_numeric_text(field: &str, raw: &str) -> Result<f64, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::invalid_numeric(field));
    }
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(ValidationError::invalid_numeric(field)),
    }
}

/// One row of the configuration table as it travels over the wire: a flat
/// object with `id`, `created_at` and then every other column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub id: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ConfigRecord {
    /// Every column value in wire order, including `id` and `created_at`.
    pub fn entries(&self) -> Vec<(&str, Value)> {
        let mut out = Vec::with_capacity(self.fields.len() + 2);
        out.push((registry::ID_FIELD, Value::from(self.id)));
        out.push((
            registry::CREATED_AT_FIELD,
            self.created_at
                .as_ref()
                .map(|s| Value::String(s.clone()))
                .unwrap_or(Value::Null),
        ));
        for (name, value) in &self.fields {
            out.push((name.as_str(), value.clone()));
        }
        out
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn label(&self) -> String {
        let text = |name: &str| {
            self.fields
                .get(name)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        format!("#{} · {} · {}", self.id, text("env"), text("bot_id"))
    }

    /// The record restricted to the editable allow-list, coerced the same way
    /// an update body is.
    pub fn to_payload(&self) -> Result<Payload, ValidationError> {
        Payload::from_json_object(&self.fields)
    }
}

/// Identity attached to a valid session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Value,
    pub username: String,
    pub role: String,
}
