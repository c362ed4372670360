//! Edit-form rendering and collection.
//!
//! [`render`] turns a record into text controls; [`collect`] turns the
//! (possibly edited) controls back into a typed [`Payload`]. Both consult the
//! same registry, so rendering a record and collecting it unchanged yields the
//! record's editable values.

use serde_json::Value;

use crate::registry::{self, FieldKind};
use crate::{ConfigRecord, FieldValue, Payload, ValidationError};
use crate::{parse_integer_text, parse_numeric_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Widget {
    /// Display-only: identifier and read-only columns.
    Display,
    Text,
    Number,
    /// Multi-line JSON editor.
    Json,
    /// Column the registry does not know about; shown as compact JSON.
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormControl {
    pub field: String,
    pub kind: Option<FieldKind>,
    pub widget: Widget,
    pub value: String,
}

impl FormControl {
    pub fn is_editable(&self) -> bool {
        self.kind.is_some_and(FieldKind::is_editable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FormState {
    controls: Vec<FormControl>,
}

impl FormState {
    pub fn controls(&self) -> &[FormControl] {
        &self.controls
    }

    pub fn control(&self, field: &str) -> Option<&FormControl> {
        self.controls.iter().find(|c| c.field == field)
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.control(field).map(|c| c.value.as_str())
    }

    /// Replaces the text of an editable control.
    pub fn set_value(
        &mut self,
        field: &str,
        value: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let control = self
            .controls
            .iter_mut()
            .find(|c| c.field == field)
            .filter(|c| c.is_editable())
            .ok_or_else(|| ValidationError::not_editable(field))?;
        control.value = value.into();
        Ok(())
    }
}

pub fn render(record: &ConfigRecord) -> FormState {
    let controls = record
        .entries()
        .into_iter()
        .map(|(field, value)| render_control(field, &value))
        .collect();
    FormState { controls }
}

fn render_control(field: &str, value: &Value) -> FormControl {
    let kind = registry::kind_of(field);
    let (widget, text) = match kind {
        Some(FieldKind::Identifier | FieldKind::ReadOnly) => (Widget::Display, scalar_text(value)),
        Some(FieldKind::Text) => (Widget::Text, scalar_text(value)),
        Some(FieldKind::Integer | FieldKind::Numeric) => (Widget::Number, scalar_text(value)),
        Some(FieldKind::Json) => (
            Widget::Json,
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
        ),
        None => (Widget::Opaque, value.to_string()),
    };

    FormControl {
        field: field.to_string(),
        kind,
        widget,
        value: text,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Collects the editable allow-list from the form. The first invalid field
/// aborts collection.
pub fn collect(form: &FormState) -> Result<Payload, ValidationError> {
    let mut payload = Payload::new();
    for spec in registry::editable_fields() {
        let raw = form
            .value(spec.name)
            .ok_or_else(|| ValidationError::missing(spec.name))?;

        let value = match spec.kind {
            FieldKind::Text => FieldValue::Text(raw.to_string()),
            FieldKind::Integer => FieldValue::Integer(parse_integer_text(spec.name, raw)?),
            FieldKind::Numeric => FieldValue::Numeric(parse_numeric_text(spec.name, raw)?),
            FieldKind::Json => FieldValue::Json(
                serde_json::from_str(raw)
                    .map_err(|err| ValidationError::invalid_json(spec.name, &err))?,
            ),
            FieldKind::Identifier | FieldKind::ReadOnly => continue,
        };
        payload.insert(spec.name, value)?;
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn sample_record() -> ConfigRecord {
        let mut fields = Map::new();
        for spec in registry::editable_fields() {
            let value = match spec.kind {
                FieldKind::Text => json!(format!("{} text\nsecond line", spec.name)),
                FieldKind::Integer => json!(40),
                FieldKind::Numeric => json!(0.7),
                FieldKind::Json => json!({
                    "zeta": [1, 2, {"nested": null}],
                    "alpha": "value",
                    "n": 1.5
                }),
                FieldKind::Identifier | FieldKind::ReadOnly => unreachable!(),
            };
            fields.insert(spec.name.to_string(), value);
        }
        ConfigRecord {
            id: 3,
            created_at: Some("2025-05-01T10:00:00Z".to_string()),
            fields,
        }
    }

    #[test]
    fn render_then_collect_round_trips_editable_values() {
        let record = sample_record();
        let form = render(&record);
        let payload = collect(&form).unwrap();
        assert_eq!(payload, record.to_payload().unwrap());
    }

    #[test]
    fn render_uses_widgets_from_registry() {
        let mut record = sample_record();
        record
            .fields
            .insert("legacy_column".to_string(), json!({"a": 1}));
        let form = render(&record);

        let id = form.control("id").unwrap();
        assert_eq!(id.widget, Widget::Display);
        assert_eq!(id.value, "3");
        assert!(!id.is_editable());

        assert_eq!(form.control("created_at").unwrap().widget, Widget::Display);
        assert_eq!(form.control("env").unwrap().widget, Widget::Text);
        assert_eq!(form.control("qdrant_top_k").unwrap().value, "40");
        assert_eq!(form.control("language_confidence").unwrap().value, "0.7");

        let opaque = form.control("legacy_column").unwrap();
        assert_eq!(opaque.widget, Widget::Opaque);
        assert_eq!(opaque.value, r#"{"a":1}"#);
        assert!(!opaque.is_editable());
    }

    #[test]
    fn json_is_pretty_printed_with_two_spaces_in_received_order() {
        let form = render(&sample_record());
        let text = form.value("language_rules").unwrap();
        assert!(text.starts_with("{\n  \"zeta\": [\n    1,"));
        assert!(text.find("\"zeta\"").unwrap() < text.find("\"alpha\"").unwrap());
    }

    #[test]
    fn null_values_render_as_empty_text() {
        let mut record = sample_record();
        record.created_at = None;
        record.fields.insert("env".to_string(), Value::Null);
        record.fields.insert("qdrant_top_k".to_string(), Value::Null);
        record.fields.insert("language_rules".to_string(), Value::Null);

        let form = render(&record);
        assert_eq!(form.value("created_at"), Some(""));
        assert_eq!(form.value("env"), Some(""));
        assert_eq!(form.value("qdrant_top_k"), Some(""));
        assert_eq!(form.value("language_rules"), Some("null"));
    }

    #[test]
    fn integer_field_with_trailing_garbage_is_rejected_by_name() {
        let mut form = render(&sample_record());
        form.set_value("tipus_resposta", "12abc").unwrap();
        let err = collect(&form).unwrap_err();
        assert_eq!(err.field, "tipus_resposta");

        form.set_value("tipus_resposta", "42").unwrap();
        let payload = collect(&form).unwrap();
        assert_eq!(payload.get("tipus_resposta"), Some(&FieldValue::Integer(42)));
    }

    #[test]
    fn empty_integer_and_bad_numeric_are_rejected() {
        let mut form = render(&sample_record());
        form.set_value("whatsapp_max_chars", "").unwrap();
        assert_eq!(collect(&form).unwrap_err().field, "whatsapp_max_chars");

        let mut form = render(&sample_record());
        form.set_value("llm_get_response_temperature", "warm").unwrap();
        assert_eq!(
            collect(&form).unwrap_err().field,
            "llm_get_response_temperature"
        );
    }

    #[test]
    fn malformed_json_names_field_and_includes_parser_message() {
        let mut form = render(&sample_record());
        form.set_value("user_prompt_templates_fr", "{a:1}").unwrap();
        let err = collect(&form).unwrap_err();
        assert_eq!(err.field, "user_prompt_templates_fr");
        assert!(err.message.starts_with("Invalid JSON in field \"user_prompt_templates_fr\": "));
        assert!(err.message.contains("line 1"));

        form.set_value("user_prompt_templates_fr", r#"{"a":1}"#).unwrap();
        let payload = collect(&form).unwrap();
        assert_eq!(
            payload.get("user_prompt_templates_fr"),
            Some(&FieldValue::Json(json!({"a": 1})))
        );
    }

    #[test]
    fn text_passes_through_unchanged_including_empty() {
        let mut form = render(&sample_record());
        form.set_value("prompt_system_message_ca", "").unwrap();
        form.set_value("env", "  spaced  ").unwrap();
        let payload = collect(&form).unwrap();
        assert_eq!(
            payload.get("prompt_system_message_ca"),
            Some(&FieldValue::Text(String::new()))
        );
        assert_eq!(
            payload.get("env"),
            Some(&FieldValue::Text("  spaced  ".to_string()))
        );
    }

    #[test]
    fn display_only_controls_reject_edits_and_are_not_collected() {
        let mut form = render(&sample_record());
        assert!(form.set_value("id", "99").is_err());
        assert!(form.set_value("created_at", "now").is_err());
        assert!(form.set_value("unknown", "x").is_err());

        let payload = collect(&form).unwrap();
        assert!(payload.get("id").is_none());
        assert!(payload.get("created_at").is_none());
    }

    #[test]
    fn missing_control_fails_collection() {
        let mut record = sample_record();
        record.fields.remove("bot_id");
        let err = collect(&render(&record)).unwrap_err();
        assert_eq!(err.message, "Missing field: bot_id");
    }
}
