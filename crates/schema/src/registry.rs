//! Column descriptor for the `workflow_config` table.
//!
//! `FIELDS` is the only place column names and kinds are written down. The
//! editable allow-list, the form renderer/collector, server-side payload
//! parsing and the store's SQL are all derived from it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Identifier,
    ReadOnly,
    Text,
    Integer,
    Numeric,
    Json,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Identifier => "identifier",
            FieldKind::ReadOnly => "read_only",
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Numeric => "numeric",
            FieldKind::Json => "json",
        }
    }

    pub fn is_editable(self) -> bool {
        !matches!(self, FieldKind::Identifier | FieldKind::ReadOnly)
    }

    /// Postgres type an update parameter of this kind is cast to.
    pub fn sql_cast(self) -> Option<&'static str> {
        match self {
            FieldKind::Identifier => Some("bigint"),
            FieldKind::Integer => Some("integer"),
            FieldKind::Numeric => Some("numeric"),
            FieldKind::Json => Some("jsonb"),
            FieldKind::ReadOnly | FieldKind::Text => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

pub const ID_FIELD: &str = "id";
pub const CREATED_AT_FIELD: &str = "created_at";

/// Table columns in table order.
pub const FIELDS: &[FieldSpec] = &[
    field(ID_FIELD, FieldKind::Identifier),
    field(CREATED_AT_FIELD, FieldKind::ReadOnly),
    field("env", FieldKind::Text),
    field("bot_id", FieldKind::Text),
    field("language_rules", FieldKind::Json),
    field("language_confidence", FieldKind::Numeric),
    field("llm_prompt_language_detector", FieldKind::Text),
    field("llm_prompt_return_schema", FieldKind::Json),
    field("tipus_resposta", FieldKind::Integer),
    field("json_structured_output_parser_0", FieldKind::Json),
    field("json_structured_output_parser_1", FieldKind::Json),
    field("json_structured_output_parser_2", FieldKind::Json),
    field("prompt_system_message_ca", FieldKind::Text),
    field("prompt_system_message_es", FieldKind::Text),
    field("prompt_system_message_fr", FieldKind::Text),
    field("prompt_system_message_en", FieldKind::Text),
    field("user_prompt_templates_ca", FieldKind::Json),
    field("user_prompt_templates_es", FieldKind::Json),
    field("user_prompt_templates_fr", FieldKind::Json),
    field("user_prompt_templates_en", FieldKind::Json),
    field("llm_get_language", FieldKind::Text),
    field("llm_get_response", FieldKind::Text),
    field("llm_get_response_temperature", FieldKind::Numeric),
    field("db_vectorial_collection", FieldKind::Text),
    field("qdrant_top_k", FieldKind::Integer),
    field("embeddings_model_name", FieldKind::Text),
    field("whatsapp_max_chars", FieldKind::Integer),
    field("whatsapp_send_delay_seconds", FieldKind::Integer),
    field("whatsapp_labels_ca", FieldKind::Json),
    field("whatsapp_labels_es", FieldKind::Json),
    field("whatsapp_labels_fr", FieldKind::Json),
    field("whatsapp_labels_en", FieldKind::Json),
];

pub fn spec_of(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|spec| spec.name == name)
}

pub fn kind_of(name: &str) -> Option<FieldKind> {
    spec_of(name).map(|spec| spec.kind)
}

pub fn is_editable(name: &str) -> bool {
    kind_of(name).is_some_and(FieldKind::is_editable)
}

/// The editable allow-list, in table order.
pub fn editable_fields() -> impl Iterator<Item = &'static FieldSpec> + Clone {
    FIELDS.iter().filter(|spec| spec.kind.is_editable())
}

pub fn editable_field_count() -> usize {
    editable_fields().count()
}

/// Lowercase unquoted SQL identifier (`[a-z_][a-z0-9_]*`, at most 63 bytes).
pub fn is_sql_identifier(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    if !matches!(bytes[0], b'a'..=b'z' | b'_') {
        return false;
    }
    bytes
        .iter()
        .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_'))
}

/// `table` or `schema.table`, each part a plain identifier.
pub fn is_qualified_identifier(s: &str) -> bool {
    match s.split_once('.') {
        Some((schema, table)) => is_sql_identifier(schema) && is_sql_identifier(table),
        None => is_sql_identifier(s),
    }
}
