use wfconfig_schema::form::{self, FormState};
use wfconfig_schema::{ConfigRecord, Payload, SessionUser, ValidationError};

/// The persistent status line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Loading,
    Loaded(usize),
    Saving,
    Saved,
    Error(String),
}

impl Status {
    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error(_))
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Idle => Ok(()),
            Status::Loading => write!(f, "Loading..."),
            Status::Loaded(1) => write!(f, "1 record loaded"),
            Status::Loaded(n) => write!(f, "{n} records loaded"),
            Status::Saving => write!(f, "Saving..."),
            Status::Saved => write!(f, "Saved"),
            Status::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// The record being edited and its (possibly modified) form.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentRecord {
    pub id: i64,
    pub form: FormState,
}

#[derive(Debug, Clone, Default)]
pub struct EditorState {
    user: Option<SessionUser>,
    records: Vec<ConfigRecord>,
    current: Option<CurrentRecord>,
    status: Status,
}

impl EditorState {
    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    pub fn records(&self) -> &[ConfigRecord] {
        &self.records
    }

    /// Selector entries in list order: record id and its `#id · env · bot` label.
    pub fn choices(&self) -> Vec<(i64, String)> {
        self.records.iter().map(|r| (r.id, r.label())).collect()
    }

    pub fn current(&self) -> Option<&CurrentRecord> {
        self.current.as_ref()
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn signed_in(&mut self, user: SessionUser) {
        self.user = Some(user);
    }

    /// Replaces the record list. The current selection survives when its id
    /// is still present (re-rendered from the fresh row, so unsaved edits are
    /// dropped); otherwise the first record is selected.
    pub fn apply_records(&mut self, records: Vec<ConfigRecord>) {
        let keep = self
            .current
            .as_ref()
            .map(|current| current.id)
            .filter(|id| records.iter().any(|r| r.id == *id));
        self.status = Status::Loaded(records.len());
        self.records = records;
        self.current = None;

        let selected = keep.or_else(|| self.records.first().map(|r| r.id));
        if let Some(id) = selected {
            self.select(id);
        }
    }

    /// Renders the record with `id` into a fresh form. Returns false when no
    /// such record is loaded.
    pub fn select(&mut self, id: i64) -> bool {
        let Some(record) = self.records.iter().find(|r| r.id == id) else {
            return false;
        };
        self.current = Some(CurrentRecord {
            id,
            form: form::render(record),
        });
        true
    }

    pub fn edit(&mut self, field: &str, text: impl Into<String>) -> Result<(), ValidationError> {
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| ValidationError::not_editable(field))?;
        current.form.set_value(field, text)
    }

    /// Collects the current form for saving. On failure the status line shows
    /// the error and the form is left as it was.
    pub fn prepare_save(&mut self) -> Option<(i64, Result<Payload, ValidationError>)> {
        let current = self.current.as_ref()?;
        let id = current.id;
        let collected = form::collect(&current.form);
        self.status = match &collected {
            Ok(_) => Status::Saving,
            Err(err) => Status::Error(err.message.clone()),
        };
        Some((id, collected))
    }

    pub fn mark_saved(&mut self) {
        self.status = Status::Saved;
    }

    /// Back to the signed-out state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value, json};
    use wfconfig_schema::{FieldKind, registry};

    fn record(id: i64, env: &str) -> ConfigRecord {
        let mut fields = Map::new();
        for spec in registry::editable_fields() {
            let value = match spec.kind {
                FieldKind::Text => json!(format!("{} of {env}", spec.name)),
                FieldKind::Integer => json!(5),
                FieldKind::Numeric => json!(0.25),
                FieldKind::Json => json!({"lang": env}),
                FieldKind::Identifier | FieldKind::ReadOnly => Value::Null,
            };
            fields.insert(spec.name.to_string(), value);
        }
        fields.insert("env".to_string(), json!(env));
        ConfigRecord {
            id,
            created_at: Some("2024-01-01T00:00:00Z".to_string()),
            fields,
        }
    }

    fn first_text_field() -> &'static str {
        registry::editable_fields()
            .find(|spec| spec.kind == FieldKind::Text && spec.name != "env")
            .map(|spec| spec.name)
            .unwrap()
    }

    fn first_integer_field() -> &'static str {
        registry::editable_fields()
            .find(|spec| spec.kind == FieldKind::Integer)
            .map(|spec| spec.name)
            .unwrap()
    }

    #[test]
    fn first_record_is_selected_on_first_load() {
        let mut state = EditorState::default();
        state.apply_records(vec![record(3, "prod"), record(7, "dev")]);

        assert_eq!(state.current().map(|c| c.id), Some(3));
        assert_eq!(state.status(), &Status::Loaded(2));
        assert_eq!(state.status().to_string(), "2 records loaded");
    }

    #[test]
    fn choices_label_records_in_list_order() {
        let mut state = EditorState::default();
        assert!(state.choices().is_empty());

        let mut dev = record(7, "dev");
        dev.fields.insert("bot_id".to_string(), json!("bot-7"));
        state.apply_records(vec![record(3, "prod"), dev]);

        let choices = state.choices();
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].0, 3);
        assert_eq!(choices[1], (7, "#7 · dev · bot-7".to_string()));
    }

    #[test]
    fn reload_keeps_selection_when_id_survives() {
        let mut state = EditorState::default();
        state.apply_records(vec![record(3, "prod"), record(7, "dev")]);
        assert!(state.select(7));

        state.apply_records(vec![record(3, "prod"), record(7, "staging")]);
        let current = state.current().unwrap();
        assert_eq!(current.id, 7);
        assert_eq!(current.form.value("env"), Some("staging"));

        state.apply_records(vec![record(9, "qa")]);
        assert_eq!(state.current().map(|c| c.id), Some(9));

        state.apply_records(Vec::new());
        assert!(state.current().is_none());
        assert_eq!(state.status().to_string(), "0 records loaded");
    }

    #[test]
    fn select_discards_unsaved_edits() {
        let mut state = EditorState::default();
        state.apply_records(vec![record(3, "prod"), record(7, "dev")]);
        let field = first_text_field();

        state.edit(field, "changed").unwrap();
        assert_eq!(state.current().unwrap().form.value(field), Some("changed"));

        assert!(state.select(7));
        assert!(state.select(3));
        assert_eq!(
            state.current().unwrap().form.value(field),
            Some(format!("{field} of prod").as_str())
        );
        assert!(!state.select(42));
        assert_eq!(state.current().map(|c| c.id), Some(3));
    }

    #[test]
    fn read_only_fields_cannot_be_edited() {
        let mut state = EditorState::default();
        assert!(state.edit("env", "x").is_err());

        state.apply_records(vec![record(3, "prod")]);
        let err = state.edit("created_at", "yesterday").unwrap_err();
        assert_eq!(err.field, "created_at");
        assert!(state.edit("id", "4").is_err());
    }

    #[test]
    fn invalid_input_sets_error_and_keeps_form() {
        let mut state = EditorState::default();
        state.apply_records(vec![record(3, "prod")]);
        let field = first_integer_field();

        state.edit(field, "12abc").unwrap();
        let before = state.current().cloned();
        let (id, collected) = state.prepare_save().unwrap();
        assert_eq!(id, 3);
        let err = collected.unwrap_err();
        assert_eq!(err.field, field);
        assert!(state.status().is_error());
        assert_eq!(state.current().cloned(), before);
        assert_eq!(state.current().unwrap().form.value(field), Some("12abc"));
    }

    #[test]
    fn valid_form_moves_to_saving_then_saved() {
        let mut state = EditorState::default();
        assert!(state.prepare_save().is_none());

        state.apply_records(vec![record(3, "prod")]);
        let field = first_integer_field();
        state.edit(field, " 42 ").unwrap();

        let (_, collected) = state.prepare_save().unwrap();
        let payload = collected.unwrap();
        assert_eq!(payload.to_json_object().get(field), Some(&json!(42)));
        assert_eq!(state.status(), &Status::Saving);

        state.mark_saved();
        assert_eq!(state.status().to_string(), "Saved");
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = EditorState::default();
        state.signed_in(SessionUser {
            id: json!(1),
            username: "operator".to_string(),
            role: "admin".to_string(),
        });
        state.apply_records(vec![record(3, "prod")]);

        state.reset();
        assert!(state.user().is_none());
        assert!(state.records().is_empty());
        assert!(state.current().is_none());
        assert_eq!(state.status(), &Status::Idle);
    }
}
