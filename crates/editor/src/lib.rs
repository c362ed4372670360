//! Client-side controller for the workflow configuration editor.
//!
//! [`Editor`] pairs an [`ApiClient`] with an explicit [`EditorState`]; every
//! user action is one method that talks to the gateway and then applies a
//! state transition. The state itself never does I/O.

pub mod api;
pub mod state;

pub use api::{ApiClient, ClientError};
pub use state::{CurrentRecord, EditorState, Status};

use wfconfig_schema::ValidationError;

#[derive(Debug)]
pub enum EditorError {
    /// The form could not be collected; nothing was sent.
    Validation(ValidationError),
    Client(ClientError),
    NoSelection,
}

impl std::fmt::Display for EditorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditorError::Validation(err) => write!(f, "{err}"),
            EditorError::Client(err) => write!(f, "{err}"),
            EditorError::NoSelection => write!(f, "no record selected"),
        }
    }
}

impl std::error::Error for EditorError {}

impl From<ValidationError> for EditorError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ClientError> for EditorError {
    fn from(value: ClientError) -> Self {
        Self::Client(value)
    }
}

pub struct Editor {
    api: ApiClient,
    state: EditorState,
}

impl Editor {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            state: EditorState::default(),
        }
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EditorState {
        &mut self.state
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), EditorError> {
        let user = match self.api.login(username, password).await {
            Ok(user) => user,
            Err(err) => {
                self.state.set_status(Status::Error(err.message.clone()));
                return Err(err.into());
            }
        };
        tracing::debug!(username = %user.username, "editor signed in");
        self.state.signed_in(user);
        self.reload().await
    }

    /// Resumes a session held by the client's cookie store. Returns whether
    /// one was found; records are loaded when it was.
    pub async fn restore_session(&mut self) -> Result<bool, EditorError> {
        let user = match self.api.session().await {
            Ok(Some(user)) => user,
            Ok(None) => return Ok(false),
            Err(err) => {
                self.state.set_status(Status::Error(err.message.clone()));
                return Err(err.into());
            }
        };
        self.state.signed_in(user);
        self.reload().await?;
        Ok(true)
    }

    /// Fetches the record list again. The selection is kept when the record
    /// still exists; unsaved edits are discarded.
    pub async fn reload(&mut self) -> Result<(), EditorError> {
        self.state.set_status(Status::Loading);
        match self.api.list_configs().await {
            Ok(records) => {
                self.state.apply_records(records);
                Ok(())
            }
            Err(err) => {
                self.state.set_status(Status::Error(err.message.clone()));
                Err(err.into())
            }
        }
    }

    /// Collects the form, writes it, and reloads with the same record
    /// selected. A form that fails to collect is never sent.
    pub async fn save(&mut self) -> Result<(), EditorError> {
        let (id, collected) = self.state.prepare_save().ok_or(EditorError::NoSelection)?;
        let payload = collected?;

        if let Err(err) = self.api.update_config(id, &payload).await {
            self.state.set_status(Status::Error(err.message.clone()));
            return Err(err.into());
        }
        tracing::debug!(record_id = id, "config record saved");

        self.reload().await?;
        self.state.select(id);
        self.state.mark_saved();
        Ok(())
    }

    /// Signs out. Failures talking to the gateway are ignored; local state is
    /// always cleared.
    pub async fn logout(&mut self) {
        if let Err(err) = self.api.logout().await {
            tracing::debug!(status = ?err.status, error = %err.message, "logout request failed");
        }
        self.state.reset();
    }
}
