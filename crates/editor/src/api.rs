use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::Instrument;
use wfconfig_schema::{ConfigRecord, Payload, SessionUser};

/// Failure talking to the gateway. `status` is absent when no response was
/// received at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    pub status: Option<u16>,
    pub message: String,
}

impl ClientError {
    fn transport(err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "gateway unreachable".to_string()
        } else {
            "request failed".to_string()
        };
        Self {
            status: None,
            message,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(StatusCode::UNAUTHORIZED.as_u16())
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ClientError {}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    user: SessionUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    logged_in: bool,
    #[serde(default)]
    user: Option<SessionUser>,
}

/// HTTP client for the editor API. The session cookie issued by `login` is
/// kept in the client's cookie store and replayed on every later call.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::transport(&err))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<SessionUser, ClientError> {
        let body = serde_json::json!({
            "username": username.trim(),
            "password": password,
        });
        let response = self
            .send(Method::POST, "/api/login", Some(&body))
            .await?;
        let login: LoginResponse = read_json(response).await?;
        Ok(login.user)
    }

    pub async fn logout(&self) -> Result<(), ClientError> {
        let response = self.send(Method::POST, "/api/logout", None).await?;
        read_json::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// The signed-in user, if the stored cookie still names a live session.
    pub async fn session(&self) -> Result<Option<SessionUser>, ClientError> {
        let response = self.send(Method::GET, "/api/session", None).await?;
        let session: SessionResponse = read_json(response).await?;
        Ok(session.user.filter(|_| session.logged_in))
    }

    pub async fn list_configs(&self) -> Result<Vec<ConfigRecord>, ClientError> {
        let response = self.send(Method::GET, "/api/configs", None).await?;
        read_json(response).await
    }

    pub async fn update_config(&self, id: i64, payload: &Payload) -> Result<(), ClientError> {
        let body = serde_json::to_value(payload).map_err(|err| ClientError {
            status: None,
            message: format!("failed to encode payload: {err}"),
        })?;
        let response = self
            .send(Method::PUT, &format!("/api/configs/{id}"), Some(&body))
            .await?;
        read_json::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ClientError> {
        let span = tracing::debug_span!(
            "editor.api",
            method = %method,
            path = %path,
            status = tracing::field::Empty,
        );
        async {
            let mut builder = self
                .http
                .request(method, format!("{}{}", self.base_url, path));
            if let Some(body) = body {
                builder = builder.json(body);
            }
            let response = builder
                .send()
                .await
                .map_err(|err| ClientError::transport(&err))?;
            tracing::Span::current().record("status", response.status().as_u16());
            Ok(response)
        }
        .instrument(span)
        .await
    }
}

/// Decodes a success body, or turns an error response into a [`ClientError`]
/// carrying the server's `error` message (falling back to `HTTP <status>`).
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| ClientError::transport(&err))?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .ok()
            .and_then(|body| body.error)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        return Err(ClientError {
            status: Some(status.as_u16()),
            message,
        });
    }

    serde_json::from_slice(&bytes).map_err(|_| ClientError {
        status: Some(status.as_u16()),
        message: "malformed response from gateway".to_string(),
    })
}
