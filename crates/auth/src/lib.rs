use std::time::Duration;

use http::HeaderMap;
use http::header;
use serde_json::Value;
use sqlx::{PgPool, Row};
use wfconfig_schema::SessionUser;

pub const DEFAULT_COOKIE_NAME: &str = "workflow_session";

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl AuthError {
    fn unavailable(message: impl Into<String>) -> Self {
        Self {
            code: "ERR_AUTH_UNAVAILABLE",
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

/// A freshly issued session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub token: String,
    pub user: SessionUser,
}

/// Session checks backed by the database's `login`, `is_session_valid` and
/// `logout` procedures.
#[derive(Clone)]
pub struct SessionGate {
    pool: PgPool,
    login_sql: String,
    validate_sql: String,
    logout_sql: String,
    timeout: Duration,
}

impl SessionGate {
    /// `procedure_schema` qualifies the procedure names and must be a plain
    /// SQL identifier; `None` resolves them through the search path.
    pub fn new(pool: PgPool, procedure_schema: Option<&str>, timeout: Duration) -> Self {
        let qualify = |name: &str| match procedure_schema {
            Some(schema) => format!("{}.{}", schema, name),
            None => name.to_string(),
        };

        Self {
            pool,
            login_sql: format!(
                "SELECT ok, session_token::text AS session_token, to_jsonb(user_id) AS user_id, \
                 username::text AS username, role::text AS role FROM {}($1, $2)",
                qualify("login")
            ),
            validate_sql: format!(
                "SELECT ok, to_jsonb(user_id) AS user_id, username::text AS username, \
                 role::text AS role FROM {}($1::uuid)",
                qualify("is_session_valid")
            ),
            logout_sql: format!("SELECT {}($1::uuid)", qualify("logout")),
            timeout,
        }
    }

    /// Resolves a session token to its user. Absent, malformed, expired and
    /// revoked tokens all yield `Ok(None)`.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Option<SessionUser>, AuthError> {
        let Some(token) = token.filter(|t| is_uuid_shaped(t)) else {
            return Ok(None);
        };

        let row = tokio::time::timeout(
            self.timeout,
            sqlx::query(&self.validate_sql)
                .bind(token)
                .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| AuthError::unavailable("session check timed out"))?
        .map_err(|_| AuthError::unavailable("session check failed"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        if !row.try_get::<Option<bool>, _>("ok").ok().flatten().unwrap_or(false) {
            return Ok(None);
        }
        session_user(&row).map(Some)
    }

    /// Checks credentials; `Ok(None)` means they were rejected.
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<LoginGrant>, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Ok(None);
        }

        let row = tokio::time::timeout(
            self.timeout,
            sqlx::query(&self.login_sql)
                .bind(username)
                .bind(password)
                .fetch_optional(&self.pool),
        )
        .await
        .map_err(|_| AuthError::unavailable("login timed out"))?
        .map_err(|_| AuthError::unavailable("login failed"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        if !row.try_get::<Option<bool>, _>("ok").ok().flatten().unwrap_or(false) {
            return Ok(None);
        }

        let token = row
            .try_get::<Option<String>, _>("session_token")
            .ok()
            .flatten()
            .filter(|t| is_uuid_shaped(t))
            .ok_or_else(|| AuthError::unavailable("login returned no session token"))?;

        Ok(Some(LoginGrant {
            token,
            user: session_user(&row)?,
        }))
    }

    /// Revokes a session. Malformed tokens are ignored.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        if !is_uuid_shaped(token) {
            return Ok(());
        }

        tokio::time::timeout(
            self.timeout,
            sqlx::query(&self.logout_sql).bind(token).execute(&self.pool),
        )
        .await
        .map_err(|_| AuthError::unavailable("logout timed out"))?
        .map_err(|_| AuthError::unavailable("logout failed"))?;
        Ok(())
    }
}

fn session_user(row: &sqlx::postgres::PgRow) -> Result<SessionUser, AuthError> {
    let decode = |_| AuthError::unavailable("session procedure returned an unexpected row");
    Ok(SessionUser {
        id: row
            .try_get::<Option<Value>, _>("user_id")
            .map_err(decode)?
            .unwrap_or(Value::Null),
        username: row
            .try_get::<Option<String>, _>("username")
            .map_err(decode)?
            .unwrap_or_default(),
        role: row
            .try_get::<Option<String>, _>("role")
            .map_err(decode)?
            .unwrap_or_default(),
    })
}

/// `8-4-4-4-12` hex groups. Anything else never reaches the database.
pub fn is_uuid_shaped(token: &str) -> bool {
    let bytes = token.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    bytes.iter().enumerate().all(|(idx, b)| match idx {
        8 | 13 | 18 | 23 => *b == b'-',
        _ => b.is_ascii_hexdigit(),
    })
}

/// Value of the named cookie across all `Cookie` headers.
pub fn session_token_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| name.trim() == cookie_name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(cookie_name: &str, token: &str, secure: bool, max_age: Duration) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        cookie_name,
        token,
        max_age.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_session_cookie(cookie_name: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Lax",
        cookie_name
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}
