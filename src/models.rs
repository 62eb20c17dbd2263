//! Core data structures: session records, typed cookie payloads, and the
//! authentication response body shared by the polling endpoint and the
//! password login handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side session record, owned by the storage collaborator.
///
/// Records are never physically deleted; a destroyed session keeps its row
/// with `expired` set so the id can never be re-issued to another principal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expired: bool,
}

/// Stored user account for the password login variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub disabled: bool,
}

/// Payload of the auth cookie.
///
/// The session id is carried as a string: a cookie minted before login is
/// provisional and the id is only parsed into a `Uuid` when a backing
/// record is looked up. `same_site_strict` is false only during the
/// cross-site leg of an OIDC redirect; `start_session` rewrites it back to
/// strict on the next first-party request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthCookieValue {
    pub session_id: String,
    pub same_site_strict: bool,
}

/// Payload of the double-submit XSRF cookie, mirrored by the client into
/// the XSRF request header on unsafe methods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct XsrfCookieValue {
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Payload of the short-lived OIDC flow cookie. Single use: the callback
/// deletes it regardless of outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OidcCookieValue {
    pub state: String,
    pub pkce_verifier: String,
    pub return_url: Option<String>,
}

/// Body returned by `GET /auth/authenticated` and `POST /auth/login`.
///
/// An unauthenticated caller gets `{"authenticated": false}` with status
/// 200 so polling clients can tell "not logged in" from a transport error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
}

impl AuthResponse {
    #[must_use]
    pub const fn unauthenticated() -> Self {
        Self {
            authenticated: false,
            username: None,
            permissions: None,
        }
    }

    #[must_use]
    pub fn authenticated(username: String, permissions: Vec<String>) -> Self {
        Self {
            authenticated: true,
            username: Some(username),
            permissions: Some(permissions),
        }
    }
}
