//! Session lifecycle: issuance, validation, activity throttling, logout

use std::collections::BTreeSet;
use std::sync::Arc;

use actix_web::cookie::Cookie;
use actix_web::HttpRequest;
use chrono::{Duration, Utc};
use log::{debug, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::{AuthCookieValue, AuthResponse, SessionRecord};
use crate::session::cookie::CookieFactory;
use crate::storage::{RoleStore, SessionStore, StoreError};

/// Floor between activity writes. Rapid polling within this window skips
/// the storage call, capping write amplification while keeping the idle
/// timeout accurate to within the floor.
pub const ACTIVITY_UPDATE_FLOOR_SECONDS: i64 = 5;

/// Result of `start_session`: the session id the request now carries, and
/// the cookie to set when one was minted or rewritten.
pub struct StartedSession {
    pub session_id: String,
    pub cookie: Option<Cookie<'static>>,
}

/// The session lifecycle state machine.
///
/// Provisional (cookie, no record) → active (record, strict cookie) →
/// expired. The service owns no state of its own; session truth lives
/// entirely in the storage collaborator.
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    cookies: CookieFactory,
    session_timeout: Duration,
}

impl SessionService {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, cookies: CookieFactory, timeout_seconds: u64) -> Self {
        Self {
            store,
            cookies,
            session_timeout: Duration::seconds(i64::try_from(timeout_seconds).unwrap_or(1800)),
        }
    }

    #[must_use]
    pub fn cookies(&self) -> &CookieFactory {
        &self.cookies
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Ensure the request carries a usable auth cookie.
    ///
    /// A missing cookie, or one whose session id is not a syntactically
    /// valid UUID, gets a freshly minted id and a strict cookie. A cookie
    /// left on SameSite=None by an OIDC redirect is rewritten to strict
    /// once the request is no longer part of that flow.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if cookie sealing fails.
    pub fn start_session(
        &self,
        req: &HttpRequest,
        in_oidc_flow: bool,
    ) -> Result<StartedSession, AuthError> {
        if let Some(existing) = self.cookies.read_auth(req) {
            if Uuid::parse_str(&existing.session_id).is_ok() {
                if !existing.same_site_strict && !in_oidc_flow {
                    debug!("Upgrading auth cookie back to SameSite=Strict");
                    let value = AuthCookieValue {
                        session_id: existing.session_id.clone(),
                        same_site_strict: true,
                    };
                    let cookie = self.cookies.auth_cookie(&value)?;
                    return Ok(StartedSession {
                        session_id: existing.session_id,
                        cookie: Some(cookie),
                    });
                }
                return Ok(StartedSession {
                    session_id: existing.session_id,
                    cookie: None,
                });
            }
            debug!("Auth cookie carries a malformed session id; reminting");
        }

        let session_id = Uuid::new_v4().to_string();
        let value = AuthCookieValue {
            session_id: session_id.clone(),
            same_site_strict: true,
        };
        let cookie = self.cookies.auth_cookie(&value)?;
        Ok(StartedSession {
            session_id,
            cookie: Some(cookie),
        })
    }

    /// Session id carried by the request's auth cookie, if it parses.
    #[must_use]
    pub fn current_session_id(&self, req: &HttpRequest) -> Option<Uuid> {
        let value = self.cookies.read_auth(req)?;
        Uuid::parse_str(&value.session_id).ok()
    }

    /// Validate the request's session against storage.
    ///
    /// A missing record reads as `Unauthorized("invalid session")`; an
    /// expired or idled-out one as `Unauthorized("session expired")`.
    /// Activity is only written back when the record is older than the
    /// throttle floor.
    ///
    /// # Errors
    ///
    /// `Unauthorized` as above; `Internal` on a storage backend failure.
    pub async fn validate_session(&self, req: &HttpRequest) -> Result<SessionRecord, AuthError> {
        let id = self
            .current_session_id(req)
            .ok_or_else(|| AuthError::unauthorized("invalid session"))?;

        let record = match self.store.session(id).await {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                return Err(AuthError::unauthorized("invalid session"));
            }
            Err(err) => return Err(err.into()),
        };

        let now = Utc::now();
        let idle = now - record.updated_at;
        if record.expired || idle > self.session_timeout {
            return Err(AuthError::unauthorized("session expired"));
        }

        if idle > Duration::seconds(ACTIVITY_UPDATE_FLOOR_SECONDS) {
            match self.store.update_session_activity(id).await {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(record)
    }

    /// Destroy the request's session.
    ///
    /// Not idempotent by design: a session storage does not know surfaces
    /// as `NotFound` (404) rather than being swallowed.
    ///
    /// # Errors
    ///
    /// `NotFound` when there is no session to destroy; `Internal` on a
    /// backend failure.
    pub async fn logout(&self, req: &HttpRequest) -> Result<(), AuthError> {
        let id = self
            .current_session_id(req)
            .ok_or_else(|| AuthError::not_found("session not found"))?;

        match self.store.destroy_session(id).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(AuthError::not_found("session not found")),
            Err(err) => Err(err.into()),
        }
    }

    /// Authentication status for polling clients.
    ///
    /// Flattens `Unauthorized` into a 200 `{"authenticated": false}` body
    /// so login state never reads as a transport error; all other errors
    /// propagate normally.
    ///
    /// # Errors
    ///
    /// Returns any non-`Unauthorized` validation or role-provider failure.
    pub async fn authenticated(
        &self,
        req: &HttpRequest,
        roles: &Arc<dyn RoleStore>,
    ) -> Result<AuthResponse, AuthError> {
        let record = match self.validate_session(req).await {
            Ok(record) => record,
            Err(err) if err.is_unauthorized() => {
                return Ok(AuthResponse::unauthenticated());
            }
            Err(err) => return Err(err),
        };

        let permissions = collect_permissions(roles, &record.username).await?;
        Ok(AuthResponse::authenticated(record.username, permissions))
    }
}

/// Flatten a user's role grants across all domains into a sorted,
/// deduplicated permission list for the auth response body.
pub async fn collect_permissions(
    roles: &Arc<dyn RoleStore>,
    username: &str,
) -> Result<Vec<String>, AuthError> {
    let domains = roles.domains().await.map_err(AuthError::from)?;
    let grants = roles
        .user_roles(username, &domains)
        .await
        .map_err(AuthError::from)?;

    let merged: BTreeSet<String> = grants.into_values().flatten().collect();
    if merged.is_empty() {
        warn!("User '{username}' authenticated with no role grants in any domain");
    }
    Ok(merged.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryRoleStore, MemorySessionStore};
    use crate::testing::fixtures::TestFixtures;
    use actix_web::test::TestRequest;

    fn service_with_store() -> (SessionService, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let service = SessionService::new(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            TestFixtures::cookie_factory(),
            1800,
        );
        (service, store)
    }

    fn request_with_auth_cookie(service: &SessionService, value: &AuthCookieValue) -> HttpRequest {
        let cookie = service.cookies().auth_cookie(value).unwrap();
        TestRequest::get().cookie(cookie).to_http_request()
    }

    #[test]
    fn test_start_session_mints_valid_uuid_without_cookie() {
        let (service, _) = service_with_store();
        let req = TestRequest::get().to_http_request();

        let started = service.start_session(&req, false).unwrap();

        assert!(Uuid::parse_str(&started.session_id).is_ok());
        let cookie = started.cookie.expect("fresh session must set a cookie");
        assert_eq!(
            cookie.same_site(),
            Some(actix_web::cookie::SameSite::Strict)
        );
    }

    #[test]
    fn test_start_session_remints_on_malformed_session_id() {
        let (service, _) = service_with_store();
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: "not-a-uuid".to_string(),
                same_site_strict: true,
            },
        );

        let started = service.start_session(&req, false).unwrap();
        assert!(Uuid::parse_str(&started.session_id).is_ok());
        assert_ne!(started.session_id, "not-a-uuid");
        assert!(started.cookie.is_some());
    }

    #[test]
    fn test_start_session_keeps_valid_strict_cookie() {
        let (service, _) = service_with_store();
        let id = Uuid::new_v4().to_string();
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: id.clone(),
                same_site_strict: true,
            },
        );

        let started = service.start_session(&req, false).unwrap();
        assert_eq!(started.session_id, id);
        assert!(started.cookie.is_none());
    }

    #[test]
    fn test_start_session_upgrades_same_site_outside_oidc_flow() {
        let (service, _) = service_with_store();
        let id = Uuid::new_v4().to_string();
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: id.clone(),
                same_site_strict: false,
            },
        );

        let started = service.start_session(&req, false).unwrap();
        assert_eq!(started.session_id, id);
        let cookie = started.cookie.expect("upgrade must rewrite the cookie");
        assert_eq!(
            cookie.same_site(),
            Some(actix_web::cookie::SameSite::Strict)
        );

        // Inside the flow the relaxed cookie is left alone
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: id,
                same_site_strict: false,
            },
        );
        let started = service.start_session(&req, true).unwrap();
        assert!(started.cookie.is_none());
    }

    #[tokio::test]
    async fn test_validate_unknown_session_is_invalid() {
        let (service, _) = service_with_store();
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: Uuid::new_v4().to_string(),
                same_site_strict: true,
            },
        );

        let err = service.validate_session(&req).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(msg) if msg == "invalid session"));
    }

    #[tokio::test]
    async fn test_validate_expired_flag_and_idle_timeout() {
        let (service, store) = service_with_store();

        let expired = TestFixtures::session_record("alice", 0, true);
        store.insert(expired.clone(), None);
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: expired.id.to_string(),
                same_site_strict: true,
            },
        );
        let err = service.validate_session(&req).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(msg) if msg == "session expired"));

        let idle = TestFixtures::session_record("alice", 3600, false);
        store.insert(idle.clone(), None);
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: idle.id.to_string(),
                same_site_strict: true,
            },
        );
        let err = service.validate_session(&req).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(msg) if msg == "session expired"));
    }

    #[tokio::test]
    async fn test_validate_throttles_activity_writes() {
        let (service, store) = service_with_store();

        // Updated 2s ago: within the floor, no activity write
        let fresh = TestFixtures::session_record("alice", 2, false);
        store.insert(fresh.clone(), None);
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: fresh.id.to_string(),
                same_site_strict: true,
            },
        );
        service.validate_session(&req).await.unwrap();
        let after = store.session(fresh.id).await.unwrap();
        assert_eq!(after.updated_at, fresh.updated_at);

        // Updated 30s ago: beyond the floor, activity is written
        let stale = TestFixtures::session_record("alice", 30, false);
        store.insert(stale.clone(), None);
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: stale.id.to_string(),
                same_site_strict: true,
            },
        );
        service.validate_session(&req).await.unwrap();
        let after = store.session(stale.id).await.unwrap();
        assert!(after.updated_at > stale.updated_at);
    }

    #[tokio::test]
    async fn test_logout_surfaces_not_found() {
        let (service, store) = service_with_store();

        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: Uuid::new_v4().to_string(),
                same_site_strict: true,
            },
        );
        let err = service.logout(&req).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(msg) if msg == "session not found"));

        let record = TestFixtures::session_record("alice", 0, false);
        store.insert(record.clone(), None);
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: record.id.to_string(),
                same_site_strict: true,
            },
        );
        service.logout(&req).await.unwrap();
        assert!(store.session(record.id).await.unwrap().expired);
    }

    #[tokio::test]
    async fn test_authenticated_flattens_unauthorized() {
        let (service, store) = service_with_store();
        let roles: Arc<dyn RoleStore> = Arc::new(MemoryRoleStore::new());

        let req = TestRequest::get().to_http_request();
        let body = service.authenticated(&req, &roles).await.unwrap();
        assert_eq!(body, AuthResponse::unauthenticated());

        let record = TestFixtures::session_record("alice", 0, false);
        store.insert(record.clone(), None);
        let req = request_with_auth_cookie(
            &service,
            &AuthCookieValue {
                session_id: record.id.to_string(),
                same_site_strict: true,
            },
        );
        let body = service.authenticated(&req, &roles).await.unwrap();
        assert!(body.authenticated);
        assert_eq!(body.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_collect_permissions_merges_domains() {
        let store = Arc::new(MemoryRoleStore::new());
        store.define_domain("reports", &["viewer", "editor"]);
        store.define_domain("billing", &["viewer"]);
        store.grant("reports", "alice", &["editor", "viewer"]);
        store.grant("billing", "alice", &["viewer"]);

        let roles: Arc<dyn RoleStore> = store;
        let permissions = collect_permissions(&roles, "alice").await.unwrap();
        assert_eq!(permissions, vec!["editor".to_string(), "viewer".to_string()]);
    }
}
