// Session-facing handlers: status polling, password login, logout
use actix_web::cookie::Cookie;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, info};
use serde::Deserialize;

use crate::error::AuthError;
use crate::models::{AuthCookieValue, AuthResponse};
use crate::password::PasswordAuth;
use crate::session::lifecycle::collect_permissions;
use crate::session::{SessionService, XsrfCheck, XsrfGuard};
use crate::storage::RoleStore;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Health check handler
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
    }))
}

/// Authentication status for polling clients. Always 200: an absent or
/// stale session reads as `{"authenticated": false}`, never 401.
///
/// As the first-party safe request of the surface it also runs the cookie
/// maintenance pass: a missing or malformed auth cookie is replaced, one
/// left SameSite=None by the OIDC redirect is rewritten to Strict, and a
/// near-expiry XSRF cookie is reissued.
///
/// # Errors
///
/// Returns an error only on a storage backend or sealing failure.
pub async fn authenticated(
    req: HttpRequest,
    sessions: web::Data<SessionService>,
    xsrf: web::Data<XsrfGuard>,
    roles: web::Data<dyn RoleStore>,
) -> Result<HttpResponse, AuthError> {
    let started = sessions.start_session(&req, false)?;
    let xsrf_cookie = xsrf.refresh_cookie(&req, &started.session_id)?;

    let body = sessions.authenticated(&req, &roles.into_inner()).await?;

    let mut builder = HttpResponse::Ok();
    if let Some(cookie) = started.cookie {
        builder.cookie(cookie);
    }
    if let Some(cookie) = xsrf_cookie {
        builder.cookie(cookie);
    }
    Ok(builder.json(body))
}

/// Password login handler. XSRF-guarded; on success the provisional
/// session id is discarded in favor of a fresh authenticated one, with
/// new auth and XSRF cookies bound to it.
///
/// # Errors
///
/// Returns `Forbidden` on an invalid XSRF pair and `Internal` on storage
/// or sealing failures. Bad credentials are not an error: they flatten
/// into a 200 unauthenticated body.
pub async fn password_login(
    req: HttpRequest,
    body: web::Json<LoginRequest>,
    sessions: web::Data<SessionService>,
    xsrf: web::Data<XsrfGuard>,
    auth: web::Data<PasswordAuth>,
    roles: web::Data<dyn RoleStore>,
) -> Result<HttpResponse, AuthError> {
    let started = sessions.start_session(&req, false)?;
    let refreshed_xsrf = match xsrf.guard(&req, &started.session_id)? {
        XsrfCheck::Retry(cookie) => {
            return Ok(retry_same_uri(&req, started.cookie, cookie));
        }
        XsrfCheck::Accepted(cookie) => cookie,
    };

    let user = match auth.login(&body.username, &body.password).await {
        Ok(user) => user,
        Err(err) if err.is_unauthorized() => {
            debug!("Password login rejected for '{}'", body.username);
            // Cookie maintenance still applies to a rejected attempt
            let mut builder = HttpResponse::Ok();
            if let Some(cookie) = started.cookie {
                builder.cookie(cookie);
            }
            if let Some(cookie) = refreshed_xsrf {
                builder.cookie(cookie);
            }
            return Ok(builder.json(AuthResponse::unauthenticated()));
        }
        Err(err) => return Err(err),
    };

    let session_id = sessions.store().new_session(&user.username, None).await?;
    let auth_cookie = sessions.cookies().auth_cookie(&AuthCookieValue {
        session_id: session_id.to_string(),
        same_site_strict: true,
    })?;
    let xsrf_cookie = xsrf.create_cookie(&session_id.to_string())?;

    let roles = roles.into_inner();
    let permissions = collect_permissions(&roles, &user.username).await?;
    info!("User '{}' logged in with password", user.username);

    Ok(HttpResponse::Ok()
        .cookie(auth_cookie)
        .cookie(xsrf_cookie)
        .json(AuthResponse::authenticated(user.username, permissions)))
}

/// Logout handler. XSRF-guarded like every unsafe method; destroying a
/// session that storage does not know is a 404, not a silent success.
///
/// # Errors
///
/// `NotFound("session not found")` when there is nothing to destroy;
/// `Forbidden` on an invalid XSRF pair; `Internal` on backend failures.
pub async fn logout(
    req: HttpRequest,
    sessions: web::Data<SessionService>,
    xsrf: web::Data<XsrfGuard>,
) -> Result<HttpResponse, AuthError> {
    let started = sessions.start_session(&req, false)?;
    match xsrf.guard(&req, &started.session_id)? {
        XsrfCheck::Retry(cookie) => {
            return Ok(retry_same_uri(&req, started.cookie, cookie));
        }
        // A refreshed cookie would be moot: both cookies are expired below
        XsrfCheck::Accepted(_) => {}
    }

    sessions.logout(&req).await?;
    info!("Session {} logged out", started.session_id);

    Ok(HttpResponse::Ok()
        .cookie(sessions.cookies().expired_auth_cookie())
        .cookie(sessions.cookies().expired_xsrf_cookie())
        .finish())
}

/// 307 back to the same URI, handing the client the cookies it needs for
/// exactly one retry. 307 keeps the method and body intact, unlike 302.
pub(super) fn retry_same_uri(
    req: &HttpRequest,
    auth_cookie: Option<Cookie<'static>>,
    xsrf_cookie: Cookie<'static>,
) -> HttpResponse {
    let mut builder = HttpResponse::TemporaryRedirect();
    builder.append_header((header::LOCATION, req.uri().to_string()));
    if let Some(cookie) = auth_cookie {
        builder.cookie(cookie);
    }
    builder.cookie(xsrf_cookie).finish()
}
