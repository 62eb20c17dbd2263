// OIDC flow handlers: login redirect, callback, front-channel logout
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error, info, warn};
use serde::Deserialize;

use crate::error::AuthError;
use crate::models::AuthCookieValue;
use crate::oidc::OidcClient;
use crate::roles::RoleReconciler;
use crate::session::{SessionService, XsrfGuard};
use crate::settings::GatehouseSettings;
use crate::utils::redirect::is_safe_return_url;

#[derive(Deserialize)]
pub struct OidcLoginQuery {
    /// Where to land after a successful login
    pub rd: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct FrontchannelLogoutQuery {
    pub sid: Option<String>,
}

/// Start the authorization-code flow: 302 to the IdP carrying the S256
/// challenge, with the flow state sealed into the OIDC cookie. The auth
/// cookie is reissued SameSite=None so it survives the cross-site
/// redirect back from the IdP.
///
/// # Errors
///
/// `NotFound` when OIDC is not configured; `Internal` on discovery or
/// sealing failures.
pub async fn oidc_login(
    req: HttpRequest,
    query: web::Query<OidcLoginQuery>,
    sessions: web::Data<SessionService>,
    oidc: web::Data<OidcClient>,
) -> Result<HttpResponse, AuthError> {
    if !oidc.settings().enabled {
        return Err(AuthError::not_found("OIDC login is not configured"));
    }

    let redirect = oidc.begin_login(query.into_inner().rd).await?;
    let oidc_cookie = sessions.cookies().oidc_cookie(&redirect.cookie_value)?;

    let started = sessions.start_session(&req, true)?;
    let auth_cookie = sessions.cookies().auth_cookie(&AuthCookieValue {
        session_id: started.session_id,
        same_site_strict: false,
    })?;

    debug!("Redirecting to OIDC authorization endpoint");
    Ok(HttpResponse::Found()
        .cookie(auth_cookie)
        .cookie(oidc_cookie)
        .append_header((header::LOCATION, redirect.authorization_url))
        .finish())
}

/// Authorization-code callback, reachable by GET (query) or POST
/// (`form_post` response mode).
///
/// The OIDC flow cookie is single use: an expired replacement rides on
/// every response out of here, success or not. No failure along this
/// path renders an error page; everything becomes a 302 to the login URL
/// with a human-readable `message` parameter.
///
/// # Errors
///
/// Returns `Internal` only when building a response cookie fails.
pub async fn oidc_callback(
    req: HttpRequest,
    query: web::Query<CallbackParams>,
    form: Option<web::Form<CallbackParams>>,
    sessions: web::Data<SessionService>,
    xsrf: web::Data<XsrfGuard>,
    oidc: web::Data<OidcClient>,
    reconciler: web::Data<RoleReconciler>,
    settings: web::Data<GatehouseSettings>,
) -> Result<HttpResponse, AuthError> {
    let params = form.map_or_else(|| query.into_inner(), web::Form::into_inner);
    let login_url = &settings.oidc.login_url;
    let cookies = sessions.cookies();

    // Single use regardless of outcome
    let flow = cookies.read_oidc(&req);
    let expired_oidc = cookies.expired_oidc_cookie();

    let Some(flow) = flow else {
        warn!("OIDC callback without a readable flow cookie");
        return Ok(login_redirect(login_url, "Login flow expired", expired_oidc));
    };

    if let Some(idp_error) = params.error {
        warn!("IdP returned an error on callback: {idp_error}");
        return Ok(login_redirect(login_url, "Login was cancelled", expired_oidc));
    }

    // State mismatch is Forbidden territory, surfaced as a login redirect
    if params.state.as_deref() != Some(flow.state.as_str()) {
        warn!("OIDC callback state mismatch");
        return Ok(login_redirect(
            login_url,
            "Invalid 'state' parameter value",
            expired_oidc,
        ));
    }

    let Some(code) = params.code else {
        warn!("OIDC callback without an authorization code");
        return Ok(login_redirect(
            login_url,
            "Missing authorization code",
            expired_oidc,
        ));
    };

    let raw_token = match oidc.exchange_code(&code, &flow.pkce_verifier).await {
        Ok(token) => token,
        Err(e) => {
            error!("OIDC code exchange failed: {e}");
            return Ok(login_redirect(login_url, "Login failed", expired_oidc));
        }
    };

    let claims = match oidc.verify_id_token(&raw_token).await {
        Ok(claims) => claims,
        Err(e) => {
            error!("ID token rejected: {e}");
            return Ok(login_redirect(login_url, "Login failed", expired_oidc));
        }
    };
    let username = claims.username().to_string();

    let session_id = match sessions
        .store()
        .new_session(&username, claims.sid.as_deref())
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to create session for '{username}': {e}");
            return Ok(login_redirect(login_url, "Login failed", expired_oidc));
        }
    };

    let outcome = match reconciler.reconcile(&username, &claims.roles).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Role reconciliation failed for '{username}': {e}");
            return Ok(login_redirect(login_url, "Login failed", expired_oidc));
        }
    };
    if !outcome.has_any_role {
        // Authenticated but authorized for nothing: no cookies issued
        warn!("User '{username}' logged in with no valid role grants");
        return Ok(login_redirect(
            login_url,
            "No roles are assigned to your account",
            expired_oidc,
        ));
    }

    // Still inside the cross-site redirect, so the auth cookie stays
    // SameSite=None; the next first-party request upgrades it to Strict.
    let auth_cookie = cookies.auth_cookie(&AuthCookieValue {
        session_id: session_id.to_string(),
        same_site_strict: false,
    })?;
    let xsrf_cookie = xsrf.create_cookie(&session_id.to_string())?;

    // Re-checked here so a sealed flow cookie never becomes a redirect
    // to another origin, whatever sealed it
    let destination = flow
        .return_url
        .filter(|url| is_safe_return_url(url))
        .unwrap_or_else(|| settings.oidc.post_login_url.clone());
    info!("User '{username}' logged in via OIDC");

    Ok(HttpResponse::Found()
        .cookie(expired_oidc)
        .cookie(auth_cookie)
        .cookie(xsrf_cookie)
        .append_header((header::LOCATION, destination))
        .finish())
}

/// IdP-initiated front-channel logout. Expires the sessions correlated
/// to the reported IdP session id; storage trouble is logged, never
/// surfaced to the IdP.
///
/// # Errors
///
/// `BadRequest` when the `sid` query parameter is missing.
pub async fn frontchannel_logout(
    query: web::Query<FrontchannelLogoutQuery>,
    sessions: web::Data<SessionService>,
) -> Result<HttpResponse, AuthError> {
    let Some(sid) = query.into_inner().sid else {
        return Err(AuthError::bad_request("missing 'sid' parameter"));
    };

    if let Err(e) = sessions.store().destroy_session_oidc(&sid).await {
        error!("Front-channel logout for sid '{sid}' failed: {e}");
    } else {
        info!("Front-channel logout for sid '{sid}'");
    }
    Ok(HttpResponse::Ok().finish())
}

/// 302 to the login URL with a percent-encoded `message` parameter,
/// clearing the single-use OIDC flow cookie.
fn login_redirect(
    login_url: &str,
    message: &str,
    expired_oidc: actix_web::cookie::Cookie<'static>,
) -> HttpResponse {
    let location = format!("{login_url}?message={}", urlencoding::encode(message));
    HttpResponse::Found()
        .cookie(expired_oidc)
        .append_header((header::LOCATION, location))
        .finish()
}
