//! Double-submit XSRF guard
//!
//! The token is the session id, sealed into a client-readable cookie and
//! mirrored by the client into a request header on unsafe methods. The
//! guard validates that cookie and header independently decode to the
//! authenticated session's id, failing closed on any single mismatch.

use actix_web::cookie::Cookie;
use actix_web::http::Method;
use actix_web::HttpRequest;
use chrono::{Duration, Utc};
use log::debug;

use crate::error::AuthError;
use crate::models::XsrfCookieValue;
use crate::session::cookie::CookieFactory;

/// Outcome of guarding a request.
#[derive(Debug)]
pub enum XsrfCheck {
    /// Request may proceed; carries a replacement cookie when the existing
    /// one was missing, stale, or near expiry.
    Accepted(Option<Cookie<'static>>),
    /// Unsafe request arrived before the client ever held an XSRF cookie.
    /// The caller should answer 307 to the same URI with this cookie set,
    /// giving the client exactly one retry with the cookie present.
    Retry(Cookie<'static>),
}

#[derive(Clone)]
pub struct XsrfGuard {
    cookies: CookieFactory,
    header_name: String,
    ttl: Duration,
    rewrite_window: Duration,
}

impl XsrfGuard {
    #[must_use]
    pub fn new(
        cookies: CookieFactory,
        header_name: String,
        ttl_seconds: u64,
        rewrite_window_seconds: u64,
    ) -> Self {
        Self {
            cookies,
            header_name,
            ttl: Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(43200)),
            rewrite_window: Duration::seconds(
                i64::try_from(rewrite_window_seconds).unwrap_or(3600),
            ),
        }
    }

    #[must_use]
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Issue a fresh XSRF cookie bound to `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if sealing fails.
    pub fn create_cookie(&self, session_id: &str) -> Result<Cookie<'static>, AuthError> {
        let value = XsrfCookieValue {
            session_id: session_id.to_string(),
            expires_at: Utc::now() + self.ttl,
        };
        Ok(self.cookies.xsrf_cookie(&value)?)
    }

    /// Reissue the XSRF cookie unless the existing one still matches the
    /// session and has more than the rewrite window of life left.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if sealing fails.
    pub fn refresh_cookie(
        &self,
        req: &HttpRequest,
        session_id: &str,
    ) -> Result<Option<Cookie<'static>>, AuthError> {
        if let Some(existing) = self.cookies.read_xsrf(req) {
            let still_fresh = existing.expires_at - Utc::now() > self.rewrite_window;
            if existing.session_id == session_id && still_fresh {
                return Ok(None);
            }
        }
        Ok(Some(self.create_cookie(session_id)?))
    }

    /// Validate the double-submit pair for the authenticated session.
    ///
    /// True iff the cookie is unexpired, the cookie carries the session's
    /// id, and the header independently decodes to the identical id.
    #[must_use]
    pub fn has_valid_token(&self, req: &HttpRequest, session_id: &str) -> bool {
        let Some(cookie) = self.cookies.read_xsrf(req) else {
            return false;
        };
        if cookie.expires_at <= Utc::now() {
            debug!("XSRF cookie expired");
            return false;
        }
        if cookie.session_id != session_id {
            debug!("XSRF cookie bound to a different session");
            return false;
        }

        let Some(header) = req
            .headers()
            .get(&self.header_name)
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| self.cookies.open_header_token(raw))
        else {
            return false;
        };
        header.session_id == session_id
    }

    /// Guard a request. Safe methods pass through (refreshing the cookie
    /// when due); unsafe methods require the double-submit pair, except
    /// that a client with no cookie at all gets one 307 retry instead of a
    /// hard failure.
    ///
    /// # Errors
    ///
    /// Returns `Forbidden("invalid XSRF token")` for an unsafe request
    /// with a present but invalid token pair; `Internal` if sealing fails.
    pub fn guard(&self, req: &HttpRequest, session_id: &str) -> Result<XsrfCheck, AuthError> {
        if is_safe_method(req.method()) {
            return Ok(XsrfCheck::Accepted(self.refresh_cookie(req, session_id)?));
        }

        if self.cookies.read_xsrf(req).is_none() {
            // First unsafe request before the cookie existed: hand the
            // client a cookie and one retry rather than a hard failure.
            return Ok(XsrfCheck::Retry(self.create_cookie(session_id)?));
        }

        if self.has_valid_token(req, session_id) {
            Ok(XsrfCheck::Accepted(self.refresh_cookie(req, session_id)?))
        } else {
            Err(AuthError::forbidden("invalid XSRF token"))
        }
    }
}

/// RFC 7231 safe methods, exempt from XSRF protection.
#[must_use]
pub fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}
