use actix_web::cookie::{Cookie, SameSite};
use actix_web::HttpRequest;
use anyhow::Result;
use chrono::Utc;

use crate::models::{AuthCookieValue, OidcCookieValue, XsrfCookieValue};
use crate::utils::crypto::KeySet;

/// TTL of the single-use OIDC flow cookie
pub const OIDC_COOKIE_TTL_MINUTES: i64 = 10;

/// Cookie factory for creating and reading the three sealed cookie kinds
///
/// All cookie construction lives here so the policy bits (HttpOnly,
/// SameSite, Max-Age) cannot drift between call sites. Reading goes
/// through the codec's open-or-absent contract: a cookie that fails to
/// decode is indistinguishable from a missing one.
#[derive(Clone)]
pub struct CookieFactory {
    keys: KeySet,
    secure: bool,
    auth_name: String,
    xsrf_name: String,
    oidc_name: String,
}

impl CookieFactory {
    #[must_use]
    pub fn new(
        keys: KeySet,
        secure: bool,
        auth_name: String,
        xsrf_name: String,
        oidc_name: String,
    ) -> Self {
        Self {
            keys,
            secure,
            auth_name,
            xsrf_name,
            oidc_name,
        }
    }

    #[must_use]
    pub fn auth_cookie_name(&self) -> &str {
        &self.auth_name
    }

    #[must_use]
    pub fn xsrf_cookie_name(&self) -> &str {
        &self.xsrf_name
    }

    #[must_use]
    pub fn oidc_cookie_name(&self) -> &str {
        &self.oidc_name
    }

    /// Create the auth cookie. SameSite follows the payload flag: strict
    /// for first-party use, None during the cross-site leg of an OIDC
    /// redirect.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing fails
    pub fn auth_cookie(&self, value: &AuthCookieValue) -> Result<Cookie<'static>> {
        let sealed = self.keys.seal(&self.auth_name, value)?;
        let same_site = if value.same_site_strict {
            SameSite::Strict
        } else {
            SameSite::None
        };
        Ok(Cookie::build(self.auth_name.clone(), sealed)
            .http_only(true)
            .secure(self.secure)
            .same_site(same_site)
            .path("/")
            .finish())
    }

    /// Create the XSRF cookie. Deliberately not HttpOnly: the client must
    /// read it to mirror the value into the XSRF request header.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing fails
    pub fn xsrf_cookie(&self, value: &XsrfCookieValue) -> Result<Cookie<'static>> {
        let sealed = self.keys.seal(&self.xsrf_name, value)?;
        let remaining = (value.expires_at - Utc::now()).num_seconds().max(0);
        Ok(Cookie::build(self.xsrf_name.clone(), sealed)
            .http_only(false)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .path("/")
            .max_age(actix_web::cookie::time::Duration::seconds(remaining))
            .finish())
    }

    /// Create the short-lived OIDC flow cookie.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing fails
    pub fn oidc_cookie(&self, value: &OidcCookieValue) -> Result<Cookie<'static>> {
        let sealed = self.keys.seal(&self.oidc_name, value)?;
        Ok(Cookie::build(self.oidc_name.clone(), sealed)
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(actix_web::cookie::time::Duration::minutes(
                OIDC_COOKIE_TTL_MINUTES,
            ))
            .finish())
    }

    /// Expired OIDC cookie, attached to every callback response so the
    /// flow cookie is single use.
    #[must_use]
    pub fn expired_oidc_cookie(&self) -> Cookie<'static> {
        expired_cookie(&self.oidc_name, self.secure)
    }

    #[must_use]
    pub fn expired_auth_cookie(&self) -> Cookie<'static> {
        expired_cookie(&self.auth_name, self.secure)
    }

    #[must_use]
    pub fn expired_xsrf_cookie(&self) -> Cookie<'static> {
        expired_cookie(&self.xsrf_name, self.secure)
    }

    /// Read and open the auth cookie; absent on any decode failure.
    #[must_use]
    pub fn read_auth(&self, req: &HttpRequest) -> Option<AuthCookieValue> {
        let cookie = req.cookie(&self.auth_name)?;
        self.keys.open(&self.auth_name, cookie.value())
    }

    /// Read and open the XSRF cookie; absent on any decode failure.
    #[must_use]
    pub fn read_xsrf(&self, req: &HttpRequest) -> Option<XsrfCookieValue> {
        let cookie = req.cookie(&self.xsrf_name)?;
        self.keys.open(&self.xsrf_name, cookie.value())
    }

    /// Read and open the OIDC flow cookie; absent on any decode failure.
    #[must_use]
    pub fn read_oidc(&self, req: &HttpRequest) -> Option<OidcCookieValue> {
        let cookie = req.cookie(&self.oidc_name)?;
        self.keys.open(&self.oidc_name, cookie.value())
    }

    /// Open a raw header value as an XSRF token. The header mirrors the
    /// cookie, so it is sealed under the XSRF cookie name.
    #[must_use]
    pub fn open_header_token(&self, raw: &str) -> Option<XsrfCookieValue> {
        self.keys.open(&self.xsrf_name, raw)
    }
}

/// Create an expired cookie to clear a specific cookie
#[must_use]
pub fn expired_cookie(name: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(name.to_owned(), "")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(actix_web::cookie::time::Duration::seconds(-1))
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::TestFixtures;
    use actix_web::test::TestRequest;
    use chrono::Duration;

    #[test]
    fn test_auth_cookie_same_site_follows_flag() {
        let factory = TestFixtures::cookie_factory();

        let strict = factory
            .auth_cookie(&AuthCookieValue {
                session_id: "id".to_string(),
                same_site_strict: true,
            })
            .unwrap();
        assert_eq!(strict.same_site(), Some(SameSite::Strict));
        assert!(strict.http_only().unwrap());

        let lax_leg = factory
            .auth_cookie(&AuthCookieValue {
                session_id: "id".to_string(),
                same_site_strict: false,
            })
            .unwrap();
        assert_eq!(lax_leg.same_site(), Some(SameSite::None));
    }

    #[test]
    fn test_xsrf_cookie_is_readable_by_client() {
        let factory = TestFixtures::cookie_factory();
        let cookie = factory
            .xsrf_cookie(&XsrfCookieValue {
                session_id: "id".to_string(),
                expires_at: Utc::now() + Duration::hours(12),
            })
            .unwrap();
        // Double submit requires client-side JS to read the cookie
        assert_eq!(cookie.http_only(), Some(false));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
    }

    #[test]
    fn test_read_round_trip_through_request() {
        let factory = TestFixtures::cookie_factory();
        let value = AuthCookieValue {
            session_id: "4ee9c761-4acf-4ad5-b3ce-22674d8eff82".to_string(),
            same_site_strict: true,
        };
        let cookie = factory.auth_cookie(&value).unwrap();

        let req = TestRequest::get().cookie(cookie).to_http_request();
        assert_eq!(factory.read_auth(&req), Some(value));
    }

    #[test]
    fn test_cookie_under_wrong_name_reads_absent() {
        let factory = TestFixtures::cookie_factory();
        let auth = factory
            .auth_cookie(&AuthCookieValue {
                session_id: "id".to_string(),
                same_site_strict: true,
            })
            .unwrap();

        // Replay the sealed auth value under the XSRF cookie name
        let forged = Cookie::build(factory.xsrf_cookie_name().to_owned(), auth.value().to_owned())
            .finish();
        let req = TestRequest::get().cookie(forged).to_http_request();
        assert_eq!(factory.read_xsrf(&req), None);
    }

    #[test]
    fn test_expired_cookie_clears() {
        let cookie = expired_cookie("OIDC", true);
        assert_eq!(cookie.value(), "");
        assert!(cookie.max_age().unwrap().whole_seconds() < 0);
    }
}
