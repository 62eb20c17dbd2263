//! Pre-built test components and records

use base64::engine::general_purpose;
use base64::Engine as _;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::constants::{test_key_set, TEST_MASTER_KEY};
use crate::models::SessionRecord;
use crate::session::{CookieFactory, XsrfGuard};
use crate::settings::GatehouseSettings;

pub struct TestFixtures;

impl TestFixtures {
    /// Cookie factory with the default cookie names and the test key set.
    #[must_use]
    pub fn cookie_factory() -> CookieFactory {
        CookieFactory::new(
            test_key_set(),
            true,
            "auth".to_string(),
            "XSRF-TOKEN".to_string(),
            "OIDC".to_string(),
        )
    }

    /// XSRF guard with the default header name, TTL, and rewrite window.
    #[must_use]
    pub fn xsrf_guard() -> XsrfGuard {
        XsrfGuard::new(
            Self::cookie_factory(),
            "X-XSRF-TOKEN".to_string(),
            43200,
            3600,
        )
    }

    /// A session record whose last activity was `idle_seconds` ago.
    #[must_use]
    pub fn session_record(username: &str, idle_seconds: i64, expired: bool) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            created_at: now - Duration::seconds(idle_seconds + 60),
            updated_at: now - Duration::seconds(idle_seconds),
            expired,
        }
    }

    /// Default settings carrying the test cookie key, so `key_set()`
    /// succeeds without any environment setup.
    #[must_use]
    pub fn settings() -> GatehouseSettings {
        let mut settings = GatehouseSettings::default();
        settings.session.cookie_key = general_purpose::STANDARD.encode(TEST_MASTER_KEY);
        settings
    }
}
