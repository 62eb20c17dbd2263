use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::utils::crypto::KeySet;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatehouseSettings {
    pub application: ApplicationSettings,
    pub session: SessionSettings,
    pub xsrf: XsrfSettings,
    pub oidc: OidcSettings,
    pub cookies: CookieSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub redirect_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Base64-encoded master cookie key; must decode to at least 96 bytes.
    /// Both cookie sub-keys are derived from it.
    pub cookie_key: String,
    /// Idle timeout: a session is expired once `now - updated_at` exceeds
    /// this many seconds.
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XsrfSettings {
    pub cookie_name: String,
    pub header_name: String,
    pub ttl_seconds: u64,
    /// Remaining lifetime below which the cookie is rewritten on a
    /// safe-method request, so it never expires mid-flight.
    pub rewrite_window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcSettings {
    pub enabled: bool,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Environment variable consulted before `client_secret`
    pub client_secret_env: Option<String>,
    pub redirect_url: String,
    pub scopes: Vec<String>,
    /// Where callback failures redirect, with a `message` query parameter
    pub login_url: String,
    /// Where a successful login without an explicit return URL lands
    pub post_login_url: String,
    /// Fixed timeout for discovery, token exchange, and JWKS calls,
    /// independent of the caller's timeout
    pub call_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub secure: bool,
    pub auth_cookie_name: String,
    pub oidc_cookie_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            redirect_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_key: String::new(),
            timeout_seconds: 30 * 60,
        }
    }
}

impl Default for XsrfSettings {
    fn default() -> Self {
        Self {
            cookie_name: "XSRF-TOKEN".to_string(),
            header_name: "X-XSRF-TOKEN".to_string(),
            ttl_seconds: 12 * 60 * 60,
            rewrite_window_seconds: 60 * 60,
        }
    }
}

impl Default for OidcSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            client_secret_env: None,
            redirect_url: "http://localhost:8080/auth/oidc/callback".to_string(),
            scopes: vec![
                "openid".to_string(),
                "profile".to_string(),
                "roles".to_string(),
            ],
            login_url: "/login".to_string(),
            post_login_url: "/".to_string(),
            call_timeout_seconds: 10,
        }
    }
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            secure: true, // Default to secure cookies
            auth_cookie_name: "auth".to_string(),
            oidc_cookie_name: "OIDC".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl GatehouseSettings {
    /// Load settings from configuration files and environment variables
    ///
    /// Priority, highest to lowest: environment variables, Settings.toml in
    /// `GATEHOUSE_SECRETS_DIR`, Settings.toml in the current directory,
    /// built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be read or parsed, or if
    /// the configured cookie key does not validate.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);

        // Fail at startup rather than on the first request
        settings.key_set()?;

        Ok(settings)
    }

    /// Initialize the logger from the configured level unless `RUST_LOG`
    /// is already set.
    pub fn init_logging(&self) {
        let env = env_logger::Env::default().default_filter_or(self.logging.level.clone());
        let _ = env_logger::Builder::from_env(env).try_init();
    }

    /// Decode the master cookie key and derive the cookie sub-keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not valid base64 or decodes to fewer
    /// than 96 bytes.
    pub fn key_set(&self) -> Result<KeySet, Box<dyn std::error::Error>> {
        let master = general_purpose::STANDARD
            .decode(self.session.cookie_key.trim())
            .map_err(|e| format!("session.cookie_key is not valid base64: {e}"))?;
        Ok(KeySet::derive(&master)?)
    }

    /// Resolved OIDC client secret, preferring the configured environment
    /// variable over the inline value.
    #[must_use]
    pub fn oidc_client_secret(&self) -> String {
        if let Some(var) = &self.oidc.client_secret_env {
            if let Ok(secret) = std::env::var(var) {
                return secret;
            }
        }
        self.oidc.client_secret.clone()
    }

    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        let default_config_path = std::path::PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            let toml_content = fs::read_to_string(&default_config_path)?;
            settings = basic_toml::from_str(&toml_content)?;
            log::info!("Loaded base settings from {}", default_config_path.display());
        }

        if let Ok(secrets_dir) = std::env::var("GATEHOUSE_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                let secrets_toml = fs::read_to_string(&secrets_path)?;
                settings = basic_toml::from_str(&secrets_toml)?;
                log::info!("Overriding settings from {}", secrets_path.display());
            }
        }

        Ok(settings)
    }

    fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_session_env_overrides(&mut settings.session);
        Self::apply_xsrf_env_overrides(&mut settings.xsrf);
        Self::apply_oidc_env_overrides(&mut settings.oidc);
        Self::apply_cookie_env_overrides(&mut settings.cookies);
        Self::apply_logging_env_overrides(&mut settings.logging);
    }

    fn apply_application_env_overrides(app: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app.port = port;
            }
        }
        if let Ok(redirect_base_url) = std::env::var("REDIRECT_BASE_URL") {
            app.redirect_base_url = redirect_base_url;
        }
    }

    fn apply_session_env_overrides(session: &mut SessionSettings) {
        if let Ok(key) = std::env::var("COOKIE_KEY") {
            session.cookie_key = key;
        }
        if let Ok(timeout) = std::env::var("SESSION_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                session.timeout_seconds = seconds;
            }
        }
    }

    fn apply_xsrf_env_overrides(xsrf: &mut XsrfSettings) {
        if let Ok(ttl) = std::env::var("XSRF_TTL_SECONDS") {
            if let Ok(seconds) = ttl.parse::<u64>() {
                xsrf.ttl_seconds = seconds;
            }
        }
        if let Ok(window) = std::env::var("XSRF_REWRITE_WINDOW_SECONDS") {
            if let Ok(seconds) = window.parse::<u64>() {
                xsrf.rewrite_window_seconds = seconds;
            }
        }
    }

    fn apply_oidc_env_overrides(oidc: &mut OidcSettings) {
        if let Ok(issuer) = std::env::var("OIDC_ISSUER_URL") {
            oidc.issuer_url = issuer;
            oidc.enabled = true;
        }
        if let Ok(client_id) = std::env::var("OIDC_CLIENT_ID") {
            oidc.client_id = client_id;
        }
        if let Ok(client_secret) = std::env::var("OIDC_CLIENT_SECRET") {
            oidc.client_secret = client_secret;
        }
        if let Ok(redirect_url) = std::env::var("OIDC_REDIRECT_URL") {
            oidc.redirect_url = redirect_url;
        }
        if let Ok(login_url) = std::env::var("OIDC_LOGIN_URL") {
            oidc.login_url = login_url;
        }
    }

    fn apply_cookie_env_overrides(cookies: &mut CookieSettings) {
        if let Ok(secure) = std::env::var("COOKIE_SECURE") {
            if let Ok(secure) = secure.parse::<bool>() {
                cookies.secure = secure;
            }
        }
    }

    fn apply_logging_env_overrides(logging: &mut LoggingSettings) {
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            logging.level = level;
        }
    }
}
