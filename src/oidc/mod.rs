//! OIDC authorization-code login with PKCE
//!
//! The client holds the only shared mutable state in the process: lazily
//! discovered provider metadata behind an async `RwLock`. Reads take the
//! shared lock; the first request upgrades to the exclusive lock and
//! re-checks before fetching, so concurrent cold starts trigger exactly
//! one discovery call. Discovery, token exchange, and JWKS fetches all
//! run under one fixed short timeout independent of the caller's.

pub mod jwt;

use std::time::Duration;

use anyhow::anyhow;
use base64::{engine::general_purpose, Engine as _};
use log::{debug, info, warn};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use url::Url;

use crate::error::AuthError;
use crate::models::OidcCookieValue;
use crate::settings::OidcSettings;
use crate::utils::crypto::generate_token;
use crate::utils::redirect::is_safe_return_url;

pub use jwt::{IdTokenClaims, JwtError, JwtVerifier};

/// OIDC provider metadata from the discovery document.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Everything the login handler needs to start the redirect dance.
pub struct LoginRedirect {
    pub authorization_url: String,
    pub cookie_value: OidcCookieValue,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

pub struct OidcClient {
    settings: OidcSettings,
    client_secret: String,
    http: reqwest::Client,
    provider: RwLock<Option<DiscoveryDocument>>,
    verifier: JwtVerifier,
}

impl OidcClient {
    /// Build a client from settings. No network traffic happens here;
    /// discovery runs lazily on first use.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the HTTP client cannot be constructed.
    pub fn new(settings: OidcSettings, client_secret: String) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.call_timeout_seconds))
            .build()
            .map_err(|e| AuthError::Internal(anyhow!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            settings,
            client_secret,
            http: http.clone(),
            provider: RwLock::new(None),
            verifier: JwtVerifier::new(http),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &OidcSettings {
        &self.settings
    }

    /// Provider metadata, discovered on first use.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if discovery fails or the document's issuer does
    /// not match the configured one.
    pub async fn provider(&self) -> Result<DiscoveryDocument, AuthError> {
        if let Some(doc) = self.provider.read().await.as_ref() {
            return Ok(doc.clone());
        }

        let mut slot = self.provider.write().await;
        // Another request may have finished discovery while we waited
        if let Some(doc) = slot.as_ref() {
            return Ok(doc.clone());
        }

        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            self.settings.issuer_url.trim_end_matches('/')
        );
        debug!("Fetching OIDC discovery document from {discovery_url}");
        let doc: DiscoveryDocument = self
            .http
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| AuthError::Internal(anyhow!("OIDC discovery failed: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::Internal(anyhow!("invalid discovery document: {e}")))?;

        if doc.issuer.trim_end_matches('/') != self.settings.issuer_url.trim_end_matches('/') {
            return Err(AuthError::Internal(anyhow!(
                "discovery document issuer '{}' does not match configured issuer '{}'",
                doc.issuer,
                self.settings.issuer_url
            )));
        }

        info!("Discovered OIDC provider {}", doc.issuer);
        *slot = Some(doc.clone());
        Ok(doc)
    }

    /// Start the authorization-code flow: fresh `state` and PKCE verifier,
    /// and the authorization URL carrying the S256 challenge.
    ///
    /// A `return_url` that is not a same-origin relative path is dropped
    /// before sealing, so the post-login redirect cannot leave the site.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if discovery fails or the authorization endpoint
    /// is not a valid URL.
    pub async fn begin_login(&self, return_url: Option<String>) -> Result<LoginRedirect, AuthError> {
        let provider = self.provider().await?;

        let return_url = return_url.filter(|rd| {
            let safe = is_safe_return_url(rd);
            if !safe {
                warn!("Discarding unsafe post-login redirect target");
            }
            safe
        });

        let state = generate_token();
        let pkce_verifier = generate_token();
        let challenge = pkce_challenge(&pkce_verifier);

        let mut auth_url = Url::parse(&provider.authorization_endpoint)
            .map_err(|e| AuthError::Internal(anyhow!("invalid authorization endpoint: {e}")))?;
        auth_url
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_url)
            .append_pair("scope", &self.settings.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");

        Ok(LoginRedirect {
            authorization_url: auth_url.into(),
            cookie_value: OidcCookieValue {
                state,
                pkce_verifier,
                return_url,
            },
        })
    }

    /// Exchange the authorization code plus PKCE verifier for the raw ID
    /// token.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the token endpoint rejects the exchange or
    /// returns no ID token.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<String, AuthError> {
        let provider = self.provider().await?;

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.settings.redirect_url),
            ("client_id", &self.settings.client_id),
            ("client_secret", &self.client_secret),
            ("code_verifier", pkce_verifier),
        ];

        let response = self
            .http
            .post(&provider.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Internal(anyhow!("token exchange request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Internal(anyhow!(
                "token exchange failed with status {status}: {body}"
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Internal(anyhow!("invalid token response: {e}")))?;
        tokens
            .id_token
            .ok_or_else(|| AuthError::Internal(anyhow!("token response contained no ID token")))
    }

    /// Cryptographically verify the ID token and extract its claims.
    ///
    /// # Errors
    ///
    /// Returns `Internal` for any signature or claim failure; the callback
    /// turns this into a login redirect, never an error page.
    pub async fn verify_id_token(&self, raw: &str) -> Result<IdTokenClaims, AuthError> {
        let provider = self.provider().await?;
        self.verifier
            .verify(
                raw,
                &provider.jwks_uri,
                &provider.issuer,
                &self.settings.client_id,
            )
            .await
            .map_err(|e| AuthError::Internal(anyhow!("ID token verification failed: {e}")))
    }
}

/// S256 code challenge: base64url(sha256(verifier)), no padding.
#[must_use]
pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}
