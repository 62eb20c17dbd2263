// ID token verification with JWKS fetching and caching
// RS256 only: every supported IdP signs ID tokens with RSA

use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use log::debug;
use rsa::pkcs1v15::VerifyingKey;
use rsa::RsaPublicKey;
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;

/// Tolerated clock skew when checking `exp`/`iat`
const CLOCK_SKEW_SECONDS: i64 = 300;

/// How long a fetched key set is trusted before re-fetching
const JWKS_CACHE_DURATION: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signing key not found: {0}")]
    KeyNotFound(String),
    #[error("failed to decode key: {0}")]
    KeyDecodingFailed(String),
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("token has expired")]
    TokenExpired,
    #[error("claim '{claim}' validation failed: expected '{expected}', got '{actual}'")]
    ClaimMismatch {
        claim: String,
        expected: String,
        actual: String,
    },
    #[error("failed to fetch JWKS: {0}")]
    JwksFetchFailed(String),
}

#[derive(Debug, Deserialize)]
struct JwtHeader {
    alg: String,
    kid: Option<String>,
}

/// Claims extracted from a verified ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub iss: Option<String>,
    pub aud: Option<serde_json::Value>,
    pub exp: Option<i64>,
    pub preferred_username: Option<String>,
    /// Role names claimed by the IdP; untyped strings, reconciled against
    /// the internal grant store after login
    #[serde(default)]
    pub roles: Vec<String>,
    /// IdP session id, correlated into the session record so
    /// front-channel logout can find the session later
    pub sid: Option<String>,
}

impl IdTokenClaims {
    /// Username for the internal session: `preferred_username` when the
    /// IdP sends one, the subject otherwise.
    #[must_use]
    pub fn username(&self) -> &str {
        self.preferred_username.as_deref().unwrap_or(&self.sub)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct JsonWebKey {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonWebKeySet {
    keys: Vec<JsonWebKey>,
}

struct CachedJwks {
    keys: Vec<JsonWebKey>,
    fetched_at: Instant,
}

/// Verifies ID tokens against the provider's published key set.
///
/// Keys are fetched lazily and cached for an hour; an unknown `kid`
/// forces a re-fetch so key rotation is picked up without a restart.
pub struct JwtVerifier {
    http: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: RwLock::new(None),
        }
    }

    /// Verify signature, expiry, issuer, and audience; return the claims.
    ///
    /// # Errors
    ///
    /// Returns a `JwtError` describing the first failed check.
    pub async fn verify(
        &self,
        token: &str,
        jwks_uri: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Result<IdTokenClaims, JwtError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(JwtError::InvalidToken("not a three-part JWT".to_string()));
        }

        let header: JwtHeader = decode_part(parts[0], "header")?;
        if header.alg != "RS256" {
            return Err(JwtError::UnsupportedAlgorithm(header.alg));
        }
        let kid = header.kid.as_deref().unwrap_or("default");

        let key = self.signing_key(jwks_uri, kid).await?;
        verify_rs256(&format!("{}.{}", parts[0], parts[1]), parts[2], &key)?;
        debug!("ID token signature verified (kid={kid})");

        let claims: IdTokenClaims = decode_part(parts[1], "claims")?;
        validate_claims(&claims, expected_issuer, expected_audience)?;
        Ok(claims)
    }

    async fn signing_key(&self, jwks_uri: &str, kid: &str) -> Result<JsonWebKey, JwtError> {
        if let Some(key) = cached_key(&*self.cache.read().await, kid) {
            return Ok(key);
        }

        // Cache miss, stale cache, or unknown kid after rotation
        let mut cache = self.cache.write().await;
        // A concurrent verification may have refreshed the set while this
        // task waited on the write lock
        if let Some(key) = cached_key(&cache, kid) {
            return Ok(key);
        }
        let jwks: JsonWebKeySet = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| JwtError::JwksFetchFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| JwtError::JwksFetchFailed(e.to_string()))?;
        debug!("Fetched {} JWKS key(s) from {jwks_uri}", jwks.keys.len());

        let key = find_key(&jwks.keys, kid)
            .cloned()
            .ok_or_else(|| JwtError::KeyNotFound(kid.to_string()))?;
        *cache = Some(CachedJwks {
            keys: jwks.keys,
            fetched_at: Instant::now(),
        });
        Ok(key)
    }
}

/// Usable cache hit: the set is within its lifetime and carries the kid.
/// Consulted under the read lock and again under the write lock, so a
/// task that lost the fetch race reuses the winner's set.
fn cached_key(cache: &Option<CachedJwks>, kid: &str) -> Option<JsonWebKey> {
    let cached = cache.as_ref()?;
    if cached.fetched_at.elapsed() >= JWKS_CACHE_DURATION {
        return None;
    }
    find_key(&cached.keys, kid).cloned()
}

fn find_key<'a>(keys: &'a [JsonWebKey], kid: &str) -> Option<&'a JsonWebKey> {
    keys.iter()
        .filter(|key| key.kty == "RSA")
        .find(|key| key.kid.as_deref().unwrap_or("default") == kid)
}

fn decode_part<T: serde::de::DeserializeOwned>(part: &str, what: &str) -> Result<T, JwtError> {
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|e| JwtError::InvalidToken(format!("invalid {what} encoding: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| JwtError::InvalidToken(format!("invalid {what} JSON: {e}")))
}

fn verify_rs256(
    signing_input: &str,
    signature_b64: &str,
    key: &JsonWebKey,
) -> Result<(), JwtError> {
    use rsa::signature::Verifier;

    let signature_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| JwtError::InvalidToken(format!("invalid signature encoding: {e}")))?;

    let n = key
        .n
        .as_ref()
        .ok_or_else(|| JwtError::KeyDecodingFailed("missing RSA modulus".to_string()))?;
    let e = key
        .e
        .as_ref()
        .ok_or_else(|| JwtError::KeyDecodingFailed("missing RSA exponent".to_string()))?;

    let n_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(n)
        .map_err(|e| JwtError::KeyDecodingFailed(format!("invalid modulus encoding: {e}")))?;
    let e_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(e)
        .map_err(|e| JwtError::KeyDecodingFailed(format!("invalid exponent encoding: {e}")))?;

    let rsa_key = RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(&n_bytes),
        rsa::BigUint::from_bytes_be(&e_bytes),
    )
    .map_err(|e| JwtError::KeyDecodingFailed(format!("invalid RSA key: {e}")))?;

    let verifying_key = VerifyingKey::<Sha256>::new(rsa_key);
    let signature = rsa::pkcs1v15::Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| JwtError::InvalidToken(format!("invalid signature format: {e}")))?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| JwtError::SignatureInvalid)
}

fn validate_claims(
    claims: &IdTokenClaims,
    expected_issuer: &str,
    expected_audience: &str,
) -> Result<(), JwtError> {
    let now = chrono::Utc::now().timestamp();
    match claims.exp {
        Some(exp) if exp + CLOCK_SKEW_SECONDS >= now => {}
        Some(_) => return Err(JwtError::TokenExpired),
        None => {
            return Err(JwtError::InvalidToken("missing 'exp' claim".to_string()));
        }
    }

    match claims.iss.as_deref() {
        Some(iss) if iss == expected_issuer => {}
        other => {
            return Err(JwtError::ClaimMismatch {
                claim: "iss".to_string(),
                expected: expected_issuer.to_string(),
                actual: other.unwrap_or("<missing>").to_string(),
            });
        }
    }

    if !audience_matches(claims.aud.as_ref(), expected_audience) {
        return Err(JwtError::ClaimMismatch {
            claim: "aud".to_string(),
            expected: expected_audience.to_string(),
            actual: claims
                .aud
                .as_ref()
                .map_or_else(|| "<missing>".to_string(), ToString::to_string),
        });
    }

    Ok(())
}

/// The audience claim may be a single string or an array of strings.
fn audience_matches(aud: Option<&serde_json::Value>, expected: &str) -> bool {
    match aud {
        Some(serde_json::Value::String(aud)) => aud == expected,
        Some(serde_json::Value::Array(auds)) => auds
            .iter()
            .any(|value| value.as_str() == Some(expected)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(iss: &str, aud: serde_json::Value, exp_offset: i64) -> IdTokenClaims {
        IdTokenClaims {
            sub: "subject-1".to_string(),
            iss: Some(iss.to_string()),
            aud: Some(aud),
            exp: Some(chrono::Utc::now().timestamp() + exp_offset),
            preferred_username: None,
            roles: vec![],
            sid: None,
        }
    }

    #[test]
    fn test_claims_validation() {
        let good = claims("https://idp", serde_json::json!("client-1"), 600);
        assert!(validate_claims(&good, "https://idp", "client-1").is_ok());

        let wrong_issuer = claims("https://evil", serde_json::json!("client-1"), 600);
        assert!(matches!(
            validate_claims(&wrong_issuer, "https://idp", "client-1"),
            Err(JwtError::ClaimMismatch { claim, .. }) if claim == "iss"
        ));

        let expired = claims("https://idp", serde_json::json!("client-1"), -3600);
        assert!(matches!(
            validate_claims(&expired, "https://idp", "client-1"),
            Err(JwtError::TokenExpired)
        ));
    }

    #[test]
    fn test_audience_string_or_array() {
        let single = claims("https://idp", serde_json::json!("client-1"), 600);
        assert!(validate_claims(&single, "https://idp", "client-1").is_ok());

        let array = claims(
            "https://idp",
            serde_json::json!(["other", "client-1"]),
            600,
        );
        assert!(validate_claims(&array, "https://idp", "client-1").is_ok());

        let miss = claims("https://idp", serde_json::json!(["other"]), 600);
        assert!(matches!(
            validate_claims(&miss, "https://idp", "client-1"),
            Err(JwtError::ClaimMismatch { claim, .. }) if claim == "aud"
        ));
    }

    #[test]
    fn test_cached_key_honors_lifetime_and_kid() {
        let key = JsonWebKey {
            kty: "RSA".to_string(),
            kid: Some("k1".to_string()),
            n: None,
            e: None,
        };
        let fresh = Some(CachedJwks {
            keys: vec![key.clone()],
            fetched_at: Instant::now(),
        });
        assert!(cached_key(&fresh, "k1").is_some());
        // Unknown kid forces a refetch even with a fresh set
        assert!(cached_key(&fresh, "rotated").is_none());
        assert!(cached_key(&None, "k1").is_none());

        if let Some(past) = Instant::now().checked_sub(JWKS_CACHE_DURATION) {
            let stale = Some(CachedJwks {
                keys: vec![key],
                fetched_at: past,
            });
            assert!(cached_key(&stale, "k1").is_none());
        }
    }

    #[test]
    fn test_username_prefers_preferred_username() {
        let mut c = claims("https://idp", serde_json::json!("client-1"), 600);
        assert_eq!(c.username(), "subject-1");
        c.preferred_username = Some("alice".to_string());
        assert_eq!(c.username(), "alice");
    }

    #[test]
    fn test_malformed_token_shapes() {
        assert!(matches!(
            decode_part::<JwtHeader>("!!!", "header"),
            Err(JwtError::InvalidToken(_))
        ));

        let not_json = general_purpose::URL_SAFE_NO_PAD.encode(b"hello");
        assert!(matches!(
            decode_part::<JwtHeader>(&not_json, "header"),
            Err(JwtError::InvalidToken(_))
        ));
    }
}
