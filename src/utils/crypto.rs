// Cookie sealing codec and secure token generation

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};
use sha2::Sha256;

/// Nonce size for AES-256-GCM encryption (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the trailing HMAC-SHA256 tag binding the cookie name
pub const TAG_SIZE: usize = 32;

/// Size of each derived sub-key (AES-256 / HMAC-SHA256)
pub const SUBKEY_SIZE: usize = 32;

/// Minimum length of the decoded master cookie key
pub const MIN_MASTER_KEY_LEN: usize = 96;

// PBKDF2 parameters are selected from byte offsets of the master key
// itself rather than fixed constants. The indirection keeps derived
// keys interchangeable with existing deployments (see DESIGN.md).
const SALT_OFFSET: usize = 0;
const SALT_LEN: usize = 16;
const ITERATION_OFFSET: usize = 16;
const ITERATION_FLOOR: u32 = 4096;

type HmacSha256 = Hmac<Sha256>;

/// Sub-keys derived from the master cookie key: one for the AEAD cipher,
/// one for the name-binding MAC.
#[derive(Clone)]
pub struct KeySet {
    cipher_key: [u8; SUBKEY_SIZE],
    mac_key: [u8; SUBKEY_SIZE],
}

impl KeySet {
    /// Derive both sub-keys from a master key via PBKDF2-HMAC-SHA256.
    ///
    /// The salt is read from the first 16 bytes of the master key and the
    /// iteration count from the two bytes after it, added to a floor of
    /// 4096 so a pathological key cannot select a trivial count.
    ///
    /// # Errors
    ///
    /// Returns an error if the master key is shorter than
    /// [`MIN_MASTER_KEY_LEN`] bytes.
    pub fn derive(master_key: &[u8]) -> Result<Self> {
        if master_key.len() < MIN_MASTER_KEY_LEN {
            return Err(anyhow!(
                "master cookie key too short: expected at least {} bytes, got {}",
                MIN_MASTER_KEY_LEN,
                master_key.len()
            ));
        }

        let salt = &master_key[SALT_OFFSET..SALT_OFFSET + SALT_LEN];
        let iterations = ITERATION_FLOOR
            + (u32::from(master_key[ITERATION_OFFSET])
                | (u32::from(master_key[ITERATION_OFFSET + 1]) << 8));

        let mut derived = [0u8; SUBKEY_SIZE * 2];
        pbkdf2::pbkdf2_hmac::<Sha256>(master_key, salt, iterations, &mut derived);

        let mut cipher_key = [0u8; SUBKEY_SIZE];
        let mut mac_key = [0u8; SUBKEY_SIZE];
        cipher_key.copy_from_slice(&derived[..SUBKEY_SIZE]);
        mac_key.copy_from_slice(&derived[SUBKEY_SIZE..]);

        Ok(Self {
            cipher_key,
            mac_key,
        })
    }

    /// Seal a payload into an opaque cookie value.
    ///
    /// Layout: `base64url(nonce || ciphertext || hmac(name || nonce || ct))`.
    /// The MAC binds the cookie name, so a value replayed under a different
    /// cookie name opens as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails.
    pub fn seal<T: Serialize>(&self, name: &str, payload: &T) -> Result<String> {
        let json = serde_json::to_vec(payload)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.cipher_key));
        let ciphertext = cipher
            .encrypt(nonce, json.as_slice())
            .map_err(|e| anyhow!("AES encryption failed: {e}"))?;

        // Qualified: aes_gcm's KeyInit is also in scope
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|e| anyhow!("HMAC init failed: {e}"))?;
        mac.update(name.as_bytes());
        mac.update(&nonce_bytes);
        mac.update(&ciphertext);
        let tag = mac.finalize().into_bytes();

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len() + TAG_SIZE);
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        combined.extend_from_slice(&tag);

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Open a sealed cookie value.
    ///
    /// Every failure mode (bad base64, truncated value, MAC mismatch,
    /// AEAD failure, JSON mismatch, wrong cookie name) reads as `None`.
    /// Callers must treat a failed decode identically to a missing cookie.
    #[must_use]
    pub fn open<T: DeserializeOwned>(&self, name: &str, sealed: &str) -> Option<T> {
        match self.try_open(name, sealed) {
            Ok(payload) => Some(payload),
            Err(e) => {
                log::debug!("Discarding undecodable '{name}' cookie: {e}");
                None
            }
        }
    }

    fn try_open<T: DeserializeOwned>(&self, name: &str, sealed: &str) -> Result<T> {
        let combined = general_purpose::URL_SAFE_NO_PAD.decode(sealed)?;
        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err(anyhow!("sealed value too short"));
        }

        let (body, tag) = combined.split_at(combined.len() - TAG_SIZE);
        let (nonce_bytes, ciphertext) = body.split_at(NONCE_SIZE);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|e| anyhow!("HMAC init failed: {e}"))?;
        mac.update(name.as_bytes());
        mac.update(nonce_bytes);
        mac.update(ciphertext);
        mac.verify_slice(tag)
            .map_err(|_| anyhow!("cookie MAC mismatch"))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.cipher_key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("AES decryption failed: {e}"))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Generate a cryptographically secure unguessable token
///
/// Used for OIDC `state` values and PKCE verifiers. 32 bytes of entropy,
/// base64url-encoded to 43 characters (within the 43-128 range PKCE
/// requires for verifiers).
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::constants::{test_key_set, TEST_MASTER_KEY};
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Payload {
        id: String,
        strict: bool,
    }

    fn sample() -> Payload {
        Payload {
            id: "b4b5ca4f-42d6-4675-9a78-28be44576642".to_string(),
            strict: true,
        }
    }

    #[test]
    fn test_seal_open_round_trip() {
        let keys = test_key_set();
        let sealed = keys.seal("auth", &sample()).unwrap();
        let opened: Payload = keys.open("auth", &sealed).unwrap();
        assert_eq!(opened, sample());
    }

    #[test]
    fn test_open_under_different_key_is_absent() {
        let keys = test_key_set();
        let sealed = keys.seal("auth", &sample()).unwrap();

        let mut other_master = TEST_MASTER_KEY.to_vec();
        other_master[40] ^= 0xff;
        let other_keys = KeySet::derive(&other_master).unwrap();

        assert_eq!(other_keys.open::<Payload>("auth", &sealed), None);
    }

    #[test]
    fn test_open_under_different_name_is_absent() {
        let keys = test_key_set();
        let sealed = keys.seal("auth", &sample()).unwrap();
        assert_eq!(keys.open::<Payload>("xsrf", &sealed), None);
    }

    #[test]
    fn test_open_garbage_is_absent_not_error() {
        let keys = test_key_set();
        assert_eq!(keys.open::<Payload>("auth", "not base64 at all!"), None);
        assert_eq!(keys.open::<Payload>("auth", ""), None);
        assert_eq!(keys.open::<Payload>("auth", "AAAA"), None);
    }

    #[test]
    fn test_tampered_ciphertext_is_absent() {
        let keys = test_key_set();
        let sealed = keys.seal("auth", &sample()).unwrap();
        let mut bytes = general_purpose::URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        let tampered = general_purpose::URL_SAFE_NO_PAD.encode(&bytes);
        assert_eq!(keys.open::<Payload>("auth", &tampered), None);
    }

    #[test]
    fn test_short_master_key_rejected() {
        assert!(KeySet::derive(&[0u8; MIN_MASTER_KEY_LEN - 1]).is_err());
        assert!(KeySet::derive(&[7u8; MIN_MASTER_KEY_LEN]).is_ok());
    }

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 43);
        assert_ne!(token, generate_token());
    }
}
