//! Password login and account management
//!
//! Credential verification runs through a pluggable hash-scheme chain:
//! the first scheme is current, the rest are deprecated but still
//! verifiable. When a login verifies against a deprecated scheme and
//! auto-upgrade is enabled, the hash is synchronously rewritten with the
//! current scheme; an upgrade failure is logged and never blocks login.

use std::sync::Arc;

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use log::{info, warn};
use pbkdf2::Pbkdf2;

use crate::error::AuthError;
use crate::models::UserRecord;
use crate::storage::{SessionStore, StoreError, UserStore};

/// One password hash algorithm. `handles` dispatches on the PHC prefix of
/// a stored hash.
pub trait HashScheme: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deprecated schemes still verify but trigger an auto-upgrade.
    fn deprecated(&self) -> bool;

    fn handles(&self, stored_hash: &str) -> bool;

    /// Hash a password with a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if hashing fails.
    fn hash(&self, password: &str) -> Result<String, AuthError>;

    /// Verify a password against a stored hash.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the stored hash is malformed.
    fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, AuthError>;
}

/// Argon2id, the current scheme.
pub struct Argon2Scheme;

impl HashScheme for Argon2Scheme {
    fn name(&self) -> &'static str {
        "argon2id"
    }

    fn deprecated(&self) -> bool {
        false
    }

    fn handles(&self, stored_hash: &str) -> bool {
        stored_hash.starts_with("$argon2")
    }

    fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::internal(format!("password hashing failed: {e}")))
    }

    fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(stored_hash)
            .map_err(|e| AuthError::internal(format!("invalid password hash: {e}")))?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::internal(format!(
                "password verification failed: {e}"
            ))),
        }
    }
}

/// PBKDF2-SHA256, the legacy scheme kept for stored hashes that predate
/// the Argon2 migration.
pub struct Pbkdf2Scheme;

impl HashScheme for Pbkdf2Scheme {
    fn name(&self) -> &'static str {
        "pbkdf2-sha256"
    }

    fn deprecated(&self) -> bool {
        true
    }

    fn handles(&self, stored_hash: &str) -> bool {
        stored_hash.starts_with("$pbkdf2")
    }

    fn hash(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Pbkdf2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::internal(format!("password hashing failed: {e}")))
    }

    fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, AuthError> {
        let parsed = PasswordHash::new(stored_hash)
            .map_err(|e| AuthError::internal(format!("invalid password hash: {e}")))?;
        match Pbkdf2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(pbkdf2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::internal(format!(
                "password verification failed: {e}"
            ))),
        }
    }
}

/// Password authentication service plus plain account CRUD.
#[derive(Clone)]
pub struct PasswordAuth {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    /// First scheme is current; the rest verify legacy hashes.
    schemes: Arc<Vec<Box<dyn HashScheme>>>,
    auto_upgrade: bool,
}

impl PasswordAuth {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            users,
            sessions,
            schemes: Arc::new(vec![Box::new(Argon2Scheme), Box::new(Pbkdf2Scheme)]),
            auto_upgrade: true,
        }
    }

    #[must_use]
    pub fn with_auto_upgrade(mut self, enabled: bool) -> Self {
        self.auto_upgrade = enabled;
        self
    }

    fn current_scheme(&self) -> &dyn HashScheme {
        self.schemes[0].as_ref()
    }

    fn scheme_for(&self, stored_hash: &str) -> Result<&dyn HashScheme, AuthError> {
        self.schemes
            .iter()
            .map(AsRef::as_ref)
            .find(|scheme| scheme.handles(stored_hash))
            .ok_or_else(|| AuthError::internal("stored hash matches no known scheme"))
    }

    /// Verify credentials and return the account.
    ///
    /// The disabled check deliberately runs after credential verification
    /// so the code path does not branch on user existence ahead of the
    /// hash comparison.
    ///
    /// # Errors
    ///
    /// `Unauthorized("invalid credentials")` for an unknown user or wrong
    /// password, `Unauthorized("user disabled")` for a verified but
    /// disabled account, `Internal` on storage or hash failures.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserRecord, AuthError> {
        let user = match self.users.user(username).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                return Err(AuthError::unauthorized("invalid credentials"));
            }
            Err(err) => return Err(err.into()),
        };

        let scheme = self.scheme_for(&user.password_hash)?;
        if !scheme.verify(password, &user.password_hash)? {
            return Err(AuthError::unauthorized("invalid credentials"));
        }

        if scheme.deprecated() && self.auto_upgrade {
            self.upgrade_hash(username, password, scheme.name()).await;
        }

        if user.disabled {
            return Err(AuthError::unauthorized("user disabled"));
        }

        Ok(user)
    }

    /// Re-hash with the current scheme and persist. Failures are logged
    /// only; the already-verified login proceeds regardless.
    async fn upgrade_hash(&self, username: &str, password: &str, old_scheme: &str) {
        let current = self.current_scheme();
        let rehashed = match current.hash(password) {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Failed to re-hash password for '{username}': {e}");
                return;
            }
        };
        match self.users.set_password_hash(username, &rehashed).await {
            Ok(()) => info!(
                "Upgraded password hash for '{username}' from {old_scheme} to {}",
                current.name()
            ),
            Err(e) => warn!("Failed to persist upgraded hash for '{username}': {e}"),
        }
    }

    /// # Errors
    ///
    /// `Internal` if hashing or storage fails.
    pub async fn create_user(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let hash = self.current_scheme().hash(password)?;
        let record = UserRecord {
            username: username.to_string(),
            password_hash: hash,
            disabled: false,
        };
        self.users.create_user(&record).await.map_err(Into::into)
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown user; `Internal` on hash or storage
    /// failure.
    pub async fn change_user_password(
        &self,
        username: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let hash = self.current_scheme().hash(new_password)?;
        self.users
            .set_password_hash(username, &hash)
            .await
            .map_err(Into::into)
    }

    /// Disable the account and destroy all of its outstanding sessions.
    ///
    /// # Errors
    ///
    /// `BadRequest` when targeting the acting user; `NotFound` for an
    /// unknown user; `Internal` on storage failure.
    pub async fn deactivate_user(&self, acting: &str, target: &str) -> Result<(), AuthError> {
        if acting == target {
            return Err(AuthError::bad_request("cannot deactivate own account"));
        }
        self.users.set_disabled(target, true).await?;
        self.sessions.destroy_sessions_for_user(target).await?;
        Ok(())
    }

    /// Delete the account and destroy all of its outstanding sessions.
    ///
    /// # Errors
    ///
    /// `BadRequest` when targeting the acting user; `NotFound` for an
    /// unknown user; `Internal` on storage failure.
    pub async fn delete_user(&self, acting: &str, target: &str) -> Result<(), AuthError> {
        if acting == target {
            return Err(AuthError::bad_request("cannot delete own account"));
        }
        self.users.delete_user(target).await?;
        self.sessions.destroy_sessions_for_user(target).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown user; `Internal` on storage failure.
    pub async fn activate_user(&self, username: &str) -> Result<(), AuthError> {
        self.users
            .set_disabled(username, false)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemorySessionStore, MemoryUserStore};
    use crate::testing::fixtures::TestFixtures;

    fn auth_with_stores() -> (PasswordAuth, Arc<MemoryUserStore>, Arc<MemorySessionStore>) {
        let users = Arc::new(MemoryUserStore::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let auth = PasswordAuth::new(
            Arc::clone(&users) as Arc<dyn UserStore>,
            Arc::clone(&sessions) as Arc<dyn SessionStore>,
        );
        (auth, users, sessions)
    }

    #[tokio::test]
    async fn test_login_success_and_failure() {
        let (auth, _, _) = auth_with_stores();
        auth.create_user("alice", "correct horse").await.unwrap();

        let user = auth.login("alice", "correct horse").await.unwrap();
        assert_eq!(user.username, "alice");

        let err = auth.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(msg) if msg == "invalid credentials"));

        let err = auth.login("nobody", "whatever").await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(msg) if msg == "invalid credentials"));
    }

    #[tokio::test]
    async fn test_wrong_password_beats_disabled_check() {
        let (auth, users, _) = auth_with_stores();
        auth.create_user("alice", "pw").await.unwrap();
        users.set_disabled("alice", true).await.unwrap();

        // Credential failure is reported before the disabled state
        let err = auth.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(msg) if msg == "invalid credentials"));

        let err = auth.login("alice", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(msg) if msg == "user disabled"));
    }

    #[tokio::test]
    async fn test_deprecated_hash_auto_upgrades() {
        let (auth, users, _) = auth_with_stores();

        let legacy_hash = Pbkdf2Scheme.hash("pw").unwrap();
        users
            .create_user(&UserRecord {
                username: "legacy".to_string(),
                password_hash: legacy_hash.clone(),
                disabled: false,
            })
            .await
            .unwrap();

        auth.login("legacy", "pw").await.unwrap();

        let stored = users.user("legacy").await.unwrap().password_hash;
        assert!(stored.starts_with("$argon2"));
        assert_ne!(stored, legacy_hash);

        // And the upgraded hash still verifies
        auth.login("legacy", "pw").await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_upgrade_disabled_leaves_hash() {
        let (auth, users, _) = auth_with_stores();
        let auth = auth.with_auto_upgrade(false);

        let legacy_hash = Pbkdf2Scheme.hash("pw").unwrap();
        users
            .create_user(&UserRecord {
                username: "legacy".to_string(),
                password_hash: legacy_hash.clone(),
                disabled: false,
            })
            .await
            .unwrap();

        auth.login("legacy", "pw").await.unwrap();
        assert_eq!(users.user("legacy").await.unwrap().password_hash, legacy_hash);
    }

    #[tokio::test]
    async fn test_deactivate_cascades_and_refuses_self() {
        let (auth, users, sessions) = auth_with_stores();
        auth.create_user("admin", "pw").await.unwrap();
        auth.create_user("victim", "pw").await.unwrap();
        let record = TestFixtures::session_record("victim", 0, false);
        sessions.insert(record.clone(), None);

        let err = auth.deactivate_user("admin", "admin").await.unwrap_err();
        assert!(matches!(err, AuthError::BadRequest(_)));

        auth.deactivate_user("admin", "victim").await.unwrap();
        assert!(users.user("victim").await.unwrap().disabled);
        assert!(sessions.session(record.id).await.unwrap().expired);

        auth.activate_user("victim").await.unwrap();
        assert!(!users.user("victim").await.unwrap().disabled);
    }

    #[tokio::test]
    async fn test_delete_cascades_and_refuses_self() {
        let (auth, users, sessions) = auth_with_stores();
        auth.create_user("admin", "pw").await.unwrap();
        auth.create_user("victim", "pw").await.unwrap();
        let record = TestFixtures::session_record("victim", 0, false);
        sessions.insert(record.clone(), None);

        let err = auth.delete_user("admin", "admin").await.unwrap_err();
        assert!(matches!(err, AuthError::BadRequest(_)));

        auth.delete_user("admin", "victim").await.unwrap();
        assert!(users.user("victim").await.is_err());
        assert!(sessions.session(record.id).await.unwrap().expired);
    }
}
