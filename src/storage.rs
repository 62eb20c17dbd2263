//! Storage contracts for sessions, users, and role grants
//!
//! The session core only ever talks to these traits; concrete SQL drivers
//! are external collaborators and live outside this crate. An in-memory
//! adapter suitable for development and tests ships in [`memory`].

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{SessionRecord, UserRecord};

/// Storage failure taxonomy. `NotFound` is the only variant callers branch
/// on; everything else is an opaque backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("storage backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(anyhow::anyhow!(msg.into()))
    }
}

/// Session persistence contract.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session record by id.
    async fn session(&self, id: Uuid) -> Result<SessionRecord, StoreError>;

    /// Create a new session for `username`, optionally correlated to the
    /// IdP session id from an OIDC login. Returns the new record id.
    async fn new_session(
        &self,
        username: &str,
        oidc_sid: Option<&str>,
    ) -> Result<Uuid, StoreError>;

    /// Bump `updated_at` to now.
    async fn update_session_activity(&self, id: Uuid) -> Result<(), StoreError>;

    /// Mark the session expired. Records are never deleted.
    async fn destroy_session(&self, id: Uuid) -> Result<(), StoreError>;

    /// Mark every session of `username` expired (account deactivation).
    async fn destroy_sessions_for_user(&self, username: &str) -> Result<(), StoreError>;

    /// Mark every session correlated to the IdP session id expired
    /// (front-channel logout). Unknown sids are not an error.
    async fn destroy_session_oidc(&self, oidc_sid: &str) -> Result<(), StoreError>;
}

/// User persistence contract for the password login variant.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user(&self, username: &str) -> Result<UserRecord, StoreError>;

    async fn create_user(&self, record: &UserRecord) -> Result<(), StoreError>;

    async fn set_password_hash(&self, username: &str, hash: &str) -> Result<(), StoreError>;

    async fn set_disabled(&self, username: &str, disabled: bool) -> Result<(), StoreError>;

    async fn delete_user(&self, username: &str) -> Result<(), StoreError>;
}

/// Role-grant provider contract. Grants are owned by the external
/// permission engine; the reconciler only reads and mutates them.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// All authorization domains known to the provider.
    async fn domains(&self) -> Result<Vec<String>, StoreError>;

    /// Stored role grants of `username` per domain. Domains with no grants
    /// may be absent from the map.
    async fn user_roles(
        &self,
        username: &str,
        domains: &[String],
    ) -> Result<HashMap<String, Vec<String>>, StoreError>;

    async fn role_exists(&self, domain: &str, role: &str) -> Result<bool, StoreError>;

    async fn add_user_roles(
        &self,
        domain: &str,
        username: &str,
        roles: &[String],
    ) -> Result<(), StoreError>;

    async fn delete_user_roles(
        &self,
        domain: &str,
        username: &str,
        roles: &[String],
    ) -> Result<(), StoreError>;
}

pub mod memory {
    //! In-memory backend adapter
    //!
    //! Interchangeable with a real driver behind the same traits. Used by
    //! the dev server wiring and throughout the test suite.

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use super::{RoleStore, SessionStore, StoreError, UserStore};
    use crate::models::{SessionRecord, UserRecord};

    #[derive(Clone)]
    struct StoredSession {
        record: SessionRecord,
        oidc_sid: Option<String>,
    }

    /// Session store backed by a mutex-guarded map.
    #[derive(Default)]
    pub struct MemorySessionStore {
        sessions: Mutex<HashMap<Uuid, StoredSession>>,
    }

    impl MemorySessionStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Insert a record directly, bypassing `new_session`. Test hook for
        /// constructing sessions with specific timestamps or flags.
        pub fn insert(&self, record: SessionRecord, oidc_sid: Option<String>) {
            self.sessions
                .lock()
                .unwrap()
                .insert(record.id, StoredSession { record, oidc_sid });
        }
    }

    #[async_trait]
    impl SessionStore for MemorySessionStore {
        async fn session(&self, id: Uuid) -> Result<SessionRecord, StoreError> {
            self.sessions
                .lock()
                .unwrap()
                .get(&id)
                .map(|s| s.record.clone())
                .ok_or(StoreError::NotFound)
        }

        async fn new_session(
            &self,
            username: &str,
            oidc_sid: Option<&str>,
        ) -> Result<Uuid, StoreError> {
            let now = Utc::now();
            let record = SessionRecord {
                id: Uuid::new_v4(),
                username: username.to_string(),
                created_at: now,
                updated_at: now,
                expired: false,
            };
            let id = record.id;
            self.sessions.lock().unwrap().insert(
                id,
                StoredSession {
                    record,
                    oidc_sid: oidc_sid.map(ToString::to_string),
                },
            );
            Ok(id)
        }

        async fn update_session_activity(&self, id: Uuid) -> Result<(), StoreError> {
            let mut sessions = self.sessions.lock().unwrap();
            let stored = sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
            stored.record.updated_at = Utc::now();
            Ok(())
        }

        async fn destroy_session(&self, id: Uuid) -> Result<(), StoreError> {
            let mut sessions = self.sessions.lock().unwrap();
            let stored = sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
            stored.record.expired = true;
            Ok(())
        }

        async fn destroy_sessions_for_user(&self, username: &str) -> Result<(), StoreError> {
            let mut sessions = self.sessions.lock().unwrap();
            for stored in sessions.values_mut() {
                if stored.record.username == username {
                    stored.record.expired = true;
                }
            }
            Ok(())
        }

        async fn destroy_session_oidc(&self, oidc_sid: &str) -> Result<(), StoreError> {
            let mut sessions = self.sessions.lock().unwrap();
            for stored in sessions.values_mut() {
                if stored.oidc_sid.as_deref() == Some(oidc_sid) {
                    stored.record.expired = true;
                }
            }
            Ok(())
        }
    }

    /// User store backed by a mutex-guarded map keyed by username.
    #[derive(Default)]
    pub struct MemoryUserStore {
        users: Mutex<HashMap<String, UserRecord>>,
    }

    impl MemoryUserStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl UserStore for MemoryUserStore {
        async fn user(&self, username: &str) -> Result<UserRecord, StoreError> {
            self.users
                .lock()
                .unwrap()
                .get(username)
                .cloned()
                .ok_or(StoreError::NotFound)
        }

        async fn create_user(&self, record: &UserRecord) -> Result<(), StoreError> {
            let mut users = self.users.lock().unwrap();
            if users.contains_key(&record.username) {
                return Err(StoreError::backend(format!(
                    "user already exists: {}",
                    record.username
                )));
            }
            users.insert(record.username.clone(), record.clone());
            Ok(())
        }

        async fn set_password_hash(&self, username: &str, hash: &str) -> Result<(), StoreError> {
            let mut users = self.users.lock().unwrap();
            let user = users.get_mut(username).ok_or(StoreError::NotFound)?;
            user.password_hash = hash.to_string();
            Ok(())
        }

        async fn set_disabled(&self, username: &str, disabled: bool) -> Result<(), StoreError> {
            let mut users = self.users.lock().unwrap();
            let user = users.get_mut(username).ok_or(StoreError::NotFound)?;
            user.disabled = disabled;
            Ok(())
        }

        async fn delete_user(&self, username: &str) -> Result<(), StoreError> {
            self.users
                .lock()
                .unwrap()
                .remove(username)
                .map(|_| ())
                .ok_or(StoreError::NotFound)
        }
    }

    /// Role provider backed by mutex-guarded maps: known roles per domain
    /// plus grants per (domain, user).
    #[derive(Default)]
    pub struct MemoryRoleStore {
        known_roles: Mutex<HashMap<String, HashSet<String>>>,
        grants: Mutex<HashMap<(String, String), HashSet<String>>>,
    }

    impl MemoryRoleStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a domain with the set of roles that exist in it.
        pub fn define_domain(&self, domain: &str, roles: &[&str]) {
            self.known_roles.lock().unwrap().insert(
                domain.to_string(),
                roles.iter().map(ToString::to_string).collect(),
            );
        }

        /// Grant roles directly, bypassing reconciliation. Test hook.
        pub fn grant(&self, domain: &str, username: &str, roles: &[&str]) {
            self.grants
                .lock()
                .unwrap()
                .entry((domain.to_string(), username.to_string()))
                .or_default()
                .extend(roles.iter().map(ToString::to_string));
        }
    }

    #[async_trait]
    impl RoleStore for MemoryRoleStore {
        async fn domains(&self) -> Result<Vec<String>, StoreError> {
            let mut domains: Vec<String> =
                self.known_roles.lock().unwrap().keys().cloned().collect();
            domains.sort();
            Ok(domains)
        }

        async fn user_roles(
            &self,
            username: &str,
            domains: &[String],
        ) -> Result<HashMap<String, Vec<String>>, StoreError> {
            let grants = self.grants.lock().unwrap();
            let mut result = HashMap::new();
            for domain in domains {
                if let Some(roles) = grants.get(&(domain.clone(), username.to_string())) {
                    let mut roles: Vec<String> = roles.iter().cloned().collect();
                    roles.sort();
                    result.insert(domain.clone(), roles);
                }
            }
            Ok(result)
        }

        async fn role_exists(&self, domain: &str, role: &str) -> Result<bool, StoreError> {
            Ok(self
                .known_roles
                .lock()
                .unwrap()
                .get(domain)
                .is_some_and(|roles| roles.contains(role)))
        }

        async fn add_user_roles(
            &self,
            domain: &str,
            username: &str,
            roles: &[String],
        ) -> Result<(), StoreError> {
            self.grants
                .lock()
                .unwrap()
                .entry((domain.to_string(), username.to_string()))
                .or_default()
                .extend(roles.iter().cloned());
            Ok(())
        }

        async fn delete_user_roles(
            &self,
            domain: &str,
            username: &str,
            roles: &[String],
        ) -> Result<(), StoreError> {
            let mut grants = self.grants.lock().unwrap();
            if let Some(granted) = grants.get_mut(&(domain.to_string(), username.to_string())) {
                for role in roles {
                    granted.remove(role);
                }
            }
            Ok(())
        }
    }

}
