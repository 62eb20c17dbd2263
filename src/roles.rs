//! Reconciliation of IdP-claimed roles into the internal grant store
//!
//! The IdP hands back untyped role name strings; for each authorization
//! domain those names are filtered down to roles that actually exist
//! there, then the stored grants are diffed against that target set.
//! The pass is all-or-nothing and idempotent.

use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, info};

use crate::error::AuthError;
use crate::storage::RoleStore;

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Whether any domain ended up with at least one granted role. A login
    /// that reconciles to zero roles everywhere is treated as an
    /// authorization failure by the OIDC callback.
    pub has_any_role: bool,
}

#[derive(Clone)]
pub struct RoleReconciler {
    store: Arc<dyn RoleStore>,
}

impl RoleReconciler {
    #[must_use]
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self { store }
    }

    /// Synchronize `username`'s stored grants with the claimed role names,
    /// independently per domain.
    ///
    /// Claimed names that do not exist in a domain are silently dropped.
    /// Additions and removals are only issued when non-empty, so an
    /// immediate re-run with identical claims performs no writes.
    ///
    /// # Errors
    ///
    /// Any storage failure in any domain aborts the entire pass as
    /// `Internal`; there are no partial-success semantics.
    pub async fn reconcile(
        &self,
        username: &str,
        claimed: &[String],
    ) -> Result<ReconcileOutcome, AuthError> {
        let domains = self.store.domains().await.map_err(internal)?;
        let existing = self
            .store
            .user_roles(username, &domains)
            .await
            .map_err(internal)?;

        let mut has_any_role = false;

        for domain in &domains {
            let mut to_assign = BTreeSet::new();
            for name in claimed {
                if self
                    .store
                    .role_exists(domain, name)
                    .await
                    .map_err(internal)?
                {
                    to_assign.insert(name.clone());
                } else {
                    debug!("Dropping unknown role '{name}' claimed for domain '{domain}'");
                }
            }

            let current: BTreeSet<String> = existing
                .get(domain)
                .map(|roles| roles.iter().cloned().collect())
                .unwrap_or_default();

            let new_roles: Vec<String> = to_assign.difference(&current).cloned().collect();
            if !new_roles.is_empty() {
                info!(
                    "Granting {} role(s) to '{username}' in domain '{domain}'",
                    new_roles.len()
                );
                self.store
                    .add_user_roles(domain, username, &new_roles)
                    .await
                    .map_err(internal)?;
            }

            let remove_roles: Vec<String> = current.difference(&to_assign).cloned().collect();
            if !remove_roles.is_empty() {
                info!(
                    "Revoking {} role(s) from '{username}' in domain '{domain}'",
                    remove_roles.len()
                );
                self.store
                    .delete_user_roles(domain, username, &remove_roles)
                    .await
                    .map_err(internal)?;
            }

            has_any_role |= !to_assign.is_empty();
        }

        Ok(ReconcileOutcome { has_any_role })
    }
}

fn internal(err: crate::storage::StoreError) -> AuthError {
    // Reconciliation has no meaningful NotFound; every failure is Internal
    AuthError::Internal(anyhow::Error::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryRoleStore;

    fn claimed(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_convergence_diff() {
        let store = Arc::new(MemoryRoleStore::new());
        store.define_domain("reports", &["A", "B", "C"]);
        store.grant("reports", "alice", &["A", "B"]);

        let reconciler = RoleReconciler::new(Arc::clone(&store) as Arc<dyn RoleStore>);

        // existing {A,B}, valid-claimed {B,C} -> add {C}, remove {A}
        let outcome = reconciler
            .reconcile("alice", &claimed(&["B", "C"]))
            .await
            .unwrap();
        assert!(outcome.has_any_role);

        let roles = store
            .user_roles("alice", &["reports".to_string()])
            .await
            .unwrap();
        assert_eq!(roles["reports"], vec!["B".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = Arc::new(MemoryRoleStore::new());
        store.define_domain("reports", &["A", "B", "C"]);
        store.grant("reports", "alice", &["A", "B"]);

        let reconciler = RoleReconciler::new(Arc::clone(&store) as Arc<dyn RoleStore>);
        reconciler
            .reconcile("alice", &claimed(&["B", "C"]))
            .await
            .unwrap();
        let before = store
            .user_roles("alice", &["reports".to_string()])
            .await
            .unwrap();

        // Re-running with identical claims changes nothing
        let outcome = reconciler
            .reconcile("alice", &claimed(&["B", "C"]))
            .await
            .unwrap();
        assert!(outcome.has_any_role);
        let after = store
            .user_roles("alice", &["reports".to_string()])
            .await
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_unknown_claims_silently_dropped() {
        let store = Arc::new(MemoryRoleStore::new());
        store.define_domain("reports", &["viewer"]);

        let reconciler = RoleReconciler::new(Arc::clone(&store) as Arc<dyn RoleStore>);
        let outcome = reconciler
            .reconcile("alice", &claimed(&["superuser", "root"]))
            .await
            .unwrap();

        assert!(!outcome.has_any_role);
        let roles = store
            .user_roles("alice", &["reports".to_string()])
            .await
            .unwrap();
        assert!(roles.is_empty());
    }

    #[tokio::test]
    async fn test_domains_reconcile_independently() {
        let store = Arc::new(MemoryRoleStore::new());
        store.define_domain("reports", &["viewer"]);
        store.define_domain("billing", &["admin"]);
        store.grant("billing", "alice", &["admin"]);

        let reconciler = RoleReconciler::new(Arc::clone(&store) as Arc<dyn RoleStore>);
        // "viewer" only exists in reports; billing keeps nothing claimed
        let outcome = reconciler
            .reconcile("alice", &claimed(&["viewer"]))
            .await
            .unwrap();
        assert!(outcome.has_any_role);

        let all = store
            .user_roles("alice", &["reports".to_string(), "billing".to_string()])
            .await
            .unwrap();
        assert_eq!(all["reports"], vec!["viewer".to_string()]);
        // billing's stored admin grant was revoked: not claimed there
        assert!(all.get("billing").is_none_or(Vec::is_empty));
    }
}
