#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the gatehouse application
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod handlers;
pub mod models;
pub mod oidc;
pub mod password;
pub mod roles;
pub mod session;
pub mod settings;
pub mod storage;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use error::AuthError;
pub use models::SessionRecord;
pub use oidc::OidcClient;
pub use roles::RoleReconciler;
pub use session::{SessionService, XsrfGuard};
pub use settings::GatehouseSettings;
