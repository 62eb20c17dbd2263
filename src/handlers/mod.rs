//! HTTP surface: route registration and the handler functions

mod auth;
mod oidc;

pub use auth::{authenticated, health, logout, password_login};
pub use oidc::{frontchannel_logout, oidc_callback, oidc_login};

use actix_web::web;

/// Register every route the service exposes.
pub fn configure_services(cfg: &mut web::ServiceConfig) {
    cfg
        // Session endpoints
        .route("/auth/authenticated", web::get().to(authenticated))
        .route("/auth/logout", web::delete().to(logout))
        .route("/auth/login", web::post().to(password_login))
        // OIDC endpoints
        .route("/auth/oidc/login", web::get().to(oidc_login))
        .route("/auth/oidc/callback", web::get().to(oidc_callback))
        .route("/auth/oidc/callback", web::post().to(oidc_callback))
        .route(
            "/auth/oidc/frontchannel-logout",
            web::get().to(frontchannel_logout),
        )
        // Health endpoint
        .route("/ping", web::get().to(health));
}
