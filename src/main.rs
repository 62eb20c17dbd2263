#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![deny(warnings)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use gatehouse::handlers::configure_services;
use gatehouse::oidc::OidcClient;
use gatehouse::password::PasswordAuth;
use gatehouse::roles::RoleReconciler;
use gatehouse::session::{CookieFactory, SessionService, XsrfGuard};
use gatehouse::settings::GatehouseSettings;
use gatehouse::storage::memory::{MemoryRoleStore, MemorySessionStore, MemoryUserStore};
use gatehouse::storage::{RoleStore, SessionStore, UserStore};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Validates the cookie key up front; a bad key fails here, not on
    // the first request
    let settings = GatehouseSettings::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load settings: {e}")))?;
    settings.init_logging();

    let keys = settings
        .key_set()
        .map_err(|e| std::io::Error::other(format!("Invalid cookie key: {e}")))?;
    let cookies = CookieFactory::new(
        keys,
        settings.cookies.secure,
        settings.cookies.auth_cookie_name.clone(),
        settings.xsrf.cookie_name.clone(),
        settings.cookies.oidc_cookie_name.clone(),
    );

    // TODO: swap the in-memory stores for the SQL-backed adapters once
    // those land; everything downstream only sees the trait objects
    let session_store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let user_store: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
    let role_store: Arc<dyn RoleStore> = Arc::new(MemoryRoleStore::new());

    let sessions = SessionService::new(
        Arc::clone(&session_store),
        cookies.clone(),
        settings.session.timeout_seconds,
    );
    let xsrf = XsrfGuard::new(
        cookies,
        settings.xsrf.header_name.clone(),
        settings.xsrf.ttl_seconds,
        settings.xsrf.rewrite_window_seconds,
    );
    let password = PasswordAuth::new(Arc::clone(&user_store), Arc::clone(&session_store));
    let reconciler = RoleReconciler::new(Arc::clone(&role_store));
    let oidc = OidcClient::new(settings.oidc.clone(), settings.oidc_client_secret())
        .map_err(|e| std::io::Error::other(format!("Failed to build OIDC client: {e}")))?;

    let bind_address = settings.bind_address();
    log::info!(
        "Starting gatehouse {} on {bind_address} (OIDC {})",
        gatehouse::VERSION,
        if settings.oidc.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    let sessions = web::Data::new(sessions);
    let xsrf = web::Data::new(xsrf);
    let password = web::Data::new(password);
    let reconciler = web::Data::new(reconciler);
    let oidc = web::Data::new(oidc);
    let roles = web::Data::from(role_store);
    let settings = web::Data::new(settings);

    HttpServer::new(move || {
        App::new()
            .app_data(sessions.clone())
            .app_data(xsrf.clone())
            .app_data(password.clone())
            .app_data(reconciler.clone())
            .app_data(oidc.clone())
            .app_data(roles.clone())
            .app_data(settings.clone())
            .wrap(Logger::default())
            .configure(configure_services)
    })
    .bind(&bind_address)?
    .run()
    .await
}
