// HTTP request handlers for the gateway
pub mod auth;
pub mod callback;
pub mod logout;
pub mod refresh;
pub mod system;

use actix_web::web;

// Re-export the main handler functions
pub use auth::auth;
pub use callback::callback;
pub use logout::logout;
pub use refresh::refresh_token;
pub use system::{favicon, healthz};

/// Register the gateway routes
///
/// `callback_path` is the path component of the configured redirect URL.
/// Every path without a dedicated route goes through the auth check.
pub fn configure(cfg: &mut web::ServiceConfig, callback_path: &str) {
    cfg.route(callback_path, web::get().to(callback))
        .route("/logout", web::get().to(logout))
        .route("/refresh_token", web::get().to(refresh_token))
        .route("/healthz", web::get().to(healthz))
        .route("/favicon.ico", web::get().to(favicon))
        .default_service(web::to(auth));
}
