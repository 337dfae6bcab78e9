#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use oidc_gateway::{
    handlers, open_connection, settings::GatewaySettings, utils::logging::init_logger, Gateway,
    GatewayOptions, HealthMonitor, OidcClient, SessionStore,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // The logger comes up before validation so that settings warnings are visible
    let settings = GatewaySettings::load_base_settings().context("failed to load settings")?;
    init_logger(&settings.logging).context("failed to initialize logging")?;
    let settings = settings.into_validated().context("invalid settings")?;

    let connection = open_connection(&settings.storage, settings.session.max_age_seconds)
        .context("failed to open session storage")?;
    let store = Arc::new(
        SessionStore::from_settings(&settings.session, settings.cookie_secure(), connection)
            .context("failed to create session store")?,
    );

    let provider = OidcClient::discover(&settings.oidc)
        .await
        .context("failed to initialize the OIDC provider")?;
    let gateway = web::Data::new(Gateway::new(
        Arc::clone(&store),
        Arc::new(provider),
        GatewayOptions::from_settings(&settings),
    ));

    let monitor = HealthMonitor::new(Arc::clone(&store));
    let probe = monitor.start(Duration::from_secs(settings.health.interval_secs.max(1)));
    let monitor = web::Data::new(monitor);

    let result = start_server(&settings, gateway, monitor).await;

    if let Err(e) = probe.stop().await {
        log::warn!("Health monitor did not stop cleanly: {e}");
    }
    store.close().await.context("failed to close session storage")?;
    log::info!("Session storage closed");
    result
}

/// Start the HTTP server
///
/// # Errors
///
/// Returns an error if:
/// - Server binding fails
/// - Server fails to start
async fn start_server(
    settings: &GatewaySettings,
    gateway: web::Data<Gateway>,
    monitor: web::Data<HealthMonitor>,
) -> anyhow::Result<()> {
    let bind_address = settings.get_bind_address();
    let callback_path = settings.callback_path();
    let cors_origins = settings.get_allowed_origins();
    print_startup_info(&bind_address, &callback_path, gateway.store().backend());

    HttpServer::new(move || {
        let cors_origins = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _| {
                cors_origins
                    .iter()
                    .any(|allowed| allowed == origin.to_str().unwrap_or(""))
            })
            .allowed_methods(vec!["GET", "OPTIONS"])
            .allowed_headers(vec!["Authorization", "Content-Type", "Accept"])
            .expose_headers(vec!["user_name", "user_groups"])
            .supports_credentials()
            .max_age(3600);

        let callback_path = callback_path.clone();
        App::new()
            .app_data(gateway.clone())
            .app_data(monitor.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .configure(move |cfg| handlers::configure(cfg, &callback_path))
    })
    .bind(&bind_address)
    .with_context(|| format!("failed to bind {bind_address}"))?
    .run()
    .await
    .context("server error")
}

fn print_startup_info(bind_address: &str, callback_path: &str, backend: &str) {
    log::info!(
        "Starting oidc-gateway {} on http://{bind_address}",
        oidc_gateway::VERSION
    );
    log::info!("Session backend: {backend}");
    log::info!("Endpoints:");
    log::info!("  GET {callback_path} - OIDC callback");
    log::info!("  GET /logout - Revoke session");
    log::info!("  GET /refresh_token - Refresh tokens (cookie or bearer)");
    log::info!("  GET /healthz - Storage health");
    log::info!("  ANY {{any other path}} - Auth check");
}
