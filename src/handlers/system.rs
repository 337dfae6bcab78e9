// Health and housekeeping endpoints
use actix_web::{web, HttpResponse};

use crate::health::HealthMonitor;

/// Report the cached storage health
///
/// Never runs a probe itself; before the first probe completes the gateway
/// reports unhealthy.
pub async fn healthz(monitor: web::Data<HealthMonitor>) -> HttpResponse {
    match monitor.last_report().map(|report| report.outcome) {
        Some(Ok(elapsed)) => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(format!("Health check passed in {elapsed:?}")),
        Some(Err(_)) | None => HttpResponse::ServiceUnavailable()
            .content_type("text/plain; charset=utf-8")
            .body("health check failed"),
    }
}

pub async fn favicon() -> HttpResponse {
    HttpResponse::NoContent().finish()
}
