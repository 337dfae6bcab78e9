// Logout handler
use actix_web::{http::header, web, HttpRequest, HttpResponse};

use crate::auth::Gateway;

/// Where the client is sent after logging out
pub const LOGOUT_REDIRECT: &str = "/";

/// Revoke the session
///
/// A stored session is deleted from the backend and the cookie cleared.
/// Logging out without a session still succeeds.
pub async fn logout(req: HttpRequest, gateway: web::Data<Gateway>) -> HttpResponse {
    let session = match gateway.load_session(&req).await {
        Ok(session) => session,
        Err(e) => return gateway.reject(&e, None).await,
    };

    let was_authenticated = !session.is_new();
    let cookie = match gateway.invalidate(&session).await {
        Ok(cookie) => cookie,
        Err(e) => return gateway.reject(&e, None).await,
    };
    if was_authenticated {
        log::info!("Session revoked");
    }

    HttpResponse::SeeOther()
        .cookie(cookie)
        .insert_header((header::LOCATION, LOGOUT_REDIRECT))
        .finish()
}
