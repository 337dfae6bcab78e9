// Auth entry handler: pass authenticated requests, start login for the rest
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::auth::{AuthError, Gateway, NONCE_FLASH, REDIRECT_FLASH, USER_NAME_KEY};
use crate::session::Session;
use crate::utils::crypto::generate_state_token;

/// Query parameters the entry handler looks at
#[derive(Debug, Default, Deserialize)]
pub struct EntryQuery {
    /// Forwarded to the provider to pre-select an upstream connector
    pub connector_id: Option<String>,
}

/// Catch-all auth check
///
/// Whitelisted paths and authenticated sessions get `200 OK`, the latter
/// with the identity headers. Everyone else is redirected to the provider.
pub async fn auth(
    req: HttpRequest,
    query: web::Query<EntryQuery>,
    gateway: web::Data<Gateway>,
) -> HttpResponse {
    if gateway.is_whitelisted(req.path()) {
        log::debug!("Whitelisted path {}, skipping authentication", req.path());
        return HttpResponse::Ok().finish();
    }

    let session = match gateway.load_session(&req).await {
        Ok(session) => session,
        Err(e) => return gateway.reject(&e, None).await,
    };

    match authorize(&req, &query, &gateway, &session).await {
        Ok(response) => response,
        Err(e) => gateway.reject(&e, Some(&session)).await,
    }
}

async fn authorize(
    req: &HttpRequest,
    query: &EntryQuery,
    gateway: &Gateway,
    session: &Session,
) -> Result<HttpResponse, AuthError> {
    if !session.is_new() && session.contains_key(USER_NAME_KEY) {
        let mut response = HttpResponse::Ok();
        for header in gateway.identity_headers(session)? {
            response.insert_header(header);
        }
        return Ok(response.finish());
    }

    // Drop any stale login attempt so the new state is the only one
    session.flashes(REDIRECT_FLASH);
    session.flashes(NONCE_FLASH);

    let state = generate_state_token();
    let original_url = req.uri().to_string();
    session.add_flash(REDIRECT_FLASH, &original_url)?;
    session.add_flash(NONCE_FLASH, &state)?;
    let cookie = gateway.store().save(session).await?;

    let extra: Vec<(&str, &str)> = query
        .connector_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(|id| vec![("connector_id", id)])
        .unwrap_or_default();
    let authorization_url = gateway.provider().authorization_url(&state, &extra)?;

    log::info!("Redirecting unauthenticated request for {original_url} to the identity provider");
    Ok(HttpResponse::Found()
        .cookie(cookie)
        .insert_header((header::LOCATION, authorization_url))
        .finish())
}
