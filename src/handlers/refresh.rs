// Token refresh handler
use actix_web::{http::header, web, HttpRequest, HttpResponse};

use crate::auth::{AuthError, Gateway, REFRESH_TOKEN_KEY};
use crate::session::{set_request_cookie, Session};

/// Refresh the session's tokens
///
/// Clients that cannot send cookies may present the session cookie value as
/// `Authorization: Bearer <value>`.
pub async fn refresh_token(req: HttpRequest, gateway: web::Data<Gateway>) -> HttpResponse {
    if let Err(e) = translate_bearer(&req, gateway.cookie_name()) {
        return gateway.reject(&e, None).await;
    }

    let session = match gateway.load_session(&req).await {
        Ok(session) => session,
        Err(e) => return gateway.reject(&e, None).await,
    };

    match refresh(&gateway, &session).await {
        Ok(response) => response,
        Err(e) => gateway.reject(&e, Some(&session)).await,
    }
}

/// Expose a bearer token as the session cookie when no cookie was sent
fn translate_bearer(req: &HttpRequest, cookie_name: &str) -> Result<(), AuthError> {
    if req.cookie(cookie_name).is_some() {
        return Ok(());
    }
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return Ok(());
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::BadBearerToken)?;
    set_request_cookie(req, cookie_name, token);
    Ok(())
}

async fn refresh(gateway: &Gateway, session: &Session) -> Result<HttpResponse, AuthError> {
    if session.is_new() {
        return Err(AuthError::Unauthenticated);
    }
    let refresh_token = session
        .get::<String>(REFRESH_TOKEN_KEY)?
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::Unauthenticated)?;

    let tokens = gateway.provider().refresh(&refresh_token).await?;
    let identity = gateway.authenticate_tokens(session, tokens, None, Some(refresh_token))?;
    let cookie = gateway.store().save(session).await?;

    log::info!("Refreshed tokens for {}", identity.user_name);
    let mut response = HttpResponse::Ok();
    response.cookie(cookie);
    for header in gateway.identity_headers(session)? {
        response.insert_header(header);
    }
    Ok(response.finish())
}
