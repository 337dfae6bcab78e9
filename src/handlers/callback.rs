// OIDC callback handler
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::auth::{AuthError, Gateway, NONCE_FLASH, REDIRECT_FLASH};
use crate::session::Session;

/// Query parameters of the provider's redirect back to the gateway
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Complete the authorization code flow
///
/// The stored nonce is consumed before anything else happens, so a replayed
/// callback never matches. Every failure after that point deletes the
/// session and clears the cookie.
pub async fn callback(
    req: HttpRequest,
    query: web::Query<CallbackQuery>,
    gateway: web::Data<Gateway>,
) -> HttpResponse {
    let (code, state) = match required_params(&query) {
        Ok(params) => params,
        Err(e) => return gateway.reject(&e, None).await,
    };

    let session = match gateway.load_session(&req).await {
        Ok(session) => session,
        Err(e) => return gateway.reject(&e, None).await,
    };

    match complete_login(&gateway, &session, code, state).await {
        Ok(response) => response,
        Err(e) => gateway.reject(&e, Some(&session)).await,
    }
}

fn required_params(query: &CallbackQuery) -> Result<(&str, &str), AuthError> {
    let code = query
        .code
        .as_deref()
        .filter(|code| !code.is_empty())
        .ok_or(AuthError::MissingParameter("code"))?;
    let state = query
        .state
        .as_deref()
        .filter(|state| !state.is_empty())
        .ok_or(AuthError::MissingParameter("state"))?;
    Ok((code, state))
}

async fn complete_login(
    gateway: &Gateway,
    session: &Session,
    code: &str,
    state: &str,
) -> Result<HttpResponse, AuthError> {
    let nonce = session.take_flash_string(NONCE_FLASH);
    let redirect_to = session.take_flash_string(REDIRECT_FLASH);
    if nonce.as_deref() != Some(state) {
        return Err(AuthError::StateMismatch);
    }

    let tokens = gateway.provider().exchange_code(code).await?;
    let identity = gateway.authenticate_tokens(session, tokens, Some(state), None)?;
    let cookie = gateway.store().save(session).await?;

    let location = redirect_to.unwrap_or_else(|| "/".to_string());
    log::info!(
        "Login validated for {}, redirecting to {location}",
        identity.user_name
    );
    Ok(HttpResponse::Found()
        .cookie(cookie)
        .insert_header((header::LOCATION, location))
        .finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_params() {
        let query = CallbackQuery {
            code: Some("abc".to_string()),
            state: Some("xyz".to_string()),
        };
        assert_eq!(required_params(&query).unwrap(), ("abc", "xyz"));

        let missing_state = CallbackQuery {
            code: Some("abc".to_string()),
            state: None,
        };
        assert!(matches!(
            required_params(&missing_state),
            Err(AuthError::MissingParameter("state"))
        ));

        let empty_code = CallbackQuery {
            code: Some(String::new()),
            state: Some("xyz".to_string()),
        };
        assert!(matches!(
            required_params(&empty_code),
            Err(AuthError::MissingParameter("code"))
        ));
    }
}
