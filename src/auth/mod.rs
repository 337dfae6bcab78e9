//! Authentication state shared by the HTTP handlers
//!
//! A request moves through `Unauthenticated -> PendingCallback ->
//! Authenticated`; logout or any verification failure moves it back. The
//! state lives entirely in the server-side session:
//!
//! - **PendingCallback** holds the single-use `nonce` and `redirect_to`
//!   flashes written by the entry handler
//! - **Authenticated** holds `user_name`, the optional `user_groups`, the raw
//!   `id_token` and, with offline access, the `refresh-token`
//!
//! [`Gateway`] bundles the session store, the identity provider and the
//! claim configuration the handlers need.

pub mod error;

pub use error::AuthError;

use actix_web::cookie::Cookie;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use std::sync::Arc;

use crate::oidc::{Identity, OidcProvider, TokenSet};
use crate::session::cookie::create_expired_cookie;
use crate::session::{Session, SessionStore};
use crate::settings::GatewaySettings;

/// Session key holding the authenticated username
pub const USER_NAME_KEY: &str = "user_name";
/// Session key holding the user's groups
pub const USER_GROUPS_KEY: &str = "user_groups";
/// Session key holding the raw ID token
pub const ID_TOKEN_KEY: &str = "id_token";
/// Session key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh-token";
/// Flash key holding the pending authorization state
pub const NONCE_FLASH: &str = "nonce";
/// Flash key holding the URL to return to after login
pub const REDIRECT_FLASH: &str = "redirect_to";

/// Response header carrying the username of an authenticated request
pub const USER_NAME_HEADER: &str = "user_name";
/// Response header carrying the comma-joined groups
pub const USER_GROUPS_HEADER: &str = "user_groups";

/// Claim and routing configuration for the auth flow
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub cookie_name: String,
    pub username_claim: String,
    /// Empty disables group extraction
    pub groups_claim: String,
    pub offline_access: bool,
    /// Path prefixes served without authentication
    pub whitelist: Vec<String>,
}

impl GatewayOptions {
    #[must_use]
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            cookie_name: settings.session.cookie_name.clone(),
            username_claim: settings.oidc.username_claim.clone(),
            groups_claim: settings.oidc.groups_claim.clone(),
            offline_access: settings.oidc.offline_access,
            whitelist: settings.application.whitelist.clone(),
        }
    }
}

/// Everything the auth handlers share
pub struct Gateway {
    store: Arc<SessionStore>,
    provider: Arc<dyn OidcProvider>,
    options: GatewayOptions,
}

impl Gateway {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn OidcProvider>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            store,
            provider,
            options,
        }
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    #[must_use]
    pub fn provider(&self) -> &dyn OidcProvider {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.options.cookie_name
    }

    /// Whether `path` bypasses authentication
    #[must_use]
    pub fn is_whitelisted(&self, path: &str) -> bool {
        self.options
            .whitelist
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }

    /// Load the request's session
    ///
    /// A rejected cookie reads as "no session"; a backend or codec failure
    /// is returned so that the request fails closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot load or decode the session
    pub async fn load_session(&self, req: &HttpRequest) -> Result<Session, AuthError> {
        match self.store.get(req, self.cookie_name()).await {
            Ok(session) => Ok(session),
            Err(e) if e.is_client_error() => {
                log::debug!("Ignoring session cookie: {}", e.error());
                Ok(e.into_session())
            }
            Err(e) => {
                let (_, source) = e.into_parts();
                Err(source.into())
            }
        }
    }

    /// Verify a fresh token set and write the resulting identity into `session`
    ///
    /// `fallback_refresh_token` is kept when the provider does not rotate
    /// refresh tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID token is missing or fails verification, or
    /// the configured claims cannot be extracted
    pub fn authenticate_tokens(
        &self,
        session: &Session,
        tokens: TokenSet,
        nonce: Option<&str>,
        fallback_refresh_token: Option<String>,
    ) -> Result<Identity, AuthError> {
        let raw = tokens
            .id_token
            .ok_or(crate::oidc::ProviderError::MissingToken("id_token"))?;
        let claims = self.provider.verify_id_token(&raw, nonce)?;
        let identity = claims.identity(&self.options.username_claim, &self.options.groups_claim)?;

        session.insert(USER_NAME_KEY, &identity.user_name)?;
        match &identity.user_groups {
            Some(groups) => session.insert(USER_GROUPS_KEY, groups)?,
            None => {
                session.remove(USER_GROUPS_KEY);
            }
        }
        session.insert(ID_TOKEN_KEY, raw)?;
        if self.options.offline_access {
            if let Some(refresh_token) = tokens.refresh_token.or(fallback_refresh_token) {
                session.insert(REFRESH_TOKEN_KEY, refresh_token)?;
            }
        }
        Ok(identity)
    }

    /// Identity headers for an authenticated session
    ///
    /// # Errors
    ///
    /// Returns an error if a stored identity value is not of the expected type
    pub fn identity_headers(&self, session: &Session) -> Result<Vec<(&'static str, String)>, AuthError> {
        let mut headers = Vec::with_capacity(2);
        if let Some(user_name) = session.get::<String>(USER_NAME_KEY)? {
            headers.push((USER_NAME_HEADER, user_name));
        }
        if !self.options.groups_claim.is_empty() {
            if let Some(groups) = session.get::<Vec<String>>(USER_GROUPS_KEY)? {
                headers.push((USER_GROUPS_HEADER, groups.join(",")));
            }
        }
        Ok(headers)
    }

    /// Delete `session` from the backend and return the clearing cookie
    ///
    /// A session that was never persisted only needs its cookie cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend delete fails
    pub async fn invalidate(&self, session: &Session) -> Result<Cookie<'static>, AuthError> {
        if session.is_new() {
            return Ok(create_expired_cookie(self.cookie_name(), &session.options()));
        }
        session.set_max_age(-1);
        Ok(self.store.save(session).await?)
    }

    /// Turn an auth failure into a response, clearing the session when the
    /// failure puts authentication state in question
    pub async fn reject(&self, err: &AuthError, session: Option<&Session>) -> HttpResponse {
        if err.status_code().is_server_error() {
            log::error!("Authentication request failed: {err}");
        } else {
            log::warn!("Authentication rejected: {err}");
        }

        let mut response = err.error_response();
        if err.clears_session() {
            let cookie = match session {
                Some(session) => self.invalidate(session).await.unwrap_or_else(|e| {
                    log::error!("Failed to delete rejected session: {e}");
                    create_expired_cookie(self.cookie_name(), &self.store.options())
                }),
                None => create_expired_cookie(self.cookie_name(), &self.store.options()),
            };
            if let Err(e) = response.add_cookie(&cookie) {
                log::error!("Failed to attach clearing cookie: {e}");
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{memory_store, MockProvider};

    fn gateway(options: GatewayOptions) -> Gateway {
        Gateway::new(
            Arc::new(memory_store(600)),
            Arc::new(MockProvider::new()),
            options,
        )
    }

    fn options() -> GatewayOptions {
        GatewayOptions {
            cookie_name: "test-session".to_string(),
            username_claim: "email".to_string(),
            groups_claim: "groups".to_string(),
            offline_access: true,
            whitelist: vec!["/public".to_string(), String::new()],
        }
    }

    #[test]
    fn test_whitelist_is_prefix_match() {
        let gateway = gateway(options());
        assert!(gateway.is_whitelisted("/public"));
        assert!(gateway.is_whitelisted("/public/logo.png"));
        assert!(!gateway.is_whitelisted("/private"));
        assert!(!gateway.is_whitelisted("/"));
    }

    #[test]
    fn test_authenticate_tokens_writes_identity() {
        let gateway = gateway(options());
        let session = gateway.store().fresh("test-session");
        let tokens = MockProvider::token_set("alice@example.com", &["admins", "dev"], None);

        let identity = gateway
            .authenticate_tokens(&session, tokens, None, Some("previous".to_string()))
            .unwrap();
        assert_eq!(identity.user_name, "alice@example.com");

        let headers = gateway.identity_headers(&session).unwrap();
        assert_eq!(
            headers,
            vec![
                (USER_NAME_HEADER, "alice@example.com".to_string()),
                (USER_GROUPS_HEADER, "admins,dev".to_string()),
            ]
        );
        assert!(session.contains_key(ID_TOKEN_KEY));
        assert_eq!(
            session.get::<String>(REFRESH_TOKEN_KEY).unwrap().as_deref(),
            Some("previous")
        );
    }

    #[test]
    fn test_refresh_token_requires_offline_access() {
        let gateway = gateway(GatewayOptions {
            offline_access: false,
            ..options()
        });
        let session = gateway.store().fresh("test-session");
        let tokens = MockProvider::token_set("bob@example.com", &[], Some("rt-1"));
        gateway
            .authenticate_tokens(&session, tokens, None, None)
            .unwrap();
        assert!(!session.contains_key(REFRESH_TOKEN_KEY));
    }

    #[test]
    fn test_missing_id_token_is_rejected() {
        let gateway = gateway(options());
        let session = gateway.store().fresh("test-session");
        let err = gateway
            .authenticate_tokens(&session, TokenSet::default(), None, None)
            .unwrap_err();
        assert_eq!(err.status_code(), actix_web::http::StatusCode::UNAUTHORIZED);
        assert!(!session.contains_key(USER_NAME_KEY));
    }
}
