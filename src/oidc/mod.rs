//! OpenID Connect provider access
//!
//! The auth flow talks to the identity provider only through the
//! [`OidcProvider`] trait:
//!
//! - build the authorization URL for a given `state`
//! - exchange an authorization code or a refresh token for a [`TokenSet`]
//! - verify a raw ID token and decode its [`Claims`]
//!
//! [`OidcClient`] implements it on top of the `openidconnect` crate, which
//! performs discovery, JWKS handling and signature validation.

pub mod claims;
pub mod client;

pub use claims::{Claims, ClaimsError, GroupsClaim, Identity};
pub use client::OidcClient;

use async_trait::async_trait;

/// Tokens returned by a code or refresh exchange
#[derive(Clone, Default)]
pub struct TokenSet {
    /// The raw, not yet verified, ID token
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("id_token", &self.id_token.as_ref().map(|_| "present"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "present"))
            .finish()
    }
}

/// Provider communication and verification failures
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("OIDC configuration error: {0}")]
    Configuration(String),
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),
    #[error("token exchange failed: {0}")]
    Exchange(String),
    #[error("token response carries no {0}")]
    MissingToken(&'static str),
    #[error("ID token verification failed: {0}")]
    Verification(String),
    #[error(transparent)]
    Claims(#[from] ClaimsError),
}

/// An OpenID Connect identity provider
#[async_trait]
pub trait OidcProvider: Send + Sync {
    /// Authorization endpoint URL carrying `state` and any extra query parameters
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be built
    fn authorization_url(
        &self,
        state: &str,
        extra_params: &[(&str, &str)],
    ) -> Result<String, ProviderError>;

    /// Exchange an authorization code for tokens
    ///
    /// # Errors
    ///
    /// Returns an error if the token endpoint rejects the code or is unreachable
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError>;

    /// Exchange a refresh token for a new token set
    ///
    /// # Errors
    ///
    /// Returns an error if the token endpoint rejects the token or is unreachable
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError>;

    /// Verify a raw ID token and decode its claims
    ///
    /// When `nonce` is given, the token's `nonce` claim must match it.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature, issuer, audience, expiry or nonce
    /// does not check out
    fn verify_id_token(&self, raw: &str, nonce: Option<&str>) -> Result<Claims, ProviderError>;
}
