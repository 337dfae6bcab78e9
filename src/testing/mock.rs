//! Mock objects and fake implementations for testing
//!
//! [`MockProvider`] stands in for an identity provider: it issues unsigned
//! ID tokens, remembers which codes and refresh tokens it will honor, and
//! checks the `nonce` claim the way a real verifier does.
//! [`FailingConnection`] is a storage backend that is always down.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::oidc::{Claims, OidcProvider, ProviderError, TokenSet};
use crate::storage::{Connection, StorageError};

use super::constants::{MOCK_AUTHORIZE_URL, MOCK_SIGNATURE};

/// Build a mock ID token carrying `claims`
#[must_use]
pub fn mock_id_token(claims: &Value) -> String {
    let header = general_purpose::URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let payload = general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.{MOCK_SIGNATURE}")
}

/// Fake identity provider
#[derive(Default)]
pub struct MockProvider {
    codes: Mutex<HashMap<String, TokenSet>>,
    refresh_tokens: Mutex<HashMap<String, TokenSet>>,
    exchanges: AtomicUsize,
}

impl MockProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token set for `email` with `groups`, optionally bound to `nonce`
    #[must_use]
    pub fn tokens(
        email: &str,
        groups: &[&str],
        refresh_token: Option<&str>,
        nonce: Option<&str>,
    ) -> TokenSet {
        let mut claims = json!({
            "iss": "https://idp.example.com",
            "sub": format!("sub-{email}"),
            "aud": "oidc-gateway",
            "email": email,
            "email_verified": true,
        });
        if !groups.is_empty() {
            claims["groups"] = json!(groups);
        }
        if let Some(nonce) = nonce {
            claims["nonce"] = json!(nonce);
        }
        TokenSet {
            id_token: Some(mock_id_token(&claims)),
            refresh_token: refresh_token.map(ToString::to_string),
        }
    }

    /// Token set without a nonce, as returned by refresh exchanges
    #[must_use]
    pub fn token_set(email: &str, groups: &[&str], refresh_token: Option<&str>) -> TokenSet {
        Self::tokens(email, groups, refresh_token, None)
    }

    /// Accept `code` once and answer it with `tokens`
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned
    pub fn add_code(&self, code: &str, tokens: TokenSet) {
        self.codes
            .lock()
            .unwrap()
            .insert(code.to_string(), tokens);
    }

    /// Accept `refresh_token` and answer it with `tokens`
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned
    pub fn add_refresh_token(&self, refresh_token: &str, tokens: TokenSet) {
        self.refresh_tokens
            .lock()
            .unwrap()
            .insert(refresh_token.to_string(), tokens);
    }

    /// Number of code and refresh exchanges attempted
    #[must_use]
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OidcProvider for MockProvider {
    fn authorization_url(
        &self,
        state: &str,
        extra_params: &[(&str, &str)],
    ) -> Result<String, ProviderError> {
        let mut url = url::Url::parse(MOCK_AUTHORIZE_URL)
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", "oidc-gateway")
            .append_pair("state", state)
            .append_pair("nonce", state)
            .extend_pairs(extra_params);
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        // Codes are single use, as with a real provider
        self.codes
            .lock()
            .map_err(|e| ProviderError::Exchange(e.to_string()))?
            .remove(code)
            .ok_or_else(|| ProviderError::Exchange("invalid_grant".to_string()))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens
            .lock()
            .map_err(|e| ProviderError::Exchange(e.to_string()))?
            .get(refresh_token)
            .cloned()
            .ok_or_else(|| ProviderError::Exchange("invalid_grant".to_string()))
    }

    fn verify_id_token(&self, raw: &str, nonce: Option<&str>) -> Result<Claims, ProviderError> {
        let invalid = |reason: &str| ProviderError::Verification(reason.to_string());
        let mut parts = raw.split('.');
        let (Some(_), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("invalid JWT format"));
        };
        if signature != MOCK_SIGNATURE {
            return Err(invalid("signature mismatch"));
        }
        let bytes = general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| invalid("undecodable payload"))?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|_| invalid("unparseable payload"))?;
        if let Some(expected) = nonce {
            if value.get("nonce").and_then(Value::as_str) != Some(expected) {
                return Err(invalid("nonce mismatch"));
            }
        }
        Ok(Claims::from_value(value)?)
    }
}

/// A storage backend that fails every operation
pub struct FailingConnection;

#[async_trait]
impl Connection for FailingConnection {
    async fn load(&self, _id: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Err(StorageError::Pool("backend unavailable".to_string()))
    }

    async fn save(&self, _id: &str, _data: &[u8], _max_age: i64) -> Result<(), StorageError> {
        Err(StorageError::Pool("backend unavailable".to_string()))
    }

    async fn delete(&self, _id: &str) -> Result<(), StorageError> {
        Err(StorageError::Pool("backend unavailable".to_string()))
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "failing"
    }
}
