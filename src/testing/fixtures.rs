//! Test fixtures providing pre-built stores, settings and gateways

use std::sync::Arc;

use crate::auth::{Gateway, GatewayOptions};
use crate::oidc::OidcProvider;
use crate::session::{CookieCodec, CookieCodecs, SessionOptions, SessionStore, ValueSerializer};
use crate::settings::{GatewaySettings, KeyPairSettings};
use crate::storage::{Connection, MemoryConnection};

use super::constants::{TEST_BLOCK_KEY, TEST_COOKIE_NAME, TEST_HASH_KEY};

/// Cookie codecs using the fixed test keys
///
/// # Panics
///
/// Never in practice; the codec list is not empty
#[must_use]
pub fn test_codecs() -> CookieCodecs {
    CookieCodecs::new(vec![CookieCodec::new(TEST_HASH_KEY, Some(TEST_BLOCK_KEY))]).unwrap()
}

/// A store over `connection` with the test keys and `max_age`
#[must_use]
pub fn store_with_connection(connection: Arc<dyn Connection>, max_age: i64) -> SessionStore {
    SessionStore::new(
        connection,
        test_codecs(),
        ValueSerializer::Cbor,
        SessionOptions {
            max_age,
            ..SessionOptions::default()
        },
    )
}

/// An in-memory store with the test keys
#[must_use]
pub fn memory_store(max_age: i64) -> SessionStore {
    store_with_connection(Arc::new(MemoryConnection::new()), max_age)
}

/// Settings pointing at a fictitious provider, with memory storage
#[must_use]
pub fn test_settings() -> GatewaySettings {
    let mut settings = GatewaySettings::default();
    settings.oidc.issuer_url = "https://idp.example.com".to_string();
    settings.oidc.redirect_url = "http://localhost:8080/callback".to_string();
    settings.oidc.client_id = Some("oidc-gateway".to_string());
    settings.oidc.offline_access = true;
    settings.session.cookie_name = TEST_COOKIE_NAME.to_string();
    settings.session.key_pairs = vec![KeyPairSettings {
        hash_key: Some(String::from_utf8_lossy(TEST_HASH_KEY).into_owned()),
        block_key: Some(String::from_utf8_lossy(TEST_BLOCK_KEY).into_owned()),
        ..KeyPairSettings::default()
    }];
    settings.application.whitelist = vec!["/public".to_string()];
    settings
}

/// A gateway over `store` and `provider`, configured from [`test_settings`]
#[must_use]
pub fn test_gateway(store: Arc<SessionStore>, provider: Arc<dyn OidcProvider>) -> Gateway {
    Gateway::new(
        store,
        provider,
        GatewayOptions::from_settings(&test_settings()),
    )
}
