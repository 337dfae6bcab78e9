//! Testing utilities for the gateway
//!
//! Compiled for unit tests and, behind the `testing` feature, for the
//! integration tests under `tests/`.
//!
//! ## Organization
//!
//! - [`fixtures`] - Pre-built stores, settings and gateways
//! - [`mock`] - A fake identity provider and a failing storage backend
//! - [`requests`] - Helpers for reading cookies and headers off responses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use oidc_gateway::testing::{memory_store, MockProvider};
//!
//! let store = memory_store(600);
//! let provider = MockProvider::new();
//! provider.add_code("code-1", MockProvider::token_set("alice@example.com", &[], None));
//! ```

pub mod fixtures;
pub mod mock;
pub mod requests;

// Re-export commonly used items for convenience
pub use fixtures::{memory_store, store_with_connection, test_codecs, test_gateway, test_settings};
pub use mock::{mock_id_token, FailingConnection, MockProvider};
pub use requests::{
    header_value, is_removal, location, query_param, response_cookie, service_cookie,
};

/// Common test constants
pub mod constants {
    /// Cookie name used by test gateways
    pub const TEST_COOKIE_NAME: &str = "oidc-auth-session";

    /// Cookie signing key used by test stores
    pub const TEST_HASH_KEY: &[u8] = b"test-hash-key-32-bytes-long-1234";

    /// Cookie encryption key used by test stores
    pub const TEST_BLOCK_KEY: &[u8] = b"test-block-key-32-bytes-long-123";

    /// Authorization endpoint of the mock provider
    pub const MOCK_AUTHORIZE_URL: &str = "https://idp.example.com/auth";

    /// Signature segment the mock provider accepts
    pub const MOCK_SIGNATURE: &str = "mock-signature";
}
