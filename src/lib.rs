#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

/// Version of the gateway
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod auth;
pub mod handlers;
pub mod health;
pub mod oidc;
pub mod session;
pub mod settings;
pub mod storage;
pub mod utils;

// Testing utilities - available for unit tests and integration tests with the testing feature
#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use auth::{AuthError, Gateway, GatewayOptions};
pub use health::HealthMonitor;
pub use oidc::{OidcClient, OidcProvider};
pub use session::{Session, SessionStore};
pub use settings::GatewaySettings;
pub use storage::{open_connection, Connection};
