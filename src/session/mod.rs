//! Session Management Module
//!
//! Server-side sessions referenced by a signed cookie.
//!
//! # Modules
//!
//! - [`codec`] - Value map serialization (CBOR or JSON)
//! - [`cookie`] - Signed, optionally encrypted session cookies with key rotation
//! - [`state`] - The request-scoped [`Session`] handle and its options
//! - [`store`] - The [`SessionStore`] tying cookies, codec and backend together
//! - [`error`] - Error types for all of the above

pub mod codec;
pub mod cookie;
pub mod error;
pub mod state;
pub mod store;

// Re-export commonly used items for convenience
pub use codec::{SessionValues, ValueSerializer};
pub use cookie::{CookieCodec, CookieCodecs};
pub use error::{CodecError, CookieError, LoadError, StoreError};
pub use state::{Session, SessionOptions};
pub use store::{set_request_cookie, SessionStore};
