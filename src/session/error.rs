use crate::storage::StorageError;

use super::Session;

/// Reasons a session cookie is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CookieError {
    #[error("session cookie is malformed")]
    Malformed,
    #[error("session cookie signature is invalid")]
    InvalidSignature,
    #[error("session cookie has expired")]
    Expired,
    #[error("session cookie timestamp is in the future")]
    FromTheFuture,
    #[error("session cookie could not be decrypted")]
    Decryption,
    #[error("failed to seal session cookie: {0}")]
    Seal(String),
    #[error("no cookie keys are configured")]
    NoKeys,
}

/// Value map serialization failures
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode session values: {0}")]
    Encode(String),
    #[error("failed to decode session values: {0}")]
    Decode(String),
    #[error("invalid value for session key {key}: {reason}")]
    Value { key: String, reason: String },
}

/// Errors surfaced by the session store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Cookie(#[from] CookieError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl StoreError {
    /// Cookie problems come from the client; everything else is a backend fault
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Cookie(_))
    }
}

/// A failed session load
///
/// Loading always produces a usable session. When the cookie or backend lets
/// us down, the fresh session travels with the error so that callers can
/// decide whether the failure is fatal.
#[derive(Debug, thiserror::Error)]
#[error("failed to load session: {source}")]
pub struct LoadError {
    session: Session,
    #[source]
    source: StoreError,
}

impl LoadError {
    pub(crate) fn new(session: Session, source: StoreError) -> Self {
        Self { session, source }
    }

    #[must_use]
    pub fn error(&self) -> &StoreError {
        &self.source
    }

    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.source.is_client_error()
    }

    /// The fresh session that was built before the failure
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Recover the fresh session that was built before the failure
    #[must_use]
    pub fn into_session(self) -> Session {
        self.session
    }

    #[must_use]
    pub fn into_parts(self) -> (Session, StoreError) {
        (self.session, self.source)
    }
}
