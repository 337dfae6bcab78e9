use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};

use crate::oidc::{ClaimsError, ProviderError};
use crate::session::{CodecError, StoreError};
use crate::storage::StorageError;

/// Failures on the authentication path
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("bad bearer token")]
    BadBearerToken,
    #[error("state does not match the stored nonce")]
    StateMismatch,
    #[error("no authenticated session")]
    Unauthenticated,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Claims(#[from] ClaimsError),
    #[error(transparent)]
    Session(#[from] StoreError),
}

impl From<CodecError> for AuthError {
    fn from(e: CodecError) -> Self {
        Self::Session(e.into())
    }
}

impl From<StorageError> for AuthError {
    fn from(e: StorageError) -> Self {
        Self::Session(e.into())
    }
}

impl AuthError {
    /// Whether the client's session must be invalidated along with this error
    ///
    /// Parameter errors leave the authentication state alone, and so does an
    /// unavailable backend: the stored record and the cookie still agree.
    #[must_use]
    pub fn clears_session(&self) -> bool {
        match self {
            Self::MissingParameter(_)
            | Self::BadBearerToken
            | Self::Session(StoreError::Storage(_)) => false,
            _ => true,
        }
    }

    fn body(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "bad request",
            StatusCode::UNAUTHORIZED => "authentication failed",
            _ => "internal error",
        }
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) | Self::BadBearerToken => StatusCode::BAD_REQUEST,
            Self::StateMismatch | Self::Unauthenticated | Self::Claims(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Provider(ProviderError::Configuration(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Provider(_) => StatusCode::UNAUTHORIZED,
            Self::Session(e) if e.is_client_error() => StatusCode::UNAUTHORIZED,
            Self::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            // Parameter problems are safe to echo back
            Self::MissingParameter(_) | Self::BadBearerToken => self.to_string(),
            _ => self.body().to_string(),
        };
        HttpResponse::build(self.status_code())
            .insert_header((header::CONTENT_TYPE, "text/plain; charset=utf-8"))
            .body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CookieError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AuthError::MissingParameter("code").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AuthError::StateMismatch.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::Provider(ProviderError::Exchange("denied".into())).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Session(CookieError::Expired.into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::from(StorageError::Closed).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AuthError::from(CodecError::Decode("bad".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_clears_session() {
        assert!(AuthError::StateMismatch.clears_session());
        assert!(AuthError::from(CodecError::Decode("bad".into())).clears_session());
        assert!(!AuthError::MissingParameter("state").clears_session());
        assert!(!AuthError::from(StorageError::Closed).clears_session());
    }

    #[actix_web::test]
    async fn test_error_body_hides_details() {
        let response = AuthError::Provider(ProviderError::Verification(
            "signature mismatch for kid abc".into(),
        ))
        .error_response();
        let body = actix_web::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body, "authentication failed");

        let response = AuthError::MissingParameter("code").error_response();
        let body = actix_web::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body, "missing required parameter: code");
    }
}
