//! Session Store - server-side sessions keyed by a signed cookie
//!
//! The `SessionStore` ties a storage [`Connection`] to the cookie codecs and
//! the value serializer. Handlers use it to:
//!
//! - **Load** the session named by a request cookie (`new_session`, `get`)
//! - **Persist** or delete a session and obtain the cookie to send back
//!   (`save`)
//! - **Tune** the session lifetime at runtime (`set_max_age`)
//!
//! Cookies only ever carry the signed session identifier; values stay in
//! the backend.

use actix_web::cookie::Cookie;
use actix_web::{HttpMessage, HttpRequest};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::codec::ValueSerializer;
use super::cookie::{create_expired_cookie, session_cookie, CookieCodecs};
use super::error::{LoadError, StoreError};
use super::state::{Session, SessionOptions};
use crate::settings::SessionSettings;
use crate::storage::{Connection, StorageError};
use crate::utils::crypto::generate_session_id;

// =============================================================================
// Request-scoped state
// =============================================================================

/// Sessions already resolved during the current request, by cookie name
#[derive(Default)]
struct SessionRegistry(HashMap<String, Session>);

/// Cookie value supplied out of band, e.g. from an `Authorization` header
struct TranslatedCookie {
    name: String,
    value: String,
}

/// Make `value` visible to the store as the request's `name` cookie
///
/// Takes precedence over a real cookie of the same name.
pub fn set_request_cookie(req: &HttpRequest, name: &str, value: &str) {
    req.extensions_mut().insert(TranslatedCookie {
        name: name.to_string(),
        value: value.to_string(),
    });
}

pub(crate) fn request_cookie(req: &HttpRequest, name: &str) -> Option<String> {
    if let Some(translated) = req.extensions().get::<TranslatedCookie>() {
        if translated.name == name {
            return Some(translated.value.clone());
        }
    }
    req.cookie(name).map(|cookie| cookie.value().to_string())
}

// =============================================================================
// Session Store
// =============================================================================

/// Server-side session store
pub struct SessionStore {
    connection: Arc<dyn Connection>,
    codecs: CookieCodecs,
    serializer: ValueSerializer,
    options: RwLock<SessionOptions>,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        connection: Arc<dyn Connection>,
        codecs: CookieCodecs,
        serializer: ValueSerializer,
        options: SessionOptions,
    ) -> Self {
        Self {
            connection,
            codecs,
            serializer,
            options: RwLock::new(options),
        }
    }

    /// Build a store from session settings
    ///
    /// # Errors
    ///
    /// Returns an error if no cookie key is configured
    pub fn from_settings(
        settings: &SessionSettings,
        secure: bool,
        connection: Arc<dyn Connection>,
    ) -> Result<Self, StoreError> {
        let codecs = CookieCodecs::from_key_pairs(&settings.key_pairs)?;
        Ok(Self::new(
            connection,
            codecs,
            settings.serializer,
            SessionOptions {
                max_age: settings.max_age_seconds,
                secure,
                ..SessionOptions::default()
            },
        ))
    }

    /// Default options applied to new sessions
    #[must_use]
    pub fn options(&self) -> SessionOptions {
        self.options
            .read()
            .map_or_else(|poisoned| poisoned.into_inner().clone(), |options| options.clone())
    }

    /// Current session lifetime in seconds
    #[must_use]
    pub fn max_age(&self) -> i64 {
        self.options().max_age
    }

    /// Change the lifetime of new sessions, the age limit on cookies and the
    /// backend's sweep age
    pub fn set_max_age(&self, max_age: i64) {
        let mut options = self
            .options
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        options.max_age = max_age;
        self.connection.set_max_age(max_age);
    }

    /// A fresh, empty session carrying the store's default options
    #[must_use]
    pub fn fresh(&self, name: &str) -> Session {
        Session::new(name, self.options())
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load the session named by the request's `name` cookie
    ///
    /// Always builds a new session value. It is marked as not new only when
    /// the cookie verifies and the backend returns a decodable record.
    ///
    /// # Errors
    ///
    /// Returns the fresh session together with the cause when:
    /// - the cookie is malformed, forged or expired
    /// - the backend fails to load the record
    /// - the stored record cannot be decoded
    pub async fn new_session(&self, req: &HttpRequest, name: &str) -> Result<Session, LoadError> {
        let session = self.fresh(name);
        let Some(value) = request_cookie(req, name) else {
            return Ok(session);
        };

        let id = match self
            .codecs
            .decode(name, &value, self.max_age(), Utc::now().timestamp())
        {
            Ok(id) => id,
            Err(e) => return Err(LoadError::new(session, e.into())),
        };

        let record = match self.connection.load(&id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(session),
            Err(e) => return Err(LoadError::new(session, e.into())),
        };

        match self.serializer.decode(&record) {
            Ok(values) => {
                session.restore(id, values);
                Ok(session)
            }
            Err(e) => Err(LoadError::new(session, e.into())),
        }
    }

    /// Like [`SessionStore::new_session`], but cached per request and name
    ///
    /// Every call within one request returns the same session object. A
    /// session replaced after a cookie failure is cached as well; backend
    /// failures are not, so a later call retries the backend.
    ///
    /// # Errors
    ///
    /// See [`SessionStore::new_session`]
    pub async fn get(&self, req: &HttpRequest, name: &str) -> Result<Session, LoadError> {
        let cached = req
            .extensions()
            .get::<SessionRegistry>()
            .and_then(|registry| registry.0.get(name).cloned());
        if let Some(session) = cached {
            return Ok(session);
        }

        let result = self.new_session(req, name).await;
        let to_cache = match &result {
            Ok(session) => Some(session.clone()),
            Err(e) if e.is_client_error() => Some(e.session().clone()),
            Err(_) => None,
        };
        if let Some(session) = to_cache {
            let mut extensions = req.extensions_mut();
            if let Some(registry) = extensions.get_mut::<SessionRegistry>() {
                registry.0.insert(name.to_string(), session);
            } else {
                let mut registry = SessionRegistry::default();
                registry.0.insert(name.to_string(), session);
                extensions.insert(registry);
            }
        }
        result
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Persist `session` and return the cookie the client must receive
    ///
    /// A session whose max age is zero or less is deleted from the backend
    /// and answered with a cookie that clears the client copy. Otherwise a
    /// missing identifier is generated, the values are written and a freshly
    /// signed cookie is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding, signing or the backend write fails
    pub async fn save(&self, session: &Session) -> Result<Cookie<'static>, StoreError> {
        let name = session.name();
        let options = session.options();

        if options.max_age <= 0 {
            let id = session.id();
            if !id.is_empty() {
                self.connection.delete(&id).await?;
            }
            return Ok(create_expired_cookie(&name, &options));
        }

        if session.id().is_empty() {
            session.set_id(generate_session_id());
        }
        let id = session.id();
        let record = self.serializer.encode(&session.values())?;
        self.connection.save(&id, &record, options.max_age).await?;

        let value = self.codecs.encode(&name, &id, Utc::now().timestamp())?;
        Ok(session_cookie(&name, value, &options))
    }

    /// Release the underlying connection
    ///
    /// # Errors
    ///
    /// Returns an error if the backend does not shut down cleanly
    pub async fn close(&self) -> Result<(), StorageError> {
        self.connection.close().await
    }

    /// Backend name for logs
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.connection.kind()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::cookie::CookieCodec;
    use crate::session::CookieError;
    use crate::storage::MemoryConnection;
    use crate::testing::FailingConnection;
    use actix_web::test::TestRequest;

    const NAME: &str = "test-session";

    fn store_with(connection: Arc<dyn Connection>) -> SessionStore {
        SessionStore::new(
            connection,
            CookieCodecs::new(vec![CookieCodec::new(b"test-hash-key", None)]).unwrap(),
            ValueSerializer::Cbor,
            SessionOptions {
                max_age: 600,
                ..SessionOptions::default()
            },
        )
    }

    fn store() -> SessionStore {
        store_with(Arc::new(MemoryConnection::new()))
    }

    fn request_with(cookie: Cookie<'static>) -> HttpRequest {
        TestRequest::default().cookie(cookie).to_http_request()
    }

    #[actix_web::test]
    async fn test_request_without_cookie_gets_new_session() {
        let store = store();
        let req = TestRequest::default().to_http_request();
        let session = store.new_session(&req, NAME).await.unwrap();
        assert!(session.is_new());
        assert!(session.id().is_empty());
    }

    #[actix_web::test]
    async fn test_save_assigns_id_once() {
        let store = store();
        let session = store.fresh(NAME);
        session.insert("user_name", "alice").unwrap();

        let cookie = store.save(&session).await.unwrap();
        let id = session.id();
        assert!(!id.is_empty());
        assert_eq!(cookie.name(), NAME);
        assert_ne!(cookie.value(), id, "cookie must not carry the raw id");

        store.save(&session).await.unwrap();
        assert_eq!(session.id(), id);
    }

    #[actix_web::test]
    async fn test_get_is_cached_per_request_and_name() {
        let store = store();
        let session = store.fresh(NAME);
        session.insert("user_name", "alice").unwrap();
        let cookie = store.save(&session).await.unwrap();

        let req = request_with(cookie);
        let first = store.get(&req, NAME).await.unwrap();
        first.insert("seen", true).unwrap();

        let second = store.get(&req, NAME).await.unwrap();
        assert_eq!(second.get::<bool>("seen").unwrap(), Some(true));

        let other = store.get(&req, "other-session").await.unwrap();
        assert!(other.is_new());
    }

    #[actix_web::test]
    async fn test_forged_cookie_yields_fresh_session_and_error() {
        let store = store();
        let req = request_with(Cookie::new(NAME, "forged"));
        let err = store.get(&req, NAME).await.unwrap_err();
        assert!(err.is_client_error());
        assert!(matches!(
            err.error(),
            StoreError::Cookie(CookieError::Malformed)
        ));
        assert!(err.session().is_new());
        err.session().insert("marker", 1).unwrap();

        // The replacement session is cached for the rest of the request
        let cached = store.get(&req, NAME).await.unwrap();
        assert!(cached.is_new());
        assert_eq!(cached.get::<i32>("marker").unwrap(), Some(1));
    }

    #[actix_web::test]
    async fn test_backend_failure_is_surfaced() {
        let healthy = store();
        let session = healthy.fresh(NAME);
        session.insert("user_name", "alice").unwrap();
        let cookie = healthy.save(&session).await.unwrap();

        // Same keys, broken backend
        let broken = store_with(Arc::new(FailingConnection));
        let req = request_with(cookie);
        let err = broken.get(&req, NAME).await.unwrap_err();
        assert!(!err.is_client_error());
        assert!(matches!(err.error(), StoreError::Storage(_)));

        // Not cached: the next call hits the backend again
        assert!(broken.get(&req, NAME).await.is_err());
    }

    #[actix_web::test]
    async fn test_undecodable_record_is_an_error() {
        let connection = Arc::new(MemoryConnection::new());
        let store = store_with(connection.clone());
        let session = store.fresh(NAME);
        let cookie = store.save(&session).await.unwrap();

        connection
            .save(&session.id(), b"\xff\xff not cbor", 600)
            .await
            .unwrap();
        let err = store.new_session(&request_with(cookie), NAME).await.unwrap_err();
        assert!(matches!(err.error(), StoreError::Codec(_)));
    }

    #[actix_web::test]
    async fn test_translated_cookie_takes_precedence() {
        let store = store();
        let session = store.fresh(NAME);
        session.insert("user_name", "bob").unwrap();
        let cookie = store.save(&session).await.unwrap();

        let req = TestRequest::default().to_http_request();
        set_request_cookie(&req, NAME, cookie.value());
        let loaded = store.get(&req, NAME).await.unwrap();
        assert_eq!(loaded.get::<String>("user_name").unwrap().as_deref(), Some("bob"));
    }

    #[actix_web::test]
    async fn test_set_max_age_applies_to_new_sessions() {
        let store = store();
        store.set_max_age(42);
        assert_eq!(store.max_age(), 42);
        assert_eq!(store.fresh(NAME).options().max_age, 42);
    }
}
