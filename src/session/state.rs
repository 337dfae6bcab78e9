use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::codec::SessionValues;
use super::error::CodecError;

/// Cookie attributes carried by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub path: String,
    /// Lifetime in seconds; zero or less deletes the session on save
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_age: 86400 * 30,
            secure: false,
            http_only: true,
        }
    }
}

struct SessionInner {
    name: String,
    id: String,
    values: SessionValues,
    options: SessionOptions,
    is_new: bool,
}

/// A request-scoped session handle
///
/// Cloning is cheap and every clone observes the same state, which is how
/// several extractors within one request share a session. A `Session` is
/// deliberately `!Send`: it never leaves the request that created it.
#[derive(Clone)]
pub struct Session(Rc<RefCell<SessionInner>>);

impl Session {
    pub(crate) fn new(name: &str, options: SessionOptions) -> Self {
        Self(Rc::new(RefCell::new(SessionInner {
            name: name.to_string(),
            id: String::new(),
            values: SessionValues::new(),
            options,
            is_new: true,
        })))
    }

    /// Mark the session as restored from storage
    pub(crate) fn restore(&self, id: String, values: SessionValues) {
        let mut inner = self.0.borrow_mut();
        inner.id = id;
        inner.values = values;
        inner.is_new = false;
    }

    pub(crate) fn set_id(&self, id: String) {
        self.0.borrow_mut().id = id;
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    /// Identifier assigned at first save; empty until then
    #[must_use]
    pub fn id(&self) -> String {
        self.0.borrow().id.clone()
    }

    /// True until the session has been loaded from storage
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.0.borrow().is_new
    }

    #[must_use]
    pub fn options(&self) -> SessionOptions {
        self.0.borrow().options.clone()
    }

    /// Change the lifetime; `max_age <= 0` deletes the session on the next save
    pub fn set_max_age(&self, max_age: i64) {
        self.0.borrow_mut().options.max_age = max_age;
    }

    /// Get a value from the session
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not deserialize as `T`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CodecError> {
        let inner = self.0.borrow();
        inner
            .values
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| CodecError::Value {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Insert a value, replacing any previous value under `key`
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as JSON
    pub fn insert<T: Serialize>(&self, key: impl Into<String>, value: T) -> Result<(), CodecError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| CodecError::Value {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.0.borrow_mut().values.insert(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().values.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().values.contains_key(key)
    }

    /// Snapshot of every value in the session
    #[must_use]
    pub fn values(&self) -> SessionValues {
        self.0.borrow().values.clone()
    }

    /// Append a single-use value under `key`
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as JSON
    pub fn add_flash<T: Serialize>(&self, key: &str, value: T) -> Result<(), CodecError> {
        let value = serde_json::to_value(value).map_err(|e| CodecError::Value {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let mut inner = self.0.borrow_mut();
        let slot = inner
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(value),
            other => *other = Value::Array(vec![value]),
        }
        Ok(())
    }

    /// Remove and return the flashes stored under `key`
    ///
    /// Reading consumes: a second call returns nothing until new flashes are
    /// added.
    pub fn flashes(&self, key: &str) -> Vec<Value> {
        match self.0.borrow_mut().values.remove(key) {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None => Vec::new(),
        }
    }

    /// Pop the flashes under `key` and return the first one if it is a string
    pub fn take_flash_string(&self, key: &str) -> Option<String> {
        self.flashes(key)
            .into_iter()
            .next()
            .and_then(|value| value.as_str().map(ToString::to_string))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values are deliberately omitted; they hold tokens
        let inner = self.0.borrow();
        f.debug_struct("Session")
            .field("name", &inner.name)
            .field("is_new", &inner.is_new)
            .field("keys", &inner.values.keys().collect::<Vec<_>>())
            .field("options", &inner.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_session_is_empty() {
        let session = Session::new("test", SessionOptions::default());
        assert!(session.is_new());
        assert!(session.id().is_empty());
        assert!(session.values().is_empty());
    }

    #[test]
    fn test_typed_values() {
        let session = Session::new("test", SessionOptions::default());
        session.insert("user_name", "alice").unwrap();
        session
            .insert("user_groups", vec!["admins".to_string()])
            .unwrap();

        assert_eq!(
            session.get::<String>("user_name").unwrap().as_deref(),
            Some("alice")
        );
        assert_eq!(
            session.get::<Vec<String>>("user_groups").unwrap(),
            Some(vec!["admins".to_string()])
        );
        assert!(session.get::<u64>("user_name").is_err());
        assert_eq!(session.get::<String>("missing").unwrap(), None);
    }

    #[test]
    fn test_flashes_are_consumed_on_read() {
        let session = Session::new("test", SessionOptions::default());
        session.add_flash("nonce", "first").unwrap();
        session.add_flash("nonce", "second").unwrap();

        assert_eq!(session.flashes("nonce"), vec![json!("first"), json!("second")]);
        assert!(session.flashes("nonce").is_empty());
        assert!(!session.contains_key("nonce"));
    }

    #[test]
    fn test_take_flash_string() {
        let session = Session::new("test", SessionOptions::default());
        session.add_flash("redirect_to", "/dashboard").unwrap();
        assert_eq!(
            session.take_flash_string("redirect_to").as_deref(),
            Some("/dashboard")
        );
        assert_eq!(session.take_flash_string("redirect_to"), None);
    }

    #[test]
    fn test_clones_share_state() {
        let session = Session::new("test", SessionOptions::default());
        let other = session.clone();
        other.insert("k", 1).unwrap();
        other.set_max_age(-1);
        assert_eq!(session.get::<i32>("k").unwrap(), Some(1));
        assert_eq!(session.options().max_age, -1);
    }

    #[test]
    fn test_debug_hides_values() {
        let session = Session::new("test", SessionOptions::default());
        session.insert("id_token", "secret-token").unwrap();
        let rendered = format!("{session:?}");
        assert!(rendered.contains("id_token"));
        assert!(!rendered.contains("secret-token"));
    }
}
