//! Typed ID token claims and identity extraction

use serde::Deserialize;
use serde_json::{Map, Value};

/// Groups may be asserted as a single string or as a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum GroupsClaim {
    Single(String),
    List(Vec<String>),
}

impl GroupsClaim {
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::Single(group) => vec![group],
            Self::List(groups) => groups,
        }
    }
}

/// Claims decoded from a verified ID token
///
/// The standard fields used by the gateway are typed; any other claim is
/// kept in `extra` so that the username and groups claims stay configurable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    #[serde(rename = "sub", default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<Value>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Claim extraction failures
#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    #[error("claim {0:?} is not present")]
    Missing(String),
    #[error("claim {name:?} has an unexpected shape: {reason}")]
    Invalid { name: String, reason: String },
    #[error("email is not verified")]
    EmailNotVerified,
}

/// The identity written into an authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_name: String,
    pub user_groups: Option<Vec<String>>,
}

impl Claims {
    /// Decode claims from a JSON object
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not a claims object
    pub fn from_value(value: Value) -> Result<Self, ClaimsError> {
        serde_json::from_value(value).map_err(|e| ClaimsError::Invalid {
            name: "*".to_string(),
            reason: e.to_string(),
        })
    }

    fn claim(&self, name: &str) -> Option<Value> {
        match name {
            "sub" => self.subject.clone().map(Value::String),
            "email" => self.email.clone().map(Value::String),
            "email_verified" => self.email_verified.clone(),
            "preferred_username" => self.preferred_username.clone().map(Value::String),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Read the username from `claim`
    ///
    /// When the username claim is `email`, an `email_verified` claim that is
    /// present must be `true`.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim is missing, not a string, or names an
    /// unverified email
    pub fn username(&self, claim: &str) -> Result<String, ClaimsError> {
        let value = self
            .claim(claim)
            .ok_or_else(|| ClaimsError::Missing(claim.to_string()))?;
        let Value::String(username) = value else {
            return Err(ClaimsError::Invalid {
                name: claim.to_string(),
                reason: "expected a string".to_string(),
            });
        };
        if claim == "email" {
            self.verify_email()?;
        }
        Ok(username)
    }

    fn verify_email(&self) -> Result<(), ClaimsError> {
        match &self.email_verified {
            None | Some(Value::Bool(true)) => Ok(()),
            Some(Value::Bool(false)) => Err(ClaimsError::EmailNotVerified),
            Some(_) => Err(ClaimsError::Invalid {
                name: "email_verified".to_string(),
                reason: "expected a boolean".to_string(),
            }),
        }
    }

    /// Read the groups from `claim`, if present
    ///
    /// # Errors
    ///
    /// Returns an error if the claim is neither a string nor a list of strings
    pub fn groups(&self, claim: &str) -> Result<Option<Vec<String>>, ClaimsError> {
        let Some(value) = self.claim(claim) else {
            return Ok(None);
        };
        let groups: GroupsClaim =
            serde_json::from_value(value).map_err(|e| ClaimsError::Invalid {
                name: claim.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(groups.into_vec()))
    }

    /// Extract the session identity; an empty `groups_claim` skips groups
    ///
    /// # Errors
    ///
    /// See [`Claims::username`] and [`Claims::groups`]
    pub fn identity(&self, username_claim: &str, groups_claim: &str) -> Result<Identity, ClaimsError> {
        let user_name = self.username(username_claim)?;
        let user_groups = if groups_claim.is_empty() {
            None
        } else {
            self.groups(groups_claim)?
        };
        Ok(Identity {
            user_name,
            user_groups,
        })
    }
}
