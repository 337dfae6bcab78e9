use actix_web::cookie::{time::Duration, Cookie, SameSite};
use base64::{engine::general_purpose, Engine as _};

use super::error::CookieError;
use super::state::SessionOptions;
use crate::settings::KeyPairSettings;
use crate::utils::crypto::{
    decrypt_bytes, derive_encryption_key, encrypt_bytes, hmac_sign, hmac_verify,
    ENCRYPTION_KEY_SIZE,
};

/// Signs (and optionally encrypts) session identifiers with one key pair
///
/// The cookie value is the base64url encoding of
/// `timestamp|base64(payload)|base64(mac)`, where the MAC covers
/// `name|timestamp|base64(payload)` so a value cannot be moved between
/// cookie names.
#[derive(Clone)]
pub struct CookieCodec {
    hash_key: Vec<u8>,
    block_key: Option<[u8; ENCRYPTION_KEY_SIZE]>,
}

impl CookieCodec {
    #[must_use]
    pub fn new(hash_key: &[u8], block_key: Option<&[u8]>) -> Self {
        Self {
            hash_key: hash_key.to_vec(),
            block_key: block_key.map(derive_encryption_key),
        }
    }

    /// Encode `id` into a cookie value stamped with `now`
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or signing fails
    pub fn encode(&self, name: &str, id: &str, now: i64) -> Result<String, CookieError> {
        let payload = match &self.block_key {
            Some(key) => {
                encrypt_bytes(id.as_bytes(), key).map_err(|e| CookieError::Seal(e.to_string()))?
            }
            None => id.as_bytes().to_vec(),
        };
        let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload);
        let signed = format!("{now}|{payload_b64}");
        let mac = hmac_sign(&self.hash_key, format!("{name}|{signed}").as_bytes())
            .map_err(|e| CookieError::Seal(e.to_string()))?;
        let mac_b64 = general_purpose::URL_SAFE_NO_PAD.encode(mac);
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(format!("{signed}|{mac_b64}")))
    }

    /// Verify a cookie value and recover the session identifier
    ///
    /// The signature and the age are checked together: a correctly signed
    /// value older than `max_age` seconds is rejected. A `max_age` of zero
    /// or less disables the age check.
    ///
    /// # Errors
    ///
    /// Returns the first check the value fails
    pub fn decode(
        &self,
        name: &str,
        value: &str,
        max_age: i64,
        now: i64,
    ) -> Result<String, CookieError> {
        let raw = general_purpose::URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| CookieError::Malformed)?;
        let raw = String::from_utf8(raw).map_err(|_| CookieError::Malformed)?;

        let mut parts = raw.splitn(3, '|');
        let (Some(timestamp), Some(payload_b64), Some(mac_b64)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(CookieError::Malformed);
        };

        let mac = general_purpose::URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| CookieError::Malformed)?;
        let signed = format!("{name}|{timestamp}|{payload_b64}");
        if !hmac_verify(&self.hash_key, signed.as_bytes(), &mac) {
            return Err(CookieError::InvalidSignature);
        }

        let issued_at: i64 = timestamp.parse().map_err(|_| CookieError::Malformed)?;
        if issued_at > now {
            return Err(CookieError::FromTheFuture);
        }
        if max_age > 0 && issued_at < now.saturating_sub(max_age) {
            return Err(CookieError::Expired);
        }

        let payload = general_purpose::URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| CookieError::Malformed)?;
        let payload = match &self.block_key {
            Some(key) => decrypt_bytes(&payload, key).map_err(|_| CookieError::Decryption)?,
            None => payload,
        };
        String::from_utf8(payload).map_err(|_| CookieError::Malformed)
    }
}

/// An ordered set of codecs, newest key first
///
/// New cookies are always produced with the first codec. Verification
/// tries each codec in turn so that cookies issued under a previous key
/// stay valid until they expire.
#[derive(Clone)]
pub struct CookieCodecs {
    codecs: Vec<CookieCodec>,
}

impl CookieCodecs {
    /// # Errors
    ///
    /// Returns an error if `codecs` is empty
    pub fn new(codecs: Vec<CookieCodec>) -> Result<Self, CookieError> {
        if codecs.is_empty() {
            return Err(CookieError::NoKeys);
        }
        Ok(Self { codecs })
    }

    /// Build codecs from configured key pairs, skipping pairs without a hash key
    ///
    /// # Errors
    ///
    /// Returns an error if no pair carries a hash key
    pub fn from_key_pairs(pairs: &[KeyPairSettings]) -> Result<Self, CookieError> {
        let codecs = pairs
            .iter()
            .filter_map(|pair| {
                let hash_key = pair.get_hash_key()?;
                let block_key = pair.get_block_key();
                Some(CookieCodec::new(
                    hash_key.as_bytes(),
                    block_key.as_deref().map(str::as_bytes),
                ))
            })
            .collect();
        Self::new(codecs)
    }

    /// # Errors
    ///
    /// Returns an error if the newest codec fails to seal the value
    pub fn encode(&self, name: &str, id: &str, now: i64) -> Result<String, CookieError> {
        self.codecs
            .first()
            .ok_or(CookieError::NoKeys)?
            .encode(name, id, now)
    }

    /// # Errors
    ///
    /// Returns the first codec's error when no codec accepts the value
    pub fn decode(
        &self,
        name: &str,
        value: &str,
        max_age: i64,
        now: i64,
    ) -> Result<String, CookieError> {
        let mut first_error = None;
        for codec in &self.codecs {
            match codec.decode(name, value, max_age, now) {
                Ok(id) => return Ok(id),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or(CookieError::NoKeys))
    }
}

/// Build the response cookie carrying an encoded session identifier
#[must_use]
pub fn session_cookie(name: &str, value: String, options: &SessionOptions) -> Cookie<'static> {
    Cookie::build(name.to_owned(), value)
        .http_only(options.http_only)
        .secure(options.secure)
        .same_site(SameSite::Lax)
        .path(options.path.clone())
        .max_age(Duration::seconds(options.max_age))
        .finish()
}

/// Build a cookie that clears the client copy of a session
#[must_use]
pub fn create_expired_cookie(name: &str, options: &SessionOptions) -> Cookie<'static> {
    Cookie::build(name.to_owned(), "")
        .http_only(options.http_only)
        .secure(options.secure)
        .same_site(SameSite::Lax)
        .path(options.path.clone())
        .max_age(Duration::seconds(-1))
        .finish()
}
