//! Compact signed access token carried in the gate cookie.
//!
//! Wire form is `version.issued_at.nonce.signature`, where the signature is
//! hex HMAC-SHA256 over `version.issued_at.nonce`. Tokens are stateless: expiry
//! is the only way one stops being accepted.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use std::time::{SystemTime, UNIX_EPOCH};

pub const TOKEN_VERSION: &str = "v1";

const SIGNING_KEY_PREFIX: &str = "hidepublic:";
const NONCE_BYTES: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Mints and verifies access tokens under a key derived from the bot token.
#[derive(Clone)]
pub struct TokenCodec {
    key: Option<[u8; 32]>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("configured", &self.key.is_some())
            .finish()
    }
}

impl TokenCodec {
    pub fn new(bot_token: Option<&str>) -> Self {
        Self {
            key: bot_token.and_then(derive_signing_key),
        }
    }

    /// Returns `None` when no signing key is available.
    pub fn mint(&self) -> Option<String> {
        self.mint_at(unix_now_secs())
    }

    pub fn mint_at(&self, issued_at: i64) -> Option<String> {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.mint_with_nonce(issued_at, &hex::encode(nonce))
    }

    fn mint_with_nonce(&self, issued_at: i64, nonce: &str) -> Option<String> {
        let payload = format!("{TOKEN_VERSION}.{issued_at}.{nonce}");
        let signature = self.sign(&payload)?;
        Some(format!("{payload}.{signature}"))
    }

    pub fn verify(&self, token: &str, ttl_secs: u64) -> bool {
        self.verify_at(token, ttl_secs, unix_now_secs())
    }

    pub fn verify_at(&self, token: &str, ttl_secs: u64, now: i64) -> bool {
        let mut parts = token.split('.');
        let (Some(version), Some(issued_at_raw), Some(nonce), Some(signature), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return false;
        };
        if version != TOKEN_VERSION {
            return false;
        }
        if issued_at_raw.is_empty() || nonce.is_empty() || signature.is_empty() {
            return false;
        }
        let Ok(issued_at) = issued_at_raw.parse::<i64>() else {
            return false;
        };
        if issued_at > now {
            return false;
        }
        let age = now.saturating_sub(issued_at);
        if u64::try_from(age).map_or(true, |age| age > ttl_secs) {
            return false;
        }
        let Some(expected) = self.sign(&format!("{version}.{issued_at_raw}.{nonce}")) else {
            return false;
        };
        constant_time_eq(signature.as_bytes(), expected.as_bytes())
    }

    fn sign(&self, payload: &str) -> Option<String> {
        let key = self.key.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(payload.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

/// `SHA256("hidepublic:" + bot_token)`; `None` for a blank bot token.
pub fn derive_signing_key(bot_token: &str) -> Option<[u8; 32]> {
    if bot_token.trim().is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(SIGNING_KEY_PREFIX.as_bytes());
    hasher.update(bot_token.as_bytes());
    Some(hasher.finalize().into())
}

/// Length check first, then a comparison that does not short-circuit.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).unwrap_u8() == 1
}

pub(crate) fn unix_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
