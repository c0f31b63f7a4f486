//! Telegram Mini-App `initData` verification.
//!
//! Follows the WebApp scheme: the secret key is `HMAC_SHA256("WebAppData",
//! bot_token)`, and `hash` must equal the hex HMAC of the data-check-string
//! (every other pair, sorted by key, as `key=value` lines).

use crate::token::{constant_time_eq, unix_now_secs};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use url::form_urlencoded;

type HmacSha256 = Hmac<Sha256>;

const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InitDataError {
    #[error("bot token is not configured")]
    MissingBotToken,
    #[error("hash is empty or not found")]
    HashMissing,
    #[error("auth_date is empty or not found")]
    AuthDateMissing,
    #[error("auth_date is not a unix timestamp")]
    AuthDateInvalid,
    #[error("init data expired")]
    Expired,
    #[error("signature is invalid")]
    SignatureInvalid,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub is_premium: Option<bool>,
}

/// Fields of a verified payload. `user` is `None` when absent or unparsable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub auth_date: i64,
    pub hash: String,
    pub query_id: Option<String>,
    pub start_param: Option<String>,
    pub chat_type: Option<String>,
    pub user: Option<TelegramUser>,
}

#[derive(Clone)]
pub struct InitDataValidator {
    bot_token: Option<String>,
}

impl std::fmt::Debug for InitDataValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitDataValidator")
            .field("configured", &self.bot_token.is_some())
            .finish()
    }
}

impl InitDataValidator {
    pub fn new(bot_token: Option<String>) -> Self {
        Self {
            bot_token: bot_token.filter(|t| !t.trim().is_empty()),
        }
    }

    /// Logs the reason for any rejection; callers only learn pass/fail.
    pub fn validate(&self, init_data: &str, ttl_secs: u64) -> bool {
        match self.check(init_data, ttl_secs, unix_now_secs()) {
            Ok(_) => true,
            Err(InitDataError::MissingBotToken) => {
                tracing::error!("hidePublic enabled but bot token is not configured");
                false
            }
            Err(e) => {
                tracing::warn!(reason = %e, "hidePublic initData validation failed");
                false
            }
        }
    }

    /// A `ttl_secs` of zero disables the expiry check.
    pub fn check(&self, init_data: &str, ttl_secs: u64, now: i64) -> Result<InitData, InitDataError> {
        let bot_token = self
            .bot_token
            .as_deref()
            .ok_or(InitDataError::MissingBotToken)?;

        let mut pairs: Vec<(String, String)> = form_urlencoded::parse(init_data.as_bytes())
            .into_owned()
            .collect();

        let hash = take_field(&mut pairs, "hash")
            .filter(|h| !h.is_empty())
            .ok_or(InitDataError::HashMissing)?;

        let auth_date_raw = field(&pairs, "auth_date")
            .filter(|v| !v.is_empty())
            .ok_or(InitDataError::AuthDateMissing)?;
        let auth_date: i64 = auth_date_raw
            .parse()
            .map_err(|_| InitDataError::AuthDateInvalid)?;

        if ttl_secs > 0 {
            let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
            if auth_date.saturating_add(ttl) < now {
                return Err(InitDataError::Expired);
            }
        }

        let expected = sign_data_check_string(bot_token, &mut pairs);
        if !constant_time_eq(hash.as_bytes(), expected.as_bytes()) {
            return Err(InitDataError::SignatureInvalid);
        }

        Ok(InitData {
            auth_date,
            query_id: field(&pairs, "query_id").map(str::to_string),
            start_param: field(&pairs, "start_param").map(str::to_string),
            chat_type: field(&pairs, "chat_type").map(str::to_string),
            user: field(&pairs, "user").and_then(|raw| serde_json::from_str(raw).ok()),
            hash,
        })
    }
}

/// Hex HMAC over the data-check-string; sorts `pairs` in place.
pub fn sign_data_check_string(bot_token: &str, pairs: &mut [(String, String)]) -> String {
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let data_check_string = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");

    let secret = hmac_sha256(WEB_APP_DATA_KEY, bot_token.as_bytes());
    hex::encode(hmac_sha256(&secret, data_check_string.as_bytes()))
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this cannot fail.
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return Vec::new();
    };
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

fn field<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn take_field(pairs: &mut Vec<(String, String)>, key: &str) -> Option<String> {
    let idx = pairs.iter().position(|(k, _)| k == key)?;
    let (_, value) = pairs.remove(idx);
    pairs.retain(|(k, _)| k != key);
    Some(value)
}

/// Builds a signed `initData` string. Used by tests and local tooling.
pub fn sign_init_data(bot_token: &str, fields: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = fields
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    let hash = sign_data_check_string(bot_token, &mut pairs);
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        serializer.append_pair(k, v);
    }
    serializer.append_pair("hash", &hash);
    serializer.finish()
}
