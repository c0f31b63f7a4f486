use coursegate_common::access_gate::AccessGateConfig;
use coursegate_common::secret_policy;
use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub env_name: String,
    pub production: bool,

    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub static_dir: String,
    pub trust_proxy: bool,

    pub hide_public: bool,
    pub bot_token: Option<String>,
    pub init_data_max_age_secs: Option<u64>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        }
        Err(_) => None,
    }
}

fn parse_bool_like(raw: &str) -> Option<bool> {
    let v = raw.trim().to_lowercase();
    if v.is_empty() {
        return None;
    }
    if matches!(v.as_str(), "0" | "false" | "no" | "off") {
        Some(false)
    } else {
        Some(true)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let env_name = env_or("NODE_ENV", "development").trim().to_string();
        let production = secret_policy::is_production_like(&env_name);

        let host = env_or("APP_HOST", "0.0.0.0");
        let port: u16 = env_or("APP_PORT", "3001")
            .parse()
            .map_err(|_| "APP_PORT must be a valid u16".to_string())?;

        let base_url = env_or("BASE_URL", "http://localhost:3001")
            .trim()
            .trim_end_matches('/')
            .to_string();
        let static_dir = env_or("STATIC_DIR", "dist").trim().to_string();
        let trust_proxy = parse_bool_like(&env_or("TRUST_PROXY", "")).unwrap_or(true);

        let hide_public = parse_bool_like(&env_or("HIDE_PUBLIC", "")).unwrap_or(false);
        let bot_token = env_opt("TELEGRAM_BOT_TOKEN");
        secret_policy::validate_bot_token_for_env(
            &env_name,
            "TELEGRAM_BOT_TOKEN",
            bot_token.as_deref(),
        )?;

        // Unparsable values fall back to the gate default, like an unset one.
        let init_data_max_age_secs = env_opt("TELEGRAM_INIT_DATA_MAX_AGE_SECONDS")
            .and_then(|raw| raw.parse::<u64>().ok());

        Ok(Self {
            env_name,
            production,
            host,
            port,
            base_url,
            static_dir,
            trust_proxy,
            hide_public,
            bot_token,
            init_data_max_age_secs,
        })
    }

    pub fn access_gate(&self) -> AccessGateConfig {
        AccessGateConfig {
            enabled: self.hide_public,
            bot_token: self.bot_token.clone(),
            init_data_max_age_secs: self.init_data_max_age_secs,
            production: self.production,
            trust_forwarded_proto: self.trust_proxy,
        }
    }
}
