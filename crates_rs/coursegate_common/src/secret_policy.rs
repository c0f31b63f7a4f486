pub fn is_production_like(env_name: &str) -> bool {
    let env = env_name.trim().to_ascii_lowercase();
    matches!(env.as_str(), "prod" | "production" | "staging")
}

/// Rejects obviously broken bot tokens in production-like environments.
///
/// An unset token is allowed: the gate then fails closed at request time.
pub fn validate_bot_token_for_env(
    env_name: &str,
    key: &str,
    value: Option<&str>,
) -> Result<(), String> {
    if !is_production_like(env_name) {
        return Ok(());
    }
    let Some(token) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(());
    };

    if looks_like_placeholder(token) {
        return Err(format!(
            "{key} looks like a placeholder/default value; use the token issued by @BotFather"
        ));
    }
    if !looks_like_bot_token(token) {
        return Err(format!("{key} must have the form <bot id>:<secret>"));
    }
    Ok(())
}

fn looks_like_bot_token(token: &str) -> bool {
    let Some((bot_id, secret)) = token.split_once(':') else {
        return false;
    };
    !bot_id.is_empty()
        && bot_id.chars().all(|c| c.is_ascii_digit())
        && secret.len() >= 30
        && secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn looks_like_placeholder(token: &str) -> bool {
    let s = token.to_ascii_lowercase();
    let banned_fragments = [
        "change-me",
        "change_me",
        "changeme",
        "replace-me",
        "replace_me",
        "your-bot-token",
        "your_bot_token",
        "bot-token-here",
        "example",
        "dummy",
    ];
    banned_fragments.iter().any(|v| s.contains(v))
}
