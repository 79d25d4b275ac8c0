use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("arbitrage-engine/", env!("CARGO_PKG_VERSION"));

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}

/// Shared outbound client for rate sources.
pub fn build_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(env_secs("HTTP_TIMEOUT_SECS", 15))
        .connect_timeout(env_secs("HTTP_CONNECT_TIMEOUT_SECS", 5))
        .build()
        .unwrap_or_else(|_| Client::new())
}
