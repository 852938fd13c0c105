//! Client configuration

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000/api/chat";
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Runtime configuration for the client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ask endpoint receiving `POST {"question": ...}`
    pub endpoint: String,
    /// Health probe URL
    pub health_url: String,
    /// Number of chunks the backend should retrieve (backend default when unset)
    pub top_k: Option<u32>,
    /// Maximum number of remembered questions
    pub history_limit: usize,
    /// SQLite file backing the question history
    pub history_path: PathBuf,
    /// Connection attempts per question, including the first
    pub max_attempts: u32,
    /// Delay before the first reconnect; doubles per attempt
    pub retry_base_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            health_url: health_url_for(DEFAULT_ENDPOINT),
            top_k: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            history_path: default_history_path(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let endpoint = std::env::var("GPTLOV_ENDPOINT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.endpoint);

        let health_url = std::env::var("GPTLOV_HEALTH_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| health_url_for(&endpoint));

        let top_k = std::env::var("GPTLOV_TOP_K")
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|k| *k > 0);

        let history_limit = std::env::var("GPTLOV_HISTORY_LIMIT")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.history_limit);

        let history_path = std::env::var("GPTLOV_HISTORY_DB")
            .map(PathBuf::from)
            .unwrap_or(defaults.history_path);

        Self {
            endpoint,
            health_url,
            top_k,
            history_limit,
            history_path,
            ..defaults
        }
    }

    /// Backoff before connection attempt `attempt` (2-based): base, 2*base, 4*base, ...
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(16);
        self.retry_base_delay.saturating_mul(1 << exponent)
    }
}

fn default_history_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gptlov").join("history.db")
}

/// `scheme://host[:port]/health` for an endpoint URL
fn health_url_for(endpoint: &str) -> String {
    match reqwest::Url::parse(endpoint) {
        Ok(mut url) => {
            url.set_path("/health");
            url.set_query(None);
            url.to_string()
        }
        Err(_) => format!("{}/health", endpoint.trim_end_matches('/')),
    }
}
