use std::env;
use std::str::FromStr;
use std::time::Duration;

use promptly_agents::{CompletionConfig, DEFAULT_HISTORY_LIMIT};

const DEFAULT_API_KEY: &str = "dev-promptly-key";
const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["http://localhost:5173", "http://localhost:5500"];

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// `None` keeps history in memory for the lifetime of the process.
    pub database_url: Option<String>,
    pub api_key: String,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub history_limit: usize,
    pub allowed_origins: Vec<String>,
    pub completion: CompletionConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            api_key: DEFAULT_API_KEY.to_string(),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 60,
            history_limit: DEFAULT_HISTORY_LIMIT,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect(),
            completion: CompletionConfig::default(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_url = env::var("PROMPTLY_DATABASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let api_key = env::var("PROMPTLY_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(defaults.api_key);

        let allowed_origins = env::var("PROMPTLY_ALLOWED_ORIGINS")
            .map(|value| parse_origins(&value))
            .ok()
            .filter(|origins| !origins.is_empty())
            .unwrap_or(defaults.allowed_origins);

        Self {
            database_url,
            api_key,
            rate_limit_window: Duration::from_secs(env_or(
                "PROMPTLY_RATE_LIMIT_WINDOW_SECONDS",
                defaults.rate_limit_window.as_secs(),
            )),
            rate_limit_max: env_or("PROMPTLY_RATE_LIMIT_MAX", defaults.rate_limit_max),
            history_limit: env_or("PROMPTLY_HISTORY_LIMIT", defaults.history_limit).max(1),
            allowed_origins,
            completion: CompletionConfig::from_env(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}
