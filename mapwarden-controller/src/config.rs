use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

/// Low-population maps used when nothing else is configured.
pub const DEFAULT_LOW_POP_MAPS: [&str; 2] = ["stmereeglise_warfare", "stmariedumont_warfare"];

/// Controller configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path
    /// Env: DATABASE_PATH (default: "mapwarden.db")
    pub database_path: String,

    /// Player count at which the normal rotation takes over
    /// Env: ROTATION_PLAYER_THRESHOLD (default: 40)
    pub player_threshold: usize,

    /// Layer ids the low-population rotation alternates between
    /// Env: ROTATION_LOW_POP_MAPS, comma separated
    /// (default: "stmereeglise_warfare,stmariedumont_warfare")
    pub low_pop_maps: Vec<String>,

    /// How long the last low-population pick is remembered
    /// Env: ROTATION_POINTER_TTL_SECS (default: 86400)
    pub pointer_ttl: Duration,

    /// History records fetched per round trip while building the exclusion window
    /// Env: ROTATION_HISTORY_PAGE_SIZE (default: 50)
    pub history_page_size: usize,

    /// Match start log lines older than this are not trusted for the map name
    /// Env: MATCH_START_LOG_MAX_AGE_SECS (default: 300)
    pub match_start_log_max_age: Duration,

    /// Match end log lines older than this are ignored
    /// Env: MATCH_END_LOG_MAX_AGE_SECS (default: 60)
    pub match_end_log_max_age: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        Self {
            database_path: env_or_default_string("DATABASE_PATH", "mapwarden.db"),
            player_threshold: env_or_default("ROTATION_PLAYER_THRESHOLD", 40),
            low_pop_maps: env_list_or_default("ROTATION_LOW_POP_MAPS", &DEFAULT_LOW_POP_MAPS),
            pointer_ttl: Duration::from_secs(env_or_default("ROTATION_POINTER_TTL_SECS", 24 * 60 * 60)),
            history_page_size: env_or_default("ROTATION_HISTORY_PAGE_SIZE", 50),
            match_start_log_max_age: Duration::from_secs(env_or_default(
                "MATCH_START_LOG_MAX_AGE_SECS",
                5 * 60,
            )),
            match_end_log_max_age: Duration::from_secs(env_or_default("MATCH_END_LOG_MAX_AGE_SECS", 60)),
        }
    }
}

impl Default for Config {
    /// Create configuration with all default values
    fn default() -> Self {
        Self {
            database_path: "mapwarden.db".to_string(),
            player_threshold: 40,
            low_pop_maps: DEFAULT_LOW_POP_MAPS.iter().map(|m| m.to_string()).collect(),
            pointer_ttl: Duration::from_secs(24 * 60 * 60), // 24 hours
            history_page_size: 50,
            match_start_log_max_age: Duration::from_secs(5 * 60),
            match_end_log_max_age: Duration::from_secs(60),
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a comma separated environment variable or return default values
fn env_list_or_default(key: &str, default: &[&str]) -> Vec<String> {
    var(key)
        .ok()
        .map(|val| parse_list(&val))
        .filter(|list| !list.is_empty())
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
