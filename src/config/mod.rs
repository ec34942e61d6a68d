use crate::services::process_watcher::PollPolicy;
use crate::utils::validation::{ALLOWED_MIME_TYPES, MAX_FILE_SIZE, ValidationRules};
use std::env;
use std::time::Duration;

/// Client configuration for uploads and processing checks
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root every request path is joined to (default: "http://localhost:8000/v1")
    pub api_base_url: String,

    /// Per-request timeout in seconds (default: 60)
    pub request_timeout_secs: u64,

    /// Maximum file size in bytes (default: 50 MB)
    pub max_file_size: u64,

    /// Media types accepted for upload
    pub allowed_file_types: Vec<String>,

    /// Delay before the first processing check in milliseconds (default: 2000)
    pub poll_grace_ms: u64,

    /// Delay between processing checks in milliseconds (default: 2000)
    pub poll_interval_ms: u64,

    /// Processing checks before giving up with a timeout (default: 30)
    pub max_poll_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/v1".to_string(),
            request_timeout_secs: 60,
            max_file_size: MAX_FILE_SIZE,
            allowed_file_types: ALLOWED_MIME_TYPES.iter().map(|m| m.to_string()).collect(),
            poll_grace_ms: 2000,
            poll_interval_ms: 2000,
            max_poll_attempts: 30,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            api_base_url: env::var("API_BASE_URL").unwrap_or(default.api_base_url),

            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.request_timeout_secs),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            allowed_file_types: env::var("ALLOWED_FILE_TYPES")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|types| !types.is_empty())
                .unwrap_or(default.allowed_file_types),

            poll_grace_ms: env::var("POLL_GRACE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.poll_grace_ms),

            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.poll_interval_ms),

            // At least one check
            max_poll_attempts: env::var("MAX_POLL_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .map(|n| n.max(1))
                .unwrap_or(default.max_poll_attempts),
        }
    }

    /// Create config for a local backend (short checks, fast failure)
    pub fn development() -> Self {
        Self {
            request_timeout_secs: 15,
            poll_grace_ms: 500,
            poll_interval_ms: 1000,
            max_poll_attempts: 20,
            ..Self::default()
        }
    }

    pub fn upload_rules(&self) -> ValidationRules {
        ValidationRules {
            allowed_mimes: self.allowed_file_types.clone(),
            max_file_size: self.max_file_size,
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            grace_period: Duration::from_millis(self.poll_grace_ms),
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts.max(1),
        }
    }
}
