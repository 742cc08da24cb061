use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_PENDING: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a local request waits for its response. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Outstanding local requests allowed before new ones are refused.
    pub max_pending: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl SessionConfig {
    /// Reads `CANOPY_REQUEST_TIMEOUT_MS` (`0` disables the timeout) and
    /// `CANOPY_MAX_PENDING`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("CANOPY_REQUEST_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.request_timeout = None,
                Ok(ms) => config.request_timeout = Some(Duration::from_millis(ms)),
                Err(_) => tracing::warn!(
                    value = %raw,
                    "ignoring invalid CANOPY_REQUEST_TIMEOUT_MS"
                ),
            }
        }

        if let Some(raw) = lookup("CANOPY_MAX_PENDING") {
            match raw.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => config.max_pending = limit,
                _ => tracing::warn!(value = %raw, "ignoring invalid CANOPY_MAX_PENDING"),
            }
        }

        config
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_pending(mut self, limit: usize) -> Self {
        self.max_pending = limit;
        self
    }
}
