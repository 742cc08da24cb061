use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "CANOPY_LOG";
pub const DEFAULT_FILTER: &str = "info";

/// Filter directives from `CANOPY_LOG`, then `RUST_LOG`, then `info`.
pub fn filter_directives(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup(LOG_ENV)
        .or_else(|| lookup("RUST_LOG"))
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Installs a compact fmt subscriber. Returns `false` if one was already set.
pub fn init_tracing() -> bool {
    let directives = filter_directives(|key| std::env::var(key).ok());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|err| {
        eprintln!("invalid log filter {:?} ({}), using {}", directives, err, DEFAULT_FILTER);
        EnvFilter::new(DEFAULT_FILTER)
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_precedence() {
        let both = |key: &str| match key {
            "CANOPY_LOG" => Some("canopy_core=debug".to_string()),
            "RUST_LOG" => Some("warn".to_string()),
            _ => None,
        };
        assert_eq!(filter_directives(both), "canopy_core=debug");

        let rust_only = |key: &str| (key == "RUST_LOG").then(|| "warn".to_string());
        assert_eq!(filter_directives(rust_only), "warn");

        assert_eq!(filter_directives(|_: &str| None), DEFAULT_FILTER);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        assert!(!init_tracing());
    }
}
