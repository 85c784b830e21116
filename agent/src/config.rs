//! Environment-driven tracer configuration, parsed once at init.

/// Default event-buffer capacity in records.
pub const DEFAULT_N_RECORDS: u64 = 16_777_216;

#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Event-buffer capacity; appends past it are dropped.
    pub n_records: u64,
    /// Periodic "n% full" diagnostics.
    pub verbose: bool,
    /// Rewrite normal/adaptive/recursive mutexes to error-checking kind on
    /// first lock. Intrusive; opt-in.
    pub enforce_error_check: bool,
    /// Run the exit path from a SIGTERM handler before the default action.
    pub capture_sigterm: bool,
    /// Abort after the sidecar is written so the kernel dumps a core the
    /// symbol resolver can use.
    pub core_dump: bool,
}

impl TraceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let n_records = get("TRACE_N_RECORDS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_N_RECORDS);

        Self {
            n_records,
            verbose: get("TRACE_VERBOSE").is_some(),
            enforce_error_check: get("ENFORCE_ERR_CHK").is_some(),
            capture_sigterm: get("CAPTURE_SIGTERM").is_some(),
            core_dump: get("TRACE_CORE_DUMP").is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> TraceConfig {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        TraceConfig::from_lookup(|name| map.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let c = config_with(&[]);
        assert_eq!(c.n_records, DEFAULT_N_RECORDS);
        assert!(!c.verbose);
        assert!(!c.enforce_error_check);
        assert!(!c.capture_sigterm);
        assert!(!c.core_dump);
    }

    #[test]
    fn n_records_parses_and_rejects_garbage() {
        assert_eq!(config_with(&[("TRACE_N_RECORDS", "1024")]).n_records, 1024);
        assert_eq!(
            config_with(&[("TRACE_N_RECORDS", "banana")]).n_records,
            DEFAULT_N_RECORDS
        );
        assert_eq!(
            config_with(&[("TRACE_N_RECORDS", "0")]).n_records,
            DEFAULT_N_RECORDS
        );
    }

    #[test]
    fn presence_flags_ignore_their_value() {
        let c = config_with(&[("TRACE_VERBOSE", ""), ("ENFORCE_ERR_CHK", "0")]);
        assert!(c.verbose);
        assert!(c.enforce_error_check);
    }
}
