//! Environment-driven settings.
//!
//! Services read their configuration through [`Settings`], which wraps a key
//! lookup function. Binaries use [`Settings::from_env`]; tests pass a closure
//! over a map so they never touch the process environment.
//!
//! ```
//! use age_saga_runtime::config::Settings;
//! use std::collections::HashMap;
//!
//! let vars = HashMap::from([("PORT", "9000"), ("WORKERS", "lots")]);
//! let settings = Settings::new(|key| vars.get(key).map(|v| (*v).to_string()));
//!
//! assert_eq!(settings.parsed("PORT", 8080u16), 9000);
//! assert_eq!(settings.parsed("WORKERS", 4usize), 4); // invalid, falls back
//! assert_eq!(settings.string("HOST", "0.0.0.0"), "0.0.0.0");
//! ```

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Typed access to configuration values.
pub struct Settings<F> {
    lookup: F,
}

impl Settings<fn(&str) -> Option<String>> {
    /// Settings backed by the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        fn lookup(key: &str) -> Option<String> {
            std::env::var(key).ok()
        }
        Self {
            lookup: lookup as fn(&str) -> Option<String>,
        }
    }
}

impl<F> Settings<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Settings backed by `lookup`.
    pub const fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// Value of `key`; blank values count as unset.
    pub fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Value of `key`, or `default`.
    pub fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Value of `key` parsed as `T`, or `default` when unset or invalid.
    pub fn parsed<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        let Some(raw) = self.optional(key) else {
            return default;
        };
        match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    key,
                    value = %raw,
                    default = %default,
                    error = %e,
                    "Invalid setting, using default"
                );
                default
            }
        }
    }

    /// Milliseconds in `key` as a duration.
    pub fn millis(&self, key: &str, default_ms: u64) -> Duration {
        Duration::from_millis(self.parsed(key, default_ms))
    }

    /// Seconds in `key` as a duration.
    pub fn secs(&self, key: &str, default_secs: u64) -> Duration {
        Duration::from_secs(self.parsed(key, default_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(
        pairs: &[(&'static str, &'static str)],
    ) -> Settings<impl Fn(&str) -> Option<String>> {
        let vars: HashMap<&str, &str> = pairs.iter().copied().collect();
        Settings::new(move |key| vars.get(key).map(|v| (*v).to_string()))
    }

    #[test]
    fn blank_counts_as_unset() {
        let s = settings(&[("DATABASE_URL", "  ")]);
        assert_eq!(s.optional("DATABASE_URL"), None);
        assert_eq!(s.string("DATABASE_URL", "memory"), "memory");
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let s = settings(&[("PORT", "eighty"), ("WORKERS", " 8 ")]);
        assert_eq!(s.parsed("PORT", 8080u16), 8080);
        assert_eq!(s.parsed("WORKERS", 4usize), 8);
    }

    #[test]
    fn durations() {
        let s = settings(&[("DELAY_MS", "250"), ("TIMEOUT_SECS", "3")]);
        assert_eq!(s.millis("DELAY_MS", 500), Duration::from_millis(250));
        assert_eq!(s.secs("TIMEOUT_SECS", 10), Duration::from_secs(3));
        assert_eq!(s.secs("MISSING", 10), Duration::from_secs(10));
    }
}
