//! Lifecycle tuning loaded from the environment

/// Default trial length for newly approved clubs
pub const DEFAULT_TRIAL_DAYS: i64 = 30;

/// Days past trial end before an unconverted club is blocked
pub const DEFAULT_BLOCK_AFTER_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub trial_days: i64,
    pub block_after_days: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            trial_days: DEFAULT_TRIAL_DAYS,
            block_after_days: DEFAULT_BLOCK_AFTER_DAYS,
        }
    }
}

impl LifecycleConfig {
    /// Read `TRIAL_DAYS` and `TRIAL_BLOCK_AFTER_DAYS`, falling back to defaults
    /// for missing or negative values
    pub fn from_env() -> Self {
        Self {
            trial_days: env_days("TRIAL_DAYS", DEFAULT_TRIAL_DAYS),
            block_after_days: env_days("TRIAL_BLOCK_AFTER_DAYS", DEFAULT_BLOCK_AFTER_DAYS),
        }
    }
}

fn env_days(key: &str, default: i64) -> i64 {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(days) if days >= 0 => days,
            _ => {
                tracing::warn!(key = key, value = %raw, default = default, "Invalid day count, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LifecycleConfig::default();
        assert_eq!(config.trial_days, 30);
        assert_eq!(config.block_after_days, 7);
    }
}
