//! Configuration loading helper functions
//! Resolves scalar settings with fallback logic

use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Get configuration value with priority: explicit > ENV > default
///
/// # Arguments
/// * `explicit` - Value given on the command line or by the caller
/// * `env_var` - Environment variable name to check
/// * `default` - Value to use as fallback
pub fn get_config_value<T>(explicit: Option<T>, env_var: &str, default: T) -> T
where
    T: FromStr + Clone,
    T::Err: Display,
{
    // Priority 1: explicit value
    if let Some(val) = explicit {
        debug!("Using explicit value for {}", env_var);
        return val;
    }

    // Priority 2: Environment variable
    if let Ok(env_str) = std::env::var(env_var) {
        match env_str.parse::<T>() {
            Ok(val) => {
                info!("Using {} from environment: {}", env_var, env_str);
                return val;
            },
            Err(e) => {
                warn!("Failed to parse {} from environment: {}", env_var, e);
            },
        }
    }

    // Priority 3: Default value
    debug!("Using default value for {}", env_var);
    default
}

/// Optional variant: no default, `None` when neither source is set
pub fn get_optional_value<T>(explicit: Option<T>, env_var: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    if explicit.is_some() {
        return explicit;
    }
    let raw = std::env::var(env_var).ok()?;
    match raw.parse::<T>() {
        Ok(val) => {
            info!("Using {} from environment: {}", env_var, raw);
            Some(val)
        },
        Err(e) => {
            warn!("Failed to parse {} from environment: {}", env_var, e);
            None
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_explicit_wins() {
        std::env::set_var("COMMON_TEST_EXPLICIT_SEED", "7");
        let v: u64 = get_config_value(Some(42), "COMMON_TEST_EXPLICIT_SEED", 1);
        assert_eq!(v, 42);
    }

    #[test]
    fn test_env_then_default() {
        std::env::set_var("COMMON_TEST_ENV_SEED", "7");
        let v: u64 = get_config_value(None, "COMMON_TEST_ENV_SEED", 1);
        assert_eq!(v, 7);

        let v: u64 = get_config_value(None, "COMMON_TEST_UNSET_SEED", 1);
        assert_eq!(v, 1);
    }

    #[test]
    fn test_unparsable_env_falls_back() {
        std::env::set_var("COMMON_TEST_BAD_SEED", "not-a-number");
        let v: u64 = get_config_value(None, "COMMON_TEST_BAD_SEED", 3);
        assert_eq!(v, 3);
        let o: Option<u64> = get_optional_value(None, "COMMON_TEST_BAD_SEED");
        assert!(o.is_none());
    }
}
