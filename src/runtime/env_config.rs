//! `FIBRA_*` environment overrides for [`RuntimeConfig`].
//!
//! [`RuntimeBuilder::with_env_overrides`](super::builder::RuntimeBuilder::with_env_overrides)
//! applies these on top of the builder's current values; builder methods
//! called afterwards win.
//!
//! | Variable | Type | Field |
//! |----------|------|-------|
//! | `FIBRA_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `FIBRA_MAX_OPS_BEFORE_YIELD` | `usize` | `max_ops_before_yield` |
//! | `FIBRA_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `FIBRA_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `FIBRA_ENABLE_PARKING` | `bool` | `enable_parking` |
//!
//! Zero counts are accepted here and clamped later by
//! [`RuntimeConfig::normalize`].

use crate::runtime::config::{ConfigError, RuntimeConfig};
use crate::tracing_compat::debug;

/// Worker thread count.
pub const ENV_WORKER_THREADS: &str = "FIBRA_WORKER_THREADS";
/// Per-fiber operation budget.
pub const ENV_MAX_OPS_BEFORE_YIELD: &str = "FIBRA_MAX_OPS_BEFORE_YIELD";
/// Worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "FIBRA_THREAD_NAME_PREFIX";
/// Worker thread stack size in bytes.
pub const ENV_THREAD_STACK_SIZE: &str = "FIBRA_THREAD_STACK_SIZE";
/// Idle-worker parking toggle.
pub const ENV_ENABLE_PARKING: &str = "FIBRA_ENABLE_PARKING";

type Apply = fn(&mut RuntimeConfig, &'static str, String) -> Result<(), ConfigError>;

const OVERRIDES: [(&str, Apply); 5] = [
    (ENV_WORKER_THREADS, |config, var, raw| {
        config.worker_threads = parse_count(var, &raw)?;
        Ok(())
    }),
    (ENV_MAX_OPS_BEFORE_YIELD, |config, var, raw| {
        config.max_ops_before_yield = parse_count(var, &raw)?;
        Ok(())
    }),
    (ENV_THREAD_NAME_PREFIX, |config, _, raw| {
        config.thread_name_prefix = raw;
        Ok(())
    }),
    (ENV_THREAD_STACK_SIZE, |config, var, raw| {
        config.thread_stack_size = parse_count(var, &raw)?;
        Ok(())
    }),
    (ENV_ENABLE_PARKING, |config, var, raw| {
        config.enable_parking = parse_flag(var, &raw)?;
        Ok(())
    }),
];

/// Applies every `FIBRA_*` variable set in the process environment.
///
/// Stops at the first malformed value; fields already applied keep their
/// new values.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    apply_overrides_from(config, |var| std::env::var(var).ok())
}

/// Applies overrides read through `lookup` instead of the process
/// environment.
pub fn apply_overrides_from<L>(config: &mut RuntimeConfig, lookup: L) -> Result<(), ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    for (var, apply) in OVERRIDES {
        if let Some(raw) = lookup(var) {
            debug!(var, value = %raw, "config override from environment");
            apply(config, var, raw)?;
        }
    }
    Ok(())
}

fn parse_count(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        expected: "unsigned integer",
        value: raw.to_owned(),
    })
}

fn parse_flag(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    let normalized = raw.trim().to_ascii_lowercase();
    if ["1", "true", "yes", "on"].contains(&normalized.as_str()) {
        Ok(true)
    } else if ["0", "false", "no", "off"].contains(&normalized.as_str()) {
        Ok(false)
    } else {
        Err(ConfigError::InvalidEnv {
            var,
            expected: "boolean (1/0, true/false, yes/no, on/off)",
            value: raw.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(vars: &[(&str, &str)]) -> Result<RuntimeConfig, ConfigError> {
        crate::test_utils::init_test_logging();
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let mut config = RuntimeConfig::default();
        apply_overrides_from(&mut config, |var| env.get(var).cloned())?;
        Ok(config)
    }

    #[test]
    fn counts_accept_surrounding_whitespace() {
        assert_eq!(parse_count("V", " 12 "), Ok(12));
        assert_eq!(parse_count("V", "0"), Ok(0));
        for bad in ["", "-3", "4k", "1.5"] {
            assert!(parse_count("V", bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn flags_are_case_insensitive() {
        for (raw, want) in [("ON", true), ("Yes", true), ("1", true), ("off", false), ("FALSE", false)] {
            assert_eq!(parse_flag("V", raw), Ok(want), "{raw}");
        }
        assert!(parse_flag("V", "maybe").is_err());
    }

    #[test]
    fn every_variable_reaches_its_field() {
        let config = apply(&[
            (ENV_WORKER_THREADS, "6"),
            (ENV_MAX_OPS_BEFORE_YIELD, "128"),
            (ENV_THREAD_NAME_PREFIX, "svc"),
            (ENV_THREAD_STACK_SIZE, "65536"),
            (ENV_ENABLE_PARKING, "off"),
        ])
        .expect("valid overrides");
        assert_eq!(config.worker_threads, 6);
        assert_eq!(config.max_ops_before_yield, 128);
        assert_eq!(config.thread_name_prefix, "svc");
        assert_eq!(config.thread_stack_size, 65536);
        assert!(!config.enable_parking);
    }

    #[test]
    fn absent_variables_keep_defaults() {
        let config = apply(&[]).expect("no overrides");
        let defaults = RuntimeConfig::default();
        assert_eq!(config.worker_threads, defaults.worker_threads);
        assert_eq!(config.max_ops_before_yield, defaults.max_ops_before_yield);
        assert_eq!(config.thread_name_prefix, defaults.thread_name_prefix);
    }

    #[test]
    fn malformed_value_names_the_variable() {
        let err = apply(&[(ENV_MAX_OPS_BEFORE_YIELD, "lots")]).expect_err("malformed");
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                var: ENV_MAX_OPS_BEFORE_YIELD,
                expected: "unsigned integer",
                value: "lots".to_owned(),
            }
        );
        assert!(err.to_string().contains(ENV_MAX_OPS_BEFORE_YIELD));
    }
}
