//! Process environment overrides scoped to one logic call.
//!
//! The environment is process-wide. Two inline calls running at the same
//! time with different overrides for the same variable will observe each
//! other's values. Their restores can also interleave: if A saves "unset",
//! B saves A's value, A restores and then B restores, the variable is left
//! holding A's value after both calls have finished. Callers needing
//! isolation should use the process or container executor instead.

use std::collections::HashMap;
use std::env;

/// Applies overrides on creation and restores the previous values on drop.
pub struct ScopedEnv {
    saved: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    pub fn apply(overrides: &HashMap<String, String>) -> Self {
        let mut saved = Vec::with_capacity(overrides.len());
        for (key, value) in overrides {
            saved.push((key.clone(), env::var(key).ok()));
            env::set_var(key, value);
        }
        Self { saved }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..).rev() {
            match previous {
                Some(value) => env::set_var(&key, value),
                None => env::remove_var(&key),
            }
        }
    }
}

/// Seed the process environment with `defaults` without overriding
/// anything already set.
pub fn apply_defaults(defaults: &HashMap<String, String>) {
    for (key, value) in defaults {
        if env::var_os(key).is_none() {
            env::set_var(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_are_restored() {
        env::set_var("FLOWRUNTIME_SCOPED_KEEP", "before");
        env::remove_var("FLOWRUNTIME_SCOPED_NEW");
        let overrides = HashMap::from([
            ("FLOWRUNTIME_SCOPED_KEEP".to_string(), "during".to_string()),
            ("FLOWRUNTIME_SCOPED_NEW".to_string(), "during".to_string()),
        ]);
        {
            let _guard = ScopedEnv::apply(&overrides);
            assert_eq!(env::var("FLOWRUNTIME_SCOPED_KEEP").unwrap(), "during");
            assert_eq!(env::var("FLOWRUNTIME_SCOPED_NEW").unwrap(), "during");
        }
        assert_eq!(env::var("FLOWRUNTIME_SCOPED_KEEP").unwrap(), "before");
        assert!(env::var("FLOWRUNTIME_SCOPED_NEW").is_err());
    }

    #[test]
    fn defaults_do_not_clobber() {
        env::set_var("FLOWRUNTIME_DEFAULT_SET", "mine");
        let defaults = HashMap::from([
            ("FLOWRUNTIME_DEFAULT_SET".to_string(), "theirs".to_string()),
            ("FLOWRUNTIME_DEFAULT_UNSET".to_string(), "theirs".to_string()),
        ]);
        apply_defaults(&defaults);
        assert_eq!(env::var("FLOWRUNTIME_DEFAULT_SET").unwrap(), "mine");
        assert_eq!(env::var("FLOWRUNTIME_DEFAULT_UNSET").unwrap(), "theirs");
    }
}
