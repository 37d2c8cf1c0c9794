//! Transformation configuration.
//!
//! All knobs are observability or analysis-precision toggles; none of them
//! change the meaning of the generated code.
//!
//! | Variable             | Effect                                        |
//! |----------------------|-----------------------------------------------|
//! | `SPINDLE_DUMP`       | log a listing of every generated state object |
//! | `SPINDLE_TIMING`     | log analysis and codegen durations            |
//! | `SPINDLE_NO_PRUNE`   | persist occupied locals even when dead        |

/// Options for [`Transformer`](super::Transformer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformConfig {
    /// Log a disassembly of each generated state object.
    pub dump_state_objects: bool,
    /// Log how long analysis and codegen took.
    pub measure_timing: bool,
    /// Leave dead locals out of spill sets.
    pub prune_dead_locals: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            dump_state_objects: false,
            measure_timing: false,
            prune_dead_locals: true,
        }
    }
}

impl TransformConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| lookup(key).is_some_and(|v| parse_flag(&v));
        Self {
            dump_state_objects: flag("SPINDLE_DUMP"),
            measure_timing: flag("SPINDLE_TIMING"),
            prune_dead_locals: !flag("SPINDLE_NO_PRUNE"),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = TransformConfig::default();
        assert!(!config.dump_state_objects);
        assert!(config.prune_dead_locals);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> =
            [("SPINDLE_DUMP", "yes"), ("SPINDLE_NO_PRUNE", "1"), ("SPINDLE_TIMING", "off")]
                .into_iter()
                .collect();
        let config = TransformConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_owned()));
        assert!(config.dump_state_objects);
        assert!(!config.measure_timing);
        assert!(!config.prune_dead_locals);
    }
}
