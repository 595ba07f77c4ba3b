//! Pipeline options.

/// Which passes the default pipeline runs, and whether it verifies between
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Verify the module before the first pass and after every pass.
    pub verify_each: bool,
    /// Lower complex arithmetic to `hlo.*` ops.
    pub lower_complex: bool,
    /// Remove side-effect-free nodes whose only uses are control edges.
    pub eliminate_dead_sinks: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            verify_each: true,
            lower_complex: false,
            eliminate_dead_sinks: true,
        }
    }
}

impl PipelineOptions {
    /// Defaults, overridden by `TFG_VERIFY_EACH`, `TFG_LOWER_COMPLEX` and
    /// `TFG_DEAD_SINKS` (`1` enables, `0` disables).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| match lookup(key).as_deref() {
            Some("1") => true,
            Some("0") => false,
            Some(other) => {
                tracing::warn!(key, value = other, "ignoring unrecognized pipeline flag");
                default
            }
            None => default,
        };
        Self {
            verify_each: flag("TFG_VERIFY_EACH", defaults.verify_each),
            lower_complex: flag("TFG_LOWER_COMPLEX", defaults.lower_complex),
            eliminate_dead_sinks: flag("TFG_DEAD_SINKS", defaults.eliminate_dead_sinks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides() {
        let opts = PipelineOptions::from_lookup(|key| match key {
            "TFG_LOWER_COMPLEX" => Some("1".into()),
            "TFG_VERIFY_EACH" => Some("0".into()),
            "TFG_DEAD_SINKS" => Some("yes".into()),
            _ => None,
        });
        assert_eq!(
            opts,
            PipelineOptions {
                verify_each: false,
                lower_complex: true,
                eliminate_dead_sinks: true,
            }
        );
    }

    #[test]
    fn unset_means_default() {
        assert_eq!(PipelineOptions::from_lookup(|_| None), PipelineOptions::default());
    }
}
