//! Executable configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Switches applied to a compiled executable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutableConfig {
    /// Time every node and accumulate per-node counters
    pub performance_counters: bool,
    /// Scan floating point outputs for NaN after every node
    pub nan_check: bool,
    /// Operator names rejected at compile time, e.g. `Convolution`
    pub unsupported_ops: BTreeSet<String>,
}

impl ExecutableConfig {
    /// Create a configuration with everything off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable performance counters.
    pub fn with_performance_counters(mut self, enable: bool) -> Self {
        self.performance_counters = enable;
        self
    }

    /// Enable or disable the NaN check.
    pub fn with_nan_check(mut self, enable: bool) -> Self {
        self.nan_check = enable;
        self
    }

    /// Reject the given operator names.
    pub fn with_unsupported_ops<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unsupported_ops = names.into_iter().map(Into::into).collect();
        self
    }

    /// Counters and NaN check both on.
    pub fn development() -> Self {
        Self::new()
            .with_performance_counters(true)
            .with_nan_check(true)
    }

    /// Whether `op_type` is on the deny list.
    pub fn denies(&self, op_type: &str) -> bool {
        self.unsupported_ops.contains(op_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ExecutableConfig::new()
            .with_nan_check(true)
            .with_unsupported_ops(["Convolution", "Dot"]);
        assert!(config.nan_check);
        assert!(!config.performance_counters);
        assert!(config.denies("Dot"));
        assert!(!config.denies("Add"));
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = ExecutableConfig::development().with_unsupported_ops(["Sum"]);
        let json = serde_json::to_string(&config).unwrap();
        let back: ExecutableConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);

        let partial: ExecutableConfig = serde_json::from_str(r#"{"nan_check": true}"#).unwrap();
        assert!(partial.nan_check);
        assert!(partial.unsupported_ops.is_empty());
    }
}
