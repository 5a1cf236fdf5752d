//! Kernel configuration
//!
//! Loaded from JSON or built in code. Every field has a default, so a
//! partial document only overrides what it names.

use super::error::{KernelError, KernelResult};
use serde::{Deserialize, Serialize};

/// Upper bound on the number of priority levels
pub const MAX_PRIORITY_LEVELS: u16 = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Number of priority levels; valid priorities are `0..priority_levels`
    pub priority_levels: u16,
    /// Tick frequency used when the kernel builds its own clock
    pub tick_hz: u32,
    /// Enable hunger elevation
    pub hunger: bool,
    /// Stack size for stackful tasks spawned without an explicit size
    pub default_stack_size: usize,
    /// Scheduling trace ring length (0 disables tracing)
    pub trace_capacity: usize,
    /// Asynchronous publish depth per message bus topic
    pub mbus_queue_depth: usize,
}

impl KernelConfig {
    pub fn new() -> Self {
        Self {
            priority_levels: 24,
            tick_hz: 1000,
            hunger: true,
            default_stack_size: 64 * 1024,
            trace_capacity: 256,
            mbus_queue_depth: 2,
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> KernelResult<Self> {
        let config: KernelConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> KernelResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.priority_levels == 0 || self.priority_levels > MAX_PRIORITY_LEVELS {
            return Err(KernelError::Config(format!(
                "priority_levels must be in 1..={}, got {}",
                MAX_PRIORITY_LEVELS, self.priority_levels
            )));
        }
        if self.tick_hz == 0 {
            return Err(KernelError::Config("tick_hz must be non-zero".into()));
        }
        if self.default_stack_size == 0 {
            return Err(KernelError::Config(
                "default_stack_size must be non-zero".into(),
            ));
        }
        if self.mbus_queue_depth == 0 {
            return Err(KernelError::Config(
                "mbus_queue_depth must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.priority_levels, 24);
        assert_eq!(config.tick_hz, 1000);
        assert!(config.hunger);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = KernelConfig::from_json(r#"{ "priority_levels": 4, "hunger": false }"#)
            .unwrap();
        assert_eq!(config.priority_levels, 4);
        assert!(!config.hunger);
        assert_eq!(config.tick_hz, 1000);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            KernelConfig::from_json(r#"{ "priority_levels": 0 }"#),
            Err(KernelError::Config(_))
        ));
        assert!(matches!(
            KernelConfig::from_json(r#"{ "tick_hz": 0 }"#),
            Err(KernelError::Config(_))
        ));
        assert!(matches!(
            KernelConfig::from_json("not json"),
            Err(KernelError::Config(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = KernelConfig {
            priority_levels: 8,
            ..KernelConfig::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(KernelConfig::from_json(&json).unwrap(), config);
    }
}
