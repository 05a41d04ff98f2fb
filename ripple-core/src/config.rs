//! Runtime Configuration
//!
//! Knobs that decide how a [`Runtime`](crate::reactive::Runtime) treats
//! writes and when it delivers notifications. Configurations can be built in
//! code or loaded from JSON; missing fields fall back to the defaults.
//!
//! ```rust
//! use ripple_core::config::{FlushMode, RuntimeConfig, WritePolicy};
//!
//! let config = RuntimeConfig::from_json_str(r#"{ "flush_mode": "deferred" }"#).unwrap();
//! assert_eq!(config.flush_mode, FlushMode::Deferred);
//! assert_eq!(config.write_policy, WritePolicy::AutoTransaction);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};

/// Default cap on chained flush passes.
pub const DEFAULT_MAX_FLUSH_PASSES: usize = 100;

/// What happens when an observable is written outside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Wrap the single write in its own transaction.
    #[default]
    AutoTransaction,
    /// Reject the write with [`ReactiveError::NotInTransaction`].
    Strict,
}

/// When queued reactions run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Run reactions when the outermost transaction commits.
    #[default]
    Synchronous,
    /// Queue reactions until the host calls `Runtime::flush`.
    Deferred,
}

/// Configuration for a reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of passes a single flush may take before it fails
    /// with [`ReactiveError::ReactionLoop`].
    pub max_flush_passes: usize,
    /// Whether observable writes must happen inside a transaction.
    pub write_policy: WritePolicy,
    /// When pending reactions run.
    pub flush_mode: FlushMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_passes: DEFAULT_MAX_FLUSH_PASSES,
            write_policy: WritePolicy::default(),
            flush_mode: FlushMode::default(),
        }
    }
}

impl RuntimeConfig {
    /// Set the flush pass limit.
    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes;
        self
    }

    /// Set the write policy.
    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Set the flush mode.
    pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// Check the configuration for values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_flush_passes == 0 {
            return Err(ReactiveError::InvalidConfig(
                "max_flush_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
