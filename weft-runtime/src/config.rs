//! Runtime Configuration
//!
//! Configuration for the runtime, settable programmatically or from
//! environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `WEFT_STACK_SIZE` | Proc stack body size in bytes | 65536 |
//! | `WEFT_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//! | `WEFT_RNG_SEED` | Scheduler PRNG seed (decimal u64) | entropy |

use std::env;

use thiserror::Error;

use crate::log::LogLevel;
use crate::stack::DEFAULT_STACK_BYTES;

/// Smallest stack body the runtime will accept. The synthetic activation
/// frame alone needs eight words plus alignment slack.
pub const MIN_STACK_BYTES: usize = 4096;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The stack size is not usable.
    #[error("stack size {0} is below the {MIN_STACK_BYTES}-byte minimum")]
    StackTooSmall(usize),
    /// An environment variable failed to parse.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv {
        /// The variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Proc stack body size in bytes.
    pub stack_size: usize,
    /// Minimum diagnostic level.
    pub log_level: LogLevel,
    /// Seed for the scheduler PRNG. `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_BYTES,
            log_level: LogLevel::Info,
            rng_seed: None,
        }
    }
}

impl RuntimeConfig {
    /// Start building a configuration.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Load configuration from `WEFT_*` environment variables, using
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        if let Ok(v) = env::var("WEFT_STACK_SIZE") {
            let bytes = v.parse::<usize>().map_err(|_| ConfigError::InvalidEnv {
                var: "WEFT_STACK_SIZE",
                value: v.clone(),
            })?;
            builder = builder.stack_size(bytes);
        }

        if let Ok(v) = env::var("WEFT_LOG_LEVEL") {
            let level = LogLevel::parse(&v).ok_or(ConfigError::InvalidEnv {
                var: "WEFT_LOG_LEVEL",
                value: v.clone(),
            })?;
            builder = builder.log_level(level);
        }

        if let Ok(v) = env::var("WEFT_RNG_SEED") {
            let seed = v.parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
                var: "WEFT_RNG_SEED",
                value: v.clone(),
            })?;
            builder = builder.rng_seed(seed);
        }

        builder.build()
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    stack_size: Option<usize>,
    log_level: Option<LogLevel>,
    rng_seed: Option<u64>,
}

impl RuntimeConfigBuilder {
    /// Set the proc stack body size in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Set the minimum diagnostic level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Seed the scheduler PRNG for reproducible scheduling.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        let stack_size = self.stack_size.unwrap_or(DEFAULT_STACK_BYTES);
        if stack_size < MIN_STACK_BYTES {
            return Err(ConfigError::StackTooSmall(stack_size));
        }
        Ok(RuntimeConfig {
            stack_size,
            log_level: self.log_level.unwrap_or_default(),
            rng_seed: self.rng_seed,
        })
    }
}
