//! Table configuration.
//!
//! Configuration can be set programmatically or loaded from environment
//! variables (used by the process-wide table in [`crate::global`]).
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RSMEGAPAGE_FAST_BITS` | Number of fast-fast bits (multiple of 64) | 524288 |
//! | `RSMEGAPAGE_CHUNK_SIZE` | Immortal heap chunk size in bytes (power of two) | 65536 |
//!
//! # Example
//!
//! ```rust,ignore
//! use rsmegapage::TableConfig;
//!
//! let config = TableConfig::builder().fast_bit_count(64).build()?;
//! ```

use crate::DEFAULT_FAST_BIT_COUNT;
use crate::bitvector;
use crate::error::ConfigError;
use crate::immortal_heap::DEFAULT_CHUNK_SIZE;
use std::env;

pub const ENV_FAST_BITS: &str = "RSMEGAPAGE_FAST_BITS";
pub const ENV_CHUNK_SIZE: &str = "RSMEGAPAGE_CHUNK_SIZE";

/// Largest accepted fast bit count (covers a 47-bit address space at 16 MiB).
pub const MAX_FAST_BIT_COUNT: usize = 1 << 23;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Indices below this are eligible for the fast-fast bits.
    pub fast_bit_count: usize,
    /// Chunk size of the immortal heap backing the table.
    pub chunk_size: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            fast_bit_count: DEFAULT_FAST_BIT_COUNT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TableConfig {
    pub fn builder() -> TableConfigBuilder {
        TableConfigBuilder::default()
    }

    /// Load configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_FAST_BITS) {
            config.fast_bit_count = parse_size(ENV_FAST_BITS, &value)?;
        }
        if let Some(value) = lookup(ENV_CHUNK_SIZE) {
            config.chunk_size = parse_size(ENV_CHUNK_SIZE, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fast_bit_count % bitvector::WORD_BITS != 0
            || self.fast_bit_count > MAX_FAST_BIT_COUNT
        {
            return Err(ConfigError::OutOfRange {
                field: "fast_bit_count",
                value: self.fast_bit_count,
                expected: "a multiple of 64 no greater than 2^23",
            });
        }
        if !self.chunk_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "chunk_size",
                value: self.chunk_size,
            });
        }
        Ok(())
    }
}

fn parse_size(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

#[derive(Debug, Default)]
pub struct TableConfigBuilder {
    config: TableConfig,
}

impl TableConfigBuilder {
    pub fn fast_bit_count(mut self, count: usize) -> Self {
        self.config.fast_bit_count = count;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn build(self) -> Result<TableConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
