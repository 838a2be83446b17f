//! Keel Config - Configuration Structures
//!
//! Configuration types for arenas, output buffering and arena pooling.
//! Supports loading from TOML files and programmatic construction, with
//! defaults tuned for one arena per request.
//!
//! Key Features:
//! - Arena sizing and small/large threshold override
//! - Optional per-arena memory cap
//! - Output buffer budget and per-send byte limit
//! - Idle arena pool sizing
//!
//! @version 0.1.0
//! @author Keel Development Team

use crate::error::{KeelError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// =============================================================================
// Constants
// =============================================================================

pub const DEFAULT_ARENA_SIZE: usize = 16 * 1024;
pub const DEFAULT_OUTPUT_BUF_SIZE: usize = 32 * 1024;
pub const DEFAULT_OUTPUT_BUF_NUM: usize = 2;
pub const DEFAULT_MAX_IDLE_ARENAS: usize = 64;

// =============================================================================
// Arena Configuration
// =============================================================================

/// Configuration for a single arena.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Total size of every block, header included.
    pub size: usize,
    /// Requests above this size bypass the blocks. Defaults to one page.
    pub max_small_alloc: Option<usize>,
    /// Cap on bytes reserved by the arena (blocks plus large allocations).
    pub memory_limit: Option<usize>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_ARENA_SIZE,
            max_small_alloc: None,
            memory_limit: None,
        }
    }
}

impl ArenaConfig {
    /// Configuration for an arena of `size` bytes with default thresholds.
    pub fn with_size(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }
}

// =============================================================================
// Output Configuration
// =============================================================================

/// Number and size of buffers an output stage may allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufsConfig {
    pub num: usize,
    pub size: usize,
}

impl Default for BufsConfig {
    fn default() -> Self {
        Self {
            num: DEFAULT_OUTPUT_BUF_NUM,
            size: DEFAULT_OUTPUT_BUF_SIZE,
        }
    }
}

/// Configuration for output pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub bufs: BufsConfig,
    /// Maximum bytes handed to the sink per write call, 0 for unlimited.
    pub send_limit: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            bufs: BufsConfig::default(),
            send_limit: 0,
        }
    }
}

// =============================================================================
// Pool Configuration
// =============================================================================

/// Configuration for the shared pool of idle arenas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE_ARENAS,
        }
    }
}

// =============================================================================
// Top-level Configuration
// =============================================================================

/// Top-level Keel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeelConfig {
    pub arena: ArenaConfig,
    pub output: OutputConfig,
    pub pool: PoolConfig,
}

impl KeelConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| KeelError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| KeelError::Configuration(e.to_string()))
    }

    /// Check the values for internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.arena.size == 0 {
            return Err(KeelError::Configuration("arena.size must be positive".into()));
        }
        if self.arena.max_small_alloc == Some(0) {
            return Err(KeelError::Configuration(
                "arena.max_small_alloc must be positive".into(),
            ));
        }
        if let Some(limit) = self.arena.memory_limit {
            if limit < self.arena.size {
                return Err(KeelError::Configuration(format!(
                    "arena.memory_limit ({}) is smaller than arena.size ({})",
                    limit, self.arena.size
                )));
            }
        }
        if self.output.bufs.num == 0 || self.output.bufs.size == 0 {
            return Err(KeelError::Configuration(
                "output.bufs needs a positive number and size".into(),
            ));
        }
        Ok(())
    }

    /// Create configuration with development defaults.
    pub fn development() -> Self {
        Self::default()
    }

    /// Create configuration sized for production traffic.
    pub fn production() -> Self {
        Self {
            arena: ArenaConfig {
                size: 64 * 1024,
                memory_limit: Some(64 * 1024 * 1024),
                ..Default::default()
            },
            output: OutputConfig {
                send_limit: 2 * 1024 * 1024,
                ..Default::default()
            },
            pool: PoolConfig { max_idle: 1024 },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
