//! Keel Common - Shared Types and Utilities
//!
//! Foundational types, error handling, and utilities used by every Keel
//! component. Provides the abstractions shared between the memory core,
//! its output layer and the command line tool.
//!
//! Key Features:
//! - Unified error type with allocation/not-found core taxonomy
//! - Identifier types (BufTag, ArenaId, FileId)
//! - Configuration structures loaded from TOML
//! - Alignment and size utilities
//!
//! @version 0.1.0
//! @author Keel Development Team

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use error::{KeelError, Result};
pub use types::*;
