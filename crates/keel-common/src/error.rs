//! Keel Error - Unified Error Types
//!
//! Error handling for all Keel operations. The memory core only ever reports
//! allocation failures and missing large allocations; the configuration and
//! output layers add I/O and configuration errors on top.
//!
//! Key Features:
//! - Small core taxonomy: allocation failure vs. not found
//! - Retryable error detection for would-block style I/O
//! - Seamless integration with std::io::Error
//!
//! @version 0.1.0
//! @author Keel Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Keel operations.
#[derive(Error, Debug)]
pub enum KeelError {
    // Memory errors
    #[error("allocation failed: {size} bytes")]
    AllocationFailed { size: usize },

    #[error("not found: {0}")]
    NotFound(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Keel operations.
pub type Result<T> = std::result::Result<T, KeelError>;

// =============================================================================
// Error Classification
// =============================================================================

impl KeelError {
    /// Shorthand for an allocation failure of `size` bytes.
    pub fn alloc(size: usize) -> Self {
        KeelError::AllocationFailed { size }
    }

    /// Returns true if the operation can be safely retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            KeelError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Returns true if the underlying system allocator refused a request.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, KeelError::AllocationFailed { .. })
    }

    /// Returns true if the caller can keep using the arena after this error.
    pub fn is_recoverable(&self) -> bool {
        !self.is_allocation_failure()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            KeelError::alloc(4096).to_string(),
            "allocation failed: 4096 bytes"
        );
        assert_eq!(
            KeelError::NotFound("large allocation".into()).to_string(),
            "not found: large allocation"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(KeelError::alloc(1).is_allocation_failure());
        assert!(!KeelError::alloc(1).is_recoverable());
        assert!(KeelError::NotFound("x".into()).is_recoverable());

        let would_block = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        assert!(KeelError::from(would_block).is_retryable());

        let broken = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(!KeelError::from(broken).is_retryable());
    }
}
