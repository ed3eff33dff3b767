//! Domain error types

use thiserror::Error;

use crate::findings::FindingError;
use crate::task::TaskTreeError;

/// Domain-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Task tree error: {0}")]
    TaskTree(#[from] TaskTreeError),

    #[error("Finding error: {0}")]
    Finding(#[from] FindingError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl DomainError {
    /// Check if this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DomainError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_error_display() {
        let error = DomainError::Cancelled;
        assert_eq!(error.to_string(), "Operation cancelled");
    }

    #[test]
    fn test_is_cancelled_check() {
        assert!(DomainError::Cancelled.is_cancelled());
        assert!(!DomainError::TaskTree(TaskTreeError::NoRoot).is_cancelled());
    }

    #[test]
    fn test_tree_error_conversion() {
        let error: DomainError = TaskTreeError::EmptyGoal.into();
        assert_eq!(error.to_string(), "Task tree error: Task goal must not be empty");
    }
}
