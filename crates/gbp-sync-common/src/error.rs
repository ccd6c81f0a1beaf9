//! Synchronization status and error types.

use thiserror::Error;

/// Classification of one synchronization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// The synchronizer applied the pair and reported success.
    Applied,
    /// The synchronizer ran but reported that nothing was applied.
    NotApplied,
    /// The synchronizer returned an error or panicked.
    Failed,
}

impl SyncStatus {
    /// Classifies a synchronizer result.
    pub fn of(result: &SyncResult<bool>) -> Self {
        match result {
            Ok(true) => SyncStatus::Applied,
            Ok(false) => SyncStatus::NotApplied,
            Err(_) => SyncStatus::Failed,
        }
    }

    /// Returns true if the pair was applied.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncStatus::Applied)
    }
}

/// Error type for synchronization failures.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// The target device could not be reached
    #[error("Device unreachable: {target}: {message}")]
    Unreachable { target: String, message: String },

    /// The device refused the configuration
    #[error("Configuration rejected: {message}")]
    Rejected { message: String },

    /// The synchronizer panicked while applying the pair
    #[error("Synchronizer panicked: {message}")]
    Panicked { message: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Creates an unreachable-device error.
    pub fn unreachable(target: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Unreachable {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Creates a rejected-configuration error.
    pub fn rejected(message: impl Into<String>) -> Self {
        SyncError::Rejected {
            message: message.into(),
        }
    }

    /// Creates a panic error.
    pub fn panicked(message: impl Into<String>) -> Self {
        SyncError::Panicked {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        SyncError::Internal {
            message: message.into(),
        }
    }

    /// Returns true if a later attempt for the same target may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Unreachable { .. })
    }
}

/// Result type for synchronization.
pub type SyncResult<T> = Result<T, SyncError>;
