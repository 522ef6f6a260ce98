use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::Capability;
use crate::model::{SuggestionId, UnitKey, UserId};

/// Errors returned by review operations. Each one is scoped to the single
/// request that produced it; none leaves partial effects behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    #[error("{user} is not allowed to do this: {detail} (requires {required})")]
    PermissionDenied {
        user: UserId,
        required: Capability,
        detail: &'static str,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("identical suggestion already pending for {unit}")]
    DuplicateSuggestion { unit: UnitKey },

    #[error("{voter} already voted on suggestion {suggestion}")]
    DuplicateVote {
        voter: UserId,
        suggestion: SuggestionId,
    },

    #[error("locked by {holder} until {expires_at}")]
    LockHeld {
        holder: UserId,
        expires_at: DateTime<Utc>,
    },

    #[error("lock belongs to {holder} until {expires_at}")]
    LockHeldByOther {
        holder: UserId,
        expires_at: DateTime<Utc>,
    },

    #[error("{unit} is not locked")]
    NotLocked { unit: UnitKey },

    #[error("lock duration must be between 1 and {max_secs} seconds")]
    InvalidLockDuration { max_secs: i64 },

    #[error("acceptance threshold must be at least 1, got {threshold}")]
    InvalidThreshold { threshold: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl ReviewError {
    /// Short machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "permission_denied",
            Self::NotFound { .. } => "not_found",
            Self::DuplicateSuggestion { .. } => "duplicate_suggestion",
            Self::DuplicateVote { .. } => "duplicate_vote",
            Self::LockHeld { .. } => "lock_held",
            Self::LockHeldByOther { .. } => "lock_held_by_other",
            Self::NotLocked { .. } => "not_locked",
            Self::InvalidLockDuration { .. } => "invalid_lock_duration",
            Self::InvalidThreshold { .. } => "invalid_threshold",
            Self::InvalidConfiguration(_) => "invalid_configuration",
        }
    }

    /// Whether waiting and trying again can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockHeld { .. })
    }

    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lock_held_message_names_holder_and_expiry() {
        let err = ReviewError::LockHeld {
            holder: "alice".to_string(),
            expires_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alice"));
        assert!(msg.contains("2024-01-15 10:30:00"));
    }

    #[test]
    fn test_permission_denied_names_required_capability() {
        let err = ReviewError::PermissionDenied {
            user: "bob".to_string(),
            required: Capability::OverrideSuggestionState,
            detail: "automatic acceptance is enabled",
        };
        assert!(err.to_string().contains("override_suggestion_state"));
        assert_eq!(err.code(), "permission_denied");
    }

    #[test]
    fn test_only_lock_held_is_retryable() {
        let held = ReviewError::LockHeld {
            holder: "alice".to_string(),
            expires_at: Utc::now(),
        };
        assert!(held.is_retryable());
        assert!(!ReviewError::not_found("suggestion", 7).is_retryable());
        assert!(!ReviewError::InvalidThreshold { threshold: 0 }.is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = ReviewError::not_found("suggestion", SuggestionId(7));
        assert_eq!(err.to_string(), "suggestion 7 not found");
    }
}
