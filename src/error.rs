//! Error types for nav-billing.

use thiserror::Error;

use crate::session::SessionType;

/// Main error type for billing operations.
///
/// Coordinator operations never surface these to their callers; they are
/// produced by [`BillingService`](crate::backend::BillingService)
/// implementations and absorbed (and logged) by the coordinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    /// The billing service rejected or could not produce a service token.
    #[error("token validation failed for {0} session")]
    TokenValidationFailed(SessionType),

    /// No access token is configured for the billing service.
    #[error("missing access token")]
    MissingAccessToken,

    /// The billing service failed to begin a session.
    #[error("failed to begin {kind} session: {reason}")]
    BeginFailed { kind: SessionType, reason: String },

    /// The billing service failed to resume a paused session.
    #[error("failed to resume {kind} session: {reason}")]
    ResumeFailed { kind: SessionType, reason: String },

    /// A billing event trigger was rejected.
    #[error("billing event trigger failed: {0}")]
    EventTriggerFailed(String),

    /// The coordinator task is no longer running.
    #[error("coordinator closed")]
    CoordinatorClosed,
}

/// Convenience Result type for billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;
