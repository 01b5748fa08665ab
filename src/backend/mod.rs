//! Billing backend abstraction.
//!
//! The coordinator drives an external billing service through the
//! [`BillingService`] trait. Calls may complete asynchronously and on any
//! task; the coordinator re-queues their outcomes onto its own serialized
//! task before touching shared state.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::SessionType;
use crate::Result;

pub use memory::{BackendCall, InMemoryBillingService};

/// Session status as reported by the billing service itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    #[default]
    Stopped,
    Running,
    Paused,
}

/// Contract of the external billing service.
///
/// Implementations must be safe to call from any task. Per session type the
/// coordinator never has more than one call in flight.
#[async_trait]
pub trait BillingService: Send + Sync + 'static {
    /// Fetch the service token for a session type if the current
    /// credentials are valid.
    ///
    /// Fails with [`BillingError::TokenValidationFailed`] otherwise.
    ///
    /// [`BillingError::TokenValidationFailed`]: crate::BillingError::TokenValidationFailed
    async fn token_if_valid(&self, kind: SessionType) -> Result<String>;

    /// Begin a billable session.
    async fn begin_session(&self, kind: SessionType) -> Result<()>;

    /// Pause a running billable session.
    async fn pause_session(&self, kind: SessionType);

    /// Resume a paused billable session.
    async fn resume_session(&self, kind: SessionType) -> Result<()>;

    /// Stop a billable session.
    async fn stop_session(&self, kind: SessionType);

    /// Record a billing event against the running sessions.
    async fn trigger_billing_event(&self) -> Result<()>;

    /// Current backend view of a session type.
    fn session_status(&self, kind: SessionType) -> BackendStatus;

    /// Ambient credential used by the service, if any.
    fn access_token(&self) -> Option<String>;
}
