//! # nav-billing
//!
//! Billing session coordination for turn-by-turn navigation.
//!
//! A navigation app meters two kinds of usage, free drive and active
//! guidance, against an external billing service. Many trips can be in
//! progress at once; this crate maps them onto at most one billable
//! session per kind and keeps that session begun, paused, resumed and
//! stopped in step with the trips.
//!
//! ## Features
//!
//! - **Reference counting**: one backend begin and stop per kind, however
//!   many trips share it
//! - **Serialized state**: every mutation goes through one ordered queue;
//!   queries are lock-free snapshot reads
//! - **Recovery**: failed begins roll back, failed resumes fall back to a
//!   fresh begin, failed billing events are logged and ignored
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use nav_billing::{BillingCoordinator, Config, InMemoryBillingService, SessionId, SessionType};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load(None).unwrap_or_default();
//!     nav_billing::logging::try_init_with_level(config.log_filter()).ok();
//!
//!     let service = Arc::new(InMemoryBillingService::new());
//!     let billing = BillingCoordinator::spawn(service, config.coordinator_config());
//!
//!     let trip = SessionId::new();
//!     billing.begin_session(SessionType::FreeDrive, trip).await;
//!     println!("token: {}", billing.current_service_token());
//!
//!     billing.stop_session(trip).await;
//!     billing.shutdown().await.ok();
//! }
//! ```

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod session;

// Re-export commonly used types
pub use backend::{BackendCall, BackendStatus, BillingService, InMemoryBillingService};
pub use config::{Config, ConfigError};
pub use coordinator::{Applied, BillingCoordinator, CoordinatorConfig, SlotView, Snapshot};
pub use error::{BillingError, Result};
pub use session::{PerType, SessionId, SessionLedger, SessionRecord, SessionState, SessionType, SlotState};
