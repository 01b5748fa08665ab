//! Billing session coordinator.
//!
//! The coordinator maps any number of logical sessions (one per trip, keyed
//! by [`SessionId`]) onto at most one billable backend session per
//! [`SessionType`]:
//!
//! - the backend session of a type begins when the first logical session of
//!   that type begins, and stops when the last one stops;
//! - it pauses only once every logical session of the type is paused, and
//!   resumes as soon as one of them is running again;
//! - a failed begin rolls the affected sessions back to `Stopped`, a failed
//!   resume falls back to a fresh begin.
//!
//! All mutations are applied in order by a single task that owns the
//! session ledger and both slots. Queries read the snapshot that task
//! publishes after every mutation, so they never block.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nav_billing::{BillingCoordinator, CoordinatorConfig, InMemoryBillingService};
//! use nav_billing::{SessionId, SessionState, SessionType};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = Arc::new(InMemoryBillingService::new());
//!     let coordinator = BillingCoordinator::spawn(service, CoordinatorConfig::default());
//!
//!     let trip = SessionId::new();
//!     coordinator.begin_session(SessionType::ActiveGuidance, trip).await;
//!     assert_eq!(coordinator.session_state(&trip), SessionState::Running);
//!
//!     coordinator.stop_session(trip).await;
//!     coordinator.shutdown().await.ok();
//! }
//! ```

mod actor;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::warn;

use self::actor::{Actor, Command};
use crate::backend::{BackendStatus, BillingService};
use crate::error::BillingError;
use crate::session::{PerType, SessionId, SessionLedger, SessionState, SessionType, SlotState};
use crate::Result;

/// Default period of the billing event trigger.
pub const DEFAULT_EVENT_INTERVAL: Duration = Duration::from_secs(300);

/// Runtime configuration of a [`BillingCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Period of the billing event trigger while a slot is running.
    /// `None` disables the trigger.
    pub event_interval: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            event_interval: Some(DEFAULT_EVENT_INTERVAL),
        }
    }
}

impl CoordinatorConfig {
    /// Configuration without periodic billing events.
    pub fn without_events() -> Self {
        Self {
            event_interval: None,
        }
    }

    /// Set the billing event period.
    pub fn with_event_interval(mut self, interval: Duration) -> Self {
        self.event_interval = Some(interval);
        self
    }
}

/// Published view of one billable slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotView {
    pub state: SlotState,
    /// Token published by the last successful begin of this generation.
    pub token: Option<String>,
    /// Incremented each time the slot goes from zero to one session.
    pub generation: u64,
}

/// Immutable state of the coordinator after a mutation.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub sessions: SessionLedger,
    pub slots: PerType<SlotView>,
}

impl Snapshot {
    /// State of a logical session; `Stopped` when unknown.
    pub fn session_state(&self, id: &SessionId) -> SessionState {
        self.sessions.state(id)
    }

    /// Raw phase of a slot.
    pub fn slot_state(&self, kind: SessionType) -> SlotState {
        self.slots[kind].state
    }

    /// The externally reported service token.
    ///
    /// Active guidance takes precedence over free drive when both slots are
    /// live. Empty when neither slot holds a token.
    pub fn service_token(&self) -> String {
        [SessionType::ActiveGuidance, SessionType::FreeDrive]
            .into_iter()
            .map(|kind| &self.slots[kind])
            .filter(|slot| slot.state != SlotState::Stopped)
            .find_map(|slot| slot.token.clone())
            .unwrap_or_default()
    }
}

/// Acknowledgement of a queued mutation.
///
/// The mutation is queued as soon as the coordinator method returns;
/// dropping this value does not cancel it. Awaiting it resolves once the
/// mutation's bookkeeping has been applied and published, so that queries
/// made afterwards observe it. Backend calls triggered by the mutation may
/// still be in flight (see [`BillingCoordinator::settled`]).
#[derive(Debug)]
#[must_use = "the mutation is queued either way; await to observe its effect"]
pub struct Applied {
    rx: Option<oneshot::Receiver<()>>,
}

impl Applied {
    fn closed() -> Self {
        Self { rx: None }
    }
}

impl Future for Applied {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.rx.as_mut() {
            Some(rx) => Pin::new(rx).poll(cx).map(|_| ()),
            None => Poll::Ready(()),
        }
    }
}

/// Handle to a running billing session coordinator.
///
/// Handles are cheap to clone and may be used from any task or thread.
/// The coordinator task exits after [`shutdown`](Self::shutdown), or once
/// every handle is dropped and no backend call is in flight; in both cases
/// the backend sessions still running are stopped first.
#[derive(Clone)]
pub struct BillingCoordinator {
    tx: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<Arc<Snapshot>>,
    service: Arc<dyn BillingService>,
}

impl BillingCoordinator {
    /// Start a coordinator task driving the given billing service.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(service: Arc<dyn BillingService>, config: CoordinatorConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (published, snapshot) = watch::channel(Arc::new(Snapshot::default()));

        let actor = Actor::new(Arc::clone(&service), config, rx, tx.downgrade(), published);
        tokio::spawn(actor.run());

        Self {
            tx,
            snapshot,
            service,
        }
    }

    fn enqueue(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) -> Applied {
        let (ack, rx) = oneshot::channel();
        if self.tx.send(command(ack)).is_err() {
            warn!("Billing coordinator is closed; dropping session update");
            return Applied::closed();
        }
        Applied { rx: Some(rx) }
    }

    /// Begin metering a logical session.
    ///
    /// The first session of a type starts the backend session; further
    /// sessions of the same type are bookkeeping only. Ids that are already
    /// tracked are ignored.
    pub fn begin_session(&self, kind: SessionType, id: SessionId) -> Applied {
        self.enqueue(|ack| Command::Begin { kind, id, ack })
    }

    /// Pause a logical session. Unknown ids are ignored.
    pub fn pause_session(&self, id: SessionId) -> Applied {
        self.enqueue(|ack| Command::Pause { id, ack })
    }

    /// Resume a paused logical session. Unknown ids are ignored.
    pub fn resume_session(&self, id: SessionId) -> Applied {
        self.enqueue(|ack| Command::Resume { id, ack })
    }

    /// Stop and forget a logical session, whatever its state.
    pub fn stop_session(&self, id: SessionId) -> Applied {
        self.enqueue(|ack| Command::Stop { id, ack })
    }

    /// Start a fresh billable session for the id's type without stopping
    /// the current one, e.g. when a new route leg begins.
    ///
    /// A billing event is triggered first. Ignored unless the id is tracked
    /// and its slot is confirmed running.
    pub fn renew_session(&self, id: SessionId) -> Applied {
        self.enqueue(|ack| Command::Renew { id, ack })
    }

    /// State of a logical session; `Stopped` for unknown ids.
    pub fn session_state(&self, id: &SessionId) -> SessionState {
        self.snapshot.borrow().session_state(id)
    }

    /// Reported state of the billable session of a type.
    pub fn billing_state(&self, kind: SessionType) -> SessionState {
        self.snapshot.borrow().slot_state(kind).reported()
    }

    /// Raw slot phase, including in-flight `Starting` and `Resuming`.
    pub fn slot_state(&self, kind: SessionType) -> SlotState {
        self.snapshot.borrow().slot_state(kind)
    }

    /// The service token of the active session; empty when none runs.
    pub fn current_service_token(&self) -> String {
        self.snapshot.borrow().service_token()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshot.borrow())
    }

    /// Backend's own view of a session type.
    pub fn backend_status(&self, kind: SessionType) -> BackendStatus {
        self.service.session_status(kind)
    }

    /// Access token of the billing service.
    pub fn access_token(&self) -> Option<String> {
        self.service.access_token()
    }

    /// Wait until every mutation queued so far has been applied and no
    /// backend call is in flight.
    pub async fn settled(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Command::Settled(done))
            .map_err(|_| BillingError::CoordinatorClosed)?;
        rx.await.map_err(|_| BillingError::CoordinatorClosed)
    }

    /// Stop every session, wait for the backend to be stopped and end the
    /// coordinator task.
    ///
    /// Mutations queued after this call are ignored.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(done))
            .map_err(|_| BillingError::CoordinatorClosed)?;
        rx.await.map_err(|_| BillingError::CoordinatorClosed)
    }

    /// Check if the coordinator task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for BillingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingCoordinator")
            .field("snapshot", &*self.snapshot.borrow())
            .finish_non_exhaustive()
    }
}
