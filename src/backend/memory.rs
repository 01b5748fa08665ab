//! In-memory billing service.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::trace;

use super::{BackendStatus, BillingService};
use crate::error::BillingError;
use crate::session::{PerType, SessionType};
use crate::Result;

/// A call observed by [`InMemoryBillingService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendCall {
    TokenIfValid(SessionType),
    Begin(SessionType),
    Pause(SessionType),
    Resume(SessionType),
    Stop(SessionType),
    TriggerEvent,
}

impl BackendCall {
    /// Session type the call targets, if any.
    pub fn kind(&self) -> Option<SessionType> {
        match self {
            BackendCall::TokenIfValid(kind)
            | BackendCall::Begin(kind)
            | BackendCall::Pause(kind)
            | BackendCall::Resume(kind)
            | BackendCall::Stop(kind) => Some(*kind),
            BackendCall::TriggerEvent => None,
        }
    }

    /// Check if the call changes the backend session lifecycle.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            BackendCall::Begin(_)
                | BackendCall::Pause(_)
                | BackendCall::Resume(_)
                | BackendCall::Stop(_)
        )
    }
}

#[derive(Debug)]
struct Inner {
    calls: Vec<BackendCall>,
    status: PerType<BackendStatus>,
    tokens: PerType<String>,
    access_token: Option<String>,
    reject_tokens: PerType<bool>,
    reject_begins: PerType<bool>,
    failing_resumes: PerType<u32>,
    reject_events: bool,
}

/// Billing service that keeps its state in memory.
///
/// Every call is recorded in order, and failures can be injected per
/// session type. Begin calls can be held at a gate to observe the
/// coordinator while a begin is in flight.
#[derive(Debug)]
pub struct InMemoryBillingService {
    inner: Mutex<Inner>,
    begin_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl InMemoryBillingService {
    /// Create a service with valid credentials and default tokens.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                calls: Vec::new(),
                status: PerType::default(),
                tokens: PerType::from_fn(|kind| format!("{}-sku-token", kind.as_str())),
                access_token: Some("pk.in-memory".to_string()),
                reject_tokens: PerType::default(),
                reject_begins: PerType::default(),
                failing_resumes: PerType::default(),
                reject_events: false,
            }),
            begin_gate: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: BackendCall) {
        trace!("billing backend call: {:?}", call);
        self.lock().calls.push(call);
    }

    /// Set the access token (`None` removes it).
    pub fn set_access_token(&self, token: Option<&str>) {
        self.lock().access_token = token.map(str::to_string);
    }

    /// Set the service token returned for a session type.
    pub fn set_token(&self, kind: SessionType, token: impl Into<String>) {
        self.lock().tokens[kind] = token.into();
    }

    /// Service token returned for a session type.
    pub fn token(&self, kind: SessionType) -> String {
        self.lock().tokens[kind].clone()
    }

    /// Make token validation fail for a session type.
    pub fn reject_tokens(&self, kind: SessionType, reject: bool) {
        self.lock().reject_tokens[kind] = reject;
    }

    /// Make begin calls fail for a session type.
    pub fn reject_begins(&self, kind: SessionType, reject: bool) {
        self.lock().reject_begins[kind] = reject;
    }

    /// Make the next `count` resume calls fail for a session type.
    pub fn fail_next_resumes(&self, kind: SessionType, count: u32) {
        self.lock().failing_resumes[kind] = count;
    }

    /// Make billing event triggers fail.
    pub fn reject_events(&self, reject: bool) {
        self.lock().reject_events = reject;
    }

    /// Hold every following begin call until [`release_begin`] is called.
    ///
    /// [`release_begin`]: Self::release_begin
    pub fn hold_begins(&self) {
        let mut gate = self.begin_gate.lock().unwrap_or_else(PoisonError::into_inner);
        *gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let one held begin call proceed.
    pub fn release_begin(&self) {
        let gate = self.begin_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(gate) = gate.as_ref() {
            gate.add_permits(1);
        }
    }

    /// All calls observed so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Begin, pause, resume and stop calls for one session type, in order.
    pub fn lifecycle_calls(&self, kind: SessionType) -> Vec<BackendCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_lifecycle() && call.kind() == Some(kind))
            .copied()
            .collect()
    }

    /// Number of times a call was observed.
    pub fn count(&self, call: BackendCall) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    /// Forget all recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

impl Default for InMemoryBillingService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillingService for InMemoryBillingService {
    async fn token_if_valid(&self, kind: SessionType) -> Result<String> {
        self.record(BackendCall::TokenIfValid(kind));
        let inner = self.lock();
        if inner.reject_tokens[kind] {
            return Err(BillingError::TokenValidationFailed(kind));
        }
        Ok(inner.tokens[kind].clone())
    }

    async fn begin_session(&self, kind: SessionType) -> Result<()> {
        self.record(BackendCall::Begin(kind));

        let gate = self
            .begin_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut inner = self.lock();
        if inner.reject_begins[kind] {
            return Err(BillingError::BeginFailed {
                kind,
                reason: "rejected by billing service".to_string(),
            });
        }
        inner.status[kind] = BackendStatus::Running;
        Ok(())
    }

    async fn pause_session(&self, kind: SessionType) {
        self.record(BackendCall::Pause(kind));
        self.lock().status[kind] = BackendStatus::Paused;
    }

    async fn resume_session(&self, kind: SessionType) -> Result<()> {
        self.record(BackendCall::Resume(kind));
        let mut inner = self.lock();
        if inner.failing_resumes[kind] > 0 {
            inner.failing_resumes[kind] -= 1;
            return Err(BillingError::ResumeFailed {
                kind,
                reason: "session expired".to_string(),
            });
        }
        inner.status[kind] = BackendStatus::Running;
        Ok(())
    }

    async fn stop_session(&self, kind: SessionType) {
        self.record(BackendCall::Stop(kind));
        self.lock().status[kind] = BackendStatus::Stopped;
    }

    async fn trigger_billing_event(&self) -> Result<()> {
        self.record(BackendCall::TriggerEvent);
        if self.lock().reject_events {
            return Err(BillingError::EventTriggerFailed(
                "rejected by billing service".to_string(),
            ));
        }
        Ok(())
    }

    fn session_status(&self, kind: SessionType) -> BackendStatus {
        self.lock().status[kind]
    }

    fn access_token(&self) -> Option<String> {
        self.lock().access_token.clone()
    }
}
