//! Serialized coordinator task.
//!
//! The actor owns the ledger and both slots. Every mutation arrives as a
//! [`Command`] on one ordered queue, including the outcomes of backend calls,
//! which run in their own tasks and report back through the same queue.
//!
//! Each slot keeps a target (`Stopped`, `Running` or `Paused`) set by the
//! caller-facing commands, and the last state confirmed by the backend.
//! Whenever no backend call is in flight for a slot, [`Actor::reconcile`]
//! issues the single call that moves the backend toward the target.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{CoordinatorConfig, SlotView, Snapshot};
use crate::backend::BillingService;
use crate::error::BillingError;
use crate::session::{PerType, SessionId, SessionLedger, SessionState, SessionType, SlotState};
use crate::Result;

/// Message processed by the coordinator task.
pub(crate) enum Command {
    Begin {
        kind: SessionType,
        id: SessionId,
        ack: oneshot::Sender<()>,
    },
    Pause {
        id: SessionId,
        ack: oneshot::Sender<()>,
    },
    Resume {
        id: SessionId,
        ack: oneshot::Sender<()>,
    },
    Stop {
        id: SessionId,
        ack: oneshot::Sender<()>,
    },
    Renew {
        id: SessionId,
        ack: oneshot::Sender<()>,
    },
    Settled(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
    Completed(Outcome),
}

/// Result of a backend call, re-queued onto the coordinator task.
pub(crate) enum Outcome {
    Begun {
        kind: SessionType,
        generation: u64,
        result: Result<String>,
    },
    Renewed {
        kind: SessionType,
        generation: u64,
        result: Result<()>,
    },
    Paused {
        kind: SessionType,
        generation: u64,
    },
    Resumed {
        kind: SessionType,
        generation: u64,
        result: Result<()>,
    },
    Stopped {
        kind: SessionType,
    },
}

/// Backend session state as last confirmed, tagged with the generation it
/// was begun for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Stopped,
    Running(u64),
    Paused(u64),
}

/// Backend call in flight for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Begin(u64),
    Renew(u64),
    Pause(u64),
    Resume(u64),
    Stop,
}

#[derive(Debug)]
struct Slot {
    target: SessionState,
    generation: u64,
    backend: Backend,
    in_flight: Option<Op>,
    token: Option<String>,
    ticker: Option<JoinHandle<()>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            target: SessionState::Stopped,
            generation: 0,
            backend: Backend::Stopped,
            in_flight: None,
            token: None,
            ticker: None,
        }
    }

    fn state(&self) -> SlotState {
        match (self.target, self.in_flight) {
            (SessionState::Stopped, _) => SlotState::Stopped,
            (_, Some(Op::Begin(_))) => SlotState::Starting,
            (_, Some(Op::Resume(_))) => SlotState::Resuming,
            (SessionState::Running, _) => SlotState::Running,
            (SessionState::Paused, _) => SlotState::Paused,
        }
    }

    /// The next backend call, if the backend lags behind the target.
    fn next_op(&self) -> Option<Op> {
        if self.in_flight.is_some() {
            return None;
        }
        let current = self.generation;
        match (self.target, self.backend) {
            (SessionState::Stopped, Backend::Stopped) => None,
            (SessionState::Stopped, _) => Some(Op::Stop),
            (_, Backend::Stopped) => Some(Op::Begin(current)),
            // A newer generation replaced the one the backend is metering.
            (_, Backend::Running(g) | Backend::Paused(g)) if g != current => Some(Op::Stop),
            (SessionState::Running, Backend::Paused(_)) => Some(Op::Resume(current)),
            (SessionState::Paused, Backend::Running(_)) => Some(Op::Pause(current)),
            (SessionState::Running, Backend::Running(_))
            | (SessionState::Paused, Backend::Paused(_)) => None,
        }
    }

    fn wants_events(&self) -> bool {
        self.target == SessionState::Running
            && self.backend == Backend::Running(self.generation)
            && !matches!(self.in_flight, Some(Op::Pause(_) | Op::Stop))
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

pub(crate) struct Actor {
    service: Arc<dyn BillingService>,
    config: CoordinatorConfig,
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::WeakUnboundedSender<Command>,
    published: watch::Sender<Arc<Snapshot>>,
    ledger: SessionLedger,
    slots: PerType<Slot>,
    settled_waiters: Vec<oneshot::Sender<()>>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl Actor {
    pub(crate) fn new(
        service: Arc<dyn BillingService>,
        config: CoordinatorConfig,
        rx: mpsc::UnboundedReceiver<Command>,
        tx: mpsc::WeakUnboundedSender<Command>,
        published: watch::Sender<Arc<Snapshot>>,
    ) -> Self {
        Self {
            service,
            config,
            rx,
            tx,
            published,
            ledger: SessionLedger::new(),
            slots: PerType::from_fn(|_| Slot::new()),
            settled_waiters: Vec::new(),
            shutdown_waiters: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Billing coordinator started");

        while let Some(command) = self.rx.recv().await {
            self.handle(command);
            self.publish();

            if self.is_idle() {
                for waiter in self.settled_waiters.drain(..) {
                    let _ = waiter.send(());
                }
                if !self.shutdown_waiters.is_empty() {
                    break;
                }
            }
        }

        // Every handle is gone; nothing is in flight, so stop inline.
        if self.shutdown_waiters.is_empty() {
            self.stop_all_inline().await;
        }

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        debug!("Billing coordinator stopped");
    }

    fn is_idle(&self) -> bool {
        self.slots.iter().all(|(_, slot)| slot.in_flight.is_none())
    }

    fn is_closing(&self) -> bool {
        !self.shutdown_waiters.is_empty()
    }

    fn publish(&self) {
        let snapshot = Snapshot {
            sessions: self.ledger.clone(),
            slots: self.slots.map(|_, slot| SlotView {
                state: slot.state(),
                token: slot.token.clone(),
                generation: slot.generation,
            }),
        };
        self.published.send_replace(Arc::new(snapshot));
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Begin { kind, id, ack } => {
                if self.is_closing() {
                    warn!("Ignoring begin of session {} during shutdown", id);
                } else {
                    self.begin(kind, id);
                }
                self.ack(ack);
            }
            Command::Pause { id, ack } => {
                self.pause(id);
                self.ack(ack);
            }
            Command::Resume { id, ack } => {
                if !self.is_closing() {
                    self.resume(id);
                }
                self.ack(ack);
            }
            Command::Stop { id, ack } => {
                self.stop(id);
                self.ack(ack);
            }
            Command::Renew { id, ack } => {
                if !self.is_closing() {
                    self.renew(id);
                }
                self.ack(ack);
            }
            Command::Settled(done) => self.settled_waiters.push(done),
            Command::Shutdown(done) => {
                info!("Shutting down billing coordinator");
                self.shutdown_waiters.push(done);
                for kind in SessionType::ALL {
                    for id in self.ledger.ids(kind) {
                        self.ledger.remove(&id);
                    }
                    self.clear_slot(kind);
                    self.reconcile(kind);
                }
            }
            Command::Completed(outcome) => self.complete(outcome),
        }
    }

    /// Acknowledge a caller-facing command once its bookkeeping is visible.
    fn ack(&self, ack: oneshot::Sender<()>) {
        self.publish();
        let _ = ack.send(());
    }

    fn begin(&mut self, kind: SessionType, id: SessionId) {
        if let Some(existing) = self.ledger.get(&id) {
            warn!(
                "Session {} is already tracked as {}; ignoring begin as {}",
                id, existing.kind, kind
            );
            return;
        }

        let first = !self.ledger.has_live(kind);
        let slot = &mut self.slots[kind];
        if first {
            slot.generation += 1;
            slot.target = SessionState::Running;
            info!(
                "Beginning {} billing generation {} for session {}",
                kind, slot.generation, id
            );
        } else if slot.target == SessionState::Paused {
            slot.target = SessionState::Running;
            debug!("Session {} reactivates paused {} billing", id, kind);
        } else {
            debug!("Session {} joins running {} billing", id, kind);
        }
        let generation = slot.generation;
        self.ledger.insert(id, kind, generation);
        self.reconcile(kind);
    }

    fn pause(&mut self, id: SessionId) {
        let Some((kind, changed)) = self.ledger.set_state(&id, SessionState::Paused) else {
            debug!("Pause of unknown session {} ignored", id);
            return;
        };
        if changed && self.ledger.all_paused(kind) {
            debug!("All {} sessions paused", kind);
            self.slots[kind].target = SessionState::Paused;
            self.reconcile(kind);
        }
    }

    fn resume(&mut self, id: SessionId) {
        let Some((kind, changed)) = self.ledger.set_state(&id, SessionState::Running) else {
            debug!("Resume of unknown session {} ignored", id);
            return;
        };
        let slot = &mut self.slots[kind];
        if changed && slot.target == SessionState::Paused {
            debug!("Session {} resumes {} billing", id, kind);
            slot.target = SessionState::Running;
            self.reconcile(kind);
        }
    }

    fn stop(&mut self, id: SessionId) {
        let Some(record) = self.ledger.remove(&id) else {
            debug!("Stop of unknown session {} ignored", id);
            return;
        };
        let kind = record.kind;
        if self.ledger.has_live(kind) {
            debug!("Session {} stopped; other {} sessions remain", id, kind);
            return;
        }
        info!("Last {} session {} stopped", kind, id);
        self.clear_slot(kind);
        self.reconcile(kind);
    }

    fn renew(&mut self, id: SessionId) {
        let Some(kind) = self.ledger.get(&id).map(|record| record.kind) else {
            debug!("Renew of unknown session {} ignored", id);
            return;
        };
        let slot = &self.slots[kind];
        let confirmed = slot.in_flight.is_none()
            && slot.target == SessionState::Running
            && slot.backend == Backend::Running(slot.generation);
        if !confirmed {
            debug!(
                "Renew of session {} ignored; {} billing is {:?}",
                id,
                kind,
                slot.state()
            );
            return;
        }
        info!("Renewing {} billing for session {}", kind, id);
        let generation = slot.generation;
        self.issue(kind, Op::Renew(generation));
    }

    fn clear_slot(&mut self, kind: SessionType) {
        let slot = &mut self.slots[kind];
        slot.target = SessionState::Stopped;
        slot.token = None;
    }

    /// Drop every record of a generation after its begin failed.
    fn roll_back(&mut self, kind: SessionType, generation: u64, err: &BillingError) {
        let removed = self
            .ledger
            .remove_matching(|r| r.kind == kind && r.generation == generation);
        if !removed.is_empty() {
            warn!(
                "{} billing generation {} failed ({}); stopped {} session(s)",
                kind,
                generation,
                err,
                removed.len()
            );
        }
        if !self.ledger.has_live(kind) {
            self.clear_slot(kind);
        }
    }

    fn complete(&mut self, outcome: Outcome) {
        let kind = match outcome {
            Outcome::Begun {
                kind,
                generation,
                result,
            } => {
                let slot = &mut self.slots[kind];
                slot.in_flight = None;
                match result {
                    Ok(token) => {
                        slot.backend = Backend::Running(generation);
                        if slot.generation == generation && slot.target.is_live() {
                            info!("{} billing generation {} running", kind, generation);
                            slot.token = Some(token);
                        } else {
                            info!(
                                "{} billing generation {} began after it was abandoned",
                                kind, generation
                            );
                        }
                    }
                    Err(err) => self.roll_back(kind, generation, &err),
                }
                kind
            }
            Outcome::Renewed {
                kind,
                generation,
                result,
            } => {
                self.slots[kind].in_flight = None;
                match result {
                    Ok(()) => info!("{} billing renewed", kind),
                    Err(err) => self.roll_back(kind, generation, &err),
                }
                kind
            }
            Outcome::Paused { kind, generation } => {
                let slot = &mut self.slots[kind];
                slot.in_flight = None;
                slot.backend = Backend::Paused(generation);
                info!("{} billing paused", kind);
                kind
            }
            Outcome::Resumed {
                kind,
                generation,
                result,
            } => {
                let slot = &mut self.slots[kind];
                slot.in_flight = None;
                match result {
                    Ok(()) => {
                        slot.backend = Backend::Running(generation);
                        info!("{} billing resumed", kind);
                    }
                    Err(err)
                        if slot.target == SessionState::Running
                            && slot.generation == generation =>
                    {
                        // The paused session cannot be resumed; begin anew.
                        warn!("{}; beginning a new {} session", err, kind);
                        slot.backend = Backend::Stopped;
                    }
                    Err(err) => {
                        // Still paused on the backend: reconcile stops or
                        // keeps it depending on the target.
                        warn!("{}; {} billing stays paused", err, kind);
                        slot.backend = Backend::Paused(generation);
                    }
                }
                kind
            }
            Outcome::Stopped { kind } => {
                let slot = &mut self.slots[kind];
                slot.in_flight = None;
                slot.backend = Backend::Stopped;
                info!("{} billing stopped", kind);
                kind
            }
        };
        self.reconcile(kind);
    }

    /// Issue the next backend call for a slot, if any, and start or stop
    /// its billing event trigger.
    fn reconcile(&mut self, kind: SessionType) {
        if let Some(op) = self.slots[kind].next_op() {
            self.issue(kind, op);
        }
        self.sync_ticker(kind);
    }

    fn issue(&mut self, kind: SessionType, op: Op) {
        let Some(tx) = self.tx.upgrade() else {
            warn!("Billing coordinator queue closed; skipping {:?} for {}", op, kind);
            return;
        };
        debug!("Issuing {:?} for {} billing", op, kind);
        self.slots[kind].in_flight = Some(op);
        self.sync_ticker(kind);

        let service = Arc::clone(&self.service);
        tokio::spawn(async move {
            let outcome = match op {
                Op::Begin(generation) => Outcome::Begun {
                    kind,
                    generation,
                    result: begin_backend(service.as_ref(), kind).await,
                },
                Op::Renew(generation) => {
                    if let Err(err) = service.trigger_billing_event().await {
                        warn!("{}", err);
                    }
                    Outcome::Renewed {
                        kind,
                        generation,
                        result: service.begin_session(kind).await,
                    }
                }
                Op::Pause(generation) => {
                    service.pause_session(kind).await;
                    Outcome::Paused { kind, generation }
                }
                Op::Resume(generation) => Outcome::Resumed {
                    kind,
                    generation,
                    result: service.resume_session(kind).await,
                },
                Op::Stop => {
                    service.stop_session(kind).await;
                    Outcome::Stopped { kind }
                }
            };
            let _ = tx.send(Command::Completed(outcome));
        });
    }

    fn sync_ticker(&mut self, kind: SessionType) {
        let period = self
            .config
            .event_interval
            .filter(|period| !period.is_zero());
        let slot = &mut self.slots[kind];
        match period {
            Some(period) if slot.wants_events() => {
                if slot.ticker.is_none() {
                    slot.ticker = Some(spawn_ticker(Arc::clone(&self.service), kind, period));
                }
            }
            _ => slot.stop_ticker(),
        }
    }

    async fn stop_all_inline(&mut self) {
        for kind in SessionType::ALL {
            let slot = &mut self.slots[kind];
            slot.stop_ticker();
            if slot.backend != Backend::Stopped {
                info!("Stopping {} billing on coordinator drop", kind);
                self.service.stop_session(kind).await;
                self.slots[kind].backend = Backend::Stopped;
            }
        }
    }
}

/// Validate credentials, fetch the service token and begin the backend
/// session.
async fn begin_backend(service: &dyn BillingService, kind: SessionType) -> Result<String> {
    if service.access_token().map_or(true, |token| token.is_empty()) {
        return Err(BillingError::MissingAccessToken);
    }
    let token = service.token_if_valid(kind).await?;
    service.begin_session(kind).await?;
    Ok(token)
}

fn spawn_ticker(
    service: Arc<dyn BillingService>,
    kind: SessionType,
    period: Duration,
) -> JoinHandle<()> {
    debug!("Starting {} billing events every {:?}", kind, period);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            match service.trigger_billing_event().await {
                Ok(()) => debug!("Billing event triggered for {} session", kind),
                Err(err) => warn!("Periodic {} billing event failed: {}", kind, err),
            }
        }
    })
}
