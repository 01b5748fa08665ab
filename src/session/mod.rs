//! Session management module.
//!
//! This module provides the types used to track logical billing sessions:
//! identifiers, session types, state machines and the owned ledger.

mod id;
mod kind;
mod ledger;
mod state;

pub use id::SessionId;
pub use kind::{PerType, SessionType};
pub use ledger::{SessionLedger, SessionRecord};
pub use state::{SessionState, SlotState};
