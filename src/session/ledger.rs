//! Bookkeeping of logical sessions.

use std::collections::HashMap;

use super::{SessionId, SessionState, SessionType};

/// A tracked logical session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Slot the session is metered under. Never changes.
    pub kind: SessionType,
    /// `Running` or `Paused`; removed records are not kept.
    pub state: SessionState,
    /// Slot generation the session joined.
    pub generation: u64,
}

/// Owned identifier -> record mapping.
///
/// The ledger is not synchronized; it belongs to the coordinator task and
/// is only shared as an immutable clone inside a
/// [`Snapshot`](crate::coordinator::Snapshot).
#[derive(Debug, Clone, Default)]
pub struct SessionLedger {
    records: HashMap<SessionId, SessionRecord>,
}

impl SessionLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new running session.
    ///
    /// Returns `false` and leaves the ledger untouched if the id is already
    /// tracked, whatever its type.
    pub fn insert(&mut self, id: SessionId, kind: SessionType, generation: u64) -> bool {
        if self.records.contains_key(&id) {
            return false;
        }
        self.records.insert(
            id,
            SessionRecord {
                kind,
                state: SessionState::Running,
                generation,
            },
        );
        true
    }

    /// Get the record for an id.
    pub fn get(&self, id: &SessionId) -> Option<&SessionRecord> {
        self.records.get(id)
    }

    /// State of an id; `Stopped` when it is not tracked.
    pub fn state(&self, id: &SessionId) -> SessionState {
        self.records
            .get(id)
            .map(|record| record.state)
            .unwrap_or_default()
    }

    /// Move a tracked record to `Running` or `Paused`.
    ///
    /// Returns the record's type and whether the state changed, or `None`
    /// for unknown ids.
    pub fn set_state(&mut self, id: &SessionId, target: SessionState) -> Option<(SessionType, bool)> {
        let record = self.records.get_mut(id)?;
        if target.is_live() && record.state.can_transition_to(target) {
            record.state = target;
            Some((record.kind, true))
        } else {
            Some((record.kind, false))
        }
    }

    /// Stop tracking an id.
    pub fn remove(&mut self, id: &SessionId) -> Option<SessionRecord> {
        self.records.remove(id)
    }

    /// Remove all records matching a predicate.
    ///
    /// Returns the removed ids.
    pub fn remove_matching<F>(&mut self, predicate: F) -> Vec<SessionId>
    where
        F: Fn(&SessionRecord) -> bool,
    {
        let removed: Vec<SessionId> = self
            .records
            .iter()
            .filter(|(_, record)| predicate(record))
            .map(|(id, _)| *id)
            .collect();
        for id in &removed {
            self.records.remove(id);
        }
        removed
    }

    /// Check if the id is tracked.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.records.contains_key(id)
    }

    /// Number of tracked sessions of a type.
    pub fn count(&self, kind: SessionType) -> usize {
        self.records.values().filter(|r| r.kind == kind).count()
    }

    /// Number of tracked sessions across both types.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no session is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check if at least one session of a type is tracked.
    pub fn has_live(&self, kind: SessionType) -> bool {
        self.records.values().any(|r| r.kind == kind)
    }

    /// Check if sessions of a type exist and every one of them is paused.
    pub fn all_paused(&self, kind: SessionType) -> bool {
        let mut of_kind = self.records.values().filter(|r| r.kind == kind).peekable();
        of_kind.peek().is_some() && of_kind.all(|r| r.state == SessionState::Paused)
    }

    /// Ids tracked under a type.
    pub fn ids(&self, kind: SessionType) -> Vec<SessionId> {
        self.records
            .iter()
            .filter(|(_, r)| r.kind == kind)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_state() {
        let mut ledger = SessionLedger::new();
        let id = SessionId::new();

        assert!(ledger.insert(id, SessionType::FreeDrive, 1));
        assert_eq!(ledger.state(&id), SessionState::Running);
        assert_eq!(ledger.count(SessionType::FreeDrive), 1);
        assert_eq!(ledger.count(SessionType::ActiveGuidance), 0);
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let mut ledger = SessionLedger::new();
        let id = SessionId::new();

        assert!(ledger.insert(id, SessionType::FreeDrive, 1));
        assert!(!ledger.insert(id, SessionType::ActiveGuidance, 1));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(&id).unwrap().kind, SessionType::FreeDrive);
    }

    #[test]
    fn test_unknown_is_stopped() {
        let ledger = SessionLedger::new();
        assert_eq!(ledger.state(&SessionId::new()), SessionState::Stopped);
    }

    #[test]
    fn test_set_state() {
        let mut ledger = SessionLedger::new();
        let id = SessionId::new();
        ledger.insert(id, SessionType::ActiveGuidance, 1);

        assert_eq!(
            ledger.set_state(&id, SessionState::Paused),
            Some((SessionType::ActiveGuidance, true))
        );
        assert_eq!(
            ledger.set_state(&id, SessionState::Paused),
            Some((SessionType::ActiveGuidance, false))
        );
        assert_eq!(
            ledger.set_state(&id, SessionState::Stopped),
            Some((SessionType::ActiveGuidance, false))
        );
        assert_eq!(ledger.state(&id), SessionState::Paused);
        assert_eq!(ledger.set_state(&SessionId::new(), SessionState::Running), None);
    }

    #[test]
    fn test_all_paused() {
        let mut ledger = SessionLedger::new();
        let a = SessionId::new();
        let b = SessionId::new();
        assert!(!ledger.all_paused(SessionType::FreeDrive));

        ledger.insert(a, SessionType::FreeDrive, 1);
        ledger.insert(b, SessionType::FreeDrive, 1);
        ledger.set_state(&a, SessionState::Paused);
        assert!(!ledger.all_paused(SessionType::FreeDrive));

        ledger.set_state(&b, SessionState::Paused);
        assert!(ledger.all_paused(SessionType::FreeDrive));
        assert!(!ledger.all_paused(SessionType::ActiveGuidance));
    }

    #[test]
    fn test_remove_matching_generation() {
        let mut ledger = SessionLedger::new();
        let old = SessionId::new();
        let new = SessionId::new();
        let other = SessionId::new();
        ledger.insert(old, SessionType::FreeDrive, 1);
        ledger.insert(new, SessionType::FreeDrive, 2);
        ledger.insert(other, SessionType::ActiveGuidance, 1);

        let removed =
            ledger.remove_matching(|r| r.kind == SessionType::FreeDrive && r.generation == 1);
        assert_eq!(removed, vec![old]);
        assert!(ledger.contains(&new));
        assert!(ledger.contains(&other));
    }

    #[test]
    fn test_remove() {
        let mut ledger = SessionLedger::new();
        let id = SessionId::new();
        ledger.insert(id, SessionType::FreeDrive, 1);

        let removed = ledger.remove(&id).unwrap();
        assert_eq!(removed.kind, SessionType::FreeDrive);
        assert!(ledger.is_empty());
        assert!(!ledger.has_live(SessionType::FreeDrive));
        assert!(ledger.remove(&id).is_none());
    }

    #[test]
    fn test_ids_by_kind() {
        let mut ledger = SessionLedger::new();
        let a = SessionId::new();
        let b = SessionId::new();
        ledger.insert(a, SessionType::FreeDrive, 1);
        ledger.insert(b, SessionType::ActiveGuidance, 1);

        assert_eq!(ledger.ids(SessionType::FreeDrive), vec![a]);
        assert_eq!(ledger.ids(SessionType::ActiveGuidance), vec![b]);
    }
}
