//! Session types and the fixed per-type slot mapping.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Kind of billable navigation session.
///
/// Each kind is metered by its own backend session; the two never share
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// Map display without a route.
    FreeDrive,
    /// Turn-by-turn guidance along a route.
    ActiveGuidance,
}

impl SessionType {
    /// Both session types, in slot order.
    pub const ALL: [SessionType; 2] = [SessionType::FreeDrive, SessionType::ActiveGuidance];

    /// Stable identifier used in logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::FreeDrive => "free_drive",
            SessionType::ActiveGuidance => "active_guidance",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::FreeDrive => f.write_str("free drive"),
            SessionType::ActiveGuidance => f.write_str("active guidance"),
        }
    }
}

/// A value for each [`SessionType`].
///
/// The coordinator has exactly two billable slots for its whole lifetime,
/// so they are stored side by side rather than in a map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerType<T> {
    pub free_drive: T,
    pub active_guidance: T,
}

impl<T> PerType<T> {
    /// Build both entries from a constructor.
    pub fn from_fn(mut f: impl FnMut(SessionType) -> T) -> Self {
        Self {
            free_drive: f(SessionType::FreeDrive),
            active_guidance: f(SessionType::ActiveGuidance),
        }
    }

    /// Iterate over `(kind, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SessionType, &T)> {
        [
            (SessionType::FreeDrive, &self.free_drive),
            (SessionType::ActiveGuidance, &self.active_guidance),
        ]
        .into_iter()
    }

    /// Map both entries to a new `PerType`.
    pub fn map<U>(&self, mut f: impl FnMut(SessionType, &T) -> U) -> PerType<U> {
        PerType {
            free_drive: f(SessionType::FreeDrive, &self.free_drive),
            active_guidance: f(SessionType::ActiveGuidance, &self.active_guidance),
        }
    }
}

impl<T> Index<SessionType> for PerType<T> {
    type Output = T;

    fn index(&self, kind: SessionType) -> &T {
        match kind {
            SessionType::FreeDrive => &self.free_drive,
            SessionType::ActiveGuidance => &self.active_guidance,
        }
    }
}

impl<T> IndexMut<SessionType> for PerType<T> {
    fn index_mut(&mut self, kind: SessionType) -> &mut T {
        match kind {
            SessionType::FreeDrive => &mut self.free_drive,
            SessionType::ActiveGuidance => &mut self.active_guidance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&SessionType::ActiveGuidance).unwrap();
        assert_eq!(json, "\"active_guidance\"");

        let kind: SessionType = serde_json::from_str("\"free_drive\"").unwrap();
        assert_eq!(kind, SessionType::FreeDrive);
        assert_eq!(kind.as_str(), "free_drive");
    }

    #[test]
    fn test_per_type_index() {
        let mut slots = PerType::from_fn(|kind| kind.as_str().len());
        assert_eq!(slots[SessionType::FreeDrive], 10);
        assert_eq!(slots[SessionType::ActiveGuidance], 15);

        slots[SessionType::FreeDrive] = 1;
        assert_eq!(slots.free_drive, 1);
        assert_eq!(slots.active_guidance, 15);
    }

    #[test]
    fn test_per_type_iter_order() {
        let slots = PerType::from_fn(|kind| kind);
        let kinds: Vec<_> = slots.iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, SessionType::ALL.to_vec());

        let mapped = slots.map(|kind, value| kind == *value);
        assert!(mapped.free_drive && mapped.active_guidance);
    }
}
