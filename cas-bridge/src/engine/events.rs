//! Event masks and the server's event vocabulary

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use parking_lot::RwLock;

/// Set of event categories, as bits allocated by an [`EventVocabulary`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CasEventMask(u32);

impl CasEventMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersects(self, other: CasEventMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(self, other: CasEventMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CasEventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CasEventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CasEventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Event names registered by every engine.
pub const VALUE_EVENT: &str = "value";
pub const LOG_EVENT: &str = "log";
pub const ALARM_EVENT: &str = "alarm";
pub const PROPERTY_EVENT: &str = "property";

/// Named event categories known to a server, each owning one mask bit.
#[derive(Debug, Default)]
pub struct EventVocabulary {
    masks: RwLock<HashMap<String, CasEventMask>>,
}

impl EventVocabulary {
    /// A vocabulary with the standard value, log, alarm and property events.
    pub fn new() -> Self {
        let vocabulary = Self::default();
        for name in [VALUE_EVENT, LOG_EVENT, ALARM_EVENT, PROPERTY_EVENT] {
            vocabulary.register(name);
        }
        vocabulary
    }

    /// Register `name`, returning its mask. Registering twice returns the
    /// existing mask; once all 32 bits are taken the empty mask is returned.
    pub fn register(&self, name: &str) -> CasEventMask {
        let mut masks = self.masks.write();
        if let Some(mask) = masks.get(name) {
            return *mask;
        }
        let used = masks.len();
        if used >= 32 {
            return CasEventMask::empty();
        }
        let mask = CasEventMask(1 << used);
        masks.insert(name.to_owned(), mask);
        mask
    }

    pub fn mask(&self, name: &str) -> Option<CasEventMask> {
        self.masks.read().get(name).copied()
    }

    pub fn value_event_mask(&self) -> CasEventMask {
        self.mask(VALUE_EVENT).unwrap_or_default()
    }

    pub fn log_event_mask(&self) -> CasEventMask {
        self.mask(LOG_EVENT).unwrap_or_default()
    }

    pub fn alarm_event_mask(&self) -> CasEventMask {
        self.mask(ALARM_EVENT).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_vocabulary() {
        let vocabulary = EventVocabulary::new();
        let value = vocabulary.value_event_mask();
        let alarm = vocabulary.alarm_event_mask();
        assert!(!value.is_empty());
        assert!(!value.intersects(alarm));
        assert!((value | alarm).contains(alarm));
        assert!(vocabulary.mask(PROPERTY_EVENT).is_some());
        assert!(vocabulary.mask("unknown").is_none());
    }

    #[test]
    fn test_register_is_idempotent() {
        let vocabulary = EventVocabulary::new();
        let first = vocabulary.register("custom");
        assert_eq!(vocabulary.register("custom"), first);
        assert_eq!(first.bits(), 1 << 4);
    }
}
