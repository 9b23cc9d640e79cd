//! Invalidation callback registration.
//!
//! External subsystems register callbacks at init time to be told when
//! cached decisions become stale. Registration is one-shot: the list is
//! append-only and callbacks are never unregistered. Filters narrow which
//! events a callback sees; the wildcard identifier matches any id.

use bitflags::bitflags;

use crate::types::{AccessVector, ObjectClass, SecurityId};

bitflags! {
    /// Events a callback can subscribe to, and the event argument it
    /// receives when invoked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        /// Permissions were granted to an entry.
        const GRANT = 1;
        /// A revocation is being attempted.
        const TRY_REVOKE = 1 << 1;
        /// Permissions were revoked from an entry.
        const REVOKE = 1 << 2;
        /// The policy was reloaded and the cache flushed.
        const RESET = 1 << 3;
        /// Audit-on-allow bits were enabled.
        const AUDITALLOW_ENABLE = 1 << 4;
        /// Audit-on-allow bits were disabled.
        const AUDITALLOW_DISABLE = 1 << 5;
        /// Audit-on-deny bits were enabled.
        const AUDITDENY_ENABLE = 1 << 6;
        /// Audit-on-deny bits were disabled.
        const AUDITDENY_DISABLE = 1 << 7;
        /// A fine-grained operation decision was attached.
        const ADD_OPERATION = 1 << 8;
    }
}

/// An invalidation callback. Receives the event that fired and reports
/// failure as a non-zero machine code; the first failing code returned
/// during a reset is wrapped into [`crate::AvcError::Callback`] and
/// reported to the reset's invoker.
pub type AvcCallback = Box<dyn Fn(EventMask) -> Result<(), i32> + Send + Sync>;

/// One registered callback with its event subscription and filters.
pub struct CallbackRegistration {
    /// The callback to invoke.
    pub callback: AvcCallback,
    /// Events this callback subscribes to.
    pub events: EventMask,
    /// Source filter; [`SecurityId::WILD`] matches any.
    pub ssid: SecurityId,
    /// Target filter; [`SecurityId::WILD`] matches any.
    pub tsid: SecurityId,
    /// Class filter, consulted by class-scoped events.
    pub tclass: ObjectClass,
    /// Permission filter, consulted by permission-scoped events.
    pub perms: AccessVector,
}

impl CallbackRegistration {
    /// Filter predicate: true when the registration subscribes to
    /// `event` and both identifier filters match (wildcard-tolerant).
    #[must_use]
    pub fn matches(&self, event: EventMask, ssid: SecurityId, tsid: SecurityId) -> bool {
        self.events.intersects(event) && self.ssid.matches(ssid) && self.tsid.matches(tsid)
    }
}

impl std::fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("events", &self.events)
            .field("ssid", &self.ssid)
            .field("tsid", &self.tsid)
            .field("tclass", &self.tclass)
            .field("perms", &self.perms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(events: EventMask, ssid: SecurityId, tsid: SecurityId) -> CallbackRegistration {
        CallbackRegistration {
            callback: Box::new(|_| Ok(())),
            events,
            ssid,
            tsid,
            tclass: ObjectClass::new(0),
            perms: AccessVector::EMPTY,
        }
    }

    #[test]
    fn event_subscription_gates_matching() {
        let reg = registration(EventMask::RESET, SecurityId::WILD, SecurityId::WILD);
        assert!(reg.matches(EventMask::RESET, SecurityId::WILD, SecurityId::WILD));
        assert!(!reg.matches(EventMask::GRANT, SecurityId::WILD, SecurityId::WILD));
    }

    #[test]
    fn sid_filters_are_wildcard_tolerant() {
        let reg = registration(
            EventMask::RESET | EventMask::REVOKE,
            SecurityId::new(7),
            SecurityId::WILD,
        );
        assert!(reg.matches(EventMask::REVOKE, SecurityId::new(7), SecurityId::new(1)));
        assert!(!reg.matches(EventMask::REVOKE, SecurityId::new(8), SecurityId::new(1)));
        // Wild scope (as used by reset) matches any filter.
        assert!(reg.matches(EventMask::RESET, SecurityId::WILD, SecurityId::WILD));
    }
}
