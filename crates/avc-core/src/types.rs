//! Identifiers and coarse access decisions.
//!
//! A decision is keyed by `(ssid, tsid, tclass)`: the source subject, the
//! target object, and the target's object class. The coarse result is an
//! [`AvDecision`] — four 32-bit permission bitmaps plus the policy
//! sequence number that produced them.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use bitflags::bitflags;

/// Opaque 32-bit security identifier for a subject or object.
///
/// Identifiers are issued by the security server; the cache never
/// interprets them beyond equality. [`SecurityId::WILD`] is reserved for
/// callback filters and matches any identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecurityId(u32);

impl SecurityId {
    /// Wildcard identifier: matches any id in callback filters.
    pub const WILD: Self = Self(u32::MAX);

    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns true if this is the reserved wildcard.
    #[must_use]
    pub const fn is_wild(self) -> bool {
        self.0 == Self::WILD.0
    }

    /// Wildcard-tolerant comparison used by callback filters: equal ids
    /// match, and the wildcard matches everything on either side.
    #[must_use]
    pub const fn matches(self, other: Self) -> bool {
        self.0 == other.0 || self.is_wild() || other.is_wild()
    }
}

impl fmt::Display for SecurityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 16-bit object-class tag indexing the security server's class map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectClass(u16);

impl ObjectClass {
    /// Wraps a raw class tag.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw class tag.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 32-bit permission bitmap, one bit per permission of an object class.
///
/// Which bit means which permission is defined by the security server's
/// class map; the cache only performs set algebra on the vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessVector(u32);

impl AccessVector {
    /// The empty vector.
    pub const EMPTY: Self = Self(0);

    /// Wraps a raw bitmap.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// A vector with only bit `bit` set.
    ///
    /// # Panics
    ///
    /// Panics if `bit >= 32`.
    #[must_use]
    pub const fn from_bit(bit: u32) -> Self {
        assert!(bit < 32, "access vectors carry 32 permission bits");
        Self(1 << bit)
    }

    /// Returns the raw bitmap.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns true if no permission bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if `self` and `other` share at least one bit.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for AccessVector {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessVector {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AccessVector {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for AccessVector {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for AccessVector {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for AccessVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

bitflags! {
    /// Flags carried inside an [`AvDecision`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DecisionFlags: u32 {
        /// The source domain is permissive: denials are logged but not
        /// enforced, and the cache self-patches the entry on a grant.
        const PERMISSIVE = 1;
    }
}

bitflags! {
    /// Caller flags recognised by the permission-check entry points.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CheckFlags: u32 {
        /// On deny, fail immediately; never self-patch via GRANT even in
        /// permissive mode.
        const STRICT = 1;
        /// A GRANT update may also adjust per-operation allow bits for
        /// the command that triggered it.
        const OPERATION_CMD = 1 << 1;
        /// The caller cannot block: audit emission that would need
        /// blocking rendering returns `TryAgainNonblocking` instead.
        const NONBLOCKING = 1 << 2;
    }
}

/// The coarse per-`(ssid, tsid, tclass)` decision.
///
/// `seqno` tags the policy version that produced the decision; entries
/// carrying a seqno older than the latest observed reset are refused at
/// insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvDecision {
    /// Permissions the policy allows.
    pub allowed: AccessVector,
    /// Permissions audited when granted.
    pub auditallow: AccessVector,
    /// Permissions audited when denied.
    pub auditdeny: AccessVector,
    /// Decision flags (e.g. [`DecisionFlags::PERMISSIVE`]).
    pub flags: DecisionFlags,
    /// Policy version that produced this decision.
    pub seqno: u32,
}

impl AvDecision {
    /// Returns true if the permissive-decision flag is set.
    #[must_use]
    pub const fn is_permissive(&self) -> bool {
        self.flags.contains(DecisionFlags::PERMISSIVE)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn wildcard_matches_any_sid() {
        let a = SecurityId::new(7);
        let b = SecurityId::new(9);
        assert!(!a.matches(b));
        assert!(a.matches(a));
        assert!(SecurityId::WILD.matches(a));
        assert!(a.matches(SecurityId::WILD));
        assert!(SecurityId::WILD.matches(SecurityId::WILD));
    }

    #[test]
    fn vector_algebra() {
        let a = AccessVector::new(0b1010);
        let b = AccessVector::new(0b0010);
        assert!(a.contains(b));
        assert!(!b.contains(a));
        assert!(a.intersects(b));
        assert_eq!((a & !b).raw(), 0b1000);
        assert_eq!((a | b).raw(), 0b1010);
        assert!(AccessVector::EMPTY.is_empty());
        assert_eq!(AccessVector::from_bit(3).raw(), 0b1000);
    }

    #[test]
    fn permissive_flag_round_trips() {
        let mut avd = AvDecision::default();
        assert!(!avd.is_permissive());
        avd.flags |= DecisionFlags::PERMISSIVE;
        assert!(avd.is_permissive());
    }

    proptest! {
        #[test]
        fn union_contains_both_operands(a in any::<u32>(), b in any::<u32>()) {
            let (a, b) = (AccessVector::new(a), AccessVector::new(b));
            prop_assert!((a | b).contains(a));
            prop_assert!((a | b).contains(b));
        }

        #[test]
        fn difference_never_intersects_subtrahend(a in any::<u32>(), b in any::<u32>()) {
            let (a, b) = (AccessVector::new(a), AccessVector::new(b));
            prop_assert!(!(a & !b).intersects(b));
        }
    }
}
