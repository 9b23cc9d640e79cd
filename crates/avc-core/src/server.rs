//! The consumed security-server interface.
//!
//! The cache memoises decisions it does not compute: every miss is
//! answered by an external security server, injected as a trait object so
//! tests can substitute a deterministic implementation. Compute calls may
//! block and are always made outside the cache's reader sections.

use crate::operation::OperationDecision;
use crate::operation::OperationNode;
use crate::types::{AvDecision, ObjectClass, SecurityId};

/// Result of a coarse policy computation.
///
/// `ops` carries the operation skeleton for the key: the mask of types
/// that have fine-grained rules and the rule-type count. The decisions
/// themselves are computed lazily via
/// [`SecurityServer::compute_operation`].
#[derive(Debug, Clone, Default)]
pub struct ComputedAv {
    /// The coarse decision.
    pub avd: AvDecision,
    /// Fine-grained constraint skeleton; `len == 0` when none exist.
    pub ops: OperationNode,
}

/// Static description of one object class: its name and the name of each
/// of its 32 permission bits (unnamed bits render in hex).
#[derive(Debug, Clone, Copy)]
pub struct ClassEntry {
    /// Class name, e.g. `"file"`.
    pub name: &'static str,
    /// Permission names by bit index.
    pub perms: [Option<&'static str>; 32],
}

/// The external authority that computes raw decisions.
///
/// Implementations must be thread-safe; the cache calls them from any
/// thread performing a permission check.
pub trait SecurityServer: Send + Sync {
    /// Computes a fresh coarse decision for `(ssid, tsid, tclass)`.
    fn compute_av(&self, ssid: SecurityId, tsid: SecurityId, tclass: ObjectClass) -> ComputedAv;

    /// Computes fine-grained decisions for one operation type.
    fn compute_operation(
        &self,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        ty: u8,
    ) -> OperationDecision;

    /// Renders a security identifier as a context string, for audit
    /// records only. `None` when the id cannot be resolved.
    fn sid_to_context(&self, sid: SecurityId) -> Option<String>;

    /// Whether denials are enforced (vs. audited only).
    fn enforcing(&self) -> bool;

    /// Looks up the class map entry for `tclass`.
    fn class_map(&self, tclass: ObjectClass) -> Option<ClassEntry>;
}
