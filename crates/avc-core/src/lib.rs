//! # avc-core
//!
//! An in-process, read-mostly **access vector cache**: a bounded,
//! hash-bucketed, concurrent memo of authorisation decisions produced by
//! an expensive external security server.
//!
//! Each cached decision answers "given a source subject `ssid`, a target
//! object `tsid`, and an object class `tclass`, which permissions are
//! allowed, which are audited on allow, which on deny, and which
//! fine-grained per-operation decisions apply?"
//!
//! ## Properties
//!
//! - **Lock-free lookup**: readers traverse bucket chains inside epoch
//!   reader sections and never take a lock.
//! - **Fine-grained writes**: each of the 512 buckets has its own writer
//!   lock, held only across linked-list surgery.
//! - **Safe reclamation**: linked nodes are immutable; updates clone,
//!   modify, and replace, and unlinked nodes are freed only after every
//!   concurrent reader section has ended.
//! - **Bounded size**: an approximate-LRU evictor driven by a rotating
//!   bucket hint reclaims in batches once a threshold is crossed.
//! - **Reload safety**: policy resets flush the cache and gate stale
//!   re-insertions by policy sequence number.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use avc_core::{AccessVector, Avc, AuditContext, ObjectClass, SecurityId};
//!
//! let avc = Avc::with_defaults(Arc::new(my_security_server));
//! let rc = avc.has_perm(
//!     SecurityId::new(1),
//!     SecurityId::new(2),
//!     ObjectClass::new(3),
//!     AccessVector::from_bit(1),
//!     &AuditContext::Path("/etc/passwd".into()),
//! );
//! ```
//!
//! Cache-management failures are never fatal to a permission check: the
//! security server always yields an answer, and the cache is only an
//! accelerator in front of it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
mod avc;
mod cache;
pub mod callback;
pub mod error;
pub mod operation;
pub mod server;
mod stats;
pub mod types;

pub use audit::{AuditContext, AuditRecord, AuditSink, TracingAuditSink};
pub use avc::{Avc, AvcConfig, UpdateEvent};
pub use cache::DEFAULT_CACHE_THRESHOLD;
pub use callback::{AvcCallback, CallbackRegistration, EventMask};
pub use error::{AvcError, AvcResult};
pub use operation::{
    OperationCommand, OperationDecision, OperationNode, OperationPermSet, Specified,
};
pub use server::{ClassEntry, ComputedAv, SecurityServer};
pub use stats::CacheStatsSnapshot;
pub use types::{
    AccessVector, AvDecision, CheckFlags, DecisionFlags, ObjectClass, SecurityId,
};
