//! The access vector cache handle and the permission-check protocol.
//!
//! [`Avc`] owns the cache, the callback registry, and the latest observed
//! policy sequence number, and borrows two collaborators: the security
//! server that computes raw decisions and the audit sink that receives
//! rendered records. The lifecycle is `init → serve → disable`; the
//! handle is `Send + Sync` and is shared by `Arc`.
//!
//! Every check follows the same skeleton: probe the cache inside a
//! reader section; on miss, leave the section, ask the server, re-enter
//! and install; derive the denied bits; on deny consult enforcement
//! state (self-patching the entry for permissive decisions); emit audit.
//!
//! Cache maintenance is best-effort throughout: a refused insert or a
//! lost update never changes the answer the caller receives.

use std::sync::Arc;

use crossbeam_epoch as epoch;
use parking_lot::RwLock;
use tracing::debug;

use crate::audit::{self, AuditContext, AuditSink};
use crate::cache::{AvcCache, DEFAULT_CACHE_THRESHOLD};
use crate::callback::{AvcCallback, CallbackRegistration, EventMask};
use crate::error::{AvcError, AvcResult};
use crate::operation::{
    OperationCommand, OperationDecision, OperationNode, OperationWindow, Specified,
};
use crate::server::SecurityServer;
use crate::stats::{self, CacheStatsSnapshot};
use crate::types::{AccessVector, AvDecision, CheckFlags, ObjectClass, SecurityId};

/// Tunables for one cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvcConfig {
    /// Node-count threshold above which the evictor runs.
    pub cache_threshold: usize,
}

impl Default for AvcConfig {
    fn default() -> Self {
        Self {
            cache_threshold: DEFAULT_CACHE_THRESHOLD,
        }
    }
}

/// An advisory mutation applied to a cached entry.
///
/// Updates are accelerators, not the store of truth: they patch the
/// cached copy of a decision the security server already made. An update
/// that targets an entry replaced or flushed in the meantime is
/// discarded ([`AvcError::NotFound`]); concurrent updates to the same
/// key resolve last-writer-wins.
#[derive(Debug, Clone)]
pub enum UpdateEvent<'a> {
    /// Widen `allowed`; with a command, also patch the per-operation
    /// allow bit for it.
    Grant {
        /// Permissions to add.
        perms: AccessVector,
        /// Command whose operation allow bit should also be set.
        cmd: Option<OperationCommand>,
    },
    /// Narrow `allowed`.
    Revoke {
        /// Permissions to remove.
        perms: AccessVector,
    },
    /// Narrow `allowed` (revocation that tolerates partial failure at
    /// the caller; the cache patch is identical to [`UpdateEvent::Revoke`]).
    TryRevoke {
        /// Permissions to remove.
        perms: AccessVector,
    },
    /// Enable audit-on-allow for the given permissions.
    AuditAllowEnable {
        /// Permissions to audit when granted.
        perms: AccessVector,
    },
    /// Disable audit-on-allow for the given permissions.
    AuditAllowDisable {
        /// Permissions to stop auditing when granted.
        perms: AccessVector,
    },
    /// Enable audit-on-deny for the given permissions.
    AuditDenyEnable {
        /// Permissions to audit when denied.
        perms: AccessVector,
    },
    /// Disable audit-on-deny for the given permissions.
    AuditDenyDisable {
        /// Permissions to stop auditing when denied.
        perms: AccessVector,
    },
    /// Attach a freshly computed operation decision to the entry.
    AddOperation {
        /// The decision to deep-copy into the entry.
        decision: &'a OperationDecision,
    },
}

/// Outcome of the fine-grained probe of one entry, carrying only owned
/// data so the reader section can be exited for compute calls.
enum OpsProbe {
    /// The entry has no fine-grained constraints.
    Skip,
    /// A decision for the command's type was attached; its window was
    /// copied out.
    Window(OperationWindow),
    /// The type has never been computed: deny without computing.
    Uncomputed,
    /// The type carries rules but no decision is attached yet.
    Compute,
}

/// The access vector cache.
pub struct Avc {
    cache: AvcCache,
    callbacks: RwLock<Vec<CallbackRegistration>>,
    server: Arc<dyn SecurityServer>,
    sink: Arc<dyn AuditSink>,
}

impl Avc {
    /// Creates a cache serving decisions from `server` and emitting
    /// audit records to `sink`.
    #[must_use]
    pub fn new(config: AvcConfig, server: Arc<dyn SecurityServer>, sink: Arc<dyn AuditSink>) -> Self {
        debug!(
            target: "avc",
            cache_threshold = config.cache_threshold,
            "access vector cache initialized"
        );
        Self {
            cache: AvcCache::new(config.cache_threshold),
            callbacks: RwLock::new(Vec::new()),
            server,
            sink,
        }
    }

    /// Creates a cache with the default configuration and the
    /// `tracing`-backed audit sink.
    #[must_use]
    pub fn with_defaults(server: Arc<dyn SecurityServer>) -> Self {
        Self::new(
            AvcConfig::default(),
            server,
            Arc::new(audit::TracingAuditSink),
        )
    }

    /// Checks `requested` against the decision for `(ssid, tsid,
    /// tclass)` without emitting audit. Returns the check result and the
    /// decision it was based on (cached or freshly computed).
    ///
    /// On deny: [`CheckFlags::STRICT`] fails immediately; otherwise an
    /// enforcing server denies unless the decision is permissive, in
    /// which case the cached entry is self-patched with a grant and the
    /// check succeeds.
    pub fn has_perm_noaudit(
        &self,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        requested: AccessVector,
        flags: CheckFlags,
    ) -> (AvcResult<()>, AvDecision) {
        debug_assert!(!requested.is_empty(), "empty permission request");
        let mut guard = epoch::pin();

        let hit = self
            .cache
            .lookup(&guard, ssid, tsid, tclass)
            .map(|node| node.avd);
        let avd = match hit {
            Some(avd) => avd,
            None => {
                drop(guard);
                let computed = self.server.compute_av(ssid, tsid, tclass);
                guard = epoch::pin();
                let _ = self
                    .cache
                    .insert(&guard, ssid, tsid, tclass, &computed.avd, &computed.ops);
                computed.avd
            }
        };

        let denied = requested & !avd.allowed;
        let rc = if denied.is_empty() {
            Ok(())
        } else {
            self.denied(ssid, tsid, tclass, requested, None, flags, &avd)
        };
        drop(guard);
        (rc, avd)
    }

    /// Checks `requested` and emits audit. Equivalent to
    /// [`Avc::has_perm_flags`] with empty flags.
    ///
    /// # Errors
    ///
    /// [`AvcError::PermissionDenied`] when denied and enforcing.
    pub fn has_perm(
        &self,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        requested: AccessVector,
        auditdata: &AuditContext,
    ) -> AvcResult<()> {
        self.has_perm_flags(ssid, tsid, tclass, requested, auditdata, CheckFlags::empty())
    }

    /// Checks `requested`, emits audit, and honours `flags` in the audit
    /// step ([`CheckFlags::NONBLOCKING`] refuses blocking rendering).
    ///
    /// # Errors
    ///
    /// [`AvcError::PermissionDenied`] when denied and enforcing;
    /// [`AvcError::TryAgainNonblocking`] when audit was required but the
    /// caller cannot block.
    pub fn has_perm_flags(
        &self,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        requested: AccessVector,
        auditdata: &AuditContext,
        flags: CheckFlags,
    ) -> AvcResult<()> {
        let (rc, avd) = self.has_perm_noaudit(ssid, tsid, tclass, requested, CheckFlags::empty());
        self.audit(
            ssid, tsid, tclass, requested, &avd, rc.is_err(), None, None, auditdata, flags,
        )?;
        rc
    }

    /// Checks `requested` refined by the fine-grained decision for
    /// `cmd`, and emits audit.
    ///
    /// The per-type decision is computed lazily: the first call for a
    /// type with rules computes and attaches it; later calls for the
    /// same type copy a single 32-bit window. A type with no computed
    /// decision and no rules bit denies without consulting the server.
    ///
    /// # Errors
    ///
    /// [`AvcError::PermissionDenied`] when denied and enforcing;
    /// [`AvcError::TryAgainNonblocking`] from the audit step.
    pub fn has_operation(
        &self,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        requested: AccessVector,
        cmd: OperationCommand,
        auditdata: &AuditContext,
    ) -> AvcResult<()> {
        debug_assert!(!requested.is_empty(), "empty permission request");
        let ty = cmd.ty();
        let mut guard = epoch::pin();

        let hit = self
            .cache
            .lookup(&guard, ssid, tsid, tclass)
            .map(|node| (node.avd, Self::probe_ops(node.ops.as_deref(), ty, cmd)));
        let (mut avd, probe) = match hit {
            Some(found) => found,
            None => {
                drop(guard);
                let computed = self.server.compute_av(ssid, tsid, tclass);
                guard = epoch::pin();
                let _ = self
                    .cache
                    .insert(&guard, ssid, tsid, tclass, &computed.avd, &computed.ops);
                let probe = Self::probe_ops(Some(&computed.ops), ty, cmd);
                (computed.avd, probe)
            }
        };

        let window = match probe {
            OpsProbe::Skip => None,
            OpsProbe::Window(window) => Some(window),
            OpsProbe::Uncomputed => {
                avd.allowed &= !requested;
                None
            }
            OpsProbe::Compute => {
                drop(guard);
                let od = self.server.compute_operation(ssid, tsid, tclass, ty);
                guard = epoch::pin();
                let _ = self.update_node(
                    ssid,
                    tsid,
                    tclass,
                    avd.seqno,
                    UpdateEvent::AddOperation { decision: &od },
                );
                Some(OperationWindow::from_decision(&od, cmd))
            }
        };

        if let Some(window) = &window {
            if !window.permits(Specified::ALLOWED, cmd.number()) {
                avd.allowed &= !requested;
            }
        }

        let denied = requested & !avd.allowed;
        let rc = if denied.is_empty() {
            Ok(())
        } else {
            self.denied(
                ssid,
                tsid,
                tclass,
                requested,
                Some(cmd),
                CheckFlags::OPERATION_CMD,
                &avd,
            )
        };
        drop(guard);

        self.audit(
            ssid,
            tsid,
            tclass,
            requested,
            &avd,
            rc.is_err(),
            window.as_ref(),
            Some(cmd),
            auditdata,
            CheckFlags::empty(),
        )?;
        rc
    }

    /// Applies an advisory mutation to the entry matching the key and
    /// `seqno`, via clone-modify-replace.
    ///
    /// # Errors
    ///
    /// [`AvcError::NotFound`] when no such entry is linked (it was
    /// replaced, evicted, or flushed); the update is discarded.
    pub fn update_node(
        &self,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        seqno: u32,
        event: UpdateEvent<'_>,
    ) -> AvcResult<()> {
        let guard = epoch::pin();
        self.cache
            .update(&guard, ssid, tsid, tclass, seqno, |node| match event {
                UpdateEvent::Grant { perms, cmd } => {
                    node.avd.allowed |= perms;
                    if let Some(cmd) = cmd {
                        if let Some(ops) = node.ops.as_deref_mut() {
                            ops.allow_perm(cmd);
                        }
                    }
                }
                UpdateEvent::Revoke { perms } | UpdateEvent::TryRevoke { perms } => {
                    node.avd.allowed &= !perms;
                }
                UpdateEvent::AuditAllowEnable { perms } => node.avd.auditallow |= perms,
                UpdateEvent::AuditAllowDisable { perms } => node.avd.auditallow &= !perms,
                UpdateEvent::AuditDenyEnable { perms } => node.avd.auditdeny |= perms,
                UpdateEvent::AuditDenyDisable { perms } => node.avd.auditdeny &= !perms,
                UpdateEvent::AddOperation { decision } => {
                    node.ops
                        .get_or_insert_with(Box::default)
                        .add_decision(decision);
                }
            })
    }

    /// Registers an invalidation callback. Registration is one-shot and
    /// intended for init time; callbacks are never unregistered.
    pub fn add_callback(
        &self,
        callback: AvcCallback,
        events: EventMask,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        perms: AccessVector,
    ) {
        self.callbacks.write().push(CallbackRegistration {
            callback,
            events,
            ssid,
            tsid,
            tclass,
            perms,
        });
    }

    /// Policy-reload notification: flushes the cache, invokes every
    /// callback subscribed to [`EventMask::RESET`], then records `seqno`
    /// (monotonic max) so stale insertions are refused from here on.
    ///
    /// # Errors
    ///
    /// [`AvcError::Callback`] wrapping the first non-zero code returned
    /// by a callback, after all callbacks have run. Callback failures do
    /// not abort the reset.
    pub fn ss_reset(&self, seqno: u32) -> AvcResult<()> {
        debug!(target: "avc", seqno, "policy reset");
        self.flush();

        let mut rc = Ok(());
        {
            let callbacks = self.callbacks.read();
            for registration in callbacks
                .iter()
                .filter(|r| r.matches(EventMask::RESET, SecurityId::WILD, SecurityId::WILD))
            {
                if let Err(code) = (registration.callback)(EventMask::RESET) {
                    if rc.is_ok() {
                        rc = Err(AvcError::Callback { code });
                    }
                }
            }
        }

        self.cache.note_reset_seqno(seqno);
        rc
    }

    /// The newest policy sequence number whose reset has been observed.
    #[must_use]
    pub fn policy_seqno(&self) -> u32 {
        self.cache.latest_seqno()
    }

    /// Point-in-time copy of the cache event counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats.snapshot()
    }

    /// Human-readable hash-table occupancy dump.
    #[must_use]
    pub fn hash_stats_text(&self) -> String {
        let guard = epoch::pin();
        let (entries, used, longest) = self.cache.hash_stats(&guard);
        stats::format_hash_stats(entries, used, crate::cache::CACHE_SLOTS, longest)
    }

    /// Flushes the cache and stops none of the machinery: the behaviour
    /// of subsequent operations is unspecified (they act on a cold
    /// cache) but memory-safe.
    pub fn disable(&self) {
        debug!(target: "avc", "access vector cache disabled");
        self.flush();
    }

    /// Unlinks every cached entry.
    pub(crate) fn flush(&self) {
        let guard = epoch::pin();
        self.cache.flush(&guard);
    }

    /// Deny path: strict callers and enforcing servers fail the check;
    /// permissive decisions are granted and the cached entry patched so
    /// the next check hits.
    #[allow(clippy::too_many_arguments)]
    fn denied(
        &self,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        requested: AccessVector,
        cmd: Option<OperationCommand>,
        flags: CheckFlags,
        avd: &AvDecision,
    ) -> AvcResult<()> {
        if flags.contains(CheckFlags::STRICT) {
            return Err(AvcError::PermissionDenied);
        }
        if self.server.enforcing() && !avd.is_permissive() {
            return Err(AvcError::PermissionDenied);
        }

        let cmd = flags.contains(CheckFlags::OPERATION_CMD).then_some(cmd).flatten();
        let _ = self.update_node(
            ssid,
            tsid,
            tclass,
            avd.seqno,
            UpdateEvent::Grant {
                perms: requested,
                cmd,
            },
        );
        Ok(())
    }

    /// Audit step shared by the entry points: derives the audited bits
    /// and emits a record when any are set.
    #[allow(clippy::too_many_arguments)]
    fn audit(
        &self,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        requested: AccessVector,
        avd: &AvDecision,
        check_failed: bool,
        window: Option<&OperationWindow>,
        cmd: Option<OperationCommand>,
        auditdata: &AuditContext,
        flags: CheckFlags,
    ) -> AvcResult<()> {
        let (audited, denied) = audit::audit_required(requested, avd, window, cmd, check_failed);
        if audited.is_empty() {
            return Ok(());
        }
        if flags.contains(CheckFlags::NONBLOCKING)
            && matches!(auditdata, AuditContext::Inode { .. })
        {
            return Err(AvcError::TryAgainNonblocking);
        }

        let record = audit::render_record(
            self.server.as_ref(),
            ssid,
            tsid,
            tclass,
            audited,
            !denied.is_empty(),
            check_failed,
            auditdata,
        );
        self.sink.emit(&record);
        Ok(())
    }

    /// Classifies the fine-grained state of an entry for `cmd`.
    fn probe_ops(ops: Option<&OperationNode>, ty: u8, cmd: OperationCommand) -> OpsProbe {
        let Some(ops) = ops else {
            return OpsProbe::Skip;
        };
        if !ops.has_constraints() {
            return OpsProbe::Skip;
        }
        match ops.decision(ty) {
            Some(od) => OpsProbe::Window(OperationWindow::from_decision(od, cmd)),
            None if !ops.type_mask.contains(ty) => OpsProbe::Uncomputed,
            None => OpsProbe::Compute,
        }
    }
}

impl std::fmt::Debug for Avc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Avc")
            .field("active_nodes", &self.cache.active_nodes())
            .field("latest_seqno", &self.cache.latest_seqno())
            .finish_non_exhaustive()
    }
}
