//! Audit record derivation, rendering, and emission.
//!
//! The cache decides *what* to audit (the `audited` bitmap derived from
//! the decision and the outcome) and renders a structured one-line
//! record; *where* the record goes is the [`AuditSink`]'s concern. The
//! default sink emits `tracing` events under the `avc` target.

use std::fmt::Write as _;

use crate::operation::{OperationCommand, OperationWindow, Specified};
use crate::server::SecurityServer;
use crate::types::{AccessVector, AvDecision, ObjectClass, SecurityId};

/// Caller-supplied context attached to an audit record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuditContext {
    /// No additional context.
    #[default]
    None,
    /// A filesystem path.
    Path(String),
    /// An inode-backed object whose path is not known; rendering it may
    /// require blocking on the filesystem, so non-blocking callers are
    /// refused.
    Inode {
        /// Inode number.
        ino: u64,
    },
    /// A network peer address, pre-rendered.
    Net(String),
}

/// One fully rendered audit record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// The rendered one-line message.
    pub message: String,
    /// True when the record reports a denial.
    pub denied: bool,
}

/// Destination for rendered audit records.
pub trait AuditSink: Send + Sync {
    /// Emits one record. Must not panic; emission failures are the
    /// sink's concern.
    fn emit(&self, record: &AuditRecord);
}

/// Default sink: structured `tracing` events under the `avc` target,
/// denials at warn level and grants at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: &AuditRecord) {
        if record.denied {
            tracing::warn!(target: "avc", "{}", record.message);
        } else {
            tracing::info!(target: "avc", "{}", record.message);
        }
    }
}

/// Derives the audited and denied bitmaps for a check outcome.
///
/// - Denied bits are audited when selected by `auditdeny`, unless the
///   operation window marks the command as dont-audit.
/// - A failed check with nothing denied (an enforcement error path)
///   audits the full request.
/// - Granted bits are audited when selected by `auditallow`; with an
///   operation window, only if the window marks the command for
///   audit-on-allow.
pub(crate) fn audit_required(
    requested: AccessVector,
    avd: &AvDecision,
    window: Option<&OperationWindow>,
    cmd: Option<OperationCommand>,
    check_failed: bool,
) -> (AccessVector, AccessVector) {
    let denied = requested & !avd.allowed;
    if !denied.is_empty() {
        let mut bits = denied & avd.auditdeny;
        if let (Some(w), Some(cmd)) = (window, cmd) {
            if !bits.is_empty() && w.permits(Specified::DONTAUDIT, cmd.number()) {
                bits &= !requested;
            }
        }
        return (bits, denied);
    }
    if check_failed {
        return (requested, requested);
    }
    let mut bits = requested & avd.auditallow;
    if let (Some(w), Some(cmd)) = (window, cmd) {
        if !bits.is_empty() && !w.permits(Specified::AUDITALLOW, cmd.number()) {
            bits &= !requested;
        }
    }
    (bits, denied)
}

/// Renders the audited permissions as ` { name name … }`, falling back
/// to hex for bits without a name in the class map.
fn dump_av(buf: &mut String, server: &dyn SecurityServer, tclass: ObjectClass, av: AccessVector) {
    if av.is_empty() {
        buf.push_str(" null");
        return;
    }

    let entry = server.class_map(tclass);
    let mut rest = av.raw();
    buf.push_str(" {");
    if let Some(entry) = entry {
        for (i, name) in entry.perms.iter().enumerate() {
            let bit = 1u32 << i;
            if rest & bit != 0 {
                if let Some(name) = name {
                    let _ = write!(buf, " {name}");
                    rest &= !bit;
                }
            }
        }
    }
    if rest != 0 {
        let _ = write!(buf, " {rest:#x}");
    }
    buf.push_str(" }");
}

/// Renders the query key: contexts when resolvable, raw ids otherwise.
fn dump_query(
    buf: &mut String,
    server: &dyn SecurityServer,
    ssid: SecurityId,
    tsid: SecurityId,
    tclass: ObjectClass,
) {
    match server.sid_to_context(ssid) {
        Some(ctx) => {
            let _ = write!(buf, "scontext={ctx}");
        }
        None => {
            let _ = write!(buf, "ssid={ssid}");
        }
    }
    match server.sid_to_context(tsid) {
        Some(ctx) => {
            let _ = write!(buf, " tcontext={ctx}");
        }
        None => {
            let _ = write!(buf, " tsid={tsid}");
        }
    }
    match server.class_map(tclass) {
        Some(entry) => {
            let _ = write!(buf, " tclass={}", entry.name);
        }
        None => {
            let _ = write!(buf, " tclass={tclass}");
        }
    }
}

/// Renders a complete record for one check outcome.
///
/// `enforced` selects the `permissive=` suffix on denials: a denial that
/// was enforced renders `permissive=0`, one that was let through renders
/// `permissive=1`.
pub(crate) fn render_record(
    server: &dyn SecurityServer,
    ssid: SecurityId,
    tsid: SecurityId,
    tclass: ObjectClass,
    audited: AccessVector,
    denied: bool,
    enforced: bool,
    context: &AuditContext,
) -> AuditRecord {
    let mut buf = String::new();
    buf.push_str("avc: ");
    buf.push_str(if denied { " denied " } else { " granted " });
    dump_av(&mut buf, server, tclass, audited);
    buf.push_str(" for");

    match context {
        AuditContext::None => {}
        AuditContext::Path(path) => {
            let _ = write!(buf, " path=\"{path}\"");
        }
        AuditContext::Inode { ino } => {
            let _ = write!(buf, " ino={ino}");
        }
        AuditContext::Net(peer) => {
            let _ = write!(buf, " peer={peer}");
        }
    }

    buf.push(' ');
    dump_query(&mut buf, server, ssid, tsid, tclass);
    if denied {
        let _ = write!(buf, " permissive={}", u8::from(!enforced));
    }

    AuditRecord {
        message: buf,
        denied,
    }
}
