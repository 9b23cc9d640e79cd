//! End-to-end permission-check scenarios against the public API.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use avc_core::{
    AccessVector, AuditContext, AvcError, CheckFlags, EventMask, ObjectClass, OperationCommand,
    OperationDecision, SecurityId, Specified, DEFAULT_CACHE_THRESHOLD,
};

use common::{decision, fixture};

const KEY: common::Key = (1, 2, 3);

fn ids() -> (SecurityId, SecurityId, ObjectClass) {
    (SecurityId::new(1), SecurityId::new(2), ObjectClass::new(3))
}

#[test]
fn fresh_check_populates_cache_and_allows() {
    let f = fixture();
    f.server.program(KEY, decision(0b1010, 7, false));
    let (s, t, c) = ids();

    let (rc, avd) = f
        .avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b0010), CheckFlags::empty());
    assert_eq!(rc, Ok(()));
    assert_eq!(avd.allowed.raw(), 0b1010);
    assert_eq!(avd.seqno, 7);

    // The decision is cached: an identical check is a hit.
    f.avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b0010), CheckFlags::empty())
        .0
        .unwrap();
    assert_eq!(f.server.compute_av_calls.load(Ordering::Relaxed), 1);
    assert!(f.avc.hash_stats_text().starts_with("entries: 1\n"));
}

#[test]
fn enforcing_denial_reports_and_keeps_entry_unpatched() {
    let f = fixture();
    f.server.enforcing.store(true, Ordering::Relaxed);
    f.server.program(KEY, decision(0b1010, 7, false));
    let (s, t, c) = ids();

    let (rc, _) = f
        .avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b0100), CheckFlags::empty());
    assert_eq!(rc, Err(AvcError::PermissionDenied));

    let (_, avd) = f
        .avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b0010), CheckFlags::empty());
    assert_eq!(avd.allowed.raw(), 0b1010, "no grant-patching under enforcement");
}

#[test]
fn permissive_denial_self_patches_entry() {
    let f = fixture();
    f.server.program(KEY, decision(0b1010, 7, true));
    let (s, t, c) = ids();

    let (rc, _) = f
        .avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b0100), CheckFlags::empty());
    assert_eq!(rc, Ok(()));

    // The grant was folded into the cached entry: the next identical
    // call is a plain hit with the widened vector.
    let (rc, avd) = f
        .avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b0100), CheckFlags::empty());
    assert_eq!(rc, Ok(()));
    assert_eq!(avd.allowed.raw(), 0b1110);
    assert_eq!(f.server.compute_av_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn reset_flushes_and_gates_stale_reinsertion() {
    let f = fixture();
    f.server.program(KEY, decision(0b1, 7, false));
    let (s, t, c) = ids();
    f.avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b1), CheckFlags::empty())
        .0
        .unwrap();

    f.avc.ss_reset(8).unwrap();
    assert!(f.avc.hash_stats_text().starts_with("entries: 0\n"));
    assert_eq!(f.avc.policy_seqno(), 8);

    // A racer still computing against the old policy produces seqno 7:
    // the check answers but nothing is re-cached.
    let (rc, _) = f
        .avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b1), CheckFlags::empty());
    assert_eq!(rc, Ok(()));
    assert_eq!(f.server.compute_av_calls.load(Ordering::Relaxed), 2);
    assert!(f.avc.hash_stats_text().starts_with("entries: 0\n"));

    // Under the new policy the decision carries seqno 8 and installs.
    f.server.program(KEY, decision(0b1, 8, false));
    f.avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b1), CheckFlags::empty())
        .0
        .unwrap();
    assert!(f.avc.hash_stats_text().starts_with("entries: 1\n"));
}

#[test]
fn first_operation_check_computes_and_attaches_decision() {
    let f = fixture();
    f.server.enforcing.store(true, Ordering::Relaxed);
    let mut computed = decision(0b1000, 7, false);
    computed.ops.len = 1;
    computed.ops.type_mask.set(5);
    f.server.program(KEY, computed);
    // Type 5: allowed bitmap present, bit 42 clear.
    f.server
        .program_op(KEY, 5, OperationDecision::new(5, Specified::ALLOWED));
    let (s, t, c) = ids();
    let cmd = OperationCommand::new(5, 42);

    let rc = f
        .avc
        .has_operation(s, t, c, AccessVector::new(0b1000), cmd, &AuditContext::None);
    assert_eq!(rc, Err(AvcError::PermissionDenied));
    assert_eq!(f.server.compute_op_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn second_operation_check_hits_attached_decision() {
    let f = fixture();
    f.server.enforcing.store(true, Ordering::Relaxed);
    let mut computed = decision(0b1000, 7, false);
    computed.ops.len = 1;
    computed.ops.type_mask.set(5);
    f.server.program(KEY, computed);
    f.server
        .program_op(KEY, 5, OperationDecision::new(5, Specified::ALLOWED));
    let (s, t, c) = ids();
    let cmd = OperationCommand::new(5, 42);

    let first = f
        .avc
        .has_operation(s, t, c, AccessVector::new(0b1000), cmd, &AuditContext::None);
    let second = f
        .avc
        .has_operation(s, t, c, AccessVector::new(0b1000), cmd, &AuditContext::None);
    assert_eq!(first, Err(AvcError::PermissionDenied));
    assert_eq!(second, Err(AvcError::PermissionDenied));
    // The fast path copied the attached window; no further compute.
    assert_eq!(f.server.compute_op_calls.load(Ordering::Relaxed), 1);
}

#[test]
fn eviction_bounds_cache_growth() {
    let f = fixture();
    f.server.enforcing.store(true, Ordering::Relaxed);
    let c = ObjectClass::new(3);

    let total = u32::try_from(DEFAULT_CACHE_THRESHOLD).unwrap() + 1;
    for n in 0..total {
        f.server.program((n, n, 3), decision(0b1, 7, false));
        f.avc
            .has_perm_noaudit(
                SecurityId::new(n),
                SecurityId::new(n),
                c,
                AccessVector::new(0b1),
                CheckFlags::empty(),
            )
            .0
            .unwrap();
    }

    let snap = f.avc.cache_stats();
    assert_eq!(snap.allocations, u64::from(total));
    assert_eq!(snap.reclaims, 16, "one eviction pass ran");
    let expected = DEFAULT_CACHE_THRESHOLD + 1 - 16;
    assert!(f
        .avc
        .hash_stats_text()
        .starts_with(&format!("entries: {expected}\n")));
}

#[test]
fn audit_records_render_contexts() {
    let f = fixture();
    f.server.enforcing.store(true, Ordering::Relaxed);
    let mut computed = decision(0b0010, 7, false);
    computed.avd.auditdeny = AccessVector::new(0b1111);
    f.server.program(KEY, computed);
    let (s, t, c) = ids();

    let rc = f.avc.has_perm(
        s,
        t,
        c,
        AccessVector::new(0b0100),
        &AuditContext::Path("/etc/shadow".into()),
    );
    assert_eq!(rc, Err(AvcError::PermissionDenied));

    let messages = f.sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0],
        "avc:  denied  { write } for path=\"/etc/shadow\" scontext=sys.u:sid1 \
         tcontext=sys.u:sid2 tclass=file permissive=0"
    );
}

#[test]
fn reset_callbacks_observe_reset_only() {
    let f = fixture();
    let reset_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = Arc::clone(&reset_seen);
    f.avc.add_callback(
        Box::new(move |event| {
            assert_eq!(event, EventMask::RESET);
            seen.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }),
        EventMask::RESET | EventMask::REVOKE,
        SecurityId::WILD,
        SecurityId::WILD,
        ObjectClass::new(3),
        AccessVector::new(0b1),
    );

    f.avc.ss_reset(2).unwrap();
    f.avc.ss_reset(3).unwrap();
    assert_eq!(reset_seen.load(Ordering::Relaxed), 2);
    assert_eq!(f.avc.policy_seqno(), 3);
}

#[test]
fn disable_flushes_but_stays_memory_safe() {
    let f = fixture();
    f.server.program(KEY, decision(0b1, 7, false));
    let (s, t, c) = ids();
    f.avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b1), CheckFlags::empty())
        .0
        .unwrap();

    f.avc.disable();
    assert!(f.avc.hash_stats_text().starts_with("entries: 0\n"));

    // Unspecified but safe: a later check behaves as on a cold cache.
    let (rc, _) = f
        .avc
        .has_perm_noaudit(s, t, c, AccessVector::new(0b1), CheckFlags::empty());
    assert_eq!(rc, Ok(()));
}
