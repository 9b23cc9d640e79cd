//! Shared fixtures: a programmable security server and a capturing
//! audit sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use avc_core::{
    AccessVector, AuditRecord, AuditSink, Avc, AvcConfig, AvDecision, ClassEntry, ComputedAv,
    DecisionFlags, ObjectClass, OperationDecision, OperationNode, SecurityId, SecurityServer,
    Specified,
};

pub type Key = (u32, u32, u16);

/// A security server answering from programmed tables, counting compute
/// calls so tests can assert the cache actually memoises.
#[derive(Default)]
pub struct StubServer {
    pub enforcing: AtomicBool,
    answers: Mutex<HashMap<Key, ComputedAv>>,
    op_answers: Mutex<HashMap<(Key, u8), OperationDecision>>,
    pub compute_av_calls: AtomicUsize,
    pub compute_op_calls: AtomicUsize,
}

impl StubServer {
    pub fn program(&self, key: Key, computed: ComputedAv) {
        self.answers.lock().unwrap().insert(key, computed);
    }

    pub fn program_op(&self, key: Key, ty: u8, od: OperationDecision) {
        self.op_answers.lock().unwrap().insert((key, ty), od);
    }
}

impl SecurityServer for StubServer {
    fn compute_av(&self, ssid: SecurityId, tsid: SecurityId, tclass: ObjectClass) -> ComputedAv {
        self.compute_av_calls.fetch_add(1, Ordering::Relaxed);
        self.answers
            .lock()
            .unwrap()
            .get(&(ssid.raw(), tsid.raw(), tclass.raw()))
            .cloned()
            .unwrap_or_default()
    }

    fn compute_operation(
        &self,
        ssid: SecurityId,
        tsid: SecurityId,
        tclass: ObjectClass,
        ty: u8,
    ) -> OperationDecision {
        self.compute_op_calls.fetch_add(1, Ordering::Relaxed);
        self.op_answers
            .lock()
            .unwrap()
            .get(&((ssid.raw(), tsid.raw(), tclass.raw()), ty))
            .cloned()
            .unwrap_or_else(|| OperationDecision::new(ty, Specified::empty()))
    }

    fn sid_to_context(&self, sid: SecurityId) -> Option<String> {
        Some(format!("sys.u:sid{}", sid.raw()))
    }

    fn enforcing(&self) -> bool {
        self.enforcing.load(Ordering::Relaxed)
    }

    fn class_map(&self, tclass: ObjectClass) -> Option<ClassEntry> {
        let mut perms = [None; 32];
        perms[1] = Some("read");
        perms[2] = Some("write");
        perms[3] = Some("ioctl");
        (tclass.raw() == 3).then_some(ClassEntry { name: "file", perms })
    }
}

/// Sink that records every emitted audit line.
#[derive(Default)]
pub struct CapturingSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl CapturingSink {
    pub fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.message.clone())
            .collect()
    }
}

impl AuditSink for CapturingSink {
    fn emit(&self, record: &AuditRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

pub struct Fixture {
    pub avc: Avc,
    pub server: Arc<StubServer>,
    pub sink: Arc<CapturingSink>,
}

pub fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let server = Arc::new(StubServer::default());
    let sink = Arc::new(CapturingSink::default());
    let avc = Avc::new(
        AvcConfig::default(),
        Arc::clone(&server) as Arc<dyn SecurityServer>,
        Arc::clone(&sink) as Arc<dyn AuditSink>,
    );
    Fixture { avc, server, sink }
}

/// A coarse decision with the given allow bits and seqno.
pub fn decision(allowed: u32, seqno: u32, permissive: bool) -> ComputedAv {
    ComputedAv {
        avd: AvDecision {
            allowed: AccessVector::new(allowed),
            auditallow: AccessVector::EMPTY,
            auditdeny: AccessVector::EMPTY,
            flags: if permissive {
                DecisionFlags::PERMISSIVE
            } else {
                DecisionFlags::empty()
            },
            seqno,
        },
        ops: OperationNode::default(),
    }
}
