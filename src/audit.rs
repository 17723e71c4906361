//! Append-only audit events.
//!
//! The engine appends and never reads back; display belongs to an outer
//! layer. Appends are fire-and-forget but a sink must not silently drop: the
//! sled sink logs a warning when a write fails and the triggering transition
//! proceeds regardless.

use chrono::Utc;
use sled::Db;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::types::TimeStamp;
use crate::utils;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub enum AuditEvent {
    #[n(0)]
    StageChanged {
        #[n(0)]
        record_id: String,
        #[n(1)]
        module_id: String,
        #[n(2)]
        old_stage: String,
        #[n(3)]
        new_stage: String,
        #[n(4)]
        actor: String,
        #[n(5)]
        reason: Option<String>,
        #[n(6)]
        at: TimeStamp<Utc>,
    },
    #[n(1)]
    ApprovalCreated {
        #[n(0)]
        request_id: String,
        #[n(1)]
        record_id: String,
        #[n(2)]
        module_id: String,
        #[n(3)]
        requested_by: String,
        #[n(4)]
        at: TimeStamp<Utc>,
    },
    #[n(2)]
    ApprovalResolved {
        #[n(0)]
        request_id: String,
        #[n(1)]
        record_id: String,
        #[n(2)]
        module_id: String,
        #[n(3)]
        outcome: String,
        #[n(4)]
        actor: String,
        #[n(5)]
        at: TimeStamp<Utc>,
    },
}

pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent);
}

pub struct SledAuditSink {
    tree: sled::Tree,
}

impl SledAuditSink {
    pub fn open(db: &Arc<Db>) -> anyhow::Result<Self> {
        Ok(Self {
            tree: db.open_tree("audit")?,
        })
    }
}

impl AuditSink for SledAuditSink {
    fn append(&self, event: AuditEvent) {
        let result = utils::new_uuid_to_bech32("evt_")
            .and_then(|id| Ok(self.tree.insert(id.as_bytes(), utils::to_cbor(&event)?)?));
        if let Err(e) = result {
            warn!(error = %e, ?event, "audit append failed");
        }
    }
}

/// Collects events in memory; test assertions read them back.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit sink poisoned").clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: AuditEvent) {
        self.events.lock().expect("audit sink poisoned").push(event);
    }
}
