//! Property-based tests for the transition gate's read-only guarantees.
//!
//! Preview checks are re-run continuously by interactive clients while a
//! user edits fields, so they must be idempotent and free of side effects
//! for ANY payload, not just the well-formed ones the scenario tests use.
//! Each case opens its own sled database, so the case count is kept low.

use proptest::prelude::*;
use std::sync::Arc;

use blueprint_gate::{
    approval::StaticRoles,
    audit::MemoryAuditSink,
    blueprint::{Blueprint, FieldDef, FieldRequirement, FieldType, ModuleDef, Transition},
    service::{SaveOutcome, WorkflowService},
    types::{FieldMap, FieldValue},
};
use tempfile::tempdir;

fn open_service() -> (tempfile::TempDir, WorkflowService, Arc<MemoryAuditSink>) {
    let temp_dir = tempdir().unwrap();
    let db = Arc::new(sled::open(temp_dir.path().join("gate_props.db")).unwrap());
    let audit = Arc::new(MemoryAuditSink::new());
    let service =
        WorkflowService::with_audit(db, Arc::new(StaticRoles::new()), audit.clone()).unwrap();

    service
        .define_module(&ModuleDef {
            id: "deals".into(),
            label: "Deals".into(),
            fields: vec![
                FieldDef {
                    key: "budget".into(),
                    label: "Budget".into(),
                    field_type: FieldType::Number,
                },
                FieldDef {
                    key: "note".into(),
                    label: "Note".into(),
                    field_type: FieldType::Text,
                },
            ],
        })
        .unwrap();
    service
        .define_blueprint(
            &Blueprint::new("deals")
                .with_stage("new", "New", "#999999")
                .with_stage("qualified", "Qualified", "#3366ff")
                .with_stage("won", "Won", "#00aa44")
                .with_transition(Transition::new("new", "qualified").with_required_field(
                    FieldRequirement::new("budget", "Budget", FieldType::Number),
                ))
                .with_transition(Transition::new("qualified", "won")),
        )
        .unwrap();
    (temp_dir, service, audit)
}

/// Strategy for an arbitrary payload over the module's fields, including
/// blanks and non-numeric junk in the numeric field
fn payload_strategy() -> impl Strategy<Value = FieldMap> {
    let budget = prop_oneof![
        Just(None),
        (0i64..100_000).prop_map(|n| Some(FieldValue::number(n as f64))),
        Just(Some(FieldValue::text(""))),
        "[a-z]{1,6}".prop_map(|junk| Some(FieldValue::text(junk))),
    ];
    let note = prop_oneof![Just(None), "[ a-z]{0,16}".prop_map(|t| Some(FieldValue::text(t)))];
    (budget, note).prop_map(|(budget, note)| {
        let mut payload = FieldMap::new();
        if let Some(b) = budget {
            payload.insert("budget".into(), b);
        }
        if let Some(n) = note {
            payload.insert("note".into(), n);
        }
        payload
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: repeating a preview with identical inputs yields an
    /// identical outcome, and no preview ever mutates the record, writes an
    /// audit event or creates an approval request.
    #[test]
    fn prop_preview_is_idempotent_and_writes_nothing(
        payload in payload_strategy(),
        target in prop_oneof![Just("qualified"), Just("won"), Just("missing_stage")],
    ) {
        let (_dir, service, audit) = open_service();
        let record = match service.create_record("deals", "user_owner", FieldMap::new()).unwrap() {
            SaveOutcome::Saved(record) => record,
            other => panic!("expected saved record, got {other:?}"),
        };

        let first = service
            .preview_transition(&record.id, target, &payload, None, "user_owner")
            .unwrap();
        let second = service
            .preview_transition(&record.id, target, &payload, None, "user_owner")
            .unwrap();
        prop_assert_eq!(first, second);

        let stored = service.get_record(&record.id).unwrap().unwrap();
        prop_assert_eq!(stored.stage, record.stage);
        prop_assert_eq!(stored.version, record.version);
        prop_assert_eq!(stored.fields, record.fields);
        prop_assert!(audit.events().is_empty());
        prop_assert!(service.list_approvals(&Default::default()).unwrap().is_empty());
    }
}
