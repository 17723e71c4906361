//! Walks a deal record through a gated lifecycle end to end: blueprint
//! setup, a blocked transition, a committed one, and a two-step approval.
//!
//! Run with: cargo run --example quickstart

use std::sync::Arc;

use blueprint_gate::{
    approval::{ApprovalAction, ApprovalProcess, ApproverPolicy, StaticRoles},
    blueprint::{Blueprint, FieldDef, FieldRequirement, FieldType, ModuleDef, Transition},
    service::{SaveOutcome, WorkflowService},
    types::{FieldMap, FieldValue},
};

fn main() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("quickstart.db"))?);

    let roles = StaticRoles::new().with_role("bob", "finance");
    let service = WorkflowService::new(db, Arc::new(roles))?;

    service.define_module(&ModuleDef {
        id: "deals".into(),
        label: "Deals".into(),
        fields: vec![
            FieldDef {
                key: "budget".into(),
                label: "Budget".into(),
                field_type: FieldType::Number,
            },
            FieldDef {
                key: "name".into(),
                label: "Deal Name".into(),
                field_type: FieldType::Text,
            },
        ],
    })?;
    service.define_blueprint(
        &Blueprint::new("deals")
            .with_stage("new", "New", "#999999")
            .with_stage("qualified", "Qualified", "#3366ff")
            .with_stage("won", "Won", "#00aa44")
            .with_transition(Transition::new("new", "qualified").with_required_field(
                FieldRequirement::new("budget", "Budget", FieldType::Number),
            ))
            .with_transition(Transition::new("qualified", "won").with_approval("deal-approval")),
    )?;
    service.define_process(
        &ApprovalProcess::new("deal-approval", "Deal approval")
            .with_step("manager", ApproverPolicy::User("alice".into()))
            .with_step("finance", ApproverPolicy::Role("finance".into())),
    )?;

    let mut fields = FieldMap::new();
    fields.insert("name".into(), FieldValue::text("Acme renewal"));
    let record = match service.create_record("deals", "user_owner", fields)? {
        SaveOutcome::Saved(record) => record,
        other => anyhow::bail!("create failed: {other:?}"),
    };
    println!("created {} in stage {}", record.id, record.stage);

    // blocked: the budget requirement is unmet
    let outcome =
        service.execute_transition(&record.id, "qualified", &FieldMap::new(), None, "user_owner")?;
    println!("without budget: {outcome:#?}");

    // supplying the budget commits
    let mut payload = FieldMap::new();
    payload.insert("budget".into(), FieldValue::number(5000.0));
    let outcome = service.execute_transition(&record.id, "qualified", &payload, None, "user_owner")?;
    println!("with budget: {outcome:#?}");

    // the edge to won is gated by a two-step approval
    let outcome =
        service.execute_transition(&record.id, "won", &FieldMap::new(), None, "user_owner")?;
    println!("requesting won: {outcome:#?}");
    let request = service
        .list_approvals(&Default::default())?
        .pop()
        .expect("an approval request was created");

    let first = service.decide(&request.id, "alice", ApprovalAction::Approve, None)?;
    println!("alice approves: {first:#?}");
    let second = service.decide(&request.id, "bob", ApprovalAction::Approve, None)?;
    println!("bob approves: {second:#?}");

    let record = service.get_record(&record.id)?.expect("record exists");
    println!("final stage: {}", record.stage);
    Ok(())
}
