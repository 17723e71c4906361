//! The transition gate: one place that decides what happens to a requested
//! stage change.
//!
//! A request runs legality, field validation, required-field and reason
//! checks in order; everything up to the commit (or approval creation) is
//! read-only, so a client can re-run the check as the user edits fields
//! without committing partial state. Expected denials are outcomes, not
//! errors.

use tracing::debug;

use crate::approval::{ApprovalEngine, TransitionContext};
use crate::audit::{AuditEvent, AuditSink};
use crate::blueprint::{Catalog, FieldRequirement};
use crate::error::EngineError;
use crate::store::{RecordStore, StoreProbe};
use crate::types::{FieldMap, TimeStamp, Trigger, is_blank};
use crate::validation::{RuleEngine, ValidationFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Run every check but never write; safe to repeat while a form is
    /// being edited.
    Preview,
    Execute,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Committed {
        record_id: String,
        from_stage: String,
        to_stage: String,
    },
    /// Source and target stage are the same; nothing to do.
    NoOp { stage: String },
    /// The blueprint has no such edge. Not retriable without
    /// reconfiguration.
    BlueprintDenied { reason: String },
    ValidationFailed { errors: Vec<ValidationFailure> },
    /// `required` is the full requirement list with current values filled,
    /// so a caller can render the complete form; `missing` names the blanks.
    FieldsMissing {
        required: Vec<FieldRequirement>,
        missing: Vec<String>,
    },
    ReasonRequired,
    ApprovalCreated { request_id: String },
    /// Another attempt already holds a pending approval on this record.
    ApprovalInProgress { request_id: String },
    /// Preview verdict: every gate passed, committing would succeed (or
    /// spawn an approval when flagged).
    Ready { requires_approval: bool },
    /// The record changed between read and committing write. Retriable.
    Conflict,
}

pub struct TransitionGate<'a> {
    pub catalog: &'a Catalog,
    pub rules: &'a RuleEngine,
    pub store: &'a dyn RecordStore,
    pub approvals: &'a ApprovalEngine,
    pub audit: &'a dyn AuditSink,
}

impl TransitionGate<'_> {
    pub fn request(
        &self,
        record_id: &str,
        to_stage: &str,
        payload: &FieldMap,
        reason: Option<&str>,
        actor: &str,
        mode: GateMode,
    ) -> anyhow::Result<TransitionOutcome> {
        let Some(record) = self.store.get(record_id)? else {
            return Err(EngineError::RecordNotFound(record_id.to_string()).into());
        };
        if record.stage == to_stage {
            return Ok(TransitionOutcome::NoOp {
                stage: record.stage,
            });
        }
        let module = self.catalog.require_module(&record.module_id)?;
        let blueprint = self.catalog.require_blueprint(&record.module_id)?;

        let transition = match blueprint.check_transition(&record.stage, to_stage) {
            Ok(t) => t.clone(),
            Err(deny) => {
                return Ok(TransitionOutcome::BlueprintDenied {
                    reason: deny.to_string(),
                });
            }
        };

        let errors = self.rules.validate(
            &module,
            Trigger::StageChange,
            &record.fields,
            payload,
            &StoreProbe(self.store),
            Some(&record.id),
        )?;
        if !errors.is_empty() {
            return Ok(TransitionOutcome::ValidationFailed { errors });
        }

        let merged = record.merged_fields(payload);
        let mut required = transition.required_fields.clone();
        for req in &mut required {
            req.value = merged.get(&req.key).cloned();
        }
        let missing: Vec<String> = required
            .iter()
            .filter(|r| is_blank(r.value.as_ref()))
            .map(|r| r.key.clone())
            .collect();
        if !missing.is_empty() {
            return Ok(TransitionOutcome::FieldsMissing { required, missing });
        }

        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        if transition.require_reason && reason.is_none() {
            return Ok(TransitionOutcome::ReasonRequired);
        }

        // a pending request blocks a second attempt instead of spawning a
        // duplicate
        if let Some(pending) = self.approvals.pending_for_record(&record.id)? {
            return Ok(TransitionOutcome::ApprovalInProgress {
                request_id: pending.id,
            });
        }

        if mode == GateMode::Preview {
            return Ok(TransitionOutcome::Ready {
                requires_approval: transition.requires_approval,
            });
        }

        if transition.requires_approval {
            let Some(process_id) = transition.approval_process_id.clone() else {
                return Err(EngineError::MisconfiguredTransition(format!(
                    "{} -> {} requires approval but names no process",
                    transition.from_stage, transition.to_stage
                ))
                .into());
            };
            let context = TransitionContext {
                stage_from: record.stage.clone(),
                stage_to: to_stage.to_string(),
                payload: payload.clone(),
                reason: reason.map(str::to_string),
                transition,
            };
            let request = self
                .approvals
                .create_request(&process_id, &record, context, actor)?;
            return Ok(TransitionOutcome::ApprovalCreated {
                request_id: request.id,
            });
        }

        let mut after = record.clone();
        after.fields = merged;
        after.stage = to_stage.to_string();
        match self.store.commit_guarded(&record, after)? {
            Some(committed) => {
                self.audit.append(AuditEvent::StageChanged {
                    record_id: committed.id.clone(),
                    module_id: committed.module_id.clone(),
                    old_stage: record.stage.clone(),
                    new_stage: committed.stage.clone(),
                    actor: actor.to_string(),
                    reason: reason.map(str::to_string),
                    at: TimeStamp::now(),
                });
                debug!(record_id = %committed.id, from = %record.stage, to = %committed.stage, "stage committed");
                Ok(TransitionOutcome::Committed {
                    record_id: committed.id,
                    from_stage: record.stage,
                    to_stage: committed.stage,
                })
            }
            None => Ok(TransitionOutcome::Conflict),
        }
    }
}
