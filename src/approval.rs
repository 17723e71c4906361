//! Approval request lifecycle: creation from a process definition, inbox
//! queries, decision actions and final application of the gated transition.
//!
//! A request snapshots its process steps at creation, so later edits to the
//! process never retroactively change an in-flight request. Decisions are
//! append-only. The request status write is a compare-and-swap: of two
//! racing actors on the same step, exactly one claims the action.

use chrono::Utc;
use sled::Db;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::blueprint::{Catalog, Transition};
use crate::error::EngineError;
use crate::store::{Record, RecordStore, StoreProbe};
use crate::types::{FieldMap, TimeStamp, Trigger};
use crate::utils;
use crate::validation::{RuleEngine, ValidationFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalAction {
    Approve,
    Reject,
    RequestChanges,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    ChangesRequested,
    #[n(4)]
    Cancelled,
    #[n(5)]
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ChangesRequested => "changes_requested",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// How a step resolves its approver. A small closed set of strategies
/// selected by variant, resolved through [`can_act_on_step`].
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum ApproverPolicy {
    #[n(0)]
    User(#[n(0)] String),
    #[n(1)]
    Role(#[n(0)] String),
    /// Resolved per record via the role resolver's reporting line.
    #[n(2)]
    RecordOwnerManager,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalStep {
    #[n(0)]
    pub label: String,
    #[n(1)]
    pub policy: ApproverPolicy,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalProcess {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub label: String,
    #[n(2)]
    pub steps: Vec<ApprovalStep>,
}

impl ApprovalProcess {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            steps: vec![],
        }
    }
    pub fn with_step(mut self, label: impl Into<String>, policy: ApproverPolicy) -> Self {
        self.steps.push(ApprovalStep {
            label: label.into(),
            policy,
        });
        self
    }
}

/// What the requester asked for, captured at creation time together with a
/// snapshot of the transition definition it was gated by.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct TransitionContext {
    #[n(0)]
    pub stage_from: String,
    #[n(1)]
    pub stage_to: String,
    #[n(2)]
    pub payload: FieldMap,
    #[n(3)]
    pub reason: Option<String>,
    #[n(4)]
    pub transition: Transition,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ApprovalRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub record_id: String,
    #[n(2)]
    pub module_id: String,
    #[n(3)]
    pub process_id: String,
    /// Snapshot of the process steps at creation time.
    #[n(4)]
    pub steps: Vec<ApprovalStep>,
    #[n(5)]
    pub context: TransitionContext,
    /// Digest of the captured context, for traceability.
    #[n(6)]
    pub context_hash: String,
    #[n(7)]
    pub status: ApprovalStatus,
    #[n(8)]
    pub current_step: u32,
    #[n(9)]
    pub total_steps: u32,
    #[n(10)]
    pub requested_by: String,
    /// Lineage link when this request resubmits a changes-requested one.
    #[n(11)]
    pub supersedes_request_id: Option<String>,
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
    #[n(13)]
    pub updated_at: TimeStamp<Utc>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
    pub fn current_policy(&self) -> Option<&ApproverPolicy> {
        self.steps.get(self.current_step as usize).map(|s| &s.policy)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum DecisionAction {
    #[n(0)]
    Approve,
    #[n(1)]
    Reject,
    #[n(2)]
    RequestChanges,
}

impl From<ApprovalAction> for DecisionAction {
    fn from(action: ApprovalAction) -> Self {
        match action {
            ApprovalAction::Approve => Self::Approve,
            ApprovalAction::Reject => Self::Reject,
            ApprovalAction::RequestChanges => Self::RequestChanges,
        }
    }
}

/// One row per action taken. Never updated or deleted.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ApprovalDecision {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_id: String,
    #[n(2)]
    pub step_index: u32,
    #[n(3)]
    pub actor: String,
    #[n(4)]
    pub action: DecisionAction,
    #[n(5)]
    pub comment: Option<String>,
    #[n(6)]
    pub decided_at: TimeStamp<Utc>,
}

/// Role and reporting-line lookups, implemented by the out-of-scope
/// permission layer.
pub trait RoleResolver: Send + Sync {
    fn user_in_role(&self, user: &str, role: &str) -> bool;
    fn manager_of(&self, user: &str) -> Option<String>;
}

/// In-memory resolver for tests and demos.
#[derive(Default, Clone)]
pub struct StaticRoles {
    roles: HashMap<String, Vec<String>>,
    managers: HashMap<String, String>,
}

impl StaticRoles {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_role(mut self, user: impl Into<String>, role: impl Into<String>) -> Self {
        self.roles.entry(user.into()).or_default().push(role.into());
        self
    }
    pub fn with_manager(mut self, user: impl Into<String>, manager: impl Into<String>) -> Self {
        self.managers.insert(user.into(), manager.into());
        self
    }
}

impl RoleResolver for StaticRoles {
    fn user_in_role(&self, user: &str, role: &str) -> bool {
        self.roles
            .get(user)
            .is_some_and(|rs| rs.iter().any(|r| r == role))
    }
    fn manager_of(&self, user: &str) -> Option<String> {
        self.managers.get(user).cloned()
    }
}

/// Whether `actor` may decide a step with this policy for a record owned by
/// `record_owner`. `None` means the policy cannot be resolved at all (e.g.
/// the owner has no manager on file); inbox queries exclude such items
/// rather than erroring.
pub fn can_act_on_step(
    policy: &ApproverPolicy,
    actor: &str,
    record_owner: &str,
    roles: &dyn RoleResolver,
) -> Option<bool> {
    match policy {
        ApproverPolicy::User(user) => Some(actor == user),
        ApproverPolicy::Role(role) => Some(roles.user_in_role(actor, role)),
        ApproverPolicy::RecordOwnerManager => {
            roles.manager_of(record_owner).map(|m| m == actor)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// Final step approved and the captured transition committed.
    Applied { request_id: String },
    StepAdvanced { request_id: String, current_step: u32 },
    Rejected { request_id: String },
    /// Terminal for this request; the requester resubmits, producing a new
    /// request that supersedes this one. Carries re-validation errors when
    /// a final approve found stale data.
    ChangesRequested {
        request_id: String,
        errors: Vec<ValidationFailure>,
    },
    Cancelled { request_id: String },
    ExpiredNow { request_id: String },
    NotFound { request_id: String },
    NotPending {
        request_id: String,
        status: ApprovalStatus,
    },
    Unauthorized { request_id: String },
    CommentRequired { request_id: String },
    Conflict { request_id: String },
    /// Infrastructure failure for this item only; bulk actions report it
    /// without blocking the rest.
    Failed { request_id: String, error: String },
}

#[derive(Default, Clone)]
pub struct ApprovalFilter {
    pub status: Option<ApprovalStatus>,
    pub module_id: Option<String>,
    /// Keep only requests whose current step resolves to this actor.
    pub assigned_to: Option<String>,
    pub requested_by: Option<String>,
}

enum ApplyResult {
    Committed,
    Stale(Vec<ValidationFailure>),
}

pub struct ApprovalEngine {
    approvals: sled::Tree,
    decisions: sled::Tree,
    processes: sled::Tree,
    store: Arc<dyn RecordStore>,
    roles: Arc<dyn RoleResolver>,
    audit: Arc<dyn AuditSink>,
    rules: RuleEngine,
    catalog: Catalog,
}

impl ApprovalEngine {
    pub fn open(
        db: &Arc<Db>,
        store: Arc<dyn RecordStore>,
        roles: Arc<dyn RoleResolver>,
        audit: Arc<dyn AuditSink>,
        rules: RuleEngine,
        catalog: Catalog,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            approvals: db.open_tree("approvals")?,
            decisions: db.open_tree("decisions")?,
            processes: db.open_tree("processes")?,
            store,
            roles,
            audit,
            rules,
            catalog,
        })
    }

    pub fn define_process(&self, process: &ApprovalProcess) -> anyhow::Result<()> {
        self.processes
            .insert(process.id.as_bytes(), utils::to_cbor(process)?)?;
        Ok(())
    }

    pub fn process(&self, id: &str) -> Result<Option<ApprovalProcess>, EngineError> {
        self.processes
            .get(id.as_bytes())?
            .map(|bytes| utils::from_cbor(&bytes))
            .transpose()
    }

    pub fn require_process(&self, id: &str) -> Result<ApprovalProcess, EngineError> {
        self.process(id)?
            .ok_or_else(|| EngineError::UnknownProcess(id.to_string()))
    }

    pub fn request(&self, id: &str) -> anyhow::Result<Option<ApprovalRequest>> {
        let req = self
            .approvals
            .get(id.as_bytes())?
            .map(|bytes| utils::from_cbor(&bytes))
            .transpose()?;
        Ok(req)
    }

    /// The open request blocking further transition attempts on a record,
    /// if any.
    pub fn pending_for_record(&self, record_id: &str) -> anyhow::Result<Option<ApprovalRequest>> {
        for entry in self.approvals.iter() {
            let (_, bytes) = entry?;
            let req: ApprovalRequest = utils::from_cbor(&bytes)?;
            if req.record_id == record_id && req.is_pending() {
                return Ok(Some(req));
            }
        }
        Ok(None)
    }

    /// Creates a pending request from the process definition, snapshotting
    /// its steps. If the record's latest resolved request ended in
    /// changes-requested, the new request records it as superseded.
    pub fn create_request(
        &self,
        process_id: &str,
        record: &Record,
        context: TransitionContext,
        requested_by: &str,
    ) -> anyhow::Result<ApprovalRequest> {
        let process = self.require_process(process_id)?;
        let supersedes = self.latest_changes_requested(&record.id)?;

        let now = TimeStamp::now();
        let request = ApprovalRequest {
            id: utils::new_uuid_to_bech32("apr_")?,
            record_id: record.id.clone(),
            module_id: record.module_id.clone(),
            process_id: process.id.clone(),
            steps: process.steps.clone(),
            context_hash: utils::hash_cbor(&context)?,
            context,
            status: ApprovalStatus::Pending,
            current_step: 0,
            total_steps: process.steps.len() as u32,
            requested_by: requested_by.to_string(),
            supersedes_request_id: supersedes.map(|r| r.id),
            created_at: now.clone(),
            updated_at: now,
        };
        self.approvals
            .insert(request.id.as_bytes(), utils::to_cbor(&request)?)?;

        self.audit.append(AuditEvent::ApprovalCreated {
            request_id: request.id.clone(),
            record_id: request.record_id.clone(),
            module_id: request.module_id.clone(),
            requested_by: request.requested_by.clone(),
            at: TimeStamp::now(),
        });
        debug!(request_id = %request.id, record_id = %request.record_id, "approval request created");
        Ok(request)
    }

    fn latest_changes_requested(
        &self,
        record_id: &str,
    ) -> anyhow::Result<Option<ApprovalRequest>> {
        let mut latest: Option<ApprovalRequest> = None;
        for entry in self.approvals.iter() {
            let (_, bytes) = entry?;
            let req: ApprovalRequest = utils::from_cbor(&bytes)?;
            if req.record_id == record_id
                && req.status == ApprovalStatus::ChangesRequested
                && latest.as_ref().is_none_or(|l| req.created_at > l.created_at)
            {
                latest = Some(req);
            }
        }
        Ok(latest)
    }

    /// One decision action on the request's current step. Expected denials
    /// come back as outcomes; only infrastructure faults are errors.
    pub fn act(
        &self,
        request_id: &str,
        actor: &str,
        action: ApprovalAction,
        comment: Option<&str>,
    ) -> anyhow::Result<DecisionOutcome> {
        let Some(request) = self.request(request_id)? else {
            return Ok(DecisionOutcome::NotFound {
                request_id: request_id.to_string(),
            });
        };
        if !request.is_pending() {
            return Ok(DecisionOutcome::NotPending {
                request_id: request.id,
                status: request.status,
            });
        }
        let Some(record) = self.store.get(&request.record_id)? else {
            return Err(EngineError::RecordNotFound(request.record_id.clone()).into());
        };
        let Some(policy) = request.current_policy() else {
            warn!(request_id = %request.id, step = request.current_step, "request step has no policy");
            return Ok(DecisionOutcome::Unauthorized { request_id: request.id });
        };
        if can_act_on_step(policy, actor, &record.owner_id, self.roles.as_ref()) != Some(true) {
            return Ok(DecisionOutcome::Unauthorized { request_id: request.id });
        }
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());
        if comment.is_none()
            && matches!(
                action,
                ApprovalAction::Reject | ApprovalAction::RequestChanges
            )
        {
            return Ok(DecisionOutcome::CommentRequired { request_id: request.id });
        }

        match action {
            ApprovalAction::Approve if request.current_step + 1 < request.total_steps => {
                let mut next = request.clone();
                next.current_step += 1;
                next.updated_at = TimeStamp::now();
                if !self.swap_request(&request, &next)? {
                    return Ok(DecisionOutcome::Conflict { request_id: request.id });
                }
                self.append_decision(&request, actor, action, comment)?;
                debug!(request_id = %request.id, step = next.current_step, "approval advanced");
                Ok(DecisionOutcome::StepAdvanced {
                    request_id: request.id,
                    current_step: next.current_step,
                })
            }
            ApprovalAction::Approve => {
                // claim finality first; of two racing approvers exactly one
                // proceeds to apply the transition
                let mut claimed = request.clone();
                claimed.status = ApprovalStatus::Approved;
                claimed.updated_at = TimeStamp::now();
                if !self.swap_request(&request, &claimed)? {
                    return Ok(DecisionOutcome::Conflict { request_id: request.id });
                }
                self.append_decision(&request, actor, action, comment)?;

                match self.apply_transition(&claimed, record, actor)? {
                    ApplyResult::Committed => {
                        self.audit_resolved(&claimed, actor);
                        Ok(DecisionOutcome::Applied {
                            request_id: claimed.id,
                        })
                    }
                    ApplyResult::Stale(errors) => {
                        // data changed since the request was created; hand
                        // control back to the requester
                        let mut stale = claimed.clone();
                        stale.status = ApprovalStatus::ChangesRequested;
                        stale.updated_at = TimeStamp::now();
                        self.swap_request(&claimed, &stale)?;
                        self.audit_resolved(&stale, actor);
                        Ok(DecisionOutcome::ChangesRequested {
                            request_id: stale.id,
                            errors,
                        })
                    }
                }
            }
            ApprovalAction::Reject => {
                let mut rejected = request.clone();
                rejected.status = ApprovalStatus::Rejected;
                rejected.updated_at = TimeStamp::now();
                if !self.swap_request(&request, &rejected)? {
                    return Ok(DecisionOutcome::Conflict { request_id: request.id });
                }
                self.append_decision(&request, actor, action, comment)?;
                self.audit_resolved(&rejected, actor);
                Ok(DecisionOutcome::Rejected {
                    request_id: rejected.id,
                })
            }
            ApprovalAction::RequestChanges => {
                let mut changes = request.clone();
                changes.status = ApprovalStatus::ChangesRequested;
                changes.updated_at = TimeStamp::now();
                if !self.swap_request(&request, &changes)? {
                    return Ok(DecisionOutcome::Conflict { request_id: request.id });
                }
                self.append_decision(&request, actor, action, comment)?;
                self.audit_resolved(&changes, actor);
                Ok(DecisionOutcome::ChangesRequested {
                    request_id: changes.id,
                    errors: vec![],
                })
            }
        }
    }

    /// Applies `act` independently per id; one item's failure never blocks
    /// or rolls back the others.
    pub fn bulk_act(
        &self,
        request_ids: &[String],
        actor: &str,
        action: ApprovalAction,
        comment: Option<&str>,
    ) -> Vec<DecisionOutcome> {
        request_ids
            .iter()
            .map(|id| match self.act(id, actor, action, comment) {
                Ok(outcome) => outcome,
                Err(e) => DecisionOutcome::Failed {
                    request_id: id.clone(),
                    error: e.to_string(),
                },
            })
            .collect()
    }

    /// Inbox query. Resolving "assigned to me" is per-request work; an item
    /// whose policy cannot be resolved is excluded rather than an error.
    pub fn list(&self, filter: &ApprovalFilter) -> anyhow::Result<Vec<ApprovalRequest>> {
        let mut requests = Vec::new();
        for entry in self.approvals.iter() {
            let (_, bytes) = entry?;
            let req: ApprovalRequest = utils::from_cbor(&bytes)?;
            if filter.status.is_some_and(|s| s != req.status) {
                continue;
            }
            if filter
                .module_id
                .as_deref()
                .is_some_and(|m| m != req.module_id)
            {
                continue;
            }
            if filter
                .requested_by
                .as_deref()
                .is_some_and(|u| u != req.requested_by)
            {
                continue;
            }
            if let Some(actor) = filter.assigned_to.as_deref() {
                if !req.is_pending() {
                    continue;
                }
                let Some(record) = self.store.get(&req.record_id)? else {
                    continue;
                };
                let assigned = req.current_policy().and_then(|policy| {
                    can_act_on_step(policy, actor, &record.owner_id, self.roles.as_ref())
                });
                if assigned != Some(true) {
                    continue;
                }
            }
            requests.push(req);
        }
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }

    /// Requester-initiated withdrawal of a pending request.
    pub fn cancel(&self, request_id: &str, actor: &str) -> anyhow::Result<DecisionOutcome> {
        self.terminate(request_id, Some(actor), ApprovalStatus::Cancelled)
    }

    /// Collaborator-triggered expiry; the engine accepts the transition but
    /// never initiates it.
    pub fn expire(&self, request_id: &str) -> anyhow::Result<DecisionOutcome> {
        self.terminate(request_id, None, ApprovalStatus::Expired)
    }

    fn terminate(
        &self,
        request_id: &str,
        requester_only: Option<&str>,
        status: ApprovalStatus,
    ) -> anyhow::Result<DecisionOutcome> {
        let Some(request) = self.request(request_id)? else {
            return Ok(DecisionOutcome::NotFound {
                request_id: request_id.to_string(),
            });
        };
        if !request.is_pending() {
            return Ok(DecisionOutcome::NotPending {
                request_id: request.id,
                status: request.status,
            });
        }
        if let Some(actor) = requester_only
            && actor != request.requested_by
        {
            return Ok(DecisionOutcome::Unauthorized { request_id: request.id });
        }
        let mut closed = request.clone();
        closed.status = status;
        closed.updated_at = TimeStamp::now();
        if !self.swap_request(&request, &closed)? {
            return Ok(DecisionOutcome::Conflict { request_id: request.id });
        }
        let actor = requester_only.unwrap_or("system");
        self.audit_resolved(&closed, actor);
        Ok(match status {
            ApprovalStatus::Cancelled => DecisionOutcome::Cancelled { request_id: closed.id },
            _ => DecisionOutcome::ExpiredNow { request_id: closed.id },
        })
    }

    pub fn decisions_for(&self, request_id: &str) -> anyhow::Result<Vec<ApprovalDecision>> {
        let mut decisions = Vec::new();
        for entry in self.decisions.scan_prefix(format!("{request_id}/").as_bytes()) {
            let (_, bytes) = entry?;
            decisions.push(utils::from_cbor(&bytes)?);
        }
        Ok(decisions)
    }

    fn append_decision(
        &self,
        request: &ApprovalRequest,
        actor: &str,
        action: ApprovalAction,
        comment: Option<&str>,
    ) -> anyhow::Result<()> {
        let seq = self
            .decisions
            .scan_prefix(format!("{}/", request.id).as_bytes())
            .count();
        let decision = ApprovalDecision {
            id: utils::new_uuid_to_bech32("dec_")?,
            request_id: request.id.clone(),
            step_index: request.current_step,
            actor: actor.to_string(),
            action: action.into(),
            comment: comment.map(str::to_string),
            decided_at: TimeStamp::now(),
        };
        let key = format!("{}/{:06}", request.id, seq);
        self.decisions
            .insert(key.as_bytes(), utils::to_cbor(&decision)?)?;
        Ok(())
    }

    fn swap_request(
        &self,
        before: &ApprovalRequest,
        after: &ApprovalRequest,
    ) -> anyhow::Result<bool> {
        let old = utils::to_cbor(before)?;
        let new = utils::to_cbor(after)?;
        let swapped = self.approvals.compare_and_swap(
            before.id.as_bytes(),
            Some(old.as_slice()),
            Some(new.as_slice()),
        )?;
        Ok(swapped.is_ok())
    }

    /// Commits the captured transition after the final approval. The
    /// approval requirement itself is settled; field validation is not, so
    /// it reruns against current data. Any staleness (validation failures,
    /// the record having left the source stage, a lost write race) hands
    /// control back to the requester.
    fn apply_transition(
        &self,
        request: &ApprovalRequest,
        record: Record,
        actor: &str,
    ) -> anyhow::Result<ApplyResult> {
        let module = self.catalog.require_module(&request.module_id)?;
        let ctx = &request.context;
        let mut current = record;

        for _ in 0..3 {
            if current.stage != ctx.stage_from {
                return Ok(ApplyResult::Stale(vec![ValidationFailure {
                    field: String::new(),
                    rule_id: String::new(),
                    message: format!(
                        "record left stage {} while approval was pending",
                        ctx.stage_from
                    ),
                }]));
            }
            let failures = self.rules.validate(
                &module,
                Trigger::StageChange,
                &current.fields,
                &ctx.payload,
                &StoreProbe(self.store.as_ref()),
                Some(&current.id),
            )?;
            if !failures.is_empty() {
                return Ok(ApplyResult::Stale(failures));
            }

            let mut after = current.clone();
            after.fields = current.merged_fields(&ctx.payload);
            after.stage = ctx.stage_to.clone();
            if let Some(committed) = self.store.commit_guarded(&current, after)? {
                self.audit.append(AuditEvent::StageChanged {
                    record_id: committed.id.clone(),
                    module_id: committed.module_id.clone(),
                    old_stage: ctx.stage_from.clone(),
                    new_stage: ctx.stage_to.clone(),
                    actor: actor.to_string(),
                    reason: ctx.reason.clone(),
                    at: TimeStamp::now(),
                });
                debug!(record_id = %committed.id, to = %ctx.stage_to, "approved transition committed");
                return Ok(ApplyResult::Committed);
            }
            // lost a write race, re-read and retry
            let Some(fresh) = self.store.get(&current.id)? else {
                return Err(EngineError::RecordNotFound(current.id.clone()).into());
            };
            current = fresh;
        }
        Ok(ApplyResult::Stale(vec![ValidationFailure {
            field: String::new(),
            rule_id: String::new(),
            message: "record kept changing while applying the approval".into(),
        }]))
    }

    fn audit_resolved(&self, request: &ApprovalRequest, actor: &str) {
        self.audit.append(AuditEvent::ApprovalResolved {
            request_id: request.id.clone(),
            record_id: request.record_id.clone(),
            module_id: request.module_id.clone(),
            outcome: request.status.as_str().to_string(),
            actor: actor.to_string(),
            at: TimeStamp::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_user_policy_matches_exactly() {
        let roles = StaticRoles::new();
        let policy = ApproverPolicy::User("alice".into());
        assert_eq!(can_act_on_step(&policy, "alice", "owner", &roles), Some(true));
        assert_eq!(can_act_on_step(&policy, "bob", "owner", &roles), Some(false));
    }

    #[test]
    fn role_policy_consults_resolver() {
        let roles = StaticRoles::new().with_role("bob", "sales_manager");
        let policy = ApproverPolicy::Role("sales_manager".into());
        assert_eq!(can_act_on_step(&policy, "bob", "owner", &roles), Some(true));
        assert_eq!(can_act_on_step(&policy, "alice", "owner", &roles), Some(false));
    }

    #[test]
    fn manager_policy_is_unresolved_without_reporting_line() {
        let roles = StaticRoles::new().with_manager("owner", "carol");
        let policy = ApproverPolicy::RecordOwnerManager;
        assert_eq!(can_act_on_step(&policy, "carol", "owner", &roles), Some(true));
        assert_eq!(can_act_on_step(&policy, "dave", "owner", &roles), Some(false));
        // no manager on file: unresolved, not false
        assert_eq!(can_act_on_step(&policy, "carol", "orphan", &roles), None);
    }

    #[test]
    fn step_snapshot_is_owned_by_the_request() {
        let process = ApprovalProcess::new("p1", "Two step")
            .with_step("first", ApproverPolicy::User("alice".into()))
            .with_step("second", ApproverPolicy::User("bob".into()));
        let steps = process.steps.clone();

        // mutating the definition does not reach the snapshot
        let mut edited = process;
        edited.steps.clear();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].policy, ApproverPolicy::User("alice".into()));
    }
}
