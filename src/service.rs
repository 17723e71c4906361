//! Service layer API for record lifecycle workflow operations

use sled::Db;
use std::sync::Arc;

use crate::approval::{
    ApprovalAction, ApprovalEngine, ApprovalFilter, ApprovalProcess, ApprovalRequest,
    ApprovalDecision, DecisionOutcome, RoleResolver,
};
use crate::audit::{AuditSink, SledAuditSink};
use crate::blueprint::{Blueprint, Catalog, ModuleDef, Transition};
use crate::error::EngineError;
use crate::gate::{GateMode, TransitionGate, TransitionOutcome};
use crate::rules::ValidationRule;
use crate::store::{Record, RecordStore, SledRecordStore, StoreProbe};
use crate::types::{FieldMap, Trigger};
use crate::validation::{RuleEngine, ValidationFailure};

/// Outcome of creating or editing a record outside a stage transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(Record),
    ValidationFailed(Vec<ValidationFailure>),
    /// The record changed underneath the edit. Retriable after re-reading.
    Conflict,
}

pub struct WorkflowService {
    catalog: Catalog,
    rules: RuleEngine,
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditSink>,
    approvals: ApprovalEngine,
}

impl WorkflowService {
    pub fn new(instance: Arc<Db>, roles: Arc<dyn RoleResolver>) -> anyhow::Result<Self> {
        let audit: Arc<dyn AuditSink> = Arc::new(SledAuditSink::open(&instance)?);
        Self::with_audit(instance, roles, audit)
    }

    /// Wire a custom audit sink (tests use the in-memory one).
    pub fn with_audit(
        instance: Arc<Db>,
        roles: Arc<dyn RoleResolver>,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self> {
        let catalog = Catalog::open(&instance)?;
        let rules = RuleEngine::open(&instance)?;
        let store: Arc<dyn RecordStore> = Arc::new(SledRecordStore::open(&instance)?);
        let approvals = ApprovalEngine::open(
            &instance,
            store.clone(),
            roles,
            audit.clone(),
            rules.clone(),
            catalog.clone(),
        )?;
        Ok(Self {
            catalog,
            rules,
            store,
            audit,
            approvals,
        })
    }

    fn gate(&self) -> TransitionGate<'_> {
        TransitionGate {
            catalog: &self.catalog,
            rules: &self.rules,
            store: self.store.as_ref(),
            approvals: &self.approvals,
            audit: self.audit.as_ref(),
        }
    }

    // configuration surface

    pub fn define_module(&self, module: &ModuleDef) -> anyhow::Result<()> {
        self.catalog.define_module(module)
    }

    pub fn define_blueprint(&self, blueprint: &Blueprint) -> anyhow::Result<()> {
        self.catalog.define_blueprint(blueprint)
    }

    pub fn define_process(&self, process: &ApprovalProcess) -> anyhow::Result<()> {
        self.approvals.define_process(process)
    }

    pub fn upsert_rule(&self, rule: &ValidationRule) -> anyhow::Result<()> {
        self.rules.upsert(rule)
    }

    pub fn remove_rule(&self, module_id: &str, rule_id: &str) -> anyhow::Result<()> {
        self.rules.remove(module_id, rule_id)
    }

    // records

    /// New records start in the blueprint's first stage, after create-time
    /// validation.
    pub fn create_record(
        &self,
        module_id: &str,
        owner_id: &str,
        fields: FieldMap,
    ) -> anyhow::Result<SaveOutcome> {
        let module = self.catalog.require_module(module_id)?;
        let blueprint = self.catalog.require_blueprint(module_id)?;
        let initial = blueprint
            .initial_stage()
            .ok_or_else(|| EngineError::MissingBlueprint(module_id.to_string()))?;

        let errors = self.rules.validate(
            &module,
            Trigger::Create,
            &FieldMap::new(),
            &fields,
            &StoreProbe(self.store.as_ref()),
            None,
        )?;
        if !errors.is_empty() {
            return Ok(SaveOutcome::ValidationFailed(errors));
        }

        let record = Record::new(module_id, initial.key.clone(), owner_id, fields)?;
        self.store.insert_new(&record)?;
        Ok(SaveOutcome::Saved(record))
    }

    /// Field edit outside a transition; stage is untouched.
    pub fn update_record(&self, record_id: &str, fields: FieldMap) -> anyhow::Result<SaveOutcome> {
        let Some(record) = self.store.get(record_id)? else {
            return Err(EngineError::RecordNotFound(record_id.to_string()).into());
        };
        let module = self.catalog.require_module(&record.module_id)?;

        let errors = self.rules.validate(
            &module,
            Trigger::Update,
            &record.fields,
            &fields,
            &StoreProbe(self.store.as_ref()),
            Some(&record.id),
        )?;
        if !errors.is_empty() {
            return Ok(SaveOutcome::ValidationFailed(errors));
        }

        let mut after = record.clone();
        after.fields = record.merged_fields(&fields);
        Ok(match self.store.commit_guarded(&record, after)? {
            Some(saved) => SaveOutcome::Saved(saved),
            None => SaveOutcome::Conflict,
        })
    }

    pub fn get_record(&self, record_id: &str) -> anyhow::Result<Option<Record>> {
        self.store.get(record_id)
    }

    // engine-facing operations

    /// The transitions available from the record's current stage, with
    /// requirement values pre-filled for form rendering.
    pub fn available_transitions(&self, record_id: &str) -> anyhow::Result<Vec<Transition>> {
        let Some(record) = self.store.get(record_id)? else {
            return Err(EngineError::RecordNotFound(record_id.to_string()).into());
        };
        let module = self.catalog.require_module(&record.module_id)?;
        let blueprint = self.catalog.require_blueprint(&record.module_id)?;

        let mut transitions: Vec<Transition> = blueprint
            .available_transitions(&record.stage)
            .into_iter()
            .cloned()
            .collect();
        for transition in &mut transitions {
            for req in &mut transition.required_fields {
                req.value = record.field(&req.key).cloned();
                if req.label.is_empty()
                    && let Some(field) = module.field(&req.key)
                {
                    req.label = field.label.clone();
                }
            }
        }
        Ok(transitions)
    }

    /// Runs every gate check without committing. Safe to repeat.
    pub fn preview_transition(
        &self,
        record_id: &str,
        to_stage: &str,
        payload: &FieldMap,
        reason: Option<&str>,
        actor: &str,
    ) -> anyhow::Result<TransitionOutcome> {
        self.gate()
            .request(record_id, to_stage, payload, reason, actor, GateMode::Preview)
    }

    /// May commit the stage change or create an approval request.
    pub fn execute_transition(
        &self,
        record_id: &str,
        to_stage: &str,
        payload: &FieldMap,
        reason: Option<&str>,
        actor: &str,
    ) -> anyhow::Result<TransitionOutcome> {
        self.gate()
            .request(record_id, to_stage, payload, reason, actor, GateMode::Execute)
    }

    // approvals

    pub fn list_approvals(&self, filter: &ApprovalFilter) -> anyhow::Result<Vec<ApprovalRequest>> {
        self.approvals.list(filter)
    }

    pub fn approval(&self, request_id: &str) -> anyhow::Result<Option<ApprovalRequest>> {
        self.approvals.request(request_id)
    }

    pub fn decide(
        &self,
        request_id: &str,
        actor: &str,
        action: ApprovalAction,
        comment: Option<&str>,
    ) -> anyhow::Result<DecisionOutcome> {
        self.approvals.act(request_id, actor, action, comment)
    }

    pub fn bulk_decide(
        &self,
        request_ids: &[String],
        actor: &str,
        action: ApprovalAction,
        comment: Option<&str>,
    ) -> Vec<DecisionOutcome> {
        self.approvals.bulk_act(request_ids, actor, action, comment)
    }

    pub fn cancel_approval(&self, request_id: &str, actor: &str) -> anyhow::Result<DecisionOutcome> {
        self.approvals.cancel(request_id, actor)
    }

    pub fn expire_approval(&self, request_id: &str) -> anyhow::Result<DecisionOutcome> {
        self.approvals.expire(request_id)
    }

    pub fn decisions_for(&self, request_id: &str) -> anyhow::Result<Vec<ApprovalDecision>> {
        self.approvals.decisions_for(request_id)
    }
}
