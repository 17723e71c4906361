//! Module metadata and the per-module blueprint state machine.
//!
//! A blueprint is a directed stage graph. Absence of a configured edge is a
//! hard deny; the machine never infers transitions from stage order. Stage
//! labels and colors are display metadata and are not evaluated here.

use sled::Db;
use std::sync::Arc;

use crate::error::{BlueprintConfigError, EngineError};
use crate::types::FieldValue;
use crate::utils;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    #[n(0)]
    Text,
    #[n(1)]
    Number,
    #[n(2)]
    Select,
    #[n(3)]
    Textarea,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct FieldDef {
    #[n(0)]
    pub key: String,
    #[n(1)]
    pub label: String,
    #[n(2)]
    pub field_type: FieldType,
}

/// A record type (e.g. "Leads", "Deals") owning a blueprint. Identity is
/// immutable, field metadata is editable by an administrator.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ModuleDef {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub label: String,
    #[n(2)]
    pub fields: Vec<FieldDef>,
}

impl ModuleDef {
    pub fn field(&self, key: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.key == key)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Stage {
    #[n(0)]
    pub key: String,
    #[n(1)]
    pub label: String,
    #[n(2)]
    pub color: String,
}

/// A field the transition demands a value for. `value` carries the record's
/// current value when transitions are listed, so a caller can pre-fill its
/// form.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct FieldRequirement {
    #[n(0)]
    pub key: String,
    #[n(1)]
    pub label: String,
    #[n(2)]
    pub field_type: FieldType,
    #[n(3)]
    pub value: Option<FieldValue>,
}

impl FieldRequirement {
    pub fn new(key: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            field_type,
            value: None,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Transition {
    #[n(0)]
    pub from_stage: String,
    #[n(1)]
    pub to_stage: String,
    #[n(2)]
    pub required_fields: Vec<FieldRequirement>,
    #[n(3)]
    pub requires_approval: bool,
    #[n(4)]
    pub require_reason: bool,
    #[n(5)]
    pub approval_process_id: Option<String>,
}

impl Transition {
    pub fn new(from_stage: impl Into<String>, to_stage: impl Into<String>) -> Self {
        Self {
            from_stage: from_stage.into(),
            to_stage: to_stage.into(),
            required_fields: vec![],
            requires_approval: false,
            require_reason: false,
            approval_process_id: None,
        }
    }
    pub fn with_required_field(mut self, req: FieldRequirement) -> Self {
        self.required_fields.push(req);
        self
    }
    pub fn with_approval(mut self, process_id: impl Into<String>) -> Self {
        self.requires_approval = true;
        self.approval_process_id = Some(process_id.into());
        self
    }
    pub fn with_reason_required(mut self) -> Self {
        self.require_reason = true;
        self
    }
}

/// Why the state machine denied a transition. Non-retriable without
/// reconfiguring the blueprint.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    #[error("stage does not exist: {0}")]
    UnknownStage(String),
    #[error("stage is terminal: {0}")]
    TerminalStage(String),
    #[error("no transition configured from {from} to {to}")]
    NoEdge { from: String, to: String },
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Blueprint {
    #[n(0)]
    pub module_id: String,
    #[n(1)]
    pub stages: Vec<Stage>,
    #[n(2)]
    pub transitions: Vec<Transition>,
}

impl Blueprint {
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            stages: vec![],
            transitions: vec![],
        }
    }
    pub fn with_stage(
        mut self,
        key: impl Into<String>,
        label: impl Into<String>,
        color: impl Into<String>,
    ) -> Self {
        self.stages.push(Stage {
            key: key.into(),
            label: label.into(),
            color: color.into(),
        });
        self
    }
    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn stage(&self, key: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.key == key)
    }

    /// Records created under this blueprint start in the first stage.
    pub fn initial_stage(&self) -> Option<&Stage> {
        self.stages.first()
    }

    /// A stage with no outgoing transitions is terminal.
    pub fn is_terminal(&self, key: &str) -> bool {
        !self.transitions.iter().any(|t| t.from_stage == key)
    }

    pub fn available_transitions(&self, from: &str) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.from_stage == from)
            .collect()
    }

    pub fn check_transition(&self, from: &str, to: &str) -> Result<&Transition, DenyReason> {
        if self.stage(to).is_none() {
            return Err(DenyReason::UnknownStage(to.to_string()));
        }
        if self.stage(from).is_none() {
            return Err(DenyReason::UnknownStage(from.to_string()));
        }
        if self.is_terminal(from) {
            return Err(DenyReason::TerminalStage(from.to_string()));
        }
        self.transitions
            .iter()
            .find(|t| t.from_stage == from && t.to_stage == to)
            .ok_or(DenyReason::NoEdge {
                from: from.to_string(),
                to: to.to_string(),
            })
    }

    /// Referential checks run on save so a broken graph never reaches the
    /// gate.
    pub fn validate(&self) -> Result<(), BlueprintConfigError> {
        if self.stages.is_empty() {
            return Err(BlueprintConfigError::NoStages);
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if self.stages[..i].iter().any(|s| s.key == stage.key) {
                return Err(BlueprintConfigError::DuplicateStage(stage.key.clone()));
            }
        }
        for (i, t) in self.transitions.iter().enumerate() {
            for key in [&t.from_stage, &t.to_stage] {
                if self.stage(key).is_none() {
                    return Err(BlueprintConfigError::UnknownStageRef(key.clone()));
                }
            }
            if self.transitions[..i]
                .iter()
                .any(|p| p.from_stage == t.from_stage && p.to_stage == t.to_stage)
            {
                return Err(BlueprintConfigError::DuplicateEdge {
                    from: t.from_stage.clone(),
                    to: t.to_stage.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Sled-backed lookup for module metadata and blueprints. Edits take effect
/// on the next gate call; in-flight approval requests keep their own
/// snapshot of the transition they were created against.
#[derive(Clone)]
pub struct Catalog {
    modules: sled::Tree,
    blueprints: sled::Tree,
}

impl Catalog {
    pub fn open(db: &Arc<Db>) -> Result<Self, EngineError> {
        Ok(Self {
            modules: db.open_tree("modules")?,
            blueprints: db.open_tree("blueprints")?,
        })
    }

    pub fn define_module(&self, module: &ModuleDef) -> anyhow::Result<()> {
        self.modules
            .insert(module.id.as_bytes(), utils::to_cbor(module)?)?;
        Ok(())
    }

    pub fn module(&self, id: &str) -> Result<Option<ModuleDef>, EngineError> {
        self.modules
            .get(id.as_bytes())?
            .map(|bytes| utils::from_cbor(&bytes))
            .transpose()
    }

    pub fn require_module(&self, id: &str) -> Result<ModuleDef, EngineError> {
        self.module(id)?
            .ok_or_else(|| EngineError::UnknownModule(id.to_string()))
    }

    pub fn define_blueprint(&self, blueprint: &Blueprint) -> anyhow::Result<()> {
        blueprint.validate()?;
        self.blueprints
            .insert(blueprint.module_id.as_bytes(), utils::to_cbor(blueprint)?)?;
        Ok(())
    }

    pub fn blueprint(&self, module_id: &str) -> Result<Option<Blueprint>, EngineError> {
        self.blueprints
            .get(module_id.as_bytes())?
            .map(|bytes| utils::from_cbor(&bytes))
            .transpose()
    }

    pub fn require_blueprint(&self, module_id: &str) -> Result<Blueprint, EngineError> {
        self.blueprint(module_id)?
            .ok_or_else(|| EngineError::MissingBlueprint(module_id.to_string()))
    }
}
