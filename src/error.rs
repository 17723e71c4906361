//! Engine fault types. Expected denial conditions are typed outcomes on the
//! gate and approval APIs, never errors; these variants cover configuration
//! and infrastructure faults only.

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("module is not defined: {0}")]
    UnknownModule(String),
    #[error("no blueprint configured for module: {0}")]
    MissingBlueprint(String),
    #[error("record not found: {0}")]
    RecordNotFound(String),
    #[error("approval process not found: {0}")]
    UnknownProcess(String),
    #[error("transition misconfigured: {0}")]
    MisconfiguredTransition(String),
    #[error("storage failure: {0}")]
    Store(#[from] sled::Error),
    #[error("encode failure: {0}")]
    Encode(String),
    #[error("decode failure: {0}")]
    Decode(String),
}

/// Blueprint definitions are validated on save; a broken graph never reaches
/// the gate.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BlueprintConfigError {
    #[error("duplicate stage key: {0}")]
    DuplicateStage(String),
    #[error("transition references unknown stage: {0}")]
    UnknownStageRef(String),
    #[error("duplicate transition: {from} -> {to}")]
    DuplicateEdge { from: String, to: String },
    #[error("blueprint has no stages")]
    NoStages,
}
