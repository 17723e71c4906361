//! Record lifecycle gating and approval workflow engine.
//!
//! Records move between named stages only through transitions their
//! module's blueprint permits. The gate decides, per attempt, whether the
//! move is structurally legal, whether field validation passes, and whether
//! it needs human approval; multi-step approvals are recorded as append-only
//! decisions and applied back through the same commit path once resolved.

pub mod approval;
pub mod audit;
pub mod blueprint;
pub mod error;
pub mod gate;
pub mod rules;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
pub mod validation;
