//! The validation rule engine: loads the enabled rules for a module, runs
//! each through the evaluator and aggregates every failure so a caller can
//! present all problems at once. Never fail-fast.

use sled::Db;
use std::sync::Arc;
use tracing::warn;

use crate::blueprint::ModuleDef;
use crate::rules::{self, RuleVerdict, UniqueProbe, ValidationRule};
use crate::types::{FieldMap, Trigger};
use crate::utils;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub field: String,
    pub rule_id: String,
    pub message: String,
}

#[derive(Clone)]
pub struct RuleEngine {
    tree: sled::Tree,
}

impl RuleEngine {
    pub fn open(db: &Arc<Db>) -> anyhow::Result<Self> {
        Ok(Self {
            tree: db.open_tree("rules")?,
        })
    }

    pub fn upsert(&self, rule: &ValidationRule) -> anyhow::Result<()> {
        let key = format!("{}/{}", rule.module_id, rule.id);
        self.tree.insert(key.as_bytes(), utils::to_cbor(rule)?)?;
        Ok(())
    }

    pub fn remove(&self, module_id: &str, rule_id: &str) -> anyhow::Result<()> {
        let key = format!("{module_id}/{rule_id}");
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }

    /// Enabled rules for the module, priority ascending, creation order
    /// breaking ties.
    pub fn rules_for(&self, module_id: &str) -> anyhow::Result<Vec<ValidationRule>> {
        let mut rules = Vec::new();
        for entry in self.tree.scan_prefix(format!("{module_id}/").as_bytes()) {
            let (_, bytes) = entry?;
            let rule: ValidationRule = utils::from_cbor(&bytes)?;
            if rule.is_enabled {
                rules.push(rule);
            }
        }
        rules.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(rules)
    }

    /// Runs every applicable rule against `snapshot` with `changed` layered
    /// on top. Returns the complete failure list. A rule targeting a field
    /// the module does not define, or one whose config cannot be evaluated,
    /// is a configuration problem: logged and skipped, never a failure.
    pub fn validate(
        &self,
        module: &ModuleDef,
        trigger: Trigger,
        snapshot: &FieldMap,
        changed: &FieldMap,
        probe: &dyn UniqueProbe,
        exclude_record: Option<&str>,
    ) -> anyhow::Result<Vec<ValidationFailure>> {
        let mut merged = snapshot.clone();
        for (k, v) in changed {
            merged.insert(k.clone(), v.clone());
        }

        let mut failures = Vec::new();
        for rule in self.rules_for(&module.id)? {
            if !rule.applies_to(trigger) {
                continue;
            }
            if module.field(&rule.target_field).is_none() {
                warn!(
                    rule_id = %rule.id,
                    module = %module.id,
                    field = %rule.target_field,
                    "rule targets a field the module does not define, skipping"
                );
                continue;
            }
            let value = merged.get(&rule.target_field);
            match rules::evaluate(&rule, value, &merged, probe, exclude_record)? {
                RuleVerdict::Pass => {}
                RuleVerdict::Fail(message) => failures.push(ValidationFailure {
                    field: rule.target_field.clone(),
                    rule_id: rule.id.clone(),
                    message,
                }),
                RuleVerdict::Misconfigured(detail) => {
                    warn!(rule_id = %rule.id, module = %module.id, %detail, "unevaluable rule skipped");
                }
            }
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{FieldDef, FieldType};
    use crate::rules::{FormatKind, RuleKind};
    use crate::types::FieldValue;
    use tempfile::tempdir;

    struct NoDupes;
    impl UniqueProbe for NoDupes {
        fn exists_with_value(
            &self,
            _: &str,
            _: &str,
            _: &FieldValue,
            _: Option<&str>,
            _: bool,
        ) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    fn deals_module() -> ModuleDef {
        ModuleDef {
            id: "deals".into(),
            label: "Deals".into(),
            fields: vec![
                FieldDef {
                    key: "email".into(),
                    label: "Email".into(),
                    field_type: FieldType::Text,
                },
                FieldDef {
                    key: "discount_pct".into(),
                    label: "Discount %".into(),
                    field_type: FieldType::Number,
                },
            ],
        }
    }

    fn open_engine() -> (tempfile::TempDir, RuleEngine) {
        let dir = tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("rules.db")).unwrap());
        (dir, RuleEngine::open(&db).unwrap())
    }

    #[test]
    fn all_failures_are_returned_in_one_pass() {
        let (_dir, engine) = open_engine();
        let module = deals_module();

        // three independently failing rules on one field
        engine
            .upsert(
                &ValidationRule::new(
                    "deals",
                    "email",
                    RuleKind::Format {
                        format: FormatKind::Email,
                        pattern: None,
                    },
                    "not an email",
                )
                .unwrap()
                .with_priority(1),
            )
            .unwrap();
        engine
            .upsert(
                &ValidationRule::new(
                    "deals",
                    "email",
                    RuleKind::Format {
                        format: FormatKind::Alphanumeric,
                        pattern: None,
                    },
                    "not alphanumeric",
                )
                .unwrap()
                .with_priority(2),
            )
            .unwrap();
        engine
            .upsert(
                &ValidationRule::new(
                    "deals",
                    "email",
                    RuleKind::Range {
                        min: Some(0.0),
                        max: None,
                    },
                    "not a number",
                )
                .unwrap()
                .with_priority(3),
            )
            .unwrap();

        let mut changed = FieldMap::new();
        changed.insert("email".into(), FieldValue::text("@@@"));
        let failures = engine
            .validate(
                &module,
                Trigger::StageChange,
                &FieldMap::new(),
                &changed,
                &NoDupes,
                None,
            )
            .unwrap();

        // no early exit: every failure comes back, ordered by priority
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0].message, "not an email");
        assert_eq!(failures[1].message, "not alphanumeric");
        assert_eq!(failures[2].message, "not a number");
    }

    #[test]
    fn disabled_rules_are_never_evaluated() {
        let (_dir, engine) = open_engine();
        let module = deals_module();
        engine
            .upsert(
                &ValidationRule::new("deals", "email", RuleKind::RequiredIf, "email required")
                    .unwrap()
                    .disabled(),
            )
            .unwrap();

        let failures = engine
            .validate(
                &module,
                Trigger::StageChange,
                &FieldMap::new(),
                &FieldMap::new(),
                &NoDupes,
                None,
            )
            .unwrap();
        assert!(failures.is_empty());
    }

    #[test]
    fn rule_on_unknown_field_is_skipped_not_fatal() {
        let (_dir, engine) = open_engine();
        let module = deals_module();
        engine
            .upsert(
                &ValidationRule::new("deals", "ghost_field", RuleKind::RequiredIf, "ghost").unwrap(),
            )
            .unwrap();
        engine
            .upsert(
                &ValidationRule::new("deals", "email", RuleKind::RequiredIf, "email required")
                    .unwrap(),
            )
            .unwrap();

        let failures = engine
            .validate(
                &module,
                Trigger::StageChange,
                &FieldMap::new(),
                &FieldMap::new(),
                &NoDupes,
                None,
            )
            .unwrap();
        // the misconfigured rule is invisible; the real one still runs
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].field, "email");
    }

    #[test]
    fn trigger_filter_applies() {
        let (_dir, engine) = open_engine();
        let module = deals_module();
        engine
            .upsert(
                &ValidationRule::new("deals", "email", RuleKind::RequiredIf, "email required")
                    .unwrap()
                    .only_on(Trigger::Create),
            )
            .unwrap();

        let on_stage_change = engine
            .validate(
                &module,
                Trigger::StageChange,
                &FieldMap::new(),
                &FieldMap::new(),
                &NoDupes,
                None,
            )
            .unwrap();
        assert!(on_stage_change.is_empty());

        let on_create = engine
            .validate(
                &module,
                Trigger::Create,
                &FieldMap::new(),
                &FieldMap::new(),
                &NoDupes,
                None,
            )
            .unwrap();
        assert_eq!(on_create.len(), 1);
    }
}
