//! Property-based tests for the rule evaluator.
//!
//! The evaluator is the innermost gate component; a bug here silently lets
//! bad data through every transition. These properties hold for arbitrary
//! rule configs and values, catching edge cases manual case selection would
//! miss.
//!
//! What these tests DON'T cover (deliberately):
//!
//! - Persistence and rule loading order (integration scenarios cover those)
//! - Uniqueness against a real store (needs a database, covered elsewhere)

use proptest::prelude::*;

use blueprint_gate::rules::{
    self, CompareOp, Condition, ConditionGroup, ConditionOp, FormatKind, RuleKind, RuleVerdict,
    UniqueProbe, ValidationRule,
};
use blueprint_gate::types::{FieldMap, FieldValue};

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

fn rule(kind: RuleKind) -> ValidationRule {
    ValidationRule::new("deals", "field", kind, "violated").unwrap()
}

fn eval(r: &ValidationRule, value: Option<&FieldValue>, values: &FieldMap) -> RuleVerdict {
    rules::evaluate(r, value, values, &NoDupes, None).unwrap()
}

/// Strategy for a finite, comfortably-representable f64
fn small_f64() -> impl Strategy<Value = f64> {
    (-1_000_000i64..1_000_000i64).prop_map(|n| n as f64)
}

/// Strategy for an ordered (min, max) bound pair
fn bound_pair() -> impl Strategy<Value = (f64, f64)> {
    (small_f64(), small_f64()).prop_map(|(a, b)| if a <= b { (a, b) } else { (b, a) })
}

proptest! {
    /// Property: a range rule passes exactly the values inside its bounds,
    /// inclusive. This is the contract the discount example in the
    /// integration suite relies on.
    #[test]
    fn prop_range_pass_iff_within_bounds(
        (min, max) in bound_pair(),
        value in small_f64(),
    ) {
        let r = rule(RuleKind::Range { min: Some(min), max: Some(max) });
        let verdict = eval(&r, Some(&FieldValue::number(value)), &FieldMap::new());

        let inside = value >= min && value <= max;
        if inside {
            prop_assert_eq!(verdict, RuleVerdict::Pass);
        } else {
            prop_assert_eq!(verdict, RuleVerdict::Fail("violated".into()));
        }
    }

    /// Property: evaluation is deterministic. The same rule and inputs must
    /// produce the same verdict every time; the gate re-runs checks freely
    /// while a form is edited.
    #[test]
    fn prop_evaluation_is_deterministic(
        (min, max) in bound_pair(),
        value in small_f64(),
    ) {
        let r = rule(RuleKind::Range { min: Some(min), max: Some(max) });
        let field_value = FieldValue::number(value);
        let empty = FieldMap::new();

        let first = eval(&r, Some(&field_value), &empty);
        let second = eval(&r, Some(&field_value), &empty);
        let third = eval(&r, Some(&field_value), &empty);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&second, &third);
    }

    /// Property: an unconditional required rule fails exactly on blank
    /// values (absent, empty, whitespace-only).
    #[test]
    fn prop_required_fails_iff_blank(text in "[ a-z]{0,12}") {
        let r = rule(RuleKind::RequiredIf);
        let value = FieldValue::text(text.clone());
        let verdict = eval(&r, Some(&value), &FieldMap::new());

        if text.trim().is_empty() {
            prop_assert_eq!(verdict, RuleVerdict::Fail("violated".into()));
        } else {
            prop_assert_eq!(verdict, RuleVerdict::Pass);
        }
    }

    /// Property: ordering comparisons agree with f64 ordering regardless of
    /// whether the compared field holds a number or numeric text.
    #[test]
    fn prop_comparison_agrees_with_numeric_order(
        left in small_f64(),
        right in small_f64(),
        as_text in any::<bool>(),
    ) {
        let r = rule(RuleKind::Comparison {
            compare_field: "other".into(),
            operator: CompareOp::Gt,
        });
        let mut values = FieldMap::new();
        let other = if as_text {
            FieldValue::text(right.to_string())
        } else {
            FieldValue::number(right)
        };
        values.insert("other".into(), other);

        let verdict = eval(&r, Some(&FieldValue::number(left)), &values);
        if left > right {
            prop_assert_eq!(verdict, RuleVerdict::Pass);
        } else {
            prop_assert_eq!(verdict, RuleVerdict::Fail("violated".into()));
        }
    }

    /// Property: integers rendered as text always satisfy the numeric
    /// format.
    #[test]
    fn prop_numeric_format_accepts_integers(n in any::<i64>()) {
        let r = rule(RuleKind::Format { format: FormatKind::Numeric, pattern: None });
        let verdict = eval(&r, Some(&FieldValue::text(n.to_string())), &FieldMap::new());
        prop_assert_eq!(verdict, RuleVerdict::Pass);
    }

    /// Property: a format rule never fails an empty value; emptiness is
    /// required_if territory.
    #[test]
    fn prop_format_ignores_blank_values(spaces in "[ ]{0,8}") {
        let r = rule(RuleKind::Format { format: FormatKind::Email, pattern: None });
        let verdict = eval(&r, Some(&FieldValue::text(spaces)), &FieldMap::new());
        prop_assert_eq!(verdict, RuleVerdict::Pass);
    }

    /// Property: a condition group is an AND; adding a failing condition to
    /// any matching group stops it matching.
    #[test]
    fn prop_condition_group_is_conjunctive(
        value in "[a-z]{1,8}",
        other in "[a-z]{1,8}",
    ) {
        let mut values = FieldMap::new();
        values.insert("status".into(), FieldValue::text(value.clone()));

        let matching = ConditionGroup::all(vec![Condition::new(
            "status",
            ConditionOp::Eq,
            Some(FieldValue::text(value.clone())),
        )]);
        prop_assert!(matching.matches(&values));

        let mut conditions = matching.all.clone();
        conditions.push(Condition::new(
            "status",
            ConditionOp::Eq,
            Some(FieldValue::text(format!("{other}_nomatch"))),
        ));
        prop_assert!(!ConditionGroup::all(conditions).matches(&values));
    }
}
