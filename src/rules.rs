//! Declarative field validation rules and their evaluator.
//!
//! Rule configs differ by shape, so each kind is a tagged variant with its
//! own evaluation arm. Evaluation is deterministic and side-effect free; the
//! only collaborator is the [`UniqueProbe`] a uniqueness rule delegates its
//! existence check to.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::{FieldMap, FieldValue, TimeStamp, Trigger, is_blank};
use crate::utils;
use chrono::Utc;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 ().\-]{5,}$").unwrap());
static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^https?://\S+$").unwrap());
static ALPHANUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").unwrap());
static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?[0-9]+(\.[0-9]+)?$").unwrap());

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    #[n(0)]
    Email,
    #[n(1)]
    Phone,
    #[n(2)]
    Url,
    #[n(3)]
    Alphanumeric,
    #[n(4)]
    Numeric,
    /// Pattern supplied on the rule config.
    #[n(5)]
    Regex,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    #[n(0)]
    Eq,
    #[n(1)]
    Ne,
    #[n(2)]
    Gt,
    #[n(3)]
    Gte,
    #[n(4)]
    Lt,
    #[n(5)]
    Lte,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    #[n(0)]
    Eq,
    #[n(1)]
    Ne,
    #[n(2)]
    Empty,
    #[n(3)]
    NotEmpty,
    #[n(4)]
    Gt,
    #[n(5)]
    Lt,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Condition {
    #[n(0)]
    pub field: String,
    #[n(1)]
    pub op: ConditionOp,
    #[n(2)]
    pub value: Option<FieldValue>,
}

/// Logical AND over member conditions. An empty group is vacuously true, so
/// a `required_if` rule with no conditions is a plain required rule.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Default)]
pub struct ConditionGroup {
    #[n(0)]
    pub all: Vec<Condition>,
}

impl ConditionGroup {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self { all: conditions }
    }

    pub fn matches(&self, values: &FieldMap) -> bool {
        self.all.iter().all(|c| c.matches(values))
    }
}

impl Condition {
    pub fn new(field: impl Into<String>, op: ConditionOp, value: Option<FieldValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    fn matches(&self, values: &FieldMap) -> bool {
        let actual = values.get(&self.field);
        match self.op {
            ConditionOp::Empty => is_blank(actual),
            ConditionOp::NotEmpty => !is_blank(actual),
            ConditionOp::Eq => match (actual, self.value.as_ref()) {
                (Some(a), Some(b)) => values_equal(a, b),
                _ => false,
            },
            ConditionOp::Ne => match (actual, self.value.as_ref()) {
                (Some(a), Some(b)) => !values_equal(a, b),
                _ => true,
            },
            ConditionOp::Gt => compare_numeric(actual, self.value.as_ref(), |a, b| a > b),
            ConditionOp::Lt => compare_numeric(actual, self.value.as_ref(), |a, b| a < b),
        }
    }
}

fn values_equal(a: &FieldValue, b: &FieldValue) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x == y,
        _ => a.as_text() == b.as_text(),
    }
}

fn compare_numeric(
    a: Option<&FieldValue>,
    b: Option<&FieldValue>,
    op: impl Fn(f64, f64) -> bool,
) -> bool {
    match (a.and_then(FieldValue::as_number), b.and_then(FieldValue::as_number)) {
        (Some(x), Some(y)) => op(x, y),
        _ => false,
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub enum RuleKind {
    /// Fails when the rule's condition group holds and the target field is
    /// blank. Emptiness of other kinds is governed here, not by them.
    #[n(0)]
    RequiredIf,
    #[n(1)]
    Format {
        #[n(0)]
        format: FormatKind,
        #[n(1)]
        pattern: Option<String>,
    },
    #[n(2)]
    Range {
        #[n(0)]
        min: Option<f64>,
        #[n(1)]
        max: Option<f64>,
    },
    #[n(3)]
    Comparison {
        #[n(0)]
        compare_field: String,
        #[n(1)]
        operator: CompareOp,
    },
    #[n(4)]
    Unique {
        #[n(0)]
        case_sensitive: bool,
    },
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ValidationRule {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub module_id: String,
    #[n(2)]
    pub target_field: String,
    #[n(3)]
    pub kind: RuleKind,
    #[n(4)]
    pub conditions: ConditionGroup,
    #[n(5)]
    pub error_message: String,
    #[n(6)]
    pub applies_on: Vec<Trigger>,
    #[n(7)]
    pub is_enabled: bool,
    #[n(8)]
    pub priority: u32,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
}

impl ValidationRule {
    /// Defaults: enabled, priority 10, applies on every lifecycle trigger.
    pub fn new(
        module_id: impl Into<String>,
        target_field: impl Into<String>,
        kind: RuleKind,
        error_message: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            id: utils::new_uuid_to_bech32("rule_")?,
            module_id: module_id.into(),
            target_field: target_field.into(),
            kind,
            conditions: ConditionGroup::default(),
            error_message: error_message.into(),
            applies_on: vec![Trigger::Create, Trigger::Update, Trigger::StageChange],
            is_enabled: true,
            priority: 10,
            created_at: TimeStamp::now(),
        })
    }
    pub fn with_conditions(mut self, conditions: ConditionGroup) -> Self {
        self.conditions = conditions;
        self
    }
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
    pub fn only_on(mut self, trigger: Trigger) -> Self {
        self.applies_on = vec![trigger];
        self
    }
    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }

    pub fn applies_to(&self, trigger: Trigger) -> bool {
        self.applies_on.contains(&trigger)
    }
}

/// Existence check a uniqueness rule delegates to the record store.
pub trait UniqueProbe {
    fn exists_with_value(
        &self,
        module_id: &str,
        field: &str,
        value: &FieldValue,
        exclude_record: Option<&str>,
        case_sensitive: bool,
    ) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleVerdict {
    Pass,
    /// Carries the rule's configured error message.
    Fail(String),
    /// The rule cannot be evaluated as configured (e.g. a bad user regex).
    /// Callers log and skip; this never surfaces as a validation failure.
    Misconfigured(String),
}

/// Evaluate one rule against a field value. `values` is the full merged
/// value set, used by conditions and comparisons. Infrastructure faults from
/// the probe propagate; data problems never do.
pub fn evaluate(
    rule: &ValidationRule,
    value: Option<&FieldValue>,
    values: &FieldMap,
    probe: &dyn UniqueProbe,
    exclude_record: Option<&str>,
) -> anyhow::Result<RuleVerdict> {
    let fail = || RuleVerdict::Fail(rule.error_message.clone());

    let verdict = match &rule.kind {
        RuleKind::RequiredIf => {
            if rule.conditions.matches(values) && is_blank(value) {
                fail()
            } else {
                RuleVerdict::Pass
            }
        }
        RuleKind::Format { format, pattern } => {
            // absence is governed by required_if, not format
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                return Ok(RuleVerdict::Pass);
            };
            let text = value.as_text();
            let matched = match format {
                FormatKind::Email => EMAIL_RE.is_match(&text),
                FormatKind::Phone => PHONE_RE.is_match(&text),
                FormatKind::Url => URL_RE.is_match(&text),
                FormatKind::Alphanumeric => ALPHANUMERIC_RE.is_match(&text),
                FormatKind::Numeric => NUMERIC_RE.is_match(&text),
                FormatKind::Regex => {
                    let Some(pattern) = pattern else {
                        return Ok(RuleVerdict::Misconfigured(
                            "regex format without a pattern".into(),
                        ));
                    };
                    match Regex::new(pattern) {
                        Ok(re) => re.is_match(&text),
                        Err(e) => {
                            return Ok(RuleVerdict::Misconfigured(format!(
                                "invalid pattern {pattern:?}: {e}"
                            )));
                        }
                    }
                }
            };
            if matched { RuleVerdict::Pass } else { fail() }
        }
        RuleKind::Range { min, max } => {
            // absence is governed by required_if; a present non-numeric
            // value fails
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                return Ok(RuleVerdict::Pass);
            };
            match value.as_number() {
                Some(n) => {
                    let below = min.is_some_and(|m| n < m);
                    let above = max.is_some_and(|m| n > m);
                    if below || above { fail() } else { RuleVerdict::Pass }
                }
                None => fail(),
            }
        }
        RuleKind::Comparison {
            compare_field,
            operator,
        } => {
            // fails closed when the compared field is absent
            let Some(other) = values.get(compare_field) else {
                return Ok(fail());
            };
            let Some(value) = value else {
                return Ok(fail());
            };
            let holds = match operator {
                CompareOp::Eq => values_equal(value, other),
                CompareOp::Ne => !values_equal(value, other),
                CompareOp::Gt => compare_numeric(Some(value), Some(other), |a, b| a > b),
                CompareOp::Gte => compare_numeric(Some(value), Some(other), |a, b| a >= b),
                CompareOp::Lt => compare_numeric(Some(value), Some(other), |a, b| a < b),
                CompareOp::Lte => compare_numeric(Some(value), Some(other), |a, b| a <= b),
            };
            if holds { RuleVerdict::Pass } else { fail() }
        }
        RuleKind::Unique { case_sensitive } => {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                return Ok(RuleVerdict::Pass);
            };
            let taken = probe.exists_with_value(
                &rule.module_id,
                &rule.target_field,
                value,
                exclude_record,
                *case_sensitive,
            )?;
            if taken { fail() } else { RuleVerdict::Pass }
        }
    };
    Ok(verdict)
}
