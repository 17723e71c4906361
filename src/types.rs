//! Shared value types used across the engine
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// Field values as supplied by callers and stored on records. Keyed by the
/// field key defined in the module metadata.
pub type FieldMap = BTreeMap<String, FieldValue>;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub enum FieldValue {
    #[n(0)]
    Text(#[n(0)] String),
    #[n(1)]
    Number(#[n(0)] f64),
    #[n(2)]
    Bool(#[n(0)] bool),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
    pub fn number(value: f64) -> Self {
        Self::Number(value)
    }
    /// Whitespace-only text counts as empty. Numbers and booleans are never
    /// empty, zero included.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(t) => t.trim().is_empty(),
            Self::Number(_) | Self::Bool(_) => false,
        }
    }
    /// Numeric coercion used by range and comparison rules. Text parses as
    /// f64, booleans do not coerce.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(t) => t.trim().parse::<f64>().ok(),
            Self::Bool(_) => None,
        }
    }
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// An absent key and an empty value gate the same way everywhere.
pub fn is_blank(value: Option<&FieldValue>) -> bool {
    value.is_none_or(FieldValue::is_empty)
}

/// Lifecycle points a validation rule can attach to.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    #[n(0)]
    Create,
    #[n(1)]
    Update,
    #[n(2)]
    StageChange,
}

#[derive(Debug, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone> PartialEq for TimeStamp<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: TimeZone> Eq for TimeStamp<T> {}

impl<T: TimeZone> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn from_ymd_hms(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_cbor_roundtrip() {
        let original = TimeStamp::now();

        let encoded = minicbor::to_vec(&original).unwrap();
        let decoded: TimeStamp<Utc> = minicbor::decode(&encoded).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn field_value_cbor_roundtrip() {
        let values = vec![
            FieldValue::text("hello"),
            FieldValue::number(42.5),
            FieldValue::Bool(true),
        ];

        let encoded = minicbor::to_vec(&values).unwrap();
        let decoded: Vec<FieldValue> = minicbor::decode(&encoded).unwrap();

        assert_eq!(values, decoded);
    }

    #[test]
    fn emptiness_rules() {
        assert!(FieldValue::text("   ").is_empty());
        assert!(!FieldValue::text("x").is_empty());
        assert!(!FieldValue::number(0.0).is_empty());
        assert!(is_blank(None));
        assert!(is_blank(Some(&FieldValue::text(""))));
        assert!(!is_blank(Some(&FieldValue::Bool(false))));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(FieldValue::text(" 12.5 ").as_number(), Some(12.5));
        assert_eq!(FieldValue::number(3.0).as_number(), Some(3.0));
        assert_eq!(FieldValue::text("abc").as_number(), None);
        assert_eq!(FieldValue::Bool(true).as_number(), None);
    }
}
