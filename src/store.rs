//! Record persistence behind the [`RecordStore`] seam.
//!
//! The store is the single serialization point: every committing write is a
//! compare-and-swap against the bytes the caller read, so a record that
//! moved underneath a transition attempt surfaces as a conflict instead of a
//! lost update. The sled implementation here is the default; callers that
//! bring their own storage implement the trait.

use chrono::Utc;
use sled::Db;
use std::sync::Arc;

use crate::rules::UniqueProbe;
use crate::types::{FieldMap, FieldValue, TimeStamp};
use crate::utils;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Record {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub module_id: String,
    #[n(2)]
    pub stage: String,
    #[n(3)]
    pub owner_id: String,
    #[n(4)]
    pub fields: FieldMap,
    /// Bumped on every committed write; the optimistic guard.
    #[n(5)]
    pub version: u64,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub updated_at: TimeStamp<Utc>,
}

impl Record {
    pub fn new(
        module_id: impl Into<String>,
        stage: impl Into<String>,
        owner_id: impl Into<String>,
        fields: FieldMap,
    ) -> anyhow::Result<Self> {
        let now = TimeStamp::now();
        Ok(Self {
            id: utils::new_uuid_to_bech32("rec_")?,
            module_id: module_id.into(),
            stage: stage.into(),
            owner_id: owner_id.into(),
            fields,
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// The record's values with `changed` layered on top, as the gate sees
    /// them during a transition attempt.
    pub fn merged_fields(&self, changed: &FieldMap) -> FieldMap {
        let mut merged = self.fields.clone();
        for (k, v) in changed {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

pub trait RecordStore: Send + Sync {
    fn get(&self, id: &str) -> anyhow::Result<Option<Record>>;
    fn insert_new(&self, record: &Record) -> anyhow::Result<()>;
    /// Guarded write: applies `after` only while the stored record still
    /// matches `before`. Returns the stored result, or `None` on a version
    /// conflict. The version bump and `updated_at` are handled here.
    fn commit_guarded(&self, before: &Record, after: Record) -> anyhow::Result<Option<Record>>;
    fn exists_with_value(
        &self,
        module_id: &str,
        field: &str,
        value: &FieldValue,
        exclude_record: Option<&str>,
        case_sensitive: bool,
    ) -> anyhow::Result<bool>;
}

/// Adapter so a `&dyn RecordStore` can serve uniqueness rules.
pub struct StoreProbe<'a>(pub &'a dyn RecordStore);

impl UniqueProbe for StoreProbe<'_> {
    fn exists_with_value(
        &self,
        module_id: &str,
        field: &str,
        value: &FieldValue,
        exclude_record: Option<&str>,
        case_sensitive: bool,
    ) -> anyhow::Result<bool> {
        self.0
            .exists_with_value(module_id, field, value, exclude_record, case_sensitive)
    }
}

#[derive(Clone)]
pub struct SledRecordStore {
    tree: sled::Tree,
}

impl SledRecordStore {
    pub fn open(db: &Arc<Db>) -> anyhow::Result<Self> {
        Ok(Self {
            tree: db.open_tree("records")?,
        })
    }
}

fn text_matches(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}

fn value_matches(stored: &FieldValue, wanted: &FieldValue, case_sensitive: bool) -> bool {
    match (stored, wanted) {
        (FieldValue::Text(a), FieldValue::Text(b)) => text_matches(a, b, case_sensitive),
        _ => stored == wanted,
    }
}

impl RecordStore for SledRecordStore {
    fn get(&self, id: &str) -> anyhow::Result<Option<Record>> {
        let record = self
            .tree
            .get(id.as_bytes())?
            .map(|bytes| utils::from_cbor(&bytes))
            .transpose()?;
        Ok(record)
    }

    fn insert_new(&self, record: &Record) -> anyhow::Result<()> {
        self.tree
            .insert(record.id.as_bytes(), utils::to_cbor(record)?)?;
        Ok(())
    }

    fn commit_guarded(&self, before: &Record, mut after: Record) -> anyhow::Result<Option<Record>> {
        after.version = before.version + 1;
        after.updated_at = TimeStamp::now();

        let old = utils::to_cbor(before)?;
        let new = utils::to_cbor(&after)?;
        let swapped = self.tree.compare_and_swap(
            before.id.as_bytes(),
            Some(old.as_slice()),
            Some(new.as_slice()),
        )?;
        Ok(swapped.is_ok().then_some(after))
    }

    fn exists_with_value(
        &self,
        module_id: &str,
        field: &str,
        value: &FieldValue,
        exclude_record: Option<&str>,
        case_sensitive: bool,
    ) -> anyhow::Result<bool> {
        // full scan; record volume is bounded by the embedded use case
        for entry in self.tree.iter() {
            let (_, bytes) = entry?;
            let record: Record = utils::from_cbor(&bytes)?;
            if record.module_id != module_id {
                continue;
            }
            if exclude_record.is_some_and(|id| id == record.id) {
                continue;
            }
            if let Some(stored) = record.field(field)
                && value_matches(stored, value, case_sensitive)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, SledRecordStore) {
        let dir = tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("store.db")).unwrap());
        (dir, SledRecordStore::open(&db).unwrap())
    }

    fn sample_record() -> Record {
        let mut fields = FieldMap::new();
        fields.insert("name".into(), FieldValue::text("Acme"));
        Record::new("deals", "new", "user_owner", fields).unwrap()
    }

    #[test]
    fn guarded_commit_bumps_version() {
        let (_dir, store) = open_store();
        let record = sample_record();
        store.insert_new(&record).unwrap();

        let mut after = record.clone();
        after.stage = "qualified".into();
        let stored = store.commit_guarded(&record, after).unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(store.get(&record.id).unwrap().unwrap().stage, "qualified");
    }

    #[test]
    fn guarded_commit_detects_stale_read() {
        let (_dir, store) = open_store();
        let record = sample_record();
        store.insert_new(&record).unwrap();

        // another writer wins first
        let mut winner = record.clone();
        winner.stage = "qualified".into();
        store.commit_guarded(&record, winner).unwrap().unwrap();

        // the stale reader's commit must not apply
        let mut loser = record.clone();
        loser.stage = "won".into();
        assert!(store.commit_guarded(&record, loser).unwrap().is_none());
        assert_eq!(store.get(&record.id).unwrap().unwrap().stage, "qualified");
    }

    #[test]
    fn exists_with_value_is_case_insensitive_by_default() {
        let (_dir, store) = open_store();
        let record = sample_record();
        store.insert_new(&record).unwrap();

        let probe = FieldValue::text("ACME");
        assert!(
            store
                .exists_with_value("deals", "name", &probe, None, false)
                .unwrap()
        );
        assert!(
            !store
                .exists_with_value("deals", "name", &probe, None, true)
                .unwrap()
        );
        // the record itself is excluded when editing
        assert!(
            !store
                .exists_with_value("deals", "name", &probe, Some(&record.id), false)
                .unwrap()
        );
    }
}
