//! Incremental upsert of collected records.
//!
//! A re-seen record only writes the fields that changed, and every write leaves
//! an entry in the record's change log.

use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use super::traits::{Filter, Projection, RecordBackend};
use crate::domain::{Record, RecordKey};
use crate::error::{HarvestrError, Result};

/// Counts for one `upsert_batch` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records whose lookup or write failed; the rest of the batch still ran
    pub failed: usize,
}

impl UpsertSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.failed
    }
}

impl std::fmt::Display for UpsertSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} unchanged, {} failed",
            self.inserted, self.updated, self.unchanged, self.failed
        )
    }
}

enum Outcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Record store over a type-erased backend, as shared by the job runner
pub type DynRecordStore = RecordStore<Box<dyn RecordBackend>>;

/// Upsert logic layered over a [`RecordBackend`].
pub struct RecordStore<B: RecordBackend> {
    backend: B,
    /// Held across each record's lookup-diff-write
    write_lock: Mutex<()>,
}

impl DynRecordStore {
    pub fn boxed(backend: impl RecordBackend + 'static) -> Self {
        Self::new(Box::new(backend))
    }
}

impl<B: RecordBackend> RecordStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Insert new records and apply minimal updates to known ones, in order.
    pub fn upsert_batch(&self, records: Vec<Record>) -> UpsertSummary {
        let mut summary = UpsertSummary::default();

        for record in records {
            let key = record.key();
            match self.upsert_one(record) {
                Ok(Outcome::Inserted) => summary.inserted += 1,
                Ok(Outcome::Updated) => summary.updated += 1,
                Ok(Outcome::Unchanged) => summary.unchanged += 1,
                Err(e) => {
                    log::warn!("Failed to upsert record {}: {}", key, e);
                    summary.failed += 1;
                }
            }
        }

        log::debug!("upsert_batch: {}", summary);
        summary
    }

    fn upsert_one(&self, incoming: Record) -> Result<Outcome> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| HarvestrError::Storage(e.to_string()))?;
        let now = Utc::now();

        match self.backend.get(&incoming.key())? {
            None => {
                let mut record = incoming;
                record.change_log.clear();
                record.prepare_insert(now);
                self.backend.put(&record)?;
                Ok(Outcome::Inserted)
            }
            Some(mut existing) => {
                let changes = existing.diff(&incoming.fields);
                if changes.is_empty() {
                    return Ok(Outcome::Unchanged);
                }
                existing.apply_update(changes, now);
                self.backend.put(&existing)?;
                Ok(Outcome::Updated)
            }
        }
    }

    pub fn get(&self, external_id: &str, source: &str) -> Result<Option<Record>> {
        self.backend.get(&RecordKey::new(external_id, source))
    }

    pub fn count(&self, filters: &[Filter]) -> Result<usize> {
        self.backend.count(filters)
    }

    pub fn delete_many(&self, filters: &[Filter]) -> Result<usize> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| HarvestrError::Storage(e.to_string()))?;
        let deleted = self.backend.delete_many(filters)?;
        log::info!("Deleted {} records", deleted);
        Ok(deleted)
    }

    /// Matching records, projected to the requested fields.
    pub fn list(&self, filters: &[Filter], projection: &Projection) -> Result<Vec<Value>> {
        Ok(self
            .backend
            .query(filters)?
            .iter()
            .map(|record| projection.apply(record))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeAction;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct MemoryBackend {
        records: Mutex<HashMap<RecordKey, Record>>,
        puts: Mutex<usize>,
    }

    impl RecordBackend for MemoryBackend {
        fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
            Ok(self.records.lock().unwrap().get(key).cloned())
        }

        fn put(&self, record: &Record) -> Result<()> {
            *self.puts.lock().unwrap() += 1;
            self.records.lock().unwrap().insert(record.key(), record.clone());
            Ok(())
        }

        fn query(&self, filters: &[Filter]) -> Result<Vec<Record>> {
            let mut out: Vec<Record> = self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| Filter::all_match(filters, r))
                .cloned()
                .collect();
            out.sort_by_key(|r| r.key());
            Ok(out)
        }

        fn delete_many(&self, filters: &[Filter]) -> Result<usize> {
            let mut records = self.records.lock().unwrap();
            let before = records.len();
            records.retain(|_, r| !Filter::all_match(filters, r));
            Ok(before - records.len())
        }
    }

    /// Rejects writes for one source
    struct FailingBackend {
        inner: MemoryBackend,
        broken_source: String,
    }

    impl RecordBackend for FailingBackend {
        fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
            self.inner.get(key)
        }

        fn put(&self, record: &Record) -> Result<()> {
            if record.source == self.broken_source {
                return Err(HarvestrError::Storage("disk full".to_string()));
            }
            self.inner.put(record)
        }

        fn query(&self, filters: &[Filter]) -> Result<Vec<Record>> {
            self.inner.query(filters)
        }

        fn delete_many(&self, filters: &[Filter]) -> Result<usize> {
            self.inner.delete_many(filters)
        }
    }

    fn listing(id: &str, price: i64) -> Record {
        Record::new(id, "siteA").with_field("price", price).with_field("title", "Golf")
    }

    #[test]
    fn test_insert_then_unchanged() {
        let store = RecordStore::new(MemoryBackend::default());

        let first = store.upsert_batch(vec![listing("L1", 100)]);
        assert_eq!(
            first,
            UpsertSummary {
                inserted: 1,
                ..Default::default()
            }
        );

        let second = store.upsert_batch(vec![listing("L1", 100)]);
        assert_eq!(
            second,
            UpsertSummary {
                unchanged: 1,
                ..Default::default()
            }
        );

        // No write for the unchanged record
        assert_eq!(*store.backend().puts.lock().unwrap(), 1);
        let stored = store.get("L1", "siteA").unwrap().unwrap();
        assert_eq!(stored.change_log.len(), 1);
    }

    #[test]
    fn test_insert_audit_entry() {
        let store = RecordStore::new(MemoryBackend::default());
        store.upsert_batch(vec![listing("L1", 100)]);

        let stored = store.get("L1", "siteA").unwrap().unwrap();
        assert_eq!(stored.created_at, stored.updated_at);
        assert_eq!(stored.change_log.len(), 1);
        assert_eq!(stored.change_log[0].action, ChangeAction::Insert);
        assert_eq!(stored.change_log[0].payload["price"], 100);
        assert_eq!(stored.change_log[0].payload["title"], "Golf");
    }

    #[test]
    fn test_update_writes_minimal_diff() {
        let store = RecordStore::new(MemoryBackend::default());
        store.upsert_batch(vec![Record::new("L1", "siteA").with_field("a", 1).with_field("b", 2)]);
        let inserted = store.get("L1", "siteA").unwrap().unwrap();

        let summary =
            store.upsert_batch(vec![Record::new("L1", "siteA").with_field("a", 1).with_field("b", 3)]);
        assert_eq!(summary.updated, 1);

        let stored = store.get("L1", "siteA").unwrap().unwrap();
        assert_eq!(stored.field("b"), Some(&json!(3)));
        assert_eq!(stored.created_at, inserted.created_at);
        assert!(stored.updated_at >= inserted.updated_at);
        assert_eq!(stored.change_log.len(), 2);
        assert_eq!(stored.change_log[1].action, ChangeAction::Update);
        assert_eq!(stored.change_log[1].payload, json!({"b": 3}));
    }

    #[test]
    fn test_duplicate_within_batch() {
        let store = RecordStore::new(MemoryBackend::default());
        let summary = store.upsert_batch(vec![listing("L1", 100), listing("L1", 100), listing("L2", 50)]);

        assert_eq!(
            summary,
            UpsertSummary {
                inserted: 2,
                updated: 0,
                unchanged: 1,
                failed: 0,
            }
        );
    }

    #[test]
    fn test_empty_batch() {
        let store = RecordStore::new(MemoryBackend::default());
        let summary = store.upsert_batch(Vec::new());
        assert_eq!(summary, UpsertSummary::default());
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn test_incoming_change_log_is_ignored() {
        let store = RecordStore::new(MemoryBackend::default());
        let mut record = listing("L1", 100);
        record.prepare_insert(Utc::now());
        record.apply_update(json!({"price": 1}).as_object().cloned().unwrap(), Utc::now());

        store.upsert_batch(vec![record]);
        let stored = store.get("L1", "siteA").unwrap().unwrap();
        assert_eq!(stored.change_log.len(), 1);
    }

    #[test]
    fn test_failed_write_does_not_stop_batch() {
        let store = RecordStore::new(FailingBackend {
            inner: MemoryBackend::default(),
            broken_source: "siteB".to_string(),
        });

        let summary = store.upsert_batch(vec![
            listing("L1", 100),
            Record::new("L9", "siteB").with_field("price", 1),
            listing("L2", 200),
        ]);

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.failed, 1);
        assert!(store.get("L9", "siteB").unwrap().is_none());
    }

    #[test]
    fn test_list_with_projection() {
        let store = RecordStore::new(MemoryBackend::default());
        store.upsert_batch(vec![listing("L1", 100), listing("L2", 300)]);

        let rows = store
            .list(&[Filter::gt("price", 150)], &Projection::only(&["price"]))
            .unwrap();
        assert_eq!(rows, vec![json!({"external_id": "L2", "source": "siteA", "price": 300})]);
    }

    #[test]
    fn test_count_and_delete_many() {
        let store = RecordStore::new(MemoryBackend::default());
        store.upsert_batch(vec![listing("L1", 100), listing("L2", 300), listing("L3", 500)]);

        assert_eq!(store.count(&[]).unwrap(), 3);
        assert_eq!(store.delete_many(&[Filter::lt("price", 400)]).unwrap(), 2);
        assert_eq!(store.count(&[]).unwrap(), 1);
    }

    #[test]
    fn test_concurrent_batches_same_key() {
        let store = Arc::new(RecordStore::new(MemoryBackend::default()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.upsert_batch(vec![listing("L1", 100)]))
            })
            .collect();

        let mut inserted = 0;
        let mut unchanged = 0;
        for handle in handles {
            let summary = handle.join().unwrap();
            inserted += summary.inserted;
            unchanged += summary.unchanged;
        }

        assert_eq!(inserted, 1);
        assert_eq!(unchanged, 7);
    }
}
