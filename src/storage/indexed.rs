//! Record persistence with a JSONL append log and an SQLite index.
//!
//! - **JSONL file**: append-only log of every put and delete (source of truth)
//! - **SQLite database**: keyed index of the latest version of each record,
//!   rebuilt from the log when it is missing or out of step
//!
//! Layout under the store directory:
//!
//! ```text
//! <dir>/.recordstore/records.jsonl
//! <dir>/.recordstore/records.db
//! ```

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::traits::{Filter, FilterOp, RecordBackend};
use crate::domain::{Record, RecordKey};
use crate::error::{HarvestrError, Result};

const LOG_LINES_KEY: &str = "log_lines";

/// One line of the append log
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogEntry {
    Put { record: Record },
    Delete { external_id: String, source: String },
}

struct Inner {
    db: Connection,
    log_lines: u64,
}

/// Record backend persisted to `records.jsonl` and indexed in `records.db`.
pub struct IndexedStore {
    /// Directory holding the log and the index
    store_dir: PathBuf,
    /// Path to the JSONL file
    log_path: PathBuf,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for IndexedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedStore")
            .field("store_dir", &self.store_dir)
            .finish_non_exhaustive()
    }
}

impl IndexedStore {
    /// Open or create a store under `base_dir/.recordstore`.
    pub fn open_at(base_dir: &Path) -> Result<Self> {
        let store_dir = base_dir.join(".recordstore");
        fs::create_dir_all(&store_dir)?;

        let log_path = store_dir.join("records.jsonl");
        let db_path = store_dir.join("records.db");

        let db = Connection::open(&db_path)?;
        Self::init_schema(&db)?;

        let mut inner = Inner { db, log_lines: 0 };
        Self::rebuild_index_if_needed(&mut inner, &log_path)?;

        Ok(Self {
            store_dir,
            log_path,
            inner: Mutex::new(inner),
        })
    }

    /// Directory holding the log and the index.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Initialize the SQLite schema.
    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                external_id TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                json_data TEXT NOT NULL,
                PRIMARY KEY (external_id, source)
            );

            CREATE INDEX IF NOT EXISTS idx_records_source ON records(source);
            CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_at);

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|e| HarvestrError::Storage(e.to_string()))
    }

    /// Rebuild the index when the log holds a different number of lines than
    /// the index last saw.
    fn rebuild_index_if_needed(inner: &mut Inner, log_path: &Path) -> Result<()> {
        let log_lines = if log_path.exists() {
            terminate_torn_tail(log_path)?;
            count_lines(log_path)?
        } else {
            0
        };

        let indexed: Option<String> = inner
            .db
            .query_row("SELECT value FROM meta WHERE key = ?1", [LOG_LINES_KEY], |row| row.get(0))
            .optional()?;
        let indexed: u64 = indexed.and_then(|v| v.parse().ok()).unwrap_or(0);

        if indexed != log_lines {
            log::info!(
                "Rebuilding record index from {} ({} log lines, index saw {})",
                log_path.display(),
                log_lines,
                indexed
            );
            Self::rebuild_index(inner, log_path)?;
        }
        inner.log_lines = log_lines;
        Ok(())
    }

    /// Rebuild the entire SQLite index by replaying the JSONL log.
    fn rebuild_index(inner: &mut Inner, log_path: &Path) -> Result<()> {
        let mut latest: HashMap<RecordKey, Record> = HashMap::new();
        let mut lines: u64 = 0;

        if log_path.exists() {
            let reader = BufReader::new(File::open(log_path)?);
            for (n, bytes) in reader.split(b'\n').enumerate() {
                let bytes = bytes?;
                lines += 1;
                // A torn append can cut a multi-byte character
                let line = match std::str::from_utf8(&bytes) {
                    Ok(line) => line,
                    Err(e) => {
                        log::warn!("Skipping unreadable log line {} in {}: {}", n + 1, log_path.display(), e);
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEntry>(line) {
                    Ok(LogEntry::Put { record }) => {
                        latest.insert(record.key(), record);
                    }
                    Ok(LogEntry::Delete { external_id, source }) => {
                        latest.remove(&RecordKey { external_id, source });
                    }
                    Err(e) => {
                        log::warn!("Skipping unreadable log line {} in {}: {}", n + 1, log_path.display(), e);
                    }
                }
            }
        }

        let tx = inner.db.transaction()?;
        tx.execute("DELETE FROM records", [])?;
        for record in latest.values() {
            index_record(&tx, record)?;
        }
        set_log_lines(&tx, lines)?;
        tx.commit()?;

        Ok(())
    }

    /// Append one entry to the JSONL log.
    fn append(&self, inner: &mut Inner, entry: &LogEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        writeln!(file, "{}", json)?;
        inner.log_lines += 1;
        Ok(())
    }

    fn select(db: &Connection, filters: &[Filter]) -> Result<Vec<Record>> {
        // Exact matches on the key columns are pushed down; everything else is
        // evaluated against the decoded record.
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        for filter in filters {
            if filter.op != FilterOp::Eq {
                continue;
            }
            if let (field @ ("external_id" | "source"), Value::String(value)) =
                (filter.field.as_str(), &filter.value)
            {
                clauses.push(format!("{} = ?{}", field, args.len() + 1));
                args.push(value.clone());
            }
        }

        let mut sql = String::from("SELECT json_data FROM records");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at, source, external_id");

        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            let record: Record = serde_json::from_str(&row?)?;
            if Filter::all_match(filters, &record) {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl RecordBackend for IndexedStore {
    fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        let inner = self.lock()?;
        let json: Option<String> = inner
            .db
            .query_row(
                "SELECT json_data FROM records WHERE external_id = ?1 AND source = ?2",
                params![key.external_id, key.source],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn put(&self, record: &Record) -> Result<()> {
        let mut inner = self.lock()?;

        // Log first, then index
        self.append(
            &mut inner,
            &LogEntry::Put {
                record: record.clone(),
            },
        )?;

        let lines = inner.log_lines;
        let tx = inner.db.transaction()?;
        index_record(&tx, record)?;
        set_log_lines(&tx, lines)?;
        tx.commit()?;

        Ok(())
    }

    fn query(&self, filters: &[Filter]) -> Result<Vec<Record>> {
        let inner = self.lock()?;
        Self::select(&inner.db, filters)
    }

    fn count(&self, filters: &[Filter]) -> Result<usize> {
        let inner = self.lock()?;
        if filters.is_empty() {
            let count: i64 = inner.db.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
            return Ok(count as usize);
        }
        Ok(Self::select(&inner.db, filters)?.len())
    }

    fn delete_many(&self, filters: &[Filter]) -> Result<usize> {
        let mut inner = self.lock()?;
        let doomed = Self::select(&inner.db, filters)?;

        for record in &doomed {
            self.append(
                &mut inner,
                &LogEntry::Delete {
                    external_id: record.external_id.clone(),
                    source: record.source.clone(),
                },
            )?;
        }

        let lines = inner.log_lines;
        let tx = inner.db.transaction()?;
        for record in &doomed {
            tx.execute(
                "DELETE FROM records WHERE external_id = ?1 AND source = ?2",
                params![record.external_id, record.source],
            )?;
        }
        set_log_lines(&tx, lines)?;
        tx.commit()?;

        Ok(doomed.len())
    }
}

/// Insert or replace a record row.
fn index_record(db: &Connection, record: &Record) -> Result<()> {
    let json_data = serde_json::to_string(record)?;
    db.execute(
        r#"
        INSERT OR REPLACE INTO records
        (external_id, source, created_at, updated_at, json_data)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            record.external_id,
            record.source,
            record.created_at.timestamp_millis(),
            record.updated_at.timestamp_millis(),
            json_data,
        ],
    )?;
    Ok(())
}

fn set_log_lines(db: &Connection, lines: u64) -> Result<()> {
    db.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![LOG_LINES_KEY, lines.to_string()],
    )?;
    Ok(())
}

/// Count newline-separated lines in a file, whatever their encoding.
fn count_lines(path: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = 0;
    for bytes in reader.split(b'\n') {
        bytes?;
        lines += 1;
    }
    Ok(lines)
}

/// Close off a partial last line so the next append starts on a fresh line.
fn terminate_torn_tail(path: &Path) -> Result<()> {
    let mut file = OpenOptions::new().read(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        log::warn!("Log {} ends with a partial line, terminating it", path.display());
        file.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_temp_store() -> (IndexedStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = IndexedStore::open_at(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn car(id: &str, source: &str, price: i64) -> Record {
        Record::new(id, source).with_field("price", price)
    }

    #[test]
    fn test_open_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let _store = IndexedStore::open_at(temp_dir.path()).unwrap();

        assert!(temp_dir.path().join(".recordstore").exists());
        assert!(temp_dir.path().join(".recordstore/records.db").exists());
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp) = create_temp_store();
        let record = car("X1", "siteA", 100);

        store.put(&record).unwrap();

        let retrieved = store.get(&RecordKey::new("X1", "siteA")).unwrap().unwrap();
        assert_eq!(retrieved, record);
    }

    #[test]
    fn test_get_nonexistent() {
        let (store, _temp) = create_temp_store();
        assert!(store.get(&RecordKey::new("nope", "siteA")).unwrap().is_none());
    }

    #[test]
    fn test_same_external_id_different_sources() {
        let (store, _temp) = create_temp_store();
        store.put(&car("X1", "siteA", 100)).unwrap();
        store.put(&car("X1", "siteB", 200)).unwrap();

        assert_eq!(store.count(&[]).unwrap(), 2);
        let b = store.get(&RecordKey::new("X1", "siteB")).unwrap().unwrap();
        assert_eq!(b.field("price"), Some(&serde_json::json!(200)));
    }

    #[test]
    fn test_put_replaces() {
        let (store, _temp) = create_temp_store();
        store.put(&car("X1", "siteA", 100)).unwrap();
        store.put(&car("X1", "siteA", 90)).unwrap();

        assert_eq!(store.count(&[]).unwrap(), 1);
        let r = store.get(&RecordKey::new("X1", "siteA")).unwrap().unwrap();
        assert_eq!(r.field("price"), Some(&serde_json::json!(90)));
    }

    #[test]
    fn test_query_with_filters() {
        let (store, _temp) = create_temp_store();
        store.put(&car("1", "siteA", 100)).unwrap();
        store.put(&car("2", "siteA", 300)).unwrap();
        store.put(&car("3", "siteB", 500)).unwrap();

        let a = store.query(&[Filter::eq("source", "siteA")]).unwrap();
        assert_eq!(a.len(), 2);

        let pricey = store
            .query(&[Filter::eq("source", "siteA"), Filter::gt("price", 150)])
            .unwrap();
        assert_eq!(pricey.len(), 1);
        assert_eq!(pricey[0].external_id, "2");

        assert_eq!(store.count(&[Filter::gte("price", 300)]).unwrap(), 2);
    }

    #[test]
    fn test_delete_many() {
        let (store, _temp) = create_temp_store();
        store.put(&car("1", "siteA", 100)).unwrap();
        store.put(&car("2", "siteA", 300)).unwrap();
        store.put(&car("3", "siteB", 500)).unwrap();

        let deleted = store.delete_many(&[Filter::eq("source", "siteA")]).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count(&[]).unwrap(), 1);
        assert!(store.get(&RecordKey::new("1", "siteA")).unwrap().is_none());
    }

    #[test]
    fn test_delete_many_no_match() {
        let (store, _temp) = create_temp_store();
        store.put(&car("1", "siteA", 100)).unwrap();
        assert_eq!(store.delete_many(&[Filter::eq("source", "nowhere")]).unwrap(), 0);
        assert_eq!(store.count(&[]).unwrap(), 1);
    }

    #[test]
    fn test_jsonl_persistence() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = IndexedStore::open_at(temp_dir.path()).unwrap();
            store.put(&car("1", "siteA", 100)).unwrap();
            store.put(&car("2", "siteA", 200)).unwrap();
            store.delete_many(&[Filter::eq("external_id", "2")]).unwrap();
        }

        {
            let store = IndexedStore::open_at(temp_dir.path()).unwrap();
            let all = store.query(&[]).unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(all[0].external_id, "1");
        }
    }

    #[test]
    fn test_rebuild_index() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = IndexedStore::open_at(temp_dir.path()).unwrap();
            store.put(&car("1", "siteA", 100)).unwrap();
            store.put(&car("1", "siteA", 110)).unwrap();
            store.put(&car("2", "siteB", 200)).unwrap();
            store.put(&car("3", "siteB", 300)).unwrap();
            store.delete_many(&[Filter::eq("external_id", "3")]).unwrap();
        }

        // Delete the SQLite file to force rebuild
        fs::remove_file(temp_dir.path().join(".recordstore/records.db")).unwrap();

        {
            let store = IndexedStore::open_at(temp_dir.path()).unwrap();
            assert_eq!(store.count(&[]).unwrap(), 2);
            let one = store.get(&RecordKey::new("1", "siteA")).unwrap().unwrap();
            assert_eq!(one.field("price"), Some(&serde_json::json!(110)));
        }
    }

    #[test]
    fn test_rebuild_skips_torn_line() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = IndexedStore::open_at(temp_dir.path()).unwrap();
            store.put(&car("1", "siteA", 100)).unwrap();
        }

        let log_path = temp_dir.path().join(".recordstore/records.jsonl");
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        writeln!(file, "{{\"op\":\"put\",\"record\":{{\"externa").unwrap();

        let store = IndexedStore::open_at(temp_dir.path()).unwrap();
        assert_eq!(store.count(&[]).unwrap(), 1);
    }

    #[test]
    fn test_rebuild_skips_line_cut_inside_multibyte_char() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = IndexedStore::open_at(temp_dir.path()).unwrap();
            store
                .put(&Record::new("1", "leiloes.pt").with_field("title", "leilões"))
                .unwrap();
        }

        // Re-append the same line cut right after the first byte of "õ"
        let log_path = temp_dir.path().join(".recordstore/records.jsonl");
        let full = fs::read(&log_path).unwrap();
        let cut = full.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(&full[..cut]).unwrap();
        drop(file);

        {
            let store = IndexedStore::open_at(temp_dir.path()).unwrap();
            assert_eq!(store.count(&[]).unwrap(), 1);
            let r = store.get(&RecordKey::new("1", "leiloes.pt")).unwrap().unwrap();
            assert_eq!(r.field("title"), Some(&serde_json::json!("leilões")));

            // Appends after the torn line stay readable
            store.put(&car("2", "siteA", 100)).unwrap();
        }

        let store = IndexedStore::open_at(temp_dir.path()).unwrap();
        assert_eq!(store.count(&[]).unwrap(), 2);
    }

    #[test]
    fn test_count_lines_ignores_encoding() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log.jsonl");
        fs::write(&path, b"{}\n\xC3\n{}").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 3);
    }
}
