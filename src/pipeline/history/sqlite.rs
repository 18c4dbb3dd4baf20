use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use super::HistoryStore;
use crate::domain::{Fingerprint, HistoryEntry};
use crate::error::HistoryStoreError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-backed history ledger.
///
/// Every `record_occurrence` runs in its own IMMEDIATE transaction with
/// `synchronous=FULL`, so an `Ok` return means the row is on disk.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    resurface_after_days: Option<u32>,
}

impl SqliteHistoryStore {
    pub fn open<P: AsRef<Path>>(
        path: P,
        resurface_after_days: Option<u32>,
    ) -> Result<Self, HistoryStoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                HistoryStoreError::Unavailable(format!("{}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(&path)
            .map_err(|e| HistoryStoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            CREATE TABLE IF NOT EXISTS history_entries (
                fingerprint  TEXT PRIMARY KEY,
                first_seen   TEXT NOT NULL,
                last_seen    TEXT NOT NULL,
                occurrences  INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS history_sources (
                fingerprint  TEXT NOT NULL,
                source_id    TEXT NOT NULL,
                PRIMARY KEY (fingerprint, source_id)
            );
            "#,
        )
        .map_err(|e| HistoryStoreError::Unavailable(format!("{}: {}", path.display(), e)))?;

        info!(path = %path.display(), "history store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            resurface_after_days,
        })
    }

    fn load(conn: &Connection, fingerprint: &Fingerprint) -> Result<Option<HistoryEntry>, HistoryStoreError> {
        let mut stmt = conn.prepare(
            "SELECT first_seen, last_seen, occurrences FROM history_entries WHERE fingerprint = ?1",
        )?;
        let mut rows = stmt.query(params![fingerprint.as_str()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let first_seen: String = row.get(0)?;
        let last_seen: String = row.get(1)?;
        let occurrences: i64 = row.get(2)?;

        let mut stmt = conn.prepare(
            "SELECT source_id FROM history_sources WHERE fingerprint = ?1 ORDER BY source_id",
        )?;
        let sources = stmt
            .query_map(params![fingerprint.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Some(HistoryEntry {
            fingerprint: fingerprint.clone(),
            first_seen: parse_date(fingerprint, &first_seen)?,
            last_seen: parse_date(fingerprint, &last_seen)?,
            sources,
            occurrences: u64::try_from(occurrences).map_err(|_| HistoryStoreError::Corrupt {
                fingerprint: fingerprint.to_string(),
                detail: format!("negative occurrence count {}", occurrences),
            })?,
        }))
    }

    fn save(tx: &Transaction<'_>, entry: &HistoryEntry, reset_sources: bool) -> Result<(), HistoryStoreError> {
        let fp = entry.fingerprint.as_str();
        tx.execute(
            "INSERT INTO history_entries (fingerprint, first_seen, last_seen, occurrences) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(fingerprint) DO UPDATE SET first_seen=excluded.first_seen, last_seen=excluded.last_seen, occurrences=excluded.occurrences",
            params![
                fp,
                entry.first_seen.format(DATE_FORMAT).to_string(),
                entry.last_seen.format(DATE_FORMAT).to_string(),
                entry.occurrences as i64
            ],
        )?;
        if reset_sources {
            tx.execute("DELETE FROM history_sources WHERE fingerprint = ?1", params![fp])?;
        }
        for source in &entry.sources {
            tx.execute(
                "INSERT OR IGNORE INTO history_sources (fingerprint, source_id) VALUES (?1, ?2)",
                params![fp, source],
            )?;
        }
        Ok(())
    }
}

fn parse_date(fingerprint: &Fingerprint, value: &str) -> Result<NaiveDate, HistoryStoreError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| HistoryStoreError::Corrupt {
        fingerprint: fingerprint.to_string(),
        detail: format!("bad date {:?}: {}", value, e),
    })
}

impl HistoryStore for SqliteHistoryStore {
    fn check_available(&self) -> Result<(), HistoryStoreError> {
        let conn = self.conn.lock().map_err(|_| HistoryStoreError::Poisoned)?;
        conn.query_row("SELECT COUNT(*) FROM history_entries", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| HistoryStoreError::Unavailable(format!("{}: {}", self.path.display(), e)))
    }

    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<HistoryEntry>, HistoryStoreError> {
        let conn = self.conn.lock().map_err(|_| HistoryStoreError::Poisoned)?;
        Self::load(&conn, fingerprint)
    }

    fn record_occurrence(
        &self,
        fingerprint: &Fingerprint,
        source: &str,
        observed: NaiveDate,
    ) -> Result<(HistoryEntry, bool), HistoryStoreError> {
        let mut conn = self.conn.lock().map_err(|_| HistoryStoreError::Poisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (entry, is_new) = match Self::load(&tx, fingerprint)? {
            Some(mut entry) => {
                let resurfaced = entry.observe(source, observed, self.resurface_after_days);
                Self::save(&tx, &entry, resurfaced)?;
                (entry, resurfaced)
            }
            None => {
                let entry = HistoryEntry::first(fingerprint.clone(), source, observed);
                Self::save(&tx, &entry, false)?;
                (entry, true)
            }
        };

        tx.commit()?;
        debug!(
            fingerprint = fingerprint.short(),
            source,
            occurrences = entry.occurrences,
            is_new,
            "history occurrence recorded"
        );
        Ok((entry, is_new))
    }

    fn len(&self) -> Result<u64, HistoryStoreError> {
        let conn = self.conn.lock().map_err(|_| HistoryStoreError::Poisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history_entries", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}
