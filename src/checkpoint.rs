use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::warn;

use crate::job::JobId;
use crate::record::Record;

/// Durable batch persistence. `write` must be atomic: a batch is either
/// fully persisted or fully absent, and never modified afterwards.
pub trait CheckpointStore {
    fn write(&self, job: &JobId, batch_index: usize, records: &[Record]) -> Result<()>;
    /// Batch indices with a valid, readable checkpoint. Corrupt ones are
    /// skipped with a warning, never fatal.
    fn list_completed(&self, job: &JobId) -> Result<BTreeSet<usize>>;
    /// All completed batches' records in batch-index order.
    fn read_all(&self, job: &JobId) -> Result<Vec<Record>>;
    fn clear(&self, job: &JobId) -> Result<()>;
}

// ── Filesystem backend ─────────────────────────────────────────────

/// One JSON-lines file per (job, batch); the filename encodes both, so
/// enumeration is a directory listing plus filename parsing. Atomicity
/// comes from writing a sibling temp file and renaming over.
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating checkpoint dir {}", dir.display()))?;
        Ok(FsCheckpointStore { dir })
    }

    fn batch_path(&self, job: &JobId, batch_index: usize) -> PathBuf {
        self.dir
            .join(format!("{}_batch_{:05}.jsonl", job.short(), batch_index))
    }

    fn parse_batch_index(name: &str, job: &JobId) -> Option<usize> {
        name.strip_prefix(job.short())?
            .strip_prefix("_batch_")?
            .strip_suffix(".jsonl")?
            .parse()
            .ok()
    }

    fn read_batch(path: &Path) -> Result<Vec<Record>> {
        let data = fs::read_to_string(path)?;
        let mut records = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn write(&self, job: &JobId, batch_index: usize, records: &[Record]) -> Result<()> {
        let final_path = self.batch_path(job, batch_index);
        let tmp_path = final_path.with_extension("jsonl.tmp");

        let mut buf = String::new();
        for r in records {
            buf.push_str(&serde_json::to_string(r)?);
            buf.push('\n');
        }
        fs::write(&tmp_path, buf).with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("committing {}", final_path.display()))?;
        Ok(())
    }

    fn list_completed(&self, job: &JobId) -> Result<BTreeSet<usize>> {
        let mut completed = BTreeSet::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(index) = Self::parse_batch_index(name, job) else {
                continue;
            };
            match Self::read_batch(&entry.path()) {
                Ok(_) => {
                    completed.insert(index);
                }
                Err(e) => warn!("skipping corrupt checkpoint {}: {}", name, e),
            }
        }
        Ok(completed)
    }

    fn read_all(&self, job: &JobId) -> Result<Vec<Record>> {
        let mut all = Vec::new();
        for index in self.list_completed(job)? {
            all.extend(Self::read_batch(&self.batch_path(job, index))?);
        }
        Ok(all)
    }

    fn clear(&self, job: &JobId) -> Result<()> {
        let prefix = format!("{}_batch_", job.short());
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) {
                fs::remove_file(entry.path())
                    .with_context(|| format!("removing {}", name))?;
            }
        }
        Ok(())
    }
}

// ── SQLite backend ─────────────────────────────────────────────────

/// Batch marker plus record rows written in one transaction; the marker
/// table alone answers `list_completed`.
pub struct SqliteCheckpointStore {
    conn: Connection,
}

impl SqliteCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = SqliteCheckpointStore { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS batches (
                job_id       TEXT NOT NULL,
                batch_index  INTEGER NOT NULL,
                record_count INTEGER NOT NULL,
                written_at   TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (job_id, batch_index)
            );

            CREATE TABLE IF NOT EXISTS records (
                job_id         TEXT NOT NULL,
                batch_index    INTEGER NOT NULL,
                row_index      INTEGER NOT NULL,
                url            TEXT NOT NULL,
                part           TEXT NOT NULL,
                company        TEXT NOT NULL,
                unspsc_feature TEXT NOT NULL,
                unspsc_code    TEXT NOT NULL,
                status         TEXT NOT NULL,
                error          TEXT NOT NULL,
                PRIMARY KEY (job_id, row_index)
            );
            CREATE INDEX IF NOT EXISTS idx_records_batch ON records(job_id, batch_index);
            ",
        )?;
        Ok(())
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn write(&self, job: &JobId, batch_index: usize, records: &[Record]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM records WHERE job_id = ?1 AND batch_index = ?2",
            params![job.hex(), batch_index as i64],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO records
                 (job_id, batch_index, row_index, url, part, company,
                  unspsc_feature, unspsc_code, status, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for r in records {
                stmt.execute(params![
                    job.hex(),
                    batch_index as i64,
                    r.row as i64,
                    r.url,
                    r.part,
                    r.company,
                    r.unspsc_feature,
                    r.unspsc_code,
                    r.status.to_string(),
                    r.error,
                ])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO batches (job_id, batch_index, record_count)
             VALUES (?1, ?2, ?3)",
            params![job.hex(), batch_index as i64, records.len() as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn list_completed(&self, job: &JobId) -> Result<BTreeSet<usize>> {
        let mut stmt = self
            .conn
            .prepare("SELECT batch_index FROM batches WHERE job_id = ?1")?;
        let rows = stmt.query_map([job.hex()], |row| row.get::<_, i64>(0))?;
        let mut out = BTreeSet::new();
        for r in rows {
            out.insert(r? as usize);
        }
        Ok(out)
    }

    fn read_all(&self, job: &JobId) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(
            "SELECT row_index, url, part, company, unspsc_feature, unspsc_code, status, error
             FROM records WHERE job_id = ?1
             ORDER BY batch_index, row_index",
        )?;
        let rows = stmt.query_map([job.hex()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut all = Vec::new();
        for r in rows {
            let (row_index, url, part, company, unspsc_feature, unspsc_code, status, error) = r?;
            let status = status
                .parse()
                .map_err(|e: String| anyhow::anyhow!("bad status in store: {}", e))?;
            all.push(Record {
                row: row_index as usize,
                url,
                part,
                company,
                unspsc_feature,
                unspsc_code,
                status,
                error,
            });
        }
        Ok(all)
    }

    fn clear(&self, job: &JobId) -> Result<()> {
        self.conn
            .execute("DELETE FROM records WHERE job_id = ?1", [job.hex()])?;
        self.conn
            .execute("DELETE FROM batches WHERE job_id = ?1", [job.hex()])?;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
