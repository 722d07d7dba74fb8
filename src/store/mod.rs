//! Embedded store engine.
//!
//! Every store, the target and each intermediate store alike, is a single
//! SQLite database file holding the [`schema::TABLE`] table. A [`StoreEngine`]
//! carries the per-connection settings and hands out [`Store`] sessions; a
//! session owns one connection and releases it when dropped, so each unit of
//! work (one chunk load, one merge session, one index build) opens and closes
//! its own.

pub mod schema;

use crate::config::EngineConfig;
use crate::error::{IngestError, Result};
use crate::io::compression::Compression;
use crate::io::delimited;
use rusqlite::{Connection, TransactionBehavior, params, params_from_iter};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Factory for configured store sessions.
#[derive(Clone, Debug, Default)]
pub struct StoreEngine {
    config: EngineConfig,
}

impl StoreEngine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open (or create) the durable store at `path`.
    ///
    /// # Errors
    /// Returns [`IngestError::Engine`] if the file cannot be opened or configured.
    pub fn open(&self, path: &Path) -> Result<Store> {
        let conn = Connection::open(path)?;
        self.configure(&conn)?;
        Ok(Store {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open a throwaway store. Durability is traded for load speed since the
    /// file is rebuilt from the input on any failure.
    ///
    /// # Errors
    /// Same as [`StoreEngine::open`].
    pub fn open_scratch(&self, path: &Path) -> Result<Store> {
        let store = self.open(path)?;
        store.conn.pragma_update(None, "synchronous", "OFF")?;
        store
            .conn
            .pragma_update_and_check(None, "journal_mode", "MEMORY", |row| row.get::<_, String>(0))?;
        Ok(store)
    }

    fn configure(&self, conn: &Connection) -> Result<()> {
        let cache_kib = i64::try_from(self.config.memory_limit.kibibytes()).unwrap_or(i64::MAX);
        conn.pragma_update(None, "cache_size", -cache_kib)?;
        let threads = i64::try_from(self.config.threads).unwrap_or(1);
        conn.pragma_update_and_check(None, "threads", threads, |row| row.get::<_, i64>(0))?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;
        Ok(())
    }
}

/// One open connection to one store file.
pub struct Store {
    conn: Connection,
    path: PathBuf,
}

impl Store {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the table if it does not exist yet.
    ///
    /// # Errors
    /// Returns [`IngestError::Engine`] on DDL failure.
    pub fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(&schema::create_table_sql("main"))?;
        Ok(())
    }

    /// Bulk-load a delimited file into the table in one transaction.
    ///
    /// Returns the number of rows inserted. Nothing is kept if any row is
    /// rejected.
    ///
    /// # Errors
    /// [`IngestError::Setup`] if the file cannot be opened,
    /// [`IngestError::Malformed`] for a bad row, [`IngestError::Engine`] on insert failure.
    pub fn bulk_load(&mut self, path: &Path, compression: Compression) -> Result<u64> {
        let reader = compression.open(path)?;
        self.bulk_load_reader(reader)
    }

    /// Reader-based form of [`Store::bulk_load`].
    ///
    /// # Errors
    /// Same as [`Store::bulk_load`].
    pub fn bulk_load_reader<R: Read>(&mut self, rdr: R) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let mut rows = 0u64;
        {
            let mut stmt = tx.prepare_cached(&schema::insert_sql())?;
            let mut csv = delimited::reader(rdr);
            let mut record = csv::ByteRecord::new();
            loop {
                let more = csv.read_byte_record(&mut record).map_err(|e| {
                    IngestError::Malformed {
                        row: rows + 1,
                        reason: e.to_string(),
                    }
                })?;
                if !more {
                    break;
                }
                rows += 1;
                delimited::check_arity(&record, rows)?;
                stmt.execute(params_from_iter(
                    record.iter().map(String::from_utf8_lossy),
                ))?;
            }
        }
        tx.commit()?;
        debug!(store = %self.path.display(), rows, "bulk load committed");
        Ok(rows)
    }

    /// Attach another store file under `alias`.
    ///
    /// # Errors
    /// Returns [`IngestError::Engine`] if the engine refuses the attachment.
    pub fn attach(&self, path: &Path, alias: &str) -> Result<()> {
        let path = path.to_string_lossy();
        self.conn
            .execute(&format!("ATTACH DATABASE ?1 AS {alias}"), params![path.as_ref()])?;
        Ok(())
    }

    /// # Errors
    /// Returns [`IngestError::Engine`] if `alias` is not attached.
    pub fn detach(&self, alias: &str) -> Result<()> {
        self.conn.execute_batch(&format!("DETACH DATABASE {alias}"))?;
        Ok(())
    }

    /// Row count of the table in this store.
    ///
    /// # Errors
    /// Returns [`IngestError::Engine`] on query failure.
    pub fn count_rows(&self) -> Result<u64> {
        self.count_rows_in("main")
    }

    /// Row count of the table in an attached schema.
    ///
    /// # Errors
    /// Returns [`IngestError::Engine`] on query failure.
    pub fn count_rows_in(&self, schema_name: &str) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {schema_name}.{}", schema::TABLE),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Count, then copy, every row of the attached `alias` table into this store.
    ///
    /// Both steps run in one transaction, so either all rows land or none do.
    /// Returns the counted rows.
    ///
    /// # Errors
    /// Returns [`IngestError::Engine`] on any failure; the transaction is rolled back.
    pub fn append_from(&mut self, alias: &str) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let counted: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM {alias}.{}", schema::TABLE),
            [],
            |row| row.get(0),
        )?;
        let inserted = tx.execute(
            &format!(
                "INSERT INTO main.{table} SELECT * FROM {alias}.{table}",
                table = schema::TABLE
            ),
            [],
        )?;
        tx.commit()?;
        let counted = u64::try_from(counted).unwrap_or(0);
        if counted != inserted as u64 {
            debug!(counted, inserted, alias, "row count and insert count differ");
        }
        Ok(counted)
    }

    /// Create `idx_<column>` on the table (create-if-absent).
    ///
    /// The write lock is taken up front so that concurrent builders on other
    /// connections wait out the busy timeout instead of failing.
    ///
    /// # Errors
    /// [`IngestError::Config`] for an unknown column, [`IngestError::Engine`] on failure.
    pub fn create_index(&mut self, column: &str) -> Result<()> {
        let column = schema::check_column(column)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS main.\"{}\" ON {}(\"{column}\")",
            schema::index_name(column),
            schema::TABLE
        ))?;
        tx.commit()?;
        Ok(())
    }

    /// Whether `idx_<column>` exists on the table.
    ///
    /// # Errors
    /// Returns [`IngestError::Engine`] on query failure.
    pub fn has_index(&self, column: &str) -> Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM main.sqlite_master WHERE type = 'index' AND name = ?1",
            params![schema::index_name(column)],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Materialise roughly `fraction` of the rows into a temporary table and index it.
    ///
    /// Returns the sample size. The sample lives until [`Store::drop_sample`] or
    /// until this session closes.
    ///
    /// # Errors
    /// [`IngestError::Config`] for an unknown column, [`IngestError::Engine`] on failure.
    pub fn create_sample(&self, column: &str, fraction: f64) -> Result<u64> {
        const SCALE: f64 = 1_000_000.0;
        let column = schema::check_column(column)?;
        let sample = schema::sample_table_name(column);
        #[allow(clippy::cast_possible_truncation)]
        let threshold = (fraction.clamp(0.0, 1.0) * SCALE).round() as i64;
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS temp.\"{sample}\";
             CREATE TEMP TABLE \"{sample}\" AS SELECT * FROM main.{table}
                 WHERE (random() & 9223372036854775807) % 1000000 < {threshold};
             CREATE INDEX IF NOT EXISTS temp.\"{index}_sample\" ON \"{sample}\"(\"{column}\");",
            table = schema::TABLE,
            index = schema::index_name(column),
        ))?;
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM temp.\"{sample}\""),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// # Errors
    /// [`IngestError::Config`] for an unknown column, [`IngestError::Engine`] on failure.
    pub fn drop_sample(&self, column: &str) -> Result<()> {
        let column = schema::check_column(column)?;
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS temp.\"{}\"",
            schema::sample_table_name(column)
        ))?;
        Ok(())
    }

    /// Refresh planner statistics for the table.
    ///
    /// # Errors
    /// Returns [`IngestError::Engine`] on failure.
    pub fn analyze(&self) -> Result<()> {
        self.conn
            .execute_batch(&format!("ANALYZE main.{}", schema::TABLE))?;
        Ok(())
    }

    /// On-disk size of the store as the engine sees it.
    ///
    /// # Errors
    /// Returns [`IngestError::Engine`] on failure.
    pub fn size_bytes(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Rows whose `column` equals `value`.
    ///
    /// # Errors
    /// [`IngestError::Config`] for an unknown column, [`IngestError::Engine`] on failure.
    pub fn count_where(&self, column: &str, value: &str) -> Result<u64> {
        let column = schema::check_column(column)?;
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM main.{} WHERE \"{column}\" = ?1", schema::TABLE),
            params![value],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Close the connection, surfacing any error the engine reports on close.
    ///
    /// # Errors
    /// Returns [`IngestError::Engine`] if the engine fails to close cleanly.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| IngestError::Engine(e))
    }
}
