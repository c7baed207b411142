//! Database connection management
//!
//! A small pool of SQLite connections in WAL mode. Each store operation checks a
//! connection out, runs one transaction, and returns it. Lock contention between
//! concurrent writers is retried here with bounded exponential backoff.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use crate::config::StoreSettings;
use crate::error::{NoteFsError, Result};
use crate::storage::schema;

pub struct ConnectionPool {
    db_path: PathBuf,
    idle: Mutex<Vec<Connection>>,
    settings: StoreSettings,
}

impl ConnectionPool {
    /// Open (creating if needed) the database at `db_path` and ensure the schema.
    pub fn open(db_path: impl AsRef<Path>, settings: StoreSettings) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(db_dir) = db_path.parent() {
            if !db_dir.as_os_str().is_empty() {
                std::fs::create_dir_all(db_dir).map_err(NoteFsError::Io)?;
            }
        }

        let pool = Self {
            db_path,
            idle: Mutex::new(Vec::new()),
            settings,
        };

        let conn = pool.connect()?;
        schema::create_tables(&conn)?;
        pool.put_back(conn);

        tracing::info!("[ConnectionPool] Database ready at: {}", pool.db_path.display());
        Ok(pool)
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).map_err(NoteFsError::Database)?;

        // Enable WAL mode for better concurrent access (the pragma answers with the new mode)
        conn.pragma_update_and_check(None, "journal_mode", WAL, |row| row.get::<_, String>(0))?;

        // Enable foreign key constraints
        conn.pragma_update(None, "foreign_keys", ON)?;

        conn.pragma_update(None, "synchronous", NORMAL)?;
        conn.busy_timeout(self.settings.busy_timeout())?;
        Ok(conn)
    }

    fn checkout(&self) -> Result<Connection> {
        let reused = {
            let mut idle = self.idle.lock()
                .map_err(|_| NoteFsError::State("Poisoned lock".into()))?;
            idle.pop()
        };
        match reused {
            Some(conn) => Ok(conn),
            None => self.connect(),
        }
    }

    fn put_back(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.settings.pool_size {
                idle.push(conn);
            }
        }
    }

    /// Run `op` inside one IMMEDIATE (write-locking) transaction, retrying on contention.
    pub fn write<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        self.transact(TransactionBehavior::Immediate, op)
    }

    /// Run `op` inside one read transaction, giving it a consistent snapshot.
    pub fn read<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        self.transact(TransactionBehavior::Deferred, op)
    }

    fn transact<T, F>(&self, behavior: TransactionBehavior, mut op: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let max_attempts = self.settings.max_retries.max(1);
        let mut conn = self.checkout()?;
        let mut attempt = 1;

        let outcome = loop {
            match Self::attempt(&mut conn, behavior, &mut op) {
                Err(e) if e.is_busy() => {
                    if attempt == max_attempts {
                        tracing::error!("[ConnectionPool] Giving up after {} busy attempts", max_attempts);
                        break Err(NoteFsError::TransientBusy { attempts: max_attempts });
                    }
                    let delay = self.settings.backoff(attempt);
                    tracing::warn!(
                        "[ConnectionPool] Transaction busy (attempt {}/{}), retrying in {:?}",
                        attempt, max_attempts, delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => break other,
            }
        };

        self.put_back(conn);
        outcome
    }

    fn attempt<T, F>(conn: &mut Connection, behavior: TransactionBehavior, op: &mut F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>) -> Result<T>,
    {
        let tx = conn.transaction_with_behavior(behavior)?;
        // Dropping an uncommitted transaction rolls it back
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

// SQL pragma constants
const WAL: &str = "WAL";
const ON: &str = "ON";
const NORMAL: &str = "NORMAL";
