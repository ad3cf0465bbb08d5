use crate::clock::MonotonicClock;
use crate::config::StorageConfig;
use crate::error::{BackendError, Result};
use crate::storage::storage_trait::{Backend, Cursor, Interaction, Outcome, Statement};
use crate::types::Sticky;
use chrono::DateTime;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace};

type DbPool = Pool<SqliteConnectionManager>;

const STICKY_COLUMNS: &str = "id, board_id, text, x, y, updated_at";

/// SQLite implementation of the Backend trait
///
/// Every query and interaction checks a connection out of the pool on tokio's
/// blocking thread pool and runs inside a transaction. `updated_at` is stored
/// as integer microseconds since the epoch.
pub struct SqliteBackend {
    pool: DbPool,
    clock: Arc<Mutex<MonotonicClock>>,
}

impl SqliteBackend {
    pub fn open<P: AsRef<Path>>(path: P, config: &StorageConfig) -> Result<Self> {
        let cache_size = config.sqlite_cache_size;
        let busy_timeout = config.sqlite_busy_timeout;
        let path_ref = path.as_ref();

        // Initialize schema with a single connection first
        let latest = {
            let conn = Connection::open(path_ref)?;
            conn.pragma_update(None, "cache_size", cache_size)?;
            conn.pragma_update(None, "busy_timeout", busy_timeout)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;

            Self::create_schema(&conn)?;
            Self::latest_timestamp(&conn)?
        };

        let manager = SqliteConnectionManager::file(path_ref).with_init(move |conn| {
            conn.pragma_update(None, "cache_size", cache_size)?;
            conn.pragma_update(None, "busy_timeout", busy_timeout)?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_connections.max(1))
            .min_idle(Some(1))
            .build(manager)?;

        let clock = match latest {
            Some(last) => MonotonicClock::starting_after(last),
            None => MonotonicClock::new(),
        };

        info!("Opened sqlite sticky store at {:?}", path_ref);

        Ok(SqliteBackend {
            pool,
            clock: Arc::new(Mutex::new(clock)),
        })
    }

    /// Open on the blocking thread pool, for use from async startup code
    pub async fn open_async(path: PathBuf, config: StorageConfig) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::open(path, &config))
            .await
            .map_err(BackendError::from)?
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- AUTOINCREMENT keeps ids of removed notes from being handed out again
            CREATE TABLE IF NOT EXISTS sticky (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                board_id TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                text TEXT NOT NULL,
                x INTEGER NOT NULL,
                y INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sticky_board_updated ON sticky(board_id, updated_at);
            "#,
        )?;

        Ok(())
    }

    fn latest_timestamp(conn: &Connection) -> Result<Option<DateTime<chrono::Utc>>> {
        let micros: Option<i64> =
            conn.query_row("SELECT MAX(updated_at) FROM sticky", [], |row| row.get(0))?;
        Ok(micros.and_then(DateTime::from_timestamp_micros))
    }

    fn run_blocking<F>(&self, work: F) -> BoxFuture<'static, Result<Outcome>>
    where
        F: FnOnce(&mut dyn Cursor) -> Result<Outcome> + Send + 'static,
    {
        let pool = self.pool.clone();
        let clock = Arc::clone(&self.clock);

        let handle = tokio::task::spawn_blocking(move || -> Result<Outcome> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            let outcome = {
                let mut cursor = SqliteCursor {
                    conn: &tx,
                    clock: &clock,
                };
                work(&mut cursor)?
            };
            tx.commit()?;
            Ok(outcome)
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(BackendError::Task(e).into()),
            }
        }
        .boxed()
    }
}

impl Backend for SqliteBackend {
    fn run_query(&self, statement: Statement) -> BoxFuture<'static, Result<Outcome>> {
        self.run_blocking(move |cursor| cursor.execute(&statement))
    }

    fn run_interaction(&self, interaction: Interaction) -> BoxFuture<'static, Result<Outcome>> {
        self.run_blocking(interaction)
    }
}

struct SqliteCursor<'a> {
    conn: &'a Connection,
    clock: &'a Mutex<MonotonicClock>,
}

impl SqliteCursor<'_> {
    fn select(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Sticky>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, row_to_sticky)?;
        Ok(rows.collect::<rusqlite::Result<Vec<Sticky>>>()?)
    }
}

impl Cursor for SqliteCursor<'_> {
    fn execute(&mut self, statement: &Statement) -> Result<Outcome> {
        trace!(statement = statement.name(), "sqlite execute");
        match statement {
            Statement::SelectBoard { board_id } => {
                let sql = format!(
                    "SELECT {STICKY_COLUMNS} FROM sticky \
                     WHERE board_id = ?1 ORDER BY updated_at, id"
                );
                Ok(Outcome::Rows(self.select(&sql, params![board_id])?))
            }
            Statement::SelectOne {
                board_id,
                sticky_id,
            } => {
                let sql =
                    format!("SELECT {STICKY_COLUMNS} FROM sticky WHERE id = ?1 AND board_id = ?2");
                Ok(Outcome::Rows(self.select(&sql, params![sticky_id, board_id])?))
            }
            Statement::Insert {
                board_id,
                text,
                x,
                y,
            } => {
                let updated_at = self.clock.lock().tick();
                self.conn.execute(
                    "INSERT INTO sticky (board_id, updated_at, text, x, y) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![board_id, updated_at.timestamp_micros(), text, x, y],
                )?;
                let id = self.conn.last_insert_rowid();
                debug!("inserted sticky {} on board {}", id, board_id);
                Ok(Outcome::Inserted(id))
            }
            Statement::Update {
                board_id,
                sticky_id,
                text,
                x,
                y,
            } => {
                let updated_at = self.clock.lock().tick();
                let changed = self.conn.execute(
                    "UPDATE sticky SET text = ?1, x = ?2, y = ?3, updated_at = ?4 \
                     WHERE board_id = ?5 AND id = ?6",
                    params![text, x, y, updated_at.timestamp_micros(), board_id, sticky_id],
                )?;
                Ok(Outcome::Affected(changed))
            }
            Statement::Delete {
                board_id,
                sticky_id,
            } => {
                let changed = self.conn.execute(
                    "DELETE FROM sticky WHERE board_id = ?1 AND id = ?2",
                    params![board_id, sticky_id],
                )?;
                Ok(Outcome::Affected(changed))
            }
        }
    }
}

fn row_to_sticky(row: &Row<'_>) -> rusqlite::Result<Sticky> {
    let micros: i64 = row.get(5)?;
    let updated_at = DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(5, micros))?;
    Ok(Sticky {
        id: row.get(0)?,
        board_id: row.get(1)?,
        text: row.get(2)?,
        x: row.get(3)?,
        y: row.get(4)?,
        updated_at,
    })
}
