use crate::models::{ActiveTask, TimerCheckpoint};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Checkpoint payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Database corruption detected: {0}")]
    Corrupted(String),
    #[error("Store mutex poisoned: {0}")]
    Poisoned(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Checkpoint Store: хранение без логики. Пишет только TimerEngine.
pub trait CheckpointStore: Send + Sync {
    /// `Ok(None)` - ничего не сохранено (первый запуск или после stop)
    fn load(&self) -> StoreResult<Option<TimerCheckpoint>>;

    /// Полная перезапись. Повторная запись того же снимка ничего не меняет.
    fn save(&self, checkpoint: &TimerCheckpoint) -> StoreResult<()>;

    fn clear(&self) -> StoreResult<()>;
}

/// Log IO-related DB errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation: caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!("[DB] {}: Disk full. Free space on drive.", context);
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[DB] {}: Permission denied or read-only. Check data directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[DB] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// SQLite-хранилище checkpoint'а. Одна строка на namespace.
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
    namespace: String,
}

impl Database {
    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 1;

    pub fn new(db_path: &str, namespace: &str) -> StoreResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn, namespace)
    }

    /// БД в памяти процесса (не переживает перезапуск)
    pub fn in_memory(namespace: &str) -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, namespace)
    }

    fn from_connection(conn: Connection, namespace: &str) -> StoreResult<Self> {
        // GUARD: Integrity check on startup, detect corruption before init
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| {
                use rusqlite::ffi::ErrorCode;
                let corrupted = matches!(
                    &e,
                    rusqlite::Error::SqliteFailure(ffi_err, _)
                        if matches!(ffi_err.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
                );
                if corrupted {
                    StoreError::Corrupted(e.to_string())
                } else {
                    StoreError::Sqlite(e)
                }
            })?;
        if !integrity.eq_ignore_ascii_case("ok") {
            return Err(StoreError::Corrupted(integrity));
        }

        // WAL - лучшая защита от corruption при падении процесса; для :memory: не применяется
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!(
                "[DB] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                e
            );
        }
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");

        let db = Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Безопасная блокировка соединения с обработкой poisoned mutex
    fn lock_conn(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn run_migrations(&self) -> StoreResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS timer_checkpoint (
                namespace TEXT PRIMARY KEY,
                is_tracking INTEGER NOT NULL DEFAULT 0,
                start_epoch_ms INTEGER,
                offset_ms INTEGER NOT NULL DEFAULT 0,
                active_task TEXT,
                updated_at INTEGER NOT NULL
            )",
                [],
            )?;
            info!("[DB] Created timer_checkpoint schema");
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }
}

impl CheckpointStore for Database {
    fn load(&self) -> StoreResult<Option<TimerCheckpoint>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT is_tracking, start_epoch_ms, offset_ms, active_task
                 FROM timer_checkpoint WHERE namespace = ?1",
                params![self.namespace],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, Option<i64>>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((is_tracking, start_epoch_ms, offset_ms, task_json)) = row else {
            return Ok(None);
        };

        let active_task = match task_json {
            Some(raw) => Some(serde_json::from_str::<ActiveTask>(&raw)?),
            None => None,
        };

        Ok(Some(TimerCheckpoint {
            is_tracking,
            start_epoch_ms,
            // Отрицательный offset возможен только при ручной правке файла
            offset_ms: offset_ms.max(0) as u64,
            active_task,
        }))
    }

    /// GUARD: Использует транзакцию для атомарности (защита от partial writes)
    fn save(&self, checkpoint: &TimerCheckpoint) -> StoreResult<()> {
        let task_json = match &checkpoint.active_task {
            Some(task) => Some(serde_json::to_string(task)?),
            None => None,
        };
        let offset_ms = i64::try_from(checkpoint.offset_ms).unwrap_or(i64::MAX);
        let now = Utc::now().timestamp();

        let conn = self.lock_conn()?;
        conn.execute("BEGIN IMMEDIATE TRANSACTION", []).map_err(|e| {
            log_io_error_if_any("save checkpoint begin", &e);
            e
        })?;

        let result = conn.execute(
            "INSERT INTO timer_checkpoint
                (namespace, is_tracking, start_epoch_ms, offset_ms, active_task, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(namespace) DO UPDATE SET
                is_tracking = ?2,
                start_epoch_ms = ?3,
                offset_ms = ?4,
                active_task = ?5,
                updated_at = ?6",
            params![
                self.namespace,
                checkpoint.is_tracking,
                checkpoint.start_epoch_ms,
                offset_ms,
                task_json,
                now
            ],
        );

        match result {
            Ok(_) => {
                conn.execute("COMMIT", []).map_err(|e| {
                    log_io_error_if_any("save checkpoint commit", &e);
                    let _ = conn.execute("ROLLBACK", []);
                    e
                })?;
                Ok(())
            }
            Err(e) => {
                log_io_error_if_any("save checkpoint", &e);
                error!("[DB] Failed to save checkpoint: {}. Rolling back.", e);
                let _ = conn.execute("ROLLBACK", []);
                Err(e.into())
            }
        }
    }

    fn clear(&self) -> StoreResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM timer_checkpoint WHERE namespace = ?1",
            params![self.namespace],
        )
        .map_err(|e| {
            log_io_error_if_any("clear checkpoint", &e);
            e
        })?;
        Ok(())
    }
}

/// Хранилище в памяти: fallback без файла БД и основа для тестов.
/// Режим `set_failing(true)` имитирует недоступное хранилище.
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<TimerCheckpoint>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(checkpoint: TimerCheckpoint) -> Self {
        Self {
            slot: Mutex::new(Some(checkpoint)),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Сколько успешных save/clear было выполнено
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("storage is not writable".into()));
        }
        Ok(())
    }
}

impl CheckpointStore for MemoryStore {
    fn load(&self) -> StoreResult<Option<TimerCheckpoint>> {
        self.check_available()?;
        let slot = self
            .slot
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(slot.clone())
    }

    fn save(&self, checkpoint: &TimerCheckpoint) -> StoreResult<()> {
        self.check_available()?;
        let mut slot = self
            .slot
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        *slot = Some(checkpoint.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        self.check_available()?;
        let mut slot = self
            .slot
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        *slot = None;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
