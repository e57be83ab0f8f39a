use crate::clock::SystemClock;
use crate::config::TimerConfig;
use crate::database::{CheckpointStore, Database, MemoryStore, StoreError};
use crate::engine::{TimerEngine, TimerState};
use crate::error::TimerError;
use crate::models::TimerCheckpoint;
use crate::sync::HttpSessionClient;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

impl TimerEngine {
    /// Движок с SQLite-хранилищем, системными часами и HTTP-клиентом.
    /// GUARD: не удалось открыть БД → работаем в памяти (состояние не переживёт перезапуск).
    pub fn open(db_path: &Path, config: TimerConfig) -> Self {
        let store = open_store(db_path, &config.checkpoint_namespace);
        let client = Arc::new(HttpSessionClient::new(&config));
        Self::new(store, Arc::new(SystemClock::new()), client, config)
    }

    /// Явно сохранить checkpoint (например, при закрытии приложения)
    pub fn save_checkpoint(&self) -> Result<(), TimerError> {
        let (checkpoint, state) = {
            let data = self.inner.lock_data();
            (data.checkpoint.clone(), data.state)
        };
        let result = if state == TimerState::Idle && checkpoint == TimerCheckpoint::default() {
            self.inner.store.clear()
        } else {
            self.inner.store.save(&checkpoint)
        };
        self.record_persistence(result)
            .map_err(|e| TimerError::PersistenceFailure(e.to_string()))
    }

    /// Запись после перехода. Ошибка не фатальна: таймер продолжает работать в памяти.
    pub(crate) fn persist(&self, checkpoint: &TimerCheckpoint) {
        if let Err(e) = self.record_persistence(self.inner.store.save(checkpoint)) {
            error!("[TIMER] Failed to save checkpoint: {}. Continuing in memory.", e);
        }
    }

    pub(crate) fn persist_cleared(&self) {
        if let Err(e) = self.record_persistence(self.inner.store.clear()) {
            error!("[TIMER] Failed to clear checkpoint: {}. Continuing in memory.", e);
        }
    }

    fn record_persistence(&self, result: Result<(), StoreError>) -> Result<(), StoreError> {
        let healthy = result.is_ok();
        let changed = {
            let mut data = self.inner.lock_data();
            let changed = data.persistence_healthy != healthy;
            data.persistence_healthy = healthy;
            changed
        };
        if changed && healthy {
            info!("[TIMER] Checkpoint storage is writable again");
        }
        result
    }

    /// Восстановить состояние из checkpoint'а.
    /// GUARD: НИКОГДА не падать на ошибке восстановления - стартуем из Idle.
    pub(crate) fn restore_state(&self) {
        let checkpoint = match self.inner.store.load() {
            Ok(Some(cp)) => cp,
            Ok(None) => {
                info!("[RECOVERY] No saved checkpoint found, starting Idle");
                return;
            }
            Err(e) => {
                error!(
                    "[RECOVERY] Failed to load checkpoint: {}. Starting Idle.",
                    e
                );
                self.inner.lock_data().persistence_healthy = false;
                self.publish_current();
                return;
            }
        };

        let checkpoint = if checkpoint.is_consistent() {
            checkpoint
        } else {
            warn!(
                "[RECOVERY] Inconsistent checkpoint (is_tracking={}, start={:?}), repairing",
                checkpoint.is_tracking, checkpoint.start_epoch_ms
            );
            checkpoint.normalized()
        };

        let now = self.inner.clock.now_ms();
        let state = if checkpoint.is_tracking {
            TimerState::Running
        } else if checkpoint.has_session_data() {
            TimerState::Paused
        } else {
            // Задача без накопленного времени: выбрана, но не начата
            TimerState::Idle
        };

        if let (TimerState::Running, Some(start)) = (state, checkpoint.start_epoch_ms) {
            if start > now {
                warn!(
                    "[RECOVERY] Clock skew detected: start ({}) is after now ({}). Running delta clamped to 0.",
                    start, now
                );
            }
        }

        let elapsed = checkpoint.elapsed_seconds_at(now);
        {
            let mut data = self.inner.lock_data();
            data.state = state;
            data.elapsed_seconds = elapsed;
            data.logs_task = checkpoint.active_task.as_ref().map(|t| t.id);
            data.checkpoint = checkpoint;
        }

        info!(
            "[RECOVERY] Restored state={:?}, elapsed={}s",
            state, elapsed
        );
        self.publish_current();

        if state == TimerState::Running {
            self.start_ticker();
        }
    }
}

/// Auto-recovery from corrupted DB: backup and retry once; otherwise fall back to memory
fn open_store(db_path: &Path, namespace: &str) -> Arc<dyn CheckpointStore> {
    let Some(path_str) = db_path.to_str() else {
        warn!(
            "[DB] Database path contains invalid UTF-8: {}. Using in-memory store.",
            db_path.display()
        );
        return Arc::new(MemoryStore::new());
    };

    match Database::new(path_str, namespace) {
        Ok(db) => Arc::new(db),
        Err(StoreError::Corrupted(detail)) if db_path.exists() => {
            let backup = db_path.with_extension(format!("corrupted.{}", Utc::now().timestamp()));
            if let Err(e) = std::fs::rename(db_path, &backup) {
                error!(
                    "[DB] Corrupted DB ({}) could not be moved to {:?}: {}. Using in-memory store.",
                    detail, backup, e
                );
                return Arc::new(MemoryStore::new());
            }
            info!("[DB] Corrupted DB backed up to {:?}, starting fresh", backup);
            match Database::new(path_str, namespace) {
                Ok(db) => Arc::new(db),
                Err(e) => {
                    error!("[DB] Failed to create fresh database: {}. Using in-memory store.", e);
                    Arc::new(MemoryStore::new())
                }
            }
        }
        Err(e) => {
            error!("[DB] Failed to open {}: {}. Using in-memory store.", db_path.display(), e);
            Arc::new(MemoryStore::new())
        }
    }
}
