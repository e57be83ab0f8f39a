use crate::clock::Clock;
use crate::config::TimerConfig;
use crate::database::CheckpointStore;
use crate::models::{ActiveTask, TaskId, TimerCheckpoint};
use crate::sync::SessionClient;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
mod core;
mod db;

/// Timer Engine - строгая FSM поверх checkpoint'а.
/// Создаётся явно (один на сессию приложения), клоны делят одно состояние.
#[derive(Clone)]
pub struct TimerEngine {
    pub(crate) inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    /// Состояние FSM + checkpoint. Никогда не держим lock через await.
    pub(crate) data: Mutex<EngineData>,
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) client: Arc<dyn SessionClient>,
    pub(crate) config: TimerConfig,
    /// Handle тикера: не более одного на вход в Running
    pub(crate) ticker: Mutex<Option<JoinHandle<()>>>,
    pub(crate) updates: watch::Sender<TimerSnapshot>,
    /// Номер последнего выданного запроса логов
    pub(crate) log_seq: AtomicU64,
}

#[derive(Debug, Clone)]
pub(crate) struct EngineData {
    pub(crate) state: TimerState,
    pub(crate) checkpoint: TimerCheckpoint,
    pub(crate) elapsed_seconds: u64,
    pub(crate) total_logged_seconds: u64,
    /// Задача, к которой относится total_logged_seconds (переживает stop)
    pub(crate) logs_task: Option<TaskId>,
    pub(crate) applied_log_seq: u64,
    pub(crate) persistence_healthy: bool,
}

impl Default for EngineData {
    fn default() -> Self {
        Self {
            state: TimerState::Idle,
            checkpoint: TimerCheckpoint::default(),
            elapsed_seconds: 0,
            total_logged_seconds: 0,
            logs_task: None,
            applied_log_seq: 0,
            persistence_healthy: true,
        }
    }
}

/// Состояние таймера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerState {
    /// Нет начатой сессии
    Idle,
    /// Интервал идёт
    Running,
    /// Сессия есть, время не копится
    Paused,
}

/// Снимок для UI: публикуется на каждом тике и переходе
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub state: TimerState,
    pub elapsed_seconds: u64,
    pub total_logged_seconds: u64,
    pub offset_ms: u64,
    pub start_epoch_ms: Option<i64>,
    pub active_task: Option<ActiveTask>,
    /// false, если последняя запись checkpoint'а не удалась
    pub persistence_healthy: bool,
}

impl EngineData {
    pub(crate) fn to_snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            state: self.state,
            elapsed_seconds: self.elapsed_seconds,
            total_logged_seconds: self.total_logged_seconds,
            offset_ms: self.checkpoint.offset_ms,
            start_epoch_ms: self.checkpoint.start_epoch_ms,
            active_task: self.checkpoint.active_task.clone(),
            persistence_healthy: self.persistence_healthy,
        }
    }
}

impl EngineInner {
    /// Poisoned mutex не валит таймер: данные внутри консистентны,
    /// т.к. мутации не паникуют посреди перехода
    pub(crate) fn lock_data(&self) -> MutexGuard<'_, EngineData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn lock_ticker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_ticker().take() {
            handle.abort();
        }
    }
}

impl TimerEngine {
    /// Создать движок и восстановить состояние из хранилища.
    /// Удалённый сервис при восстановлении не вызывается.
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        clock: Arc<dyn Clock>,
        client: Arc<dyn SessionClient>,
        config: TimerConfig,
    ) -> Self {
        let (updates, _) = watch::channel(EngineData::default().to_snapshot());
        let engine = Self {
            inner: Arc::new(EngineInner {
                data: Mutex::new(EngineData::default()),
                store,
                clock,
                client,
                config,
                ticker: Mutex::new(None),
                updates,
                log_seq: AtomicU64::new(0),
            }),
        };
        engine.restore_state();
        engine
    }

    /// Подписка на снимки (каждый тик и каждый переход)
    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.inner.updates.subscribe()
    }

    pub fn state(&self) -> TimerState {
        self.inner.lock_data().state
    }

    pub fn total_logged_seconds(&self) -> u64 {
        self.inner.lock_data().total_logged_seconds
    }

    pub fn active_task(&self) -> Option<ActiveTask> {
        self.inner.lock_data().checkpoint.active_task.clone()
    }

    /// Копия текущего checkpoint'а (то, что лежит или должно лежать в хранилище)
    pub fn checkpoint(&self) -> TimerCheckpoint {
        self.inner.lock_data().checkpoint.clone()
    }

    pub(crate) fn publish(&self, snapshot: TimerSnapshot) {
        self.inner.updates.send_replace(snapshot);
    }
}
