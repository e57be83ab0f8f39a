//! Ядро тайм-трекинга: FSM сессии работы над задачей, checkpoint для
//! восстановления после перезапуска и синхронизация с удалённым сервисом сессий.
//!
//! Поток данных: действие UI → переход TimerEngine → вызов SessionClient →
//! при успехе мутация состояния и запись checkpoint'а → тик пересчитывает elapsed по часам.

mod clock;
mod config;
mod database;
mod engine;
mod error;
mod models;
mod presentation;
mod sync;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::TimerConfig;
pub use crate::database::{CheckpointStore, Database, MemoryStore, StoreError, StoreResult};
pub use crate::engine::{TimerEngine, TimerSnapshot, TimerState};
pub use crate::error::{ErrorKind, TimerError};
pub use crate::models::{ActiveTask, SessionLog, SessionUpdate, TaskId, TimerCheckpoint};
pub use crate::presentation::{format_hms, TimerController, TimerView};
pub use crate::sync::{HttpSessionClient, SessionClient, SessionError, SessionOp};


/// Инициализация логирования: по умолчанию info (если RUST_LOG не задан).
/// Повторный вызов (или чужой subscriber) ничего не ломает.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
