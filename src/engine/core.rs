use crate::engine::{EngineData, TimerEngine, TimerSnapshot, TimerState};
use crate::error::TimerError;
use crate::models::{ActiveTask, TaskId};
use crate::sync::{self, SessionOp};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

impl TimerEngine {
    /// Переход: Idle → Running или Paused → Running (новая серверная сессия).
    /// `task_id` переопределяет выбранную задачу; без него нужна `select_task`.
    pub async fn start(&self, task_id: Option<TaskId>, note: Option<&str>) -> Result<(), TimerError> {
        self.transition(SessionOp::Start, task_id, note).await
    }

    /// Переход: Running → Paused. Идущий интервал сворачивается в offset.
    pub async fn pause(&self, note: Option<&str>) -> Result<(), TimerError> {
        self.transition(SessionOp::Pause, None, note).await
    }

    /// Переход: Paused → Running. Offset сохраняется, начинается новый интервал.
    pub async fn resume(&self, note: Option<&str>) -> Result<(), TimerError> {
        self.transition(SessionOp::Resume, None, note).await
    }

    /// Переход: Running/Paused → Idle. Сессия закрыта, checkpoint очищен.
    pub async fn stop(&self, note: Option<&str>) -> Result<(), TimerError> {
        self.transition(SessionOp::Stop, None, note).await
    }

    /// Выбрать задачу. Без удалённого вызова, допустимо в любом состоянии.
    pub fn select_task(&self, task: ActiveTask) {
        let (checkpoint, task_changed) = {
            let mut data = self.inner.lock_data();
            let task_changed = data.logs_task != Some(task.id);
            info!("[FSM] Task {} selected (state {:?})", task.id, data.state);
            data.checkpoint.active_task = Some(task.clone());
            if task_changed {
                // Сумма относилась к другой задаче
                data.logs_task = Some(task.id);
                data.total_logged_seconds = 0;
            }
            (data.checkpoint.clone(), task_changed)
        };

        self.persist(&checkpoint);
        self.publish_current();
        if task_changed {
            self.spawn_log_refresh(task.id);
        }
    }

    /// Общий путь всех переходов:
    /// проверка предусловия → удалённый вызов → (только при успехе) мутация + checkpoint.
    async fn transition(
        &self,
        op: SessionOp,
        requested: Option<TaskId>,
        note: Option<&str>,
    ) -> Result<(), TimerError> {
        let task = self.check_precondition(op, requested)?;
        debug!("[FSM] {} requested for task {}", op, task.id);

        // Lock не держим: здесь точка приостановки
        let update = sync::call_op(self.inner.client.as_ref(), op, task.id, note)
            .await
            .map_err(|e| {
                warn!("[FSM] Remote {} for task {} failed: {}", op, task.id, e);
                TimerError::from_session(op, e)
            })?;

        self.apply(op, task.clone());

        if let Some(duration) = update.duration_seconds {
            info!("[TIMER] Task {} {}: server duration {}s", task.id, op, duration);
        }
        self.spawn_log_refresh(task.id);
        Ok(())
    }

    /// Локальная проверка; нарушение = тот же вид отказа, что дал бы сервер
    fn check_precondition(
        &self,
        op: SessionOp,
        requested: Option<TaskId>,
    ) -> Result<ActiveTask, TimerError> {
        let data = self.inner.lock_data();
        let current = data.checkpoint.active_task.clone();

        let state_ok = match op {
            SessionOp::Start => data.state != TimerState::Running,
            SessionOp::Pause => data.state == TimerState::Running,
            SessionOp::Resume => data.state == TimerState::Paused,
            SessionOp::Stop => data.state != TimerState::Idle,
        };
        if !state_ok {
            warn!("[FSM] Invalid transition: {} from {:?}", op, data.state);
            let message = match (op, data.state) {
                (SessionOp::Start, _) => "timer is already running",
                (SessionOp::Pause, TimerState::Paused) => "timer is already paused",
                (SessionOp::Pause, _) => "timer is not running",
                (SessionOp::Resume, TimerState::Running) => "timer is already running",
                (SessionOp::Resume, _) => "no paused session to resume",
                (SessionOp::Stop, _) => "no open session to stop",
            };
            return Err(TimerError::rejected(op, message));
        }

        let task = match (op, requested) {
            (SessionOp::Start, Some(id)) => match current {
                Some(task) if task.id == id => Some(task),
                _ => Some(ActiveTask::new(id)),
            },
            _ => current,
        };
        task.ok_or_else(|| TimerError::rejected(op, "no task selected"))
    }

    /// Мутация после подтверждения сервера. Время берётся в момент применения.
    fn apply(&self, op: SessionOp, task: ActiveTask) {
        let now = self.inner.clock.now_ms();
        let (snapshot, checkpoint, state) = {
            let mut guard = self.inner.lock_data();
            let data = &mut *guard;
            let cp = &mut data.checkpoint;
            match op {
                SessionOp::Start => {
                    cp.active_task = Some(task.clone());
                    if cp.start_epoch_ms.is_none() {
                        cp.start_epoch_ms = Some(now);
                    }
                    cp.is_tracking = true;
                    data.state = TimerState::Running;
                }
                SessionOp::Pause => {
                    let delta = cp.running_delta_ms(now);
                    cp.offset_ms = cp.offset_ms.saturating_add(delta);
                    cp.start_epoch_ms = None;
                    cp.is_tracking = false;
                    data.state = TimerState::Paused;
                }
                SessionOp::Resume => {
                    cp.start_epoch_ms = Some(now);
                    cp.is_tracking = true;
                    data.state = TimerState::Running;
                }
                SessionOp::Stop => {
                    *cp = Default::default();
                    data.state = TimerState::Idle;
                }
            }
            data.elapsed_seconds = data.checkpoint.elapsed_seconds_at(now);
            if data.logs_task != Some(task.id) {
                data.logs_task = Some(task.id);
                data.total_logged_seconds = 0;
            }
            (data.to_snapshot(), data.checkpoint.clone(), data.state)
        };

        info!(
            "[FSM] {} applied: task={}, offset={}ms, elapsed={}s",
            op, task.id, checkpoint.offset_ms, snapshot.elapsed_seconds
        );

        if op == SessionOp::Stop {
            self.persist_cleared();
        } else {
            self.persist(&checkpoint);
        }
        self.publish_current();

        match state {
            TimerState::Running => self.start_ticker(),
            TimerState::Paused | TimerState::Idle => self.stop_ticker(),
        }
    }

    /// Пересчёт отображаемого времени. Никогда не инкрементирует счётчик:
    /// пропущенные тики не влияют на результат.
    pub fn tick(&self) -> TimerSnapshot {
        let now = self.inner.clock.now_ms();
        let snapshot = {
            let mut data = self.inner.lock_data();
            recompute(&mut data, now);
            data.to_snapshot()
        };
        self.publish(snapshot.clone());
        snapshot
    }

    /// Текущий снимок с elapsed на момент вызова (без публикации)
    pub fn snapshot(&self) -> TimerSnapshot {
        let now = self.inner.clock.now_ms();
        let mut data = self.inner.lock_data().clone();
        recompute(&mut data, now);
        data.to_snapshot()
    }

    pub(crate) fn publish_current(&self) {
        let snapshot = self.inner.lock_data().to_snapshot();
        self.publish(snapshot);
    }

    /// Запустить тикер. Повторный вызов при живом тикере ничего не делает.
    pub(crate) fn start_ticker(&self) {
        let mut slot = self.inner.lock_ticker();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(_) => {
                warn!("[TICK] No tokio runtime, elapsed time is computed on demand only");
                return;
            }
        };

        let period = Duration::from_millis(self.inner.config.tick_interval_ms.max(1));
        let weak = Arc::downgrade(&self.inner);
        // Отсчёт от входа в Running, а не от первого poll задачи
        let first_tick = Instant::now() + period;
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(first_tick, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                // Движок уничтожен - тикер завершается сам
                let Some(inner) = weak.upgrade() else { break };
                TimerEngine { inner }.tick();
            }
        });
        debug!("[TICK] Ticker started ({}ms)", period.as_millis());
        *slot = Some(handle);
    }

    pub(crate) fn stop_ticker(&self) {
        if let Some(handle) = self.inner.lock_ticker().take() {
            handle.abort();
            debug!("[TICK] Ticker cancelled");
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.inner
            .lock_ticker()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Обновить total_logged_seconds и дождаться результата
    pub async fn refresh_logs(&self) -> Result<u64, TimerError> {
        let task_id = self.inner.lock_data().logs_task;
        match task_id {
            Some(id) => self.refresh_logs_for(id).await,
            None => Ok(0),
        }
    }

    async fn refresh_logs_for(&self, task_id: TaskId) -> Result<u64, TimerError> {
        let seq = self.inner.log_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let logs = self.inner.client.get_logs(task_id).await.map_err(|e| {
            warn!("[SESSION] Failed to load logs for task {}: {}", task_id, e);
            TimerError::TransportFailure(e.to_string())
        })?;
        let total: u64 = logs
            .iter()
            .fold(0u64, |acc, log| acc.saturating_add(log.duration_seconds));

        let applied = {
            let mut data = self.inner.lock_data();
            // Более поздний запрос уже применён или задача сменилась - результат устарел
            if seq > data.applied_log_seq && data.logs_task == Some(task_id) {
                data.applied_log_seq = seq;
                data.total_logged_seconds = total;
                true
            } else {
                false
            }
        };
        if applied {
            debug!("[SESSION] Task {} total logged {}s", task_id, total);
            self.publish_current();
        } else {
            debug!("[SESSION] Dropping stale log refresh #{} for task {}", seq, task_id);
        }
        Ok(total)
    }

    /// Fire-and-forget: переход не ждёт логов
    fn spawn_log_refresh(&self, task_id: TaskId) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let engine = self.clone();
        runtime.spawn(async move {
            let _ = engine.refresh_logs_for(task_id).await;
        });
    }

    /// Остановить тикер и сохранить состояние (logout / закрытие приложения).
    /// Сессию на сервере не закрывает.
    pub fn shutdown(&self) {
        self.stop_ticker();
        if let Err(e) = self.save_checkpoint() {
            warn!("[SHUTDOWN] {}", e);
        } else {
            info!("[SHUTDOWN] Timer state saved");
        }
    }
}

/// elapsed = floor((offset + running delta) / 1000); в Running не убывает
fn recompute(data: &mut EngineData, now: i64) {
    let computed = data.checkpoint.elapsed_seconds_at(now);
    data.elapsed_seconds = match data.state {
        TimerState::Running => computed.max(data.elapsed_seconds),
        TimerState::Paused | TimerState::Idle => computed,
    };
}
