//! Presentation Adapter: формат HH:MM:SS и действия для UI поверх TimerEngine.

use crate::engine::{TimerEngine, TimerSnapshot, TimerState};
use crate::error::TimerError;
use crate::models::{ActiveTask, TaskId};
use scopeguard::guard;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// 3725 → "01:02:05". Часы не ограничены двумя цифрами.
pub fn format_hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Ответ для UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerView {
    pub state: TimerState,
    pub display: String,
    pub elapsed_seconds: u64,
    pub total_logged_seconds: u64,
    pub total_logged_display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_task: Option<ActiveTask>,
    pub can_start: bool,
    pub can_pause: bool,
    pub can_resume: bool,
    pub can_stop: bool,
    /// Переход в полёте - все действия заблокированы
    pub busy: bool,
    pub persistence_healthy: bool,
}

impl TimerView {
    pub fn from_snapshot(snapshot: &TimerSnapshot, busy: bool) -> Self {
        let idle_ready = !busy && snapshot.state != TimerState::Running;
        Self {
            state: snapshot.state,
            display: format_hms(snapshot.elapsed_seconds),
            elapsed_seconds: snapshot.elapsed_seconds,
            total_logged_seconds: snapshot.total_logged_seconds,
            total_logged_display: format_hms(snapshot.total_logged_seconds),
            active_task: snapshot.active_task.clone(),
            can_start: idle_ready && snapshot.active_task.is_some(),
            can_pause: !busy && snapshot.state == TimerState::Running,
            can_resume: !busy && snapshot.state == TimerState::Paused,
            can_stop: !busy && snapshot.state != TimerState::Idle,
            busy,
            persistence_healthy: snapshot.persistence_healthy,
        }
    }
}

/// Действия UI. Движок не ставит переходы в очередь, поэтому контроллер
/// пропускает не более одного перехода одновременно (single-flight).
#[derive(Clone)]
pub struct TimerController {
    engine: TimerEngine,
    in_flight: Arc<AtomicBool>,
}

impl TimerController {
    pub fn new(engine: TimerEngine) -> Self {
        Self {
            engine,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn engine(&self) -> &TimerEngine {
        &self.engine
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn get_timer_state(&self) -> TimerView {
        TimerView::from_snapshot(&self.engine.snapshot(), self.is_busy())
    }

    pub async fn start_timer(&self, task_id: Option<TaskId>) -> Result<TimerView, TimerError> {
        self.run_exclusive(self.engine.start(task_id, None)).await
    }

    pub async fn pause_timer(&self) -> Result<TimerView, TimerError> {
        self.run_exclusive(self.engine.pause(None)).await
    }

    pub async fn resume_timer(&self) -> Result<TimerView, TimerError> {
        self.run_exclusive(self.engine.resume(None)).await
    }

    pub async fn stop_timer(&self) -> Result<TimerView, TimerError> {
        self.run_exclusive(self.engine.stop(None)).await
    }

    pub fn select_task(&self, task: ActiveTask) -> TimerView {
        self.engine.select_task(task);
        self.get_timer_state()
    }

    /// Panic guard: in_flight is always reset via scopeguard, even on panic or drop of the future
    async fn run_exclusive<F>(&self, action: F) -> Result<TimerView, TimerError>
    where
        F: Future<Output = Result<(), TimerError>>,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("[UI] Transition already in flight, rejecting action");
            return Err(TimerError::TransitionInFlight);
        }

        let _guard = guard((), |_| {
            self.in_flight.store(false, Ordering::Release);
        });

        action.await?;
        Ok(TimerView::from_snapshot(&self.engine.snapshot(), false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(59), "00:00:59");
        assert_eq!(format_hms(3725), "01:02:05");
        assert_eq!(format_hms(100 * 3600 + 1), "100:00:01");
    }

    fn snapshot(state: TimerState, task: bool) -> TimerSnapshot {
        TimerSnapshot {
            state,
            elapsed_seconds: 8,
            total_logged_seconds: 3600,
            offset_ms: 5000,
            start_epoch_ms: None,
            active_task: task.then(|| ActiveTask::new(7)),
            persistence_healthy: true,
        }
    }

    #[test]
    fn test_view_action_flags() {
        let view = TimerView::from_snapshot(&snapshot(TimerState::Idle, true), false);
        assert!(view.can_start && !view.can_pause && !view.can_resume && !view.can_stop);
        assert_eq!(view.display, "00:00:08");
        assert_eq!(view.total_logged_display, "01:00:00");

        let view = TimerView::from_snapshot(&snapshot(TimerState::Idle, false), false);
        assert!(!view.can_start);

        let view = TimerView::from_snapshot(&snapshot(TimerState::Running, true), false);
        assert!(!view.can_start && view.can_pause && !view.can_resume && view.can_stop);

        let view = TimerView::from_snapshot(&snapshot(TimerState::Paused, true), false);
        assert!(view.can_start && !view.can_pause && view.can_resume && view.can_stop);

        let view = TimerView::from_snapshot(&snapshot(TimerState::Paused, true), true);
        assert!(!view.can_start && !view.can_pause && !view.can_resume && !view.can_stop);
    }

    #[test]
    fn test_view_serialization() {
        let view = TimerView::from_snapshot(&snapshot(TimerState::Running, true), false);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "RUNNING");
        assert_eq!(json["display"], "00:00:08");
        assert_eq!(json["canPause"], true);
        assert_eq!(json["activeTask"]["id"], 7);
    }
}
