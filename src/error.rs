use crate::sync::{SessionError, SessionOp};
use serde::Serialize;
use thiserror::Error;

/// Ошибки таймера, которые видит UI.
/// Любая ошибка перехода означает: локальное состояние не изменилось.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("Could not start tracking: {0}")]
    SessionStartRejected(String),
    #[error("Could not pause tracking: {0}")]
    SessionPauseRejected(String),
    #[error("Could not resume tracking: {0}")]
    SessionResumeRejected(String),
    #[error("Could not stop tracking: {0}")]
    SessionStopRejected(String),
    #[error("Time tracking service unreachable: {0}")]
    TransportFailure(String),
    #[error("Timer state could not be saved: {0}")]
    PersistenceFailure(String),
    /// Только от TimerController: предыдущий переход ещё не завершился
    #[error("Another timer action is still in progress")]
    TransitionInFlight,
}

/// Вид ошибки без сообщения - для ветвления в UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SessionStartRejected,
    SessionPauseRejected,
    SessionResumeRejected,
    SessionStopRejected,
    TransportFailure,
    PersistenceFailure,
    TransitionInFlight,
}

impl TimerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TimerError::SessionStartRejected(_) => ErrorKind::SessionStartRejected,
            TimerError::SessionPauseRejected(_) => ErrorKind::SessionPauseRejected,
            TimerError::SessionResumeRejected(_) => ErrorKind::SessionResumeRejected,
            TimerError::SessionStopRejected(_) => ErrorKind::SessionStopRejected,
            TimerError::TransportFailure(_) => ErrorKind::TransportFailure,
            TimerError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            TimerError::TransitionInFlight => ErrorKind::TransitionInFlight,
        }
    }

    /// Отказ перехода `op` (сервер или локальная проверка предусловия)
    pub fn rejected(op: SessionOp, message: impl Into<String>) -> Self {
        let message = message.into();
        match op {
            SessionOp::Start => TimerError::SessionStartRejected(message),
            SessionOp::Pause => TimerError::SessionPauseRejected(message),
            SessionOp::Resume => TimerError::SessionResumeRejected(message),
            SessionOp::Stop => TimerError::SessionStopRejected(message),
        }
    }

    /// Сопоставление ошибки удалённого клиента с таксономией таймера.
    /// Отказ сервера (400/404/409/422) - отказ перехода; всё остальное - транспорт.
    pub fn from_session(op: SessionOp, err: SessionError) -> Self {
        match err {
            SessionError::Rejected { message, .. } => TimerError::rejected(op, message),
            other => TimerError::TransportFailure(other.to_string()),
        }
    }
}
