use crate::config::TimerConfig;
use crate::models::{SessionLog, SessionUpdate, TaskId};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ошибки удалённого клиента сессий (для разбора и логирования)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Сервер отклонил переход (400/404/409/422): конфликт состояния, нет открытой сессии
    Rejected { status: u16, message: String },
    /// Прочие неуспешные статусы: 5xx, а также 401/408/429 и т.п.
    Http { status: u16, message: String },
    /// Запрос не завершился: соединение, таймаут, обрыв тела
    Network(String),
    /// Ответ не разобрать
    Decode(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Rejected { status, message } => {
                write!(f, "Rejected ({}): {}", status, message)
            }
            SessionError::Http { status, message } => write!(f, "HTTP {}: {}", status, message),
            SessionError::Network(s) => write!(f, "Network: {}", s),
            SessionError::Decode(s) => write!(f, "Decode: {}", s),
        }
    }
}

impl std::error::Error for SessionError {}

/// Переход сессии на сервере
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOp {
    Start,
    Pause,
    Resume,
    Stop,
}

impl SessionOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOp::Start => "start",
            SessionOp::Pause => "pause",
            SessionOp::Resume => "resume",
            SessionOp::Stop => "stop",
        }
    }
}

impl fmt::Display for SessionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote Session Client: граница с сервером.
/// Движок видит только успех или типизированную ошибку - никакого HTTP.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn start(&self, task_id: TaskId, note: Option<&str>)
        -> Result<SessionUpdate, SessionError>;

    async fn pause(&self, task_id: TaskId, note: Option<&str>)
        -> Result<SessionUpdate, SessionError>;

    async fn resume(
        &self,
        task_id: TaskId,
        note: Option<&str>,
    ) -> Result<SessionUpdate, SessionError>;

    /// On success the server may return the finalized duration.
    async fn stop(&self, task_id: TaskId, note: Option<&str>)
        -> Result<SessionUpdate, SessionError>;

    async fn get_logs(&self, task_id: TaskId) -> Result<Vec<SessionLog>, SessionError>;
}

/// Вызов перехода по `SessionOp` - чтобы движок не дублировал match в каждом методе
pub(crate) async fn call_op(
    client: &dyn SessionClient,
    op: SessionOp,
    task_id: TaskId,
    note: Option<&str>,
) -> Result<SessionUpdate, SessionError> {
    match op {
        SessionOp::Start => client.start(task_id, note).await,
        SessionOp::Pause => client.pause(task_id, note).await,
        SessionOp::Resume => client.resume(task_id, note).await,
        SessionOp::Stop => client.stop(task_id, note).await,
    }
}

/// HTTP-реализация поверх reqwest.
/// Таймаут задаётся клиентом; движок своих таймаутов не вводит.
#[derive(Clone)]
pub struct HttpSessionClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_base_url: String,
    pub(crate) access_token: Option<String>,
    pub(crate) app_version: String,
}

impl HttpSessionClient {
    pub fn new(config: &TimerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!("[SESSION] Failed to build HTTP client ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            app_version: config.app_version.clone(),
        }
    }

    pub fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    fn op_url(&self, task_id: TaskId, op: SessionOp) -> String {
        format!("{}/tasks/{}/{}", self.api_base_url, task_id, op.as_str())
    }

    fn logs_url(&self, task_id: TaskId) -> String {
        format!("{}/tasks/{}/logs", self.api_base_url, task_id)
    }

    fn with_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("X-App-Version", &self.app_version);
        match &self.access_token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Построить и отправить POST для перехода; разобрать ответ
    async fn send_transition(
        &self,
        op: SessionOp,
        task_id: TaskId,
        note: Option<&str>,
    ) -> Result<SessionUpdate, SessionError> {
        let url = self.op_url(task_id, op);
        let body = match note {
            Some(note) => serde_json::json!({ "note": note }),
            None => serde_json::json!({}),
        };
        debug!("[SESSION] POST {}", url);

        let response = self
            .with_headers(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;

        let body = check_status(op.as_str(), task_id, response).await?;
        // 2xx = сервер применил переход. Тело - только метаданные,
        // нечитаемое тело не должно откатывать подтверждённый переход.
        if body.trim().is_empty() {
            return Ok(SessionUpdate::default());
        }
        let update = match serde_json::from_str::<SessionUpdate>(&body) {
            Ok(update) => update,
            Err(e) => {
                warn!(
                    "[SESSION] Task {} {} confirmed, but response body is unreadable: {}",
                    task_id, op, e
                );
                return Ok(SessionUpdate::default());
            }
        };
        if let Some(duration) = update.duration_seconds {
            info!(
                "[SESSION] Task {} {} confirmed, duration {}s",
                task_id, op, duration
            );
        }
        Ok(update)
    }
}

/// Статусы, которыми сервер отклоняет сам переход (конфликт состояния,
/// нет сессии, невалидный запрос). 401/408/429 и прочие - вызов не состоялся.
fn is_rejection(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 400 | 404 | 409 | 422)
}

/// Разложить статус ответа по таксономии: 2xx - тело, отказ перехода - Rejected, прочее - Http
async fn check_status(
    what: &str,
    task_id: TaskId,
    response: reqwest::Response,
) -> Result<String, SessionError> {
    let status = response.status();
    let status_code = status.as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| SessionError::Network(e.to_string()))?;

    if status.is_success() {
        return Ok(body);
    }

    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("Unknown").to_string()
    } else {
        body
    };

    if is_rejection(status) {
        warn!(
            "[SESSION] Task {} {} rejected, HTTP {}: {}",
            task_id, what, status_code, message
        );
        Err(SessionError::Rejected {
            status: status_code,
            message,
        })
    } else {
        warn!(
            "[SESSION] Task {} {} failed, HTTP {}: {}",
            task_id, what, status_code, message
        );
        Err(SessionError::Http {
            status: status_code,
            message,
        })
    }
}

#[async_trait]
impl SessionClient for HttpSessionClient {
    async fn start(
        &self,
        task_id: TaskId,
        note: Option<&str>,
    ) -> Result<SessionUpdate, SessionError> {
        self.send_transition(SessionOp::Start, task_id, note).await
    }

    async fn pause(
        &self,
        task_id: TaskId,
        note: Option<&str>,
    ) -> Result<SessionUpdate, SessionError> {
        self.send_transition(SessionOp::Pause, task_id, note).await
    }

    async fn resume(
        &self,
        task_id: TaskId,
        note: Option<&str>,
    ) -> Result<SessionUpdate, SessionError> {
        self.send_transition(SessionOp::Resume, task_id, note).await
    }

    async fn stop(
        &self,
        task_id: TaskId,
        note: Option<&str>,
    ) -> Result<SessionUpdate, SessionError> {
        self.send_transition(SessionOp::Stop, task_id, note).await
    }

    async fn get_logs(&self, task_id: TaskId) -> Result<Vec<SessionLog>, SessionError> {
        let url = self.logs_url(task_id);
        debug!("[SESSION] GET {}", url);
        let response = self
            .with_headers(self.client.get(&url))
            .send()
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?;

        let body = check_status("logs", task_id, response).await?;
        serde_json::from_str(&body).map_err(|e| SessionError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_built_from_base() {
        let config = TimerConfig {
            api_base_url: "https://pm.example.com/api/".into(),
            ..TimerConfig::default()
        };
        let client = HttpSessionClient::new(&config);
        assert_eq!(
            client.op_url(TaskId(7), SessionOp::Resume),
            "https://pm.example.com/api/tasks/7/resume"
        );
        assert_eq!(
            client.logs_url(TaskId(7)),
            "https://pm.example.com/api/tasks/7/logs"
        );
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::Rejected {
            status: 409,
            message: "another session is already running".into(),
        };
        assert_eq!(
            err.to_string(),
            "Rejected (409): another session is already running"
        );
        assert_eq!(SessionError::Network("timeout".into()).to_string(), "Network: timeout");
    }

    #[test]
    fn test_only_transition_conflicts_are_rejections() {
        for code in [400u16, 404, 409, 422] {
            let status = reqwest::StatusCode::from_u16(code).unwrap();
            assert!(is_rejection(status), "{}", code);
        }
        for code in [401u16, 403, 408, 429, 500, 503] {
            let status = reqwest::StatusCode::from_u16(code).unwrap();
            assert!(!is_rejection(status), "{}", code);
        }
    }
}
