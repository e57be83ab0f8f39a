use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Идентификатор задачи на сервере (`/tasks/{id}/...`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        TaskId(id)
    }
}

/// Задача, к которой привязана текущая сессия
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTask {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl ActiveTask {
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            title: None,
            project: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}

/// Персистентный снимок таймера - единственный источник истины между перезапусками.
///
/// Инвариант: `is_tracking == true` ⇔ `start_epoch_ms.is_some()`.
/// Пока таймер не идёт, прошедшее время равно ровно `offset_ms`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerCheckpoint {
    pub is_tracking: bool,
    #[serde(default)]
    pub start_epoch_ms: Option<i64>,
    /// Время всех завершённых интервалов текущей сессии (без идущего интервала)
    #[serde(default)]
    pub offset_ms: u64,
    #[serde(default)]
    pub active_task: Option<ActiveTask>,
}

impl TimerCheckpoint {
    pub fn is_consistent(&self) -> bool {
        self.is_tracking == self.start_epoch_ms.is_some()
    }

    /// Привести повреждённый снимок к инварианту.
    /// Tracking без start → пауза с сохранённым offset; start без tracking → start отбрасываем.
    pub fn normalized(mut self) -> Self {
        if self.is_tracking && self.start_epoch_ms.is_none() {
            self.is_tracking = false;
        } else if !self.is_tracking && self.start_epoch_ms.is_some() {
            self.start_epoch_ms = None;
        }
        self
    }

    /// Длительность идущего интервала. Старт в будущем (clock skew) даёт 0, а не отрицательное время.
    pub fn running_delta_ms(&self, now_ms: i64) -> u64 {
        match (self.is_tracking, self.start_epoch_ms) {
            (true, Some(start)) => now_ms.saturating_sub(start).max(0) as u64,
            _ => 0,
        }
    }

    pub fn elapsed_ms_at(&self, now_ms: i64) -> u64 {
        self.offset_ms.saturating_add(self.running_delta_ms(now_ms))
    }

    pub fn elapsed_seconds_at(&self, now_ms: i64) -> u64 {
        self.elapsed_ms_at(now_ms) / 1000
    }

    /// Есть ли что восстанавливать как Paused: только накопленное время.
    /// Выбранная задача без offset - это Idle с задачей (select_task до start),
    /// иначе после перезагрузки UI предлагал бы resume/stop для сессии,
    /// которую сервер не открывал. Пауза в ту же миллисекунду, что и start,
    /// тоже восстановится как Idle.
    pub fn has_session_data(&self) -> bool {
        self.offset_ms > 0
    }
}

/// Одна завершённая сессия из `GET /tasks/{id}/logs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLog {
    #[serde(deserialize_with = "seconds_floor")]
    pub duration_seconds: u64,
}

/// Метаданные, которые сервер может вернуть на переход (stop возвращает итоговую длительность)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    #[serde(default, deserialize_with = "optional_seconds_floor")]
    pub duration_seconds: Option<u64>,
}

/// Сервер отдаёт длительность как JSON number: дробная часть отбрасывается,
/// отрицательное или NaN даёт 0
fn floor_seconds(raw: f64) -> u64 {
    if raw.is_finite() && raw > 0.0 {
        raw.floor() as u64
    } else {
        0
    }
}

fn seconds_floor<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(floor_seconds)
}

fn optional_seconds_floor<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.map(floor_seconds))
}
