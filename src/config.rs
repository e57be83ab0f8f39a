use serde::Deserialize;
use tracing::warn;

/// Конфигурация таймера (api_base_url, таймауты, app_version, тик)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub api_base_url: String,
    pub http_timeout_secs: u64,
    /// App version sent in X-App-Version header for debugging version skew
    pub app_version: String,
    /// Bearer-токен; получение и обновление токенов - забота вызывающего кода
    pub access_token: Option<String>,
    pub tick_interval_ms: u64,
    /// Ключ, под которым checkpoint лежит в хранилище
    pub checkpoint_namespace: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            http_timeout_secs: 30,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            access_token: None,
            tick_interval_ms: 1000,
            checkpoint_namespace: "timer".to_string(),
        }
    }
}

impl TimerConfig {
    /// Значения по умолчанию + переопределения из TASKTIMER_* переменных окружения
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("TASKTIMER_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup("TASKTIMER_HTTP_TIMEOUT_SECS") {
            match raw.parse() {
                Ok(secs) => config.http_timeout_secs = secs,
                Err(e) => warn!("[CONFIG] Ignoring TASKTIMER_HTTP_TIMEOUT_SECS={}: {}", raw, e),
            }
        }
        if let Some(token) = lookup("TASKTIMER_ACCESS_TOKEN") {
            if !token.is_empty() {
                config.access_token = Some(token);
            }
        }
        if let Some(raw) = lookup("TASKTIMER_TICK_INTERVAL_MS") {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => config.tick_interval_ms = ms,
                Ok(_) => warn!("[CONFIG] TASKTIMER_TICK_INTERVAL_MS must be > 0, keeping default"),
                Err(e) => warn!("[CONFIG] Ignoring TASKTIMER_TICK_INTERVAL_MS={}: {}", raw, e),
            }
        }
        if let Some(ns) = lookup("TASKTIMER_NAMESPACE") {
            if !ns.is_empty() {
                config.checkpoint_namespace = ns;
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = TimerConfig::default();
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.checkpoint_namespace, "timer");
        assert_eq!(config.app_version, env!("CARGO_PKG_VERSION"));
        assert!(config.access_token.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TASKTIMER_API_URL", "https://pm.example.com/api/"),
            ("TASKTIMER_HTTP_TIMEOUT_SECS", "5"),
            ("TASKTIMER_ACCESS_TOKEN", "abc"),
            ("TASKTIMER_TICK_INTERVAL_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = TimerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_base_url, "https://pm.example.com/api");
        assert_eq!(config.http_timeout_secs, 5);
        assert_eq!(config.access_token.as_deref(), Some("abc"));
        // Невалидное значение игнорируется
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.checkpoint_namespace, "timer");
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: TimerConfig =
            serde_json::from_str(r#"{"api_base_url":"http://10.0.0.2/api"}"#).unwrap();
        assert_eq!(config.api_base_url, "http://10.0.0.2/api");
        assert_eq!(config.http_timeout_secs, 30);
    }
}
