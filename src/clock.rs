use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Источник времени (epoch ms). Все вычисления elapsed идут только через него.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Системные часы.
/// GUARD: никогда не возвращает значение меньше уже выданного (NTP, ручная смена времени назад).
pub struct SystemClock {
    last_ms: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            last_ms: AtomicI64::new(i64::MIN),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let prev = self.last_ms.fetch_max(wall, Ordering::AcqRel);
        wall.max(prev)
    }
}

/// Управляемые часы для тестов (и для тестов потребителей библиотеки)
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_never_goes_back() {
        let clock = SystemClock::new();
        let mut prev = clock.now_ms();
        for _ in 0..1000 {
            let now = clock.now_ms();
            assert!(now >= prev);
            prev = now;
        }
        assert!(prev > 1_600_000_000_000);
    }

    #[test]
    fn test_manual_clock_set_and_advance() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(4_000);
        assert_eq!(clock.now_ms(), 5_000);
        clock.set(0);
        assert_eq!(clock.now_ms(), 0);
    }
}
