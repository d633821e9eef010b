//! 时间工具

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

/// 单调时钟 (毫秒)
///
/// 所有节拍门控都以毫秒浮点数计时，测试中可直接传入合成时间
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// 基于 tokio `Instant` 的系统时钟，起点为创建时刻
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// 手动推进的时钟 (测试与回放)
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<Mutex<f64>>);

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self(Arc::new(Mutex::new(start_ms)))
    }

    pub fn set(&self, now_ms: f64) {
        *self.0.lock() = now_ms;
    }

    pub fn advance(&self, delta_ms: f64) {
        *self.0.lock() += delta_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *self.0.lock()
    }
}

/// 节拍门控
///
/// 距上次放行超过 `interval_ms` 才再次放行；首次调用总是放行
#[derive(Debug, Clone)]
pub struct TickGate {
    interval_ms: f64,
    last: Option<f64>,
}

impl TickGate {
    pub fn new(interval_ms: f64) -> Self {
        Self { interval_ms, last: None }
    }

    /// 是否放行，放行时记录时间
    pub fn try_pass(&mut self, now_ms: f64) -> bool {
        let open = match self.last {
            Some(last) => now_ms - last > self.interval_ms,
            None => true,
        };
        if open {
            self.last = Some(now_ms);
        }
        open
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }
}

/// 会话计时显示：一小时内 MM:SS，超过后 H:MM:SS；负数和 NaN 记为 0
pub fn format_session_clock(secs: f64) -> String {
    let total = if secs.is_finite() { secs.max(0.0) as u64 } else { 0 };
    let (hours, rest) = (total / 3600, total % 3600);
    if hours == 0 {
        format!("{:02}:{:02}", rest / 60, rest % 60)
    } else {
        format!("{}:{:02}:{:02}", hours, rest / 60, rest % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_clock_display() {
        assert_eq!(format_session_clock(59.9), "00:59");
        assert_eq!(format_session_clock(600.0), "10:00");
        assert_eq!(format_session_clock(3599.0), "59:59");
        assert_eq!(format_session_clock(3725.0), "1:02:05");
        assert_eq!(format_session_clock(-3.0), "00:00");
        assert_eq!(format_session_clock(f64::NAN), "00:00");
    }

    #[test]
    fn test_tick_gate() {
        let mut gate = TickGate::new(50.0);

        assert!(gate.try_pass(0.0));
        assert!(!gate.try_pass(16.0));
        // 恰好 50ms 不放行
        assert!(!gate.try_pass(50.0));
        assert!(gate.try_pass(51.0));
        assert!(!gate.try_pass(100.0));

        gate.reset();
        assert!(gate.try_pass(100.0));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10.0);
        clock.advance(5.0);
        assert_eq!(clock.now_ms(), 15.0);
        clock.set(1.0);
        assert_eq!(clock.clone().now_ms(), 1.0);
    }
}
