//! 动作次数与稳定性跟踪
//!
//! 消费运动估计结果：平滑质量分、峰值活动范围、稳定性，
//! 并用带滞回的三态机统计 中央→侧向→中央 的完整重复

use serde::{Deserialize, Serialize};

use super::motion::MotionSample;

/// 重复周期相位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepPhase {
    Center,
    Left,
    Right,
}

impl Default for RepPhase {
    fn default() -> Self {
        Self::Center
    }
}

/// 跟踪参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// 质量分平滑系数
    pub smoothing_alpha: f64,
    /// 质量目标 = 100 - score * quality_gain
    pub quality_gain: f64,
    /// 稳定性 = 100 - score * stability_gain
    pub stability_gain: f64,
    /// 质心到倾斜角的比例 (度)
    pub lean_scale_deg: f64,
    /// |质心| 超过该值进入侧向
    pub engage_threshold: f64,
    /// |质心| 低于该值回到中央
    pub disengage_threshold: f64,
    pub initial_quality: f64,
    pub initial_stability: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.1,
            quality_gain: 2.0,
            stability_gain: 5.0,
            lean_scale_deg: 35.0,
            engage_threshold: 0.3,
            disengage_threshold: 0.1,
            initial_quality: 80.0,
            initial_stability: 95.0,
        }
    }
}

/// 跟踪器状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    pub smoothed_quality: f64,
    pub peak_range_of_motion: f64,
    pub stability: f64,
    /// 最近一次的原始运动能量
    pub velocity: f64,
    pub rep_phase: RepPhase,
    pub rep_count: u32,
}

impl TrackerState {
    fn initial(config: &TrackerConfig) -> Self {
        Self {
            smoothed_quality: config.initial_quality,
            peak_range_of_motion: 0.0,
            stability: config.initial_stability,
            velocity: 0.0,
            rep_phase: RepPhase::Center,
            rep_count: 0,
        }
    }
}

/// 单次更新的输出
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerUpdate {
    /// 倾斜角 (度)，正值为右倾
    pub lean_angle: f64,
    /// 本次是否完成了一次重复
    pub rep_completed: bool,
}

/// 跟踪器
pub struct RepTracker {
    config: TrackerConfig,
    state: TrackerState,
}

impl RepTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let state = TrackerState::initial(&config);
        Self { config, state }
    }

    /// 处理一个运动样本
    pub fn update(&mut self, sample: MotionSample) -> TrackerUpdate {
        let score = sample.score as f64;
        let cx = sample.centroid_x as f64;
        let c = &self.config;
        let s = &mut self.state;

        let lean_angle = cx * c.lean_scale_deg;

        let target = 100.0 - score * c.quality_gain;
        s.smoothed_quality =
            (s.smoothed_quality * (1.0 - c.smoothing_alpha) + target * c.smoothing_alpha).floor();

        s.stability = (100.0 - score * c.stability_gain).max(0.0);
        s.peak_range_of_motion = s.peak_range_of_motion.max(cx.abs() * 100.0).min(100.0);
        s.velocity = score;

        let mut rep_completed = false;
        if cx.abs() > c.engage_threshold {
            if s.rep_phase == RepPhase::Center {
                s.rep_phase = if cx > 0.0 { RepPhase::Right } else { RepPhase::Left };
            }
        } else if cx.abs() < c.disengage_threshold && s.rep_phase != RepPhase::Center {
            s.rep_count += 1;
            s.rep_phase = RepPhase::Center;
            rep_completed = true;
        }

        TrackerUpdate { lean_angle, rep_completed }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// 会话开始时恢复初始值
    pub fn reset(&mut self) {
        self.state = TrackerState::initial(&self.config);
    }
}

impl Default for RepTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(centroid_x: f32) -> MotionSample {
        MotionSample { score: 0.0, centroid_x }
    }

    #[test]
    fn test_counts_full_cycles() {
        let mut tracker = RepTracker::default();
        let mut completed = 0;

        for cx in [0.0, 0.5, 0.5, 0.05, 0.0, 0.5, 0.05] {
            if tracker.update(at(cx)).rep_completed {
                completed += 1;
            }
        }

        assert_eq!(tracker.state().rep_count, 2);
        assert_eq!(completed, 2);
        assert_eq!(tracker.state().rep_phase, RepPhase::Center);
    }

    #[test]
    fn test_hysteresis_band() {
        let mut tracker = RepTracker::default();

        for i in 0..20 {
            let cx = if i % 2 == 0 { 0.31 } else { 0.29 };
            tracker.update(at(cx));
        }

        assert_eq!(tracker.state().rep_count, 0);
        assert_eq!(tracker.state().rep_phase, RepPhase::Right);
    }

    #[test]
    fn test_side_never_switches_directly() {
        let mut tracker = RepTracker::default();

        tracker.update(at(-0.6));
        assert_eq!(tracker.state().rep_phase, RepPhase::Left);
        tracker.update(at(0.6));
        assert_eq!(tracker.state().rep_phase, RepPhase::Left);
        tracker.update(at(0.0));
        assert_eq!(tracker.state().rep_phase, RepPhase::Center);
        assert_eq!(tracker.state().rep_count, 1);
    }

    #[test]
    fn test_quality_converges_without_overshoot() {
        let mut tracker = RepTracker::default();
        let sample = MotionSample { score: 5.0, centroid_x: 0.0 };
        let target = 90.0;

        let mut prev = tracker.state().smoothed_quality;
        for _ in 0..200 {
            tracker.update(sample);
            let q = tracker.state().smoothed_quality;
            assert!(q >= prev);
            assert!(q <= target);
            prev = q;
        }
        assert!(target - prev <= 10.0);
    }

    #[test]
    fn test_quality_blend_from_negative_start() {
        let mut tracker = RepTracker::new(TrackerConfig {
            initial_quality: -99.0,
            ..TrackerConfig::default()
        });

        // -99 * 0.9 + 91 * 0.1 落在 -80 略下方，向下取整
        tracker.update(MotionSample { score: 4.5, centroid_x: 0.0 });
        assert_eq!(tracker.state().smoothed_quality, -81.0);
    }

    #[test]
    fn test_peak_range_is_monotonic() {
        let mut tracker = RepTracker::default();
        let mut prev = 0.0;

        for cx in [0.2, -0.7, 0.1, 0.0, 0.4, -1.0, 0.3] {
            tracker.update(at(cx));
            let rom = tracker.state().peak_range_of_motion;
            assert!(rom >= prev);
            assert!(rom <= 100.0);
            prev = rom;
        }
        assert_eq!(prev, 100.0);
    }

    #[test]
    fn test_lean_and_stability() {
        let mut tracker = RepTracker::default();
        let update = tracker.update(MotionSample { score: 30.0, centroid_x: 0.5 });

        assert!((update.lean_angle - 17.5).abs() < 1e-6);
        assert_eq!(tracker.state().stability, 0.0);
        assert_eq!(tracker.state().velocity, 30.0);

        tracker.reset();
        assert_eq!(tracker.state().smoothed_quality, 80.0);
        assert_eq!(tracker.state().stability, 95.0);
    }
}
