//! 分析流水线
//!
//! 一个采样节拍内按固定顺序执行: 采样 → 差分 → 跟踪

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::buffer::frame::{FrameSampler, RasterFrame, VideoFrame};
use crate::utils::time::TickGate;
use super::motion::{estimate_with, MotionConfig, MotionSample};
use super::tracker::{RepTracker, TrackerConfig, TrackerState, TrackerUpdate};

/// 分析参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub width: u32,
    pub height: u32,
    /// 分析间隔 (毫秒)，约 20Hz
    pub interval_ms: f64,
    pub motion: MotionConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            interval_ms: 50.0,
            motion: MotionConfig::default(),
        }
    }
}

/// 单个节拍的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// 源帧无数据，什么也没做
    NoFrame,
    /// 已采样，但未到分析间隔
    Sampled,
    /// 已采样，没有上一帧可供差分
    Primed,
    /// 完成一次分析
    Analysed {
        sample: MotionSample,
        update: TrackerUpdate,
    },
}

/// 分析流水线
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    sampler: FrameSampler,
    /// 上一次分析时的栅格副本
    previous: Option<RasterFrame>,
    tracker: RepTracker,
    gate: TickGate,
}

impl AnalysisPipeline {
    pub fn new(config: AnalysisConfig, tracker: TrackerConfig) -> Self {
        Self {
            sampler: FrameSampler::new(config.width, config.height),
            previous: None,
            tracker: RepTracker::new(tracker),
            gate: TickGate::new(config.interval_ms),
            config,
        }
    }

    /// 执行一个采样节拍
    pub fn tick(&mut self, frame: Option<&VideoFrame>, now_ms: f64) -> TickOutcome {
        let Some(frame) = frame else {
            return TickOutcome::NoFrame;
        };
        if !self.sampler.sample(frame) {
            return TickOutcome::NoFrame;
        }
        if !self.gate.try_pass(now_ms) {
            return TickOutcome::Sampled;
        }

        let Some(current) = self.sampler.raster() else {
            return TickOutcome::NoFrame;
        };

        let analysed = self.previous.as_ref().and_then(|prev| {
            estimate_with(
                &self.config.motion,
                &current.data,
                &prev.data,
                current.width,
                current.height,
            )
        });

        // 采样缓冲区会在下个节拍被覆盖，先复制出来
        match &mut self.previous {
            Some(prev) => prev.copy_from(current),
            None => self.previous = Some(current.clone()),
        }

        match analysed {
            Some(sample) => {
                let update = self.tracker.update(sample);
                trace!(
                    "motion score={:.1} cx={:.2} reps={}",
                    sample.score,
                    sample.centroid_x,
                    self.tracker.state().rep_count
                );
                TickOutcome::Analysed { sample, update }
            }
            None => TickOutcome::Primed,
        }
    }

    /// 当前节拍的栅格 (供上行图像使用)
    pub fn raster(&self) -> Option<&RasterFrame> {
        self.sampler.raster()
    }

    pub fn tracker_state(&self) -> &TrackerState {
        self.tracker.state()
    }

    /// 新会话开始
    pub fn reset(&mut self) {
        self.sampler.reset();
        self.previous = None;
        self.tracker.reset();
        self.gate.reset();
    }

    /// 暂停后恢复：丢弃旧帧，保留跟踪状态
    pub fn resume(&mut self) {
        self.sampler.reset();
        self.previous = None;
        self.gate.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u8) -> VideoFrame {
        VideoFrame::from_vec(vec![value; 64 * 48 * 4], 0.0, 64, 48)
    }

    #[test]
    fn test_first_tick_only_primes() {
        let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default(), TrackerConfig::default());

        assert_eq!(pipeline.tick(None, 0.0), TickOutcome::NoFrame);
        assert_eq!(pipeline.tick(Some(&frame(0)), 0.0), TickOutcome::Primed);
        assert_eq!(pipeline.tracker_state().rep_count, 0);
    }

    #[test]
    fn test_rate_limited_to_interval() {
        let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default(), TrackerConfig::default());

        pipeline.tick(Some(&frame(0)), 0.0);
        assert_eq!(pipeline.tick(Some(&frame(255)), 16.0), TickOutcome::Sampled);
        assert_eq!(pipeline.tick(Some(&frame(255)), 33.0), TickOutcome::Sampled);

        match pipeline.tick(Some(&frame(255)), 60.0) {
            TickOutcome::Analysed { sample, .. } => assert_eq!(sample.score, 100.0),
            other => panic!("expected analysis, got {:?}", other),
        }
        assert_eq!(pipeline.tracker_state().velocity, 100.0);
    }

    #[test]
    fn test_reset_drops_previous_frame() {
        let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default(), TrackerConfig::default());

        pipeline.tick(Some(&frame(0)), 0.0);
        pipeline.reset();
        assert!(pipeline.raster().is_none());
        assert_eq!(pipeline.tick(Some(&frame(255)), 100.0), TickOutcome::Primed);
    }

    #[test]
    fn test_resume_keeps_tracker() {
        let mut pipeline = AnalysisPipeline::new(AnalysisConfig::default(), TrackerConfig::default());

        pipeline.tick(Some(&frame(0)), 0.0);
        pipeline.tick(Some(&frame(255)), 60.0);
        let velocity = pipeline.tracker_state().velocity;

        pipeline.resume();
        assert_eq!(pipeline.tick(Some(&frame(0)), 70.0), TickOutcome::Primed);
        assert_eq!(pipeline.tracker_state().velocity, velocity);
    }
}
