//! 合成设备
//!
//! 离线演示与测试用：摄像头画出一根随姿态移动的亮条，麦克风产生低音量正弦波

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, trace};

use crate::buffer::audio::AudioSink;
use crate::buffer::frame::VideoFrame;
use crate::error::{CoachError, Result};
use super::{HardwareHandle, MediaDevices, MediaTrack, VideoSource};

const BACKGROUND: u8 = 20;
const SUBJECT: u8 = 255;

/// 被拍摄者的水平位置 (画面镜像后的坐标, [-1, 1])
///
/// None 表示摄像头尚无画面
#[derive(Clone, Default)]
pub struct SubjectPose(Arc<Mutex<Option<f32>>>);

impl SubjectPose {
    pub fn at(x: f32) -> Self {
        Self(Arc::new(Mutex::new(Some(x))))
    }

    pub fn set(&self, x: f32) {
        *self.0.lock() = Some(x.clamp(-1.0, 1.0));
    }

    pub fn clear(&self) {
        *self.0.lock() = None;
    }

    pub fn get(&self) -> Option<f32> {
        *self.0.lock()
    }
}

/// 合成摄像头
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    pose: SubjectPose,
    stopped: Arc<AtomicBool>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, pose: SubjectPose) -> Self {
        Self {
            width,
            height,
            pose,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn render(&self, x: f32) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![BACKGROUND; w * h * 4];

        // 画面会被镜像，源坐标取反
        let center = (1.0 - x) / 2.0 * w as f32;
        let half = w as f32 / 16.0;
        let x0 = (center - half).max(0.0) as usize;
        let x1 = ((center + half) as usize).min(w);

        for y in 0..h {
            for px in x0..x1 {
                let i = (y * w + px) * 4;
                data[i..i + 3].fill(SUBJECT);
            }
        }
        for alpha in data.iter_mut().skip(3).step_by(4) {
            *alpha = 255;
        }
        data
    }
}

impl MediaTrack for SyntheticCamera {
    fn stop(&mut self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl VideoSource for SyntheticCamera {
    fn current_frame(&mut self) -> Option<VideoFrame> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let x = self.pose.get()?;
        Some(VideoFrame::from_vec(self.render(x), 0.0, self.width, self.height))
    }
}

/// 合成麦克风轨道
pub struct SyntheticMicTrack {
    stopped: Arc<AtomicBool>,
}

impl MediaTrack for SyntheticMicTrack {
    fn stop(&mut self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// 合成扬声器：只记录排队的音频块
pub struct SyntheticSpeaker {
    origin: Instant,
    scheduled: Arc<AtomicU32>,
}

impl AudioSink for SyntheticSpeaker {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, samples: &[f32], sample_rate: u32, start_at: f64) -> Result<()> {
        trace!("Coach audio: {} samples @{}Hz at {:.3}s", samples.len(), sample_rate, start_at);
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 合成设备
pub struct SyntheticDevices {
    pose: SubjectPose,
    width: u32,
    height: u32,
    sample_rate: u32,
    buffer_size: usize,
    live_mic: bool,
    fail_with: Option<String>,
    acquired: Arc<AtomicU32>,
    scheduled: Arc<AtomicU32>,
}

impl SyntheticDevices {
    pub fn new(pose: SubjectPose) -> Self {
        Self {
            pose,
            width: 640,
            height: 480,
            sample_rate: 16000,
            buffer_size: 4096,
            live_mic: false,
            fail_with: None,
            acquired: Arc::new(AtomicU32::new(0)),
            scheduled: Arc::new(AtomicU32::new(0)),
        }
    }

    /// 获取设备总是失败 (模拟权限被拒)
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::new(SubjectPose::default())
        }
    }

    /// 启动后台任务按原生回调节奏产生音频块
    pub fn with_live_mic(mut self, sample_rate: u32, buffer_size: usize) -> Self {
        self.live_mic = true;
        self.sample_rate = sample_rate;
        self.buffer_size = buffer_size;
        self
    }

    /// 成功获取的次数
    pub fn acquire_count(&self) -> u32 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// 扬声器已排队的音频块数
    pub fn scheduled_chunks(&self) -> u32 {
        self.scheduled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn acquire(&self) -> Result<HardwareHandle> {
        if let Some(reason) = &self.fail_with {
            return Err(CoachError::HardwareUnavailable(reason.clone()));
        }

        let camera = SyntheticCamera::new(self.width, self.height, self.pose.clone());
        let stopped = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        if self.live_mic {
            let stopped = stopped.clone();
            let (rate, size) = (self.sample_rate, self.buffer_size);
            let period = Duration::from_secs_f64(size as f64 / rate as f64);
            tokio::spawn(async move {
                let mut phase = 0usize;
                let mut interval = tokio::time::interval(period);
                while !stopped.load(Ordering::SeqCst) {
                    interval.tick().await;
                    let chunk: Vec<f32> = (0..size)
                        .map(|i| {
                            let t = (phase + i) as f32 / rate as f32;
                            0.05 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
                        })
                        .collect();
                    phase += size;
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
            });
        }

        self.acquired.fetch_add(1, Ordering::SeqCst);
        info!("Synthetic camera {}x{} and microphone acquired", self.width, self.height);

        Ok(HardwareHandle::new(
            Box::new(camera),
            Box::new(SyntheticMicTrack { stopped }),
            rx,
        ))
    }

    fn open_output(&self, _sample_rate: u32) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(SyntheticSpeaker {
            origin: Instant::now(),
            scheduled: self.scheduled.clone(),
        }))
    }
}
