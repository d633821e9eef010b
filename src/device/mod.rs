//! 摄像头与麦克风
//!
//! 硬件以 trait 注入，控制器只持有一个 `HardwareHandle`

pub mod synthetic;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::buffer::audio::AudioSink;
use crate::buffer::frame::VideoFrame;
use crate::error::Result;

/// 可停止的媒体轨道
pub trait MediaTrack: Send {
    fn stop(&mut self) -> Result<()>;
}

/// 视频轨道
pub trait VideoSource: MediaTrack {
    /// 当前帧；尚无数据时为 None
    fn current_frame(&mut self) -> Option<VideoFrame>;
}

/// 麦克风回调流 (每次回调一块 f32 采样)
pub type MicReceiver = mpsc::UnboundedReceiver<Vec<f32>>;

/// 设备获取能力
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// 获取摄像头 + 麦克风
    async fn acquire(&self) -> Result<HardwareHandle>;

    /// 打开教练语音的输出设备
    fn open_output(&self, sample_rate: u32) -> Result<Box<dyn AudioSink>>;
}

/// 摄像头 + 麦克风句柄
pub struct HardwareHandle {
    video: Box<dyn VideoSource>,
    audio: Box<dyn MediaTrack>,
    mic: Option<MicReceiver>,
    released: bool,
}

impl HardwareHandle {
    pub fn new(video: Box<dyn VideoSource>, audio: Box<dyn MediaTrack>, mic: MicReceiver) -> Self {
        Self {
            video,
            audio,
            mic: Some(mic),
            released: false,
        }
    }

    pub fn current_frame(&mut self) -> Option<VideoFrame> {
        if self.released {
            return None;
        }
        self.video.current_frame()
    }

    /// 取出麦克风回调流 (只能取一次)
    pub fn take_mic(&mut self) -> Option<MicReceiver> {
        self.mic.take()
    }

    /// 停止所有轨道；重复调用无操作
    ///
    /// 两条轨道各自停止，一条失败不影响另一条
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.mic = None;

        let video = self.video.stop();
        let audio = self.audio.stop();
        debug!("Hardware tracks stopped");
        video.and(audio)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
