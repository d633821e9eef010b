//! 媒体上行复用
//!
//! 音频按麦克风原生回调节奏转发，图像按挂钟限速 (默认 1 帧/秒)。
//! 发送失败只记录，不打断采样与分析

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ai::client::SessionHandle;
use crate::ai::types::ClientMessage;
use crate::buffer::audio::encode_pcm16;
use crate::buffer::frame::RasterFrame;
use crate::error::Result;
use crate::utils::time::TickGate;

/// 上行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    /// 图像上行间隔 (毫秒)
    pub image_interval_ms: f64,
    /// JPEG 质量 (1-100)
    pub jpeg_quality: u8,
    /// 麦克风采样率
    pub input_sample_rate: u32,
    /// 麦克风回调缓冲大小
    pub mic_buffer_size: usize,
    /// 出站队列容量
    pub queue_capacity: usize,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            image_interval_ms: 1000.0,
            jpeg_quality: 50,
            input_sample_rate: 16000,
            mic_buffer_size: 4096,
            queue_capacity: 64,
        }
    }
}

/// 上行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkStats {
    pub audio_sent: u64,
    pub images_sent: u64,
    pub dropped: u64,
}

/// 把栅格编码为 JPEG
pub fn encode_jpeg(raster: &RasterFrame, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode(&raster.to_rgb(), raster.width, raster.height, ExtendedColorType::Rgb8)?;
    Ok(out)
}

/// 上行复用器
pub struct UplinkMultiplexer {
    config: UplinkConfig,
    image_gate: TickGate,
    stats: UplinkStats,
}

impl UplinkMultiplexer {
    pub fn new(config: UplinkConfig) -> Self {
        Self {
            image_gate: TickGate::new(config.image_interval_ms),
            config,
            stats: UplinkStats::default(),
        }
    }

    /// 转发一次麦克风回调 (不限速)
    pub fn forward_audio(&mut self, session: &SessionHandle, samples: &[f32]) {
        let pcm = encode_pcm16(samples);
        if self.dispatch(session, ClientMessage::audio(&pcm)) {
            self.stats.audio_sent += 1;
        }
    }

    /// 到了图像间隔就编码当前栅格并转发
    pub fn maybe_forward_image(&mut self, session: &SessionHandle, raster: &RasterFrame, now_ms: f64) {
        if !self.image_gate.try_pass(now_ms) {
            return;
        }
        match encode_jpeg(raster, self.config.jpeg_quality) {
            Ok(jpeg) => {
                if self.dispatch(session, ClientMessage::image(&jpeg)) {
                    self.stats.images_sent += 1;
                }
            }
            Err(e) => {
                debug!("Image chunk skipped: {}", e);
                self.stats.dropped += 1;
            }
        }
    }

    fn dispatch(&mut self, session: &SessionHandle, msg: ClientMessage) -> bool {
        match session.send(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!("Uplink chunk dropped: {}", e);
                self.stats.dropped += 1;
                false
            }
        }
    }

    pub fn stats(&self) -> UplinkStats {
        self.stats
    }

    pub fn reset(&mut self) {
        self.image_gate.reset();
        self.stats = UplinkStats::default();
    }
}

impl Default for UplinkMultiplexer {
    fn default() -> Self {
        Self::new(UplinkConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::{CoachConnector, LoopbackConnector};
    use crate::ai::types::IMAGE_MIME;

    fn raster() -> RasterFrame {
        RasterFrame::blank(64, 48)
    }

    #[test]
    fn test_encode_jpeg() {
        let jpeg = encode_jpeg(&raster(), 50).unwrap();
        // SOI 标记
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_image_cadence_is_wall_clock_gated() {
        let connector = LoopbackConnector::new();
        let session = connector.open("coach").await.unwrap();
        let mut tap = connector.take_tap().unwrap();
        let mut uplink = UplinkMultiplexer::default();

        // 60Hz 节拍持续 2.5 秒
        for i in 0..150 {
            uplink.maybe_forward_image(&session.handle, &raster(), i as f64 * 16.7);
        }
        assert_eq!(uplink.stats().images_sent, 3);

        let msg = serde_json::to_value(tap.outbound.try_recv().unwrap()).unwrap();
        assert_eq!(msg["realtimeInput"]["mediaChunks"][0]["mimeType"], IMAGE_MIME);
    }

    #[tokio::test]
    async fn test_every_audio_callback_is_forwarded() {
        let connector = LoopbackConnector::new();
        let session = connector.open("coach").await.unwrap();
        let mut uplink = UplinkMultiplexer::default();

        for _ in 0..10 {
            uplink.forward_audio(&session.handle, &[0.0; 4096]);
        }
        assert_eq!(uplink.stats().audio_sent, 10);
    }

    #[tokio::test]
    async fn test_failed_sends_are_counted_not_raised() {
        let connector = LoopbackConnector::new();
        let mut session = connector.open("coach").await.unwrap();
        let mut uplink = UplinkMultiplexer::default();

        session.handle.close();
        uplink.forward_audio(&session.handle, &[0.1; 16]);
        uplink.maybe_forward_image(&session.handle, &raster(), 0.0);

        assert_eq!(uplink.stats(), UplinkStats { audio_sent: 0, images_sent: 0, dropped: 2 });
    }
}
