//! 音频编解码与播放调度
//!
//! 上行: 麦克风 f32 → PCM16 (16kHz 单声道)
//! 下行: 教练 PCM16 (24kHz 单声道) → f32，按游标无缝排队播放

use crate::error::Result;

/// f32 采样转 PCM16 小端字节
///
/// 超出 [-1, 1] 的采样会被截断
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| {
            let v = (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect()
}

/// PCM16 小端字节转 f32 采样 (多余的奇数字节被忽略)
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

/// 音频输出设备
pub trait AudioSink: Send {
    /// 设备时钟 (秒)
    fn current_time(&self) -> f64;

    /// 在 `start_at` 时刻开始播放
    fn schedule(&mut self, samples: &[f32], sample_rate: u32, start_at: f64) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// 播放调度器
///
/// 维护单调前进的起播游标，保证音频块排队而不是重叠
pub struct PlaybackScheduler {
    sink: Box<dyn AudioSink>,
    sample_rate: u32,
    next_start: f64,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn AudioSink>, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            next_start: 0.0,
            closed: false,
        }
    }

    /// 排队一个 PCM16 音频块，返回实际起播时间
    pub fn enqueue_pcm16(&mut self, bytes: &[u8]) -> Result<Option<f64>> {
        if self.closed {
            return Ok(None);
        }
        let samples = decode_pcm16(bytes);
        if samples.is_empty() {
            return Ok(None);
        }

        let start = self.next_start.max(self.sink.current_time());
        self.sink.schedule(&samples, self.sample_rate, start)?;
        self.next_start = start + samples.len() as f64 / self.sample_rate as f64;

        Ok(Some(start))
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// 关闭输出；重复调用无副作用
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingSink {
        now: Arc<Mutex<f64>>,
        starts: Arc<Mutex<Vec<f64>>>,
        closes: Arc<Mutex<u32>>,
    }

    impl AudioSink for RecordingSink {
        fn current_time(&self) -> f64 {
            *self.now.lock()
        }

        fn schedule(&mut self, _samples: &[f32], _sample_rate: u32, start_at: f64) -> Result<()> {
            self.starts.lock().push(start_at);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            *self.closes.lock() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_pcm16_encoding() {
        let bytes = encode_pcm16(&[0.0, 0.5, -1.0, 1.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 16384);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), i16::MIN);
        // 截断而不是回绕
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), i16::MAX);

        let decoded = decode_pcm16(&bytes);
        assert!((decoded[1] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_chunks_queue_without_overlap() {
        let sink = RecordingSink::default();
        let now = sink.now.clone();
        let starts = sink.starts.clone();
        let mut scheduler = PlaybackScheduler::new(Box::new(sink), 24000);

        // 两个 0.5 秒的块
        let chunk = vec![0u8; 24000];
        scheduler.enqueue_pcm16(&chunk).unwrap();
        *now.lock() = 0.1;
        scheduler.enqueue_pcm16(&chunk).unwrap();

        assert_eq!(*starts.lock(), vec![0.0, 0.5]);

        // 设备时钟已越过游标，从当前时刻开始
        *now.lock() = 3.0;
        scheduler.enqueue_pcm16(&chunk).unwrap();
        assert_eq!(starts.lock()[2], 3.0);
        assert!((scheduler.next_start() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_close_is_idempotent() {
        let sink = RecordingSink::default();
        let closes = sink.closes.clone();
        let mut scheduler = PlaybackScheduler::new(Box::new(sink), 24000);

        scheduler.close().unwrap();
        scheduler.close().unwrap();
        assert_eq!(*closes.lock(), 1);
        assert_eq!(scheduler.enqueue_pcm16(&[0, 0]).unwrap(), None);
    }
}
