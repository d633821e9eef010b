//! 帧采样
//!
//! 把摄像头帧镜像缩放到固定的低分辨率分析栅格

use bytes::Bytes;

/// 摄像头原始帧 (RGBA, 任意分辨率)
#[derive(Clone, Debug)]
pub struct VideoFrame {
    /// 帧数据 (RGBA, 零拷贝)
    pub data: Bytes,
    /// 时间戳 (毫秒)
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
}

impl VideoFrame {
    pub fn new(data: Bytes, timestamp: f64, width: u32, height: u32) -> Self {
        Self { data, timestamp, width, height }
    }

    /// 从 Vec<u8> 创建
    pub fn from_vec(data: Vec<u8>, timestamp: f64, width: u32, height: u32) -> Self {
        Self {
            data: Bytes::from(data),
            timestamp,
            width,
            height,
        }
    }

    /// 尺寸与数据长度是否一致
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * 4
    }
}

/// 分析栅格 (RGBA)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RasterFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RasterFrame {
    /// 全黑栅格
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 4],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// 复制另一栅格的内容，复用自身缓冲区
    pub fn copy_from(&mut self, other: &RasterFrame) {
        self.width = other.width;
        self.height = other.height;
        self.data.clear();
        self.data.extend_from_slice(&other.data);
    }

    /// 去掉 alpha 通道 (JPEG 只接受 RGB)
    pub fn to_rgb(&self) -> Vec<u8> {
        self.data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect()
    }
}

/// 帧采样器
///
/// 持有一个复用的栅格缓冲区，每次采样都会覆盖上一次的内容
pub struct FrameSampler {
    raster: RasterFrame,
    has_sample: bool,
}

impl FrameSampler {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            raster: RasterFrame::blank(width, height),
            has_sample: false,
        }
    }

    /// 镜像绘制一帧到栅格 (最近邻缩放)
    ///
    /// 源帧尚无有效数据时不做任何事，返回 false
    pub fn sample(&mut self, frame: &VideoFrame) -> bool {
        if !frame.is_well_formed() {
            return false;
        }

        let (dw, dh) = (self.raster.width as usize, self.raster.height as usize);
        let (sw, sh) = (frame.width as usize, frame.height as usize);
        let src = &frame.data;
        let dst = &mut self.raster.data;

        for y in 0..dh {
            let sy = y * sh / dh;
            for x in 0..dw {
                // 水平镜像: 目标最左列取源最右列
                let sx = (dw - 1 - x) * sw / dw;
                let s = (sy * sw + sx) * 4;
                let d = (y * dw + x) * 4;
                dst[d..d + 4].copy_from_slice(&src[s..s + 4]);
            }
        }

        self.has_sample = true;
        true
    }

    /// 当前栅格；尚未采样过时为 None
    pub fn raster(&self) -> Option<&RasterFrame> {
        self.has_sample.then_some(&self.raster)
    }

    pub fn reset(&mut self) {
        self.has_sample = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_left_column_red(width: u32, height: u32) -> VideoFrame {
        let mut data = vec![0u8; (width * height * 4) as usize];
        for y in 0..height {
            let i = (y * width * 4) as usize;
            data[i] = 255;
            data[i + 3] = 255;
        }
        VideoFrame::from_vec(data, 0.0, width, height)
    }

    #[test]
    fn test_sample_mirrors_horizontally() {
        let mut sampler = FrameSampler::new(64, 48);
        assert!(sampler.raster().is_none());

        let frame = frame_with_left_column_red(640, 480);
        assert!(sampler.sample(&frame));

        let raster = sampler.raster().unwrap();
        assert_eq!(raster.data.len(), 64 * 48 * 4);
        // 源最左列出现在栅格最右列
        assert_eq!(raster.pixel(63, 10)[0], 255);
        assert_eq!(raster.pixel(0, 10)[0], 0);
    }

    #[test]
    fn test_sample_ignores_empty_frame() {
        let mut sampler = FrameSampler::new(64, 48);
        let empty = VideoFrame::from_vec(Vec::new(), 0.0, 0, 0);
        assert!(!sampler.sample(&empty));
        assert!(sampler.raster().is_none());
    }

    #[test]
    fn test_to_rgb() {
        let raster = RasterFrame {
            width: 1,
            height: 2,
            data: vec![1, 2, 3, 255, 4, 5, 6, 255],
        };
        assert_eq!(raster.to_rgb(), vec![1, 2, 3, 4, 5, 6]);
    }
}
