//! 运动估计
//!
//! 相邻两帧逐像素差分，得到运动能量和水平运动质心

use serde::{Deserialize, Serialize};

/// 单次估计结果
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionSample {
    /// 运动能量 [0, 100]
    pub score: f32,
    /// 水平质心 [-1, 1]，0 为画面中央
    pub centroid_x: f32,
}

/// 估计参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// 采样步长 (像素)
    pub stride: usize,
    /// RGB 差值和超过该值才算活动像素
    pub pixel_threshold: u32,
    /// 质心生效所需的最少活动像素
    pub min_active_pixels: usize,
    /// 能量分数增益
    pub score_gain: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            stride: 4,
            pixel_threshold: 40,
            min_active_pixels: 20,
            score_gain: 10.0,
        }
    }
}

/// 用默认参数估计
pub fn estimate(current: &[u8], previous: &[u8], width: u32, height: u32) -> Option<MotionSample> {
    estimate_with(&MotionConfig::default(), current, previous, width, height)
}

/// 差分两帧 RGBA 数据
///
/// 缓冲区尺寸不符时返回 None (调用方跳过本次节拍)
pub fn estimate_with(
    config: &MotionConfig,
    current: &[u8],
    previous: &[u8],
    width: u32,
    height: u32,
) -> Option<MotionSample> {
    let pixels = width as usize * height as usize;
    if pixels == 0 || current.len() != pixels * 4 || previous.len() != pixels * 4 {
        return None;
    }

    let step = 4 * config.stride.max(1);
    let mut total_diff = 0u64;
    let mut sum_x = 0u64;
    let mut active = 0usize;

    for i in (0..current.len()).step_by(step) {
        let diff = current[i].abs_diff(previous[i]) as u32
            + current[i + 1].abs_diff(previous[i + 1]) as u32
            + current[i + 2].abs_diff(previous[i + 2]) as u32;

        if diff > config.pixel_threshold {
            total_diff += diff as u64;
            sum_x += ((i / 4) % width as usize) as u64;
            active += 1;
        }
    }

    let score = (total_diff as f32 / pixels as f32 * config.score_gain).min(100.0);

    let centroid_x = if active >= config.min_active_pixels.max(1) {
        let avg_x = sum_x as f32 / active as f32;
        avg_x / width as f32 * 2.0 - 1.0
    } else {
        0.0
    };

    Some(MotionSample { score, centroid_x })
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 64;
    const H: u32 = 48;

    fn solid(value: u8) -> Vec<u8> {
        vec![value; (W * H * 4) as usize]
    }

    /// 把满足条件的像素改成白色
    fn paint(base: &[u8], pred: impl Fn(u32, u32) -> bool) -> Vec<u8> {
        let mut out = base.to_vec();
        for y in 0..H {
            for x in 0..W {
                if pred(x, y) {
                    let i = ((y * W + x) * 4) as usize;
                    out[i..i + 3].copy_from_slice(&[255, 255, 255]);
                }
            }
        }
        out
    }

    #[test]
    fn test_identical_frames() {
        let frame = paint(&solid(30), |x, _| x % 3 == 0);
        let sample = estimate(&frame, &frame, W, H).unwrap();
        assert_eq!(sample.score, 0.0);
        assert_eq!(sample.centroid_x, 0.0);
    }

    #[test]
    fn test_centroid_sign() {
        let prev = solid(0);

        let right = paint(&prev, |x, _| x > W / 2);
        let sample = estimate(&right, &prev, W, H).unwrap();
        assert!(sample.centroid_x > 0.0);

        let left = paint(&prev, |x, _| x < W / 2);
        let sample = estimate(&left, &prev, W, H).unwrap();
        assert!(sample.centroid_x < 0.0);
    }

    #[test]
    fn test_score_saturates() {
        let sample = estimate(&solid(255), &solid(0), W, H).unwrap();
        assert_eq!(sample.score, 100.0);
        // 全画面运动，质心接近中央偏左 (采样列为 0,4,...,60)
        assert!(sample.centroid_x.abs() < 0.1);
    }

    #[test]
    fn test_few_active_pixels_keep_center() {
        let prev = solid(0);
        // 只有第一行最右侧的 19 个采样点变化
        let cur = paint(&prev, |x, y| y < 19 && x == 60);
        let sample = estimate(&cur, &prev, W, H).unwrap();
        assert!(sample.score > 0.0);
        assert_eq!(sample.centroid_x, 0.0);

        // 第 20 个采样点让质心生效
        let cur = paint(&prev, |x, y| y < 20 && x == 60);
        let sample = estimate(&cur, &prev, W, H).unwrap();
        assert!(sample.centroid_x > 0.8);
    }

    #[test]
    fn test_below_threshold_is_ignored() {
        // 每通道差 13，总和 39 未超过阈值
        let sample = estimate(&solid(13), &solid(0), W, H).unwrap();
        assert_eq!(sample.score, 0.0);
    }

    #[test]
    fn test_malformed_buffers() {
        let frame = solid(0);
        assert!(estimate(&frame, &frame[..16], W, H).is_none());
        assert!(estimate(&frame, &frame, 0, 0).is_none());
    }
}
