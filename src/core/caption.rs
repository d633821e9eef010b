//! 字幕与视觉提示
//!
//! 教练转写增量拼成字幕，一段时间无更新后自动清空

use super::event::VisualCue;

/// 字幕配置
#[derive(Debug, Clone)]
pub struct CaptionConfig {
    /// 无更新多久后清空字幕 (毫秒)
    pub timeout_ms: f64,
    /// 视觉提示显示时长 (毫秒)
    pub cue_duration_ms: f64,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000.0,
            cue_duration_ms: 2000.0,
        }
    }
}

/// 字幕板
pub struct CaptionBoard {
    config: CaptionConfig,
    text: String,
    last_update: f64,
    cue: Option<(VisualCue, f64)>,
}

impl CaptionBoard {
    pub fn new(config: CaptionConfig) -> Self {
        Self {
            config,
            text: String::new(),
            last_update: 0.0,
            cue: None,
        }
    }

    /// 追加转写增量，返回新触发的视觉提示
    pub fn push_delta(&mut self, delta: &str, now_ms: f64) -> Option<VisualCue> {
        self.expire(now_ms);
        self.text.push_str(delta);
        self.last_update = now_ms;

        let cue = VisualCue::from_caption(&self.text)?;
        self.show_cue(cue, now_ms);
        Some(cue)
    }

    pub fn show_cue(&mut self, cue: VisualCue, now_ms: f64) {
        self.cue = Some((cue, now_ms));
    }

    /// 清理过期内容，字幕被清空时返回 true
    pub fn expire(&mut self, now_ms: f64) -> bool {
        if let Some((_, at)) = self.cue {
            if now_ms - at >= self.config.cue_duration_ms {
                self.cue = None;
            }
        }
        if !self.text.is_empty() && now_ms - self.last_update >= self.config.timeout_ms {
            self.text.clear();
            return true;
        }
        false
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cue(&self) -> Option<VisualCue> {
        self.cue.map(|(cue, _)| cue)
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cue = None;
    }
}

impl Default for CaptionBoard {
    fn default() -> Self {
        Self::new(CaptionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_accumulate_and_expire() {
        let mut board = CaptionBoard::default();

        board.push_delta("Shoulders ", 0.0);
        board.push_delta("down", 1000.0);
        assert_eq!(board.text(), "Shoulders down");

        // 距最后一次更新不足 5 秒
        assert!(!board.expire(5500.0));
        assert!(board.expire(6000.0));
        assert_eq!(board.text(), "");
    }

    #[test]
    fn test_new_delta_after_timeout_starts_fresh() {
        let mut board = CaptionBoard::default();
        board.push_delta("Old line. ", 0.0);
        board.push_delta("New", 10_000.0);
        assert_eq!(board.text(), "New");
    }

    #[test]
    fn test_cue_lifetime() {
        let mut board = CaptionBoard::default();

        assert_eq!(board.push_delta("Great job", 0.0), Some(VisualCue::GreatForm));
        assert_eq!(board.cue(), Some(VisualCue::GreatForm));

        board.expire(1999.0);
        assert!(board.cue().is_some());
        board.expire(2000.0);
        assert!(board.cue().is_none());
    }
}
