//! 会话事件
//!
//! 控制器推送给界面层的事件

use serde::{Deserialize, Serialize};

use super::session::SessionPhase;

/// 视觉提示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisualCue {
    /// 完成一次重复
    GoodRep,
    CorrectingPosture,
    AdjustingTempo,
    GreatForm,
    PainMonitoring,
}

impl VisualCue {
    pub fn label(&self) -> &'static str {
        match self {
            Self::GoodRep => "Good Rep!",
            Self::CorrectingPosture => "Correcting Posture",
            Self::AdjustingTempo => "Adjusting Tempo",
            Self::GreatForm => "Great Form",
            Self::PainMonitoring => "Pain Monitoring",
        }
    }

    /// 从教练字幕中匹配关键词 (先匹配者优先)
    pub fn from_caption(caption: &str) -> Option<Self> {
        let lower = caption.to_lowercase();
        let patterns: [(Self, &[&str]); 4] = [
            (Self::CorrectingPosture, &["straight", "posture"]),
            (Self::AdjustingTempo, &["slow", "fast"]),
            (Self::GreatForm, &["good", "great", "perfect"]),
            (Self::PainMonitoring, &["pain", "hurt"]),
        ];

        patterns
            .into_iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
            .map(|(cue, _)| cue)
    }
}

/// 教练记录的疼痛
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PainReport {
    pub level: f64,
    pub location: Option<String>,
    /// 会话时间 (毫秒)
    pub at_ms: f64,
}

/// 界面事件
#[derive(Debug, Clone, PartialEq)]
pub enum CoachEvent {
    PhaseChanged { from: SessionPhase, to: SessionPhase },
    CountdownTick { remaining: u32 },
    RepCompleted { count: u32 },
    Cue(VisualCue),
    Caption(String),
    PainLogged(PainReport),
    Paused { reason: String },
}
