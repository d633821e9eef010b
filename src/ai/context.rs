//! 患者上下文注入
//!
//! 只读的患者档案与历史记录，拼入教练的系统指令

use serde::{Deserialize, Serialize};

/// 患者档案
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProfile {
    pub name: String,
    pub injury: String,
    pub start_date: String,
    pub current_phase: String,
}

/// 历史训练记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLog {
    pub date: String,
    pub pain_level_start: u8,
    pub pain_level_end: u8,
    pub completion_rate: u8,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub flagged_issues: Vec<String>,
}

/// 注入给教练的数据集
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientContext {
    pub profile: PatientProfile,
    pub history: Vec<SessionLog>,
    /// 本次训练的动作
    pub exercise: String,
}

impl Default for PatientContext {
    fn default() -> Self {
        Self {
            profile: PatientProfile {
                name: "Alex Mercer".to_string(),
                injury: "Post-Traumatic TBI & Right Hemiparesis".to_string(),
                start_date: "2025-01-15".to_string(),
                current_phase: "Motor Control & Gait Stability".to_string(),
            },
            history: vec![
                log("2025-05-12", 2, 6, 60, "Session terminated early due to reported lumbar pain. Compensatory leaning observed.", &["Lumbar compensation", "Early fatigue"]),
                log("2025-05-13", 3, 3, 95, "Excellent recovery session. Lower intensity helped reset pain baseline.", &[]),
                log("2025-05-14", 3, 4, 88, "Introduction of resistance bands successful. Form held for 80% of reps.", &["Left shoulder hiking"]),
            ],
            exercise: "Seated Trunk Rotations".to_string(),
        }
    }
}

fn log(date: &str, start: u8, end: u8, completion: u8, notes: &str, issues: &[&str]) -> SessionLog {
    SessionLog {
        date: date.to_string(),
        pain_level_start: start,
        pain_level_end: end,
        completion_rate: completion,
        notes: notes.to_string(),
        flagged_issues: issues.iter().map(|s| s.to_string()).collect(),
    }
}

impl PatientContext {
    /// 患者摘要 (最近 3 次记录)
    pub fn summary(&self) -> String {
        let recent = &self.history[self.history.len().saturating_sub(3)..];
        let lines: Vec<String> = recent
            .iter()
            .map(|h| format!(
                "- {}: Pain End {}/10, Issues: {}",
                h.date,
                h.pain_level_end,
                h.flagged_issues.join(", ")
            ))
            .collect();

        format!(
            "Patient: {}\nInjury: {}\nCurrent Phase: {}\nRecent History:\n{}",
            self.profile.name,
            self.profile.injury,
            self.profile.current_phase,
            lines.join("\n")
        )
    }

    /// 教练系统指令
    pub fn system_instruction(&self) -> String {
        let first_name = self.profile.name.split_whitespace().next().unwrap_or("there");
        format!(
            "You are \"NeuroAI\", an expert neuro-rehabilitation coach.\n\
             CONTEXT:\n{}\n\
             TASK: Monitor \"{}\".\n\
             PROTOCOL:\n\
             1. IMMEDIATE GREETING: \"Good to see you {}. Let's start with 10 slow rotations. Match the Blue Orb's tempo.\"\n\
             2. FEEDBACK: Short, punchy corrections. \"Shoulders down\", \"Twist further\", \"Good tempo\".\n\
             3. SAFETY: Stop if pain reported.",
            self.summary(),
            self.exercise,
            first_name
        )
    }
}
