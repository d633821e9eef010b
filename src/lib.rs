//! 康复训练实时教练核心库
//!
//! 摄像头帧差分得到运动能量与水平质心，驱动重复计数与稳定性评分；
//! 同一路视频以低频率上行给远端 AI 教练，会话控制器负责全部硬件与连接的生命周期

pub mod ai;
pub mod buffer;
pub mod config;
pub mod core;
pub mod device;
pub mod error;
pub mod utils;

// Re-exports - 会话
pub use crate::core::session::{LiveMetrics, SessionController, SessionPhase, SessionSnapshot, SessionSummary};
pub use crate::core::runtime::{Command, RuntimeHandle, SessionRuntime};
pub use crate::core::event::{CoachEvent, PainReport, VisualCue};

// Re-exports - 分析
pub use crate::core::motion::{estimate, MotionSample};
pub use crate::core::tracker::{RepPhase, RepTracker, TrackerState};
pub use crate::core::pipeline::AnalysisPipeline;

// Re-exports - 远端与设备
pub use ai::client::{CoachConnector, GeminiLiveConnector, LoopbackConnector};
pub use ai::context::PatientContext;
pub use device::MediaDevices;
pub use device::synthetic::{SubjectPose, SyntheticDevices};

pub use config::CoachConfig;
pub use error::{CoachError, Result};
