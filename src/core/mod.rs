//! 核心模块：运动分析 + 会话编排

pub mod motion;
pub mod tracker;
pub mod pipeline;
pub mod uplink;
pub mod caption;
pub mod event;
pub mod session;
pub mod runtime;

pub use motion::{estimate, MotionConfig, MotionSample};
pub use tracker::{RepPhase, RepTracker, TrackerConfig, TrackerState};
pub use pipeline::{AnalysisConfig, AnalysisPipeline, TickOutcome};
pub use uplink::{UplinkConfig, UplinkMultiplexer, UplinkStats};
pub use event::{CoachEvent, PainReport, VisualCue};
pub use session::{SessionController, SessionPhase, SessionSnapshot, SessionSummary, Trigger};
pub use runtime::{Command, RuntimeHandle, SessionRuntime};
