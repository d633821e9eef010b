//! 远端教练

pub mod client;
pub mod context;
pub mod types;

pub use client::{CoachConnector, GeminiLiveConnector, LiveSession, LoopbackConnector, SessionHandle};
pub use context::PatientContext;
pub use types::{ClientMessage, LiveConfig, ServerEvent};
