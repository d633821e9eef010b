//! 错误类型

use thiserror::Error;

use crate::core::session::{SessionPhase, Trigger};

#[derive(Error, Debug)]
pub enum CoachError {
    #[error("Camera or microphone unavailable: {0}")]
    HardwareUnavailable(String),
    #[error("Failed to open coach session: {0}")]
    Connection(String),
    #[error("Coach session is closed")]
    SessionClosed,
    #[error("Outbound queue full, chunk dropped")]
    QueueFull,
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("Transition {trigger:?} not allowed from {from:?}")]
    InvalidTransition { from: SessionPhase, trigger: Trigger },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoachError>;

impl From<serde_json::Error> for CoachError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<image::ImageError> for CoachError {
    fn from(err: image::ImageError) -> Self {
        Self::Encode(err.to_string())
    }
}
