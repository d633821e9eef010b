//! 缓冲区模块

pub mod frame;
pub mod audio;

pub use frame::{FrameSampler, RasterFrame, VideoFrame};
pub use audio::{AudioSink, PlaybackScheduler};
