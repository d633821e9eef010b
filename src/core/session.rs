//! 会话生命周期控制器
//!
//! 持有摄像头/麦克风、远端会话句柄、分析循环的存活标志，按显式转移表切换阶段。
//! 所有退出路径 (结束、故障、析构) 都经过同一个 teardown，且各项释放互不影响

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::ai::client::{CoachConnector, LiveSession, SessionHandle};
use crate::ai::context::PatientContext;
use crate::ai::types::{ClientMessage, CoachTool, ServerEvent, ToolCall};
use crate::buffer::audio::PlaybackScheduler;
use crate::config::CoachConfig;
use crate::device::{HardwareHandle, MediaDevices, MicReceiver};
use crate::error::{CoachError, Result};
use crate::utils::time::{Clock, SystemClock};
use super::caption::{CaptionBoard, CaptionConfig};
use super::event::{CoachEvent, PainReport, VisualCue};
use super::pipeline::{AnalysisPipeline, TickOutcome};
use super::uplink::{UplinkMultiplexer, UplinkStats};

/// 会话阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    Idle,
    Preparing,
    Countdown,
    Connecting,
    Connected,
    Paused,
    Error,
    Summary,
}

impl SessionPhase {
    /// 硬件或远端故障可以打断的阶段
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Preparing | Self::Countdown | Self::Connecting | Self::Connected | Self::Paused
        )
    }
}

/// 阶段转移的触发条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    StartSetup,
    ConfirmPosition,
    CountdownElapsed,
    RemoteOpened,
    /// 远端 emergencyStop
    StopRequested,
    Resume,
    End,
    Dismiss,
    /// 硬件或远端错误
    Fault,
    Retry,
    Cancel,
}

/// 转移表；表外组合返回 None
pub fn next_phase(from: SessionPhase, trigger: Trigger) -> Option<SessionPhase> {
    use SessionPhase::*;
    use Trigger::*;

    match (from, trigger) {
        (Idle, StartSetup) => Some(Preparing),
        (Preparing, ConfirmPosition) => Some(Countdown),
        (Preparing, Cancel) => Some(Idle),
        (Countdown, CountdownElapsed) => Some(Connecting),
        (Connecting, RemoteOpened) => Some(Connected),
        (Connected, StopRequested) => Some(Paused),
        (Paused, Resume) => Some(Connected),
        (Preparing | Countdown | Connecting | Connected | Paused | Error | Summary, End) => Some(Summary),
        (Summary, Dismiss) => Some(Idle),
        (Preparing | Countdown | Connecting | Connected | Paused, Fault) => Some(Error),
        (Error, Retry) => Some(Idle),
        _ => None,
    }
}

/// 分析循环的存活标志
///
/// 每个节拍入口重新读取，不依赖循环启动时捕获的阶段值
#[derive(Debug, Clone, Default)]
pub struct LivenessFlag(Arc<AtomicBool>);

impl LivenessFlag {
    pub fn set(&self, live: bool) {
        self.0.store(live, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 自我重新调度的采样循环
#[derive(Debug, Default)]
struct FrameLoop {
    live: LivenessFlag,
    /// 是否还有待执行的下一次节拍
    scheduled: bool,
}

impl FrameLoop {
    fn start(&mut self) {
        self.live.set(true);
        self.scheduled = true;
    }

    /// 清除存活标志；已调度的节拍在入口处自行退出
    fn stop(&mut self) {
        self.live.set(false);
    }

    /// 取消待执行的节拍
    fn cancel(&mut self) {
        self.live.set(false);
        self.scheduled = false;
    }
}

/// 等待执行的硬件获取；由运行时在后台完成后交回 `complete_prepare`
pub struct PendingAcquire {
    generation: u64,
    devices: Arc<dyn MediaDevices>,
}

impl PendingAcquire {
    pub async fn run(self) -> AcquireOutcome {
        let result = self.devices.acquire().await;
        AcquireOutcome { generation: self.generation, result }
    }
}

pub struct AcquireOutcome {
    generation: u64,
    result: Result<HardwareHandle>,
}

/// 等待执行的远端连接；结果交回 `complete_connect`
pub struct PendingOpen {
    generation: u64,
    connector: Arc<dyn CoachConnector>,
    instruction: String,
}

impl PendingOpen {
    pub async fn run(self) -> OpenOutcome {
        let result = self.connector.open(&self.instruction).await;
        OpenOutcome { generation: self.generation, result }
    }
}

pub struct OpenOutcome {
    generation: u64,
    result: Result<LiveSession>,
}

/// 会话参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 倒计时秒数
    pub countdown_secs: u32,
    /// 字幕无更新后清空 (毫秒)
    pub caption_timeout_ms: f64,
    /// 视觉提示显示时长 (毫秒)
    pub cue_duration_ms: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 3,
            caption_timeout_ms: 5000.0,
            cue_duration_ms: 2000.0,
        }
    }
}

/// 界面展示的实时指标
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LiveMetrics {
    pub rep_count: u32,
    /// 0-100
    pub quality_score: f64,
    /// 度
    pub lean_angle: f64,
    pub stability_percent: f64,
    pub range_of_motion_percent: f64,
    pub velocity: f64,
}

/// 控制器对外发布的只读快照
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub countdown: u32,
    pub metrics: LiveMetrics,
    pub caption: String,
    pub cue: Option<VisualCue>,
    /// 暂停原因
    pub alert: Option<String>,
    pub error: Option<String>,
    pub mic_on: bool,
    pub camera_on: bool,
    pub pain_reports: Vec<PainReport>,
    pub uplink: UplinkStats,
    pub elapsed_secs: f64,
}

/// 会话总结
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub rep_count: u32,
    pub quality_score: f64,
    pub stability_percent: f64,
    pub range_of_motion_percent: f64,
    pub pain_reports: Vec<PainReport>,
    pub duration_secs: f64,
}

/// 会话生命周期控制器
pub struct SessionController {
    phase: SessionPhase,
    config: SessionConfig,
    output_sample_rate: u32,
    patient: PatientContext,

    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn CoachConnector>,
    clock: Arc<dyn Clock>,

    /// 摄像头 + 麦克风
    hardware: Option<HardwareHandle>,
    /// 远端会话
    session: Option<SessionHandle>,
    server_events: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    /// 输出音频 (教练语音)
    playback: Option<PlaybackScheduler>,
    /// 输入音频是否接入上行
    audio_input_open: bool,
    frame_loop: FrameLoop,

    pipeline: AnalysisPipeline,
    uplink: UplinkMultiplexer,
    captions: CaptionBoard,

    countdown: u32,
    lean_angle: f64,
    alert: Option<String>,
    error: Option<String>,
    mic_on: bool,
    camera_on: bool,
    pain_reports: Vec<PainReport>,
    started_at: Option<f64>,
    summary: Option<SessionSummary>,
    /// 每次 teardown 递增；旧代次的异步结果一律作废
    generation: u64,

    event_tx: Option<mpsc::UnboundedSender<CoachEvent>>,
}

impl SessionController {
    pub fn new(
        config: &CoachConfig,
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn CoachConnector>,
    ) -> Self {
        let session = config.session.clone();
        let captions = CaptionBoard::new(CaptionConfig {
            timeout_ms: session.caption_timeout_ms,
            cue_duration_ms: session.cue_duration_ms,
        });

        Self {
            phase: SessionPhase::Idle,
            output_sample_rate: config.live.output_sample_rate,
            patient: config.patient.clone(),
            devices,
            connector,
            clock: Arc::new(SystemClock::new()),
            hardware: None,
            session: None,
            server_events: None,
            playback: None,
            audio_input_open: false,
            frame_loop: FrameLoop::default(),
            pipeline: AnalysisPipeline::new(config.analysis.clone(), config.tracker.clone()),
            uplink: UplinkMultiplexer::new(config.uplink.clone()),
            captions,
            countdown: session.countdown_secs,
            lean_angle: 0.0,
            alert: None,
            error: None,
            mic_on: true,
            camera_on: true,
            pain_reports: Vec::new(),
            started_at: None,
            summary: None,
            generation: 0,
            event_tx: None,
            config: session,
        }
    }

    /// 设置事件通道
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<CoachEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ============================================================
    // 用户命令
    // ============================================================

    /// idle → preparing，获取摄像头和麦克风
    pub async fn prepare(&mut self) -> Result<()> {
        if let Some(pending) = self.begin_prepare()? {
            let outcome = pending.run().await;
            self.complete_prepare(outcome);
        }
        Ok(())
    }

    /// 立即进入 preparing；需要获取硬件时返回待执行的获取
    pub fn begin_prepare(&mut self) -> Result<Option<PendingAcquire>> {
        self.transition(Trigger::StartSetup)?;
        self.error = None;
        self.alert = None;

        if self.hardware.is_some() {
            debug!("Hardware already held, skipping acquire");
            return Ok(None);
        }

        Ok(Some(PendingAcquire {
            generation: self.generation,
            devices: self.devices.clone(),
        }))
    }

    /// 硬件获取完成；会话已取消或结束时立即释放迟到的硬件
    pub fn complete_prepare(&mut self, outcome: AcquireOutcome) {
        let wanted = outcome.generation == self.generation
            && self.phase.is_active()
            && self.hardware.is_none();

        match outcome.result {
            Ok(mut hardware) if !wanted => {
                info!("Releasing hardware acquired after setup was abandoned");
                if let Err(e) = hardware.release() {
                    warn!("Hardware release failed: {}", e);
                }
            }
            Ok(hardware) => {
                info!("Camera and microphone ready");
                self.hardware = Some(hardware);
            }
            Err(e) if wanted => {
                error!("Hardware acquisition failed: {}", e);
                self.fail(e.to_string());
            }
            Err(e) => debug!("Ignoring stale hardware failure: {}", e),
        }
    }

    /// preparing → countdown
    pub fn confirm_positioned(&mut self) -> Result<()> {
        self.transition(Trigger::ConfirmPosition)?;
        self.countdown = self.config.countdown_secs;
        self.emit(CoachEvent::CountdownTick { remaining: self.countdown });
        Ok(())
    }

    /// 倒计时每秒一次；归零后连接远端
    pub async fn on_countdown_tick(&mut self) -> Result<()> {
        if let Some(pending) = self.tick_countdown()? {
            let outcome = pending.run().await;
            self.complete_connect(outcome);
        }
        Ok(())
    }

    /// 倒计时减一；归零时立即进入 connecting 并返回待执行的连接
    pub fn tick_countdown(&mut self) -> Result<Option<PendingOpen>> {
        if self.phase != SessionPhase::Countdown {
            return Ok(None);
        }

        self.countdown = self.countdown.saturating_sub(1);
        self.emit(CoachEvent::CountdownTick { remaining: self.countdown });
        if self.countdown > 0 {
            return Ok(None);
        }

        self.transition(Trigger::CountdownElapsed)?;
        Ok(self.begin_connect())
    }

    /// 远端连接完成；期间已结束或故障则关闭迟到的会话
    pub fn complete_connect(&mut self, outcome: OpenOutcome) {
        if outcome.generation != self.generation || self.phase != SessionPhase::Connecting {
            if let Ok(LiveSession { mut handle, .. }) = outcome.result {
                info!("Closing coach session {} opened after the attempt was abandoned", handle.id());
                handle.close();
            }
            return;
        }

        match outcome.result {
            Ok(LiveSession { handle, events }) => {
                info!("Coach session {} connected", handle.id());
                self.session = Some(handle);
                self.server_events = Some(events);
                if let Err(e) = self.transition(Trigger::RemoteOpened) {
                    self.fail(e.to_string());
                    return;
                }
                self.started_at = Some(self.clock.now_ms());
                self.frame_loop.start();
                self.audio_input_open = true;
            }
            Err(e) => {
                error!("Coach connection failed: {}", e);
                self.fail(e.to_string());
            }
        }
    }

    /// 远端暂停后继续
    pub fn resume(&mut self) -> Result<()> {
        self.transition(Trigger::Resume)?;
        self.alert = None;
        // 暂停期间的旧帧不再参与差分
        self.pipeline.resume();
        self.frame_loop.start();
        Ok(())
    }

    /// preparing → idle
    pub fn cancel_setup(&mut self) -> Result<()> {
        self.transition(Trigger::Cancel)?;
        self.teardown();
        Ok(())
    }

    /// 结束会话 (idle 以外的任意阶段)；重复调用安全
    pub fn end(&mut self) -> Result<()> {
        if next_phase(self.phase, Trigger::End).is_none() {
            return Err(CoachError::InvalidTransition { from: self.phase, trigger: Trigger::End });
        }

        self.frame_loop.stop();
        self.teardown();

        if let Some(started) = self.started_at.take() {
            let summary = self.build_summary(started);
            info!(
                "Session summary: reps={} quality={:.0} duration={:.1}s",
                summary.rep_count, summary.quality_score, summary.duration_secs
            );
            self.summary = Some(summary);
        }
        self.transition(Trigger::End)
    }

    /// summary → idle
    pub fn dismiss_summary(&mut self) -> Result<()> {
        self.transition(Trigger::Dismiss)
    }

    /// error → idle
    pub fn retry_from_error(&mut self) -> Result<()> {
        self.transition(Trigger::Retry)?;
        self.error = None;
        Ok(())
    }

    /// 返回切换后的状态
    pub fn toggle_mic(&mut self) -> bool {
        self.mic_on = !self.mic_on;
        info!("Microphone {}", if self.mic_on { "on" } else { "muted" });
        self.mic_on
    }

    pub fn toggle_camera(&mut self) -> bool {
        self.camera_on = !self.camera_on;
        info!("Camera {}", if self.camera_on { "on" } else { "off" });
        self.camera_on
    }

    // ============================================================
    // 事件源
    // ============================================================

    /// 一次显示刷新节拍：采样 → 差分 → 跟踪 → (按需) 上行图像
    pub fn on_frame_tick(&mut self) {
        if !self.frame_loop.live.is_live() {
            self.frame_loop.scheduled = false;
            return;
        }

        let now = self.clock.now_ms();
        let frame = if self.camera_on {
            self.hardware.as_mut().and_then(|h| h.current_frame())
        } else {
            None
        };

        let outcome = self.pipeline.tick(frame.as_ref(), now);
        if outcome == TickOutcome::NoFrame {
            return;
        }

        if let TickOutcome::Analysed { update, .. } = outcome {
            self.lean_angle = update.lean_angle;
            if update.rep_completed {
                let count = self.pipeline.tracker_state().rep_count;
                info!("Rep {} completed", count);
                self.emit(CoachEvent::RepCompleted { count });
                self.captions.show_cue(VisualCue::GoodRep, now);
                self.emit(CoachEvent::Cue(VisualCue::GoodRep));
            }
        }

        if let (Some(session), Some(raster)) = (&self.session, self.pipeline.raster()) {
            self.uplink.maybe_forward_image(session, raster, now);
        }
    }

    /// 麦克风回调
    pub fn on_audio(&mut self, samples: &[f32]) {
        if !self.audio_input_open || !self.mic_on {
            return;
        }
        if !matches!(self.phase, SessionPhase::Connected | SessionPhase::Paused) {
            return;
        }
        if let Some(session) = &self.session {
            self.uplink.forward_audio(session, samples);
        }
    }

    /// 远端入站事件
    pub fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Transcript(delta) => {
                let now = self.clock.now_ms();
                let cue = self.captions.push_delta(&delta, now);
                self.emit(CoachEvent::Caption(self.captions.text().to_string()));
                if let Some(cue) = cue {
                    self.emit(CoachEvent::Cue(cue));
                }
            }
            ServerEvent::Audio(pcm) => {
                if let Some(playback) = self.playback.as_mut() {
                    if let Err(e) = playback.enqueue_pcm16(&pcm) {
                        debug!("Coach audio chunk dropped: {}", e);
                    }
                }
            }
            ServerEvent::ToolCall(call) => self.on_tool_call(call),
            ServerEvent::Closed => self.on_remote_closed(),
            ServerEvent::Error(message) => {
                if self.phase.is_active() {
                    self.fail(format!("Coach session error: {}", message));
                } else {
                    debug!("Ignoring coach error in {:?}: {}", self.phase, message);
                }
            }
        }
    }

    /// 清理过期字幕和视觉提示
    pub fn poll_timers(&mut self) {
        let now = self.clock.now_ms();
        if self.captions.expire(now) {
            self.emit(CoachEvent::Caption(String::new()));
        }
    }

    fn on_tool_call(&mut self, call: ToolCall) {
        let result = match CoachTool::from_call(&call) {
            CoachTool::EmergencyStop { reason } => {
                if self.phase == SessionPhase::Connected {
                    self.pause(reason);
                } else {
                    debug!("Stop requested in {:?}, already halted", self.phase);
                }
                "Session Paused on UI".to_string()
            }
            CoachTool::LogPain { level, location } => {
                let report = PainReport {
                    level,
                    location,
                    at_ms: self.elapsed_ms(),
                };
                info!("Pain logged: {}/10 {:?}", report.level, report.location);
                self.pain_reports.push(report.clone());
                self.emit(CoachEvent::PainLogged(report));
                "Logged".to_string()
            }
            CoachTool::Unknown => {
                warn!("Unknown tool call: {}", call.name);
                format!("Error: unknown tool {}", call.name)
            }
        };

        if let Some(session) = &self.session {
            if let Err(e) = session.send(ClientMessage::tool_response(call.id, call.name, result)) {
                debug!("Tool response dropped: {}", e);
            }
        }
    }

    /// 远端主动关闭
    fn on_remote_closed(&mut self) {
        match self.phase {
            SessionPhase::Connecting | SessionPhase::Connected => {
                self.fail("Coach session closed unexpectedly");
            }
            SessionPhase::Paused => {
                info!("Coach closed the session while paused");
                if let Err(e) = self.end() {
                    warn!("End after remote close failed: {}", e);
                }
            }
            _ => {
                if let Some(mut session) = self.session.take() {
                    session.close();
                }
            }
        }
    }

    // ============================================================
    // 内部
    // ============================================================

    /// 重置本次会话的状态并打开输出音频；输出设备失败时进入 error
    fn begin_connect(&mut self) -> Option<PendingOpen> {
        self.pipeline.reset();
        self.uplink.reset();
        self.captions.clear();
        self.lean_angle = 0.0;
        self.alert = None;
        self.pain_reports.clear();
        self.summary = None;

        match self.devices.open_output(self.output_sample_rate) {
            Ok(sink) => self.playback = Some(PlaybackScheduler::new(sink, self.output_sample_rate)),
            Err(e) => {
                self.fail(format!("Audio output unavailable: {}", e));
                return None;
            }
        }

        Some(PendingOpen {
            generation: self.generation,
            connector: self.connector.clone(),
            instruction: self.patient.system_instruction(),
        })
    }

    fn pause(&mut self, reason: String) {
        if let Err(e) = self.transition(Trigger::StopRequested) {
            warn!("Pause rejected: {}", e);
            return;
        }
        self.frame_loop.stop();
        warn!("Session paused by coach: {}", reason);
        self.alert = Some(format!("Session Paused: {}", reason));
        self.emit(CoachEvent::Paused { reason });
    }

    /// 故障：先清存活标志，再释放资源并进入 error
    fn fail(&mut self, message: impl Into<String>) {
        self.frame_loop.stop();
        let message = message.into();
        self.error = Some(message);
        self.teardown();
        self.started_at = None;

        if let Err(e) = self.transition(Trigger::Fault) {
            debug!("Fault ignored: {}", e);
        }
    }

    /// 释放全部资源；每一项独立执行，已释放时无操作
    fn teardown(&mut self) {
        self.generation += 1;

        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.server_events = None;

        if let Some(mut hardware) = self.hardware.take() {
            if let Err(e) = hardware.release() {
                warn!("Hardware release failed: {}", e);
            }
        }

        self.frame_loop.cancel();

        self.audio_input_open = false;
        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = playback.close() {
                warn!("Audio output close failed: {}", e);
            }
        }
    }

    fn transition(&mut self, trigger: Trigger) -> Result<()> {
        let from = self.phase;
        let to = next_phase(from, trigger).ok_or(CoachError::InvalidTransition { from, trigger })?;

        self.phase = to;
        if from != to {
            info!("Session phase {:?} -> {:?}", from, to);
            self.emit(CoachEvent::PhaseChanged { from, to });
        }
        Ok(())
    }

    fn elapsed_ms(&self) -> f64 {
        self.started_at
            .map(|start| self.clock.now_ms() - start)
            .unwrap_or(0.0)
    }

    fn metrics(&self) -> LiveMetrics {
        let state = self.pipeline.tracker_state();
        LiveMetrics {
            rep_count: state.rep_count,
            quality_score: state.smoothed_quality.clamp(0.0, 100.0),
            lean_angle: self.lean_angle,
            stability_percent: state.stability,
            range_of_motion_percent: state.peak_range_of_motion,
            velocity: state.velocity,
        }
    }

    fn build_summary(&self, started: f64) -> SessionSummary {
        let metrics = self.metrics();
        SessionSummary {
            rep_count: metrics.rep_count,
            quality_score: metrics.quality_score,
            stability_percent: metrics.stability_percent,
            range_of_motion_percent: metrics.range_of_motion_percent,
            pain_reports: self.pain_reports.clone(),
            duration_secs: (self.clock.now_ms() - started).max(0.0) / 1000.0,
        }
    }

    fn emit(&self, event: CoachEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    // ============================================================
    // 查询
    // ============================================================

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            countdown: self.countdown,
            metrics: self.metrics(),
            caption: self.captions.text().to_string(),
            cue: self.captions.cue(),
            alert: self.alert.clone(),
            error: self.error.clone(),
            mic_on: self.mic_on,
            camera_on: self.camera_on,
            pain_reports: self.pain_reports.clone(),
            uplink: self.uplink.stats(),
            elapsed_secs: self.elapsed_ms() / 1000.0,
        }
    }

    /// 最近一次会话的总结
    pub fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    /// 取出新会话的入站事件流
    pub fn take_server_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.server_events.take()
    }

    /// 取出麦克风回调流
    pub fn take_mic(&mut self) -> Option<MicReceiver> {
        self.hardware.as_mut().and_then(|h| h.take_mic())
    }

    /// 是否还有待执行的采样节拍
    pub fn frame_tick_pending(&self) -> bool {
        self.frame_loop.scheduled
    }

    pub fn audio_input_open(&self) -> bool {
        self.audio_input_open
    }

    pub fn has_hardware(&self) -> bool {
        self.hardware.is_some()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn liveness(&self) -> LivenessFlag {
        self.frame_loop.live.clone()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.frame_loop.stop();
        self.teardown();
    }
}
