//! 会话运行时
//!
//! 在单个任务上驱动控制器：显示刷新节拍、倒计时、麦克风回调、远端事件、界面命令
//! 交错到达，但每次只有一个在修改状态。硬件获取和远端连接在后台任务里执行，
//! 结果作为 select 分支交回，等待期间阶段照常发布、命令照常处理

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::ai::types::ServerEvent;
use crate::device::MicReceiver;
use super::session::{AcquireOutcome, OpenOutcome, SessionController, SessionPhase, SessionSnapshot};

/// 约 60Hz 的显示刷新
const REFRESH_PERIOD: Duration = Duration::from_millis(16);
const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);
const HOUSEKEEPING_PERIOD: Duration = Duration::from_millis(250);

/// 界面命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Prepare,
    ConfirmPositioned,
    CancelSetup,
    Resume,
    End,
    DismissSummary,
    RetryFromError,
    ToggleMic,
    ToggleCamera,
    /// 结束运行时
    Shutdown,
}

/// 会话运行时
pub struct SessionRuntime {
    controller: SessionController,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    mic: Option<MicReceiver>,
    server_events: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    acquiring: Option<JoinHandle<AcquireOutcome>>,
    opening: Option<JoinHandle<OpenOutcome>>,
}

/// 运行时的界面侧句柄
#[derive(Clone)]
pub struct RuntimeHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl RuntimeHandle {
    /// 运行时已退出时返回 false
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }
}

impl SessionRuntime {
    pub fn new(controller: SessionController) -> (Self, RuntimeHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot());

        let runtime = Self {
            controller,
            commands: cmd_rx,
            snapshot_tx,
            mic: None,
            server_events: None,
            acquiring: None,
            opening: None,
        };
        let handle = RuntimeHandle {
            commands: cmd_tx,
            snapshots: snapshot_rx,
        };
        (runtime, handle)
    }

    /// 运行直到收到 Shutdown 或所有命令发送端被释放；返回控制器
    pub async fn run(mut self) -> SessionController {
        let mut refresh = interval(REFRESH_PERIOD);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut countdown = interval(COUNTDOWN_PERIOD);
        let mut housekeeping = interval(HOUSEKEEPING_PERIOD);

        info!("Session runtime started");

        loop {
            let ticking = self.controller.frame_tick_pending();
            let counting = self.controller.phase() == SessionPhase::Countdown;

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => {
                            let was_counting = counting;
                            self.apply(command);
                            if !was_counting && self.controller.phase() == SessionPhase::Countdown {
                                countdown.reset();
                            }
                        }
                    }
                }
                _ = refresh.tick(), if ticking => {
                    self.controller.on_frame_tick();
                }
                _ = countdown.tick(), if counting => {
                    match self.controller.tick_countdown() {
                        Ok(Some(pending)) => self.opening = Some(tokio::spawn(pending.run())),
                        Ok(None) => {}
                        Err(e) => warn!("Countdown tick rejected: {}", e),
                    }
                }
                outcome = join_opt(&mut self.acquiring) => {
                    self.acquiring = None;
                    match outcome {
                        Ok(outcome) => self.controller.complete_prepare(outcome),
                        Err(e) => warn!("Hardware task failed: {}", e),
                    }
                }
                outcome = join_opt(&mut self.opening) => {
                    self.opening = None;
                    match outcome {
                        Ok(outcome) => self.controller.complete_connect(outcome),
                        Err(e) => warn!("Connect task failed: {}", e),
                    }
                }
                _ = housekeeping.tick() => {
                    self.controller.poll_timers();
                }
                chunk = recv_opt(&mut self.mic) => {
                    match chunk {
                        Some(samples) => self.controller.on_audio(&samples),
                        None => self.mic = None,
                    }
                }
                event = recv_opt(&mut self.server_events) => {
                    match event {
                        Some(event) => self.controller.on_server_event(event),
                        None => self.server_events = None,
                    }
                }
            }

            self.abandon_stale_connect();
            self.collect_streams();
            self.publish();
        }

        if let Some(opening) = self.opening.take() {
            opening.abort();
        }
        info!("Session runtime stopped");
        self.controller
    }

    fn apply(&mut self, command: Command) {
        debug!("Command {:?}", command);
        let result = match command {
            Command::Prepare => match self.controller.begin_prepare() {
                Ok(Some(pending)) => {
                    self.acquiring = Some(tokio::spawn(pending.run()));
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            },
            Command::ConfirmPositioned => self.controller.confirm_positioned(),
            Command::CancelSetup => self.controller.cancel_setup(),
            Command::Resume => self.controller.resume(),
            Command::End => self.controller.end(),
            Command::DismissSummary => self.controller.dismiss_summary(),
            Command::RetryFromError => self.controller.retry_from_error(),
            Command::ToggleMic => {
                self.controller.toggle_mic();
                Ok(())
            }
            Command::ToggleCamera => {
                self.controller.toggle_camera();
                Ok(())
            }
            Command::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            warn!("Command {:?} rejected: {}", command, e);
        }
    }

    /// 离开 connecting 后不再等待连接结果
    fn abandon_stale_connect(&mut self) {
        if self.opening.is_some() && self.controller.phase() != SessionPhase::Connecting {
            if let Some(opening) = self.opening.take() {
                debug!("Abandoning pending coach connection");
                opening.abort();
            }
        }
    }

    /// 新会话或新硬件的输入流接到 select 上
    fn collect_streams(&mut self) {
        if let Some(mic) = self.controller.take_mic() {
            self.mic = Some(mic);
        }
        if let Some(events) = self.controller.take_server_events() {
            self.server_events = Some(events);
        }
    }

    fn publish(&self) {
        let snapshot = self.controller.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// 可选后台任务：不存在时永远挂起
async fn join_opt<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

/// 可选接收端：不存在时永远挂起
async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::ai::client::{CoachConnector, LiveSession, LoopbackConnector};
    use crate::ai::types::{ToolCall, EMERGENCY_STOP};
    use crate::config::CoachConfig;
    use crate::device::synthetic::{SubjectPose, SyntheticDevices};
    use crate::error::Result;

    /// 握手 30 秒后才完成的连接器
    struct SlowConnector {
        inner: LoopbackConnector,
    }

    #[async_trait]
    impl CoachConnector for SlowConnector {
        async fn open(&self, system_instruction: &str) -> Result<LiveSession> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            self.inner.open(system_instruction).await
        }
    }

    async fn wait_for(handle: &RuntimeHandle, phase: SessionPhase) -> SessionSnapshot {
        let mut rx = handle.subscribe();
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.phase == phase {
                return snapshot;
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_drives_full_session() {
        let pose = SubjectPose::at(0.0);
        let devices = Arc::new(SyntheticDevices::new(pose.clone()).with_live_mic(16000, 4096));
        let connector = Arc::new(LoopbackConnector::new());
        let controller = SessionController::new(&CoachConfig::default(), devices.clone(), connector.clone());

        let (runtime, handle) = SessionRuntime::new(controller);
        let task = tokio::spawn(runtime.run());

        handle.send(Command::Prepare);
        wait_for(&handle, SessionPhase::Preparing).await;
        handle.send(Command::ConfirmPositioned);
        wait_for(&handle, SessionPhase::Connected).await;

        let mut tap = connector.take_tap().unwrap();

        // 左摆一次再回中
        pose.set(-0.7);
        tokio::time::sleep(Duration::from_millis(300)).await;
        pose.set(0.0);
        tokio::time::sleep(Duration::from_millis(300)).await;

        tap.events
            .send(ServerEvent::ToolCall(ToolCall {
                id: "s1".into(),
                name: EMERGENCY_STOP.into(),
                args: serde_json::json!({ "reason": "Rest" }),
            }))
            .unwrap();
        let paused = wait_for(&handle, SessionPhase::Paused).await;
        assert_eq!(paused.alert.as_deref(), Some("Session Paused: Rest"));
        assert!(paused.metrics.rep_count >= 1);
        assert!(paused.uplink.images_sent >= 1);
        assert!(paused.uplink.audio_sent >= 1);

        let mut saw_realtime = false;
        while let Ok(msg) = tap.outbound.try_recv() {
            saw_realtime |= msg.is_realtime_input();
        }
        assert!(saw_realtime);

        handle.send(Command::End);
        wait_for(&handle, SessionPhase::Summary).await;
        handle.send(Command::Shutdown);

        let controller = task.await.unwrap();
        assert!(controller.summary().unwrap().rep_count >= 1);
        assert!(!controller.has_hardware());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_during_slow_connect() {
        let devices = Arc::new(SyntheticDevices::new(SubjectPose::at(0.0)));
        let connector = Arc::new(SlowConnector { inner: LoopbackConnector::new() });
        let controller = SessionController::new(&CoachConfig::default(), devices, connector.clone());

        let (runtime, handle) = SessionRuntime::new(controller);
        let task = tokio::spawn(runtime.run());

        handle.send(Command::Prepare);
        wait_for(&handle, SessionPhase::Preparing).await;
        handle.send(Command::ConfirmPositioned);

        // 握手期间 connecting 可见
        let connecting = wait_for(&handle, SessionPhase::Connecting).await;
        assert_eq!(connecting.countdown, 0);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.snapshot().phase, SessionPhase::Connecting);

        let started = tokio::time::Instant::now();
        handle.send(Command::End);
        tokio::time::timeout(Duration::from_secs(1), wait_for(&handle, SessionPhase::Summary))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        // 放弃的握手不会把会话接回来
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(handle.snapshot().phase, SessionPhase::Summary);
        assert_eq!(connector.inner.opened(), 0);

        handle.send(Command::Shutdown);
        let controller = task.await.unwrap();
        assert!(!controller.has_session());
        assert!(!controller.has_hardware());
        assert!(controller.summary().is_none());
    }
}
