//! 康复教练 - 实时会话演示
//!
//! 合成摄像头左右摆动，合成麦克风持续发声；默认连接 Gemini Live，
//! 未设置 API key 或指定 --offline 时使用本地回环教练

use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rehab_coach::ai::types::ServerEvent;
use rehab_coach::utils::time::format_session_clock;
use rehab_coach::{
    CoachConfig, CoachConnector, CoachEvent, Command, GeminiLiveConnector, LoopbackConnector,
    RuntimeHandle, SessionController, SessionPhase, SessionRuntime, SessionSnapshot, SubjectPose,
    SyntheticDevices,
};

#[derive(Parser, Debug)]
#[command(name = "rehab-coach")]
#[command(about = "Live rehabilitation coaching session with a synthetic camera")]
struct Args {
    /// TOML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 使用本地回环教练，不联网
    #[arg(long)]
    offline: bool,

    /// 训练时长 (秒)
    #[arg(short, long, default_value = "20")]
    seconds: u64,

    /// 把默认配置写到该路径后退出
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日志，RUST_LOG 可覆盖
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.dump_config {
        CoachConfig::default().save(path)?;
        info!("Default config written to {}", path.display());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => CoachConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => CoachConfig::default(),
    };

    info!("Patient: {} | Exercise: {}", config.patient.profile.name, config.patient.exercise);

    let pose = SubjectPose::at(0.0);
    let devices = Arc::new(
        SyntheticDevices::new(pose.clone())
            .with_live_mic(config.uplink.input_sample_rate, config.uplink.mic_buffer_size),
    );
    let connector = build_connector(&args, &config);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let controller = SessionController::new(&config, devices, connector).with_event_channel(event_tx);
    let (runtime, handle) = SessionRuntime::new(controller);
    let runtime_task = tokio::spawn(runtime.run());
    tokio::spawn(log_events(event_rx));

    handle.send(Command::Prepare);
    wait_for(&handle, SessionPhase::Preparing).await?;
    info!("Subject in position");
    handle.send(Command::ConfirmPositioned);
    wait_for(&handle, SessionPhase::Connected).await?;

    let sweeper = tokio::spawn(sweep(pose));

    let mut report = tokio::time::interval(Duration::from_secs(1));
    report.tick().await;
    for _ in 0..args.seconds {
        report.tick().await;
        let snapshot = handle.snapshot();
        log_snapshot(&snapshot);
        if snapshot.phase == SessionPhase::Error {
            break;
        }
        if snapshot.phase == SessionPhase::Paused {
            info!("Resuming after pause");
            handle.send(Command::Resume);
        }
    }

    sweeper.abort();
    handle.send(Command::End);
    wait_for(&handle, SessionPhase::Summary).await?;
    handle.send(Command::Shutdown);

    let controller = runtime_task.await?;
    match controller.summary() {
        Some(summary) => {
            info!("=== Session summary ===");
            info!("  Duration:        {}", format_session_clock(summary.duration_secs));
            info!("  Reps:            {}", summary.rep_count);
            info!("  Quality:         {:.0}", summary.quality_score);
            info!("  Stability:       {:.0}%", summary.stability_percent);
            info!("  Range of motion: {:.0}%", summary.range_of_motion_percent);
            for pain in &summary.pain_reports {
                info!("  Pain {}/10 {}", pain.level, pain.location.as_deref().unwrap_or(""));
            }
        }
        None => warn!("Session ended before connecting, no summary"),
    }

    Ok(())
}

fn build_connector(args: &Args, config: &CoachConfig) -> Arc<dyn CoachConnector> {
    if !args.offline {
        match GeminiLiveConnector::from_env(config.live.clone()) {
            Ok(connector) => return Arc::new(connector.with_queue_capacity(config.uplink.queue_capacity)),
            Err(e) => warn!("{}, falling back to offline coach", e),
        }
    }

    let loopback = Arc::new(LoopbackConnector::new().with_queue_capacity(config.uplink.queue_capacity));
    tokio::spawn(offline_coach(loopback.clone()));
    loopback
}

/// 回环教练：打招呼，吞掉上行数据，偶尔点评
async fn offline_coach(connector: Arc<LoopbackConnector>) {
    let mut poll = tokio::time::interval(Duration::from_millis(200));
    loop {
        poll.tick().await;
        let Some(mut tap) = connector.take_tap() else {
            continue;
        };

        info!("Offline coach attached");
        let _ = tap.events.send(ServerEvent::Transcript(
            "Hi! Let's start with slow trunk rotations. ".to_string(),
        ));

        let mut received = 0u64;
        while let Some(msg) = tap.outbound.recv().await {
            received += 1;
            if received % 40 == 0 {
                debug!("Offline coach received {} chunks", received);
                let _ = tap.events.send(ServerEvent::Transcript(
                    "Great form, keep your back straight. ".to_string(),
                ));
            }
            if !msg.is_realtime_input() {
                debug!("Offline coach got {:?}", msg);
            }
        }
        info!("Offline coach detached after {} chunks", received);
    }
}

/// 让合成被拍摄者左右摆动，周期 4 秒
async fn sweep(pose: SubjectPose) {
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    let mut t = 0.0f32;
    loop {
        tick.tick().await;
        pose.set(0.6 * (2.0 * PI * t / 4.0).sin());
        t += 0.05;
    }
}

async fn wait_for(handle: &RuntimeHandle, phase: SessionPhase) -> anyhow::Result<SessionSnapshot> {
    let mut rx = handle.subscribe();
    loop {
        let snapshot = rx.borrow_and_update().clone();
        if snapshot.phase == phase {
            return Ok(snapshot);
        }
        if snapshot.phase == SessionPhase::Error {
            bail!("session failed: {}", snapshot.error.unwrap_or_default());
        }
        rx.changed().await.context("session runtime stopped")?;
    }
}

async fn log_events(mut rx: mpsc::UnboundedReceiver<CoachEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            CoachEvent::CountdownTick { remaining } if remaining > 0 => info!("Starting in {}...", remaining),
            CoachEvent::Caption(text) if !text.is_empty() => info!("Coach: {}", text),
            CoachEvent::Cue(cue) => info!("Cue: {}", cue.label()),
            CoachEvent::Paused { reason } => warn!("Paused: {}", reason),
            CoachEvent::PainLogged(pain) => warn!("Pain logged: {}/10", pain.level),
            other => debug!("{:?}", other),
        }
    }
}

fn log_snapshot(s: &SessionSnapshot) {
    let m = &s.metrics;
    info!(
        "[{}] {:?} reps={} quality={:.0} lean={:+.1}° stability={:.0}% rom={:.0}% | up: audio={} img={} dropped={}",
        format_session_clock(s.elapsed_secs),
        s.phase,
        m.rep_count,
        m.quality_score,
        m.lean_angle,
        m.stability_percent,
        m.range_of_motion_percent,
        s.uplink.audio_sent,
        s.uplink.images_sent,
        s.uplink.dropped,
    );
}
