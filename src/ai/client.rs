//! 实时教练会话客户端
//!
//! 与远端教练建立双向流：音频/图像上行，转写/音频/工具调用下行

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn, debug};

use crate::error::{CoachError, Result};
use super::types::*;

/// 会话句柄
///
/// 出站消息进入有界队列，由写任务发送；队列满时直接丢弃，不重试
pub struct SessionHandle {
    id: String,
    outbound: Option<mpsc::Sender<ClientMessage>>,
}

impl SessionHandle {
    pub fn new(outbound: mpsc::Sender<ClientMessage>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            outbound: Some(outbound),
        }
    }

    /// 非阻塞发送
    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        let tx = self.outbound.as_ref().ok_or(CoachError::SessionClosed)?;
        tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => CoachError::QueueFull,
            TrySendError::Closed(_) => CoachError::SessionClosed,
        })
    }

    /// 关闭会话；已关闭时无操作，返回是否真正执行了关闭
    pub fn close(&mut self) -> bool {
        let closed = self.outbound.take().is_some();
        if closed {
            debug!("Session {} closed", self.id);
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.as_ref().map(|tx| tx.is_closed()).unwrap_or(true)
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// 一次打开的会话：句柄 + 入站事件流
pub struct LiveSession {
    pub handle: SessionHandle,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// 远端教练连接能力
#[async_trait]
pub trait CoachConnector: Send + Sync {
    async fn open(&self, system_instruction: &str) -> Result<LiveSession>;
}

// ============================================================
// Gemini Live (WebSocket)
// ============================================================

/// Gemini Live 连接器
pub struct GeminiLiveConnector {
    config: LiveConfig,
    api_key: String,
    queue_capacity: usize,
}

impl GeminiLiveConnector {
    pub fn new(config: LiveConfig, api_key: impl Into<String>) -> Self {
        Self {
            config,
            api_key: api_key.into(),
            queue_capacity: 64,
        }
    }

    /// 从配置指定的环境变量读取 API key
    pub fn from_env(config: LiveConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| CoachError::Config(format!("{} not set", config.api_key_env)))?;
        Ok(Self::new(config, api_key))
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl CoachConnector for GeminiLiveConnector {
    async fn open(&self, system_instruction: &str) -> Result<LiveSession> {
        let url = format!("{}?key={}", self.config.endpoint, self.api_key);
        let limit = Duration::from_millis(self.config.connect_timeout_ms);

        let handshake = async {
            let (ws, _) = connect_async(url.as_str())
                .await
                .map_err(|e| CoachError::Connection(e.to_string()))?;
            let (mut sink, stream) = ws.split();

            let setup = serde_json::to_string(&ClientMessage::Setup(Setup::new(&self.config, system_instruction)))?;
            sink.send(Message::Text(setup))
                .await
                .map_err(|e| CoachError::Connection(e.to_string()))?;
            Ok::<_, CoachError>((sink, stream))
        };

        let (mut sink, mut stream) = tokio::time::timeout(limit, handshake)
            .await
            .map_err(|_| CoachError::Connection(format!("handshake timed out after {} ms", limit.as_millis())))??;

        info!("Coach session opened ({})", self.config.model);

        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(self.queue_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // 写任务：句柄关闭 (发送端全部释放) 后发送 Close 帧
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Dropping unserializable message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!("Coach send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // 读任务
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bin)) => match String::from_utf8(bin) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = event_tx.send(ServerEvent::Error(e.to_string()));
                        return;
                    }
                };
                match parse_server_message(&text) {
                    Ok(events) => {
                        for event in events {
                            if event_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("Unparseable coach message: {}", e),
                }
            }
            let _ = event_tx.send(ServerEvent::Closed);
        });

        Ok(LiveSession {
            handle: SessionHandle::new(out_tx),
            events: event_rx,
        })
    }
}

// ============================================================
// 本地回环 (离线模式与测试)
// ============================================================

/// 回环会话的另一端
pub struct LoopbackTap {
    /// 客户端发出的消息
    pub outbound: mpsc::Receiver<ClientMessage>,
    /// 注入入站事件
    pub events: mpsc::UnboundedSender<ServerEvent>,
    pub system_instruction: String,
}

/// 不联网的连接器：每次打开都生成一对本地通道
pub struct LoopbackConnector {
    fail_with: Option<String>,
    queue_capacity: usize,
    taps: Arc<Mutex<Vec<LoopbackTap>>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self {
            fail_with: None,
            queue_capacity: 64,
            taps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 打开总是失败
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
            ..Self::new()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// 取出最早一次打开的会话另一端
    pub fn take_tap(&self) -> Option<LoopbackTap> {
        let mut taps = self.taps.lock();
        if taps.is_empty() {
            None
        } else {
            Some(taps.remove(0))
        }
    }

    pub fn opened(&self) -> usize {
        self.taps.lock().len()
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoachConnector for LoopbackConnector {
    async fn open(&self, system_instruction: &str) -> Result<LiveSession> {
        if let Some(reason) = &self.fail_with {
            return Err(CoachError::Connection(reason.clone()));
        }

        let (out_tx, out_rx) = mpsc::channel(self.queue_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        self.taps.lock().push(LoopbackTap {
            outbound: out_rx,
            events: event_tx,
            system_instruction: system_instruction.to_string(),
        });

        Ok(LiveSession {
            handle: SessionHandle::new(out_tx),
            events: event_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_round_trip() {
        let connector = LoopbackConnector::new();
        let mut session = connector.open("coach").await.unwrap();
        let mut tap = connector.take_tap().unwrap();
        assert_eq!(tap.system_instruction, "coach");

        session.handle.send(ClientMessage::audio(&[0, 0])).unwrap();
        assert!(tap.outbound.try_recv().unwrap().is_realtime_input());

        tap.events.send(ServerEvent::Transcript("hi".into())).unwrap();
        assert_eq!(session.events.recv().await, Some(ServerEvent::Transcript("hi".into())));
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let connector = LoopbackConnector::new().with_queue_capacity(1);
        let session = connector.open("coach").await.unwrap();

        session.handle.send(ClientMessage::image(&[1])).unwrap();
        assert!(matches!(
            session.handle.send(ClientMessage::image(&[2])),
            Err(CoachError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let connector = LoopbackConnector::new();
        let mut session = connector.open("coach").await.unwrap();

        assert!(session.handle.close());
        assert!(!session.handle.close());
        assert!(session.handle.is_closed());
        assert!(matches!(
            session.handle.send(ClientMessage::audio(&[])),
            Err(CoachError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // 接受 TCP 连接但从不回应 WebSocket 握手
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let config = LiveConfig {
            endpoint: format!("ws://{}/live", addr),
            connect_timeout_ms: 200,
            ..LiveConfig::default()
        };
        let connector = GeminiLiveConnector::new(config, "test-key");

        let started = std::time::Instant::now();
        let result = connector.open("coach").await;
        assert!(matches!(result, Err(CoachError::Connection(ref m)) if m.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_failing_connector() {
        let connector = LoopbackConnector::failing("offline");
        assert!(matches!(connector.open("coach").await, Err(CoachError::Connection(_))));
    }
}
