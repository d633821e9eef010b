//! 实时教练会话的线上类型 (Gemini Live BidiGenerateContent)

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;

pub const AUDIO_INPUT_MIME: &str = "audio/pcm;rate=16000";
pub const IMAGE_MIME: &str = "image/jpeg";

pub const EMERGENCY_STOP: &str = "emergencyStop";
pub const LOG_PAIN: &str = "logPain";

/// 实时会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    /// 读取 API key 的环境变量名
    pub api_key_env: String,
    /// 教练音频输出采样率
    pub output_sample_rate: u32,
    /// WebSocket 握手 + setup 的超时 (毫秒)
    pub connect_timeout_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Kore".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            output_sample_rate: 24000,
            connect_timeout_ms: 10_000,
        }
    }
}

// ============================================================
// 客户端 → 服务端
// ============================================================

/// 出站消息 (外部标签: {"setup": ...} / {"realtimeInput": ...} / {"toolResponse": ...})
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    pub fn audio(pcm16: &[u8]) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaBlob::encode(AUDIO_INPUT_MIME, pcm16)],
        })
    }

    pub fn image(jpeg: &[u8]) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaBlob::encode(IMAGE_MIME, jpeg)],
        })
    }

    pub fn tool_response(id: impl Into<String>, name: impl Into<String>, result: impl Into<String>) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: id.into(),
                name: name.into(),
                response: json!({ "result": result.into() }),
            }],
        })
    }

    pub fn is_realtime_input(&self) -> bool {
        matches!(self, Self::RealtimeInput(_))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<Tool>,
    pub output_audio_transcription: EmptyObject,
}

impl Setup {
    pub fn new(config: &LiveConfig, system_instruction: impl Into<String>) -> Self {
        Self {
            model: config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart { text: system_instruction.into() }],
            },
            tools: vec![Tool { function_declarations: coach_tools() }],
            output_audio_transcription: EmptyObject {},
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmptyObject {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 教练可调用的工具
pub fn coach_tools() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: EMERGENCY_STOP.to_string(),
            description: "Immediately pause the session if the user reports severe pain, requests to stop, or if you detect unsafe movement patterns.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "reason": {
                        "type": "STRING",
                        "description": "The reason for stopping, e.g., 'User reported pain', 'Unsafe form'."
                    }
                },
                "required": ["reason"]
            }),
        },
        FunctionDeclaration {
            name: LOG_PAIN.to_string(),
            description: "Log a specific pain level reported by the user.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "level": { "type": "NUMBER", "description": "Pain level from 0 to 10." },
                    "location": { "type": "STRING", "description": "Body part where pain is felt." }
                },
                "required": ["level"]
            }),
        },
    ]
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

/// Base64 媒体块
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

impl MediaBlob {
    pub fn encode(mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            data: BASE64.encode(bytes),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

// ============================================================
// 服务端 → 客户端
// ============================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerMessage {
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCallMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelTurn {
    parts: Vec<ModelPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ModelPart {
    inline_data: Option<MediaBlob>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Transcription {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ToolCallMessage {
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FunctionCall {
    id: Option<String>,
    name: String,
    args: Value,
}

/// 工具调用请求
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// 入站事件
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// 教练语音转写增量
    Transcript(String),
    /// PCM16 24kHz 单声道
    Audio(Bytes),
    ToolCall(ToolCall),
    /// 远端关闭
    Closed,
    Error(String),
}

/// 解析一条服务端 JSON 消息，可能产生多个事件
pub fn parse_server_message(text: &str) -> Result<Vec<ServerEvent>> {
    let msg: ServerMessage = serde_json::from_str(text)?;
    let mut events = Vec::new();

    if let Some(tool_call) = msg.tool_call {
        for call in tool_call.function_calls {
            events.push(ServerEvent::ToolCall(ToolCall {
                id: call.id.unwrap_or_default(),
                name: call.name,
                args: call.args,
            }));
        }
    }

    if let Some(content) = msg.server_content {
        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            if !text.is_empty() {
                events.push(ServerEvent::Transcript(text));
            }
        }
        if let Some(turn) = content.model_turn {
            for blob in turn.parts.into_iter().filter_map(|p| p.inline_data) {
                match BASE64.decode(blob.data.as_bytes()) {
                    Ok(bytes) => events.push(ServerEvent::Audio(Bytes::from(bytes))),
                    Err(e) => return Err(crate::error::CoachError::Protocol(format!("bad audio payload: {}", e))),
                }
            }
        }
    }

    Ok(events)
}

/// 已识别的工具调用
#[derive(Debug, Clone, PartialEq)]
pub enum CoachTool {
    EmergencyStop { reason: String },
    LogPain { level: f64, location: Option<String> },
    Unknown,
}

impl CoachTool {
    pub fn from_call(call: &ToolCall) -> Self {
        match call.name.as_str() {
            EMERGENCY_STOP => Self::EmergencyStop {
                reason: call.args.get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("No reason given")
                    .to_string(),
            },
            LOG_PAIN => Self::LogPain {
                level: call.args.get("level").and_then(Value::as_f64).unwrap_or(0.0),
                location: call.args.get("location").and_then(Value::as_str).map(str::to_string),
            },
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_shape() {
        let msg = ClientMessage::Setup(Setup::new(&LiveConfig::default(), "coach"));
        let v = serde_json::to_value(&msg).unwrap();

        let setup = &v["setup"];
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "coach");
        assert_eq!(setup["tools"][0]["functionDeclarations"][0]["name"], EMERGENCY_STOP);
        assert!(setup["outputAudioTranscription"].is_object());
    }

    #[test]
    fn test_realtime_and_tool_response_shape() {
        let v = serde_json::to_value(ClientMessage::audio(&[1, 2, 3])).unwrap();
        let chunk = &v["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], AUDIO_INPUT_MIME);
        assert_eq!(chunk["data"], "AQID");

        let v = serde_json::to_value(ClientMessage::tool_response("c1", LOG_PAIN, "Logged")).unwrap();
        let resp = &v["toolResponse"]["functionResponses"][0];
        assert_eq!(resp["id"], "c1");
        assert_eq!(resp["response"]["result"], "Logged");
    }

    #[test]
    fn test_parse_server_content() {
        let text = r#"{
            "serverContent": {
                "outputTranscription": { "text": "Good tempo" },
                "modelTurn": { "parts": [ { "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "AAEC" } } ] }
            }
        }"#;
        let events = parse_server_message(text).unwrap();

        assert_eq!(events[0], ServerEvent::Transcript("Good tempo".to_string()));
        assert_eq!(events[1], ServerEvent::Audio(Bytes::from_static(&[0, 1, 2])));
    }

    #[test]
    fn test_parse_tool_call() {
        let text = r#"{"toolCall":{"functionCalls":[{"id":"f1","name":"emergencyStop","args":{"reason":"User reported pain"}}]}}"#;
        let events = parse_server_message(text).unwrap();

        let ServerEvent::ToolCall(call) = &events[0] else {
            panic!("expected tool call");
        };
        assert_eq!(
            CoachTool::from_call(call),
            CoachTool::EmergencyStop { reason: "User reported pain".to_string() }
        );
    }

    #[test]
    fn test_parse_ignores_setup_complete() {
        assert!(parse_server_message(r#"{"setupComplete":{}}"#).unwrap().is_empty());
        assert!(parse_server_message("not json").is_err());
    }
}
