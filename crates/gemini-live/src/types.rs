//! Wire frames for the BidiGenerateContent streaming protocol.
//!
//! Outgoing frames serialize to the exact JSON the endpoint expects (note the
//! mixed casing: `clientContent` but `realtime_input`). Incoming frames are
//! normalized into [`ServerMessage`] before any session logic looks at them,
//! so key-name variations between protocol revisions stay contained here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// --- Outgoing messages ---

#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: SystemInstruction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolConfig {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Declaration of one remote-invocable function, embedded in the setup frame.
/// `parameters` is a JSON-schema object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientContentMessage {
    #[serde(rename = "clientContent")]
    pub client_content: ClientContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientContent {
    pub turns: Vec<Turn>,
    #[serde(rename = "turnComplete")]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Blob {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponseMessage {
    #[serde(rename = "toolResponse")]
    pub tool_response: ToolResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    #[serde(rename = "functionResponses")]
    pub function_responses: Vec<FunctionResponse>,
}

/// Result for one tool invocation, correlated to the call by `id`.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

impl Turn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part::text(text)],
        }
    }
}

impl ClientContentMessage {
    /// One complete turn carrying a single text part.
    pub fn single_turn(text: impl Into<String>) -> Self {
        Self::from_turns(vec![Turn::text(text)])
    }

    pub fn from_turns(turns: Vec<Turn>) -> Self {
        Self {
            client_content: ClientContent {
                turns,
                turn_complete: true,
            },
        }
    }
}

impl RealtimeInputMessage {
    pub fn single(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: mime_type.into(),
                    data: data.into(),
                }],
            },
        }
    }
}

impl ToolResponseMessage {
    pub fn single(response: FunctionResponse) -> Self {
        Self {
            tool_response: ToolResponse {
                function_responses: vec![response],
            },
        }
    }
}

// --- Incoming messages ---

/// One inbound frame. Every field is optional; a single frame can carry any
/// combination of ack, content, and tool calls.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerMessage {
    /// The ack arrives as `true` or as an empty object depending on the
    /// protocol revision, and under two key spellings.
    #[serde(rename = "setupComplete", alias = "setup_complete")]
    pub setup_complete: Option<Value>,
    #[serde(rename = "serverMetadata")]
    pub server_metadata: Option<ServerMetadata>,
    #[serde(rename = "serverContent")]
    pub server_content: Option<ServerContent>,
    #[serde(rename = "toolCall")]
    pub tool_call: Option<ToolCall>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerMetadata {
    #[serde(rename = "setupComplete", alias = "setup_complete")]
    pub setup_complete: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerContent {
    #[serde(rename = "modelTurn")]
    pub model_turn: Option<ModelTurn>,
    #[serde(rename = "turnComplete")]
    pub turn_complete: Option<bool>,
    #[serde(rename = "outputTranscription")]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerPart {
    pub text: Option<String>,
    #[serde(rename = "inlineData")]
    pub inline_data: Option<ServerBlob>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerBlob {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolCall {
    #[serde(rename = "functionCalls")]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    }
}

impl ServerMessage {
    /// True when this frame acknowledges the setup handshake, under any of
    /// the key shapes the endpoint has been observed to use.
    pub fn is_setup_ack(&self) -> bool {
        truthy(self.setup_complete.as_ref())
            || self
                .server_metadata
                .as_ref()
                .is_some_and(|m| truthy(m.setup_complete.as_ref()))
    }
}

/// Extracts the sample rate embedded in a PCM MIME type such as
/// `audio/pcm;rate=24000`.
pub fn pcm_sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .find_map(|param| param.trim().strip_prefix("rate=")?.parse().ok())
}
