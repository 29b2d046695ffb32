//! JSON envelopes of the Live `BidiGenerateContent` stream.
//!
//! Outbound: one `setup` frame, then `realtimeInput` audio frames.
//! Inbound: a setup acknowledgment, then `serverContent` turns carrying
//! base64 PCM16 at [`RECEIVE_RATE`].

use crate::audio::{decode_transport, AudioChunk, DecodeError, RECEIVE_RATE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const AUDIO_MIME_TYPE: &str = "audio/pcm;rate=16000";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    /// Audio-only response modality with a prebuilt voice.
    pub fn new(model: &str, voice: &str, system_instruction: String) -> Self {
        Self {
            setup: Setup {
                model: model.to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: system_instruction,
                    }],
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInputMessage {
    /// One microphone block, already base64 PCM16 at 16 kHz.
    pub fn audio(data: String) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: AUDIO_MIME_TYPE.to_string(),
                    data,
                }],
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: Option<String>,
}

/// What one inbound message asks the session to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    Audio(AudioChunk),
    TurnComplete,
}

/// Events of one inbound message plus the audio parts that failed to decode.
#[derive(Debug, Default)]
pub struct ParsedMessage {
    pub events: Vec<ServerEvent>,
    pub skipped_parts: Vec<DecodeError>,
}

/// Parse one inbound text frame.
///
/// A truthy `setupComplete` short-circuits the rest of the message. Audio parts
/// are decoded independently: a bad part is reported in `skipped_parts` and the
/// remaining parts still play.
pub fn parse_server_message(text: &str) -> Result<ParsedMessage, DecodeError> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let mut parsed = ParsedMessage::default();

    if message.setup_complete.as_ref().is_some_and(is_truthy) {
        parsed.events.push(ServerEvent::SetupComplete);
        return Ok(parsed);
    }

    let Some(content) = message.server_content else {
        return Ok(parsed);
    };
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            let Some(data) = part.inline_data.and_then(|inline| inline.data) else {
                continue;
            };
            if data.is_empty() {
                continue;
            }
            match decode_transport(&data) {
                Ok(samples) => parsed
                    .events
                    .push(ServerEvent::Audio(AudioChunk::new(samples, RECEIVE_RATE))),
                Err(err) => parsed.skipped_parts.push(err),
            }
        }
    }
    if content.turn_complete.as_ref().is_some_and(is_truthy) {
        parsed.events.push(ServerEvent::TurnComplete);
    }
    Ok(parsed)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
