//! Typed session messages.
//!
//! Inbound JSON from the live endpoint is parsed once, at the edge, into [`InboundMessage`];
//! the session only ever routes `AudioChunk` values to playback.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{LiveError, LiveResult};
use crate::frame::{AudioFrame, OUTPUT_SAMPLE_RATE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    SetupComplete,
    TurnComplete,
    /// The model stopped speaking because the user barged in.
    Interrupted,
    /// Server is about to close the connection.
    GoAway,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    AudioChunk(AudioFrame),
    TextChunk(String),
    ToolCall { id: String, name: String, args: Value },
    SessionEvent(SessionEventKind),
}

// ---------------------------------------------------------------------------
// Wire shapes (server → client)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    tool_call: Option<ToolCallBody>,
    #[serde(default)]
    go_away: Option<Value>,
    #[serde(default)]
    usage_metadata: Option<Value>,
    #[serde(default)]
    session_resumption_update: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallBody {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    #[serde(default)]
    id: String,
    name: String,
    #[serde(default)]
    args: Value,
}

/// Sample rate from `audio/pcm;rate=NNNNN`; falls back to the fixed output rate.
fn rate_from_mime(mime: &str) -> u32 {
    mime.split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|r| r.parse().ok())
        .unwrap_or(OUTPUT_SAMPLE_RATE)
}

/// Parse one server message. A message may carry several parts, so several values can come
/// back; an object with none of the known keys is a protocol error.
pub fn parse_server_message(raw: &str) -> LiveResult<Vec<InboundMessage>> {
    let msg: ServerMessage = serde_json::from_str(raw)?;
    let mut out = Vec::new();

    if msg.setup_complete.is_some() {
        out.push(InboundMessage::SessionEvent(SessionEventKind::SetupComplete));
    }

    if let Some(content) = msg.server_content {
        if content.interrupted {
            out.push(InboundMessage::SessionEvent(SessionEventKind::Interrupted));
        }
        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            if let Some(inline) = part.inline_data {
                if inline.mime_type.is_empty() || inline.mime_type.starts_with("audio/pcm") {
                    let frame =
                        AudioFrame::from_base64(&inline.data, rate_from_mime(&inline.mime_type))?;
                    out.push(InboundMessage::AudioChunk(frame));
                }
            }
            if let Some(text) = part.text {
                out.push(InboundMessage::TextChunk(text));
            }
        }
        if content.turn_complete {
            out.push(InboundMessage::SessionEvent(SessionEventKind::TurnComplete));
        }
        // serverContent with no payload (e.g. generationComplete) is valid and empty
        return Ok(out);
    }

    if let Some(call) = msg.tool_call {
        for f in call.function_calls {
            out.push(InboundMessage::ToolCall {
                id: f.id,
                name: f.name,
                args: f.args,
            });
        }
    }

    if msg.go_away.is_some() {
        out.push(InboundMessage::SessionEvent(SessionEventKind::GoAway));
    }

    let bookkeeping = msg.usage_metadata.is_some() || msg.session_resumption_update.is_some();
    if out.is_empty() && !bookkeeping {
        let preview: String = raw.chars().take(120).collect();
        return Err(LiveError::Protocol(format!("unrecognised server message: {}", preview)));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// First message on a new connection.
pub fn setup_message(model: &str, system_instruction: Option<&str>) -> Value {
    let model = if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    };
    let mut setup = json!({
        "model": model,
        "generationConfig": { "responseModalities": ["AUDIO"] }
    });
    if let Some(text) = system_instruction {
        setup["systemInstruction"] = json!({ "parts": [{ "text": text }] });
    }
    json!({ "setup": setup })
}

/// Wrap one outbound frame as realtime input.
pub fn realtime_audio_message(frame: &AudioFrame) -> Value {
    json!({
        "realtimeInput": {
            "audio": {
                "mimeType": frame.mime_type(),
                "data": frame.to_base64()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::INPUT_SAMPLE_RATE;

    #[test]
    fn test_audio_and_text_parts() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AEAAwA=="}},
            {"text":"hello"}
        ]}}}"#;
        let msgs = parse_server_message(raw).unwrap();
        assert_eq!(msgs.len(), 2);
        match &msgs[0] {
            InboundMessage::AudioChunk(frame) => {
                assert_eq!(frame.sample_rate(), 24000);
                assert_eq!(frame.sample_count(), 2);
            }
            other => panic!("expected audio, got {:?}", other),
        }
        assert_eq!(msgs[1], InboundMessage::TextChunk("hello".to_string()));
    }

    #[test]
    fn test_session_events() {
        assert_eq!(
            parse_server_message(r#"{"setupComplete":{}}"#).unwrap(),
            vec![InboundMessage::SessionEvent(SessionEventKind::SetupComplete)]
        );
        assert_eq!(
            parse_server_message(r#"{"serverContent":{"interrupted":true}}"#).unwrap(),
            vec![InboundMessage::SessionEvent(SessionEventKind::Interrupted)]
        );
        assert_eq!(
            parse_server_message(r#"{"serverContent":{"generationComplete":true}}"#).unwrap(),
            vec![]
        );
        assert!(parse_server_message(r#"{"usageMetadata":{"totalTokenCount":12}}"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_tool_call() {
        let raw = r#"{"toolCall":{"functionCalls":[{"id":"c1","name":"lookup","args":{"q":"x"}}]}}"#;
        let msgs = parse_server_message(raw).unwrap();
        assert!(matches!(&msgs[0], InboundMessage::ToolCall { name, .. } if name == "lookup"));
    }

    #[test]
    fn test_unknown_shape_is_protocol_error() {
        assert!(matches!(
            parse_server_message(r#"{"surprise":1}"#),
            Err(LiveError::Protocol(_))
        ));
        assert!(matches!(parse_server_message("not json"), Err(LiveError::Protocol(_))));
    }

    #[test]
    fn test_outbound_shapes() {
        let frame = AudioFrame::encode(&[0.0; 4], INPUT_SAMPLE_RATE);
        let msg = realtime_audio_message(&frame);
        assert_eq!(msg["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(msg["realtimeInput"]["audio"]["data"], "AAAAAAAAAAA=");

        let setup = setup_message("gemini-live", Some("be brief"));
        assert_eq!(setup["setup"]["model"], "models/gemini-live");
        assert_eq!(setup["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
    }
}
