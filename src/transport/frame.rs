use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel used by the server core for engine events.
pub const CHANNEL_SERVER_IMPL: &str = "citizen-server-impl";
/// Channel used by the scripting runtime for structured traces.
pub const CHANNEL_SCRIPTING_CORE: &str = "citizen-scripting-core";

pub const EVENT_BIND_ERROR: &str = "bind_error";
pub const EVENT_NUCLEUS_CONNECTED: &str = "nucleus_connected";
pub const EVENT_WATCHDOG_BARK: &str = "watchdog_bark";
pub const EVENT_STRUCTURED_TRACE: &str = "script_structured_trace";

/// One frame of the event side channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredTraceFrame {
    /// Session token of the emitting process
    pub mutex: String,
    pub value: TraceValue,
}

/// Frame body: where it came from and what it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceValue {
    pub channel: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
}

impl StructuredTraceFrame {
    /// Interprets a decoded JSON value as a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Frame`] if `mutex`, `value.channel` or `value.data` is
    /// missing or has the wrong type.
    pub fn from_value(value: Value) -> Result<Self> {
        let frame: Self = serde_json::from_value(value)
            .map_err(|e| Error::Frame(format!("Malformed frame: {}", e)))?;
        if frame.value.data.is_null() {
            return Err(Error::Frame("Frame has no data".to_string()));
        }
        Ok(frame)
    }

    /// `data.type`, if present.
    pub fn data_type(&self) -> Option<&str> {
        self.value.data.get("type").and_then(Value::as_str)
    }
}

/// Sub-payloads of a `script_structured_trace` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    Heartbeat,
    LogData,
    NodeHeap,
    ResourceEvent,
    PlayerlistEvent,
    CommandBridge,
    AckWarning,
}

impl TraceKind {
    /// Maps the payload `type` field; unknown types yield `None`.
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "txAdminHeartBeat" => Some(Self::Heartbeat),
            "txAdminLogData" => Some(Self::LogData),
            "txAdminLogNodeHeap" => Some(Self::NodeHeap),
            "txAdminResourceEvent" => Some(Self::ResourceEvent),
            "txAdminPlayerlistEvent" => Some(Self::PlayerlistEvent),
            "txAdminCommandBridge" => Some(Self::CommandBridge),
            "txAdminAckWarning" => Some(Self::AckWarning),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_requires_channel_and_data() {
        let ok = StructuredTraceFrame::from_value(json!({
            "mutex": "abc",
            "value": {"channel": "citizen-server-impl", "data": {"type": "bind_error"}, "line": 12}
        }))
        .unwrap();
        assert_eq!(ok.data_type(), Some("bind_error"));
        assert_eq!(ok.value.line, Some(12));

        let no_data = json!({"mutex": "abc", "value": {"channel": "x"}});
        assert!(StructuredTraceFrame::from_value(no_data).is_err());

        let no_channel = json!({"mutex": "abc", "value": {"data": {}}});
        assert!(StructuredTraceFrame::from_value(no_channel).is_err());
    }
}
