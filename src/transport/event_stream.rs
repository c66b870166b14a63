use crate::collaborators::Collaborators;
use crate::error::{Error, Result};
use crate::transport::frame::{
    CHANNEL_SCRIPTING_CORE, CHANNEL_SERVER_IMPL, EVENT_BIND_ERROR, EVENT_NUCLEUS_CONNECTED,
    EVENT_STRUCTURED_TRACE, EVENT_WATCHDOG_BARK, StructuredTraceFrame, TraceKind,
};
use futures_lite::io::{AsyncRead, AsyncReadExt};
use regex::Regex;
use serde_json::Value;
use std::io;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Cache key the server's platform identifier is published under.
pub const CFX_ID_CACHE_KEY: &str = "fxsRuntime:cfxId";

const READ_CHUNK: usize = 16 * 1024;

static NUCLEUS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https://)?.*-([0-9a-z]{6,})\.users\.cfx\.re/?$")
        .expect("nucleus url pattern is valid")
});

/// The decoder's view of the supervisor.
pub trait SessionLink: Send + Sync {
    /// Session token of the live process, if any.
    fn active_mutex(&self) -> Option<String>;
    /// See [`Supervisor::signal_spawn_backoff_required`](crate::Supervisor::signal_spawn_backoff_required).
    fn signal_spawn_backoff_required(&self, required: bool) -> Duration;
    fn spawn_backoff_active(&self) -> bool;
}

/// What happened to a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Routed to its owner.
    Dispatched,
    /// Well-formed and current, but nothing handles it.
    Ignored,
    /// Stale session token or missing fields.
    Rejected,
}

/// Splits a byte stream of concatenated JSON values, holding on to partial ones.
#[derive(Debug, Default)]
pub(crate) struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Appends `chunk` and returns every complete value now available.
    /// Malformed input comes back as an error and is skipped up to the next `{`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<std::result::Result<Value, serde_json::Error>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;

        loop {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buf[start..]).into_iter::<Value>();
            let mut consumed = 0;
            let failure = loop {
                match stream.next() {
                    Some(Ok(value)) => {
                        consumed = stream.byte_offset();
                        frames.push(Ok(value));
                    }
                    // Partial value, wait for more bytes.
                    Some(Err(e)) if e.is_eof() => break None,
                    Some(Err(e)) => break Some(e),
                    None => {
                        // Whitespace only.
                        consumed = self.buf.len() - start;
                        break None;
                    }
                }
            };
            start += consumed;

            match failure {
                Some(e) => {
                    frames.push(Err(e));
                    start = self.resync_from(start);
                }
                None => break,
            }
        }

        self.buf.drain(..start);
        frames
    }

    /// Offset of the next `{` past the malformed value starting at `start`.
    fn resync_from(&self, start: usize) -> usize {
        let rest = &self.buf[start..];
        let first = rest
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(rest.len());
        rest.iter()
            .skip(first + 1)
            .position(|&b| b == b'{')
            .map_or(self.buf.len(), |offset| start + first + 1 + offset)
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Consumes the server's event side channel and routes each frame.
///
/// One decoder exists per process lifetime and processes frames strictly in
/// arrival order. A bad frame is logged and skipped; it never stops the stream.
pub struct EventStreamDecoder {
    link: Arc<dyn SessionLink>,
    collaborators: Collaborators,
    watchdog_log_delay: Duration,
    buffer: FrameBuffer,
}

impl EventStreamDecoder {
    pub fn new(
        link: Arc<dyn SessionLink>,
        collaborators: Collaborators,
        watchdog_log_delay: Duration,
    ) -> Self {
        Self {
            link,
            collaborators,
            watchdog_log_delay,
            buffer: FrameBuffer::default(),
        }
    }

    /// Reads `reader` until EOF, handling frames as they complete.
    pub async fn run<R>(mut self, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    self.feed(&buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Event stream read failed");
                    break;
                }
            }
        }
        tracing::debug!("Event stream closed");
    }

    /// Processes a chunk of raw bytes. Returns how many frames were dispatched.
    pub fn feed(&mut self, chunk: &[u8]) -> usize {
        let mut dispatched = 0;
        for decoded in self.buffer.push(chunk) {
            let value = match decoded {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed event stream data");
                    continue;
                }
            };
            match self.handle_frame(value) {
                Ok(FrameOutcome::Dispatched) => dispatched += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to handle event frame"),
            }
        }
        dispatched
    }

    /// Validates a decoded value against the live session and routes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Frame`] when a current frame's payload lacks a field
    /// its handler needs.
    pub fn handle_frame(&self, value: Value) -> Result<FrameOutcome> {
        let Some(active) = self.link.active_mutex() else {
            tracing::debug!("Dropping event frame: no active session");
            return Ok(FrameOutcome::Rejected);
        };

        let frame = match StructuredTraceFrame::from_value(value) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping event frame");
                return Ok(FrameOutcome::Rejected);
            }
        };
        if frame.mutex != active {
            tracing::debug!(mutex = %frame.mutex, "Dropping event frame from a previous session");
            return Ok(FrameOutcome::Rejected);
        }

        let data = &frame.value.data;
        match (frame.value.channel.as_str(), frame.data_type()) {
            (CHANNEL_SERVER_IMPL, Some(EVENT_BIND_ERROR)) => {
                let port = port_label(data);
                let delay = self.link.signal_spawn_backoff_required(true);
                tracing::warn!(
                    port = %port,
                    delay_ms = delay.as_millis() as u64,
                    "Detected server error: port {} is busy, spawn backoff is now {}ms",
                    port,
                    delay.as_millis()
                );
                Ok(FrameOutcome::Dispatched)
            }
            (CHANNEL_SERVER_IMPL, Some(EVENT_NUCLEUS_CONNECTED)) => {
                let url = data
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Frame("nucleus_connected without url".to_string()))?;
                match NUCLEUS_URL.captures(url).and_then(|c| c.get(2)) {
                    Some(id) => {
                        tracing::info!(cfx_id = id.as_str(), "Server connected to nucleus");
                        self.collaborators
                            .cache
                            .set(CFX_ID_CACHE_KEY, id.as_str().to_string());
                        Ok(FrameOutcome::Dispatched)
                    }
                    None => {
                        tracing::warn!(url, "Unrecognized nucleus url");
                        Ok(FrameOutcome::Ignored)
                    }
                }
            }
            (CHANNEL_SERVER_IMPL, Some(EVENT_WATCHDOG_BARK)) => {
                self.report_watchdog_bark(data);
                Ok(FrameOutcome::Dispatched)
            }
            (CHANNEL_SCRIPTING_CORE, Some(EVENT_STRUCTURED_TRACE)) => {
                self.route_structured_trace(data, &frame.mutex)
            }
            _ => Ok(FrameOutcome::Ignored),
        }
    }

    fn route_structured_trace(&self, data: &Value, mutex: &str) -> Result<FrameOutcome> {
        let payload = data
            .get("payload")
            .ok_or_else(|| Error::Frame("structured trace without payload".to_string()))?;
        let Some(kind) = payload
            .get("type")
            .and_then(Value::as_str)
            .and_then(TraceKind::from_type)
        else {
            return Ok(FrameOutcome::Ignored);
        };

        let c = &self.collaborators;
        match kind {
            TraceKind::Heartbeat => {
                c.health_monitor.handle_heartbeat();
                // A heartbeat means the server got past binding its port.
                if self.link.spawn_backoff_active() {
                    self.link.signal_spawn_backoff_required(false);
                    tracing::info!("Server is up, spawn backoff reset");
                }
            }
            TraceKind::LogData => {
                let logs = payload
                    .get("logs")
                    .ok_or_else(|| Error::Frame("log batch without logs".to_string()))?;
                c.logger.write_structured_logs(logs, mutex);
            }
            TraceKind::NodeHeap => c.metrics.log_node_heap(payload),
            TraceKind::ResourceEvent => c.resources.handle_server_events(payload, mutex),
            TraceKind::PlayerlistEvent => c.playerlist.handle_server_events(payload, mutex),
            TraceKind::CommandBridge => c.bridge.handle_bridged_command(payload),
            TraceKind::AckWarning => {
                let action_id = payload
                    .get("actionId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Frame("warning ack without actionId".to_string()))?;
                c.actions.ack_warning(action_id);
            }
        }
        Ok(FrameOutcome::Dispatched)
    }

    fn report_watchdog_bark(&self, data: &Value) {
        let thread = data
            .get("thread")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let stack = data
            .get("stack")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "root")
            .map(str::to_string);

        let report = move || match stack {
            Some(stack) => tracing::error!(
                thread = %thread,
                "Detected server thread {} hung with stack:\n\t{}",
                thread,
                stack
            ),
            None => tracing::error!(
                thread = %thread,
                "Detected server thread {} hung, no stack available",
                thread
            ),
        };

        // Give the server's own hang output a moment to land first.
        let delay = self.watchdog_log_delay;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    report();
                });
            }
            Err(_) => report(),
        }
    }
}

/// `data.port` for log lines: strings unquoted, numbers as is.
fn port_label(data: &Value) -> String {
    match data.get("port") {
        Some(Value::String(port)) => port.clone(),
        Some(port) => port.to_string(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_split_across_chunks() {
        let mut buffer = FrameBuffer::default();
        assert!(buffer.push(br#"{"mutex":"ab"#).is_empty());
        assert!(buffer.pending() > 0);

        let frames = buffer.push(br#"c","value":{}}{"n":1}  {"n":"#);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap()["mutex"], "abc");
        assert_eq!(frames[1].as_ref().unwrap()["n"], 1);

        let frames = buffer.push(b"2}\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref().unwrap()["n"], 2);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_malformed_data_is_skipped() {
        let mut buffer = FrameBuffer::default();
        let frames = buffer.push(br#"{"a":]} {"b":1}"#);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_err());
        assert_eq!(frames[1].as_ref().unwrap()["b"], 1);

        let frames = buffer.push(b"garbage");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_err());
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_burst_of_small_frames_in_one_chunk() {
        let mut buffer = FrameBuffer::default();
        let mut chunk = Vec::new();
        for n in 0..2000 {
            chunk.extend_from_slice(format!("{{\"n\":{}}}", n).as_bytes());
        }
        chunk.extend_from_slice(br#"{"n":"#);

        let frames = buffer.push(&chunk);
        assert_eq!(frames.len(), 2000);
        assert_eq!(frames[1999].as_ref().unwrap()["n"], 1999);
        assert_eq!(buffer.pending(), 5);

        let frames = buffer.push(b"2000}");
        assert_eq!(frames[0].as_ref().unwrap()["n"], 2000);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_port_label_strips_json_quotes() {
        assert_eq!(port_label(&serde_json::json!({"port": "30120"})), "30120");
        assert_eq!(port_label(&serde_json::json!({"port": 30120})), "30120");
        assert_eq!(port_label(&serde_json::json!({})), "unknown");
    }

    #[test]
    fn test_nucleus_url_pattern() {
        let caps = NUCLEUS_URL
            .captures("https://myname-abc123.users.cfx.re/")
            .unwrap();
        assert_eq!(&caps[2], "abc123");
        assert!(NUCLEUS_URL.captures("https://example.com").is_none());
        assert!(NUCLEUS_URL.captures("x-abc.users.cfx.re").is_none());
    }
}
