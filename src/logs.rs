use crate::channel::{ChannelEvent, Connector, TransportChannel};
use crate::endpoint::Endpoints;
use crate::model::{ConnectionState, LogEntry, LogFilter, LogLevel, TargetDescriptor};
use crate::session::next_channel_event;
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Local};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

const CONTENT_FIELDS: [&str; 7] = ["content", "message", "msg", "log", "line", "text", "data"];
const TIMESTAMP_FIELDS: [&str; 3] = ["timestamp", "time", "ts"];
const LOCAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload is not a JSON object")]
    NotStructured,
    #[error("JSON object has no content field")]
    MissingContent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine {
    pub timestamp: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStreamOptions {
    pub capacity: usize,
    pub tail_lines: u32,
    pub follow: bool,
}

impl Default for LogStreamOptions {
    fn default() -> Self {
        Self {
            capacity: 5000,
            tail_lines: 100,
            follow: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct LogControl<'a> {
    pod_name: &'a str,
    container: &'a str,
    tail_lines: u32,
    follow: bool,
}

pub struct LogStreamProcessor {
    endpoints: Endpoints,
    connector: Arc<dyn Connector>,
    options: LogStreamOptions,
    target: Option<TargetDescriptor>,
    channel: Option<TransportChannel>,
    entries: VecDeque<LogEntry>,
    next_id: u64,
    paused: bool,
    dropped_while_paused: u64,
    evicted: u64,
    state: ConnectionState,
}

impl LogStreamProcessor {
    pub fn new(endpoints: Endpoints, connector: Arc<dyn Connector>, options: LogStreamOptions) -> Self {
        let options = LogStreamOptions {
            capacity: options.capacity.max(1),
            ..options
        };
        Self {
            endpoints,
            connector,
            options,
            target: None,
            channel: None,
            entries: VecDeque::with_capacity(options.capacity.min(1024)),
            next_id: 1,
            paused: false,
            dropped_while_paused: 0,
            evicted: 0,
            state: ConnectionState::Idle,
        }
    }

    pub fn start(&mut self, target: TargetDescriptor) -> Result<()> {
        self.stop();
        if !self.entries.is_empty() {
            let marker = format!("--- log stream restarted for {target} ---");
            self.push(Local::now().format(LOCAL_TIMESTAMP_FORMAT).to_string(), marker.clone(), marker);
        }

        let mut channel = TransportChannel::new(target.clone(), Arc::clone(&self.connector));
        let opened = channel.open(self.endpoints.logs().as_str());
        self.target = Some(target);
        if let Err(error) = opened {
            self.state = ConnectionState::Error;
            return Err(error).context("failed to open log stream");
        }

        self.channel = Some(channel);
        self.state = ConnectionState::Connecting;
        if let Some(target) = self.target.as_ref() {
            info!(pod = %target, tail_lines = self.options.tail_lines, "log stream starting");
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if self.state.is_live() {
            self.state = ConnectionState::Disconnected;
        }
    }

    pub async fn next_event(&mut self) -> ChannelEvent {
        next_channel_event(self.channel.as_mut()).await
    }

    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self
            .channel
            .as_mut()
            .and_then(TransportChannel::try_next_event)
        {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    pub fn handle(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::StateChanged(ConnectionState::Connected) => {
                self.state = ConnectionState::Connected;
                if let Err(error) = self.send_control() {
                    warn!("log stream control message failed: {error:#}");
                }
            }
            ChannelEvent::StateChanged(state) => {
                debug!(state = state.label(), "log stream state");
                self.state = state;
            }
            ChannelEvent::Message(bytes) => self.ingest_frame(&String::from_utf8_lossy(&bytes)),
            ChannelEvent::Error(info) => {
                warn!("log stream failed: {info}");
                self.state = ConnectionState::Error;
            }
        }
    }

    fn send_control(&mut self) -> Result<()> {
        let (Some(target), Some(channel)) = (self.target.as_ref(), self.channel.as_mut()) else {
            return Ok(());
        };
        let control = LogControl {
            pod_name: &target.pod_name,
            container: &target.container,
            tail_lines: self.options.tail_lines,
            follow: self.options.follow,
        };
        let payload = serde_json::to_vec(&control).context("failed to encode log control message")?;
        channel
            .send(&payload)
            .context("failed to send log control message")
    }

    /// One frame may carry a single structured record or several plain lines.
    pub fn ingest_frame(&mut self, frame: &str) {
        if decode_structured(frame).is_ok() {
            self.append(frame);
            return;
        }
        for line in frame.lines() {
            self.append(line);
        }
    }

    pub fn append(&mut self, raw: &str) -> Option<u64> {
        if self.paused {
            self.dropped_while_paused += 1;
            return None;
        }

        let decoded = decode(raw);
        if decoded.message.trim().is_empty() {
            return None;
        }
        let timestamp = decoded
            .timestamp
            .unwrap_or_else(|| Local::now().format(LOCAL_TIMESTAMP_FORMAT).to_string());
        Some(self.push(timestamp, decoded.message, raw.to_string()))
    }

    fn push(&mut self, timestamp: String, message: String, raw_content: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let level = classify(&message);
        if self.entries.len() >= self.options.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(LogEntry {
            id,
            timestamp,
            message,
            level,
            raw_content,
        });
        id
    }

    /// Entries borrow the buffer only, so the filter may be a temporary.
    pub fn query<'a>(
        &'a self,
        filter: &LogFilter,
    ) -> impl Iterator<Item = &'a LogEntry> + use<'a> {
        let filter = filter.clone();
        self.entries.iter().filter(move |entry| filter.matches(entry))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dropped_while_paused = 0;
        self.evicted = 0;
    }

    pub fn export(&self) -> String {
        self.export_filtered(&LogFilter::default())
    }

    pub fn export_filtered(&self, filter: &LogFilter) -> String {
        self.query(filter)
            .map(LogEntry::export_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn export_to_file(&self, dir: &Path, filter: &LogFilter) -> Result<PathBuf> {
        let pod = self
            .target
            .as_ref()
            .map(|target| target.pod_name.as_str())
            .unwrap_or("logs");
        let path = dir.join(export_file_name(pod, Local::now()));
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create export directory {}", dir.display()))?;
        std::fs::write(&path, self.export_filtered(filter))
            .with_context(|| format!("failed to write log export {}", path.display()))?;
        info!(path = %path.display(), "log export written");
        Ok(path)
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if !paused {
            self.dropped_while_paused = 0;
        }
    }

    pub fn toggle_paused(&mut self) -> bool {
        self.set_paused(!self.paused);
        self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn dropped_while_paused(&self) -> u64 {
        self.dropped_while_paused
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn level_counts(&self) -> [(LogLevel, usize); 4] {
        LogLevel::ALL.map(|level| {
            (
                level,
                self.entries.iter().filter(|entry| entry.level == level).count(),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.options.capacity
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn target(&self) -> Option<&TargetDescriptor> {
        self.target.as_ref()
    }
}

impl Drop for LogStreamProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn export_file_name(pod: &str, at: DateTime<Local>) -> String {
    format!("podlink-{pod}-{}.log", at.format("%Y%m%d-%H%M%S"))
}

pub fn classify(message: &str) -> LogLevel {
    let lower = message.to_lowercase();
    if ["error", "failed", "exception"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return LogLevel::Error;
    }
    if lower.contains("warn") {
        return LogLevel::Warning;
    }
    if ["success", "succeed", "completed", "done"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return LogLevel::Success;
    }
    LogLevel::Info
}

pub fn decode(raw: &str) -> DecodedLine {
    if let Ok(decoded) = decode_structured(raw) {
        return decoded;
    }
    match split_leading_timestamp(raw) {
        Some((timestamp, rest)) => DecodedLine {
            timestamp: Some(timestamp.to_string()),
            message: rest.to_string(),
        },
        None => DecodedLine {
            timestamp: None,
            message: raw.to_string(),
        },
    }
}

pub fn decode_structured(raw: &str) -> Result<DecodedLine, DecodeError> {
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(raw.trim()) else {
        return Err(DecodeError::NotStructured);
    };

    let message = CONTENT_FIELDS
        .iter()
        .find_map(|field| object.get(*field).and_then(value_text))
        .ok_or(DecodeError::MissingContent)?;
    let timestamp = TIMESTAMP_FIELDS
        .iter()
        .find_map(|field| object.get(*field).and_then(value_text));

    Ok(DecodedLine { timestamp, message })
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Splits a leading RFC 3339 token (`2024-01-15T10:30:45.123Z rest`) off a plain line.
pub fn split_leading_timestamp(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    let (token, rest) = trimmed.split_once(char::is_whitespace)?;
    DateTime::<FixedOffset>::parse_from_rfc3339(token).ok()?;
    Some((token, rest.trim_start()))
}

#[cfg(test)]
mod tests {
    use super::{
        DecodeError, LogStreamOptions, LogStreamProcessor, classify, decode, decode_structured,
        export_file_name, split_leading_timestamp,
    };
    use crate::channel::testing::ScriptedConnector;
    use crate::endpoint::Endpoints;
    use crate::model::{ConnectionState, LevelFilter, LogFilter, LogLevel, TargetDescriptor};
    use chrono::{Local, TimeZone};
    use std::sync::Arc;

    fn processor(capacity: usize) -> (LogStreamProcessor, ScriptedConnector) {
        let connector = ScriptedConnector::default();
        let processor = LogStreamProcessor::new(
            Endpoints::new("ws://dashboard:8000", "abc").expect("endpoints"),
            Arc::new(connector.clone()),
            LogStreamOptions {
                capacity,
                tail_lines: 50,
                follow: true,
            },
        );
        (processor, connector)
    }

    #[test]
    fn plain_and_structured_lines_are_classified() {
        let (mut processor, _) = processor(10);
        processor.append("ERROR: disk full");
        processor.append(r#"{"content":"build succeeded"}"#);

        let entries: Vec<_> = processor.query(&LogFilter::default()).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Error);
        assert_eq!(entries[0].message, "ERROR: disk full");
        assert_eq!(entries[1].level, LogLevel::Success);
        assert_eq!(entries[1].message, "build succeeded");
        assert_eq!(entries[1].raw_content, r#"{"content":"build succeeded"}"#);
        assert!(entries[0].id < entries[1].id);
    }

    #[test]
    fn buffer_evicts_oldest_first() {
        let (mut processor, _) = processor(3);
        for line in ["one", "two", "three", "four", "five"] {
            processor.append(line);
        }
        let messages: Vec<_> = processor
            .query(&LogFilter::default())
            .map(|entry| entry.message.as_str())
            .collect();
        assert_eq!(messages, vec!["three", "four", "five"]);
        assert_eq!(processor.evicted(), 2);
    }

    #[test]
    fn identity_query_returns_everything_in_order() {
        let (mut processor, _) = processor(10);
        processor.append("warn: slow request");
        processor.append("request done");
        let filter = LogFilter::default();
        assert!(filter.is_identity());
        let ids: Vec<_> = processor.query(&filter).map(|entry| entry.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn query_is_reevaluated_after_appends() {
        let (mut processor, _) = processor(10);
        let filter = LogFilter {
            search_text: "disk".to_string(),
            level: LevelFilter::Only(LogLevel::Error),
        };
        processor.append("error: disk full");
        assert_eq!(processor.query(&filter).count(), 1);
        processor.append("failed to mount disk");
        processor.append("disk ok");
        assert_eq!(processor.query(&filter).count(), 2);
    }

    #[test]
    fn classification_is_ordered_and_deterministic() {
        assert_eq!(classify("Exception in thread main"), LogLevel::Error);
        assert_eq!(classify("warning: task failed"), LogLevel::Error);
        assert_eq!(classify("WARN cache miss"), LogLevel::Warning);
        assert_eq!(classify("migration completed"), LogLevel::Success);
        assert_eq!(classify("Rollout SUCCEEDED"), LogLevel::Success);
        assert_eq!(classify("listening on :8080"), LogLevel::Info);
        assert_eq!(classify("listening on :8080"), classify("listening on :8080"));
    }

    #[test]
    fn structured_decoding_follows_field_fallbacks() {
        let decoded = decode_structured(r#"{"msg":"hello","ts":"2024-01-15T10:30:45Z"}"#)
            .expect("structured");
        assert_eq!(decoded.message, "hello");
        assert_eq!(decoded.timestamp.as_deref(), Some("2024-01-15T10:30:45Z"));

        assert_eq!(
            decode_structured(r#"{"level":"info"}"#),
            Err(DecodeError::MissingContent)
        );
        assert_eq!(decode_structured("[1, 2]"), Err(DecodeError::NotStructured));
        assert_eq!(decode(r#"{"level":"info"}"#).message, r#"{"level":"info"}"#);
    }

    #[test]
    fn leading_rfc3339_token_becomes_the_timestamp() {
        assert_eq!(
            split_leading_timestamp("2024-01-15T10:30:45.123Z GET /healthz 200"),
            Some(("2024-01-15T10:30:45.123Z", "GET /healthz 200"))
        );
        assert_eq!(split_leading_timestamp("GET /healthz 200"), None);
        let decoded = decode("2024-01-15T10:30:45+02:00 started");
        assert_eq!(decoded.timestamp.as_deref(), Some("2024-01-15T10:30:45+02:00"));
        assert_eq!(decoded.message, "started");
    }

    #[test]
    fn blank_content_is_dropped() {
        let (mut processor, _) = processor(10);
        assert_eq!(processor.append("   "), None);
        assert_eq!(processor.append(r#"{"content":""}"#), None);
        assert!(processor.is_empty());
    }

    #[test]
    fn paused_processor_drops_and_counts() {
        let (mut processor, _) = processor(10);
        processor.set_paused(true);
        assert_eq!(processor.append("ignored"), None);
        assert_eq!(processor.dropped_while_paused(), 1);
        assert!(!processor.toggle_paused());
        assert_eq!(processor.dropped_while_paused(), 0);
        assert!(processor.append("kept").is_some());
    }

    #[test]
    fn export_formats_one_line_per_entry() {
        let (mut processor, _) = processor(10);
        processor.append(r#"{"content":"boot","timestamp":"10:00:00"}"#);
        processor.append(r#"{"content":"error: oom","timestamp":"10:00:01"}"#);
        assert_eq!(
            processor.export(),
            "[10:00:00] [INFO] boot\n[10:00:01] [ERROR] error: oom"
        );

        let at = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("local time");
        assert_eq!(export_file_name("web-1", at), "podlink-web-1-20240309-140507.log");
    }

    #[test]
    fn export_to_file_writes_filtered_view() {
        let (mut processor, _) = processor(10);
        processor.append(r#"{"content":"boot","timestamp":"t1"}"#);
        processor.append(r#"{"content":"error: oom","timestamp":"t2"}"#);
        let dir = std::env::temp_dir().join(format!("podlink-export-{}", std::process::id()));
        let filter = LogFilter {
            search_text: String::new(),
            level: LevelFilter::Only(LogLevel::Error),
        };
        let path = processor.export_to_file(&dir, &filter).expect("export");
        let written = std::fs::read_to_string(&path).expect("read export");
        assert_eq!(written, "[t2] [ERROR] error: oom");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn level_counts_cover_every_level() {
        let (mut processor, _) = processor(10);
        processor.append("error one");
        processor.append("error two");
        processor.append("done");
        let counts = processor.level_counts();
        assert_eq!(counts[0], (LogLevel::Info, 0));
        assert_eq!(counts[2], (LogLevel::Error, 2));
        assert_eq!(counts[3], (LogLevel::Success, 1));
    }

    #[test]
    fn stream_sends_control_message_and_buffers_frames() {
        let (mut processor, connector) = processor(10);
        processor
            .start(TargetDescriptor::new("default", "web-1", "app"))
            .expect("start");
        let mut link = connector.take_link();
        assert_eq!(link.url, "ws://dashboard:8000/ws/logs?token=abc");

        link.open();
        link.push(b"first line\nsecond line");
        processor.pump();
        assert_eq!(processor.connection_state(), ConnectionState::Connected);

        let sent = link.sent();
        assert_eq!(sent.len(), 1);
        let control: serde_json::Value = serde_json::from_slice(&sent[0]).expect("control json");
        assert_eq!(
            control,
            serde_json::json!({
                "pod_name": "web-1",
                "container": "app",
                "tail_lines": 50,
                "follow": true
            })
        );
        assert_eq!(processor.len(), 2);

        link.close(1000, "");
        processor.pump();
        assert_eq!(processor.connection_state(), ConnectionState::Disconnected);
        assert_eq!(processor.len(), 2);
    }

    #[test]
    fn restart_stops_previous_stream_and_marks_the_buffer() {
        let (mut processor, connector) = processor(10);
        let target = TargetDescriptor::new("default", "web-1", "app");
        processor.start(target.clone()).expect("start");
        let first = connector.take_link();
        first.open();
        first.push(b"before restart");
        processor.pump();

        processor.start(target).expect("restart");
        assert!(first.is_released());
        assert_eq!(processor.connection_state(), ConnectionState::Connecting);
        let last = processor
            .query(&LogFilter::default())
            .last()
            .expect("marker");
        assert!(last.message.contains("log stream restarted"));
        assert_eq!(processor.len(), 2);
    }
}
