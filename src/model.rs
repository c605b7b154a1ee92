use chrono::{DateTime, Local};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetDescriptor {
    pub namespace: String,
    pub pod_name: String,
    pub container: String,
}

impl TargetDescriptor {
    pub fn new(
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod_name: pod_name.into(),
            container: container.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.pod_name.trim().is_empty() && !self.container.trim().is_empty()
    }

    /// Parses `namespace/pod:container`; the namespace defaults to `default`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (namespace, rest) = match input.split_once('/') {
            Some((namespace, rest)) => (namespace.trim(), rest),
            None => ("default", input),
        };
        let (pod_name, container) = rest.split_once(':')?;
        let target = Self::new(
            if namespace.is_empty() {
                "default"
            } else {
                namespace
            },
            pod_name.trim(),
            container.trim(),
        );
        target.is_complete().then_some(target)
    }
}

impl Display for TargetDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.pod_name, self.container)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    pub const ALL: [Self; 4] = [Self::Info, Self::Warning, Self::Error, Self::Success];

    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: String,
    pub message: String,
    pub level: LogLevel,
    pub raw_content: String,
}

impl LogEntry {
    pub fn export_line(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp,
            self.level.label(),
            self.message
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelFilter {
    #[default]
    All,
    Only(LogLevel),
}

impl LevelFilter {
    pub fn matches(self, level: LogLevel) -> bool {
        match self {
            Self::All => true,
            Self::Only(expected) => expected == level,
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::All => Self::Only(LogLevel::Info),
            Self::Only(LogLevel::Info) => Self::Only(LogLevel::Warning),
            Self::Only(LogLevel::Warning) => Self::Only(LogLevel::Error),
            Self::Only(LogLevel::Error) => Self::Only(LogLevel::Success),
            Self::Only(LogLevel::Success) => Self::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Only(LogLevel::Info) => "info",
            Self::Only(LogLevel::Warning) => "warning",
            Self::Only(LogLevel::Error) => "error",
            Self::Only(LogLevel::Success) => "success",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogFilter {
    pub search_text: String,
    pub level: LevelFilter,
}

impl LogFilter {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if !self.level.matches(entry.level) {
            return false;
        }

        if self.search_text.trim().is_empty() {
            return true;
        }

        entry
            .message
            .to_lowercase()
            .contains(&self.search_text.to_lowercase())
    }

    pub fn is_identity(&self) -> bool {
        self.search_text.trim().is_empty() && self.level == LevelFilter::All
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOrigin {
    Stream,
    Poll,
    Simulated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub storage_percent: f64,
    pub sampled_at: DateTime<Local>,
    pub origin: SampleOrigin,
}

impl ResourceSample {
    pub fn is_simulated(&self) -> bool {
        self.origin == SampleOrigin::Simulated
    }
}

pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::{LevelFilter, LogEntry, LogFilter, LogLevel, TargetDescriptor, clamp_percent};

    fn entry(message: &str, level: LogLevel) -> LogEntry {
        LogEntry {
            id: 1,
            timestamp: "12:00:00".to_string(),
            message: message.to_string(),
            level,
            raw_content: message.to_string(),
        }
    }

    #[test]
    fn target_parses_namespace_pod_and_container() {
        assert_eq!(
            TargetDescriptor::parse("default/web-1:app"),
            Some(TargetDescriptor::new("default", "web-1", "app"))
        );
        assert_eq!(
            TargetDescriptor::parse("web-1:app"),
            Some(TargetDescriptor::new("default", "web-1", "app"))
        );
        assert_eq!(TargetDescriptor::parse("default/web-1"), None);
        assert_eq!(TargetDescriptor::parse("default/web-1: "), None);
    }

    #[test]
    fn incomplete_target_is_detected() {
        assert!(!TargetDescriptor::new("default", "", "app").is_complete());
        assert!(!TargetDescriptor::new("default", "web-1", "  ").is_complete());
        assert!(TargetDescriptor::new("", "web-1", "app").is_complete());
    }

    #[test]
    fn filter_ands_search_and_level() {
        let filter = LogFilter {
            search_text: "DISK".to_string(),
            level: LevelFilter::Only(LogLevel::Error),
        };
        assert!(filter.matches(&entry("error: disk full", LogLevel::Error)));
        assert!(!filter.matches(&entry("disk warning", LogLevel::Warning)));
        assert!(!filter.matches(&entry("error: network", LogLevel::Error)));
    }

    #[test]
    fn search_keeps_surrounding_whitespace() {
        let filter = LogFilter {
            search_text: " full".to_string(),
            level: LevelFilter::All,
        };
        assert!(filter.matches(&entry("error: disk full", LogLevel::Error)));
        assert!(!filter.matches(&entry("fullness check", LogLevel::Info)));

        let blank = LogFilter {
            search_text: "   ".to_string(),
            level: LevelFilter::All,
        };
        assert!(blank.matches(&entry("fullness check", LogLevel::Info)));
    }

    #[test]
    fn level_filter_cycles_back_to_all() {
        let mut filter = LevelFilter::All;
        for _ in 0..5 {
            filter = filter.next();
        }
        assert_eq!(filter, LevelFilter::All);
    }

    #[test]
    fn clamp_handles_out_of_range_and_nan() {
        assert_eq!(clamp_percent(140.0), 100.0);
        assert_eq!(clamp_percent(-3.0), 0.0);
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(42.5), 42.5);
    }
}
