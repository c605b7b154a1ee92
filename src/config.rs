use crate::cli::CliArgs;
use crate::logs::LogStreamOptions;
use crate::session::SessionOptions;
use crate::surface::{CellMetrics, GridSize, SurfaceOptions};
use crate::telemetry::{MetricsSource, TelemetryOptions};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub source: Option<PathBuf>,
    pub config: PodlinkConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PodlinkConfig {
    #[serde(alias = "url", alias = "tunnel_url")]
    pub base_url: String,
    pub token: Option<String>,
    pub export_dir: PathBuf,
    pub terminal: TerminalSection,
    pub logs: LogsSection,
    pub telemetry: TelemetrySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TerminalSection {
    #[serde(alias = "fit_retry_ms")]
    pub fit_retry_delay_ms: u64,
    pub fit_retry_limit: u32,
    #[serde(alias = "scrollback")]
    pub scrollback_lines: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogsSection {
    #[serde(alias = "max_entries", alias = "buffer")]
    pub capacity: usize,
    #[serde(alias = "tail")]
    pub tail_lines: u32,
    pub follow: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub source: MetricsSource,
    #[serde(alias = "alpha")]
    pub smoothing: f64,
    #[serde(alias = "poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(alias = "cache_ttl")]
    pub cache_ttl_secs: u64,
    pub synthesize_gaps: bool,
    pub poll_fallback: bool,
    pub kube_context: Option<String>,
}

impl Default for PodlinkConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8000".to_string(),
            token: None,
            export_dir: PathBuf::from("."),
            terminal: TerminalSection::default(),
            logs: LogsSection::default(),
            telemetry: TelemetrySection::default(),
        }
    }
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            fit_retry_delay_ms: 100,
            fit_retry_limit: 10,
            scrollback_lines: 1000,
        }
    }
}

impl Default for LogsSection {
    fn default() -> Self {
        let defaults = LogStreamOptions::default();
        Self {
            capacity: defaults.capacity,
            tail_lines: defaults.tail_lines,
            follow: defaults.follow,
        }
    }
}

impl Default for TelemetrySection {
    fn default() -> Self {
        let defaults = TelemetryOptions::default();
        Self {
            source: defaults.source,
            smoothing: defaults.smoothing,
            poll_interval_secs: defaults.poll_interval.as_secs(),
            cache_ttl_secs: defaults.cache_ttl.as_secs(),
            synthesize_gaps: defaults.synthesize_gaps,
            poll_fallback: true,
            kube_context: None,
        }
    }
}

impl PodlinkConfig {
    /// Options for a session rendered into a host that measures in character cells.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            fit_retry_delay: Duration::from_millis(self.terminal.fit_retry_delay_ms.max(1)),
            fit_retry_limit: self.terminal.fit_retry_limit,
            surface: SurfaceOptions {
                metrics: CellMetrics::CELLS,
                scrollback_lines: self.terminal.scrollback_lines,
                initial: GridSize { rows: 24, cols: 80 },
            },
            ..SessionOptions::default()
        }
    }

    pub fn log_options(&self) -> LogStreamOptions {
        LogStreamOptions {
            capacity: self.logs.capacity.max(1),
            tail_lines: self.logs.tail_lines,
            follow: self.logs.follow,
        }
    }

    pub fn telemetry_options(&self) -> TelemetryOptions {
        TelemetryOptions {
            source: self.telemetry.source,
            smoothing: self.telemetry.smoothing,
            poll_interval: Duration::from_secs(self.telemetry.poll_interval_secs.max(1)),
            cache_ttl: Duration::from_secs(self.telemetry.cache_ttl_secs),
            synthesize_gaps: self.telemetry.synthesize_gaps,
        }
    }

    /// Command-line flags win over file values.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(base_url) = &args.base_url {
            self.base_url = base_url.clone();
        }
        if let Some(token) = &args.token {
            self.token = Some(token.clone());
        }
        if let Some(tail_lines) = args.tail_lines {
            self.logs.tail_lines = tail_lines;
        }
        if args.no_follow {
            self.logs.follow = false;
        }
        if args.poll_metrics {
            self.telemetry.source = MetricsSource::Poll;
        }
        if let Some(export_dir) = &args.export_dir {
            self.export_dir = export_dir.clone();
        }
    }

    pub fn wants_poller(&self) -> bool {
        self.telemetry.source == MetricsSource::Poll || self.telemetry.poll_fallback
    }
}

pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => discover_config_path(
            std::env::var("PODLINK_CONFIG").ok(),
            Path::new("."),
            std::env::var("HOME").ok().as_deref().map(Path::new),
        ),
    };
    let Some(path) = path else {
        return Ok(LoadedConfig {
            source: None,
            config: PodlinkConfig::default(),
        });
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: PodlinkConfig = if raw.trim().is_empty() {
        PodlinkConfig::default()
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?
    };

    Ok(LoadedConfig {
        source: Some(path),
        config,
    })
}

fn discover_config_path(env: Option<String>, cwd: &Path, home: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = env
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [cwd.join("podlink.yaml"), cwd.join(".podlink.yaml")];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Some(home) = home {
        let candidate = home.join(".config/podlink/config.yaml");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}
