use crate::channel::{ChannelEvent, Connector, TransportChannel};
use crate::endpoint::Endpoints;
use crate::model::{ConnectionState, ResourceSample, SampleOrigin, TargetDescriptor, clamp_percent};
use crate::session::{next_channel_event, sleep_until};
use anyhow::{Context, Result};
use chrono::Local;
use futures::future::BoxFuture;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MetricsFrame {
    Batch {
        #[serde(alias = "items", alias = "metrics")]
        pods: Vec<PodUsage>,
    },
    List(Vec<PodUsage>),
    Single(PodUsage),
}

impl MetricsFrame {
    pub fn entries(&self) -> &[PodUsage] {
        match self {
            Self::Batch { pods } | Self::List(pods) => pods,
            Self::Single(usage) => std::slice::from_ref(usage),
        }
    }

    /// Heartbeats and control frames decode as entries without any metric.
    pub fn carries_metrics(&self) -> bool {
        self.entries().iter().any(PodUsage::has_metrics)
    }

    /// First metric-bearing entry whose name starts with the target's pod name;
    /// nameless entries always match.
    pub fn select(&self, target: &TargetDescriptor) -> Option<&PodUsage> {
        self.entries().iter().filter(|usage| usage.has_metrics()).find(|usage| {
            usage
                .name
                .as_deref()
                .is_none_or(|name| name.starts_with(target.pod_name.as_str()))
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodUsage {
    #[serde(default, alias = "pod_name", alias = "pod", alias = "podName")]
    pub name: Option<String>,
    #[serde(
        default,
        alias = "cpu_percent",
        alias = "cpuPercent",
        deserialize_with = "lenient_percent"
    )]
    pub cpu: Option<f64>,
    #[serde(
        default,
        alias = "memory_percent",
        alias = "memoryPercent",
        deserialize_with = "lenient_percent"
    )]
    pub memory: Option<f64>,
    #[serde(
        default,
        alias = "storage_percent",
        alias = "storagePercent",
        deserialize_with = "lenient_percent"
    )]
    pub storage: Option<f64>,
}

impl PodUsage {
    pub fn has_metrics(&self) -> bool {
        self.cpu.is_some() || self.memory.is_some() || self.storage.is_some()
    }

    pub fn to_sample(&self, origin: SampleOrigin) -> ResourceSample {
        ResourceSample {
            cpu_percent: clamp_percent(self.cpu.unwrap_or_default()),
            memory_percent: clamp_percent(self.memory.unwrap_or_default()),
            storage_percent: clamp_percent(self.storage.unwrap_or_default()),
            sampled_at: Local::now(),
            origin,
        }
    }
}

fn lenient_percent<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => parse_percent(&text),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    })
}

fn parse_percent(text: &str) -> Option<f64> {
    text.trim().trim_end_matches('%').trim().parse::<f64>().ok()
}

pub trait MetricsPoller: Send + Sync {
    fn poll<'a>(&'a self, target: &'a TargetDescriptor) -> BoxFuture<'a, Result<MetricsFrame>>;
}

/// Polled frames keyed by target, fresh for `ttl`.
pub struct SampleCache {
    ttl: Duration,
    entries: HashMap<TargetDescriptor, (Instant, MetricsFrame)>,
}

impl SampleCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, target: &TargetDescriptor) -> Option<&MetricsFrame> {
        let (stored_at, frame) = self.entries.get(target)?;
        (stored_at.elapsed() < self.ttl).then_some(frame)
    }

    pub fn insert(&mut self, target: TargetDescriptor, frame: MetricsFrame) {
        self.entries.insert(target, (Instant::now(), frame));
    }

    pub fn invalidate(&mut self, target: &TargetDescriptor) {
        self.entries.remove(target);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsSource {
    #[default]
    Stream,
    Poll,
}

#[derive(Debug, Clone, Copy)]
pub struct TelemetryOptions {
    pub source: MetricsSource,
    pub smoothing: f64,
    pub poll_interval: Duration,
    pub cache_ttl: Duration,
    pub synthesize_gaps: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            source: MetricsSource::Stream,
            smoothing: 0.5,
            poll_interval: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(4),
            synthesize_gaps: true,
        }
    }
}

type PollResult = (TargetDescriptor, Result<MetricsFrame>);

#[derive(Debug)]
pub enum TelemetryEvent {
    Channel(ChannelEvent),
    PollDue,
    Polled(TargetDescriptor, Result<MetricsFrame>),
}

pub struct TelemetrySampler {
    endpoints: Endpoints,
    connector: Arc<dyn Connector>,
    poller: Option<Arc<dyn MetricsPoller>>,
    options: TelemetryOptions,
    target: Option<TargetDescriptor>,
    channel: Option<TransportChannel>,
    sink: Option<mpsc::UnboundedSender<ResourceSample>>,
    last: Option<ResourceSample>,
    display: Option<ResourceSample>,
    cache: SampleCache,
    next_poll: Option<Instant>,
    poll_in_flight: bool,
    poll_tx: mpsc::UnboundedSender<PollResult>,
    poll_rx: mpsc::UnboundedReceiver<PollResult>,
}

impl TelemetrySampler {
    pub fn new(
        endpoints: Endpoints,
        connector: Arc<dyn Connector>,
        poller: Option<Arc<dyn MetricsPoller>>,
        options: TelemetryOptions,
    ) -> Self {
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();
        Self {
            endpoints,
            connector,
            poller,
            cache: SampleCache::new(options.cache_ttl),
            options: TelemetryOptions {
                smoothing: options.smoothing.clamp(0.0, 1.0),
                ..options
            },
            target: None,
            channel: None,
            sink: None,
            last: None,
            display: None,
            next_poll: None,
            poll_in_flight: false,
            poll_tx,
            poll_rx,
        }
    }

    pub fn subscribe(
        &mut self,
        target: TargetDescriptor,
    ) -> Result<mpsc::UnboundedReceiver<ResourceSample>> {
        self.unsubscribe();
        if let Some(previous) = self.target.take()
            && previous != target
        {
            self.cache.invalidate(&previous);
            self.last = None;
            self.display = None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.sink = Some(tx);
        self.target = Some(target.clone());

        if self.options.source == MetricsSource::Poll {
            self.arm_poll_now();
            info!(pod = %target, "telemetry polling started");
            return Ok(rx);
        }

        let mut channel = TransportChannel::new(target.clone(), Arc::clone(&self.connector));
        match channel.open(self.endpoints.metrics(&target).as_str()) {
            Ok(()) => {
                self.channel = Some(channel);
                info!(pod = %target, "telemetry stream subscribed");
            }
            Err(error) if self.poller.is_some() => {
                warn!(pod = %target, "telemetry stream unavailable, polling instead: {error}");
                self.arm_poll_now();
            }
            Err(error) => {
                self.sink = None;
                return Err(error).context("failed to open telemetry stream");
            }
        }
        Ok(rx)
    }

    pub fn unsubscribe(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.sink = None;
        self.next_poll = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink.is_some()
    }

    pub fn is_polling(&self) -> bool {
        self.next_poll.is_some() || self.poll_in_flight
    }

    pub fn stream_state(&self) -> ConnectionState {
        self.channel
            .as_ref()
            .map(TransportChannel::state)
            .unwrap_or_default()
    }

    pub async fn next_event(&mut self) -> TelemetryEvent {
        let poll_at = self.next_poll;
        tokio::select! {
            event = next_channel_event(self.channel.as_mut()) => TelemetryEvent::Channel(event),
            Some((target, result)) = self.poll_rx.recv() => TelemetryEvent::Polled(target, result),
            _ = sleep_until(poll_at) => TelemetryEvent::PollDue,
        }
    }

    pub fn try_next_event(&mut self) -> Option<TelemetryEvent> {
        if let Some(event) = self
            .channel
            .as_mut()
            .and_then(TransportChannel::try_next_event)
        {
            return Some(TelemetryEvent::Channel(event));
        }
        match self.poll_rx.try_recv() {
            Ok((target, result)) => return Some(TelemetryEvent::Polled(target, result)),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
        }
        if self.next_poll.is_some_and(|at| at <= Instant::now()) {
            return Some(TelemetryEvent::PollDue);
        }
        None
    }

    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.try_next_event() {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    pub fn handle(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Channel(ChannelEvent::Message(bytes)) => {
                self.ingest(&bytes, SampleOrigin::Stream);
            }
            TelemetryEvent::Channel(ChannelEvent::StateChanged(state)) => {
                debug!(state = state.label(), "telemetry stream state");
                if matches!(state, ConnectionState::Disconnected | ConnectionState::Error) {
                    self.fall_back_to_poll();
                }
            }
            TelemetryEvent::Channel(ChannelEvent::Error(info)) => {
                warn!("telemetry stream failed: {info}");
                self.fall_back_to_poll();
            }
            TelemetryEvent::PollDue => self.poll_due(),
            TelemetryEvent::Polled(target, result) => {
                self.poll_in_flight = false;
                if self.target.as_ref() != Some(&target) || self.sink.is_none() {
                    debug!(pod = %target, "discarding poll result for stale target");
                    return;
                }
                match result {
                    Ok(frame) => {
                        self.ingest_frame(&frame, SampleOrigin::Poll);
                        self.cache.insert(target, frame);
                    }
                    Err(error) => warn!(pod = %target, "metrics poll failed: {error:#}"),
                }
            }
        }
    }

    fn fall_back_to_poll(&mut self) {
        if self.poller.is_none() || self.sink.is_none() || self.next_poll.is_some() {
            return;
        }
        info!("telemetry falling back to metrics polling");
        self.arm_poll_now();
    }

    fn arm_poll_now(&mut self) {
        if self.poller.is_some() {
            self.next_poll = Some(Instant::now());
        }
    }

    fn poll_due(&mut self) {
        let (Some(poller), Some(target)) = (self.poller.clone(), self.target.clone()) else {
            self.next_poll = None;
            return;
        };
        self.next_poll = Some(Instant::now() + self.options.poll_interval);

        if let Some(frame) = self.cache.get(&target).cloned() {
            debug!(pod = %target, "metrics served from cache");
            self.ingest_frame(&frame, SampleOrigin::Poll);
            return;
        }
        if self.poll_in_flight {
            return;
        }

        self.poll_in_flight = true;
        let tx = self.poll_tx.clone();
        tokio::spawn(async move {
            let result = poller.poll(&target).await;
            let _ = tx.send((target, result));
        });
    }

    pub fn ingest(&mut self, bytes: &[u8], origin: SampleOrigin) -> Option<ResourceSample> {
        match serde_json::from_slice::<MetricsFrame>(bytes) {
            Ok(frame) => self.ingest_frame(&frame, origin),
            Err(error) => {
                debug!(bytes = bytes.len(), "ignoring undecodable metrics frame: {error}");
                None
            }
        }
    }

    pub fn ingest_frame(&mut self, frame: &MetricsFrame, origin: SampleOrigin) -> Option<ResourceSample> {
        let target = self.target.as_ref()?;
        if !frame.carries_metrics() {
            trace!("ignoring metrics frame without usage fields");
            return None;
        }
        let sample = match frame.select(target) {
            Some(usage) => usage.to_sample(origin),
            None if self.options.synthesize_gaps => {
                let previous = self.last.as_ref()?;
                ResourceSample {
                    sampled_at: Local::now(),
                    origin: SampleOrigin::Simulated,
                    ..previous.clone()
                }
            }
            None => return None,
        };

        if !sample.is_simulated() {
            self.last = Some(sample.clone());
        }
        self.display = Some(self.smooth(&sample));
        if let Some(sink) = self.sink.as_ref()
            && sink.send(sample.clone()).is_err()
        {
            debug!("telemetry receiver dropped");
        }
        Some(sample)
    }

    fn smooth(&self, sample: &ResourceSample) -> ResourceSample {
        let Some(previous) = self.display.as_ref() else {
            return sample.clone();
        };
        let alpha = self.options.smoothing;
        let blend = |next: f64, prev: f64| clamp_percent(alpha * next + (1.0 - alpha) * prev);
        ResourceSample {
            cpu_percent: blend(sample.cpu_percent, previous.cpu_percent),
            memory_percent: blend(sample.memory_percent, previous.memory_percent),
            storage_percent: blend(sample.storage_percent, previous.storage_percent),
            ..sample.clone()
        }
    }

    pub fn display_sample(&self) -> Option<&ResourceSample> {
        self.display.as_ref()
    }

    pub fn last_sample(&self) -> Option<&ResourceSample> {
        self.last.as_ref()
    }

    pub fn target(&self) -> Option<&TargetDescriptor> {
        self.target.as_ref()
    }

    pub fn has_poller(&self) -> bool {
        self.poller.is_some()
    }
}

impl Drop for TelemetrySampler {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
