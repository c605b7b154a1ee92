use crate::channel::{ChannelError, ChannelEvent, CloseInfo, Connector, TransportChannel};
use crate::endpoint::Endpoints;
use crate::model::{ConnectionState, TargetDescriptor};
use crate::surface::{FitOutcome, SurfaceOptions, TerminalSurface};
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub fit_retry_delay: Duration,
    pub fit_retry_limit: u32,
    pub uptime_tick: Duration,
    pub surface: SurfaceOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            fit_retry_delay: Duration::from_millis(100),
            fit_retry_limit: 10,
            uptime_tick: Duration::from_secs(1),
            surface: SurfaceOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Channel(ChannelEvent),
    Input(Vec<u8>),
    InputClosed,
    FitRetry,
    UptimeTick,
}

#[derive(Debug, Clone, Copy)]
struct PendingFit {
    deadline: Instant,
    attempts: u32,
}

pub struct SessionController {
    target: TargetDescriptor,
    endpoints: Endpoints,
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    channel: Option<TransportChannel>,
    surface: TerminalSurface,
    input: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    state: ConnectionState,
    started_at: Option<DateTime<Local>>,
    connected_at: Option<Instant>,
    last_activity_at: Option<DateTime<Local>>,
    command_count: u64,
    close_info: Option<CloseInfo>,
    last_error: Option<ChannelError>,
    host_area: Option<(u16, u16)>,
    pending_fit: Option<PendingFit>,
    fit_retries: u32,
    next_tick: Option<Instant>,
    torn_down: bool,
}

impl SessionController {
    pub fn new(
        target: TargetDescriptor,
        endpoints: Endpoints,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
    ) -> Self {
        Self {
            target,
            endpoints,
            connector,
            surface: TerminalSurface::new(options.surface),
            options,
            channel: None,
            input: None,
            state: ConnectionState::Idle,
            started_at: None,
            connected_at: None,
            last_activity_at: None,
            command_count: 0,
            close_info: None,
            last_error: None,
            host_area: None,
            pending_fit: None,
            fit_retries: 0,
            next_tick: None,
            torn_down: false,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        if self.torn_down {
            bail!("terminal session for {} was already torn down", self.target);
        }
        if let Some(mut previous) = self.channel.take() {
            previous.close();
        }

        let url = self.endpoints.terminal(&self.target);
        let mut channel = TransportChannel::new(self.target.clone(), Arc::clone(&self.connector));
        self.close_info = None;
        self.last_error = None;
        self.next_tick = None;
        if let Err(error) = channel.open(url.as_str()) {
            self.state = ConnectionState::Error;
            self.last_error = Some(error.clone());
            return Err(error)
                .with_context(|| format!("failed to open terminal channel for {}", self.target));
        }

        self.state = ConnectionState::Connecting;
        self.channel = Some(channel);
        self.input = Some(self.surface.attach_input());
        self.fit_now();
        info!(pod = %self.target, host = self.endpoints.host(), "terminal session connecting");
        Ok(())
    }

    pub fn reconnect(&mut self) -> Result<()> {
        if self.torn_down {
            bail!("terminal session for {} was already torn down", self.target);
        }
        self.surface
            .write(b"\r\n\x1b[2m-- reconnecting --\x1b[0m\r\n");
        self.connect()
    }

    pub fn send_input(&mut self, data: &[u8]) -> std::result::Result<(), ChannelError> {
        if self.state != ConnectionState::Connected {
            return Err(ChannelError::NotReady);
        }
        let Some(channel) = self.channel.as_mut() else {
            return Err(ChannelError::NotReady);
        };

        if let Err(error) = channel.send(data) {
            if matches!(error, ChannelError::TransportFailure(_)) {
                self.mark_failed(error.clone());
            }
            return Err(error);
        }
        if data == b"\r" {
            self.command_count += 1;
        }
        self.last_activity_at = Some(Local::now());
        Ok(())
    }

    /// Feeds a keystroke through the surface's input edge.
    pub fn keystroke(&mut self, bytes: &[u8]) -> bool {
        self.surface.input(bytes)
    }

    pub fn paste(&mut self, text: &str) -> bool {
        self.surface.paste(text)
    }

    pub fn resize(&mut self, width: u16, height: u16) -> FitOutcome {
        self.host_area = Some((width, height));
        self.fit_now()
    }

    pub fn observe_host_area(&mut self, width: u16, height: u16) {
        self.host_area = Some((width, height));
    }

    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.surface.detach_input();
        self.input = None;
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.surface.dispose();
        self.pending_fit = None;
        self.next_tick = None;
        if self.state.is_live() {
            self.state = ConnectionState::Disconnected;
        }
        debug!(pod = %self.target, "terminal session torn down");
    }

    pub async fn next_event(&mut self) -> SessionEvent {
        let fit_deadline = self.pending_fit.map(|pending| pending.deadline);
        let tick = self.next_tick;
        tokio::select! {
            event = next_channel_event(self.channel.as_mut()) => SessionEvent::Channel(event),
            input = next_input(self.input.as_mut()) => match input {
                Some(bytes) => SessionEvent::Input(bytes),
                None => SessionEvent::InputClosed,
            },
            _ = sleep_until(fit_deadline) => SessionEvent::FitRetry,
            _ = sleep_until(tick) => SessionEvent::UptimeTick,
        }
    }

    pub fn try_next_event(&mut self) -> Option<SessionEvent> {
        if let Some(event) = self
            .channel
            .as_mut()
            .and_then(TransportChannel::try_next_event)
        {
            return Some(SessionEvent::Channel(event));
        }
        if let Some(input) = self.input.as_mut() {
            match input.try_recv() {
                Ok(bytes) => return Some(SessionEvent::Input(bytes)),
                Err(TryRecvError::Disconnected) => return Some(SessionEvent::InputClosed),
                Err(TryRecvError::Empty) => {}
            }
        }

        let now = Instant::now();
        if self.pending_fit.is_some_and(|pending| pending.deadline <= now) {
            return Some(SessionEvent::FitRetry);
        }
        if self.next_tick.is_some_and(|tick| tick <= now) {
            return Some(SessionEvent::UptimeTick);
        }
        None
    }

    /// Applies everything that is ready right now. Returns how many events ran.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.try_next_event() {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Channel(event) => self.on_channel_event(event),
            SessionEvent::Input(bytes) => {
                if let Err(error) = self.send_input(&bytes) {
                    debug!(bytes = bytes.len(), "keystroke dropped: {error}");
                }
            }
            SessionEvent::InputClosed => self.input = None,
            SessionEvent::FitRetry => self.retry_fit(),
            SessionEvent::UptimeTick => {
                self.next_tick = (self.state == ConnectionState::Connected)
                    .then(|| Instant::now() + self.options.uptime_tick);
            }
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::StateChanged(ConnectionState::Connected) => {
                self.state = ConnectionState::Connected;
                let banner = format!(
                    "\x1b[1;32mConnected\x1b[0m to {}\r\n\x1b[2mShell session ready\x1b[0m\r\n",
                    self.target
                );
                self.surface.write(banner.as_bytes());
                let now = Local::now();
                self.started_at = Some(now);
                self.last_activity_at = Some(now);
                self.connected_at = Some(Instant::now());
                self.next_tick = Some(Instant::now() + self.options.uptime_tick);
                info!(pod = %self.target, "terminal session connected");
            }
            ChannelEvent::StateChanged(ConnectionState::Disconnected) => {
                self.state = ConnectionState::Disconnected;
                self.next_tick = None;
                self.close_info = self
                    .channel
                    .as_ref()
                    .and_then(TransportChannel::close_info)
                    .cloned();
                let detail = match &self.close_info {
                    Some(CloseInfo {
                        code: Some(code),
                        reason,
                    }) if !reason.is_empty() => format!(" (code {code}: {reason})"),
                    Some(CloseInfo {
                        code: Some(code), ..
                    }) => format!(" (code {code})"),
                    _ => String::new(),
                };
                let line = format!("\r\n\x1b[33mDisconnected\x1b[0m{detail}\r\n");
                self.surface.write(line.as_bytes());
                info!(pod = %self.target, "terminal session disconnected{detail}");
            }
            ChannelEvent::StateChanged(state) => self.state = state,
            ChannelEvent::Message(bytes) => {
                self.surface.write(&bytes);
                self.last_activity_at = Some(Local::now());
            }
            ChannelEvent::Error(info) => {
                let error = self
                    .channel
                    .as_ref()
                    .and_then(TransportChannel::last_error)
                    .cloned()
                    .unwrap_or(ChannelError::TransportFailure(info));
                self.mark_failed(error);
            }
        }
    }

    fn mark_failed(&mut self, error: ChannelError) {
        if self.state == ConnectionState::Error {
            return;
        }
        self.state = ConnectionState::Error;
        self.next_tick = None;
        let line = format!("\r\n\x1b[31mConnection error\x1b[0m: {error}\r\n");
        self.surface.write(line.as_bytes());
        warn!(pod = %self.target, "terminal session failed: {error}");
        self.last_error = Some(error);
    }

    fn fit_now(&mut self) -> FitOutcome {
        let (width, height) = self.host_area.unwrap_or((0, 0));
        let outcome = self.surface.fit(width, height);
        if outcome != FitOutcome::Deferred {
            self.pending_fit = None;
        } else if self.pending_fit.is_none() && !self.surface.is_disposed() {
            self.pending_fit = Some(PendingFit {
                deadline: Instant::now() + self.options.fit_retry_delay,
                attempts: 0,
            });
        }
        outcome
    }

    fn retry_fit(&mut self) {
        let Some(mut pending) = self.pending_fit.take() else {
            return;
        };
        pending.attempts += 1;
        self.fit_retries += 1;

        let (width, height) = self.host_area.unwrap_or((0, 0));
        match self.surface.fit(width, height) {
            FitOutcome::Deferred if pending.attempts < self.options.fit_retry_limit => {
                pending.deadline = Instant::now() + self.options.fit_retry_delay;
                self.pending_fit = Some(pending);
            }
            FitOutcome::Deferred => {
                warn!(
                    attempts = pending.attempts,
                    "terminal fit gave up, host area never had room"
                );
            }
            outcome => debug!(attempts = pending.attempts, ?outcome, "terminal fit retried"),
        }
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn surface(&self) -> &TerminalSurface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut TerminalSurface {
        &mut self.surface
    }

    pub fn command_count(&self) -> u64 {
        self.command_count
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    pub fn last_activity_at(&self) -> Option<DateTime<Local>> {
        self.last_activity_at
    }

    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.close_info.as_ref()
    }

    pub fn last_error(&self) -> Option<&ChannelError> {
        self.last_error.as_ref()
    }

    pub fn uptime(&self) -> Option<Duration> {
        if self.state != ConnectionState::Connected {
            return None;
        }
        self.connected_at.map(|at| at.elapsed())
    }

    pub fn format_uptime(&self) -> String {
        let Some(uptime) = self.uptime() else {
            return "--:--:--".to_string();
        };
        let seconds = uptime.as_secs();
        format!(
            "{:02}:{:02}:{:02}",
            seconds / 3600,
            (seconds % 3600) / 60,
            seconds % 60
        )
    }

    pub fn fit_pending(&self) -> bool {
        self.pending_fit.is_some()
    }

    pub fn fit_retries(&self) -> u32 {
        self.fit_retries
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub(crate) async fn next_channel_event(channel: Option<&mut TransportChannel>) -> ChannelEvent {
    match channel {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn next_input(input: Option<&mut mpsc::UnboundedReceiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match input {
        Some(input) => input.recv().await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
