mod app;
mod channel;
mod cli;
mod config;
mod endpoint;
mod input;
mod k8s;
mod logs;
mod model;
mod session;
mod surface;
mod telemetry;
mod ui;
mod ws;

use anyhow::{Context, Result};
use app::{App, AppCommand, InputMode};
use channel::Connector;
use clap::Parser;
use cli::CliArgs;
use config::PodlinkConfig;
use crossterm::event::{
    DisableBracketedPaste, EnableBracketedPaste, Event, EventStream, KeyEventKind,
    KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use endpoint::Endpoints;
use futures::StreamExt;
use input::Action;
use k8s::KubeMetricsPoller;
use logs::LogStreamProcessor;
use model::{ConnectionState, ResourceSample, TargetDescriptor};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use session::SessionController;
use std::fs::OpenOptions;
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use surface::CellPos;
use telemetry::{MetricsPoller, TelemetrySampler};
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use ws::WsConnector;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;
const REDRAW_INTERVAL: Duration = Duration::from_millis(250);

struct Components {
    session: SessionController,
    logs: LogStreamProcessor,
    telemetry: TelemetrySampler,
    samples: Option<mpsc::UnboundedReceiver<ResourceSample>>,
    export_dir: PathBuf,
    shell_area: Rect,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref())?;

    let loaded = config::load(args.config.as_deref())?;
    let mut settings = loaded.config;
    settings.apply_cli(&args);

    let target = TargetDescriptor::parse(&args.target).with_context(|| {
        format!(
            "invalid target '{}' (expected namespace/pod:container)",
            args.target
        )
    })?;
    let token = settings.token.clone().unwrap_or_default();
    if token.is_empty() {
        warn!("no tunnel token configured");
    }
    let endpoints = Endpoints::new(&settings.base_url, token)?;
    let connector: Arc<dyn Connector> = Arc::new(WsConnector);
    let poller = build_poller(&settings).await;

    let mut parts = Components {
        session: SessionController::new(
            target.clone(),
            endpoints.clone(),
            Arc::clone(&connector),
            settings.session_options(),
        ),
        logs: LogStreamProcessor::new(
            endpoints.clone(),
            Arc::clone(&connector),
            settings.log_options(),
        ),
        telemetry: TelemetrySampler::new(
            endpoints.clone(),
            connector,
            poller,
            settings.telemetry_options(),
        ),
        samples: None,
        export_dir: settings.export_dir.clone(),
        shell_area: Rect::default(),
    };

    let mut app = App::new(target, endpoints.host());
    app.set_config_source(
        loaded
            .source
            .as_deref()
            .map(|path| path.display().to_string()),
    );
    info!(pod = %app.target(), host = endpoints.host(), "podlink starting");

    run(&mut app, &mut parts).await
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();
    let _ = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::sink).try_init(),
    };

    Ok(())
}

async fn build_poller(settings: &PodlinkConfig) -> Option<Arc<dyn MetricsPoller>> {
    if !settings.wants_poller() {
        return None;
    }
    match KubeMetricsPoller::new(settings.telemetry.kube_context.clone()).await {
        Ok(poller) => Some(Arc::new(poller)),
        Err(error) => {
            warn!("metrics polling unavailable: {error:#}");
            None
        }
    }
}

async fn run(app: &mut App, parts: &mut Components) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, parts).await;
    shutdown(parts);
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            EnableBracketedPaste,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_ALTERNATE_KEYS
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen, EnableBracketedPaste)
            .context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(
        terminal.backend_mut(),
        DisableBracketedPaste,
        LeaveAlternateScreen
    )
    .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

async fn run_loop(terminal: &mut TuiTerminal, app: &mut App, parts: &mut Components) -> Result<()> {
    start_components(app, parts);

    let mut reader = EventStream::new();
    let mut ticker = interval(REDRAW_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        draw(terminal, app, parts)?;

        if !app.running() {
            break;
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(app.mode(), key) {
                            if !matches!(action, Action::TerminalBytes(_)) {
                                debug!("action={action:?}");
                            }
                            let command = app.apply_action(action);
                            execute_app_command(app, parts, command);
                        }
                    }
                    Some(Ok(Event::Paste(text))) => match app.mode() {
                        InputMode::Terminal => {
                            if !parts.session.paste(&text) {
                                app.set_status("Shell input is not attached (r to reconnect)");
                            }
                        }
                        InputMode::Search => app.push_search_text(&text),
                        InputMode::Normal => {}
                    },
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        break;
                    }
                }
            }
            event = parts.session.next_event() => {
                let before = parts.session.state();
                parts.session.handle(event);
                report_session_state(app, &parts.session, before);
            }
            event = parts.logs.next_event() => {
                let before = parts.logs.connection_state();
                parts.logs.handle(event);
                let after = parts.logs.connection_state();
                if before != after && after == ConnectionState::Error {
                    app.set_status("Log stream failed (R to restart)");
                }
            }
            event = parts.telemetry.next_event() => {
                parts.telemetry.handle(event);
            }
            sample = next_sample(parts.samples.as_mut()) => match sample {
                Some(sample) => app.record_sample(&sample),
                None => parts.samples = None,
            },
            _ = ticker.tick() => {}
        }
    }

    Ok(())
}

fn draw(terminal: &mut TuiTerminal, app: &mut App, parts: &mut Components) -> Result<()> {
    let mut shell_area = parts.shell_area;
    terminal
        .draw(|frame| {
            let view = ui::View {
                session: &parts.session,
                logs: &parts.logs,
                telemetry: &parts.telemetry,
            };
            shell_area = ui::render(frame, app, &view);
        })
        .context("failed to render terminal frame")?;

    if shell_area != parts.shell_area {
        parts.shell_area = shell_area;
        let outcome = parts.session.resize(shell_area.width, shell_area.height);
        debug!(
            width = shell_area.width,
            height = shell_area.height,
            ?outcome,
            "shell pane resized"
        );
    }
    Ok(())
}

async fn next_sample(
    samples: Option<&mut mpsc::UnboundedReceiver<ResourceSample>>,
) -> Option<ResourceSample> {
    match samples {
        Some(samples) => samples.recv().await,
        None => std::future::pending().await,
    }
}

fn start_components(app: &mut App, parts: &mut Components) {
    let target = app.target().clone();
    if let Err(error) = parts.session.connect() {
        app.set_status(compact_error(&error));
    } else {
        app.set_status(format!("Connecting to {target}"));
    }
    if let Err(error) = parts.logs.start(target.clone()) {
        warn!(pod = %target, "log stream did not start: {error:#}");
    }
    match parts.telemetry.subscribe(target) {
        Ok(samples) => parts.samples = Some(samples),
        Err(error) => warn!("telemetry unavailable: {error:#}"),
    }
}

fn shutdown(parts: &mut Components) {
    parts.session.teardown();
    parts.logs.stop();
    parts.telemetry.unsubscribe();
    parts.samples = None;
}

fn report_session_state(app: &mut App, session: &SessionController, before: ConnectionState) {
    let state = session.state();
    if state == before {
        return;
    }
    match state {
        ConnectionState::Connected => {
            app.set_status(format!("Connected to {}", session.target()));
        }
        ConnectionState::Disconnected => {
            let detail = session
                .close_info()
                .and_then(|info| info.code.map(|code| format!(" (code {code})")))
                .unwrap_or_default();
            app.set_status(format!("Shell disconnected{detail}, r to reconnect"));
        }
        ConnectionState::Error => {
            let detail = session
                .last_error()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown failure".to_string());
            app.set_status(format!("Shell connection error: {detail}"));
        }
        ConnectionState::Idle | ConnectionState::Connecting => {}
    }
}

fn execute_app_command(app: &mut App, parts: &mut Components, command: AppCommand) {
    match command {
        AppCommand::None => {}
        AppCommand::SendToTerminal(bytes) => {
            if parts.session.state() != ConnectionState::Connected {
                app.set_status("Shell not connected, input dropped (r to reconnect)");
            } else if !parts.session.keystroke(&bytes) {
                app.set_status("Shell input is not attached (r to reconnect)");
            }
        }
        AppCommand::ScrollTerminal(lines) => {
            let surface = parts.session.surface_mut();
            if lines >= 0 {
                surface.scroll_up(lines.unsigned_abs());
            } else {
                surface.scroll_down(lines.unsigned_abs());
            }
        }
        AppCommand::TerminalBottom => parts.session.surface_mut().scroll_to_bottom(),
        AppCommand::YankTerminalLine => {
            let surface = parts.session.surface_mut();
            let Some((row, cols)) = surface.screen().map(|screen| {
                let (row, _) = screen.cursor_position();
                let (_, cols) = screen.size();
                (row, cols)
            }) else {
                app.set_status("Shell surface is closed");
                return;
            };
            surface.select(
                CellPos::new(row, 0),
                CellPos::new(row, cols.saturating_sub(1)),
            );
            let text = surface.get_selection();
            app.set_status(format!("Selected: {}", text.trim_end()));
        }
        AppCommand::Reconnect => match parts.session.reconnect() {
            Ok(()) => app.set_status(format!("Reconnecting to {}", app.target())),
            Err(error) => app.set_status(compact_error(&error)),
        },
        AppCommand::RestartLogs => match parts.logs.start(app.target().clone()) {
            Ok(()) => app.set_status("Log stream restarted"),
            Err(error) => app.set_status(compact_error(&error)),
        },
        AppCommand::TogglePause => {
            let dropped = parts.logs.dropped_while_paused();
            if parts.logs.toggle_paused() {
                app.set_status("Log stream paused");
            } else {
                app.set_status(format!(
                    "Log stream resumed ({dropped} lines dropped while paused)"
                ));
            }
        }
        AppCommand::ClearLogs => {
            parts.logs.clear();
            app.set_status("Log buffer cleared");
        }
        AppCommand::ExportLogs => {
            match parts.logs.export_to_file(&parts.export_dir, app.filter()) {
                Ok(path) => app.set_status(format!("Exported logs to {}", path.display())),
                Err(error) => app.set_status(compact_error(&error)),
            }
        }
    }
}

fn compact_error(error: &anyhow::Error) -> String {
    error
        .chain()
        .take(3)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}
