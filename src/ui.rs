use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use crate::app::{App, FocusPane, InputMode};
use crate::logs::LogStreamProcessor;
use crate::model::{ConnectionState, LogEntry, LogLevel, ResourceSample, SampleOrigin};
use crate::session::SessionController;
use crate::surface::CellPos;
use crate::telemetry::TelemetrySampler;

const BG: Color = Color::Rgb(9, 15, 25);
const PANEL: Color = Color::Rgb(16, 27, 44);
const ACCENT: Color = Color::Rgb(52, 211, 153);
const MUTED: Color = Color::Rgb(140, 156, 178);
const WARN: Color = Color::Rgb(251, 191, 36);
const ERROR: Color = Color::Rgb(248, 113, 113);
const PL_A: Color = Color::Rgb(17, 94, 89);
const PL_B: Color = Color::Rgb(30, 64, 175);
const PL_C: Color = Color::Rgb(55, 48, 163);
const PL_D: Color = Color::Rgb(82, 24, 124);
const PL_E: Color = Color::Rgb(13, 148, 136);

pub struct View<'a> {
    pub session: &'a SessionController,
    pub logs: &'a LogStreamProcessor,
    pub telemetry: &'a TelemetrySampler,
}

/// Draws one frame and returns the inner area of the shell pane.
pub fn render(frame: &mut Frame, app: &mut App, view: &View<'_>) -> Rect {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(6),
            Constraint::Length(1),
        ])
        .split(frame.area());

    render_header(frame, root[0], app, view);
    let terminal_area = render_body(frame, root[1], app, view);
    render_footer(frame, root[2], app, view);

    if app.show_help() {
        render_help_modal(frame, app);
    }
    terminal_area
}

fn render_header(frame: &mut Frame, area: Rect, app: &App, view: &View<'_>) {
    let mut left = Vec::new();
    push_powerline_segment(&mut left, " 󰆍 podlink ", Color::White, PL_A, PL_C);
    push_powerline_segment(
        &mut left,
        format!(" {} ", app.target()),
        Color::White,
        PL_C,
        BG,
    );
    left.push(Span::styled(
        format!(" {}", app.host()),
        Style::default().fg(MUTED),
    ));
    let left_line = Line::from(left);

    let right_line = build_right_header_line(view);
    let right_width = spans_width(&right_line.spans) as u16;
    if area.width < 42 || right_width == 0 || right_width >= area.width {
        frame.render_widget(
            Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(left_line).style(Style::default().bg(BG).fg(Color::White)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(right_line).style(Style::default().bg(BG)),
        chunks[1],
    );
}

fn build_right_header_line(view: &View<'_>) -> Line<'static> {
    let metrics_state = if view.telemetry.is_polling() {
        "polling".to_string()
    } else {
        view.telemetry.stream_state().label().to_string()
    };
    let segments = [
        ("shell", view.session.state().label().to_string(), view.session.state()),
        ("logs", view.logs.connection_state().label().to_string(), view.logs.connection_state()),
        ("metrics", metrics_state, view.telemetry.stream_state()),
    ];

    let mut spans = Vec::new();
    let mut next_bg = BG;
    for (name, label, state) in segments {
        let bg = state_color(state);
        let fg = if matches!(state, ConnectionState::Connected) {
            Color::Black
        } else {
            Color::White
        };
        push_powerline_segment_rtl(&mut spans, format!(" {name}:{label} "), fg, bg, next_bg);
        next_bg = bg;
    }
    spans.push(Span::styled(" ", Style::default().bg(next_bg)));
    Line::from(spans)
}

fn state_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Connected => ACCENT,
        ConnectionState::Connecting => PL_B,
        ConnectionState::Idle => Color::Rgb(30, 41, 59),
        ConnectionState::Disconnected => PL_D,
        ConnectionState::Error => ERROR,
    }
}

fn render_body(frame: &mut Frame, area: Rect, app: &mut App, view: &View<'_>) -> Rect {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(area);
    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(4)])
        .split(columns[1]);

    let terminal_area = render_terminal(frame, columns[0], app, view.session);
    render_telemetry(frame, side[0], app.samples_seen(), view.telemetry);
    render_logs(frame, side[1], app, view.logs);
    terminal_area
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(if focused {
            Style::default().fg(ACCENT)
        } else {
            Style::default().fg(MUTED)
        })
        .style(Style::default().bg(PANEL))
}

fn render_terminal(frame: &mut Frame, area: Rect, app: &App, session: &SessionController) -> Rect {
    let surface = session.surface();
    let mut title = format!(" Shell {} ", session.format_uptime());
    if surface.scrollback_offset() > 0 {
        title.push_str(&format!("[scrollback -{}] ", surface.scrollback_offset()));
    }
    let focused = app.focus() == FocusPane::Terminal;
    let block = pane_block(title, focused || app.mode() == InputMode::Terminal);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(screen) = surface.screen() else {
        frame.render_widget(
            Paragraph::new("session closed").style(Style::default().fg(MUTED)),
            inner,
        );
        return inner;
    };

    let selection = surface.selection();
    let (rows, cols) = screen.size();
    let mut lines = Vec::with_capacity(rows.min(inner.height) as usize);
    for row in 0..rows.min(inner.height) {
        let mut spans: Vec<Span<'static>> = Vec::new();
        let mut run = String::new();
        let mut run_style = Style::default();
        for col in 0..cols.min(inner.width) {
            let Some(cell) = screen.cell(row, col) else {
                continue;
            };
            if cell.is_wide_continuation() {
                continue;
            }
            let mut style = cell_style(cell);
            if let Some((start, end)) = selection {
                let pos = CellPos::new(row, col);
                if pos >= start && pos <= end {
                    style = style.add_modifier(Modifier::REVERSED);
                }
            }
            if style != run_style && !run.is_empty() {
                spans.push(Span::styled(std::mem::take(&mut run), run_style));
            }
            run_style = style;
            if cell.has_contents() {
                run.push_str(&cell.contents());
            } else {
                run.push(' ');
            }
        }
        if !run.is_empty() {
            spans.push(Span::styled(run, run_style));
        }
        lines.push(Line::from(spans));
    }
    frame.render_widget(Paragraph::new(lines), inner);

    if app.mode() == InputMode::Terminal
        && surface.scrollback_offset() == 0
        && !screen.hide_cursor()
    {
        let (row, col) = screen.cursor_position();
        if row < inner.height && col < inner.width {
            frame.set_cursor_position((inner.x + col, inner.y + row));
        }
    }
    inner
}

fn cell_style(cell: &vt100::Cell) -> Style {
    let mut style = Style::default();
    if let Some(fg) = vt_color(cell.fgcolor()) {
        style = style.fg(fg);
    }
    if let Some(bg) = vt_color(cell.bgcolor()) {
        style = style.bg(bg);
    }
    if cell.bold() {
        style = style.add_modifier(Modifier::BOLD);
    }
    if cell.italic() {
        style = style.add_modifier(Modifier::ITALIC);
    }
    if cell.underline() {
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    if cell.inverse() {
        style = style.add_modifier(Modifier::REVERSED);
    }
    style
}

fn vt_color(color: vt100::Color) -> Option<Color> {
    match color {
        vt100::Color::Default => None,
        vt100::Color::Idx(index) => Some(Color::Indexed(index)),
        vt100::Color::Rgb(r, g, b) => Some(Color::Rgb(r, g, b)),
    }
}

struct MetricBar {
    icon: &'static str,
    label: &'static str,
    percent: f64,
}

fn render_telemetry(
    frame: &mut Frame,
    area: Rect,
    samples_seen: u64,
    telemetry: &TelemetrySampler,
) {
    let title = if samples_seen == 0 {
        " Resources ".to_string()
    } else {
        format!(" Resources ({samples_seen}) ")
    };
    let block = pane_block(title, false);
    let inner = block.inner(area);
    frame.render_widget(block, area);
    if inner.width < 12 || inner.height < 2 {
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(inner);

    let Some(sample) = telemetry.display_sample() else {
        let waiting = if telemetry.is_subscribed() {
            "waiting for first sample"
        } else if telemetry.has_poller() {
            "metrics paused"
        } else {
            "metrics unavailable"
        };
        frame.render_widget(
            Paragraph::new(waiting).style(Style::default().fg(MUTED)),
            chunks[0],
        );
        return;
    };

    frame.render_widget(
        Paragraph::new(sample_header(sample)).style(Style::default().fg(Color::Rgb(147, 197, 253))),
        chunks[0],
    );
    let bars = [
        MetricBar {
            icon: "󰍛",
            label: "CPU",
            percent: sample.cpu_percent,
        },
        MetricBar {
            icon: "󰘚",
            label: "Memory",
            percent: sample.memory_percent,
        },
        MetricBar {
            icon: "󰋊",
            label: "Storage",
            percent: sample.storage_percent,
        },
    ];
    for (index, bar) in bars.iter().enumerate() {
        render_metric_gauge(frame, chunks[1 + index], bar, sample.is_simulated());
    }
}

fn sample_header(sample: &ResourceSample) -> String {
    let origin = match sample.origin {
        SampleOrigin::Stream => "live",
        SampleOrigin::Poll => "metrics api",
        SampleOrigin::Simulated => "simulated",
    };
    format!("{origin} @ {}", sample.sampled_at.format("%H:%M:%S"))
}

fn usage_color(percent: u64) -> Color {
    if percent >= 85 {
        ERROR
    } else if percent >= 65 {
        WARN
    } else {
        ACCENT
    }
}

fn render_metric_gauge(frame: &mut Frame, area: Rect, bar: &MetricBar, simulated: bool) {
    if area.height == 0 || area.width == 0 {
        return;
    }

    let split = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(42), Constraint::Percentage(58)])
        .split(area);
    let percent = bar.percent.round().clamp(0.0, 100.0) as u64;
    let marker = if simulated { "~" } else { "" };
    let label = format!("{} {}{marker}", bar.icon, bar.label);
    frame.render_widget(
        Paragraph::new(compact_text(
            &label,
            split[0].width.saturating_sub(1).max(1) as usize,
        ))
        .style(Style::default().fg(Color::Rgb(94, 234, 212))),
        split[0],
    );

    let bar_width = split[1].width as usize;
    if bar_width == 0 {
        return;
    }

    let mut filled = bar_width.saturating_mul(percent as usize) / 100;
    if percent > 0 && filled == 0 {
        filled = 1;
    }
    let meter_chars = format!("{percent:>3}%").chars().collect::<Vec<_>>();
    let text_start = bar_width.saturating_sub(meter_chars.len()) / 2;
    let text_end = text_start.saturating_add(meter_chars.len());
    let fill_color = if simulated { MUTED } else { usage_color(percent) };

    let mut spans = Vec::with_capacity(bar_width);
    for idx in 0..bar_width {
        let is_filled = idx < filled;
        let is_text_cell = idx >= text_start && idx < text_end;
        let ch = if is_text_cell {
            meter_chars[idx - text_start]
        } else {
            ' '
        };
        let (fg, bg) = if is_filled {
            (BG, fill_color)
        } else {
            (Color::Rgb(148, 163, 184), Color::Rgb(30, 41, 59))
        };
        let mut style = Style::default().fg(fg).bg(bg);
        if is_text_cell {
            style = style.add_modifier(Modifier::BOLD);
        }
        spans.push(Span::styled(ch.to_string(), style));
    }
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(PANEL)),
        split[1],
    );
}

fn render_logs(frame: &mut Frame, area: Rect, app: &mut App, logs: &LogStreamProcessor) {
    let filter = app.filter().clone();
    let visible = logs.query(&filter).collect::<Vec<_>>();
    let mut title = format!(" Logs {}/{} ", visible.len(), logs.len());
    if logs.evicted() > 0 {
        title.push_str(&format!("[{} evicted] ", logs.evicted()));
    }
    if logs.is_paused() {
        title.push_str(&format!("[paused, {} dropped] ", logs.dropped_while_paused()));
    }
    let block = pane_block(title, app.focus() == FocusPane::Logs);
    let inner = block.inner(area);
    frame.render_widget(block, area);
    if inner.height < 2 || inner.width < 8 {
        return;
    }

    let mut lines = vec![log_summary_line(app, logs)];
    let rows = inner.height.saturating_sub(1) as usize;
    let scroll = app.clamp_log_scroll(visible.len(), rows);
    let end = visible.len().saturating_sub(scroll);
    let start = end.saturating_sub(rows);
    let width = inner.width as usize;
    for entry in &visible[start..end] {
        lines.push(log_line(entry, width));
    }
    if visible.is_empty() {
        let hint = if logs.is_empty() {
            match logs.connection_state() {
                ConnectionState::Connected => "no log lines yet",
                ConnectionState::Connecting => "connecting to log stream",
                _ => "log stream offline (R to restart)",
            }
        } else {
            "no lines match the current filter"
        };
        lines.push(Line::from(Span::styled(hint, Style::default().fg(MUTED))));
    }

    frame.render_widget(Paragraph::new(lines), inner);
}

fn log_summary_line(app: &App, logs: &LogStreamProcessor) -> Line<'static> {
    let mut spans = Vec::new();
    for (level, count) in logs.level_counts() {
        spans.push(Span::styled(
            format!("{}:{count} ", level_tag(level)),
            Style::default().fg(level_color(level)),
        ));
    }
    spans.push(Span::styled(
        format!("[{}]", app.filter().level.label()),
        Style::default().fg(Color::Rgb(147, 197, 253)),
    ));
    let search = app.filter().search_text.trim();
    if !search.is_empty() {
        spans.push(Span::styled(
            format!(" /{search}"),
            Style::default().fg(WARN),
        ));
    }
    Line::from(spans)
}

fn log_line(entry: &LogEntry, width: usize) -> Line<'static> {
    let time = entry
        .timestamp
        .rsplit_once(' ')
        .map(|(_, time)| time)
        .unwrap_or(&entry.timestamp);
    let prefix = format!("{time} {} ", level_tag(entry.level));
    let remaining = width.saturating_sub(prefix.chars().count()).max(1);
    Line::from(vec![
        Span::styled(format!("{time} "), Style::default().fg(MUTED)),
        Span::styled(
            format!("{} ", level_tag(entry.level)),
            Style::default()
                .fg(level_color(entry.level))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            compact_text(&entry.message, remaining),
            Style::default().fg(Color::White),
        ),
    ])
}

fn level_tag(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "INF",
        LogLevel::Warning => "WRN",
        LogLevel::Error => "ERR",
        LogLevel::Success => "OK",
    }
}

fn level_color(level: LogLevel) -> Color {
    match level {
        LogLevel::Info => Color::Rgb(147, 197, 253),
        LogLevel::Warning => WARN,
        LogLevel::Error => ERROR,
        LogLevel::Success => ACCENT,
    }
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App, view: &View<'_>) {
    let mut spans = Vec::new();
    match app.mode() {
        InputMode::Search => {
            push_powerline_segment(&mut spans, " 󰈲 srch ", Color::Black, WARN, PL_B);
            push_powerline_segment(
                &mut spans,
                format!(" /{} ", app.search_input()),
                Color::White,
                PL_B,
                BG,
            );
            frame.render_widget(
                Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
                area,
            );
            return;
        }
        InputMode::Terminal => {
            push_powerline_segment(&mut spans, " 󰆍 term ", Color::Black, ACCENT, PL_B);
        }
        InputMode::Normal => {
            push_powerline_segment(&mut spans, " 󰘳 nrm ", Color::White, PL_A, PL_B);
        }
    }

    let status_text = app.status();
    let status_width_hint = area.width.saturating_sub(24).min(120) as usize;
    push_powerline_segment(
        &mut spans,
        format!(
            " {} {} ",
            footer_status_icon(status_text),
            compact_text(status_text, status_width_hint.max(24))
        ),
        Color::White,
        PL_B,
        BG,
    );

    let right_spans = build_footer_glance_spans(view);
    let min_left = 28u16;
    let max_right = area.width.saturating_sub(min_left);
    let right_width = (spans_width(&right_spans) as u16).min(max_right);
    if right_width == 0 {
        frame.render_widget(
            Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
            area,
        );
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(1), Constraint::Length(right_width)])
        .split(area);
    frame.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BG)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(Line::from(right_spans))
            .style(Style::default().bg(BG))
            .alignment(Alignment::Right),
        chunks[1],
    );
}

fn build_footer_glance_spans(view: &View<'_>) -> Vec<Span<'static>> {
    let session = view.session;
    let mut segments = vec![
        (format!(" 󰅐 {} ", session.format_uptime()), PL_E),
        (format!(" 󰞷 {} cmds ", session.command_count()), PL_C),
    ];
    if let Some(at) = session.last_activity_at() {
        segments.push((format!(" 󰥔 {} ", at.format("%H:%M:%S")), PL_D));
    }

    let mut spans = Vec::new();
    let mut next_bg = BG;
    for (content, bg) in segments {
        push_powerline_segment_rtl(&mut spans, content, Color::White, bg, next_bg);
        next_bg = bg;
    }
    spans
}

fn footer_status_icon(status_text: &str) -> &'static str {
    let status = status_text.to_ascii_lowercase();
    let has_failure = ["failed", "error", "refused", "unavailable", "not ready"]
        .iter()
        .any(|needle| status.contains(needle));
    if has_failure { "󰅚" } else { "󰄬" }
}

fn push_powerline_segment(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
}

fn push_powerline_segment_rtl(
    spans: &mut Vec<Span<'static>>,
    content: impl Into<String>,
    fg: Color,
    bg: Color,
    next_bg: Color,
) {
    spans.push(Span::styled("", Style::default().fg(bg).bg(next_bg)));
    spans.push(Span::styled(
        content.into(),
        Style::default().fg(fg).bg(bg).add_modifier(Modifier::BOLD),
    ));
}

fn spans_width(spans: &[Span<'_>]) -> usize {
    spans.iter().map(|span| span.content.chars().count()).sum()
}

fn render_help_modal(frame: &mut Frame, app: &App) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(format!(
            "podlink help  mode:{}  target:{}",
            help_mode_label(app.mode()),
            app.target()
        )),
        Line::from(""),
    ];
    for line in HELP_LINES {
        lines.push(Line::from(*line));
    }
    if let Some(source) = app.config_source() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("config: {source}"),
            Style::default().fg(MUTED),
        )));
    }

    let modal = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .title("Help")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT))
                .style(Style::default().bg(PANEL)),
        )
        .style(Style::default().fg(Color::White));

    frame.render_widget(modal, area);
}

const HELP_LINES: &[&str] = &[
    "Shell: i/Enter type into shell  Ctrl+] or F12 release  r reconnect  y yank cursor line",
    "Focus: Tab switch shell/logs  j/k scroll  PgUp/PgDn page  G bottom",
    "Logs: / search  f cycle level  p pause  c clear  e export  R restart stream",
    "General: ? help  q quit",
];

fn help_mode_label(mode: InputMode) -> &'static str {
    match mode {
        InputMode::Normal => "normal",
        InputMode::Terminal => "terminal",
        InputMode::Search => "search",
    }
}

fn compact_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }

    if max_chars <= 1 {
        return "…".to_string();
    }

    let mut out = value
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>();
    out.push('…');
    out
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::{ACCENT, ERROR, View, WARN, compact_text, log_line, render, usage_color, vt_color};
    use crate::app::App;
    use crate::channel::testing::ScriptedConnector;
    use crate::endpoint::Endpoints;
    use crate::logs::{LogStreamOptions, LogStreamProcessor};
    use crate::model::{LogEntry, LogLevel, ResourceSample, SampleOrigin, TargetDescriptor};
    use crate::session::{SessionController, SessionOptions};
    use crate::telemetry::{TelemetryOptions, TelemetrySampler};
    use ratatui::Terminal;
    use ratatui::backend::TestBackend;
    use chrono::Local;
    use ratatui::style::Color;
    use std::sync::Arc;

    #[test]
    fn compact_text_adds_ellipsis() {
        assert_eq!(compact_text("podlink", 10), "podlink");
        assert_eq!(compact_text("podlink", 4), "pod…");
        assert_eq!(compact_text("podlink", 1), "…");
    }

    #[test]
    fn usage_color_escalates_with_load() {
        assert_eq!(usage_color(10), ACCENT);
        assert_eq!(usage_color(70), WARN);
        assert_eq!(usage_color(95), ERROR);
    }

    #[test]
    fn vt_colors_map_to_ratatui() {
        assert_eq!(vt_color(vt100::Color::Default), None);
        assert_eq!(vt_color(vt100::Color::Idx(2)), Some(Color::Indexed(2)));
        assert_eq!(
            vt_color(vt100::Color::Rgb(1, 2, 3)),
            Some(Color::Rgb(1, 2, 3))
        );
    }

    #[test]
    fn log_line_keeps_time_and_tag() {
        let entry = LogEntry {
            id: 1,
            timestamp: "2026-01-02 10:11:12".to_string(),
            message: "disk almost full".to_string(),
            level: LogLevel::Warning,
            raw_content: "disk almost full".to_string(),
        };
        let text = log_line(&entry, 80)
            .spans
            .iter()
            .map(|span| span.content.to_string())
            .collect::<String>();
        assert_eq!(text, "10:11:12 WRN disk almost full");
    }

    #[test]
    fn full_frame_renders_session_output_and_logs() {
        let target = TargetDescriptor::new("default", "web-1", "app");
        let endpoints = Endpoints::new("ws://localhost:8000", "token").expect("endpoints");
        let connector = Arc::new(ScriptedConnector::default());
        let mut session = SessionController::new(
            target.clone(),
            endpoints.clone(),
            connector.clone(),
            SessionOptions::default(),
        );
        session.surface_mut().write(b"hello from shell");
        let mut logs =
            LogStreamProcessor::new(endpoints.clone(), connector.clone(), LogStreamOptions::default());
        logs.append("server started");
        let telemetry =
            TelemetrySampler::new(endpoints, connector, None, TelemetryOptions::default());

        let mut app = App::new(target, "localhost:8000");
        app.record_sample(&ResourceSample {
            cpu_percent: 12.0,
            memory_percent: 30.0,
            storage_percent: 5.0,
            sampled_at: Local::now(),
            origin: SampleOrigin::Stream,
        });
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).expect("terminal");
        let mut terminal_area = None;
        terminal
            .draw(|frame| {
                let view = View {
                    session: &session,
                    logs: &logs,
                    telemetry: &telemetry,
                };
                terminal_area = Some(render(frame, &mut app, &view));
            })
            .expect("draw");

        let text = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect::<String>();
        assert!(text.contains("hello from shell"));
        assert!(text.contains("server started"));
        assert!(text.contains("default/web-1:app"));
        assert!(text.contains("Resources (1)"));
        let area = terminal_area.expect("terminal area");
        assert!(area.width > 0 && area.height > 0);
    }
}
