use crate::input::Action;
use crate::model::{LevelFilter, LogFilter, ResourceSample, SampleOrigin, TargetDescriptor};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InputMode {
    Normal,
    Terminal,
    Search,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FocusPane {
    Terminal,
    Logs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    None,
    SendToTerminal(Vec<u8>),
    ScrollTerminal(isize),
    TerminalBottom,
    YankTerminalLine,
    Reconnect,
    RestartLogs,
    TogglePause,
    ClearLogs,
    ExportLogs,
}

#[derive(Debug, Clone)]
pub struct App {
    target: TargetDescriptor,
    host: String,
    config_source: Option<String>,
    mode: InputMode,
    focus: FocusPane,
    filter: LogFilter,
    search_input: String,
    search_backup: String,
    log_scroll: usize,
    log_page: usize,
    show_help: bool,
    running: bool,
    status: String,
    sample_origin: Option<SampleOrigin>,
    samples_seen: u64,
}

impl App {
    pub fn new(target: TargetDescriptor, host: impl Into<String>) -> Self {
        Self {
            target,
            host: host.into(),
            config_source: None,
            mode: InputMode::Normal,
            focus: FocusPane::Terminal,
            filter: LogFilter::default(),
            search_input: String::new(),
            search_backup: String::new(),
            log_scroll: 0,
            log_page: 10,
            show_help: false,
            running: true,
            status: "Press i to type into the shell, ? for help".to_string(),
            sample_origin: None,
            samples_seen: 0,
        }
    }

    pub fn apply_action(&mut self, action: Action) -> AppCommand {
        if self.show_help && !matches!(action, Action::ToggleHelp) {
            self.show_help = false;
        }

        match action {
            Action::Quit => {
                self.running = false;
                self.status = "Exit requested".to_string();
                AppCommand::None
            }
            Action::EnterTerminal => {
                self.mode = InputMode::Terminal;
                self.focus = FocusPane::Terminal;
                self.status = "Shell input active (Ctrl+] or F12 to leave)".to_string();
                AppCommand::TerminalBottom
            }
            Action::LeaveTerminal => {
                self.mode = InputMode::Normal;
                self.status = "Shell input released".to_string();
                AppCommand::None
            }
            Action::TerminalBytes(bytes) => AppCommand::SendToTerminal(bytes),
            Action::FocusNext => {
                self.focus = match self.focus {
                    FocusPane::Terminal => FocusPane::Logs,
                    FocusPane::Logs => FocusPane::Terminal,
                };
                AppCommand::None
            }
            Action::StartSearch => {
                self.mode = InputMode::Search;
                self.focus = FocusPane::Logs;
                self.search_backup = self.filter.search_text.clone();
                self.search_input = self.filter.search_text.clone();
                AppCommand::None
            }
            Action::InputChar(c) => {
                self.search_input.push(c);
                self.update_search();
                AppCommand::None
            }
            Action::Backspace => {
                self.search_input.pop();
                self.update_search();
                AppCommand::None
            }
            Action::SubmitInput => {
                self.mode = InputMode::Normal;
                self.update_search();
                self.status = if self.filter.search_text.trim().is_empty() {
                    "Search cleared".to_string()
                } else {
                    format!("Searching logs for '{}'", self.filter.search_text.trim())
                };
                AppCommand::None
            }
            Action::CancelInput => {
                self.mode = InputMode::Normal;
                self.search_input = std::mem::take(&mut self.search_backup);
                self.update_search();
                AppCommand::None
            }
            Action::CycleLevel => {
                self.filter.level = self.filter.level.next();
                self.log_scroll = 0;
                self.status = format!("Log level filter: {}", self.filter.level.label());
                AppCommand::None
            }
            Action::TogglePause => AppCommand::TogglePause,
            Action::ClearLogs => {
                self.log_scroll = 0;
                AppCommand::ClearLogs
            }
            Action::ExportLogs => AppCommand::ExportLogs,
            Action::Reconnect => AppCommand::Reconnect,
            Action::RestartLogs => {
                self.log_scroll = 0;
                AppCommand::RestartLogs
            }
            Action::ScrollUp => self.scroll(1),
            Action::ScrollDown => self.scroll(-1),
            Action::PageUp => self.scroll(self.log_page as isize),
            Action::PageDown => self.scroll(-(self.log_page as isize)),
            Action::Bottom => match self.focus {
                FocusPane::Terminal => AppCommand::TerminalBottom,
                FocusPane::Logs => {
                    self.log_scroll = 0;
                    AppCommand::None
                }
            },
            Action::ToggleHelp => {
                self.show_help = !self.show_help;
                AppCommand::None
            }
            Action::YankLine => AppCommand::YankTerminalLine,
        }
    }

    /// Positive `lines` scroll back into history.
    fn scroll(&mut self, lines: isize) -> AppCommand {
        match self.focus {
            FocusPane::Terminal => AppCommand::ScrollTerminal(lines),
            FocusPane::Logs => {
                self.log_scroll = self.log_scroll.saturating_add_signed(lines);
                AppCommand::None
            }
        }
    }

    fn update_search(&mut self) {
        self.filter.search_text = self.search_input.clone();
        self.log_scroll = 0;
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn focus(&self) -> FocusPane {
        self.focus
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.filter.level
    }

    pub fn search_input(&self) -> &str {
        &self.search_input
    }

    pub fn push_search_text(&mut self, text: &str) {
        self.search_input
            .extend(text.chars().filter(|c| !c.is_control()));
        self.update_search();
    }

    /// Clamps the log scroll offset to what the view can show and returns it.
    pub fn clamp_log_scroll(&mut self, visible_entries: usize, viewport_rows: usize) -> usize {
        self.log_page = viewport_rows.max(1);
        let max_scroll = visible_entries.saturating_sub(viewport_rows);
        self.log_scroll = self.log_scroll.min(max_scroll);
        self.log_scroll
    }

    pub fn log_scroll(&self) -> usize {
        self.log_scroll
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    /// Counts a delivered sample and reports switches between real and simulated data.
    pub fn record_sample(&mut self, sample: &ResourceSample) {
        self.samples_seen += 1;
        let previous = self.sample_origin.replace(sample.origin);
        let was_simulated = previous == Some(SampleOrigin::Simulated);
        if sample.is_simulated() && previous.is_some() && !was_simulated {
            self.status = format!(
                "No metrics for {}, showing last known values",
                self.target.pod_name
            );
        } else if was_simulated && !sample.is_simulated() {
            self.status = "Metrics resumed".to_string();
        }
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    pub fn config_source(&self) -> Option<&str> {
        self.config_source.as_deref()
    }

    pub fn set_config_source(&mut self, source: Option<String>) {
        self.config_source = source;
    }
}
