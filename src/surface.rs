use tokio::sync::mpsc;
use tracing::{debug, trace};

const PASTE_START: &[u8] = b"\x1b[200~";
const PASTE_END: &[u8] = b"\x1b[201~";

/// Host units per terminal cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellMetrics {
    pub width: u16,
    pub height: u16,
}

impl CellMetrics {
    /// The host already measures in character cells.
    pub const CELLS: Self = Self {
        width: 1,
        height: 1,
    };
}

impl Default for CellMetrics {
    fn default() -> Self {
        Self {
            width: 9,
            height: 18,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub rows: u16,
    pub cols: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitOutcome {
    Resized(GridSize),
    Unchanged,
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CellPos {
    pub row: u16,
    pub col: u16,
}

impl CellPos {
    pub fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SurfaceOptions {
    pub metrics: CellMetrics,
    pub scrollback_lines: usize,
    pub initial: GridSize,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            metrics: CellMetrics::default(),
            scrollback_lines: 1000,
            initial: GridSize { rows: 24, cols: 80 },
        }
    }
}

pub struct TerminalSurface {
    parser: Option<vt100::Parser>,
    metrics: CellMetrics,
    scrollback_lines: usize,
    input_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    selection: Option<(CellPos, CellPos)>,
}

impl TerminalSurface {
    pub fn new(options: SurfaceOptions) -> Self {
        let initial = GridSize {
            rows: options.initial.rows.max(1),
            cols: options.initial.cols.max(1),
        };
        Self {
            parser: Some(vt100::Parser::new(
                initial.rows,
                initial.cols,
                options.scrollback_lines,
            )),
            metrics: options.metrics,
            scrollback_lines: options.scrollback_lines,
            input_tx: None,
            selection: None,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        let Some(parser) = self.parser.as_mut() else {
            trace!(bytes = bytes.len(), "write after dispose ignored");
            return;
        };
        parser.process(bytes);
    }

    /// Connects the keystroke edge. A second call replaces the previous receiver.
    pub fn attach_input(&mut self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.input_tx = Some(tx);
        rx
    }

    pub fn detach_input(&mut self) {
        self.input_tx = None;
    }

    pub fn has_input(&self) -> bool {
        self.input_tx.is_some()
    }

    pub fn input(&mut self, bytes: &[u8]) -> bool {
        if self.parser.is_none() || bytes.is_empty() {
            return false;
        }
        let Some(tx) = self.input_tx.as_ref() else {
            return false;
        };
        if tx.send(bytes.to_vec()).is_err() {
            self.input_tx = None;
            return false;
        }
        true
    }

    pub fn paste(&mut self, text: &str) -> bool {
        let bracketed = self
            .parser
            .as_ref()
            .is_some_and(|parser| parser.screen().bracketed_paste());
        if !bracketed {
            return self.input(text.as_bytes());
        }

        let mut framed = Vec::with_capacity(text.len() + PASTE_START.len() + PASTE_END.len());
        framed.extend_from_slice(PASTE_START);
        framed.extend_from_slice(text.as_bytes());
        framed.extend_from_slice(PASTE_END);
        self.input(&framed)
    }

    pub fn fit(&mut self, width: u16, height: u16) -> FitOutcome {
        let Some(parser) = self.parser.as_mut() else {
            return FitOutcome::Deferred;
        };
        let cols = width / self.metrics.width.max(1);
        let rows = height / self.metrics.height.max(1);
        if rows == 0 || cols == 0 {
            trace!(width, height, "fit deferred, host area has no room");
            return FitOutcome::Deferred;
        }

        let (current_rows, current_cols) = parser.screen().size();
        if current_rows == rows && current_cols == cols {
            return FitOutcome::Unchanged;
        }
        parser.screen_mut().set_size(rows, cols);
        self.selection = None;
        debug!(rows, cols, "terminal surface resized");
        FitOutcome::Resized(GridSize { rows, cols })
    }

    pub fn size(&self) -> Option<GridSize> {
        let parser = self.parser.as_ref()?;
        let (rows, cols) = parser.screen().size();
        Some(GridSize { rows, cols })
    }

    /// Selects cells from `from` to `to`, both inclusive, in either order.
    pub fn select(&mut self, from: CellPos, to: CellPos) {
        self.selection = Some(if from <= to { (from, to) } else { (to, from) });
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn selection(&self) -> Option<(CellPos, CellPos)> {
        self.selection
    }

    pub fn get_selection(&self) -> String {
        let (Some(parser), Some((start, end))) = (self.parser.as_ref(), self.selection) else {
            return String::new();
        };
        parser.screen().contents_between(
            start.row,
            start.col,
            end.row,
            end.col.saturating_add(1),
        )
    }

    pub fn scroll_up(&mut self, lines: usize) {
        let offset = self.scrollback_offset().saturating_add(lines);
        self.set_scrollback(offset);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        let offset = self.scrollback_offset().saturating_sub(lines);
        self.set_scrollback(offset);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.set_scrollback(0);
    }

    pub fn scrollback_offset(&self) -> usize {
        self.parser
            .as_ref()
            .map(|parser| parser.screen().scrollback())
            .unwrap_or_default()
    }

    fn set_scrollback(&mut self, offset: usize) {
        if let Some(parser) = self.parser.as_mut() {
            parser.screen_mut().set_scrollback(offset);
        }
    }

    /// Drops the grid and scrollback but keeps the current size and input wiring.
    pub fn clear(&mut self) {
        let Some(parser) = self.parser.as_mut() else {
            return;
        };
        let (rows, cols) = parser.screen().size();
        *parser = vt100::Parser::new(rows, cols, self.scrollback_lines);
        self.selection = None;
    }

    pub fn dispose(&mut self) {
        if self.parser.take().is_some() {
            debug!("terminal surface disposed");
        }
        self.input_tx = None;
        self.selection = None;
    }

    pub fn is_disposed(&self) -> bool {
        self.parser.is_none()
    }

    pub fn contents(&self) -> String {
        self.parser
            .as_ref()
            .map(|parser| parser.screen().contents())
            .unwrap_or_default()
    }

    pub fn screen(&self) -> Option<&vt100::Screen> {
        self.parser.as_ref().map(vt100::Parser::screen)
    }
}
