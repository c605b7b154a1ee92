use crate::app::InputMode;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    EnterTerminal,
    LeaveTerminal,
    TerminalBytes(Vec<u8>),
    FocusNext,
    StartSearch,
    InputChar(char),
    Backspace,
    SubmitInput,
    CancelInput,
    CycleLevel,
    TogglePause,
    ClearLogs,
    ExportLogs,
    Reconnect,
    RestartLogs,
    ScrollUp,
    ScrollDown,
    PageUp,
    PageDown,
    Bottom,
    ToggleHelp,
    YankLine,
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    match mode {
        InputMode::Normal => map_normal_mode_key(key),
        InputMode::Terminal => map_terminal_mode_key(key),
        InputMode::Search => map_search_mode_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Quit),
        KeyCode::Char('i') | KeyCode::Enter => Some(Action::EnterTerminal),
        KeyCode::Tab => Some(Action::FocusNext),
        KeyCode::Char('/') => Some(Action::StartSearch),
        KeyCode::Char('f') => Some(Action::CycleLevel),
        KeyCode::Char('p') | KeyCode::Char(' ') => Some(Action::TogglePause),
        KeyCode::Char('c') => Some(Action::ClearLogs),
        KeyCode::Char('e') => Some(Action::ExportLogs),
        KeyCode::Char('r') => Some(Action::Reconnect),
        KeyCode::Char('R') => Some(Action::RestartLogs),
        KeyCode::Char('k') if key.modifiers.is_empty() => Some(Action::ScrollUp),
        KeyCode::Up => Some(Action::ScrollUp),
        KeyCode::Char('j') if key.modifiers.is_empty() => Some(Action::ScrollDown),
        KeyCode::Down => Some(Action::ScrollDown),
        KeyCode::PageUp => Some(Action::PageUp),
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::PageUp),
        KeyCode::PageDown => Some(Action::PageDown),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::PageDown)
        }
        KeyCode::Char('G') | KeyCode::End => Some(Action::Bottom),
        KeyCode::Char('?') => Some(Action::ToggleHelp),
        KeyCode::Char('y') => Some(Action::YankLine),
        _ => None,
    }
}

fn map_terminal_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char(']') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::LeaveTerminal)
        }
        KeyCode::F(12) => Some(Action::LeaveTerminal),
        _ => key_to_bytes(key).map(Action::TerminalBytes),
    }
}

fn map_search_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Char('m') | KeyCode::Char('j')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            Some(Action::SubmitInput)
        }
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c)
            if !key.modifiers.contains(KeyModifiers::CONTROL)
                && !key.modifiers.contains(KeyModifiers::ALT) =>
        {
            Some(Action::InputChar(c))
        }
        _ => None,
    }
}

/// Encodes a key press the way an xterm-compatible terminal sends it.
pub fn key_to_bytes(key: KeyEvent) -> Option<Vec<u8>> {
    let bytes = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            vec![control_byte(c)?]
        }
        KeyCode::Char(c) => {
            let mut encoded = [0u8; 4];
            let text = c.encode_utf8(&mut encoded).as_bytes();
            let mut bytes = Vec::with_capacity(text.len() + 1);
            if key.modifiers.contains(KeyModifiers::ALT) {
                bytes.push(0x1b);
            }
            bytes.extend_from_slice(text);
            bytes
        }
        KeyCode::Enter => b"\r".to_vec(),
        KeyCode::Tab => b"\t".to_vec(),
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::F(n @ 1..=4) => vec![0x1b, b'O', b'P' + (n - 1)],
        KeyCode::F(n) => {
            let code = match n {
                5 => 15,
                6 => 17,
                7 => 18,
                8 => 19,
                9 => 20,
                10 => 21,
                11 => 23,
                _ => return None,
            };
            format!("\x1b[{code}~").into_bytes()
        }
        _ => return None,
    };
    Some(bytes)
}

fn control_byte(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - b'a' + 1),
        'A'..='Z' => Some(c as u8 - b'A' + 1),
        '@' | ' ' | '2' => Some(0),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '7' | '/' => Some(0x1f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, key_to_bytes, map_key};
    use crate::app::InputMode;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    #[test]
    fn normal_mode_maps_quit_and_terminal_entry() {
        let quit = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(map_key(InputMode::Normal, quit), Some(Action::Quit));
        assert_eq!(map_key(InputMode::Normal, enter), Some(Action::EnterTerminal));
    }

    #[test]
    fn terminal_mode_forwards_everything_but_the_escape_hatch() {
        let q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(
            map_key(InputMode::Terminal, q),
            Some(Action::TerminalBytes(b"q".to_vec()))
        );

        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(
            map_key(InputMode::Terminal, ctrl_c),
            Some(Action::TerminalBytes(vec![0x03]))
        );

        let leave = KeyEvent::new(KeyCode::Char(']'), KeyModifiers::CONTROL);
        assert_eq!(map_key(InputMode::Terminal, leave), Some(Action::LeaveTerminal));
        let f12 = KeyEvent::new(KeyCode::F(12), KeyModifiers::NONE);
        assert_eq!(map_key(InputMode::Terminal, f12), Some(Action::LeaveTerminal));
    }

    #[test]
    fn special_keys_use_xterm_sequences() {
        let enter = KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE);
        let up = KeyEvent::new(KeyCode::Up, KeyModifiers::NONE);
        let f1 = KeyEvent::new(KeyCode::F(1), KeyModifiers::NONE);
        let f5 = KeyEvent::new(KeyCode::F(5), KeyModifiers::NONE);
        let alt_b = KeyEvent::new(KeyCode::Char('b'), KeyModifiers::ALT);
        assert_eq!(key_to_bytes(enter), Some(b"\r".to_vec()));
        assert_eq!(key_to_bytes(up), Some(b"\x1b[A".to_vec()));
        assert_eq!(key_to_bytes(f1), Some(b"\x1bOP".to_vec()));
        assert_eq!(key_to_bytes(f5), Some(b"\x1b[15~".to_vec()));
        assert_eq!(key_to_bytes(alt_b), Some(b"\x1bb".to_vec()));
    }

    #[test]
    fn search_mode_collects_plain_characters() {
        let a = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
        let ctrl_a = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::CONTROL);
        let esc = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
        assert_eq!(map_key(InputMode::Search, a), Some(Action::InputChar('a')));
        assert_eq!(map_key(InputMode::Search, ctrl_a), None);
        assert_eq!(map_key(InputMode::Search, esc), Some(Action::CancelInput));
    }
}
