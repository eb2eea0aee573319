use super::{InputEvent, TriggerInput};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};

/// Parse a configured key name into a key code.
///
/// Accepts named keys (`Space`, `Enter`, `F5`, ...) case-insensitively and
/// single printable characters.
pub fn parse_key_name(name: &str) -> Option<KeyCode> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if !c.is_whitespace() && !c.is_control() {
            return Some(KeyCode::Char(c.to_ascii_lowercase()));
        }
    }

    let lower = name.to_ascii_lowercase();
    let code = match lower.as_str() {
        "space" => KeyCode::Char(' '),
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "esc" | "escape" => KeyCode::Esc,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "pageup" => KeyCode::PageUp,
        "pagedown" => KeyCode::PageDown,
        "insert" => KeyCode::Insert,
        "delete" => KeyCode::Delete,
        _ => {
            let n: u8 = lower.strip_prefix('f')?.parse().ok()?;
            if (1..=24).contains(&n) {
                KeyCode::F(n)
            } else {
                return None;
            }
        }
    };
    Some(code)
}

/// Maps keyboard events to trigger inputs
pub fn map_key_event(key: KeyEvent) -> Option<InputEvent> {
    let input = TriggerInput::key(key.code);
    match key.kind {
        KeyEventKind::Press => Some(InputEvent::Down(input)),
        KeyEventKind::Release => Some(InputEvent::Up(input)),
        // Auto-repeat while held is not a new press
        KeyEventKind::Repeat => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventState, KeyModifiers};

    #[test]
    fn test_parse_key_name() {
        assert_eq!(parse_key_name("Space"), Some(KeyCode::Char(' ')));
        assert_eq!(parse_key_name("ENTER"), Some(KeyCode::Enter));
        assert_eq!(parse_key_name("F5"), Some(KeyCode::F(5)));
        assert_eq!(parse_key_name("A"), Some(KeyCode::Char('a')));
        assert_eq!(parse_key_name("f"), Some(KeyCode::Char('f')));
        assert_eq!(parse_key_name("F25"), None);
        assert_eq!(parse_key_name("Hyper"), None);
        assert_eq!(parse_key_name(""), None);
    }

    #[test]
    fn test_map_key_event_kinds() {
        let press = KeyEvent::new(KeyCode::Char('A'), KeyModifiers::SHIFT);
        assert_eq!(
            map_key_event(press),
            Some(InputEvent::Down(TriggerInput::Key(KeyCode::Char('a'))))
        );

        let release = KeyEvent::new_with_kind_and_state(
            KeyCode::Enter,
            KeyModifiers::NONE,
            KeyEventKind::Release,
            KeyEventState::NONE,
        );
        assert_eq!(
            map_key_event(release),
            Some(InputEvent::Up(TriggerInput::Key(KeyCode::Enter)))
        );

        let repeat = KeyEvent::new_with_kind(
            KeyCode::Enter,
            KeyModifiers::NONE,
            KeyEventKind::Repeat,
        );
        assert_eq!(map_key_event(repeat), None);
    }
}
