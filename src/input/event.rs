use crossterm::event::{KeyCode, MouseButton};

/// A physical input that can act as a discrete trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerInput {
    Key(KeyCode),
    Mouse(MouseButton),
}

impl TriggerInput {
    /// Key trigger; letters compare case-insensitively
    pub fn key(code: KeyCode) -> Self {
        match code {
            KeyCode::Char(c) => Self::Key(KeyCode::Char(c.to_ascii_lowercase())),
            other => Self::Key(other),
        }
    }

    pub fn mouse(button: MouseButton) -> Self {
        Self::Mouse(button)
    }
}

/// Host input delivered to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Pointer moved to a terminal cell
    PointerMoved { column: u16, row: u16 },
    Down(TriggerInput),
    Up(TriggerInput),
    /// The host window lost input focus; held inputs will never see their release
    FocusLost,
}
