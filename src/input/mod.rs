pub mod event;
pub mod keyboard;
pub mod mouse;

pub use event::{InputEvent, TriggerInput};

use crossterm::event::Event;

/// Translates terminal events into pipeline input
pub struct InputMapper {
    /// Whether the terminal reports key releases; without them each press
    /// is completed by a synthetic release
    key_releases: bool,
}

impl InputMapper {
    pub fn new(key_releases: bool) -> Self {
        Self { key_releases }
    }

    pub fn map(&self, event: Event) -> Vec<InputEvent> {
        match event {
            Event::Key(key) => match keyboard::map_key_event(key) {
                Some(InputEvent::Down(input)) if !self.key_releases => {
                    vec![InputEvent::Down(input), InputEvent::Up(input)]
                }
                Some(mapped) => vec![mapped],
                None => Vec::new(),
            },
            Event::Mouse(mouse) => mouse::map_mouse_event(mouse).into_iter().collect(),
            Event::FocusLost => vec![InputEvent::FocusLost],
            _ => Vec::new(),
        }
    }
}

impl Default for InputMapper {
    fn default() -> Self {
        Self::new(false)
    }
}
