use super::{InputEvent, TriggerInput};
use crossterm::event::{MouseEvent, MouseEventKind};

/// Maps a raw mouse event to pipeline input
pub fn map_mouse_event(event: MouseEvent) -> Option<InputEvent> {
    let column = event.column;
    let row = event.row;

    match event.kind {
        MouseEventKind::Moved | MouseEventKind::Drag(_) => {
            Some(InputEvent::PointerMoved { column, row })
        }
        MouseEventKind::Down(button) => Some(InputEvent::Down(TriggerInput::mouse(button))),
        MouseEventKind::Up(button) => Some(InputEvent::Up(TriggerInput::mouse(button))),
        _ => None,
    }
}
