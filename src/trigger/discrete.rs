use super::TriggerSignal;
use crate::error::PipelineError;
use crate::input::{InputEvent, TriggerInput};
use crate::point::{PointUpdate, TtlGate};
use std::time::Duration;
use tokio::time::Instant;

/// Fires when a configured key or button is pressed and released.
///
/// The signal carries the latest point if it is still fresh at release.
#[derive(Debug, Clone)]
pub struct DiscreteTrigger {
    input: TriggerInput,
    latest: TtlGate,
    armed_since: Option<Instant>,
}

impl DiscreteTrigger {
    pub fn new(input: TriggerInput, point_ttl: Duration) -> Self {
        Self {
            input,
            latest: TtlGate::new(point_ttl),
            armed_since: None,
        }
    }

    pub fn input(&self) -> TriggerInput {
        self.input
    }

    pub fn is_armed(&self) -> bool {
        self.armed_since.is_some()
    }

    /// Track the point stream; the latest point rides along with the signal
    pub fn observe(&mut self, update: PointUpdate) {
        match update {
            Some(point) => {
                self.latest.accept(point.point, point.timestamp);
            }
            None => {
                self.latest.clear();
            }
        }
    }

    /// Disarm. Returns whether a press was pending.
    pub fn cancel(&mut self) -> bool {
        self.armed_since.take().is_some()
    }

    pub fn handle(
        &mut self,
        event: &InputEvent,
        now: Instant,
    ) -> Result<Option<TriggerSignal>, PipelineError> {
        match *event {
            InputEvent::Down(input) if input == self.input => {
                if self.armed_since.replace(now).is_some() {
                    return Err(PipelineError::CaptureBroken(format!(
                        "{:?} pressed again before release",
                        self.input
                    )));
                }
                Ok(None)
            }
            InputEvent::Up(input) if input == self.input => {
                if self.armed_since.take().is_none() {
                    log::trace!("Ignoring release of {input:?} without a press");
                    return Ok(None);
                }
                let point = self.latest.current(now).map(|p| p.point);
                Ok(Some(TriggerSignal {
                    point,
                    key: None,
                    fired_at: now,
                }))
            }
            InputEvent::FocusLost if self.cancel() => Err(PipelineError::CaptureBroken(
                format!("focus lost while {:?} was held", self.input),
            )),
            _ => Ok(None),
        }
    }
}
