use super::{to_screen, FeedEvent};
use crate::config::{CoordinateSpace, ScreenConfig, TrackerConfig};
use crate::error::{ErrorReporter, PipelineError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// An external, already calibrated eye-tracking service.
///
/// `sample` is polled on the runtime and must return promptly.
pub trait GazeTracker: Send + 'static {
    /// The current gaze position, `None` when the tracker sees no gaze
    fn sample(&mut self) -> anyhow::Result<Option<(f64, f64)>>;
}

/// Polls a [`GazeTracker`] at a fixed interval
pub struct TrackerFeed {
    tracker: Box<dyn GazeTracker>,
    interval: Duration,
    coordinates: CoordinateSpace,
    screen: ScreenConfig,
}

impl TrackerFeed {
    pub fn new(tracker: Box<dyn GazeTracker>, config: &TrackerConfig, screen: &ScreenConfig) -> Self {
        Self {
            tracker,
            interval: Duration::from_millis(config.sample_interval_ms),
            coordinates: config.coordinates,
            screen: screen.clone(),
        }
    }

    pub(crate) async fn run(mut self, feed: mpsc::UnboundedSender<FeedEvent>, errors: ErrorReporter) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut lost = false;

        loop {
            ticker.tick().await;

            let event = match self.tracker.sample() {
                Ok(sample) => {
                    if lost {
                        log::info!("Gaze tracker recovered");
                        lost = false;
                    }
                    match sample {
                        Some((x, y)) => FeedEvent::Sample(to_screen(self.coordinates, &self.screen, x, y)),
                        None => FeedEvent::NoPoint,
                    }
                }
                Err(e) => {
                    // Report once per outage; the TTL turns the silence into `None`
                    if !lost {
                        errors.report(PipelineError::FeedLost(format!("gaze tracker: {e:#}")));
                        lost = true;
                    }
                    continue;
                }
            };

            if feed.send(event).is_err() {
                return;
            }
        }
    }
}
