use super::{FeedEvent, Point};
use crate::config::MouseConfig;
use crate::error::{ErrorReporter, PipelineError};
use crate::input::InputEvent;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

/// Terminal pointer position, re-sampled at a fixed interval
pub struct MouseFeed {
    inputs: broadcast::Receiver<InputEvent>,
    interval: Duration,
    cell_width: f64,
    cell_height: f64,
}

impl MouseFeed {
    pub fn new(config: &MouseConfig, inputs: broadcast::Receiver<InputEvent>) -> Self {
        Self {
            inputs,
            interval: Duration::from_millis(config.sample_interval_ms),
            cell_width: config.cell_width,
            cell_height: config.cell_height,
        }
    }

    /// Pixel position of a cell's centre
    pub fn cell_center(&self, column: u16, row: u16) -> Point {
        Point::new(
            (column as f64 + 0.5) * self.cell_width,
            (row as f64 + 0.5) * self.cell_height,
        )
    }

    pub(crate) async fn run(mut self, feed: mpsc::UnboundedSender<FeedEvent>, errors: ErrorReporter) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut position: Option<Point> = None;

        loop {
            tokio::select! {
                received = self.inputs.recv() => match received {
                    Ok(InputEvent::PointerMoved { column, row }) => {
                        position = Some(self.cell_center(column, row));
                    }
                    Ok(InputEvent::FocusLost) => {
                        position = None;
                        if feed.send(FeedEvent::NoPoint).is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        errors.report(PipelineError::Lagged(skipped));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        errors.report(PipelineError::FeedLost("terminal input closed".to_string()));
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if let Some(point) = position {
                        if feed.send(FeedEvent::Sample(point)).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_center() {
        let (_tx, rx) = broadcast::channel(4);
        let feed = MouseFeed::new(&MouseConfig::default(), rx);
        assert_eq!(feed.cell_center(0, 0), Point::new(4.0, 8.0));
        assert_eq!(feed.cell_center(10, 2), Point::new(84.0, 40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resamples_last_position() {
        let (tx, rx) = broadcast::channel(4);
        let feed = MouseFeed::new(&MouseConfig::default(), rx);
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
        let (err_tx, _err_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(feed.run(feed_tx, ErrorReporter::new("mouse", err_tx)));

        tx.send(InputEvent::PointerMoved { column: 1, row: 1 }).unwrap();
        let first = feed_rx.recv().await.unwrap();
        let second = feed_rx.recv().await.unwrap();
        assert_eq!(first, FeedEvent::Sample(Point::new(12.0, 24.0)));
        assert_eq!(second, first);

        tx.send(InputEvent::FocusLost).unwrap();
        let mut saw_no_point = false;
        for _ in 0..3 {
            if feed_rx.recv().await.unwrap() == FeedEvent::NoPoint {
                saw_no_point = true;
                break;
            }
        }
        assert!(saw_no_point);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_lag_is_reported() {
        let (tx, rx) = broadcast::channel(4);
        let feed = MouseFeed::new(&MouseConfig::default(), rx);
        let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();

        // Overrun the input channel before the feed gets to read it
        for column in 0..6 {
            tx.send(InputEvent::PointerMoved { column, row: 0 }).unwrap();
        }
        let task = tokio::spawn(feed.run(feed_tx, ErrorReporter::new("mouse", err_tx)));

        let reported = err_rx.recv().await.unwrap();
        assert_eq!(reported.source, "mouse");
        assert_eq!(reported.error, PipelineError::Lagged(2));

        // The feed keeps going and settles on the newest position
        let newest = FeedEvent::Sample(Point::new(44.0, 8.0));
        while feed_rx.recv().await.unwrap() != newest {}
        task.abort();
    }
}
