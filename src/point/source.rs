use super::mouse::MouseFeed;
use super::tracker::{GazeTracker, TrackerFeed};
use super::udp::UdpFeed;
use super::{FeedEvent, PointUpdate, TtlGate};
use crate::config::{PointSourceConfig, PointsConfig, ScreenConfig};
use crate::error::{ConfigError, ErrorReporter, StartError};
use crate::input::InputEvent;
use crate::service::{LifecycleState, ServiceLifecycle};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// The configured raw feed, chosen once at construction
pub enum PointSource {
    Udp(UdpFeed),
    Tracker(TrackerFeed),
    Mouse(MouseFeed),
}

impl PointSource {
    pub async fn from_config(
        config: &PointsConfig,
        screen: &ScreenConfig,
        tracker: Option<Box<dyn GazeTracker>>,
        inputs: &broadcast::Sender<InputEvent>,
    ) -> Result<Self, StartError> {
        let source = match &config.source {
            PointSourceConfig::Udp(udp) => Self::Udp(UdpFeed::bind(udp, screen).await?),
            PointSourceConfig::Tracker(tracker_config) => {
                let tracker = tracker.ok_or(ConfigError::MissingCollaborator(
                    "points.source.kind = \"tracker\"",
                ))?;
                Self::Tracker(TrackerFeed::new(tracker, tracker_config, screen))
            }
            PointSourceConfig::Mouse(mouse) => {
                Self::Mouse(MouseFeed::new(mouse, inputs.subscribe()))
            }
        };
        Ok(source)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Udp(_) => "udp",
            Self::Tracker(_) => "tracker",
            Self::Mouse(_) => "mouse",
        }
    }

    /// Address the UDP feed is listening on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Udp(feed) => feed.local_addr(),
            _ => None,
        }
    }

    /// Start the feed and the emitter that publishes its points
    pub(crate) fn spawn(
        self,
        ttl: Duration,
        points: broadcast::Sender<PointUpdate>,
        lifecycle: watch::Receiver<LifecycleState>,
        errors: ErrorReporter,
    ) -> Vec<JoinHandle<()>> {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let feed_errors = errors.with_source(self.name());

        let feed = match self {
            Self::Udp(feed) => tokio::spawn(feed.run(feed_tx, feed_errors)),
            Self::Tracker(feed) => tokio::spawn(feed.run(feed_tx, feed_errors)),
            Self::Mouse(feed) => tokio::spawn(feed.run(feed_tx, feed_errors)),
        };
        let emitter = tokio::spawn(run_emitter(feed_rx, points, lifecycle, ttl));

        vec![feed, emitter]
    }
}

/// Stand-in deadline for a disabled `select!` timer branch
pub(crate) fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400)
}

/// Stamp feed samples, publish them, and publish `None` once the latest
/// sample outlives the TTL.
///
/// Nothing is published while the service is suspended. Samples arriving
/// then are dropped and the held sample is forgotten without a `None`.
async fn run_emitter(
    mut feed: mpsc::UnboundedReceiver<FeedEvent>,
    points: broadcast::Sender<PointUpdate>,
    mut lifecycle: watch::Receiver<LifecycleState>,
    ttl: Duration,
) {
    let mut gate = TtlGate::new(ttl);
    let mut running = lifecycle.borrow_and_update().lifecycle == ServiceLifecycle::Running;

    loop {
        let expiry = gate.expires_at();
        tokio::select! {
            changed = lifecycle.changed() => {
                if changed.is_err() {
                    return;
                }
                let now_running = lifecycle.borrow_and_update().lifecycle == ServiceLifecycle::Running;
                if running && !now_running {
                    log::debug!("Point stream paused");
                    gate.clear();
                }
                running = now_running;
            }
            event = feed.recv() => match event {
                Some(_) if !running => {}
                Some(FeedEvent::Sample(point)) => {
                    let stamped = gate.accept(point, Instant::now());
                    // No subscribers is not an error
                    let _ = points.send(Some(stamped));
                }
                Some(FeedEvent::NoPoint) => {
                    gate.clear();
                    let _ = points.send(None);
                }
                None => {
                    if gate.clear() {
                        let _ = points.send(None);
                    }
                    log::debug!("Point feed ended");
                    return;
                }
            },
            _ = tokio::time::sleep_until(expiry.unwrap_or_else(far_future)), if expiry.is_some() => {
                log::trace!("Point aged past {ttl:?}");
                gate.clear();
                let _ = points.send(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Point;

    fn lifecycle(lifecycle: ServiceLifecycle) -> LifecycleState {
        LifecycleState { lifecycle, epoch: 0 }
    }

    fn spawn_emitter(
        ttl: Duration,
    ) -> (
        mpsc::UnboundedSender<FeedEvent>,
        broadcast::Receiver<PointUpdate>,
        watch::Sender<LifecycleState>,
    ) {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (points_tx, points_rx) = broadcast::channel(64);
        let (lifecycle_tx, lifecycle_rx) = watch::channel(lifecycle(ServiceLifecycle::Running));
        tokio::spawn(run_emitter(feed_rx, points_tx, lifecycle_rx, ttl));
        (feed_tx, points_rx, lifecycle_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_point_becomes_none() {
        let ttl = Duration::from_millis(200);
        let (feed, mut points, _lifecycle) = spawn_emitter(ttl);
        let start = Instant::now();

        feed.send(FeedEvent::Sample(Point::new(5.0, 6.0))).unwrap();
        let first = points.recv().await.unwrap().unwrap();
        assert_eq!(first.point, Point::new(5.0, 6.0));
        assert_eq!(first.timestamp, start);

        // Silence: the next element is None, emitted exactly at the TTL
        assert_eq!(points.recv().await.unwrap(), None);
        assert_eq!(Instant::now() - start, ttl);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_point_is_forwarded() {
        let (feed, mut points, _lifecycle) = spawn_emitter(Duration::from_millis(200));
        feed.send(FeedEvent::Sample(Point::new(5.0, 6.0))).unwrap();
        feed.send(FeedEvent::NoPoint).unwrap();

        assert!(points.recv().await.unwrap().is_some());
        assert_eq!(points.recv().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_long_gaps_yield_none() {
        let ttl = Duration::from_millis(100);
        let (feed, mut points, _lifecycle) = spawn_emitter(ttl);

        for gap_ms in [50u64, 150, 90, 250] {
            feed.send(FeedEvent::Sample(Point::new(gap_ms as f64, 0.0))).unwrap();
            let point = points.recv().await.unwrap().unwrap();
            assert!(point.is_fresh(ttl, Instant::now()));

            tokio::time::sleep(Duration::from_millis(gap_ms)).await;
            if gap_ms >= 100 {
                assert_eq!(points.recv().await.unwrap(), None);
            } else {
                assert!(matches!(
                    points.try_recv(),
                    Err(broadcast::error::TryRecvError::Empty)
                ));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_does_not_block_others() {
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (points_tx, mut fast) = broadcast::channel(4);
        let mut slow = points_tx.subscribe();
        let (_lifecycle, lifecycle_rx) = watch::channel(lifecycle(ServiceLifecycle::Running));
        let _task = tokio::spawn(run_emitter(
            feed_rx,
            points_tx,
            lifecycle_rx,
            Duration::from_secs(1),
        ));

        for i in 0..10 {
            feed_tx.send(FeedEvent::Sample(Point::new(i as f64, 0.0))).unwrap();
            let received = fast.recv().await.unwrap().unwrap();
            assert_eq!(received.point.x, i as f64);
        }

        // The slow subscriber skipped ahead instead of stalling the producer
        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(6))
        ));
        assert_eq!(slow.recv().await.unwrap().unwrap().point.x, 6.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_is_published_while_suspended() {
        let ttl = Duration::from_millis(200);
        let (feed, mut points, lifecycle_tx) = spawn_emitter(ttl);

        feed.send(FeedEvent::Sample(Point::new(1.0, 1.0))).unwrap();
        assert!(points.recv().await.unwrap().is_some());

        lifecycle_tx.send_replace(LifecycleState {
            lifecycle: ServiceLifecycle::Suspended,
            epoch: 1,
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        feed.send(FeedEvent::Sample(Point::new(2.0, 2.0))).unwrap();
        feed.send(FeedEvent::NoPoint).unwrap();

        // Neither the samples nor the expiry of the held point get through
        tokio::time::sleep(ttl * 3).await;
        assert!(matches!(
            points.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        lifecycle_tx.send_replace(LifecycleState {
            lifecycle: ServiceLifecycle::Running,
            epoch: 1,
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        feed.send(FeedEvent::Sample(Point::new(3.0, 3.0))).unwrap();
        let resumed = points.recv().await.unwrap().unwrap();
        assert_eq!(resumed.point, Point::new(3.0, 3.0));
    }
}
