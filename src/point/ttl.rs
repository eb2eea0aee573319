use super::{Point, TimestampedPoint};
use std::time::Duration;
use tokio::time::Instant;

/// Holds the latest sample and decides when it has gone stale.
#[derive(Debug, Clone)]
pub struct TtlGate {
    ttl: Duration,
    latest: Option<TimestampedPoint>,
}

impl TtlGate {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, latest: None }
    }

    /// Record a new sample received at `now`
    pub fn accept(&mut self, point: Point, now: Instant) -> TimestampedPoint {
        let stamped = TimestampedPoint::new(point, now);
        self.latest = Some(stamped);
        stamped
    }

    /// Forget the current sample. Returns whether there was one.
    pub fn clear(&mut self) -> bool {
        self.latest.take().is_some()
    }

    /// The latest sample, unless it has aged past the TTL
    pub fn current(&self, now: Instant) -> Option<TimestampedPoint> {
        self.latest.filter(|p| p.is_fresh(self.ttl, now))
    }

    /// When the held sample becomes stale
    pub fn expires_at(&self) -> Option<Instant> {
        self.latest.map(|p| p.timestamp + self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_millis(200);

    #[test]
    fn test_fresh_point_is_current() {
        let t0 = Instant::now();
        let mut gate = TtlGate::new(TTL);
        gate.accept(Point::new(10.0, 20.0), t0);

        let current = gate.current(t0 + Duration::from_millis(150)).unwrap();
        assert_eq!(current.point, Point::new(10.0, 20.0));
        assert_eq!(gate.expires_at(), Some(t0 + TTL));
    }

    #[test]
    fn test_stale_point_is_absent() {
        let t0 = Instant::now();
        let mut gate = TtlGate::new(TTL);
        gate.accept(Point::new(10.0, 20.0), t0);

        // Exactly at the TTL the point is already stale
        assert_eq!(gate.current(t0 + TTL), None);
        assert_eq!(gate.current(t0 + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_new_sample_extends_life() {
        let t0 = Instant::now();
        let mut gate = TtlGate::new(TTL);
        gate.accept(Point::new(10.0, 20.0), t0);
        gate.accept(Point::new(11.0, 21.0), t0 + Duration::from_millis(150));

        let current = gate.current(t0 + Duration::from_millis(300)).unwrap();
        assert_eq!(current.point, Point::new(11.0, 21.0));
    }

    #[test]
    fn test_clear() {
        let mut gate = TtlGate::new(TTL);
        assert!(!gate.clear());
        gate.accept(Point::new(1.0, 1.0), Instant::now());
        assert!(gate.clear());
        assert_eq!(gate.expires_at(), None);
    }
}
