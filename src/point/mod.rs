//! Point sources: raw position feeds normalized into one timestamped stream.
//!
//! Every variant feeds samples into a shared emitter that stamps them,
//! applies the point TTL and broadcasts `Option<TimestampedPoint>` to any
//! number of subscribers. `None` means there is no current point.

pub mod mouse;
pub mod source;
pub mod tracker;
pub mod ttl;
pub mod udp;

pub use source::PointSource;
pub use tracker::GazeTracker;
pub use ttl::TtlGate;

use crate::config::{CoordinateSpace, ScreenConfig};
use tokio::time::Instant;

/// Screen coordinate in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A point together with the instant it was received
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimestampedPoint {
    pub point: Point,
    pub timestamp: Instant,
}

impl TimestampedPoint {
    pub fn new(point: Point, timestamp: Instant) -> Self {
        Self { point, timestamp }
    }

    /// Whether the point is younger than `ttl` at `now`
    pub fn is_fresh(&self, ttl: std::time::Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.timestamp) < ttl
    }
}

/// Stream element shared by all point sources
pub type PointUpdate = Option<TimestampedPoint>;

/// Convert feed coordinates into screen pixels
pub fn to_screen(space: CoordinateSpace, screen: &ScreenConfig, x: f64, y: f64) -> Point {
    match space {
        CoordinateSpace::Pixels => Point::new(x, y),
        CoordinateSpace::Normalized => Point::new(x * screen.width, y * screen.height),
    }
}

/// Raw feed output before stamping and TTL handling
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeedEvent {
    Sample(Point),
    /// The feed is alive but reports no point (e.g. eyes closed)
    NoPoint,
}
