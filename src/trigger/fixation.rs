//! Dwell detection.
//!
//! A candidate fixation first has to *lock on*: stay inside a small radius for
//! the lock-on time, which filters out saccades and passing glances. Once
//! locked on, the fixation may drift inside a larger radius while the
//! completion countdown runs. Short losses of the point (blinks, tracker
//! jitter) are tolerated for up to the incomplete-fixation TTL.
//!
//! The machine is driven by two entry points: [`FixationTrigger::update`] for
//! every element of the point stream and [`FixationTrigger::poll`] when
//! [`FixationTrigger::next_deadline`] is reached. Both take the current
//! instant explicitly.

use super::TriggerSignal;
use crate::config::{is_positive, millis, FixationConfig};
use crate::error::ConfigError;
use crate::layout::{KeyLocator, KeyValue};
use crate::point::{Point, PointUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Validated fixation thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct FixationSettings {
    pub lock_on_time: Duration,
    pub lock_on_radius: f64,
    pub fixation_radius: f64,
    pub complete_time: Duration,
    pub complete_times_by_key: HashMap<KeyValue, Duration>,
    pub incomplete_fixation_ttl: Duration,
}

impl FixationSettings {
    /// `field` prefixes error messages, e.g. `key_selection`
    pub fn from_config(config: &FixationConfig, field: &str) -> Result<Self, ConfigError> {
        if !is_positive(config.lock_on_radius) {
            return Err(ConfigError::invalid(
                format!("{field}.lock_on_radius"),
                "must be positive",
            ));
        }
        if !is_positive(config.fixation_radius) {
            return Err(ConfigError::invalid(
                format!("{field}.fixation_radius"),
                "must be positive",
            ));
        }
        if config.fixation_radius < config.lock_on_radius {
            log::warn!(
                "{field}: fixation_radius {} is smaller than lock_on_radius {}",
                config.fixation_radius,
                config.lock_on_radius
            );
        }

        let mut complete_times_by_key = HashMap::new();
        for (key, ms) in &config.complete_times_by_key {
            let time = millis(&format!("{field}.complete_times_by_key.{key}"), *ms)?;
            complete_times_by_key.insert(key.clone(), time);
        }

        Ok(Self {
            // Zero lock-on is allowed: fixating starts on the first point
            lock_on_time: Duration::from_millis(config.lock_on_time_ms),
            lock_on_radius: config.lock_on_radius,
            fixation_radius: config.fixation_radius,
            complete_time: millis(&format!("{field}.complete_time_ms"), config.complete_time_ms)?,
            complete_times_by_key,
            incomplete_fixation_ttl: millis(
                &format!("{field}.incomplete_fixation_ttl_ms"),
                config.incomplete_fixation_ttl_ms,
            )?,
        })
    }

    /// Completion time for a candidate on `key`
    pub fn complete_time_for(&self, key: Option<&KeyValue>) -> Duration {
        key.and_then(|k| self.complete_times_by_key.get(k))
            .copied()
            .unwrap_or(self.complete_time)
    }
}

/// The point currently being dwelt on
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Running mean of the in-radius points
    pub centroid: Point,
    samples: u32,
    pub key: Option<KeyValue>,
    /// Start of the current run of missing or out-of-radius points
    pub gap_since: Option<Instant>,
}

impl Candidate {
    fn new(point: Point, key: Option<KeyValue>) -> Self {
        Self {
            centroid: point,
            samples: 1,
            key,
            gap_since: None,
        }
    }

    fn absorb(&mut self, point: Point) {
        self.samples = self.samples.saturating_add(1);
        let n = self.samples as f64;
        self.centroid.x += (point.x - self.centroid.x) / n;
        self.centroid.y += (point.y - self.centroid.y) / n;
        self.gap_since = None;
    }

    fn open_gap(&mut self, now: Instant) {
        self.gap_since.get_or_insert(now);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FixationState {
    Idle,
    LockingOn {
        candidate: Candidate,
        entered_at: Instant,
    },
    Fixating {
        candidate: Candidate,
        fixating_since: Instant,
    },
}

/// State without its payload, for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixationPhase {
    Idle,
    LockingOn,
    Fixating,
}

/// Fixation trigger for one selection channel
pub struct FixationTrigger {
    settings: FixationSettings,
    /// Resolves candidate keys for per-key timing and key-bound fixations
    locator: Option<Arc<dyn KeyLocator>>,
    state: FixationState,
}

impl FixationTrigger {
    pub fn new(settings: FixationSettings, locator: Option<Arc<dyn KeyLocator>>) -> Self {
        Self {
            settings,
            locator,
            state: FixationState::Idle,
        }
    }

    pub fn state(&self) -> &FixationState {
        &self.state
    }

    pub fn phase(&self) -> FixationPhase {
        match self.state {
            FixationState::Idle => FixationPhase::Idle,
            FixationState::LockingOn { .. } => FixationPhase::LockingOn,
            FixationState::Fixating { .. } => FixationPhase::Fixating,
        }
    }

    /// Abandon any candidate
    pub fn reset(&mut self) {
        if self.state != FixationState::Idle {
            log::trace!("Fixation reset");
        }
        self.state = FixationState::Idle;
    }

    /// The next instant at which [`poll`](Self::poll) changes state
    pub fn next_deadline(&self) -> Option<Instant> {
        let ttl = self.settings.incomplete_fixation_ttl;
        match &self.state {
            FixationState::Idle => None,
            FixationState::LockingOn {
                candidate,
                entered_at,
            } => Some(match candidate.gap_since {
                Some(gap) => gap + ttl,
                None => *entered_at + self.settings.lock_on_time,
            }),
            FixationState::Fixating {
                candidate,
                fixating_since,
            } => Some(match candidate.gap_since {
                Some(gap) => gap + ttl,
                None => *fixating_since + self.settings.complete_time_for(candidate.key.as_ref()),
            }),
        }
    }

    /// Feed one element of the point stream received at `now`
    pub fn update(&mut self, point: PointUpdate, now: Instant) -> Option<TriggerSignal> {
        // Settle anything already due so a late point cannot skip a transition
        let fired = self.poll(now);
        self.apply(point.map(|p| p.point), now);
        fired.or_else(|| self.poll(now))
    }

    /// Evaluate timers at `now`
    pub fn poll(&mut self, now: Instant) -> Option<TriggerSignal> {
        let ttl = self.settings.incomplete_fixation_ttl;

        if let FixationState::LockingOn {
            candidate,
            entered_at,
        } = &self.state
        {
            match candidate.gap_since {
                Some(gap) if now.saturating_duration_since(gap) >= ttl => {
                    self.reset();
                    return None;
                }
                Some(_) => return None,
                None if now.saturating_duration_since(*entered_at) >= self.settings.lock_on_time => {
                    log::trace!("Locked on at {:?}", candidate.centroid);
                    let candidate = candidate.clone();
                    self.state = FixationState::Fixating {
                        candidate,
                        fixating_since: now,
                    };
                }
                None => return None,
            }
        }

        if let FixationState::Fixating {
            candidate,
            fixating_since,
        } = &self.state
        {
            match candidate.gap_since {
                Some(gap) if now.saturating_duration_since(gap) >= ttl => {
                    self.reset();
                }
                Some(_) => {}
                None => {
                    let complete = self.settings.complete_time_for(candidate.key.as_ref());
                    if now.saturating_duration_since(*fixating_since) >= complete {
                        let signal = TriggerSignal {
                            point: Some(candidate.centroid),
                            key: candidate.key.clone(),
                            fired_at: now,
                        };
                        self.state = FixationState::Idle;
                        return Some(signal);
                    }
                }
            }
        }

        None
    }

    /// Resume after the owner was suspended between `suspended_at` and `now`.
    ///
    /// Progress continues as if uninterrupted. If the dwell would have
    /// completed during the suspension it is dropped instead; returns `true`
    /// in that case.
    pub fn resume(&mut self, suspended_at: Instant, now: Instant) -> bool {
        let paused = now.saturating_duration_since(suspended_at);
        let lock_on_time = self.settings.lock_on_time;

        match &mut self.state {
            FixationState::Idle => return false,
            FixationState::LockingOn {
                candidate,
                entered_at,
            } => {
                // Time spent suspended does not count against the gap
                if let Some(gap) = candidate.gap_since.as_mut() {
                    *gap += paused;
                } else if *entered_at + lock_on_time <= now {
                    let fixating_since = *entered_at + lock_on_time;
                    let candidate = candidate.clone();
                    self.state = FixationState::Fixating {
                        candidate,
                        fixating_since,
                    };
                }
            }
            FixationState::Fixating { candidate, .. } => {
                if let Some(gap) = candidate.gap_since.as_mut() {
                    *gap += paused;
                }
            }
        }

        if let FixationState::Fixating {
            candidate,
            fixating_since,
        } = &self.state
        {
            let complete = self.settings.complete_time_for(candidate.key.as_ref());
            if candidate.gap_since.is_none() && *fixating_since + complete <= now {
                log::debug!("Dropping dwell that completed while suspended");
                self.reset();
                return true;
            }
        }
        false
    }

    fn locate(&self, point: Point) -> Option<KeyValue> {
        self.locator.as_ref().and_then(|l| l.key_at(point))
    }

    /// Whether `point` still belongs to `candidate` within `radius`
    fn holds(&self, candidate: &Candidate, point: Point, key: &Option<KeyValue>, radius: f64) -> bool {
        if candidate.centroid.distance(point) > radius {
            return false;
        }
        // Moving onto another key breaks a key-bound fixation
        self.locator.is_none() || *key == candidate.key
    }

    fn start(&mut self, point: Point, key: Option<KeyValue>, now: Instant) {
        log::trace!("Fixation candidate at {point:?} on {key:?}");
        self.state = FixationState::LockingOn {
            candidate: Candidate::new(point, key),
            entered_at: now,
        };
    }

    fn candidate_mut(&mut self) -> Option<&mut Candidate> {
        match &mut self.state {
            FixationState::Idle => None,
            FixationState::LockingOn { candidate, .. }
            | FixationState::Fixating { candidate, .. } => Some(candidate),
        }
    }

    fn apply(&mut self, point: Option<Point>, now: Instant) {
        let Some(point) = point else {
            if let Some(candidate) = self.candidate_mut() {
                candidate.open_gap(now);
            }
            return;
        };

        let key = self.locate(point);
        let step = match &self.state {
            FixationState::Idle => Step::Start,
            FixationState::LockingOn { candidate, .. } => {
                if self.holds(candidate, point, &key, self.settings.lock_on_radius) {
                    Step::Absorb
                } else {
                    // Lock-on gating: the candidate is abandoned outright
                    Step::Start
                }
            }
            FixationState::Fixating { candidate, .. } => {
                if self.holds(candidate, point, &key, self.settings.fixation_radius) {
                    Step::Absorb
                } else {
                    Step::Gap
                }
            }
        };

        match step {
            Step::Start => self.start(point, key, now),
            Step::Absorb => {
                if let Some(candidate) = self.candidate_mut() {
                    candidate.absorb(point);
                }
            }
            Step::Gap => {
                if let Some(candidate) = self.candidate_mut() {
                    candidate.open_gap(now);
                }
            }
        }
    }
}

enum Step {
    Start,
    Absorb,
    Gap,
}
