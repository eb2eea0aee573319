//! Trigger sources decide when a selection fires on a channel.
//!
//! Each channel owns one source, selected from configuration: a fixation
//! (dwell) detector fed by the point stream, or a discrete key/button.

pub mod discrete;
pub mod fixation;

pub use discrete::DiscreteTrigger;
pub use fixation::{FixationSettings, FixationTrigger};

use crate::config::TriggerConfig;
use crate::error::{ConfigError, ErrorReporter, PipelineError};
use crate::input::keyboard::parse_key_name;
use crate::input::{InputEvent, TriggerInput};
use crate::layout::{KeyLocator, KeyValue};
use crate::point::source::far_future;
use crate::point::{Point, PointUpdate};
use crate::service::{LifecycleState, ServiceLifecycle};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Emitted by a trigger source when a selection should happen
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSignal {
    /// Where the selection happened, if a point was available
    pub point: Option<Point>,
    /// Key resolved by the source itself, if any
    pub key: Option<KeyValue>,
    pub fired_at: Instant,
}

/// Selection channels of the input service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Selects the key under the point
    KeySelection,
    /// Selects the point itself
    PointSelection,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::KeySelection => "key-selection",
            Channel::PointSelection => "point-selection",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A signal on its way to the service, tagged with the epoch it was produced in
#[derive(Debug, Clone)]
pub(crate) struct ChannelSignal {
    pub channel: Channel,
    pub epoch: u64,
    pub signal: TriggerSignal,
}

/// The configured trigger for one channel
pub enum TriggerSource {
    Fixation(FixationTrigger),
    Discrete(DiscreteTrigger),
}

impl TriggerSource {
    /// `locator` binds fixations to keys; `field` names the config section
    pub fn from_config(
        config: &TriggerConfig,
        field: &str,
        locator: Option<Arc<dyn KeyLocator>>,
        point_ttl: Duration,
    ) -> Result<Self, ConfigError> {
        let source = match config {
            TriggerConfig::Fixation(fixation) => {
                let settings = FixationSettings::from_config(fixation, field)?;
                Self::Fixation(FixationTrigger::new(settings, locator))
            }
            TriggerConfig::KeyboardKey { key } => {
                let code = parse_key_name(key).ok_or_else(|| {
                    ConfigError::invalid(
                        format!("{field}.key"),
                        format!("unrecognized key name `{key}`"),
                    )
                })?;
                Self::Discrete(DiscreteTrigger::new(TriggerInput::key(code), point_ttl))
            }
            TriggerConfig::MouseButton { button } => Self::Discrete(DiscreteTrigger::new(
                TriggerInput::mouse((*button).into()),
                point_ttl,
            )),
        };
        Ok(source)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fixation(_) => "fixation",
            Self::Discrete(_) => "discrete",
        }
    }

    pub(crate) fn spawn(self, ctx: TriggerContext) -> JoinHandle<()> {
        log::debug!("Starting {} trigger on {}", self.kind(), ctx.channel);
        match self {
            Self::Fixation(trigger) => tokio::spawn(run_fixation(trigger, ctx)),
            Self::Discrete(trigger) => tokio::spawn(run_discrete(trigger, ctx)),
        }
    }
}

/// Channels a trigger task reads from and writes to
pub(crate) struct TriggerContext {
    pub channel: Channel,
    pub points: broadcast::Receiver<PointUpdate>,
    pub inputs: broadcast::Receiver<InputEvent>,
    pub lifecycle: watch::Receiver<LifecycleState>,
    pub signals: mpsc::UnboundedSender<ChannelSignal>,
    pub errors: ErrorReporter,
}

impl TriggerContext {
    fn running(&self) -> bool {
        self.lifecycle.borrow().lifecycle == ServiceLifecycle::Running
    }

    /// Hand a signal to the service. Returns `false` once the service is gone.
    fn emit(&self, signal: TriggerSignal) -> bool {
        let state = *self.lifecycle.borrow();
        if state.lifecycle != ServiceLifecycle::Running {
            log::debug!("{}: discarding signal while suspended", self.channel);
            return true;
        }
        self.signals
            .send(ChannelSignal {
                channel: self.channel,
                epoch: state.epoch,
                signal,
            })
            .is_ok()
    }
}

async fn run_fixation(mut trigger: FixationTrigger, mut ctx: TriggerContext) {
    let initial = *ctx.lifecycle.borrow_and_update();
    let mut epoch = initial.epoch;
    let mut suspended_at = (initial.lifecycle == ServiceLifecycle::Suspended).then(Instant::now);

    loop {
        // Timers are frozen while suspended
        let deadline = match suspended_at {
            Some(_) => None,
            None => trigger.next_deadline(),
        };

        tokio::select! {
            biased;

            changed = ctx.lifecycle.changed() => {
                if changed.is_err() {
                    return;
                }
                let state = *ctx.lifecycle.borrow_and_update();
                let now = Instant::now();
                // A suspension we never observed still happened
                let since = suspended_at.or((state.epoch != epoch).then_some(now));
                epoch = state.epoch;

                match state.lifecycle {
                    ServiceLifecycle::Suspended => suspended_at = since.or(Some(now)),
                    ServiceLifecycle::Running => {
                        if let Some(since) = since {
                            if trigger.resume(since, now) {
                                log::debug!("{}: dwell completed while suspended, dropped", ctx.channel);
                            }
                        }
                        suspended_at = None;
                    }
                }
            }

            received = ctx.points.recv() => match received {
                Ok(update) => {
                    if suspended_at.is_some() {
                        continue;
                    }
                    if let Some(signal) = trigger.update(update, Instant::now()) {
                        if !ctx.emit(signal) {
                            return;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    ctx.errors.report(PipelineError::Lagged(skipped));
                }
                Err(RecvError::Closed) => {
                    log::debug!("{}: point stream closed", ctx.channel);
                    return;
                }
            },

            _ = tokio::time::sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                if let Some(signal) = trigger.poll(Instant::now()) {
                    if !ctx.emit(signal) {
                        return;
                    }
                }
            }
        }
    }
}

async fn run_discrete(mut trigger: DiscreteTrigger, mut ctx: TriggerContext) {
    let mut epoch = ctx.lifecycle.borrow_and_update().epoch;
    let mut points_open = true;

    loop {
        tokio::select! {
            biased;

            changed = ctx.lifecycle.changed() => {
                if changed.is_err() {
                    return;
                }
                let state = *ctx.lifecycle.borrow_and_update();
                let suspended = state.lifecycle == ServiceLifecycle::Suspended || state.epoch != epoch;
                epoch = state.epoch;
                if suspended && trigger.cancel() {
                    ctx.errors.report(PipelineError::CaptureBroken(format!(
                        "suspended while {:?} was held",
                        trigger.input()
                    )));
                }
            }

            received = ctx.points.recv(), if points_open => match received {
                Ok(update) => trigger.observe(update),
                Err(RecvError::Lagged(skipped)) => {
                    ctx.errors.report(PipelineError::Lagged(skipped));
                }
                Err(RecvError::Closed) => {
                    // Signals still fire, just without a point
                    points_open = false;
                    trigger.observe(None);
                }
            },

            received = ctx.inputs.recv() => match received {
                Ok(event) => {
                    if !ctx.running() {
                        continue;
                    }
                    match trigger.handle(&event, Instant::now()) {
                        Ok(Some(signal)) => {
                            if !ctx.emit(signal) {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => ctx.errors.report(e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("{}: {skipped} host inputs skipped", ctx.channel);
                }
                Err(RecvError::Closed) => {
                    log::debug!("{}: host input closed", ctx.channel);
                    return;
                }
            }
        }
    }
}
