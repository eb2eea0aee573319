//! The input service: wires a point source and two trigger channels together
//! and turns their signals into [`SelectionEvent`]s.

use crate::capture::{CaptureManager, CaptureOutcome, CapturedSignal, CapturingState, NoCapture};
use crate::config::Config;
use crate::error::{ErrorNotifier, ErrorReporter, LogNotifier, PipelineError, SourcedError, StartError};
use crate::input::InputEvent;
use crate::layout::{KeyLocator, KeyValue};
use crate::point::{GazeTracker, Point, PointSource, PointUpdate};
use crate::trigger::{Channel, ChannelSignal, TriggerContext, TriggerSource};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const POINT_CAPACITY: usize = 256;
const INPUT_CAPACITY: usize = 64;
const SELECTION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifecycle {
    Suspended,
    Running,
}

/// Lifecycle plus the number of suspensions so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleState {
    pub lifecycle: ServiceLifecycle,
    pub epoch: u64,
}

/// A resolved selection, ready for the output layer
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionEvent {
    pub channel: Channel,
    pub key: Option<KeyValue>,
    pub point: Option<Point>,
    pub at: Instant,
    /// Earlier selections of a completed capture sequence
    pub captured: Vec<CapturedSignal>,
}

/// Host-supplied collaborators
pub struct Collaborators {
    pub key_locator: Arc<dyn KeyLocator>,
    pub notifier: Arc<dyn ErrorNotifier>,
    pub capture: Arc<dyn CaptureManager>,
    /// Required when the `tracker` point source is configured
    pub tracker: Option<Box<dyn GazeTracker>>,
}

impl Collaborators {
    pub fn new(key_locator: impl KeyLocator + 'static) -> Self {
        Self {
            key_locator: Arc::new(key_locator),
            notifier: Arc::new(LogNotifier),
            capture: Arc::new(NoCapture),
            tracker: None,
        }
    }

    pub fn with_notifier(mut self, notifier: impl ErrorNotifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn with_capture(mut self, capture: Arc<dyn CaptureManager>) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_tracker(mut self, tracker: impl GazeTracker) -> Self {
        self.tracker = Some(Box::new(tracker));
        self
    }
}

enum Command {
    Suspend,
    CancelCapture,
}

/// Handle to a running pipeline. Dropping it stops every task.
pub struct InputService {
    lifecycle: watch::Sender<LifecycleState>,
    commands: mpsc::UnboundedSender<Command>,
    selections: broadcast::Sender<SelectionEvent>,
    points: broadcast::Sender<PointUpdate>,
    inputs: broadcast::Sender<InputEvent>,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl InputService {
    /// Validate `config`, build every component and start it running.
    ///
    /// Any configuration problem is returned here; nothing is spawned then.
    pub async fn start(config: &Config, collaborators: Collaborators) -> Result<Self, StartError> {
        config.validate()?;
        let Collaborators {
            key_locator,
            notifier,
            capture,
            tracker,
        } = collaborators;
        let point_ttl = config.point_ttl();

        let key_trigger = TriggerSource::from_config(
            &config.key_selection,
            "key_selection",
            Some(key_locator.clone()),
            point_ttl,
        )?;
        let point_trigger =
            TriggerSource::from_config(&config.point_selection, "point_selection", None, point_ttl)?;

        let (inputs, _) = broadcast::channel(INPUT_CAPACITY);
        let source = PointSource::from_config(&config.points, &config.screen, tracker, &inputs).await?;
        let local_addr = source.local_addr();

        let (points, _) = broadcast::channel(POINT_CAPACITY);
        let (selections, _) = broadcast::channel(SELECTION_CAPACITY);
        let (lifecycle, _) = watch::channel(LifecycleState {
            lifecycle: ServiceLifecycle::Running,
            epoch: 0,
        });
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let errors = ErrorReporter::new("service", errors_tx);

        log::info!(
            "Starting input service: {} points, {} key selection, {} point selection",
            source.name(),
            key_trigger.kind(),
            point_trigger.kind()
        );

        // Triggers subscribe before the feed starts so they see its first point
        let mut tasks = Vec::new();
        for (channel, trigger) in [
            (Channel::KeySelection, key_trigger),
            (Channel::PointSelection, point_trigger),
        ] {
            tasks.push(trigger.spawn(TriggerContext {
                channel,
                points: points.subscribe(),
                inputs: inputs.subscribe(),
                lifecycle: lifecycle.subscribe(),
                signals: signals_tx.clone(),
                errors: errors.with_source(channel.name()),
            }));
        }
        tasks.extend(source.spawn(
            point_ttl,
            points.clone(),
            lifecycle.subscribe(),
            errors,
        ));

        let worker = Worker {
            lifecycle: lifecycle.subscribe(),
            commands: commands_rx,
            signals: signals_rx,
            errors: errors_rx,
            selections: selections.clone(),
            key_locator,
            notifier,
            capture,
            capturing: CapturingState::default(),
        };
        tasks.push(tokio::spawn(worker.run()));

        Ok(Self {
            lifecycle,
            commands: commands_tx,
            selections,
            points,
            inputs,
            local_addr,
            tasks,
        })
    }

    /// Halt the pipeline. Returns `false` if it was already suspended.
    pub fn request_suspend(&self) -> bool {
        let changed = self.lifecycle.send_if_modified(|state| {
            if state.lifecycle == ServiceLifecycle::Suspended {
                return false;
            }
            state.lifecycle = ServiceLifecycle::Suspended;
            state.epoch += 1;
            true
        });
        if changed {
            log::info!("Input suspended");
            let _ = self.commands.send(Command::Suspend);
        }
        changed
    }

    /// Continue after a suspension. Returns `false` if it was already running.
    pub fn request_resume(&self) -> bool {
        let changed = self.lifecycle.send_if_modified(|state| {
            if state.lifecycle == ServiceLifecycle::Running {
                return false;
            }
            state.lifecycle = ServiceLifecycle::Running;
            true
        });
        if changed {
            log::info!("Input resumed");
        }
        changed
    }

    /// Abandon a capture sequence in progress
    pub fn cancel_capture(&self) {
        let _ = self.commands.send(Command::CancelCapture);
    }

    pub fn lifecycle(&self) -> ServiceLifecycle {
        self.lifecycle.borrow().lifecycle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SelectionEvent> {
        self.selections.subscribe()
    }

    /// The normalized point stream. Nothing is published while suspended.
    pub fn subscribe_points(&self) -> broadcast::Receiver<PointUpdate> {
        self.points.subscribe()
    }

    /// Where the host delivers pointer movement and key/button events
    pub fn input_sender(&self) -> broadcast::Sender<InputEvent> {
        self.inputs.clone()
    }

    /// Address of the UDP point feed, when one is configured
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn shutdown(mut self) {
        log::info!("Shutting down input service");
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for InputService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// The service task. Sole owner of the capturing state.
struct Worker {
    lifecycle: watch::Receiver<LifecycleState>,
    commands: mpsc::UnboundedReceiver<Command>,
    signals: mpsc::UnboundedReceiver<ChannelSignal>,
    errors: mpsc::UnboundedReceiver<SourcedError>,
    selections: broadcast::Sender<SelectionEvent>,
    key_locator: Arc<dyn KeyLocator>,
    notifier: Arc<dyn ErrorNotifier>,
    capture: Arc<dyn CaptureManager>,
    capturing: CapturingState,
}

impl Worker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(command) = self.commands.recv() => self.handle_command(command),
                // Selections go ahead of error reports
                Some(signal) = self.signals.recv() => self.handle_signal(signal),
                Some(error) = self.errors.recv() => self.notify(error.source, &error.error),
                else => return,
            }
        }
    }

    fn notify(&self, source: &str, error: &PipelineError) {
        self.notifier.notify(source, &error.to_string());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Suspend => {
                if self.capturing.reset() {
                    self.notify(
                        "capture",
                        &PipelineError::CaptureBroken("suspended during capture".into()),
                    );
                }
            }
            Command::CancelCapture => {
                if self.capturing.reset() {
                    log::info!("Capture cancelled");
                }
            }
        }
    }

    fn handle_signal(&mut self, ChannelSignal { channel, epoch, signal }: ChannelSignal) {
        let state = *self.lifecycle.borrow();
        if state.lifecycle != ServiceLifecycle::Running || state.epoch != epoch {
            log::debug!("Dropping {channel} signal from epoch {epoch}");
            return;
        }

        let event = match channel {
            Channel::KeySelection => {
                let key = signal
                    .point
                    .and_then(|point| self.key_locator.key_at(point))
                    .or(signal.key);
                if key.is_none() {
                    log::debug!("Key selection at {:?} hit no key", signal.point);
                }

                let (outcome, broken) = self.capturing.accept(
                    CapturedSignal {
                        key: key.clone(),
                        point: signal.point,
                        at: signal.fired_at,
                    },
                    self.capture.as_ref(),
                );
                if let Some(error) = broken {
                    self.notify("capture", &error);
                }
                match outcome {
                    CaptureOutcome::Emit { captured } => SelectionEvent {
                        channel,
                        key,
                        point: signal.point,
                        at: signal.fired_at,
                        captured,
                    },
                    CaptureOutcome::Pending => return,
                }
            }
            Channel::PointSelection => SelectionEvent {
                channel,
                key: signal.key,
                point: signal.point,
                at: signal.fired_at,
                captured: Vec::new(),
            },
        };

        log::debug!("Selection on {channel}: {:?} at {:?}", event.key, event.point);
        if self.selections.send(event).is_err() {
            log::debug!("No selection subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SequenceCapture;
    use crate::config::{
        CoordinateSpace, PointSourceConfig, TrackerConfig, TriggerConfig, UdpConfig,
    };
    use crate::error::ConfigError;
    use crate::input::TriggerInput;
    use crate::trigger::TriggerSignal;
    use crossterm::event::{KeyCode, MouseButton};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Tracker that always sees the gaze at one spot
    struct Steady(f64, f64);

    impl GazeTracker for Steady {
        fn sample(&mut self) -> anyhow::Result<Option<(f64, f64)>> {
            Ok(Some((self.0, self.1)))
        }
    }

    fn locator(point: Point) -> Option<KeyValue> {
        if point.x < 100.0 {
            Some("A".into())
        } else {
            Some("B".into())
        }
    }

    fn tracker_config() -> Config {
        let mut config = Config::default();
        config.points.source = PointSourceConfig::Tracker(TrackerConfig {
            sample_interval_ms: 20,
            coordinates: CoordinateSpace::Pixels,
        });
        config
    }

    fn keyboard_config() -> Config {
        let mut config = Config::default();
        config.key_selection = TriggerConfig::KeyboardKey {
            key: "Space".to_string(),
        };
        config
    }

    fn space() -> TriggerInput {
        TriggerInput::key(KeyCode::Char(' '))
    }

    fn press(inputs: &broadcast::Sender<InputEvent>, input: TriggerInput) {
        inputs.send(InputEvent::Down(input)).unwrap();
        inputs.send(InputEvent::Up(input)).unwrap();
    }

    /// Notifier that records `source: message` lines
    fn recording() -> (Arc<Mutex<Vec<String>>>, impl ErrorNotifier + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let notifier = move |source: &str, message: &str| {
            sink.lock().unwrap().push(format!("{source}: {message}"));
        };
        (seen, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn test_dwell_selects_key() {
        let start = Instant::now();
        let collaborators = Collaborators::new(locator).with_tracker(Steady(50.0, 60.0));
        let service = InputService::start(&tracker_config(), collaborators)
            .await
            .unwrap();
        let mut selections = service.subscribe();

        let event = selections.recv().await.unwrap();
        assert_eq!(event.channel, Channel::KeySelection);
        assert_eq!(event.key, Some("A".into()));
        assert_eq!(event.point, Some(Point::new(50.0, 60.0)));
        assert!(event.captured.is_empty());
        // 250ms lock-on plus 1000ms completion
        assert_eq!(event.at - start, Duration::from_millis(1250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dwell_spanning_suspension_is_dropped() {
        let collaborators = Collaborators::new(locator).with_tracker(Steady(50.0, 60.0));
        let service = InputService::start(&tracker_config(), collaborators)
            .await
            .unwrap();
        let mut selections = service.subscribe();

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(service.request_suspend());
        assert!(!service.request_suspend());
        assert_eq!(service.lifecycle(), ServiceLifecycle::Suspended);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        let resumed_at = Instant::now();
        assert!(service.request_resume());

        // The next selection belongs to a dwell started after the resume
        let event = selections.recv().await.unwrap();
        assert!(event.at - resumed_at >= Duration::from_millis(1250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discrete_channels() {
        let collaborators = Collaborators::new(locator);
        let service = InputService::start(&keyboard_config(), collaborators)
            .await
            .unwrap();
        let mut selections = service.subscribe();
        let inputs = service.input_sender();

        // Cell (10, 2) has its centre at (84, 40) with 8x16 cells
        inputs
            .send(InputEvent::PointerMoved { column: 10, row: 2 })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        press(&inputs, TriggerInput::mouse(MouseButton::Left));
        let event = selections.recv().await.unwrap();
        assert_eq!(event.channel, Channel::PointSelection);
        assert_eq!(event.point, Some(Point::new(84.0, 40.0)));
        assert_eq!(event.key, None);

        press(&inputs, space());
        let event = selections.recv().await.unwrap();
        assert_eq!(event.channel, Channel::KeySelection);
        assert_eq!(event.key, Some("A".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_sequence() {
        let capture = Arc::new(SequenceCapture::new(2));
        let collaborators = Collaborators::new(locator).with_capture(capture.clone());
        let service = InputService::start(&keyboard_config(), collaborators)
            .await
            .unwrap();
        let mut selections = service.subscribe();
        let inputs = service.input_sender();
        capture.arm();

        inputs
            .send(InputEvent::PointerMoved { column: 1, row: 1 })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        press(&inputs, space());
        tokio::time::sleep(Duration::from_millis(10)).await;

        inputs
            .send(InputEvent::PointerMoved { column: 20, row: 1 })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        press(&inputs, space());

        let event = selections.recv().await.unwrap();
        assert_eq!(event.key, Some("B".into()));
        let captured: Vec<_> = event.captured.iter().map(|s| s.key.clone()).collect();
        assert_eq!(captured, vec![Some("A".into())]);
        assert!(!capture.is_capturing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspension_breaks_capture() {
        let capture = Arc::new(SequenceCapture::new(3));
        let (seen, notifier) = recording();
        let collaborators = Collaborators::new(locator)
            .with_capture(capture.clone())
            .with_notifier(notifier);
        let service = InputService::start(&keyboard_config(), collaborators)
            .await
            .unwrap();
        let inputs = service.input_sender();
        capture.arm();

        inputs
            .send(InputEvent::PointerMoved { column: 1, row: 1 })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        press(&inputs, space());
        tokio::time::sleep(Duration::from_millis(10)).await;

        service.request_suspend();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("capture: capture sequence broken"));
    }

    #[tokio::test]
    async fn test_udp_feed_end_to_end() {
        let mut config = Config::default();
        config.points.source = PointSourceConfig::Udp(UdpConfig {
            port: 0,
            ..UdpConfig::default()
        });
        let (errors_tx, mut errors) = mpsc::unbounded_channel();
        let notifier = move |source: &str, message: &str| {
            let _ = errors_tx.send(format!("{source}: {message}"));
        };
        let service = InputService::start(&config, Collaborators::new(locator).with_notifier(notifier))
            .await
            .unwrap();
        let mut points = service.subscribe_points();
        let addr = service.local_addr().unwrap();

        let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"STREAM_DATA 17 not-a-number 3\n", addr).await.unwrap();
        client.send_to(b"STREAM_DATA 18 640 360\n", addr).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(message.starts_with("udp: malformed packet"), "{message}");

        let point = loop {
            let update = tokio::time::timeout(Duration::from_secs(5), points.recv())
                .await
                .unwrap()
                .unwrap();
            if let Some(point) = update {
                break point;
            }
        };
        assert_eq!(point.point, Point::new(640.0, 360.0));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_config_prevents_start() {
        let mut config = Config::default();
        config.point_selection = TriggerConfig::KeyboardKey {
            key: "Hyper".to_string(),
        };
        let result = InputService::start(&config, Collaborators::new(locator)).await;
        assert!(matches!(
            result,
            Err(StartError::Config(ConfigError::Invalid { ref field, .. })) if field == "point_selection.key"
        ));

        let result = InputService::start(&tracker_config(), Collaborators::new(locator)).await;
        assert!(matches!(
            result,
            Err(StartError::Config(ConfigError::MissingCollaborator(_)))
        ));
    }

    #[tokio::test]
    async fn test_error_flood_does_not_delay_selections() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let on_key = order.clone();
        let on_error = order.clone();

        let (_lifecycle, lifecycle_rx) = watch::channel(LifecycleState {
            lifecycle: ServiceLifecycle::Running,
            epoch: 0,
        });
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (selections, mut selected) = broadcast::channel(SELECTION_CAPACITY);

        // A burst of malformed lines queued ahead of one selection
        for i in 0..50 {
            errors_tx
                .send(SourcedError {
                    source: "udp",
                    error: PipelineError::MalformedPacket {
                        line: format!("junk {i}"),
                        reason: "no match".to_string(),
                    },
                })
                .unwrap();
        }
        signals_tx
            .send(ChannelSignal {
                channel: Channel::KeySelection,
                epoch: 0,
                signal: TriggerSignal {
                    point: Some(Point::new(10.0, 10.0)),
                    key: None,
                    fired_at: Instant::now(),
                },
            })
            .unwrap();
        drop((commands_tx, signals_tx, errors_tx));

        let worker = Worker {
            lifecycle: lifecycle_rx,
            commands: commands_rx,
            signals: signals_rx,
            errors: errors_rx,
            selections,
            key_locator: Arc::new(move |_: Point| {
                on_key.lock().unwrap().push("selection");
                Some(KeyValue::new("A"))
            }),
            notifier: Arc::new(move |_: &str, _: &str| on_error.lock().unwrap().push("error")),
            capture: Arc::new(NoCapture),
            capturing: CapturingState::default(),
        };
        worker.run().await;
        assert_eq!(selected.recv().await.unwrap().key, Some("A".into()));

        let order = order.lock().unwrap();
        assert_eq!(order.len(), 51);
        assert_eq!(order[0], "selection");
    }
}
