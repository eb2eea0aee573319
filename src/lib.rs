//! Dwell and switch selection pipeline for gaze- and pointer-driven keyboards.
//!
//! Raw position feeds are normalized into a timestamped point stream, fanned
//! out to independent trigger sources (fixation dwell or discrete key/button
//! presses), and resolved by the [`InputService`] into [`SelectionEvent`]s.

pub mod capture;
pub mod config;
pub mod error;
pub mod input;
pub mod layout;
pub mod point;
pub mod service;
pub mod trigger;

pub use capture::{CaptureManager, CapturedSignal, NoCapture, SequenceCapture};
pub use config::Config;
pub use error::{ConfigError, ErrorNotifier, LogNotifier, PipelineError, StartError};
pub use input::{InputEvent, TriggerInput};
pub use layout::{GridLayout, KeyLocator, KeyValue};
pub use point::{GazeTracker, Point, TimestampedPoint};
pub use service::{Collaborators, InputService, SelectionEvent, ServiceLifecycle};
pub use trigger::{Channel, TriggerSignal};
