//! Capture gestures: several key selections combined into one.
//!
//! Whether a capture is in progress, and when its sequence is complete, is
//! decided by an external [`CaptureManager`]. The service owns the
//! [`CapturingState`] and is the only thing that mutates it.

use crate::error::PipelineError;
use crate::layout::KeyValue;
use crate::point::Point;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;

/// A key selection held back as part of a capture sequence
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedSignal {
    pub key: Option<KeyValue>,
    pub point: Option<Point>,
    pub at: Instant,
}

/// Host-side owner of capture gestures
pub trait CaptureManager: Send + Sync {
    fn is_capturing(&self) -> bool;

    fn is_sequence_complete(&self, sequence: &[CapturedSignal]) -> bool;

    /// Called once a sequence completed and was emitted
    fn capture_finished(&self, _sequence: &[CapturedSignal]) {}
}

/// Never captures; every selection is emitted on its own
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapture;

impl CaptureManager for NoCapture {
    fn is_capturing(&self) -> bool {
        false
    }

    fn is_sequence_complete(&self, _sequence: &[CapturedSignal]) -> bool {
        true
    }
}

/// Captures a fixed number of selections once armed, then disarms itself.
#[derive(Debug)]
pub struct SequenceCapture {
    armed: AtomicBool,
    length: usize,
}

impl SequenceCapture {
    pub fn new(length: usize) -> Self {
        Self {
            armed: AtomicBool::new(false),
            length: length.max(1),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl CaptureManager for SequenceCapture {
    fn is_capturing(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    fn is_sequence_complete(&self, sequence: &[CapturedSignal]) -> bool {
        sequence.len() >= self.length
    }

    fn capture_finished(&self, _sequence: &[CapturedSignal]) {
        self.disarm();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaptureMode {
    #[default]
    Navigating,
    Capturing,
}

/// What to do with an accepted selection
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Emit now; `captured` holds the earlier signals of a finished sequence
    Emit { captured: Vec<CapturedSignal> },
    /// Held as part of an unfinished sequence
    Pending,
}

#[derive(Debug, Default)]
pub struct CapturingState {
    mode: CaptureMode,
    sequence: Vec<CapturedSignal>,
}

impl CapturingState {
    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn sequence(&self) -> &[CapturedSignal] {
        &self.sequence
    }

    /// Route a resolved key selection through the capture gesture.
    ///
    /// The error, if any, reports a sequence the manager abandoned before it
    /// completed; the selection itself is still emitted.
    pub fn accept(
        &mut self,
        signal: CapturedSignal,
        manager: &dyn CaptureManager,
    ) -> (CaptureOutcome, Option<PipelineError>) {
        if !manager.is_capturing() {
            let broken = self.reset().then(|| {
                PipelineError::CaptureBroken("capture ended before its sequence completed".into())
            });
            return (CaptureOutcome::Emit { captured: Vec::new() }, broken);
        }

        self.mode = CaptureMode::Capturing;
        self.sequence.push(signal);
        if !manager.is_sequence_complete(&self.sequence) {
            log::debug!("Capture holds {} selection(s)", self.sequence.len());
            return (CaptureOutcome::Pending, None);
        }

        let mut captured = std::mem::take(&mut self.sequence);
        self.mode = CaptureMode::Navigating;
        manager.capture_finished(&captured);
        // The last selection is the event itself
        captured.pop();
        (CaptureOutcome::Emit { captured }, None)
    }

    /// Drop any partial sequence. Returns whether one was in progress.
    pub fn reset(&mut self) -> bool {
        let was_capturing = self.mode == CaptureMode::Capturing;
        self.mode = CaptureMode::Navigating;
        self.sequence.clear();
        was_capturing
    }
}
