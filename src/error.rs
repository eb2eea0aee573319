use std::path::PathBuf;
use thiserror::Error;

/// Problems found while loading or validating configuration.
///
/// All of these are fatal: the input service refuses to start.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("`{0}` is selected but no collaborator was supplied for it")]
    MissingCollaborator(&'static str),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that prevent the input service from starting.
#[derive(Error, Debug)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind point feed socket on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// Non-fatal faults raised while the pipeline is running.
///
/// These are forwarded to the [`ErrorNotifier`] and never stop the service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("point feed lost: {0}")]
    FeedLost(String),

    #[error("malformed packet `{line}`: {reason}")]
    MalformedPacket { line: String, reason: String },

    #[error("capture sequence broken: {0}")]
    CaptureBroken(String),

    #[error("subscriber lagged, {0} messages skipped")]
    Lagged(u64),
}

/// A pipeline error tagged with the component that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedError {
    pub source: &'static str,
    pub error: PipelineError,
}

/// Receives non-fatal errors from the pipeline.
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, source: &str, message: &str);
}

/// Default notifier: writes every error to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ErrorNotifier for LogNotifier {
    fn notify(&self, source: &str, message: &str) {
        log::warn!("[{source}] {message}");
    }
}

impl<F> ErrorNotifier for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn notify(&self, source: &str, message: &str) {
        self(source, message)
    }
}

/// Cloneable handle components use to raise non-fatal errors.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    source: &'static str,
    tx: tokio::sync::mpsc::UnboundedSender<SourcedError>,
}

impl ErrorReporter {
    pub fn new(
        source: &'static str,
        tx: tokio::sync::mpsc::UnboundedSender<SourcedError>,
    ) -> Self {
        Self { source, tx }
    }

    /// Same channel, different component name
    pub fn with_source(&self, source: &'static str) -> Self {
        Self {
            source,
            tx: self.tx.clone(),
        }
    }

    pub fn report(&self, error: PipelineError) {
        log::debug!("[{}] {}", self.source, error);
        // Receiver only goes away on shutdown
        let _ = self.tx.send(SourcedError {
            source: self.source,
            error,
        });
    }
}
