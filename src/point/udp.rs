use super::{to_screen, FeedEvent};
use crate::config::{CoordinateSpace, ScreenConfig, UdpConfig};
use crate::error::{ConfigError, ErrorReporter, PipelineError, StartError};
use regex::Regex;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const MAX_DATAGRAM: usize = 4096;

/// Line grammar for gaze packets.
///
/// The pattern must define named groups `x` and `y`; an optional `time`
/// group must be numeric when present.
#[derive(Debug, Clone)]
pub struct LineGrammar {
    pattern: Regex,
    has_time: bool,
}

impl LineGrammar {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ConfigError::invalid("points.source.pattern", e.to_string()))?;

        let names: Vec<&str> = pattern.capture_names().flatten().collect();
        for required in ["x", "y"] {
            if !names.contains(&required) {
                return Err(ConfigError::invalid(
                    "points.source.pattern",
                    format!("missing named group `{required}`"),
                ));
            }
        }
        let has_time = names.contains(&"time");

        Ok(Self { pattern, has_time })
    }

    /// Parse one line into raw `(x, y)` feed coordinates
    pub fn parse(&self, line: &str) -> Result<(f64, f64), PipelineError> {
        let malformed = |reason: String| PipelineError::MalformedPacket {
            line: line.to_string(),
            reason,
        };

        let caps = self
            .pattern
            .captures(line)
            .ok_or_else(|| malformed("does not match grammar".to_string()))?;

        let number = |group: &str| -> Result<f64, PipelineError> {
            let text = caps.name(group).map(|m| m.as_str()).unwrap_or_default();
            text.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| malformed(format!("`{group}` is not a number: `{text}`")))
        };

        if self.has_time && caps.name("time").is_some() {
            number("time")?;
        }
        Ok((number("x")?, number("y")?))
    }
}

/// Gaze stream received as text lines over UDP
#[derive(Debug)]
pub struct UdpFeed {
    socket: UdpSocket,
    grammar: LineGrammar,
    coordinates: CoordinateSpace,
    screen: ScreenConfig,
}

impl UdpFeed {
    pub async fn bind(config: &UdpConfig, screen: &ScreenConfig) -> Result<Self, StartError> {
        let grammar = LineGrammar::new(&config.pattern)?;
        let addr = format!("{}:{}", config.bind_address, config.port);
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|source| StartError::Bind {
                addr: addr.clone(),
                source,
            })?;
        log::info!("Listening for gaze packets on {addr}");

        Ok(Self {
            socket,
            grammar,
            coordinates: config.coordinates,
            screen: screen.clone(),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Convert one datagram into feed events, reporting bad lines
    fn handle_datagram(&self, data: &[u8], errors: &ErrorReporter) -> Vec<FeedEvent> {
        let text = String::from_utf8_lossy(data);
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match self.grammar.parse(line) {
                Ok((x, y)) => Some(FeedEvent::Sample(to_screen(
                    self.coordinates,
                    &self.screen,
                    x,
                    y,
                ))),
                Err(e) => {
                    errors.report(e);
                    None
                }
            })
            .collect()
    }

    pub(crate) async fn run(self, feed: mpsc::UnboundedSender<FeedEvent>, errors: ErrorReporter) {
        let mut buf = [0u8; MAX_DATAGRAM];
        let mut failing = false;

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((n, _peer)) => {
                    if failing {
                        log::info!("Gaze packets are arriving again");
                        failing = false;
                    }
                    for event in self.handle_datagram(&buf[..n], &errors) {
                        if feed.send(event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    // Keep listening; the stream will age out through the TTL
                    if !failing {
                        errors.report(PipelineError::FeedLost(format!("udp receive failed: {e}")));
                        failing = true;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }
}
