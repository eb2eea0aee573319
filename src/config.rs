use crate::error::ConfigError;
use crate::input::keyboard::parse_key_name;
use crate::layout::KeyValue;
use crossterm::event::MouseButton;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default line grammar for network gaze streams: `STREAM_DATA <time> <x> <y>`
pub const DEFAULT_UDP_PATTERN: &str =
    r"^STREAM_DATA\s+(?P<time>\S+)\s+(?P<x>\S+)\s+(?P<y>\S+)\s*$";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub screen: ScreenConfig,
    #[serde(default)]
    pub points: PointsConfig,
    #[serde(default = "default_key_selection")]
    pub key_selection: TriggerConfig,
    #[serde(default = "default_point_selection")]
    pub point_selection: TriggerConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenConfig {
    /// Screen width in pixels, used to scale normalized coordinates
    #[serde(default = "default_screen_width")]
    pub width: f64,
    /// Screen height in pixels
    #[serde(default = "default_screen_height")]
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsConfig {
    /// Points older than this are reported as absent
    #[serde(default = "default_point_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default)]
    pub source: PointSourceConfig,
}

/// Which raw feed produces points
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointSourceConfig {
    Udp(UdpConfig),
    Tracker(TrackerConfig),
    Mouse(MouseConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_udp_port")]
    pub port: u16,
    /// Line grammar; must define named groups `x` and `y`
    #[serde(default = "default_udp_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub coordinates: CoordinateSpace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default)]
    pub coordinates: CoordinateSpace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MouseConfig {
    /// How often the last pointer position is re-sampled
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Pixel width of one terminal cell
    #[serde(default = "default_cell_width")]
    pub cell_width: f64,
    /// Pixel height of one terminal cell
    #[serde(default = "default_cell_height")]
    pub cell_height: f64,
}

/// Units a feed reports coordinates in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSpace {
    /// Screen pixels
    #[default]
    Pixels,
    /// 0.0..=1.0 across the screen
    Normalized,
}

/// What decides that a selection fires on a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerConfig {
    Fixation(FixationConfig),
    KeyboardKey { key: String },
    MouseButton { button: ButtonName },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixationConfig {
    #[serde(default = "default_lock_on_time_ms")]
    pub lock_on_time_ms: u64,
    /// Pixels the gaze may wander while locking on
    #[serde(default = "default_lock_on_radius")]
    pub lock_on_radius: f64,
    /// Pixels the gaze may wander once fixating
    #[serde(default = "default_fixation_radius")]
    pub fixation_radius: f64,
    #[serde(default = "default_complete_time_ms")]
    pub complete_time_ms: u64,
    /// Per-key completion times overriding `complete_time_ms`
    #[serde(default)]
    pub complete_times_by_key: HashMap<KeyValue, u64>,
    /// How long the gaze may be lost or out of radius before the fixation resets
    #[serde(default = "default_incomplete_fixation_ttl_ms")]
    pub incomplete_fixation_ttl_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonName {
    Left,
    Right,
    Middle,
}

impl From<ButtonName> for MouseButton {
    fn from(button: ButtonName) -> Self {
        match button {
            ButtonName::Left => MouseButton::Left,
            ButtonName::Right => MouseButton::Right,
            ButtonName::Middle => MouseButton::Middle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default)]
    pub origin_x: f64,
    #[serde(default)]
    pub origin_y: f64,
    #[serde(default = "default_key_size")]
    pub key_width: f64,
    #[serde(default = "default_key_size")]
    pub key_height: f64,
    /// Key labels, top row first
    #[serde(default = "default_rows")]
    pub rows: Vec<Vec<String>>,
}

// Default value helpers
fn default_screen_width() -> f64 {
    1920.0
}
fn default_screen_height() -> f64 {
    1080.0
}
fn default_point_ttl_ms() -> u64 {
    200
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_udp_port() -> u16 {
    11000
}
fn default_udp_pattern() -> String {
    DEFAULT_UDP_PATTERN.to_string()
}
fn default_sample_interval_ms() -> u64 {
    20
}
fn default_cell_width() -> f64 {
    8.0
}
fn default_cell_height() -> f64 {
    16.0
}
fn default_lock_on_time_ms() -> u64 {
    250
}
fn default_lock_on_radius() -> f64 {
    40.0
}
fn default_fixation_radius() -> f64 {
    60.0
}
fn default_complete_time_ms() -> u64 {
    1000
}
fn default_incomplete_fixation_ttl_ms() -> u64 {
    200
}
fn default_key_size() -> f64 {
    48.0
}
fn default_rows() -> Vec<Vec<String>> {
    ["QWERTYUIOP", "ASDFGHJKL", "ZXCVBNM"]
        .iter()
        .map(|row| row.chars().map(String::from).collect())
        .collect()
}
fn default_key_selection() -> TriggerConfig {
    TriggerConfig::Fixation(FixationConfig::default())
}
fn default_point_selection() -> TriggerConfig {
    TriggerConfig::MouseButton {
        button: ButtonName::Left,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            screen: ScreenConfig::default(),
            points: PointsConfig::default(),
            key_selection: default_key_selection(),
            point_selection: default_point_selection(),
            layout: LayoutConfig::default(),
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            width: default_screen_width(),
            height: default_screen_height(),
        }
    }
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_point_ttl_ms(),
            source: PointSourceConfig::default(),
        }
    }
}

impl Default for PointSourceConfig {
    fn default() -> Self {
        Self::Mouse(MouseConfig::default())
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_udp_port(),
            pattern: default_udp_pattern(),
            coordinates: CoordinateSpace::Pixels,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            coordinates: CoordinateSpace::Pixels,
        }
    }
}

impl Default for MouseConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            cell_width: default_cell_width(),
            cell_height: default_cell_height(),
        }
    }
}

impl Default for FixationConfig {
    fn default() -> Self {
        Self {
            lock_on_time_ms: default_lock_on_time_ms(),
            lock_on_radius: default_lock_on_radius(),
            fixation_radius: default_fixation_radius(),
            complete_time_ms: default_complete_time_ms(),
            complete_times_by_key: HashMap::new(),
            incomplete_fixation_ttl_ms: default_incomplete_fixation_ttl_ms(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            key_width: default_key_size(),
            key_height: default_key_size(),
            rows: default_rows(),
        }
    }
}

/// True for finite values above zero
pub(crate) fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

pub(crate) fn millis(field: &str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// A missing file yields the defaults; a file that exists but cannot be
    /// read or fails validation is an error.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load and validate configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the path to the config file
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dwellkey").join("config.toml"))
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> anyhow::Result<Option<PathBuf>> {
        let Some(path) = Self::config_path() else {
            return Ok(None);
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(Some(path))
    }

    pub fn point_ttl(&self) -> Duration {
        Duration::from_millis(self.points.ttl_ms)
    }

    /// Check every value the pipeline depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_positive(self.screen.width) {
            return Err(ConfigError::invalid("screen.width", "must be positive"));
        }
        if !is_positive(self.screen.height) {
            return Err(ConfigError::invalid("screen.height", "must be positive"));
        }
        millis("points.ttl_ms", self.points.ttl_ms)?;

        match &self.points.source {
            PointSourceConfig::Udp(udp) => {
                crate::point::udp::LineGrammar::new(&udp.pattern)?;
            }
            PointSourceConfig::Tracker(tracker) => {
                millis(
                    "points.source.sample_interval_ms",
                    tracker.sample_interval_ms,
                )?;
            }
            PointSourceConfig::Mouse(mouse) => {
                millis("points.source.sample_interval_ms", mouse.sample_interval_ms)?;
                if !is_positive(mouse.cell_width) {
                    return Err(ConfigError::invalid(
                        "points.source.cell_width",
                        "must be positive",
                    ));
                }
                if !is_positive(mouse.cell_height) {
                    return Err(ConfigError::invalid(
                        "points.source.cell_height",
                        "must be positive",
                    ));
                }
            }
        }

        self.key_selection.validate("key_selection")?;
        self.point_selection.validate("point_selection")?;
        Ok(())
    }
}

impl TriggerConfig {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        match self {
            TriggerConfig::Fixation(fixation) => {
                crate::trigger::fixation::FixationSettings::from_config(fixation, field)?;
            }
            TriggerConfig::KeyboardKey { key } => {
                if parse_key_name(key).is_none() {
                    return Err(ConfigError::invalid(
                        format!("{field}.key"),
                        format!("unrecognized key name `{key}`"),
                    ));
                }
            }
            TriggerConfig::MouseButton { .. } => {}
        }
        Ok(())
    }
}
