use crate::config::{is_positive, LayoutConfig};
use crate::error::ConfigError;
use crate::point::Point;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a logical key on the on-screen keyboard
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyValue(String);

impl KeyValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyValue {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Hit-tests a point against the currently displayed key layout.
pub trait KeyLocator: Send + Sync {
    fn key_at(&self, point: Point) -> Option<KeyValue>;
}

impl<F> KeyLocator for F
where
    F: Fn(Point) -> Option<KeyValue> + Send + Sync,
{
    fn key_at(&self, point: Point) -> Option<KeyValue> {
        self(point)
    }
}

/// Screen rectangle occupied by one key, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl KeyBounds {
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }
}

/// Rows of equally sized keys laid out from an origin.
#[derive(Debug, Clone)]
pub struct GridLayout {
    keys: Vec<(KeyValue, KeyBounds)>,
}

impl GridLayout {
    pub fn from_config(config: &LayoutConfig) -> Result<Self, ConfigError> {
        if !is_positive(config.key_width) {
            return Err(ConfigError::invalid("layout.key_width", "must be positive"));
        }
        if !is_positive(config.key_height) {
            return Err(ConfigError::invalid("layout.key_height", "must be positive"));
        }

        let mut keys = Vec::new();
        for (row_idx, row) in config.rows.iter().enumerate() {
            for (col_idx, label) in row.iter().enumerate() {
                let bounds = KeyBounds {
                    x: config.origin_x + col_idx as f64 * config.key_width,
                    y: config.origin_y + row_idx as f64 * config.key_height,
                    width: config.key_width,
                    height: config.key_height,
                };
                keys.push((KeyValue::new(label.as_str()), bounds));
            }
        }

        Ok(Self { keys })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyLocator for GridLayout {
    fn key_at(&self, point: Point) -> Option<KeyValue> {
        self.keys
            .iter()
            .find(|(_, bounds)| bounds.contains(point))
            .map(|(key, _)| key.clone())
    }
}
