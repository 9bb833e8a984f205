//! Event loop configuration
//!
//! Loaded from JSON, with every field optional:
//!
//! ```json
//! { "max_microtasks_per_tick": 512 }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default microtask budget per tick (starvation protection)
pub const DEFAULT_MICROTASK_BUDGET: usize = 10_000;

/// Configuration for the cooperative event loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Maximum number of microtasks drained in one tick. Microtasks beyond
    /// the budget stay queued, in order, for the next tick.
    pub max_microtasks_per_tick: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            max_microtasks_per_tick: DEFAULT_MICROTASK_BUDGET,
        }
    }
}

impl EventLoopConfig {
    /// Parse a configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EventLoopConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Reject values the event loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_microtasks_per_tick == 0 {
            return Err(Error::config("max_microtasks_per_tick must be at least 1"));
        }
        Ok(())
    }
}
