use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::orchestra::{OrchestraError, Result};

/// Knobs of a run, every field falls back to its default when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Input pairs per workload when none are given on the command line.
    pub iterations: usize,
    /// Progress reporting cadence, in percent.
    pub progress_step: u8,
    /// Bound on the wait for every worker to check out, unbounded when absent.
    pub deadline_ms: Option<u64>,
    /// Seed for input generation, drawn at random when absent.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            progress_step: 10,
            deadline_ms: None,
            seed: None,
        }
    }
}

impl RunConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    /// Returns an `OrchestraError` if the JSON is malformed or a value is out of range.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    /// Returns an `OrchestraError` if the file can't be read or `from_json` fails.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.progress_step) {
            return Err(OrchestraError::InvalidConfig(format!(
                "progress_step must be within 1..=100, got {}",
                self.progress_step
            )));
        }
        if self.deadline_ms == Some(0) {
            return Err(OrchestraError::InvalidConfig(
                "deadline_ms must be positive when set".into(),
            ));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}
