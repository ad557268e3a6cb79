// src/config.rs
//! Scheduler tuning knobs, loadable from TOML.

use serde::{Deserialize, Serialize};

use crate::error::SchedError;

fn default_pool_capacity() -> usize {
    8
}

fn default_fixed_step() -> f32 {
    1.0 / 60.0
}

/// Construction-time settings for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Task handles created eagerly when the pool is built.
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Hard ceiling on pool size. `None` lets the pool grow on demand;
    /// `Some(n)` turns overflow claims into forced recycles of the
    /// least-recently-claimed live task.
    #[serde(default)]
    pub pool_cap: Option<usize>,

    /// Step length, in seconds, used for fixed-timing ticksets minted
    /// through the scheduler.
    #[serde(default = "default_fixed_step")]
    pub fixed_step: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_capacity: default_pool_capacity(),
            pool_cap: None,
            fixed_step: default_fixed_step(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml(input: &str) -> Result<Self, SchedError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SchedError> {
        if !(self.fixed_step > 0.0) {
            return Err(SchedError::Config(format!(
                "fixed_step must be positive, got {}",
                self.fixed_step
            )));
        }
        if let Some(cap) = self.pool_cap {
            if cap == 0 {
                return Err(SchedError::Config("pool_cap must be nonzero".into()));
            }
            if cap < self.pool_capacity {
                return Err(SchedError::Config(format!(
                    "pool_cap ({cap}) below pool_capacity ({})",
                    self.pool_capacity
                )));
            }
        }
        Ok(())
    }
}
