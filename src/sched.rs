// src/sched.rs
//! The front door: owns the task pool, hands out handles, and mints
//! ticksets against the configured fixed step.

use std::rc::Rc;

use tracing::info;

use crate::config::SchedulerConfig;
use crate::error::SchedError;
use crate::task::{TaskHandle, TaskPool};
use crate::tick::{TickDriver, TickTiming, Tickset};
use crate::timer::TimerHandle;
use crate::Pool;

/// Scheduling engine facade. Claims tasks from a shared pool, creates
/// standalone timers, and forwards frame deltas to the driver. Single
/// threaded; clone the inner `Rc` handles freely, not the scheduler.
pub struct Scheduler {
    driver: Rc<TickDriver>,
    pool: Rc<TaskPool>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Builds a scheduler with default settings on an existing driver.
    pub fn new(driver: Rc<TickDriver>) -> Self {
        Self::build(driver, SchedulerConfig::default())
    }

    pub fn with_config(
        driver: Rc<TickDriver>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedError> {
        config.validate()?;
        Ok(Self::build(driver, config))
    }

    fn build(driver: Rc<TickDriver>, config: SchedulerConfig) -> Self {
        let d = driver.clone();
        let pool = Pool::new(
            move || TaskHandle::create(d.clone()),
            config.pool_capacity,
            config.pool_cap,
        );
        info!(
            pool_capacity = config.pool_capacity,
            pool_cap = ?config.pool_cap,
            "scheduler up"
        );
        Self {
            driver,
            pool,
            config,
        }
    }

    // ---------------- handles ----------------

    /// Claims an unbounded task: the action runs every tick (progress 0)
    /// until cancelled, completed, or ended by a condition.
    pub fn task(
        &self,
        action: impl FnMut(f32) + 'static,
        tickset: Option<Tickset>,
    ) -> TaskHandle {
        let task = self.pool.claim_next();
        task.set(Box::new(action), -1.0, tickset);
        task
    }

    /// Claims a timed task: the action receives normalized progress and the
    /// task completes when `duration` seconds have accrued.
    pub fn task_for(
        &self,
        action: impl FnMut(f32) + 'static,
        duration: f32,
        tickset: Option<Tickset>,
    ) -> TaskHandle {
        let task = self.pool.claim_next();
        task.set(Box::new(action), duration, tickset);
        task
    }

    /// Creates a standalone timer; see [`TimerHandle`].
    pub fn timer(&self, duration: f32, count_down: bool, tickset: Option<Tickset>) -> TimerHandle {
        TimerHandle::create(self.driver.clone(), duration, count_down, tickset)
    }

    // ---------------- ticksets ----------------

    /// Mints a fixed-timing tickset using the configured step.
    pub fn fixed_tickset(&self, name: impl Into<String>) -> Result<Tickset, SchedError> {
        self.driver.tickset(
            name,
            TickTiming::Fixed {
                step: self.config.fixed_step,
            },
        )
    }

    /// Mints a variable-timing tickset.
    pub fn variable_tickset(&self, name: impl Into<String>) -> Result<Tickset, SchedError> {
        self.driver.tickset(name, TickTiming::Variable)
    }

    // ---------------- driving ----------------

    /// Forwards one frame delta (seconds) to the driver.
    pub fn tick(&self, delta: f32) {
        self.driver.tick(delta);
    }

    #[inline]
    pub fn driver(&self) -> &Rc<TickDriver> {
        &self.driver
    }

    #[inline]
    pub fn pool(&self) -> &Rc<TaskPool> {
        &self.pool
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Retires every pooled task. Outstanding handles stay valid but inert.
    pub fn shutdown(&self) {
        info!("scheduler shutting down");
        self.pool.clear();
    }
}
