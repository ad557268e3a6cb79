//! # TICKWORK
//! Cooperative task and timer scheduling driven by an external tick source.
//!
//! The host application calls [`TickDriver::tick`] once per frame with that
//! frame's delta; everything else happens inside that call. Tasks are pooled
//! handles that run a closure each tick, optionally gated by conditions and
//! bounded by a duration; timers are standalone handles that measure time
//! in the driver's domain rather than on the wall clock.
//!
//! ## Design
//! * **Single-threaded by construction:** handles are `Rc`-backed and share
//!   one driver; nothing here is `Send`.
//! * **Tickset time domains:** clients group into ticksets that can be
//!   paused or time-scaled independently, with variable or fixed stepping.
//! * **Pooled tasks:** task handles cycle Claimed/Available through a pool
//!   instead of being allocated per use.
//! * **Re-entrancy safe:** user callbacks may cancel, complete, or schedule
//!   work on any handle, including their own, mid-tick.

mod base;
mod condition;
mod config;
mod error;
mod pool;
mod sched;
mod task;
mod tick;
mod timer;

pub use base::Ownership;
pub use condition::{Condition, ConditionKey, EvalMode, FailMode};
pub use config::SchedulerConfig;
pub use error::SchedError;
pub use pool::{Pool, Poolable};
pub use sched::Scheduler;
pub use task::{ActionFn, LoopMode, TaskHandle, TaskPool};
pub use tick::{TickClient, TickDriver, TickTiming, Tickset};
pub use timer::{TimerHandle, UpdateFn};
