// src/base.rs
use std::cell::RefCell;
use std::time::Duration;

use tracing::trace;

use crate::tick::Tickset;

pub type BeginFn = Box<dyn FnMut()>;
pub type LoopFn = Box<dyn FnMut(u32)>;
pub type CompleteFn = Box<dyn FnMut()>;

/// Ownership states of a poolable handle. `Available` instances sit idle and
/// are ignored by the tick path; `Claimed` instances are live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Available,
    Claimed,
}

// ----------------------------- stopwatch -----------------------------

/// Accrues time from the deltas the tick driver delivers, so elapsed time
/// lives in the handle's tickset time domain (scaled, pausable) rather than
/// on the wall clock.
#[derive(Debug, Default)]
pub(crate) struct Stopwatch {
    elapsed: Duration,
    running: bool,
}

impl Stopwatch {
    #[inline]
    pub fn start(&mut self) {
        self.running = true;
    }

    #[inline]
    pub fn stop(&mut self) {
        self.running = false;
    }

    #[inline]
    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
        self.running = false;
    }

    #[inline]
    pub fn advance(&mut self, delta: Duration) {
        if self.running {
            self.elapsed += delta;
        }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

// ----------------------------- tick gate -----------------------------

/// What the shared tick entry decided for this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickGate {
    /// Not claimed, not begun, or explicitly paused.
    Skip,
    /// Loop-elapsed time overflowed the target duration.
    IterationEnd,
    /// Forward to the concrete handle's per-tick hook.
    Run,
}

// ----------------------------- handle core -----------------------------

/// Lifecycle state machine shared by task and timer handles: ownership,
/// pause gating, elapsed-time measurement, loop bookkeeping, and the
/// optional lifecycle callbacks.
pub(crate) struct HandleCore {
    pub ownership: Ownership,
    /// Explicit `pause()`: the tick entry skips the handle entirely.
    pub paused: bool,
    /// Held by a failed condition (fail mode `Pause`): time accrual stops
    /// but the per-tick hook still runs so conditions can be re-evaluated.
    pub gated: bool,
    pub begun: bool,

    pub progress: f32,
    /// Target duration in seconds; `<= 0` means unbounded.
    pub target_duration: f32,

    pub loop_count: u32,
    /// `<= 0` means unbounded.
    pub target_loops: i32,

    /// Bumped on every wipe. Callbacks taken out of the handle for
    /// invocation are only put back if the epoch is unchanged, which makes
    /// cancel-from-inside-a-callback safe.
    pub epoch: u64,

    pub tickset: Option<Tickset>,

    pub on_begin: Option<BeginFn>,
    pub on_loop: Option<LoopFn>,
    pub on_complete: Option<CompleteFn>,

    stopwatch: Stopwatch,
    prior_loops: Duration,
}

impl HandleCore {
    pub fn new() -> Self {
        Self {
            ownership: Ownership::Available,
            paused: false,
            gated: false,
            begun: false,
            progress: 0.0,
            target_duration: 0.0,
            loop_count: 0,
            target_loops: 0,
            epoch: 0,
            tickset: None,
            on_begin: None,
            on_loop: None,
            on_complete: None,
            stopwatch: Stopwatch::default(),
            prior_loops: Duration::ZERO,
        }
    }

    /// Total time accrued since the handle began running.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.stopwatch.elapsed()
    }

    /// Elapsed time within the current loop iteration.
    #[inline]
    pub fn loop_elapsed(&self) -> Duration {
        self.stopwatch.elapsed().saturating_sub(self.prior_loops)
    }

    /// Marks the handle begun and starts accrual (unless held).
    pub fn start_run(&mut self) {
        self.begun = true;
        if !self.paused && !self.gated {
            self.stopwatch.start();
        }
        trace!(target_duration = self.target_duration, "run started");
    }

    /// Rewinds measurement to a fresh start point. Loop counters and
    /// callbacks are untouched.
    pub fn reset_run(&mut self) {
        self.stopwatch.reset();
        self.prior_loops = Duration::ZERO;
        self.progress = 0.0;
    }

    pub fn pause(&mut self) {
        self.stopwatch.stop();
        self.paused = true;
        trace!("paused");
    }

    pub fn resume(&mut self) {
        self.paused = false;
        if self.begun && !self.gated {
            self.stopwatch.start();
        }
        trace!("resumed");
    }

    /// Condition-failure hold: accrual stops, ticking continues.
    pub fn gate(&mut self) {
        self.stopwatch.stop();
        self.gated = true;
    }

    pub fn ungate(&mut self) {
        self.gated = false;
        if self.begun && !self.paused {
            self.stopwatch.start();
        }
    }

    pub fn stop(&mut self) {
        self.stopwatch.stop();
    }

    /// Loop-boundary bookkeeping: progress back to zero, the finished
    /// iteration's time folded into the carried offset. The stopwatch keeps
    /// running; elapsed time is cumulative across loops.
    pub fn task_looped(&mut self) {
        self.progress = 0.0;
        self.prior_loops = self.stopwatch.elapsed();
        trace!(loop_count = self.loop_count, "loop boundary");
    }

    /// Shared tick entry. Gating and progress accounting happen here; the
    /// concrete handle only sees `Run` / `IterationEnd`.
    pub fn pre_tick(&mut self, delta: f32) -> TickGate {
        if self.ownership != Ownership::Claimed || self.paused || !self.begun {
            return TickGate::Skip;
        }

        self.stopwatch.advance(Duration::from_secs_f32(delta.max(0.0)));

        if self.target_duration > 0.0 {
            self.progress = self.loop_elapsed().as_secs_f32() / self.target_duration;
            if self.progress > 1.0 {
                return TickGate::IterationEnd;
            }
        }

        TickGate::Run
    }

    /// Resets all mutable run state to defaults for the next use-cycle.
    /// Ownership, the tickset registration, and the pool backlink are
    /// managed by the pool/driver hooks, not here.
    pub fn wipe(&mut self) {
        self.paused = false;
        self.gated = false;
        self.begun = false;
        self.progress = 0.0;
        self.target_duration = 0.0;
        self.loop_count = 0;
        self.target_loops = 0;
        self.stopwatch.reset();
        self.prior_loops = Duration::ZERO;
        self.on_begin = None;
        self.on_loop = None;
        self.on_complete = None;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

// ----------------------------- shared lifecycle ops -----------------------------

/// Access seam for the shared lifecycle operations below; implemented by the
/// concrete handles' inner state.
pub(crate) trait HasCore {
    fn core(&self) -> &HandleCore;
    fn core_mut(&mut self) -> &mut HandleCore;
}

/// Starts a claimed handle: fires `on_begin`, then starts measurement. The
/// callback runs with no borrow held; it is only put back if the handle was
/// not wiped underneath it.
pub(crate) fn begin<T: HasCore>(cell: &RefCell<T>) {
    let (cb, epoch) = {
        let mut h = cell.borrow_mut();
        let c = h.core_mut();
        if c.ownership != Ownership::Claimed {
            return;
        }
        (c.on_begin.take(), c.epoch)
    };

    if let Some(mut f) = cb {
        f();
        let mut h = cell.borrow_mut();
        let c = h.core_mut();
        if c.epoch == epoch && c.on_begin.is_none() {
            c.on_begin = Some(f);
        }
    }

    let mut h = cell.borrow_mut();
    let c = h.core_mut();
    if c.epoch == epoch {
        c.start_run();
    }
}

pub(crate) fn pause<T: HasCore>(cell: &RefCell<T>) {
    let mut h = cell.borrow_mut();
    let c = h.core_mut();
    if c.ownership == Ownership::Claimed {
        c.pause();
    }
}

pub(crate) fn resume<T: HasCore>(cell: &RefCell<T>) {
    let mut h = cell.borrow_mut();
    let c = h.core_mut();
    if c.ownership == Ownership::Claimed {
        c.resume();
    }
}

/// Restart: fresh measurement start point, then the begin sequence again
/// (including `on_begin`). Loop counters and callbacks survive.
pub(crate) fn restart<T: HasCore>(cell: &RefCell<T>) {
    {
        let mut h = cell.borrow_mut();
        let c = h.core_mut();
        if c.ownership != Ownership::Claimed {
            return;
        }
        c.reset_run();
    }
    begin(cell);
}

/// Pulls the completion callback out of a claimed handle. The caller invokes
/// it (borrow-free) and then ends the task; there is no put-back because the
/// handle is wiped on relinquish either way.
pub(crate) fn take_on_complete<T: HasCore>(cell: &RefCell<T>) -> Option<CompleteFn> {
    let mut h = cell.borrow_mut();
    let c = h.core_mut();
    if c.ownership != Ownership::Claimed {
        return None;
    }
    c.on_complete.take()
}
