// src/timer.rs
//! Standalone timers: unpooled handles that count up or down against a
//! target duration and drop their tick registration when they finish.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::base::{self, HandleCore, HasCore, LoopFn, Ownership, TickGate};
use crate::tick::{TickClient, TickDriver, Tickset};

pub type UpdateFn = Box<dyn FnMut(&TimerHandle)>;

pub(crate) struct TimerInner {
    core: HandleCore,
    on_update: Option<UpdateFn>,
    count_down: bool,
}

impl TimerInner {
    fn new() -> Self {
        Self {
            core: HandleCore::new(),
            on_update: None,
            count_down: false,
        }
    }
}

impl HasCore for TimerInner {
    fn core(&self) -> &HandleCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut HandleCore {
        &mut self.core
    }
}

/// A single-use timer handle. Unlike tasks these are not pooled: each one
/// is created claimed and unregisters itself from the driver when it ends.
/// Cheap to clone; configuration methods chain.
#[derive(Clone)]
pub struct TimerHandle {
    inner: Rc<RefCell<TimerInner>>,
    driver: Rc<TickDriver>,
}

impl TimerHandle {
    /// Creates a claimed, registered timer. `duration <= 0` means an open
    /// stopwatch that runs until cancelled.
    pub(crate) fn create(
        driver: Rc<TickDriver>,
        duration: f32,
        count_down: bool,
        tickset: Option<Tickset>,
    ) -> Self {
        let handle = Self {
            inner: Rc::new(RefCell::new(TimerInner::new())),
            driver,
        };
        {
            let mut t = handle.inner.borrow_mut();
            t.core.ownership = Ownership::Claimed;
            t.core.target_duration = duration;
            t.count_down = count_down;
        }
        let resolved = handle.driver.resolve(tickset);
        handle
            .driver
            .register(Rc::new(handle.clone()), resolved);
        handle.inner.borrow_mut().core.tickset = Some(resolved);
        debug!(timer = handle.handle_id(), duration, count_down, "timer created");
        handle
    }

    #[inline]
    fn handle_id(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    /// Moves the timer to another tickset.
    pub fn assign_tickset(&self, tickset: Tickset) -> &Self {
        let resolved = self.driver.resolve(Some(tickset));
        let current = self.inner.borrow().core.tickset;
        match current {
            None => self.driver.register(Rc::new(self.clone()), resolved),
            Some(cur) if cur != resolved => {
                self.driver.unregister(self.handle_id(), cur);
                self.driver.register(Rc::new(self.clone()), resolved);
            }
            Some(_) => {}
        }
        self.inner.borrow_mut().core.tickset = Some(resolved);
        self
    }

    // ---------------- lifetime ----------------

    /// Starts the timer: fires `on_begin`, then starts accrual.
    pub fn begin(&self) -> &Self {
        base::begin(&self.inner);
        self
    }

    pub fn pause(&self) -> &Self {
        base::pause(&self.inner);
        self
    }

    pub fn resume(&self) -> &Self {
        base::resume(&self.inner);
        self
    }

    /// Rewinds to zero and runs the begin sequence again.
    pub fn restart(&self) -> &Self {
        base::restart(&self.inner);
        self
    }

    /// Ends immediately, skipping `on_complete`.
    pub fn cancel(&self) -> &Self {
        debug!(timer = self.handle_id(), "timer cancelled");
        self.end_timer();
        self
    }

    /// Fires `on_complete`, then ends.
    pub fn complete(&self) -> &Self {
        self.complete_now();
        self
    }

    fn complete_now(&self) {
        if let Some(mut f) = base::take_on_complete(&self.inner) {
            f();
        }
        self.end_timer();
    }

    /// Teardown: stop, drop the tick registration, wipe, go Available.
    /// There is no pool to return to; a finished timer is simply inert.
    fn end_timer(&self) {
        let tickset = {
            let mut t = self.inner.borrow_mut();
            if t.core.ownership != Ownership::Claimed {
                return;
            }
            t.core.stop();
            t.core.tickset.take()
        };
        if let Some(ts) = tickset {
            self.driver.unregister(self.handle_id(), ts);
        }
        let mut t = self.inner.borrow_mut();
        t.on_update = None;
        t.count_down = false;
        t.core.wipe();
        t.core.ownership = Ownership::Available;
        debug!(timer = self.handle_id(), "timer ended");
    }

    // ---------------- configuration ----------------

    /// Number of times the timer runs its duration; `<= 0` leaves it
    /// single-shot.
    pub fn loop_count(&self, count: i32) -> &Self {
        self.inner.borrow_mut().core.target_loops = count;
        self
    }

    pub fn on_begin(&self, f: impl FnMut() + 'static) -> &Self {
        self.inner.borrow_mut().core.on_begin = Some(Box::new(f));
        self
    }

    /// Per-tick observer; receives the handle so it can read elapsed time.
    pub fn on_update(&self, f: impl FnMut(&TimerHandle) + 'static) -> &Self {
        self.inner.borrow_mut().on_update = Some(Box::new(f));
        self
    }

    pub fn on_loop(&self, f: impl FnMut(u32) + 'static) -> &Self {
        self.inner.borrow_mut().core.on_loop = Some(Box::new(f));
        self
    }

    pub fn on_complete(&self, f: impl FnMut() + 'static) -> &Self {
        self.inner.borrow_mut().core.on_complete = Some(Box::new(f));
        self
    }

    // ---------------- accessors ----------------

    pub fn elapsed(&self) -> Duration {
        self.inner.borrow().core.elapsed()
    }

    pub fn loop_elapsed(&self) -> Duration {
        self.inner.borrow().core.loop_elapsed()
    }

    /// Time left in the current iteration; zero for open timers.
    pub fn remaining(&self) -> Duration {
        let t = self.inner.borrow();
        if t.core.target_duration <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f32(t.core.target_duration).saturating_sub(t.core.loop_elapsed())
    }

    /// Progress through the current iteration in `[0, 1]`. Count-down
    /// timers report the inverse so the value runs 1 -> 0.
    pub fn normalized_progress(&self) -> f32 {
        let t = self.inner.borrow();
        if t.count_down {
            (1.0 - t.core.progress).max(0.0)
        } else {
            t.core.progress
        }
    }

    pub fn loops_completed(&self) -> u32 {
        self.inner.borrow().core.loop_count
    }

    pub fn is_count_down(&self) -> bool {
        self.inner.borrow().count_down
    }

    /// True while the timer is live and its current iteration has time
    /// left. Open timers stay active until cancelled.
    pub fn timer_active(&self) -> bool {
        let t = self.inner.borrow();
        t.core.ownership == Ownership::Claimed
            && !(t.core.target_duration > 0.0
                && t.core.loop_elapsed().as_secs_f32() >= t.core.target_duration)
    }

    pub fn is_available(&self) -> bool {
        self.inner.borrow().core.ownership == Ownership::Available
    }

    pub fn is_paused(&self) -> bool {
        self.inner.borrow().core.paused
    }

    // ---------------- tick path ----------------

    fn run_update(&self) {
        let (cb, epoch) = {
            let mut t = self.inner.borrow_mut();
            (t.on_update.take(), t.core.epoch)
        };
        if let Some(mut f) = cb {
            f(self);
            let mut t = self.inner.borrow_mut();
            if t.core.epoch == epoch && t.on_update.is_none() {
                t.on_update = Some(f);
            }
        }
    }

    /// Iteration boundary. Bounded timers fold into the next iteration
    /// until the target count is reached; open-count timers complete on
    /// their first boundary.
    fn iteration_end(&self) {
        enum Next {
            Looped(Option<LoopFn>, u32, u64),
            Complete,
        }

        let next = {
            let mut t = self.inner.borrow_mut();
            if t.core.target_loops > 0 {
                t.core.loop_count += 1;
                if i64::from(t.core.loop_count) < i64::from(t.core.target_loops) {
                    t.core.task_looped();
                    Next::Looped(t.core.on_loop.take(), t.core.loop_count, t.core.epoch)
                } else {
                    Next::Complete
                }
            } else {
                Next::Complete
            }
        };

        match next {
            Next::Looped(cb, index, epoch) => {
                if let Some(mut f) = cb {
                    f(index);
                    let mut t = self.inner.borrow_mut();
                    if t.core.epoch == epoch && t.core.on_loop.is_none() {
                        t.core.on_loop = Some(f);
                    }
                }
            }
            Next::Complete => self.complete_now(),
        }
    }
}

impl TickClient for TimerHandle {
    fn tick(&self, delta: f32) {
        let gate = self.inner.borrow_mut().core.pre_tick(delta);
        match gate {
            TickGate::Skip => {}
            TickGate::IterationEnd => self.iteration_end(),
            TickGate::Run => self.run_update(),
        }
    }

    fn client_id(&self) -> usize {
        self.handle_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell as StdRefCell};

    fn drive(driver: &TickDriver, frames: u32, dt: f32) {
        for _ in 0..frames {
            driver.tick(dt);
        }
    }

    fn counter() -> (Rc<Cell<u32>>, impl FnMut() + 'static) {
        let count = Rc::new(Cell::new(0u32));
        let c = count.clone();
        (count, move || c.set(c.get() + 1))
    }

    #[test]
    fn single_shot_timer_completes_and_unregisters() {
        let driver = TickDriver::new();
        let (completes, on_complete) = counter();
        let updates = Rc::new(Cell::new(0u32));

        let timer = TimerHandle::create(driver.clone(), 1.0, false, None);
        assert_eq!(driver.client_count(driver.default_tickset()).unwrap(), 1);

        let u = updates.clone();
        timer
            .on_update(move |_| u.set(u.get() + 1))
            .on_complete(on_complete)
            .begin();

        drive(&driver, 6, 0.25); // 1.5s against a 1.0s target
        assert_eq!(completes.get(), 1);
        assert!(timer.is_available());
        assert!(!timer.timer_active());
        assert_eq!(driver.client_count(driver.default_tickset()).unwrap(), 0);

        let after = updates.get();
        drive(&driver, 5, 0.25);
        assert_eq!(updates.get(), after, "no updates after completion");
    }

    #[test]
    fn bounded_loops_fire_on_loop_then_complete() {
        let driver = TickDriver::new();
        let loops = Rc::new(StdRefCell::new(Vec::new()));
        let (completes, on_complete) = counter();

        let timer = TimerHandle::create(driver.clone(), 5.0, false, None);
        let l = loops.clone();
        timer
            .loop_count(3)
            .on_loop(move |i| l.borrow_mut().push(i))
            .on_complete(on_complete)
            .begin();

        drive(&driver, 40, 0.5); // 20s, three 5s iterations

        assert_eq!(*loops.borrow(), vec![1, 2]);
        assert_eq!(completes.get(), 1);
        assert!(timer.is_available());
    }

    #[test]
    fn open_timer_runs_until_cancelled() {
        let driver = TickDriver::new();
        let (completes, on_complete) = counter();
        let timer = TimerHandle::create(driver.clone(), -1.0, false, None);
        timer.on_complete(on_complete).begin();

        drive(&driver, 20, 0.5);
        assert!(timer.timer_active());
        assert!((timer.elapsed().as_secs_f32() - 10.0).abs() < 1e-3);

        timer.cancel();
        assert!(timer.is_available());
        assert_eq!(completes.get(), 0);
        assert_eq!(driver.client_count(driver.default_tickset()).unwrap(), 0);
    }

    #[test]
    fn count_down_reports_inverted_progress_and_remaining() {
        let driver = TickDriver::new();
        let timer = TimerHandle::create(driver.clone(), 2.0, true, None);
        timer.begin();

        drive(&driver, 1, 0.5);
        assert!((timer.normalized_progress() - 0.75).abs() < 1e-3);
        assert!((timer.remaining().as_secs_f32() - 1.5).abs() < 1e-3);

        drive(&driver, 2, 0.5);
        assert!((timer.normalized_progress() - 0.25).abs() < 1e-3);
    }

    #[test]
    fn count_up_progress_runs_zero_to_one() {
        let driver = TickDriver::new();
        let timer = TimerHandle::create(driver.clone(), 2.0, false, None);
        timer.begin();

        drive(&driver, 1, 0.5);
        assert!((timer.normalized_progress() - 0.25).abs() < 1e-3);
    }

    #[test]
    fn pause_freezes_and_resume_continues() {
        let driver = TickDriver::new();
        let timer = TimerHandle::create(driver.clone(), 10.0, false, None);
        timer.begin();

        drive(&driver, 4, 0.25);
        timer.pause();
        let frozen = timer.elapsed();
        drive(&driver, 4, 0.25);
        assert_eq!(timer.elapsed(), frozen);

        timer.resume();
        drive(&driver, 4, 0.25);
        assert!(timer.elapsed() > frozen);
    }

    #[test]
    fn restart_rewinds_and_refires_on_begin() {
        let driver = TickDriver::new();
        let begins = Rc::new(Cell::new(0u32));
        let timer = TimerHandle::create(driver.clone(), 10.0, false, None);
        let b = begins.clone();
        timer.on_begin(move || b.set(b.get() + 1)).begin();
        assert_eq!(begins.get(), 1);

        drive(&driver, 4, 0.25);
        timer.restart();
        assert_eq!(begins.get(), 2);
        assert_eq!(timer.elapsed(), Duration::ZERO);
    }

    #[test]
    fn cancel_from_inside_on_update_is_safe() {
        let driver = TickDriver::new();
        let (completes, on_complete) = counter();
        let timer = TimerHandle::create(driver.clone(), 10.0, false, None);
        timer
            .on_update(|t| {
                if t.elapsed().as_secs_f32() > 1.0 {
                    t.cancel();
                }
            })
            .on_complete(on_complete)
            .begin();

        drive(&driver, 10, 0.25);
        assert!(timer.is_available());
        assert_eq!(completes.get(), 0);
    }

    #[test]
    fn unbegun_timer_does_not_accrue() {
        let driver = TickDriver::new();
        let timer = TimerHandle::create(driver.clone(), 1.0, false, None);
        drive(&driver, 10, 0.25);
        assert_eq!(timer.elapsed(), Duration::ZERO);
        assert!(timer.timer_active());
    }
}
