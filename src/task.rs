// src/task.rs
//! The pooled, condition-gated schedulable unit.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::debug;

use crate::base::{self, HandleCore, HasCore, Ownership, TickGate};
use crate::condition::{self, Condition, ConditionKey, EvalMode, FailMode};
use crate::pool::{Pool, Poolable};
use crate::tick::{TickClient, TickDriver, Tickset};

/// Repeat policy applied at iteration boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    /// Complete after the first iteration.
    #[default]
    None,
    /// Restart each iteration from progress 0.
    Loop,
    /// Alternate direction: reverse iterations report `1 - progress`.
    PingPong,
}

pub type ActionFn = Box<dyn FnMut(f32)>;

/// The pool that recycles task handles.
pub type TaskPool = Pool<TaskHandle>;

pub(crate) struct TaskInner {
    core: HandleCore,
    loop_mode: LoopMode,
    reverse: bool,
    action: Option<ActionFn>,
    conditions: Vec<(ConditionKey, Condition)>,
    next_condition: u64,
    eval_mode: EvalMode,
    fail_mode: FailMode,
    pool: Weak<TaskPool>,
}

impl TaskInner {
    fn new() -> Self {
        Self {
            core: HandleCore::new(),
            loop_mode: LoopMode::None,
            reverse: false,
            action: None,
            conditions: Vec::new(),
            next_condition: 0,
            eval_mode: EvalMode::All,
            fail_mode: FailMode::End,
            pool: Weak::new(),
        }
    }

    fn wipe(&mut self) {
        self.action = None;
        self.conditions.clear();
        self.eval_mode = EvalMode::All;
        self.fail_mode = FailMode::End;
        self.loop_mode = LoopMode::None;
        self.reverse = false;
        self.core.wipe();
    }
}

impl HasCore for TaskInner {
    fn core(&self) -> &HandleCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut HandleCore {
        &mut self.core
    }
}

/// A pooled handle for deferred or repeating work. Cheap to clone; clones
/// share one instance. Configuration methods take `&self` and return
/// `&Self` for chaining.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Rc<RefCell<TaskInner>>,
    driver: Rc<TickDriver>,
}

impl TaskHandle {
    pub(crate) fn create(driver: Rc<TickDriver>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TaskInner::new())),
            driver,
        }
    }

    #[inline]
    fn handle_id(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    // ---------------- initialization ----------------

    /// Arms the handle for a use-cycle: per-tick action, target duration in
    /// seconds (`<= 0` = unbounded), tickset (`None` = driver default).
    pub(crate) fn set(&self, action: ActionFn, duration: f32, tickset: Option<Tickset>) -> &Self {
        {
            let mut t = self.inner.borrow_mut();
            t.action = Some(action);
            t.core.target_duration = duration;
        }
        self.set_tick(tickset);
        self
    }

    /// Moves the handle to another tickset.
    pub fn assign_tickset(&self, tickset: Tickset) -> &Self {
        self.set_tick(Some(tickset));
        self
    }

    fn set_tick(&self, requested: Option<Tickset>) {
        let resolved = self.driver.resolve(requested);
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
    }

    // ---------------- lifetime ----------------

    /// Starts the task: fires `on_begin`, then starts time measurement.
    /// Nothing ticks before this.
    pub fn begin(&self) -> &Self {
        base::begin(&self.inner);
        self
    }

    /// Stops accrual and skips ticking until [`resume`](Self::resume).
    pub fn pause(&self) -> &Self {
        base::pause(&self.inner);
        self
    }

    pub fn resume(&self) -> &Self {
        base::resume(&self.inner);
        self
    }

    /// Rewinds to a fresh start point (loop counters and callbacks kept)
    /// and runs the begin sequence again.
    pub fn restart(&self) -> &Self {
        base::restart(&self.inner);
        self
    }

    /// Ends immediately, skipping `on_complete`, and hands the instance
    /// back to its pool. Safe to call from inside this task's callbacks.
    pub fn cancel(&self) -> &Self {
        debug!(task = self.handle_id(), "task cancelled");
        self.end_task();
        self
    }

    /// Fires `on_complete`, then ends like [`cancel`](Self::cancel).
    pub fn complete(&self) -> &Self {
        self.complete_now();
        self
    }

    fn complete_now(&self) {
        if let Some(mut f) = base::take_on_complete(&self.inner) {
            f();
        }
        self.end_task();
    }

    fn end_task(&self) {
        let pool = {
            let mut t = self.inner.borrow_mut();
            if t.core.ownership != Ownership::Claimed {
                return;
            }
            t.core.stop();
            t.pool.upgrade()
        };
        match pool {
            Some(pool) => pool.relinquish_instance(self),
            // an orphaned handle still has to go inert
            None => Poolable::relinquish(self),
        }
    }

    // ---------------- loop configuration ----------------

    /// Target loop count; `<= 0` is unbounded. Implies `LoopMode::Loop`
    /// when no mode was chosen yet.
    pub fn loop_count(&self, count: i32) -> &Self {
        let mut t = self.inner.borrow_mut();
        t.core.target_loops = count;
        if t.loop_mode == LoopMode::None {
            t.loop_mode = LoopMode::Loop;
        }
        self
    }

    /// Loop policy; picking one without a prior `loop_count` means
    /// unbounded.
    pub fn loop_mode(&self, mode: LoopMode) -> &Self {
        let mut t = self.inner.borrow_mut();
        if t.loop_mode == LoopMode::None && mode != LoopMode::None {
            t.core.target_loops = -1;
        }
        t.loop_mode = mode;
        self
    }

    // ---------------- callbacks ----------------

    pub fn on_begin(&self, f: impl FnMut() + 'static) -> &Self {
        self.inner.borrow_mut().core.on_begin = Some(Box::new(f));
        self
    }

    /// Fires at each loop boundary with the just-completed iteration count.
    pub fn on_loop(&self, f: impl FnMut(u32) + 'static) -> &Self {
        self.inner.borrow_mut().core.on_loop = Some(Box::new(f));
        self
    }

    pub fn on_complete(&self, f: impl FnMut() + 'static) -> &Self {
        self.inner.borrow_mut().core.on_complete = Some(Box::new(f));
        self
    }

    // ---------------- conditions ----------------

    /// Appends a gating predicate; the returned key removes it again.
    pub fn add_condition(&self, condition: impl Fn() -> bool + 'static) -> ConditionKey {
        let mut t = self.inner.borrow_mut();
        t.next_condition += 1;
        let key = ConditionKey(t.next_condition);
        t.conditions.push((key, Box::new(condition)));
        key
    }

    /// Chainable [`add_condition`](Self::add_condition) for predicates that
    /// never need removal.
    pub fn with_condition(&self, condition: impl Fn() -> bool + 'static) -> &Self {
        self.add_condition(condition);
        self
    }

    pub fn remove_condition(&self, key: ConditionKey) -> &Self {
        self.inner
            .borrow_mut()
            .conditions
            .retain(|(k, _)| *k != key);
        self
    }

    pub fn evaluation_mode(&self, mode: EvalMode) -> &Self {
        self.inner.borrow_mut().eval_mode = mode;
        self
    }

    pub fn fail_mode(&self, mode: FailMode) -> &Self {
        self.inner.borrow_mut().fail_mode = mode;
        self
    }

    // ---------------- accessors ----------------

    /// Normalized progress of the current iteration; stays 0 for unbounded
    /// tasks.
    pub fn progress(&self) -> f32 {
        self.inner.borrow().core.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.borrow().core.elapsed()
    }

    pub fn loop_elapsed(&self) -> Duration {
        self.inner.borrow().core.loop_elapsed()
    }

    /// Iterations completed so far.
    pub fn loops_completed(&self) -> u32 {
        self.inner.borrow().core.loop_count
    }

    /// True while a ping-pong task is in a reverse iteration.
    pub fn reverse_flag(&self) -> bool {
        self.inner.borrow().reverse
    }

    pub fn is_available(&self) -> bool {
        self.inner.borrow().core.ownership == Ownership::Available
    }

    pub fn is_paused(&self) -> bool {
        self.inner.borrow().core.paused
    }

    // ---------------- tick path ----------------

    /// Per-tick hook: conditions gate the action. Predicates and the action
    /// run with no borrow held and are only put back if the handle survived
    /// them un-wiped.
    fn run_tick(&self) {
        let (conds, eval_mode, epoch) = {
            let mut t = self.inner.borrow_mut();
            (std::mem::take(&mut t.conditions), t.eval_mode, t.core.epoch)
        };

        let passed = condition::evaluate(eval_mode, conds.iter().map(|(_, c)| c));

        {
            let mut t = self.inner.borrow_mut();
            if t.core.epoch == epoch {
                // conditions added from inside a predicate land after the
                // originals
                let mut restored = conds;
                restored.append(&mut t.conditions);
                t.conditions = restored;
            }
        }

        if passed {
            let (action, shown) = {
                let mut t = self.inner.borrow_mut();
                if t.core.epoch != epoch {
                    return;
                }
                if t.core.gated {
                    t.core.ungate();
                }
                let p = t.core.progress;
                let shown = if t.reverse { 1.0 - p } else { p };
                (t.action.take(), shown)
            };
            if let Some(mut f) = action {
                f(shown);
                let mut t = self.inner.borrow_mut();
                if t.core.epoch == epoch && t.action.is_none() {
                    t.action = Some(f);
                }
            }
        } else {
            let fail_mode = {
                let t = self.inner.borrow();
                if t.core.epoch != epoch {
                    return;
                }
                t.fail_mode
            };
            match fail_mode {
                FailMode::End => {
                    debug!(task = self.handle_id(), "conditions failed, ending task");
                    self.end_task();
                }
                FailMode::Pause => self.inner.borrow_mut().core.gate(),
            }
        }
    }

    /// Iteration boundary: loop again or complete.
    fn iteration_end(&self) {
        enum Next {
            Looped(Option<base::LoopFn>, u32, u64),
            Complete,
        }

        let next = {
            let mut t = self.inner.borrow_mut();
            let looping = t.loop_mode != LoopMode::None
                && (t.core.target_loops <= 0
                    || i64::from(t.core.loop_count) + 1 < i64::from(t.core.target_loops));
            if looping {
                t.core.loop_count += 1;
                t.reverse = match t.loop_mode {
                    LoopMode::Loop => false,
                    LoopMode::PingPong => !t.reverse,
                    LoopMode::None => unreachable!("looping with LoopMode::None"),
                };
                t.core.task_looped();
                Next::Looped(t.core.on_loop.take(), t.core.loop_count, t.core.epoch)
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

impl TickClient for TaskHandle {
    fn tick(&self, delta: f32) {
        let gate = self.inner.borrow_mut().core.pre_tick(delta);
        match gate {
            TickGate::Skip => {}
            TickGate::IterationEnd => self.iteration_end(),
            TickGate::Run => self.run_tick(),
        }
    }

    fn client_id(&self) -> usize {
        self.handle_id()
    }
}

impl Poolable for TaskHandle {
    fn on_pooled(&self, pool: &Rc<TaskPool>) {
        self.inner.borrow_mut().pool = Rc::downgrade(pool);
    }

    fn claim(&self) {
        self.inner.borrow_mut().core.ownership = Ownership::Claimed;
        debug!(task = self.handle_id(), "task claimed");
    }

    fn relinquish(&self) {
        let mut t = self.inner.borrow_mut();
        t.core.ownership = Ownership::Available;
        t.wipe();
        debug!(task = self.handle_id(), "task relinquished");
    }

    fn recycle(&self) {
        self.inner.borrow_mut().wipe();
        debug!(task = self.handle_id(), "task recycled in place");
    }

    fn retire(&self) {
        let tickset = self.inner.borrow().core.tickset;
        if let Some(ts) = tickset {
            self.driver.unregister(self.handle_id(), ts);
        }
        debug!(task = self.handle_id(), "task retired");
    }

    fn available(&self) -> bool {
        self.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::TickTiming;
    use std::cell::{Cell, RefCell as StdRefCell};

    fn fixture() -> (Rc<TickDriver>, Rc<TaskPool>) {
        let driver = TickDriver::new();
        let d = driver.clone();
        let pool = Pool::new(move || TaskHandle::create(d.clone()), 2, None);
        (driver, pool)
    }

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
    fn timed_task_completes_once_and_relinquishes() {
        let (driver, pool) = fixture();
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let (completes, on_complete) = counter();

        let task = pool.claim_next();
        let s = seen.clone();
        task.set(Box::new(move |p| s.borrow_mut().push(p)), 2.0, None);
        task.on_complete(on_complete).begin();

        drive(&driver, 25, 0.1); // 2.5s against a 2.0s target

        assert_eq!(completes.get(), 1);
        assert!(task.is_available());
        // progress passed through ~0.5 around the 1.0s mark
        assert!(seen.borrow().iter().any(|p| (*p - 0.5).abs() < 0.06));
        assert!(seen.borrow().iter().all(|p| *p <= 1.0 + 1e-5));
    }

    #[test]
    fn unstarted_task_does_not_tick() {
        let (driver, pool) = fixture();
        let calls = Rc::new(Cell::new(0u32));
        let task = pool.claim_next();
        let c = calls.clone();
        task.set(Box::new(move |_| c.set(c.get() + 1)), 1.0, None);

        drive(&driver, 10, 0.1);
        assert_eq!(calls.get(), 0, "no ticks before begin()");
        assert!(!task.is_available());
    }

    #[test]
    fn loop_mode_loop_runs_target_iterations() {
        let (driver, pool) = fixture();
        let loops = Rc::new(StdRefCell::new(Vec::new()));
        let (completes, on_complete) = counter();

        let task = pool.claim_next();
        task.set(Box::new(|_| {}), 0.5, None);
        let l = loops.clone();
        task.loop_count(3)
            .on_loop(move |i| l.borrow_mut().push(i))
            .on_complete(on_complete)
            .begin();

        drive(&driver, 40, 0.05); // 2.0s across three 0.5s iterations

        assert_eq!(*loops.borrow(), vec![1, 2]);
        assert_eq!(completes.get(), 1);
        assert!(task.is_available());
    }

    #[test]
    fn ping_pong_flips_reverse_flag_each_boundary() {
        let (driver, pool) = fixture();
        let task = pool.claim_next();
        task.set(Box::new(|_| {}), 0.2, None);
        task.loop_mode(LoopMode::PingPong).loop_count(4).begin();

        assert!(!task.reverse_flag());

        drive(&driver, 4, 0.06); // past first boundary
        assert_eq!(task.loops_completed(), 1);
        assert!(task.reverse_flag());

        drive(&driver, 4, 0.06); // past second boundary
        assert_eq!(task.loops_completed(), 2);
        assert!(!task.reverse_flag());
    }

    #[test]
    fn ping_pong_reports_inverted_progress_in_reverse_phase() {
        let (driver, pool) = fixture();
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let task = pool.claim_next();
        let s = seen.clone();
        task.set(Box::new(move |p| s.borrow_mut().push(p)), 0.2, None);
        task.loop_mode(LoopMode::PingPong).loop_count(2).begin();

        drive(&driver, 5, 0.06); // one tick into the reverse phase
        let last = *seen.borrow().last().unwrap();
        assert!(last > 0.65, "reverse phase reports 1 - progress, got {last}");
    }

    #[test]
    fn unbounded_loop_runs_until_cancelled() {
        let (driver, pool) = fixture();
        let (completes, on_complete) = counter();
        let task = pool.claim_next();
        task.set(Box::new(|_| {}), 0.1, None);
        task.loop_mode(LoopMode::Loop)
            .on_complete(on_complete)
            .begin();

        drive(&driver, 50, 0.05);
        assert!(task.loops_completed() > 10);
        assert!(!task.is_available());

        task.cancel();
        assert!(task.is_available());
        assert_eq!(completes.get(), 0, "cancel skips on_complete");
    }

    #[test]
    fn unbounded_task_is_condition_driven_until_cancel() {
        let (driver, pool) = fixture();
        let calls = Rc::new(Cell::new(0u32));
        let task = pool.claim_next();
        let c = calls.clone();
        task.set(
            Box::new(move |p| {
                assert_eq!(p, 0.0);
                c.set(c.get() + 1);
            }),
            -1.0,
            None,
        );
        task.begin();

        drive(&driver, 10, 0.1);
        assert_eq!(calls.get(), 10);
        task.cancel();
        drive(&driver, 5, 0.1);
        assert_eq!(calls.get(), 10);
    }

    #[test]
    fn failing_condition_with_end_mode_cancels() {
        let (driver, pool) = fixture();
        let calls = Rc::new(Cell::new(0u32));
        let (completes, on_complete) = counter();

        let task = pool.claim_next();
        let c = calls.clone();
        task.set(Box::new(move |_| c.set(c.get() + 1)), 5.0, None);
        task.with_condition(|| false)
            .fail_mode(FailMode::End)
            .on_complete(on_complete)
            .begin();

        drive(&driver, 3, 0.1);
        assert_eq!(calls.get(), 0);
        assert_eq!(completes.get(), 0);
        assert!(task.is_available());
    }

    #[test]
    fn failing_condition_with_pause_mode_holds_then_resumes() {
        let (driver, pool) = fixture();
        let open = Rc::new(Cell::new(false));
        let seen = Rc::new(StdRefCell::new(Vec::new()));

        let task = pool.claim_next();
        let s = seen.clone();
        task.set(Box::new(move |p| s.borrow_mut().push(p)), 1.0, None);
        let gate = open.clone();
        task.with_condition(move || gate.get())
            .fail_mode(FailMode::Pause)
            .begin();

        drive(&driver, 5, 0.1);
        assert!(seen.borrow().is_empty(), "held task never runs its action");
        let held_elapsed = task.elapsed();
        drive(&driver, 5, 0.1);
        assert_eq!(task.elapsed(), held_elapsed, "no accrual while held");

        open.set(true);
        drive(&driver, 5, 0.1);
        assert_eq!(seen.borrow().len(), 5);
        assert!(task.elapsed() > held_elapsed);
    }

    #[test]
    fn one_mode_passes_with_any_true_condition() {
        let (driver, pool) = fixture();
        let calls = Rc::new(Cell::new(0u32));
        let task = pool.claim_next();
        let c = calls.clone();
        task.set(Box::new(move |_| c.set(c.get() + 1)), -1.0, None);
        task.with_condition(|| false)
            .with_condition(|| true)
            .evaluation_mode(EvalMode::One)
            .fail_mode(FailMode::End)
            .begin();

        drive(&driver, 3, 0.1);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn removing_a_condition_unblocks_the_task() {
        let (driver, pool) = fixture();
        let calls = Rc::new(Cell::new(0u32));
        let task = pool.claim_next();
        let c = calls.clone();
        task.set(Box::new(move |_| c.set(c.get() + 1)), -1.0, None);
        let key = task.add_condition(|| false);
        task.fail_mode(FailMode::Pause).begin();

        drive(&driver, 3, 0.1);
        assert_eq!(calls.get(), 0);

        task.remove_condition(key);
        drive(&driver, 3, 0.1);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn pause_and_resume_freeze_elapsed() {
        let (driver, pool) = fixture();
        let task = pool.claim_next();
        task.set(Box::new(|_| {}), 10.0, None);
        task.begin();

        drive(&driver, 5, 0.1);
        task.pause();
        let frozen = task.elapsed();
        drive(&driver, 5, 0.1);
        assert_eq!(task.elapsed(), frozen);
        assert!(task.is_paused());

        task.resume();
        drive(&driver, 5, 0.1);
        assert!(task.elapsed() > frozen);
    }

    #[test]
    fn restart_rewinds_progress() {
        let (driver, pool) = fixture();
        let task = pool.claim_next();
        task.set(Box::new(|_| {}), 1.0, None);
        task.begin();

        drive(&driver, 5, 0.1);
        assert!(task.progress() > 0.4);

        task.restart();
        assert_eq!(task.elapsed(), Duration::ZERO);
        drive(&driver, 1, 0.1);
        assert!(task.progress() < 0.2);
    }

    #[test]
    fn cancel_from_inside_action_is_safe() {
        let (driver, pool) = fixture();
        let (completes, on_complete) = counter();
        let task = pool.claim_next();
        let me = task.clone();
        task.set(
            Box::new(move |p| {
                if p > 0.5 {
                    me.cancel();
                }
            }),
            1.0,
            None,
        );
        task.on_complete(on_complete).begin();

        drive(&driver, 20, 0.1);
        assert!(task.is_available());
        assert_eq!(completes.get(), 0);
    }

    #[test]
    fn complete_from_inside_action_fires_on_complete_once() {
        let (driver, pool) = fixture();
        let (completes, on_complete) = counter();
        let task = pool.claim_next();
        let me = task.clone();
        task.set(
            Box::new(move |p| {
                if p > 0.5 {
                    me.complete();
                }
            }),
            1.0,
            None,
        );
        task.on_complete(on_complete).begin();

        drive(&driver, 20, 0.1);
        assert!(task.is_available());
        assert_eq!(completes.get(), 1);
    }

    #[test]
    fn reused_handle_behaves_like_fresh() {
        let (driver, pool) = fixture();
        let first_calls = Rc::new(Cell::new(0u32));
        let (first_completes, first_on_complete) = counter();

        let task = pool.claim_next();
        let id = task.client_id();
        let c = first_calls.clone();
        task.set(Box::new(move |_| c.set(c.get() + 1)), 0.3, None);
        task.with_condition(|| true)
            .on_complete(first_on_complete)
            .begin();
        drive(&driver, 10, 0.05);
        assert!(task.is_available());
        assert_eq!(first_completes.get(), 1);
        let first_call_count = first_calls.get();

        // same instance comes back out of the pool
        let again = pool.claim_next();
        assert_eq!(again.client_id(), id);

        let second_calls = Rc::new(Cell::new(0u32));
        let c = second_calls.clone();
        again.set(Box::new(move |_| c.set(c.get() + 1)), 0.3, None);
        again.begin();
        drive(&driver, 10, 0.05);

        assert!(again.is_available());
        assert_eq!(first_completes.get(), 1, "no leaked completion callback");
        assert_eq!(first_calls.get(), first_call_count, "no leaked action");
        assert!(second_calls.get() > 0);
        assert_eq!(again.loops_completed(), 0);
    }

    #[test]
    fn reassigning_tickset_moves_registration() {
        let (driver, pool) = fixture();
        let other = driver.tickset("slow", TickTiming::Variable).unwrap();

        let task = pool.claim_next();
        task.set(Box::new(|_| {}), 1.0, None);
        assert_eq!(driver.client_count(driver.default_tickset()).unwrap(), 1);

        task.assign_tickset(other);
        assert_eq!(driver.client_count(driver.default_tickset()).unwrap(), 0);
        assert_eq!(driver.client_count(other).unwrap(), 1);
    }
}
