// src/tick.rs
//! The per-frame dispatcher: ticksets (independently pausable/scalable time
//! domains), client registration, and fixed/variable step delivery.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::error::SchedError;

/// Opaque grouping token for a time domain minted by a [`TickDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tickset(pub(crate) usize);

/// How a tickset converts frame deltas into client callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickTiming {
    /// Pass the (scaled) frame delta straight through, once per frame.
    Variable,
    /// Accumulate deltas and deliver zero or more whole steps per frame.
    Fixed { step: f32 },
}

/// A client the driver ticks once per frame. The fixed and variable entries
/// default to the unified hook; the driver picks the entry matching the
/// tickset's timing.
pub trait TickClient {
    /// Unified per-frame hook; `delta` is in seconds.
    fn tick(&self, delta: f32);

    fn tick_fixed(&self, delta: f32) {
        self.tick(delta);
    }

    fn tick_variable(&self, delta: f32) {
        self.tick(delta);
    }

    /// Stable identity for registration bookkeeping.
    fn client_id(&self) -> usize;
}

struct TicksetEntry {
    name: String,
    timing: TickTiming,
    paused: bool,
    scale: f32,
    accumulator: f32,
    clients: Vec<Rc<dyn TickClient>>,
}

impl TicksetEntry {
    fn new(name: String, timing: TickTiming) -> Self {
        Self {
            name,
            timing,
            paused: false,
            scale: 1.0,
            accumulator: 0.0,
            clients: Vec::new(),
        }
    }
}

enum PendingOp {
    Register {
        tickset: Tickset,
        client: Rc<dyn TickClient>,
    },
    Unregister {
        tickset: Tickset,
        client: usize,
    },
}

enum Dispatch {
    Variable {
        clients: Vec<Rc<dyn TickClient>>,
        delta: f32,
    },
    Fixed {
        clients: Vec<Rc<dyn TickClient>>,
        step: f32,
        steps: u32,
    },
}

// ----------------------------- driver -----------------------------

/// Single-threaded per-frame dispatcher. All mutation is interior so that
/// handles and the scheduler can share one `Rc<TickDriver>`; registration
/// changes issued from inside a tick pass (a callback scheduling new work)
/// are deferred and applied at the end of the pass, in order.
pub struct TickDriver {
    ticksets: RefCell<Vec<TicksetEntry>>,
    pending: RefCell<Vec<PendingOp>>,
    ticking: Cell<bool>,
    default: Tickset,
}

impl TickDriver {
    /// Creates a driver with a default variable-step tickset named "main".
    pub fn new() -> Rc<Self> {
        let driver = Rc::new(Self {
            ticksets: RefCell::new(Vec::new()),
            pending: RefCell::new(Vec::new()),
            ticking: Cell::new(false),
            default: Tickset(0),
        });
        driver
            .ticksets
            .borrow_mut()
            .push(TicksetEntry::new("main".into(), TickTiming::Variable));
        driver
    }

    #[inline]
    pub fn default_tickset(&self) -> Tickset {
        self.default
    }

    /// Mints a new tickset. Fixed timing must carry a positive step.
    pub fn tickset(
        &self,
        name: impl Into<String>,
        timing: TickTiming,
    ) -> Result<Tickset, SchedError> {
        if let TickTiming::Fixed { step } = timing {
            if !(step > 0.0) {
                return Err(SchedError::Config(format!(
                    "fixed tickset step must be positive, got {step}"
                )));
            }
        }
        let name = name.into();
        let mut sets = self.ticksets.borrow_mut();
        sets.push(TicksetEntry::new(name.clone(), timing));
        let ts = Tickset(sets.len() - 1);
        debug!(tickset = ?ts, name = %name, "tickset created");
        Ok(ts)
    }

    pub fn set_paused(&self, tickset: Tickset, paused: bool) -> Result<(), SchedError> {
        let mut sets = self.ticksets.borrow_mut();
        let entry = sets
            .get_mut(tickset.0)
            .ok_or(SchedError::UnknownTickset(tickset))?;
        entry.paused = paused;
        debug!(tickset = ?tickset, name = %entry.name, paused, "tickset pause toggled");
        Ok(())
    }

    /// Time scale applied to every delta this tickset delivers; floored at 0.
    pub fn set_timescale(&self, tickset: Tickset, scale: f32) -> Result<(), SchedError> {
        let mut sets = self.ticksets.borrow_mut();
        let entry = sets
            .get_mut(tickset.0)
            .ok_or(SchedError::UnknownTickset(tickset))?;
        entry.scale = scale.max(0.0);
        Ok(())
    }

    pub fn client_count(&self, tickset: Tickset) -> Result<usize, SchedError> {
        let sets = self.ticksets.borrow();
        sets.get(tickset.0)
            .map(|e| e.clients.len())
            .ok_or(SchedError::UnknownTickset(tickset))
    }

    /// Maps an optional caller-supplied token onto a tickset this driver
    /// owns, falling back to the default for foreign tokens.
    pub(crate) fn resolve(&self, requested: Option<Tickset>) -> Tickset {
        match requested {
            None => self.default,
            Some(ts) if ts.0 < self.ticksets.borrow().len() => ts,
            Some(ts) => {
                warn!(tickset = ?ts, "unknown tickset, falling back to default");
                self.default
            }
        }
    }

    // ---------------- registration ----------------

    pub(crate) fn register(&self, client: Rc<dyn TickClient>, tickset: Tickset) {
        if self.ticking.get() {
            self.pending
                .borrow_mut()
                .push(PendingOp::Register { tickset, client });
            return;
        }
        self.apply_register(client, tickset);
    }

    pub(crate) fn unregister(&self, client: usize, tickset: Tickset) {
        if self.ticking.get() {
            self.pending
                .borrow_mut()
                .push(PendingOp::Unregister { tickset, client });
            return;
        }
        self.apply_unregister(client, tickset);
    }

    fn apply_register(&self, client: Rc<dyn TickClient>, tickset: Tickset) {
        let mut sets = self.ticksets.borrow_mut();
        let Some(entry) = sets.get_mut(tickset.0) else {
            warn!(tickset = ?tickset, "register against unknown tickset dropped");
            return;
        };
        let id = client.client_id();
        if entry.clients.iter().any(|c| c.client_id() == id) {
            debug!(client = id, tickset = ?tickset, "duplicate registration ignored");
            return;
        }
        trace!(client = id, tickset = ?tickset, "client registered");
        entry.clients.push(client);
    }

    fn apply_unregister(&self, client: usize, tickset: Tickset) {
        let mut sets = self.ticksets.borrow_mut();
        let Some(entry) = sets.get_mut(tickset.0) else {
            return;
        };
        entry.clients.retain(|c| c.client_id() != client);
        trace!(client, tickset = ?tickset, "client unregistered");
    }

    fn drain_pending(&self) {
        let ops = std::mem::take(&mut *self.pending.borrow_mut());
        for op in ops {
            match op {
                PendingOp::Register { tickset, client } => self.apply_register(client, tickset),
                PendingOp::Unregister { tickset, client } => {
                    self.apply_unregister(client, tickset)
                }
            }
        }
    }

    // ---------------- driving ----------------

    /// Drives every non-paused tickset once with this frame's delta
    /// (seconds). Client lists are snapshotted per tickset so no driver
    /// borrow is held while user code runs.
    pub fn tick(&self, frame_delta: f32) {
        if self.ticking.replace(true) {
            warn!("re-entrant TickDriver::tick ignored");
            return;
        }
        let delta = if frame_delta.is_finite() {
            frame_delta.max(0.0)
        } else {
            0.0
        };

        let count = self.ticksets.borrow().len();
        for idx in 0..count {
            let dispatch = {
                let mut sets = self.ticksets.borrow_mut();
                let entry = &mut sets[idx];
                if entry.paused {
                    None
                } else {
                    let scaled = delta * entry.scale;
                    match entry.timing {
                        TickTiming::Variable => Some(Dispatch::Variable {
                            clients: entry.clients.clone(),
                            delta: scaled,
                        }),
                        TickTiming::Fixed { step } => {
                            entry.accumulator += scaled;
                            let steps = (entry.accumulator / step) as u32;
                            entry.accumulator -= steps as f32 * step;
                            Some(Dispatch::Fixed {
                                clients: entry.clients.clone(),
                                step,
                                steps,
                            })
                        }
                    }
                }
            };

            match dispatch {
                None => {}
                Some(Dispatch::Variable { clients, delta }) => {
                    for client in &clients {
                        client.tick_variable(delta);
                    }
                }
                Some(Dispatch::Fixed {
                    clients,
                    step,
                    steps,
                }) => {
                    for _ in 0..steps {
                        for client in &clients {
                            client.tick_fixed(step);
                        }
                    }
                }
            }
        }

        self.ticking.set(false);
        self.drain_pending();
    }
}
