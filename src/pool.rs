// src/pool.rs
//! Poolable-handle lifecycle: claim, relinquish, forced recycle, retire.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, warn};

/// The lifecycle contract a pooled handle implements. The pool invokes
/// every method except relinquishment requests, which flow the other way
/// (a finishing handle asks its pool to take it back).
pub trait Poolable: Clone {
    /// Called once when the instance is adopted by a pool.
    fn on_pooled(&self, pool: &Rc<Pool<Self>>)
    where
        Self: Sized;

    /// Available -> Claimed.
    fn claim(&self);

    /// Claimed -> Available; all mutable state wiped to defaults.
    fn relinquish(&self);

    /// Forced wipe without an ownership change (reuse of a live instance).
    fn recycle(&self);

    /// Permanent removal from the pool; drops tick registration.
    fn retire(&self);

    fn available(&self) -> bool;
}

struct PoolEntry<P> {
    item: P,
    claim_stamp: u64,
}

/// Fixed-purpose object pool: every instance it ever creates stays owned
/// here for the lifetime of the pool, cycling Claimed <-> Available.
pub struct Pool<P: Poolable> {
    make: Box<dyn Fn() -> P>,
    entries: RefCell<Vec<PoolEntry<P>>>,
    claim_seq: Cell<u64>,
    cap: Option<usize>,
}

impl<P: Poolable> Pool<P> {
    /// `initial` instances are created eagerly; `cap`, when set, bounds the
    /// pool size and turns overflow claims into forced recycles.
    pub fn new(make: impl Fn() -> P + 'static, initial: usize, cap: Option<usize>) -> Rc<Self> {
        let pool = Rc::new(Self {
            make: Box::new(make),
            entries: RefCell::new(Vec::new()),
            claim_seq: Cell::new(0),
            cap,
        });
        for _ in 0..initial {
            let item = (pool.make)();
            item.on_pooled(&pool);
            pool.entries.borrow_mut().push(PoolEntry {
                item,
                claim_stamp: 0,
            });
        }
        debug!(initial, cap = ?cap, "pool created");
        pool
    }

    fn next_stamp(&self) -> u64 {
        let stamp = self.claim_seq.get() + 1;
        self.claim_seq.set(stamp);
        stamp
    }

    /// Returns a claimed instance: the first Available one, a freshly grown
    /// one, or — at the cap — the least-recently-claimed live instance,
    /// forcibly recycled.
    pub fn claim_next(self: &Rc<Self>) -> P {
        let stamp = self.next_stamp();

        {
            let mut entries = self.entries.borrow_mut();
            if let Some(entry) = entries.iter_mut().find(|e| e.item.available()) {
                entry.claim_stamp = stamp;
                let item = entry.item.clone();
                drop(entries);
                item.claim();
                return item;
            }
        }

        if let Some(cap) = self.cap {
            let len = self.entries.borrow().len();
            if len >= cap && len > 0 {
                let victim = {
                    let mut entries = self.entries.borrow_mut();
                    let idx = entries
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, e)| e.claim_stamp)
                        .map(|(i, _)| i);
                    idx.map(|i| {
                        entries[i].claim_stamp = stamp;
                        entries[i].item.clone()
                    })
                };
                if let Some(item) = victim {
                    warn!(cap, "pool at capacity; recycling oldest claimed instance");
                    item.recycle();
                    return item;
                }
            }
        }

        let item = (self.make)();
        item.on_pooled(self);
        self.entries.borrow_mut().push(PoolEntry {
            item: item.clone(),
            claim_stamp: stamp,
        });
        item.claim();
        item
    }

    /// Hands a finished instance back. Safe to call twice; the second call
    /// is a no-op.
    pub fn relinquish_instance(&self, item: &P) {
        if item.available() {
            return;
        }
        item.relinquish();
    }

    /// Retires every instance and empties the pool.
    pub fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        debug!(count = entries.len(), "pool cleared");
        for entry in entries {
            entry.item.retire();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn available_count(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|e| e.item.available())
            .count()
    }
}
