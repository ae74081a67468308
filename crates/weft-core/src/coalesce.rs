#![forbid(unsafe_code)]

//! Reentrancy-safe listener coalescing.
//!
//! A [`Coalescer`] keeps one open *frame* per target. Mutations run inside
//! [`Coalescer::run_once_after`]; the body receives a [`Collector`] used to
//! contribute listeners. When a frame for the same target is already open
//! further up the call stack, the inner call only contributes to it. The
//! outermost call fires the accumulated, de-duplicated listeners once the body
//! has returned.
//!
//! # Invariants
//!
//! 1. Each listener fires at most once per outermost frame of a target.
//! 2. Listeners fire only after the outermost body returns, in first-collected
//!    order.
//! 3. No internal borrow is held while a body or a listener runs, so listeners
//!    may mutate the graph again (opening fresh frames).
//! 4. Frames for different targets are independent.
//!
//! # Failure Modes
//!
//! - Body panics: the frame is closed without firing.
//! - Body returns `Err`: listeners collected before the error still fire; the
//!   mutation is not rolled back.

use core::cell::RefCell;

use ahash::{AHashMap, AHashSet};

use crate::listeners::{Listener, ListenerId};
use crate::value::ObjId;

#[derive(Debug, Default)]
struct Frame {
    depth: usize,
    pending: Vec<Listener>,
    seen: AHashSet<ListenerId>,
}

/// Pending-notification batches keyed by target.
#[derive(Debug, Default)]
pub struct Coalescer {
    frames: RefCell<AHashMap<ObjId, Frame>>,
}

/// Handle given to a coalesced body for contributing listeners.
pub struct Collector<'a> {
    coalescer: &'a Coalescer,
    target: ObjId,
}

impl Collector<'_> {
    /// Queue listeners for the target's outermost frame.
    pub fn collect(&self, listeners: impl IntoIterator<Item = Listener>) {
        let mut frames = self.coalescer.frames.borrow_mut();
        if let Some(frame) = frames.get_mut(&self.target) {
            for listener in listeners {
                if frame.seen.insert(listener.id()) {
                    frame.pending.push(listener);
                }
            }
        }
    }

    #[must_use]
    pub fn target(&self) -> ObjId {
        self.target
    }
}

struct FrameGuard<'a> {
    coalescer: &'a Coalescer,
    target: ObjId,
    armed: bool,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            // Unwinding out of the body.
            self.coalescer.close(self.target);
        }
    }
}

impl Coalescer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame is currently open for `target`.
    #[must_use]
    pub fn is_open(&self, target: ObjId) -> bool {
        self.frames.borrow().contains_key(&target)
    }

    /// Run `body` inside the coalescing frame for `target`.
    pub fn run_once_after<R>(&self, target: ObjId, body: impl FnOnce(&Collector<'_>) -> R) -> R {
        self.frames.borrow_mut().entry(target).or_default().depth += 1;
        let mut guard = FrameGuard {
            coalescer: self,
            target,
            armed: true,
        };
        let result = body(&Collector {
            coalescer: self,
            target,
        });
        guard.armed = false;
        drop(guard);

        if let Some(pending) = self.close(target) {
            if !pending.is_empty() {
                tracing::trace!(object = %target, listeners = pending.len(), "flushing coalesced writes");
            }
            for listener in pending {
                listener.fire();
            }
        }
        result
    }

    /// Leave one frame level; returns the pending listeners when the
    /// outermost level closes.
    fn close(&self, target: ObjId) -> Option<Vec<Listener>> {
        let mut frames = self.frames.borrow_mut();
        let frame = frames.get_mut(&target)?;
        frame.depth -= 1;
        if frame.depth > 0 {
            return None;
        }
        frames.remove(&target).map(|frame| frame.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counting() -> (Listener, Rc<Cell<u32>>) {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        (Listener::new(move || h.set(h.get() + 1)), hits)
    }

    #[test]
    fn outermost_frame_fires_once() {
        let c = Coalescer::new();
        let (l, hits) = counting();
        c.run_once_after(ObjId::new(1, 0), |outer| {
            outer.collect([l.clone()]);
            c.run_once_after(ObjId::new(1, 0), |inner| {
                inner.collect([l.clone(), l.clone()]);
            });
            assert_eq!(hits.get(), 0, "inner frame must not fire");
        });
        assert_eq!(hits.get(), 1);
        assert!(!c.is_open(ObjId::new(1, 0)));
    }

    #[tracing_test::traced_test]
    #[test]
    fn only_non_empty_flushes_are_traced() {
        let c = Coalescer::new();
        c.run_once_after(ObjId::new(4, 0), |_| {});
        assert!(!logs_contain("flushing coalesced writes"));
        let (l, _) = counting();
        c.run_once_after(ObjId::new(4, 0), |col| col.collect([l]));
        assert!(logs_contain("flushing coalesced writes"));
        assert!(logs_contain("listeners=1"));
    }

    #[test]
    fn listeners_fire_after_body_returns() {
        let c = Coalescer::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o = Rc::clone(&order);
        let l = Listener::new(move || o.borrow_mut().push("listener"));
        c.run_once_after(ObjId::new(1, 0), |col| {
            col.collect([l.clone()]);
            order.borrow_mut().push("body");
        });
        assert_eq!(*order.borrow(), ["body", "listener"]);
    }

    #[test]
    fn different_targets_fire_independently() {
        let c = Coalescer::new();
        let (l, hits) = counting();
        c.run_once_after(ObjId::new(1, 0), |_| {
            c.run_once_after(ObjId::new(2, 0), |col| col.collect([l.clone()]));
            assert_eq!(hits.get(), 1, "frame for #2 closed on its own");
        });
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn listener_may_reenter() {
        let c = Rc::new(Coalescer::new());
        let (inner, inner_hits) = counting();
        let c2 = Rc::clone(&c);
        let outer = Listener::new(move || {
            let inner = inner.clone();
            c2.run_once_after(ObjId::new(1, 0), move |col| col.collect([inner]));
        });
        c.run_once_after(ObjId::new(1, 0), |col| col.collect([outer]));
        assert_eq!(inner_hits.get(), 1);
    }

    #[test]
    fn panicking_body_closes_frame() {
        let c = Coalescer::new();
        let (l, hits) = counting();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            c.run_once_after(ObjId::new(5, 0), |col| {
                col.collect([l.clone()]);
                panic!("boom");
            });
        }));
        assert!(result.is_err());
        assert!(!c.is_open(ObjId::new(5, 0)));
        assert_eq!(hits.get(), 0);
    }
}
