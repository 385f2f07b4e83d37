//! Hydration Work Queue
//!
//! A state change during hydration must trigger another pass, but running
//! that pass from inside the evaluation that caused it would nest passes on
//! the call stack without bound. Instead, requests go into a queue and a
//! single drain loop (a trampoline) runs them one after another.
//!
//! # Algorithm
//!
//! 1. `request` records a target. A pending full-document pass absorbs
//!    every other request, and requesting a full pass drops pending subtree
//!    passes, since it covers them.
//! 2. Whoever finds the queue idle becomes the drainer by taking a
//!    [`DrainGuard`]. Requests made while a drain is running only enqueue.
//! 3. The drainer pops targets until the queue is empty. The guard clears
//!    the draining flag on drop, even if a pass panics.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::dom::NodeId;

/// What a hydration pass starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The whole document, recorded in the performance log.
    Document,
    /// One element and its descendants.
    Subtree(NodeId),
}

impl From<Option<NodeId>> for Target {
    fn from(node: Option<NodeId>) -> Self {
        node.map_or(Target::Document, Target::Subtree)
    }
}

/// Pending hydration passes.
#[derive(Debug, Default)]
pub struct HydrationQueue {
    pending: RefCell<VecDeque<Target>>,
    draining: Cell<bool>,
}

impl HydrationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a pass. Returns whether the queue grew.
    pub fn request(&self, target: Target) -> bool {
        let mut pending = self.pending.borrow_mut();
        if pending.contains(&Target::Document) || pending.contains(&target) {
            return false;
        }
        if target == Target::Document {
            pending.clear();
        }
        pending.push_back(target);
        true
    }

    /// Become the drainer, unless a drain is already running.
    pub fn begin_drain(&self) -> Option<DrainGuard<'_>> {
        if self.draining.replace(true) {
            return None;
        }
        Some(DrainGuard { queue: self })
    }

    pub fn is_draining(&self) -> bool {
        self.draining.get()
    }

    pub fn next(&self) -> Option<Target> {
        self.pending.borrow_mut().pop_front()
    }

    pub fn clear(&self) {
        self.pending.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }
}

/// Marks the queue as draining for as long as it lives.
pub struct DrainGuard<'a> {
    queue: &'a HydrationQueue,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.queue.draining.set(false);
    }
}

#[cfg(test)]
mod tests {
    use slotmap::KeyData;

    use super::*;

    fn node(n: u64) -> NodeId {
        KeyData::from_ffi(n).into()
    }

    #[test]
    fn test_document_pass_absorbs_other_requests() {
        let queue = HydrationQueue::new();
        assert!(queue.request(Target::Subtree(node(3))));
        assert!(queue.request(Target::Document));
        assert_eq!(queue.len(), 1);
        assert!(!queue.request(Target::Subtree(node(4))));
        assert!(!queue.request(Target::Document));
        assert_eq!(queue.next(), Some(Target::Document));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicate_subtree_requests_coalesce() {
        let queue = HydrationQueue::new();
        assert!(queue.request(Target::Subtree(node(1))));
        assert!(!queue.request(Target::Subtree(node(1))));
        assert!(queue.request(Target::Subtree(node(2))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_only_one_drainer_at_a_time() {
        let queue = HydrationQueue::new();
        {
            let guard = queue.begin_drain();
            assert!(guard.is_some());
            assert!(queue.is_draining());
            assert!(queue.begin_drain().is_none());
        }
        assert!(!queue.is_draining());
        assert!(queue.begin_drain().is_some());
    }
}
