//! A lock-free, append-only list of slots used both to track hazard pointers that are
//! currently protected by a reader and to hold pointers that have been retired but not
//! yet reclaimed.
//!
//! Slots are never unlinked once appended; only a slot's `value` toggles between a
//! payload address and the empty sentinel (`null`). This sidesteps reclaiming list
//! nodes themselves — the very problem this crate solves one layer up — at the cost of
//! the list only ever growing to its high-water mark of concurrent entries.

use core::ptr;

cfg_if::cfg_if! {
    if #[cfg(feature = "check-loom")] {
        use loom::sync::atomic::{AtomicPtr, Ordering};
    } else {
        use core::sync::atomic::{AtomicPtr, Ordering};
    }
}

/// One node in a [`List`]. `next` is written once, before the node is published via a
/// CAS on `head`, and is never mutated afterward — so reading it without an atomic is
/// sound once the node is reachable at all.
struct Slot {
    value: AtomicPtr<()>,
    next: *const Slot,
}

unsafe impl Send for Slot {}
unsafe impl Sync for Slot {}

/// A handle to a slot just claimed by [`List::insert_or_append`], letting the caller
/// attempt to clear the exact slot it just won without rescanning the list.
pub(crate) struct Handle<'a> {
    slot: &'a Slot,
}

impl Handle<'_> {
    /// Attempt to clear this slot back to empty, but only if it still holds `expected`.
    pub(crate) fn try_clear(&self, expected: *mut ()) -> bool {
        self.slot
            .value
            .compare_exchange(expected, ptr::null_mut(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[derive(Debug)]
pub(crate) struct List {
    head: AtomicPtr<Slot>,
}

#[cfg(not(feature = "check-loom"))]
impl List {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

#[cfg(feature = "check-loom")]
impl List {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl List {
    /// Claim the first empty slot found while scanning from `head`, or append a fresh
    /// slot if none is free. Returns a handle to the slot now holding `val`.
    ///
    /// `val` must not be null — null is the list's internal empty sentinel.
    pub(crate) fn insert_or_append(&self, val: *mut ()) -> Handle<'_> {
        debug_assert!(!val.is_null(), "cannot insert the empty sentinel");

        if let Some(slot) = self.try_claim_empty(val) {
            return Handle { slot };
        }

        let new_slot = Box::into_raw(Box::new(Slot {
            value: AtomicPtr::new(val),
            next: ptr::null(),
        }));

        loop {
            let head = self.head.load(Ordering::SeqCst);
            // SAFETY: `new_slot` isn't reachable from any other thread yet, so writing
            // `next` directly (rather than through an atomic) is sound.
            unsafe {
                (*new_slot).next = head;
            }
            if self
                .head
                .compare_exchange_weak(head, new_slot, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Handle {
                    slot: unsafe { &*new_slot },
                };
            }
        }
    }

    fn try_claim_empty(&self, val: *mut ()) -> Option<&Slot> {
        let mut cur = self.head.load(Ordering::SeqCst);
        while !cur.is_null() {
            let slot = unsafe { &*cur };
            if slot.value.load(Ordering::SeqCst).is_null()
                && slot
                    .value
                    .compare_exchange(ptr::null_mut(), val, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                return Some(slot);
            }
            cur = slot.next as *mut Slot;
        }
        None
    }

    /// Clear the first slot found holding `val`. Returns whether such a slot was found.
    /// Does not unlink the slot.
    pub(crate) fn remove(&self, val: *mut ()) -> bool {
        let mut cur = self.head.load(Ordering::SeqCst);
        while !cur.is_null() {
            let slot = unsafe { &*cur };
            if slot
                .value
                .compare_exchange(val, ptr::null_mut(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
            cur = slot.next as *mut Slot;
        }
        false
    }

    /// Best-effort snapshot: true if some slot currently holds `val`.
    pub(crate) fn contains(&self, val: *mut ()) -> bool {
        let mut cur = self.head.load(Ordering::SeqCst);
        while !cur.is_null() {
            let slot = unsafe { &*cur };
            if slot.value.load(Ordering::SeqCst) == val {
                return true;
            }
            cur = slot.next as *mut Slot;
        }
        false
    }

    /// Best-effort snapshot of every non-empty value currently in the list, in LIFO
    /// (head-first) order.
    pub(crate) fn snapshot(&self) -> Vec<*mut ()> {
        let mut out = Vec::new();
        let mut cur = self.head.load(Ordering::SeqCst);
        while !cur.is_null() {
            let slot = unsafe { &*cur };
            let val = slot.value.load(Ordering::SeqCst);
            if !val.is_null() {
                out.push(val);
            }
            cur = slot.next as *mut Slot;
        }
        out
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Drop for List {
    /// Frees every slot. Not thread-safe — `&mut self` is what makes this sound; callers
    /// must guarantee quiescence before a `List` (or its owning `Domain`) is dropped.
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::SeqCst);
        while !cur.is_null() {
            // SAFETY: every slot still chained from `head` was allocated with
            // `Box::into_raw` in `insert_or_append` and never freed elsewhere.
            let boxed = unsafe { Box::from_raw(cur) };
            cur = boxed.next as *mut Slot;
        }
    }
}

#[cfg(all(test, not(feature = "check-loom")))]
mod tests {
    use super::List;
    use std::sync::Arc;
    use std::thread;

    // S1 in the spec's test scenarios: basic insert / iterate / contains / remove / reuse.
    #[test]
    fn list_basic_scenario() {
        let list = List::new();
        let w1 = 0xdeadbeefusize as *mut ();
        let w2 = 0xdeafbabeusize as *mut ();
        let w3 = 0xbadf00dusize as *mut ();
        let w4 = 0xba5eba11usize as *mut ();

        list.insert_or_append(w1);
        list.insert_or_append(w2);
        list.insert_or_append(w3);

        assert_eq!(list.snapshot(), vec![w3, w2, w1]);

        assert!(list.contains(w3));
        assert!(!list.contains(w4));

        assert!(list.remove(w3));
        assert!(!list.remove(w4));

        assert!(!list.contains(w3));
        assert!(list.contains(w1));
        assert_eq!(list.snapshot(), vec![w2, w1]);

        // Re-inserting should reuse the slot we just cleared (the head of the list,
        // since `remove` cleared it in place rather than unlinking it), so the order
        // comes back exactly as it was.
        list.insert_or_append(w3);
        assert_eq!(list.snapshot(), vec![w3, w2, w1]);
    }

    #[test]
    fn removal_does_not_unlink() {
        let list = List::new();
        let w1 = 0x1usize as *mut ();
        list.insert_or_append(w1);
        assert!(list.remove(w1));
        // the slot is still there, just empty: a subsequent insert of a *different*
        // value must not grow the list.
        let w2 = 0x2usize as *mut ();
        list.insert_or_append(w2);
        assert_eq!(list.snapshot(), vec![w2]);
    }

    #[test]
    fn slot_reuse_after_partial_removal() {
        let list = List::new();
        let values: Vec<*mut ()> = (1usize..=8).map(|v| v as *mut ()).collect();
        for v in &values {
            list.insert_or_append(*v);
        }
        for v in &values[0..3] {
            assert!(list.remove(*v));
        }
        assert_eq!(list.snapshot().len(), 5);

        // inserting 3 new values should reuse the 3 cleared slots, not grow the list.
        let fresh: Vec<*mut ()> = (100usize..103).map(|v| v as *mut ()).collect();
        for v in &fresh {
            list.insert_or_append(*v);
        }
        assert_eq!(list.snapshot().len(), 8);
    }

    #[test]
    fn contains_reflects_membership() {
        let list = List::new();
        let v = 0x42usize as *mut ();
        assert!(!list.contains(v));
        list.insert_or_append(v);
        assert!(list.contains(v));
        list.remove(v);
        assert!(!list.contains(v));
    }

    #[test]
    fn concurrent_insert_contends_for_empty_slots() {
        let list = Arc::new(List::new());
        let threads = 8;
        let per_thread = 64usize;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let list = list.clone();
                thread::spawn(move || {
                    for i in 0..per_thread {
                        let v = ((t * per_thread + i) + 1) as *mut ();
                        list.insert_or_append(v);
                        assert!(list.contains(v));
                        assert!(list.remove(v));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(list.is_empty());
    }
}
