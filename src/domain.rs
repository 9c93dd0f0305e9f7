//! The typed façade over two [`List`]s — one tracking pointers currently protected by a
//! reader (`protected`), one tracking pointers that have been retired but not yet
//! reclaimed (`retired`) — plus the user-supplied deallocator that is the only path by
//! which a payload is ever freed.

use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;

use crate::list::List;

cfg_if::cfg_if! {
    if #[cfg(feature = "check-loom")] {
        use loom::sync::atomic::{AtomicPtr, Ordering};
    } else {
        use core::sync::atomic::{AtomicPtr, Ordering};
    }
}

fn spin_hint() {
    #[cfg(feature = "check-loom")]
    loom::sync::atomic::spin_loop_hint();
    #[cfg(not(feature = "check-loom"))]
    core::hint::spin_loop();
}

/// Reclamation policy for [`Domain::swap`], [`Domain::compare_and_swap`], and
/// [`Domain::cleanup`].
///
/// This is the typed equivalent of the reference library's `flags` integer (`0` /
/// `DNGR_DEFER_DEALLOC`): the two meanings the original encodes in one reserved bit are
/// given their own variants so an invalid flag value is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// Spin until the old object is no longer protected, then deallocate it before
    /// returning. Simple, but can spin indefinitely against a reader that never drops
    /// its hazard.
    Sync,
    /// Never block the caller: if the old object is still protected, push it onto the
    /// retired list for a later [`Domain::cleanup`] to reclaim.
    Defer,
}

/// A reclamation context binding one deallocator to a pair of hazard-pointer lists.
///
/// A `Domain<T>` is the only thing that ever calls the deallocator, and it does so
/// exactly once per retired pointer, only once that pointer is provably unreachable from
/// any live [`Shield`].
pub struct Domain<T> {
    protected: List,
    retired: List,
    dealloc: Box<dyn Fn(*mut T) + Send + Sync>,
    _marker: PhantomData<fn(*mut T)>,
}

// SAFETY: all mutation of `protected`/`retired` goes through the lock-free slot
// protocol in `List`, and `dealloc` is required to be `Send + Sync` above. The bounds
// on `T` mirror `Arc<T>`'s: a `Shield<'_, T>` hands out `&T` to whichever thread holds
// it, so sharing a `Domain<T>` across threads (`Sync`) requires `T: Sync`, and a value
// reclaimed by one thread's `dealloc` may have been published by another (`Send`)
// requires `T: Send`.
unsafe impl<T: Send> Send for Domain<T> {}
unsafe impl<T: Send + Sync> Sync for Domain<T> {}

impl<T> Domain<T> {
    /// Create a new domain bound to `dealloc`. `dealloc` must be reentrant with respect
    /// to whatever it frees, since it may run concurrently with other domain operations
    /// on unrelated pointers.
    pub fn new(dealloc: impl Fn(*mut T) + Send + Sync + 'static) -> Self {
        Self {
            protected: List::new(),
            retired: List::new(),
            dealloc: Box::new(dealloc),
            _marker: PhantomData,
        }
    }

    /// Publish a hazard for the value currently in `cell` and return a guard that keeps
    /// it alive until dropped.
    ///
    /// Retries internally if the cell is concurrently retired between the initial read
    /// and the hazard becoming visible; see the module-level protocol description.
    pub fn load<'d>(&'d self, cell: &AtomicPtr<T>) -> Shield<'d, T> {
        loop {
            let v = cell.load(Ordering::SeqCst);
            debug_assert!(!v.is_null(), "cell must hold a nonzero published value");

            let handle = self.protected.insert_or_append(v.cast());

            if cell.load(Ordering::SeqCst) == v {
                // SAFETY: `v` was just read as non-null above.
                let value = unsafe { NonNull::new_unchecked(v) };
                return Shield {
                    domain: self,
                    value,
                };
            }

            // The cell moved on between our two reads: the object we hazarded may
            // already be in the middle of being retired. Clear the exact slot we
            // claimed; if someone already cleared it for us (another thread dropping
            // the same hazard we raced to publish), fall back to a scan. Per the
            // spec's open question, a failed fallback scan (slot already cleared by
            // someone else) is benign and we simply retry the load.
            if !handle.try_clear(v.cast()) {
                self.protected.remove(v.cast());
            }
        }
    }

    /// Atomically replace the value in `cell` with `new`, reclaiming the old value
    /// according to `flags`. The caller must not dereference `new` after this call —
    /// enforced here by taking ownership of it as a `Box`.
    pub fn swap(&self, cell: &AtomicPtr<T>, new: Box<T>, flags: Reclaim) {
        let new_ptr = Box::into_raw(new);
        let old_ptr = cell.swap(new_ptr, Ordering::SeqCst);
        self.reclaim(old_ptr, flags);
    }

    /// Atomically replace the value in `cell` with `new` only if it currently equals
    /// `expected`. On success, `expected` is reclaimed per `flags` and `Ok(())` is
    /// returned. On failure, the cell is untouched and `new` is handed back to the
    /// caller unconsumed — the Rust-idiomatic form of the reference library's "does not
    /// consume `new`" contract.
    pub fn compare_and_swap(
        &self,
        cell: &AtomicPtr<T>,
        expected: *mut T,
        new: Box<T>,
        flags: Reclaim,
    ) -> Result<(), Box<T>> {
        let new_ptr = Box::into_raw(new);
        match cell.compare_exchange(expected, new_ptr, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(old_ptr) => {
                self.reclaim(old_ptr, flags);
                Ok(())
            }
            Err(_) => {
                // SAFETY: `new_ptr` came from the `Box::into_raw` above and was never
                // published, so we still hold unique ownership of it.
                Err(unsafe { Box::from_raw(new_ptr) })
            }
        }
    }

    /// Drain the retired list, reclaiming any entry that is no longer protected. With
    /// `Reclaim::Sync`, spins on each still-protected entry until it is safe to reclaim;
    /// with `Reclaim::Defer`, leaves still-protected entries for the next call.
    pub fn cleanup(&self, flags: Reclaim) {
        for ptr in self.retired.snapshot() {
            self.reclaim_retired(ptr, flags);
        }
    }

    fn reclaim(&self, old_ptr: *mut T, flags: Reclaim) {
        let old_erased: *mut () = old_ptr.cast();
        if !self.protected.contains(old_erased) {
            (self.dealloc)(old_ptr);
            return;
        }
        match flags {
            Reclaim::Defer => {
                self.retired.insert_or_append(old_erased);
            }
            Reclaim::Sync => {
                while self.protected.contains(old_erased) {
                    spin_hint();
                }
                (self.dealloc)(old_ptr);
            }
        }
    }

    /// `ptr` is an erased value observed in `retired`'s snapshot. `remove` before
    /// `dealloc` is what keeps concurrent `cleanup` calls from double-freeing the same
    /// entry: only the caller that wins the `remove` race deallocates.
    fn reclaim_retired(&self, ptr: *mut (), flags: Reclaim) {
        if !self.protected.contains(ptr) {
            if self.retired.remove(ptr) {
                (self.dealloc)(ptr.cast());
            }
            return;
        }
        if flags == Reclaim::Sync {
            while self.protected.contains(ptr) {
                spin_hint();
            }
            if self.retired.remove(ptr) {
                (self.dealloc)(ptr.cast());
            }
        }
        // Reclaim::Defer: still protected, leave it for the next cleanup pass.
    }
}

impl<T> Drop for Domain<T> {
    fn drop(&mut self) {
        debug_assert!(
            self.protected.is_empty(),
            "Domain dropped while a Shield was still live"
        );
        // `protected` and `retired` free their own slots via their `Drop` impls. Any
        // value still sitting in `retired` at this point is leaked by design: the
        // reference library's `dngr_domain_free` likewise only frees the two slot
        // lists, never the payloads inside them — callers are expected to have driven
        // `cleanup` to quiescence first.
    }
}

impl<T> fmt::Debug for Domain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain").finish_non_exhaustive()
    }
}

/// A live hazard pointer obtained from [`Domain::load`]. Dereferences to the protected
/// value; dropping it releases the hazard.
pub struct Shield<'d, T> {
    domain: &'d Domain<T>,
    value: NonNull<T>,
}

impl<T> Deref for Shield<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: as long as this `Shield` is alive, `domain` guarantees the pointee
        // has not been reclaimed.
        unsafe { self.value.as_ref() }
    }
}

impl<T> Drop for Shield<'_, T> {
    fn drop(&mut self) {
        let removed = self.domain.protected.remove(self.value.as_ptr().cast());
        debug_assert!(
            removed,
            "Shield dropped a hazard that was not present in the protected list"
        );
    }
}

impl<T: fmt::Debug> fmt::Debug for Shield<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shield").field(&**self).finish()
    }
}
