//! Hazard-pointer-based safe memory reclamation for a single shared, atomically-swapped
//! pointer cell.
//!
//! A [`Domain`] lets one or more reader threads obtain temporary, safe references
//! ([`Shield`]) to a heap object published through a `std::sync::atomic::AtomicPtr`
//! cell, while one or more writer threads atomically replace the object
//! ([`Domain::swap`], [`Domain::compare_and_swap`]) and reclaim the prior version only
//! once it is provably unreachable from any live `Shield`.
//!
//! This crate manages no global state: every `Domain` owns its own bookkeeping, so any
//! number of independently-reclaimed cells can coexist.
//!
//! ```
//! use std::sync::atomic::AtomicPtr;
//! use hazard::{Domain, Reclaim};
//!
//! let domain: Domain<u32> = Domain::new(|p| drop(unsafe { Box::from_raw(p) }));
//! let cell = AtomicPtr::new(Box::into_raw(Box::new(1u32)));
//!
//! let shield = domain.load(&cell);
//! assert_eq!(*shield, 1);
//! drop(shield);
//!
//! domain.swap(&cell, Box::new(2u32), Reclaim::Sync);
//! assert_eq!(*domain.load(&cell), 2);
//!
//! let remaining = cell.load(std::sync::atomic::Ordering::SeqCst);
//! drop(unsafe { Box::from_raw(remaining) });
//! ```

mod domain;
mod list;

pub use domain::{Domain, Reclaim, Shield};
