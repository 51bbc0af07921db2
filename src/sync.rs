//! Atomic types used by the crate, swapped for loom's under `--features loom`.

#[cfg(all(feature = "loom", test))]
pub(crate) use loom::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8};
#[cfg(not(all(feature = "loom", test)))]
pub(crate) use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8};
