//! Deferred release of references displaced from an [`AtomicRefBox`].
//!
//! `load` reads the box's pointer and only then bumps the strong count. In
//! between, nothing but the box's own reference keeps the value alive, so a
//! writer that displaces the pointer must not drop that reference while a
//! load is still about to use it.
//!
//! Each load claims a hazard record, announces the pointer it read there and
//! re-reads the box to confirm the pointer is still current before touching
//! the count. A writer that displaces a pointer checks the records: if no
//! load has announced it, the reference is released at once; otherwise it is
//! pushed on the `retired` stack. Every collection frees all retired
//! references that are no longer announced, so at most one retired reference
//! per announced pointer survives it. Retention is bounded by the number of
//! loads in flight, not by how long the box goes without a quiet moment.
//!
//! Records are never freed before the box, and there are never more of them
//! than loads that ran at the same time.
//!
//! All accesses are `SeqCst`: the argument above needs a load's announcement
//! and its re-read of the box to be totally ordered with a writer's swap and
//! its scan of the records.
//!
//! [`AtomicRefBox`]: crate::AtomicRefBox

use std::ptr::null_mut;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Arc;

use crate::sync::{AtomicBool, AtomicPtr};

struct Retired<T> {
    ptr: *const T,
    next: *mut Retired<T>,
}

struct Hazard<T> {
    in_use: AtomicBool,
    ptr: AtomicPtr<T>,
    /// Fixed before the record is published.
    next: *mut Hazard<T>,
}

pub(crate) struct Reclaimer<T> {
    hazards: AtomicPtr<Hazard<T>>,
    retired: AtomicPtr<Retired<T>>,
}

/// A claimed hazard record, released when dropped.
pub(crate) struct LoadGuard<'a, T> {
    reclaimer: &'a Reclaimer<T>,
    hazard: &'a Hazard<T>,
}

impl<T> Reclaimer<T> {
    pub fn new() -> Reclaimer<T> {
        Reclaimer {
            hazards: AtomicPtr::new(null_mut()),
            retired: AtomicPtr::new(null_mut()),
        }
    }

    /// Claims a free hazard record, adding one if all are in use.
    pub fn pin(&self) -> LoadGuard<'_, T> {
        let mut node = self.hazards.load(SeqCst);
        while !node.is_null() {
            let hazard = unsafe { &*node };
            if hazard
                .in_use
                .compare_exchange(false, true, SeqCst, SeqCst)
                .is_ok()
            {
                return LoadGuard {
                    reclaimer: self,
                    hazard,
                };
            }
            node = hazard.next;
        }

        let node = Box::into_raw(Box::new(Hazard {
            in_use: AtomicBool::new(true),
            ptr: AtomicPtr::new(null_mut()),
            next: null_mut(),
        }));
        let mut head = self.hazards.load(SeqCst);
        loop {
            // Not yet reachable by other threads.
            unsafe {
                (*node).next = head;
            }
            match self.hazards.compare_exchange(head, node, SeqCst, SeqCst) {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }
        LoadGuard {
            reclaimer: self,
            hazard: unsafe { &*node },
        }
    }

    fn is_announced(&self, ptr: *const T) -> bool {
        let mut node = self.hazards.load(SeqCst);
        while !node.is_null() {
            let hazard = unsafe { &*node };
            if hazard.ptr.load(SeqCst) as *const T == ptr {
                return true;
            }
            node = hazard.next;
        }
        false
    }

    /// Hands the box's reference to `ptr`, just swapped out, to the caller.
    ///
    /// If a load has announced `ptr`, the caller gets a fresh strong reference
    /// instead and the box's own reference is retired.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `Arc::into_raw`, and must have just
    /// been removed from the box, so that this call is the only one releasing
    /// the box's reference to it.
    pub unsafe fn adopt(&self, ptr: *const T) -> Option<Arc<T>> {
        if ptr.is_null() {
            return None;
        }
        if !self.is_announced(ptr) {
            return Some(Arc::from_raw(ptr));
        }
        Arc::increment_strong_count(ptr);
        let adopted = Arc::from_raw(ptr);
        self.retire(ptr);
        Some(adopted)
    }

    /// Drops the box's reference to `ptr`, now or once no load announces it.
    ///
    /// # Safety
    ///
    /// Same contract as [`Reclaimer::adopt`].
    pub unsafe fn release(&self, ptr: *const T) {
        if ptr.is_null() {
            return;
        }
        if self.is_announced(ptr) {
            self.retire(ptr);
        } else {
            drop(Arc::from_raw(ptr));
        }
    }

    unsafe fn retire(&self, ptr: *const T) {
        let node = Box::into_raw(Box::new(Retired {
            ptr,
            next: null_mut(),
        }));
        self.push_chain(node, node);
        self.collect();
    }

    /// Pushes the chain `first..=last` onto the retired stack.
    fn push_chain(&self, first: *mut Retired<T>, last: *mut Retired<T>) {
        let mut head = self.retired.load(SeqCst);
        loop {
            // `last` is not reachable from the stack until the exchange below
            // succeeds, so we are its only writer.
            unsafe {
                (*last).next = head;
            }
            match self.retired.compare_exchange(head, first, SeqCst, SeqCst) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    /// Releases every retired reference no load has announced.
    fn collect(&self) {
        loop {
            let mut node = self.retired.swap(null_mut(), SeqCst);
            if node.is_null() {
                return;
            }

            let mut kept_first: *mut Retired<T> = null_mut();
            let mut kept_last: *mut Retired<T> = null_mut();
            let mut kept = Vec::new();
            while !node.is_null() {
                let next = unsafe { (*node).next };
                let ptr = unsafe { (*node).ptr };
                if self.is_announced(ptr) {
                    unsafe {
                        (*node).next = kept_first;
                    }
                    if kept_last.is_null() {
                        kept_last = node;
                    }
                    kept_first = node;
                    kept.push(ptr);
                } else {
                    unsafe {
                        drop(Box::from_raw(node));
                        drop(Arc::from_raw(ptr));
                    }
                }
                node = next;
            }

            if kept_first.is_null() {
                return;
            }
            self.push_chain(kept_first, kept_last);

            // A load that withdrew its announcement while we held the chain
            // saw an empty stack and skipped collecting; pick its work back up.
            if kept.iter().all(|&ptr| self.is_announced(ptr)) {
                return;
            }
        }
    }
}

impl<T> LoadGuard<'_, T> {
    /// Reads `src` and announces the pointer read, retrying until the
    /// announcement is made while the pointer is still in `src`.
    ///
    /// Until the guard is dropped, the reference `src` held to the returned
    /// pointer is not released.
    pub fn protect(&self, src: &AtomicPtr<T>) -> *mut T {
        let mut ptr = src.load(SeqCst);
        loop {
            if ptr.is_null() {
                return ptr;
            }
            self.hazard.ptr.store(ptr, SeqCst);
            let current = src.load(SeqCst);
            if current == ptr {
                return ptr;
            }
            ptr = current;
        }
    }
}

impl<T> Drop for LoadGuard<'_, T> {
    fn drop(&mut self) {
        self.hazard.ptr.store(null_mut(), SeqCst);
        self.hazard.in_use.store(false, SeqCst);
        let reclaimer = self.reclaimer;
        if !reclaimer.retired.load(SeqCst).is_null() {
            reclaimer.collect();
        }
    }
}

impl<T> Drop for Reclaimer<T> {
    /// Holding `&mut self` means no load is in flight.
    fn drop(&mut self) {
        let mut node = self.retired.swap(null_mut(), SeqCst);
        while !node.is_null() {
            let retired = unsafe { Box::from_raw(node) };
            node = retired.next;
            unsafe { drop(Arc::from_raw(retired.ptr)) };
        }

        let mut node = self.hazards.swap(null_mut(), SeqCst);
        while !node.is_null() {
            let hazard = unsafe { Box::from_raw(node) };
            node = hazard.next;
        }
    }
}
