use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::ptr::null_mut;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::reclaim::Reclaimer;
use crate::sync::AtomicPtr;

fn into_raw<T>(value: Option<Arc<T>>) -> *mut T {
    match value {
        Some(arc) => Arc::into_raw(arc) as *mut T,
        None => null_mut(),
    }
}

fn as_raw<T>(value: Option<&Arc<T>>) -> *mut T {
    match value {
        Some(arc) => Arc::as_ptr(arc) as *mut T,
        None => null_mut(),
    }
}

/// A type that holds at most one `Arc<T>` and can be safely shared between
/// threads.
///
/// Unlike an atomic box of a `Box<T>`, the contents can be read without
/// taking them out: [`load`](AtomicRefBox::load) hands back a new strong
/// reference and leaves the box's own reference in place.
///
/// The box is `Send` and `Sync` exactly when `Arc<T>` is:
///
/// ```compile_fail
/// use std::cell::Cell;
/// use std::sync::Arc;
/// use atomicrefbox::AtomicRefBox;
///
/// let atom = AtomicRefBox::new(Some(Arc::new(Cell::new(1))));
/// std::thread::spawn(move || drop(atom));
/// ```
pub struct AtomicRefBox<T> {
    ptr: AtomicPtr<T>,
    reclaimer: Reclaimer<T>,
    _owns: PhantomData<Arc<T>>,
}

impl<T> AtomicRefBox<T> {
    /// Creates a new `AtomicRefBox` holding `value`.
    ///
    /// # Examples
    ///
    ///     use std::sync::Arc;
    ///     use atomicrefbox::AtomicRefBox;
    ///
    ///     let atom = AtomicRefBox::new(Some(Arc::new(0)));
    ///     assert!(!atom.is_empty());
    ///
    pub fn new(value: Option<Arc<T>>) -> AtomicRefBox<T> {
        AtomicRefBox {
            ptr: AtomicPtr::new(into_raw(value)),
            reclaimer: Reclaimer::new(),
            _owns: PhantomData,
        }
    }

    /// Creates an empty `AtomicRefBox`.
    pub fn empty() -> AtomicRefBox<T> {
        AtomicRefBox::new(None)
    }

    /// Returns a new strong reference to the current contents, leaving them in
    /// the box.
    ///
    /// The returned `Arc` keeps the value alive on its own; later stores into
    /// the box do not affect it.
    ///
    /// # Examples
    ///
    ///     use std::sync::Arc;
    ///     use atomicrefbox::AtomicRefBox;
    ///
    ///     let atom = AtomicRefBox::new(Some(Arc::new("one")));
    ///     let one = atom.load().unwrap();
    ///     atom.store(Some(Arc::new("two")));
    ///     assert_eq!(*one, "one");
    ///     assert_eq!(*atom.load().unwrap(), "two");
    ///
    pub fn load(&self) -> Option<Arc<T>> {
        let guard = self.reclaimer.pin();
        let ptr = guard.protect(&self.ptr);
        if ptr.is_null() {
            return None;
        }
        // The box's reference to `ptr` cannot be released while `guard` is alive.
        unsafe {
            Arc::increment_strong_count(ptr);
            Some(Arc::from_raw(ptr))
        }
    }

    /// Atomically set this `AtomicRefBox` to `value` and drop the previous
    /// reference it held.
    ///
    /// The box takes ownership of `value`. If loads are in flight the old
    /// reference is released once they finish.
    ///
    /// # Examples
    ///
    ///     use std::sync::Arc;
    ///     use atomicrefbox::AtomicRefBox;
    ///
    ///     let atom = AtomicRefBox::empty();
    ///     atom.store(Some(Arc::new("ok")));
    ///     assert_eq!(atom.into_inner(), Some(Arc::new("ok")));
    ///
    pub fn store(&self, value: Option<Arc<T>>) {
        let old = self.ptr.swap(into_raw(value), Ordering::SeqCst);
        unsafe { self.reclaimer.release(old) }
    }

    /// Atomically set this `AtomicRefBox` to `value` and return the previous
    /// contents.
    ///
    /// The box takes ownership of `value`; the caller owns the returned
    /// reference.
    ///
    /// # Examples
    ///
    ///     use std::sync::Arc;
    ///     use atomicrefbox::AtomicRefBox;
    ///
    ///     let atom = AtomicRefBox::new(Some(Arc::new("one")));
    ///     let prev_value = atom.swap(Some(Arc::new("two")));
    ///     assert_eq!(prev_value, Some(Arc::new("one")));
    ///
    #[doc(alias = "exchange")]
    pub fn swap(&self, value: Option<Arc<T>>) -> Option<Arc<T>> {
        let old = self.ptr.swap(into_raw(value), Ordering::SeqCst);
        unsafe { self.reclaimer.adopt(old) }
    }

    /// Atomically empty this `AtomicRefBox` and return the previous contents.
    ///
    /// Equivalent to `self.swap(None)`.
    pub fn take(&self) -> Option<Arc<T>> {
        self.swap(None)
    }

    /// Stores `new` if the box currently holds the very same allocation as
    /// `current` (or is empty, for `None`).
    ///
    /// Identity is compared with [`Arc::ptr_eq`] semantics; two distinct
    /// `Arc`s with equal contents do not match.
    ///
    /// Ownership of `new` is asymmetric. On success it moves into the box and
    /// the box's reference to `current` is released. On failure the box is
    /// untouched and `new` is handed back in `Err`, still owned by the caller.
    ///
    /// # Examples
    ///
    ///     use std::sync::Arc;
    ///     use atomicrefbox::AtomicRefBox;
    ///
    ///     let one = Arc::new(1);
    ///     let atom = AtomicRefBox::new(Some(one.clone()));
    ///
    ///     let lookalike = Arc::new(1);
    ///     let rejected = atom.compare_exchange(Some(&lookalike), Some(Arc::new(2)));
    ///     assert_eq!(rejected, Err(Some(Arc::new(2))));
    ///
    ///     assert!(atom.compare_exchange(Some(&one), Some(Arc::new(3))).is_ok());
    ///     assert_eq!(*atom.load().unwrap(), 3);
    ///
    pub fn compare_exchange(
        &self,
        current: Option<&Arc<T>>,
        new: Option<Arc<T>>,
    ) -> Result<(), Option<Arc<T>>> {
        let current_ptr = as_raw(current);
        let new_ptr = as_raw(new.as_ref());
        match self.ptr.compare_exchange(
            current_ptr,
            new_ptr,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(old) => {
                // The box now owns the reference `new` was carrying.
                let _ = into_raw(new);
                unsafe { self.reclaimer.release(old) };
                Ok(())
            }
            Err(_) => Err(new),
        }
    }

    /// Returns `true` if the box holds no reference.
    pub fn is_empty(&self) -> bool {
        self.ptr.load(Ordering::SeqCst).is_null()
    }

    /// Consume this `AtomicRefBox`, returning the reference it held.
    ///
    /// # Examples
    ///
    ///     use std::sync::Arc;
    ///     use atomicrefbox::AtomicRefBox;
    ///
    ///     let atom = AtomicRefBox::new(Some(Arc::new("hello")));
    ///     assert_eq!(atom.into_inner(), Some(Arc::new("hello")));
    ///
    pub fn into_inner(self) -> Option<Arc<T>> {
        // Owning `self` means no load is in flight.
        let ptr = self.ptr.swap(null_mut(), Ordering::SeqCst);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { Arc::from_raw(ptr) })
        }
    }
}

impl<T> Drop for AtomicRefBox<T> {
    /// Dropping an `AtomicRefBox<T>` releases the reference stored in it.
    fn drop(&mut self) {
        let ptr = self.ptr.swap(null_mut(), Ordering::SeqCst);
        if !ptr.is_null() {
            unsafe { drop(Arc::from_raw(ptr)) };
        }
    }
}

impl<T> Default for AtomicRefBox<T> {
    /// The default `AtomicRefBox<T>` is empty.
    fn default() -> AtomicRefBox<T> {
        AtomicRefBox::empty()
    }
}

impl<T> From<Arc<T>> for AtomicRefBox<T> {
    fn from(value: Arc<T>) -> AtomicRefBox<T> {
        AtomicRefBox::new(Some(value))
    }
}

impl<T> Debug for AtomicRefBox<T> {
    /// The `{:?}` format of an `AtomicRefBox<T>` looks like
    /// `"AtomicRefBox(0x12341234)"` or `"AtomicRefBox(None)"`.
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        let p = self.ptr.load(Ordering::Relaxed);
        f.write_str("AtomicRefBox(")?;
        if p.is_null() {
            f.write_str("None")?;
        } else {
            fmt::Pointer::fmt(&p, f)?;
        }
        f.write_str(")")?;
        Ok(())
    }
}
