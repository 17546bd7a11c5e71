//! `DataCopy`: the ref-counted envelope around an in-flight value (spec §3, §4.4).
//!
//! Per spec §5, "DataCopy `readers`: atomic integer manipulated without
//! locks; `MUTABLE_SENTINEL` writes only under the 'sole owner'
//! precondition." This is implemented literally: the payload lives behind
//! an `UnsafeCell`, and `readers` is the only thing that ever licenses a
//! `read`/`write` access to it. Callers obtain that license through
//! [`DataCopy::add_ref`]/[`DataCopy::mark_mutable`] and must give it back
//! through [`DataCopy::drop_ref`]; the higher layers (§4.2's In terminals,
//! §4.4's slot delivery) are the only code in this crate permitted to call
//! the unsafe accessors directly, and they do so under the discipline
//! spelled out in those sections.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use crate::error::Error;

/// Sentinel `readers` value denoting exclusive-mutable mode (spec §4.4).
const MUTABLE_SENTINEL: isize = -1;

struct Inner<V> {
    payload: UnsafeCell<V>,
    readers: AtomicIsize,
}

// SAFETY: access to `payload` is gated entirely by `readers`, which only
// ever licenses one of "N shared readers" or "one exclusive writer" at a
// time (the invariant of spec §4.4); the cell itself carries no thread
// affinity.
unsafe impl<V: Send> Send for Inner<V> {}
unsafe impl<V: Send> Sync for Inner<V> {}

/// A ref-counted envelope around a value in flight on the graph.
///
/// Created once per materialization (local construction or
/// deserialization, spec §3 "Lifetime"); every delivery thereafter clones
/// this handle (an `Arc` bump) rather than the payload.
pub struct DataCopy<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for DataCopy<V> {
    fn clone(&self) -> Self {
        DataCopy { inner: Arc::clone(&self.inner) }
    }
}

impl<V: fmt::Debug> fmt::Debug for DataCopy<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCopy").field("readers", &self.readers()).finish()
    }
}

impl<V> DataCopy<V> {
    /// Materializes a new envelope, `readers = 1`, shared-immutable (spec §4.4).
    pub fn new(value: V) -> Self {
        DataCopy { inner: Arc::new(Inner { payload: UnsafeCell::new(value), readers: AtomicIsize::new(1) }) }
    }

    /// The current `readers` value: a positive reader count, or the
    /// `MUTABLE_SENTINEL` in exclusive-mutable mode.
    pub fn readers(&self) -> isize {
        self.inner.readers.load(Ordering::SeqCst)
    }

    /// Whether this envelope is presently in exclusive-mutable mode.
    pub fn is_mutable(&self) -> bool {
        self.readers() == MUTABLE_SENTINEL
    }

    /// Whether this handle is the sole outstanding reference (the
    /// precondition for [`DataCopy::mark_mutable`]).
    pub fn is_sole_owner(&self) -> bool {
        self.readers() == 1
    }

    /// Registers one more shared reader. Fails with `AliasingViolation`
    /// if the envelope is presently exclusive-mutable (spec §4.4).
    pub fn add_ref(&self) -> Result<(), Error> {
        loop {
            let current = self.inner.readers.load(Ordering::SeqCst);
            if current == MUTABLE_SENTINEL {
                return Err(Error::AliasingViolation("add_ref on a mutable DataCopy".into()));
            }
            if self
                .inner
                .readers
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Releases one shared reference. The payload is destroyed (via the
    /// last `Arc` drop) once the count reaches zero.
    pub fn drop_ref(&self) {
        let previous = self.inner.readers.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous != MUTABLE_SENTINEL, "drop_ref on a mutable DataCopy");
    }

    /// Transitions to exclusive-mutable mode. Only legal when this handle
    /// is presently the sole reference (spec §4.4).
    pub fn mark_mutable(&self) -> Result<(), Error> {
        self.inner
            .readers
            .compare_exchange(1, MUTABLE_SENTINEL, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| Error::AliasingViolation("mark_mutable without sole ownership".into()))
    }

    /// Returns from exclusive-mutable mode back to `readers = 1`, used
    /// when a mutating consumer finishes and other consumers were queued
    /// behind it (spec §4.4, supplemented from `ttg_data_copy.h`).
    pub fn reset_readers(&self) {
        self.inner.readers.store(1, Ordering::SeqCst);
    }

    /// A read-only view of the payload.
    ///
    /// # Safety
    /// The caller must hold a license established by `add_ref` (or the
    /// initial construction) and must not be concurrent with any writer
    /// of this envelope.
    pub unsafe fn read(&self) -> &V {
        &*self.inner.payload.get()
    }

    /// A mutable view of the payload.
    ///
    /// # Safety
    /// The caller must have observed `is_mutable()` (or just completed
    /// `mark_mutable` successfully) and must be the sole holder for the
    /// duration of the borrow.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn write(&self) -> &mut V {
        &mut *self.inner.payload.get()
    }

    /// Unwraps the payload by value, succeeding only if this is the sole
    /// outstanding handle to it. Used where a value is consumed once and
    /// discarded rather than folded in place (e.g. a reduction's incoming
    /// contribution, spec §8 Scenario S2).
    pub fn try_into_inner(self) -> Result<V, DataCopy<V>> {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => Ok(inner.payload.into_inner()),
            Err(inner) => Err(DataCopy { inner }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_shared_with_one_reader() {
        let dc = DataCopy::new(42);
        assert_eq!(dc.readers(), 1);
        assert!(!dc.is_mutable());
        assert!(dc.is_sole_owner());
    }

    #[test]
    fn add_ref_increments_and_is_visible_on_clones() {
        let dc = DataCopy::new(42);
        let clone = dc.clone();
        dc.add_ref().unwrap();
        assert_eq!(clone.readers(), 2);
    }

    #[test]
    fn mark_mutable_requires_sole_ownership() {
        let dc = DataCopy::new(String::from("x"));
        let _clone = dc.clone();
        dc.add_ref().unwrap();
        assert!(dc.mark_mutable().is_err());
        dc.drop_ref();
        assert!(dc.mark_mutable().is_ok());
        assert!(dc.is_mutable());
    }

    #[test]
    fn add_ref_rejects_mutable_envelopes() {
        let dc = DataCopy::new(1);
        dc.mark_mutable().unwrap();
        assert!(matches!(dc.add_ref(), Err(Error::AliasingViolation(_))));
    }

    #[test]
    fn reset_readers_returns_to_shared_mode() {
        let dc = DataCopy::new(1);
        dc.mark_mutable().unwrap();
        dc.reset_readers();
        assert_eq!(dc.readers(), 1);
        assert!(!dc.is_mutable());
    }

    #[test]
    fn try_into_inner_succeeds_only_when_sole_owner() {
        let dc = DataCopy::new(String::from("x"));
        let clone = dc.clone();
        dc.add_ref().unwrap();
        let dc = dc.try_into_inner().unwrap_err();
        drop(clone);
        assert_eq!(dc.try_into_inner().unwrap(), "x");
    }

    #[test]
    fn write_then_read_observes_mutation() {
        let dc = DataCopy::new(10);
        dc.mark_mutable().unwrap();
        unsafe { *dc.write() += 5; }
        dc.reset_readers();
        assert_eq!(unsafe { *dc.read() }, 15);
    }
}
