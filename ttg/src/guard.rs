//! The per-capability views a task body receives over a filled slot (spec §4.4).
//!
//! "A `Read` slot yields a const reference into the `DataCopy`; a
//! `Consume` slot yields an owning handle and transfers (or clones) the
//! `DataCopy` depending on whether other consumers exist." [`ReadHandle`]
//! and [`ConsumeHandle`] are that contract made concrete: both release
//! their reference (`drop_ref`) when dropped, and [`ConsumeHandle`]
//! additionally knows whether it was the multicast's move target and may
//! attempt to go exclusive-mutable.

use std::ops::Deref;

use crate::datacopy::DataCopy;

/// A read-only view over a `DataCopy`.
pub struct ReadHandle<V> {
    data: Option<DataCopy<V>>,
}

impl<V> ReadHandle<V> {
    /// Wraps a `DataCopy` for read-only access.
    pub fn new(data: DataCopy<V>) -> Self {
        ReadHandle { data: Some(data) }
    }

    /// A reference to the payload.
    pub fn get(&self) -> &V {
        let data = self.data.as_ref().expect("ReadHandle used after into_data_copy");
        unsafe { data.read() }
    }

    /// Unwraps the underlying `DataCopy` without releasing this handle's
    /// reference, so a task body may forward a value downstream (e.g. a
    /// pass-through operator) without an extra `add_ref`/`drop_ref` pair.
    pub fn into_data_copy(mut self) -> DataCopy<V> {
        self.data.take().expect("ReadHandle used after into_data_copy")
    }
}

impl<V> Deref for ReadHandle<V> {
    type Target = V;
    fn deref(&self) -> &V {
        self.get()
    }
}

impl<V> Drop for ReadHandle<V> {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            data.drop_ref();
        }
    }
}

/// An owning view over a `DataCopy` delivered to a `Consume` slot.
///
/// Whether this particular delivery was the multicast move target
/// determines whether [`ConsumeHandle::try_get_mut`] can ever succeed
/// (spec §4.3, §4.4).
pub struct ConsumeHandle<V> {
    data: Option<DataCopy<V>>,
    is_move_target: bool,
}

impl<V> ConsumeHandle<V> {
    /// Wraps a `DataCopy` delivered to a `Consume` slot.
    pub fn new(data: DataCopy<V>, is_move_target: bool) -> Self {
        ConsumeHandle { data: Some(data), is_move_target }
    }

    /// Whether this delivery was chosen as the multicast's move target
    /// (spec §4.3). A non-move-target handle can still become mutable
    /// later, once every other reader has released its reference.
    pub fn is_move_target(&self) -> bool {
        self.is_move_target
    }

    /// A read-only view, always available.
    pub fn get(&self) -> &V {
        let data = self.data.as_ref().expect("ConsumeHandle used after into_data_copy");
        unsafe { data.read() }
    }

    /// Attempts to obtain a mutable view. Succeeds only when this handle
    /// is presently the `DataCopy`'s sole reference (spec §4.4's
    /// precondition for `mark_mutable`); the move target is the only
    /// delivery expected to eventually satisfy that, once shared readers
    /// have released their references.
    pub fn try_get_mut(&mut self) -> Option<&mut V> {
        let data = self.data.as_ref().expect("ConsumeHandle used after into_data_copy");
        if data.is_mutable() {
            return Some(unsafe { data.write() });
        }
        if data.is_sole_owner() && data.mark_mutable().is_ok() {
            return Some(unsafe { data.write() });
        }
        None
    }

    /// Unwraps the underlying `DataCopy` without releasing this handle's
    /// reference or resetting its mode, so a task body may forward the
    /// (possibly still-mutable) value downstream.
    pub fn into_data_copy(mut self) -> DataCopy<V> {
        self.data.take().expect("ConsumeHandle used after into_data_copy")
    }
}

impl<V> Drop for ConsumeHandle<V> {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            if data.is_mutable() {
                data.reset_readers();
            }
            data.drop_ref();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_handle_derefs_to_payload() {
        let handle = ReadHandle::new(DataCopy::new(41));
        assert_eq!(*handle, 41);
    }

    #[test]
    fn consume_handle_move_target_can_go_mutable_once_sole_owner() {
        let dc = DataCopy::new(vec![1, 2, 3]);
        let shared = dc.clone();
        dc.add_ref().unwrap();
        let mut move_target = ConsumeHandle::new(dc, true);
        assert!(move_target.try_get_mut().is_none());
        let reader = ReadHandle::new(shared);
        drop(reader);
        assert!(move_target.try_get_mut().is_some());
    }

    #[test]
    fn non_move_target_consume_handle_never_goes_mutable_while_shared() {
        let dc = DataCopy::new(1);
        dc.add_ref().unwrap();
        let mut not_move_target = ConsumeHandle::new(dc.clone(), false);
        assert!(not_move_target.try_get_mut().is_none());
        dc.drop_ref();
        drop(not_move_target);
    }
}
