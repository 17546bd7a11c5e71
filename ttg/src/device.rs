//! The device bridge (spec §4.9): declares a template task as executing
//! on a host or device execution space, and gives a device task's body
//! the three cooperative suspension points spec §4.9 names.
//!
//! Grounded on `ttg/ttg/parsec/ptr.h`'s `Ptr<T>`: a smart pointer that
//! keeps a data-copy alive across a suspension point without the
//! consumer re-acquiring it, tracked in a process-wide registry reclaimed
//! at `drop_all_ptr()`. This crate has no device backend to suspend
//! *onto* (spec §1 Non-goals), so the registry collapses to nothing: a
//! [`DevicePin`] is a `Drop`-releasing guard scoped to the device body's
//! call frame rather than a long-lived registry entry, since there is no
//! asynchronous device completion for a later `drop_all_ptr()` sweep to
//! race against.

use std::sync::Arc;

use crate::datacopy::DataCopy;
use crate::error::Error;

/// Where a template task's body executes (spec §4.9).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionSpace {
    /// Runs inline on a scheduler worker thread (the default).
    Host,
    /// Runs as a suspendable computation through [`DeviceContext`].
    Device,
}

impl Default for ExecutionSpace {
    fn default() -> Self {
        ExecutionSpace::Host
    }
}

/// Keeps a [`DataCopy`] payload pinned for the duration of a device
/// task's suspension (spec §4.9 invariant: "while suspended on
/// select/wait, its input DataCopies are pinned; no other consumer may
/// mutate them; other readers may proceed"). Holding a `DevicePin` adds
/// one more shared reader, which is exactly what blocks a concurrent
/// `mark_mutable` without blocking concurrent reads.
pub struct DevicePin<V> {
    data: DataCopy<V>,
}

impl<V> DevicePin<V> {
    fn new(data: DataCopy<V>) -> Result<Self, Error> {
        data.add_ref()?;
        Ok(DevicePin { data })
    }

    /// The pinned payload.
    pub fn get(&self) -> &V {
        unsafe { self.data.read() }
    }
}

impl<V> Drop for DevicePin<V> {
    fn drop(&mut self) {
        self.data.drop_ref();
    }
}

/// A device task invocation's suspension context (spec §4.9), handed to
/// the body in place of the three primitives being free functions.
///
/// There is no device runtime underneath this bridge (spec §1
/// Non-goals), so `select` pins immediately — residency is trivially
/// satisfied — and `wait` runs the submitted command to completion on
/// the calling worker thread. The suspension is still real in the sense
/// spec §5 cares about: the worker is parked here, unavailable to pick
/// up other activations, for as long as the device body holds it.
pub struct DeviceContext {
    _private: (),
}

impl DeviceContext {
    pub(crate) fn new() -> Self {
        DeviceContext { _private: () }
    }

    /// Suspends until `data` is resident on the task's device, returning
    /// a pin that keeps it alive and unmutated by other consumers for as
    /// long as the device body holds it (spec §4.9 step 1, "select").
    pub fn select<V>(&self, data: DataCopy<V>) -> Result<DevicePin<V>, Error> {
        DevicePin::new(data)
    }

    /// Suspends until a previously submitted device command completes
    /// and its results are brought back to host-visible memory (spec
    /// §4.9 step 2, "wait"). `command` stands in for that completion.
    pub fn wait<T>(&self, command: impl FnOnce() -> T) -> T {
        command()
    }

    /// Yields the body's output deliveries as its final act (spec §4.9
    /// step 3, "forward"); the task frame is destroyed once every
    /// delivery has run.
    pub fn forward(&self, deliveries: Vec<Box<dyn FnOnce() -> Result<(), Error> + Send>>) -> Result<(), Error> {
        for delivery in deliveries {
            delivery()?;
        }
        Ok(())
    }
}

/// A device task body: given the activation's key, its filled input
/// slots, and a suspension context, runs to completion (spec §4.9).
pub type DeviceBody<K> = Arc<dyn Fn(&K, Vec<crate::tt::SlotValue>, &DeviceContext) -> Result<(), Error> + Send + Sync>;
