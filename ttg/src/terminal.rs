//! Terminals: typed connection points on a template task (spec §3, §4.2, §4.3).
//!
//! The source's inheritance hierarchy of terminal base/derived classes is
//! recast here as a tagged [`Capability`] plus two concrete generic types,
//! [`InTerminal`] and [`OutTerminal`] (DESIGN NOTES, "tagged variant for
//! Terminal"). Both are cheap `Arc`-backed handles: a TT owns the
//! canonical instance, and [`crate::edge::Edge`] holds non-owning clones
//! for wiring, matching spec §3's "Edges reference TTs by non-owning
//! pointers" translated into Rust's `Arc` idiom.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::datacopy::DataCopy;
use crate::error::Error;
use crate::key::Key;
use crate::ttdyn::TTDyn;
use crate::value::Value;

/// The access mode an In terminal grants its owning task body (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Observe only: the body receives a read-only view (spec §4.4).
    Read,
    /// May take: the body receives an owning handle that may become
    /// exclusive-mutable once it is the sole reference (spec §4.4).
    Consume,
    /// Carries no value; fires purely as a synchronization signal.
    Control,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Read => write!(f, "Read"),
            Capability::Consume => write!(f, "Consume"),
            Capability::Control => write!(f, "Control"),
        }
    }
}

type DeliverFn<K, V> = Box<dyn Fn(K, DataCopy<V>) -> Result<(), Error> + Send + Sync>;
type BroadcastFn<K, V> = Box<dyn Fn(&[K], DataCopy<V>, Option<usize>) -> Result<(), Error> + Send + Sync>;

struct Callbacks<K, V> {
    by_ref: DeliverFn<K, V>,
    by_move: DeliverFn<K, V>,
    broadcast: BroadcastFn<K, V>,
}

struct InInner<K, V> {
    name: String,
    capability: Capability,
    callbacks: Mutex<Option<Callbacks<K, V>>>,
    owner: Mutex<Option<Arc<dyn TTDyn>>>,
}

/// An input connection point on a template task.
///
/// Carries two callbacks registered by the owning TT at graph build
/// time, `send_by_ref` and `send_by_move` (spec §4.2); delivery before
/// `set_callback` is called fails with `Uninitialized`.
pub struct InTerminal<K, V> {
    inner: Arc<InInner<K, V>>,
}

impl<K, V> Clone for InTerminal<K, V> {
    fn clone(&self) -> Self {
        InTerminal { inner: Arc::clone(&self.inner) }
    }
}

impl<K: Key, V: Value> InTerminal<K, V> {
    /// Creates an unconnected, uninitialized In terminal.
    pub fn new(name: impl Into<String>, capability: Capability) -> Self {
        InTerminal {
            inner: Arc::new(InInner {
                name: name.into(),
                capability,
                callbacks: Mutex::new(None),
                owner: Mutex::new(None),
            }),
        }
    }

    /// Records the template task this terminal belongs to, so graph
    /// traversal can follow an Out terminal's successors back to their
    /// owning tasks (spec §4.6). Set once, at TT build time.
    pub fn set_owner(&self, owner: Arc<dyn TTDyn>) {
        *self.inner.owner.lock() = Some(owner);
    }

    /// The owning template task, if `set_owner` has been called.
    pub fn owner(&self) -> Option<Arc<dyn TTDyn>> {
        self.inner.owner.lock().clone()
    }

    /// The terminal's declared name (used by the `Dot` visitor and logging).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// This terminal's capability.
    pub fn capability(&self) -> Capability {
        self.inner.capability
    }

    /// Registers the delivery callbacks. Must be called once, at graph
    /// build time, before any `send`/`broadcast` reaches this terminal.
    pub fn set_callback<FR, FM, FB>(&self, by_ref: FR, by_move: FM, broadcast: FB)
    where
        FR: Fn(K, DataCopy<V>) -> Result<(), Error> + Send + Sync + 'static,
        FM: Fn(K, DataCopy<V>) -> Result<(), Error> + Send + Sync + 'static,
        FB: Fn(&[K], DataCopy<V>, Option<usize>) -> Result<(), Error> + Send + Sync + 'static,
    {
        *self.inner.callbacks.lock() =
            Some(Callbacks { by_ref: Box::new(by_ref), by_move: Box::new(by_move), broadcast: Box::new(broadcast) });
    }

    /// Whether `set_callback` has been called.
    pub fn is_initialized(&self) -> bool {
        self.inner.callbacks.lock().is_some()
    }

    /// Dispatches `send_by_ref`: this delivery is one of possibly several
    /// shared readers of `value`.
    pub fn deliver_by_ref(&self, key: K, value: DataCopy<V>) -> Result<(), Error> {
        let guard = self.inner.callbacks.lock();
        match guard.as_ref() {
            Some(cb) => (cb.by_ref)(key, value),
            None => Err(Error::Uninitialized(format!("In terminal '{}' has no registered callback", self.inner.name))),
        }
    }

    /// Dispatches `send_by_move`: this delivery is the multicast's move
    /// target (spec §4.3).
    pub fn deliver_by_move(&self, key: K, value: DataCopy<V>) -> Result<(), Error> {
        let guard = self.inner.callbacks.lock();
        match guard.as_ref() {
            Some(cb) => (cb.by_move)(key, value),
            None => Err(Error::Uninitialized(format!("In terminal '{}' has no registered callback", self.inner.name))),
        }
    }

    /// Dispatches one broadcast's worth of `keys` sharing one `value` to
    /// this successor in a single call, so a caller with knowledge of key
    /// ownership (the owning task's keymap, spec §4.8) can group any
    /// remote keys into one message per rank rather than one per key.
    /// `move_target_idx`, if set, names the index within `keys` that is
    /// the multicast's move target (spec §4.3).
    pub fn deliver_broadcast(&self, keys: &[K], value: DataCopy<V>, move_target_idx: Option<usize>) -> Result<(), Error> {
        let guard = self.inner.callbacks.lock();
        match guard.as_ref() {
            Some(cb) => (cb.broadcast)(keys, value, move_target_idx),
            None => Err(Error::Uninitialized(format!("In terminal '{}' has no registered callback", self.inner.name))),
        }
    }
}

struct OutInner<K, V> {
    name: String,
    successors: Mutex<Vec<InTerminal<K, V>>>,
}

/// An output connection point on a template task.
///
/// Holds an ordered list of successor In terminals (spec §3). Delivery
/// implements the multicast copy-elision rule of spec §4.3.
pub struct OutTerminal<K, V> {
    inner: Arc<OutInner<K, V>>,
}

impl<K, V> Clone for OutTerminal<K, V> {
    fn clone(&self) -> Self {
        OutTerminal { inner: Arc::clone(&self.inner) }
    }
}

impl<K: Key, V: Value> OutTerminal<K, V> {
    /// Creates an Out terminal with no successors yet.
    pub fn new(name: impl Into<String>) -> Self {
        OutTerminal { inner: Arc::new(OutInner { name: name.into(), successors: Mutex::new(Vec::new()) }) }
    }

    /// The terminal's declared name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Appends a successor In terminal (spec §4.1's `set_in`/cross-connect).
    pub fn connect(&self, successor: InTerminal<K, V>) {
        self.inner.successors.lock().push(successor);
    }

    /// The number of connected successors.
    pub fn successor_count(&self) -> usize {
        self.inner.successors.lock().len()
    }

    /// The owning tasks of every connected successor that has had an owner
    /// recorded, for graph traversal (spec §4.6). Successors with no
    /// recorded owner (e.g. in unit tests that wire terminals directly) are
    /// silently skipped.
    pub fn successor_owners(&self) -> Vec<Arc<dyn TTDyn>> {
        self.inner.successors.lock().iter().filter_map(InTerminal::owner).collect()
    }

    /// Delivers `(key, value)` to every successor, applying the §4.3
    /// multicast copy-elision rule: the first `Consume` successor is the
    /// move target and receives the delivery last; every other successor
    /// (including any further `Consume` successors, which are given a
    /// shared, non-mutable view — see spec S3) receives a shared reference.
    pub fn send(&self, key: K, value: V) -> Result<(), Error> {
        let successors = self.inner.successors.lock().clone();
        if successors.is_empty() {
            return Ok(());
        }
        let data = DataCopy::new(value);
        if successors.len() > 1 {
            for _ in 1..successors.len() {
                data.add_ref()?;
            }
        }
        self.distribute(&successors, key, data)
    }

    /// Broadcasts `value` to every key in `keys`. Semantically equivalent
    /// to calling `send` once per key, but constructs a single `DataCopy`
    /// whose `readers` count is incremented by `keys.len()` up front
    /// (spec §4.2); the move-target successor's *last* key receives the
    /// move delivery, every other (key, successor) pair a shared one.
    ///
    /// Hands each successor the whole `keys` slice in one
    /// `deliver_broadcast` call rather than one `deliver_by_ref`/
    /// `deliver_by_move` per key, so a remote-routing successor can group
    /// keys by owning rank into one wire message per rank (spec §4.8)
    /// instead of one per key.
    pub fn broadcast(&self, keys: &[K], value: V) -> Result<(), Error>
    where
        V: Clone,
    {
        let successors = self.inner.successors.lock().clone();
        if successors.is_empty() || keys.is_empty() {
            return Ok(());
        }
        let move_idx = successors.iter().position(|s| s.capability() == Capability::Consume);
        let data = DataCopy::new(value);
        let total_deliveries = successors.len() * keys.len();
        for _ in 1..total_deliveries {
            data.add_ref()?;
        }

        for (si, successor) in successors.iter().enumerate() {
            let move_target_idx = if Some(si) == move_idx { Some(keys.len() - 1) } else { None };
            successor.deliver_broadcast(keys, data.clone(), move_target_idx)?;
        }
        Ok(())
    }

    fn distribute(&self, successors: &[InTerminal<K, V>], key: K, data: DataCopy<V>) -> Result<(), Error> {
        if successors.len() == 1 {
            return successors[0].deliver_by_move(key, data);
        }
        let move_idx = successors.iter().position(|s| s.capability() == Capability::Consume);
        for (i, successor) in successors.iter().enumerate() {
            if Some(i) == move_idx {
                continue;
            }
            successor.deliver_by_ref(key.clone(), data.clone())?;
        }
        if let Some(mi) = move_idx {
            successors[mi].deliver_by_move(key, data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn uninitialized_in_terminal_errors() {
        let inp: InTerminal<i32, String> = InTerminal::new("x", Capability::Read);
        assert!(matches!(inp.deliver_by_ref(1, DataCopy::new("v".into())), Err(Error::Uninitialized(_))));
    }

    #[test]
    fn single_successor_is_delivered_by_move() {
        let out: OutTerminal<i32, String> = OutTerminal::new("out");
        let inp: InTerminal<i32, String> = InTerminal::new("in", Capability::Consume);
        let seen_move = Arc::new(AtomicUsize::new(0));
        let seen_move2 = seen_move.clone();
        inp.set_callback(
            move |_k, _v| panic!("by_ref should not be called for a single successor"),
            move |_k, v| { seen_move2.fetch_add(1, Ordering::SeqCst); assert!(v.is_sole_owner()); Ok(()) },
            move |_keys, _v, _move_target_idx| panic!("broadcast should not be called by send"),
        );
        out.connect(inp);
        out.send(1, "x".to_string()).unwrap();
        assert_eq!(seen_move.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mixed_successors_deliver_ref_then_move_last() {
        let out: OutTerminal<i32, String> = OutTerminal::new("out");
        let reader: InTerminal<i32, String> = InTerminal::new("reader", Capability::Read);
        let consumer: InTerminal<i32, String> = InTerminal::new("consumer", Capability::Consume);

        let read_seen = Arc::new(AtomicUsize::new(0));
        let read_seen2 = read_seen.clone();
        reader.set_callback(
            move |_k, v| { read_seen2.fetch_add(1, Ordering::SeqCst); assert!(!v.is_mutable()); Ok(()) },
            move |_k, _v| panic!("reader should never be the move target"),
            move |_keys, _v, _move_target_idx| panic!("broadcast should not be called by send"),
        );

        let move_seen = Arc::new(AtomicUsize::new(0));
        let move_seen2 = move_seen.clone();
        consumer.set_callback(
            move |_k, _v| panic!("consumer is the move target and should get deliver_by_move"),
            move |_k, v| { move_seen2.fetch_add(1, Ordering::SeqCst); v.drop_ref(); Ok(()) },
            move |_keys, _v, _move_target_idx| panic!("broadcast should not be called by send"),
        );

        out.connect(reader);
        out.connect(consumer);
        out.send(7, "payload".to_string()).unwrap();

        assert_eq!(read_seen.load(Ordering::SeqCst), 1);
        assert_eq!(move_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broadcast_elides_to_a_single_move_at_the_last_key() {
        let out: OutTerminal<i32, String> = OutTerminal::new("out");
        let consumer: InTerminal<i32, String> = InTerminal::new("consumer", Capability::Consume);

        let mutable_sightings = Arc::new(AtomicUsize::new(0));
        let deliveries = Arc::new(AtomicUsize::new(0));
        let ms1 = mutable_sightings.clone();
        let d1 = deliveries.clone();
        consumer.set_callback(
            move |_k, _v| panic!("broadcast should dispatch through deliver_broadcast, not deliver_by_ref"),
            move |_k, _v| panic!("broadcast should dispatch through deliver_broadcast, not deliver_by_move"),
            move |keys, data, _move_target_idx| {
                for _ in keys {
                    let copy = data.clone();
                    d1.fetch_add(1, Ordering::SeqCst);
                    if copy.is_mutable() {
                        ms1.fetch_add(1, Ordering::SeqCst);
                    }
                    copy.drop_ref();
                }
                Ok(())
            },
        );
        out.connect(consumer);
        out.broadcast(&[1, 2, 3], "v".to_string()).unwrap();
        assert_eq!(deliveries.load(Ordering::SeqCst), 3);
        assert_eq!(mutable_sightings.load(Ordering::SeqCst), 0);
    }
}
