//! The `Key` bound (spec §3).
//!
//! "an application-defined, equality-hashable value, carried by
//! reference; the core never interprets its structure beyond `hash` and
//! `equals`." Translated to Rust this is `Hash + Eq`, plus the bounds the
//! runtime needs to move keys across threads and ranks: `Clone` (a key is
//! copied into every `ActivationRecord` and wire `Envelope` it touches),
//! `Send + Sync` (keys cross worker-thread and rank boundaries) and
//! `'static` (no borrowed keys).

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A blanket-implemented bound for values usable as a template-task key.
pub trait Key: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

impl<K: Hash + Eq + Clone + Debug + Send + Sync + 'static> Key for K {}

/// A `Key` that can additionally cross a rank boundary (its `owner` is
/// consulted to route a send, and on a remote rank the key itself travels
/// over the wire to re-key the local `ActivationTable`).
pub trait WireKey: Key + Serialize + DeserializeOwned {}

impl<K: Key + Serialize + DeserializeOwned> WireKey for K {}
