//! The `Value` bound (spec §3).
//!
//! "an application-defined payload type." The core is agnostic to its
//! structure (spec §1 Non-goals: "does not impose a specific value-type
//! system"); it only needs to move payloads between worker threads and,
//! for values that cross ranks, round-trip them through `serde`/`bincode`
//! the way the wire message of spec §6 demands.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A blanket-implemented bound for values usable as template-task payloads.
pub trait Value: Send + Sync + 'static {}

impl<V: Send + Sync + 'static> Value for V {}

/// A `Value` that can additionally cross a rank boundary.
///
/// Separated from [`Value`] because a purely local graph (spec's `Thread`
/// configuration) never needs to serialize anything; requiring `Serialize
/// + DeserializeOwned` on every value would needlessly narrow what can
/// flow through a single-rank graph.
pub trait WireValue: Value + Serialize + DeserializeOwned {}

impl<V: Value + Serialize + DeserializeOwned> WireValue for V {}
