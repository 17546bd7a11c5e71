//! Edges: logical wiring descriptors bundling Out terminals to In terminals
//! (spec §3, §4.1).
//!
//! [`crate::terminal::OutTerminal::connect`] is the statically-typed,
//! zero-cost path used when a TT body wires a known `OutTerminal<K, V>`
//! directly to a known `InTerminal<K, V>`; Rust's type system already
//! rules out `TypeMismatch`/`IllegalDirection` on that path; no runtime
//! check is needed, a point recorded in `DESIGN.md`.
//!
//! The host-language graph construction API of spec §6 (`edge_t`,
//! `edges(...)`, `connect(out, in)`) is, in the original, generic over
//! terminals whose direction and value type are not known until the call
//! site — mirroring a dynamically typed scripting front-end laid over the
//! templated core. [`DynEndpoint`] and [`connect`] reproduce that surface
//! with real runtime checks, and [`Edge`] is the lazy, possibly-multi-
//! producer/consumer wiring descriptor built from them.

use std::any::{Any, TypeId};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::key::Key;
use crate::terminal::{Capability, InTerminal, OutTerminal};
use crate::value::Value;

enum Direction {
    Out,
    In(Capability),
}

/// A type-erased handle to an Out or In terminal, used by the dynamic
/// graph-construction surface ([`connect`], [`Edge`]).
pub struct DynEndpoint {
    direction: Direction,
    type_id: TypeId,
    type_name: &'static str,
    handle: Box<dyn Any + Send + Sync>,
    connector: Arc<dyn Fn(&dyn Any, &dyn Any) + Send + Sync>,
}

impl DynEndpoint {
    /// Erases an Out terminal.
    pub fn from_out<K: Key, V: Value>(out: OutTerminal<K, V>) -> Self {
        DynEndpoint {
            direction: Direction::Out,
            type_id: TypeId::of::<(K, V)>(),
            type_name: std::any::type_name::<(K, V)>(),
            handle: Box::new(out),
            connector: Arc::new(|out_any, in_any| {
                let out = out_any
                    .downcast_ref::<OutTerminal<K, V>>()
                    .expect("connector invoked only after a matching type_id check");
                let inp = in_any
                    .downcast_ref::<InTerminal<K, V>>()
                    .expect("connector invoked only after a matching type_id check");
                out.connect(inp.clone());
            }),
        }
    }

    /// Erases an In terminal.
    pub fn from_in<K: Key, V: Value>(inp: InTerminal<K, V>) -> Self {
        let capability = inp.capability();
        DynEndpoint {
            direction: Direction::In(capability),
            type_id: TypeId::of::<(K, V)>(),
            type_name: std::any::type_name::<(K, V)>(),
            handle: Box::new(inp),
            // Only ever called with `self` as the `in_any` argument of an Out's
            // connector, so this side's connector is never invoked directly.
            connector: Arc::new(|_, _| unreachable!("an In endpoint's own connector is never called")),
        }
    }

    fn capability(&self) -> Option<Capability> {
        match self.direction {
            Direction::In(c) => Some(c),
            Direction::Out => None,
        }
    }
}

/// Connects a type-erased Out endpoint to a type-erased In endpoint,
/// performing the runtime checks of spec §4.1.
pub fn connect(out: &DynEndpoint, inp: &DynEndpoint) -> Result<(), Error> {
    match (&out.direction, &inp.direction) {
        (Direction::Out, Direction::In(capability)) => {
            if out.type_id != inp.type_id {
                return Err(Error::TypeMismatch(format!(
                    "cannot connect Out<{}> to In<{}>",
                    out.type_name, inp.type_name
                )));
            }
            let _ = capability;
            (out.connector)(out.handle.as_ref(), inp.handle.as_ref());
            Ok(())
        }
        (Direction::Out, Direction::Out) => {
            Err(Error::IllegalDirection("both endpoints are Out terminals".into()))
        }
        (Direction::In(_), Direction::In(_)) => {
            Err(Error::IllegalDirection("both endpoints are In terminals".into()))
        }
        (Direction::In(_), Direction::Out) => {
            Err(Error::IllegalDirection("connect(out, in) called with arguments reversed".into()))
        }
    }
}

struct EdgeInner {
    producers: Vec<DynEndpoint>,
    consumers: Vec<DynEndpoint>,
}

/// A shared wiring descriptor: a pending set of Out pointers and a
/// pending set of In pointers. When both sets are non-empty each Out is
/// connected to each In (spec §4.1).
///
/// Shared by identity (an `Arc`-backed pimpl, spec §3): cloning an `Edge`
/// yields another handle to the same pending sets.
#[derive(Clone)]
pub struct Edge {
    inner: Arc<Mutex<EdgeInner>>,
}

impl Default for Edge {
    fn default() -> Self {
        Edge { inner: Arc::new(Mutex::new(EdgeInner { producers: Vec::new(), consumers: Vec::new() })) }
    }
}

impl Edge {
    /// Creates an empty edge.
    pub fn new() -> Self {
        Edge::default()
    }

    /// Registers a producer, cross-connecting it to every pending consumer.
    pub fn set_out(&self, out: DynEndpoint) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        for consumer in &inner.consumers {
            connect(&out, consumer)?;
        }
        inner.producers.push(out);
        Ok(())
    }

    /// Registers a consumer, cross-connecting it to every pending producer.
    pub fn set_in(&self, inp: DynEndpoint) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        for producer in &inner.producers {
            connect(producer, &inp)?;
        }
        inner.consumers.push(inp);
        Ok(())
    }

    /// The number of pending producers.
    pub fn producer_count(&self) -> usize {
        self.inner.lock().producers.len()
    }

    /// The number of pending consumers.
    pub fn consumer_count(&self) -> usize {
        self.inner.lock().consumers.len()
    }

    /// Whether every pending consumer's capability is satisfied (used by
    /// `GraphManager::Verify`, spec §4.6): an edge with consumers but no
    /// producers, or vice versa, is disconnected.
    pub fn is_connected(&self) -> bool {
        let inner = self.inner.lock();
        !inner.producers.is_empty() && !inner.consumers.is_empty()
    }

    /// Reports the capabilities of this edge's pending consumers, for
    /// diagnostics (spec §4.1: "diagnostics are emitted, not errors" when
    /// an edge carries multiple producers or destinations).
    pub fn consumer_capabilities(&self) -> Vec<Capability> {
        self.inner.lock().consumers.iter().filter_map(DynEndpoint::capability).collect()
    }

    /// Unions the pending producer/consumer sets of several edges into a
    /// single new edge, so a single destination can collect from multiple
    /// producers (spec §4.1). The input edges are drained: their endpoints
    /// move into the returned edge, which is thereafter the sole owner of
    /// the union (the inputs become empty, unconnected edges).
    pub fn fuse(edges: Vec<Edge>) -> Result<Edge, Error> {
        let mut producers = Vec::new();
        let mut consumers = Vec::new();
        for edge in &edges {
            let mut inner = edge.inner.lock();
            producers.append(&mut inner.producers);
            consumers.append(&mut inner.consumers);
        }
        for consumer in &consumers {
            for producer in &producers {
                connect(producer, consumer)?;
            }
        }
        let fused = Edge::new();
        {
            let mut inner = fused.inner.lock();
            inner.producers = producers;
            inner.consumers = consumers;
        }
        Ok(fused)
    }
}
