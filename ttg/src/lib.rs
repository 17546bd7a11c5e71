//! `ttg`: a distributed data-flow task-graph runtime.
//!
//! A program declares a graph of *template tasks* ([`TTBuilder`]/[`TTDyn`]),
//! wires their terminals together ([`Edge`]/[`connect`]), hands a seed task
//! to [`make_graph_executable`], and then drives the computation by
//! delivering inputs to the graph's In terminals. Each template task is a
//! key-indexed family of activations ([`activation::ActivationTable`]): an
//! activation fires, once, the instant every one of its required input
//! slots has been filled, and its body runs on the rank-local [`Scheduler`].
//! Keys that do not belong to the local rank are forwarded across the
//! network by [`transport::RankTransport`] and re-enter the same activation
//! path on the owning rank.
//!
//! This crate plays the role `timely` plays over `timely_communication` and
//! `timely_logging`: [`ttg_communication`] owns rank bootstrap and the wire
//! format, [`ttg_logging`] owns the typed event registry, and this crate
//! owns the task-graph semantics built on top of both.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ttg::{Capability, TTBuilder, TTDyn};
//! use ttg_communication::{Configuration, SingleRank};
//!
//! ttg::initialize(Configuration::Thread, 0, |world| {
//!     let keymap = Arc::new(SingleRank);
//!     let mut builder = TTBuilder::<i32>::new("increment", keymap);
//!     let input = builder.input::<i32>("n", Capability::Read);
//!     let output = builder.output::<i32>("n_plus_one");
//!     let out_for_body = output.clone();
//!     builder.body(move |key, mut slots| {
//!         let n = slots.remove(0).into_read::<i32>();
//!         out_for_body.send(*key, *n.get() + 1)
//!     });
//!     let tt = builder.build(world.scheduler(), world.sender());
//!     let _ = input; // wired by the caller's graph-construction code
//!
//!     let seed: Arc<dyn TTDyn> = tt;
//!     ttg::make_graph_executable(&seed);
//!     ttg::fence(world, &seed);
//!     ttg::finalize(world);
//! }).unwrap().join();
//! ```

pub mod activation;
pub mod datacopy;
pub mod device;
pub mod edge;
pub mod error;
pub mod graph;
pub mod guard;
pub mod key;
pub mod logging;
pub mod scheduler;
pub mod terminal;
pub mod transport;
pub mod tt;
pub mod ttdyn;
pub mod value;

pub use datacopy::DataCopy;
pub use device::{DeviceContext, DevicePin, ExecutionSpace};
pub use edge::{connect, DynEndpoint, Edge};
pub use error::Error;
pub use graph::{dot, make_graph_executable, traverse, verify, Disconnection, VerifyReport};
pub use guard::{ConsumeHandle, ReadHandle};
pub use key::{Key, WireKey};
pub use logging::TtgEvent;
pub use scheduler::Scheduler;
pub use terminal::{Capability, InTerminal, OutTerminal};
pub use tt::{Body, SlotValue, TTBuilder, TemplateTask};
pub use ttdyn::{InputSlotInfo, OutputSlotInfo, TTDyn};
pub use value::{Value, WireValue};

/// Re-export of the `ttg_communication` crate (spec §4.8).
pub mod communication {
    pub use ttg_communication::*;
}

/// Re-export of the `ttg_logging` crate's registry/logger machinery (spec §B).
pub mod logging_core {
    pub use ttg_logging::*;
}

use std::sync::Arc;

use parking_lot::Mutex;

use logging::TtgEvent;
use transport::{RankTransport, RemoteSender};
use ttg_communication::{Configuration, Generic, RankGuards};
use ttg_logging::Logger;

/// One rank's handle to its scheduler and transport, handed to the
/// closure run by [`initialize`] (spec §6's "world" parameter to
/// `execute`/`fence`).
pub struct World {
    scheduler: Arc<Scheduler>,
    transport: Arc<RankTransport>,
    fence_logger: Mutex<Option<Logger<TtgEvent>>>,
}

impl World {
    fn new(num_threads: usize, alloc: Generic) -> World {
        World {
            scheduler: Scheduler::start(num_threads),
            transport: RankTransport::new(alloc),
            fence_logger: Mutex::new(None),
        }
    }

    /// Binds a logger for `fence`'s retry rounds (spec §B "Ambient stack").
    pub fn set_fence_logger(&self, logger: Logger<TtgEvent>) {
        *self.fence_logger.lock() = Some(logger);
    }

    /// This rank's index within the peer group.
    pub fn rank(&self) -> usize {
        self.transport.local_rank()
    }

    /// The number of ranks in the peer group.
    pub fn size(&self) -> usize {
        self.transport.peers()
    }

    /// This rank's scheduler, for use with [`TTBuilder::build`].
    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    /// This rank's transport as a [`RemoteSender`], for use with
    /// [`TTBuilder::build`].
    pub fn sender(&self) -> Arc<dyn RemoteSender> {
        self.transport.clone()
    }

    /// This rank's transport, for binding a [`ttg_communication::logging::CommunicationEvent`] logger.
    pub fn transport(&self) -> &Arc<RankTransport> {
        &self.transport
    }
}

/// Bootstraps the rank-level transports and worker pools described by
/// `config`, running `func` once per rank (spec §6: "bootstraps the
/// transport, establishes rank/size, starts the worker pool").
///
/// `num_threads` is this rank's scheduler worker count; `0` resolves to
/// the host's available parallelism (the idiomatic stand-in for spec's
/// `num_threads=-1` default, since Rust's thread counts are unsigned —
/// recorded in `DESIGN.md`).
pub fn initialize<T, F>(config: Configuration, num_threads: usize, func: F) -> Result<RankGuards<T>, String>
where
    T: Send + 'static,
    F: Fn(&World) -> T + Send + Sync + 'static,
{
    ttg_communication::initialize(config, move |alloc| {
        let world = World::new(num_threads, alloc);
        func(&world)
    })
}

/// Bootstraps from command-line-style arguments via
/// [`ttg_communication::Configuration::from_args`] (spec §6's
/// `initialize(argc, argv, ...)`).
#[cfg(feature = "getopts")]
pub fn initialize_from_args<T, F, I>(args: I, num_threads: usize, func: F) -> Result<RankGuards<T>, String>
where
    I: Iterator<Item = String>,
    T: Send + 'static,
    F: Fn(&World) -> T + Send + Sync + 'static,
{
    let config = Configuration::from_args(args)?;
    initialize(config, num_threads, func)
}

/// Begins draining the ready queue (spec §6). A `World`'s scheduler
/// already starts its worker pool in [`initialize`], so this is an
/// idempotent no-op, kept for parity with spec §6's four-function
/// surface (`initialize`/`execute`/`fence`/`finalize`).
pub fn execute(_world: &World) {}

/// Blocks until the subgraph reachable from `seed` is globally quiescent
/// on every rank (spec §6, §4.6). Must be called collectively, once per
/// rank, by every rank in the peer group.
pub fn fence(world: &World, seed: &Arc<dyn TTDyn>) {
    let logger = world.fence_logger.lock();
    graph::fence_with_logger(&world.scheduler, &world.transport, seed, logger.as_ref())
}

/// Reverses `initialize`: stops this rank's worker pool and transport
/// receive thread (spec §6).
pub fn finalize(world: &World) {
    world.scheduler.finalize();
    world.transport.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttdyn::{InputSlotInfo, OutputSlotInfo};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Leaf {
        executable: AtomicBool,
    }

    impl TTDyn for Leaf {
        fn id(&self) -> u32 {
            1
        }
        fn name(&self) -> &str {
            "leaf"
        }
        fn set_executable(&self, value: bool) {
            self.executable.store(value, Ordering::SeqCst);
        }
        fn is_executable(&self) -> bool {
            self.executable.load(Ordering::SeqCst)
        }
        fn input_slots(&self) -> Vec<InputSlotInfo> {
            Vec::new()
        }
        fn output_slots(&self) -> Vec<OutputSlotInfo> {
            Vec::new()
        }
        fn successors(&self) -> Vec<Arc<dyn TTDyn>> {
            Vec::new()
        }
        fn is_locally_quiescent(&self) -> bool {
            true
        }
    }

    #[test]
    fn initialize_runs_the_closure_once_per_rank_and_finalizes() {
        let guards = initialize(Configuration::Thread, 1, |world| {
            assert_eq!(world.rank(), 0);
            assert_eq!(world.size(), 1);
            let seed: Arc<dyn TTDyn> = Arc::new(Leaf { executable: AtomicBool::new(false) });
            execute(world);
            make_graph_executable(&seed);
            fence(world, &seed);
            finalize(world);
            42
        })
        .unwrap();
        let results = guards.join();
        assert_eq!(results.len(), 1);
        assert_eq!(*results[0].as_ref().unwrap(), 42);
    }

    #[test]
    fn process_configuration_yields_one_rank_per_peer() {
        let guards = initialize(Configuration::Process(3), 1, |world| {
            let result = (world.rank(), world.size());
            finalize(world);
            result
        })
        .unwrap();
        let mut results: Vec<(usize, usize)> = guards.join().into_iter().map(|r| r.unwrap()).collect();
        results.sort();
        assert_eq!(results, vec![(0, 3), (1, 3), (2, 3)]);
    }
}
