//! Rank-level transports.
//!
//! Mirrors the shape of `timely_communication`'s `allocator` module: a
//! small trait (`Transport`, playing the role of `Allocate`) built by a
//! matching `TransportBuilder` (playing the role of `AllocateBuilder`),
//! with concrete implementations for a single in-process rank (`thread`)
//! and several ranks sharing one OS process (`process`).
//!
//! The core's Non-goal of scheduling across heterogeneous rank sets (spec
//! §1) means a single enum of homogeneous variants, `Generic`, suffices;
//! there is no analogue of the teacher's `zero_copy` TCP networking stack
//! here (see `DESIGN.md`).

pub mod process;
pub mod thread;

/// A rank's endpoint into the cross-rank message fabric.
///
/// `send` and `try_recv` exchange already-framed wire bytes (the output of
/// `Envelope::to_wire`/`from_wire`); callers are expected to pack/unpack at
/// this boundary, matching spec §4.8's "serialises cross-rank messages".
pub trait Transport: Send {
    /// This rank's index among its peers.
    fn index(&self) -> usize;
    /// The number of ranks in the peer group.
    fn peers(&self) -> usize;
    /// Sends framed bytes to the given rank. `target == self.index()` is a
    /// valid loopback.
    fn send(&self, target: usize, wire: Vec<u8>);
    /// Drains one pending message addressed to this rank, if any.
    fn try_recv(&mut self) -> Option<Vec<u8>>;
}

/// Constructs a `Transport` from within the thread that will use it.
///
/// Transports that share state across ranks (like `process::Process`) are
/// not `Send` as a whole; instead a `Send` builder is handed to each
/// worker thread, which calls `build` to materialize its endpoint.
pub trait TransportBuilder: Send {
    /// The transport type this builder constructs.
    type Transport: Transport + 'static;
    /// Materializes the transport in the calling thread.
    fn build(self) -> Self::Transport;
}

/// A homogeneous collection of transport implementations.
pub enum Generic {
    /// Single rank, no cross-rank traffic possible.
    Thread(thread::Thread),
    /// Several ranks sharing one OS process, connected by channels.
    Process(process::Process),
}

impl Transport for Generic {
    fn index(&self) -> usize {
        match self {
            Generic::Thread(t) => t.index(),
            Generic::Process(p) => p.index(),
        }
    }
    fn peers(&self) -> usize {
        match self {
            Generic::Thread(t) => t.peers(),
            Generic::Process(p) => p.peers(),
        }
    }
    fn send(&self, target: usize, wire: Vec<u8>) {
        match self {
            Generic::Thread(t) => t.send(target, wire),
            Generic::Process(p) => p.send(target, wire),
        }
    }
    fn try_recv(&mut self) -> Option<Vec<u8>> {
        match self {
            Generic::Thread(t) => t.try_recv(),
            Generic::Process(p) => p.try_recv(),
        }
    }
}

/// Builder counterpart to `Generic`.
pub enum GenericBuilder {
    /// Builds a `Generic::Thread`.
    Thread(thread::ThreadBuilder),
    /// Builds a `Generic::Process`.
    Process(process::ProcessBuilder),
}

impl TransportBuilder for GenericBuilder {
    type Transport = Generic;
    fn build(self) -> Generic {
        match self {
            GenericBuilder::Thread(b) => Generic::Thread(b.build()),
            GenericBuilder::Process(b) => Generic::Process(b.build()),
        }
    }
}
