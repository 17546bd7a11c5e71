//! The error taxonomy of spec §7.
//!
//! Graph-construction errors (`TypeMismatch`, `IllegalDirection`,
//! `Uninitialized`) are returned as `Result<_, Error>` to the building
//! thread. The runtime-fatal class (`DuplicateInput`, `UnknownPeer`,
//! `WireCorruption`, `AliasingViolation`, `NotExecutable`) is logged by the
//! caller and then turned into a `panic!`; per spec §7 there is no
//! partial-failure recovery path for these, so this crate does not pretend
//! otherwise by making them recoverable.

use std::fmt;

/// An error from the task-graph core.
#[derive(Debug)]
pub enum Error {
    /// Connecting an Out terminal to an In terminal whose value type does
    /// not admit the Out's value type (spec §4.1).
    TypeMismatch(String),
    /// Connecting an Out to an Out, or an In to an In (spec §4.1).
    IllegalDirection(String),
    /// Delivery to an In terminal before `set_callback` was invoked (spec §4.2).
    Uninitialized(String),
    /// A second value arrived for an already-filled slot at the same key (spec §4.5).
    DuplicateInput(String),
    /// An attempt to share a mutable `DataCopy` (spec §4.4).
    AliasingViolation(String),
    /// A key routed to a rank outside the peer group (spec §4.8).
    UnknownPeer(String),
    /// Deserialization or framing error on a received message (spec §4.8).
    WireCorruption(String),
    /// Firing attempted before `make_graph_executable` marked the graph executable (spec §4.6).
    NotExecutable(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TypeMismatch(m) => write!(f, "type mismatch: {}", m),
            Error::IllegalDirection(m) => write!(f, "illegal direction: {}", m),
            Error::Uninitialized(m) => write!(f, "uninitialized terminal: {}", m),
            Error::DuplicateInput(m) => write!(f, "duplicate input: {}", m),
            Error::AliasingViolation(m) => write!(f, "aliasing violation: {}", m),
            Error::UnknownPeer(m) => write!(f, "unknown peer: {}", m),
            Error::WireCorruption(m) => write!(f, "wire corruption: {}", m),
            Error::NotExecutable(m) => write!(f, "not executable: {}", m),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Whether this error belongs to the runtime-fatal class (spec §7):
    /// logged and then fatal, with no recovery path, as opposed to the
    /// graph-construction class returned to the building thread.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DuplicateInput(_)
                | Error::AliasingViolation(_)
                | Error::UnknownPeer(_)
                | Error::WireCorruption(_)
                | Error::NotExecutable(_)
        )
    }
}
