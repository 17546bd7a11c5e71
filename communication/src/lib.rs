//! Rank bootstrap and cross-rank transport for the `ttg` task-graph engine.
//!
//! This crate plays the role `timely_communication` plays for
//! `timely`: it owns the mechanics of starting up a peer group of ranks
//! and moving framed bytes between them. It knows nothing about template
//! tasks, activation records or keys; `ttg::Transport` builds on top of
//! the [`allocator::Transport`] trait here to pack/unpack and re-enter the
//! activation path (spec §4.8).

pub mod allocator;
pub mod initialize;
pub mod keymap;
pub mod logging;
pub mod message;

pub use allocator::{Generic, GenericBuilder, Transport, TransportBuilder};
pub use initialize::{initialize, initialize_from, Configuration, RankGuards};
pub use keymap::{Keymap, SingleRank};
pub use message::{Envelope, WireCorruption};
