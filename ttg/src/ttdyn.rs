//! The object-safe face of a template task, used by the graph manager.
//!
//! DESIGN NOTES calls for recasting the source's inheritance-heavy task
//! hierarchy into "a trait/interface for TT (`key_type`, `input_schema`,
//! `invoke`), with the graph manager operating through that interface
//! only." [`TTDyn`] is that interface: it carries no generic key or value
//! parameter, so the free functions in [`crate::graph`] (`traverse`,
//! `verify`, `dot`, `make_graph_executable`, `fence`) can hold a
//! heterogeneous collection of TTs (each keyed and valued differently)
//! behind `Arc<dyn TTDyn>` and traverse, mark executable, and fence them
//! uniformly.

use std::sync::Arc;

use crate::device::ExecutionSpace;
use crate::terminal::Capability;

/// Introspection for one declared input slot (name, capability).
#[derive(Clone, Debug)]
pub struct InputSlotInfo {
    /// The slot's declared name.
    pub name: String,
    /// The slot's access capability.
    pub capability: Capability,
}

/// Introspection for one declared output terminal.
#[derive(Clone, Debug)]
pub struct OutputSlotInfo {
    /// The terminal's declared name.
    pub name: String,
    /// How many In terminals are presently connected to it.
    pub successor_count: usize,
}

/// The graph manager's view of a template task.
pub trait TTDyn: Send + Sync {
    /// This TT's process-wide unique identifier (spec §6's wire `tt_global_id`).
    fn id(&self) -> u32;
    /// This TT's declared name.
    fn name(&self) -> &str;
    /// Marks (or unmarks) this TT executable (spec §4.6).
    fn set_executable(&self, value: bool);
    /// Whether `make_graph_executable` has marked this TT executable.
    fn is_executable(&self) -> bool;
    /// This TT's declared input schema.
    fn input_slots(&self) -> Vec<InputSlotInfo>;
    /// This TT's declared output terminals and their current connectivity.
    fn output_slots(&self) -> Vec<OutputSlotInfo>;
    /// The TTs directly reachable by following this TT's Out terminals to
    /// their connected In terminals' owning tasks (spec §4.6 traversal).
    fn successors(&self) -> Vec<Arc<dyn TTDyn>>;
    /// Whether any activation records for this TT are presently in flight
    /// on this rank (the local half of `fence`, spec §4.6).
    fn is_locally_quiescent(&self) -> bool;
    /// Where this TT's body executes (spec §4.9). Defaults to `Host` so
    /// existing implementers (including test doubles) need not opt in.
    fn execution_space(&self) -> ExecutionSpace {
        ExecutionSpace::Host
    }
}
