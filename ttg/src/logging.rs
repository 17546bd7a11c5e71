//! Structured event logging for the task-graph engine (spec §B, "Ambient
//! stack"), mirroring `timely`'s own `TimelyEvent` registered against
//! `timely_logging::Logger`.
//!
//! Every variant corresponds to one of the state transitions named
//! elsewhere in this crate's doc comments: activation creation and slot
//! fill (`activation.rs`), firing (`tt.rs`), and fence rounds
//! (`graph.rs`). Cross-rank message traffic is logged separately, as
//! [`ttg_communication::logging::CommunicationEvent`], by the transport
//! layer that crate owns.

/// One loggable event from the task-graph core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TtgEvent {
    /// An `ActivationRecord` was created for `(tt_name, key)` on first
    /// input delivery (spec §4.5 step 2).
    ActivationCreated {
        /// The owning template task's declared name.
        tt_name: String,
        /// The activation's key, formatted for diagnostics.
        key: String,
    },
    /// One input slot of an in-flight activation was filled (spec §4.5 step 3).
    SlotFilled {
        /// The owning template task's declared name.
        tt_name: String,
        /// The activation's key, formatted for diagnostics.
        key: String,
        /// The filled slot's index.
        slot: usize,
    },
    /// An activation's required mask was satisfied and its body began
    /// running (spec §4.5 step 4, "Firing").
    ActivationFired {
        /// The owning template task's declared name.
        tt_name: String,
        /// The activation's key, formatted for diagnostics.
        key: String,
    },
    /// A fence round completed without reaching global quiescence and is
    /// about to retry (spec §4.6).
    FenceRoundRetried {
        /// Sum, across every rank that reported in this round, of
        /// cross-rank deliveries sent.
        total_sent: u64,
        /// Sum, across every rank that reported in this round, of
        /// cross-rank deliveries received.
        total_received: u64,
    },
}
