//! Logging event types for the communication layer.
//!
//! Adapted from `timely_communication::logging`: a small `*Setup` struct
//! identifying the rank a logger belongs to, and an event enum describing
//! message traffic.

/// Identifies which rank a communication logger is attached to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommunicationSetup {
    /// Rank index.
    pub index: usize,
    /// Number of peer ranks.
    pub peers: usize,
}

/// Events on the cross-rank message fabric.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommunicationEvent {
    /// A framed message was handed to the transport for sending.
    MessageSent {
        /// Destination rank.
        target: usize,
        /// Size of the framed message, in bytes.
        bytes: usize,
    },
    /// A framed message was drained from the transport's inbox.
    MessageReceived {
        /// Size of the framed message, in bytes.
        bytes: usize,
    },
}
