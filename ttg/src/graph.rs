//! Graph traversal, executability, and the fence/termination protocol
//! (spec §4.6).
//!
//! [`traverse`] is the depth-first walk "from a seed TT following Out→In
//! connections, visiting each TT once"; [`verify`] and [`dot`] are its two
//! visitors. Back-edges (a TT feeding itself, as in the Fibonacci scenario)
//! are handled by the visited set in `traverse` rather than by forbidding
//! cycles — per DESIGN NOTES, "traversal must track a visited set and
//! never recurse infinitely."
//!
//! [`fence`] implements the distributed termination-detection round spec
//! §4.6 calls for: a rank is locally quiescent once its scheduler and
//! every activation table in the reachable subgraph are empty; globally
//! quiescent once every rank reports local quiescence *and* the
//! rank-summed counts of cross-rank deliveries sent and received agree (a
//! four-counter-style round, coordinated here over the same transport used
//! for activation traffic rather than a side channel).

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::TtgEvent;
use crate::scheduler::Scheduler;
use crate::transport::{RankTransport, RemoteSender};
use crate::ttdyn::TTDyn;
use ttg_logging::Logger;

/// Walks the subgraph reachable from `seed` by following each TT's Out
/// terminals to their connected successors, visiting each TT exactly once.
pub fn traverse(seed: &Arc<dyn TTDyn>) -> Vec<Arc<dyn TTDyn>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![seed.clone()];
    while let Some(tt) = stack.pop() {
        if !seen.insert(tt.id()) {
            continue;
        }
        let successors = tt.successors();
        order.push(tt);
        for succ in successors {
            if !seen.contains(&succ.id()) {
                stack.push(succ);
            }
        }
    }
    order
}

/// A disconnected Out terminal found by [`verify`]: `(tt_name, terminal_name)`.
pub type Disconnection = (String, String);

/// The result of the `Verify` visitor (spec §4.6, invariant 5 of spec §8:
/// "after `make_graph_executable` returns true, every Out terminal has at
/// least one connected In").
#[derive(Debug, Default, Clone)]
pub struct VerifyReport {
    /// Every Out terminal, reachable from the traversal seed, with zero
    /// connected successors.
    pub disconnected: Vec<Disconnection>,
}

impl VerifyReport {
    /// Whether every reachable Out terminal has at least one successor.
    pub fn is_fully_connected(&self) -> bool {
        self.disconnected.is_empty()
    }
}

/// Reports every Out terminal in the subgraph reachable from `seed` that
/// has no connected In terminal.
pub fn verify(seed: &Arc<dyn TTDyn>) -> VerifyReport {
    let mut disconnected = Vec::new();
    for tt in traverse(seed) {
        for out in tt.output_slots() {
            if out.successor_count == 0 {
                disconnected.push((tt.name().to_string(), out.name));
            }
        }
    }
    VerifyReport { disconnected }
}

/// Renders the subgraph reachable from `seed` as a Graphviz `dot` source,
/// one node per TT and one edge per Out→successor-TT connection (spec §4.6's
/// `Dot` visitor).
pub fn dot(seed: &Arc<dyn TTDyn>) -> String {
    let nodes = traverse(seed);
    let mut out = String::from("digraph ttg {\n");
    for tt in &nodes {
        out.push_str(&format!("  \"{}\" [label=\"{}\"];\n", tt.name(), tt.name()));
    }
    for tt in &nodes {
        for succ in tt.successors() {
            out.push_str(&format!("  \"{}\" -> \"{}\";\n", tt.name(), succ.name()));
        }
    }
    out.push_str("}\n");
    out
}

/// Traverses the subgraph reachable from `seed` and marks every visited TT
/// executable (spec §4.6). Returns whether the subgraph is fully connected
/// (the same check `verify` performs); firing is disallowed on any TT until
/// this has been called on a seed that reaches it.
pub fn make_graph_executable(seed: &Arc<dyn TTDyn>) -> bool {
    let nodes = traverse(seed);
    let report = verify(seed);
    for tt in &nodes {
        tt.set_executable(true);
    }
    report.is_fully_connected()
}

const FENCE_POLL_INTERVAL: Duration = Duration::from_micros(200);
const FENCE_ROUND_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Serialize, Deserialize)]
struct FenceReport {
    quiescent: bool,
    sent: u64,
    received: u64,
}

fn locally_quiescent(scheduler: &Scheduler, subgraph: &[Arc<dyn TTDyn>]) -> bool {
    scheduler.wait_quiescent();
    subgraph.iter().all(|tt| tt.is_locally_quiescent())
}

/// Blocks until the subgraph reachable from `seed` is globally quiescent:
/// every activation record drained, every in-flight message delivered, and
/// every local ready queue empty, across all ranks (spec §4.6).
///
/// Must be called collectively, once per rank, by every rank in the peer
/// group; `transport` is the same rank-local transport the subgraph's TTs
/// were built against.
pub fn fence(scheduler: &Scheduler, transport: &RankTransport, seed: &Arc<dyn TTDyn>) {
    fence_with_logger(scheduler, transport, seed, None)
}

/// As [`fence`], but logs each round that fails to reach global
/// quiescence via `logger` (spec §B "Ambient stack").
pub fn fence_with_logger(
    scheduler: &Scheduler,
    transport: &RankTransport,
    seed: &Arc<dyn TTDyn>,
    logger: Option<&Logger<TtgEvent>>,
) {
    let subgraph = traverse(seed);
    let peers = transport.peers();

    if peers <= 1 {
        while !locally_quiescent(scheduler, &subgraph) {
            thread::sleep(FENCE_POLL_INTERVAL);
        }
        return;
    }

    loop {
        let quiescent = locally_quiescent(scheduler, &subgraph);
        let (sent, received) = transport.message_counts();
        let report = FenceReport { quiescent, sent, received };
        let payload = bincode::serialize(&report).expect("FenceReport always encodes");

        for peer in 0..peers {
            if peer != transport.local_rank() {
                transport.send_fence_control(peer, payload.clone());
            }
        }

        let mut reports = vec![report];
        while reports.len() < peers {
            match transport.try_recv_fence_control() {
                Some(bytes) => {
                    let report: FenceReport =
                        bincode::deserialize(&bytes).expect("fence control messages are well-formed");
                    reports.push(report);
                }
                None => thread::sleep(FENCE_POLL_INTERVAL),
            }
        }

        let all_quiescent = reports.iter().all(|r| r.quiescent);
        let total_sent: u64 = reports.iter().map(|r| r.sent).sum();
        let total_received: u64 = reports.iter().map(|r| r.received).sum();
        if all_quiescent && total_sent == total_received {
            return;
        }
        if let Some(logger) = logger {
            logger.log(TtgEvent::FenceRoundRetried { total_sent, total_received });
        }
        thread::sleep(FENCE_ROUND_BACKOFF);
    }
}
