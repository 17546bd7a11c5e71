//! Cross-rank dispatch for template tasks (spec §4.8, §6).
//!
//! Wraps a rank's [`ttg_communication::Generic`] endpoint with the
//! `(tt_id, slot)` routing and value-descriptor framing the core
//! generic `ttg_communication::allocator::Transport` deliberately knows
//! nothing about. Grounded on `timely_communication`'s split between
//! "move framed bytes" (the allocator crate) and "give those bytes
//! dataflow meaning" (the `timely` crate's `Puller`/`Pusher` wrapping);
//! here the wrapping is a background thread that decodes each incoming
//! [`Envelope`] and re-enters the owning TT's `deliver_remote`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use ttg_communication::logging::{CommunicationEvent, CommunicationSetup};
use ttg_communication::{Envelope, Generic, Transport as AllocTransport};
use ttg_logging::Logger;

use crate::error::Error;

/// Reserved `tt_id` carrying fence round-trip control traffic (spec §4.6)
/// rather than an activation delivery; never assigned to a real template
/// task, since [`crate::tt::TTBuilder::build`] hands out ids starting at 1
/// from an independent counter that never reaches `u32::MAX`.
const FENCE_TT_ID: u32 = u32::MAX;

/// Registered by each built template task so incoming wire messages
/// destined for it can be decoded and re-enter its activation path.
pub trait RemoteEndpoint: Send + Sync {
    /// Decodes and delivers one slot's worth of a received envelope.
    fn deliver_remote(&self, slot: u16, key_bytes: &[u8], header: &[u8], payload: &[u8]) -> Result<(), Error>;
}

/// What a template task needs from the rank's transport in order to
/// forward a delivery owned by a remote rank (spec §4.5's keymap
/// routing step, §4.8's "cross-rank send").
pub trait RemoteSender: Send + Sync {
    /// Sends one key's value to the rank that owns it.
    fn send_remote(&self, tt_id: u32, slot: u16, target_rank: usize, key: Vec<u8>, header: Vec<u8>, payload: Vec<u8>);
    /// Sends one value to several keys, grouped by owning rank, in a
    /// single envelope per rank (spec §4.2's broadcast, carried remotely).
    fn broadcast_remote(
        &self,
        tt_id: u32,
        slot: u16,
        groups: Vec<(usize, Vec<Vec<u8>>)>,
        header: Vec<u8>,
        payload: Vec<u8>,
    );
    /// This rank's index.
    fn local_rank(&self) -> usize;
    /// The number of ranks in the peer group.
    fn peers(&self) -> usize;
    /// Registers a built template task's decode/delivery hook under its
    /// global id, so peer ranks can route messages to it.
    fn register(&self, tt_id: u32, endpoint: Arc<dyn RemoteEndpoint>);
    /// Allocates the next process-wide template-task id (spec §6's wire
    /// `tt_global_id`). Rank-local rather than a single process-wide
    /// static: a real deployment runs one independent process per rank, so
    /// a program that builds the same TTs in the same order on every rank
    /// gets matching ids symmetrically, the way `timely`'s workers draw
    /// dataflow identifiers from their own local counter rather than a
    /// single shared one. A thread-multiplexed multi-rank test harness
    /// (`ttg_communication::Configuration::Process`, all ranks sharing one
    /// address space) depends on this: a single shared counter would let
    /// concurrently-building ranks race each other out of step and hand
    /// the "same" logical TT different ids on different ranks.
    fn next_tt_id(&self) -> u32;
}

/// The rank-local cross-rank transport.
///
/// Every built [`crate::tt::TemplateTask`] registers itself here under its
/// global id; a background thread polls the underlying
/// `ttg_communication::Generic` endpoint, decodes each arriving
/// [`Envelope`], and dispatches it to the matching `RemoteEndpoint`.
pub struct RankTransport {
    alloc: Arc<Mutex<Generic>>,
    endpoints: Mutex<HashMap<u32, Arc<dyn RemoteEndpoint>>>,
    local_rank: usize,
    peers: usize,
    shutdown: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    fence_inbox: Mutex<VecDeque<Vec<u8>>>,
    sent_deliveries: AtomicU64,
    received_deliveries: AtomicU64,
    logger: Mutex<Option<Logger<CommunicationEvent>>>,
    next_tt_id: AtomicU32,
}

impl RankTransport {
    /// Wraps an already-built rank transport and starts its receive loop.
    pub fn new(alloc: Generic) -> Arc<RankTransport> {
        let local_rank = alloc.index();
        let peers = alloc.peers();
        let alloc = Arc::new(Mutex::new(alloc));
        let shutdown = Arc::new(AtomicBool::new(false));
        let transport = Arc::new(RankTransport {
            alloc: alloc.clone(),
            endpoints: Mutex::new(HashMap::new()),
            local_rank,
            peers,
            shutdown: shutdown.clone(),
            receiver: Mutex::new(None),
            fence_inbox: Mutex::new(VecDeque::new()),
            sent_deliveries: AtomicU64::new(0),
            received_deliveries: AtomicU64::new(0),
            logger: Mutex::new(None),
            next_tt_id: AtomicU32::new(1),
        });

        let loop_alloc = alloc;
        let loop_endpoints = Arc::downgrade(&transport);
        let handle = thread::Builder::new()
            .name(format!("ttg transport rank {}", local_rank))
            .spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    let wire = loop_alloc.lock().try_recv();
                    match wire {
                        Some(bytes) => {
                            if let Some(transport) = loop_endpoints.upgrade() {
                                transport.dispatch_received(bytes);
                            } else {
                                return;
                            }
                        }
                        None => thread::sleep(Duration::from_micros(200)),
                    }
                }
            })
            .expect("failed to spawn ttg transport receive thread");
        *transport.receiver.lock() = Some(handle);
        transport
    }

    fn dispatch_received(&self, wire: Vec<u8>) {
        if let Some(logger) = self.logger.lock().as_ref() {
            logger.log(CommunicationEvent::MessageReceived { bytes: wire.len() });
        }
        let envelope = match Envelope::from_wire(&wire) {
            Ok(e) => e,
            Err(e) => {
                let err = Error::WireCorruption(e.to_string());
                eprintln!("rank {}: {}", self.local_rank, err);
                panic!("{}", err);
            }
        };

        if envelope.tt_id == FENCE_TT_ID {
            self.fence_inbox.lock().push_back(envelope.payload);
            return;
        }

        self.received_deliveries.fetch_add(envelope.keys.len() as u64, Ordering::SeqCst);
        let endpoint = self.endpoints.lock().get(&envelope.tt_id).cloned();
        let Some(endpoint) = endpoint else {
            let err = Error::UnknownPeer(format!("no template task registered for tt_id {}", envelope.tt_id));
            eprintln!("rank {}: {}", self.local_rank, err);
            panic!("{}", err);
        };
        for key_bytes in &envelope.keys {
            if let Err(e) = endpoint.deliver_remote(envelope.slot, key_bytes, &envelope.header, &envelope.payload) {
                eprintln!("rank {}: {}", self.local_rank, e);
                if e.is_fatal() {
                    panic!("{}", e);
                }
            }
        }
    }

    /// Binds a logger for message-traffic events (spec §B "Ambient stack").
    pub fn set_logger(&self, logger: Logger<CommunicationEvent>) {
        *self.logger.lock() = Some(logger);
    }

    /// This rank's logging setup descriptor, handed to a caller deciding
    /// whether (and how) to attach a [`CommunicationEvent`] logger —
    /// e.g. only on rank 0, or only when `peers() > 1` (spec §B, mirroring
    /// the teacher's `Fn(CommunicationSetup) -> Option<Logger<_>>` callback).
    pub fn setup(&self) -> CommunicationSetup {
        CommunicationSetup { index: self.local_rank, peers: self.peers }
    }

    /// The running totals of cross-rank activation deliveries sent from,
    /// and received on, this rank — the two of the four counters spec
    /// §4.6's termination round compares across ranks.
    pub fn message_counts(&self) -> (u64, u64) {
        (self.sent_deliveries.load(Ordering::SeqCst), self.received_deliveries.load(Ordering::SeqCst))
    }

    /// Sends one round of fence control traffic to `target` (spec §4.6),
    /// out of band from activation deliveries.
    pub fn send_fence_control(&self, target: usize, payload: Vec<u8>) {
        let envelope = Envelope { tt_id: FENCE_TT_ID, slot: 0, keys: Vec::new(), header: Vec::new(), payload };
        self.alloc.lock().send(target, envelope.to_wire());
    }

    /// Drains one pending fence control message addressed to this rank, if any.
    pub fn try_recv_fence_control(&self) -> Option<Vec<u8>> {
        self.fence_inbox.lock().pop_front()
    }

    /// Stops the background receive thread. Does not drain in-flight
    /// messages; callers should `fence` first.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.receiver.lock().take() {
            let _ = handle.join();
        }
    }
}

impl RankTransport {
    fn send_envelope(&self, rank: usize, envelope: &Envelope) {
        let wire = envelope.to_wire();
        if let Some(logger) = self.logger.lock().as_ref() {
            logger.log(CommunicationEvent::MessageSent { target: rank, bytes: wire.len() });
        }
        self.alloc.lock().send(rank, wire);
    }
}

impl RemoteSender for RankTransport {
    fn send_remote(&self, tt_id: u32, slot: u16, target_rank: usize, key: Vec<u8>, header: Vec<u8>, payload: Vec<u8>) {
        self.sent_deliveries.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope { tt_id, slot, keys: vec![key], header, payload };
        self.send_envelope(target_rank, &envelope);
    }

    fn broadcast_remote(
        &self,
        tt_id: u32,
        slot: u16,
        groups: Vec<(usize, Vec<Vec<u8>>)>,
        header: Vec<u8>,
        payload: Vec<u8>,
    ) {
        for (rank, keys) in groups {
            self.sent_deliveries.fetch_add(keys.len() as u64, Ordering::SeqCst);
            let envelope = Envelope { tt_id, slot, keys, header: header.clone(), payload: payload.clone() };
            self.send_envelope(rank, &envelope);
        }
    }

    fn local_rank(&self) -> usize {
        self.local_rank
    }

    fn peers(&self) -> usize {
        self.peers
    }

    fn register(&self, tt_id: u32, endpoint: Arc<dyn RemoteEndpoint>) {
        self.endpoints.lock().insert(tt_id, endpoint);
    }

    fn next_tt_id(&self) -> u32 {
        self.next_tt_id.fetch_add(1, Ordering::SeqCst)
    }
}
