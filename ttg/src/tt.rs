//! Template tasks: the unit of computation (spec §3, §4.5, §4.6).
//!
//! [`TemplateTask`] is the concrete, generic-over-key runtime
//! representation; [`TTDyn`] (see `ttdyn.rs`) is its object-safe face for
//! the graph manager. [`TTBuilder`] is the construction surface a program
//! uses to declare a task's input schema and body, mirroring the
//! teacher's pattern of a builder that wires callbacks onto terminals
//! before the task itself is handed back to the caller as a shared,
//! `Arc`-backed handle.
//!
//! Building a `TemplateTask` uses `Arc::new_cyclic` because each input
//! terminal's delivery callback needs to call back into the task that
//! owns it (to look up the activation record and possibly enqueue a
//! firing) before the task's own `Arc` exists.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::activation::ActivationTable;
use crate::datacopy::DataCopy;
use crate::device::{DeviceBody, DeviceContext, ExecutionSpace};
use crate::error::Error;
use crate::guard::{ConsumeHandle, ReadHandle};
use crate::key::WireKey;
use crate::logging::TtgEvent;
use crate::scheduler::{Fireable, Scheduler};
use crate::terminal::{Capability, InTerminal, OutTerminal};
use crate::transport::RemoteEndpoint;
pub use crate::transport::RemoteSender;
use crate::ttdyn::{InputSlotInfo, OutputSlotInfo, TTDyn};
use crate::value::WireValue;
use ttg_logging::Logger;

/// One input slot's erased delivery, handed to the task body at fire
/// time. The body downcasts each entry according to its own declared
/// schema (spec §4.4: "the body receives arguments shaped by capability").
pub enum SlotValue {
    /// A `Read` slot's contents, boxed as `ReadHandle<V>`.
    Read(Box<dyn Any + Send + Sync>),
    /// A `Consume` slot's contents, boxed as `ConsumeHandle<V>`.
    Consume(Box<dyn Any + Send + Sync>),
    /// A `Control` slot carries no value.
    Control,
}

impl SlotValue {
    /// Downcasts a `Read` slot to its concrete `ReadHandle<V>`. Panics if
    /// called against the wrong slot or the wrong `V` — a programming
    /// error in the body's declared schema, not a runtime condition.
    pub fn into_read<V: WireValue>(self) -> ReadHandle<V> {
        match self {
            SlotValue::Read(boxed) => *boxed
                .downcast::<ReadHandle<V>>()
                .expect("SlotValue::into_read called with a type not matching the declared input schema"),
            _ => panic!("SlotValue::into_read called on a non-Read slot"),
        }
    }

    /// Downcasts a `Consume` slot to its concrete `ConsumeHandle<V>`.
    pub fn into_consume<V: WireValue>(self) -> ConsumeHandle<V> {
        match self {
            SlotValue::Consume(boxed) => *boxed
                .downcast::<ConsumeHandle<V>>()
                .expect("SlotValue::into_consume called with a type not matching the declared input schema"),
            _ => panic!("SlotValue::into_consume called on a non-Consume slot"),
        }
    }
}

/// A task body: given the activation's key and its filled input slots in
/// declaration order, runs the task's logic to completion, typically
/// `send`ing to captured `OutTerminal` handles along the way (spec §4.5's
/// "Firing").
pub type Body<K> = Arc<dyn Fn(&K, Vec<SlotValue>) -> Result<(), Error> + Send + Sync>;

type Decoder = Box<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send + Sync>, Error> + Send + Sync>;
type WireFn<K> = Box<dyn FnOnce(Weak<TemplateTask<K>>, usize, Arc<dyn TTDyn>) + Send>;

fn make_decoder<V: WireValue>(capability: Capability) -> Decoder {
    Box::new(move |payload: &[u8]| {
        let value: V = bincode::deserialize(payload)
            .map_err(|e| Error::WireCorruption(format!("failed to decode value payload: {}", e)))?;
        let data = DataCopy::new(value);
        Ok(match capability {
            Capability::Read => Box::new(ReadHandle::new(data)) as Box<dyn Any + Send + Sync>,
            Capability::Consume => Box::new(ConsumeHandle::new(data, true)) as Box<dyn Any + Send + Sync>,
            Capability::Control => Box::new(()) as Box<dyn Any + Send + Sync>,
        })
    })
}

/// A single `(TT, key)` activation's firing job, handed to the
/// [`Scheduler`].
struct FireJob<K: WireKey> {
    tt: Arc<TemplateTask<K>>,
    key: K,
    slots: Vec<SlotValue>,
}

impl<K: WireKey> Fireable for FireJob<K> {
    fn fire(self: Box<Self>) {
        if !self.tt.executable.load(Ordering::SeqCst) {
            panic!(
                "{}",
                Error::NotExecutable(format!(
                    "template task '{}' fired before the graph was made executable",
                    self.tt.name
                ))
            );
        }
        let result = match (&self.tt.body, &self.tt.device_body) {
            (_, Some(device_body)) => {
                let ctx = DeviceContext::new();
                device_body(&self.key, self.slots, &ctx)
            }
            (Some(body), None) => body(&self.key, self.slots),
            (None, None) => unreachable!("TTBuilder::build rejects a task with neither body nor device_body"),
        };
        if let Err(e) = result {
            eprintln!("template task '{}' body failed for key {:?}: {}", self.tt.name, self.key, e);
            if e.is_fatal() {
                panic!("{}", e);
            }
        }
    }
}

/// A template task: a key-indexed family of activations sharing one
/// input schema and one body (spec §3).
pub struct TemplateTask<K: WireKey> {
    id: u32,
    name: String,
    input_slots: Vec<InputSlotInfo>,
    input_decoders: Vec<Decoder>,
    out_descriptors: Vec<OutputDescriptorFn>,
    successors_fns: Vec<SuccessorsFn>,
    keymap: Arc<dyn ttg_communication::Keymap<K>>,
    priomap: Option<Arc<dyn Fn(&K) -> i32 + Send + Sync>>,
    inlinemap: Option<Arc<dyn Fn(&K) -> bool + Send + Sync>>,
    table: ActivationTable<K>,
    executable: AtomicBool,
    local_rank: usize,
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn RemoteSender>,
    body: Option<Body<K>>,
    device_body: Option<DeviceBody<K>>,
    execution_space: ExecutionSpace,
    self_weak: Weak<TemplateTask<K>>,
    logger: Option<Logger<TtgEvent>>,
}

type OutputDescriptorFn = Box<dyn Fn() -> OutputSlotInfo + Send + Sync>;
type SuccessorsFn = Box<dyn Fn() -> Vec<Arc<dyn TTDyn>> + Send + Sync>;

impl<K: WireKey> TemplateTask<K> {
    /// This task's process-wide global id, used to address it in wire
    /// envelopes (spec §6).
    pub fn id(&self) -> u32 {
        self.id
    }

    /// This task's declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn on_deliver<V: WireValue>(&self, slot: usize, key: K, data: DataCopy<V>, is_move_target: bool) -> Result<(), Error> {
        let rank = self.keymap.rank_of(&key);
        if rank != self.local_rank {
            let key_bytes = bincode::serialize(&key)
                .map_err(|e| Error::WireCorruption(format!("failed to encode key: {}", e)))?;
            let value_bytes = bincode::serialize(unsafe { data.read() })
                .map_err(|e| Error::WireCorruption(format!("failed to encode value: {}", e)))?;
            data.drop_ref();
            self.transport.send_remote(self.id, slot as u16, rank, key_bytes, Vec::new(), value_bytes);
            return Ok(());
        }

        let boxed: Box<dyn Any + Send + Sync> = match self.input_slots[slot].capability {
            Capability::Read => Box::new(ReadHandle::new(data)),
            Capability::Consume => Box::new(ConsumeHandle::new(data, is_move_target)),
            Capability::Control => Box::new(()),
        };
        self.fill_and_maybe_fire(slot, key, boxed)
    }

    /// As `on_deliver`, but for a multicast's worth of `keys` sharing one
    /// `data` in a single call (spec §4.8): remote-owned keys are grouped
    /// by `keymap.rank_of` and sent as one `broadcast_remote` per rank
    /// instead of one message per key; local-owned keys still fire
    /// through the ordinary activation path one at a time.
    fn on_deliver_broadcast<V: WireValue>(
        &self,
        slot: usize,
        keys: &[K],
        data: DataCopy<V>,
        move_target_idx: Option<usize>,
    ) -> Result<(), Error> {
        let ranks: Vec<usize> = keys.iter().map(|k| self.keymap.rank_of(k)).collect();

        let mut remote_groups: HashMap<usize, Vec<Vec<u8>>> = HashMap::new();
        for (key, &rank) in keys.iter().zip(&ranks) {
            if rank != self.local_rank {
                let key_bytes = bincode::serialize(key)
                    .map_err(|e| Error::WireCorruption(format!("failed to encode key: {}", e)))?;
                remote_groups.entry(rank).or_default().push(key_bytes);
            }
        }
        if !remote_groups.is_empty() {
            let value_bytes = bincode::serialize(unsafe { data.read() })
                .map_err(|e| Error::WireCorruption(format!("failed to encode value: {}", e)))?;
            let remote_count: usize = remote_groups.values().map(Vec::len).sum();
            let groups: Vec<(usize, Vec<Vec<u8>>)> = remote_groups.into_iter().collect();
            self.transport.broadcast_remote(self.id, slot as u16, groups, Vec::new(), value_bytes);
            for _ in 0..remote_count {
                data.drop_ref();
            }
        }

        for (i, (key, &rank)) in keys.iter().zip(&ranks).enumerate() {
            if rank == self.local_rank {
                let is_move_target = move_target_idx == Some(i);
                let boxed: Box<dyn Any + Send + Sync> = match self.input_slots[slot].capability {
                    Capability::Read => Box::new(ReadHandle::new(data.clone())),
                    Capability::Consume => Box::new(ConsumeHandle::new(data.clone(), is_move_target)),
                    Capability::Control => Box::new(()),
                };
                self.fill_and_maybe_fire(slot, key.clone(), boxed)?;
            }
        }
        Ok(())
    }

    fn fill_and_maybe_fire(&self, slot: usize, key: K, boxed: Box<dyn Any + Send + Sync>) -> Result<(), Error> {
        let (record, created) = self.table.get_or_insert(&key);
        if created {
            if let Some(logger) = &self.logger {
                logger.log(TtgEvent::ActivationCreated { tt_name: self.name.clone(), key: format!("{:?}", key) });
            }
        }
        let ready = record.fill_slot(slot, boxed)?;
        if let Some(logger) = &self.logger {
            logger.log(TtgEvent::SlotFilled { tt_name: self.name.clone(), key: format!("{:?}", key), slot });
        }
        if !ready {
            return Ok(());
        }
        self.table.remove(&key);
        if let Some(logger) = &self.logger {
            logger.log(TtgEvent::ActivationFired { tt_name: self.name.clone(), key: format!("{:?}", key) });
        }

        let mut slots = Vec::with_capacity(self.input_slots.len());
        for (i, info) in self.input_slots.iter().enumerate() {
            let boxed = record.take_slot(i);
            slots.push(match info.capability {
                Capability::Read => SlotValue::Read(boxed),
                Capability::Consume => SlotValue::Consume(boxed),
                Capability::Control => SlotValue::Control,
            });
        }

        let strong = self.self_weak.upgrade().expect("template task dropped while activations were still in flight");
        let priority = self.priomap.as_ref().map(|f| f(&key)).unwrap_or(0);
        let inline = self.inlinemap.as_ref().map(|f| f(&key)).unwrap_or(false);
        let job: Box<dyn Fireable> = Box::new(FireJob { tt: strong, key, slots });
        if inline {
            self.scheduler.fire_inline(job);
        } else {
            self.scheduler.enqueue(priority, job);
        }
        Ok(())
    }
}

impl<K: WireKey> RemoteEndpoint for TemplateTask<K> {
    fn deliver_remote(&self, slot: u16, key_bytes: &[u8], _header: &[u8], payload: &[u8]) -> Result<(), Error> {
        let key: K = bincode::deserialize(key_bytes)
            .map_err(|e| Error::WireCorruption(format!("failed to decode key: {}", e)))?;
        let slot = slot as usize;
        let boxed = (self.input_decoders[slot])(payload)?;
        self.fill_and_maybe_fire(slot, key, boxed)
    }
}

impl<K: WireKey> TTDyn for TemplateTask<K> {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_executable(&self, value: bool) {
        self.executable.store(value, Ordering::SeqCst);
    }

    fn is_executable(&self) -> bool {
        self.executable.load(Ordering::SeqCst)
    }

    fn input_slots(&self) -> Vec<InputSlotInfo> {
        self.input_slots.clone()
    }

    fn output_slots(&self) -> Vec<OutputSlotInfo> {
        self.out_descriptors.iter().map(|f| f()).collect()
    }

    fn successors(&self) -> Vec<Arc<dyn TTDyn>> {
        self.successors_fns.iter().flat_map(|f| f()).collect()
    }

    fn is_locally_quiescent(&self) -> bool {
        self.table.is_empty()
    }

    fn execution_space(&self) -> ExecutionSpace {
        self.execution_space
    }
}

/// Builds a [`TemplateTask`], declaring its input schema and body before
/// handing back a shared, ready-to-wire task.
pub struct TTBuilder<K: WireKey> {
    name: String,
    input_slots: Vec<InputSlotInfo>,
    decoders: Vec<Decoder>,
    wire_fns: Vec<WireFn<K>>,
    out_descriptors: Vec<OutputDescriptorFn>,
    successors_fns: Vec<SuccessorsFn>,
    keymap: Arc<dyn ttg_communication::Keymap<K>>,
    priomap: Option<Arc<dyn Fn(&K) -> i32 + Send + Sync>>,
    inlinemap: Option<Arc<dyn Fn(&K) -> bool + Send + Sync>>,
    body: Option<Body<K>>,
    device_body: Option<DeviceBody<K>>,
    execution_space: ExecutionSpace,
    logger: Option<Logger<TtgEvent>>,
}

impl<K: WireKey> TTBuilder<K> {
    /// Starts building a task named `name`, routed by `keymap` (spec §4.8).
    pub fn new(name: impl Into<String>, keymap: Arc<dyn ttg_communication::Keymap<K>>) -> Self {
        TTBuilder {
            name: name.into(),
            input_slots: Vec::new(),
            decoders: Vec::new(),
            wire_fns: Vec::new(),
            out_descriptors: Vec::new(),
            successors_fns: Vec::new(),
            keymap,
            priomap: None,
            inlinemap: None,
            body: None,
            device_body: None,
            execution_space: ExecutionSpace::Host,
            logger: None,
        }
    }

    /// Declares one input slot, returning the `InTerminal` handle the
    /// caller wires into the graph (via `OutTerminal::connect` or
    /// `Edge`). Slots are numbered in declaration order; that order is the
    /// index the body's `Vec<SlotValue>` is assembled in.
    pub fn input<V: WireValue>(&mut self, name: impl Into<String>, capability: Capability) -> InTerminal<K, V> {
        let name = name.into();
        let slot = self.input_slots.len();
        let terminal = InTerminal::<K, V>::new(name.clone(), capability);
        self.input_slots.push(InputSlotInfo { name, capability });
        self.decoders.push(make_decoder::<V>(capability));

        let wired = terminal.clone();
        self.wire_fns.push(Box::new(move |weak: Weak<TemplateTask<K>>, slot: usize, owner: Arc<dyn TTDyn>| {
            wired.set_owner(owner);
            let weak_ref = weak.clone();
            let weak_move = weak.clone();
            let weak_broadcast = weak;
            wired.set_callback(
                move |key, data| {
                    weak_ref.upgrade().expect("template task dropped while a delivery was in flight").on_deliver(slot, key, data, false)
                },
                move |key, data| {
                    weak_move.upgrade().expect("template task dropped while a delivery was in flight").on_deliver(slot, key, data, true)
                },
                move |keys, data, move_target_idx| {
                    weak_broadcast
                        .upgrade()
                        .expect("template task dropped while a delivery was in flight")
                        .on_deliver_broadcast(slot, keys, data, move_target_idx)
                },
            );
        }));
        terminal
    }

    /// Declares one output terminal. Unlike inputs, the returned handle is
    /// not retained by the builder for wiring purposes; the caller's body
    /// closure captures it directly to `send`/`broadcast` downstream. It
    /// is still registered here for introspection (`Dot`/`Verify`) and
    /// graph traversal (spec §4.6).
    pub fn output<V: WireValue>(&mut self, name: impl Into<String>) -> OutTerminal<K, V> {
        let name = name.into();
        let terminal = OutTerminal::<K, V>::new(name.clone());
        let descriptor_terminal = terminal.clone();
        self.out_descriptors.push(Box::new(move || OutputSlotInfo {
            name: descriptor_terminal.name().to_string(),
            successor_count: descriptor_terminal.successor_count(),
        }));
        let successors_terminal = terminal.clone();
        self.successors_fns.push(Box::new(move || successors_terminal.successor_owners()));
        terminal
    }

    /// Sets a per-key firing priority (spec §4.7); default priority is 0.
    pub fn priomap<F: Fn(&K) -> i32 + Send + Sync + 'static>(&mut self, f: F) -> &mut Self {
        self.priomap = Some(Arc::new(f));
        self
    }

    /// Marks keys for which firing should happen inline on the delivering
    /// thread rather than through the scheduler's queue (spec §4.5, §4.7).
    pub fn inlinemap<F: Fn(&K) -> bool + Send + Sync + 'static>(&mut self, f: F) -> &mut Self {
        self.inlinemap = Some(Arc::new(f));
        self
    }

    /// Sets the task body. Must be called before `build`.
    pub fn body<F: Fn(&K, Vec<SlotValue>) -> Result<(), Error> + Send + Sync + 'static>(&mut self, f: F) -> &mut Self {
        self.body = Some(Arc::new(f));
        self
    }

    /// Binds a logger for this task's activation-lifecycle events (spec §B).
    pub fn logger(&mut self, logger: Logger<TtgEvent>) -> &mut Self {
        self.logger = Some(logger);
        self
    }

    /// Declares this task as a device task (spec §4.9): its body runs
    /// through a [`DeviceContext`] rather than receiving slots directly,
    /// and the built task reports `ExecutionSpace::Device`. Mutually
    /// exclusive with [`TTBuilder::body`]; whichever is set last wins at
    /// `build()` time only in the sense that both may be set, but a task
    /// fires through `device_body` if present.
    pub fn device_body<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&K, Vec<SlotValue>, &DeviceContext) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.device_body = Some(Arc::new(f));
        self.execution_space = ExecutionSpace::Device;
        self
    }

    /// Finalizes construction, wiring every declared input terminal's
    /// callback and registering the task with the rank's transport for
    /// remote delivery (spec §4.8).
    pub fn build(self, scheduler: Arc<Scheduler>, transport: Arc<dyn RemoteSender>) -> Arc<TemplateTask<K>> {
        let id = transport.next_tt_id();
        let local_rank = transport.local_rank();
        let transport_for_registration = transport.clone();
        assert!(
            self.body.is_some() || self.device_body.is_some(),
            "TTBuilder::build called without a body or device_body"
        );
        let body = self.body.clone();
        let device_body = self.device_body.clone();
        let execution_space = self.execution_space;
        let tt = Arc::new_cyclic(|weak| TemplateTask {
            id,
            name: self.name,
            input_slots: self.input_slots,
            input_decoders: self.decoders,
            out_descriptors: self.out_descriptors,
            successors_fns: self.successors_fns,
            keymap: self.keymap,
            priomap: self.priomap,
            inlinemap: self.inlinemap,
            table: ActivationTable::new(self.wire_fns.len()),
            executable: AtomicBool::new(false),
            local_rank,
            scheduler,
            transport,
            body,
            device_body,
            execution_space,
            self_weak: weak.clone(),
            logger: self.logger,
        });
        let owner: Arc<dyn TTDyn> = tt.clone();
        for (slot, wire_fn) in self.wire_fns.into_iter().enumerate() {
            wire_fn(Arc::downgrade(&tt), slot, owner.clone());
        }
        let endpoint: Arc<dyn RemoteEndpoint> = tt.clone();
        transport_for_registration.register(id, endpoint);
        tt
    }
}
