//! In-process protocol engine
//!
//! [`CasEngine`] plays the part of the Channel Access server library: it
//! owns channel bookkeeping, monitor fan-out, the table of outstanding
//! asynchronous writes and the completion queue, and it drives the installed
//! [`CaServer`] and the attached [`CasPv`]s through their callback contract.
//! Requests arrive either through direct calls or through [`CaClient`]s whose
//! queued requests are serviced by [`CasEngine::process`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use super::client::{CaClient, Request};
use super::context::{CasCtx, Completion, CompletionSender};
use super::events::{CasEventMask, EventVocabulary};
use super::gdd::{Gdd, ValueLedger};
use super::types::{AitEnum, CaNetAddr, CaStatus, PvAttachReturn, PvExistReturn};
use super::{CaServer, CasAsyncIo, CasPv};

/// An event delivered to a monitor.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub pv: String,
    pub mask: CasEventMask,
    pub value: Arc<Gdd>,
}

/// A monitor on one channel.
pub struct Subscription {
    id: u64,
    pv: String,
    events: Receiver<EngineEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pv(&self) -> &str {
        &self.pv
    }

    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }
}

/// Outcome of a write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Completed(CaStatus),
    /// The PV took the request asynchronously; the result arrives through
    /// the completion queue.
    Pending(u64),
}

struct Monitor {
    id: u64,
    mask: CasEventMask,
    tx: Sender<EngineEvent>,
}

struct Channel {
    pv: Arc<dyn CasPv>,
    key: PvKey,
    connections: usize,
    monitors: Vec<Monitor>,
}

/// Identity of an attached PV object, shared by all channels that reach it.
type PvKey = usize;

fn pv_key(pv: &Arc<dyn CasPv>) -> PvKey {
    Arc::as_ptr(pv) as *const () as usize
}

/// Per-PV bookkeeping. A PV reached under several names (aliases) has one
/// binding; interest and destruction follow the binding, not the channel.
struct Binding {
    pv: Arc<dyn CasPv>,
    channels: usize,
    interested: bool,
    /// Set while `destroy` runs outside the lock. Attaches of the same PV
    /// wait for it to finish.
    closing: bool,
}

#[derive(Default)]
struct Registry {
    channels: HashMap<String, Channel>,
    bindings: HashMap<PvKey, Binding>,
}

impl Registry {
    fn has_monitors(&self, key: PvKey) -> bool {
        self.channels
            .values()
            .any(|ch| ch.key == key && !ch.monitors.is_empty())
    }

    fn is_closing(&self, key: PvKey) -> bool {
        self.bindings.get(&key).is_some_and(|b| b.closing)
    }

    /// Add a channel's claim on its PV.
    fn bind(&mut self, key: PvKey, pv: &Arc<dyn CasPv>) {
        self.bindings
            .entry(key)
            .or_insert_with(|| Binding {
                pv: pv.clone(),
                channels: 0,
                interested: false,
                closing: false,
            })
            .channels += 1;
    }

    /// Drop a closed channel's claim on its PV.
    fn unbind(&mut self, key: PvKey) -> Unbind {
        let monitored = self.has_monitors(key);
        let Some(binding) = self.bindings.get_mut(&key) else {
            return Unbind::Kept;
        };
        binding.channels = binding.channels.saturating_sub(1);
        if binding.channels == 0 {
            binding.closing = true;
            return Unbind::Destroy {
                key,
                pv: binding.pv.clone(),
                interested: std::mem::take(&mut binding.interested),
            };
        }
        if binding.interested && !monitored {
            binding.interested = false;
            return Unbind::LoseInterest(binding.pv.clone());
        }
        Unbind::Kept
    }
}

/// What closing a channel asks of its PV.
enum Unbind {
    Kept,
    LoseInterest(Arc<dyn CasPv>),
    Destroy {
        key: PvKey,
        pv: Arc<dyn CasPv>,
        interested: bool,
    },
}

struct PendingWrite {
    pv: String,
    io: Arc<dyn CasAsyncIo>,
    reply: Option<Sender<CaStatus>>,
}

#[derive(Default)]
struct WriteTable {
    pending: HashMap<u64, PendingWrite>,
    in_flight: HashSet<u64>,
    /// Completions that arrived while their write callback was still running.
    early: HashMap<u64, CaStatus>,
}

enum Work {
    Request(Request),
    Completion(Completion),
}

/// The protocol engine.
pub struct CasEngine {
    server: RwLock<Option<Weak<dyn CaServer>>>,
    vocabulary: EventVocabulary,
    registry: Mutex<Registry>,
    /// Signalled whenever a closing binding is removed.
    closed: Condvar,
    writes: Mutex<WriteTable>,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
    request_tx: Sender<Request>,
    request_rx: Receiver<Request>,
    next_id: AtomicU64,
    ledger: ValueLedger,
    running: AtomicBool,
}

impl CasEngine {
    pub fn new() -> Arc<Self> {
        let (completion_tx, completion_rx) = unbounded();
        let (request_tx, request_rx) = unbounded();
        info!("Creating Channel Access engine");
        Arc::new(Self {
            server: RwLock::new(None),
            vocabulary: EventVocabulary::new(),
            registry: Mutex::new(Registry::default()),
            closed: Condvar::new(),
            writes: Mutex::new(WriteTable::default()),
            completion_tx,
            completion_rx,
            request_tx,
            request_rx,
            next_id: AtomicU64::new(1),
            ledger: ValueLedger::new(),
            running: AtomicBool::new(true),
        })
    }

    /// Install the server application. The engine does not keep it alive.
    pub fn install_server(&self, server: Weak<dyn CaServer>) {
        *self.server.write() = Some(server);
        debug!("Server application installed");
    }

    pub fn vocabulary(&self) -> &EventVocabulary {
        &self.vocabulary
    }

    /// Allocate a container counted by the engine's value ledger.
    pub fn new_value(&self, primitive: AitEnum) -> Gdd {
        Gdd::tracked(primitive, &self.ledger)
    }

    /// Number of ledger-tracked containers still alive.
    pub fn live_values(&self) -> usize {
        self.ledger.live()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// A queued request handle for a client at `address`.
    pub fn client(&self, address: CaNetAddr) -> CaClient {
        CaClient::new(self.request_tx.clone(), address)
    }

    pub fn completion_sender(&self) -> CompletionSender {
        CompletionSender::new(self.completion_tx.clone())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn new_context(&self) -> CasCtx {
        CasCtx::new(self.next_id(), self.completion_sender())
    }

    fn server(&self) -> Option<Arc<dyn CaServer>> {
        if !self.is_running() {
            return None;
        }
        self.server.read().as_ref().and_then(Weak::upgrade)
    }

    fn channel_pv(&self, name: &str) -> Option<Arc<dyn CasPv>> {
        self.registry.lock().channels.get(name).map(|ch| ch.pv.clone())
    }

    /// Open connections on channel `name`.
    pub fn connection_count(&self, name: &str) -> usize {
        self.registry
            .lock()
            .channels
            .get(name)
            .map_or(0, |ch| ch.connections)
    }

    /// Ask the server whether it serves `name`.
    pub fn exist_test(&self, client: CaNetAddr, name: &str) -> PvExistReturn {
        let Some(server) = self.server() else {
            return PvExistReturn::DoesNotExistHere;
        };
        let ctx = self.new_context();
        let answer = server.pv_exist_test(&ctx, &client, name);
        trace!(pv = name, client = %client, ?answer, "Existence test");
        answer
    }

    /// Open a connection to `name`, attaching the PV on first use.
    ///
    /// Channels reaching the same PV object under different names share one
    /// binding. An attach that finds its PV being destroyed by a concurrent
    /// release waits for the destruction and asks the server again.
    pub fn attach(&self, name: &str) -> Result<(), CaStatus> {
        loop {
            if let Some(channel) = self.registry.lock().channels.get_mut(name) {
                channel.connections += 1;
                return Ok(());
            }

            let server = self.server().ok_or(CaStatus::PvNotFound)?;
            let ctx = self.new_context();
            let pv = match server.pv_attach(&ctx, name) {
                PvAttachReturn::Pv(pv) => pv,
                PvAttachReturn::Status(status) => {
                    debug!(pv = name, %status, "Attach refused");
                    return Err(status);
                }
            };
            let key = pv_key(&pv);

            let mut registry = self.registry.lock();
            if registry.is_closing(key) {
                debug!(pv = name, "PV is being destroyed, attaching again");
                while registry.is_closing(key) {
                    self.closed.wait(&mut registry);
                }
                continue;
            }

            let existing = registry.channels.get_mut(name).map(|channel| {
                // Another connection attached concurrently.
                channel.connections += 1;
                channel.key
            });
            match existing {
                Some(existing) if existing == key => {}
                Some(_) if registry.bindings.contains_key(&key) => {}
                Some(_) => {
                    // The server handed out a PV nothing else holds; undo its registration.
                    registry.bind(key, &pv);
                    let unbind = registry.unbind(key);
                    drop(registry);
                    self.close(unbind);
                }
                None => {
                    debug!(pv = name, "Channel attached");
                    registry.bind(key, &pv);
                    registry.channels.insert(
                        name.to_owned(),
                        Channel {
                            pv,
                            key,
                            connections: 1,
                            monitors: Vec::new(),
                        },
                    );
                }
            }
            return Ok(());
        }
    }

    /// Read the current value of an attached PV.
    pub fn read(&self, name: &str) -> Result<Gdd, CaStatus> {
        let pv = self.channel_pv(name).ok_or(CaStatus::PvNotFound)?;
        let ctx = self.new_context();
        let mut prototype = Gdd::new(pv.best_external_type());
        match pv.read(&ctx, &mut prototype) {
            CaStatus::Success => Ok(prototype),
            CaStatus::AsyncCompletion => {
                warn!(pv = name, "Asynchronous read completion is not supported");
                Err(CaStatus::NoSupport)
            }
            status => Err(status),
        }
    }

    /// Write to an attached PV.
    pub fn write(&self, name: &str, value: &Gdd) -> WriteOutcome {
        self.start_write(name, value, None)
    }

    fn start_write(&self, name: &str, value: &Gdd, reply: Option<Sender<CaStatus>>) -> WriteOutcome {
        let Some(pv) = self.channel_pv(name) else {
            if let Some(reply) = reply {
                let _ = reply.send(CaStatus::PvNotFound);
            }
            return WriteOutcome::Completed(CaStatus::PvNotFound);
        };

        let ctx = self.new_context();
        let id = ctx.request_id();
        self.writes.lock().in_flight.insert(id);

        let mut status = pv.write(&ctx, value);
        let io = ctx.take_async_io();

        let mut writes = self.writes.lock();
        writes.in_flight.remove(&id);
        let early = writes.early.remove(&id);

        match (status, io) {
            (CaStatus::AsyncCompletion, Some(io)) => {
                let pending = PendingWrite {
                    pv: name.to_owned(),
                    io,
                    reply,
                };
                match early {
                    Some(done) => {
                        drop(writes);
                        Self::finish_write(pending, done);
                        return WriteOutcome::Completed(done);
                    }
                    None => {
                        writes.pending.insert(id, pending);
                        debug!(pv = name, request = id, "Write pending");
                        return WriteOutcome::Pending(id);
                    }
                }
            }
            (CaStatus::AsyncCompletion, None) => {
                drop(writes);
                warn!(pv = name, "Asynchronous completion without an I/O object");
                status = CaStatus::NoSupport;
            }
            (_, Some(io)) => {
                drop(writes);
                io.destroy();
            }
            (_, None) => drop(writes),
        }

        if let Some(reply) = reply {
            let _ = reply.send(status);
        }
        WriteOutcome::Completed(status)
    }

    fn finish_write(pending: PendingWrite, status: CaStatus) {
        debug!(pv = %pending.pv, request = pending.io.request_id(), %status, "Write completed");
        if let Some(reply) = pending.reply {
            let _ = reply.send(status);
        }
        pending.io.destroy();
    }

    fn complete(&self, completion: Completion) {
        let mut writes = self.writes.lock();
        if let Some(pending) = writes.pending.remove(&completion.request_id) {
            drop(writes);
            Self::finish_write(pending, completion.status);
        } else if writes.in_flight.contains(&completion.request_id) {
            writes.early.insert(completion.request_id, completion.status);
        } else {
            debug!(request = completion.request_id, "Completion for unknown request ignored");
        }
    }

    /// Subscribe to events of an attached PV. The first monitor on a PV,
    /// across all names it is attached under, registers interest with it.
    pub fn subscribe(&self, name: &str, mask: CasEventMask) -> Result<Subscription, CaStatus> {
        let (pv, key, register) = {
            let mut registry = self.registry.lock();
            let channel = registry.channels.get(name).ok_or(CaStatus::PvNotFound)?;
            let (pv, key) = (channel.pv.clone(), channel.key);
            let binding = registry.bindings.get_mut(&key).ok_or(CaStatus::PvNotFound)?;
            let register = !binding.interested;
            binding.interested = true;
            (pv, key, register)
        };

        if register {
            let status = pv.interest_register();
            if !status.is_success() {
                let mut registry = self.registry.lock();
                let monitored = registry.has_monitors(key);
                if let Some(binding) = registry.bindings.get_mut(&key) {
                    binding.interested = monitored;
                }
                return Err(status);
            }
        }

        let (tx, events) = unbounded();
        let id = self.next_id();
        let mut registry = self.registry.lock();
        let channel = registry.channels.get_mut(name).ok_or(CaStatus::PvNotFound)?;
        channel.monitors.push(Monitor { id, mask, tx });
        debug!(pv = name, monitor = id, %mask, "Monitor added");
        Ok(Subscription {
            id,
            pv: name.to_owned(),
            events,
        })
    }

    /// Remove a monitor. Removing the PV's last one deletes its interest.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let pv = {
            let mut registry = self.registry.lock();
            let Some(channel) = registry.channels.get_mut(&subscription.pv) else {
                return;
            };
            channel.monitors.retain(|m| m.id != subscription.id);
            let key = channel.key;
            let monitored = registry.has_monitors(key);
            match registry.bindings.get_mut(&key) {
                Some(binding) if binding.interested && !monitored && !binding.closing => {
                    binding.interested = false;
                    Some(binding.pv.clone())
                }
                _ => None,
            }
        };
        if let Some(pv) = pv {
            pv.interest_delete();
        }
    }

    /// Close one connection to `name`. When the last channel reaching a PV
    /// goes, the PV's interest is deleted and the PV is destroyed.
    pub fn release(&self, name: &str) {
        let unbind = {
            let mut registry = self.registry.lock();
            let Some(channel) = registry.channels.get_mut(name) else {
                return;
            };
            channel.connections = channel.connections.saturating_sub(1);
            if channel.connections > 0 {
                return;
            }
            let Some(channel) = registry.channels.remove(name) else {
                return;
            };
            debug!(pv = name, "Channel closed");
            registry.unbind(channel.key)
        };
        self.close(unbind);
    }

    fn close(&self, unbind: Unbind) {
        match unbind {
            Unbind::Kept => {}
            Unbind::LoseInterest(pv) => pv.interest_delete(),
            Unbind::Destroy { key, pv, interested } => {
                if interested {
                    pv.interest_delete();
                }
                debug!(pv = pv.get_name(), "Last channel closed, destroying PV");
                pv.destroy();
                self.registry.lock().bindings.remove(&key);
                self.closed.notify_all();
            }
        }
    }

    /// Deliver an event to every monitor of the PV named `name` whose mask
    /// intersects `mask`, on every channel the PV is attached under. Returns
    /// the number of monitors reached.
    pub fn post_event(&self, name: &str, mask: CasEventMask, value: &Arc<Gdd>) -> usize {
        let mut registry = self.registry.lock();
        let mut delivered = 0;
        for (channel_name, channel) in registry.channels.iter_mut() {
            if channel.pv.get_name() != name {
                continue;
            }
            channel.monitors.retain(|monitor| {
                if !monitor.mask.intersects(mask) {
                    return true;
                }
                let event = EngineEvent {
                    pv: channel_name.clone(),
                    mask,
                    value: value.clone(),
                };
                match monitor.tx.send(event) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(_) => false,
                }
            });
        }
        trace!(pv = name, %mask, delivered, "Event posted");
        delivered
    }

    /// Service queued requests and completions.
    ///
    /// Waits at most `timeout` for the first piece of work, then services
    /// whatever else is already queued and returns the number of items
    /// handled. Returns 0 after the timeout when nothing arrived.
    pub fn process(&self, timeout: Duration) -> usize {
        let first = select! {
            recv(self.request_rx) -> msg => msg.ok().map(Work::Request),
            recv(self.completion_rx) -> msg => msg.ok().map(Work::Completion),
            default(timeout) => None,
        };
        let Some(first) = first else {
            return 0;
        };

        self.service(first);
        let mut serviced = 1;

        let backlog = self.request_rx.len() + self.completion_rx.len();
        for _ in 0..backlog {
            if let Ok(completion) = self.completion_rx.try_recv() {
                self.service(Work::Completion(completion));
            } else if let Ok(request) = self.request_rx.try_recv() {
                self.service(Work::Request(request));
            } else {
                break;
            }
            serviced += 1;
        }
        serviced
    }

    /// Handle every completion that is already queued, without waiting.
    pub fn process_completions(&self) -> usize {
        let mut handled = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.complete(completion);
            handled += 1;
        }
        handled
    }

    fn service(&self, work: Work) {
        match work {
            Work::Completion(completion) => self.complete(completion),
            Work::Request(request) => self.handle_request(request),
        }
    }

    fn handle_request(&self, request: Request) {
        match request {
            Request::Search { client, name, reply } => {
                let _ = reply.send(self.exist_test(client, &name));
            }
            Request::Connect { name, reply } => {
                let _ = reply.send(self.attach(&name));
            }
            Request::Get { name, reply } => {
                let _ = reply.send(self.read(&name));
            }
            Request::Put { name, value, reply } => {
                self.start_write(&name, &value, Some(reply));
            }
            Request::Disconnect { name } => self.release(&name),
        }
    }

    /// Stop serving: destroy every attached PV and abandon pending writes.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down Channel Access engine");

        let closing: Vec<Unbind> = {
            let mut registry = self.registry.lock();
            registry.channels.clear();
            registry
                .bindings
                .iter_mut()
                .filter(|(_, binding)| !binding.closing)
                .map(|(key, binding)| {
                    binding.closing = true;
                    Unbind::Destroy {
                        key: *key,
                        pv: binding.pv.clone(),
                        interested: std::mem::take(&mut binding.interested),
                    }
                })
                .collect()
        };
        for unbind in closing {
            self.close(unbind);
        }

        let pending: Vec<PendingWrite> = {
            let mut writes = self.writes.lock();
            writes.early.clear();
            writes.pending.drain().map(|(_, p)| p).collect()
        };
        for write in pending {
            Self::finish_write(write, CaStatus::NoSupport);
        }
    }
}

impl fmt::Debug for CasEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CasEngine")
            .field("running", &self.is_running())
            .field("channels", &self.registry.lock().channels.len())
            .field("pending_writes", &self.writes.lock().pending.len())
            .finish()
    }
}

impl Drop for CasEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GddData;
    use std::net::Ipv4Addr;
    use std::sync::atomic::AtomicUsize;

    /// Static PV that records how the engine drives it.
    #[derive(Default)]
    struct CountingPv {
        destroyed: AtomicUsize,
        registered: AtomicUsize,
        deleted: AtomicUsize,
    }

    impl CasPv for CountingPv {
        fn get_name(&self) -> &str {
            "ENGINE:PV"
        }
        fn best_external_type(&self) -> AitEnum {
            AitEnum::Float64
        }
        fn max_dimension(&self) -> u32 {
            0
        }
        fn max_bound(&self, _dimension: u32) -> u32 {
            1
        }
        fn read(&self, _ctx: &CasCtx, prototype: &mut Gdd) -> CaStatus {
            prototype.set_scalar(GddData::Float64(vec![2.5]));
            CaStatus::Success
        }
        fn write(&self, _ctx: &CasCtx, _value: &Gdd) -> CaStatus {
            CaStatus::Success
        }
        fn interest_register(&self) -> CaStatus {
            self.registered.fetch_add(1, Ordering::SeqCst);
            CaStatus::Success
        }
        fn interest_delete(&self) {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }
        fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct OnePvServer {
        pv: Arc<CountingPv>,
    }

    impl CaServer for OnePvServer {
        fn pv_exist_test(&self, _ctx: &CasCtx, _client: &CaNetAddr, pv_name: &str) -> PvExistReturn {
            if pv_name == "ENGINE:PV" {
                PvExistReturn::ExistsHere
            } else {
                PvExistReturn::DoesNotExistHere
            }
        }
        fn pv_attach(&self, _ctx: &CasCtx, pv_name: &str) -> PvAttachReturn {
            if pv_name == "ENGINE:PV" || pv_name == "ENGINE:ALIAS" {
                PvAttachReturn::Pv(self.pv.clone())
            } else {
                PvAttachReturn::Status(CaStatus::PvNotFound)
            }
        }
    }

    fn engine_with_pv() -> (Arc<CasEngine>, Arc<OnePvServer>, Arc<CountingPv>) {
        let engine = CasEngine::new();
        let pv = Arc::new(CountingPv::default());
        let server = Arc::new(OnePvServer { pv: pv.clone() });
        let weak: Weak<dyn CaServer> = Arc::downgrade(&server) as Weak<dyn CaServer>;
        engine.install_server(weak);
        (engine, server, pv)
    }

    fn localhost() -> CaNetAddr {
        CaNetAddr::new(Ipv4Addr::LOCALHOST, 5064)
    }

    #[test]
    fn test_exist_and_attach() {
        let (engine, _server, _pv) = engine_with_pv();
        assert_eq!(engine.exist_test(localhost(), "ENGINE:PV"), PvExistReturn::ExistsHere);
        assert_eq!(engine.exist_test(localhost(), "OTHER"), PvExistReturn::DoesNotExistHere);
        assert_eq!(engine.attach("OTHER"), Err(CaStatus::PvNotFound));
        engine.attach("ENGINE:PV").unwrap();
        engine.attach("ENGINE:PV").unwrap();
        assert_eq!(engine.connection_count("ENGINE:PV"), 2);
    }

    #[test]
    fn test_release_destroys_after_last_connection() {
        let (engine, _server, pv) = engine_with_pv();
        engine.attach("ENGINE:PV").unwrap();
        engine.attach("ENGINE:PV").unwrap();
        engine.release("ENGINE:PV");
        assert_eq!(pv.destroyed.load(Ordering::SeqCst), 0);
        engine.release("ENGINE:PV");
        assert_eq!(pv.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.read("ENGINE:PV"), Err(CaStatus::PvNotFound));
    }

    #[test]
    fn test_alias_channels_share_one_pv() {
        let (engine, _server, pv) = engine_with_pv();
        engine.attach("ENGINE:PV").unwrap();
        engine.attach("ENGINE:ALIAS").unwrap();
        let mask = engine.vocabulary().value_event_mask();

        let sub = engine.subscribe("ENGINE:PV", mask).unwrap();
        let aliased = engine.subscribe("ENGINE:ALIAS", mask).unwrap();
        assert_eq!(pv.registered.load(Ordering::SeqCst), 1);

        engine.unsubscribe(aliased);
        engine.release("ENGINE:ALIAS");
        assert_eq!(pv.deleted.load(Ordering::SeqCst), 0);
        assert_eq!(pv.destroyed.load(Ordering::SeqCst), 0);
        assert_eq!(engine.connection_count("ENGINE:PV"), 1);

        let value = Arc::new(engine.new_value(AitEnum::Float64));
        assert_eq!(engine.post_event("ENGINE:PV", mask, &value), 1);
        assert!(sub.events().try_recv().is_ok());
        assert!(engine.read("ENGINE:PV").is_ok());

        engine.release("ENGINE:PV");
        assert_eq!(pv.deleted.load(Ordering::SeqCst), 1);
        assert_eq!(pv.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closing_last_monitored_channel_deletes_interest() {
        let (engine, _server, pv) = engine_with_pv();
        engine.attach("ENGINE:PV").unwrap();
        engine.attach("ENGINE:ALIAS").unwrap();
        let _sub = engine
            .subscribe("ENGINE:ALIAS", engine.vocabulary().value_event_mask())
            .unwrap();

        engine.release("ENGINE:ALIAS");
        assert_eq!(pv.deleted.load(Ordering::SeqCst), 1);
        assert_eq!(pv.destroyed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_monitor_interest_and_delivery() {
        let (engine, _server, pv) = engine_with_pv();
        engine.attach("ENGINE:PV").unwrap();
        let value_mask = engine.vocabulary().value_event_mask();
        let alarm_mask = engine.vocabulary().alarm_event_mask();

        let sub = engine.subscribe("ENGINE:PV", value_mask).unwrap();
        let second = engine.subscribe("ENGINE:PV", value_mask).unwrap();
        assert_eq!(pv.registered.load(Ordering::SeqCst), 1);

        let value = Arc::new(engine.new_value(AitEnum::Float64));
        assert_eq!(engine.post_event("ENGINE:PV", alarm_mask, &value), 0);
        assert_eq!(engine.post_event("ENGINE:PV", value_mask, &value), 2);
        drop(value);
        assert_eq!(engine.live_values(), 1);
        drop(sub.events().try_recv().unwrap());
        assert_eq!(engine.live_values(), 1);
        drop(second.events().try_recv().unwrap());
        assert_eq!(engine.live_values(), 0);

        engine.unsubscribe(sub);
        assert_eq!(pv.deleted.load(Ordering::SeqCst), 0);
        engine.unsubscribe(second);
        assert_eq!(pv.deleted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_process_times_out_without_work() {
        let (engine, _server, _pv) = engine_with_pv();
        let start = std::time::Instant::now();
        assert_eq!(engine.process(Duration::ZERO), 0);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_shutdown_destroys_channels() {
        let (engine, _server, pv) = engine_with_pv();
        engine.attach("ENGINE:PV").unwrap();
        engine.shutdown();
        assert_eq!(pv.destroyed.load(Ordering::SeqCst), 1);
        assert!(!engine.is_running());
        assert_eq!(engine.exist_test(localhost(), "ENGINE:PV"), PvExistReturn::DoesNotExistHere);
    }
}
