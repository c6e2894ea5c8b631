//! The Diag session engine: one read loop per transport, a serialized
//! request/response matcher, and asynchronous dispatch of logs and debug
//! messages to registered modules.
//!
//! Concurrency model: plain OS threads and condition variables. The read
//! thread is the only reader of the transport and invokes the `on_log` /
//! `on_message` callbacks synchronously. A background init thread runs each
//! module's `on_init`, which may issue requests through
//! [`SessionHandle::send_recv`]; responses are handed over through a
//! one-slot rendezvous guarded by a condition variable. The thread calling
//! [`DiagSession::run`] only waits on the shutdown condition.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::diag::{self, CRC_CCITT, Frame, LogRecord, MessageRecord, opcodes};
use crate::framer::Framer;
use crate::hdlc::{HdlcError, hdlc_decapsulate, hdlc_encapsulate};
use crate::module::Module;
use crate::replay::{ReplayError, ReplayEvent, ReplaySource};
use crate::transport::{Transport, TransportError, TransportKind, TransportReader, TransportWriter};

/// How long to wait for the response to a request before retransmitting.
pub const DIAG_TIMEOUT: Duration = Duration::from_secs(5);

/// How many times a request is retransmitted before giving up.
pub const DIAG_MAX_RETRANSMITS: u32 = 3;

const LOG_CONFIG_DISABLE_OP: u32 = 0;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("This input is read-only, requests cannot be sent")]
    ReadOnlyTransport,
    #[error("Diag request {0:#04x} timed out")]
    Timeout(u8),
    #[error(
        "Unmatched response {resp_opcode:#04x} to request {req_opcode:#04x}, possibly another \
         client is using the device"
    )]
    UnexpectedResponse { req_opcode: u8, resp_opcode: u8 },
    #[error(
        "Error response {resp_opcode:#04x} to request {req_opcode:#04x}, the operation may be \
         unsupported by this device"
    )]
    ErrorResponse { req_opcode: u8, resp_opcode: u8 },
    #[error("The modem seems to be unavailable")]
    ModemUnavailable,
    #[error("Invalid Diag frame: {0}")]
    InvalidFrame(#[from] HdlcError),
    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),
    #[error("Module error: {0}")]
    Module(String),
}

/// Identifies a registered module for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleId(usize);

struct ModuleSlot {
    id: usize,
    name: String,
    wants_logs: bool,
    wants_messages: bool,
    removed: AtomicBool,
    inner: Mutex<Box<dyn Module>>,
}

#[derive(Default)]
struct ShutdownState {
    notified: bool,
    terminating: bool,
    read_thread_done: bool,
}

struct Shared {
    writer: Option<Mutex<Box<dyn TransportWriter>>>,
    send_lock: Mutex<()>,
    response: Mutex<Option<(u8, Vec<u8>)>>,
    response_cond: Condvar,
    response_timeout: Duration,
    max_retransmits: u32,
    shutdown: Mutex<ShutdownState>,
    shutdown_cond: Condvar,
    modules: Mutex<Vec<Arc<ModuleSlot>>>,
    deinit_lock: Mutex<()>,
    modules_initialized: AtomicBool,
    next_module_id: AtomicUsize,
    position: Mutex<Option<(f64, f64)>>,
}

impl Shared {
    fn notify_shutdown(&self) {
        let mut state = self.shutdown.lock().unwrap();
        state.notified = true;
        self.shutdown_cond.notify_all();
    }

    /// Flags termination without signaling: used by `run` itself, which is
    /// the thread the signal would wake.
    fn mark_terminating(&self) {
        self.shutdown.lock().unwrap().terminating = true;
    }

    /// Flags termination and wakes `run`: for interrupts from other
    /// threads.
    fn set_terminating(&self) {
        let mut state = self.shutdown.lock().unwrap();
        state.terminating = true;
        state.notified = true;
        self.shutdown_cond.notify_all();
    }

    fn is_terminating(&self) -> bool {
        self.shutdown.lock().unwrap().terminating
    }

    fn mark_read_thread_done(&self) {
        let mut state = self.shutdown.lock().unwrap();
        state.read_thread_done = true;
        state.notified = true;
        self.shutdown_cond.notify_all();
    }

    /// Blocks until any component signals the shutdown condition, consuming
    /// the notification so a second call waits for the next one.
    fn wait_for_shutdown_signal(&self) {
        let mut state = self.shutdown.lock().unwrap();
        while !state.notified {
            state = self.shutdown_cond.wait(state).unwrap();
        }
        state.notified = false;
    }

    fn deposit_response(&self, opcode: u8, payload: Vec<u8>) {
        let mut slot = self.response.lock().unwrap();
        *slot = Some((opcode, payload));
        self.response_cond.notify_all();
    }

    fn send_recv(
        &self,
        req_opcode: u8,
        req_payload: &[u8],
        accept_error: bool,
    ) -> SessionResult<(u8, Vec<u8>)> {
        let writer = self.writer.as_ref().ok_or(SessionError::ReadOnlyTransport)?;

        // serializes concurrent callers: one request in flight at a time
        let _send_guard = self.send_lock.lock().unwrap();

        let mut unframed = Vec::with_capacity(req_payload.len() + 1);
        unframed.push(req_opcode);
        unframed.extend_from_slice(req_payload);
        let framed = hdlc_encapsulate(&unframed, &CRC_CCITT);

        let mut response = None;
        {
            let mut slot = self.response.lock().unwrap();
            *slot = None;
            for _ in 0..=self.max_retransmits {
                debug!(
                    "[>] sending request {} of length {}: {:?}",
                    opcodes::label(req_opcode),
                    req_payload.len(),
                    req_payload
                );
                writer.lock().unwrap().write_bytes(&framed)?;

                let (returned, timeout) = self
                    .response_cond
                    .wait_timeout_while(slot, self.response_timeout, |pending| pending.is_none())
                    .unwrap();
                slot = returned;
                if !timeout.timed_out() {
                    response = slot.take();
                    break;
                }
            }
        }

        let Some((resp_opcode, resp_payload)) = response else {
            error!(
                "Error: Diag request {} with payload {:?} timed out",
                opcodes::label(req_opcode),
                req_payload
            );
            self.notify_shutdown();
            return Err(SessionError::Timeout(req_opcode));
        };

        if resp_opcode != req_opcode && !diag::is_error_opcode(resp_opcode) {
            error!(
                "Error: unmatched response received: {} with payload {:?}, while the request \
                 was {} with payload {:?}. This is possibly due to another client talking to \
                 the Diag device (which is forbidden).",
                opcodes::label(resp_opcode),
                resp_payload,
                opcodes::label(req_opcode),
                req_payload
            );
            self.notify_shutdown();
            return Err(SessionError::UnexpectedResponse {
                req_opcode,
                resp_opcode,
            });
        }

        if diag::is_error_opcode(resp_opcode) && !accept_error {
            error!(
                "Error: error response received: {} with payload {:?}, while the request was \
                 {} with payload {:?}. Maybe this operation is not supported by your device.",
                opcodes::label(resp_opcode),
                resp_payload,
                opcodes::label(req_opcode),
                req_payload
            );
            self.notify_shutdown();
            return Err(SessionError::ErrorResponse {
                req_opcode,
                resp_opcode,
            });
        }

        Ok((resp_opcode, resp_payload))
    }

    fn dispatch_log(&self, record: &LogRecord) {
        let slots: Vec<Arc<ModuleSlot>> = self.modules.lock().unwrap().clone();
        for slot in slots {
            if slot.removed.load(Ordering::SeqCst) || !slot.wants_logs {
                continue;
            }
            match slot.inner.try_lock() {
                Ok(mut module) => {
                    if catch_unwind(AssertUnwindSafe(|| module.on_log(record))).is_err() {
                        error!("module {} panicked in on_log", slot.name);
                    }
                }
                // busy in on_init; a few frames may arrive with partial
                // subscription state and are skipped for that module
                Err(_) => debug!("module {} busy, skipping log dispatch", slot.name),
            }
        }
    }

    fn dispatch_message(&self, message: &MessageRecord) {
        let slots: Vec<Arc<ModuleSlot>> = self.modules.lock().unwrap().clone();
        for slot in slots {
            if slot.removed.load(Ordering::SeqCst) || !slot.wants_messages {
                continue;
            }
            match slot.inner.try_lock() {
                Ok(mut module) => {
                    if catch_unwind(AssertUnwindSafe(|| module.on_message(message))).is_err() {
                        error!("module {} panicked in on_message", slot.name);
                    }
                }
                Err(_) => debug!("module {} busy, skipping message dispatch", slot.name),
            }
        }
    }
}

/// A cloneable handle onto a running (or about to run) session. Handed to
/// module callbacks, and usable from any thread except the dispatch thread.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Sends one request and returns the matching response, retransmitting
    /// on timeout. Exactly one request is in flight per session at any
    /// instant; concurrent callers are serialized.
    ///
    /// The response opcode either equals `req_opcode` or is one of the
    /// protocol error opcodes; anything else means another client is
    /// talking to the device and shuts the session down. Error opcodes shut
    /// the session down too unless `accept_error` is set.
    pub fn send_recv(
        &self,
        req_opcode: u8,
        req_payload: &[u8],
        accept_error: bool,
    ) -> SessionResult<(u8, Vec<u8>)> {
        self.shared.send_recv(req_opcode, req_payload, accept_error)
    }

    /// Whether requests can be sent at all (false for replay sources).
    pub fn supports_send(&self) -> bool {
        self.shared.writer.is_some()
    }

    /// Signals the shutdown condition, e.g. from a Ctrl-C handler.
    pub fn request_shutdown(&self) {
        self.shared.set_terminating();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shared.is_terminating()
    }

    /// Registers a module. When the session is already past its init phase,
    /// the module is initialized inline on the calling thread.
    pub fn add_module(&self, module: Box<dyn Module>) -> ModuleId {
        let slot = Arc::new(ModuleSlot {
            id: self.shared.next_module_id.fetch_add(1, Ordering::SeqCst),
            name: module.name().to_string(),
            wants_logs: module.wants_logs(),
            wants_messages: module.wants_messages(),
            removed: AtomicBool::new(false),
            inner: Mutex::new(module),
        });
        self.shared.modules.lock().unwrap().push(slot.clone());
        if self.shared.modules_initialized.load(Ordering::SeqCst) {
            init_single_module(&self.shared, &slot);
        }
        ModuleId(slot.id)
    }

    /// Removes a module, running its `on_deinit` when the transport can
    /// send. Removing the last module shuts the session down.
    pub fn remove_module(&self, id: ModuleId) {
        let slot = self
            .shared
            .modules
            .lock()
            .unwrap()
            .iter()
            .find(|slot| slot.id == id.0)
            .cloned();
        if let Some(slot) = slot {
            remove_slot(&self.shared, &slot);
        }
    }

    /// Latest geolocation reported by the input, when it carries one
    /// (JSON-line replay files do).
    pub fn position(&self) -> Option<(f64, f64)> {
        *self.shared.position.lock().unwrap()
    }
}

enum SessionSource {
    Live {
        reader: Box<dyn TransportReader>,
        kind: TransportKind,
    },
    Replay(Box<dyn ReplaySource>),
}

/// A Diag session over one transport or replay source.
pub struct DiagSession {
    shared: Arc<Shared>,
    source: SessionSource,
}

impl DiagSession {
    pub fn new(transport: Transport) -> Self {
        let Transport {
            reader,
            writer,
            kind,
        } = transport;
        DiagSession {
            shared: Arc::new(Self::new_shared(writer.map(Mutex::new))),
            source: SessionSource::Live { reader, kind },
        }
    }

    /// A session fed from a replay source instead of a live device. No
    /// requests can be sent and module `on_init`/`on_deinit` hooks are
    /// skipped.
    pub fn new_replay(source: Box<dyn ReplaySource>) -> Self {
        DiagSession {
            shared: Arc::new(Self::new_shared(None)),
            source: SessionSource::Replay(source),
        }
    }

    fn new_shared(writer: Option<Mutex<Box<dyn TransportWriter>>>) -> Shared {
        Shared {
            writer,
            send_lock: Mutex::new(()),
            response: Mutex::new(None),
            response_cond: Condvar::new(),
            response_timeout: DIAG_TIMEOUT,
            max_retransmits: DIAG_MAX_RETRANSMITS,
            shutdown: Mutex::new(ShutdownState::default()),
            shutdown_cond: Condvar::new(),
            modules: Mutex::new(Vec::new()),
            deinit_lock: Mutex::new(()),
            modules_initialized: AtomicBool::new(false),
            next_module_id: AtomicUsize::new(0),
            position: Mutex::new(None),
        }
    }

    /// Overrides the per-attempt response timeout. Only effective before
    /// any [`SessionHandle`] has been handed out.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.response_timeout = timeout;
        }
        self
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn add_module(&self, module: Box<dyn Module>) -> ModuleId {
        self.handle().add_module(module)
    }

    /// Runs the session to completion: spawns the read and init threads,
    /// waits for a shutdown signal (transport closed, fatal protocol error,
    /// no modules left, or [`SessionHandle::request_shutdown`]), then
    /// deinitializes the remaining modules.
    ///
    /// A read thread still blocked on the wire when shutdown completes is
    /// left to die with the process, the transport being unusable anyway.
    pub fn run(self) -> SessionResult<()> {
        if self.shared.modules.lock().unwrap().is_empty() {
            info!("no modules registered, nothing to do");
            return Ok(());
        }

        let shared = self.shared;

        let read_shared = shared.clone();
        match self.source {
            SessionSource::Live { reader, kind } => {
                thread::spawn(move || {
                    if let Err(e) = read_loop(&read_shared, reader, kind) {
                        error!("{e}");
                    }
                    read_shared.mark_read_thread_done();
                });
            }
            SessionSource::Replay(source) => {
                thread::spawn(move || {
                    if let Err(e) = replay_loop(&read_shared, source) {
                        error!("{e}");
                    }
                    read_shared.mark_read_thread_done();
                });
            }
        }

        let init_shared = shared.clone();
        thread::spawn(move || init_modules(&init_shared));

        shared.wait_for_shutdown_signal();
        shared.mark_terminating();

        let read_thread_done = shared.shutdown.lock().unwrap().read_thread_done;
        let modules_remain = {
            let _guard = shared.deinit_lock.lock().unwrap();
            !shared.modules.lock().unwrap().is_empty()
        };

        if !read_thread_done && modules_remain {
            let deinit_shared = shared.clone();
            thread::spawn(move || deinit_modules(&deinit_shared));
            shared.wait_for_shutdown_signal();
        }

        // unblocks a read thread still stuck on the wire, where the
        // transport supports it
        if let Some(writer) = &shared.writer {
            if let Err(e) = writer.lock().unwrap().close() {
                debug!("error closing transport: {e}");
            }
        }

        Ok(())
    }
}

/// Init thread: resets any logging state a previous client left on the
/// device, then runs each module's `on_init`.
fn init_modules(shared: &Arc<Shared>) {
    shared.modules_initialized.store(true, Ordering::SeqCst);

    if shared.writer.is_none() {
        // replay inputs have no device to configure and no init hooks to run
        return;
    }
    let handle = SessionHandle {
        shared: shared.clone(),
    };

    let housekeeping = (|| -> SessionResult<()> {
        let mut payload = vec![0u8; 3];
        payload.extend_from_slice(&LOG_CONFIG_DISABLE_OP.to_le_bytes());
        handle.send_recv(opcodes::DIAG_LOG_CONFIG_F, &payload, true)?;

        let payload = crate::messages::set_all_rt_masks_request(crate::messages::MSG_LVL_NONE);
        handle.send_recv(opcodes::DIAG_EXT_MSG_CONFIG_F, &payload, true)?;
        Ok(())
    })();
    if let Err(e) = housekeeping {
        error!("could not reset device logging state: {e}");
        shared.notify_shutdown();
        return;
    }

    let slots: Vec<Arc<ModuleSlot>> = shared.modules.lock().unwrap().clone();
    for slot in slots {
        if shared.is_terminating() {
            return;
        }
        init_single_module(shared, &slot);
    }
}

fn init_single_module(shared: &Arc<Shared>, slot: &Arc<ModuleSlot>) {
    if shared.writer.is_none() {
        return;
    }
    let handle = SessionHandle {
        shared: shared.clone(),
    };

    let failed = {
        let mut module = slot.inner.lock().unwrap();
        match catch_unwind(AssertUnwindSafe(|| module.on_init(&handle))) {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                error!("module {} failed to initialize: {e}", slot.name);
                true
            }
            Err(_) => {
                error!("module {} panicked during initialization", slot.name);
                true
            }
        }
    };

    // a failed module is deregistered; so is one with no asynchronous
    // callbacks, which was a one-shot job
    if failed || (!slot.wants_logs && !slot.wants_messages) {
        remove_slot(shared, slot);
    }
}

fn remove_slot(shared: &Arc<Shared>, slot: &Arc<ModuleSlot>) {
    {
        let _deinit_guard = shared.deinit_lock.lock().unwrap();
        if slot.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut modules = shared.modules.lock().unwrap();
            if let Some(pos) = modules.iter().position(|other| Arc::ptr_eq(other, slot)) {
                modules.remove(pos);
            }
        }

        // deinit typically sends cleanup requests, so it only runs on
        // transports that can send
        if shared.writer.is_some() {
            let handle = SessionHandle {
                shared: shared.clone(),
            };
            let mut module = slot.inner.lock().unwrap();
            if catch_unwind(AssertUnwindSafe(|| module.on_deinit(&handle))).is_err() {
                error!("module {} panicked during deinit", slot.name);
            }
        }
        info!("module {} removed", slot.name);
    }

    if shared.modules.lock().unwrap().is_empty() {
        shared.notify_shutdown();
    }
}

fn deinit_modules(shared: &Arc<Shared>) {
    let slots: Vec<Arc<ModuleSlot>> = shared.modules.lock().unwrap().clone();
    for slot in slots {
        remove_slot(shared, &slot);
    }
    // even if every module was already gone, wake the main thread
    shared.notify_shutdown();
}

fn read_loop(
    shared: &Arc<Shared>,
    mut reader: Box<dyn TransportReader>,
    kind: TransportKind,
) -> SessionResult<()> {
    let mut framer = Framer::new();
    loop {
        if shared.is_terminating() {
            return Ok(());
        }
        let bytes = reader.read_bytes()?;
        if bytes.is_empty() {
            info!("transport closed");
            return Ok(());
        }
        framer.extend(&bytes);

        while let Some(chunk) = framer.next_frame() {
            if chunk.len() < 3 {
                if chunk.len() == 1 && kind == TransportKind::Serial {
                    return Err(SessionError::ModemUnavailable);
                }
                warn!("dropping runt Diag frame of {} byte(s)", chunk.len());
                continue;
            }
            match hdlc_decapsulate(&chunk, &CRC_CCITT) {
                Ok(unframed) => {
                    framer.mark_synchronized();
                    dispatch_packet(shared, &unframed);
                }
                Err(e) if !framer.synchronized() => {
                    // the first frame received on a fresh stream may be the
                    // tail of one whose beginning we missed
                    debug!("dropping partial leading frame: {e}");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn dispatch_packet(shared: &Arc<Shared>, unframed: &[u8]) {
    match diag::classify(unframed) {
        Ok(Frame::Log(packet)) => {
            debug!(
                "[<] received log {:#06x} of length {}",
                packet.log_code,
                packet.body.len()
            );
            let record = LogRecord {
                log_code: packet.log_code,
                inner_length: packet.inner_length,
                raw_timestamp: packet.timestamp,
                body: packet.body,
                // live records carry the host's reception time: the packed
                // device timestamp comes in several formats and cannot
                // always be decoded reliably
                timestamp: Utc::now(),
            };
            shared.dispatch_log(&record);
        }
        Ok(Frame::Message(message)) => {
            debug!(
                "[<] received message {} of length {}",
                opcodes::label(message.opcode),
                message.payload.len()
            );
            shared.dispatch_message(&message);
        }
        Ok(Frame::Response { opcode, payload }) => {
            debug!(
                "[<] received response {} of length {}",
                opcodes::label(opcode),
                payload.len()
            );
            shared.deposit_response(opcode, payload);
        }
        Err(e) => warn!("dropping unparseable Diag frame: {e}"),
    }
}

fn replay_loop(shared: &Arc<Shared>, mut source: Box<dyn ReplaySource>) -> SessionResult<()> {
    loop {
        if shared.is_terminating() {
            return Ok(());
        }
        match source.next_event()? {
            Some(ReplayEvent::Log(record)) => shared.dispatch_log(&record),
            Some(ReplayEvent::Position {
                latitude,
                longitude,
            }) => {
                *shared.position.lock().unwrap() = Some((latitude, longitude));
            }
            None => {
                info!("replay source exhausted");
                return Ok(());
            }
        }
    }
}
