//! In-memory transports scripting a Diag device for end-to-end tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use qcscope::diag::CRC_CCITT;
use qcscope::hdlc::{hdlc_decapsulate, hdlc_encapsulate};
use qcscope::module::Module;
use qcscope::session::{SessionError, SessionHandle};
use qcscope::transport::{
    Transport, TransportError, TransportKind, TransportReader, TransportWriter,
};

/// Callback deciding how the scripted device answers one unframed request;
/// returns any number of unframed frames to enqueue.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

struct Inner {
    incoming: Mutex<(VecDeque<Vec<u8>>, bool)>,
    incoming_cond: Condvar,
    sent: Mutex<Vec<Vec<u8>>>,
    responder: Mutex<Option<Responder>>,
}

/// A scripted Diag device: frames written to it are recorded (unframed) and
/// optionally answered through a responder callback; bytes pushed into it
/// come back out of the transport's read half.
#[derive(Clone)]
pub struct ScriptedDevice {
    inner: Arc<Inner>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        ScriptedDevice {
            inner: Arc::new(Inner {
                incoming: Mutex::new((VecDeque::new(), false)),
                incoming_cond: Condvar::new(),
                sent: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
            }),
        }
    }

    pub fn with_responder(
        responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    ) -> Self {
        let device = Self::new();
        *device.inner.responder.lock().unwrap() = Some(Box::new(responder));
        device
    }

    /// Answers every request by echoing it back unchanged.
    pub fn echoing() -> Self {
        Self::with_responder(|request| vec![request.to_vec()])
    }

    /// Queues one HDLC-encapsulated frame for the read half.
    pub fn push_frame(&self, unframed: &[u8]) {
        self.push_raw(&hdlc_encapsulate(unframed, &CRC_CCITT));
    }

    /// Queues raw bytes for the read half, unframed and unchecked.
    pub fn push_raw(&self, bytes: &[u8]) {
        let mut incoming = self.inner.incoming.lock().unwrap();
        incoming.0.push_back(bytes.to_vec());
        self.inner.incoming_cond.notify_all();
    }

    /// Marks the end of the stream; reads drain the queue then report a
    /// closed transport.
    pub fn close(&self) {
        let mut incoming = self.inner.incoming.lock().unwrap();
        incoming.1 = true;
        self.inner.incoming_cond.notify_all();
    }

    /// Every outbound frame so far, decapsulated.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.inner.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.inner.sent.lock().unwrap().len()
    }

    pub fn transport(&self, kind: TransportKind) -> Transport {
        Transport::new(
            kind,
            Box::new(ScriptedReader {
                inner: self.inner.clone(),
            }),
            Some(Box::new(ScriptedWriter {
                inner: self.inner.clone(),
            })),
        )
    }

    /// A read-only transport (no writer half).
    pub fn read_only_transport(&self, kind: TransportKind) -> Transport {
        Transport::new(
            kind,
            Box::new(ScriptedReader {
                inner: self.inner.clone(),
            }),
            None,
        )
    }
}

struct ScriptedReader {
    inner: Arc<Inner>,
}

impl TransportReader for ScriptedReader {
    fn read_bytes(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut incoming = self.inner.incoming.lock().unwrap();
        loop {
            if let Some(chunk) = incoming.0.pop_front() {
                return Ok(chunk);
            }
            if incoming.1 {
                return Ok(Vec::new());
            }
            incoming = self.inner.incoming_cond.wait(incoming).unwrap();
        }
    }
}

struct ScriptedWriter {
    inner: Arc<Inner>,
}

impl TransportWriter for ScriptedWriter {
    fn write_bytes(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let unframed =
            hdlc_decapsulate(frame, &CRC_CCITT).expect("client wrote an invalid frame");
        self.inner.sent.lock().unwrap().push(unframed.clone());

        let responses = {
            let mut responder = self.inner.responder.lock().unwrap();
            match responder.as_mut() {
                Some(respond) => respond(&unframed),
                None => Vec::new(),
            }
        };
        for response in responses {
            let mut incoming = self.inner.incoming.lock().unwrap();
            incoming
                .0
                .push_back(hdlc_encapsulate(&response, &CRC_CCITT));
            self.inner.incoming_cond.notify_all();
        }
        Ok(())
    }
}

/// A one-shot module running a closure on the init thread. Declaring no log
/// or message capability, it deregisters itself once the closure returns.
pub struct InitHook<F>(pub F)
where
    F: FnMut(&SessionHandle) -> Result<(), SessionError> + Send;

impl<F> Module for InitHook<F>
where
    F: FnMut(&SessionHandle) -> Result<(), SessionError> + Send,
{
    fn name(&self) -> &str {
        "init-hook"
    }

    fn on_init(&mut self, diag: &SessionHandle) -> Result<(), SessionError> {
        (self.0)(diag)
    }
}

/// Collects every dispatched log record.
pub struct LogCollector {
    pub records: Arc<Mutex<Vec<qcscope::diag::LogRecord>>>,
}

impl LogCollector {
    pub fn new() -> (Self, Arc<Mutex<Vec<qcscope::diag::LogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        (
            LogCollector {
                records: records.clone(),
            },
            records,
        )
    }
}

impl Module for LogCollector {
    fn name(&self) -> &str {
        "log-collector"
    }

    fn wants_logs(&self) -> bool {
        true
    }

    fn on_log(&mut self, record: &qcscope::diag::LogRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

/// Enables log output for a test run (`RUST_LOG=debug cargo test`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Spins until `condition` holds, panicking after `timeout`.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
