//! Byte transports carrying framed Diag traffic.
//!
//! A transport is split into a reader half and an optional writer half so
//! that the session's read loop can block on the wire while the
//! request/response matcher writes from another thread. Read-only sources
//! (replay files) have no writer half at all.

use thiserror::Error;

pub mod serial;
pub mod tcp;
pub mod usb;

pub use serial::SerialTransport;
pub use tcp::TcpTransport;
pub use usb::UsbTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("USB transfer error: {0}")]
    UsbTransfer(#[from] nusb::transfer::TransferError),
    #[error("No matching USB device (vid {vid:#06x}, pid {pid:#06x})")]
    UsbDeviceNotFound { vid: u16, pid: u16 },
}

/// What kind of wire the bytes travel on. The read loop needs this for one
/// edge case: a frame consisting of a lone trailer byte means the baseband
/// went away on serial links, but is harmless noise elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Serial,
    Usb,
    Tcp,
}

/// Blocking read half. An `Ok` result with an empty buffer means the
/// transport closed; fragmentation is arbitrary otherwise.
pub trait TransportReader: Send {
    fn read_bytes(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Blocking write half; writes are whole HDLC-encapsulated frames.
pub trait TransportWriter: Send {
    fn write_bytes(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Tears the transport down, unblocking a reader stuck in `read_bytes`
    /// where the medium allows it. The session calls this once on shutdown.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// An open transport, ready to be handed to a
/// [`DiagSession`](crate::session::DiagSession).
pub struct Transport {
    pub(crate) reader: Box<dyn TransportReader>,
    pub(crate) writer: Option<Box<dyn TransportWriter>>,
    pub(crate) kind: TransportKind,
}

impl Transport {
    pub fn new(
        kind: TransportKind,
        reader: Box<dyn TransportReader>,
        writer: Option<Box<dyn TransportWriter>>,
    ) -> Self {
        Transport {
            reader,
            writer,
            kind,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Whether requests can be sent on this transport.
    pub fn supports_send(&self) -> bool {
        self.writer.is_some()
    }
}
