//! TCP transport, used against a bridge exposing a device's Diag interface
//! over the network (typically the Android helper proxying `/dev/diag`).
//!
//! The stream carries raw HDLC-framed Diag in both directions, with no
//! preamble of its own.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use log::debug;

use super::{Transport, TransportError, TransportKind, TransportReader, TransportWriter};

/// Port the Android-side bridge helper listens on.
pub const DIAG_BRIDGE_PORT: u16 = 43555;

pub struct TcpTransport;

impl TcpTransport {
    pub fn connect<A: ToSocketAddrs + std::fmt::Debug>(addr: A) -> Result<Transport, TransportError> {
        let stream = TcpStream::connect(&addr)?;
        debug!("connected to Diag bridge at {addr:?}");
        let writer = stream.try_clone()?;
        Ok(Transport::new(
            TransportKind::Tcp,
            Box::new(TcpReader { stream }),
            Some(Box::new(TcpWriter { stream: writer })),
        ))
    }

    /// Connects to the default bridge port on the given host.
    pub fn connect_bridge(host: &str) -> Result<Transport, TransportError> {
        Self::connect((host, DIAG_BRIDGE_PORT))
    }
}

struct TcpReader {
    stream: TcpStream,
}

impl TransportReader for TcpReader {
    fn read_bytes(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = [0u8; 64 * 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(n) => return Ok(buf[..n].to_vec()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

struct TcpWriter {
    stream: TcpStream,
}

impl TransportWriter for TcpWriter {
    fn write_bytes(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }
}
