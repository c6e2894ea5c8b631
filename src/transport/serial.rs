//! Serial-port transport for USB modems exposing a Diag pseudo-serial
//! device (`/dev/ttyUSB0`, `/dev/ttyHS2`, `COM3`, ...).

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use log::debug;
use serialport::{FlowControl, SerialPort};

use super::{Transport, TransportError, TransportKind, TransportReader, TransportWriter};

pub const DIAG_BAUD_RATE: u32 = 115200;

// serialport requires a finite read timeout; reads just spin on expiry,
// which only happens on an idle wire.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SerialTransport;

impl SerialTransport {
    /// Opens a Diag serial device at 115200 baud with hardware flow
    /// control, the way the baseband expects it.
    pub fn open(device: &str) -> Result<Transport, TransportError> {
        let mut port = serialport::new(device, DIAG_BAUD_RATE)
            .flow_control(FlowControl::Hardware)
            .timeout(READ_TIMEOUT)
            .open()?;
        port.write_data_terminal_ready(true)?;
        debug!("opened serial device {device} at {DIAG_BAUD_RATE} baud");

        let writer = port.try_clone()?;
        Ok(Transport::new(
            TransportKind::Serial,
            Box::new(SerialReader { port }),
            Some(Box::new(SerialWriter { port: writer })),
        ))
    }
}

struct SerialReader {
    port: Box<dyn SerialPort>,
}

impl TransportReader for SerialReader {
    fn read_bytes(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buf = [0u8; 4096];
        loop {
            match self.port.read(&mut buf) {
                // 0 bytes from a serial device means it disappeared
                Ok(0) => return Ok(Vec::new()),
                Ok(n) => return Ok(buf[..n].to_vec()),
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl TransportWriter for SerialWriter {
    fn write_bytes(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }
}
