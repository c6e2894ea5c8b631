//! USB transport talking straight to a modem's Diag bulk endpoint pair.

use futures::executor::block_on;
use log::debug;
use nusb::Interface;
use nusb::transfer::RequestBuffer;

use super::{Transport, TransportError, TransportKind, TransportReader, TransportWriter};

/// Qualcomm's USB vendor ID, carried by most Diag-capable modems.
pub const QUALCOMM_VID: u16 = 0x05c6;

const BULK_IN_BUFFER_LEN: usize = 1024 * 1024;

/// Addresses of a claimed Diag interface: interface number plus the bulk
/// IN/OUT endpoint pair.
#[derive(Debug, Clone, Copy)]
pub struct UsbEndpoints {
    pub interface: u8,
    pub endpoint_in: u8,
    pub endpoint_out: u8,
}

pub struct UsbTransport;

impl UsbTransport {
    /// Opens the first device matching `vid`/`pid` and claims its Diag
    /// interface. A kernel driver owning the interface is detached and
    /// reattached on release.
    pub fn open(vid: u16, pid: u16, endpoints: UsbEndpoints) -> Result<Transport, TransportError> {
        let device_info = nusb::list_devices()?
            .find(|dev| dev.vendor_id() == vid && dev.product_id() == pid)
            .ok_or(TransportError::UsbDeviceNotFound { vid, pid })?;
        let device = device_info.open()?;
        let interface = device.detach_and_claim_interface(endpoints.interface)?;
        debug!(
            "claimed interface {} of USB device {vid:#06x}:{pid:#06x}",
            endpoints.interface
        );
        Ok(Self::from_interface(interface, endpoints))
    }

    /// Builds a transport over an already claimed interface.
    pub fn from_interface(interface: Interface, endpoints: UsbEndpoints) -> Transport {
        let writer = UsbWriter {
            interface: interface.clone(),
            endpoint_out: endpoints.endpoint_out,
        };
        let reader = UsbReader {
            interface,
            endpoint_in: endpoints.endpoint_in,
        };
        Transport::new(
            TransportKind::Usb,
            Box::new(reader),
            Some(Box::new(writer)),
        )
    }
}

struct UsbReader {
    interface: Interface,
    endpoint_in: u8,
}

impl TransportReader for UsbReader {
    fn read_bytes(&mut self) -> Result<Vec<u8>, TransportError> {
        // no timeout here: the baseband is free to stay silent until a log
        // mask is set
        let completion = block_on(
            self.interface
                .bulk_in(self.endpoint_in, RequestBuffer::new(BULK_IN_BUFFER_LEN)),
        );
        let data = completion.into_result()?;
        Ok(data)
    }
}

struct UsbWriter {
    interface: Interface,
    endpoint_out: u8,
}

impl TransportWriter for UsbWriter {
    fn write_bytes(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let completion = block_on(self.interface.bulk_out(self.endpoint_out, frame.to_vec()));
        completion.into_result()?;
        Ok(())
    }
}
