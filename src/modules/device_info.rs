//! One-shot device identification: firmware version, build ID, Diag
//! protocol version and serial number. Deregisters itself after init.

use deku::prelude::*;
use log::warn;

use crate::diag::opcodes;
use crate::module::Module;
use crate::session::{SessionError, SessionHandle};

/// Layout of the `DIAG_VERNO_F` response.
#[derive(Debug, Clone, PartialEq, DekuRead)]
pub struct VernoResponse {
    pub comp_date: [u8; 11],
    pub comp_time: [u8; 8],
    pub rel_date: [u8; 11],
    pub rel_time: [u8; 8],
    pub ver_dir: [u8; 8],
    pub scm: u8,
    pub mob_cai_rev: u8,
    pub mob_model: u8,
    #[deku(endian = "little")]
    pub mob_firm_rev: u16,
    pub slot_cycle_index: u8,
    pub hw_maj_ver: u8,
    pub hw_min_ver: u8,
}

fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn print_row(key: &str, value: impl std::fmt::Display) {
    println!("[+] {:<20} {}", format!("{key}:"), value);
}

#[derive(Default)]
pub struct DeviceInfo;

impl DeviceInfo {
    pub fn new() -> Self {
        DeviceInfo
    }

    fn print_verno(&self, payload: &[u8]) {
        let Ok((_, info)) = VernoResponse::from_bytes((payload, 0)) else {
            warn!("undecodable DIAG_VERNO_F response");
            return;
        };
        print_row(
            "Compilation date",
            format!("{} {}", ascii(&info.comp_date), ascii(&info.comp_time)),
        );
        print_row(
            "Release date",
            format!("{} {}", ascii(&info.rel_date), ascii(&info.rel_time)),
        );
        print_row("Version directory", ascii(&info.ver_dir));
        println!();
        print_row("Common air interface information", "");
        print_row("  Station classmark", info.scm);
        print_row("  Common air interface revision", info.mob_cai_rev);
        print_row("  Mobile model", info.mob_model);
        print_row("  Mobile firmware revision", info.mob_firm_rev);
        print_row("  Slot cycle index", info.slot_cycle_index);
        print_row(
            "  Hardware revision",
            format!(
                "0x{:x}{:02x} ({}.{})",
                info.hw_maj_ver, info.hw_min_ver, info.hw_maj_ver, info.hw_min_ver
            ),
        );
        println!();
    }

    fn print_build_id(&self, payload: &[u8]) {
        if payload.len() < 11 {
            warn!("undecodable DIAG_EXT_BUILD_ID_F response");
            return;
        }
        let msm_hw_version_format = payload[0];
        let msm_hw_version = u32::from_le_bytes(payload[3..7].try_into().unwrap());
        let mobile_model_id = u32::from_le_bytes(payload[7..11].try_into().unwrap());
        let mut strings = payload[11..].split(|&b| b == 0);
        let build_id = strings.next().unwrap_or(&[]);
        let model_string = strings.next().unwrap_or(&[]);

        let version = if msm_hw_version_format == 2 {
            msm_hw_version >> 28
        } else {
            msm_hw_version & 0b1111
        };

        if mobile_model_id > 255 {
            print_row("Mobile model ID", format!("{mobile_model_id:#x}"));
        }
        print_row("Chip version", version);
        print_row("Firmware build ID", ascii(build_id));
        if !model_string.is_empty() {
            print_row("Model string", ascii(model_string));
        }
        println!();
    }
}

impl Module for DeviceInfo {
    fn name(&self) -> &str {
        "device-info"
    }

    // declares neither logs nor messages: removed again once init is done

    fn on_init(&mut self, diag: &SessionHandle) -> Result<(), SessionError> {
        println!();

        let (opcode, payload) = diag.send_recv(opcodes::DIAG_VERNO_F, b"", false)?;
        if opcode == opcodes::DIAG_VERNO_F {
            self.print_verno(&payload);
        }

        let (opcode, payload) = diag.send_recv(opcodes::DIAG_EXT_BUILD_ID_F, b"", true)?;
        if opcode == opcodes::DIAG_EXT_BUILD_ID_F {
            self.print_build_id(&payload);
        }

        let (opcode, payload) = diag.send_recv(opcodes::DIAG_DIAG_VER_F, b"", true)?;
        if opcode == opcodes::DIAG_DIAG_VER_F && payload.len() >= 2 {
            print_row(
                "Diag version",
                u16::from_le_bytes(payload[..2].try_into().unwrap()),
            );
            println!();
        }

        let (opcode, payload) = diag.send_recv(opcodes::DIAG_ESN_F, b"", true)?;
        if opcode == opcodes::DIAG_ESN_F && payload.len() >= 4 {
            let esn = u32::from_le_bytes(payload[..4].try_into().unwrap());
            // 0xdeadd00d is the placeholder ESN of devices without one
            if esn != 0xdeadd00d {
                print_row("Serial number", esn);
                println!();
            }
        }

        Ok(())
    }
}
