//! Diag protocol constants, frame classification, and record types.
//!
//! An unframed Diag packet starts with a one-byte opcode. Packets are either
//! responses to a request, asynchronous log records (`DIAG_LOG_F`), or
//! asynchronous debug messages (one of five message opcodes). A
//! `DIAG_MULTI_RADIO_CMD_F` wrapper may prefix any of those on dual-baseband
//! devices.

use chrono::{DateTime, Duration, Utc};
use crc::{Algorithm, Crc};
use deku::prelude::*;
use thiserror::Error;

pub const TRAILER_CHAR: u8 = 0x7e;
pub const ESCAPE_CHAR: u8 = 0x7d;

pub const ESCAPED_TRAILER_CHAR: u8 = 0x5e;
pub const ESCAPED_ESCAPE_CHAR: u8 = 0x5d;

// this is sorta based on the params qcsuper uses, plus what seems to be used in
// https://github.com/fgsect/scat/blob/f1538b397721df3ab8ba12acd26716abcf21f78b/util.py#L47
pub const CRC_CCITT_ALG: Algorithm<u16> = Algorithm {
    poly: 0x1021,
    init: 0xffff,
    refin: true,
    refout: true,
    width: 16,
    xorout: 0xffff,
    check: 0x2189,
    residue: 0x0000,
};

pub const CRC_CCITT: Crc<u16> = Crc::<u16>::new(&CRC_CCITT_ALG);

/// Diag command opcodes, after the enumeration in Qualcomm's `diagcmd.h`.
/// Only the opcodes this crate actually speaks or special-cases are listed.
pub mod opcodes {
    pub const DIAG_VERNO_F: u8 = 0x00;
    pub const DIAG_ESN_F: u8 = 0x01;
    pub const DIAG_PEEKB_F: u8 = 0x02;
    pub const DIAG_PEEKW_F: u8 = 0x03;
    pub const DIAG_PEEKD_F: u8 = 0x04;
    pub const DIAG_STATUS_F: u8 = 0x0c;
    pub const DIAG_LOG_F: u8 = 0x10;
    pub const DIAG_BAD_CMD_F: u8 = 0x13;
    pub const DIAG_BAD_PARM_F: u8 = 0x14;
    pub const DIAG_BAD_LEN_F: u8 = 0x15;
    pub const DIAG_BAD_MODE_F: u8 = 0x18;
    pub const DIAG_DIAG_VER_F: u8 = 0x1c;
    pub const DIAG_TS_F: u8 = 0x1d;
    pub const DIAG_MSG_F: u8 = 0x1f;
    pub const DIAG_BAD_SPC_MODE_F: u8 = 0x42;
    pub const DIAG_BAD_SEC_MODE_F: u8 = 0x47;
    pub const DIAG_SUBSYS_CMD_F: u8 = 0x4b;
    pub const DIAG_LOG_CONFIG_F: u8 = 0x73;
    pub const DIAG_EXT_MSG_F: u8 = 0x79;
    pub const DIAG_EXT_BUILD_ID_F: u8 = 0x7c;
    pub const DIAG_EXT_MSG_CONFIG_F: u8 = 0x7d;
    pub const DIAG_EXT_MSG_TERSE_F: u8 = 0x7e;
    pub const DIAG_SUBSYS_CMD_VER_2_F: u8 = 0x80;
    pub const DIAG_QSR_EXT_MSG_TERSE_F: u8 = 0x92;
    pub const DIAG_BAD_TRANS_F: u8 = 0x95;
    pub const DIAG_MULTI_RADIO_CMD_F: u8 = 0x98;
    pub const DIAG_QSR4_EXT_MSG_TERSE_F: u8 = 0x99;

    pub fn name(opcode: u8) -> Option<&'static str> {
        Some(match opcode {
            DIAG_VERNO_F => "DIAG_VERNO_F",
            DIAG_ESN_F => "DIAG_ESN_F",
            DIAG_PEEKB_F => "DIAG_PEEKB_F",
            DIAG_PEEKW_F => "DIAG_PEEKW_F",
            DIAG_PEEKD_F => "DIAG_PEEKD_F",
            DIAG_STATUS_F => "DIAG_STATUS_F",
            DIAG_LOG_F => "DIAG_LOG_F",
            DIAG_BAD_CMD_F => "DIAG_BAD_CMD_F",
            DIAG_BAD_PARM_F => "DIAG_BAD_PARM_F",
            DIAG_BAD_LEN_F => "DIAG_BAD_LEN_F",
            DIAG_BAD_MODE_F => "DIAG_BAD_MODE_F",
            DIAG_DIAG_VER_F => "DIAG_DIAG_VER_F",
            DIAG_TS_F => "DIAG_TS_F",
            DIAG_MSG_F => "DIAG_MSG_F",
            DIAG_BAD_SPC_MODE_F => "DIAG_BAD_SPC_MODE_F",
            DIAG_BAD_SEC_MODE_F => "DIAG_BAD_SEC_MODE_F",
            DIAG_SUBSYS_CMD_F => "DIAG_SUBSYS_CMD_F",
            DIAG_LOG_CONFIG_F => "DIAG_LOG_CONFIG_F",
            DIAG_EXT_MSG_F => "DIAG_EXT_MSG_F",
            DIAG_EXT_BUILD_ID_F => "DIAG_EXT_BUILD_ID_F",
            DIAG_EXT_MSG_CONFIG_F => "DIAG_EXT_MSG_CONFIG_F",
            DIAG_EXT_MSG_TERSE_F => "DIAG_EXT_MSG_TERSE_F",
            DIAG_SUBSYS_CMD_VER_2_F => "DIAG_SUBSYS_CMD_VER_2_F",
            DIAG_QSR_EXT_MSG_TERSE_F => "DIAG_QSR_EXT_MSG_TERSE_F",
            DIAG_BAD_TRANS_F => "DIAG_BAD_TRANS_F",
            DIAG_MULTI_RADIO_CMD_F => "DIAG_MULTI_RADIO_CMD_F",
            DIAG_QSR4_EXT_MSG_TERSE_F => "DIAG_QSR4_EXT_MSG_TERSE_F",
            _ => return None,
        })
    }

    /// Human-readable opcode for diagnostics: symbolic name when known,
    /// hex otherwise.
    pub fn label(opcode: u8) -> String {
        match name(opcode) {
            Some(name) => name.to_string(),
            None => format!("{opcode:#04x}"),
        }
    }
}

/// The opcodes a device may answer with to reject a request.
pub const ERROR_OPCODES: [u8; 7] = [
    opcodes::DIAG_BAD_CMD_F,
    opcodes::DIAG_BAD_PARM_F,
    opcodes::DIAG_BAD_LEN_F,
    opcodes::DIAG_BAD_MODE_F,
    opcodes::DIAG_BAD_SPC_MODE_F,
    opcodes::DIAG_BAD_SEC_MODE_F,
    opcodes::DIAG_BAD_TRANS_F,
];

/// The opcodes carrying asynchronous debug-message strings.
pub const MESSAGE_OPCODES: [u8; 5] = [
    opcodes::DIAG_MSG_F,
    opcodes::DIAG_EXT_MSG_F,
    opcodes::DIAG_EXT_MSG_TERSE_F,
    opcodes::DIAG_QSR_EXT_MSG_TERSE_F,
    opcodes::DIAG_QSR4_EXT_MSG_TERSE_F,
];

pub fn is_error_opcode(opcode: u8) -> bool {
    ERROR_OPCODES.contains(&opcode)
}

pub fn is_message_opcode(opcode: u8) -> bool {
    MESSAGE_OPCODES.contains(&opcode)
}

/// 64-bit packed timestamp found in log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct Timestamp {
    pub ts: u64,
}

impl Timestamp {
    /// Decodes the most common log timestamp format: the upper 44 bits count
    /// units of 20 ms since 1980-01-06 00:00:00 UTC, the lower 20 bits are a
    /// binary fraction of a second.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let epoch = chrono::DateTime::parse_from_rfc3339("1980-01-06T00:00:00-00:00")
            .unwrap()
            .with_timezone(&Utc);
        let mut delta_millis = (self.ts >> 20) as f64 * 20.0;
        delta_millis += (self.ts & 0xfffff) as f64 / ((1u64 << 20) as f64) * 1000.0;
        epoch + Duration::milliseconds(delta_millis as i64)
    }
}

/// A `DIAG_LOG_F` record: one-byte outer header (pending-message count),
/// outer length, then the inner header (inner length, log code, timestamp)
/// also used verbatim by DLF dump files, then the body.
#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
pub struct LogPacket {
    pub pending_msgs: u8,
    pub outer_length: u16,
    pub inner_length: u16,
    pub log_code: u16,
    pub timestamp: Timestamp,
    #[deku(read_all)]
    pub body: Vec<u8>,
}

/// A log record as dispatched to modules.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// 16-bit log code; the high 4 bits are the equipment ID.
    pub log_code: u16,
    /// Log body, excluding outer and inner headers.
    pub body: Vec<u8>,
    /// The raw device timestamp from the inner header.
    pub raw_timestamp: Timestamp,
    /// Inner length as claimed by the record; may disagree with the actual
    /// byte count, which is tolerated.
    pub inner_length: u16,
    /// Wall-clock timestamp attached at dispatch: reception time for live
    /// sessions, the decoded record timestamp for replay sources.
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    /// Equipment ID (high 4 bits of the log code).
    pub fn equipment_id(&self) -> u8 {
        (self.log_code >> 12) as u8
    }

    /// The 12-byte inner header (length, log code, packed timestamp), as
    /// stored in DLF files.
    pub fn inner_header(&self) -> [u8; 12] {
        let mut header = [0u8; 12];
        header[0..2].copy_from_slice(&self.inner_length.to_le_bytes());
        header[2..4].copy_from_slice(&self.log_code.to_le_bytes());
        header[4..12].copy_from_slice(&self.raw_timestamp.ts.to_le_bytes());
        header
    }
}

/// A raw debug-message record; see [`crate::messages`] for decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Classification of an unframed Diag packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Log(LogPacket),
    Message(MessageRecord),
    Response { opcode: u8, payload: Vec<u8> },
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Empty Diag frame")]
    EmptyFrame,
    #[error("Truncated multi-radio wrapper of {0} bytes")]
    TruncatedMultiRadio(usize),
    #[error("Failed to parse log record: {0}")]
    LogParsing(deku::DekuError),
}

/// Classifies an unframed packet by its opcode. `DIAG_MULTI_RADIO_CMD_F`
/// wrappers are stripped (opcode plus 7 bytes) and the inner packet is
/// classified again.
pub fn classify(unframed: &[u8]) -> Result<Frame, ParseError> {
    let (&opcode, payload) = unframed.split_first().ok_or(ParseError::EmptyFrame)?;

    match opcode {
        opcodes::DIAG_MULTI_RADIO_CMD_F => {
            if payload.len() < 7 {
                return Err(ParseError::TruncatedMultiRadio(unframed.len()));
            }
            classify(&payload[7..])
        }
        opcodes::DIAG_LOG_F => {
            let (_, packet) =
                LogPacket::from_bytes((payload, 0)).map_err(ParseError::LogParsing)?;
            Ok(Frame::Log(packet))
        }
        _ if is_message_opcode(opcode) => Ok(Frame::Message(MessageRecord {
            opcode,
            payload: payload.to_vec(),
        })),
        _ => Ok(Frame::Response {
            opcode,
            payload: payload.to_vec(),
        }),
    }
}
