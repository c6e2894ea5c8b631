//! Decoding of Diag debug-message records.
//!
//! Five opcodes carry messages. All start with a common header (timestamp
//! type, argument count, dropped-message count, timestamp), then diverge:
//! extended messages inline their printf format string and source file,
//! terse variants replace the string with a 32-bit hash to be resolved
//! against a QDB dictionary (see [`crate::qdb`]). The two legacy opcodes
//! (`DIAG_MSG_F`, `DIAG_EXT_MSG_TERSE_F`) are surfaced raw.

use deku::prelude::*;
use thiserror::Error;

use crate::diag::opcodes;

/// EXT_MSG_CONFIG sub-command: set the runtime mask of one SSID range.
pub const MSG_EXT_SUBCMD_SET_RT_MASK: u8 = 4;
/// EXT_MSG_CONFIG sub-command: set the runtime mask of every SSID.
pub const MSG_EXT_SUBCMD_SET_ALL_RT_MASKS: u8 = 5;

/// Runtime mask silencing every message level.
pub const MSG_LVL_NONE: u32 = 0;
/// Runtime mask enabling every message level.
pub const MSG_LVL_ALL: u32 = 0xffff_ffff;

#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct MsgHeader {
    pub ts_type: u8,
    pub num_args: u8,
    pub drop_cnt: u8,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
struct ExtMsgMeta {
    line: u16,
    subsystem_id: u16,
    subsystem_mask: u32,
}

#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
struct QsrTerseMeta {
    line: u16,
    subsystem_id: u16,
    subsystem_mask: u32,
    hash: u32,
}

#[derive(Debug, Clone, PartialEq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
struct Qsr4TerseMeta {
    hash: u32,
    magic: u16,
}

/// One message argument word. The wire width matters for sign extension,
/// so it is kept next to the raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgArg {
    pub raw: u64,
    pub size: u8,
}

impl MsgArg {
    pub fn signed(&self) -> i64 {
        let bits = self.size as u32 * 8;
        if bits >= 64 {
            self.raw as i64
        } else {
            let shift = 64 - bits;
            ((self.raw << shift) as i64) >> shift
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebugMessage {
    /// `DIAG_EXT_MSG_F`: format string and source file inlined.
    Ext {
        line: u16,
        subsystem_id: u16,
        subsystem_mask: u32,
        args: Vec<MsgArg>,
        format: String,
        file: String,
    },
    /// `DIAG_QSR_EXT_MSG_TERSE_F`: format string replaced by a hash.
    QsrTerse {
        line: u16,
        subsystem_id: u16,
        subsystem_mask: u32,
        hash: u32,
        args: Vec<MsgArg>,
    },
    /// `DIAG_QSR4_EXT_MSG_TERSE_F`: everything but the hash lives in the
    /// dictionary; argument width and count are packed into `num_args`.
    Qsr4Terse { hash: u32, args: Vec<MsgArg> },
    /// Legacy variants this crate does not interpret.
    Raw { opcode: u8, payload: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub header: MsgHeader,
    pub body: DebugMessage,
}

#[derive(Debug, Error, PartialEq)]
pub enum MessageParseError {
    #[error("Message payload too short")]
    TooShort,
    #[error("Failed to parse message header: {0}")]
    Header(deku::DekuError),
    #[error("Opcode {0:#04x} is not a message opcode")]
    NotAMessage(u8),
}

fn take_args(data: &[u8], arg_size: usize, num_args: usize) -> Result<(Vec<MsgArg>, &[u8]), MessageParseError> {
    let total = arg_size * num_args;
    if data.len() < total {
        return Err(MessageParseError::TooShort);
    }
    let mut args = Vec::with_capacity(num_args);
    for chunk in data[..total].chunks(arg_size.max(1)).take(num_args) {
        let mut raw = [0u8; 8];
        raw[..chunk.len()].copy_from_slice(chunk);
        args.push(MsgArg {
            raw: u64::from_le_bytes(raw),
            size: arg_size as u8,
        });
    }
    Ok((args, &data[total..]))
}

fn take_nul_string(data: &[u8]) -> (String, &[u8]) {
    match data.iter().position(|&b| b == 0) {
        Some(end) => (
            String::from_utf8_lossy(&data[..end]).into_owned(),
            &data[end + 1..],
        ),
        None => (String::from_utf8_lossy(data).into_owned(), &[]),
    }
}

/// Parses one message record given its opcode and payload (the bytes after
/// the opcode).
pub fn parse_message(opcode: u8, payload: &[u8]) -> Result<ParsedMessage, MessageParseError> {
    if !crate::diag::is_message_opcode(opcode) {
        return Err(MessageParseError::NotAMessage(opcode));
    }
    let ((rest, _), header) =
        MsgHeader::from_bytes((payload, 0)).map_err(MessageParseError::Header)?;

    let body = match opcode {
        opcodes::DIAG_EXT_MSG_F => {
            let ((rest, _), meta) =
                ExtMsgMeta::from_bytes((rest, 0)).map_err(MessageParseError::Header)?;
            let (args, rest) = take_args(rest, 4, header.num_args as usize)?;
            let (format, rest) = take_nul_string(rest);
            let (file, _) = take_nul_string(rest);
            DebugMessage::Ext {
                line: meta.line,
                subsystem_id: meta.subsystem_id,
                subsystem_mask: meta.subsystem_mask,
                args,
                format,
                file,
            }
        }
        opcodes::DIAG_QSR_EXT_MSG_TERSE_F => {
            let ((rest, _), meta) =
                QsrTerseMeta::from_bytes((rest, 0)).map_err(MessageParseError::Header)?;
            let (args, _) = take_args(rest, 4, header.num_args as usize)?;
            DebugMessage::QsrTerse {
                line: meta.line,
                subsystem_id: meta.subsystem_id,
                subsystem_mask: meta.subsystem_mask,
                hash: meta.hash,
                args,
            }
        }
        opcodes::DIAG_QSR4_EXT_MSG_TERSE_F => {
            let ((rest, _), meta) =
                Qsr4TerseMeta::from_bytes((rest, 0)).map_err(MessageParseError::Header)?;
            let arg_size = ((header.num_args >> 4) & 0xf) as usize;
            let num_args = (header.num_args & 0xf) as usize;
            let (args, _) = take_args(rest, arg_size, num_args)?;
            DebugMessage::Qsr4Terse {
                hash: meta.hash,
                args,
            }
        }
        _ => DebugMessage::Raw {
            opcode,
            payload: payload.to_vec(),
        },
    };

    Ok(ParsedMessage { header, body })
}

/// Builds the EXT_MSG_CONFIG payload setting every SSID's runtime mask.
pub fn set_all_rt_masks_request(level_mask: u32) -> Vec<u8> {
    let mut payload = vec![MSG_EXT_SUBCMD_SET_ALL_RT_MASKS, 0, 0];
    payload.extend_from_slice(&level_mask.to_le_bytes());
    payload
}

/// Builds the EXT_MSG_CONFIG payload setting the runtime mask of one SSID
/// range.
pub fn set_rt_mask_request(ssid_start: u16, ssid_end: u16, level_mask: u32) -> Vec<u8> {
    let mut payload = vec![MSG_EXT_SUBCMD_SET_RT_MASK];
    payload.extend_from_slice(&ssid_start.to_le_bytes());
    payload.extend_from_slice(&ssid_end.to_le_bytes());
    payload.extend_from_slice(&[0, 0]);
    payload.extend_from_slice(&level_mask.to_le_bytes());
    payload
}

#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("More format conversions than arguments")]
    TooFewArguments,
}

/// Renders raw argument words the way the fallback path prints them.
pub fn debug_args(args: &[MsgArg]) -> String {
    let values: Vec<String> = args.iter().map(|arg| format!("{:#010x}", arg.raw)).collect();
    format!("[{}]", values.join(", "))
}

/// printf-style formatting of a Qualcomm message: the argument list only
/// carries integer words, so the integer conversions are implemented and
/// anything else renders as the conversion specifier plus the raw word.
pub fn format_printf(fmt: &str, args: &[MsgArg]) -> Result<String, FormatError> {
    const FLAGS: &[char] = &['#', '0', '-', ' ', '+'];
    const LENGTHS: &[&str] = &["hh", "h", "ll", "l", "q", "L", "j", "z", "Z", "t"];

    let bytes = fmt.as_bytes();
    let mut result = String::new();
    let mut args = args.iter();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'%' {
            result.push(bytes[pos] as char);
            pos += 1;
            continue;
        }
        let conv_start = pos;
        pos += 1;

        let mut zero_pad = false;
        let mut left_justify = false;
        let mut alternate = false;
        while pos < bytes.len() && FLAGS.contains(&(bytes[pos] as char)) {
            match bytes[pos] {
                b'0' => zero_pad = true,
                b'-' => left_justify = true,
                b'#' => alternate = true,
                _ => {}
            }
            pos += 1;
        }

        let mut width: usize = 0;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            width = width * 10 + (bytes[pos] - b'0') as usize;
            pos += 1;
        }

        let mut precision: Option<usize> = None;
        if pos < bytes.len() && bytes[pos] == b'.' {
            pos += 1;
            let mut value = 0;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                value = value * 10 + (bytes[pos] - b'0') as usize;
                pos += 1;
            }
            precision = Some(value);
        }

        for length in LENGTHS {
            if bytes[pos..].starts_with(length.as_bytes()) {
                pos += length.len();
                break;
            }
        }

        let Some(&conv) = bytes.get(pos) else {
            // trailing lone '%': keep it verbatim
            result.push('%');
            break;
        };
        pos += 1;

        let formatted = match conv {
            b'%' => "%".to_string(),
            b'd' | b'i' => {
                let arg = args.next().ok_or(FormatError::TooFewArguments)?;
                arg.signed().to_string()
            }
            b'u' => {
                let arg = args.next().ok_or(FormatError::TooFewArguments)?;
                arg.raw.to_string()
            }
            b'o' => {
                let arg = args.next().ok_or(FormatError::TooFewArguments)?;
                let digits = format!("{:o}", arg.raw);
                if alternate && arg.raw != 0 {
                    format!("0{digits}")
                } else {
                    digits
                }
            }
            b'x' | b'X' | b'p' => {
                let arg = args.next().ok_or(FormatError::TooFewArguments)?;
                let digits = if conv == b'X' {
                    format!("{:X}", arg.raw)
                } else {
                    format!("{:x}", arg.raw)
                };
                if conv == b'p' || alternate {
                    format!("0x{digits}")
                } else {
                    digits
                }
            }
            b'c' => {
                let arg = args.next().ok_or(FormatError::TooFewArguments)?;
                char::from_u32(arg.raw as u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER)
                    .to_string()
            }
            b'e' | b'E' | b'f' | b'F' | b'g' | b'G' | b'a' | b'A' | b's' => {
                // not representable with integer-only argument words: show
                // the specifier and the raw value
                let arg = args.next().ok_or(FormatError::TooFewArguments)?;
                format!("%{}[{:#010x}]", conv as char, arg.raw)
            }
            _ => {
                // malformed conversion: unroll and keep the '%' literal
                pos = conv_start + 1;
                result.push('%');
                continue;
            }
        };

        let padded = if conv != b'%' && width > formatted.len() {
            let pad = width - formatted.len();
            if left_justify {
                format!("{formatted}{}", " ".repeat(pad))
            } else if zero_pad {
                let (sign, digits) = match formatted.strip_prefix('-') {
                    Some(rest) => ("-", rest),
                    None => ("", formatted.as_str()),
                };
                format!("{sign}{}{digits}", "0".repeat(pad))
            } else {
                format!("{}{formatted}", " ".repeat(pad))
            }
        } else {
            formatted
        };
        let _ = precision; // integer precision rarely appears in practice

        result.push_str(&padded);
    }

    Ok(result)
}
