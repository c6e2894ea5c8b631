//! Log-mask negotiation: telling the baseband which log codes to emit.
//!
//! A log code is a 16-bit value whose high 4 bits name an equipment ID (a
//! radio subsystem family) and whose low 12 bits index into a per-equipment
//! bitmap. The device reports, per equipment ID, the highest valid index;
//! registering interest means sending back a bitmap of exactly that many
//! bits.

use log::{info, warn};
use thiserror::Error;

use crate::diag::opcodes;
use crate::session::{SessionError, SessionHandle};

pub const LOG_CONFIG_RETRIEVE_ID_RANGES_OP: u32 = 1;
pub const LOG_CONFIG_SET_MASK_OP: u32 = 3;

pub const LOG_CONFIG_SUCCESS_S: u32 = 0;

/// Number of equipment IDs (the field is 4 bits wide).
pub const NUM_EQUIPMENT_IDS: usize = 16;

pub fn equipment_name(equipment_id: u32) -> &'static str {
    match equipment_id {
        0x1 => "1X",
        0x4 => "WCDMA",
        0x5 => "GSM",
        0x6 => "LBS",
        0x7 => "UMTS",
        0x8 => "TDMA",
        0xa => "DTV",
        0xb => "APPS/LTE/WIMAX",
        0xc => "DSP",
        0xd => "TDSCDMA",
        0xf => "TOOLS",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Log config response too short ({0} bytes)")]
    ShortResponse(usize),
    #[error("Log config operation mismatch: expected {expected}, got {got}")]
    OperationMismatch { expected: u32, got: u32 },
}

/// Builds the bitmap for one equipment ID: `num_bits` bits, LSB-first
/// within each byte. With an allow-list, only the bits whose full log code
/// appears in it are set; `bit_value = false` produces the all-zeroes mask
/// used on teardown.
pub fn build_log_mask(
    equipment_id: u32,
    num_bits: u32,
    bit_value: bool,
    limit_to_log_codes: Option<&[u16]>,
) -> Vec<u8> {
    let mut log_mask: Vec<u8> = Vec::with_capacity(num_bits.div_ceil(8) as usize);
    let mut current_byte: u8 = 0;
    let mut num_bits_written: u8 = 0;

    for i in 0..num_bits {
        let log_code = ((equipment_id << 12) | i) as u16;
        let enable_this_code =
            bit_value && limit_to_log_codes.is_none_or(|codes| codes.contains(&log_code));
        if enable_this_code {
            current_byte |= 1 << num_bits_written;
        }
        num_bits_written += 1;

        if num_bits_written == 8 || i == num_bits - 1 {
            log_mask.push(current_byte);
            current_byte = 0;
            num_bits_written = 0;
        }
    }

    log_mask
}

/// Payload (after the opcode byte) of a RETRIEVE_ID_RANGES request.
pub fn retrieve_id_ranges_request() -> Vec<u8> {
    let mut payload = vec![0u8; 3];
    payload.extend_from_slice(&LOG_CONFIG_RETRIEVE_ID_RANGES_OP.to_le_bytes());
    payload
}

/// Payload (after the opcode byte) of a SET_MASK request.
pub fn set_mask_request(equipment_id: u32, mask_bitsize: u32, mask: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 3];
    payload.extend_from_slice(&LOG_CONFIG_SET_MASK_OP.to_le_bytes());
    payload.extend_from_slice(&equipment_id.to_le_bytes());
    payload.extend_from_slice(&mask_bitsize.to_le_bytes());
    payload.extend_from_slice(mask);
    payload
}

/// Splits a DIAG_LOG_CONFIG_F response payload into (operation, status,
/// operation-specific data).
pub fn parse_log_config_response(payload: &[u8]) -> Result<(u32, u32, &[u8]), SubscriptionError> {
    if payload.len() < 11 {
        return Err(SubscriptionError::ShortResponse(payload.len()));
    }
    // 3 alignment bytes, then two little-endian u32s
    let operation = u32::from_le_bytes(payload[3..7].try_into().unwrap());
    let status = u32::from_le_bytes(payload[7..11].try_into().unwrap());
    Ok((operation, status, &payload[11..]))
}

/// An acknowledged set of log masks, remembered so teardown can zero the
/// same equipment IDs with masks of the same sizes.
#[derive(Debug, Default, Clone)]
pub struct LogSubscription {
    enabled: Vec<(u32, u32)>,
}

impl LogSubscription {
    /// Negotiates log masks with the device: queries the per-equipment mask
    /// sizes, then commits a mask for every equipment ID the device
    /// advertises. With `limit_to_log_codes`, only those codes are enabled;
    /// otherwise everything is.
    pub fn enable(
        diag: &SessionHandle,
        limit_to_log_codes: Option<&[u16]>,
    ) -> Result<Self, SubscriptionError> {
        let (_, payload) =
            diag.send_recv(opcodes::DIAG_LOG_CONFIG_F, &retrieve_id_ranges_request(), false)?;
        let (operation, status, ranges) = parse_log_config_response(&payload)?;
        if operation != LOG_CONFIG_RETRIEVE_ID_RANGES_OP {
            return Err(SubscriptionError::OperationMismatch {
                expected: LOG_CONFIG_RETRIEVE_ID_RANGES_OP,
                got: operation,
            });
        }
        if status != LOG_CONFIG_SUCCESS_S {
            warn!("Warning: log operation {operation} resulted in status {status}");
        }
        if ranges.len() < NUM_EQUIPMENT_IDS * 4 {
            return Err(SubscriptionError::ShortResponse(payload.len()));
        }

        let mut subscription = LogSubscription::default();
        let mut information_string = String::from("Enabled logging for: ");
        for equipment_id in 0..NUM_EQUIPMENT_IDS as u32 {
            let offset = equipment_id as usize * 4;
            let mask_bitsize = u32::from_le_bytes(ranges[offset..offset + 4].try_into().unwrap());
            if mask_bitsize == 0 {
                continue;
            }

            let mask = build_log_mask(equipment_id, mask_bitsize, true, limit_to_log_codes);
            let (_, payload) = diag.send_recv(
                opcodes::DIAG_LOG_CONFIG_F,
                &set_mask_request(equipment_id, mask_bitsize, &mask),
                false,
            )?;
            let (operation, status, _) = parse_log_config_response(&payload)?;
            if operation != LOG_CONFIG_SET_MASK_OP {
                return Err(SubscriptionError::OperationMismatch {
                    expected: LOG_CONFIG_SET_MASK_OP,
                    got: operation,
                });
            }
            if status != LOG_CONFIG_SUCCESS_S {
                warn!("Warning: log operation {operation} resulted in status {status}");
            }

            subscription.enabled.push((equipment_id, mask_bitsize));
            information_string.push_str(&format!(
                "{} ({}), ",
                equipment_name(equipment_id),
                equipment_id
            ));
        }
        info!("{}", information_string.trim_end_matches(", "));

        Ok(subscription)
    }

    /// Zeroes every mask committed by [`enable`](Self::enable).
    pub fn disable(&self, diag: &SessionHandle) -> Result<(), SubscriptionError> {
        for &(equipment_id, mask_bitsize) in &self.enabled {
            let mask = build_log_mask(equipment_id, mask_bitsize, false, None);
            diag.send_recv(
                opcodes::DIAG_LOG_CONFIG_F,
                &set_mask_request(equipment_id, mask_bitsize, &mask),
                false,
            )?;
        }
        Ok(())
    }

    /// The `(equipment_id, mask_bitsize)` pairs acknowledged by the device.
    pub fn enabled(&self) -> &[(u32, u32)] {
        &self.enabled
    }
}
