//! Pseudo-HDLC framing used by the Diag protocol: payloads are terminated by
//! 0x7e, the two special bytes are escaped with 0x7d, and a CRC-16/CCITT
//! trails the payload.

use crate::diag::{ESCAPE_CHAR, ESCAPED_ESCAPE_CHAR, ESCAPED_TRAILER_CHAR, TRAILER_CHAR};
use crc::Crc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum HdlcError {
    #[error("Invalid checksum (expected {0:#06x}, got {1:#06x})")]
    InvalidChecksum(u16, u16),
    #[error("Invalid HDLC escape sequence: [0x7d, {0:#04x}]")]
    InvalidEscapeSequence(u8),
    #[error("No trailing character found (expected 0x7e, got {0:#04x})")]
    NoTrailingCharacter(u8),
    #[error("Missing checksum")]
    MissingChecksum,
    #[error("Data too short to be HDLC encapsulated")]
    TooShort,
}

/// Appends the CRC, escapes 0x7d/0x7e, and terminates with the trailer byte.
pub fn hdlc_encapsulate(data: &[u8], crc: &Crc<u16>) -> Vec<u8> {
    let mut result: Vec<u8> = Vec::with_capacity(data.len() + 3);

    let push_escaped = |result: &mut Vec<u8>, b: u8| match b {
        TRAILER_CHAR => result.extend([ESCAPE_CHAR, ESCAPED_TRAILER_CHAR]),
        ESCAPE_CHAR => result.extend([ESCAPE_CHAR, ESCAPED_ESCAPE_CHAR]),
        _ => result.push(b),
    };

    for &b in data {
        push_escaped(&mut result, b);
    }

    for b in crc.checksum(data).to_le_bytes() {
        push_escaped(&mut result, b);
    }

    result.push(TRAILER_CHAR);
    result
}

/// Reverses [`hdlc_encapsulate`]: strips the trailer, unescapes, and verifies
/// the CRC. The returned payload excludes the checksum.
///
/// Whether a failure here is recoverable is the caller's business: the read
/// loop drops invalid frames silently until the first complete frame of a
/// stream has been seen, and treats them as fatal afterwards.
pub fn hdlc_decapsulate(data: &[u8], crc: &Crc<u16>) -> Result<Vec<u8>, HdlcError> {
    if data.len() < 3 {
        return Err(HdlcError::TooShort);
    }

    if data[data.len() - 1] != TRAILER_CHAR {
        return Err(HdlcError::NoTrailingCharacter(data[data.len() - 1]));
    }

    let mut unescaped = Vec::with_capacity(data.len() - 1);
    let mut escaping = false;
    for &b in &data[..data.len() - 1] {
        if escaping {
            match b {
                ESCAPED_TRAILER_CHAR => unescaped.push(TRAILER_CHAR),
                ESCAPED_ESCAPE_CHAR => unescaped.push(ESCAPE_CHAR),
                _ => return Err(HdlcError::InvalidEscapeSequence(b)),
            }
            escaping = false;
        } else if b == ESCAPE_CHAR {
            escaping = true;
        } else {
            unescaped.push(b);
        }
    }

    // pop off the u16 checksum, check it against what we calculated
    let checksum_hi = unescaped.pop().ok_or(HdlcError::MissingChecksum)?;
    let checksum_lo = unescaped.pop().ok_or(HdlcError::MissingChecksum)?;
    let checksum = u16::from_le_bytes([checksum_lo, checksum_hi]);
    let expected = crc.checksum(&unescaped);
    if checksum != expected {
        return Err(HdlcError::InvalidChecksum(checksum, expected));
    }

    Ok(unescaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::CRC_CCITT;

    #[test]
    fn test_hdlc_encapsulate() {
        let data = vec![0x01, 0x02, 0x03, 0x04];
        let expected = vec![1, 2, 3, 4, 145, 57, 126];
        let encapsulated = hdlc_encapsulate(&data, &CRC_CCITT);
        assert_eq!(&encapsulated, &expected);
        assert_eq!(hdlc_decapsulate(&encapsulated, &CRC_CCITT), Ok(data));
    }

    #[test]
    fn test_special_bytes_are_escaped() {
        let data = vec![0x7e, 0x00, 0x7d, 0x7e];
        let encapsulated = hdlc_encapsulate(&data, &CRC_CCITT);
        // no unescaped trailer byte except the terminal one
        assert_eq!(
            encapsulated.iter().filter(|&&b| b == 0x7e).count(),
            1,
            "interior trailer byte survived escaping: {encapsulated:?}"
        );
        assert_eq!(encapsulated.last(), Some(&0x7e));
        assert_eq!(hdlc_decapsulate(&encapsulated, &CRC_CCITT), Ok(data));
    }

    #[test]
    fn test_roundtrip_various_lengths() {
        for len in [0usize, 1, 2, 3, 255, 4096] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let encapsulated = hdlc_encapsulate(&data, &CRC_CCITT);
            assert_eq!(hdlc_decapsulate(&encapsulated, &CRC_CCITT), Ok(data));
        }
    }

    #[test]
    fn test_single_bitflip_is_detected() {
        let data: Vec<u8> = (0u8..32).collect();
        let encapsulated = hdlc_encapsulate(&data, &CRC_CCITT);
        // flipping any bit outside the trailer must fail decapsulation
        for byte in 0..encapsulated.len() - 1 {
            for bit in 0..8 {
                let mut tampered = encapsulated.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    hdlc_decapsulate(&tampered, &CRC_CCITT).is_err(),
                    "bit {bit} of byte {byte} flipped undetected"
                );
            }
        }
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            hdlc_decapsulate(&[0x7e], &CRC_CCITT),
            Err(HdlcError::TooShort)
        );
        assert_eq!(
            hdlc_decapsulate(&[0x00, 0x7e], &CRC_CCITT),
            Err(HdlcError::TooShort)
        );
    }

    #[test]
    fn test_missing_trailer() {
        assert_eq!(
            hdlc_decapsulate(&[0x01, 0x02, 0x03], &CRC_CCITT),
            Err(HdlcError::NoTrailingCharacter(0x03))
        );
    }
}
