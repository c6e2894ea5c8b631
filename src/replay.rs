//! Read-only replay sources: they synthesize log dispatches from previously
//! captured data instead of a live transport.
//!
//! Two formats are supported. DLF files are the concatenation of inner
//! `DIAG_LOG_F` records (length, log code, packed timestamp, body) as
//! produced by QXDM exports and by [`RawLogDump`](crate::modules::RawLogDump).
//! JSON-line files interleave base64 log frames with geolocation fixes.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::diag::{LogRecord, Timestamp};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Truncated replay record")]
    Truncated,
    #[error("Malformed replay record: {0}")]
    Malformed(String),
    #[error("Invalid JSON record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid base64 in log_frame: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// One replayed event.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    Log(LogRecord),
    Position { latitude: f64, longitude: f64 },
}

/// A pull source of replayed events; `Ok(None)` means end of input.
pub trait ReplaySource: Send {
    fn next_event(&mut self) -> Result<Option<ReplayEvent>, ReplayError>;
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, ReplayError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Reader for DLF files: a stream of inner log records without outer
/// headers.
pub struct DlfReader<R: Read + Send> {
    reader: R,
    /// Timestamp of the latest record whose timestamp decoded to a sane
    /// date, carried over to records whose timestamp uses an uncommon
    /// format.
    current_timestamp: DateTime<Utc>,
}

impl DlfReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read + Send> DlfReader<R> {
    pub fn new(reader: R) -> Self {
        DlfReader {
            reader,
            current_timestamp: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }
}

impl<R: Read + Send> ReplaySource for DlfReader<R> {
    fn next_event(&mut self) -> Result<Option<ReplayEvent>, ReplayError> {
        let mut header = [0u8; 12];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            12 => {}
            _ => return Err(ReplayError::Truncated),
        }

        let length = u16::from_le_bytes([header[0], header[1]]);
        let log_code = u16::from_le_bytes([header[2], header[3]]);
        let raw_timestamp = Timestamp {
            ts: u64::from_le_bytes(header[4..12].try_into().unwrap()),
        };

        if length < 12 {
            return Err(ReplayError::Malformed(format!(
                "record length {length} is shorter than its header"
            )));
        }
        let mut body = vec![0u8; length as usize - 12];
        if read_full(&mut self.reader, &mut body)? != body.len() {
            return Err(ReplayError::Truncated);
        }

        // timestamps come in a handful of formats; only adopt values that
        // decode to a plausible date, otherwise keep the last good one
        let decoded = raw_timestamp.to_datetime();
        let min = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        let max = Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0).unwrap();
        if decoded >= min && decoded <= max {
            self.current_timestamp = decoded;
        } else {
            debug!("log 0x{log_code:04x} carries an implausible timestamp ({decoded})");
        }

        Ok(Some(ReplayEvent::Log(LogRecord {
            log_code,
            inner_length: length,
            raw_timestamp,
            body,
            timestamp: self.current_timestamp,
        })))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonLine {
    Log {
        log_type: u16,
        log_frame: String,
        timestamp: f64,
    },
    Position {
        lat: f64,
        lng: f64,
        #[allow(dead_code)]
        timestamp: f64,
    },
}

/// Reader for JSON-line capture files. Log records dispatch like live
/// logs; `lat`/`lng` records update the session's notion of the current
/// position.
pub struct JsonGeoReader<R: BufRead + Send> {
    reader: R,
}

impl JsonGeoReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead + Send> JsonGeoReader<R> {
    pub fn new(reader: R) -> Self {
        JsonGeoReader { reader }
    }
}

impl<R: BufRead + Send> ReplaySource for JsonGeoReader<R> {
    fn next_event(&mut self) -> Result<Option<ReplayEvent>, ReplayError> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonLine>(&line)? {
                JsonLine::Log {
                    log_type,
                    log_frame,
                    timestamp,
                } => {
                    let frame = BASE64.decode(log_frame.as_bytes())?;
                    if frame.len() < 12 {
                        return Err(ReplayError::Malformed(format!(
                            "log_frame of {} bytes is shorter than an inner header",
                            frame.len()
                        )));
                    }
                    let inner_length = u16::from_le_bytes([frame[0], frame[1]]);
                    let raw_timestamp = Timestamp {
                        ts: u64::from_le_bytes(frame[4..12].try_into().unwrap()),
                    };
                    let seconds = timestamp.floor() as i64;
                    let nanos = ((timestamp - timestamp.floor()) * 1e9) as u32;
                    return Ok(Some(ReplayEvent::Log(LogRecord {
                        log_code: log_type,
                        inner_length,
                        raw_timestamp,
                        body: frame[12..].to_vec(),
                        timestamp: Utc
                            .timestamp_opt(seconds, nanos)
                            .single()
                            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()),
                    })));
                }
                JsonLine::Position { lat, lng, .. } => {
                    return Ok(Some(ReplayEvent::Position {
                        latitude: lat,
                        longitude: lng,
                    }));
                }
            }
        }
    }
}
