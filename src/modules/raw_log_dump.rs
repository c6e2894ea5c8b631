//! Raw log sink: registers for log records and appends them to a writer in
//! the DLF layout (inner header followed by body), which QXDM-family tools
//! and [`DlfReader`](crate::replay::DlfReader) read back.

use std::io::Write;

use log::{error, warn};

use crate::diag::LogRecord;
use crate::log_mask::LogSubscription;
use crate::module::Module;
use crate::session::{SessionError, SessionHandle};

pub struct RawLogDump<W: Write + Send> {
    sink: W,
    limit_to_log_codes: Option<Vec<u16>>,
    subscription: LogSubscription,
}

impl<W: Write + Send> RawLogDump<W> {
    pub fn new(sink: W) -> Self {
        RawLogDump {
            sink,
            limit_to_log_codes: None,
            subscription: LogSubscription::default(),
        }
    }

    /// Restricts the negotiated log mask to the given log codes instead of
    /// everything the device advertises.
    pub fn with_log_codes(mut self, log_codes: Vec<u16>) -> Self {
        self.limit_to_log_codes = Some(log_codes);
        self
    }
}

impl<W: Write + Send> Module for RawLogDump<W> {
    fn name(&self) -> &str {
        "raw-log-dump"
    }

    fn wants_logs(&self) -> bool {
        true
    }

    fn on_init(&mut self, diag: &SessionHandle) -> Result<(), SessionError> {
        self.subscription = LogSubscription::enable(diag, self.limit_to_log_codes.as_deref())
            .map_err(|e| SessionError::Module(e.to_string()))?;
        Ok(())
    }

    fn on_log(&mut self, record: &LogRecord) {
        // mismatching inner lengths exist in the wild; the record is still
        // written for forensic value
        let actual = record.inner_header().len() + record.body.len();
        if record.inner_length as usize != actual {
            warn!(
                "log type 0x{:04x} indicates size {} instead of {}",
                record.log_code, record.inner_length, actual
            );
        }
        if let Err(e) = self
            .sink
            .write_all(&record.inner_header())
            .and_then(|_| self.sink.write_all(&record.body))
        {
            error!("failed to write log record: {e}");
        }
    }

    fn on_deinit(&mut self, diag: &SessionHandle) {
        if let Err(e) = self.subscription.disable(diag) {
            warn!("failed to zero log masks: {e}");
        }
        if let Err(e) = self.sink.flush() {
            error!("failed to flush log sink: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Timestamp;
    use chrono::Utc;

    #[test]
    fn test_written_records_roundtrip_through_dlf_reader() {
        use crate::replay::{DlfReader, ReplayEvent, ReplaySource};

        let record = LogRecord {
            log_code: 0xb0c0,
            body: vec![0xde, 0xad, 0xbe, 0xef],
            raw_timestamp: Timestamp { ts: 0 },
            inner_length: 16,
            timestamp: Utc::now(),
        };
        let mut dump = RawLogDump::new(Vec::new());
        dump.on_log(&record);

        let mut reader = DlfReader::new(std::io::Cursor::new(dump.sink));
        match reader.next_event().unwrap().unwrap() {
            ReplayEvent::Log(read_back) => {
                assert_eq!(read_back.log_code, 0xb0c0);
                assert_eq!(read_back.body, record.body);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
