//! QDB hash dictionaries, used to resolve terse debug messages.
//!
//! Terse message records carry a 32-bit hash instead of a format string;
//! the QDB file shipped with the firmware maps hashes back to the source
//! file and string. Files come either plain or zlib-compressed behind a
//! 0x40-byte header starting with `\x7fQDB`.
//!
//! The plain format is line-based: `hash:file:string` records at the top
//! level, plus tagged sections (`<Content>` ... `</Content>`) whose lines
//! carry the richer QSR4 records `hash:mask:ssid:line:file:string`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use flate2::read::ZlibDecoder;
use log::debug;
use thiserror::Error;

const QDB_MAGIC: &[u8] = b"\x7fQDB";
const QDB_HEADER_SIZE: usize = 0x40;

#[derive(Debug, Error)]
pub enum QdbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Unclosed tag <{0}> at end of file")]
    UnclosedTag(String),
    #[error("Malformed dictionary line: {0:?}")]
    MalformedLine(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedMessage {
    pub hash: u32,
    pub file: String,
    pub string: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Qsr4HashedMessage {
    pub hash: u32,
    pub subsystem_mask: u32,
    pub subsystem_id: u16,
    pub line: u16,
    pub file: String,
    pub string: String,
}

#[derive(Debug, Default)]
pub struct QdbFile {
    messages: HashMap<u32, HashedMessage>,
    qsr4_messages: HashMap<u32, Qsr4HashedMessage>,
}

impl QdbFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, QdbError> {
        Self::parse(File::open(path)?)
    }

    pub fn parse<R: Read>(mut reader: R) -> Result<Self, QdbError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        if data.len() >= QDB_HEADER_SIZE && data.starts_with(QDB_MAGIC) {
            debug!("inflating compressed .qdb file");
            let mut inflated = Vec::new();
            ZlibDecoder::new(&data[QDB_HEADER_SIZE..]).read_to_end(&mut inflated)?;
            Self::parse_uncompressed(&inflated)
        } else {
            Self::parse_uncompressed(&data)
        }
    }

    fn parse_uncompressed(data: &[u8]) -> Result<Self, QdbError> {
        let mut qdb = QdbFile::default();
        let mut current_tag: Option<String> = None;

        for raw_line in data.split(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(raw_line);
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(tag) = &current_tag {
                let trimmed = line.trim();
                if trimmed == format!("</{tag}>") || trimmed == format!("<\\{tag}>") {
                    current_tag = None;
                } else {
                    qdb.process_line(Some(tag.as_str()), line)?;
                }
            } else if let Some((tag, single_line_content)) = parse_tag(line) {
                if single_line_content.is_none() {
                    current_tag = Some(tag);
                }
                // single-line tags only carry file metadata, which nothing
                // here consumes
            } else {
                qdb.process_line(None, line)?;
            }
        }

        if let Some(tag) = current_tag {
            return Err(QdbError::UnclosedTag(tag));
        }

        debug!(
            "parsed QDB dictionary: {} hashes, {} QSR4 hashes",
            qdb.messages.len(),
            qdb.qsr4_messages.len()
        );
        Ok(qdb)
    }

    fn process_line(&mut self, tag: Option<&str>, line: &str) -> Result<(), QdbError> {
        let malformed = || QdbError::MalformedLine(line.to_string());
        match tag {
            None => {
                let mut parts = line.splitn(3, ':');
                let hash = parts
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(malformed)?;
                let file = parts.next().ok_or_else(malformed)?.to_string();
                let string = parts.next().ok_or_else(malformed)?.to_string();
                self.messages
                    .insert(hash, HashedMessage { hash, file, string });
            }
            Some("Content") => {
                let mut parts = line.splitn(6, ':');
                let hash = parts
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(malformed)?;
                let subsystem_mask = parts
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(malformed)?;
                let subsystem_id = parts
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(malformed)?;
                let line_number = parts
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(malformed)?;
                let file = parts.next().ok_or_else(malformed)?.to_string();
                let string = parts.next().ok_or_else(malformed)?.to_string();
                self.qsr4_messages.insert(
                    hash,
                    Qsr4HashedMessage {
                        hash,
                        subsystem_mask,
                        subsystem_id,
                        line: line_number,
                        file,
                        string,
                    },
                );
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub fn lookup(&self, hash: u32) -> Option<&HashedMessage> {
        self.messages.get(&hash)
    }

    pub fn lookup_qsr4(&self, hash: u32) -> Option<&Qsr4HashedMessage> {
        self.qsr4_messages.get(&hash)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.qsr4_messages.is_empty()
    }

    /// Merges another dictionary into this one (several QDB files may be
    /// loaded side by side).
    pub fn merge(&mut self, other: QdbFile) {
        self.messages.extend(other.messages);
        self.qsr4_messages.extend(other.qsr4_messages);
    }
}

/// Matches `<Tag>` (section opener) or `<Tag> value </Tag>` (single-line
/// metadata), returning the tag name and the inline value if present.
fn parse_tag(line: &str) -> Option<(String, Option<String>)> {
    let line = line.trim();
    let rest = line.strip_prefix('<')?;
    let close = rest.find('>')?;
    let tag = &rest[..close];
    if tag.is_empty()
        || !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }

    let content = rest[close + 1..].trim();
    if content.is_empty() {
        return Some((tag.to_string(), None));
    }
    for closer in [format!("</{tag}>"), format!("<\\{tag}>")] {
        if let Some(inner) = content.strip_suffix(closer.as_str()) {
            return Some((tag.to_string(), Some(inner.trim().to_string())));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_plain_dictionary() {
        let text = "\
# comment line
123:src/rrc.c:rrc state %d
456:src/nas.c:attach reject cause %d
<Version> 2 </Version>
<Content>
789:4:42:1337:src/mm.c:plmn search in %d ms
</Content>
";
        let qdb = QdbFile::parse(Cursor::new(text)).unwrap();
        assert_eq!(qdb.lookup(123).unwrap().string, "rrc state %d");
        assert_eq!(qdb.lookup(456).unwrap().file, "src/nas.c");
        let qsr4 = qdb.lookup_qsr4(789).unwrap();
        assert_eq!(qsr4.subsystem_id, 42);
        assert_eq!(qsr4.line, 1337);
        assert_eq!(qsr4.string, "plmn search in %d ms");
        assert!(qdb.lookup(789).is_none());
    }

    #[test]
    fn test_colons_in_format_string() {
        let qdb = QdbFile::parse(Cursor::new("1:file.c:a:b:c %d")).unwrap();
        assert_eq!(qdb.lookup(1).unwrap().string, "a:b:c %d");
    }

    #[test]
    fn test_unclosed_tag() {
        assert!(matches!(
            QdbFile::parse(Cursor::new("<Content>\n1:2:3:4:f:s")),
            Err(QdbError::UnclosedTag(tag)) if tag == "Content"
        ));
    }

    #[test]
    fn test_malformed_line() {
        assert!(matches!(
            QdbFile::parse(Cursor::new("not-a-record")),
            Err(QdbError::MalformedLine(_))
        ));
    }

    #[test]
    fn test_compressed_roundtrip() {
        use flate2::Compression;
        use flate2::write::ZlibEncoder;
        use std::io::Write;

        let mut compressed = Vec::new();
        compressed.extend_from_slice(QDB_MAGIC);
        compressed.resize(QDB_HEADER_SIZE, 0);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"42:f.c:hello %u\n").unwrap();
        compressed.extend(encoder.finish().unwrap());

        let qdb = QdbFile::parse(Cursor::new(compressed)).unwrap();
        assert_eq!(qdb.lookup(42).unwrap().string, "hello %u");
    }
}
