//! Chunked memory dump through `DIAG_PEEKB_F`.
//!
//! Peek commands read 16 bytes at a time, so scanning a whole address space
//! word by word would take forever. The dumper probes forward in 0x1000
//! increments until a readable address answers, walks backwards word by
//! word to find the start of the readable chunk, then reads it forward
//! sequentially. `DIAG_BAD_PARM_F` marks the edges of readable ranges.
//!
//! Works best on older basebands; newer ones reject the peek opcodes
//! entirely, which ends the dump with a note.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use log::{info, warn};

use crate::diag::opcodes;
use crate::module::Module;
use crate::session::{SessionError, SessionHandle};

const PEEK_BYTES: u16 = 16;
const PROBE_STRIDE: u32 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Probing 0x1000 by 0x1000 for the next readable chunk.
    SeekingForward,
    /// Walking back 0x10 by 0x10 to the start of a found chunk.
    RefiningBackwards,
    /// Reading a chunk forward 0x10 by 0x10.
    Reading,
}

pub struct MemoryDumper {
    output_dir: PathBuf,
    start_address: u32,
    end_address: u32,
}

struct ChunkFile {
    file: File,
    base_address: u32,
    written: u32,
}

impl MemoryDumper {
    /// Dumps `[start_address, end_address)` into files named
    /// `chunk_<address>` under `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, start_address: u32, end_address: u32) -> Self {
        MemoryDumper {
            output_dir: output_dir.into(),
            start_address,
            end_address,
        }
    }

    fn open_chunk(&self, base_address: u32) -> std::io::Result<ChunkFile> {
        let path = self.output_dir.join(format!("chunk_{base_address:08x}"));
        Ok(ChunkFile {
            file: File::create(path)?,
            base_address,
            written: 0,
        })
    }
}

impl Module for MemoryDumper {
    fn name(&self) -> &str {
        "memory-dump"
    }

    // no log or message capability: this is a one-shot job driven entirely
    // from on_init

    fn on_init(&mut self, diag: &SessionHandle) -> Result<(), SessionError> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| SessionError::Module(format!("cannot create output directory: {e}")))?;

        let mut state = ScanState::Reading;
        let mut current_address = self.start_address;
        let mut chunk: Option<ChunkFile> = None;

        while current_address < self.end_address {
            let mut request = Vec::with_capacity(6);
            request.extend_from_slice(&current_address.to_le_bytes());
            request.extend_from_slice(&PEEK_BYTES.to_le_bytes());
            let (opcode, payload) = diag.send_recv(opcodes::DIAG_PEEKB_F, &request, true)?;

            if opcode == opcodes::DIAG_PEEKB_F {
                if payload.len() < 6 + PEEK_BYTES as usize {
                    warn!("short peek response at {current_address:#010x}");
                    break;
                }
                let contents = &payload[6..6 + PEEK_BYTES as usize];

                match state {
                    // readable data in the middle of a chunk: walk back to
                    // its start
                    ScanState::SeekingForward => state = ScanState::RefiningBackwards,
                    ScanState::Reading => {
                        if chunk.is_none() {
                            let opened = self
                                .open_chunk(current_address)
                                .map_err(|e| SessionError::Module(e.to_string()))?;
                            chunk = Some(opened);
                        }
                        if let Some(open_chunk) = chunk.as_mut() {
                            open_chunk
                                .file
                                .write_all(contents)
                                .map_err(|e| SessionError::Module(e.to_string()))?;
                            open_chunk.written += PEEK_BYTES as u32;
                        }
                    }
                    ScanState::RefiningBackwards => {}
                }
            } else if opcode == opcodes::DIAG_BAD_PARM_F {
                match state {
                    // the word right before a chunk start: read it forward
                    ScanState::RefiningBackwards => {
                        state = ScanState::Reading;
                        info!("found readable memory at {:#010x}", current_address + 0x10);
                    }
                    // the word past a chunk end: resume probing
                    ScanState::Reading => {
                        state = ScanState::SeekingForward;
                        if let Some(done) = chunk.take() {
                            info!(
                                "memory at {:#010x} had length {:#x}",
                                done.base_address, done.written
                            );
                        }
                    }
                    ScanState::SeekingForward => {}
                }
            } else {
                info!("dumping memory seems not to be supported on this device");
                break;
            }

            match state {
                ScanState::Reading => current_address = current_address.wrapping_add(0x10),
                ScanState::RefiningBackwards => {
                    current_address = current_address.wrapping_sub(0x10)
                }
                ScanState::SeekingForward => {
                    current_address = if current_address % PROBE_STRIDE == 0 {
                        current_address.wrapping_add(PROBE_STRIDE)
                    } else {
                        current_address.wrapping_add(PROBE_STRIDE - current_address % PROBE_STRIDE)
                    };
                    // peeking this region reboots certain devices
                    if current_address == 0xc000_0000 {
                        current_address = current_address.wrapping_add(0x1000_0000);
                    }
                }
            }
        }

        if let Some(done) = chunk.take() {
            info!(
                "memory at {:#010x} had length {:#x}",
                done.base_address, done.written
            );
        }
        Ok(())
    }
}
