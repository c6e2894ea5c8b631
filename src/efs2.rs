//! Client for the EFS2 remote filesystem exposed over Diag subsystem
//! commands.
//!
//! Every command is a `DIAG_SUBSYS_CMD_F` request whose body starts with the
//! subsystem ID and a 16-bit command code; responses echo both, then carry
//! an errno and command-specific fields. A "hello" handshake negotiating
//! window sizes and protocol version must precede the first real command;
//! the client sends it lazily.
//!
//! Device errnos are surfaced to the caller and never tear the session
//! down.

use std::fmt;

use log::debug;
use thiserror::Error;

use crate::diag::opcodes;
use crate::session::{SessionError, SessionHandle};

/// Subsystem ID of the primary embedded filesystem.
pub const DIAG_SUBSYS_FS: u8 = 19;
/// Subsystem ID of the secondary filesystem on dual-baseband devices.
pub const DIAG_SUBSYS_FS_ALTERNATE: u8 = 62;

pub const EFS2_DIAG_HELLO: u16 = 0;
pub const EFS2_DIAG_QUERY: u16 = 1;
pub const EFS2_DIAG_OPEN: u16 = 2;
pub const EFS2_DIAG_CLOSE: u16 = 3;
pub const EFS2_DIAG_READ: u16 = 4;
pub const EFS2_DIAG_WRITE: u16 = 5;
pub const EFS2_DIAG_SYMLINK: u16 = 6;
pub const EFS2_DIAG_READLINK: u16 = 7;
pub const EFS2_DIAG_UNLINK: u16 = 8;
pub const EFS2_DIAG_MKDIR: u16 = 9;
pub const EFS2_DIAG_RMDIR: u16 = 10;
pub const EFS2_DIAG_OPENDIR: u16 = 11;
pub const EFS2_DIAG_READDIR: u16 = 12;
pub const EFS2_DIAG_CLOSEDIR: u16 = 13;
pub const EFS2_DIAG_RENAME: u16 = 14;
pub const EFS2_DIAG_STAT: u16 = 15;
pub const EFS2_DIAG_LSTAT: u16 = 16;
pub const EFS2_DIAG_FSTAT: u16 = 17;
pub const EFS2_DIAG_CHMOD: u16 = 18;
pub const EFS2_DIAG_STATFS: u16 = 19;
pub const EFS2_DIAG_ACCESS: u16 = 20;
pub const EFS2_DIAG_DEV_INFO: u16 = 21;
pub const EFS2_DIAG_MD5SUM: u16 = 43;

// open() flags, as the device understands them
pub const EFS2_O_RDONLY: i32 = 0;
pub const EFS2_O_WRONLY: i32 = 0o1;
pub const EFS2_O_RDWR: i32 = 0o2;
pub const EFS2_O_CREAT: i32 = 0o100;
pub const EFS2_O_TRUNC: i32 = 0o1000;
pub const EFS2_O_APPEND: i32 = 0o2000;

pub const EFS2_S_IFMT: u32 = 0o170000;
pub const EFS2_S_IFDIR: u32 = 0o040000;
pub const EFS2_S_IFREG: u32 = 0o100000;
pub const EFS2_S_IFLNK: u32 = 0o120000;

/// Window size proposed for each of the six hello windows; the device
/// negotiates them down as it sees fit.
pub const HELLO_WINDOW_SIZE: u32 = 0x100000;

/// Bytes per READ/WRITE round trip.
const TRANSFER_CHUNK: u32 = 1024;

const EFS2_EISDIR: i32 = 0x4000000b;

/// Maps a device errno to its symbolic name. Firmwares use either the
/// EFS2-specific 0x400001xx range or plain POSIX numbers.
pub fn errno_name(errno: i32) -> Option<&'static str> {
    Some(match errno as u32 {
        0x40000001 => "EPERM",
        0x40000002 => "ENOENT",
        0x40000003 => "EEXIST",
        0x40000004 => "EBADF",
        0x40000005 => "ENOMEM",
        0x40000006 => "EACCES",
        0x40000007 => "EBUSY",
        0x40000008 => "EXDEV",
        0x40000009 => "ENODEV",
        0x4000000a => "ENOTDIR",
        0x4000000b => "EISDIR",
        0x4000000c => "EINVAL",
        0x4000000d => "EMFILE",
        0x4000000e => "ETXTBSY",
        0x4000000f => "ENOSPC",
        0x40000010 => "ESPIPE",
        0x40000011 => "FS_ERANGE",
        0x40000012 => "ENAMETOOLONG",
        0x40000013 => "ENOTEMPTY",
        0x40000014 => "ELOOP",
        0x40000015 => "ESTALE",
        0x40000016 => "EDQUOT",
        0x40000017 => "ENOCARD",
        0x40000018 => "EBADFMT",
        0x40000019 => "ENOTITM",
        0x4000001a => "EROLLBACK",
        0x40000022 => "ENOTHINGTOSYNC",
        0x40000101 => "EEOF",
        0x40000102 => "EUNKNOWN_SFAT",
        0x40000103 => "EUNKNOWN_HFAT",
        1 => "EPERM",
        2 => "ENOENT",
        5 => "EIO",
        9 => "EBADF",
        12 => "ENOMEM",
        13 => "EACCES",
        16 => "EBUSY",
        17 => "EEXIST",
        19 => "ENODEV",
        20 => "ENOTDIR",
        21 => "EISDIR",
        22 => "EINVAL",
        28 => "ENOSPC",
        30 => "EROFS",
        _ => return None,
    })
}

/// A nonzero errno returned by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Efs2Errno(pub i32);

impl fmt::Display for Efs2Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match errno_name(self.0) {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "errno {}", self.0),
        }
    }
}

#[derive(Debug, Error)]
pub enum Efs2Error {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("EFS error: {0}")]
    Errno(Efs2Errno),
    #[error("EFS command rejected with response opcode {0:#04x}")]
    Rejected(u8),
    #[error("Short EFS response ({0} bytes)")]
    ShortResponse(usize),
    #[error("EFS response for subsystem {subsystem} command {command}, expected another")]
    WrongCommand { subsystem: u8, command: u16 },
    #[error("Device speaks unsupported EFS protocol version {0}")]
    UnsupportedVersion(u32),
    #[error("Path contains a NUL byte")]
    InvalidPath,
}

fn errno_check(errno: i32) -> Result<(), Efs2Error> {
    if errno != 0 {
        return Err(Efs2Error::Errno(Efs2Errno(errno)));
    }
    Ok(())
}

/// Little-endian field reader over a response body.
struct Fields<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(data: &'a [u8]) -> Self {
        Fields { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Efs2Error> {
        if self.pos + n > self.data.len() {
            return Err(Efs2Error::ShortResponse(self.data.len()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, Efs2Error> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Efs2Error> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, Efs2Error> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, Efs2Error> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn rest(self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

fn path_bytes(path: &str) -> Result<Vec<u8>, Efs2Error> {
    if path.as_bytes().contains(&0) {
        return Err(Efs2Error::InvalidPath);
    }
    let mut bytes = path.as_bytes().to_vec();
    bytes.push(0);
    Ok(bytes)
}

fn string_from_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Negotiated hello parameters, echoed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Efs2Hello {
    pub targ_pkt_window: u32,
    pub targ_byte_window: u32,
    pub host_pkt_window: u32,
    pub host_byte_window: u32,
    pub iter_pkt_window: u32,
    pub iter_byte_window: u32,
    pub version: u32,
    pub min_version: u32,
    pub max_version: u32,
    pub feature_bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Efs2Stat {
    pub mode: u32,
    pub size: u32,
    pub num_links: u32,
    pub atime: i32,
    pub mtime: i32,
    pub ctime: i32,
}

impl Efs2Stat {
    pub fn is_dir(&self) -> bool {
        self.mode & EFS2_S_IFMT == EFS2_S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & EFS2_S_IFMT == EFS2_S_IFLNK
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: i32,
    pub mode: u32,
    pub size: u32,
    pub atime: i32,
    pub mtime: i32,
    pub ctime: i32,
    /// Target path, filled in for symlink entries.
    pub link_target: Option<String>,
}

impl DirEntry {
    pub fn is_symlink(&self) -> bool {
        self.mode & EFS2_S_IFMT == EFS2_S_IFLNK
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Efs2DeviceInfo {
    pub num_blocks: i32,
    pub pages_per_block: i32,
    pub page_size: i32,
    pub total_page_size: i32,
    pub maker_id: i32,
    pub device_id: i32,
    /// Nonzero for NAND flash, zero for NOR.
    pub device_type: u8,
    pub device_name: String,
}

/// An EFS2 client bound to one session; `subsystem` selects the primary or
/// alternate filesystem.
pub struct Efs2Client<'a> {
    diag: &'a SessionHandle,
    subsystem: u8,
    hello_done: bool,
}

impl<'a> Efs2Client<'a> {
    pub fn new(diag: &'a SessionHandle) -> Self {
        Self::with_subsystem(diag, DIAG_SUBSYS_FS)
    }

    pub fn with_subsystem(diag: &'a SessionHandle, subsystem: u8) -> Self {
        Efs2Client {
            diag,
            subsystem,
            hello_done: false,
        }
    }

    /// Sends one subsystem command and returns the response body after the
    /// echoed subsystem/command header.
    fn command(&self, command: u16, body: &[u8]) -> Result<Vec<u8>, Efs2Error> {
        let mut payload = Vec::with_capacity(3 + body.len());
        payload.push(self.subsystem);
        payload.extend_from_slice(&command.to_le_bytes());
        payload.extend_from_slice(body);

        let (opcode, response) =
            self.diag
                .send_recv(opcodes::DIAG_SUBSYS_CMD_F, &payload, true)?;
        if opcode != opcodes::DIAG_SUBSYS_CMD_F {
            return Err(Efs2Error::Rejected(opcode));
        }

        let mut fields = Fields::new(&response);
        let subsystem = fields.u8()?;
        let echoed_command = fields.u16()?;
        if subsystem != self.subsystem || echoed_command != command {
            return Err(Efs2Error::WrongCommand {
                subsystem,
                command: echoed_command,
            });
        }
        Ok(fields.rest().to_vec())
    }

    fn ensure_hello(&mut self) -> Result<(), Efs2Error> {
        if !self.hello_done {
            self.hello()?;
        }
        Ok(())
    }

    /// The EFS2 handshake: proposes large windows, version 1 and every
    /// feature bit, and lets the device negotiate down.
    pub fn hello(&mut self) -> Result<Efs2Hello, Efs2Error> {
        let mut body = Vec::with_capacity(40);
        for _ in 0..6 {
            body.extend_from_slice(&HELLO_WINDOW_SIZE.to_le_bytes());
        }
        for _ in 0..3 {
            body.extend_from_slice(&1u32.to_le_bytes());
        }
        body.extend_from_slice(&u32::MAX.to_le_bytes());

        let response = self.command(EFS2_DIAG_HELLO, &body)?;
        let mut fields = Fields::new(&response);
        let hello = Efs2Hello {
            targ_pkt_window: fields.u32()?,
            targ_byte_window: fields.u32()?,
            host_pkt_window: fields.u32()?,
            host_byte_window: fields.u32()?,
            iter_pkt_window: fields.u32()?,
            iter_byte_window: fields.u32()?,
            version: fields.u32()?,
            min_version: fields.u32()?,
            max_version: fields.u32()?,
            feature_bits: fields.u32()?,
        };
        if hello.version != 1 {
            return Err(Efs2Error::UnsupportedVersion(hello.version));
        }
        debug!("EFS hello negotiated: {hello:?}");
        self.hello_done = true;
        Ok(hello)
    }

    /// Opens a file, returning its descriptor.
    pub fn open(&mut self, path: &str, oflag: i32, mode: i32) -> Result<u32, Efs2Error> {
        self.ensure_hello()?;
        let mut body = Vec::new();
        body.extend_from_slice(&oflag.to_le_bytes());
        body.extend_from_slice(&mode.to_le_bytes());
        body.extend_from_slice(&path_bytes(path)?);

        let response = self.command(EFS2_DIAG_OPEN, &body)?;
        let mut fields = Fields::new(&response);
        let fd = fields.u32()?;
        errno_check(fields.i32()?)?;
        Ok(fd)
    }

    pub fn close(&mut self, fd: u32) -> Result<(), Efs2Error> {
        let response = self.command(EFS2_DIAG_CLOSE, &fd.to_le_bytes())?;
        let mut fields = Fields::new(&response);
        errno_check(fields.i32()?)?;
        Ok(())
    }

    /// Reads up to `nbytes` at `offset`. An empty chunk means end of file.
    pub fn read(&mut self, fd: u32, nbytes: u32, offset: u32) -> Result<Vec<u8>, Efs2Error> {
        let mut body = Vec::new();
        body.extend_from_slice(&fd.to_le_bytes());
        body.extend_from_slice(&nbytes.to_le_bytes());
        body.extend_from_slice(&offset.to_le_bytes());

        let response = self.command(EFS2_DIAG_READ, &body)?;
        let mut fields = Fields::new(&response);
        let _fd = fields.u32()?;
        let _offset = fields.u32()?;
        let _bytes_read = fields.i32()?;
        errno_check(fields.i32()?)?;
        Ok(fields.rest().to_vec())
    }

    /// Writes `data` at `offset`, returning the byte count the device
    /// acknowledged.
    pub fn write(&mut self, fd: u32, offset: u32, data: &[u8]) -> Result<i32, Efs2Error> {
        let mut body = Vec::with_capacity(8 + data.len());
        body.extend_from_slice(&fd.to_le_bytes());
        body.extend_from_slice(&offset.to_le_bytes());
        body.extend_from_slice(data);

        let response = self.command(EFS2_DIAG_WRITE, &body)?;
        let mut fields = Fields::new(&response);
        let _fd = fields.u32()?;
        let _offset = fields.u32()?;
        let bytes_written = fields.i32()?;
        errno_check(fields.i32()?)?;
        Ok(bytes_written)
    }

    pub fn unlink(&mut self, path: &str) -> Result<(), Efs2Error> {
        self.ensure_hello()?;
        let response = self.command(EFS2_DIAG_UNLINK, &path_bytes(path)?)?;
        errno_check(Fields::new(&response).i32()?)?;
        Ok(())
    }

    pub fn mkdir(&mut self, path: &str, mode: u16) -> Result<(), Efs2Error> {
        self.ensure_hello()?;
        let mut body = Vec::new();
        body.extend_from_slice(&mode.to_le_bytes());
        body.extend_from_slice(&path_bytes(path)?);
        let response = self.command(EFS2_DIAG_MKDIR, &body)?;
        errno_check(Fields::new(&response).i32()?)?;
        Ok(())
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), Efs2Error> {
        self.ensure_hello()?;
        let response = self.command(EFS2_DIAG_RMDIR, &path_bytes(path)?)?;
        errno_check(Fields::new(&response).i32()?)?;
        Ok(())
    }

    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), Efs2Error> {
        self.ensure_hello()?;
        let mut body = path_bytes(old_path)?;
        body.extend_from_slice(&path_bytes(new_path)?);
        let response = self.command(EFS2_DIAG_RENAME, &body)?;
        errno_check(Fields::new(&response).i32()?)?;
        Ok(())
    }

    /// Creates `new_link` pointing at `target`.
    pub fn symlink(&mut self, new_link: &str, target: &str) -> Result<(), Efs2Error> {
        self.ensure_hello()?;
        let mut body = path_bytes(new_link)?;
        body.extend_from_slice(&path_bytes(target)?);
        let response = self.command(EFS2_DIAG_SYMLINK, &body)?;
        errno_check(Fields::new(&response).i32()?)?;
        Ok(())
    }

    pub fn readlink(&mut self, path: &str) -> Result<String, Efs2Error> {
        self.ensure_hello()?;
        let response = self.command(EFS2_DIAG_READLINK, &path_bytes(path)?)?;
        let mut fields = Fields::new(&response);
        errno_check(fields.i32()?)?;
        Ok(string_from_nul_padded(fields.rest()))
    }

    pub fn stat(&mut self, path: &str) -> Result<Efs2Stat, Efs2Error> {
        self.ensure_hello()?;
        let response = self.command(EFS2_DIAG_STAT, &path_bytes(path)?)?;
        let mut fields = Fields::new(&response);
        errno_check(fields.i32()?)?;
        Ok(Efs2Stat {
            mode: fields.u32()?,
            size: fields.u32()?,
            num_links: fields.u32()?,
            atime: fields.i32()?,
            mtime: fields.i32()?,
            ctime: fields.i32()?,
        })
    }

    pub fn chmod(&mut self, path: &str, mode: u16) -> Result<(), Efs2Error> {
        self.ensure_hello()?;
        let mut body = Vec::new();
        body.extend_from_slice(&mode.to_le_bytes());
        body.extend_from_slice(&path_bytes(path)?);
        let response = self.command(EFS2_DIAG_CHMOD, &body)?;
        errno_check(Fields::new(&response).i32()?)?;
        Ok(())
    }

    pub fn opendir(&mut self, path: &str) -> Result<u32, Efs2Error> {
        self.ensure_hello()?;
        let response = self.command(EFS2_DIAG_OPENDIR, &path_bytes(path)?)?;
        let mut fields = Fields::new(&response);
        let fd = fields.u32()?;
        errno_check(fields.i32()?)?;
        Ok(fd)
    }

    /// Reads one directory entry. Sequence numbers start at 1; an entry
    /// with an empty name marks the end of the directory.
    pub fn readdir(&mut self, fd: u32, sequence: i32) -> Result<DirEntry, Efs2Error> {
        let mut body = Vec::new();
        body.extend_from_slice(&fd.to_le_bytes());
        body.extend_from_slice(&sequence.to_le_bytes());

        let response = self.command(EFS2_DIAG_READDIR, &body)?;
        let mut fields = Fields::new(&response);
        let _fd = fields.u32()?;
        let _sequence = fields.i32()?;
        errno_check(fields.i32()?)?;
        let entry_type = fields.i32()?;
        let mode = fields.i32()? as u32;
        let size = fields.i32()? as u32;
        let atime = fields.i32()?;
        let mtime = fields.i32()?;
        let ctime = fields.i32()?;
        let name = string_from_nul_padded(fields.rest());
        Ok(DirEntry {
            name,
            entry_type,
            mode,
            size,
            atime,
            mtime,
            ctime,
            link_target: None,
        })
    }

    pub fn closedir(&mut self, fd: u32) -> Result<(), Efs2Error> {
        let response = self.command(EFS2_DIAG_CLOSEDIR, &fd.to_le_bytes())?;
        errno_check(Fields::new(&response).i32()?)?;
        Ok(())
    }

    /// Information about the flash device backing the filesystem.
    pub fn dev_info(&mut self) -> Result<Efs2DeviceInfo, Efs2Error> {
        self.ensure_hello()?;
        let response = self.command(EFS2_DIAG_DEV_INFO, &[])?;
        let mut fields = Fields::new(&response);
        errno_check(fields.i32()?)?;
        Ok(Efs2DeviceInfo {
            num_blocks: fields.i32()?,
            pages_per_block: fields.i32()?,
            page_size: fields.i32()?,
            total_page_size: fields.i32()?,
            maker_id: fields.i32()?,
            device_id: fields.i32()?,
            device_type: fields.u8()?,
            device_name: string_from_nul_padded(fields.rest()),
        })
    }

    /// MD5 digest of a remote file, computed device-side.
    pub fn md5sum(&mut self, path: &str) -> Result<[u8; 16], Efs2Error> {
        self.ensure_hello()?;
        let mut body = Vec::new();
        body.extend_from_slice(&0u16.to_le_bytes()); // sequence number
        body.extend_from_slice(&path_bytes(path)?);

        let response = self.command(EFS2_DIAG_MD5SUM, &body)?;
        let mut fields = Fields::new(&response);
        let _sequence = fields.u16()?;
        errno_check(fields.i32()?)?;
        let digest = fields.take(16)?;
        Ok(digest.try_into().unwrap())
    }

    /// Reads a whole file: open read-only, chunked reads until the device
    /// answers with an empty chunk, close. The descriptor is closed even
    /// when a read fails.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Efs2Error> {
        let fd = self.open(path, EFS2_O_RDONLY, 0)?;
        let result = self.read_to_end(fd);
        let close_result = self.close(fd);
        let data = result?;
        close_result?;
        Ok(data)
    }

    fn read_to_end(&mut self, fd: u32) -> Result<Vec<u8>, Efs2Error> {
        let mut data = Vec::new();
        loop {
            let chunk = self.read(fd, TRANSFER_CHUNK, data.len() as u32)?;
            if chunk.is_empty() {
                return Ok(data);
            }
            data.extend_from_slice(&chunk);
        }
    }

    /// Writes a whole file, creating or truncating it. An existing regular
    /// file keeps its mode; a new file is created mode 0777.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), Efs2Error> {
        let mode = match self.stat(path) {
            Ok(stat) if stat.is_dir() => return Err(Efs2Error::Errno(Efs2Errno(EFS2_EISDIR))),
            Ok(stat) => stat.mode as i32,
            // most likely ENOENT; open() will complain about anything else
            Err(Efs2Error::Errno(_)) => (EFS2_S_IFREG | 0o777) as i32,
            Err(e) => return Err(e),
        };

        let fd = self.open(path, EFS2_O_WRONLY | EFS2_O_TRUNC | EFS2_O_CREAT, mode)?;
        let result = self.write_all(fd, data);
        let close_result = self.close(fd);
        result?;
        close_result?;
        Ok(())
    }

    fn write_all(&mut self, fd: u32, data: &[u8]) -> Result<(), Efs2Error> {
        for (index, chunk) in data.chunks(TRANSFER_CHUNK as usize).enumerate() {
            self.write(fd, (index * TRANSFER_CHUNK as usize) as u32, chunk)?;
        }
        Ok(())
    }

    /// Lists a directory, resolving symlink targets. The directory
    /// descriptor is closed even when iteration fails.
    pub fn list_dir(&mut self, path: &str) -> Result<Vec<DirEntry>, Efs2Error> {
        let fd = self.opendir(path)?;
        let result = self.read_dir_entries(path, fd);
        let close_result = self.closedir(fd);
        let entries = result?;
        close_result?;
        Ok(entries)
    }

    fn read_dir_entries(&mut self, dir_path: &str, fd: u32) -> Result<Vec<DirEntry>, Efs2Error> {
        let mut entries = Vec::new();
        let mut sequence = 1;
        loop {
            let mut entry = self.readdir(fd, sequence)?;
            if entry.name.is_empty() {
                return Ok(entries);
            }
            if entry.is_symlink() {
                let full_path = if dir_path.ends_with('/') {
                    format!("{dir_path}{}", entry.name)
                } else {
                    format!("{dir_path}/{}", entry.name)
                };
                entry.link_target = Some(self.readlink(&full_path)?);
            }
            entries.push(entry);
            sequence += 1;
        }
    }
}
