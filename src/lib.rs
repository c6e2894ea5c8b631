//! Client library for the Qualcomm DIAG protocol, as spoken by baseband
//! processors over serial, USB and TCP.
//!
//! The layering goes: a [`transport`](crate::transport) moves raw bytes, the
//! [`hdlc`](crate::hdlc) codec frames them, and a [`DiagSession`] runs the
//! request/response matching plus the asynchronous dispatch of log records
//! and debug messages to registered [`Module`]s. On top of that sit the
//! log-mask negotiation ([`log_mask`]), the EFS2 remote filesystem client
//! ([`efs2`]) and replay sources for previously captured logs
//! ([`replay`]).

pub mod diag;
pub mod efs2;
pub mod framer;
pub mod hdlc;
pub mod log_mask;
pub mod messages;
pub mod module;
pub mod modules;
pub mod qdb;
pub mod replay;
pub mod session;
pub mod transport;

pub use module::Module;
pub use session::{DiagSession, SessionError, SessionHandle};
pub use transport::{Transport, TransportError, TransportKind};
