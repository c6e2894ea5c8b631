//! Live pretty-printer for Diag debug messages, resolving terse records
//! against loaded QDB dictionaries.

use log::warn;

use crate::diag::{MessageRecord, opcodes};
use crate::messages::{
    self, DebugMessage, MSG_LVL_ALL, MSG_LVL_NONE, MsgArg, format_printf,
};
use crate::module::Module;
use crate::qdb::QdbFile;
use crate::session::{SessionError, SessionHandle};

/// Restricts message output to one subsystem ID with a level mask.
#[derive(Debug, Clone, Copy)]
pub struct MessageFilter {
    pub subsystem_id: u16,
    pub level_mask: u32,
}

pub struct MessagePrinter {
    qdb: QdbFile,
    filters: Option<Vec<MessageFilter>>,
}

impl MessagePrinter {
    pub fn new(qdb: QdbFile) -> Self {
        MessagePrinter { qdb, filters: None }
    }

    /// Only enables the given subsystem IDs instead of every runtime mask.
    pub fn with_filters(mut self, filters: Vec<MessageFilter>) -> Self {
        self.filters = Some(filters);
        self
    }

    fn print_message(&self, subsystem_id: u16, line: u16, file: &str, format: &str, args: &[MsgArg]) {
        let formatted = match format_printf(format, args) {
            Ok(formatted) => formatted,
            // argument mismatch: show the string as-is plus the raw words
            Err(_) => format!("{format} <- {}", messages::debug_args(args)),
        };
        // each message stays on a single line
        let formatted = formatted.replace('\n', "⏎");
        let line_spec = format!("{file}:{line}");
        println!("[{subsystem_id:5}] {line_spec:44} {formatted}");
    }
}

impl Module for MessagePrinter {
    fn name(&self) -> &str {
        "message-printer"
    }

    fn wants_messages(&self) -> bool {
        true
    }

    fn on_init(&mut self, diag: &SessionHandle) -> Result<(), SessionError> {
        match &self.filters {
            None => {
                diag.send_recv(
                    opcodes::DIAG_EXT_MSG_CONFIG_F,
                    &messages::set_all_rt_masks_request(MSG_LVL_ALL),
                    false,
                )?;
            }
            Some(filters) => {
                for filter in filters {
                    diag.send_recv(
                        opcodes::DIAG_EXT_MSG_CONFIG_F,
                        &messages::set_rt_mask_request(
                            filter.subsystem_id,
                            filter.subsystem_id,
                            filter.level_mask,
                        ),
                        false,
                    )?;
                }
            }
        }
        Ok(())
    }

    fn on_message(&mut self, message: &MessageRecord) {
        let parsed = match messages::parse_message(message.opcode, &message.payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("undecodable message {}: {e}", opcodes::label(message.opcode));
                return;
            }
        };

        if parsed.header.drop_cnt > 0 {
            warn!(
                "Dropped {} log message(s); consider adding filters",
                parsed.header.drop_cnt
            );
        }

        match &parsed.body {
            DebugMessage::Ext {
                line,
                subsystem_id,
                args,
                format,
                file,
                ..
            } => self.print_message(*subsystem_id, *line, file, format, args),
            DebugMessage::QsrTerse {
                line,
                subsystem_id,
                hash,
                args,
                ..
            } => match self.qdb.lookup(*hash) {
                Some(hashed) => {
                    self.print_message(*subsystem_id, *line, &hashed.file, &hashed.string, args)
                }
                None => warn!(
                    "Unmapped terse message (try loading a QDB dictionary): {hash}{}",
                    messages::debug_args(args)
                ),
            },
            DebugMessage::Qsr4Terse { hash, args } => match self.qdb.lookup_qsr4(*hash) {
                Some(hashed) => self.print_message(
                    hashed.subsystem_id,
                    hashed.line,
                    &hashed.file,
                    &hashed.string,
                    args,
                ),
                None => warn!(
                    "Unmapped terse message (try loading a QDB dictionary): {hash}{}",
                    messages::debug_args(args)
                ),
            },
            DebugMessage::Raw { opcode, .. } => {
                warn!("Unhandled message opcode {}", opcodes::label(*opcode));
            }
        }
    }

    fn on_deinit(&mut self, diag: &SessionHandle) {
        let _ = diag.send_recv(
            opcodes::DIAG_EXT_MSG_CONFIG_F,
            &messages::set_all_rt_masks_request(MSG_LVL_NONE),
            false,
        );
    }
}
