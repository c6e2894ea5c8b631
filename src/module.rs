//! The module interface: consumers of a Diag session register modules that
//! receive dispatched log records and debug messages.

use crate::diag::{LogRecord, MessageRecord};
use crate::session::{SessionError, SessionHandle};

/// A participant in a Diag session.
///
/// Capabilities are declared through `wants_logs`/`wants_messages` rather
/// than probed: the dispatcher only routes what a module asked for, and a
/// module declaring neither is treated as a one-shot job and deregistered
/// once `on_init` returns.
///
/// Threading contract: `on_init` and `on_deinit` run off the dispatch
/// thread and may call [`SessionHandle::send_recv`]. `on_log` and
/// `on_message` run on the dispatch thread and must not block — in
/// particular they must never issue requests.
pub trait Module: Send {
    /// Short name used in lifecycle logging.
    fn name(&self) -> &str;

    fn wants_logs(&self) -> bool {
        false
    }

    fn wants_messages(&self) -> bool {
        false
    }

    /// Runs once on the init thread, before dispatch reaches this module.
    /// Errors deregister the module but leave the session running.
    fn on_init(&mut self, _diag: &SessionHandle) -> Result<(), SessionError> {
        Ok(())
    }

    /// Called for every received log record this module subscribed to.
    fn on_log(&mut self, _record: &LogRecord) {}

    /// Called for every received debug message.
    fn on_message(&mut self, _message: &MessageRecord) {}

    /// Runs when the module is removed, on sessions that can send; cleanup
    /// requests (zeroing log masks and the like) go here.
    fn on_deinit(&mut self, _diag: &SessionHandle) {}
}
