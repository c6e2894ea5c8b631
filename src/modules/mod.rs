//! Ready-made modules covering the common capture jobs.

pub mod device_info;
pub mod memory_dump;
pub mod message_printer;
pub mod raw_log_dump;

pub use device_info::DeviceInfo;
pub use memory_dump::MemoryDumper;
pub use message_printer::MessagePrinter;
pub use raw_log_dump::RawLogDump;
