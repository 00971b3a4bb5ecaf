//! Concrete log providers for taillog.
//!
//! | name      | provider              | options                                      |
//! |-----------|-----------------------|----------------------------------------------|
//! | `file`    | [`FileProvider`]      | `file_name` (`.gz` is decompressed)          |
//! | `process` | [`ProcessProvider`]   | `command`, `arguments`, `working_directory`  |
//! | `tcp`     | [`TcpServerProvider`] | `address`                                    |
//! | `udp`     | [`UdpServerProvider`] | `address`                                    |
//! | `memory`  | [`MemoryProvider`]    | `lines`                                      |

mod channel;
mod file;
mod memory;
mod process;
mod tcp;
mod udp;

#[cfg(test)]
mod test_util;

pub use channel::ChannelLineReader;
pub use file::FileProvider;
pub use memory::MemoryProvider;
pub use process::ProcessProvider;
pub use tcp::TcpServerProvider;
pub use udp::UdpServerProvider;

use taillog_framework::{LogProvider, SourceRegistry};

pub const FILE_SOURCE: &str = "file";
pub const PROCESS_SOURCE: &str = "process";
pub const TCP_SOURCE: &str = "tcp";
pub const UDP_SOURCE: &str = "udp";
pub const MEMORY_SOURCE: &str = "memory";

/// registry holding every provider of this crate
pub fn default_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register(FILE_SOURCE, |options| {
        Ok(Box::new(FileProvider::from_options(options)?) as Box<dyn LogProvider>)
    });
    registry.register(PROCESS_SOURCE, |options| {
        Ok(Box::new(ProcessProvider::from_options(options)?) as Box<dyn LogProvider>)
    });
    registry.register(TCP_SOURCE, |options| {
        Ok(Box::new(TcpServerProvider::from_options(options)?) as Box<dyn LogProvider>)
    });
    registry.register(UDP_SOURCE, |options| {
        Ok(Box::new(UdpServerProvider::from_options(options)?) as Box<dyn LogProvider>)
    });
    registry.register(MEMORY_SOURCE, |options| {
        Ok(Box::new(MemoryProvider::from_options(options)?) as Box<dyn LogProvider>)
    });
    registry
}
