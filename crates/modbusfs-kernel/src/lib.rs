//! # modbusfs-kernel
//!
//! Modbus slave devices exposed as a tree of files:
//!
//! ```text
//! /exports              write "<address> <mode>" to declare a slave
//! /<address>/           one directory per declared slave
//! /<address>/exports    write "<index> <mode>" to declare a register
//! /<address>/<index>    read or write the register as hex text
//! ```
//!
//! Key components:
//!
//! - [`Node`] - Path classification
//! - [`Registry`] - Append-only set of declared slaves and registers
//! - [`ProtocolBridge`] - Serializes transactions over one [`RegisterTransport`]
//! - [`ModbusFs`] - Path-based operations (readdir, getattr, open, read, ...)
//!
//! Nothing here knows about FUSE or inodes; the mount adapter lives in
//! `modbusfs-fuse`.

pub mod bridge;
pub mod config;
mod error;
pub mod exports;
mod fs;
pub mod path;
pub mod registry;
pub mod transport;
mod types;

pub use bridge::{ProtocolBridge, RegisterTransport};
pub use config::{Config, ConfigError, TransportConfig};
pub use error::{FsError, FsResult, TransportError};
pub use fs::{ModbusFs, OpenFile, Target, EXPORTS_MODE, REGISTER_FILE_SIZE, ROOT_MODE};
pub use path::Node;
pub use registry::{Register, Registry, Slave};
pub use transport::{connect, ModbusTransport};
pub use types::{DirEntry, FileAttr, FileType, OpenMode};
