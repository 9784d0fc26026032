//! The path-based filesystem served over the registry and the bridge.
//!
//! Every operation classifies its path once into a [`Node`] and then
//! dispatches on that. Register content is fetched fresh from the device on
//! every read cycle: nothing is cached between opens.

use crate::bridge::ProtocolBridge;
use crate::config::SlaveExport;
use crate::error::{FsError, FsResult};
use crate::exports::{self, RegisterDecl, SlaveDecl};
use crate::path::{Node, EXPORTS};
use crate::registry::{Register, Registry};
use crate::types::{DirEntry, FileAttr, OpenMode};

/// Permissions of the root directory.
pub const ROOT_MODE: u32 = 0o755;

/// Permissions of both exports control files (owner write only).
pub const EXPORTS_MODE: u32 = 0o200;

/// Reported size of a register file: four hex digits.
pub const REGISTER_FILE_SIZE: u64 = 4;

/// What an open file refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Register(Register),
    SlaveExports(u8),
    GlobalExports,
}

/// Per-open state, created by [`ModbusFs::open`] and handed back to
/// [`ModbusFs::release`]. Its target and mode never change, so in-flight
/// operations may work on their own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    target: Target,
    mode: OpenMode,
}

impl OpenFile {
    pub fn target(&self) -> Target {
        self.target
    }

    /// Open files bypass page caching and reject seeks; every open must
    /// reach the device.
    pub fn direct_io(&self) -> bool {
        true
    }

    pub fn nonseekable(&self) -> bool {
        true
    }
}

/// The filesystem service: owns the registry and the protocol bridge.
#[derive(Debug)]
pub struct ModbusFs {
    registry: Registry,
    bridge: ProtocolBridge,
}

impl ModbusFs {
    pub fn new(bridge: ProtocolBridge) -> Self {
        Self {
            registry: Registry::new(),
            bridge,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Declare a slave after validation.
    pub fn export_slave(&self, decl: SlaveDecl) -> FsResult<()> {
        self.registry.register_slave(decl.address, decl.mode)?;
        tracing::info!(
            address = decl.address,
            mode = %format!("{:o}", decl.mode),
            "slave exported"
        );
        Ok(())
    }

    /// Declare a register under an already declared slave.
    pub fn export_register(&self, slave: u8, decl: RegisterDecl) -> FsResult<()> {
        self.registry.register_register(slave, decl.index, decl.mode)?;
        tracing::info!(
            address = slave,
            index = decl.index,
            mode = %format!("{:o}", decl.mode),
            "register exported"
        );
        Ok(())
    }

    /// Apply startup exports from the config file, with the same checks a
    /// control-file write gets.
    pub fn preload(&self, slaves: &[SlaveExport]) -> FsResult<()> {
        for slave in slaves {
            let decl = exports::validate_slave(slave.address, exports::parse_mode(&slave.mode)?)?;
            self.export_slave(decl)?;
            for register in &slave.registers {
                let reg = exports::validate_register(
                    register.index,
                    exports::parse_mode(&register.mode)?,
                )?;
                self.export_register(decl.address, reg)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        tracing::debug!(path, "readdir");
        let mut entries = vec![DirEntry::file(EXPORTS)];
        match Node::classify(path) {
            Node::Root => {
                entries.extend(
                    self.registry
                        .slaves()
                        .iter()
                        .map(|s| DirEntry::directory(s.address.to_string())),
                );
            }
            Node::SlaveDir(address) => {
                entries.extend(
                    self.registry
                        .registers(address)?
                        .iter()
                        .map(|r| DirEntry::file(r.index.to_string())),
                );
            }
            _ => return Err(FsError::not_found(path)),
        }
        Ok(entries)
    }

    pub fn getattr(&self, path: &str) -> FsResult<FileAttr> {
        tracing::debug!(path, "getattr");
        self.getattr_node(Node::classify(path))
    }

    /// Attributes of an already classified node.
    pub fn getattr_node(&self, node: Node) -> FsResult<FileAttr> {
        match node {
            Node::Root => Ok(FileAttr::directory(ROOT_MODE)),
            Node::SlaveDir(address) => {
                let slave = self.registry.find_slave(address)?;
                Ok(FileAttr::directory(slave.mode))
            }
            Node::GlobalExports | Node::SlaveExports(_) => Ok(FileAttr::file(0, EXPORTS_MODE)),
            Node::Register(address, index) => {
                let register = self.registry.find_register(address, index)?;
                Ok(FileAttr::file(REGISTER_FILE_SIZE, register.mode))
            }
            Node::NoMatch => Err(FsError::not_found("unrecognized path")),
        }
    }

    /// Content is synthetic; truncation is accepted and ignored.
    pub fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        tracing::debug!(path, size, "truncate");
        Ok(())
    }

    // ========================================================================
    // Open files
    // ========================================================================

    pub fn open(&self, path: &str, mode: OpenMode) -> FsResult<OpenFile> {
        tracing::debug!(path, ?mode, "open");
        let target = match Node::classify(path) {
            Node::Register(address, index) => {
                let register = self.registry.find_register(address, index)?;
                if (mode.reads() && !register.readable()) || (mode.writes() && !register.writable())
                {
                    return Err(FsError::permission_denied(path));
                }
                Target::Register(register)
            }
            Node::SlaveExports(address) => {
                self.registry.find_slave(address)?;
                if mode != OpenMode::WriteOnly {
                    return Err(FsError::permission_denied(path));
                }
                Target::SlaveExports(address)
            }
            Node::GlobalExports => {
                if mode != OpenMode::WriteOnly {
                    return Err(FsError::permission_denied(path));
                }
                Target::GlobalExports
            }
            Node::Root => return Err(FsError::is_a_directory(path)),
            Node::SlaveDir(address) => {
                self.registry.find_slave(address)?;
                return Err(FsError::is_a_directory(path));
            }
            Node::NoMatch => return Err(FsError::not_found(path)),
        };
        Ok(OpenFile { target, mode })
    }

    /// Read from an open register.
    ///
    /// Offset 0 performs one device read and returns the value as lowercase
    /// hex; any other offset is end of file. A sequential reader therefore
    /// sees the value exactly once per read cycle.
    pub async fn read(&self, file: &OpenFile, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        if u64::from(size) < REGISTER_FILE_SIZE {
            return Err(FsError::ShortBuffer(size));
        }
        let register = match file.target {
            Target::Register(register) => register,
            Target::SlaveExports(address) => {
                return Err(FsError::permission_denied(format!("/{address}/{EXPORTS}")));
            }
            Target::GlobalExports => {
                return Err(FsError::permission_denied(format!("/{EXPORTS}")));
            }
        };
        tracing::debug!(address = register.slave, index = register.index, offset, "read");
        if offset != 0 {
            return Ok(Vec::new());
        }

        let value = self
            .bridge
            .read_register(register.slave, register.index)
            .await?;
        Ok(exports::render_register_value(value).into_bytes())
    }

    /// Write to an open file. Returns the number of bytes consumed, which is
    /// always the whole buffer on success.
    pub async fn write(&self, file: &OpenFile, data: &[u8]) -> FsResult<u32> {
        match file.target {
            Target::Register(register) => {
                let value = exports::parse_register_value(data)?;
                if !file.mode.writes() {
                    return Err(FsError::permission_denied(format!(
                        "/{}/{}",
                        register.slave, register.index
                    )));
                }
                tracing::debug!(
                    address = register.slave,
                    index = register.index,
                    value = %format!("{value:x}"),
                    "write"
                );
                self.bridge
                    .write_register(register.slave, register.index, value)
                    .await?;
            }
            Target::SlaveExports(address) => {
                let decl = exports::parse_register_decl(data)?;
                self.export_register(address, decl)?;
            }
            Target::GlobalExports => {
                let decl = exports::parse_slave_decl(data)?;
                self.export_slave(decl)?;
            }
        }
        Ok(data.len() as u32)
    }

    pub fn release(&self, file: OpenFile) {
        tracing::debug!(file = ?file.target, "release");
    }
}
