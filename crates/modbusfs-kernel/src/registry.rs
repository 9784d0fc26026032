//! Declared slaves and registers.
//!
//! The registry is append-only: entries are declared once through the
//! exports control files and never modified or removed afterwards. Listing
//! order is declaration order.

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{FsError, FsResult};

/// Permission bits a slave directory may carry (rwx for owner, group, other).
pub const SLAVE_MODE_MASK: u32 = 0o777;

/// Permission bits a register file may carry (rw for owner, group, other).
pub const REGISTER_MODE_MASK: u32 = 0o666;

/// Owner read bit.
pub const OWNER_READ: u32 = 0o400;

/// Owner write bit.
pub const OWNER_WRITE: u32 = 0o200;

/// A declared slave device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slave {
    pub address: u8,
    pub mode: u32,
}

/// A declared register.
///
/// `slave` is the owning slave's address, not a reference into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub slave: u8,
    pub index: u16,
    pub mode: u32,
}

impl Register {
    pub fn readable(&self) -> bool {
        self.mode & OWNER_READ != 0
    }

    pub fn writable(&self) -> bool {
        self.mode & OWNER_WRITE != 0
    }
}

#[derive(Debug)]
struct SlaveEntry {
    slave: Slave,
    registers: IndexMap<u16, Register>,
}

/// Process-wide set of declared slaves.
///
/// Thread-safe via an internal `RwLock`: lookups and listings share the
/// lock, declarations take it exclusively so check-and-insert is atomic.
#[derive(Debug, Default)]
pub struct Registry {
    slaves: RwLock<IndexMap<u8, SlaveEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new slave with no registers.
    pub fn register_slave(&self, address: u8, mode: u32) -> FsResult<Slave> {
        let mut slaves = self.slaves.write();
        if slaves.contains_key(&address) {
            return Err(FsError::already_exists(format!("slave {address}")));
        }
        slaves.try_reserve(1)?;

        let slave = Slave { address, mode };
        slaves.insert(
            address,
            SlaveEntry {
                slave,
                registers: IndexMap::new(),
            },
        );
        Ok(slave)
    }

    pub fn find_slave(&self, address: u8) -> FsResult<Slave> {
        self.slaves
            .read()
            .get(&address)
            .map(|entry| entry.slave)
            .ok_or_else(|| FsError::not_found(format!("/{address}")))
    }

    /// Declare a new register under an existing slave.
    pub fn register_register(&self, slave: u8, index: u16, mode: u32) -> FsResult<Register> {
        let mut slaves = self.slaves.write();
        let entry = slaves
            .get_mut(&slave)
            .ok_or_else(|| FsError::not_found(format!("/{slave}")))?;
        if entry.registers.contains_key(&index) {
            return Err(FsError::already_exists(format!("register {index} of slave {slave}")));
        }
        entry.registers.try_reserve(1)?;

        let register = Register { slave, index, mode };
        entry.registers.insert(index, register);
        Ok(register)
    }

    pub fn find_register(&self, slave: u8, index: u16) -> FsResult<Register> {
        let slaves = self.slaves.read();
        let entry = slaves
            .get(&slave)
            .ok_or_else(|| FsError::not_found(format!("/{slave}")))?;
        entry
            .registers
            .get(&index)
            .copied()
            .ok_or_else(|| FsError::not_found(format!("/{slave}/{index}")))
    }

    /// All slaves in declaration order.
    pub fn slaves(&self) -> Vec<Slave> {
        self.slaves.read().values().map(|entry| entry.slave).collect()
    }

    /// Registers of one slave in declaration order.
    pub fn registers(&self, slave: u8) -> FsResult<Vec<Register>> {
        self.slaves
            .read()
            .get(&slave)
            .map(|entry| entry.registers.values().copied().collect())
            .ok_or_else(|| FsError::not_found(format!("/{slave}")))
    }
}
