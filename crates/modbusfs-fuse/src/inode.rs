//! Inode numbering.
//!
//! Inodes are computed from the classified node rather than allocated, so no
//! table is kept and a node has the same inode for the life of the mount.
//!
//! ```text
//! 1                               /
//! 2                               /exports
//! (address + 1) << 20             /<address>
//! (address + 1) << 20 | 1         /<address>/exports
//! (address + 1) << 20 | 1 << 16 | index
//!                                 /<address>/<index>
//! ```

use modbusfs_kernel::Node;

pub const ROOT_INO: u64 = fuser::FUSE_ROOT_ID;
pub const GLOBAL_EXPORTS_INO: u64 = 2;

const SLAVE_SHIFT: u32 = 20;
const SLAVE_EXPORTS_BIT: u64 = 1;
const REGISTER_BIT: u64 = 1 << 16;
const LOW_MASK: u64 = (1 << SLAVE_SHIFT) - 1;

fn slave_base(address: u8) -> u64 {
    (u64::from(address) + 1) << SLAVE_SHIFT
}

/// Inode of a node; `NoMatch` has none.
pub fn to_ino(node: Node) -> Option<u64> {
    match node {
        Node::Root => Some(ROOT_INO),
        Node::GlobalExports => Some(GLOBAL_EXPORTS_INO),
        Node::SlaveDir(address) => Some(slave_base(address)),
        Node::SlaveExports(address) => Some(slave_base(address) | SLAVE_EXPORTS_BIT),
        Node::Register(address, index) => {
            Some(slave_base(address) | REGISTER_BIT | u64::from(index))
        }
        Node::NoMatch => None,
    }
}

/// Node named by an inode, or `None` for numbers never handed out.
pub fn to_node(ino: u64) -> Option<Node> {
    match ino {
        ROOT_INO => return Some(Node::Root),
        GLOBAL_EXPORTS_INO => return Some(Node::GlobalExports),
        _ => {}
    }
    let address = u8::try_from((ino >> SLAVE_SHIFT).checked_sub(1)?).ok()?;
    let low = ino & LOW_MASK;
    match low {
        0 => Some(Node::SlaveDir(address)),
        SLAVE_EXPORTS_BIT => Some(Node::SlaveExports(address)),
        _ if low & REGISTER_BIT != 0 && low < REGISTER_BIT << 1 => {
            Some(Node::Register(address, (low & 0xffff) as u16))
        }
        _ => None,
    }
}
