//! # modbusfs-fuse
//!
//! Mounts a [`ModbusFs`] through FUSE. [`start`] is the whole bootstrap:
//! connect the link, build the filesystem, apply preloaded exports, mount
//! and serve until unmounted.

pub mod cli;
pub mod inode;
pub mod mount;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use modbusfs_kernel::{Config, FsError, ModbusFs, ProtocolBridge, TransportConfig};

pub use mount::{ModbusFuse, MountConfig};

/// errno reported to the kernel for a filesystem error.
pub fn errno(err: &FsError) -> i32 {
    match err {
        FsError::NotFound(_) => libc::ENOENT,
        FsError::PermissionDenied(_) => libc::EACCES,
        FsError::AlreadyExists(_) => libc::EEXIST,
        FsError::InvalidArgument(_) => libc::EINVAL,
        FsError::IsADirectory(_) => libc::EISDIR,
        FsError::ShortBuffer(_) | FsError::Transport(_) => libc::EIO,
        FsError::OutOfMemory => libc::ENOMEM,
    }
}

/// Connect, preload and serve at `mountpoint` until unmounted.
///
/// Must be called from within a multi-threaded tokio runtime; the FUSE
/// session loop runs on a blocking thread and spawns device I/O back onto it.
pub async fn start(
    transport: &TransportConfig,
    config: &Config,
    mountpoint: &Path,
    mount: MountConfig,
) -> Result<()> {
    let link = modbusfs_kernel::connect(transport, config.response_timeout())
        .await
        .with_context(|| format!("connect {transport}"))?;

    let fs = Arc::new(ModbusFs::new(ProtocolBridge::new(link)));
    fs.preload(&config.slaves).context("preload exports")?;

    let runtime = tokio::runtime::Handle::current();
    let mountpoint = mountpoint.to_path_buf();
    tokio::task::spawn_blocking(move || mount::mount(fs, runtime, &mountpoint, &mount))
        .await
        .context("mount thread panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use modbusfs_kernel::TransportError;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(errno(&FsError::not_found("/17")), libc::ENOENT);
        assert_eq!(errno(&FsError::permission_denied("/exports")), libc::EACCES);
        assert_eq!(errno(&FsError::already_exists("slave 17")), libc::EEXIST);
        assert_eq!(errno(&FsError::invalid_argument("1ffff")), libc::EINVAL);
        assert_eq!(errno(&FsError::is_a_directory("/")), libc::EISDIR);
        assert_eq!(errno(&FsError::ShortBuffer(2)), libc::EIO);
        assert_eq!(errno(&FsError::OutOfMemory), libc::ENOMEM);

        let timeout = TransportError::Timeout(std::time::Duration::from_millis(500));
        assert_eq!(errno(&FsError::Transport(timeout)), libc::EIO);
    }
}
