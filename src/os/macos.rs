use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::Command;

use super::{open_error, unavailable, DeviceLock};
use crate::error::MkfatError;

/// `_IOR('d', 24, uint32_t)`
const DKIOCGETBLOCKSIZE: libc::c_ulong = 0x4004_6418;
/// `_IOR('d', 25, uint64_t)`
const DKIOCGETBLOCKCOUNT: libc::c_ulong = 0x4008_6419;

/// Whole-disk node for `/dev/diskNsM` or `/dev/rdiskNsM`.
fn whole_disk(path: &Path) -> String {
    let s = path.to_string_lossy();
    let name = s
        .strip_prefix("/dev/r")
        .or_else(|| s.strip_prefix("/dev/"))
        .unwrap_or(&s);
    let base = match name.strip_prefix("disk").and_then(|rest| rest.find('s')) {
        Some(pos) => &name[..4 + pos],
        None => name,
    };
    format!("/dev/{base}")
}

/// Unmount the whole disk through `diskutil`, open the node and take an
/// exclusive `flock` on it. Writes bypass the unified buffer cache.
pub fn open_device(path: &Path) -> Result<(File, DeviceLock), MkfatError> {
    let disk = whole_disk(path);
    match Command::new("diskutil").args(["unmountDisk", &disk]).output() {
        Ok(out) if out.status.success() => log::info!("Unmounted volumes on {disk}"),
        Ok(out) => log::warn!(
            "diskutil unmountDisk {disk} failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        ),
        Err(e) => log::warn!("Cannot run diskutil: {e}"),
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| open_error(path, e))?;
    let fd = file.as_raw_fd();

    if unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } != 0 {
        let e = io::Error::last_os_error();
        return Err(unavailable(
            path,
            format!("cannot lock device: {e}"),
            "close all programs using the disk",
        ));
    }

    if unsafe { libc::fcntl(fd, libc::F_NOCACHE, 1) } != 0 {
        log::debug!(
            "F_NOCACHE not applied to {}: {}",
            path.display(),
            io::Error::last_os_error()
        );
    }

    let shown = path.display().to_string();
    let lock = DeviceLock::new(path, move || {
        log::debug!("flock on {shown} ends with its handle");
    });
    Ok((file, lock))
}

/// Capacity from `DKIOCGETBLOCKSIZE` x `DKIOCGETBLOCKCOUNT`.
pub fn block_device_size(file: &File) -> Option<u64> {
    let fd = file.as_raw_fd();
    let mut block_size: u32 = 0;
    let mut block_count: u64 = 0;
    unsafe {
        if libc::ioctl(fd, DKIOCGETBLOCKSIZE, &mut block_size as *mut u32) != 0 {
            return None;
        }
        if libc::ioctl(fd, DKIOCGETBLOCKCOUNT, &mut block_count as *mut u64) != 0 {
            return None;
        }
    }
    Some(block_size as u64 * block_count).filter(|s| *s > 0)
}
