use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::Command;

use super::{open_error, unavailable, DeviceLock};
use crate::error::MkfatError;

/// `_IOR(0x12, 114, size_t)`
const BLKGETSIZE64: u64 = 0x8008_1272;

/// Unmount every mounted volume on the device, then open it with `O_EXCL`.
/// The kernel refuses `O_EXCL` on a block device that is still mounted or
/// held open exclusively by someone else, which makes the open itself the
/// lock.
pub fn open_device(path: &Path) -> Result<(File, DeviceLock), MkfatError> {
    let device = path.to_string_lossy().to_string();
    match fs::read_to_string("/proc/self/mounts") {
        Ok(mounts) => {
            for source in mounted_volumes(&mounts, &device) {
                let status = Command::new("umount").arg(&source).output();
                match status {
                    Ok(out) if out.status.success() => log::info!("Unmounted {source}"),
                    Ok(out) => {
                        return Err(unavailable(
                            path,
                            format!(
                                "cannot unmount {source}: {}",
                                String::from_utf8_lossy(&out.stderr).trim()
                            ),
                            "close all programs using the volume and try again",
                        ))
                    }
                    Err(e) => {
                        return Err(unavailable(
                            path,
                            format!("cannot run umount for {source}: {e}"),
                            "unmount the volume manually",
                        ))
                    }
                }
            }
        }
        Err(e) => log::warn!("Cannot read mount table, skipping unmount: {e}"),
    }

    if !nix::unistd::geteuid().is_root() {
        log::debug!("not running as root; opening {} may fail", path.display());
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_EXCL)
        .open(path)
        .map_err(|e| open_error(path, e))?;

    let shown = path.display().to_string();
    let lock = DeviceLock::new(path, move || {
        log::debug!("exclusive open on {shown} ends with its handle");
    });
    Ok((file, lock))
}

/// Sources in a `/proc/self/mounts` listing that live on `device`.
fn mounted_volumes(mounts: &str, device: &str) -> Vec<String> {
    let name = device.trim_start_matches("/dev/");
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|source| {
            source
                .strip_prefix("/dev/")
                .is_some_and(|s| s == name || parent_device_name(s) == name)
        })
        .map(str::to_string)
        .collect()
}

/// Whole-disk name for a partition name.
///
/// - `sda1` -> `sda`
/// - `nvme0n1p1` -> `nvme0n1`
/// - `mmcblk0p1` -> `mmcblk0`
pub fn parent_device_name(partition_name: &str) -> String {
    // nvme and mmcblk separate the partition number with a 'p'.
    if partition_name.starts_with("nvme") || partition_name.starts_with("mmcblk") {
        if let Some(p_pos) = partition_name.rfind('p') {
            let suffix = &partition_name[p_pos + 1..];
            let has_namespace = !partition_name.starts_with("nvme")
                || partition_name[..p_pos].contains('n');
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) && has_namespace {
                return partition_name[..p_pos].to_string();
            }
        }
        return partition_name.to_string();
    }

    if ["sd", "vd", "hd", "xvd"]
        .iter()
        .any(|p| partition_name.starts_with(p))
    {
        return partition_name
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .to_string();
    }

    partition_name.to_string()
}

/// Block device capacity via `BLKGETSIZE64`.
pub fn block_device_size(file: &File) -> Option<u64> {
    let mut size: u64 = 0;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64 as _, &mut size as *mut u64) };
    if rc == 0 && size > 0 {
        Some(size)
    } else {
        None
    }
}
