//! Device safety layer: exclusive raw-device access, size probing and
//! scoped lock release.

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "windows")]
mod windows;

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::MkfatError;
use crate::write::{FileTarget, WriteTarget};

/// True for raw device paths (`/dev/...` or `\\.\...`).
pub fn is_device_path(path: &Path) -> bool {
    let s = path.to_string_lossy();
    s.starts_with("/dev/") || s.starts_with(r"\\.\")
}

/// Scoped platform lock on a device. Released exactly once, explicitly or
/// on drop.
pub struct DeviceLock {
    path: PathBuf,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceLock {
    pub fn new(path: &Path, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            path: path.to_path_buf(),
            release: Some(Box::new(release)),
        }
    }

    /// A lock that holds nothing, for targets the platform cannot lock.
    pub fn none(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            release: None,
        }
    }

    pub fn is_held(&self) -> bool {
        self.release.is_some()
    }

    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            log::debug!("released lock on {}", self.path.display());
        }
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// An opened device (or pre-existing file standing in for one).
///
/// Field order matters: the handle closes before the lock is released.
pub struct DeviceTarget {
    inner: FileTarget,
    size: Option<u64>,
    path: PathBuf,
    _lock: DeviceLock,
}

impl DeviceTarget {
    pub fn new(file: File, path: &Path, lock: DeviceLock) -> Self {
        let mut file = file;
        let size = probe_size(&mut file);
        Self {
            inner: FileTarget::new(file),
            size,
            path: path.to_path_buf(),
            _lock: lock,
        }
    }

    /// Capacity in bytes, if the platform could tell.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WriteTarget for DeviceTarget {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.inner.write_at(offset, buf)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_at(offset, buf)
    }

    fn flush_to_media(&mut self) -> io::Result<()> {
        self.inner.flush_to_media()
    }
}

pub(crate) fn unavailable(path: &Path, reason: impl ToString, hint: &str) -> MkfatError {
    MkfatError::DeviceUnavailable {
        path: path.display().to_string(),
        reason: reason.to_string(),
        hint: hint.to_string(),
    }
}

/// Map an open failure to a remediation hint.
pub(crate) fn open_error(path: &Path, e: io::Error) -> MkfatError {
    let hint = match e.kind() {
        io::ErrorKind::PermissionDenied => elevation_hint(),
        io::ErrorKind::NotFound => "check the device path",
        _ if is_busy(&e) => "close all programs using the device and unmount its volumes",
        _ => "check that the device is connected and not write-protected",
    };
    unavailable(path, e, hint)
}

fn is_busy(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(e.raw_os_error(), Some(libc::EBUSY) | Some(libc::EWOULDBLOCK))
    }
    #[cfg(windows)]
    {
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        matches!(e.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = e;
        false
    }
}

fn elevation_hint() -> &'static str {
    #[cfg(windows)]
    {
        "run as administrator"
    }
    #[cfg(not(windows))]
    {
        "run as root (e.g. with sudo)"
    }
}

/// Open a raw device for exclusive writing: unmount or dismount its
/// volumes, take the platform lock, and probe its size.
pub fn open_device(path: &Path) -> Result<DeviceTarget, MkfatError> {
    #[cfg(target_os = "linux")]
    let (file, lock) = linux::open_device(path)?;
    #[cfg(target_os = "macos")]
    let (file, lock) = macos::open_device(path)?;
    #[cfg(target_os = "windows")]
    let (file, lock) = windows::open_device(path)?;
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    let (file, lock) = {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| open_error(path, e))?;
        (file, DeviceLock::none(path))
    };

    let target = DeviceTarget::new(file, path, lock);
    match target.size() {
        Some(size) => log::info!("Opened {} ({} bytes)", path.display(), size),
        None => log::info!("Opened {} (size unknown)", path.display()),
    }
    Ok(target)
}

/// Open a copy destination: a device through [`open_device`], anything else
/// as a regular file that is created if missing but never truncated.
pub fn open_target(path: &Path) -> Result<DeviceTarget, MkfatError> {
    if is_device_path(path) {
        return open_device(path);
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| open_error(path, e))?;
    Ok(DeviceTarget::new(file, path, DeviceLock::none(path)))
}

/// Open a copy source for reading.
pub fn open_source(path: &Path) -> Result<File, MkfatError> {
    File::open(path).map_err(|e| open_error(path, e))
}

/// Size of a file or block device in bytes. Seeking to the end works for
/// files and most Linux devices; otherwise the platform ioctl is asked.
pub fn probe_size(file: &mut File) -> Option<u64> {
    if let Ok(end) = file.seek(SeekFrom::End(0)) {
        let _ = file.seek(SeekFrom::Start(0));
        if end > 0 {
            return Some(end);
        }
    }
    #[cfg(target_os = "linux")]
    {
        linux::block_device_size(file)
    }
    #[cfg(target_os = "macos")]
    {
        macos::block_device_size(file)
    }
    #[cfg(target_os = "windows")]
    {
        windows::disk_size(file)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Compare device capacity with what the volume needs. Too small is fatal;
/// larger or unknown only warn.
pub fn check_capacity(available: Option<u64>, needed: u64) -> Result<Option<String>, MkfatError> {
    match available {
        Some(available) if available < needed => {
            Err(MkfatError::DeviceTooSmall { needed, available })
        }
        Some(available) if available > needed => Ok(Some(format!(
            "device is larger than the filesystem ({} > {} bytes); the remainder is left untouched",
            available, needed
        ))),
        Some(_) => Ok(None),
        None => Ok(Some(
            "could not determine device size; proceeding without a capacity check".to_string(),
        )),
    }
}
