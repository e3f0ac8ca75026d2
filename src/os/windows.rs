use std::ffi::c_void;
use std::fs::File;
use std::os::windows::io::{AsRawHandle, FromRawHandle};
use std::path::Path;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_NOT_LOCKED, ERROR_NOT_SUPPORTED, ERROR_SHARING_VIOLATION, HANDLE,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAG_WRITE_THROUGH, FILE_SHARE_MODE, OPEN_EXISTING,
};
use windows::Win32::System::IO::DeviceIoControl;

use super::{unavailable, DeviceLock};
use crate::error::MkfatError;

// IOCTL control codes
const FSCTL_LOCK_VOLUME: u32 = 0x00090018;
const FSCTL_UNLOCK_VOLUME: u32 = 0x0009001C;
const FSCTL_DISMOUNT_VOLUME: u32 = 0x00090020;
const IOCTL_DISK_GET_LENGTH_INFO: u32 = 0x0007405C;
const IOCTL_DISK_GET_DRIVE_GEOMETRY_EX: u32 = 0x000700A0;

// Generic access rights
const GENERIC_READ_ACCESS: u32 = 0x80000000;
const GENERIC_WRITE_ACCESS: u32 = 0x40000000;

/// Convert a string to null-terminated UTF-16.
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn raw(file: &File) -> HANDLE {
    HANDLE(file.as_raw_handle() as *mut c_void)
}

/// Issue a control code that takes no buffers.
fn control(handle: HANDLE, code: u32) -> windows::core::Result<()> {
    let mut returned = 0u32;
    unsafe { DeviceIoControl(handle, code, None, 0, None, 0, Some(&mut returned), None) }
}

/// Drive letter of a `\\.\X:` volume path.
fn volume_letter(path: &str) -> Option<char> {
    let rest = path.strip_prefix(r"\\.\")?;
    let mut chars = rest.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    (letter.is_ascii_alphabetic() && chars.as_str() == ":").then_some(letter)
}

/// Open with read/write access, no sharing, and write-through.
fn open_exclusive(path: &Path) -> Result<File, MkfatError> {
    let wide = to_wide(&path.to_string_lossy());
    let handle = unsafe {
        CreateFileW(
            PCWSTR(wide.as_ptr()),
            GENERIC_READ_ACCESS | GENERIC_WRITE_ACCESS,
            FILE_SHARE_MODE(0),
            None,
            OPEN_EXISTING,
            FILE_FLAG_WRITE_THROUGH,
            None,
        )
    }
    .map_err(|e| {
        let hint = if e.code() == ERROR_ACCESS_DENIED.to_hresult() {
            "run as administrator"
        } else if e.code() == ERROR_SHARING_VIOLATION.to_hresult() {
            "close all programs that have the drive open"
        } else {
            "check the device path"
        };
        unavailable(path, e, hint)
    })?;

    // File takes ownership of the handle.
    Ok(unsafe { File::from_raw_handle(handle.0 as *mut c_void) })
}

/// Open a device for raw writing.
///
/// `\\.\PhysicalDriveN` is opened exclusively. A `\\.\X:` volume is also
/// locked and dismounted through the same handle; the lock is held on a
/// duplicate of it and dropped with FSCTL_UNLOCK_VOLUME on release.
pub fn open_device(path: &Path) -> Result<(File, DeviceLock), MkfatError> {
    let file = open_exclusive(path)?;
    if volume_letter(&path.to_string_lossy()).is_none() {
        return Ok((file, DeviceLock::none(path)));
    }

    match control(raw(&file), FSCTL_LOCK_VOLUME) {
        Ok(()) => {}
        Err(e) if e.code() == ERROR_NOT_SUPPORTED.to_hresult() => {
            log::warn!("{} does not support locking; continuing unlocked", path.display());
            return Ok((file, DeviceLock::none(path)));
        }
        Err(e) => {
            return Err(unavailable(
                path,
                format!("cannot lock volume: {e}"),
                "the volume may be in use; close all programs accessing it",
            ))
        }
    }

    if let Err(e) = control(raw(&file), FSCTL_DISMOUNT_VOLUME) {
        let _ = control(raw(&file), FSCTL_UNLOCK_VOLUME);
        if e.code() == ERROR_NOT_SUPPORTED.to_hresult() || e.code() == ERROR_NOT_LOCKED.to_hresult()
        {
            log::warn!("Cannot dismount {}: {e}; continuing", path.display());
            return Ok((file, DeviceLock::none(path)));
        }
        return Err(unavailable(
            path,
            format!("cannot dismount volume: {e}"),
            "close all programs accessing the volume",
        ));
    }
    log::info!("Locked and dismounted {}", path.display());

    let holder = file.try_clone().map_err(|e| {
        let _ = control(raw(&file), FSCTL_UNLOCK_VOLUME);
        unavailable(path, e, "try again")
    })?;
    let lock = DeviceLock::new(path, move || {
        if let Err(e) = control(raw(&holder), FSCTL_UNLOCK_VOLUME) {
            log::warn!("Unlocking volume failed: {e}");
        }
        drop(holder);
    });
    Ok((file, lock))
}

/// Device capacity via IOCTL_DISK_GET_LENGTH_INFO, falling back to the
/// drive geometry for physical drives.
pub fn disk_size(file: &File) -> Option<u64> {
    let handle = raw(file);
    let mut length = 0i64;
    let mut returned = 0u32;
    let ok = unsafe {
        DeviceIoControl(
            handle,
            IOCTL_DISK_GET_LENGTH_INFO,
            None,
            0,
            Some(&mut length as *mut i64 as *mut c_void),
            std::mem::size_of::<i64>() as u32,
            Some(&mut returned),
            None,
        )
    };
    if ok.is_ok() && length > 0 {
        return Some(length as u64);
    }

    let mut buf = [0u8; 256];
    let result = unsafe {
        DeviceIoControl(
            handle,
            IOCTL_DISK_GET_DRIVE_GEOMETRY_EX,
            None,
            0,
            Some(buf.as_mut_ptr() as *mut c_void),
            buf.len() as u32,
            Some(&mut returned),
            None,
        )
    };
    if result.is_err() || returned < 32 {
        return None;
    }
    // DiskSize follows the 24-byte DISK_GEOMETRY
    let disk_size = i64::from_ne_bytes(buf[24..32].try_into().ok()?);
    Some(disk_size as u64).filter(|s| *s > 0)
}
