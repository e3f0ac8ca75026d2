//! Block copies between disk images and raw devices.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::cancel::CancelToken;
use crate::error::MkfatError;
use crate::os;
use crate::write::WriteTarget;

/// Default copy block: one sector.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

fn check_block_size(block_size: usize) -> Result<(), MkfatError> {
    if block_size == 0 {
        return Err(MkfatError::Config("block size must be positive".into()));
    }
    Ok(())
}

/// Copy a whole device (or any readable file) into an image file.
///
/// The image is created or truncated, along with missing parent directories.
/// `progress` receives bytes done and bytes total after every block.
pub fn copy_device_to_image(
    device: &Path,
    image: &Path,
    block_size: usize,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<u64> {
    check_block_size(block_size)?;
    let mut src = os::open_source(device)?;
    let total = match os::probe_size(&mut src) {
        Some(size) => size,
        None => bail!("cannot determine the size of {}", device.display()),
    };

    if let Some(dir) = image.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    let mut dst = File::create(image)
        .with_context(|| format!("failed to create image {}", image.display()))?;

    log::info!(
        "Copying {} ({} bytes) to {}",
        device.display(),
        total,
        image.display()
    );

    let mut buf = vec![0u8; block_size];
    let mut done = 0u64;
    while done < total {
        if cancel.is_cancelled() {
            return Err(MkfatError::Interrupted.into());
        }
        let len = (total - done).min(block_size as u64) as usize;
        src.read_exact(&mut buf[..len])
            .with_context(|| format!("read failed at byte {} of {}", done, device.display()))?;
        dst.write_all(&buf[..len])
            .with_context(|| format!("write failed at byte {} of {}", done, image.display()))?;
        done += len as u64;
        progress(done, total);
    }

    dst.sync_all()
        .with_context(|| format!("failed to sync {}", image.display()))?;
    log::info!("Copied {} bytes", done);
    Ok(done)
}

/// Write an image file onto a device through the device safety layer.
///
/// A device smaller than the image is refused; a larger one only warns. The
/// device is flushed once at the end.
pub fn copy_image_to_device(
    image: &Path,
    device: &Path,
    block_size: usize,
    cancel: &CancelToken,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<u64> {
    check_block_size(block_size)?;
    let mut src = os::open_source(image)?;
    let total = src
        .metadata()
        .with_context(|| format!("cannot stat {}", image.display()))?
        .len();

    let mut dst = os::open_target(device)?;
    if let Some(msg) = os::check_capacity(dst.size(), total)? {
        log::warn!("{msg}");
    }

    log::info!(
        "Writing {} ({} bytes) to {}",
        image.display(),
        total,
        device.display()
    );

    let mut buf = vec![0u8; block_size];
    let mut done = 0u64;
    while done < total {
        if cancel.is_cancelled() {
            return Err(MkfatError::Interrupted.into());
        }
        let len = (total - done).min(block_size as u64) as usize;
        src.read_exact(&mut buf[..len])
            .with_context(|| format!("read failed at byte {} of {}", done, image.display()))?;
        dst.write_at(done, &buf[..len])
            .with_context(|| format!("write failed at byte {} of {}", done, device.display()))?;
        done += len as u64;
        progress(done, total);
    }

    dst.flush_to_media()
        .with_context(|| format!("failed to sync {}", device.display()))?;
    log::info!("Wrote {} bytes", done);
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::exit_code_for;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    fn create_blank(path: &Path, len: u64) {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .unwrap();
        file.set_len(len).unwrap();
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_device_to_image_copies_everything() {
        let tmp = TempDir::new().unwrap();
        let dev = tmp.path().join("dev.bin");
        let img = tmp.path().join("out").join("copy.img");
        fs::write(&dev, pattern(5000)).unwrap();

        let mut calls = Vec::new();
        let n = copy_device_to_image(&dev, &img, 1024, &CancelToken::new(), &mut |d, t| {
            calls.push((d, t))
        })
        .unwrap();
        assert_eq!(n, 5000);
        assert_eq!(fs::read(&img).unwrap(), pattern(5000));
        assert_eq!(calls.len(), 5);
        assert_eq!(calls.last(), Some(&(5000, 5000)));
    }

    #[test]
    fn test_image_to_smaller_device_is_refused() {
        let tmp = TempDir::new().unwrap();
        let img = tmp.path().join("a.img");
        let dev = tmp.path().join("dev.bin");
        fs::write(&img, pattern(4096)).unwrap();
        create_blank(&dev, 2048);

        let err = copy_image_to_device(&img, &dev, 512, &CancelToken::new(), &mut |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MkfatError>(),
            Some(MkfatError::DeviceTooSmall { .. })
        ));
        assert_eq!(fs::read(&dev).unwrap(), vec![0u8; 2048]);
    }

    #[test]
    fn test_image_to_larger_device_keeps_tail() {
        let tmp = TempDir::new().unwrap();
        let img = tmp.path().join("a.img");
        let dev = tmp.path().join("dev.bin");
        fs::write(&img, pattern(1536)).unwrap();
        fs::write(&dev, vec![0xEEu8; 2048]).unwrap();

        copy_image_to_device(&img, &dev, 512, &CancelToken::new(), &mut |_, _| {}).unwrap();
        let out = fs::read(&dev).unwrap();
        assert_eq!(&out[..1536], &pattern(1536)[..]);
        assert!(out[1536..].iter().all(|b| *b == 0xEE));
    }

    #[test]
    fn test_cancelled_copy() {
        let tmp = TempDir::new().unwrap();
        let dev = tmp.path().join("dev.bin");
        let img = tmp.path().join("copy.img");
        fs::write(&dev, pattern(2048)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = copy_device_to_image(&dev, &img, 512, &cancel, &mut |_, _| {}).unwrap_err();
        assert_eq!(exit_code_for(&err), 130);
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let tmp = TempDir::new().unwrap();
        let dev = tmp.path().join("dev.bin");
        fs::write(&dev, pattern(512)).unwrap();
        let img = tmp.path().join("x.img");
        let err =
            copy_device_to_image(&dev, &img, 0, &CancelToken::new(), &mut |_, _| {}).unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
    }
}
