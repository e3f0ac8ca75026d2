use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::thread;
use std::time::Duration;

/// Largest single write the engine issues.
pub const CHUNK_SIZE: usize = 1024 * 1024; // 1 MB

/// Offset-addressed sink for formatted sectors.
pub trait WriteTarget {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Push buffered writes to the medium. Targets without a cache succeed.
    fn flush_to_media(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// False when writes are discarded, as in emulation.
    fn is_committing(&self) -> bool {
        true
    }

    /// Upper bound on bytes per write call.
    fn max_chunk(&self) -> usize {
        CHUNK_SIZE
    }
}

impl<T: WriteTarget + ?Sized> WriteTarget for &mut T {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        (**self).write_at(offset, buf)
    }
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_at(offset, buf)
    }
    fn flush_to_media(&mut self) -> io::Result<()> {
        (**self).flush_to_media()
    }
    fn is_committing(&self) -> bool {
        (**self).is_committing()
    }
    fn max_chunk(&self) -> usize {
        (**self).max_chunk()
    }
}

/// Plain file or already-opened device handle.
pub struct FileTarget {
    file: File,
}

impl FileTarget {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    pub fn into_inner(self) -> File {
        self.file
    }
}

impl WriteTarget for FileTarget {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn flush_to_media(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}

/// Default pacing for emulated runs, by capacity: DD, HD and ED drive
/// transfer rates.
pub fn default_emulate_rate(size: u64) -> f64 {
    match size {
        s if s == 360 * 1024 || s == 720 * 1024 => 31.25 * 1024.0,
        s if s == 1200 * 1024 || s == 1440 * 1024 => 62.5 * 1024.0,
        s if s == 2880 * 1024 => 125.0 * 1024.0,
        _ => 62.5 * 1024.0,
    }
}

/// Discards writes, optionally sleeping to mimic a drive's throughput.
pub struct NullTarget {
    bytes_per_sec: Option<f64>,
}

impl NullTarget {
    pub fn paced(bytes_per_sec: f64) -> Self {
        Self {
            bytes_per_sec: Some(bytes_per_sec),
        }
    }

    pub fn unpaced() -> Self {
        Self {
            bytes_per_sec: None,
        }
    }
}

impl WriteTarget for NullTarget {
    fn write_at(&mut self, _offset: u64, buf: &[u8]) -> io::Result<()> {
        if let Some(rate) = self.bytes_per_sec {
            thread::sleep(Duration::from_secs_f64(buf.len() as f64 / rate));
        }
        Ok(())
    }

    fn read_at(&mut self, _offset: u64, _buf: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "emulated target cannot be read back",
        ))
    }

    fn is_committing(&self) -> bool {
        false
    }

    fn max_chunk(&self) -> usize {
        // Small chunks keep the display moving at floppy speeds.
        if self.bytes_per_sec.is_some() {
            4096
        } else {
            CHUNK_SIZE
        }
    }
}

/// Fixed-size in-memory volume.
#[derive(Debug, Clone)]
pub struct MemTarget {
    pub data: Vec<u8>,
    pub flushes: usize,
}

impl MemTarget {
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0; len],
            flushes: 0,
        }
    }

    fn range(&self, offset: u64, len: usize) -> io::Result<std::ops::Range<usize>> {
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|e| *e <= self.data.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("access at {offset} (+{len}) is past the end of the volume"),
                )
            })?;
        Ok(start..end)
    }
}

impl WriteTarget for MemTarget {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let r = self.range(offset, buf.len())?;
        self.data[r].copy_from_slice(buf);
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let r = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.data[r]);
        Ok(())
    }

    fn flush_to_media(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_target_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vol.img");
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(4096).unwrap();
        let mut t = FileTarget::new(file);
        t.write_at(1024, &[0xAB; 512]).unwrap();
        t.flush_to_media().unwrap();
        let mut buf = [0u8; 512];
        t.read_at(1024, &mut buf).unwrap();
        assert_eq!(buf, [0xAB; 512]);
        drop(t);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn test_mem_target_bounds() {
        let mut t = MemTarget::new(1024);
        assert!(t.write_at(512, &[1; 512]).is_ok());
        assert!(t.write_at(1000, &[1; 512]).is_err());
        let mut buf = [0u8; 4];
        assert!(t.read_at(2048, &mut buf).is_err());
    }

    #[test]
    fn test_null_target_discards() {
        let mut t = NullTarget::unpaced();
        assert!(t.write_at(0, &[0; 512]).is_ok());
        assert!(!t.is_committing());
        let mut buf = [0u8; 512];
        assert!(t.read_at(0, &mut buf).is_err());
    }

    #[test]
    fn test_emulate_rates() {
        assert_eq!(default_emulate_rate(360 * 1024), 32000.0);
        assert_eq!(default_emulate_rate(1440 * 1024), 64000.0);
        assert_eq!(default_emulate_rate(2880 * 1024), 128000.0);
        assert_eq!(default_emulate_rate(10 * 1024 * 1024), 64000.0);
    }
}
