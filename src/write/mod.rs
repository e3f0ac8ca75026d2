//! Phase-ordered writer for a planned FAT volume.
//!
//! Phases run strictly in order: boot region, FAT copies, root directory,
//! then the optional data-area pass and track verification. Every chunk is
//! marked in the progress map before cancellation is checked, so the map
//! never shows a sector the target has not accepted.

pub mod target;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::SyncPolicy;
use crate::error::MkfatError;
use crate::fat::encode::{self, VolumeIdentity};
use crate::fat::{FatType, FormatPlan, SECTOR_SIZE};
use crate::progress::ProgressModel;
use crate::render::RenderSurface;

pub use target::{
    default_emulate_rate, FileTarget, MemTarget, NullTarget, WriteTarget, CHUNK_SIZE,
};

pub const PHASE_BOOT: &str = "Boot";
pub const PHASE_FAT1: &str = "FAT1";
pub const PHASE_FAT2: &str = "FAT2";
pub const PHASE_ROOT: &str = "Root";
pub const PHASE_DATA: &str = "Data";
pub const PHASE_VERIFY: &str = "Verify";

#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub identity: VolumeIdentity,
    pub full: bool,
    pub sync: SyncPolicy,
    pub verify: bool,
    /// Sectors between status refreshes.
    pub ui_every: u64,
}

impl FormatOptions {
    /// The data area is written by a full format, and always paced through
    /// on a target that keeps nothing.
    pub fn writes_data(&self, committing: bool) -> bool {
        self.full || !committing
    }

    /// Track verification follows a full format that was not already
    /// checked sector by sector, and needs a target that keeps its data.
    pub fn verifies_tracks(&self, committing: bool) -> bool {
        committing && self.verify && self.full && self.sync != SyncPolicy::Sector
    }

    /// Phase names in execution order.
    pub fn phase_names(&self, committing: bool) -> Vec<&'static str> {
        let mut names = vec![PHASE_BOOT, PHASE_FAT1, PHASE_FAT2, PHASE_ROOT];
        if self.writes_data(committing) {
            names.push(PHASE_DATA);
        }
        if self.verifies_tracks(committing) {
            names.push(PHASE_VERIFY);
        }
        names
    }
}

/// What a completed run found. Bad sectors do not fail the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormatOutcome {
    pub bad_sectors: Vec<u64>,
    pub verify_failures: Vec<u64>,
    pub verified: bool,
}

fn interrupted() -> anyhow::Error {
    MkfatError::Interrupted.into()
}

struct SectorWriter<'a, T: WriteTarget + ?Sized> {
    target: &'a mut T,
    progress: &'a ProgressModel,
    surface: &'a mut dyn RenderSurface,
    cancel: &'a CancelToken,
    sync: SyncPolicy,
    ui_every: u64,
    since_refresh: u64,
}

impl<T: WriteTarget + ?Sized> SectorWriter<'_, T> {
    fn stop_requested(&self) -> bool {
        self.cancel.is_cancelled() || self.surface.stop_requested()
    }

    fn check_cancel(&self) -> Result<()> {
        if self.stop_requested() {
            Err(interrupted())
        } else {
            Ok(())
        }
    }

    fn refresh(&mut self) {
        self.progress.publish(&mut *self.surface);
        self.since_refresh = 0;
    }

    fn set_operation(&mut self, op: &str) {
        log::debug!("{op}");
        self.progress.set_operation(op);
        self.refresh();
    }

    fn flush(&mut self) -> Result<()> {
        self.target
            .flush_to_media()
            .context("failed to flush writes to media")
    }

    /// Bytes per write call for the current policy.
    fn chunk_bytes(&self) -> usize {
        match self.sync {
            SyncPolicy::Sector => SECTOR_SIZE,
            _ => (self.target.max_chunk() / SECTOR_SIZE).max(1) * SECTOR_SIZE,
        }
    }

    /// Bookkeeping after a chunk lands: mark, flush if per-sector, refresh
    /// the display now and then, and honour a pending stop.
    fn after_chunk(&mut self, start: u64, sectors: u64) -> Result<()> {
        self.progress.map().mark_range(start, sectors);
        if self.sync == SyncPolicy::Sector {
            self.flush()?;
        }
        self.since_refresh += sectors;
        if self.since_refresh >= self.ui_every {
            self.refresh();
        }
        self.check_cancel()
    }

    fn write_span(&mut self, start: u64, buf: &[u8]) -> Result<()> {
        let chunk = self.chunk_bytes();
        let mut done = 0usize;
        while done < buf.len() {
            let n = (buf.len() - done).min(chunk);
            let sector = start + (done / SECTOR_SIZE) as u64;
            self.target
                .write_at(sector * SECTOR_SIZE as u64, &buf[done..done + n])
                .with_context(|| format!("write failed at sector {sector}"))?;
            self.after_chunk(sector, (n / SECTOR_SIZE).max(1) as u64)?;
            done += n;
        }
        Ok(())
    }

    fn zero_span(&mut self, start: u64, sectors: u64) -> Result<()> {
        let chunk_sectors = (self.chunk_bytes() / SECTOR_SIZE) as u64;
        let zeros = vec![0u8; self.chunk_bytes()];
        let mut done = 0u64;
        while done < sectors {
            let n = (sectors - done).min(chunk_sectors);
            let sector = start + done;
            self.target
                .write_at(
                    sector * SECTOR_SIZE as u64,
                    &zeros[..n as usize * SECTOR_SIZE],
                )
                .with_context(|| format!("write failed at sector {sector}"))?;
            self.after_chunk(sector, n)?;
            done += n;
        }
        Ok(())
    }

    fn end_phase(&mut self, name: &str) -> Result<()> {
        if matches!(self.sync, SyncPolicy::Track | SyncPolicy::Phase) {
            self.flush()?;
        }
        self.progress.complete_phase(name);
        self.refresh();
        Ok(())
    }

    /// Pattern write, read back and compare one sector.
    fn sector_is_good(&mut self, sector: u64) -> bool {
        let offset = sector * SECTOR_SIZE as u64;
        let pattern = [(sector & 0xFF) as u8; SECTOR_SIZE];
        if let Err(e) = self.target.write_at(offset, &pattern) {
            log::debug!("sector {sector}: pattern write failed: {e}");
            return false;
        }
        let mut back = [0u8; SECTOR_SIZE];
        if let Err(e) = self.target.read_at(offset, &mut back) {
            log::debug!("sector {sector}: read back failed: {e}");
            return false;
        }
        back == pattern
    }

    /// Zero the data area one sector at a time, checking each sector first.
    fn full_format_verified(&mut self, start: u64, sectors: u64) -> Result<Vec<u64>> {
        let zeros = [0u8; SECTOR_SIZE];
        let mut bad = Vec::new();
        for sector in start..start + sectors {
            self.check_cancel()?;
            if self.sector_is_good(sector) {
                self.target
                    .write_at(sector * SECTOR_SIZE as u64, &zeros)
                    .with_context(|| format!("write failed at sector {sector}"))?;
            } else {
                log::warn!("Bad sector at LBA {sector}");
                bad.push(sector);
            }
            self.after_chunk(sector, 1)?;
        }
        Ok(bad)
    }

    /// Zero the data area a track at a time.
    fn full_format_tracks(&mut self, start: u64, sectors: u64, spt: u64) -> Result<()> {
        let zeros = vec![0u8; spt as usize * SECTOR_SIZE];
        let mut done = 0u64;
        while done < sectors {
            let n = (sectors - done).min(spt);
            let sector = start + done;
            self.target
                .write_at(
                    sector * SECTOR_SIZE as u64,
                    &zeros[..n as usize * SECTOR_SIZE],
                )
                .with_context(|| format!("write failed at sector {sector}"))?;
            self.progress.map().mark_range(sector, n);
            if self.sync == SyncPolicy::Track {
                self.flush()?;
            }
            self.since_refresh += n;
            if self.since_refresh >= self.ui_every {
                self.refresh();
            }
            self.check_cancel()?;
            done += n;
        }
        Ok(())
    }

    /// Read the first sector of every track. Returns the sectors that failed.
    fn verify_tracks(&mut self, start: u64, sectors: u64, spt: u64) -> Result<Vec<u64>> {
        let mut buf = [0u8; SECTOR_SIZE];
        let mut failures = Vec::new();
        let mut sector = start;
        while sector < start + sectors {
            if let Err(e) = self.target.read_at(sector * SECTOR_SIZE as u64, &mut buf) {
                log::warn!("Verify read failed at LBA {sector}: {e}");
                failures.push(sector);
            }
            self.check_cancel()?;
            sector += spt;
        }
        Ok(failures)
    }
}

/// Write every structure of `plan` to `target`, in phase order.
///
/// Returns `MkfatError::Interrupted` (inside the anyhow chain) when
/// cancelled. Structures already written stay as they are.
pub fn format_volume<T: WriteTarget + ?Sized>(
    target: &mut T,
    plan: &FormatPlan,
    opts: &FormatOptions,
    progress: &ProgressModel,
    surface: &mut dyn RenderSurface,
    cancel: &CancelToken,
) -> Result<FormatOutcome> {
    let g = &plan.geometry;
    let committing = target.is_committing();
    let mut w = SectorWriter {
        target,
        progress,
        surface,
        cancel,
        sync: opts.sync,
        ui_every: opts.ui_every.max(1),
        since_refresh: 0,
    };
    let mut outcome = FormatOutcome::default();

    w.surface.set_title(progress.title());
    w.surface.set_system_ranges(progress.system().ranges());
    w.check_cancel()?;

    // Boot region
    let boot = encode::boot_sector(plan, &opts.identity);
    w.set_operation("Write boot sector");
    w.write_span(0, &boot)?;
    if plan.fat_type == FatType::Fat32 {
        w.set_operation("Write FSInfo");
        w.write_span(g.fs_info_sector as u64, &encode::fs_info_sector())?;
        w.set_operation("Backup boot sector");
        w.write_span(g.backup_boot_sector as u64, &boot)?;
    }
    w.end_phase(PHASE_BOOT)?;

    // FAT copies
    let spf = plan.layout.sectors_per_fat;
    let head = encode::fat_first_sector(plan.fat_type, g.media);
    for (copy, phase) in [(0u64, PHASE_FAT1), (1, PHASE_FAT2)] {
        let start = plan.fat_start(copy);
        w.set_operation(&format!("Initialize FAT #{}", copy + 1));
        w.write_span(start, &head)?;
        w.zero_span(start + 1, spf - 1)?;
        w.end_phase(phase)?;
    }

    // Root directory. FAT32 keeps it in the first data cluster and carries
    // its label only in the boot sector.
    let (root_start, root_sectors) = match plan.fat_type {
        FatType::Fat32 => (plan.data_start(), g.sectors_per_cluster as u64),
        _ => (plan.root_dir_start(), plan.layout.root_dir_sectors),
    };
    w.set_operation("Clear root directory");
    w.zero_span(root_start, root_sectors)?;
    if opts.identity.has_label && plan.fat_type != FatType::Fat32 {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[..crate::fat::DIR_ENTRY_SIZE]
            .copy_from_slice(&encode::volume_label_entry(&opts.identity.label));
        w.set_operation("Write volume label");
        w.write_span(root_start, &sector)?;
    }
    w.end_phase(PHASE_ROOT)?;

    // Data area
    let data_start = root_start + root_sectors;
    let data_sectors = plan.total_sectors().saturating_sub(data_start);
    let spt = g.sectors_per_track.max(1) as u64;

    if opts.writes_data(committing) {
        if !committing {
            w.set_operation("Format data area");
            w.zero_span(data_start, data_sectors)?;
        } else if opts.sync == SyncPolicy::Sector {
            w.set_operation("Full format: zeroing and checking data area");
            outcome.bad_sectors = w.full_format_verified(data_start, data_sectors)?;
        } else {
            w.set_operation("Full format (track): zeroing data area");
            w.full_format_tracks(data_start, data_sectors, spt)?;
        }
        w.end_phase(PHASE_DATA)?;
    }

    if opts.verifies_tracks(committing) {
        w.set_operation("Verify tracks");
        let start = plan.data_start();
        outcome.verify_failures = w.verify_tracks(start, plan.total_sectors() - start, spt)?;
        outcome.verified = true;
        w.progress.complete_phase(PHASE_VERIFY);
    } else if opts.verify {
        log::info!(
            "Skipping track verification: it runs after a track-synced full format on a real target"
        );
    }

    w.set_operation("Format complete");

    if !outcome.bad_sectors.is_empty() {
        log::warn!("{}", MkfatError::BadSectors(outcome.bad_sectors.clone()));
    }
    if !outcome.verify_failures.is_empty() {
        log::warn!(
            "{} track(s) failed read verification",
            outcome.verify_failures.len()
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat::{plan, GeometryOverrides};
    use crate::progress::{RunMode, SystemRanges};
    use crate::render::NullSurface;
    use std::io;

    const FLOPPY: u64 = 1440 * 1024;

    fn options(label: &str) -> FormatOptions {
        FormatOptions {
            identity: VolumeIdentity::new("", label, 0x1234_5678),
            full: false,
            sync: SyncPolicy::Track,
            verify: false,
            ui_every: 64,
        }
    }

    fn model_for(p: &FormatPlan, opts: &FormatOptions) -> ProgressModel {
        ProgressModel::new(
            "test",
            &opts.phase_names(true),
            p.total_sectors(),
            SystemRanges::new(p.system_ranges()),
            RunMode::Real,
        )
    }

    fn run<T: WriteTarget>(
        t: &mut T,
        p: &FormatPlan,
        opts: &FormatOptions,
        cancel: &CancelToken,
    ) -> Result<FormatOutcome> {
        let model = model_for(p, opts);
        format_volume(t, p, opts, &model, &mut NullSurface, cancel)
    }

    /// Records the first sector of every write.
    struct Recorder {
        inner: MemTarget,
        writes: Vec<u64>,
    }

    impl WriteTarget for Recorder {
        fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
            self.writes.push(offset / SECTOR_SIZE as u64);
            self.inner.write_at(offset, buf)
        }
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
            self.inner.read_at(offset, buf)
        }
    }

    /// Reads of listed sectors return corrupted data.
    struct Faulty {
        inner: MemTarget,
        bad: Vec<u64>,
    }

    impl WriteTarget for Faulty {
        fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
            self.inner.write_at(offset, buf)
        }
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
            self.inner.read_at(offset, buf)?;
            if self.bad.contains(&(offset / SECTOR_SIZE as u64)) {
                buf[0] ^= 0xFF;
            }
            Ok(())
        }
    }

    /// Cancels the token once `after` writes have gone through.
    struct CancelAfter {
        inner: MemTarget,
        token: CancelToken,
        after: usize,
        writes: usize,
    }

    impl WriteTarget for CancelAfter {
        fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
            self.writes += 1;
            if self.writes == self.after {
                self.token.cancel();
            }
            self.inner.write_at(offset, buf)
        }
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
            self.inner.read_at(offset, buf)
        }
    }

    #[test]
    fn test_fat12_structures() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let mut t = MemTarget::new(p.size_bytes() as usize);
        t.data.fill(0xEE);
        run(&mut t, &p, &options("FLOPPY"), &CancelToken::new()).unwrap();

        let d = &t.data;
        assert_eq!(&d[510..512], &[0x55, 0xAA]);
        let fat1 = &d[512..512 + 9 * 512];
        let fat2 = &d[10 * 512..19 * 512];
        assert_eq!(fat1, fat2);
        assert_eq!(&fat1[0..3], &[0xF0, 0xFF, 0xFF]);
        assert!(fat1[3..].iter().all(|&b| b == 0));

        let root = &d[19 * 512..33 * 512];
        assert_eq!(&root[0..11], b"FLOPPY     ");
        assert_eq!(root[11], 0x08);
        assert!(root[32..].iter().all(|&b| b == 0));
        // Data area untouched without --full.
        assert_eq!(d[33 * 512], 0xEE);
    }

    #[test]
    fn test_phase_order_fat12() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let mut t = Recorder {
            inner: MemTarget::new(p.size_bytes() as usize),
            writes: Vec::new(),
        };
        run(&mut t, &p, &options("LBL"), &CancelToken::new()).unwrap();
        assert_eq!(t.writes, vec![0, 1, 2, 10, 11, 19, 19]);
    }

    #[test]
    fn test_phase_order_fat32() {
        let p = plan(FatType::Fat32, 64 * 1024 * 1024, &GeometryOverrides::default()).unwrap();
        let mut t = Recorder {
            inner: MemTarget::new(p.size_bytes() as usize),
            writes: Vec::new(),
        };
        run(&mut t, &p, &options(""), &CancelToken::new()).unwrap();
        assert_eq!(&t.writes[0..4], &[0, 1, 6, 32]);
        assert!(t.writes.contains(&p.fat_start(1)));
        assert_eq!(*t.writes.last().unwrap(), p.data_start());

        let d = &t.inner.data;
        let fsinfo = &d[512..1024];
        assert_eq!(&fsinfo[0..4], &[0x52, 0x52, 0x61, 0x41]);
        assert_eq!(&d[0..512], &d[6 * 512..7 * 512]);
    }

    #[test]
    fn test_bad_sectors_are_aggregated() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let n = p.data_start() + 100;
        let mut t = Faulty {
            inner: MemTarget::new(p.size_bytes() as usize),
            bad: vec![n, n + 5],
        };
        let opts = FormatOptions {
            full: true,
            sync: SyncPolicy::Sector,
            ..options("")
        };
        let outcome = run(&mut t, &p, &opts, &CancelToken::new()).unwrap();
        assert_eq!(outcome.bad_sectors, vec![n, n + 5]);
        // Good sectors end up zeroed.
        let off = (n + 1) as usize * 512;
        assert!(t.inner.data[off..off + 512].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_full_format_by_track_zeroes_data() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let mut t = MemTarget::new(p.size_bytes() as usize);
        t.data.fill(0xEE);
        let opts = FormatOptions {
            full: true,
            ..options("")
        };
        run(&mut t, &p, &opts, &CancelToken::new()).unwrap();
        let data_off = p.data_start() as usize * 512;
        assert!(t.data[data_off..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_track_verify_reports_failures() {
        struct ReadFails {
            inner: MemTarget,
            sector: u64,
        }
        impl WriteTarget for ReadFails {
            fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
                self.inner.write_at(offset, buf)
            }
            fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
                if offset / 512 == self.sector {
                    return Err(io::Error::new(io::ErrorKind::Other, "media error"));
                }
                self.inner.read_at(offset, buf)
            }
        }

        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let failing = p.data_start() + 18 * 3;
        let mut t = ReadFails {
            inner: MemTarget::new(p.size_bytes() as usize),
            sector: failing,
        };
        let opts = FormatOptions {
            full: true,
            verify: true,
            ..options("")
        };
        let outcome = run(&mut t, &p, &opts, &CancelToken::new()).unwrap();
        assert!(outcome.verified);
        assert_eq!(outcome.verify_failures, vec![failing]);
    }

    #[test]
    fn test_track_verify_needs_track_synced_full_format() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();

        // Quick format: the data area was never written, so nothing is read.
        let mut t = Faulty {
            inner: MemTarget::new(p.size_bytes() as usize),
            bad: vec![p.data_start()],
        };
        let quick = FormatOptions {
            verify: true,
            ..options("")
        };
        let outcome = run(&mut t, &p, &quick, &CancelToken::new()).unwrap();
        assert!(!outcome.verified);
        assert!(outcome.verify_failures.is_empty());

        // Sector sync already checked every sector during the full format.
        let mut t = MemTarget::new(p.size_bytes() as usize);
        let checked = FormatOptions {
            full: true,
            sync: SyncPolicy::Sector,
            verify: true,
            ..options("")
        };
        let outcome = run(&mut t, &p, &checked, &CancelToken::new()).unwrap();
        assert!(!outcome.verified);
        assert!(outcome.bad_sectors.is_empty());

        assert_eq!(
            quick.phase_names(true),
            vec![PHASE_BOOT, PHASE_FAT1, PHASE_FAT2, PHASE_ROOT]
        );
        assert!(!checked.phase_names(true).contains(&PHASE_VERIFY));
        let track = FormatOptions {
            full: true,
            verify: true,
            ..options("")
        };
        assert_eq!(track.phase_names(true).last(), Some(&PHASE_VERIFY));
        assert!(!track.phase_names(false).contains(&PHASE_VERIFY));
    }

    #[test]
    fn test_cancel_stops_writing() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let token = CancelToken::new();
        let mut t = CancelAfter {
            inner: MemTarget::new(p.size_bytes() as usize),
            token: token.clone(),
            after: 3,
            writes: 0,
        };
        let err = run(&mut t, &p, &options(""), &token).unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 130);
        assert_eq!(t.writes, 3);
    }

    #[test]
    fn test_cancel_before_start_writes_nothing() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let mut t = Recorder {
            inner: MemTarget::new(p.size_bytes() as usize),
            writes: Vec::new(),
        };
        assert!(run(&mut t, &p, &options(""), &token).is_err());
        assert!(t.writes.is_empty());
    }

    #[test]
    fn test_sector_map_matches_writes() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let opts = options("");
        let model = model_for(&p, &opts);
        let mut t = MemTarget::new(p.size_bytes() as usize);
        format_volume(&mut t, &p, &opts, &model, &mut NullSurface, &CancelToken::new()).unwrap();
        assert_eq!(model.map().written(), p.data_start());
        assert!(model.map().is_written(0));
        assert!(model.map().is_written(p.data_start() - 1));
        assert!(!model.map().is_written(p.data_start()));
        assert!(model.phases().iter().all(|ph| ph.done));
    }

    #[test]
    fn test_io_error_aborts_phase() {
        struct FailAt {
            sector: u64,
            writes: Vec<u64>,
        }
        impl WriteTarget for FailAt {
            fn write_at(&mut self, offset: u64, _buf: &[u8]) -> io::Result<()> {
                let s = offset / 512;
                self.writes.push(s);
                if s == self.sector {
                    return Err(io::Error::new(io::ErrorKind::Other, "device gone"));
                }
                Ok(())
            }
            fn read_at(&mut self, _offset: u64, _buf: &mut [u8]) -> io::Result<()> {
                Ok(())
            }
        }

        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let mut t = FailAt {
            sector: 10,
            writes: Vec::new(),
        };
        let err = run(&mut t, &p, &options(""), &CancelToken::new()).unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), 1);
        assert_eq!(*t.writes.last().unwrap(), 10);
    }

    #[test]
    fn test_flush_counts_by_policy() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let cases = [(SyncPolicy::Phase, 4), (SyncPolicy::Track, 4), (SyncPolicy::None, 0)];
        for (sync, expected) in cases {
            let mut t = MemTarget::new(p.size_bytes() as usize);
            let opts = FormatOptions { sync, ..options("") };
            run(&mut t, &p, &opts, &CancelToken::new()).unwrap();
            assert_eq!(t.flushes, expected, "{sync:?}");
        }

        let mut t = MemTarget::new(p.size_bytes() as usize);
        let opts = FormatOptions {
            sync: SyncPolicy::Sector,
            ..options("")
        };
        run(&mut t, &p, &opts, &CancelToken::new()).unwrap();
        assert_eq!(t.flushes as u64, p.data_start());
    }

    #[test]
    fn test_emulated_run_skips_verification() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let mut t = NullTarget::unpaced();
        let opts = FormatOptions {
            full: true,
            verify: true,
            sync: SyncPolicy::Sector,
            ..options("")
        };
        let outcome = run(&mut t, &p, &opts, &CancelToken::new()).unwrap();
        assert!(outcome.bad_sectors.is_empty());
        assert!(!outcome.verified);
    }

    #[test]
    fn test_emulated_run_paces_through_data_area() {
        let p = plan(FatType::Fat12, FLOPPY, &GeometryOverrides::default()).unwrap();
        let opts = options("EMU");
        assert!(opts.phase_names(false).contains(&PHASE_DATA));

        let model = ProgressModel::new(
            "emulate",
            &opts.phase_names(false),
            p.total_sectors(),
            SystemRanges::new(p.system_ranges()),
            RunMode::Emulate { bytes_per_sec: 1e12 },
        );
        let mut t = NullTarget::unpaced();
        format_volume(&mut t, &p, &opts, &model, &mut NullSurface, &CancelToken::new()).unwrap();
        assert_eq!(model.map().written(), p.total_sectors());
        assert!(model.phases().iter().all(|ph| ph.done));
    }

    #[test]
    fn test_fat32_label_stays_in_boot_sector() {
        let p = plan(FatType::Fat32, 64 * 1024 * 1024, &GeometryOverrides::default()).unwrap();
        let mut t = MemTarget::new(p.size_bytes() as usize);
        t.data.fill(0xEE);
        run(&mut t, &p, &options("BIGDISK"), &CancelToken::new()).unwrap();

        let d = &t.data;
        assert_eq!(&d[71..82], b"BIGDISK    ");
        let root = p.data_start() as usize * SECTOR_SIZE;
        let cluster = p.cluster_bytes() as usize;
        assert!(d[root..root + cluster].iter().all(|&b| b == 0));
    }
}
