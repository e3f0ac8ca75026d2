//! Run-time progress state shared between the writer and the renderer.
//!
//! The writer marks sectors in a [`SectorMap`] as they are committed; the
//! renderer only ever reads. Marks are monotonic: a written sector is never
//! unmarked.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::fat::SECTOR_SIZE;
use crate::render::{MapCell, PhaseView, RenderSurface};

/// Above this many sectors, one map bit covers several sectors.
const MAX_MAP_BITS: u64 = 1 << 26;

/// Rows the status area and title take away from the map.
const RESERVED_ROWS: usize = 7;

pub struct SectorMap {
    words: Vec<AtomicU64>,
    total: u64,
    sectors_per_bit: u64,
    bits_set: AtomicU64,
    cursor: AtomicU64,
}

impl SectorMap {
    pub fn new(total_sectors: u64) -> Self {
        let sectors_per_bit = total_sectors.div_ceil(MAX_MAP_BITS).max(1);
        let bits = total_sectors.div_ceil(sectors_per_bit);
        let words = (0..bits.div_ceil(64)).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            total: total_sectors,
            sectors_per_bit,
            bits_set: AtomicU64::new(0),
            cursor: AtomicU64::new(0),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Mark `count` sectors from `start` as written. Out-of-range sectors are
    /// ignored.
    pub fn mark_range(&self, start: u64, count: u64) {
        let end = start.saturating_add(count).min(self.total);
        if start >= end {
            return;
        }
        let first_bit = start / self.sectors_per_bit;
        let last_bit = (end - 1) / self.sectors_per_bit;
        let mut bit = first_bit;
        while bit <= last_bit {
            let word = (bit / 64) as usize;
            let lo = bit % 64;
            let hi = (last_bit - (bit - lo)).min(63);
            let mask = if hi - lo == 63 {
                u64::MAX
            } else {
                ((1u64 << (hi - lo + 1)) - 1) << lo
            };
            let prev = self.words[word].fetch_or(mask, Ordering::Relaxed);
            let newly = (mask & !prev).count_ones() as u64;
            if newly > 0 {
                self.bits_set.fetch_add(newly, Ordering::Relaxed);
            }
            bit += hi - lo + 1;
        }
        self.cursor.fetch_max(end - 1, Ordering::Relaxed);
    }

    pub fn is_written(&self, sector: u64) -> bool {
        if sector >= self.total {
            return false;
        }
        let bit = sector / self.sectors_per_bit;
        self.words[(bit / 64) as usize].load(Ordering::Relaxed) & (1 << (bit % 64)) != 0
    }

    /// Number of sectors marked so far.
    pub fn written(&self) -> u64 {
        (self.bits_set.load(Ordering::Relaxed) * self.sectors_per_bit).min(self.total)
    }

    /// Highest sector marked so far.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }
}

/// Sector ranges occupied by filesystem metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemRanges(Vec<RangeInclusive<u64>>);

impl SystemRanges {
    pub fn new(ranges: Vec<RangeInclusive<u64>>) -> Self {
        Self(ranges)
    }

    pub fn contains(&self, sector: u64) -> bool {
        self.0.iter().any(|r| r.contains(&sector))
    }

    pub fn ranges(&self) -> &[RangeInclusive<u64>] {
        &self.0
    }
}

/// Whether writes really reach a target, and the assumed rate when they don't.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunMode {
    Real,
    Emulate { bytes_per_sec: f64 },
}

struct PhaseState {
    name: String,
    done: bool,
}

pub struct ProgressModel {
    title: String,
    phases: Mutex<Vec<PhaseState>>,
    map: SectorMap,
    system: SystemRanges,
    operation: Mutex<String>,
    started: Instant,
    mode: RunMode,
}

impl ProgressModel {
    pub fn new(
        title: impl Into<String>,
        phases: &[&str],
        total_sectors: u64,
        system: SystemRanges,
        mode: RunMode,
    ) -> Self {
        Self {
            title: title.into(),
            phases: Mutex::new(
                phases
                    .iter()
                    .map(|p| PhaseState {
                        name: p.to_string(),
                        done: false,
                    })
                    .collect(),
            ),
            map: SectorMap::new(total_sectors),
            system,
            operation: Mutex::new(String::new()),
            started: Instant::now(),
            mode,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn map(&self) -> &SectorMap {
        &self.map
    }

    pub fn system(&self) -> &SystemRanges {
        &self.system
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn set_operation(&self, op: impl Into<String>) {
        if let Ok(mut o) = self.operation.lock() {
            *o = op.into();
        }
    }

    pub fn operation(&self) -> String {
        self.operation.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Mark the named phase finished. Unknown names are ignored.
    pub fn complete_phase(&self, name: &str) {
        if let Ok(mut phases) = self.phases.lock() {
            if let Some(p) = phases.iter_mut().find(|p| p.name == name) {
                p.done = true;
            }
        }
    }

    pub fn phases(&self) -> Vec<PhaseView> {
        self.phases
            .lock()
            .map(|phases| {
                phases
                    .iter()
                    .map(|p| PhaseView {
                        name: p.name.clone(),
                        done: p.done,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn rate(&self, elapsed: Duration) -> f64 {
        match self.mode {
            RunMode::Emulate { bytes_per_sec } => bytes_per_sec,
            RunMode::Real => {
                let secs = elapsed.as_secs_f64();
                if secs > 0.0 {
                    (self.map.written() * SECTOR_SIZE as u64) as f64 / secs
                } else {
                    0.0
                }
            }
        }
    }

    /// The four status lines: position, count, timing, current operation.
    pub fn status_lines(&self) -> Vec<String> {
        let written = self.map.written();
        let total = self.map.total();
        let elapsed = Duration::from_secs(self.started.elapsed().as_secs());
        let rate = self.rate(elapsed);

        let eta = if rate > 0.0 {
            let remaining = (total - written.min(total)) * SECTOR_SIZE as u64;
            format_duration(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            "--".to_string()
        };
        let mode = match self.mode {
            RunMode::Real => "REAL",
            RunMode::Emulate { .. } => "EMULATE",
        };

        vec![
            format!("Absolute: {:06}", self.map.cursor()),
            format!("Written: {} / {} sectors", written, total),
            format!(
                "Elapsed: {}   Rate: {}/s   ETA: {}   Mode: {}",
                format_duration(elapsed),
                human_bytes(rate as u64),
                eta,
                mode
            ),
            format!("Current op: {}", self.operation()),
        ]
    }

    /// Map cells for a `width` x `height` surface. When the volume has more
    /// sectors than cells, the window scrolls to keep the write cursor
    /// visible.
    pub fn map_rows(&self, width: usize, height: usize) -> Vec<Vec<MapCell>> {
        let total = self.map.total();
        if total == 0 || width == 0 {
            return Vec::new();
        }
        let rows = height.saturating_sub(RESERVED_ROWS).max(1);
        let cells = (width * rows) as u64;

        let mut start = 0u64;
        if total > cells {
            let cursor = self.map.cursor();
            if cursor >= cells - 1 {
                start = cursor - (cells - 1);
            }
            start = start.min(total - cells);
        }

        (0..rows)
            .map(|row| {
                (0..width)
                    .map(|col| start + (row * width + col) as u64)
                    .take_while(|&abs| abs < total)
                    .map(|abs| {
                        if self.map.is_written(abs) {
                            MapCell::Written
                        } else if self.system.contains(abs) {
                            MapCell::System
                        } else {
                            MapCell::Free
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Push the current state to a surface and redraw it.
    pub fn publish(&self, surface: &mut dyn RenderSurface) {
        let (w, h) = surface.size();
        surface.set_phases(&self.phases());
        surface.set_progress_map(&self.map_rows(w, h));
        surface.set_status_lines(&self.status_lines());
        surface.draw();
    }
}

pub fn human_bytes(b: u64) -> String {
    if b >= 1024 * 1024 {
        format!("{}M", b / (1024 * 1024))
    } else if b >= 1024 {
        format!("{}K", b / 1024)
    } else {
        format!("{}B", b)
    }
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
