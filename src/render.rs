//! Rendering seam. The core pushes state into a [`RenderSurface`]; the only
//! things it reads back are the stop flag and the surface size.

use std::io::{self, Write};
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

/// One cell of the sector map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapCell {
    Written,
    System,
    Free,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseView {
    pub name: String,
    pub done: bool,
}

pub trait RenderSurface {
    fn set_title(&mut self, _title: &str) {}
    fn set_phases(&mut self, _phases: &[PhaseView]) {}
    fn set_system_ranges(&mut self, _ranges: &[RangeInclusive<u64>]) {}
    fn set_progress_map(&mut self, _rows: &[Vec<MapCell>]) {}
    fn set_status_lines(&mut self, _lines: &[String]) {}
    fn draw(&mut self) {}

    /// Set when the user asked the surface to stop.
    fn stop_requested(&self) -> bool {
        false
    }

    /// Columns and rows available.
    fn size(&self) -> (usize, usize) {
        (80, 25)
    }
}

/// Discards everything. Used for headless runs and tests.
#[derive(Debug, Default)]
pub struct NullSurface;

impl RenderSurface for NullSurface {}

/// Minimal line-oriented terminal surface on stderr.
///
/// Shows the phase strip, a single map row and the status lines, redrawn in
/// place at most every `min_interval`.
pub struct ConsoleSurface {
    title: String,
    phases: Vec<PhaseView>,
    map_row: String,
    status: Vec<String>,
    width: usize,
    drawn_lines: usize,
    last_draw: Option<Instant>,
    min_interval: Duration,
}

impl ConsoleSurface {
    pub fn new() -> Self {
        let width = std::env::var("COLUMNS")
            .ok()
            .and_then(|c| c.parse::<usize>().ok())
            .filter(|c| *c >= 20)
            .unwrap_or(80);
        Self {
            title: String::new(),
            phases: Vec::new(),
            map_row: String::new(),
            status: Vec::new(),
            width,
            drawn_lines: 0,
            last_draw: None,
            min_interval: Duration::from_millis(200),
        }
    }

    /// Draw unconditionally, ignoring the refresh interval.
    pub fn finish(&mut self) {
        self.last_draw = None;
        self.draw();
    }

    fn render(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.status.len() + 3);
        if !self.title.is_empty() {
            lines.push(self.title.clone());
        }
        if !self.phases.is_empty() {
            let strip = self
                .phases
                .iter()
                .map(|p| format!("[{}] {}", if p.done { 'x' } else { ' ' }, p.name))
                .collect::<Vec<_>>()
                .join("  ");
            lines.push(strip);
        }
        if !self.map_row.is_empty() {
            lines.push(self.map_row.clone());
        }
        lines.extend(self.status.iter().cloned());
        lines
    }
}

impl Default for ConsoleSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for ConsoleSurface {
    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    fn set_phases(&mut self, phases: &[PhaseView]) {
        self.phases = phases.to_vec();
    }

    fn set_progress_map(&mut self, rows: &[Vec<MapCell>]) {
        self.map_row = rows
            .first()
            .map(|row| {
                row.iter()
                    .map(|c| match c {
                        MapCell::Written => '#',
                        MapCell::System => '=',
                        MapCell::Free => '.',
                    })
                    .collect()
            })
            .unwrap_or_default();
    }

    fn set_status_lines(&mut self, lines: &[String]) {
        self.status = lines.to_vec();
    }

    fn draw(&mut self) {
        if let Some(last) = self.last_draw {
            if last.elapsed() < self.min_interval {
                return;
            }
        }
        self.last_draw = Some(Instant::now());

        let lines = self.render();
        let mut err = io::stderr().lock();
        if self.drawn_lines > 0 {
            // Move back up over the previous frame.
            let _ = write!(err, "\x1b[{}A", self.drawn_lines);
        }
        for line in &lines {
            let clipped: String = line.chars().take(self.width).collect();
            let _ = writeln!(err, "\r\x1b[2K{clipped}");
        }
        let _ = err.flush();
        self.drawn_lines = lines.len();
    }

    fn size(&self) -> (usize, usize) {
        // One map row: the status area takes the rest.
        (self.width, 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_render_layout() {
        let mut s = ConsoleSurface::new();
        s.set_title("Formatting image.img");
        s.set_phases(&[
            PhaseView {
                name: "Boot".into(),
                done: true,
            },
            PhaseView {
                name: "FAT1".into(),
                done: false,
            },
        ]);
        s.set_progress_map(&[vec![MapCell::Written, MapCell::System, MapCell::Free]]);
        s.set_status_lines(&["Written: 1 / 3 sectors".to_string()]);
        let lines = s.render();
        assert_eq!(lines[0], "Formatting image.img");
        assert_eq!(lines[1], "[x] Boot  [ ] FAT1");
        assert_eq!(lines[2], "#=.");
        assert_eq!(lines[3], "Written: 1 / 3 sectors");
    }

    #[test]
    fn test_null_surface_defaults() {
        let s = NullSurface;
        assert!(!s.stop_requested());
        assert_eq!(s.size(), (80, 25));
    }
}
