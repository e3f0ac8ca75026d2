//! Run configuration and persisted user defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::MkfatError;
use crate::fat::encode::DEFAULT_OEM;
use crate::fat::{FatType, GeometryOverrides};

/// When the writer asks the target to flush to media.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// After every sector. A full format also verifies each sector.
    Sector,
    /// After every track of the data area and at the end of each phase.
    #[default]
    Track,
    /// At the end of each phase.
    Phase,
    /// Never.
    None,
}

impl FromStr for SyncPolicy {
    type Err = MkfatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sector" => Ok(SyncPolicy::Sector),
            "track" => Ok(SyncPolicy::Track),
            "phase" => Ok(SyncPolicy::Phase),
            "none" => Ok(SyncPolicy::None),
            _ => Err(MkfatError::Config(format!(
                "unknown sync policy '{s}' (expected sector, track, phase or none)"
            ))),
        }
    }
}

/// Where formatted sectors go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum Target {
    /// Regular file, created or truncated and sized to the volume.
    Image(PathBuf),
    /// Raw block device, opened through the platform safety layer.
    Device(PathBuf),
    /// No writes; progress is paced to a floppy drive's speed.
    Emulate,
}

impl Target {
    pub fn describe(&self) -> String {
        match self {
            Target::Image(p) => format!("image {}", p.display()),
            Target::Device(p) => format!("device {}", p.display()),
            Target::Emulate => "emulated drive".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatConfig {
    pub fat_type: FatType,
    pub size: u64,
    pub target: Target,
    #[serde(default)]
    pub overrides: GeometryOverrides,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_oem")]
    pub oem: String,
    /// Fixed volume serial. Derived from the clock when absent.
    #[serde(default)]
    pub serial: Option<u32>,
    #[serde(default)]
    pub full: bool,
    #[serde(default)]
    pub sync: SyncPolicy,
    #[serde(default)]
    pub verify: bool,
    #[serde(default)]
    pub force: bool,
    /// Sectors between status refreshes.
    #[serde(default = "default_ui_every")]
    pub ui_every: u64,
    /// Pacing for emulated runs, bytes per second. Defaults by size.
    #[serde(default)]
    pub emulate_rate: Option<f64>,
}

fn default_oem() -> String {
    DEFAULT_OEM.to_string()
}

fn default_ui_every() -> u64 {
    64
}

impl FormatConfig {
    pub fn new(fat_type: FatType, size: u64, target: Target) -> Self {
        Self {
            fat_type,
            size,
            target,
            overrides: GeometryOverrides::default(),
            label: String::new(),
            oem: default_oem(),
            serial: None,
            full: false,
            sync: SyncPolicy::default(),
            verify: false,
            force: false,
            ui_every: default_ui_every(),
            emulate_rate: None,
        }
    }

    /// Reject combinations that can never succeed, before anything is opened.
    pub fn validate(&self) -> Result<(), MkfatError> {
        if self.size == 0 || self.size % 512 != 0 {
            return Err(MkfatError::Config(format!(
                "size must be a positive multiple of 512 bytes, got {} bytes",
                self.size
            )));
        }
        if !self.label.is_ascii() || self.label.len() > 11 {
            return Err(MkfatError::Config(format!(
                "volume label '{}' must be at most 11 ASCII characters",
                self.label
            )));
        }
        if !self.oem.is_ascii() || self.oem.len() > 8 {
            return Err(MkfatError::Config(format!(
                "OEM name '{}' must be at most 8 ASCII characters",
                self.oem
            )));
        }
        if let Target::Device(path) = &self.target {
            if !self.force {
                return Err(MkfatError::Config(format!(
                    "writing to device {} requires --force",
                    path.display()
                )));
            }
        }
        let ov = &self.overrides;
        if ov.heads == Some(0) || ov.sectors_per_track == Some(0) || ov.cylinders == Some(0) {
            return Err(MkfatError::Config(
                "heads, sectors per track and tracks must be positive".into(),
            ));
        }
        if self.ui_every == 0 {
            return Err(MkfatError::Config("ui-every must be positive".into()));
        }
        if let Some(rate) = self.emulate_rate {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(MkfatError::Config(format!(
                    "emulation rate must be a positive number, got {rate}"
                )));
            }
        }
        Ok(())
    }

    pub fn volume_serial(&self) -> u32 {
        self.serial.unwrap_or_else(serial_from_clock)
    }
}

/// DOS-style volume serial: date and time words summed pairwise.
pub fn serial_from_clock() -> u32 {
    let now = Local::now();
    let hundredths = now.timestamp_subsec_millis() / 10;
    let lo = ((now.month() << 8) | now.day()) + ((now.second() << 8) | hundredths);
    let hi = ((now.hour() << 8) | now.minute()) + now.year() as u32;
    ((hi & 0xFFFF) << 16) | (lo & 0xFFFF)
}

/// Parse a size such as `1440k`, `32m`, `1.5g` or `512b`. Bare numbers are
/// bytes.
pub fn parse_size(s: &str) -> Result<u64, MkfatError> {
    let ss = s.trim().to_ascii_lowercase();
    if ss.is_empty() {
        return Err(MkfatError::Config("empty size".into()));
    }
    let (num, mult) = match ss.chars().last() {
        Some('k') => (&ss[..ss.len() - 1], 1024u64),
        Some('m') => (&ss[..ss.len() - 1], 1024 * 1024),
        Some('g') => (&ss[..ss.len() - 1], 1024 * 1024 * 1024),
        Some('b') => (&ss[..ss.len() - 1], 1),
        _ => (ss.as_str(), 1),
    };
    let v: f64 = num
        .trim()
        .parse()
        .map_err(|_| MkfatError::Config(format!("invalid size '{s}'")))?;
    if !v.is_finite() || v < 0.0 {
        return Err(MkfatError::Config(format!("invalid size '{s}'")));
    }
    Ok((v * mult as f64) as u64)
}

// ---------------------------------------------------------------------------
// Persisted defaults
// ---------------------------------------------------------------------------

const SETTINGS_FILE: &str = "settings.json";

/// User defaults, read from `settings.json`. Command-line flags win.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fat_type: FatType,
    pub oem: String,
    pub sync: SyncPolicy,
    pub verify: bool,
    pub ui_every: u64,
    pub copy_block_size: usize,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fat_type: FatType::Fat12,
            oem: default_oem(),
            sync: SyncPolicy::default(),
            verify: false,
            ui_every: default_ui_every(),
            copy_block_size: 512,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn user_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rusty-mkfat"))
    }

    pub fn user_config_path() -> Option<PathBuf> {
        Self::user_config_dir().map(|dir| dir.join(SETTINGS_FILE))
    }

    /// User config directory first, then the working directory, then
    /// built-in defaults. A file that exists but does not parse is reported
    /// and skipped.
    pub fn load() -> Self {
        let candidates = Self::user_config_path()
            .into_iter()
            .chain(std::iter::once(PathBuf::from(SETTINGS_FILE)));
        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load_from_path(&path) {
                Ok(settings) => {
                    log::debug!("loaded settings from {}", path.display());
                    return settings;
                }
                Err(e) => log::warn!("ignoring {}: {:#}", path.display(), e),
            }
        }
        Self::default()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("malformed {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path().context("could not determine user config directory")?;
        self.save_to_path(&path)
    }

    /// Seed a fresh config with these defaults.
    pub fn apply(&self, cfg: &mut FormatConfig) {
        cfg.oem = self.oem.clone();
        cfg.sync = self.sync;
        cfg.verify = self.verify;
        cfg.ui_every = self.ui_every;
    }
}
