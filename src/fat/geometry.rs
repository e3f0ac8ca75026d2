use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{DIR_ENTRY_SIZE, SECTOR_SIZE};
use crate::error::MkfatError;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Upper bound on FAT-size fixed-point iterations.
pub const MAX_LAYOUT_ITERATIONS: usize = 8;

/// Cluster-count limits that define each variant.
const FAT12_MAX_CLUSTERS: u64 = 4084;
const FAT16_MIN_CLUSTERS: u64 = 4085;
const FAT16_MAX_CLUSTERS: u64 = 65524;
const FAT32_MIN_CLUSTERS: u64 = 65525;
const FAT32_MAX_CLUSTERS: u64 = 0x0FFF_FFF5;

const FAT32_RESERVED_SECTORS: u16 = 32;

/// FAT variant, named by entry width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    pub fn bits(self) -> u32 {
        match self {
            FatType::Fat12 => 12,
            FatType::Fat16 => 16,
            FatType::Fat32 => 32,
        }
    }

    /// The 8-byte filesystem type string stored in the extended boot record.
    pub fn fs_type_label(self) -> &'static [u8; 8] {
        match self {
            FatType::Fat12 => b"FAT12   ",
            FatType::Fat16 => b"FAT16   ",
            FatType::Fat32 => b"FAT32   ",
        }
    }

    /// Bytes a FAT needs to describe `clusters` data clusters plus the two
    /// reserved entries.
    pub fn fat_bytes_for(self, clusters: u64) -> u64 {
        let entries = clusters + 2;
        match self {
            FatType::Fat12 => (entries * 3 + 1) / 2,
            FatType::Fat16 => entries * 2,
            FatType::Fat32 => entries * 4,
        }
    }

    fn cluster_range(self) -> RangeInclusive<u64> {
        match self {
            FatType::Fat12 => 1..=FAT12_MAX_CLUSTERS,
            FatType::Fat16 => FAT16_MIN_CLUSTERS..=FAT16_MAX_CLUSTERS,
            FatType::Fat32 => FAT32_MIN_CLUSTERS..=FAT32_MAX_CLUSTERS,
        }
    }
}

impl fmt::Display for FatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FAT{}", self.bits())
    }
}

impl FromStr for FatType {
    type Err = MkfatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.trim_start_matches("fat") {
            "12" => Ok(FatType::Fat12),
            "16" => Ok(FatType::Fat16),
            "32" => Ok(FatType::Fat32),
            _ => Err(MkfatError::Config(format!(
                "unknown FAT variant '{s}' (expected 12, 16 or 32)"
            ))),
        }
    }
}

/// Caller-supplied CHS overrides. Any `Some` value replaces the preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryOverrides {
    pub heads: Option<u16>,
    pub sectors_per_track: Option<u16>,
    /// When set, total sectors become `cylinders * heads * sectors_per_track`.
    pub cylinders: Option<u32>,
}

/// BIOS parameter block values for a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub root_entries: u16,
    pub total_sectors_16: u16,
    pub media: u8,
    pub sectors_per_fat_16: u16,
    pub sectors_per_track: u16,
    pub heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    pub sectors_per_fat_32: u32,
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
}

impl Geometry {
    pub fn total_sectors(&self) -> u64 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u64
        } else {
            self.total_sectors_32 as u64
        }
    }

    pub fn sectors_per_fat(&self) -> u32 {
        if self.sectors_per_fat_16 != 0 {
            self.sectors_per_fat_16 as u32
        } else {
            self.sectors_per_fat_32
        }
    }

    fn set_total_sectors(&mut self, total: u32) {
        if total <= u16::MAX as u32 {
            self.total_sectors_16 = total as u16;
            self.total_sectors_32 = 0;
        } else {
            self.total_sectors_16 = 0;
            self.total_sectors_32 = total;
        }
    }
}

/// Derived region sizes, all in sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Layout {
    pub total_sectors: u64,
    pub reserved_sectors: u64,
    pub sectors_per_fat: u64,
    pub root_dir_sectors: u64,
    pub data_sectors: u64,
    pub cluster_count: u64,
}

/// A geometry together with its converged layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatPlan {
    pub fat_type: FatType,
    pub geometry: Geometry,
    pub layout: Layout,
}

impl FormatPlan {
    pub fn total_sectors(&self) -> u64 {
        self.layout.total_sectors
    }

    pub fn size_bytes(&self) -> u64 {
        self.layout.total_sectors * SECTOR_SIZE as u64
    }

    /// First sector of FAT copy `index` (0 or 1).
    pub fn fat_start(&self, index: u64) -> u64 {
        self.layout.reserved_sectors + index * self.layout.sectors_per_fat
    }

    pub fn root_dir_start(&self) -> u64 {
        self.fat_start(self.geometry.num_fats as u64)
    }

    pub fn data_start(&self) -> u64 {
        self.root_dir_start() + self.layout.root_dir_sectors
    }

    pub fn cluster_bytes(&self) -> u64 {
        self.geometry.sectors_per_cluster as u64 * SECTOR_SIZE as u64
    }

    /// Sector ranges holding filesystem metadata: boot sector, both FATs and
    /// the fixed root directory where one exists.
    pub fn system_ranges(&self) -> Vec<RangeInclusive<u64>> {
        let spf = self.layout.sectors_per_fat;
        let mut ranges = vec![0..=0];
        for copy in 0..self.geometry.num_fats as u64 {
            let start = self.fat_start(copy);
            ranges.push(start..=start + spf - 1);
        }
        if self.fat_type != FatType::Fat32 && self.layout.root_dir_sectors > 0 {
            let start = self.root_dir_start();
            ranges.push(start..=start + self.layout.root_dir_sectors - 1);
        }
        ranges
    }
}

// ---------------------------------------------------------------------------
// Presets
// ---------------------------------------------------------------------------

/// Historical floppy formats. These are reproduced exactly, FAT size included.
#[derive(Clone, Copy)]
struct FloppyPreset {
    size: u64,
    sectors_per_track: u16,
    root_entries: u16,
    sectors_per_cluster: u8,
    sectors_per_fat: u16,
    media: u8,
}

const FLOPPY_PRESETS: &[FloppyPreset] = &[
    FloppyPreset {
        size: 360 * KIB,
        sectors_per_track: 9,
        root_entries: 112,
        sectors_per_cluster: 2,
        sectors_per_fat: 2,
        media: 0xFD,
    },
    FloppyPreset {
        size: 720 * KIB,
        sectors_per_track: 9,
        root_entries: 112,
        sectors_per_cluster: 2,
        sectors_per_fat: 3,
        media: 0xF9,
    },
    FloppyPreset {
        size: 1200 * KIB,
        sectors_per_track: 15,
        root_entries: 224,
        sectors_per_cluster: 1,
        sectors_per_fat: 7,
        media: 0xF9,
    },
    FloppyPreset {
        size: 1440 * KIB,
        sectors_per_track: 18,
        root_entries: 224,
        sectors_per_cluster: 1,
        sectors_per_fat: 9,
        media: 0xF0,
    },
    FloppyPreset {
        size: 2880 * KIB,
        sectors_per_track: 36,
        root_entries: 240,
        sectors_per_cluster: 2,
        sectors_per_fat: 9,
        media: 0xF0,
    },
];

fn floppy_preset(fat_type: FatType, size: u64) -> Option<FloppyPreset> {
    if fat_type == FatType::Fat32 {
        return None;
    }
    let p = FLOPPY_PRESETS.iter().find(|p| p.size == size)?;
    // 2.88M carries a wider FAT when 16-bit entries are requested.
    let sectors_per_fat = if fat_type == FatType::Fat16 && size == 2880 * KIB {
        18
    } else {
        p.sectors_per_fat
    };
    Some(FloppyPreset {
        sectors_per_fat,
        ..*p
    })
}

/// Smallest power-of-two cluster that keeps a FAT12 volume under the
/// 12-bit cluster limit, leaving headroom for the FAT itself.
fn fat12_cluster_size(total_sectors: u64, overhead: u64) -> u8 {
    let data = total_sectors.saturating_sub(overhead);
    let mut spc: u64 = 1;
    while spc < 64 && data / spc >= FAT12_MAX_CLUSTERS - 16 {
        spc *= 2;
    }
    spc as u8
}

fn fat16_cluster_size(size: u64) -> u8 {
    match size {
        s if s <= 8 * MIB => 1,
        s if s <= 16 * MIB => 2,
        s if s <= 32 * MIB => 4,
        s if s <= 64 * MIB => 8,
        s if s <= 128 * MIB => 16,
        s if s <= 256 * MIB => 32,
        s if s <= GIB => 64,
        _ => 128,
    }
}

fn fat32_cluster_size(size: u64) -> u8 {
    match size {
        s if s <= 260 * MIB => 1,
        s if s <= 8 * GIB => 8,
        s if s <= 16 * GIB => 16,
        s if s <= 32 * GIB => 32,
        _ => 64,
    }
}

/// Starting point for a non-floppy volume. Cluster size is filled in once
/// the final sector count is known.
fn base_geometry(fat_type: FatType, size: u64) -> Result<Geometry, MkfatError> {
    let mut g = Geometry {
        bytes_per_sector: SECTOR_SIZE as u16,
        sectors_per_cluster: 1,
        reserved_sectors: 1,
        num_fats: 2,
        root_entries: 512,
        total_sectors_16: 0,
        media: 0xF0,
        sectors_per_fat_16: 0,
        sectors_per_track: 32,
        heads: 2,
        hidden_sectors: 0,
        total_sectors_32: 0,
        sectors_per_fat_32: 0,
        root_cluster: 0,
        fs_info_sector: 0,
        backup_boot_sector: 0,
    };
    match fat_type {
        FatType::Fat12 => {
            if size >= 16 * MIB {
                return Err(MkfatError::GeometryInfeasible(format!(
                    "unsupported size for FAT12: {} bytes (FAT12 volumes must be below 16 MiB)",
                    size
                )));
            }
            g.sectors_per_fat_16 = 16;
        }
        FatType::Fat16 => {
            if size > 2 * GIB {
                return Err(MkfatError::GeometryInfeasible(format!(
                    "unsupported size for FAT16: {} bytes (FAT16 volumes are limited to 2 GiB)",
                    size
                )));
            }
            g.sectors_per_fat_16 = 32;
            if size > 32 * MIB {
                g.media = 0xF8;
                g.sectors_per_track = 63;
                g.heads = 255;
            }
        }
        FatType::Fat32 => {
            g.media = 0xF8;
            g.root_entries = 0;
            g.reserved_sectors = FAT32_RESERVED_SECTORS;
            g.sectors_per_track = 63;
            g.heads = 255;
            g.root_cluster = 2;
            g.fs_info_sector = 1;
            g.backup_boot_sector = 6;
        }
    }
    Ok(g)
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Plan a volume of `size_bytes` for `fat_type`, honouring CHS overrides.
///
/// Floppy sizes get their historical geometry verbatim. Everything else
/// starts from a size-bracketed default and has its FAT size converged
/// against the resulting cluster count.
pub fn plan(
    fat_type: FatType,
    size_bytes: u64,
    overrides: &GeometryOverrides,
) -> Result<FormatPlan, MkfatError> {
    if size_bytes % SECTOR_SIZE as u64 != 0 {
        return Err(MkfatError::GeometryInfeasible(format!(
            "size {size_bytes} is not a multiple of {SECTOR_SIZE} bytes"
        )));
    }
    let preset = floppy_preset(fat_type, size_bytes);

    let mut geometry = match preset {
        Some(p) => Geometry {
            bytes_per_sector: SECTOR_SIZE as u16,
            sectors_per_cluster: p.sectors_per_cluster,
            reserved_sectors: 1,
            num_fats: 2,
            root_entries: p.root_entries,
            total_sectors_16: 0,
            media: p.media,
            sectors_per_fat_16: p.sectors_per_fat,
            sectors_per_track: p.sectors_per_track,
            heads: 2,
            hidden_sectors: 0,
            total_sectors_32: 0,
            sectors_per_fat_32: 0,
            root_cluster: 0,
            fs_info_sector: 0,
            backup_boot_sector: 0,
        },
        None => base_geometry(fat_type, size_bytes)?,
    };

    if let Some(heads) = overrides.heads {
        geometry.heads = heads;
    }
    if let Some(spt) = overrides.sectors_per_track {
        geometry.sectors_per_track = spt;
    }
    if geometry.heads == 0 || geometry.sectors_per_track == 0 {
        return Err(MkfatError::GeometryInfeasible(
            "heads and sectors per track must be non-zero".into(),
        ));
    }

    let total = match overrides.cylinders {
        Some(c) => c as u64 * geometry.heads as u64 * geometry.sectors_per_track as u64,
        None => size_bytes / SECTOR_SIZE as u64,
    };
    if total == 0 {
        return Err(MkfatError::GeometryInfeasible(
            "volume has no sectors".into(),
        ));
    }
    if total > u32::MAX as u64 {
        return Err(MkfatError::GeometryInfeasible(format!(
            "{total} sectors exceeds the 32-bit sector count limit"
        )));
    }
    geometry.set_total_sectors(total as u32);

    let exact_preset = preset.is_some() && total * SECTOR_SIZE as u64 == size_bytes;
    let root_dir_sectors = root_dir_sectors(geometry.root_entries);

    let layout = if exact_preset {
        let spf = geometry.sectors_per_fat_16 as u64;
        let overhead = geometry.reserved_sectors as u64 + 2 * spf + root_dir_sectors;
        let data = total.checked_sub(overhead).filter(|d| *d > 0).ok_or_else(|| {
            MkfatError::GeometryInfeasible("no room left for a data area".into())
        })?;
        let clusters = data / geometry.sectors_per_cluster as u64;
        // Floppy layouts are 12-bit sized whichever entry width is used.
        if !FatType::Fat12.cluster_range().contains(&clusters) {
            return Err(MkfatError::GeometryInfeasible(format!(
                "cluster count {clusters} is outside the floppy range"
            )));
        }
        Layout {
            total_sectors: total,
            reserved_sectors: geometry.reserved_sectors as u64,
            sectors_per_fat: spf,
            root_dir_sectors,
            data_sectors: data,
            cluster_count: clusters,
        }
    } else {
        if preset.is_none() {
            let bytes = total * SECTOR_SIZE as u64;
            geometry.sectors_per_cluster = match fat_type {
                FatType::Fat12 => fat12_cluster_size(
                    total,
                    geometry.reserved_sectors as u64 + root_dir_sectors,
                ),
                FatType::Fat16 => fat16_cluster_size(bytes),
                FatType::Fat32 => fat32_cluster_size(bytes),
            };
        }
        let layout = compute_layout(fat_type, &geometry)?;
        if fat_type == FatType::Fat32 {
            geometry.sectors_per_fat_16 = 0;
            geometry.sectors_per_fat_32 = layout.sectors_per_fat as u32;
        } else {
            geometry.sectors_per_fat_16 = u16::try_from(layout.sectors_per_fat).map_err(|_| {
                MkfatError::GeometryInfeasible(format!(
                    "{} sectors per FAT does not fit a 16-bit field",
                    layout.sectors_per_fat
                ))
            })?;
        }
        layout
    };

    log::debug!(
        "planned {}: {} sectors, {} sectors/cluster, {} sectors/FAT, {} clusters",
        fat_type,
        layout.total_sectors,
        geometry.sectors_per_cluster,
        layout.sectors_per_fat,
        layout.cluster_count
    );

    Ok(FormatPlan {
        fat_type,
        geometry,
        layout,
    })
}

fn root_dir_sectors(root_entries: u16) -> u64 {
    let bytes = root_entries as u64 * DIR_ENTRY_SIZE as u64;
    bytes.div_ceil(SECTOR_SIZE as u64)
}

fn fat_sectors_for(fat_type: FatType, clusters: u64) -> u64 {
    fat_type
        .fat_bytes_for(clusters)
        .div_ceil(SECTOR_SIZE as u64)
}

/// Converge the FAT size against the cluster count it has to describe.
///
/// Starts from the geometry's current sectors-per-FAT and iterates at most
/// [`MAX_LAYOUT_ITERATIONS`] times. If the sequence has not settled by then
/// the larger of the last two candidates is used, which always leaves the
/// FAT big enough.
pub fn compute_layout(fat_type: FatType, geometry: &Geometry) -> Result<Layout, MkfatError> {
    let total = geometry.total_sectors();
    let reserved = geometry.reserved_sectors as u64;
    let num_fats = geometry.num_fats as u64;
    let spc = geometry.sectors_per_cluster as u64;
    let root_dir = root_dir_sectors(geometry.root_entries);

    if spc == 0 {
        return Err(MkfatError::GeometryInfeasible(
            "sectors per cluster must be non-zero".into(),
        ));
    }
    if fat_type == FatType::Fat32 && reserved < FAT32_RESERVED_SECTORS as u64 {
        return Err(MkfatError::GeometryInfeasible(format!(
            "FAT32 needs at least {FAT32_RESERVED_SECTORS} reserved sectors, got {reserved}"
        )));
    }

    let data_for = |spf: u64| -> Result<u64, MkfatError> {
        total
            .checked_sub(reserved + num_fats * spf + root_dir)
            .filter(|d| *d > 0)
            .ok_or_else(|| {
                MkfatError::GeometryInfeasible(format!(
                    "{total} sectors leave no room for a data area"
                ))
            })
    };

    let mut spf = geometry.sectors_per_fat().max(1) as u64;
    let mut previous = spf;
    let mut settled = false;
    for _ in 0..MAX_LAYOUT_ITERATIONS {
        let clusters = data_for(spf)? / spc;
        let needed = fat_sectors_for(fat_type, clusters);
        if needed == spf {
            settled = true;
            break;
        }
        previous = spf;
        spf = needed;
    }
    if !settled {
        spf = spf.max(previous);
    }

    let data = data_for(spf)?;
    let clusters = data / spc;
    if fat_sectors_for(fat_type, clusters) > spf {
        return Err(MkfatError::GeometryInfeasible(format!(
            "FAT size did not converge for {total} sectors"
        )));
    }

    let range = fat_type.cluster_range();
    if !range.contains(&clusters) {
        return Err(MkfatError::GeometryInfeasible(format!(
            "{clusters} clusters is invalid for {fat_type} (valid range {}..={})",
            range.start(),
            range.end()
        )));
    }

    Ok(Layout {
        total_sectors: total,
        reserved_sectors: reserved,
        sectors_per_fat: spf,
        root_dir_sectors: root_dir,
        data_sectors: data,
        cluster_count: clusters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_overrides() -> GeometryOverrides {
        GeometryOverrides::default()
    }

    fn assert_layout_sums(p: &FormatPlan) {
        let l = &p.layout;
        assert_eq!(
            l.reserved_sectors + 2 * l.sectors_per_fat + l.root_dir_sectors + l.data_sectors,
            l.total_sectors
        );
        assert_eq!(l.cluster_count, l.data_sectors / p.geometry.sectors_per_cluster as u64);
    }

    #[test]
    fn test_fat_type_from_str() {
        assert_eq!("12".parse::<FatType>().unwrap(), FatType::Fat12);
        assert_eq!("fat16".parse::<FatType>().unwrap(), FatType::Fat16);
        assert_eq!("FAT32".parse::<FatType>().unwrap(), FatType::Fat32);
        assert!("64".parse::<FatType>().is_err());
    }

    #[test]
    fn test_floppy_presets_exact() {
        let cases = [
            (360 * KIB, 9, 112, 2, 2),
            (720 * KIB, 9, 112, 2, 3),
            (1200 * KIB, 15, 224, 1, 7),
            (1440 * KIB, 18, 224, 1, 9),
            (2880 * KIB, 36, 240, 2, 9),
        ];
        for (size, spt, root, spc, spf) in cases {
            let p = plan(FatType::Fat12, size, &no_overrides()).unwrap();
            assert_eq!(p.geometry.sectors_per_track, spt, "size {size}");
            assert_eq!(p.geometry.root_entries, root, "size {size}");
            assert_eq!(p.geometry.sectors_per_cluster, spc, "size {size}");
            assert_eq!(p.geometry.sectors_per_fat_16, spf, "size {size}");
            assert_eq!(p.geometry.heads, 2);
            assert_eq!(p.geometry.total_sectors_16 as u64, size / 512);
            assert_eq!(p.geometry.total_sectors_32, 0);
            assert_layout_sums(&p);
        }
    }

    #[test]
    fn test_fat16_floppy_presets() {
        let p = plan(FatType::Fat16, 1440 * KIB, &no_overrides()).unwrap();
        assert_eq!(p.geometry.sectors_per_track, 18);
        assert_eq!(p.geometry.root_entries, 224);
        assert_eq!(p.geometry.sectors_per_fat_16, 9);

        let p = plan(FatType::Fat16, 2880 * KIB, &no_overrides()).unwrap();
        assert_eq!(p.geometry.sectors_per_fat_16, 18);
        assert_layout_sums(&p);
    }

    #[test]
    fn test_layout_validity_across_sizes() {
        let cases: &[(FatType, u64)] = &[
            (FatType::Fat12, MIB),
            (FatType::Fat12, 2 * MIB),
            (FatType::Fat12, 4 * MIB),
            (FatType::Fat12, 10 * MIB),
            (FatType::Fat12, 16 * MIB - 512),
            (FatType::Fat16, 4 * MIB),
            (FatType::Fat16, 8 * MIB),
            (FatType::Fat16, 20 * MIB),
            (FatType::Fat16, 32 * MIB),
            (FatType::Fat16, 100 * MIB),
            (FatType::Fat16, 2 * GIB),
            (FatType::Fat32, 64 * MIB),
            (FatType::Fat32, 300 * MIB),
            (FatType::Fat32, 4 * GIB),
            (FatType::Fat32, 64 * GIB),
        ];
        for &(fat_type, size) in cases {
            let p = plan(fat_type, size, &no_overrides())
                .unwrap_or_else(|e| panic!("{fat_type} {size}: {e}"));
            assert_layout_sums(&p);
            assert!(
                fat_type.cluster_range().contains(&p.layout.cluster_count),
                "{fat_type} {size}: {} clusters",
                p.layout.cluster_count
            );
            assert!(
                fat_sectors_for(fat_type, p.layout.cluster_count) <= p.layout.sectors_per_fat,
                "{fat_type} {size}: FAT too small"
            );
        }
    }

    #[test]
    fn test_fat32_fields() {
        let p = plan(FatType::Fat32, 64 * MIB, &no_overrides()).unwrap();
        let g = &p.geometry;
        assert_eq!(g.root_entries, 0);
        assert_eq!(g.reserved_sectors, 32);
        assert_eq!(g.media, 0xF8);
        assert_eq!(g.root_cluster, 2);
        assert_eq!(g.fs_info_sector, 1);
        assert_eq!(g.backup_boot_sector, 6);
        assert_eq!(g.sectors_per_fat_16, 0);
        assert_eq!(g.sectors_per_fat_32 as u64, p.layout.sectors_per_fat);
        assert_eq!(g.total_sectors_16, 0);
        assert_eq!(g.total_sectors_32, 131072);
        assert_eq!(p.layout.root_dir_sectors, 0);
    }

    #[test]
    fn test_fat32_cluster_brackets() {
        assert_eq!(fat32_cluster_size(200 * MIB), 1);
        assert_eq!(fat32_cluster_size(8 * GIB), 8);
        assert_eq!(fat32_cluster_size(16 * GIB), 16);
        assert_eq!(fat32_cluster_size(32 * GIB), 32);
        assert_eq!(fat32_cluster_size(33 * GIB), 64);
    }

    #[test]
    fn test_unsupported_sizes() {
        assert!(matches!(
            plan(FatType::Fat12, 32 * MIB, &no_overrides()),
            Err(MkfatError::GeometryInfeasible(_))
        ));
        assert!(matches!(
            plan(FatType::Fat16, 3 * GIB, &no_overrides()),
            Err(MkfatError::GeometryInfeasible(_))
        ));
        // Too few clusters for FAT32.
        assert!(matches!(
            plan(FatType::Fat32, 16 * MIB, &no_overrides()),
            Err(MkfatError::GeometryInfeasible(_))
        ));
        // Too few clusters for FAT16.
        assert!(matches!(
            plan(FatType::Fat16, MIB, &no_overrides()),
            Err(MkfatError::GeometryInfeasible(_))
        ));
        assert!(plan(FatType::Fat12, 0, &no_overrides()).is_err());
        assert!(plan(FatType::Fat12, 1440 * KIB + 100, &no_overrides()).is_err());
    }

    #[test]
    fn test_overrides_replace_chs() {
        let ov = GeometryOverrides {
            heads: Some(4),
            sectors_per_track: Some(17),
            cylinders: None,
        };
        let p = plan(FatType::Fat12, 1440 * KIB, &ov).unwrap();
        assert_eq!(p.geometry.heads, 4);
        assert_eq!(p.geometry.sectors_per_track, 17);
        assert_eq!(p.total_sectors(), 2880);
    }

    #[test]
    fn test_cylinders_override_total() {
        let ov = GeometryOverrides {
            heads: Some(2),
            sectors_per_track: Some(18),
            cylinders: Some(80),
        };
        let p = plan(FatType::Fat12, 1440 * KIB, &ov).unwrap();
        assert_eq!(p.total_sectors(), 2880);
        assert_eq!(p.geometry.sectors_per_fat_16, 9);

        // A different cylinder count leaves the preset and converges instead.
        let ov = GeometryOverrides {
            cylinders: Some(40),
            ..ov
        };
        let p = plan(FatType::Fat12, 1440 * KIB, &ov).unwrap();
        assert_eq!(p.total_sectors(), 1440);
        assert_layout_sums(&p);
    }

    #[test]
    fn test_total_sectors_field_choice() {
        let small = plan(FatType::Fat16, 16 * MIB, &no_overrides()).unwrap();
        assert_eq!(small.geometry.total_sectors_16, 32768);
        assert_eq!(small.geometry.total_sectors_32, 0);

        let big = plan(FatType::Fat16, 64 * MIB, &no_overrides()).unwrap();
        assert_eq!(big.geometry.total_sectors_16, 0);
        assert_eq!(big.geometry.total_sectors_32, 131072);
    }

    #[test]
    fn test_compute_layout_rejects_thin_reserved_fat32() {
        let mut g = base_geometry(FatType::Fat32, 64 * MIB).unwrap();
        g.reserved_sectors = 1;
        g.set_total_sectors(131072);
        assert!(compute_layout(FatType::Fat32, &g).is_err());
    }

    #[test]
    fn test_compute_layout_no_data_area() {
        let mut g = base_geometry(FatType::Fat12, 16 * KIB).unwrap();
        g.set_total_sectors(32);
        assert!(matches!(
            compute_layout(FatType::Fat12, &g),
            Err(MkfatError::GeometryInfeasible(_))
        ));
    }

    #[test]
    fn test_system_ranges() {
        let p = plan(FatType::Fat12, 1440 * KIB, &no_overrides()).unwrap();
        assert_eq!(p.system_ranges(), vec![0..=0, 1..=9, 10..=18, 19..=32]);

        let p = plan(FatType::Fat32, 64 * MIB, &no_overrides()).unwrap();
        assert_eq!(p.system_ranges().len(), 3);
        assert_eq!(p.data_start(), p.root_dir_start());
    }
}
