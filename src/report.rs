//! Post-run summary: geometry block, region map and the JSON run report.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::fat::encode::VolumeIdentity;
use crate::fat::{FatType, FormatPlan, Geometry};
use crate::write::FormatOutcome;

const RULE_HEAVY: &str =
    "========================================================================";
const RULE_LIGHT: &str =
    "------------------------------------------------------------------------";

/// Machine-readable result of a format run.
#[derive(Debug, Clone, Serialize)]
pub struct FormatReport {
    pub fat_type: FatType,
    pub target: String,
    pub bytes: u64,
    pub total_sectors: u64,
    pub cluster_bytes: u64,
    pub clusters: u64,
    pub fat_sectors: u64,
    pub root_dir_sectors: u64,
    pub data_sectors: u64,
    pub geometry: Geometry,
    pub oem: String,
    pub label: String,
    /// Volume serial as `XXXX-XXXX`.
    pub serial: String,
    pub bad_sectors: Vec<u64>,
    pub verify_failures: Vec<u64>,
    pub verified: bool,
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
    pub emulated: bool,
    #[serde(skip)]
    pub plan: FormatPlan,
    #[serde(skip)]
    pub identity: VolumeIdentity,
}

impl FormatReport {
    pub fn new(
        plan: &FormatPlan,
        identity: &VolumeIdentity,
        target: String,
        outcome: FormatOutcome,
        warnings: Vec<String>,
        elapsed: Duration,
        emulated: bool,
    ) -> Self {
        Self {
            fat_type: plan.fat_type,
            target,
            bytes: plan.size_bytes(),
            total_sectors: plan.total_sectors(),
            cluster_bytes: plan.cluster_bytes(),
            clusters: plan.layout.cluster_count,
            fat_sectors: plan.layout.sectors_per_fat,
            root_dir_sectors: plan.layout.root_dir_sectors,
            data_sectors: plan.layout.data_sectors,
            geometry: plan.geometry.clone(),
            oem: field_text(&identity.oem),
            label: field_text(&identity.label),
            serial: format!("{:04X}-{:04X}", identity.serial >> 16, identity.serial & 0xFFFF),
            bad_sectors: outcome.bad_sectors,
            verify_failures: outcome.verify_failures,
            verified: outcome.verified,
            warnings,
            elapsed_ms: elapsed.as_millis() as u64,
            emulated,
            plan: plan.clone(),
            identity: identity.clone(),
        }
    }

    /// See [`geometry_summary`].
    pub fn summary_lines(&self) -> Vec<String> {
        geometry_summary(&self.plan, &self.identity)
    }

    /// The one-line completion notice.
    pub fn ready_line(&self) -> String {
        format!(
            "{} ready. bytes={} sectors={} clusterSize={}B clusters={} fatSectors={} rootDirSectors={} dataSectors={} emulate={}",
            self.fat_type,
            self.bytes,
            self.total_sectors,
            self.cluster_bytes,
            self.clusters,
            self.fat_sectors,
            self.root_dir_sectors,
            self.data_sectors,
            self.emulated
        )
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize run report")
    }
}

fn field_text(field: &[u8]) -> String {
    String::from_utf8_lossy(field).trim_end().to_string()
}

fn sector_range(start: u64, end: u64) -> String {
    if end <= start {
        format!("[{start:06}]")
    } else {
        format!("[{start:06} .. {end:06}]")
    }
}

/// Human-readable geometry block followed by the absolute sector ranges of
/// every region.
pub fn geometry_summary(plan: &FormatPlan, identity: &VolumeIdentity) -> Vec<String> {
    let g = &plan.geometry;
    let l = &plan.layout;
    let per_cylinder = g.heads as u64 * g.sectors_per_track as u64;
    let cylinders = if per_cylinder > 0 {
        l.total_sectors / per_cylinder
    } else {
        0
    };
    let spc = g.sectors_per_cluster;
    let label = if identity.has_label {
        field_text(&identity.label)
    } else {
        "(none)".to_string()
    };

    let fat1 = plan.fat_start(0);
    let fat2 = plan.fat_start(1);
    let spf = l.sectors_per_fat;
    let data = plan.data_start();

    let mut lines = vec![
        RULE_HEAVY.to_string(),
        " GEOMETRY".to_string(),
        RULE_LIGHT.to_string(),
        format!(
            " Bytes/Sector: {:<4}  Sectors/Track: {:<2}  Heads: {:<3}  Cylinders: {}",
            g.bytes_per_sector, g.sectors_per_track, g.heads, cylinders
        ),
        format!(
            " Reserved: {:<4}  FATs: {:<2}  Root entries: {}",
            g.reserved_sectors, g.num_fats, g.root_entries
        ),
        format!(
            " Sectors/FAT: {:<6}  Root dir sectors: {:<5}  Data sectors: {}",
            spf, l.root_dir_sectors, l.data_sectors
        ),
        format!(
            " Cluster size: {} sector{} ({} bytes)  Total sectors: {}",
            spc,
            if spc == 1 { "" } else { "s" },
            plan.cluster_bytes(),
            l.total_sectors
        ),
        format!(" OEM: {}  Label: {}", field_text(&identity.oem), label),
        RULE_LIGHT.to_string(),
        " LAYOUT (absolute sector ranges)".to_string(),
        RULE_LIGHT.to_string(),
        format!(" Boot  : {}", sector_range(0, l.reserved_sectors - 1)),
        format!(
            " FAT #1: {}  FAT #2: {}",
            sector_range(fat1, fat1 + spf - 1),
            sector_range(fat2, fat2 + spf - 1)
        ),
    ];

    let data_range = sector_range(data, l.total_sectors.saturating_sub(1));
    if plan.fat_type == FatType::Fat32 {
        lines.push(format!(
            " Data  : {}  (root directory at cluster {})",
            data_range, g.root_cluster
        ));
    } else {
        let root = plan.root_dir_start();
        lines.push(format!(
            " Root  : {}  Data  : {}",
            sector_range(root, root + l.root_dir_sectors - 1),
            data_range
        ));
    }
    lines.push(RULE_HEAVY.to_string());
    lines
}
