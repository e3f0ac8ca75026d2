//! End-to-end format run: validate, plan, open the target, write, report.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::cancel::CancelToken;
use crate::config::{FormatConfig, Target};
use crate::fat;
use crate::fat::encode::VolumeIdentity;
use crate::os;
use crate::progress::{human_bytes, ProgressModel, RunMode, SystemRanges};
use crate::render::RenderSurface;
use crate::report::FormatReport;
use crate::write::{
    default_emulate_rate, format_volume, FileTarget, FormatOptions, NullTarget,
};

/// Create (or truncate) an image file and size it to the volume.
fn create_image(path: &Path, size: u64) -> Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to create image {}", path.display()))?;
    file.set_len(size)
        .with_context(|| format!("failed to size image {} to {} bytes", path.display(), size))?;
    Ok(file)
}

fn emulate_rate(cfg: &FormatConfig) -> f64 {
    cfg.emulate_rate.unwrap_or_else(|| default_emulate_rate(cfg.size))
}

/// Plan and write a volume as described by `cfg`.
///
/// Configuration and geometry problems are reported before any file or
/// device is touched.
pub fn run_format(
    cfg: &FormatConfig,
    surface: &mut dyn RenderSurface,
    cancel: &CancelToken,
) -> Result<FormatReport> {
    cfg.validate()?;
    let plan = fat::plan(cfg.fat_type, cfg.size, &cfg.overrides)?;
    let identity = VolumeIdentity::new(&cfg.oem, &cfg.label, cfg.volume_serial());

    let mut warnings = Vec::new();
    if plan.size_bytes() != cfg.size {
        let msg = format!(
            "track override gives {} bytes instead of the requested {}",
            plan.size_bytes(),
            cfg.size
        );
        log::warn!("{msg}");
        warnings.push(msg);
    }

    let emulated = matches!(cfg.target, Target::Emulate);
    let mode = if emulated {
        RunMode::Emulate {
            bytes_per_sec: emulate_rate(cfg),
        }
    } else {
        RunMode::Real
    };
    let title = format!(
        "{} format of {} ({})",
        plan.fat_type,
        cfg.target.describe(),
        human_bytes(plan.size_bytes())
    );
    let opts = FormatOptions {
        identity: identity.clone(),
        full: cfg.full,
        sync: cfg.sync,
        verify: cfg.verify,
        ui_every: cfg.ui_every,
    };
    let progress = ProgressModel::new(
        title,
        &opts.phase_names(!emulated),
        plan.total_sectors(),
        SystemRanges::new(plan.system_ranges()),
        mode,
    );

    log::info!(
        "Formatting {} as {}: {} sectors, {} clusters of {} bytes",
        cfg.target.describe(),
        plan.fat_type,
        plan.total_sectors(),
        plan.layout.cluster_count,
        plan.cluster_bytes()
    );

    let started = Instant::now();
    let outcome = match &cfg.target {
        Target::Image(path) => {
            let file = create_image(path, plan.size_bytes())?;
            let mut target = FileTarget::new(file);
            format_volume(&mut target, &plan, &opts, &progress, surface, cancel)
                .with_context(|| format!("formatting {} failed", path.display()))?
        }
        Target::Device(path) => {
            let mut target = os::open_device(path)?;
            if let Some(msg) = os::check_capacity(target.size(), plan.size_bytes())? {
                log::warn!("{msg}");
                warnings.push(msg);
            }
            format_volume(&mut target, &plan, &opts, &progress, surface, cancel)
                .with_context(|| format!("formatting {} failed", path.display()))?
        }
        Target::Emulate => {
            let mut target = NullTarget::paced(emulate_rate(cfg));
            format_volume(&mut target, &plan, &opts, &progress, surface, cancel)?
        }
    };
    progress.publish(surface);

    if !outcome.bad_sectors.is_empty() {
        warnings.push(format!("{} bad sector(s) found", outcome.bad_sectors.len()));
    }
    if !outcome.verify_failures.is_empty() {
        warnings.push(format!(
            "{} track(s) failed read verification",
            outcome.verify_failures.len()
        ));
    }

    Ok(FormatReport::new(
        &plan,
        &identity,
        cfg.target.describe(),
        outcome,
        warnings,
        started.elapsed(),
        emulated,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{exit_code_for, MkfatError};
    use crate::fat::FatType;
    use crate::render::NullSurface;
    use tempfile::TempDir;

    fn image_config(path: &Path) -> FormatConfig {
        let mut cfg = FormatConfig::new(FatType::Fat12, 1440 * 1024, Target::Image(path.into()));
        cfg.serial = Some(0x1234_5678);
        cfg
    }

    #[test]
    fn test_image_is_created_and_sized() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub").join("a.img");
        let report = run_format(&image_config(&path), &mut NullSurface, &CancelToken::new()).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 1_474_560);
        assert_eq!(report.total_sectors, 2880);
        assert!(report.warnings.is_empty());
        assert!(!report.emulated);
    }

    #[test]
    fn test_invalid_config_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("never.img");
        let mut cfg = image_config(&path);
        cfg.label = "FAR TOO LONG LABEL".into();
        let err = run_format(&cfg, &mut NullSurface, &CancelToken::new()).unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
        assert!(!path.exists());
    }

    #[test]
    fn test_infeasible_geometry_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("never.img");
        let mut cfg = image_config(&path);
        cfg.fat_type = FatType::Fat32;
        let err = run_format(&cfg, &mut NullSurface, &CancelToken::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MkfatError>(),
            Some(MkfatError::GeometryInfeasible(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_cancelled_run_exits_130() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("c.img");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run_format(&image_config(&path), &mut NullSurface, &cancel).unwrap_err();
        assert_eq!(exit_code_for(&err), 130);
    }

    #[test]
    fn test_emulated_run() {
        let mut cfg = FormatConfig::new(FatType::Fat12, 360 * 1024, Target::Emulate);
        cfg.serial = Some(1);
        cfg.emulate_rate = Some(1e12);
        let report = run_format(&cfg, &mut NullSurface, &CancelToken::new()).unwrap();
        assert!(report.emulated);
        assert_eq!(report.total_sectors, 720);
        assert!(!report.verified);
    }

    #[test]
    fn test_quick_format_with_verify_reads_nothing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("q.img");
        let mut cfg = image_config(&path);
        cfg.verify = true;
        let report = run_format(&cfg, &mut NullSurface, &CancelToken::new()).unwrap();
        assert!(!report.verified);
        assert!(report.verify_failures.is_empty());
    }
}
