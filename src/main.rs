use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

use rusty_mkfat::cancel::{install_interrupt_listener, CancelToken};
use rusty_mkfat::config::{parse_size, FormatConfig, Settings, SyncPolicy, Target};
use rusty_mkfat::copy::{copy_device_to_image, copy_image_to_device};
use rusty_mkfat::error::{exit_code_for, MkfatError};
use rusty_mkfat::fat::FatType;
use rusty_mkfat::format::run_format;
use rusty_mkfat::logger::{self, LOG_ENV};
use rusty_mkfat::progress::human_bytes;
use rusty_mkfat::render::ConsoleSurface;

const USAGE: &str = "\
Usage:
  rusty-mkfat format --size SIZE (--out FILE | --device DEV --force | --emulate) [options]
  rusty-mkfat copy dev2img --device DEV --out FILE --force [--block-size N]
  rusty-mkfat copy img2dev --in FILE --device DEV --force [--block-size N]
  rusty-mkfat settings [--init]
  rusty-mkfat --version

Format options:
  --type fat12|fat16|fat32   FAT variant (default from settings, fat12)
  --size SIZE                volume size, e.g. 360k, 1440k, 32m, 2g
  --label LABEL              volume label, up to 11 characters
  --oem NAME                 OEM name, up to 8 characters
  --heads N, --spt N         override heads and sectors per track
  --tracks N                 override cylinders; total = tracks * heads * spt
  --full                     also clear the data area
  --sync sector|track|phase|none
                             flush policy (sector also checks every sector)
  --verify                   with --full and a non-sector sync, read back
                             one sector per track when done
  --serial XXXX-XXXX         fixed volume serial
  --rate BYTES               emulation speed in bytes per second
  --ui-every N               sectors between progress refreshes
  --json                     print the run report as JSON

Global options:
  -v, --verbose              debug logging
  -q, --quiet                warnings and errors only
";

#[derive(Debug, PartialEq)]
enum Direction {
    DeviceToImage,
    ImageToDevice,
}

#[derive(Debug, PartialEq)]
struct CopyArgs {
    direction: Direction,
    device: PathBuf,
    file: PathBuf,
    block_size: usize,
}

#[derive(Debug, PartialEq)]
enum Command {
    Format { cfg: FormatConfig, json: bool },
    Copy(CopyArgs),
    Settings { init: bool },
    Help,
    Version,
}

fn is_global_flag(arg: &str) -> bool {
    matches!(arg, "-v" | "--verbose" | "-q" | "--quiet")
}

/// Split `--flag=value` into its parts.
fn split_flag(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('=') {
        Some((flag, value)) if flag.starts_with("--") => (flag, Some(value)),
        _ => (arg, None),
    }
}

fn take_value<'a>(
    flag: &str,
    inline: Option<&'a str>,
    rest: &mut impl Iterator<Item = &'a str>,
) -> Result<&'a str, MkfatError> {
    inline
        .or_else(|| rest.next())
        .ok_or_else(|| MkfatError::Config(format!("{flag} needs a value")))
}

fn parse_number<T: FromStr>(flag: &str, value: &str) -> Result<T, MkfatError> {
    value
        .trim()
        .parse()
        .map_err(|_| MkfatError::Config(format!("invalid value '{value}' for {flag}")))
}

/// Accepts `1234-ABCD`, `0x1234ABCD` or bare hex.
fn parse_serial(value: &str) -> Result<u32, MkfatError> {
    let hex: String = value
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| *c != '-')
        .collect();
    if hex.is_empty() || hex.len() > 8 {
        return Err(MkfatError::Config(format!("invalid serial '{value}'")));
    }
    u32::from_str_radix(&hex, 16).map_err(|_| MkfatError::Config(format!("invalid serial '{value}'")))
}

fn set_target(slot: &mut Option<Target>, target: Target) -> Result<(), MkfatError> {
    if slot.is_some() {
        return Err(MkfatError::Config(
            "only one of --out, --device and --emulate may be given".into(),
        ));
    }
    *slot = Some(target);
    Ok(())
}

fn parse_format(args: &[String], settings: &Settings) -> Result<Command, MkfatError> {
    let mut fat_type = settings.fat_type;
    let mut size = None;
    let mut target = None;
    let mut label = None;
    let mut oem = None;
    let mut heads: Option<u16> = None;
    let mut spt: Option<u16> = None;
    let mut tracks: Option<u32> = None;
    let mut full = false;
    let mut sync: Option<SyncPolicy> = None;
    let mut verify = false;
    let mut force = false;
    let mut serial = None;
    let mut rate: Option<f64> = None;
    let mut ui_every: Option<u64> = None;
    let mut json = false;

    let mut rest = args.iter().map(String::as_str);
    while let Some(arg) = rest.next() {
        if is_global_flag(arg) {
            continue;
        }
        let (flag, inline) = split_flag(arg);
        match flag {
            "--type" | "-t" => fat_type = take_value(flag, inline, &mut rest)?.parse::<FatType>()?,
            "--size" | "-s" => size = Some(parse_size(take_value(flag, inline, &mut rest)?)?),
            "--out" | "-o" => {
                let path = take_value(flag, inline, &mut rest)?;
                set_target(&mut target, Target::Image(PathBuf::from(path)))?;
            }
            "--device" | "-d" => {
                let path = take_value(flag, inline, &mut rest)?;
                set_target(&mut target, Target::Device(PathBuf::from(path)))?;
            }
            "--emulate" => set_target(&mut target, Target::Emulate)?,
            "--force" | "-f" => force = true,
            "--label" => label = Some(take_value(flag, inline, &mut rest)?.to_string()),
            "--oem" => oem = Some(take_value(flag, inline, &mut rest)?.to_string()),
            "--heads" => heads = Some(parse_number(flag, take_value(flag, inline, &mut rest)?)?),
            "--spt" => spt = Some(parse_number(flag, take_value(flag, inline, &mut rest)?)?),
            "--tracks" | "--cylinders" => {
                tracks = Some(parse_number(flag, take_value(flag, inline, &mut rest)?)?)
            }
            "--full" => full = true,
            "--sync" => sync = Some(take_value(flag, inline, &mut rest)?.parse::<SyncPolicy>()?),
            "--verify" => verify = true,
            "--serial" => serial = Some(parse_serial(take_value(flag, inline, &mut rest)?)?),
            "--rate" => rate = Some(parse_number(flag, take_value(flag, inline, &mut rest)?)?),
            "--ui-every" => {
                ui_every = Some(parse_number(flag, take_value(flag, inline, &mut rest)?)?)
            }
            "--json" => json = true,
            other => {
                return Err(MkfatError::Config(format!(
                    "unknown option '{other}' for format"
                )))
            }
        }
    }

    let size = size.ok_or_else(|| MkfatError::Config("--size is required".into()))?;
    let target = target.ok_or_else(|| {
        MkfatError::Config("one of --out, --device or --emulate is required".into())
    })?;

    let mut cfg = FormatConfig::new(fat_type, size, target);
    settings.apply(&mut cfg);
    if let Some(label) = label {
        cfg.label = label;
    }
    if let Some(oem) = oem {
        cfg.oem = oem;
    }
    cfg.overrides.heads = heads;
    cfg.overrides.sectors_per_track = spt;
    cfg.overrides.cylinders = tracks;
    cfg.full = full;
    if let Some(sync) = sync {
        cfg.sync = sync;
    }
    cfg.verify |= verify;
    cfg.force = force;
    cfg.serial = serial;
    cfg.emulate_rate = rate;
    if let Some(n) = ui_every {
        cfg.ui_every = n;
    }
    Ok(Command::Format { cfg, json })
}

fn parse_copy(args: &[String], settings: &Settings) -> Result<Command, MkfatError> {
    let mut rest = args.iter().map(String::as_str);
    let direction = match rest.next() {
        Some("dev2img") => Direction::DeviceToImage,
        Some("img2dev") => Direction::ImageToDevice,
        Some(other) => {
            return Err(MkfatError::Config(format!(
                "unknown copy direction '{other}' (expected dev2img or img2dev)"
            )))
        }
        None => return Err(MkfatError::Config("copy needs dev2img or img2dev".into())),
    };

    let mut device = None;
    let mut file = None;
    let mut block_size = settings.copy_block_size;
    let mut force = false;
    while let Some(arg) = rest.next() {
        if is_global_flag(arg) {
            continue;
        }
        let (flag, inline) = split_flag(arg);
        match flag {
            "--device" | "-d" => {
                device = Some(PathBuf::from(take_value(flag, inline, &mut rest)?))
            }
            "--out" | "-o" | "--in" | "-i" | "--image" => {
                file = Some(PathBuf::from(take_value(flag, inline, &mut rest)?))
            }
            "--block-size" | "--block" | "-b" => {
                let value = take_value(flag, inline, &mut rest)?;
                block_size = parse_size(value)? as usize;
            }
            "--force" | "-f" => force = true,
            other => {
                return Err(MkfatError::Config(format!("unknown option '{other}' for copy")))
            }
        }
    }

    let device = device.ok_or_else(|| MkfatError::Config("--device is required".into()))?;
    let file = file.ok_or_else(|| {
        let flag = match direction {
            Direction::DeviceToImage => "--out",
            Direction::ImageToDevice => "--in",
        };
        MkfatError::Config(format!("{flag} is required"))
    })?;
    if !force {
        return Err(MkfatError::Config(
            "raw device copies require --force".into(),
        ));
    }
    if block_size == 0 {
        return Err(MkfatError::Config("block size must be positive".into()));
    }
    Ok(Command::Copy(CopyArgs {
        direction,
        device,
        file,
        block_size,
    }))
}

fn parse_command(args: &[String], settings: &Settings) -> Result<Command, MkfatError> {
    let Some(first) = args.iter().find(|a| !is_global_flag(a)) else {
        return Ok(Command::Help);
    };
    let pos = args.iter().position(|a| a == first).unwrap_or(0);
    let rest = &args[pos + 1..];
    match first.as_str() {
        "format" => parse_format(rest, settings),
        "copy" => parse_copy(rest, settings),
        "settings" => Ok(Command::Settings {
            init: rest.iter().any(|a| a == "--init"),
        }),
        "help" | "-h" | "--help" => Ok(Command::Help),
        "version" | "-V" | "--version" => Ok(Command::Version),
        other => Err(MkfatError::Config(format!(
            "unknown command '{other}' (try --help)"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_format(cfg: &FormatConfig, json: bool) -> Result<()> {
    let cancel = CancelToken::new();
    install_interrupt_listener(cancel.clone())?;

    let mut surface = ConsoleSurface::new();
    let result = run_format(cfg, &mut surface, &cancel);
    surface.finish();
    let report = result?;

    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }
    println!();
    for line in report.summary_lines() {
        println!("{line}");
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    println!();
    println!("{}", report.ready_line());
    Ok(())
}

fn cmd_copy(args: &CopyArgs) -> Result<()> {
    let cancel = CancelToken::new();
    install_interrupt_listener(cancel.clone())?;

    let mut last_pct = u64::MAX;
    let mut report = |done: u64, total: u64| {
        let pct = if total == 0 { 100 } else { done * 100 / total };
        if pct != last_pct {
            last_pct = pct;
            eprint!(
                "\r{:3}%  {} / {}",
                pct,
                human_bytes(done),
                human_bytes(total)
            );
        }
    };

    let copied = match args.direction {
        Direction::DeviceToImage => {
            copy_device_to_image(&args.device, &args.file, args.block_size, &cancel, &mut report)
        }
        Direction::ImageToDevice => {
            copy_image_to_device(&args.file, &args.device, args.block_size, &cancel, &mut report)
        }
    };
    eprintln!();
    let copied = copied?;
    println!("Copied {} ({} bytes).", human_bytes(copied), copied);
    Ok(())
}

fn cmd_settings(settings: &Settings, init: bool) -> Result<()> {
    if init {
        settings.save()?;
    }
    if let Some(path) = Settings::user_config_path() {
        println!("# {}", path.display());
    }
    println!(
        "{}",
        serde_json::to_string_pretty(settings).context("failed to serialize settings")?
    );
    Ok(())
}

fn run(args: &[String]) -> Result<()> {
    let verbose = args.iter().any(|a| a == "-v" || a == "--verbose");
    let quiet = args.iter().any(|a| a == "-q" || a == "--quiet");
    let env_level = env::var(LOG_ENV).ok();
    logger::init(logger::resolve_level(verbose, quiet, env_level.as_deref(), "info"))?;

    let settings = Settings::load();
    if !verbose && !quiet && env_level.is_none() {
        log::set_max_level(logger::resolve_level(false, false, None, &settings.log_level));
    }

    match parse_command(args, &settings)? {
        Command::Format { cfg, json } => cmd_format(&cfg, json),
        Command::Copy(copy) => cmd_copy(&copy),
        Command::Settings { init } => cmd_settings(&settings, init),
        Command::Help => {
            print!("{USAGE}");
            Ok(())
        }
        Command::Version => {
            println!("rusty-mkfat {}", env!("APP_VERSION"));
            Ok(())
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if let Err(e) = run(&args) {
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code_for(&e));
    }
}
