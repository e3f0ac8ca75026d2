//! FAT12/16/32 volume planning and on-disk structure encoding.
//!
//! `geometry` decides how a volume of a given size is laid out; `encode`
//! turns that plan into the exact bytes of the reserved and system regions.

pub mod encode;
pub mod geometry;

pub use geometry::{plan, FatType, FormatPlan, Geometry, GeometryOverrides, Layout};

/// Bytes per logical sector. Every structure this crate writes assumes it.
pub const SECTOR_SIZE: usize = 512;

/// Size of one directory entry.
pub const DIR_ENTRY_SIZE: usize = 32;
