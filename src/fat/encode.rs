//! Byte-exact encoders for boot sectors, FSInfo, FAT heads and the volume
//! label directory entry.

use byteorder::{ByteOrder, LittleEndian};

use super::geometry::{FatType, FormatPlan};
use super::{DIR_ENTRY_SIZE, SECTOR_SIZE};

pub const DEFAULT_OEM: &str = "EARMKFAT";
pub const DEFAULT_LABEL: &str = "NO NAME";

const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;

const FSINFO_LEAD_SIGNATURE: u32 = 0x4161_5252;
const FSINFO_STRUCT_SIGNATURE: u32 = 0x6141_7272;
const FSINFO_TRAIL_SIGNATURE: u32 = 0xAA55_0000;

const ATTR_VOLUME_ID: u8 = 0x08;

/// Real-mode stub that prints the "non-system disk" message and reboots on
/// a key press. Bytes 3..5 hold the message address and are patched per
/// variant.
const BOOT_CODE: [u8; 29] = [
    0x0E, // push cs
    0x1F, // pop ds
    0xBE, 0x00, 0x00, // mov si, <message>
    0xAC, // lodsb
    0x22, 0xC0, // and al, al
    0x74, 0x0B, // jz done
    0x56, // push si
    0xB4, 0x0E, // mov ah, 0x0E
    0xBB, 0x07, 0x00, // mov bx, 0x0007
    0xCD, 0x10, // int 0x10
    0x5E, // pop si
    0xEB, 0xF0, // jmp print
    0x32, 0xE4, // done: xor ah, ah
    0xCD, 0x16, // int 0x16
    0xCD, 0x19, // int 0x19
    0xEB, 0xFE, // jmp $
];

const BOOT_MESSAGE: &[u8] =
    b"Non-system disk or disk error\r\nReplace and press any key when ready\r\n\0";

/// Load address of the boot sector.
const BOOT_ORIGIN: u16 = 0x7C00;

/// Space-padded, fixed-width identity strings for the boot sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeIdentity {
    pub oem: [u8; 8],
    pub label: [u8; 11],
    pub serial: u32,
    /// Whether a label was given. Controls the root directory entry.
    pub has_label: bool,
}

impl VolumeIdentity {
    /// Empty `oem` or `label` fall back to the defaults. Longer values are
    /// truncated to the field width.
    pub fn new(oem: &str, label: &str, serial: u32) -> Self {
        let oem = if oem.is_empty() { DEFAULT_OEM } else { oem };
        let has_label = !label.trim().is_empty();
        let shown = if has_label { label } else { DEFAULT_LABEL };
        Self {
            oem: pad_field(oem),
            label: pad_field(shown),
            serial,
            has_label,
        }
    }
}

fn pad_field<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [b' '; N];
    for (dst, src) in out.iter_mut().zip(s.bytes()) {
        *dst = src;
    }
    out
}

fn boot_code_with_message(message_offset: usize) -> [u8; 29] {
    let mut code = BOOT_CODE;
    LittleEndian::write_u16(&mut code[3..5], BOOT_ORIGIN + message_offset as u16);
    code
}

/// Encode the boot sector (BPB, extended BPB, stub code, signature).
pub fn boot_sector(plan: &FormatPlan, id: &VolumeIdentity) -> [u8; SECTOR_SIZE] {
    let g = &plan.geometry;
    let mut sec = [0u8; SECTOR_SIZE];

    let is_fat32 = plan.fat_type == FatType::Fat32;
    sec[0..3].copy_from_slice(if is_fat32 {
        &[0xEB, 0x58, 0x90]
    } else {
        &[0xEB, 0x3C, 0x90]
    });
    sec[3..11].copy_from_slice(&id.oem);

    LittleEndian::write_u16(&mut sec[11..13], g.bytes_per_sector);
    sec[13] = g.sectors_per_cluster;
    LittleEndian::write_u16(&mut sec[14..16], g.reserved_sectors);
    sec[16] = g.num_fats;
    LittleEndian::write_u16(&mut sec[17..19], g.root_entries);
    LittleEndian::write_u16(&mut sec[19..21], g.total_sectors_16);
    sec[21] = g.media;
    LittleEndian::write_u16(&mut sec[22..24], g.sectors_per_fat_16);
    LittleEndian::write_u16(&mut sec[24..26], g.sectors_per_track);
    LittleEndian::write_u16(&mut sec[26..28], g.heads);
    LittleEndian::write_u32(&mut sec[28..32], g.hidden_sectors);
    LittleEndian::write_u32(&mut sec[32..36], g.total_sectors_32);

    // Extended BPB position differs: FAT32 inserts 28 bytes of its own
    // fields before the drive number.
    let (ebpb, code_at, message_at) = if is_fat32 {
        LittleEndian::write_u32(&mut sec[36..40], g.sectors_per_fat_32);
        LittleEndian::write_u16(&mut sec[40..42], 0); // ext flags: mirrored
        LittleEndian::write_u16(&mut sec[42..44], 0); // version 0.0
        LittleEndian::write_u32(&mut sec[44..48], g.root_cluster);
        LittleEndian::write_u16(&mut sec[48..50], g.fs_info_sector);
        LittleEndian::write_u16(&mut sec[50..52], g.backup_boot_sector);
        (64, 90, 163)
    } else {
        (36, 62, 119)
    };

    sec[ebpb] = if is_fat32 { 0x80 } else { 0x00 };
    sec[ebpb + 1] = 0x00;
    sec[ebpb + 2] = EXTENDED_BOOT_SIGNATURE;
    LittleEndian::write_u32(&mut sec[ebpb + 3..ebpb + 7], id.serial);
    sec[ebpb + 7..ebpb + 18].copy_from_slice(&id.label);
    sec[ebpb + 18..ebpb + 26].copy_from_slice(plan.fat_type.fs_type_label());

    sec[code_at..code_at + BOOT_CODE.len()].copy_from_slice(&boot_code_with_message(message_at));
    sec[message_at..message_at + BOOT_MESSAGE.len()].copy_from_slice(BOOT_MESSAGE);

    sec[510..512].copy_from_slice(&BOOT_SIGNATURE);
    sec
}

/// Encode the FAT32 FSInfo sector. Free count is left unknown.
pub fn fs_info_sector() -> [u8; SECTOR_SIZE] {
    let mut sec = [0u8; SECTOR_SIZE];
    LittleEndian::write_u32(&mut sec[0..4], FSINFO_LEAD_SIGNATURE);
    LittleEndian::write_u32(&mut sec[484..488], FSINFO_STRUCT_SIGNATURE);
    LittleEndian::write_u32(&mut sec[488..492], 0xFFFF_FFFF);
    LittleEndian::write_u32(&mut sec[492..496], 2);
    LittleEndian::write_u32(&mut sec[508..512], FSINFO_TRAIL_SIGNATURE);
    sec
}

/// Write a FAT entry value for the given cluster number.
pub fn set_fat_entry(fat: &mut [u8], cluster: u32, value: u32, fat_type: FatType) {
    match fat_type {
        FatType::Fat12 => {
            let off = (cluster as usize * 3) / 2;
            if off + 1 >= fat.len() {
                return;
            }
            let existing = LittleEndian::read_u16(&fat[off..off + 2]);
            let new_val = if cluster & 1 == 1 {
                (existing & 0x000F) | ((value as u16) << 4)
            } else {
                (existing & 0xF000) | (value as u16 & 0x0FFF)
            };
            LittleEndian::write_u16(&mut fat[off..off + 2], new_val);
        }
        FatType::Fat16 => {
            let off = cluster as usize * 2;
            if off + 1 >= fat.len() {
                return;
            }
            LittleEndian::write_u16(&mut fat[off..off + 2], value as u16);
        }
        FatType::Fat32 => {
            let off = cluster as usize * 4;
            if off + 3 >= fat.len() {
                return;
            }
            LittleEndian::write_u32(&mut fat[off..off + 4], value & 0x0FFF_FFFF);
        }
    }
}

/// First sector of a freshly initialised FAT: reserved entries set, the
/// rest zero. Every later FAT sector is all zeros.
pub fn fat_first_sector(fat_type: FatType, media: u8) -> [u8; SECTOR_SIZE] {
    let mut sec = [0u8; SECTOR_SIZE];
    match fat_type {
        FatType::Fat12 => {
            set_fat_entry(&mut sec, 0, 0xF00 | media as u32, fat_type);
            set_fat_entry(&mut sec, 1, 0xFFF, fat_type);
        }
        FatType::Fat16 => {
            set_fat_entry(&mut sec, 0, 0xFF00 | media as u32, fat_type);
            set_fat_entry(&mut sec, 1, 0xFFFF, fat_type);
        }
        FatType::Fat32 => {
            set_fat_entry(&mut sec, 0, 0x0FFF_FF00 | media as u32, fat_type);
            set_fat_entry(&mut sec, 1, 0x0FFF_FFFF, fat_type);
            // Root directory cluster: a one-cluster chain.
            set_fat_entry(&mut sec, 2, 0x0FFF_FFFF, fat_type);
        }
    }
    sec
}

/// 32-byte root directory entry carrying the volume label.
pub fn volume_label_entry(label: &[u8; 11]) -> [u8; DIR_ENTRY_SIZE] {
    let mut e = [0u8; DIR_ENTRY_SIZE];
    e[0..11].copy_from_slice(label);
    e[11] = ATTR_VOLUME_ID;
    e
}
