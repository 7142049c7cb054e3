//! Guest memory
//!
//! Memory layout (physical, after the region mask is applied):
//! 0x00000000 - 0x001FFFFF: Main RAM (2MB, mirrored up to 0x007FFFFF)
//! 0x1F800000 - 0x1F8003FF: Scratchpad (1KB data cache used as fast RAM)
//! 0x1F801000 - ...:        Hardware registers (handled by the store handler)
//! 0x1FC00000 - 0x1FC7FFFF: BIOS ROM (512KB)

pub mod router;

pub use router::{resolve, PageIndex, Region, Resolved, Route, REGION_MASK};

use crate::DynarecError;

/// PSX RAM size in bytes: 2MB
pub const RAM_SIZE: u32 = 0x20_0000;
/// Physical window in which RAM is mirrored (4 copies)
pub const RAM_MIRROR_END: u32 = 0x80_0000;
/// BIOS ROM size in bytes: 512KB
pub const BIOS_SIZE: u32 = 0x8_0000;
/// Base address for the BIOS ROM
pub const BIOS_BASE: u32 = 0x1FC0_0000;
/// Scratchpad size in bytes: 1KB
pub const SCRATCHPAD_SIZE: u32 = 1024;
/// Base address for the scratchpad
pub const SCRATCHPAD_BASE: u32 = 0x1F80_0000;

/// Value returned by loads nobody answers
pub const OPEN_BUS: u32 = 0xFFFF_FFFF;

/// Access width of a load or store
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    /// Size of the access in bytes
    #[inline(always)]
    pub fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }

    /// Keep only the bits covered by this width
    #[inline(always)]
    pub fn mask(self, value: u32) -> u32 {
        match self {
            Width::Byte => value & 0xFF,
            Width::Half => value & 0xFFFF,
            Width::Word => value,
        }
    }

    /// True if `addr` is naturally aligned for this width
    #[inline(always)]
    pub fn is_aligned(self, addr: u32) -> bool {
        addr & (self.bytes() - 1) == 0
    }
}

/// Backing storage for the three memory regions the CPU reaches directly
pub struct Memory {
    ram: Box<[u8]>,
    scratchpad: Box<[u8]>,
    bios: Box<[u8]>,
}

impl Memory {
    /// Zeroed RAM and scratchpad with the given BIOS image.
    ///
    /// Images shorter than 512KB are padded with zeroes.
    pub fn new(bios: &[u8]) -> Result<Self, DynarecError> {
        if bios.len() > BIOS_SIZE as usize {
            return Err(DynarecError::InvalidImage(format!(
                "BIOS image is {} bytes, expected at most {}",
                bios.len(),
                BIOS_SIZE
            )));
        }

        let mut rom = vec![0u8; BIOS_SIZE as usize];
        rom[..bios.len()].copy_from_slice(bios);

        Ok(Memory {
            ram: vec![0u8; RAM_SIZE as usize].into_boxed_slice(),
            scratchpad: vec![0u8; SCRATCHPAD_SIZE as usize].into_boxed_slice(),
            bios: rom.into_boxed_slice(),
        })
    }

    /// Take ownership of caller-provided buffers. Sizes must match exactly.
    pub fn from_parts(ram: Vec<u8>, scratchpad: Vec<u8>, bios: Vec<u8>) -> Result<Self, DynarecError> {
        check_len("RAM", &ram, RAM_SIZE)?;
        check_len("scratchpad", &scratchpad, SCRATCHPAD_SIZE)?;
        check_len("BIOS", &bios, BIOS_SIZE)?;

        Ok(Memory {
            ram: ram.into_boxed_slice(),
            scratchpad: scratchpad.into_boxed_slice(),
            bios: bios.into_boxed_slice(),
        })
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn scratchpad(&self) -> &[u8] {
        &self.scratchpad
    }

    pub fn bios(&self) -> &[u8] {
        &self.bios
    }

    /// Mutable RAM access for crate-internal paths that invalidate on their own
    pub(crate) fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.ram
    }

    pub(crate) fn scratchpad_mut(&mut self) -> &mut [u8] {
        &mut self.scratchpad
    }

    fn region(&self, region: Region) -> &[u8] {
        match region {
            Region::Ram => &self.ram,
            Region::Scratchpad => &self.scratchpad,
            Region::Bios => &self.bios,
        }
    }

    /// Read `width` bytes at `offset` inside `region`
    #[inline(always)]
    pub fn read(&self, region: Region, offset: u32, width: Width) -> u32 {
        let bytes = self.region(region);
        let o = offset as usize;
        match width {
            Width::Byte => bytes[o] as u32,
            Width::Half => u16::from_le_bytes([bytes[o], bytes[o + 1]]) as u32,
            Width::Word => u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]),
        }
    }

    /// Write `width` bytes at `offset` inside RAM or scratchpad.
    ///
    /// BIOS writes are dropped: the ROM is never modified.
    #[inline(always)]
    pub(crate) fn write(&mut self, region: Region, offset: u32, value: u32, width: Width) {
        let bytes: &mut [u8] = match region {
            Region::Ram => &mut self.ram,
            Region::Scratchpad => &mut self.scratchpad,
            Region::Bios => return,
        };
        let o = offset as usize;
        match width {
            Width::Byte => bytes[o] = value as u8,
            Width::Half => bytes[o..o + 2].copy_from_slice(&(value as u16).to_le_bytes()),
            Width::Word => bytes[o..o + 4].copy_from_slice(&value.to_le_bytes()),
        }
    }

    /// Instruction word at a resolved location
    #[inline(always)]
    pub fn fetch(&self, resolved: &Resolved) -> u32 {
        self.read(resolved.region, resolved.offset & !3, Width::Word)
    }
}

fn check_len(name: &str, buf: &[u8], expected: u32) -> Result<(), DynarecError> {
    if buf.len() != expected as usize {
        return Err(DynarecError::InvalidImage(format!(
            "{} buffer is {} bytes, expected {}",
            name,
            buf.len(),
            expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bios_padding() {
        let mem = Memory::new(&[0x11, 0x22, 0x33, 0x44]).unwrap();
        assert_eq!(mem.bios().len(), BIOS_SIZE as usize);
        assert_eq!(mem.read(Region::Bios, 0, Width::Word), 0x4433_2211);
        assert_eq!(mem.read(Region::Bios, 4, Width::Word), 0);
    }

    #[test]
    fn test_oversized_bios_rejected() {
        let big = vec![0u8; BIOS_SIZE as usize + 1];
        assert!(matches!(Memory::new(&big), Err(DynarecError::InvalidImage(_))));
    }

    #[test]
    fn test_from_parts_checks_sizes() {
        let ok = Memory::from_parts(
            vec![0; RAM_SIZE as usize],
            vec![0; SCRATCHPAD_SIZE as usize],
            vec![0; BIOS_SIZE as usize],
        );
        assert!(ok.is_ok());

        let bad = Memory::from_parts(vec![0; 16], vec![0; SCRATCHPAD_SIZE as usize], vec![0; BIOS_SIZE as usize]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_little_endian_widths() {
        let mut mem = Memory::new(&[]).unwrap();
        mem.write(Region::Ram, 0x100, 0xAABB_CCDD, Width::Word);
        assert_eq!(mem.read(Region::Ram, 0x100, Width::Byte), 0xDD);
        assert_eq!(mem.read(Region::Ram, 0x102, Width::Half), 0xAABB);

        mem.write(Region::Ram, 0x101, 0x12345, Width::Byte);
        assert_eq!(mem.read(Region::Ram, 0x100, Width::Word), 0xAABB_45DD);
    }

    #[test]
    fn test_bios_is_read_only() {
        let mut mem = Memory::new(&[1, 2, 3, 4]).unwrap();
        mem.write(Region::Bios, 0, 0, Width::Word);
        assert_eq!(mem.read(Region::Bios, 0, Width::Word), 0x0403_0201);
    }
}
