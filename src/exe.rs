//! PS-X EXE loader
//!
//! Header layout (little-endian words):
//! 0x000: "PS-X EXE" magic
//! 0x010: initial PC
//! 0x014: initial GP (r28)
//! 0x018: load address (text is copied here)
//! 0x01C: text size in bytes, past the 2KB header
//! 0x028: BSS start
//! 0x02C: BSS size
//! 0x030: initial SP/FP base (0 = leave SP alone)
//! 0x034: SP offset
//! 0x800: text

use crate::dynarec::Dynarec;
use crate::memory::{resolve, Region, Route, RAM_SIZE};
use crate::DynarecError;

const MAGIC: &[u8; 8] = b"PS-X EXE";
/// Text starts after the 2KB header
pub const HEADER_SIZE: usize = 0x800;
/// BSS is cleared this many bytes at a time
const ZERO_CHUNK: usize = 4096;

/// Parsed EXE header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExeHeader {
    pub pc: u32,
    pub gp: u32,
    pub dest: u32,
    pub size: u32,
    pub bss_start: u32,
    pub bss_size: u32,
    pub sp_base: u32,
    pub sp_offset: u32,
}

/// True when `[addr, addr + len)` lies inside one copy of RAM
fn fits_in_ram(addr: u32, len: u32) -> bool {
    match resolve(addr) {
        Route::Mapped(r) if r.region == Region::Ram => r.offset as u64 + len as u64 <= RAM_SIZE as u64,
        _ => false,
    }
}

fn word(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

impl ExeHeader {
    pub fn parse(data: &[u8]) -> Result<Self, DynarecError> {
        if data.len() < HEADER_SIZE || &data[..8] != MAGIC {
            return Err(DynarecError::InvalidImage("not a PS-X EXE".to_string()));
        }

        let header = ExeHeader {
            pc: word(data, 0x10),
            gp: word(data, 0x14),
            dest: word(data, 0x18),
            size: word(data, 0x1C),
            bss_start: word(data, 0x28),
            bss_size: word(data, 0x2C),
            sp_base: word(data, 0x30),
            sp_offset: word(data, 0x34),
        };

        if data.len() - HEADER_SIZE < header.size as usize {
            return Err(DynarecError::InvalidImage(format!(
                "EXE text is {} bytes, header says {}",
                data.len() - HEADER_SIZE,
                header.size
            )));
        }
        Ok(header)
    }
}

/// Copy the EXE into RAM and set up PC, GP, SP and FP
pub fn load(dynarec: &mut Dynarec, data: &[u8]) -> Result<ExeHeader, DynarecError> {
    let header = ExeHeader::parse(data)?;
    let text = &data[HEADER_SIZE..HEADER_SIZE + header.size as usize];

    let mut bus = dynarec.bus();
    if bus.write_bytes(header.dest, text) != text.len() {
        return Err(DynarecError::InvalidImage(format!(
            "EXE text [{:#010x}, +{:#x}) does not fit in RAM",
            header.dest, header.size
        )));
    }
    if header.bss_size > 0 {
        if !fits_in_ram(header.bss_start, header.bss_size) {
            return Err(DynarecError::InvalidImage(format!(
                "EXE BSS [{:#010x}, +{:#x}) does not fit in RAM",
                header.bss_start, header.bss_size
            )));
        }
        let zeroes = [0u8; ZERO_CHUNK];
        let mut done = 0usize;
        while done < header.bss_size as usize {
            let n = (header.bss_size as usize - done).min(ZERO_CHUNK);
            bus.write_bytes(header.bss_start.wrapping_add(done as u32), &zeroes[..n]);
            done += n;
        }
    }

    dynarec.set_pc(header.pc);
    dynarec.set_reg(28, header.gp);
    if header.sp_base != 0 {
        let sp = header.sp_base.wrapping_add(header.sp_offset);
        dynarec.set_reg(29, sp);
        dynarec.set_reg(30, sp);
    }

    crate::console_log!(
        "Loaded EXE: {} bytes at {:#010x}, entry {:#010x}",
        header.size,
        header.dest,
        header.pc
    );
    Ok(header)
}

/// Build an EXE image around `text` (tests and tools)
pub fn build(pc: u32, dest: u32, sp: u32, text: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; HEADER_SIZE];
    image[..8].copy_from_slice(MAGIC);
    image[0x10..0x14].copy_from_slice(&pc.to_le_bytes());
    image[0x18..0x1C].copy_from_slice(&dest.to_le_bytes());
    image[0x1C..0x20].copy_from_slice(&(text.len() as u32).to_le_bytes());
    image[0x30..0x34].copy_from_slice(&sp.to_le_bytes());
    image.extend_from_slice(text);
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::IgnoreStores;
    use crate::dynarec::DynarecConfig;
    use crate::memory::{Memory, Width};

    fn dynarec() -> Dynarec {
        let config = DynarecConfig { native: false, ..DynarecConfig::default() };
        Dynarec::new(Memory::new(&[]).unwrap(), IgnoreStores, config).unwrap()
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut image = build(0x8001_0000, 0x8001_0000, 0, &[0; 4]);
        image[0] = b'X';
        assert!(matches!(ExeHeader::parse(&image), Err(DynarecError::InvalidImage(_))));
        assert!(ExeHeader::parse(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_parse_rejects_truncated_text() {
        let mut image = build(0x8001_0000, 0x8001_0000, 0, &[0; 8]);
        image.truncate(HEADER_SIZE + 4);
        assert!(ExeHeader::parse(&image).is_err());
    }

    #[test]
    fn test_load_sets_up_registers() {
        let mut d = dynarec();
        let image = build(0x8001_0000, 0x8001_0000, 0x801F_FF00, &[0x78, 0x56, 0x34, 0x12]);
        let header = load(&mut d, &image).unwrap();
        assert_eq!(header.size, 4);
        assert_eq!(d.state().pc, 0x8001_0000);
        assert_eq!(d.reg(29), 0x801F_FF00);
        assert_eq!(d.reg(30), 0x801F_FF00);
        assert_eq!(d.bus().read(0x0001_0000, Width::Word), 0x1234_5678);
    }

    fn with_bss(mut image: Vec<u8>, start: u32, size: u32) -> Vec<u8> {
        image[0x28..0x2C].copy_from_slice(&start.to_le_bytes());
        image[0x2C..0x30].copy_from_slice(&size.to_le_bytes());
        image
    }

    #[test]
    fn test_bss_is_cleared() {
        let mut d = dynarec();
        d.bus().write_bytes(0x8002_0000, &[0xAA; 0x2100]);
        let image = with_bss(build(0x8001_0000, 0x8001_0000, 0, &[0; 4]), 0x8002_0000, 0x2000);
        load(&mut d, &image).unwrap();
        assert!(d.bus().read_bytes(0x8002_0000, 0x2000).iter().all(|&b| b == 0));
        assert_eq!(d.bus().read(0x8002_2000, Width::Byte), 0xAA);
    }

    #[test]
    fn test_oversized_bss_is_rejected() {
        let mut d = dynarec();
        let image = with_bss(build(0x8001_0000, 0x8001_0000, 0, &[0; 4]), 0x8001_0000, 0xFFFF_FFFF);
        assert!(matches!(load(&mut d, &image), Err(DynarecError::InvalidImage(_))));

        let image = with_bss(build(0x8001_0000, 0x8001_0000, 0, &[0; 4]), 0x801F_F000, 0x2000);
        assert!(load(&mut d, &image).is_err());

        let image = with_bss(build(0x8001_0000, 0x8001_0000, 0, &[0; 4]), 0x1F80_0000, 0x10);
        assert!(load(&mut d, &image).is_err());
    }

    #[test]
    fn test_load_outside_ram_fails() {
        let mut d = dynarec();
        let image = build(0x8001_0000, 0x1F80_1000, 0, &[0; 4]);
        assert!(load(&mut d, &image).is_err());
    }
}
