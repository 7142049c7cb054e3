//! Save states
//!
//! Stores CPU state, the scratchpad and the RAM pages that are not all
//! zero. The BIOS is not included: it must be the same image on restore,
//! which is checked through a checksum. Translations are never saved; the
//! restored machine retranslates on demand.

use std::collections::HashMap;
use serde::{Serialize, Deserialize};

use crate::cpu::CpuState;
use crate::dynarec::Dynarec;
use crate::memory::{RAM_SIZE, SCRATCHPAD_SIZE};
use crate::DynarecError;

/// Granularity of the RAM page map
pub const SNAPSHOT_PAGE_SIZE: u32 = 4096;

#[derive(Serialize, Deserialize)]
pub struct Snapshot {
    /// Version for compatibility checking
    pub version: u32,
    /// FNV-1a of the BIOS image (validated on restore)
    pub bios_checksum: u32,
    /// CPU state, cycle counters, pending delay slot and in-flight load included
    pub cpu: CpuState,
    /// Non-zero RAM pages (offset -> page_data)
    pub ram_pages: HashMap<u32, Vec<u8>>,
    pub scratchpad: Vec<u8>,
}

impl Snapshot {
    /// Current snapshot version
    pub const VERSION: u32 = 2;

    pub fn capture(dynarec: &Dynarec) -> Self {
        let memory = dynarec.memory();
        let ram_pages = memory
            .ram()
            .chunks(SNAPSHOT_PAGE_SIZE as usize)
            .enumerate()
            .filter(|(_, page)| page.iter().any(|&b| b != 0))
            .map(|(i, page)| (i as u32 * SNAPSHOT_PAGE_SIZE, page.to_vec()))
            .collect();

        Snapshot {
            version: Self::VERSION,
            bios_checksum: checksum(memory.bios()),
            cpu: dynarec.state().clone(),
            ram_pages,
            scratchpad: memory.scratchpad().to_vec(),
        }
    }

    /// Overwrite CPU and memory state. Every page is invalidated.
    pub fn restore(&self, dynarec: &mut Dynarec) -> Result<(), DynarecError> {
        if self.version != Self::VERSION {
            return Err(DynarecError::Snapshot(format!(
                "version {} not supported (expected {})",
                self.version,
                Self::VERSION
            )));
        }
        if self.bios_checksum != checksum(dynarec.memory().bios()) {
            return Err(DynarecError::Snapshot("snapshot was taken with a different BIOS".to_string()));
        }
        if self.scratchpad.len() != SCRATCHPAD_SIZE as usize {
            return Err(DynarecError::Snapshot(format!("scratchpad is {} bytes", self.scratchpad.len())));
        }

        let mut ram = vec![0u8; RAM_SIZE as usize];
        for (&offset, data) in &self.ram_pages {
            let start = offset as usize;
            if offset % SNAPSHOT_PAGE_SIZE != 0 || data.len() != SNAPSHOT_PAGE_SIZE as usize || start >= ram.len() {
                return Err(DynarecError::Snapshot(format!("bad RAM page at {:#x}", offset)));
            }
            ram[start..start + data.len()].copy_from_slice(data);
        }

        dynarec.restore(self.cpu.clone(), &ram, &self.scratchpad);
        Ok(())
    }

    /// Serialize to bytes (compressed with zstd)
    pub fn to_bytes(&self) -> Result<Vec<u8>, DynarecError> {
        let serialized = bincode::serialize(self)
            .map_err(|e| DynarecError::Snapshot(format!("Serialization error: {}", e)))?;

        zstd::stream::encode_all(&serialized[..], 3)
            .map_err(|e| DynarecError::Snapshot(format!("Compression error: {}", e)))
    }

    /// Deserialize from bytes (compressed with zstd)
    pub fn from_bytes(data: &[u8]) -> Result<Self, DynarecError> {
        let decompressed = zstd::stream::decode_all(data)
            .map_err(|e| DynarecError::Snapshot(format!("Decompression error: {}", e)))?;

        bincode::deserialize(&decompressed)
            .map_err(|e| DynarecError::Snapshot(format!("Deserialization error: {}", e)))
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811C_9DC5u32, |h, &b| (h ^ b as u32).wrapping_mul(0x0100_0193))
}
