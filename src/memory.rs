//! 32-bit virtual address space of a context.
//!
//! Heap pointers inside values are virtual addresses. The RAM arena is the
//! only writable region; the stdlib table and loaded bytecode images are
//! mapped read-only and borrowed, never copied.

use crate::cutils::{get_f64, get_u32, put_f64, put_u32};
use crate::jsvalue::{JSValue, JSW};
use thiserror::Error;

pub const JS_STDLIB_BASE: u32 = 0x1000_0000;
pub const JS_RAM_BASE: u32 = 0x2000_0000;
pub const JS_RAM_SIZE_MAX: usize = 0x1000_0000;
/// Loaded bytecode images must be mapped at or above this address.
pub const JS_IMAGE_REGION_BASE: u32 = 0x4000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("access outside of mapped memory at {0:#010x}")]
    OutOfBounds(u32),
    #[error("write to read-only memory at {0:#010x}")]
    ReadOnly(u32),
    #[error("region at {0:#010x} overlaps a mapped region")]
    Overlap(u32),
}

#[derive(Debug, Clone, Copy)]
struct RomRegion<'a> {
    base: u32,
    data: &'a [u8],
}

impl RomRegion<'_> {
    fn end(&self) -> u64 {
        self.base as u64 + self.data.len() as u64
    }
}

#[derive(Debug)]
pub struct Memory<'a> {
    ram: Box<[u8]>,
    roms: Vec<RomRegion<'a>>,
}

impl<'a> Memory<'a> {
    pub fn new(ram_size: usize) -> Self {
        debug_assert!(ram_size <= JS_RAM_SIZE_MAX);
        Self {
            ram: vec![0u8; ram_size].into_boxed_slice(),
            roms: Vec::new(),
        }
    }

    pub fn ram_base(&self) -> u32 {
        JS_RAM_BASE
    }

    pub fn ram_end(&self) -> u32 {
        JS_RAM_BASE + self.ram.len() as u32
    }

    pub fn ram_len(&self) -> usize {
        self.ram.len()
    }

    pub fn is_ram(&self, addr: u32) -> bool {
        addr >= JS_RAM_BASE && addr < self.ram_end()
    }

    /// Maps a read-only region. Regions may not overlap RAM or each other.
    pub fn map_rom(&mut self, base: u32, data: &'a [u8]) -> Result<(), MemoryError> {
        let region = RomRegion { base, data };
        if region.end() > u32::MAX as u64 {
            return Err(MemoryError::OutOfBounds(base));
        }
        let overlaps = |start: u64, end: u64| (base as u64) < end && start < region.end();
        if overlaps(JS_RAM_BASE as u64, self.ram_end() as u64)
            || self.roms.iter().any(|r| overlaps(r.base as u64, r.end()))
        {
            return Err(MemoryError::Overlap(base));
        }
        self.roms.push(region);
        Ok(())
    }

    pub fn is_mapped_rom(&self, base: u32) -> bool {
        self.roms.iter().any(|r| r.base == base)
    }

    /// Lowest 4-byte aligned address above every mapped image region.
    pub fn next_image_base(&self) -> u32 {
        self.roms
            .iter()
            .filter(|r| r.base >= JS_IMAGE_REGION_BASE)
            .map(|r| r.end() as u32)
            .max()
            .map_or(JS_IMAGE_REGION_BASE, |end| end.next_multiple_of(JSW))
    }

    pub fn bytes(&self, addr: u32, len: usize) -> Result<&[u8], MemoryError> {
        if self.is_ram(addr) {
            let start = (addr - JS_RAM_BASE) as usize;
            return self
                .ram
                .get(start..start + len)
                .ok_or(MemoryError::OutOfBounds(addr));
        }
        for rom in &self.roms {
            if addr >= rom.base && (addr as u64) < rom.end() {
                let start = (addr - rom.base) as usize;
                return rom
                    .data
                    .get(start..start + len)
                    .ok_or(MemoryError::OutOfBounds(addr));
            }
        }
        Err(MemoryError::OutOfBounds(addr))
    }

    pub fn bytes_mut(&mut self, addr: u32, len: usize) -> Result<&mut [u8], MemoryError> {
        if !self.is_ram(addr) {
            return Err(if self.bytes(addr, len).is_ok() {
                MemoryError::ReadOnly(addr)
            } else {
                MemoryError::OutOfBounds(addr)
            });
        }
        let start = (addr - JS_RAM_BASE) as usize;
        self.ram
            .get_mut(start..start + len)
            .ok_or(MemoryError::OutOfBounds(addr))
    }

    pub fn read_u32(&self, addr: u32) -> Result<u32, MemoryError> {
        Ok(get_u32(self.bytes(addr, 4)?))
    }

    pub fn write_u32(&mut self, addr: u32, val: u32) -> Result<(), MemoryError> {
        put_u32(self.bytes_mut(addr, 4)?, val);
        Ok(())
    }

    pub fn read_value(&self, addr: u32) -> Result<JSValue, MemoryError> {
        Ok(JSValue::from_bits(self.read_u32(addr)?))
    }

    pub fn write_value(&mut self, addr: u32, val: JSValue) -> Result<(), MemoryError> {
        self.write_u32(addr, val.bits())
    }

    /// Reads word `idx` of the block starting at `block`.
    pub fn field(&self, block: u32, idx: u32) -> Result<JSValue, MemoryError> {
        self.read_value(block + idx * JSW)
    }

    pub fn set_field(&mut self, block: u32, idx: u32, val: JSValue) -> Result<(), MemoryError> {
        self.write_value(block + idx * JSW, val)
    }

    pub fn read_f64(&self, addr: u32) -> Result<f64, MemoryError> {
        Ok(get_f64(self.bytes(addr, 8)?))
    }

    pub fn write_f64(&mut self, addr: u32, val: f64) -> Result<(), MemoryError> {
        put_f64(self.bytes_mut(addr, 8)?, val);
        Ok(())
    }

    pub fn copy_within_ram(&mut self, src: u32, dst: u32, len: usize) -> Result<(), MemoryError> {
        if len == 0 {
            return Ok(());
        }
        let _ = self.bytes_mut(src, len)?;
        let _ = self.bytes_mut(dst, len)?;
        let src = (src - JS_RAM_BASE) as usize;
        let dst = (dst - JS_RAM_BASE) as usize;
        self.ram.copy_within(src..src + len, dst);
        Ok(())
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn ram_read_write() {
        let mut mem = Memory::new(64);
        mem.write_u32(JS_RAM_BASE + 8, 0x1234_5678).unwrap();
        assert_eq!(mem.read_u32(JS_RAM_BASE + 8).unwrap(), 0x1234_5678);
        assert_eq!(mem.bytes(JS_RAM_BASE + 8, 1).unwrap(), &[0x78]);
        assert_eq!(
            mem.read_u32(JS_RAM_BASE + 64),
            Err(MemoryError::OutOfBounds(JS_RAM_BASE + 64))
        );
    }

    #[test]
    fn rom_is_read_only() {
        let rom = [1u8, 0, 0, 0, 2, 0, 0, 0];
        let mut mem = Memory::new(16);
        mem.map_rom(JS_IMAGE_REGION_BASE, &rom).unwrap();
        assert_eq!(mem.read_u32(JS_IMAGE_REGION_BASE + 4).unwrap(), 2);
        assert_eq!(
            mem.write_u32(JS_IMAGE_REGION_BASE, 0),
            Err(MemoryError::ReadOnly(JS_IMAGE_REGION_BASE))
        );
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let rom = [0u8; 16];
        let mut mem = Memory::new(16);
        mem.map_rom(JS_IMAGE_REGION_BASE, &rom).unwrap();
        assert_eq!(
            mem.map_rom(JS_IMAGE_REGION_BASE + 8, &rom),
            Err(MemoryError::Overlap(JS_IMAGE_REGION_BASE + 8))
        );
        assert_eq!(
            mem.map_rom(JS_RAM_BASE, &rom),
            Err(MemoryError::Overlap(JS_RAM_BASE))
        );
        assert_eq!(mem.next_image_base(), JS_IMAGE_REGION_BASE + 16);
    }
}
