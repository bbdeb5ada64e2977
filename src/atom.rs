use crate::containers::StringHeader;
use crate::jsvalue::{value_to_ptr, JSValue};
use crate::memblock::{MbHeader, MTag};
use crate::memory::{Memory, MemoryError};
use core::cmp::Ordering;

// Invariants:
// - Every table is sorted by the UTF-8 bytes of its strings.
// - Unique strings in RAM are weak: entries whose block was not marked are
//   dropped before the sweep frees them.
// - ROM tables (stdlib, loaded images) are never modified.
#[derive(Debug, Default)]
pub struct AtomTables {
    rom_tables: Vec<Vec<JSValue>>,
    unique_strings: Vec<JSValue>,
}

impl AtomTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rom_table(&mut self, table: Vec<JSValue>) {
        self.rom_tables.push(table);
    }

    pub fn rom_table_count(&self) -> usize {
        self.rom_tables.len()
    }

    pub fn unique_strings(&self) -> &[JSValue] {
        &self.unique_strings
    }

    /// Looks `bytes` up in the ROM tables only.
    pub fn find_rom(&self, mem: &Memory<'_>, bytes: &[u8]) -> Result<Option<JSValue>, MemoryError> {
        for table in &self.rom_tables {
            if let Ok(idx) = find_atom(mem, table, bytes)? {
                return Ok(Some(table[idx]));
            }
        }
        Ok(None)
    }

    pub fn find(&self, mem: &Memory<'_>, bytes: &[u8]) -> Result<Option<JSValue>, MemoryError> {
        if let Some(val) = self.find_rom(mem, bytes)? {
            return Ok(Some(val));
        }
        Ok(find_atom(mem, &self.unique_strings, bytes)?
            .ok()
            .map(|idx| self.unique_strings[idx]))
    }

    /// Records a freshly allocated unique string. It must not be present yet.
    pub fn insert_unique(&mut self, mem: &Memory<'_>, val: JSValue) -> Result<(), MemoryError> {
        let bytes = string_block_bytes(mem, val)?;
        match find_atom(mem, &self.unique_strings, bytes)? {
            Ok(_) => debug_assert!(false, "atom inserted twice"),
            Err(pos) => self.unique_strings.insert(pos, val),
        }
        Ok(())
    }

    pub fn sweep_unique_strings<F>(&mut self, mut is_marked: F) -> usize
    where
        F: FnMut(JSValue) -> bool,
    {
        self.unique_strings.retain(|val| is_marked(*val));
        self.unique_strings.len()
    }
}

/// Payload bytes of a heap string block.
pub fn string_block_bytes<'m>(mem: &'m Memory<'_>, val: JSValue) -> Result<&'m [u8], MemoryError> {
    let addr = value_to_ptr(val).ok_or(MemoryError::OutOfBounds(val.bits()))?;
    let header = MbHeader::from_word(mem.read_u32(addr)?);
    if header.tag() != MTag::String {
        return Err(MemoryError::OutOfBounds(addr));
    }
    mem.bytes(addr + 4, StringHeader::from(header).len() as usize)
}

fn find_atom(
    mem: &Memory<'_>,
    table: &[JSValue],
    bytes: &[u8],
) -> Result<Result<usize, usize>, MemoryError> {
    let (mut lo, mut hi) = (0usize, table.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match string_block_bytes(mem, table[mid])?.cmp(bytes) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return Ok(Ok(mid)),
        }
    }
    Ok(Err(lo))
}

/// Canonical array index: `0` or digits without a leading zero, below
/// `u32::MAX`.
pub fn parse_array_index(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > 10 || (bytes.len() > 1 && bytes[0] == b'0') {
        return None;
    }
    let mut n: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n * 10 + (b - b'0') as u64;
    }
    (n < u32::MAX as u64).then_some(n as u32)
}
