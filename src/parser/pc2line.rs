//! pc to source position table.
//!
//! Stored in a byte array as little-endian `(pc, line, col)` u32 triples
//! sorted by pc. A lookup returns the entry with the greatest pc not above
//! the one asked for.

use crate::cutils::{get_u32, put_u32};

const ENTRY_SIZE: usize = 12;

#[derive(Debug, Default, Clone)]
pub struct Pc2LineBuilder {
    buf: Vec<u8>,
    last: Option<(u32, u32)>,
}

impl Pc2LineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that code from `pc` on comes from `line:col`. Repeated
    /// positions are not stored twice.
    pub fn add(&mut self, pc: u32, line: u32, col: u32) {
        if self.last == Some((line, col)) {
            return;
        }
        // A later entry at the same pc replaces the previous one.
        let len = self.buf.len();
        if len >= ENTRY_SIZE && get_u32(&self.buf[len - ENTRY_SIZE..]) == pc {
            self.buf.truncate(len - ENTRY_SIZE);
        }
        let mut entry = [0u8; ENTRY_SIZE];
        put_u32(&mut entry[0..4], pc);
        put_u32(&mut entry[4..8], line);
        put_u32(&mut entry[8..12], col);
        self.buf.extend_from_slice(&entry);
        self.last = Some((line, col));
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Line and column (0 when columns were stripped) of the code at `pc`.
pub fn find_line_col(table: &[u8], pc: u32) -> Option<(u32, u32)> {
    let mut found = None;
    for entry in table.chunks_exact(ENTRY_SIZE) {
        if get_u32(entry) > pc {
            break;
        }
        found = Some((get_u32(&entry[4..]), get_u32(&entry[8..])));
    }
    found
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;

    #[test]
    fn lookup_takes_the_closest_preceding_entry() {
        let mut b = Pc2LineBuilder::new();
        b.add(0, 1, 1);
        b.add(5, 1, 1);
        b.add(5, 2, 3);
        b.add(9, 4, 1);
        let table = b.finish();
        assert_eq!(table.len(), 3 * ENTRY_SIZE);
        assert_eq!(find_line_col(&table, 0), Some((1, 1)));
        assert_eq!(find_line_col(&table, 7), Some((2, 3)));
        assert_eq!(find_line_col(&table, 100), Some((4, 1)));
        assert_eq!(find_line_col(&[], 3), None);
    }
}
