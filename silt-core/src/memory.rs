//! Physical memory shared between all harts of a machine.

use crate::AddressRange;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Word-backed guest RAM covering the physical window `[base, base + size)`.
///
/// The backing store is a boxed slice of [`AtomicU32`] words, so a single memory image can be
/// shared (behind an `Arc`) between all hart threads and any device threads. Plain guest loads
/// and stores use relaxed word operations; the A extension and page-table A/D updates go through
/// [`fetch_update_word`](Self::fetch_update_word), which is sequentially consistent.
///
/// This can be categorized as *main memory* according to the types of memory resources defined by
/// the RISC-V spec.
#[derive(Debug)]
pub struct PhysMemory {
    range: AddressRange,
    words: Box<[AtomicU32]>,
}

impl PhysMemory {
    /// Create a new zero-initialized RAM image of `size` bytes starting at guest physical address
    /// `base`.
    ///
    /// `base` and `size` must be multiples of the word size, `size` must be at least one word,
    /// and the window must fit in the 32-bit physical address space.
    pub fn new(base: u32, size: usize) -> Result<Self, PhysMemoryError> {
        if size == 0 {
            return Err(PhysMemoryError::ZeroSize);
        }
        if base % 4 != 0 || size % 4 != 0 {
            return Err(PhysMemoryError::Misaligned { base, size });
        }
        let end = u64::from(base) + size as u64 - 1;
        let end = u32::try_from(end).map_err(|_| PhysMemoryError::OutOfAddressSpace {
            base,
            size,
        })?;
        let words = std::iter::repeat_with(|| AtomicU32::new(0))
            .take(size / 4)
            .collect();
        Ok(Self {
            range: AddressRange::new(base, end).unwrap(),
            words,
        })
    }

    /// Returns the guest physical address range backed by this memory.
    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// Returns the size expressed in bytes.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.words.len() * 4
    }

    /// Returns `true` if the `size`-byte access starting at `address` lies entirely inside the
    /// backed window.
    pub fn covers(&self, address: u32, size: usize) -> bool {
        if size == 0 {
            return self.range.contains(address);
        }
        match u32::try_from(size - 1).ok().and_then(|delta| {
            address.checked_add(delta)
        }) {
            Some(last) => self.range.contains(address) && self.range.contains(last),
            None => false,
        }
    }

    /// Reads `buf.len()` bytes starting at guest physical `address` into `buf`.
    ///
    /// Returns `false` (leaving `buf` untouched) if any part of the access falls outside the
    /// backed window.
    pub fn read(&self, address: u32, buf: &mut [u8]) -> bool {
        if !self.covers(address, buf.len()) {
            return false;
        }
        let start = (address - self.range.start()) as usize;
        let mut i = 0;
        while i < buf.len() {
            let offset = start + i;
            let word = self.words[offset / 4].load(Ordering::Relaxed).to_le_bytes();
            let lo = offset % 4;
            let n = (4 - lo).min(buf.len() - i);
            buf[i..i + n].copy_from_slice(&word[lo..lo + n]);
            i += n;
        }
        true
    }

    /// Writes `buf` to guest physical `address`.
    ///
    /// Returns `false` (without writing anything) if any part of the access falls outside the
    /// backed window. Partially covered words are merged with a read-modify-write so concurrent
    /// stores to the other bytes of the word are not lost.
    pub fn write(&self, address: u32, buf: &[u8]) -> bool {
        if !self.covers(address, buf.len()) {
            return false;
        }
        let start = (address - self.range.start()) as usize;
        let mut i = 0;
        while i < buf.len() {
            let offset = start + i;
            let lo = offset % 4;
            let n = (4 - lo).min(buf.len() - i);
            let word = &self.words[offset / 4];
            if n == 4 {
                word.store(u32::from_le_bytes(buf[i..i + 4].try_into().unwrap()), Ordering::Relaxed);
            } else {
                let src = &buf[i..i + n];
                word.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |old| {
                    let mut bytes = old.to_le_bytes();
                    bytes[lo..lo + n].copy_from_slice(src);
                    Some(u32::from_le_bytes(bytes))
                })
                .unwrap();
            }
            i += n;
        }
        true
    }

    /// Loads the naturally-aligned word at `address`. Fast path for instruction fetch and `lw`.
    ///
    /// Returns `None` if `address` is not word-aligned or outside the backed window.
    pub fn load_word(&self, address: u32) -> Option<u32> {
        let index = self.word_index(address)?;
        Some(self.words[index].load(Ordering::Relaxed))
    }

    /// Stores a naturally-aligned word at `address`. Fast path for `sw`.
    pub fn store_word(&self, address: u32, value: u32) -> bool {
        match self.word_index(address) {
            Some(index) => {
                self.words[index].store(value, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Atomically replaces the naturally-aligned word at `address` with `f(old)`, returning the
    /// old value. Sequentially consistent; this is the host primitive backing AMO instructions
    /// and page-table A/D updates.
    pub fn fetch_update_word(&self, address: u32, f: impl Fn(u32) -> u32) -> Option<u32> {
        let index = self.word_index(address)?;
        self.words[index]
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |old| Some(f(old)))
            .ok()
    }

    fn word_index(&self, address: u32) -> Option<usize> {
        if address % 4 != 0 || !self.range.contains(address) {
            return None;
        }
        Some(((address - self.range.start()) / 4) as usize)
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum PhysMemoryError {
    #[error("physical memory size must be non-zero")]
    ZeroSize,
    #[error("physical memory window ({base:#010x}, {size:#x} bytes) must be word-aligned")]
    Misaligned { base: u32, size: usize },
    #[error("physical memory window ({base:#010x}, {size:#x} bytes) exceeds the 32-bit address space")]
    OutOfAddressSpace { base: u32, size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_validation() {
        assert!(PhysMemory::new(0x8000_0000, 0).is_err());
        assert!(PhysMemory::new(0x8000_0001, 4096).is_err());
        assert!(PhysMemory::new(0xFFFF_F000, 0x2000).is_err());
        assert!(PhysMemory::new(0x8000_0000, 0x1000).is_ok());
    }

    #[test]
    fn test_read_write_round_trip() {
        let mem = PhysMemory::new(0x8000_0000, 0x1000).unwrap();
        assert!(mem.write(0x8000_0010, &[0xBE, 0xBA, 0xFE, 0xCA]));
        assert_eq!(Some(0xCAFEBABE), mem.load_word(0x8000_0010));
        let mut buf = [0u8; 4];
        assert!(mem.read(0x8000_0010, &mut buf));
        assert_eq!([0xBE, 0xBA, 0xFE, 0xCA], buf);
    }

    #[test]
    fn test_unaligned_access_spans_words() {
        let mem = PhysMemory::new(0x8000_0000, 0x1000).unwrap();
        assert!(mem.write(0x8000_0002, &[0x11, 0x22, 0x33, 0x44]));
        let mut buf = [0u8; 4];
        assert!(mem.read(0x8000_0002, &mut buf));
        assert_eq!([0x11, 0x22, 0x33, 0x44], buf);
        assert_eq!(Some(0x2211_0000), mem.load_word(0x8000_0000));
        assert_eq!(Some(0x0000_4433), mem.load_word(0x8000_0004));
    }

    #[test]
    fn test_out_of_window_access() {
        let mem = PhysMemory::new(0x8000_0000, 0x1000).unwrap();
        let mut buf = [0u8; 4];
        assert!(!mem.read(0x8000_0FFE, &mut buf));
        assert!(!mem.write(0x7FFF_FFFF, &[0; 2]));
        assert_eq!(None, mem.load_word(0x8000_1000));
        assert_eq!(None, mem.load_word(0x8000_0002));
    }

    #[test]
    fn test_fetch_update_word() {
        let mem = PhysMemory::new(0x8000_0000, 0x1000).unwrap();
        mem.store_word(0x8000_0020, 40);
        let old = mem.fetch_update_word(0x8000_0020, |v| v + 2).unwrap();
        assert_eq!(40, old);
        assert_eq!(Some(42), mem.load_word(0x8000_0020));
    }
}
