//! Loaded segment type: one page-aligned, file-backed mapping unit.
//!
//! A `LoadedSegment` owns the live bytes of one `PT_LOAD` program header and
//! a sparse record of every byte written since load. The buffer is the live
//! state; the sparse diff exists only so that saving touches exactly the
//! offsets that were edited.

use bitflags::bitflags;
use std::collections::BTreeMap;
use std::fmt;

bitflags! {
    /// Program header permission bits (`PF_X`, `PF_W`, `PF_R`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = 0x1;
        const WRITE = 0x2;
        const READ = 0x4;
    }
}

impl fmt::Display for SegmentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.contains(SegmentFlags::READ) { 'r' } else { '-' };
        let w = if self.contains(SegmentFlags::WRITE) { 'w' } else { '-' };
        let x = if self.contains(SegmentFlags::EXECUTE) { 'x' } else { '-' };
        write!(f, "{}{}{}", r, w, x)
    }
}

/// Round `value` up to the next multiple of `align` (a power of two).
/// None when the result does not fit in a `u64`.
pub fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    Some(value.checked_add(align - 1)? & !(align - 1))
}

/// A loadable segment after page alignment.
#[derive(Debug, Clone)]
pub struct LoadedSegment {
    /// Page-aligned virtual address of the first buffer byte
    pub base_virtual_address: u64,
    /// File offset of the first buffer byte
    pub file_offset: u64,
    /// Page-rounded size of the virtual mapping
    pub mapped_size: u64,
    /// Permission bits from the program header
    pub flags: SegmentFlags,
    bytes: Vec<u8>,
    dirty: BTreeMap<usize, u8>,
}

impl LoadedSegment {
    /// Create a segment from already-aligned values. `bytes` holds the
    /// file-backed part of the mapping and never grows or shrinks afterwards.
    pub fn new(
        base_virtual_address: u64,
        file_offset: u64,
        mapped_size: u64,
        flags: SegmentFlags,
        bytes: Vec<u8>,
    ) -> Self {
        let mapped_size = mapped_size.max(bytes.len() as u64);
        Self {
            base_virtual_address,
            file_offset,
            mapped_size,
            flags,
            bytes,
            dirty: BTreeMap::new(),
        }
    }

    /// End of the virtual mapping (exclusive).
    pub fn end(&self) -> u64 {
        self.base_virtual_address.saturating_add(self.mapped_size)
    }

    /// Whether `address` lies within the virtual mapping.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base_virtual_address && address < self.end()
    }

    /// File-backed bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Offset of `address` into the buffer, if the byte is file-backed.
    pub fn buffer_offset(&self, address: u64) -> Option<usize> {
        if !self.contains(address) {
            return None;
        }
        let offset = usize::try_from(address - self.base_virtual_address).ok()?;
        (offset < self.bytes.len()).then_some(offset)
    }

    /// Copy as many leading bytes of `data` as fit before the buffer ends,
    /// recording each one in the sparse diff. Returns the count written.
    pub(crate) fn write_at(&mut self, offset: usize, data: &[u8]) -> usize {
        let available = self.bytes.len().saturating_sub(offset);
        let count = available.min(data.len());
        for (i, &byte) in data[..count].iter().enumerate() {
            self.bytes[offset + i] = byte;
            self.dirty.insert(offset + i, byte);
        }
        count
    }

    /// Sparse diff as `(buffer offset, new byte)` pairs in offset order.
    pub fn dirty(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.dirty.iter().map(|(&offset, &byte)| (offset, byte))
    }

    /// Number of distinct bytes written since load.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }
}

impl fmt::Display for LoadedSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x}..{:#x} {} file@{:#x} ({} bytes backed)",
            self.base_virtual_address,
            self.end(),
            self.flags,
            self.file_offset,
            self.bytes.len()
        )
    }
}
