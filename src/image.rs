//! MemoryImage: the loaded segments and their sparse edit record.
//!
//! Reads may run across adjacent segments; writes never cross a segment in
//! one call (the caller continues with the tail). Persisting touches only
//! the file offsets recorded in each segment's sparse diff.

use std::io::{Seek, SeekFrom, Write};
use tracing::{debug, trace};

use crate::core::segment::{align_up, LoadedSegment, SegmentFlags};
use crate::error::{PatchError, Result};

/// Bounded memory reads by virtual address.
pub trait MemoryView {
    /// Read `len` bytes starting at `address`.
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>>;
}

/// A `PT_LOAD` entry as the loader reports it, before page alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSegment {
    pub virtual_address: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub memory_size: u64,
    pub flags: SegmentFlags,
}

/// All loaded segments of one binary, ordered by base address.
#[derive(Debug, Clone, Default)]
pub struct MemoryImage {
    segments: Vec<LoadedSegment>,
}

impl MemoryImage {
    pub fn new(mut segments: Vec<LoadedSegment>) -> Self {
        segments.sort_by_key(|s| s.base_virtual_address);
        Self { segments }
    }

    /// Page-align the loader's raw segments and copy their file bytes out of
    /// `file`.
    pub fn from_raw(raw: &[RawSegment], file: &[u8], page_size: u64) -> Result<Self> {
        if !page_size.is_power_of_two() {
            return Err(PatchError::InvalidInput(format!(
                "page size {:#x} is not a power of two",
                page_size
            )));
        }

        let mut segments = Vec::with_capacity(raw.len());
        for seg in raw {
            let page_offset = seg.virtual_address & (page_size - 1);
            let base = seg.virtual_address - page_offset;
            let file_offset = seg.file_offset.checked_sub(page_offset).ok_or_else(|| {
                PatchError::InvalidInput(format!(
                    "segment at {:#x} has file offset {:#x} below its page offset {:#x}",
                    seg.virtual_address, seg.file_offset, page_offset
                ))
            })?;
            let overflow = || {
                PatchError::InvalidInput(format!(
                    "segment at {:#x} has sizes that overflow the address space",
                    seg.virtual_address
                ))
            };
            let backed = seg.file_size.checked_add(page_offset).ok_or_else(overflow)?;
            let file_end = file_offset.checked_add(backed).ok_or_else(overflow)?;
            let start = usize::try_from(file_offset)
                .map_err(|_| PatchError::InvalidInput("segment offset overflow".into()))?;
            let end = usize::try_from(file_end)
                .map_err(|_| PatchError::InvalidInput("segment size overflow".into()))?;
            let bytes = file.get(start..end).ok_or_else(|| {
                PatchError::InvalidInput(format!(
                    "segment at {:#x} reads file bytes {:#x}..{:#x} past end of file ({:#x})",
                    seg.virtual_address,
                    start,
                    end,
                    file.len()
                ))
            })?;
            let mapped_size = seg
                .memory_size
                .max(seg.file_size)
                .checked_add(page_offset)
                .and_then(|size| align_up(size, page_size))
                .ok_or_else(overflow)?;
            if base.checked_add(mapped_size).is_none() {
                return Err(overflow());
            }

            debug!(
                base = %format_args!("{:#x}", base),
                file_offset = %format_args!("{:#x}", file_offset),
                mapped_size = %format_args!("{:#x}", mapped_size),
                backed,
                "Loaded segment"
            );
            segments.push(LoadedSegment::new(
                base,
                file_offset,
                mapped_size,
                seg.flags,
                bytes.to_vec(),
            ));
        }
        Ok(Self::new(segments))
    }

    pub fn segments(&self) -> &[LoadedSegment] {
        &self.segments
    }

    /// First segment (in base order) whose file-backed bytes cover `address`,
    /// with the buffer offset of `address`.
    fn locate(&self, address: u64) -> Option<(usize, usize)> {
        self.segments
            .iter()
            .enumerate()
            .find_map(|(i, seg)| seg.buffer_offset(address).map(|off| (i, off)))
    }

    /// Read `len` bytes at `address`, continuing into the segment that backs
    /// the next address whenever the current one runs out. The buffer grows
    /// only by what each segment supplies.
    pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut cursor = address;
        while out.len() < len {
            let (idx, offset) = self
                .locate(cursor)
                .ok_or(PatchError::AddressUnmapped(cursor))?;
            let bytes = self.segments[idx].bytes();
            let take = (len - out.len()).min(bytes.len() - offset);
            out.extend_from_slice(&bytes[offset..offset + take]);
            cursor = cursor
                .checked_add(take as u64)
                .ok_or(PatchError::AddressUnmapped(u64::MAX))?;
        }
        Ok(out)
    }

    /// Write the leading bytes of `data` that fit in the segment backing
    /// `address`. Returns the number of bytes written, which is at least one
    /// for non-empty `data` and less than `data.len()` when the write reaches
    /// the end of the segment.
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let (idx, offset) = self
            .locate(address)
            .ok_or(PatchError::AddressUnmapped(address))?;
        let written = self.segments[idx].write_at(offset, data);
        trace!(
            address = %format_args!("{:#x}", address),
            written,
            requested = data.len(),
            "Segment write"
        );
        Ok(written)
    }

    /// Write every recorded edit into `out` at its file offset. Contiguous
    /// edits are written as one run; nothing else in `out` is touched.
    /// Returns the number of bytes written.
    pub fn persist<W: Write + Seek>(&self, out: &mut W) -> Result<usize> {
        let mut total = 0usize;
        for seg in &self.segments {
            let mut run_start: Option<u64> = None;
            let mut run: Vec<u8> = Vec::new();
            for (offset, byte) in seg.dirty() {
                let file_offset = seg.file_offset + offset as u64;
                match run_start {
                    Some(start) if start + run.len() as u64 == file_offset => run.push(byte),
                    _ => {
                        if let Some(start) = run_start {
                            total += flush_run(out, start, &run)?;
                        }
                        run_start = Some(file_offset);
                        run.clear();
                        run.push(byte);
                    }
                }
            }
            if let Some(start) = run_start {
                total += flush_run(out, start, &run)?;
            }
        }
        out.flush()?;
        Ok(total)
    }

    /// File offsets holding edits, ascending and deduplicated.
    pub fn dirty_file_offsets(&self) -> Vec<u64> {
        let mut offsets: Vec<u64> = self
            .segments
            .iter()
            .flat_map(|seg| seg.dirty().map(move |(off, _)| seg.file_offset + off as u64))
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        offsets
    }

    /// Whether any byte has been written since load.
    pub fn is_dirty(&self) -> bool {
        self.segments.iter().any(|s| s.dirty_len() > 0)
    }
}

fn flush_run<W: Write + Seek>(out: &mut W, file_offset: u64, run: &[u8]) -> Result<usize> {
    trace!(
        file_offset = %format_args!("{:#x}", file_offset),
        len = run.len(),
        "Persisting edited bytes"
    );
    out.seek(SeekFrom::Start(file_offset))?;
    out.write_all(run)?;
    Ok(run.len())
}

impl MemoryView for MemoryImage {
    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        self.read(address, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn rx() -> SegmentFlags {
        SegmentFlags::READ | SegmentFlags::EXECUTE
    }

    /// Two adjacent one-page segments at 0x1000 and 0x2000, mapped from file
    /// offsets 0x0 and 0x1000.
    fn two_pages() -> MemoryImage {
        let first = LoadedSegment::new(0x1000, 0, 0x1000, rx(), vec![0xaa; 0x1000]);
        let second = LoadedSegment::new(0x2000, 0x1000, 0x1000, rx(), vec![0xbb; 0x1000]);
        MemoryImage::new(vec![second, first])
    }

    #[test]
    fn from_raw_page_aligns() {
        let file: Vec<u8> = (0..0x300u32).map(|i| i as u8).collect();
        let raw = [RawSegment {
            virtual_address: 0x400120,
            file_offset: 0x120,
            file_size: 0x80,
            memory_size: 0x100,
            flags: rx(),
        }];
        let image = MemoryImage::from_raw(&raw, &file, 0x1000).unwrap();
        let seg = &image.segments()[0];
        assert_eq!(seg.base_virtual_address, 0x400000);
        assert_eq!(seg.file_offset, 0);
        assert_eq!(seg.mapped_size, 0x1000);
        assert_eq!(seg.bytes().len(), 0x1a0);
        assert_eq!(image.read(0x400120, 2).unwrap(), vec![0x20, 0x21]);
        // Inside the mapping but past the file-backed bytes
        assert!(matches!(
            image.read(0x4001a0, 1),
            Err(PatchError::AddressUnmapped(0x4001a0))
        ));
    }

    #[test]
    fn from_raw_rejects_truncated_file() {
        let raw = [RawSegment {
            virtual_address: 0x1000,
            file_offset: 0,
            file_size: 0x100,
            memory_size: 0x100,
            flags: rx(),
        }];
        assert!(matches!(
            MemoryImage::from_raw(&raw, &[0u8; 0x10], 0x1000),
            Err(PatchError::InvalidInput(_))
        ));
        assert!(MemoryImage::from_raw(&raw, &[0u8; 0x100], 0x1001).is_err());
    }

    #[test]
    fn from_raw_rejects_overflowing_sizes() {
        let file = [0u8; 0x100];
        let huge_file_size = RawSegment {
            virtual_address: 0x1010,
            file_offset: 0x10,
            file_size: u64::MAX - 4,
            memory_size: 0x20,
            flags: rx(),
        };
        assert!(matches!(
            MemoryImage::from_raw(&[huge_file_size], &file, 0x1000),
            Err(PatchError::InvalidInput(_))
        ));

        let huge_memory_size = RawSegment {
            virtual_address: 0x1010,
            file_offset: 0x10,
            file_size: 0x20,
            memory_size: u64::MAX - 2,
            flags: rx(),
        };
        assert!(matches!(
            MemoryImage::from_raw(&[huge_memory_size], &file, 0x1000),
            Err(PatchError::InvalidInput(_))
        ));

        // Fits in a u64 on its own but not once placed at its base address
        let past_top = RawSegment {
            virtual_address: 0x1000,
            file_offset: 0,
            file_size: 0x20,
            memory_size: u64::MAX - 0xfff,
            flags: rx(),
        };
        assert!(MemoryImage::from_raw(&[past_top], &file, 0x1000).is_err());
    }

    #[test]
    fn oversized_read_fails_without_reserving() {
        let image = two_pages();
        assert!(matches!(
            image.read(0x1000, usize::MAX),
            Err(PatchError::AddressUnmapped(0x3000))
        ));
        assert!(matches!(
            image.read(0x1000, 1 << 62),
            Err(PatchError::AddressUnmapped(0x3000))
        ));
    }

    #[test]
    fn read_spans_segments() {
        let image = two_pages();
        assert_eq!(image.read(0x1ffe, 4).unwrap(), vec![0xaa, 0xaa, 0xbb, 0xbb]);
        assert!(image.read(0x2fff, 2).is_err());
        assert!(matches!(
            image.read(0x500, 1),
            Err(PatchError::AddressUnmapped(0x500))
        ));
        assert!(image.read(0x500, 0).unwrap().is_empty());
    }

    #[test]
    fn write_stops_at_segment_end() {
        let mut image = two_pages();
        assert_eq!(image.write(0x1fff, &[1, 2, 3, 4]).unwrap(), 1);
        assert_eq!(image.write(0x2000, &[2, 3, 4]).unwrap(), 3);
        assert_eq!(image.read(0x1fff, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(image.dirty_file_offsets(), vec![0xfff, 0x1000, 0x1001, 0x1002]);
        assert!(matches!(
            image.write(0x3000, &[0]),
            Err(PatchError::AddressUnmapped(0x3000))
        ));
    }

    #[test]
    fn persist_touches_only_dirty_offsets() {
        let mut image = two_pages();
        image.write(0x1010, &[0x11, 0x22]).unwrap();
        image.write(0x2004, &[0x33]).unwrap();
        // Rewriting a byte with its current value still counts as an edit
        image.write(0x1012, &[0xaa]).unwrap();

        let mut file = Cursor::new(vec![0u8; 0x2000]);
        let written = image.persist(&mut file).unwrap();
        assert_eq!(written, 4);

        let data = file.into_inner();
        assert_eq!(data.len(), 0x2000);
        let changed: Vec<usize> = data
            .iter()
            .enumerate()
            .filter(|(_, &b)| b != 0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(changed, vec![0x10, 0x11, 0x12, 0x1004]);
        assert_eq!(&data[0x10..0x13], &[0x11, 0x22, 0xaa]);
        assert_eq!(data[0x1004], 0x33);
    }
}
