//! GPU virtual-memory readers
//!
//! The decoder never owns capture memory; it fetches packet payloads
//! through a `MemoryReader`. Two readers ship with the crate:
//! - `DwordMemory`: one flat command buffer where VA == byte offset
//! - `CaptureMemory`: captured blocks placed at their GPU addresses

use crate::error::{HierarchyError, Result};

/// Byte-addressable view of captured GPU memory
pub trait MemoryReader {
    /// Copy `dst.len()` bytes starting at `va_addr` into `dst`.
    ///
    /// Returns false when any part of the range is not resident.
    fn copy_memory(&self, dst: &mut [u8], submit_index: u32, va_addr: u64) -> bool;
}

/// Read `size` bytes, failing the pass when the range is missing
pub fn read_bytes(
    mem: &dyn MemoryReader,
    submit_index: u32,
    va_addr: u64,
    size: usize,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    if !mem.copy_memory(&mut buf, submit_index, va_addr) {
        return Err(HierarchyError::MemoryRead {
            submit_index,
            va_addr,
            size,
        });
    }
    Ok(buf)
}

/// Read one little-endian DWORD
pub fn read_dword(mem: &dyn MemoryReader, submit_index: u32, va_addr: u64) -> Result<u32> {
    let mut buf = [0u8; 4];
    if !mem.copy_memory(&mut buf, submit_index, va_addr) {
        return Err(HierarchyError::MemoryRead {
            submit_index,
            va_addr,
            size: 4,
        });
    }
    Ok(u32::from_le_bytes(buf))
}

/// Read `count` consecutive DWORDs
pub fn read_dwords(
    mem: &dyn MemoryReader,
    submit_index: u32,
    va_addr: u64,
    count: usize,
) -> Result<Vec<u32>> {
    let bytes = read_bytes(mem, submit_index, va_addr, count * 4)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Check residency without failing
pub fn is_resident(mem: &dyn MemoryReader, submit_index: u32, va_addr: u64, size: usize) -> bool {
    if size == 0 {
        return true;
    }
    // First and last DWORD are enough to tell a truncated capture apart
    let mut probe = [0u8; 4];
    let head = size.min(4);
    let Some(tail_addr) = va_addr.checked_add((size - head) as u64) else {
        return false;
    };
    mem.copy_memory(&mut probe[..head], submit_index, va_addr)
        && mem.copy_memory(&mut probe[..head], submit_index, tail_addr)
}

/// A single command buffer; virtual addresses are treated as byte offsets
#[derive(Debug, Clone, Default)]
pub struct DwordMemory {
    bytes: Vec<u8>,
}

impl DwordMemory {
    pub fn from_dwords(dwords: &[u32]) -> Self {
        let mut bytes = Vec::with_capacity(dwords.len() * 4);
        for dw in dwords {
            bytes.extend_from_slice(&dw.to_le_bytes());
        }
        Self { bytes }
    }

    /// Wrap raw little-endian bytes (trailing partial DWORDs are kept but unreadable as DWORDs)
    pub fn from_le_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[inline]
    pub fn size_in_dwords(&self) -> u32 {
        (self.bytes.len() / 4) as u32
    }
}

impl MemoryReader for DwordMemory {
    fn copy_memory(&self, dst: &mut [u8], _submit_index: u32, va_addr: u64) -> bool {
        let Ok(start) = usize::try_from(va_addr) else {
            return false;
        };
        let Some(end) = start.checked_add(dst.len()) else {
            return false;
        };
        match self.bytes.get(start..end) {
            Some(src) => {
                dst.copy_from_slice(src);
                true
            }
            None => false,
        }
    }
}

/// A captured memory range
#[derive(Debug, Clone)]
pub struct MemoryBlock {
    pub va_addr: u64,
    pub bytes: Vec<u8>,
}

impl MemoryBlock {
    #[inline]
    fn end(&self) -> u64 {
        self.va_addr.saturating_add(self.bytes.len() as u64)
    }
}

/// Captured memory blocks sorted by GPU virtual address
#[derive(Debug, Clone, Default)]
pub struct CaptureMemory {
    blocks: Vec<MemoryBlock>,
}

impl CaptureMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block; blocks must not overlap
    pub fn add_block(&mut self, va_addr: u64, bytes: Vec<u8>) -> Result<()> {
        let block = MemoryBlock { va_addr, bytes };
        let pos = self.blocks.partition_point(|b| b.va_addr < va_addr);
        let overlaps_prev = pos > 0 && self.blocks[pos - 1].end() > va_addr;
        let overlaps_next = self
            .blocks
            .get(pos)
            .is_some_and(|next| block.end() > next.va_addr);
        if overlaps_prev || overlaps_next {
            return Err(HierarchyError::invariant(format!(
                "memory block at 0x{va_addr:x} overlaps an existing block"
            )));
        }
        self.blocks.insert(pos, block);
        Ok(())
    }

    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl MemoryReader for CaptureMemory {
    fn copy_memory(&self, dst: &mut [u8], _submit_index: u32, va_addr: u64) -> bool {
        // Last block starting at or before va_addr
        let pos = self.blocks.partition_point(|b| b.va_addr <= va_addr);
        if pos == 0 {
            return false;
        }
        let block = &self.blocks[pos - 1];
        let offset = (va_addr - block.va_addr) as usize;
        match offset
            .checked_add(dst.len())
            .and_then(|end| block.bytes.get(offset..end))
        {
            Some(src) => {
                dst.copy_from_slice(src);
                true
            }
            None => false,
        }
    }
}
