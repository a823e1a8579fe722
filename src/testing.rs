//! PM4 stream assembler for unit tests
//!
//! Builds a flat command buffer where VA == byte offset, matching
//! `DwordMemory`. Regions of the buffer become indirect buffers.

use crate::core::capture::IndirectBufferInfo;
use crate::core::memory::DwordMemory;
use crate::core::pm4::{opcode, Type4Header, Type7Header};
use crate::core::vulkan::{CallMarkerHeader, VkCmdId};

#[derive(Debug, Default)]
pub(crate) struct StreamBuilder {
    dwords: Vec<u32>,
}

impl StreamBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Byte address of the next DWORD
    pub(crate) fn va(&self) -> u64 {
        self.dwords.len() as u64 * 4
    }

    pub(crate) fn raw(&mut self, dword: u32) -> &mut Self {
        self.dwords.push(dword);
        self
    }

    pub(crate) fn type4(&mut self, reg: u32, values: &[u32]) -> &mut Self {
        self.dwords.push(Type4Header::new(reg, values.len() as u32).0);
        self.dwords.extend_from_slice(values);
        self
    }

    pub(crate) fn type7(&mut self, op: u8, payload: &[u32]) -> &mut Self {
        self.dwords.push(Type7Header::new(op, payload.len() as u32).0);
        self.dwords.extend_from_slice(payload);
        self
    }

    pub(crate) fn draw(&mut self) -> &mut Self {
        self.type7(opcode::CP_DRAW_INDX_OFFSET, &[0x4, 1, 3, 0, 0, 0, 3])
    }

    pub(crate) fn dispatch(&mut self) -> &mut Self {
        self.type7(opcode::CP_EXEC_CS, &[0, 8, 8, 1])
    }

    pub(crate) fn wait_for_idle(&mut self) -> &mut Self {
        self.type7(opcode::CP_WAIT_FOR_IDLE, &[])
    }

    pub(crate) fn event_write(&mut self, event: u32) -> &mut Self {
        self.type7(opcode::CP_EVENT_WRITE, &[event])
    }

    /// Plain state packet: one register write
    pub(crate) fn state(&mut self) -> &mut Self {
        self.type4(0x8871, &[0x3])
    }

    /// Call-marker NOP carrying `args` (zero padded to a DWORD)
    pub(crate) fn call(&mut self, cmd: VkCmdId, args: &[u8]) -> &mut Self {
        let mut payload = vec![CallMarkerHeader::new(cmd).0];
        for chunk in args.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            payload.push(u32::from_le_bytes(word));
        }
        self.type7(opcode::CP_NOP, &payload)
    }

    /// Debug-label call with a NUL-terminated label
    pub(crate) fn label(&mut self, cmd: VkCmdId, text: &str) -> &mut Self {
        let mut args = text.as_bytes().to_vec();
        args.push(0);
        self.call(cmd, &args)
    }

    pub(crate) fn ib(&mut self, op: u8, target: &IndirectBufferInfo) -> &mut Self {
        self.type7(
            op,
            &[
                target.va_addr as u32,
                (target.va_addr >> 32) as u32,
                target.size_in_dwords,
            ],
        )
    }

    /// Assemble an indirect buffer in place and describe it
    pub(crate) fn region(&mut self, f: impl FnOnce(&mut Self)) -> IndirectBufferInfo {
        let start = self.va();
        f(self);
        let size = ((self.va() - start) / 4) as u32;
        IndirectBufferInfo::new(start, size)
    }

    pub(crate) fn memory(&self) -> DwordMemory {
        DwordMemory::from_dwords(&self.dwords)
    }

    pub(crate) fn dwords(&self) -> &[u32] {
        &self.dwords
    }
}
