//! PM4 Emulator with EmulateCallbacks Trait
//!
//! Walks the indirect buffers of a submit in execution order and reports
//! what it sees through `EmulateCallbacks`:
//! - `CP_INDIRECT_BUFFER_PFE/PFD` recurse into a Call IB
//! - `CP_INDIRECT_BUFFER_CHAIN` tail-continues into a Chain IB; a run of
//!   chains is closed by a single `on_ib_end`
//!
//! Only control flow is emulated; register state is not tracked.

use crate::core::capture::{IndirectBufferInfo, SubmitInfo};
use crate::core::memory::{is_resident, read_dword, read_dwords, MemoryReader};
use crate::core::pm4::{self, opcode, packet_size_in_dwords, Pm4Type, Type7Header};
use crate::error::{HierarchyError, Result};

/// Deepest Call IB nesting followed
pub const MAX_IB_DEPTH: usize = 8;

/// Longest run of chained IBs followed before giving up on a cycle
pub const MAX_CHAIN_LENGTH: usize = 1 << 16;

/// How an indirect buffer was entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IbType {
    /// Listed directly by the submit
    Normal,
    /// Called from another IB; returns to it
    Call,
    /// Continued from another IB; does not return
    Chain,
}

/// Trait for receiving emulation events
///
/// Every callback may abort the pass with an error, which the emulator
/// propagates unchanged.
pub trait EmulateCallbacks {
    fn on_submit_start(&mut self, submit_index: u32, info: &SubmitInfo) -> Result<()>;

    fn on_submit_end(&mut self, submit_index: u32, info: &SubmitInfo) -> Result<()>;

    /// Called when an IB is entered, before any of its packets
    ///
    /// `ib_index` is the index of the submit-level IB the walk descends from.
    fn on_ib_start(
        &mut self,
        submit_index: u32,
        ib_index: u32,
        info: &IndirectBufferInfo,
        ib_type: IbType,
    ) -> Result<()>;

    /// Called once per Normal/Call IB, after any chain it continued into
    fn on_ib_end(&mut self, submit_index: u32, ib_index: u32, info: &IndirectBufferInfo) -> Result<()>;

    /// Called for every header DWORD, in program order
    fn on_packet(
        &mut self,
        mem: &dyn MemoryReader,
        submit_index: u32,
        ib_index: u32,
        va_addr: u64,
        pm4_type: Pm4Type,
        header: u32,
    ) -> Result<()>;
}

/// Control-flow emulator for PM4 indirect buffers
#[derive(Debug, Default)]
pub struct Pm4Emulator {
    /// Current Call depth (top-level IB = 1)
    depth: usize,
}

impl Pm4Emulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emulate every IB of one submit
    pub fn execute_submit<C: EmulateCallbacks>(
        &mut self,
        callbacks: &mut C,
        mem: &dyn MemoryReader,
        submit_index: u32,
        ibs: &[IndirectBufferInfo],
    ) -> Result<()> {
        self.depth = 0;
        for (i, ib) in ibs.iter().enumerate() {
            let ib_index = i as u32;
            callbacks.on_ib_start(submit_index, ib_index, ib, IbType::Normal)?;
            self.run_ib(callbacks, mem, submit_index, ib_index, *ib)?;
        }
        Ok(())
    }

    /// Execute an IB and any chain it continues into, then report its end
    fn run_ib<C: EmulateCallbacks>(
        &mut self,
        callbacks: &mut C,
        mem: &dyn MemoryReader,
        submit_index: u32,
        ib_index: u32,
        ib: IndirectBufferInfo,
    ) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_IB_DEPTH {
            return Err(HierarchyError::invariant(format!(
                "IB nesting deeper than {MAX_IB_DEPTH} at 0x{:x}",
                ib.va_addr
            )));
        }

        let mut current = ib;
        let mut chain_length = 0;
        loop {
            log::trace!(
                "submit {submit_index}: executing IB at 0x{:x} ({} dwords)",
                current.va_addr,
                current.size_in_dwords
            );
            let next = if current.skip {
                None
            } else {
                self.run_packets(callbacks, mem, submit_index, ib_index, &current)?
            };
            match next {
                Some(chained) => {
                    chain_length += 1;
                    if chain_length > MAX_CHAIN_LENGTH {
                        return Err(HierarchyError::invariant(format!(
                            "chain of more than {MAX_CHAIN_LENGTH} IBs at 0x{:x}",
                            chained.va_addr
                        )));
                    }
                    callbacks.on_ib_start(submit_index, ib_index, &chained, IbType::Chain)?;
                    current = chained;
                }
                None => break,
            }
        }

        callbacks.on_ib_end(submit_index, ib_index, &current)?;
        self.depth -= 1;
        Ok(())
    }

    /// Report packets of one IB; returns the IB it chains into, if any
    fn run_packets<C: EmulateCallbacks>(
        &mut self,
        callbacks: &mut C,
        mem: &dyn MemoryReader,
        submit_index: u32,
        ib_index: u32,
        ib: &IndirectBufferInfo,
    ) -> Result<Option<IndirectBufferInfo>> {
        let Some(end) = ib.va_addr.checked_add(ib.size_in_bytes()) else {
            return Err(HierarchyError::MemoryRead {
                submit_index,
                va_addr: ib.va_addr,
                size: ib.size_in_bytes() as usize,
            });
        };
        let mut va = ib.va_addr;
        while va < end {
            let header = read_dword(mem, submit_index, va)?;
            let pm4_type = Pm4Type::of(header);
            callbacks.on_packet(mem, submit_index, ib_index, va, pm4_type, header)?;

            if pm4_type == Pm4Type::Type7 {
                let op = Type7Header(header).opcode();
                if pm4::is_indirect_buffer_call(op) || op == opcode::CP_INDIRECT_BUFFER_CHAIN {
                    if let Some(target) = read_ib_target(mem, submit_index, va, header, ib)? {
                        if op == opcode::CP_INDIRECT_BUFFER_CHAIN {
                            // Remaining packets of this IB are never executed
                            return Ok(Some(target));
                        }
                        callbacks.on_ib_start(submit_index, ib_index, &target, IbType::Call)?;
                        self.run_ib(callbacks, mem, submit_index, ib_index, target)?;
                    }
                }
            } else if pm4_type == Pm4Type::Unknown {
                log::warn!("submit {submit_index}: unknown packet header 0x{header:x} at 0x{va:x}");
            }

            va = va.saturating_add(packet_size_in_dwords(pm4_type, header) as u64 * 4);
        }
        Ok(None)
    }
}

/// Decode the target of an indirect-buffer packet
///
/// Packets too short to hold an address and size are not followed.
fn read_ib_target(
    mem: &dyn MemoryReader,
    submit_index: u32,
    va: u64,
    header: u32,
    parent: &IndirectBufferInfo,
) -> Result<Option<IndirectBufferInfo>> {
    if Type7Header(header).count() < 3 {
        return Ok(None);
    }
    let Some(payload_addr) = va.checked_add(4) else {
        return Err(HierarchyError::MemoryRead {
            submit_index,
            va_addr: va,
            size: 16,
        });
    };
    let payload = read_dwords(mem, submit_index, payload_addr, 3)?;
    let va_addr = (payload[0] as u64) | ((payload[1] as u64) << 32);
    let size_in_dwords = payload[2] & pm4::IB_SIZE_MASK;
    let captured = is_resident(mem, submit_index, va_addr, size_in_dwords as usize * 4);
    Ok(Some(IndirectBufferInfo {
        va_addr,
        size_in_dwords,
        skip: !captured,
        is_constant_engine: parent.is_constant_engine,
    }))
}
