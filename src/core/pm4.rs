//! PM4 packet headers and opcodes
//!
//! Adreno command streams use two packet flavours:
//! - Type4: consecutive register writes (`offset`, `count` values)
//! - Type7: opcode-addressed packets with `count` payload DWORDs
//!
//! Both headers carry odd-parity bits over their count and offset/opcode
//! fields. Any other header word is not a packet start.

/// Header value for a Type4 packet (bits 31:28)
pub const PM4_TYPE4: u32 = 0x4;
/// Header value for a Type7 packet (bits 31:28)
pub const PM4_TYPE7: u32 = 0x7;

/// Opcode stored on packet nodes created from Type4 headers
pub const TYPE4_OPCODE: u8 = u8::MAX;

/// Packet classes the emulator can report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pm4Type {
    Type4,
    Type7,
    Unknown,
}

impl Pm4Type {
    /// Classify a header DWORD, checking the parity bits
    pub fn of(header: u32) -> Pm4Type {
        match header >> 28 {
            PM4_TYPE4 if Type4Header(header).parity_ok() => Pm4Type::Type4,
            PM4_TYPE7 if Type7Header(header).parity_ok() => Pm4Type::Type7,
            _ => Pm4Type::Unknown,
        }
    }
}

/// Odd parity bit over a 32-bit value (matches the CP's header check)
#[inline]
pub const fn odd_parity(val: u32) -> u32 {
    let mut v = val;
    v ^= v >> 16;
    v ^= v >> 8;
    (!0x6996u32 >> ((v ^ (v >> 4)) & 0xf)) & 1
}

/// Type4 header: `| 0100 | p | offset[18:0] | p | count[6:0] |`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Type4Header(pub u32);

impl Type4Header {
    /// Build a header writing `count` registers starting at `offset`
    pub const fn new(offset: u32, count: u32) -> Self {
        let offset = offset & 0x7_ffff;
        let count = count & 0x7f;
        Type4Header(
            (PM4_TYPE4 << 28)
                | count
                | (odd_parity(count) << 7)
                | (offset << 8)
                | (odd_parity(offset) << 27),
        )
    }

    /// Number of registers written
    #[inline]
    pub const fn count(self) -> u32 {
        self.0 & 0x7f
    }

    /// First register offset
    #[inline]
    pub const fn offset(self) -> u32 {
        (self.0 >> 8) & 0x7_ffff
    }

    #[inline]
    fn parity_ok(self) -> bool {
        ((self.0 >> 7) & 1) == odd_parity(self.count())
            && ((self.0 >> 27) & 1) == odd_parity(self.offset())
    }
}

/// Type7 header: `| 0111 | p | opcode[6:0] | p | 0 | count[13:0] |`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Type7Header(pub u32);

impl Type7Header {
    /// Build a header for `opcode` with `count` payload DWORDs
    pub const fn new(opcode: u8, count: u32) -> Self {
        let opcode = (opcode & 0x7f) as u32;
        let count = count & 0x3fff;
        Type7Header(
            (PM4_TYPE7 << 28)
                | count
                | (odd_parity(count) << 15)
                | (opcode << 16)
                | (odd_parity(opcode) << 23),
        )
    }

    /// Number of payload DWORDs following the header
    #[inline]
    pub const fn count(self) -> u32 {
        self.0 & 0x3fff
    }

    #[inline]
    pub const fn opcode(self) -> u8 {
        ((self.0 >> 16) & 0x7f) as u8
    }

    #[inline]
    fn parity_ok(self) -> bool {
        ((self.0 >> 15) & 1) == odd_parity(self.count())
            && ((self.0 >> 23) & 1) == odd_parity(self.opcode() as u32)
    }
}

/// Total packet length in DWORDs (header included)
#[inline]
pub fn packet_size_in_dwords(pm4_type: Pm4Type, header: u32) -> u32 {
    match pm4_type {
        Pm4Type::Type4 => 1 + Type4Header(header).count(),
        Pm4Type::Type7 => 1 + Type7Header(header).count(),
        Pm4Type::Unknown => 1,
    }
}

/// Type7 opcodes referenced by the decoder
pub mod opcode {
    pub const CP_NOP: u8 = 0x10;
    pub const CP_RECORD_PFP_TIMESTAMP: u8 = 0x11;
    pub const CP_WAIT_MEM_WRITES: u8 = 0x12;
    pub const CP_WAIT_FOR_ME: u8 = 0x13;
    pub const CP_WAIT_MEM_GTE: u8 = 0x14;
    pub const CP_SKIP_IB2_ENABLE_GLOBAL: u8 = 0x1d;
    pub const CP_REG_RMW: u8 = 0x21;
    pub const CP_SKIP_IB2_ENABLE_LOCAL: u8 = 0x23;
    pub const CP_DRAW_AUTO: u8 = 0x24;
    pub const CP_WAIT_FOR_IDLE: u8 = 0x26;
    pub const CP_DRAW_INDIRECT: u8 = 0x28;
    pub const CP_DRAW_INDX_INDIRECT: u8 = 0x29;
    pub const CP_DRAW_INDIRECT_MULTI: u8 = 0x2a;
    pub const CP_BLIT: u8 = 0x2c;
    pub const CP_SET_BIN_DATA5: u8 = 0x2f;
    pub const CP_LOAD_STATE6_GEOM: u8 = 0x32;
    pub const CP_EXEC_CS: u8 = 0x33;
    pub const CP_LOAD_STATE6_FRAG: u8 = 0x34;
    pub const CP_LOAD_STATE6: u8 = 0x36;
    pub const CP_INDIRECT_BUFFER_PFD: u8 = 0x37;
    pub const CP_DRAW_INDX_OFFSET: u8 = 0x38;
    pub const CP_WAIT_REG_MEM: u8 = 0x3c;
    pub const CP_MEM_WRITE: u8 = 0x3d;
    pub const CP_REG_TO_MEM: u8 = 0x3e;
    pub const CP_INDIRECT_BUFFER_PFE: u8 = 0x3f;
    pub const CP_EXEC_CS_INDIRECT: u8 = 0x41;
    pub const CP_MEM_TO_REG: u8 = 0x42;
    pub const CP_SET_DRAW_STATE: u8 = 0x43;
    pub const CP_EVENT_WRITE: u8 = 0x46;
    pub const CP_START_BIN: u8 = 0x50;
    pub const CP_END_BIN: u8 = 0x51;
    pub const CP_INDIRECT_BUFFER_CHAIN: u8 = 0x57;
    pub const CP_CONTEXT_REG_BUNCH: u8 = 0x5c;
    pub const CP_SET_MODE: u8 = 0x63;
    pub const CP_SET_MARKER: u8 = 0x65;
}

/// Display name of a Type7 opcode
pub fn opcode_name(op: u8) -> Option<&'static str> {
    use opcode::*;
    let name = match op {
        CP_NOP => "CP_NOP",
        CP_RECORD_PFP_TIMESTAMP => "CP_RECORD_PFP_TIMESTAMP",
        CP_WAIT_MEM_WRITES => "CP_WAIT_MEM_WRITES",
        CP_WAIT_FOR_ME => "CP_WAIT_FOR_ME",
        CP_WAIT_MEM_GTE => "CP_WAIT_MEM_GTE",
        CP_SKIP_IB2_ENABLE_GLOBAL => "CP_SKIP_IB2_ENABLE_GLOBAL",
        CP_REG_RMW => "CP_REG_RMW",
        CP_SKIP_IB2_ENABLE_LOCAL => "CP_SKIP_IB2_ENABLE_LOCAL",
        CP_DRAW_AUTO => "CP_DRAW_AUTO",
        CP_WAIT_FOR_IDLE => "CP_WAIT_FOR_IDLE",
        CP_DRAW_INDIRECT => "CP_DRAW_INDIRECT",
        CP_DRAW_INDX_INDIRECT => "CP_DRAW_INDX_INDIRECT",
        CP_DRAW_INDIRECT_MULTI => "CP_DRAW_INDIRECT_MULTI",
        CP_BLIT => "CP_BLIT",
        CP_SET_BIN_DATA5 => "CP_SET_BIN_DATA5",
        CP_LOAD_STATE6_GEOM => "CP_LOAD_STATE6_GEOM",
        CP_EXEC_CS => "CP_EXEC_CS",
        CP_LOAD_STATE6_FRAG => "CP_LOAD_STATE6_FRAG",
        CP_LOAD_STATE6 => "CP_LOAD_STATE6",
        CP_INDIRECT_BUFFER_PFD => "CP_INDIRECT_BUFFER_PFD",
        CP_DRAW_INDX_OFFSET => "CP_DRAW_INDX_OFFSET",
        CP_WAIT_REG_MEM => "CP_WAIT_REG_MEM",
        CP_MEM_WRITE => "CP_MEM_WRITE",
        CP_REG_TO_MEM => "CP_REG_TO_MEM",
        CP_INDIRECT_BUFFER_PFE => "CP_INDIRECT_BUFFER_PFE",
        CP_EXEC_CS_INDIRECT => "CP_EXEC_CS_INDIRECT",
        CP_MEM_TO_REG => "CP_MEM_TO_REG",
        CP_SET_DRAW_STATE => "CP_SET_DRAW_STATE",
        CP_EVENT_WRITE => "CP_EVENT_WRITE",
        CP_START_BIN => "CP_START_BIN",
        CP_END_BIN => "CP_END_BIN",
        CP_INDIRECT_BUFFER_CHAIN => "CP_INDIRECT_BUFFER_CHAIN",
        CP_CONTEXT_REG_BUNCH => "CP_CONTEXT_REG_BUNCH",
        CP_SET_MODE => "CP_SET_MODE",
        CP_SET_MARKER => "CP_SET_MARKER",
        _ => return None,
    };
    Some(name)
}

/// Draw, dispatch and blit packets terminate a run of state packets
#[inline]
pub fn is_draw_dispatch_dma_event(op: u8) -> bool {
    use opcode::*;
    matches!(
        op,
        CP_DRAW_INDX_OFFSET
            | CP_DRAW_INDIRECT
            | CP_DRAW_INDX_INDIRECT
            | CP_DRAW_INDIRECT_MULTI
            | CP_DRAW_AUTO
            | CP_EXEC_CS
            | CP_EXEC_CS_INDIRECT
            | CP_BLIT
    )
}

/// Event node label for a draw/dispatch/blit opcode
pub fn event_name(op: u8) -> &'static str {
    use opcode::*;
    match op {
        CP_DRAW_INDX_OFFSET => "DrawIndexOffset",
        CP_DRAW_INDIRECT => "DrawIndirect",
        CP_DRAW_INDX_INDIRECT => "DrawIndexIndirect",
        CP_DRAW_INDIRECT_MULTI => "DrawIndirectMulti",
        CP_DRAW_AUTO => "DrawAuto",
        CP_EXEC_CS => "Dispatch",
        CP_EXEC_CS_INDIRECT => "DispatchIndirect",
        CP_BLIT => "Blit",
        _ => "Unknown",
    }
}

/// Indirect-buffer packets carry `addr_lo`, `addr_hi`, `size` after the header
#[inline]
pub fn is_indirect_buffer_call(op: u8) -> bool {
    op == opcode::CP_INDIRECT_BUFFER_PFE || op == opcode::CP_INDIRECT_BUFFER_PFD
}

/// Mask of the size field in the third IB packet DWORD
pub const IB_SIZE_MASK: u32 = 0x000f_ffff;

/// `vgt_event_type` values written by CP_EVENT_WRITE
pub mod event_type {
    pub const CACHE_FLUSH_TS: u32 = 4;
    pub const CACHE_FLUSH: u32 = 6;
    pub const RB_DONE_TS: u32 = 22;
    pub const PC_CCU_INVALIDATE_DEPTH: u32 = 24;
    pub const PC_CCU_INVALIDATE_COLOR: u32 = 25;
    pub const PC_CCU_RESOLVE_TS: u32 = 26;
    pub const PC_CCU_FLUSH_DEPTH_TS: u32 = 28;
    pub const PC_CCU_FLUSH_COLOR_TS: u32 = 29;
    pub const BLIT: u32 = 30;
    pub const CACHE_INVALIDATE: u32 = 49;
}

/// Mask of the event type field in the first CP_EVENT_WRITE payload DWORD
pub const EVENT_TYPE_MASK: u32 = 0xff;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type7_header_fields() {
        let header = Type7Header::new(opcode::CP_DRAW_INDX_OFFSET, 7);
        assert_eq!(header.opcode(), opcode::CP_DRAW_INDX_OFFSET);
        assert_eq!(header.count(), 7);
        assert_eq!(Pm4Type::of(header.0), Pm4Type::Type7);
        assert_eq!(packet_size_in_dwords(Pm4Type::Type7, header.0), 8);
    }

    #[test]
    fn test_type4_header_fields() {
        let header = Type4Header::new(0x8871, 3);
        assert_eq!(header.offset(), 0x8871);
        assert_eq!(header.count(), 3);
        assert_eq!(Pm4Type::of(header.0), Pm4Type::Type4);
    }

    #[test]
    fn test_bad_parity_is_unknown() {
        let header = Type7Header::new(opcode::CP_NOP, 2).0 ^ (1 << 15);
        assert_eq!(Pm4Type::of(header), Pm4Type::Unknown);
        assert_eq!(Pm4Type::of(0), Pm4Type::Unknown);
        assert_eq!(packet_size_in_dwords(Pm4Type::Unknown, header), 1);
    }

    #[test]
    fn test_event_classification() {
        assert!(is_draw_dispatch_dma_event(opcode::CP_EXEC_CS));
        assert!(!is_draw_dispatch_dma_event(opcode::CP_WAIT_FOR_IDLE));
        assert_eq!(event_name(opcode::CP_DRAW_AUTO), "DrawAuto");
        assert_eq!(opcode_name(0x7f), None);
    }
}
