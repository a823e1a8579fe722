//! Packet and register layout metadata
//!
//! The decoder labels packets and registers through `Pm4Info`. Real
//! deployments plug in generated tables for their GPU; `BuiltinPm4Info`
//! covers the packets the hierarchy builder reasons about plus a handful
//! of registers.

use crate::core::pm4::{self, opcode::*};

/// One field of a Type7 packet payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketField {
    pub name: &'static str,
    /// Payload DWORD the field lives in (1 = first DWORD after the header)
    pub dword: u32,
    pub mask: u32,
    pub shift: u32,
    /// Enum table used to label the value
    pub enum_handle: Option<u32>,
}

/// Layout of a Type7 packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    pub name: &'static str,
    pub fields: &'static [PacketField],
}

/// A bitfield inside a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegField {
    pub name: &'static str,
    pub mask: u32,
    pub shift: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegInfo {
    pub name: &'static str,
    pub fields: &'static [RegField],
}

/// Packet/register metadata provider
pub trait Pm4Info: Sync {
    fn packet_info(&self, opcode: u8) -> Option<&PacketInfo>;
    fn reg_info(&self, reg: u32) -> Option<&RegInfo>;
    fn enum_string(&self, enum_handle: u32, value: u32) -> Option<&str>;

    /// Opcode display name, `"Unknown"` when not in the table
    fn opcode_name(&self, opcode: u8) -> &str {
        pm4::opcode_name(opcode).unwrap_or("Unknown")
    }
}

// ============================================================================
// Built-in tables
// ============================================================================

/// `vgt_event_type`
pub const ENUM_EVENT_TYPE: u32 = 0;
/// `pc_di_primtype`
pub const ENUM_PRIM_TYPE: u32 = 1;
/// `cp_wait_reg_mem` compare function
pub const ENUM_WAIT_FUNCTION: u32 = 2;

const fn field(name: &'static str, dword: u32, mask: u32, shift: u32) -> PacketField {
    PacketField {
        name,
        dword,
        mask,
        shift,
        enum_handle: None,
    }
}

const fn enum_field(
    name: &'static str,
    dword: u32,
    mask: u32,
    shift: u32,
    handle: u32,
) -> PacketField {
    PacketField {
        name,
        dword,
        mask,
        shift,
        enum_handle: Some(handle),
    }
}

const IB_FIELDS: &[PacketField] = &[
    field("IB_BASE_LO", 1, 0xffff_ffff, 0),
    field("IB_BASE_HI", 2, 0xffff_ffff, 0),
    field("IB_SIZE", 3, pm4::IB_SIZE_MASK, 0),
];

const DRAW_INITIATOR: [PacketField; 4] = [
    enum_field("PRIM_TYPE", 1, 0x3f, 0, ENUM_PRIM_TYPE),
    field("SOURCE_SELECT", 1, 0xc0, 6),
    field("VIS_CULL", 1, 0x300, 8),
    field("INDEX_SIZE", 1, 0xc00, 10),
];

const DRAW_INDX_OFFSET_FIELDS: &[PacketField] = &[
    DRAW_INITIATOR[0],
    DRAW_INITIATOR[1],
    DRAW_INITIATOR[2],
    DRAW_INITIATOR[3],
    field("NUM_INSTANCES", 2, 0xffff_ffff, 0),
    field("NUM_INDICES", 3, 0xffff_ffff, 0),
    field("FIRST_INDX", 4, 0xffff_ffff, 0),
    field("INDX_BASE_LO", 5, 0xffff_ffff, 0),
    field("INDX_BASE_HI", 6, 0xffff_ffff, 0),
    field("MAX_INDICES", 7, 0xffff_ffff, 0),
];

const DRAW_INDIRECT_FIELDS: &[PacketField] = &[
    DRAW_INITIATOR[0],
    DRAW_INITIATOR[1],
    field("INDIRECT_LO", 2, 0xffff_ffff, 0),
    field("INDIRECT_HI", 3, 0xffff_ffff, 0),
];

const DRAW_INDX_INDIRECT_FIELDS: &[PacketField] = &[
    DRAW_INITIATOR[0],
    DRAW_INITIATOR[1],
    DRAW_INITIATOR[3],
    field("INDX_BASE_LO", 2, 0xffff_ffff, 0),
    field("INDX_BASE_HI", 3, 0xffff_ffff, 0),
    field("MAX_INDICES", 4, 0xffff_ffff, 0),
    field("INDIRECT_LO", 5, 0xffff_ffff, 0),
    field("INDIRECT_HI", 6, 0xffff_ffff, 0),
];

const DRAW_AUTO_FIELDS: &[PacketField] = &[
    DRAW_INITIATOR[0],
    field("NUM_INSTANCES", 2, 0xffff_ffff, 0),
    field("NUM_VERTICES_BASE_LO", 3, 0xffff_ffff, 0),
    field("NUM_VERTICES_BASE_HI", 4, 0xffff_ffff, 0),
];

const EXEC_CS_FIELDS: &[PacketField] = &[
    field("NGROUPS_X", 2, 0xffff_ffff, 0),
    field("NGROUPS_Y", 3, 0xffff_ffff, 0),
    field("NGROUPS_Z", 4, 0xffff_ffff, 0),
];

const EXEC_CS_INDIRECT_FIELDS: &[PacketField] = &[
    field("ADDR_LO", 2, 0xffff_ffff, 0),
    field("ADDR_HI", 3, 0xffff_ffff, 0),
    field("LOCALSIZEX", 4, 0x7fe, 2),
    field("LOCALSIZEY", 4, 0x1ff800, 11),
    field("LOCALSIZEZ", 4, 0xffe0_0000, 21),
];

const BLIT_FIELDS: &[PacketField] = &[
    field("OP", 1, 0xf, 0),
    field("SRC_X1", 2, 0x3fff, 0),
    field("SRC_Y1", 2, 0x3fff_0000, 16),
    field("SRC_X2", 3, 0x3fff, 0),
    field("SRC_Y2", 3, 0x3fff_0000, 16),
    field("DST_X1", 4, 0x3fff, 0),
    field("DST_Y1", 4, 0x3fff_0000, 16),
];

const EVENT_WRITE_FIELDS: &[PacketField] = &[
    enum_field("EVENT", 1, pm4::EVENT_TYPE_MASK, 0, ENUM_EVENT_TYPE),
    field("ADDR_LO", 2, 0xffff_ffff, 0),
    field("ADDR_HI", 3, 0xffff_ffff, 0),
    field("DATA", 4, 0xffff_ffff, 0),
];

const WAIT_REG_MEM_FIELDS: &[PacketField] = &[
    enum_field("FUNCTION", 1, 0x7, 0, ENUM_WAIT_FUNCTION),
    field("MEM_SPACE", 1, 0x10, 4),
    field("POLL_ADDR_LO", 2, 0xffff_ffff, 0),
    field("POLL_ADDR_HI", 3, 0xffff_ffff, 0),
    field("REF", 4, 0xffff_ffff, 0),
    field("MASK", 5, 0xffff_ffff, 0),
    field("DELAY_LOOP_CYCLES", 6, 0xffff_ffff, 0),
];

const MEM_WRITE_FIELDS: &[PacketField] = &[
    field("ADDR_LO", 1, 0xffff_ffff, 0),
    field("ADDR_HI", 2, 0xffff_ffff, 0),
];

const SET_MARKER_FIELDS: &[PacketField] = &[field("MODE", 1, 0xf, 0)];

const NO_FIELDS: &[PacketField] = &[];

static PACKETS: &[(u8, PacketInfo)] = &[
    (CP_NOP, PacketInfo { name: "CP_NOP", fields: NO_FIELDS }),
    (CP_WAIT_MEM_WRITES, PacketInfo { name: "CP_WAIT_MEM_WRITES", fields: NO_FIELDS }),
    (CP_WAIT_FOR_ME, PacketInfo { name: "CP_WAIT_FOR_ME", fields: NO_FIELDS }),
    (CP_DRAW_AUTO, PacketInfo { name: "CP_DRAW_AUTO", fields: DRAW_AUTO_FIELDS }),
    (CP_WAIT_FOR_IDLE, PacketInfo { name: "CP_WAIT_FOR_IDLE", fields: NO_FIELDS }),
    (CP_DRAW_INDIRECT, PacketInfo { name: "CP_DRAW_INDIRECT", fields: DRAW_INDIRECT_FIELDS }),
    (
        CP_DRAW_INDX_INDIRECT,
        PacketInfo { name: "CP_DRAW_INDX_INDIRECT", fields: DRAW_INDX_INDIRECT_FIELDS },
    ),
    (CP_BLIT, PacketInfo { name: "CP_BLIT", fields: BLIT_FIELDS }),
    (CP_EXEC_CS, PacketInfo { name: "CP_EXEC_CS", fields: EXEC_CS_FIELDS }),
    (CP_INDIRECT_BUFFER_PFD, PacketInfo { name: "CP_INDIRECT_BUFFER_PFD", fields: IB_FIELDS }),
    (
        CP_DRAW_INDX_OFFSET,
        PacketInfo { name: "CP_DRAW_INDX_OFFSET", fields: DRAW_INDX_OFFSET_FIELDS },
    ),
    (CP_WAIT_REG_MEM, PacketInfo { name: "CP_WAIT_REG_MEM", fields: WAIT_REG_MEM_FIELDS }),
    (CP_MEM_WRITE, PacketInfo { name: "CP_MEM_WRITE", fields: MEM_WRITE_FIELDS }),
    (CP_INDIRECT_BUFFER_PFE, PacketInfo { name: "CP_INDIRECT_BUFFER_PFE", fields: IB_FIELDS }),
    (
        CP_EXEC_CS_INDIRECT,
        PacketInfo { name: "CP_EXEC_CS_INDIRECT", fields: EXEC_CS_INDIRECT_FIELDS },
    ),
    (CP_EVENT_WRITE, PacketInfo { name: "CP_EVENT_WRITE", fields: EVENT_WRITE_FIELDS }),
    (
        CP_INDIRECT_BUFFER_CHAIN,
        PacketInfo { name: "CP_INDIRECT_BUFFER_CHAIN", fields: IB_FIELDS },
    ),
    (CP_SET_MARKER, PacketInfo { name: "CP_SET_MARKER", fields: SET_MARKER_FIELDS }),
];

static REGISTERS: &[(u32, RegInfo)] = &[
    (
        0x8801,
        RegInfo {
            name: "RB_RENDER_CNTL",
            fields: &[
                RegField { name: "FLAG_DEPTH", mask: 0x4000, shift: 14 },
                RegField { name: "FLAG_MRTS", mask: 0xff_0000, shift: 16 },
            ],
        },
    ),
    (
        0x8871,
        RegInfo {
            name: "RB_DEPTH_CNTL",
            fields: &[
                RegField { name: "Z_TEST_ENABLE", mask: 0x1, shift: 0 },
                RegField { name: "Z_WRITE_ENABLE", mask: 0x2, shift: 1 },
                RegField { name: "ZFUNC", mask: 0x1c, shift: 2 },
            ],
        },
    ),
    (0x8e07, RegInfo { name: "RB_CCU_CNTL", fields: &[] }),
    (0xa00e, RegInfo { name: "VFD_INDEX_OFFSET", fields: &[] }),
    (0xa00f, RegInfo { name: "VFD_INSTANCE_START_OFFSET", fields: &[] }),
];

/// Built-in Adreno metadata tables
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPm4Info;

impl Pm4Info for BuiltinPm4Info {
    fn packet_info(&self, opcode: u8) -> Option<&PacketInfo> {
        PACKETS
            .iter()
            .find(|(op, _)| *op == opcode)
            .map(|(_, info)| info)
    }

    fn reg_info(&self, reg: u32) -> Option<&RegInfo> {
        REGISTERS
            .binary_search_by_key(&reg, |(offset, _)| *offset)
            .ok()
            .map(|i| &REGISTERS[i].1)
    }

    fn enum_string(&self, enum_handle: u32, value: u32) -> Option<&str> {
        use pm4::event_type::*;
        let s = match (enum_handle, value) {
            (ENUM_EVENT_TYPE, CACHE_FLUSH_TS) => "CACHE_FLUSH_TS",
            (ENUM_EVENT_TYPE, CACHE_FLUSH) => "CACHE_FLUSH",
            (ENUM_EVENT_TYPE, RB_DONE_TS) => "RB_DONE_TS",
            (ENUM_EVENT_TYPE, PC_CCU_INVALIDATE_DEPTH) => "PC_CCU_INVALIDATE_DEPTH",
            (ENUM_EVENT_TYPE, PC_CCU_INVALIDATE_COLOR) => "PC_CCU_INVALIDATE_COLOR",
            (ENUM_EVENT_TYPE, PC_CCU_RESOLVE_TS) => "PC_CCU_RESOLVE_TS",
            (ENUM_EVENT_TYPE, PC_CCU_FLUSH_DEPTH_TS) => "PC_CCU_FLUSH_DEPTH_TS",
            (ENUM_EVENT_TYPE, PC_CCU_FLUSH_COLOR_TS) => "PC_CCU_FLUSH_COLOR_TS",
            (ENUM_EVENT_TYPE, BLIT) => "BLIT",
            (ENUM_EVENT_TYPE, CACHE_INVALIDATE) => "CACHE_INVALIDATE",
            (ENUM_PRIM_TYPE, 0) => "DI_PT_NONE",
            (ENUM_PRIM_TYPE, 1) => "DI_PT_POINTLIST",
            (ENUM_PRIM_TYPE, 2) => "DI_PT_LINELIST",
            (ENUM_PRIM_TYPE, 3) => "DI_PT_LINESTRIP",
            (ENUM_PRIM_TYPE, 4) => "DI_PT_TRILIST",
            (ENUM_PRIM_TYPE, 5) => "DI_PT_TRIFAN",
            (ENUM_PRIM_TYPE, 6) => "DI_PT_TRISTRIP",
            (ENUM_WAIT_FUNCTION, 0) => "WRITE_ALWAYS",
            (ENUM_WAIT_FUNCTION, 1) => "WRITE_LT",
            (ENUM_WAIT_FUNCTION, 2) => "WRITE_LE",
            (ENUM_WAIT_FUNCTION, 3) => "WRITE_EQ",
            (ENUM_WAIT_FUNCTION, 4) => "WRITE_NE",
            (ENUM_WAIT_FUNCTION, 5) => "WRITE_GE",
            (ENUM_WAIT_FUNCTION, 6) => "WRITE_GT",
            _ => return None,
        };
        Some(s)
    }
}
