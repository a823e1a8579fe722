//! Core PM4 decoding primitives
//!
//! This module contains the building blocks the hierarchy builder sits on:
//! - pm4: Type4/Type7 header decoding and Adreno opcodes
//! - memory: GPU virtual-memory readers
//! - capture: submit, IB and present metadata
//! - pm4_info: packet/register layout tables
//! - vulkan: Vulkan call markers carried in CP_NOP payloads
//! - emulator: control-flow walk over indirect buffers (EmulateCallbacks)

pub mod capture;
pub mod emulator;
pub mod memory;
pub mod pm4;
pub mod pm4_info;
pub mod vulkan;
