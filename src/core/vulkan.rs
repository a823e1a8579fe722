//! Vulkan call markers embedded in CP_NOP payloads
//!
//! The capture layer writes a CP_NOP in front of the packets generated for
//! each recorded Vulkan command. Payload layout:
//!
//! ```text
//! DWORD 0: signature[23:0] | cmd_id[31:24]
//! DWORD 1..: call arguments (opaque bytes, label strings NUL-terminated)
//! ```

use memchr::memchr;

/// Low 24 bits of the first NOP payload DWORD on a call marker
pub const CALL_MARKER_SIGNATURE: u32 = 0x00D1_7E;

/// First payload DWORD of a call-marker NOP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallMarkerHeader(pub u32);

impl CallMarkerHeader {
    #[inline]
    pub const fn new(cmd: VkCmdId) -> Self {
        CallMarkerHeader(CALL_MARKER_SIGNATURE | ((cmd as u32) << 24))
    }

    #[inline]
    pub const fn signature(self) -> u32 {
        self.0 & 0x00ff_ffff
    }

    #[inline]
    pub const fn cmd_id(self) -> u8 {
        (self.0 >> 24) as u8
    }

    #[inline]
    pub const fn is_call_marker(self) -> bool {
        self.signature() == CALL_MARKER_SIGNATURE
    }
}

macro_rules! vk_cmds {
    ($($variant:ident = $id:literal => $name:literal,)*) => {
        /// Vulkan commands recognised in call markers
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum VkCmdId {
            $($variant = $id,)*
        }

        impl VkCmdId {
            pub fn from_u8(id: u8) -> Option<VkCmdId> {
                match id {
                    $($id => Some(VkCmdId::$variant),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(VkCmdId::$variant => $name,)*
                }
            }
        }
    };
}

vk_cmds! {
    BeginCommandBuffer = 1 => "vkBeginCommandBuffer",
    EndCommandBuffer = 2 => "vkEndCommandBuffer",
    ResetCommandBuffer = 3 => "vkResetCommandBuffer",
    CmdDraw = 10 => "vkCmdDraw",
    CmdDrawIndexed = 11 => "vkCmdDrawIndexed",
    CmdDrawIndirect = 12 => "vkCmdDrawIndirect",
    CmdDrawIndexedIndirect = 13 => "vkCmdDrawIndexedIndirect",
    CmdDrawIndirectCount = 14 => "vkCmdDrawIndirectCount",
    CmdDrawIndexedIndirectCount = 15 => "vkCmdDrawIndexedIndirectCount",
    CmdDispatch = 16 => "vkCmdDispatch",
    CmdDispatchIndirect = 17 => "vkCmdDispatchIndirect",
    CmdDispatchBase = 18 => "vkCmdDispatchBase",
    CmdPipelineBarrier = 20 => "vkCmdPipelineBarrier",
    CmdBeginRenderPass = 21 => "vkCmdBeginRenderPass",
    CmdEndRenderPass = 22 => "vkCmdEndRenderPass",
    CmdNextSubpass = 23 => "vkCmdNextSubpass",
    CmdClearAttachments = 24 => "vkCmdClearAttachments",
    CmdClearColorImage = 25 => "vkCmdClearColorImage",
    CmdClearDepthStencilImage = 26 => "vkCmdClearDepthStencilImage",
    CmdFillBuffer = 27 => "vkCmdFillBuffer",
    CmdCopyImage = 28 => "vkCmdCopyImage",
    CmdCopyBufferToImage = 29 => "vkCmdCopyBufferToImage",
    CmdCopyBuffer = 30 => "vkCmdCopyBuffer",
    CmdCopyImageToBuffer = 31 => "vkCmdCopyImageToBuffer",
    CmdBlitImage = 32 => "vkCmdBlitImage",
    CmdResolveImage = 33 => "vkCmdResolveImage",
    CmdUpdateBuffer = 34 => "vkCmdUpdateBuffer",
    CmdResetQueryPool = 35 => "vkCmdResetQueryPool",
    CmdCopyQueryPoolResults = 36 => "vkCmdCopyQueryPoolResults",
    CmdBeginQuery = 37 => "vkCmdBeginQuery",
    CmdEndQuery = 38 => "vkCmdEndQuery",
    CmdWriteTimestamp = 39 => "vkCmdWriteTimestamp",
    CmdExecuteCommands = 40 => "vkCmdExecuteCommands",
    CmdBindPipeline = 41 => "vkCmdBindPipeline",
    CmdBindDescriptorSets = 42 => "vkCmdBindDescriptorSets",
    CmdBindVertexBuffers = 43 => "vkCmdBindVertexBuffers",
    CmdBindIndexBuffer = 44 => "vkCmdBindIndexBuffer",
    CmdSetViewport = 45 => "vkCmdSetViewport",
    CmdSetScissor = 46 => "vkCmdSetScissor",
    CmdPushConstants = 47 => "vkCmdPushConstants",
    CmdSetEvent = 48 => "vkCmdSetEvent",
    CmdWaitEvents = 49 => "vkCmdWaitEvents",
    CmdDebugMarkerBeginEXT = 50 => "vkCmdDebugMarkerBeginEXT",
    CmdDebugMarkerEndEXT = 51 => "vkCmdDebugMarkerEndEXT",
    CmdDebugMarkerInsertEXT = 52 => "vkCmdDebugMarkerInsertEXT",
    CmdBeginDebugUtilsLabelEXT = 53 => "vkCmdBeginDebugUtilsLabelEXT",
    CmdEndDebugUtilsLabelEXT = 54 => "vkCmdEndDebugUtilsLabelEXT",
    CmdInsertDebugUtilsLabelEXT = 55 => "vkCmdInsertDebugUtilsLabelEXT",
    QueueSubmit = 60 => "vkQueueSubmit",
}

impl VkCmdId {
    /// Calls that do GPU work of their own and survive in the VulkanEvent view
    pub fn is_event(self) -> bool {
        use VkCmdId::*;
        matches!(
            self,
            CmdDraw
                | CmdDrawIndexed
                | CmdDrawIndirect
                | CmdDrawIndexedIndirect
                | CmdDrawIndirectCount
                | CmdDrawIndexedIndirectCount
                | CmdDispatch
                | CmdDispatchIndirect
                | CmdDispatchBase
                | CmdPipelineBarrier
                | CmdBeginRenderPass
                | CmdEndRenderPass
                | CmdClearAttachments
                | CmdClearColorImage
                | CmdClearDepthStencilImage
                | CmdFillBuffer
                | CmdCopyImage
                | CmdCopyBufferToImage
                | CmdCopyBuffer
                | CmdCopyImageToBuffer
                | CmdResetQueryPool
                | CmdCopyQueryPoolResults
                | CmdExecuteCommands
                | QueueSubmit
        )
    }

    #[inline]
    pub fn is_debug_label_begin(self) -> bool {
        matches!(self, VkCmdId::CmdDebugMarkerBeginEXT | VkCmdId::CmdBeginDebugUtilsLabelEXT)
    }

    #[inline]
    pub fn is_debug_label_end(self) -> bool {
        matches!(self, VkCmdId::CmdDebugMarkerEndEXT | VkCmdId::CmdEndDebugUtilsLabelEXT)
    }

    #[inline]
    pub fn is_debug_label_insert(self) -> bool {
        matches!(self, VkCmdId::CmdDebugMarkerInsertEXT | VkCmdId::CmdInsertDebugUtilsLabelEXT)
    }
}

/// Formats call arguments for marker descriptions
pub trait CallPrinter {
    /// Text appended to the call name, e.g. `"(\"Shadow pass\")"`; may be empty
    fn print_brief(&self, cmd: VkCmdId, args: &[u8], metadata_version: u32) -> String;
}

/// Label string of a debug-marker call: bytes up to the first NUL
pub fn label_from_args(args: &[u8]) -> Option<&str> {
    let end = memchr(0, args).unwrap_or(args.len());
    std::str::from_utf8(&args[..end]).ok()
}

/// Prints debug labels and nothing else
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelPrinter;

impl CallPrinter for LabelPrinter {
    fn print_brief(&self, cmd: VkCmdId, args: &[u8], _metadata_version: u32) -> String {
        if cmd.is_debug_label_begin() || cmd.is_debug_label_insert() {
            if let Some(label) = label_from_args(args) {
                return format!("(\"{label}\")");
            }
        }
        String::new()
    }
}
