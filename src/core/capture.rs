//! Capture metadata: submits, indirect buffers and presents
//!
//! Plain data describing what the capture recorded. The decoder reads these
//! alongside a `MemoryReader` that holds the command-buffer contents.

use crate::core::memory::MemoryReader;

/// GPU engine a submit was issued to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineType {
    Universal,
    Compute,
    Dma,
    Timer,
    Other,
}

impl EngineType {
    /// Every engine, in the order Engine nodes are created
    pub const ALL: [EngineType; 5] = [
        EngineType::Universal,
        EngineType::Compute,
        EngineType::Dma,
        EngineType::Timer,
        EngineType::Other,
    ];

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            EngineType::Universal => "Universal",
            EngineType::Compute => "Compute",
            EngineType::Dma => "DMA",
            EngineType::Timer => "Timer",
            EngineType::Other => "Other",
        }
    }

    /// Parse a lowercase engine name as used by the NIF surface
    pub fn from_name(name: &str) -> Option<EngineType> {
        match name {
            "universal" => Some(EngineType::Universal),
            "compute" => Some(EngineType::Compute),
            "dma" => Some(EngineType::Dma),
            "timer" => Some(EngineType::Timer),
            "other" => Some(EngineType::Other),
            _ => None,
        }
    }

    /// Only gfx, compute and DMA command streams are PM4
    #[inline]
    pub fn is_decodable(self) -> bool {
        matches!(
            self,
            EngineType::Universal | EngineType::Compute | EngineType::Dma
        )
    }
}

/// Queue family a submit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Universal,
    Compute,
    Dma,
    Timer,
    Other,
}

impl QueueType {
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            QueueType::Universal => "Universal",
            QueueType::Compute => "Compute",
            QueueType::Dma => "DMA",
            QueueType::Timer => "Timer",
            QueueType::Other => "Other",
        }
    }

    pub fn from_name(name: &str) -> Option<QueueType> {
        match name {
            "universal" => Some(QueueType::Universal),
            "compute" => Some(QueueType::Compute),
            "dma" => Some(QueueType::Dma),
            "timer" => Some(QueueType::Timer),
            "other" => Some(QueueType::Other),
            _ => None,
        }
    }
}

/// One indirect buffer referenced by a submit or an IB packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectBufferInfo {
    pub va_addr: u64,
    pub size_in_dwords: u32,
    /// Contents were not captured; the IB is listed but not decoded
    pub skip: bool,
    /// Executes on the constant engine (CCB) rather than the draw engine (DCB)
    pub is_constant_engine: bool,
}

impl IndirectBufferInfo {
    pub fn new(va_addr: u64, size_in_dwords: u32) -> Self {
        Self {
            va_addr,
            size_in_dwords,
            skip: false,
            is_constant_engine: false,
        }
    }

    #[inline]
    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_dwords as u64 * 4
    }
}

/// A queue submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitInfo {
    pub engine_type: EngineType,
    pub queue_type: QueueType,
    pub engine_index: u8,
    /// Submission with no payload (fence/semaphore only)
    pub is_dummy_submit: bool,
    pub ibs: Vec<IndirectBufferInfo>,
}

impl SubmitInfo {
    pub fn new(engine_type: EngineType, queue_type: QueueType, ibs: Vec<IndirectBufferInfo>) -> Self {
        Self {
            engine_type,
            queue_type,
            engine_index: 0,
            is_dummy_submit: false,
            ibs,
        }
    }

    #[inline]
    pub fn num_indirect_buffers(&self) -> u32 {
        self.ibs.len() as u32
    }
}

/// Swapchain details recorded with a present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentSurface {
    pub full_screen: bool,
    pub engine_type: EngineType,
    pub queue_type: QueueType,
    pub surface_addr: u64,
    pub surface_size: u64,
    pub vk_format: u32,
    pub vk_color_space: u32,
}

/// A present that follows the submit with index `submit_index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentInfo {
    pub submit_index: u32,
    pub surface: Option<PresentSurface>,
}

/// Everything the decoder consumes from one capture
pub struct CaptureData<M: MemoryReader> {
    pub submits: Vec<SubmitInfo>,
    pub presents: Vec<PresentInfo>,
    pub memory: M,
    pub vulkan_metadata_version: u32,
}

impl<M: MemoryReader> CaptureData<M> {
    pub fn new(memory: M) -> Self {
        Self {
            submits: Vec::new(),
            presents: Vec::new(),
            memory,
            vulkan_metadata_version: 0,
        }
    }
}

/// Display name of common `VkFormat` values
pub fn vk_format_name(format: u32) -> &'static str {
    match format {
        0 => "VK_FORMAT_UNDEFINED",
        37 => "VK_FORMAT_R8G8B8A8_UNORM",
        43 => "VK_FORMAT_R8G8B8A8_SRGB",
        44 => "VK_FORMAT_B8G8R8A8_UNORM",
        50 => "VK_FORMAT_B8G8R8A8_SRGB",
        64 => "VK_FORMAT_A2B10G10R10_UNORM_PACK32",
        97 => "VK_FORMAT_R16G16B16A16_SFLOAT",
        _ => "VK_FORMAT_UNKNOWN",
    }
}

/// Display name of common `VkColorSpaceKHR` values
pub fn vk_color_space_name(color_space: u32) -> &'static str {
    match color_space {
        0 => "VK_COLOR_SPACE_SRGB_NONLINEAR_KHR",
        1_000_104_001 => "VK_COLOR_SPACE_DISPLAY_P3_NONLINEAR_EXT",
        1_000_104_002 => "VK_COLOR_SPACE_EXTENDED_SRGB_LINEAR_EXT",
        1_000_104_008 => "VK_COLOR_SPACE_HDR10_ST2084_EXT",
        _ => "VK_COLOR_SPACE_UNKNOWN",
    }
}
