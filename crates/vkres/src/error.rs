use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Vulkan call {call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("Too many {kind} pools (limit {limit})")]
    TooManyPools { kind: &'static str, limit: usize },

    #[error("Requested {requested} descriptor sets from pools of {limit}")]
    TooManyDescriptorSets { requested: u32, limit: u32 },

    #[error("No memory type satisfies {0:?}")]
    NoMemoryType(vk::MemoryPropertyFlags),

    #[error("Integer overflow computing {0}")]
    IntegerOverflow(&'static str),

    #[error("Pixel data too small: need {needed} bytes, got {provided}")]
    PixelDataTooSmall { needed: usize, provided: usize },

    #[error("Index data out of range: {end} bytes requested from a {size} byte buffer")]
    IndexDataOutOfRange { end: u64, size: u64 },

    #[error("No Vulkan device with a graphics queue")]
    NoAdapter,

    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),
}

pub type Result<T> = std::result::Result<T, ResourceError>;

/// Attaches the native call name to a raw `VkResult`.
pub(crate) trait VkResultExt<T> {
    fn vk_context(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn vk_context(self, call: &'static str) -> Result<T> {
        self.map_err(|result| ResourceError::Vulkan { call, result })
    }
}

/// Error used when a fixed-size arithmetic step would wrap.
pub(crate) fn overflow(what: &'static str) -> ResourceError {
    ResourceError::IntegerOverflow(what)
}
