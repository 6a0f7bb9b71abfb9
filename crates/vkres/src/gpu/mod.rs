//! `ash` implementations of [`Device`](crate::context::Device),
//! [`CommandRecorder`](crate::command::CommandRecorder) and
//! [`Context`](crate::context::Context) on a real driver.

mod command;
mod context;
mod device;

pub use command::VulkanCommandBuffer;
pub use context::VulkanContext;
pub use device::VulkanDevice;
