//! # vkres
//!
//! Serial-tracked Vulkan resource helpers: buffer suballocation, growable
//! descriptor/query/semaphore pools, image layout barriers and staged uploads.
//!
//! Every helper runs under a [`Context`] that owns the queue [`SerialClock`].
//! Resources remember the serial of the last command stream that used them,
//! and `release` hands their native objects to the context's garbage list
//! until that serial has completed.
//!
//! ```no_run
//! use ash::vk;
//! use vkres::gpu::VulkanContext;
//! use vkres::image::{ImageHelper, ImageIndex, TextureType};
//! use vkres::{Context, Format, PixelUnpackState, ResourceConfig};
//!
//! # fn example() -> vkres::Result<()> {
//! let mut ctx = VulkanContext::new(ResourceConfig::default())?;
//!
//! let extent = vk::Extent3D { width: 4, height: 4, depth: 1 };
//! let mut image = ImageHelper::new(&ctx);
//! image.init(
//!     ctx.device(),
//!     TextureType::TwoD,
//!     extent,
//!     &Format::RGBA8,
//!     vk::SampleCountFlags::TYPE_1,
//!     vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
//!     1,
//!     1,
//! )?;
//! image.init_memory(ctx.device(), vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
//!
//! let pixels = [0xffu8; 4 * 4 * 4];
//! image.stage_subresource_update(
//!     &ctx,
//!     &ImageIndex::level(0),
//!     extent,
//!     vk::Offset3D::default(),
//!     &Format::RGBA8,
//!     &PixelUnpackState::default(),
//!     &pixels,
//! )?;
//!
//! let mut cmd = ctx.begin_command_buffer()?;
//! image.flush_staged_updates(&mut ctx, 0, 1, &mut cmd)?;
//! ctx.submit(cmd)?;
//!
//! image.release_image(&mut ctx);
//! image.release_staging_buffer(&mut ctx);
//! ctx.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod gpu;
pub mod image;
pub mod line_loop;
pub mod memory;
pub mod pool;
pub mod serial;

#[cfg(test)]
mod testing;

pub use buffer::{BufferHelper, DynamicBuffer};
pub use command::{CommandRecorder, ImageBarrier, MemoryBarrier};
pub use config::{DeviceLimits, ResourceConfig};
pub use context::{Context, Device, GarbageObject};
pub use error::{ResourceError, Result};
pub use format::{Format, PackPixelsParams, PixelUnpackState, Rect};
pub use image::{ImageHelper, ImageLayout};
pub use line_loop::LineLoopHelper;
pub use pool::{DynamicDescriptorPool, DynamicQueryPool, DynamicSemaphorePool};
pub use serial::{ResourceUse, Serial, SerialClock};
