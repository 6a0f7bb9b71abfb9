use ash::vk;

use super::ImageHelper;
use crate::context::Context;

/// A queued write into one subresource of an image, applied at the next
/// `flush_staged_updates` that covers its mip level.
#[derive(Debug)]
pub enum SubresourceUpdate {
    /// Copy out of a region of the image's staging buffer.
    Buffer {
        buffer: vk::Buffer,
        copy_region: vk::BufferImageCopy,
    },
    /// Copy out of a temporary image owned by the update.
    Image {
        image: Box<ImageHelper>,
        copy_region: vk::ImageCopy,
    },
}

impl SubresourceUpdate {
    pub fn dst_subresource(&self) -> &vk::ImageSubresourceLayers {
        match self {
            SubresourceUpdate::Buffer { copy_region, .. } => &copy_region.image_subresource,
            SubresourceUpdate::Image { copy_region, .. } => &copy_region.dst_subresource,
        }
    }

    pub fn is_update_to_layer_level(&self, layer: u32, level: u32) -> bool {
        let dst = self.dst_subresource();
        dst.base_array_layer == layer && dst.mip_level == level
    }

    /// Drops the update. A temporary source image goes to deferred destruction.
    pub fn release(self, ctx: &mut dyn Context) {
        if let SubresourceUpdate::Image { mut image, .. } = self {
            image.release_image(ctx);
            image.release_staging_buffer(ctx);
        }
    }
}
