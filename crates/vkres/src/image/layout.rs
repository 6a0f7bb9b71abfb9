use ash::vk;

/// Every layout an image can be transitioned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    #[default]
    Undefined,
    PreInitialized,
    TransferSrc,
    TransferDst,
    ComputeShaderReadOnly,
    ComputeShaderWrite,
    FragmentShaderReadOnly,
    ColorAttachment,
    DepthStencilAttachment,
    Present,
}

/// What a layout means for synchronization.
///
/// `dst_*` masks describe how the layout is accessed right after a transition
/// into it. `src_*` masks describe which of those accesses a later transition
/// out of it has to wait for. Read-only layouts have an empty `src_access_mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMemoryBarrierData {
    pub layout: vk::ImageLayout,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_access_mask: vk::AccessFlags,
    pub src_access_mask: vk::AccessFlags,
    pub is_read_only_access: bool,
}

const fn access(a: vk::AccessFlags, b: vk::AccessFlags) -> vk::AccessFlags {
    vk::AccessFlags::from_raw(a.as_raw() | b.as_raw())
}

const NO_ACCESS: vk::AccessFlags = vk::AccessFlags::empty();

const IMAGE_MEMORY_BARRIER_DATA: [ImageMemoryBarrierData; 10] = [
    // Undefined
    ImageMemoryBarrierData {
        layout: vk::ImageLayout::UNDEFINED,
        dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        src_stage_mask: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_access_mask: NO_ACCESS,
        src_access_mask: NO_ACCESS,
        is_read_only_access: true,
    },
    // PreInitialized
    ImageMemoryBarrierData {
        layout: vk::ImageLayout::PREINITIALIZED,
        dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        src_stage_mask: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_access_mask: NO_ACCESS,
        src_access_mask: vk::AccessFlags::HOST_WRITE,
        is_read_only_access: false,
    },
    // TransferSrc
    ImageMemoryBarrierData {
        layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        dst_stage_mask: vk::PipelineStageFlags::TRANSFER,
        src_stage_mask: vk::PipelineStageFlags::TRANSFER,
        dst_access_mask: vk::AccessFlags::TRANSFER_READ,
        src_access_mask: NO_ACCESS,
        is_read_only_access: true,
    },
    // TransferDst
    ImageMemoryBarrierData {
        layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        dst_stage_mask: vk::PipelineStageFlags::TRANSFER,
        src_stage_mask: vk::PipelineStageFlags::TRANSFER,
        dst_access_mask: vk::AccessFlags::TRANSFER_WRITE,
        src_access_mask: vk::AccessFlags::TRANSFER_WRITE,
        is_read_only_access: false,
    },
    // ComputeShaderReadOnly
    ImageMemoryBarrierData {
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        dst_stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
        src_stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
        dst_access_mask: vk::AccessFlags::SHADER_READ,
        src_access_mask: NO_ACCESS,
        is_read_only_access: true,
    },
    // ComputeShaderWrite
    ImageMemoryBarrierData {
        layout: vk::ImageLayout::GENERAL,
        dst_stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
        src_stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
        dst_access_mask: access(vk::AccessFlags::SHADER_READ, vk::AccessFlags::SHADER_WRITE),
        src_access_mask: vk::AccessFlags::SHADER_WRITE,
        is_read_only_access: false,
    },
    // FragmentShaderReadOnly
    ImageMemoryBarrierData {
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        dst_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
        src_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
        dst_access_mask: vk::AccessFlags::SHADER_READ,
        src_access_mask: NO_ACCESS,
        is_read_only_access: true,
    },
    // ColorAttachment
    ImageMemoryBarrierData {
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: access(
            vk::AccessFlags::COLOR_ATTACHMENT_READ,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        is_read_only_access: false,
    },
    // DepthStencilAttachment
    ImageMemoryBarrierData {
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        dst_stage_mask: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        src_stage_mask: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        dst_access_mask: access(
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        is_read_only_access: false,
    },
    // Present
    ImageMemoryBarrierData {
        layout: vk::ImageLayout::PRESENT_SRC_KHR,
        dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        src_stage_mask: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_access_mask: NO_ACCESS,
        src_access_mask: NO_ACCESS,
        is_read_only_access: true,
    },
];

impl ImageLayout {
    pub const ALL: [ImageLayout; 10] = [
        ImageLayout::Undefined,
        ImageLayout::PreInitialized,
        ImageLayout::TransferSrc,
        ImageLayout::TransferDst,
        ImageLayout::ComputeShaderReadOnly,
        ImageLayout::ComputeShaderWrite,
        ImageLayout::FragmentShaderReadOnly,
        ImageLayout::ColorAttachment,
        ImageLayout::DepthStencilAttachment,
        ImageLayout::Present,
    ];

    pub fn data(self) -> &'static ImageMemoryBarrierData {
        &IMAGE_MEMORY_BARRIER_DATA[self as usize]
    }

    pub fn vk_layout(self) -> vk::ImageLayout {
        self.data().layout
    }

    /// A transition is skipped only for read-after-read in the same layout.
    pub fn needs_transition_to(self, target: ImageLayout) -> bool {
        !(self == target && self.data().is_read_only_access)
    }
}
