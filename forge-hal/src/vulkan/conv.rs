//! Resource-state → access/layout/stage translation (§4.10), and
//! `TextureFormat` ↔ `vk::Format` mapping (§6 `TinyImageFormat_*`).

use crate::QueueType;
use ash::vk;
use ftypes::{ResourceState, TextureFormat};

/// Access-flag mapping: the union of each set bit's own Vulkan access
/// flags (§4.10 "Access-flag mapping").
pub fn resource_state_to_access_flags(state: ResourceState) -> vk::AccessFlags {
    let mut access = vk::AccessFlags::empty();
    if state.contains(ResourceState::COPY_SRC) {
        access |= vk::AccessFlags::TRANSFER_READ;
    }
    if state.contains(ResourceState::COPY_DST) {
        access |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if state.contains(ResourceState::VERTEX_AND_CONSTANT_BUFFER) {
        access |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::UNIFORM_READ;
    }
    if state.contains(ResourceState::INDEX_BUFFER) {
        access |= vk::AccessFlags::INDEX_READ;
    }
    if state.contains(ResourceState::UNORDERED_ACCESS) {
        access |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;
    }
    if state.contains(ResourceState::INDIRECT_ARGUMENT) {
        access |= vk::AccessFlags::INDIRECT_COMMAND_READ;
    }
    if state.contains(ResourceState::RENDER_TARGET) {
        access |= vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if state.contains(ResourceState::DEPTH_WRITE) {
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
    }
    if state.contains(ResourceState::DEPTH_READ) {
        access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
    }
    if state.contains(ResourceState::SHADER_RESOURCE) {
        access |= vk::AccessFlags::SHADER_READ;
    }
    if state.contains(ResourceState::PRESENT) {
        access |= vk::AccessFlags::MEMORY_READ;
    }
    if state.contains(ResourceState::SHADING_RATE_SOURCE) {
        access |= vk::AccessFlags::FRAGMENT_SHADING_RATE_ATTACHMENT_READ_KHR;
    }
    if state.contains(ResourceState::ACCELERATION_STRUCTURE_READ) {
        access |= vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR;
    }
    if state.contains(ResourceState::ACCELERATION_STRUCTURE_WRITE) {
        access |= vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR;
    }
    if state.contains(ResourceState::COMMON) {
        access |= vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE;
    }
    access
}

/// Image-layout mapping: first matching bit wins, in the priority order
/// from §4.10 ("Image-layout mapping").
pub fn resource_state_to_image_layout(state: ResourceState) -> vk::ImageLayout {
    const PRIORITY: &[(ResourceState, vk::ImageLayout)] = &[
        (ResourceState::COPY_SRC, vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
        (ResourceState::COPY_DST, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
        (ResourceState::RENDER_TARGET, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        (ResourceState::DEPTH_WRITE, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        (ResourceState::DEPTH_READ, vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL),
        (ResourceState::UNORDERED_ACCESS, vk::ImageLayout::GENERAL),
        (ResourceState::SHADER_RESOURCE, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        (ResourceState::PRESENT, vk::ImageLayout::PRESENT_SRC_KHR),
        (ResourceState::COMMON, vk::ImageLayout::GENERAL),
        (
            ResourceState::SHADING_RATE_SOURCE,
            vk::ImageLayout::FRAGMENT_DENSITY_MAP_OPTIMAL_EXT,
        ),
    ];
    for &(bit, layout) in PRIORITY {
        if state.contains(bit) {
            return layout;
        }
    }
    vk::ImageLayout::UNDEFINED
}

/// Pipeline-stage derivation: a queue-type-conditioned function of the
/// access-flag bits already computed (§4.10 "Pipeline-stage derivation").
pub fn access_flags_to_pipeline_stage(
    access: vk::AccessFlags,
    queue_ty: QueueType,
) -> vk::PipelineStageFlags {
    if queue_ty == QueueType::Transfer {
        return vk::PipelineStageFlags::ALL_COMMANDS;
    }

    const GRAPHICS_ONLY: vk::AccessFlags = vk::AccessFlags::from_raw(
        vk::AccessFlags::VERTEX_ATTRIBUTE_READ.as_raw()
            | vk::AccessFlags::INDEX_READ.as_raw()
            | vk::AccessFlags::COLOR_ATTACHMENT_READ.as_raw()
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags::INPUT_ATTACHMENT_READ.as_raw(),
    );

    if queue_ty == QueueType::Compute && access.intersects(GRAPHICS_ONLY) {
        return vk::PipelineStageFlags::ALL_COMMANDS;
    }

    let mut stage = vk::PipelineStageFlags::empty();
    if access.intersects(vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE) {
        stage |= vk::PipelineStageFlags::TRANSFER;
    }
    if access.intersects(vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ) {
        stage |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if access.intersects(vk::AccessFlags::UNIFORM_READ | vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE)
    {
        stage |= vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if access.intersects(vk::AccessFlags::INDIRECT_COMMAND_READ) {
        stage |= vk::PipelineStageFlags::DRAW_INDIRECT;
    }
    if access.intersects(vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE) {
        stage |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    }
    if access.intersects(
        vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
    ) {
        stage |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    }
    if access.intersects(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE) {
        stage |= vk::PipelineStageFlags::ALL_COMMANDS;
    }
    if access.intersects(
        vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
    ) {
        stage |= vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR;
    }

    if stage.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        stage
    }
}

/// `TinyImageFormat_ToVkFormat` equivalent.
pub fn map_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Undefined => vk::Format::UNDEFINED,
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rg32Float => vk::Format::R32G32_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth24Plus => vk::Format::X8_D24_UNORM_PACK32,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Stencil8 => vk::Format::S8_UINT,
        TextureFormat::Astc4x4UnormBlock => vk::Format::ASTC_4X4_UNORM_BLOCK,
        TextureFormat::Astc8x8UnormBlock => vk::Format::ASTC_8X8_UNORM_BLOCK,
        TextureFormat::Nv12 => vk::Format::G8_B8R8_2PLANE_420_UNORM,
        TextureFormat::P010 => vk::Format::G10X6_B10X6R10X6_2PLANE_420_UNORM_3PACK16,
    }
}

/// `TinyImageFormat_FromVkFormat` equivalent; returns `None` for Vulkan
/// formats this backend has no `TextureFormat` counterpart for.
pub fn unmap_texture_format(format: vk::Format) -> Option<TextureFormat> {
    Some(match format {
        vk::Format::UNDEFINED => TextureFormat::Undefined,
        vk::Format::R8_UNORM => TextureFormat::R8Unorm,
        vk::Format::R8G8_UNORM => TextureFormat::Rg8Unorm,
        vk::Format::R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => TextureFormat::Rgba8UnormSrgb,
        vk::Format::B8G8R8A8_UNORM => TextureFormat::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => TextureFormat::Bgra8UnormSrgb,
        vk::Format::R16_SFLOAT => TextureFormat::R16Float,
        vk::Format::R16G16_SFLOAT => TextureFormat::Rg16Float,
        vk::Format::R16G16B16A16_SFLOAT => TextureFormat::Rgba16Float,
        vk::Format::R32_UINT => TextureFormat::R32Uint,
        vk::Format::R32_SFLOAT => TextureFormat::R32Float,
        vk::Format::R32G32_SFLOAT => TextureFormat::Rg32Float,
        vk::Format::R32G32B32A32_SFLOAT => TextureFormat::Rgba32Float,
        vk::Format::D16_UNORM => TextureFormat::Depth16Unorm,
        vk::Format::X8_D24_UNORM_PACK32 => TextureFormat::Depth24Plus,
        vk::Format::D24_UNORM_S8_UINT => TextureFormat::Depth24PlusStencil8,
        vk::Format::D32_SFLOAT => TextureFormat::Depth32Float,
        vk::Format::S8_UINT => TextureFormat::Stencil8,
        vk::Format::ASTC_4X4_UNORM_BLOCK => TextureFormat::Astc4x4UnormBlock,
        vk::Format::ASTC_8X8_UNORM_BLOCK => TextureFormat::Astc8x8UnormBlock,
        vk::Format::G8_B8R8_2PLANE_420_UNORM => TextureFormat::Nv12,
        vk::Format::G10X6_B10X6R10X6_2PLANE_420_UNORM_3PACK16 => TextureFormat::P010,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uav_to_uav_access_is_read_and_write() {
        let access = resource_state_to_access_flags(ResourceState::UNORDERED_ACCESS);
        assert!(access.contains(vk::AccessFlags::SHADER_READ));
        assert!(access.contains(vk::AccessFlags::SHADER_WRITE));
    }

    #[test]
    fn layout_priority_prefers_copy_src_over_render_target() {
        let state = ResourceState::COPY_SRC | ResourceState::RENDER_TARGET;
        assert_eq!(
            resource_state_to_image_layout(state),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        );
    }

    #[test]
    fn empty_access_is_top_of_pipe() {
        let stage = access_flags_to_pipeline_stage(vk::AccessFlags::empty(), QueueType::Graphics);
        assert_eq!(stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn compute_queue_escalates_on_graphics_only_access() {
        let access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        let stage = access_flags_to_pipeline_stage(access, QueueType::Compute);
        assert_eq!(stage, vk::PipelineStageFlags::ALL_COMMANDS);
    }

    #[test]
    fn format_round_trips() {
        for format in [
            TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Depth32Float,
            TextureFormat::R32Float,
        ] {
            let vk_format = map_texture_format(format);
            assert_eq!(unmap_texture_format(vk_format), Some(format));
        }
    }
}
