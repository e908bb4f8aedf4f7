//! Command pool/buffer recording and barrier emission (§4.4, §4.10).
//!
//! The recording state machine is fully caller-driven: `begin`, record,
//! `end`, submit. A pool binds to exactly one queue family; buffers are
//! subordinate to their pool's lifetime (§3 CommandPool/CommandBuffer).

use super::descriptor::DescriptorSet;
use super::pipeline::{ComputePipeline, RenderPipeline};
use super::query::{self, IndirectCountSupport};
use super::render_pass::{vk_load_op, vk_store_op, AttachmentKey, FramebufferAttachment, FramebufferKey, RenderPassCache, RenderPassKey};
use super::root_signature::RootSignature;
use super::{conv, DeviceShared, RenderTarget};
use crate::{DeviceError, DownlevelFlags, LoadAction, QueueType, ResourceState, StoreAction};
use ash::vk;
use smallvec::SmallVec;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Executable,
    Pending,
}

/// A pool bound to exactly one queue (family); command buffers
/// allocated from it share its lifetime (§3 CommandPool).
#[derive(Debug)]
pub struct CommandPool {
    pub(crate) raw: vk::CommandPool,
    pub(crate) queue_family: u32,
    pub(crate) queue_ty: QueueType,
    pub(crate) device: Arc<DeviceShared>,
}

impl CommandPool {
    pub fn new(
        device: Arc<DeviceShared>,
        queue_family: u32,
        queue_ty: QueueType,
    ) -> Result<Self, DeviceError> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let raw =
            unsafe { device.raw.create_command_pool(&info, None) }.map_err(super::map_device_error)?;
        Ok(Self { raw, queue_family, queue_ty, device })
    }

    /// Returns every allocated command buffer to `Idle`, independent of
    /// its prior recording state (§8 "Round-trip / idempotence laws").
    pub fn reset(&self) -> Result<(), DeviceError> {
        unsafe {
            self.device
                .raw
                .reset_command_pool(self.raw, vk::CommandPoolResetFlags::empty())
        }
        .map_err(super::map_device_error)
    }

    pub fn allocate(&self, secondary: bool) -> Result<CommandEncoder, DeviceError> {
        let level = if secondary {
            vk::CommandBufferLevel::SECONDARY
        } else {
            vk::CommandBufferLevel::PRIMARY
        };
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.raw)
            .level(level)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.raw.allocate_command_buffers(&info) }
            .map_err(super::map_device_error)?;
        Ok(CommandEncoder {
            raw: buffers[0],
            device: self.device.clone(),
            queue_ty: self.queue_ty,
            state: RecordingState::Idle,
            bound_layout: None,
            render_target_mode: None,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_command_pool(self.raw, None) };
    }
}

/// One recorded command stream; lifecycle `Idle -> Recording ->
/// Executable -> Pending -> Idle` (on pool reset) (§3).
#[derive(Debug)]
pub struct CommandEncoder {
    pub(crate) raw: vk::CommandBuffer,
    pub(crate) device: Arc<DeviceShared>,
    pub(crate) queue_ty: QueueType,
    pub(crate) state: RecordingState,
    /// The pipeline layout bound by the most recent `bind_graphics_pipeline`
    /// / `bind_compute_pipeline`; tracked so the first descriptor-set bind
    /// after a layout change can fill the gap sets (§4.6 "Contract on bind").
    bound_layout: Option<vk::PipelineLayout>,
    render_target_mode: Option<RenderTargetMode>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RenderTargetMode {
    Dynamic,
    Legacy,
}

/// One color attachment binding for `bind_render_targets` (§4.9).
pub struct ColorAttachmentBinding<'a> {
    pub target: &'a RenderTarget,
    pub mip: u32,
    pub slice: u32,
    pub load: LoadAction,
    pub store: StoreAction,
}

/// A depth/stencil attachment binding for `bind_render_targets` (§4.9).
pub struct DepthStencilAttachmentBinding<'a> {
    pub target: &'a RenderTarget,
    pub mip: u32,
    pub slice: u32,
    pub load: LoadAction,
    pub store: StoreAction,
}

/// A finished, submittable recording (§3 CommandBuffer, "Executable").
#[derive(Debug)]
pub struct CommandBuffer {
    pub(crate) raw: vk::CommandBuffer,
}

/// A buffer-memory barrier request: old/new resource states plus an
/// optional queue-ownership transfer (§4.10 "Queue-ownership transfer").
#[derive(Clone, Copy, Debug)]
pub struct BufferBarrier<'a> {
    pub buffer: &'a super::Buffer,
    pub from: ResourceState,
    pub to: ResourceState,
    pub acquire: bool,
    pub release: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct TextureBarrier<'a> {
    pub texture: &'a super::Texture,
    pub from: ResourceState,
    pub to: ResourceState,
    pub acquire: bool,
    pub release: bool,
}

impl CommandEncoder {
    pub fn begin(&mut self) -> Result<(), DeviceError> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.raw.begin_command_buffer(self.raw, &info) }
            .map_err(super::map_device_error)?;
        self.state = RecordingState::Recording;
        self.bound_layout = None;
        self.render_target_mode = None;
        Ok(())
    }

    pub fn end(&mut self) -> Result<CommandBuffer, DeviceError> {
        unsafe { self.device.raw.end_command_buffer(self.raw) }.map_err(super::map_device_error)?;
        self.state = RecordingState::Executable;
        Ok(CommandBuffer { raw: self.raw })
    }

    /// Emits buffer/image barriers for the given state transitions,
    /// handling the UAV→UAV same-state flush/invalidate special case
    /// and queue-ownership family fill-in (§4.10).
    pub fn transition_resources<'a>(
        &self,
        buffers: impl IntoIterator<Item = BufferBarrier<'a>>,
        textures: impl IntoIterator<Item = TextureBarrier<'a>>,
        families: &super::QueueFamilies,
    ) {
        let mut buffer_barriers: SmallVec<[vk::BufferMemoryBarrier; 8]> = SmallVec::new();
        let mut image_barriers: SmallVec<[vk::ImageMemoryBarrier; 8]> = SmallVec::new();
        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();

        for barrier in buffers {
            let (src_access, dst_access) = if ResourceState::is_uav_self_barrier(barrier.from, barrier.to) {
                (vk::AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::SHADER_READ)
            } else {
                (
                    conv::resource_state_to_access_flags(barrier.from),
                    conv::resource_state_to_access_flags(barrier.to),
                )
            };
            src_stage |= conv::access_flags_to_pipeline_stage(src_access, self.queue_ty);
            dst_stage |= conv::access_flags_to_pipeline_stage(dst_access, self.queue_ty);

            let (src_family, dst_family) = queue_family_transfer(barrier.acquire, barrier.release, families, self.queue_ty);
            buffer_barriers.push(
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .src_queue_family_index(src_family)
                    .dst_queue_family_index(dst_family)
                    .buffer(barrier.buffer.raw)
                    .offset(0)
                    .size(vk::WHOLE_SIZE),
            );
        }

        for barrier in textures {
            let (src_access, dst_access) = if ResourceState::is_uav_self_barrier(barrier.from, barrier.to) {
                (vk::AccessFlags::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::SHADER_READ)
            } else {
                (
                    conv::resource_state_to_access_flags(barrier.from),
                    conv::resource_state_to_access_flags(barrier.to),
                )
            };
            src_stage |= conv::access_flags_to_pipeline_stage(src_access, self.queue_ty);
            dst_stage |= conv::access_flags_to_pipeline_stage(dst_access, self.queue_ty);

            let old_layout = conv::resource_state_to_image_layout(barrier.from);
            // UAV→UAV never carries a layout transition (§9 Open
            // Question 4: a generic memory barrier is sufficient).
            let new_layout = if ResourceState::is_uav_self_barrier(barrier.from, barrier.to) {
                old_layout
            } else {
                conv::resource_state_to_image_layout(barrier.to)
            };

            let (src_family, dst_family) = queue_family_transfer(barrier.acquire, barrier.release, families, self.queue_ty);
            let aspect = if barrier.texture.format.has_depth() || barrier.texture.format.has_stencil() {
                let mut mask = vk::ImageAspectFlags::empty();
                if barrier.texture.format.has_depth() {
                    mask |= vk::ImageAspectFlags::DEPTH;
                }
                if barrier.texture.format.has_stencil() {
                    mask |= vk::ImageAspectFlags::STENCIL;
                }
                mask
            } else {
                vk::ImageAspectFlags::COLOR
            };

            image_barriers.push(
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .old_layout(old_layout)
                    .new_layout(new_layout)
                    .src_queue_family_index(src_family)
                    .dst_queue_family_index(dst_family)
                    .image(barrier.texture.raw)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: aspect,
                        base_mip_level: 0,
                        level_count: barrier.texture.mip_level_count,
                        base_array_layer: 0,
                        layer_count: barrier.texture.array_layer_count,
                    }),
            );
        }

        if buffer_barriers.is_empty() && image_barriers.is_empty() {
            return;
        }
        if src_stage.is_empty() {
            src_stage = vk::PipelineStageFlags::TOP_OF_PIPE;
        }
        if dst_stage.is_empty() {
            dst_stage = vk::PipelineStageFlags::TOP_OF_PIPE;
        }

        unsafe {
            self.device.raw.cmd_pipeline_barrier(
                self.raw,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
    }

    /// Binds the given color/depth-stencil render targets, taking the
    /// dynamic-rendering fast path when the device supports it and
    /// falling back to the per-thread render-pass/framebuffer cache
    /// otherwise (§4.9).
    pub fn bind_render_targets(
        &mut self,
        render_pass_cache: &RenderPassCache,
        color: &[ColorAttachmentBinding<'_>],
        depth_stencil: Option<&DepthStencilAttachmentBinding<'_>>,
    ) -> Result<(), DeviceError> {
        if self.device.downlevel_flags.contains(DownlevelFlags::DYNAMIC_RENDERING)
            && self.device.dynamic_rendering_fn.is_some()
        {
            self.bind_render_targets_dynamic(color, depth_stencil);
        } else {
            self.bind_render_targets_legacy(render_pass_cache, color, depth_stencil)?;
        }
        Ok(())
    }

    fn bind_render_targets_dynamic(
        &mut self,
        color: &[ColorAttachmentBinding<'_>],
        depth_stencil: Option<&DepthStencilAttachmentBinding<'_>>,
    ) {
        let (width, height) = attachment_extent(color, depth_stencil);

        let color_infos: SmallVec<[vk::RenderingAttachmentInfo; 8]> = color
            .iter()
            .map(|c| {
                let mut info = vk::RenderingAttachmentInfo::default()
                    .image_view(c.target.view(c.mip, c.slice))
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk_load_op(c.load))
                    .store_op(vk_store_op(c.store));
                if let Some(resolve) = &c.target.resolve_target {
                    if c.store.intersects(StoreAction::RESOLVE_STORE | StoreAction::RESOLVE_DONT_CARE) {
                        info = info
                            .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                            .resolve_image_view(resolve.view(0, 0))
                            .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                    }
                }
                info
            })
            .collect();

        let mut depth_info = depth_stencil.map(|ds| {
            vk::RenderingAttachmentInfo::default()
                .image_view(ds.target.view(ds.mip, ds.slice))
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk_load_op(ds.load))
                .store_op(vk_store_op(ds.store))
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: vk::Extent2D { width, height } })
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(depth_info) = depth_info.as_mut() {
            rendering_info = rendering_info.depth_attachment(depth_info);
        }

        unsafe {
            self.device
                .dynamic_rendering_fn
                .as_ref()
                .expect("checked by bind_render_targets")
                .cmd_begin_rendering(self.raw, &rendering_info)
        };
        self.render_target_mode = Some(RenderTargetMode::Dynamic);
    }

    fn bind_render_targets_legacy(
        &mut self,
        render_pass_cache: &RenderPassCache,
        color: &[ColorAttachmentBinding<'_>],
        depth_stencil: Option<&DepthStencilAttachmentBinding<'_>>,
    ) -> Result<(), DeviceError> {
        let sample_count = color
            .first()
            .map(|c| c.target.texture.sample_count)
            .or_else(|| depth_stencil.map(|ds| ds.target.texture.sample_count))
            .unwrap_or(1);

        let key = RenderPassKey {
            color: color
                .iter()
                .map(|c| AttachmentKey { format: c.target.texture.format, load: c.load, store: c.store })
                .collect(),
            depth_stencil: depth_stencil
                .map(|ds| AttachmentKey { format: ds.target.texture.format, load: ds.load, store: ds.store }),
            sample_count,
        };
        let render_pass = render_pass_cache.get_or_create(&key)?;
        let needs_resolve = sample_count > 1;

        let (width, height) = attachment_extent(color, depth_stencil);
        let mut attachment_views = Vec::new();
        let mut fb_color = Vec::with_capacity(color.len());
        for c in color {
            attachment_views.push(c.target.view(c.mip, c.slice));
            let resolve_id = c.target.resolve_target.as_ref().map(|rt| rt.id() as u64);
            if needs_resolve {
                if let Some(resolve) = &c.target.resolve_target {
                    attachment_views.push(resolve.view(0, 0));
                }
            }
            fb_color.push(FramebufferAttachment {
                render_target_id: c.target.id() as u64,
                use_array_slice: true,
                array_slice: c.slice,
                use_mip_slice: true,
                mip_slice: c.mip,
                resolve_render_target_id: resolve_id,
            });
        }
        let fb_depth_stencil = depth_stencil.map(|ds| {
            attachment_views.push(ds.target.view(ds.mip, ds.slice));
            FramebufferAttachment {
                render_target_id: ds.target.id() as u64,
                use_array_slice: true,
                array_slice: ds.slice,
                use_mip_slice: true,
                mip_slice: ds.mip,
                resolve_render_target_id: None,
            }
        });

        let fb_key = FramebufferKey {
            render_pass,
            color: fb_color,
            depth_stencil: fb_depth_stencil,
            width,
            height,
        };
        let framebuffer = render_pass_cache.get_or_create_framebuffer(&fb_key, &attachment_views)?;

        let clear_values = vec![vk::ClearValue::default(); attachment_views.len()];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: vk::Extent2D { width, height } })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .raw
                .cmd_begin_render_pass(self.raw, &begin_info, vk::SubpassContents::INLINE)
        };
        self.render_target_mode = Some(RenderTargetMode::Legacy);
        Ok(())
    }

    /// Ends whichever render-target binding mode `bind_render_targets`
    /// selected; a no-op if nothing is bound.
    pub fn end_render_targets(&mut self) {
        match self.render_target_mode.take() {
            Some(RenderTargetMode::Dynamic) => unsafe {
                self.device
                    .dynamic_rendering_fn
                    .as_ref()
                    .expect("set only when the fn table was loaded")
                    .cmd_end_rendering(self.raw)
            },
            Some(RenderTargetMode::Legacy) => unsafe {
                self.device.raw.cmd_end_render_pass(self.raw)
            },
            None => {}
        }
    }

    pub fn bind_graphics_pipeline(&mut self, pipeline: &RenderPipeline) {
        unsafe {
            self.device
                .raw
                .cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::GRAPHICS, pipeline.raw)
        };
    }

    pub fn bind_compute_pipeline(&mut self, pipeline: &ComputePipeline) {
        unsafe {
            self.device
                .raw
                .cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::COMPUTE, pipeline.raw)
        };
    }

    /// Binds a plain (no dynamic-offset) descriptor set. On the first
    /// bind after a pipeline-layout change, also binds the renderer's
    /// empty descriptor sets to every other active set index so no set
    /// is left undefined (§4.6 "Contract on bind").
    pub fn bind_descriptor_set(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        root_signature: &RootSignature,
        set: &DescriptorSet,
    ) {
        self.bind_empty_sets_if_layout_changed(bind_point, root_signature);
        unsafe {
            self.device.raw.cmd_bind_descriptor_sets(
                self.raw,
                bind_point,
                root_signature.pipeline_layout,
                set.set_index,
                &[set.raw],
                &[],
            )
        };
    }

    /// Binds a descriptor set that carries root-CBV (dynamic uniform
    /// buffer) bindings, supplying one dynamic offset per root-CBV
    /// binding declared on that set, in binding order (§4.6, §4.7).
    pub fn bind_descriptor_set_with_root_cbvs(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        root_signature: &RootSignature,
        set: &DescriptorSet,
        dynamic_offsets: &[u32],
    ) {
        self.bind_empty_sets_if_layout_changed(bind_point, root_signature);
        unsafe {
            self.device.raw.cmd_bind_descriptor_sets(
                self.raw,
                bind_point,
                root_signature.pipeline_layout,
                set.set_index,
                &[set.raw],
                dynamic_offsets,
            )
        };
    }

    fn bind_empty_sets_if_layout_changed(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        root_signature: &RootSignature,
    ) {
        if self.bound_layout == Some(root_signature.pipeline_layout) {
            return;
        }
        let active_sets = root_signature
            .set_layouts
            .iter()
            .take_while(|&&l| l != vk::DescriptorSetLayout::null())
            .count();
        if active_sets > 0 {
            let empty_sets = vec![self.device.empty_descriptor_set; active_sets];
            unsafe {
                self.device.raw.cmd_bind_descriptor_sets(
                    self.raw,
                    bind_point,
                    root_signature.pipeline_layout,
                    0,
                    &empty_sets,
                    &[],
                )
            };
        }
        self.bound_layout = Some(root_signature.pipeline_layout);
    }

    pub fn push_constants(&self, layout: vk::PipelineLayout, stage_mask: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe {
            self.device
                .raw
                .cmd_push_constants(self.raw, layout, stage_mask, offset, data)
        };
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device
                .raw
                .cmd_draw(self.raw, vertex_count, instance_count, first_vertex, first_instance)
        };
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.raw.cmd_draw_indexed(
                self.raw,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe {
            self.device
                .raw
                .cmd_dispatch(self.raw, group_count_x, group_count_y, group_count_z)
        };
    }

    pub fn draw_indexed_indirect(&self, buffer: &super::Buffer, offset: u64, draw_count: u32, stride: u32) {
        unsafe {
            self.device
                .raw
                .cmd_draw_indexed_indirect(self.raw, buffer.raw, offset, draw_count, stride)
        };
    }

    /// Indirect-count draw dispatch (§4.11): uses the hardware
    /// `vkCmdDrawIndexedIndirectCount` when the KHR or AMD extension is
    /// loaded, otherwise falls back to a software loop of
    /// `max_draw_count` single indirect draws.
    pub fn draw_indexed_indirect_count(
        &self,
        buffer: &super::Buffer,
        offset: u64,
        count_buffer: &super::Buffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        match query::choose_indirect_count_support(
            self.device.draw_indirect_count_khr_fn.is_some(),
            self.device.draw_indirect_count_amd_fn.is_some(),
        ) {
            IndirectCountSupport::Khr => unsafe {
                self.device
                    .draw_indirect_count_khr_fn
                    .as_ref()
                    .expect("checked by choose_indirect_count_support")
                    .cmd_draw_indexed_indirect_count(
                        self.raw,
                        buffer.raw,
                        offset,
                        count_buffer.raw,
                        count_offset,
                        max_draw_count,
                        stride,
                    )
            },
            IndirectCountSupport::Amd => unsafe {
                self.device
                    .draw_indirect_count_amd_fn
                    .as_ref()
                    .expect("checked by choose_indirect_count_support")
                    .cmd_draw_indexed_indirect_count(
                        self.raw,
                        buffer.raw,
                        offset,
                        count_buffer.raw,
                        count_offset,
                        max_draw_count,
                        stride,
                    )
            },
            IndirectCountSupport::None => {
                for i in 0..max_draw_count {
                    let draw_offset = offset + i as u64 * stride as u64;
                    unsafe {
                        self.device
                            .raw
                            .cmd_draw_indexed_indirect(self.raw, buffer.raw, draw_offset, 1, stride)
                    };
                }
            }
        }
    }
}

fn attachment_extent(
    color: &[ColorAttachmentBinding<'_>],
    depth_stencil: Option<&DepthStencilAttachmentBinding<'_>>,
) -> (u32, u32) {
    let (extent, mip) = color
        .first()
        .map(|c| (c.target.texture.extent, c.mip))
        .or_else(|| depth_stencil.map(|ds| (ds.target.texture.extent, ds.mip)))
        .unwrap_or((crate::Extent3d::default(), 0));
    (
        (extent.width >> mip).max(1),
        (extent.height >> mip).max(1),
    )
}

fn queue_family_transfer(
    acquire: bool,
    release: bool,
    families: &super::QueueFamilies,
    current_ty: QueueType,
) -> (u32, u32) {
    if !acquire && !release {
        return (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED);
    }
    let current = families.get(current_ty).unwrap_or(0);
    // Transfers in this rendition are always graphics<->transfer; a
    // caller requesting acquire/release on a family this renderer
    // didn't create falls back to IGNORED rather than guessing.
    let other = families.get(QueueType::Transfer).unwrap_or(current);
    if release {
        (current, other)
    } else {
        (other, current)
    }
}
