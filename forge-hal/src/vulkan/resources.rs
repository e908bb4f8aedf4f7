//! Resource creation paths (§4.3): buffers, textures, render targets,
//! samplers, and resource heaps, plus the shared helpers that translate
//! a descriptor record into Vulkan create-info and a placed-or-allocated
//! memory binding.

use super::{conv, map_device_error, Device, DeviceShared, RenderTarget, ResourceHeap, Sampler, Texture, TextureView};
use crate::{DeviceError, QueueType};
use ash::vk;
use ftypes::{CreationFlags, DescriptorTypeMask, Extent3d, MemoryUsage, ResourceState, TextureFormat};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;

/// Where a buffer or texture's memory comes from: a fresh sub-allocation
/// (the default) or a declared offset into a caller-owned [`ResourceHeap`]
/// (§4.2 "Placed resources bypass the allocator").
pub struct HeapPlacement<'a> {
    pub heap: &'a ResourceHeap,
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub size: u64,
    pub memory_usage: MemoryUsage,
    pub descriptor_types: DescriptorTypeMask,
    pub flags: CreationFlags,
    /// Requests an auxiliary typed (uniform/storage-texel) buffer view;
    /// honoured only when `descriptor_types` also carries the matching
    /// `TYPED_BUFFER_*` bit (§4.3 "typed buffers request a typed
    /// buffer-view iff the format supports the required buffer feature").
    pub typed_format: Option<TextureFormat>,
}

#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub extent: Extent3d,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub descriptor_types: DescriptorTypeMask,
    pub start_state: ResourceState,
    pub flags: CreationFlags,
    pub is_cube: bool,
    pub memory_usage: MemoryUsage,
    /// Adds the color- or depth/stencil-attachment usage bit matching
    /// `format` (set by [`RenderTargetDesc`]; plain textures leave this
    /// false).
    pub is_render_target: bool,
}

#[derive(Clone, Debug)]
pub struct RenderTargetDesc {
    pub extent: Extent3d,
    pub mip_level_count: u32,
    pub array_layer_count: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub start_state: ResourceState,
    pub flags: CreationFlags,
    pub memory_usage: MemoryUsage,
}

#[derive(Clone, Debug)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: Option<f32>,
    pub compare_op: Option<vk::CompareOp>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: vk::BorderColor,
    /// Set for samplers bound to a multi-planar (YCbCr) format (§3 Sampler).
    pub ycbcr_format: Option<TextureFormat>,
}

#[derive(Clone, Debug)]
pub struct ResourceHeapDesc {
    pub size: u64,
    pub memory_usage: MemoryUsage,
    /// Memory-type bits compatible with everything this heap will host,
    /// taken from the future placements' own `getMemoryRequirements`.
    pub memory_type_bits: u32,
    pub persistent_map: bool,
}

fn round_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        value
    } else {
        (value + align - 1) / align * align
    }
}

fn gpu_alloc_usage(
    memory_usage: MemoryUsage,
    flags: CreationFlags,
    lazily_allocated: bool,
) -> gpu_alloc::UsageFlags {
    let mut usage = match memory_usage {
        MemoryUsage::GpuOnly => gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
        MemoryUsage::CpuToGpu => gpu_alloc::UsageFlags::HOST_ACCESS | gpu_alloc::UsageFlags::UPLOAD,
        MemoryUsage::GpuToCpu => gpu_alloc::UsageFlags::HOST_ACCESS | gpu_alloc::UsageFlags::DOWNLOAD,
        MemoryUsage::CpuOnly => gpu_alloc::UsageFlags::HOST_ACCESS,
    };
    if flags.contains(CreationFlags::SHADER_DEVICE_ADDRESS) {
        usage |= gpu_alloc::UsageFlags::DEVICE_ADDRESS;
    }
    if lazily_allocated {
        usage |= gpu_alloc::UsageFlags::TRANSIENT;
    }
    usage
}

fn buffer_usage_from_descriptor_types(
    types: DescriptorTypeMask,
    flags: CreationFlags,
) -> vk::BufferUsageFlags {
    let mut usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    if types.contains(DescriptorTypeMask::UNIFORM_BUFFER) {
        usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if types.contains(DescriptorTypeMask::STORAGE_BUFFER) {
        usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if types.contains(DescriptorTypeMask::TYPED_BUFFER_SRV) {
        usage |= vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER;
    }
    if types.contains(DescriptorTypeMask::TYPED_BUFFER_UAV) {
        usage |= vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER;
    }
    if types.contains(DescriptorTypeMask::INDEX_BUFFER) {
        usage |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if types.contains(DescriptorTypeMask::VERTEX_BUFFER) {
        usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if types.contains(DescriptorTypeMask::INDIRECT_BUFFER) {
        usage |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if types.contains(DescriptorTypeMask::ACCELERATION_STRUCTURE) {
        usage |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    if types.contains(DescriptorTypeMask::SHADER_BINDING_TABLE) {
        usage |= vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    if flags.contains(CreationFlags::SHADER_DEVICE_ADDRESS) {
        usage |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    usage
}

fn texture_usage_from_descriptor_types(
    types: DescriptorTypeMask,
    format: TextureFormat,
    is_render_target: bool,
) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    if types.contains(DescriptorTypeMask::TEXTURE_SRV) {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if types.contains(DescriptorTypeMask::TEXTURE_UAV) {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    if is_render_target {
        usage |= if format.is_depth_stencil() {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };
    }
    usage
}

/// Picks the image type from `FORCE_2D`/`FORCE_3D` or, failing that, the
/// extent (§4.3). `depth_or_array_layers` cannot by itself disambiguate
/// a 3D depth extent from a 2D array-layer count, so a true 3D image
/// requires the explicit `FORCE_3D` flag.
fn choose_image_type(extent: Extent3d, flags: CreationFlags) -> vk::ImageType {
    if flags.contains(CreationFlags::FORCE_3D) {
        vk::ImageType::TYPE_3D
    } else if flags.contains(CreationFlags::FORCE_2D) {
        vk::ImageType::TYPE_2D
    } else if extent.height == 1 && extent.depth_or_array_layers == 1 {
        vk::ImageType::TYPE_1D
    } else {
        vk::ImageType::TYPE_2D
    }
}

fn aspect_mask_for_format(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_depth() && format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.has_depth() {
        vk::ImageAspectFlags::DEPTH
    } else if format.has_stencil() {
        vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

fn view_type_for(image_type: vk::ImageType, array_layer_count: u32, is_cube: bool) -> vk::ImageViewType {
    match image_type {
        vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
        vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
        _ if is_cube && array_layer_count > 6 => vk::ImageViewType::CUBE_ARRAY,
        _ if is_cube => vk::ImageViewType::CUBE,
        _ if array_layer_count > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
        _ => vk::ImageViewType::TYPE_2D,
    }
}

/// Records and submits a single `UNDEFINED → start_state` barrier on the
/// renderer's reusable initial-transition queue, then blocks on its fence
/// (§3 invariant "every texture that survives creation is transitioned
/// from UNDEFINED to its declared start-state before returning"; §5
/// "Initial-state transitions ... wait their own fence inline").
fn run_initial_transition(
    shared: &DeviceShared,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    mip_level_count: u32,
    array_layer_count: u32,
    start_state: ResourceState,
) -> Result<(), DeviceError> {
    let ctx = shared.initial_transition_mutex.lock();

    unsafe {
        shared
            .raw
            .reset_command_buffer(ctx.buffer, vk::CommandBufferResetFlags::empty())
    }
    .map_err(map_device_error)?;

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { shared.raw.begin_command_buffer(ctx.buffer, &begin_info) }.map_err(map_device_error)?;

    let dst_access = conv::resource_state_to_access_flags(start_state);
    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(dst_access)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(conv::resource_state_to_image_layout(start_state))
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: mip_level_count,
            base_array_layer: 0,
            layer_count: array_layer_count,
        });

    unsafe {
        shared.raw.cmd_pipeline_barrier(
            ctx.buffer,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            conv::access_flags_to_pipeline_stage(dst_access, QueueType::Graphics),
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        )
    };

    unsafe { shared.raw.end_command_buffer(ctx.buffer) }.map_err(map_device_error)?;
    unsafe { shared.raw.reset_fences(&[ctx.fence]) }.map_err(map_device_error)?;

    let buffers = [ctx.buffer];
    let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
    unsafe {
        shared
            .raw
            .queue_submit(ctx.queue, &[submit_info], ctx.fence)
    }
    .map_err(map_device_error)?;

    unsafe { shared.raw.wait_for_fences(&[ctx.fence], true, u64::MAX) }.map_err(map_device_error)
}

impl Device {
    /// `addBuffer` (§4.3): rounds UBO sizes up to the driver's minimum
    /// alignment, binds to a placed or freshly-allocated block, and
    /// creates the auxiliary typed buffer view when requested.
    pub fn add_buffer(
        &self,
        desc: &BufferDesc,
        placement: Option<HeapPlacement<'_>>,
    ) -> Result<super::Buffer, DeviceError> {
        let size = if desc.descriptor_types.contains(DescriptorTypeMask::UNIFORM_BUFFER) {
            round_up(desc.size, self.shared.min_uniform_buffer_offset_alignment)
        } else {
            desc.size
        };

        let usage = buffer_usage_from_descriptor_types(desc.descriptor_types, desc.flags);
        let info = vk::BufferCreateInfo::default().size(size).usage(usage);
        let raw = unsafe { self.shared.raw.create_buffer(&info, None) }.map_err(map_device_error)?;
        let requirements = unsafe { self.shared.raw.get_buffer_memory_requirements(raw) };

        let block = match placement {
            Some(placement) => {
                let (memory, offset) = placement.heap.memory_and_offset(placement.offset);
                unsafe { self.shared.raw.bind_buffer_memory(raw, memory, offset) }
                    .map_err(map_device_error)?;
                None
            }
            None => {
                let block = unsafe {
                    self.mem_allocator.lock().alloc(
                        gpu_alloc_ash::AshMemoryDevice::wrap(&self.shared.raw),
                        gpu_alloc::Request {
                            size: requirements.size,
                            align_mask: requirements.alignment - 1,
                            usage: gpu_alloc_usage(desc.memory_usage, desc.flags, false),
                            memory_types: requirements.memory_type_bits,
                        },
                    )
                }
                .map_err(|_| DeviceError::OutOfMemory)?;
                unsafe {
                    self.shared
                        .raw
                        .bind_buffer_memory(raw, *block.memory(), block.offset())
                }
                .map_err(map_device_error)?;
                Some(Mutex::new(block))
            }
        };

        let wants_typed_view = desc
            .descriptor_types
            .intersects(DescriptorTypeMask::TYPED_BUFFER_SRV | DescriptorTypeMask::TYPED_BUFFER_UAV);
        let typed_view = match (wants_typed_view, desc.typed_format) {
            (true, Some(format)) => {
                let view_info = vk::BufferViewCreateInfo::default()
                    .buffer(raw)
                    .format(conv::map_texture_format(format))
                    .offset(0)
                    .range(vk::WHOLE_SIZE);
                Some(
                    unsafe { self.shared.raw.create_buffer_view(&view_info, None) }
                        .map_err(map_device_error)?,
                )
            }
            _ => None,
        };

        Ok(super::Buffer {
            raw,
            block,
            size,
            descriptor_types: desc.descriptor_types,
            typed_view,
        })
    }

    /// `addTexture` (§4.3): picks the image type, applies the VR-multiview
    /// and cube-compatible adjustments, clamps usage for lazily-allocated
    /// attachments, binds memory, and runs the mandatory initial
    /// transition before returning.
    pub fn add_texture(
        &self,
        desc: &TextureDesc,
        placement: Option<HeapPlacement<'_>>,
    ) -> Result<Texture, DeviceError> {
        let image_type = choose_image_type(desc.extent, desc.flags);
        let multiview_factor = if desc.flags.contains(CreationFlags::VR_MULTIVIEW) { 2 } else { 1 };
        let array_layer_count = desc.array_layer_count * multiview_factor;

        let lazily_allocated = desc.flags.contains(CreationFlags::ON_TILE);
        let mut usage =
            texture_usage_from_descriptor_types(desc.descriptor_types, desc.format, desc.is_render_target);
        if lazily_allocated {
            usage &= vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::ImageUsageFlags::INPUT_ATTACHMENT;
            usage |= vk::ImageUsageFlags::TRANSIENT_ATTACHMENT;
        }

        let mut image_flags = vk::ImageCreateFlags::empty();
        if desc.is_cube {
            image_flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }
        let vk_format = conv::map_texture_format(desc.format);
        let view_formats = [vk_format];
        let mut format_list = vk::ImageFormatListCreateInfo::default().view_formats(&view_formats);
        if desc.format.is_planar() {
            image_flags |= vk::ImageCreateFlags::MUTABLE_FORMAT;
        }

        let mut info = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(vk_format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: if image_type == vk::ImageType::TYPE_3D {
                    desc.extent.depth_or_array_layers
                } else {
                    1
                },
            })
            .mip_levels(desc.mip_level_count)
            .array_layers(if image_type == vk::ImageType::TYPE_3D { 1 } else { array_layer_count })
            .samples(
                vk::SampleCountFlags::from_raw(desc.sample_count.max(1)),
            )
            .usage(usage)
            .flags(image_flags)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        if desc.format.is_planar() {
            info = info.push_next(&mut format_list);
        }

        let raw = unsafe { self.shared.raw.create_image(&info, None) }.map_err(map_device_error)?;
        let requirements = unsafe { self.shared.raw.get_image_memory_requirements(raw) };

        let block = match placement {
            Some(placement) => {
                let (memory, offset) = placement.heap.memory_and_offset(placement.offset);
                unsafe { self.shared.raw.bind_image_memory(raw, memory, offset) }
                    .map_err(map_device_error)?;
                None
            }
            None => {
                let block = unsafe {
                    self.mem_allocator.lock().alloc(
                        gpu_alloc_ash::AshMemoryDevice::wrap(&self.shared.raw),
                        gpu_alloc::Request {
                            size: requirements.size,
                            align_mask: requirements.alignment - 1,
                            usage: gpu_alloc_usage(desc.memory_usage, desc.flags, lazily_allocated),
                            memory_types: requirements.memory_type_bits,
                        },
                    )
                }
                .map_err(|_| DeviceError::OutOfMemory)?;
                unsafe {
                    self.shared
                        .raw
                        .bind_image_memory(raw, *block.memory(), block.offset())
                }
                .map_err(map_device_error)?;
                Some(Mutex::new(block))
            }
        };

        run_initial_transition(
            &self.shared,
            raw,
            aspect_mask_for_format(desc.format),
            desc.mip_level_count,
            array_layer_count,
            desc.start_state,
        )?;

        Ok(Texture {
            raw,
            block,
            owns_image: true,
            format: desc.format,
            extent: desc.extent,
            mip_level_count: desc.mip_level_count,
            array_layer_count,
            sample_count: desc.sample_count.max(1),
            lazily_allocated,
        })
    }

    /// `addRenderTarget` (§4.3, §3 RenderTarget): creates the backing
    /// texture, materialises one attachment view per (mip, slice) pair,
    /// assigns the monotonic id, and recursively builds the single-sample
    /// resolve target when `CREATE_RESOLVE_ATTACHMENT` is set.
    pub fn add_render_target(&self, desc: &RenderTargetDesc) -> Result<RenderTarget, DeviceError> {
        let texture_desc = TextureDesc {
            extent: desc.extent,
            mip_level_count: desc.mip_level_count,
            array_layer_count: desc.array_layer_count,
            sample_count: desc.sample_count,
            format: desc.format,
            descriptor_types: DescriptorTypeMask::empty(),
            start_state: desc.start_state,
            flags: desc.flags,
            is_cube: false,
            memory_usage: desc.memory_usage,
            is_render_target: true,
        };
        let texture = self.add_texture(&texture_desc, None)?;

        let image_type = choose_image_type(desc.extent, desc.flags);
        let slice_count = if image_type == vk::ImageType::TYPE_3D {
            desc.extent.depth_or_array_layers
        } else {
            texture.array_layer_count
        };
        let view_type = view_type_for(image_type, texture.array_layer_count, false);
        let aspect_mask = aspect_mask_for_format(desc.format);
        let vk_format = conv::map_texture_format(desc.format);

        let mut views = Vec::with_capacity((texture.mip_level_count * slice_count) as usize);
        for mip in 0..texture.mip_level_count {
            for slice in 0..slice_count {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(texture.raw)
                    .view_type(view_type)
                    .format(vk_format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask,
                        base_mip_level: mip,
                        level_count: 1,
                        base_array_layer: slice,
                        layer_count: 1,
                    });
                let raw = unsafe { self.shared.raw.create_image_view(&view_info, None) }
                    .map_err(map_device_error)?;
                views.push(TextureView {
                    raw,
                    base_mip_level: mip,
                    mip_level_count: 1,
                    base_array_layer: slice,
                    array_layer_count: 1,
                });
            }
        }

        let resolve_target = if desc.flags.contains(CreationFlags::CREATE_RESOLVE_ATTACHMENT)
            && desc.sample_count > 1
        {
            let resolve_desc = RenderTargetDesc {
                sample_count: 1,
                flags: desc.flags - CreationFlags::CREATE_RESOLVE_ATTACHMENT,
                ..desc.clone()
            };
            Some(Box::new(self.add_render_target(&resolve_desc)?))
        } else {
            None
        };

        let id = self.shared.next_render_target_id.fetch_add(1, Ordering::Relaxed);

        let mip_level_count = texture.mip_level_count;
        Ok(RenderTarget {
            texture,
            id,
            mip_level_count,
            array_layer_count: slice_count,
            views,
            resolve_target,
        })
    }

    /// `addSampler` (§4.3, §3 Sampler): builds the filter/address-mode
    /// state and, for planar formats, a chained YCbCr conversion.
    pub fn add_sampler(&self, desc: &SamplerDesc) -> Result<Sampler, DeviceError> {
        let mut info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode_u)
            .address_mode_v(desc.address_mode_v)
            .address_mode_w(desc.address_mode_w)
            .mip_lod_bias(desc.mip_lod_bias)
            .anisotropy_enable(desc.max_anisotropy.is_some())
            .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
            .compare_enable(desc.compare_op.is_some())
            .compare_op(desc.compare_op.unwrap_or(vk::CompareOp::NEVER))
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .border_color(desc.border_color);

        let ycbcr_conversion = match desc.ycbcr_format {
            Some(format) => {
                let conv_info = vk::SamplerYcbcrConversionCreateInfo::default()
                    .format(conv::map_texture_format(format))
                    .ycbcr_model(vk::SamplerYcbcrModelConversion::YCBCR_601)
                    .ycbcr_range(vk::SamplerYcbcrRange::ITU_NARROW)
                    .chroma_filter(desc.mag_filter);
                let conversion = unsafe {
                    self.shared.raw.create_sampler_ycbcr_conversion(&conv_info, None)
                }
                .map_err(map_device_error)?;
                Some(conversion)
            }
            None => None,
        };

        let mut conversion_info;
        if let Some(conversion) = ycbcr_conversion {
            conversion_info = vk::SamplerYcbcrConversionInfo::default().conversion(conversion);
            info = info.push_next(&mut conversion_info);
        }

        let raw = unsafe { self.shared.raw.create_sampler(&info, None) }.map_err(map_device_error)?;

        Ok(Sampler { raw, ycbcr_conversion })
    }

    /// `addResourceHeap` (§3 ResourceHeap, §4.2): a dedicated allocation
    /// buffers and textures may be placed into at a declared offset.
    pub fn add_resource_heap(&self, desc: &ResourceHeapDesc) -> Result<ResourceHeap, DeviceError> {
        let mut block = unsafe {
            self.mem_allocator.lock().alloc(
                gpu_alloc_ash::AshMemoryDevice::wrap(&self.shared.raw),
                gpu_alloc::Request {
                    size: desc.size,
                    align_mask: 0,
                    usage: gpu_alloc_usage(desc.memory_usage, CreationFlags::empty(), false),
                    memory_types: desc.memory_type_bits,
                },
            )
        }
        .map_err(|_| DeviceError::OutOfMemory)?;

        let mapped_ptr = if desc.persistent_map {
            unsafe {
                block.map(
                    gpu_alloc_ash::AshMemoryDevice::wrap(&self.shared.raw),
                    0,
                    desc.size as usize,
                )
            }
            .ok()
        } else {
            None
        };

        Ok(ResourceHeap {
            block: Mutex::new(block),
            mapped_ptr,
        })
    }
}
