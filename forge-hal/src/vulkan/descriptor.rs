//! Descriptor-pool sizing, up-front set allocation with null-descriptor
//! initialisation, and the bounded scratch-buffer `updateDescriptorSet`
//! batching algorithm (§4.7).

use super::root_signature::RootSignatureBinding;
use super::{DeviceShared, NullDescriptors, RootSignature};
use crate::{DescriptorError, DescriptorType, DeviceError, UpdateFrequency};
use ash::vk;
use gpu_descriptor::{DescriptorAllocator, DescriptorSetLayoutCreateFlags, DescriptorTotalCount};
use gpu_descriptor_ash::AshDescriptorDevice;
use std::sync::Arc;

/// The resource(s) a [`DescriptorWrite`] binds. Array-valued variants
/// carry one element per array slot starting at `array_index`; a slice
/// that would overflow the update's scratch budget is split across
/// multiple `vkUpdateDescriptorSets` calls rather than growing the
/// scratch buffer unboundedly (§4.7 "truncated to what fits and the
/// remainder rewritten").
pub enum WriteResource<'a> {
    Buffers(&'a [(vk::Buffer, u64, u64)]),
    /// Overrides a single constant/structured-buffer slot's bound range
    /// instead of the whole-resource default, validated against the
    /// driver's max (uniform|storage) buffer range (§4.7
    /// "bindBufferWithDynamicRange").
    BufferRange { buffer: vk::Buffer, offset: u64, size: u64 },
    Images(&'a [(vk::ImageView, vk::ImageLayout, Option<vk::Sampler>)]),
    /// Binds the stencil-aspect view of a depth/stencil texture rather
    /// than its depth or color aspect (§4.7 "bindStencilResource").
    StencilImage(vk::ImageView, vk::ImageLayout),
    /// One view per mip level of a single texture; must exactly fill the
    /// binding's array range starting at index 0, a partial chain is
    /// rejected (§4.7 "bindMipChain").
    MipChain(&'a [(vk::ImageView, vk::ImageLayout)]),
    Samplers(&'a [vk::Sampler]),
    /// One `vkUpdateDescriptorSets` call per element, each chaining its
    /// own `VkWriteDescriptorSetAccelerationStructureKHR` (§4.7
    /// "acceleration structures update one descriptor per call").
    AccelerationStructures(&'a [vk::AccelerationStructureKHR]),
}

/// One named update against a root signature's reflected bindings
/// (§4.7 "updateDescriptorSet").
pub struct DescriptorWrite<'a> {
    pub name: &'a str,
    pub array_index: u32,
    pub resource: WriteResource<'a>,
}

/// Caps the number of `VkWriteDescriptorSet` entries batched into one
/// `vkUpdateDescriptorSets` call; an overflowing update is split into
/// multiple calls rather than growing the scratch buffer unboundedly
/// (§4.7 "bounded scratch").
const MAX_BATCHED_WRITES: usize = 256;
/// Inline payload scratch budget in bytes for buffer/image infos backing
/// a single batch (§4.7).
const WRITE_SCRATCH_BYTES: usize = 32 * 1024;

pub struct DescriptorPool {
    pub(crate) device: Arc<DeviceShared>,
    pub(crate) allocated: Vec<gpu_descriptor::DescriptorSet<vk::DescriptorSet>>,
}

pub struct DescriptorSet {
    pub(crate) raw: vk::DescriptorSet,
    pub(crate) set_index: u32,
}

impl DescriptorPool {
    /// Allocates every descriptor set up front for a root signature,
    /// sized to `max_sets` instances of its per-set pool sizes, and
    /// binds every non-static, non-root-cbv slot to the renderer's null
    /// descriptors before returning (§4.7 "Allocation", "Initialisation
    /// to null-descriptors").
    pub fn new(
        device: Arc<DeviceShared>,
        allocator: &parking_lot::Mutex<DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>>,
        root_signature: &RootSignature,
        null_descriptors: &NullDescriptors,
        set_index: u32,
        max_sets: u32,
    ) -> Result<Vec<DescriptorSet>, DescriptorError> {
        let layout = root_signature.set_layouts[set_index as usize];
        if layout == vk::DescriptorSetLayout::null() {
            return Ok(Vec::new());
        }

        let counts = pool_sizes_to_total_count(&root_signature.pool_sizes[set_index as usize]);
        let mut ash_device = AshDescriptorDevice::wrap(&device.raw);

        let mut sets = Vec::with_capacity(max_sets as usize);
        for _ in 0..max_sets {
            let allocated = unsafe {
                allocator.lock().allocate(
                    &mut ash_device,
                    &layout,
                    DescriptorSetLayoutCreateFlags::empty(),
                    &counts,
                    1,
                )
            }
            .map_err(|_| DescriptorError::Device(DeviceError::OutOfMemory))?;
            let raw = *allocated[0].raw();
            let set = DescriptorSet { raw, set_index };
            write_null_defaults(&device, root_signature, null_descriptors, &set)?;
            sets.push(set);
        }

        Ok(sets)
    }
}

/// Writes the renderer's null-descriptor defaults into every non-static,
/// non-root-cbv binding of `set`'s update-frequency set, so no slot is
/// ever left pointing at garbage before the first real update (§4.7
/// "Initialisation to null-descriptors").
fn write_null_defaults(
    device: &DeviceShared,
    root_signature: &RootSignature,
    null_descriptors: &NullDescriptors,
    set: &DescriptorSet,
) -> Result<(), DescriptorError> {
    let target_set = UpdateFrequency::ALL[set.set_index as usize];

    for binding in root_signature.bindings.iter() {
        if binding.set != target_set || binding.is_static_sampler || binding.is_root_cbv {
            continue;
        }

        let array_size = binding.array_size as usize;
        match binding.descriptor_type {
            DescriptorType::Sampler => {
                let samplers = vec![null_descriptors.default_sampler.raw; array_size];
                write_default(device, root_signature, set, &binding.name, WriteResource::Samplers(&samplers))?;
            }
            DescriptorType::CombinedImageSampler => {
                let images = vec![
                    (
                        null_descriptors.default_tex_srv_view[1].raw,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        Some(null_descriptors.default_sampler.raw),
                    );
                    array_size
                ];
                write_default(device, root_signature, set, &binding.name, WriteResource::Images(&images))?;
            }
            DescriptorType::SampledImage => {
                let images = vec![
                    (null_descriptors.default_tex_srv_view[1].raw, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, None);
                    array_size
                ];
                write_default(device, root_signature, set, &binding.name, WriteResource::Images(&images))?;
            }
            DescriptorType::StorageImage => {
                let images =
                    vec![(null_descriptors.default_tex_uav_view[1].raw, vk::ImageLayout::GENERAL, None); array_size];
                write_default(device, root_signature, set, &binding.name, WriteResource::Images(&images))?;
            }
            DescriptorType::UniformBuffer | DescriptorType::UniformBufferDynamic => {
                let buffers = vec![(null_descriptors.default_buffer_srv.raw, 0u64, vk::WHOLE_SIZE); array_size];
                write_default(device, root_signature, set, &binding.name, WriteResource::Buffers(&buffers))?;
            }
            DescriptorType::StorageBuffer | DescriptorType::StorageBufferDynamic => {
                let buffers = vec![(null_descriptors.default_buffer_uav.raw, 0u64, vk::WHOLE_SIZE); array_size];
                write_default(device, root_signature, set, &binding.name, WriteResource::Buffers(&buffers))?;
            }
            // Texel buffers, input attachments, and acceleration structures have
            // no null-descriptor default in this renderer; left unbound until
            // the first real update.
            DescriptorType::UniformTexelBuffer
            | DescriptorType::StorageTexelBuffer
            | DescriptorType::InputAttachment
            | DescriptorType::AccelerationStructure => {}
        }
    }

    Ok(())
}

fn write_default(
    device: &DeviceShared,
    root_signature: &RootSignature,
    set: &DescriptorSet,
    name: &str,
    resource: WriteResource<'_>,
) -> Result<(), DescriptorError> {
    update_descriptor_set(device, root_signature, set, &[DescriptorWrite { name, array_index: 0, resource }])
}

fn pool_sizes_to_total_count(sizes: &[vk::DescriptorPoolSize]) -> DescriptorTotalCount {
    let mut total = DescriptorTotalCount::default();
    for size in sizes {
        let count = size.descriptor_count;
        match size.ty {
            vk::DescriptorType::SAMPLER => total.sampler += count,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER => total.combined_image_sampler += count,
            vk::DescriptorType::SAMPLED_IMAGE => total.sampled_image += count,
            vk::DescriptorType::STORAGE_IMAGE => total.storage_image += count,
            vk::DescriptorType::UNIFORM_TEXEL_BUFFER => total.uniform_texel_buffer += count,
            vk::DescriptorType::STORAGE_TEXEL_BUFFER => total.storage_texel_buffer += count,
            vk::DescriptorType::UNIFORM_BUFFER => total.uniform_buffer += count,
            vk::DescriptorType::STORAGE_BUFFER => total.storage_buffer += count,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => total.uniform_buffer_dynamic += count,
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => total.storage_buffer_dynamic += count,
            vk::DescriptorType::INPUT_ATTACHMENT => total.input_attachment += count,
            _ => {}
        }
    }
    total
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ResourceCategory {
    Buffer,
    Image,
    Sampler,
    AccelStruct,
}

fn binding_category(ty: DescriptorType) -> ResourceCategory {
    match ty {
        DescriptorType::UniformBuffer
        | DescriptorType::StorageBuffer
        | DescriptorType::UniformBufferDynamic
        | DescriptorType::StorageBufferDynamic
        | DescriptorType::UniformTexelBuffer
        | DescriptorType::StorageTexelBuffer => ResourceCategory::Buffer,
        DescriptorType::SampledImage
        | DescriptorType::StorageImage
        | DescriptorType::CombinedImageSampler
        | DescriptorType::InputAttachment => ResourceCategory::Image,
        DescriptorType::Sampler => ResourceCategory::Sampler,
        DescriptorType::AccelerationStructure => ResourceCategory::AccelStruct,
    }
}

fn resource_category(resource: &WriteResource<'_>) -> ResourceCategory {
    match resource {
        WriteResource::Buffers(_) | WriteResource::BufferRange { .. } => ResourceCategory::Buffer,
        WriteResource::Images(_) | WriteResource::StencilImage(..) | WriteResource::MipChain(_) => {
            ResourceCategory::Image
        }
        WriteResource::Samplers(_) => ResourceCategory::Sampler,
        WriteResource::AccelerationStructures(_) => ResourceCategory::AccelStruct,
    }
}

/// A representative type for the mismatch error's `actual` field; the
/// exact Buffer/Image subtype the caller meant isn't recoverable from
/// the write alone, so the category's canonical member is reported.
fn representative_type(category: ResourceCategory) -> DescriptorType {
    match category {
        ResourceCategory::Buffer => DescriptorType::UniformBuffer,
        ResourceCategory::Image => DescriptorType::SampledImage,
        ResourceCategory::Sampler => DescriptorType::Sampler,
        ResourceCategory::AccelStruct => DescriptorType::AccelerationStructure,
    }
}

fn check_range(name: &str, array_index: u32, count: u32, array_size: u32) -> Result<(), DescriptorError> {
    let in_range = array_index
        .checked_add(count)
        .is_some_and(|end| end <= array_size);
    if in_range {
        Ok(())
    } else {
        Err(DescriptorError::ArrayIndexOutOfBounds { name: name.to_string(), index: array_index, size: array_size })
    }
}

/// Writes a batch of descriptor updates, splitting into groups of at
/// most [`MAX_BATCHED_WRITES`] entries so the scratch arrays stay
/// bounded regardless of batch size (§4.7 "updateDescriptorSet").
pub fn update_descriptor_set(
    device: &DeviceShared,
    root_signature: &RootSignature,
    set: &DescriptorSet,
    writes: &[DescriptorWrite<'_>],
) -> Result<(), DescriptorError> {
    let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::new();
    let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::new();
    let mut vk_writes: Vec<PendingWrite> = Vec::new();

    for write in writes {
        let binding = root_signature
            .binding_by_name(write.name)
            .ok_or_else(|| DescriptorError::UnknownDescriptor(write.name.to_string()))?;
        if binding.is_root_cbv {
            return Err(DescriptorError::RootCbvWrongPath(write.name.to_string()));
        }

        let category = resource_category(&write.resource);
        if binding_category(binding.descriptor_type) != category {
            return Err(DescriptorError::TypeMismatch {
                name: write.name.to_string(),
                expected: binding.descriptor_type,
                actual: representative_type(category),
            });
        }

        let vk_ty = vk_descriptor_type(binding);
        match &write.resource {
            WriteResource::Buffers(buffers) => {
                check_range(write.name, write.array_index, buffers.len() as u32, binding.array_size)?;
                for (i, &(buffer, offset, range)) in buffers.iter().enumerate() {
                    push_buffer_write(
                        &mut vk_writes,
                        &mut buffer_infos,
                        binding.register,
                        write.array_index + i as u32,
                        vk_ty,
                        buffer,
                        offset,
                        range,
                    );
                    flush_if_full(device, set, &mut vk_writes, &mut buffer_infos, &mut image_infos);
                }
            }
            WriteResource::BufferRange { buffer, offset, size } => {
                check_range(write.name, write.array_index, 1, binding.array_size)?;
                let max_range = match binding.descriptor_type {
                    DescriptorType::StorageBuffer | DescriptorType::StorageBufferDynamic => {
                        device.max_storage_buffer_range as u64
                    }
                    _ => device.max_uniform_buffer_range as u64,
                };
                if *size > max_range {
                    return Err(DescriptorError::RangeTooLarge {
                        name: write.name.to_string(),
                        size: *size,
                        max: max_range,
                    });
                }
                push_buffer_write(
                    &mut vk_writes,
                    &mut buffer_infos,
                    binding.register,
                    write.array_index,
                    vk_ty,
                    *buffer,
                    *offset,
                    *size,
                );
                flush_if_full(device, set, &mut vk_writes, &mut buffer_infos, &mut image_infos);
            }
            WriteResource::Images(images) => {
                check_range(write.name, write.array_index, images.len() as u32, binding.array_size)?;
                for (i, &(view, layout, sampler)) in images.iter().enumerate() {
                    push_image_write(
                        &mut vk_writes,
                        &mut image_infos,
                        binding.register,
                        write.array_index + i as u32,
                        vk_ty,
                        view,
                        layout,
                        sampler.unwrap_or(vk::Sampler::null()),
                    );
                    flush_if_full(device, set, &mut vk_writes, &mut buffer_infos, &mut image_infos);
                }
            }
            WriteResource::StencilImage(view, layout) => {
                check_range(write.name, write.array_index, 1, binding.array_size)?;
                push_image_write(
                    &mut vk_writes,
                    &mut image_infos,
                    binding.register,
                    write.array_index,
                    vk_ty,
                    *view,
                    *layout,
                    vk::Sampler::null(),
                );
                flush_if_full(device, set, &mut vk_writes, &mut buffer_infos, &mut image_infos);
            }
            WriteResource::MipChain(views) => {
                let provided = views.len() as u32;
                if write.array_index != 0 || provided != binding.array_size {
                    return Err(DescriptorError::PartialMipChain {
                        name: write.name.to_string(),
                        provided,
                        expected: binding.array_size,
                    });
                }
                for (i, &(view, layout)) in views.iter().enumerate() {
                    push_image_write(
                        &mut vk_writes,
                        &mut image_infos,
                        binding.register,
                        i as u32,
                        vk_ty,
                        view,
                        layout,
                        vk::Sampler::null(),
                    );
                    flush_if_full(device, set, &mut vk_writes, &mut buffer_infos, &mut image_infos);
                }
            }
            WriteResource::Samplers(samplers) => {
                check_range(write.name, write.array_index, samplers.len() as u32, binding.array_size)?;
                for (i, &sampler) in samplers.iter().enumerate() {
                    push_image_write(
                        &mut vk_writes,
                        &mut image_infos,
                        binding.register,
                        write.array_index + i as u32,
                        vk::DescriptorType::SAMPLER,
                        vk::ImageView::null(),
                        vk::ImageLayout::UNDEFINED,
                        sampler,
                    );
                    flush_if_full(device, set, &mut vk_writes, &mut buffer_infos, &mut image_infos);
                }
            }
            WriteResource::AccelerationStructures(handles) => {
                check_range(write.name, write.array_index, handles.len() as u32, binding.array_size)?;
                for (i, &accel) in handles.iter().enumerate() {
                    write_acceleration_structure(device, set, binding.register, write.array_index + i as u32, accel);
                }
            }
        }
    }

    if !vk_writes.is_empty() {
        flush_batch(device, set, &vk_writes, &buffer_infos, &image_infos);
    }
    Ok(())
}

enum PendingWrite {
    Buffer { binding: u32, array_index: u32, descriptor_type: vk::DescriptorType, info_index: usize },
    Image { binding: u32, array_index: u32, descriptor_type: vk::DescriptorType, info_index: usize },
}

fn push_buffer_write(
    vk_writes: &mut Vec<PendingWrite>,
    buffer_infos: &mut Vec<vk::DescriptorBufferInfo>,
    binding: u32,
    array_index: u32,
    descriptor_type: vk::DescriptorType,
    buffer: vk::Buffer,
    offset: u64,
    range: u64,
) {
    buffer_infos.push(vk::DescriptorBufferInfo { buffer, offset, range });
    vk_writes.push(PendingWrite::Buffer { binding, array_index, descriptor_type, info_index: buffer_infos.len() - 1 });
}

#[allow(clippy::too_many_arguments)]
fn push_image_write(
    vk_writes: &mut Vec<PendingWrite>,
    image_infos: &mut Vec<vk::DescriptorImageInfo>,
    binding: u32,
    array_index: u32,
    descriptor_type: vk::DescriptorType,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
    sampler: vk::Sampler,
) {
    image_infos.push(vk::DescriptorImageInfo { sampler, image_view, image_layout });
    vk_writes.push(PendingWrite::Image { binding, array_index, descriptor_type, info_index: image_infos.len() - 1 });
}

/// Flushes the active batch once it reaches [`MAX_BATCHED_WRITES`]
/// entries or [`WRITE_SCRATCH_BYTES`] of backing info storage, so a
/// single oversized ranged write is split mid-array rather than growing
/// scratch unboundedly (§4.7).
fn flush_if_full(
    device: &DeviceShared,
    set: &DescriptorSet,
    vk_writes: &mut Vec<PendingWrite>,
    buffer_infos: &mut Vec<vk::DescriptorBufferInfo>,
    image_infos: &mut Vec<vk::DescriptorImageInfo>,
) {
    let used_bytes = buffer_infos.len() * std::mem::size_of::<vk::DescriptorBufferInfo>()
        + image_infos.len() * std::mem::size_of::<vk::DescriptorImageInfo>();
    if vk_writes.len() >= MAX_BATCHED_WRITES || used_bytes >= WRITE_SCRATCH_BYTES {
        flush_batch(device, set, vk_writes, buffer_infos, image_infos);
        vk_writes.clear();
        buffer_infos.clear();
        image_infos.clear();
    }
}

fn flush_batch(
    device: &DeviceShared,
    set: &DescriptorSet,
    writes: &[PendingWrite],
    buffer_infos: &[vk::DescriptorBufferInfo],
    image_infos: &[vk::DescriptorImageInfo],
) {
    let vk_writes: Vec<vk::WriteDescriptorSet> = writes
        .iter()
        .map(|w| match w {
            PendingWrite::Buffer { binding, array_index, descriptor_type, info_index } => {
                vk::WriteDescriptorSet::default()
                    .dst_set(set.raw)
                    .dst_binding(*binding)
                    .dst_array_element(*array_index)
                    .descriptor_type(*descriptor_type)
                    .buffer_info(std::slice::from_ref(&buffer_infos[*info_index]))
            }
            PendingWrite::Image { binding, array_index, descriptor_type, info_index } => {
                vk::WriteDescriptorSet::default()
                    .dst_set(set.raw)
                    .dst_binding(*binding)
                    .dst_array_element(*array_index)
                    .descriptor_type(*descriptor_type)
                    .image_info(std::slice::from_ref(&image_infos[*info_index]))
            }
        })
        .collect();

    unsafe { device.raw.update_descriptor_sets(&vk_writes, &[]) };
}

fn write_acceleration_structure(
    device: &DeviceShared,
    set: &DescriptorSet,
    binding: u32,
    array_index: u32,
    accel: vk::AccelerationStructureKHR,
) {
    let handles = [accel];
    let mut as_info = vk::WriteDescriptorSetAccelerationStructureKHR::default().acceleration_structures(&handles);
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set.raw)
        .dst_binding(binding)
        .dst_array_element(array_index)
        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
        .descriptor_count(1)
        .push_next(&mut as_info);
    unsafe { device.raw.update_descriptor_sets(&[write], &[]) };
}

fn vk_descriptor_type(binding: &RootSignatureBinding) -> vk::DescriptorType {
    use crate::DescriptorType as Dt;
    match binding.descriptor_type {
        Dt::Sampler => vk::DescriptorType::SAMPLER,
        Dt::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        Dt::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        Dt::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        Dt::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        Dt::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        Dt::UniformBuffer => {
            if binding.is_root_cbv {
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            } else {
                vk::DescriptorType::UNIFORM_BUFFER
            }
        }
        Dt::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        Dt::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        Dt::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        Dt::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        Dt::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_accumulate_by_type() {
        let sizes = vec![
            vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 3 },
            vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 2 },
        ];
        let total = pool_sizes_to_total_count(&sizes);
        assert_eq!(total.uniform_buffer, 5);
    }

    #[test]
    fn check_range_rejects_overflowing_array_slice() {
        assert!(check_range("x", 2, 3, 4).is_err());
        assert!(check_range("x", 0, 4, 4).is_ok());
    }

    #[test]
    fn binding_category_groups_dynamic_with_plain_buffers() {
        assert!(binding_category(DescriptorType::UniformBufferDynamic) == binding_category(DescriptorType::UniformBuffer));
    }
}
