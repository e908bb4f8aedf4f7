//! Root signature construction: the eight-step algorithm that reflects
//! a set of shaders into an immutable merged binding layout (§4.6).

use super::DeviceShared;
use crate::{DescriptorType, RootSignatureError, ShaderStageFlags, UpdateFrequency, MAX_DESCRIPTOR_SETS};
use ash::vk;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// One resource reflected out of a shader's SPIR-V (the input to step 1
/// of §4.6's algorithm). Normally produced by the shader
/// cross-compiler's reflection pass, which is out of scope here — this
/// crate consumes already-reflected records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReflectedResource {
    pub name: String,
    pub ty: DescriptorType,
    pub register: u32,
    pub set: u32,
    pub array_size: u32,
    pub stage: ShaderStageFlags,
    pub is_root_cbv_suffixed: bool,
    pub is_root_constant: bool,
}

#[derive(Clone, Debug)]
pub struct RootSignatureBinding {
    pub name: String,
    pub descriptor_type: DescriptorType,
    pub register: u32,
    pub set: UpdateFrequency,
    pub array_size: u32,
    pub stage_mask: ShaderStageFlags,
    pub is_static_sampler: bool,
    pub is_root_cbv: bool,
    /// Cumulative handle index within its set, assigned in step 6.
    pub handle_index: u32,
}

#[derive(Clone, Debug)]
pub struct PushConstantRange {
    pub name: String,
    pub stage_mask: ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// The immutable result of reflecting a shader set (§3 RootSignature).
pub struct RootSignature {
    pub(crate) device: Arc<DeviceShared>,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) set_layouts: [vk::DescriptorSetLayout; MAX_DESCRIPTOR_SETS],
    pub(crate) bindings: Vec<RootSignatureBinding>,
    pub(crate) push_constants: Vec<PushConstantRange>,
    pub(crate) name_to_index: FxHashMap<String, usize>,
    /// Per-set pool-size summary, scaled by `mMaxSets` at allocation
    /// time in `descriptor.rs` (§4.7).
    pub(crate) pool_sizes: [Vec<vk::DescriptorPoolSize>; MAX_DESCRIPTOR_SETS],
}

impl std::fmt::Debug for RootSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootSignature")
            .field("bindings", &self.bindings.len())
            .field("push_constants", &self.push_constants.len())
            .finish()
    }
}

impl Drop for RootSignature {
    fn drop(&mut self) {
        unsafe {
            self.device
                .raw
                .destroy_pipeline_layout(self.pipeline_layout, None);
            for &layout in &self.set_layouts {
                if layout != vk::DescriptorSetLayout::null() {
                    self.device.raw.destroy_descriptor_set_layout(layout, None);
                }
            }
        }
    }
}

impl RootSignature {
    /// Steps 1-8 of §4.6.
    pub fn new(
        device: Arc<DeviceShared>,
        static_sampler_names: &[&str],
        static_samplers: &[vk::Sampler],
        resources_per_shader: &[Vec<ReflectedResource>],
        empty_layout: vk::DescriptorSetLayout,
    ) -> Result<Self, RootSignatureError> {
        // Step 1: merge resources keyed by name, validating collisions
        // agree on (type, register, set).
        let mut merged: FxHashMap<String, ReflectedResource> = FxHashMap::default();
        for shader_resources in resources_per_shader {
            for resource in shader_resources {
                match merged.get_mut(&resource.name) {
                    Some(existing) => {
                        if existing.ty != resource.ty
                            || existing.register != resource.register
                            || existing.set != resource.set
                        {
                            return Err(RootSignatureError::ResourceCollision {
                                name: resource.name.clone(),
                            });
                        }
                        existing.stage |= resource.stage;
                    }
                    None => {
                        merged.insert(resource.name.clone(), resource.clone());
                    }
                }
            }
        }

        // Step 2: assign each resource to its declared update-frequency
        // set.
        let mut by_set: [Vec<ReflectedResource>; MAX_DESCRIPTOR_SETS] = Default::default();
        let mut push_constants = Vec::new();
        for resource in merged.into_values() {
            if resource.is_root_constant {
                // Step 5: ROOT_CONSTANT resources become push-constant
                // ranges; order of appearance assigns the handle index.
                let offset: u32 = push_constants.iter().map(|pc: &PushConstantRange| pc.size).sum();
                push_constants.push(PushConstantRange {
                    name: resource.name.clone(),
                    stage_mask: resource.stage,
                    offset,
                    size: resource.array_size * 4,
                });
                continue;
            }
            if resource.set as usize >= MAX_DESCRIPTOR_SETS {
                return Err(RootSignatureError::SetIndexOutOfRange(resource.set));
            }
            by_set[resource.set as usize].push(resource);
        }

        let mut bindings = Vec::new();
        let mut pool_sizes: [Vec<vk::DescriptorPoolSize>; MAX_DESCRIPTOR_SETS] = Default::default();
        let mut set_layouts = [vk::DescriptorSetLayout::null(); MAX_DESCRIPTOR_SETS];

        let highest_nonempty_set = by_set.iter().rposition(|v| !v.is_empty());

        for (set_index, resources) in by_set.iter_mut().enumerate() {
            // Step 6: sort bindings by (descriptor-type, register) so
            // dynamic offsets end up in binding order.
            resources.sort_by_key(|r| (descriptor_type_sort_key(r.ty), r.register));

            let mut vk_bindings = Vec::with_capacity(resources.len());
            let mut handle_index = 0u32;
            for resource in resources.iter() {
                // Step 3: translate to a Vulkan descriptor type; a
                // uniform buffer with the root-cbv suffix and array
                // size 1 becomes UNIFORM_BUFFER_DYNAMIC.
                let is_root_cbv = resource.is_root_cbv_suffixed
                    && resource.ty == DescriptorType::UniformBuffer
                    && resource.array_size == 1;
                let vk_ty = translate_descriptor_type(resource.ty, is_root_cbv);

                // Step 4: static samplers are baked via
                // pImmutableSamplers and flagged non-writable.
                let is_static_sampler = static_sampler_names.contains(&resource.name.as_str());

                let mut binding = vk::DescriptorSetLayoutBinding::default()
                    .binding(resource.register)
                    .descriptor_type(vk_ty)
                    .descriptor_count(resource.array_size)
                    .stage_flags(to_vk_stage_flags(resource.stage));
                if is_static_sampler {
                    if let Some(pos) = static_sampler_names.iter().position(|n| *n == resource.name) {
                        binding = binding.immutable_samplers(std::slice::from_ref(&static_samplers[pos]));
                    }
                }
                vk_bindings.push(binding);

                if !is_static_sampler {
                    pool_sizes[set_index].push(vk::DescriptorPoolSize {
                        ty: vk_ty,
                        descriptor_count: resource.array_size,
                    });
                }

                bindings.push(RootSignatureBinding {
                    name: resource.name.clone(),
                    descriptor_type: resource.ty,
                    register: resource.register,
                    set: set_from_index(set_index),
                    array_size: resource.array_size,
                    stage_mask: resource.stage,
                    is_static_sampler,
                    is_root_cbv,
                    handle_index,
                });
                handle_index += resource.array_size;
            }

            // Step 7: a descriptor-set layout per non-empty set *and*
            // for every lower-index set even if empty, via a shared
            // empty layout.
            let needs_layout = !resources.is_empty()
                || highest_nonempty_set.map_or(false, |highest| set_index <= highest);
            set_layouts[set_index] = if resources.is_empty() {
                if needs_layout {
                    empty_layout
                } else {
                    vk::DescriptorSetLayout::null()
                }
            } else {
                let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
                unsafe { device.raw.create_descriptor_set_layout(&layout_info, None) }
                    .map_err(|e| RootSignatureError::Device(super::map_device_error(e)))?
            };
        }

        // Step 8: pipeline layout from set-layout array + push-constant
        // ranges.
        let active_layouts: Vec<vk::DescriptorSetLayout> = set_layouts
            .iter()
            .take_while(|&&l| l != vk::DescriptorSetLayout::null())
            .copied()
            .collect();
        let vk_push_constants: Vec<vk::PushConstantRange> = push_constants
            .iter()
            .map(|pc| {
                vk::PushConstantRange::default()
                    .stage_flags(to_vk_stage_flags(pc.stage_mask))
                    .offset(pc.offset)
                    .size(pc.size)
            })
            .collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&active_layouts)
            .push_constant_ranges(&vk_push_constants);
        let pipeline_layout = unsafe { device.raw.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| RootSignatureError::Device(super::map_device_error(e)))?;

        let name_to_index = bindings
            .iter()
            .enumerate()
            .map(|(i, b)| (b.name.clone(), i))
            .collect();

        Ok(Self {
            device,
            pipeline_layout,
            set_layouts,
            bindings,
            push_constants,
            name_to_index,
            pool_sizes,
        })
    }

    pub fn binding_by_name(&self, name: &str) -> Option<&RootSignatureBinding> {
        self.name_to_index.get(name).map(|&i| &self.bindings[i])
    }
}

fn descriptor_type_sort_key(ty: DescriptorType) -> u8 {
    match ty {
        DescriptorType::Sampler => 0,
        DescriptorType::CombinedImageSampler => 1,
        DescriptorType::SampledImage => 2,
        DescriptorType::StorageImage => 3,
        DescriptorType::UniformTexelBuffer => 4,
        DescriptorType::StorageTexelBuffer => 5,
        DescriptorType::UniformBuffer => 6,
        DescriptorType::StorageBuffer => 7,
        DescriptorType::UniformBufferDynamic => 8,
        DescriptorType::StorageBufferDynamic => 9,
        DescriptorType::InputAttachment => 10,
        DescriptorType::AccelerationStructure => 11,
    }
}

fn translate_descriptor_type(ty: DescriptorType, as_root_cbv: bool) -> vk::DescriptorType {
    if as_root_cbv {
        return vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC;
    }
    match ty {
        DescriptorType::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorType::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        DescriptorType::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        DescriptorType::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        DescriptorType::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
    }
}

fn to_vk_stage_flags(stage: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stage.contains(ShaderStageFlags::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stage.contains(ShaderStageFlags::TESSELLATION_CONTROL) {
        flags |= vk::ShaderStageFlags::TESSELLATION_CONTROL;
    }
    if stage.contains(ShaderStageFlags::TESSELLATION_EVALUATION) {
        flags |= vk::ShaderStageFlags::TESSELLATION_EVALUATION;
    }
    if stage.contains(ShaderStageFlags::GEOMETRY) {
        flags |= vk::ShaderStageFlags::GEOMETRY;
    }
    if stage.contains(ShaderStageFlags::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stage.contains(ShaderStageFlags::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

fn set_from_index(index: usize) -> UpdateFrequency {
    UpdateFrequency::ALL[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cbv_requires_array_size_one() {
        let resource = ReflectedResource {
            name: "gCbv".into(),
            ty: DescriptorType::UniformBuffer,
            register: 0,
            set: 0,
            array_size: 2,
            stage: ShaderStageFlags::VERTEX,
            is_root_cbv_suffixed: true,
            is_root_constant: false,
        };
        let is_root_cbv = resource.is_root_cbv_suffixed
            && resource.ty == DescriptorType::UniformBuffer
            && resource.array_size == 1;
        assert!(!is_root_cbv);
    }

    #[test]
    fn descriptor_type_sort_key_orders_samplers_first() {
        assert!(
            descriptor_type_sort_key(DescriptorType::Sampler)
                < descriptor_type_sort_key(DescriptorType::UniformBuffer)
        );
    }
}
