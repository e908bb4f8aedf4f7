//! Shader modules, graphics/compute pipeline construction and the
//! opaque pipeline-cache blob (§4.8).

use super::{conv, DeviceShared};
use crate::{
    DeviceError, PipelineError, ShaderStage, MAX_COLOR_ATTACHMENTS, MAX_GRAPHICS_SHADER_STAGES,
    MAX_VERTEX_BINDINGS,
};
use ash::vk;
use std::sync::Arc;

#[derive(Debug)]
pub struct ShaderModule {
    pub(crate) raw: vk::ShaderModule,
    pub(crate) stage: ShaderStage,
    pub(crate) device: Arc<DeviceShared>,
}

impl ShaderModule {
    /// Shader cross-compilation is out of scope for this crate (§1
    /// Non-goals); `spirv` arrives already compiled.
    pub fn new(device: Arc<DeviceShared>, stage: ShaderStage, spirv: &[u32]) -> Result<Self, PipelineError> {
        let info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let raw = unsafe { device.raw.create_shader_module(&info, None) }
            .map_err(|e| PipelineError::Device(super::map_device_error(e)))?;
        Ok(Self { raw, stage, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_shader_module(self.raw, None) };
    }
}

fn vk_shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

fn vk_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

/// A single vertex-input binding: stride is auto-derived from its
/// attributes' tightly-packed offsets when `stride` is `None` (§4.8
/// "Vertex input").
#[derive(Clone, Debug)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: Option<u32>,
    pub per_instance: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: ftypes::TextureFormat,
    pub offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

fn vk_compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

#[derive(Clone, Debug)]
pub struct DepthStencilDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub stencil_test: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub color_write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachment {
    fn default() -> Self {
        Self { blend_enable: false, color_write_mask: vk::ColorComponentFlags::RGBA }
    }
}

/// Everything needed to build a graphics pipeline: up to
/// [`MAX_GRAPHICS_SHADER_STAGES`] stages, vertex input, fixed-function
/// state, and either the render-target formats for dynamic rendering or
/// a legacy `VkRenderPass`/subpass pair (§4.8 "Dynamic rendering vs.
/// legacy render pass").
pub struct GraphicsPipelineDesc<'a> {
    pub stages: &'a [&'a ShaderModule],
    pub vertex_bindings: &'a [VertexBinding],
    pub vertex_attributes: &'a [VertexAttribute],
    pub topology: PrimitiveTopology,
    pub sample_count: u32,
    pub depth_stencil: Option<DepthStencilDesc>,
    pub color_formats: &'a [ftypes::TextureFormat],
    pub color_blend: &'a [ColorBlendAttachment],
    pub depth_format: Option<ftypes::TextureFormat>,
    pub layout: vk::PipelineLayout,
    /// `None` selects `VK_KHR_dynamic_rendering`; `Some` targets a
    /// legacy render pass at the given subpass index (§4.8, §4.9).
    pub legacy_render_pass: Option<(vk::RenderPass, u32)>,
}

#[derive(Debug)]
pub struct RenderPipeline {
    pub(crate) raw: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) device: Arc<DeviceShared>,
}

impl RenderPipeline {
    pub fn new(device: Arc<DeviceShared>, desc: &GraphicsPipelineDesc<'_>) -> Result<Self, PipelineError> {
        assert!(desc.stages.len() <= MAX_GRAPHICS_SHADER_STAGES);
        assert!(desc.vertex_bindings.len() <= MAX_VERTEX_BINDINGS);
        assert!(desc.color_formats.len() <= MAX_COLOR_ATTACHMENTS);

        let entry_point = c"main";
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .stages
            .iter()
            .map(|module| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk_shader_stage(module.stage))
                    .module(module.raw)
                    .name(entry_point)
            })
            .collect();

        let strides = derive_strides(desc.vertex_bindings, desc.vertex_attributes);
        let binding_descriptions: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_bindings
            .iter()
            .enumerate()
            .map(|(i, binding)| {
                vk::VertexInputBindingDescription::default()
                    .binding(binding.binding)
                    .stride(binding.stride.unwrap_or(strides[i]))
                    .input_rate(if binding.per_instance {
                        vk::VertexInputRate::INSTANCE
                    } else {
                        vk::VertexInputRate::VERTEX
                    })
            })
            .collect();
        let attribute_descriptions: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_attributes
            .iter()
            .map(|attr| {
                vk::VertexInputAttributeDescription::default()
                    .location(attr.location)
                    .binding(attr.binding)
                    .format(conv::map_texture_format(attr.format))
                    .offset(attr.offset)
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk_topology(desc.topology))
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let sample_flags = sample_count_flags(desc.sample_count);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(sample_flags)
            .sample_shading_enable(false);

        let depth_stencil = desc
            .depth_stencil
            .as_ref()
            .map(|ds| {
                vk::PipelineDepthStencilStateCreateInfo::default()
                    .depth_test_enable(ds.depth_test)
                    .depth_write_enable(ds.depth_write)
                    .depth_compare_op(vk_compare_op(ds.depth_compare))
                    .stencil_test_enable(ds.stencil_test)
            })
            .unwrap_or_default();

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = if desc.color_blend.is_empty() {
            desc.color_formats
                .iter()
                .map(|_| default_blend_attachment())
                .collect()
        } else {
            desc.color_blend
                .iter()
                .map(|a| {
                    vk::PipelineColorBlendAttachmentState::default()
                        .blend_enable(a.blend_enable)
                        .color_write_mask(a.color_write_mask)
                        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                        .color_blend_op(vk::BlendOp::ADD)
                        .src_alpha_blend_factor(vk::BlendFactor::ONE)
                        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                        .alpha_blend_op(vk::BlendOp::ADD)
                })
                .collect()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        // Dynamic state always covers viewport/scissor/blend-constants/
        // depth-bounds/stencil-reference; sample-locations is added only
        // when multisampling is in play (§4.8 "Dynamic state list").
        let mut dynamic_states = vec![
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::BLEND_CONSTANTS,
            vk::DynamicState::DEPTH_BOUNDS,
            vk::DynamicState::STENCIL_REFERENCE,
        ];
        if desc.sample_count > 1 {
            dynamic_states.push(vk::DynamicState::SAMPLE_LOCATIONS_EXT);
        }
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats_vk: Vec<vk::Format> =
            desc.color_formats.iter().map(|f| conv::map_texture_format(*f)).collect();
        let depth_format_vk = desc
            .depth_format
            .map(conv::map_texture_format)
            .unwrap_or(vk::Format::UNDEFINED);

        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats_vk)
            .depth_attachment_format(depth_format_vk);

        let mut create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout);

        create_info = match desc.legacy_render_pass {
            Some((render_pass, subpass)) => create_info.render_pass(render_pass).subpass(subpass),
            None => create_info.push_next(&mut rendering_info),
        };

        let raw = unsafe {
            device
                .raw
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| PipelineError::Device(super::map_device_error(e)))?[0];

        Ok(Self { raw, layout: desc.layout, device })
    }
}

impl Drop for RenderPipeline {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_pipeline(self.raw, None) };
    }
}

#[derive(Debug)]
pub struct ComputePipeline {
    pub(crate) raw: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) device: Arc<DeviceShared>,
}

impl ComputePipeline {
    pub fn new(
        device: Arc<DeviceShared>,
        module: &ShaderModule,
        layout: vk::PipelineLayout,
    ) -> Result<Self, PipelineError> {
        let entry_point = c"main";
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module.raw)
            .name(entry_point);
        let create_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);
        let raw = unsafe {
            device
                .raw
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| PipelineError::Device(super::map_device_error(e)))?[0];
        Ok(Self { raw, layout, device })
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_pipeline(self.raw, None) };
    }
}

/// An opaque, serializable `VkPipelineCache` blob (§4.8 "Pipeline
/// cache"). The serialized bytes are driver-private; this type only
/// moves them in and out of the driver, it never interprets them.
#[derive(Debug)]
pub struct PipelineCache {
    pub(crate) raw: vk::PipelineCache,
    pub(crate) device: Arc<DeviceShared>,
}

impl PipelineCache {
    pub fn new(device: Arc<DeviceShared>, initial_data: Option<&[u8]>) -> Result<Self, DeviceError> {
        let mut info = vk::PipelineCacheCreateInfo::default();
        if let Some(data) = initial_data {
            info = info.initial_data(data);
        }
        let raw =
            unsafe { device.raw.create_pipeline_cache(&info, None) }.map_err(super::map_device_error)?;
        Ok(Self { raw, device })
    }

    pub fn serialize(&self) -> Result<Vec<u8>, DeviceError> {
        unsafe { self.device.raw.get_pipeline_cache_data(self.raw) }.map_err(super::map_device_error)
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_pipeline_cache(self.raw, None) };
    }
}

fn default_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    let attachment = ColorBlendAttachment::default();
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(attachment.blend_enable)
        .color_write_mask(attachment.color_write_mask)
}

fn sample_count_flags(count: u32) -> vk::SampleCountFlags {
    match count {
        1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

/// Fills in strides for bindings that left `stride` unset, by summing
/// the tightly-packed size of each attribute that targets the binding
/// (§4.8 "stride auto-derivation").
fn derive_strides(bindings: &[VertexBinding], attributes: &[VertexAttribute]) -> Vec<u32> {
    bindings
        .iter()
        .map(|binding| {
            attributes
                .iter()
                .filter(|attr| attr.binding == binding.binding)
                .map(|attr| attr.offset + attr.format.block_size())
                .max()
                .unwrap_or(0)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_strides_sums_tightly_packed_attributes() {
        let bindings = vec![VertexBinding { binding: 0, stride: None, per_instance: false }];
        let attrs = vec![
            VertexAttribute { location: 0, binding: 0, format: ftypes::TextureFormat::Rgba32Float, offset: 0 },
            VertexAttribute { location: 1, binding: 0, format: ftypes::TextureFormat::Rg32Float, offset: 16 },
        ];
        let strides = derive_strides(&bindings, &attrs);
        assert_eq!(strides[0], 24);
    }

    #[test]
    fn explicit_stride_is_not_overridden() {
        let bindings = vec![VertexBinding { binding: 0, stride: Some(32), per_instance: true }];
        let strides = derive_strides(&bindings, &[]);
        assert_eq!(strides[0], 0);
        assert_eq!(bindings[0].stride, Some(32));
    }
}
