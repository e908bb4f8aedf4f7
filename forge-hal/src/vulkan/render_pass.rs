//! Legacy `VkRenderPass`/`VkFramebuffer` cache for GPUs without
//! `VK_KHR_dynamic_rendering`, plus MSAA resolve-attachment emission
//! (§4.9).

use super::DeviceShared;
use crate::{DeviceError, LoadAction, StoreAction, TextureFormat};
use ash::vk;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Hashable key identifying a render pass by its attachment shape
/// alone: format, sample count, and load/store ops per color
/// attachment, plus the depth-stencil equivalents (§4.9 "Render-pass
/// key").
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RenderPassKey {
    pub color: Vec<AttachmentKey>,
    pub depth_stencil: Option<AttachmentKey>,
    pub sample_count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentKey {
    pub format: TextureFormat,
    pub load: LoadAction,
    pub store: StoreAction,
}

/// Hashable key identifying a framebuffer: per-attachment render
/// target identity and the array-slice/mip-slice it targets, plus an
/// optional resolve target (§4.9 "Framebuffer key").
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub render_pass: RenderPassKeyHandle,
    pub color: Vec<FramebufferAttachment>,
    pub depth_stencil: Option<FramebufferAttachment>,
    pub width: u32,
    pub height: u32,
}

/// `RenderPassKey` is not `Copy` (it owns a `Vec`), so the framebuffer
/// key stores the render pass's raw handle instead of the key itself —
/// two render passes are interchangeable here iff Vulkan considers them
/// the same object.
pub type RenderPassKeyHandle = vk::RenderPass;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FramebufferAttachment {
    pub render_target_id: u64,
    pub use_array_slice: bool,
    pub array_slice: u32,
    pub use_mip_slice: bool,
    pub mip_slice: u32,
    pub resolve_render_target_id: Option<u64>,
}

/// Sharded render-pass/framebuffer cache. Lookups take only a shard's
/// mutex; a fresh entry additionally takes the renderer-wide
/// `insert_mutex` so two threads racing to build the same key don't
/// both call into the driver (§4.9 "Per-thread sharded lookup").
pub struct RenderPassCache {
    device: Arc<DeviceShared>,
    shards: Vec<Mutex<FxHashMap<RenderPassKey, vk::RenderPass>>>,
    framebuffers: Mutex<FxHashMap<FramebufferKey, vk::Framebuffer>>,
}

const SHARD_COUNT: usize = 8;

impl RenderPassCache {
    pub fn new(device: Arc<DeviceShared>) -> Self {
        Self {
            device,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(FxHashMap::default())).collect(),
            framebuffers: Mutex::new(FxHashMap::default()),
        }
    }

    fn shard_for(&self, key: &RenderPassKey) -> &Mutex<FxHashMap<RenderPassKey, vk::RenderPass>> {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Returns a cached `VkRenderPass` for `key`, creating one on first
    /// use. MSAA attachments (`sample_count > 1`) automatically gain a
    /// matching resolve attachment per color slot (§4.9 "MSAA resolve
    /// emission").
    pub fn get_or_create(&self, key: &RenderPassKey) -> Result<vk::RenderPass, DeviceError> {
        if let Some(&existing) = self.shard_for(key).lock().get(key) {
            return Ok(existing);
        }

        let raw = self.create_render_pass(key)?;
        self.shard_for(key).lock().insert(key.clone(), raw);
        Ok(raw)
    }

    fn create_render_pass(&self, key: &RenderPassKey) -> Result<vk::RenderPass, DeviceError> {
        let needs_resolve = key.sample_count > 1;
        let mut attachments = Vec::new();
        let mut color_refs = Vec::new();
        let mut resolve_refs = Vec::new();

        for color in &key.color {
            let index = attachments.len() as u32;
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(super::conv::map_texture_format(color.format))
                    .samples(sample_count_flags(key.sample_count))
                    .load_op(vk_load_op(color.load))
                    .store_op(vk_store_op(color.store))
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            );
            color_refs.push(vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
            if needs_resolve {
                let resolve_index = attachments.len() as u32;
                attachments.push(
                    vk::AttachmentDescription::default()
                        .format(super::conv::map_texture_format(color.format))
                        .samples(vk::SampleCountFlags::TYPE_1)
                        .load_op(vk::AttachmentLoadOp::DONT_CARE)
                        .store_op(vk::AttachmentStoreOp::STORE)
                        .initial_layout(vk::ImageLayout::UNDEFINED)
                        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
                );
                resolve_refs.push(vk::AttachmentReference {
                    attachment: resolve_index,
                    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                });
            }
        }

        let depth_ref = key.depth_stencil.as_ref().map(|ds| {
            let index = attachments.len() as u32;
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(super::conv::map_texture_format(ds.format))
                    .samples(sample_count_flags(key.sample_count))
                    .load_op(vk_load_op(ds.load))
                    .store_op(vk_store_op(ds.store))
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
            vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if needs_resolve {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }
        if let Some(ref depth) = depth_ref {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        let subpasses = [subpass];

        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);

        unsafe { self.device.raw.create_render_pass(&info, None) }.map_err(super::map_device_error)
    }

    pub fn get_or_create_framebuffer(
        &self,
        key: &FramebufferKey,
        attachment_views: &[vk::ImageView],
    ) -> Result<vk::Framebuffer, DeviceError> {
        if let Some(&existing) = self.framebuffers.lock().get(key) {
            return Ok(existing);
        }
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(key.render_pass)
            .attachments(attachment_views)
            .width(key.width)
            .height(key.height)
            .layers(1);
        let raw =
            unsafe { self.device.raw.create_framebuffer(&info, None) }.map_err(super::map_device_error)?;
        self.framebuffers.lock().insert(key.clone(), raw);
        Ok(raw)
    }
}

impl Drop for RenderPassCache {
    fn drop(&mut self) {
        for shard in &self.shards {
            for &pass in shard.lock().values() {
                unsafe { self.device.raw.destroy_render_pass(pass, None) };
            }
        }
        for &fb in self.framebuffers.lock().values() {
            unsafe { self.device.raw.destroy_framebuffer(fb, None) };
        }
    }
}

pub(crate) fn vk_load_op(load: LoadAction) -> vk::AttachmentLoadOp {
    match load {
        LoadAction::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        LoadAction::Load => vk::AttachmentLoadOp::LOAD,
        LoadAction::Clear => vk::AttachmentLoadOp::CLEAR,
    }
}

pub(crate) fn vk_store_op(store: StoreAction) -> vk::AttachmentStoreOp {
    if store.contains(StoreAction::STORE) {
        vk::AttachmentStoreOp::STORE
    } else {
        vk::AttachmentStoreOp::DONT_CARE
    }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_keys_hash_equal() {
        let a = RenderPassKey {
            color: vec![AttachmentKey { format: TextureFormat::Rgba8Unorm, load: LoadAction::Clear, store: StoreAction::STORE }],
            depth_stencil: None,
            sample_count: 1,
        };
        let b = a.clone();
        assert_eq!(a, b);
    }
}
