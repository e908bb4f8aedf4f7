//! The Renderer: one per logical device. Owns the device handle, the
//! memory allocator, per-node queue usage counters, null-descriptor
//! defaults, the reusable initial-transition queue+pool+cmd+fence, and
//! (legacy path) the per-thread render-pass/framebuffer caches (§3
//! Renderer).

use super::{
    render_pass::RenderPassCache, Adapter, InstanceShared, NullDescriptors, PrivateCapabilities,
    Queue, QueueFamilies, QueueFamilyUsage, Workarounds,
};
use crate::{DeviceError, DownlevelFlags, GpuMode, InitError, QueueType};
use ash::vk;
use gpu_alloc::GpuAllocator;
use gpu_descriptor::DescriptorAllocator;
use parking_lot::Mutex;
use std::ffi::CString;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Configuration accepted by `init_renderer` (§6 Configuration).
#[derive(Clone, Debug, Default)]
pub struct RendererDesc {
    pub gpu_mode: GpuMode,
    pub gpu_index: Option<usize>,
    pub request_all_available_queues: bool,
    pub enable_shader_stats: bool,
    pub extra_device_extensions: Vec<String>,
}

impl Default for GpuMode {
    fn default() -> Self {
        GpuMode::Single
    }
}

/// State shared by the `Device` handle and everything it issues:
/// resources hold an `Arc<DeviceShared>` so destruction can stay
/// bottom-up without the renderer needing to track every child
/// (§9 "Cyclic and back-pointing object graphs").
pub struct DeviceShared {
    pub(crate) raw: ash::Device,
    pub(crate) instance: Arc<InstanceShared>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) queue_families: QueueFamilies,
    /// Per-node queue usage; index 0 except in linked multi-GPU mode.
    pub(crate) queue_usage: Vec<QueueFamilyUsage>,
    pub(crate) workarounds: Workarounds,
    pub(crate) private_caps: PrivateCapabilities,
    pub(crate) downlevel_flags: DownlevelFlags,
    pub(crate) timestamp_period: f32,
    /// Serializes every submit/present on this renderer's queues (§5).
    pub(crate) submit_mutex: Arc<Mutex<()>>,
    /// Serializes the reusable init-time command buffer/queue/fence
    /// used for initial layout transitions and query-pool resets (§5).
    pub(crate) initial_transition_mutex: Mutex<InitialTransitionContext>,
    pub(crate) linked_node_count: u32,
    pub(crate) min_uniform_buffer_offset_alignment: u64,
    pub(crate) min_storage_buffer_offset_alignment: u64,
    pub(crate) max_uniform_buffer_range: u32,
    pub(crate) max_storage_buffer_range: u32,
    /// Monotonic source for `RenderTarget::id` (§3 RenderTarget,
    /// §4.9 "Framebuffer key").
    pub(crate) next_render_target_id: std::sync::atomic::AtomicU32,
    /// Loaded iff `downlevel_flags` has `DYNAMIC_RENDERING`; lets command
    /// recording call `vkCmdBeginRenderingKHR`/`vkCmdEndRenderingKHR`
    /// without a render pass or framebuffer object (§4.9).
    pub(crate) dynamic_rendering_fn: Option<ash::khr::dynamic_rendering::Device>,
    /// Loaded iff the KHR `draw_indirect_count` extension is present.
    pub(crate) draw_indirect_count_khr_fn: Option<ash::khr::draw_indirect_count::Device>,
    /// Loaded iff the AMD `draw_indirect_count` extension is present
    /// and the KHR variant is not (§4.10 "prefers KHR over AMD").
    pub(crate) draw_indirect_count_amd_fn: Option<ash::amd::draw_indirect_count::Device>,
    /// A descriptor-set layout with no bindings, shared by every
    /// lower-index set gap in a root signature (§4.6 step 7), and one
    /// descriptor set allocated from it — bound to every set index a
    /// command buffer hasn't yet written to, on the first
    /// `cmdBindDescriptorSet` after a pipeline-layout change (§4.6
    /// "Contract on bind").
    pub(crate) empty_descriptor_set_layout: vk::DescriptorSetLayout,
    pub(crate) empty_descriptor_pool: vk::DescriptorPool,
    pub(crate) empty_descriptor_set: vk::DescriptorSet,
}

impl std::fmt::Debug for DeviceShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceShared")
            .field("queue_families", &self.queue_families)
            .field("linked_node_count", &self.linked_node_count)
            .finish()
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            self.raw.destroy_descriptor_pool(self.empty_descriptor_pool, None);
            self.raw
                .destroy_descriptor_set_layout(self.empty_descriptor_set_layout, None);
            self.raw.destroy_device(None);
        }
    }
}

/// The one-shot command pool/buffer/fence used to move newly-created
/// textures from `UNDEFINED` to their declared start-state and to reset
/// query pools (Glossary "Initial-transition").
pub struct InitialTransitionContext {
    pub(crate) pool: vk::CommandPool,
    pub(crate) buffer: vk::CommandBuffer,
    pub(crate) fence: vk::Fence,
    pub(crate) queue: vk::Queue,
}

/// The Renderer handle (§3 Renderer). Cloning shares the underlying
/// device via `Arc`.
#[derive(Clone)]
pub struct Device {
    pub(crate) shared: Arc<DeviceShared>,
    pub(crate) mem_allocator: Arc<Mutex<GpuAllocator<vk::DeviceMemory>>>,
    pub(crate) desc_allocator:
        Arc<Mutex<DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>>>,
    pub(crate) render_pass_cache: Arc<RenderPassCache>,
    pub(crate) null_descriptors: Arc<NullDescriptors>,
}

/// Alias matching the spec's own vocabulary; `Device` is the trait
/// associated-type name, `Renderer` is what every doc comment in this
/// crate calls the same thing.
pub type Renderer = Device;

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").finish_non_exhaustive()
    }
}

impl Device {
    /// `init_renderer(desc) -> Renderer` (§4.1, §4.2, §4.4).
    pub fn open(
        adapter: &Adapter,
        desc: &RendererDesc,
    ) -> Result<(Self, Vec<Queue>), InitError> {
        adapter.validate()?;

        let queue_family_properties = unsafe {
            adapter
                .instance
                .raw
                .get_physical_device_queue_family_properties(adapter.raw)
        };

        let (graphics_family, _) = adapter.select_queue_family(QueueType::Graphics);
        let (compute_family, _) = adapter.select_queue_family(QueueType::Compute);
        let (transfer_family, _) = adapter.select_queue_family(QueueType::Transfer);

        let queue_families = QueueFamilies {
            graphics: Some(graphics_family),
            compute: Some(compute_family),
            transfer: Some(transfer_family),
        };

        let mut unique_families: Vec<u32> =
            vec![graphics_family, compute_family, transfer_family];
        unique_families.sort_unstable();
        unique_families.dedup();

        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut extension_names: Vec<CString> = adapter
            .required_device_extensions()
            .iter()
            .map(|e| e.to_owned().to_owned())
            .collect();

        let supported = unsafe {
            adapter
                .instance
                .raw
                .enumerate_device_extension_properties(adapter.raw)
        }
        .unwrap_or_default();
        let has_extension = |name: &std::ffi::CStr| {
            supported.iter().any(|ext| {
                ext.extension_name_as_c_str().map(|n| n == name).unwrap_or(false)
            })
        };
        for optional in adapter.optional_device_extensions() {
            if has_extension(optional) {
                extension_names.push((*optional).to_owned());
            }
        }
        let extension_ptrs: Vec<*const std::os::raw::c_char> =
            extension_names.iter().map(|e| e.as_ptr()).collect();

        let mut features2 = vk::PhysicalDeviceFeatures2::default();
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .push_next(&mut features2);

        let raw = unsafe {
            adapter
                .instance
                .raw
                .create_device(adapter.raw, &create_info, None)
        }
        .map_err(|r| InitError::Device(super::map_device_error(r)))?;

        let queue_usage = vec![QueueFamilyUsage::new(
            &queue_family_properties
                .iter()
                .map(|f| f.queue_count)
                .collect::<Vec<_>>(),
        )];

        let submit_mutex = Arc::new(Mutex::new(()));

        let (initial_pool, initial_buffer, initial_fence, initial_queue) =
            create_initial_transition_context(&raw, graphics_family)
                .map_err(InitError::Device)?;

        let limits = unsafe {
            adapter
                .instance
                .raw
                .get_physical_device_properties(adapter.raw)
        }
        .limits;

        let dynamic_rendering_fn = adapter
            .features
            .dynamic_rendering
            .then(|| ash::khr::dynamic_rendering::Device::new(&adapter.instance.raw, &raw));
        let draw_indirect_count_khr_fn = adapter
            .features
            .draw_indirect_count_khr
            .then(|| ash::khr::draw_indirect_count::Device::new(&adapter.instance.raw, &raw));
        let draw_indirect_count_amd_fn = (adapter.features.draw_indirect_count_amd
            && !adapter.features.draw_indirect_count_khr)
            .then(|| ash::amd::draw_indirect_count::Device::new(&adapter.instance.raw, &raw));

        let (empty_descriptor_set_layout, empty_descriptor_pool, empty_descriptor_set) =
            create_empty_descriptor_set(&raw).map_err(InitError::Device)?;

        let shared = Arc::new(DeviceShared {
            raw,
            instance: adapter.instance.clone(),
            physical_device: adapter.raw,
            queue_families,
            queue_usage,
            workarounds: adapter.workarounds,
            private_caps: adapter.private_caps.clone(),
            downlevel_flags: adapter.downlevel_flags,
            timestamp_period: adapter.timestamp_period,
            submit_mutex: submit_mutex.clone(),
            initial_transition_mutex: Mutex::new(InitialTransitionContext {
                pool: initial_pool,
                buffer: initial_buffer,
                fence: initial_fence,
                queue: initial_queue,
            }),
            linked_node_count: 1,
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment,
            max_uniform_buffer_range: limits.max_uniform_buffer_range,
            max_storage_buffer_range: limits.max_storage_buffer_range,
            next_render_target_id: std::sync::atomic::AtomicU32::new(1),
            dynamic_rendering_fn,
            draw_indirect_count_khr_fn,
            draw_indirect_count_amd_fn,
            empty_descriptor_set_layout,
            empty_descriptor_pool,
            empty_descriptor_set,
        });

        let config = gpu_alloc::Config::i_am_prototyping();
        let device_properties = unsafe {
            gpu_alloc_ash::device_properties(&adapter.instance.raw, adapter.api_version, adapter.raw)
        }
        .map_err(|_| InitError::Device(DeviceError::Internal("gpu_alloc device properties")))?;
        let mem_allocator = Arc::new(Mutex::new(GpuAllocator::new(config, device_properties)));

        let desc_allocator = Arc::new(Mutex::new(DescriptorAllocator::new(0)));

        let render_pass_cache = Arc::new(RenderPassCache::new(shared.clone()));

        let queues = unique_families
            .iter()
            .map(|&family| {
                let ty = if family == graphics_family {
                    QueueType::Graphics
                } else if family == compute_family {
                    QueueType::Compute
                } else {
                    QueueType::Transfer
                };
                let raw_queue = unsafe { shared.raw.get_device_queue(family, 0) };
                Queue {
                    raw: raw_queue,
                    device: shared.clone(),
                    family_index: family,
                    queue_index: 0,
                    ty,
                    submit_mutex: submit_mutex.clone(),
                    relay_index: std::sync::atomic::AtomicIsize::new(-1),
                }
            })
            .collect();

        let null_descriptors = Arc::new(
            NullDescriptors::new(&shared, &mem_allocator).map_err(InitError::Device)?,
        );

        Ok((
            Self {
                shared,
                mem_allocator,
                desc_allocator,
                render_pass_cache,
                null_descriptors,
            },
            queues,
        ))
    }

    pub fn raw(&self) -> &ash::Device {
        &self.shared.raw
    }

    pub fn downlevel_flags(&self) -> DownlevelFlags {
        self.shared.downlevel_flags
    }

    /// `waitQueueIdle` / `deviceWaitIdle` for unlinked multi-GPU mode
    /// (§5 "Which operations may block").
    pub fn wait_idle(&self) -> Result<(), DeviceError> {
        unsafe { self.shared.raw.device_wait_idle() }.map_err(super::map_device_error)
    }

    /// Increments `used[node][family]` atomically when a new logical
    /// queue is handed out against an already-created family (§4.4).
    pub(crate) fn mark_queue_used(&self, node: usize, family: u32) {
        if let Some(usage) = self.shared.queue_usage.get(node) {
            if let Some(counter) = usage.used.get(family as usize) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn create_empty_descriptor_set(
    device: &ash::Device,
) -> Result<(vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet), DeviceError> {
    let layout_info = vk::DescriptorSetLayoutCreateInfo::default();
    let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
        .map_err(super::map_device_error)?;

    let pool_sizes = [vk::DescriptorPoolSize { ty: vk::DescriptorType::SAMPLER, descriptor_count: 1 }];
    let pool_info = vk::DescriptorPoolCreateInfo::default()
        .pool_sizes(&pool_sizes)
        .max_sets(1);
    let pool =
        unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(super::map_device_error)?;

    let layouts = [layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    let set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
        .map_err(super::map_device_error)?[0];

    Ok((layout, pool, set))
}

fn create_initial_transition_context(
    device: &ash::Device,
    graphics_family: u32,
) -> Result<(vk::CommandPool, vk::CommandBuffer, vk::Fence, vk::Queue), DeviceError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(graphics_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
    let pool = unsafe { device.create_command_pool(&pool_info, None) }
        .map_err(super::map_device_error)?;

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let buffers =
        unsafe { device.allocate_command_buffers(&alloc_info) }.map_err(super::map_device_error)?;

    let fence_info = vk::FenceCreateInfo::default();
    let fence =
        unsafe { device.create_fence(&fence_info, None) }.map_err(super::map_device_error)?;

    let queue = unsafe { device.get_device_queue(graphics_family, 0) };

    Ok((pool, buffers[0], fence, queue))
}
