/*! The (only) backend implementation: a translation layer over raw
Vulkan via `ash`.

Module layout mirrors the component list in the design doc: `instance`
(context init + adapter enumeration), `adapter` (`GpuInfo` + feature
negotiation), `device` (the Renderer: resource creation, queue-family
selection), `queue` (submit/present), `command` (command pool/buffer +
barriers), `conv` (resource-state → access/layout/stage, format
mapping), `fence`, `surface` (swap chain), `root_signature`,
`descriptor`, `pipeline`, `render_pass` (legacy render-pass/framebuffer
cache), `query`, `debug` (object naming, validation callback).
*/

mod adapter;
mod command;
mod conv;
mod debug;
mod descriptor;
mod device;
mod fence;
mod instance;
mod pipeline;
mod query;
mod queue;
mod render_pass;
mod resources;
mod root_signature;
mod surface;

pub use adapter::{Adapter, PhysicalDeviceFeatures, PrivateCapabilities};
pub use command::{CommandBuffer, CommandEncoder};
pub use descriptor::{DescriptorPool, DescriptorSet, DescriptorWrite, WriteResource};
pub use device::{Device, DeviceShared, Renderer};
pub use fence::Fence;
pub use instance::{Instance, InstanceShared};
pub use pipeline::{ComputePipeline, PipelineCache, RenderPipeline, ShaderModule};
pub use query::QuerySet;
pub use render_pass::{FramebufferKey, RenderPassKey};
pub use resources::{BufferDesc, HeapPlacement, RenderTargetDesc, ResourceHeapDesc, SamplerDesc, TextureDesc};
pub use root_signature::RootSignature;
pub use surface::{AcquiredSurfaceTexture, Surface, SurfaceTexture, Swapchain};

use crate::{DeviceError, QueueType};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicIsize, AtomicU32};
use std::sync::Arc;

/// Marker type implementing [`crate::Api`]; there is exactly one
/// backend, so this never needs to be generic over anything.
#[derive(Clone, Debug)]
pub struct Api;

impl crate::Api for Api {
    type Instance = Instance;
    type Surface = Surface;
    type Adapter = Adapter;
    type Device = Device;

    type Queue = Queue;
    type CommandEncoder = CommandEncoder;

    type Buffer = Buffer;
    type Texture = Texture;
    type TextureView = TextureView;
    type Sampler = Sampler;
    type QuerySet = QuerySet;
    type Fence = Fence;

    type RootSignature = RootSignature;
    type DescriptorSet = DescriptorSet;
    type ShaderModule = ShaderModule;
    type RenderPipeline = RenderPipeline;
    type ComputePipeline = ComputePipeline;
    type PipelineCache = PipelineCache;
}

bitflags::bitflags! {
    /// Known-bad driver behaviors worked around at the call site instead
    /// of being modeled as capability bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Workarounds: u32 {
        /// Some Android 9/10 drivers report `vkAcquireNextImageKHR`
        /// timeouts of `u64::MAX` as an error; treat it as "block".
        const ACQUIRE_NEXT_IMAGE_UINT64_MAX_IS_BLOCKING = 1 << 0;
        /// Some Intel Windows drivers with a queue index above 0x100
        /// corrupt `vkAcquireNextImageKHR`'s returned index.
        const INTEL_QUEUE_INDEX_OVER_0X100_IS_BROKEN = 1 << 1;
    }
}

/// A function pointer set that may come from a core Vulkan version or
/// from an extension, so call sites don't need to branch on API
/// version at every call.
#[derive(Clone)]
pub enum ExtensionFn<T> {
    Extension(T),
    Promoted,
}

/// Which queue-family index is used for each queue type on this
/// renderer, filled in by the queue-family selection algorithm (§4.4).
#[derive(Clone, Copy, Debug, Default)]
pub struct QueueFamilies {
    pub graphics: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilies {
    pub fn get(&self, ty: QueueType) -> Option<u32> {
        match ty {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
        }
    }
}

/// Per-node, per-family queue usage counters (§4.4: "available[node][family]",
/// "used[node][family]"), atomically incremented by `add_queue`.
#[derive(Debug, Default)]
pub struct QueueFamilyUsage {
    pub available: Vec<u32>,
    pub used: Vec<AtomicU32>,
}

impl QueueFamilyUsage {
    pub fn new(family_queue_counts: &[u32]) -> Self {
        Self {
            available: family_queue_counts.to_vec(),
            used: family_queue_counts.iter().map(|_| AtomicU32::new(0)).collect(),
        }
    }
}

/// One logical queue: a (family, index, type) triple, plus the shared
/// submit mutex that serializes every submission and present on this
/// renderer's queues (§3 Queue, §5 Shared-resource policy).
#[derive(Debug)]
pub struct Queue {
    pub(crate) raw: ash::vk::Queue,
    pub(crate) device: Arc<DeviceShared>,
    pub(crate) family_index: u32,
    pub(crate) queue_index: u32,
    pub(crate) ty: QueueType,
    /// Serializes submit/present on this renderer's queues (§5).
    pub(crate) submit_mutex: Arc<Mutex<()>>,
    pub(crate) relay_index: AtomicIsize,
}

/// A binary semaphore carrying an observable signalled bit and the
/// device-group node index it was last signalled on (§3 Fence/Semaphore,
/// §4.4 "skipping semaphores not in the expected state"). `submit`
/// clears the bit on every semaphore it consumes as a wait and sets it
/// on every semaphore it signals; a semaphore not in the state a caller
/// expects is simply left out of the submit's wait/signal arrays.
#[derive(Debug)]
pub struct Semaphore {
    pub(crate) raw: ash::vk::Semaphore,
    pub(crate) signalled: bool,
    pub(crate) node_index: u32,
}

impl Semaphore {
    pub fn new(device: &DeviceShared, node_index: u32) -> Result<Self, DeviceError> {
        let info = ash::vk::SemaphoreCreateInfo::default();
        let raw =
            unsafe { device.raw.create_semaphore(&info, None) }.map_err(map_device_error)?;
        Ok(Self { raw, signalled: false, node_index })
    }

    pub fn is_signalled(&self) -> bool {
        self.signalled
    }

    pub fn node_index(&self) -> u32 {
        self.node_index
    }

    pub(crate) fn mark_signalled(&mut self) {
        self.signalled = true;
    }

    pub(crate) fn clear_signalled(&mut self) {
        self.signalled = false;
    }

    pub fn destroy(self, device: &DeviceShared) {
        unsafe { device.raw.destroy_semaphore(self.raw, None) };
    }
}

/// A device-memory-backed buffer; the memory block is `None` when the
/// buffer was placed into an application-supplied [`ResourceHeap`]
/// rather than freshly sub-allocated (§4.2 last paragraph).
#[derive(Debug)]
pub struct Buffer {
    pub(crate) raw: ash::vk::Buffer,
    pub(crate) block: Option<Mutex<gpu_alloc::MemoryBlock<ash::vk::DeviceMemory>>>,
    pub(crate) size: u64,
    pub(crate) descriptor_types: ftypes::DescriptorTypeMask,
    /// Typed uniform/storage-texel-buffer view, present only when the
    /// caller asked for one and the format's buffer features allow it
    /// (§4.3 "typed buffers request a typed buffer-view iff the format
    /// supports the required buffer feature").
    pub(crate) typed_view: Option<ash::vk::BufferView>,
}

/// A ResourceHeap: a block of device memory a buffer/texture may be
/// placed into at a declared offset (§3 ResourceHeap). Always allocated
/// via the sub-allocator with a dedicated-memory request.
#[derive(Debug)]
pub struct ResourceHeap {
    pub(crate) block: Mutex<gpu_alloc::MemoryBlock<ash::vk::DeviceMemory>>,
    pub(crate) mapped_ptr: Option<std::ptr::NonNull<u8>>,
}

unsafe impl Send for ResourceHeap {}
unsafe impl Sync for ResourceHeap {}

impl ResourceHeap {
    /// Resolves a declared offset into this heap to the underlying
    /// `(VkDeviceMemory, absolute offset)` pair for a `bind_*_memory`
    /// call (§4.2 "the backend calls raw bind_*_memory").
    pub(crate) fn memory_and_offset(&self, local_offset: u64) -> (ash::vk::DeviceMemory, u64) {
        let block = self.block.lock();
        (*block.memory(), block.offset() + local_offset)
    }

    pub fn mapped_ptr(&self) -> Option<std::ptr::NonNull<u8>> {
        self.mapped_ptr
    }
}

/// Owns zero or more `VkImage`s (one per plane for multi-planar
/// formats); `owns_image` mirrors §9 Open Question 3 — false for
/// swap-chain images and other imported handles, which must never be
/// destroyed by this backend.
#[derive(Debug)]
pub struct Texture {
    pub(crate) raw: ash::vk::Image,
    pub(crate) block: Option<Mutex<gpu_alloc::MemoryBlock<ash::vk::DeviceMemory>>>,
    pub(crate) owns_image: bool,
    pub(crate) format: ftypes::TextureFormat,
    pub(crate) extent: ftypes::Extent3d,
    pub(crate) mip_level_count: u32,
    pub(crate) array_layer_count: u32,
    pub(crate) sample_count: u32,
    pub(crate) lazily_allocated: bool,
}

#[derive(Debug)]
pub struct TextureView {
    pub(crate) raw: ash::vk::ImageView,
    pub(crate) base_mip_level: u32,
    pub(crate) mip_level_count: u32,
    pub(crate) base_array_layer: u32,
    pub(crate) array_layer_count: u32,
}

#[derive(Debug)]
pub struct Sampler {
    pub(crate) raw: ash::vk::Sampler,
    /// Set for planar formats only (§3 Sampler).
    pub(crate) ycbcr_conversion: Option<ash::vk::SamplerYcbcrConversion>,
}

/// A render-target-bindable wrapper around a [`Texture`]: a
/// monotonically assigned id used to key the legacy framebuffer cache,
/// one attachment view per (mip, slice) pair, and — for MSAA targets
/// created with `CREATE_RESOLVE_ATTACHMENT` — a recursively built
/// single-sample resolve target (§3 RenderTarget, §4.3 "numRTVs").
#[derive(Debug)]
pub struct RenderTarget {
    pub(crate) texture: Texture,
    pub(crate) id: u32,
    pub(crate) mip_level_count: u32,
    pub(crate) array_layer_count: u32,
    /// Indexed `[mip * array_layer_count + slice]`.
    pub(crate) views: Vec<TextureView>,
    pub(crate) resolve_target: Option<Box<RenderTarget>>,
}

impl RenderTarget {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn view(&self, mip: u32, slice: u32) -> ash::vk::ImageView {
        self.views[(mip * self.array_layer_count + slice) as usize].raw
    }
}

/// One of the null-descriptor defaults a renderer keeps so every
/// descriptor slot has a safe initial binding (§3 Renderer, §4.7).
#[derive(Debug)]
pub struct NullDescriptors {
    pub(crate) default_sampler: Sampler,
    pub(crate) default_buffer_srv: Buffer,
    pub(crate) default_buffer_uav: Buffer,
    pub(crate) default_tex_srv: [Texture; 4],
    pub(crate) default_tex_uav: [Texture; 4],
    pub(crate) default_tex_srv_view: [TextureView; 4],
    pub(crate) default_tex_uav_view: [TextureView; 4],
}

impl NullDescriptors {
    /// Creates the full set of null-descriptor defaults: one sampler,
    /// one SRV and one UAV buffer, and 1x1 SRV/UAV textures for each of
    /// the four image dimensions the root signature may need a default
    /// for (1D, 2D, 3D, Cube) (§3 Renderer, §4.7 "Initialisation to
    /// null-descriptors").
    pub(crate) fn new(
        shared: &DeviceShared,
        mem_allocator: &Mutex<gpu_alloc::GpuAllocator<ash::vk::DeviceMemory>>,
    ) -> Result<Self, DeviceError> {
        use ash::vk;

        let default_sampler = {
            let info = vk::SamplerCreateInfo::default();
            let raw = unsafe { shared.raw.create_sampler(&info, None) }.map_err(map_device_error)?;
            Sampler { raw, ycbcr_conversion: None }
        };

        let make_buffer = |usage: vk::BufferUsageFlags| -> Result<Buffer, DeviceError> {
            let info = vk::BufferCreateInfo::default().size(256).usage(usage);
            let raw = unsafe { shared.raw.create_buffer(&info, None) }.map_err(map_device_error)?;
            let requirements = unsafe { shared.raw.get_buffer_memory_requirements(raw) };
            let block = unsafe {
                mem_allocator.lock().alloc(
                    gpu_alloc_ash::AshMemoryDevice::wrap(&shared.raw),
                    gpu_alloc::Request {
                        size: requirements.size,
                        align_mask: requirements.alignment - 1,
                        usage: gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
                        memory_types: requirements.memory_type_bits,
                    },
                )
            }
            .map_err(|_| DeviceError::OutOfMemory)?;
            unsafe {
                shared
                    .raw
                    .bind_buffer_memory(raw, *block.memory(), block.offset())
            }
            .map_err(map_device_error)?;
            Ok(Buffer {
                raw,
                block: Some(Mutex::new(block)),
                size: 256,
                descriptor_types: ftypes::DescriptorTypeMask::empty(),
                typed_view: None,
            })
        };
        let default_buffer_srv = make_buffer(vk::BufferUsageFlags::UNIFORM_BUFFER)?;
        let default_buffer_uav = make_buffer(vk::BufferUsageFlags::STORAGE_BUFFER)?;

        let image_types = [
            (vk::ImageType::TYPE_1D, vk::ImageViewType::TYPE_1D, vk::ImageCreateFlags::empty(), 1u32),
            (vk::ImageType::TYPE_2D, vk::ImageViewType::TYPE_2D, vk::ImageCreateFlags::empty(), 1u32),
            (vk::ImageType::TYPE_3D, vk::ImageViewType::TYPE_3D, vk::ImageCreateFlags::empty(), 1u32),
            (
                vk::ImageType::TYPE_2D,
                vk::ImageViewType::CUBE,
                vk::ImageCreateFlags::CUBE_COMPATIBLE,
                6u32,
            ),
        ];

        let mut srv_textures = Vec::with_capacity(4);
        let mut srv_views = Vec::with_capacity(4);
        let mut uav_textures = Vec::with_capacity(4);
        let mut uav_views = Vec::with_capacity(4);
        for &(image_type, view_type, flags, array_layers) in &image_types {
            let (t, v) = create_default_texture(
                shared,
                mem_allocator,
                image_type,
                view_type,
                flags,
                array_layers,
                vk::ImageUsageFlags::SAMPLED,
            )?;
            srv_textures.push(t);
            srv_views.push(v);
            let (t, v) = create_default_texture(
                shared,
                mem_allocator,
                image_type,
                view_type,
                flags,
                array_layers,
                vk::ImageUsageFlags::STORAGE,
            )?;
            uav_textures.push(t);
            uav_views.push(v);
        }

        Ok(Self {
            default_sampler,
            default_buffer_srv,
            default_buffer_uav,
            default_tex_srv: srv_textures.try_into().unwrap_or_else(|_| unreachable!()),
            default_tex_uav: uav_textures.try_into().unwrap_or_else(|_| unreachable!()),
            default_tex_srv_view: srv_views.try_into().unwrap_or_else(|_| unreachable!()),
            default_tex_uav_view: uav_views.try_into().unwrap_or_else(|_| unreachable!()),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn create_default_texture(
    shared: &DeviceShared,
    mem_allocator: &Mutex<gpu_alloc::GpuAllocator<ash::vk::DeviceMemory>>,
    image_type: ash::vk::ImageType,
    view_type: ash::vk::ImageViewType,
    flags: ash::vk::ImageCreateFlags,
    array_layers: u32,
    usage: ash::vk::ImageUsageFlags,
) -> Result<(Texture, TextureView), DeviceError> {
    use ash::vk;
    let info = vk::ImageCreateInfo::default()
        .image_type(image_type)
        .format(vk::Format::R8G8B8A8_UNORM)
        .extent(vk::Extent3D { width: 1, height: 1, depth: 1 })
        .mip_levels(1)
        .array_layers(array_layers)
        .samples(vk::SampleCountFlags::TYPE_1)
        .usage(usage)
        .flags(flags)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    let raw = unsafe { shared.raw.create_image(&info, None) }.map_err(map_device_error)?;
    let requirements = unsafe { shared.raw.get_image_memory_requirements(raw) };
    let block = unsafe {
        mem_allocator.lock().alloc(
            gpu_alloc_ash::AshMemoryDevice::wrap(&shared.raw),
            gpu_alloc::Request {
                size: requirements.size,
                align_mask: requirements.alignment - 1,
                usage: gpu_alloc::UsageFlags::FAST_DEVICE_ACCESS,
                memory_types: requirements.memory_type_bits,
            },
        )
    }
    .map_err(|_| DeviceError::OutOfMemory)?;
    unsafe {
        shared
            .raw
            .bind_image_memory(raw, *block.memory(), block.offset())
    }
    .map_err(map_device_error)?;

    let view_info = vk::ImageViewCreateInfo::default()
        .image(raw)
        .view_type(view_type)
        .format(vk::Format::R8G8B8A8_UNORM)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: array_layers,
        });
    let view =
        unsafe { shared.raw.create_image_view(&view_info, None) }.map_err(map_device_error)?;

    Ok((
        Texture {
            raw,
            block: Some(Mutex::new(block)),
            owns_image: true,
            format: ftypes::TextureFormat::Rgba8Unorm,
            extent: ftypes::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: array_layers,
            },
            mip_level_count: 1,
            array_layer_count: array_layers,
            sample_count: 1,
            lazily_allocated: false,
        },
        TextureView {
            raw: view,
            base_mip_level: 0,
            mip_level_count: 1,
            base_array_layer: 0,
            array_layer_count: array_layers,
        },
    ))
}

pub(crate) fn map_device_error(result: ash::vk::Result) -> DeviceError {
    match result {
        ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY | ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            DeviceError::OutOfMemory
        }
        ash::vk::Result::ERROR_DEVICE_LOST => DeviceError::Lost,
        other => DeviceError::Internal(vk_result_name(other)),
    }
}

fn vk_result_name(result: ash::vk::Result) -> &'static str {
    match result {
        ash::vk::Result::ERROR_INITIALIZATION_FAILED => "initialization failed",
        ash::vk::Result::ERROR_LAYER_NOT_PRESENT => "layer not present",
        ash::vk::Result::ERROR_EXTENSION_NOT_PRESENT => "extension not present",
        ash::vk::Result::ERROR_FEATURE_NOT_PRESENT => "feature not present",
        ash::vk::Result::ERROR_TOO_MANY_OBJECTS => "too many objects",
        ash::vk::Result::ERROR_FRAGMENTED_POOL => "fragmented pool",
        ash::vk::Result::ERROR_OUT_OF_POOL_MEMORY => "out of pool memory",
        _ => "unknown Vulkan error",
    }
}
