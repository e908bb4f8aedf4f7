//! `GpuInfo`: an enumerated adapter's capability record, built once
//! during context init and immutable thereafter (§3 GpuInfo).

use super::{instance, InstanceShared, Workarounds};
use crate::{auxil, DownlevelFlags, GpuPreset, InitError, QueueType};
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

/// Feature-structure probe results bundled so `open()` doesn't need to
/// re-query them.
#[derive(Clone, Debug, Default)]
pub struct PhysicalDeviceFeatures {
    pub dynamic_rendering: bool,
    pub descriptor_indexing: bool,
    pub timeline_semaphore: bool,
    pub buffer_device_address: bool,
    pub ycbcr_conversion: bool,
    pub fragment_shader_interlock: bool,
    pub device_fault: bool,
    pub shader_info_amd: bool,
    pub draw_indirect_count_khr: bool,
    pub draw_indirect_count_amd: bool,
    pub ray_tracing: bool,
}

/// Capabilities this backend actually relies on internally, as opposed
/// to ones merely reported to the application (§4.1).
#[derive(Clone, Debug, Default)]
pub struct PrivateCapabilities {
    pub imageless_framebuffers: bool,
    pub image_view_usage: bool,
    pub non_coherent_map_mask: u64,
    pub robust_buffer_access: bool,
    pub robust_image_access: bool,
    pub zero_initialize_workgroup_memory: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QueueFamilyProperties {
    pub index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
    pub supports_present: bool,
}

/// An enumerated, immutable GPU record (§3 GpuInfo).
#[derive(Clone)]
pub struct Adapter {
    pub(crate) raw: vk::PhysicalDevice,
    pub(crate) instance: Arc<InstanceShared>,
    pub(crate) vendor_id: u32,
    pub(crate) device_id: u32,
    pub(crate) device_name: String,
    pub(crate) driver_version: u32,
    pub(crate) api_version: u32,
    pub(crate) queue_families: Vec<QueueFamilyProperties>,
    pub(crate) downlevel_flags: DownlevelFlags,
    pub(crate) features: PhysicalDeviceFeatures,
    pub(crate) private_caps: PrivateCapabilities,
    pub(crate) workarounds: Workarounds,
    pub(crate) preset: GpuPreset,
    pub(crate) vram_estimate_bytes: u64,
    pub(crate) timestamp_period: f32,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("device_name", &self.device_name)
            .field("vendor_id", &format_args!("{:#x}", self.vendor_id))
            .field("device_id", &format_args!("{:#x}", self.device_id))
            .field("preset", &self.preset)
            .finish()
    }
}

const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

const OPTIONAL_DEVICE_EXTENSIONS: &[&CStr] = &[
    ash::khr::dynamic_rendering::NAME,
    ash::ext::descriptor_indexing::NAME,
    ash::khr::timeline_semaphore::NAME,
    ash::khr::buffer_device_address::NAME,
    ash::khr::sampler_ycbcr_conversion::NAME,
    ash::ext::fragment_shader_interlock::NAME,
    ash::ext::device_fault::NAME,
    ash::khr::draw_indirect_count::NAME,
    ash::amd::draw_indirect_count::NAME,
];

impl Adapter {
    /// Build a `GpuInfo` for one physical device, or `None` if it
    /// should be filtered out (§4.1: "filters out devices without a
    /// graphics-capable queue family and of CPU type").
    pub(crate) fn expose(instance: Arc<InstanceShared>, raw: vk::PhysicalDevice) -> Option<Self> {
        let properties = unsafe { instance.raw.get_physical_device_properties(raw) };
        if properties.device_type == vk::PhysicalDeviceType::CPU {
            return None;
        }

        let queue_family_properties =
            unsafe { instance.raw.get_physical_device_queue_family_properties(raw) };
        let has_graphics = queue_family_properties
            .iter()
            .any(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS));
        if !has_graphics {
            return None;
        }

        let queue_families = queue_family_properties
            .iter()
            .enumerate()
            .map(|(index, f)| QueueFamilyProperties {
                index: index as u32,
                queue_flags: f.queue_flags,
                queue_count: f.queue_count,
                supports_present: true, // resolved per-surface at swapchain creation time
            })
            .collect();

        let extension_properties =
            unsafe { instance.raw.enumerate_device_extension_properties(raw) }.unwrap_or_default();
        let has_extension = |name: &CStr| {
            extension_properties.iter().any(|ext| {
                ext.extension_name_as_c_str().map(|n| n == name).unwrap_or(false)
            })
        };

        for required in REQUIRED_DEVICE_EXTENSIONS {
            if !has_extension(required) {
                return None;
            }
        }

        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let features = PhysicalDeviceFeatures {
            dynamic_rendering: has_extension(ash::khr::dynamic_rendering::NAME),
            descriptor_indexing: has_extension(ash::ext::descriptor_indexing::NAME),
            timeline_semaphore: has_extension(ash::khr::timeline_semaphore::NAME)
                || properties.api_version >= vk::API_VERSION_1_2,
            buffer_device_address: has_extension(ash::khr::buffer_device_address::NAME),
            ycbcr_conversion: has_extension(ash::khr::sampler_ycbcr_conversion::NAME),
            fragment_shader_interlock: has_extension(ash::ext::fragment_shader_interlock::NAME),
            device_fault: has_extension(ash::ext::device_fault::NAME),
            shader_info_amd: has_extension(ash::amd::shader_info::NAME),
            draw_indirect_count_khr: has_extension(ash::khr::draw_indirect_count::NAME),
            draw_indirect_count_amd: has_extension(ash::amd::draw_indirect_count::NAME),
            ray_tracing: false,
        };

        let mut downlevel_flags = DownlevelFlags::empty();
        downlevel_flags.set(DownlevelFlags::DYNAMIC_RENDERING, features.dynamic_rendering);
        downlevel_flags.set(DownlevelFlags::DESCRIPTOR_INDEXING, features.descriptor_indexing);
        downlevel_flags.set(DownlevelFlags::TIMELINE_SEMAPHORE, features.timeline_semaphore);
        downlevel_flags.set(
            DownlevelFlags::BUFFER_DEVICE_ADDRESS,
            features.buffer_device_address,
        );
        downlevel_flags.set(DownlevelFlags::YCBCR_CONVERSION, features.ycbcr_conversion);
        downlevel_flags.set(
            DownlevelFlags::FRAGMENT_SHADER_INTERLOCK,
            features.fragment_shader_interlock,
        );
        downlevel_flags.set(DownlevelFlags::DEVICE_FAULT, features.device_fault);
        downlevel_flags.set(
            DownlevelFlags::DRAW_INDIRECT_COUNT,
            features.draw_indirect_count_khr || features.draw_indirect_count_amd,
        );

        let memory_properties = unsafe { instance.raw.get_physical_device_memory_properties(raw) };
        let vram_estimate_bytes = memory_properties.memory_heaps
            [..memory_properties.memory_heap_count as usize]
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum();

        let preset = estimate_preset(&properties, vram_estimate_bytes);

        let mut workarounds = Workarounds::empty();
        if properties.vendor_id == auxil::db::vendor::INTEL {
            workarounds |= Workarounds::INTEL_QUEUE_INDEX_OVER_0X100_IS_BROKEN;
        }
        workarounds |= Workarounds::ACQUIRE_NEXT_IMAGE_UINT64_MAX_IS_BLOCKING;

        let private_caps = PrivateCapabilities {
            imageless_framebuffers: properties.api_version >= vk::API_VERSION_1_2,
            image_view_usage: true,
            non_coherent_map_mask: properties.limits.non_coherent_atom_size - 1,
            robust_buffer_access: true,
            robust_image_access: false,
            zero_initialize_workgroup_memory: false,
        };

        Some(Self {
            raw,
            instance,
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            device_name,
            driver_version: properties.driver_version,
            api_version: properties.api_version,
            queue_families,
            downlevel_flags,
            features,
            private_caps,
            workarounds,
            preset,
            vram_estimate_bytes,
            timestamp_period: properties.limits.timestamp_period,
        })
    }

    /// Validate this adapter is usable: not on the driver-rejection
    /// table, and at/above the minimum GPU preset (§4.1).
    pub fn validate(&self) -> Result<(), InitError> {
        if instance::is_rejected_driver(self.vendor_id, self.device_id) {
            return Err(InitError::NoSuitableAdapter);
        }
        if self.preset < GpuPreset::MINIMUM {
            return Err(InitError::NoSuitableAdapter);
        }
        Ok(())
    }

    pub fn optional_device_extensions(&self) -> &'static [&'static CStr] {
        OPTIONAL_DEVICE_EXTENSIONS
    }

    pub fn required_device_extensions(&self) -> &'static [&'static CStr] {
        REQUIRED_DEVICE_EXTENSIONS
    }

    /// Queue-family selection algorithm (§4.4, five-step fallback).
    pub fn select_queue_family(&self, requested: QueueType) -> (u32, bool) {
        let want_flags = match requested {
            QueueType::Graphics => vk::QueueFlags::GRAPHICS,
            QueueType::Compute => vk::QueueFlags::COMPUTE,
            QueueType::Transfer => vk::QueueFlags::TRANSFER,
        };

        if requested == QueueType::Graphics {
            if let Some(f) = self
                .queue_families
                .iter()
                .find(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            {
                return (f.index, false);
            }
        }

        if let Some(f) = self
            .queue_families
            .iter()
            .find(|f| f.queue_flags == want_flags)
        {
            return (f.index, false);
        }

        if let Some(f) = self
            .queue_families
            .iter()
            .filter(|f| {
                f.queue_flags.contains(want_flags) && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            })
            .min_by_key(|f| f.queue_flags.as_raw().count_ones())
        {
            return (f.index, false);
        }

        if let Some(f) = self
            .queue_families
            .iter()
            .find(|f| f.queue_flags.contains(want_flags))
        {
            return (f.index, false);
        }

        log::warn!(
            "no queue family satisfies {requested:?}; falling back to family 0, queue 0"
        );
        (0, true)
    }
}

/// Policy function analogous to `util_select_best_gpu`: picks the best
/// surviving GPU from a list of candidates (§4.1 "GPU selection").
pub fn select_best_gpu(adapters: &[Adapter]) -> Option<usize> {
    adapters
        .iter()
        .enumerate()
        .filter(|(_, a)| a.validate().is_ok())
        .max_by_key(|(_, a)| (a.preset, a.vram_estimate_bytes))
        .map(|(index, _)| index)
}

fn estimate_preset(properties: &vk::PhysicalDeviceProperties, vram_bytes: u64) -> GpuPreset {
    let is_discrete = properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
    let vram_gib = vram_bytes / (1 << 30);
    match (is_discrete, vram_gib) {
        (true, gib) if gib >= 8 => GpuPreset::Ultra,
        (true, gib) if gib >= 4 => GpuPreset::High,
        (true, _) => GpuPreset::Medium,
        (false, gib) if gib >= 2 => GpuPreset::Low,
        (false, _) => GpuPreset::VeryLow,
    }
}
