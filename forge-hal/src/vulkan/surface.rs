//! Swap chain creation, acquire/present contracts (§4.5).

use super::{DeviceShared, InstanceShared, Texture, TextureView, Workarounds};
use crate::{DeviceError, SurfaceError};
use ash::vk;
use parking_lot::RwLock;
use std::sync::Arc;

/// The original descriptor stored inline so a vsync toggle can
/// recreate the swap chain with a single changed flag (§4.5 "Store
/// original descriptor inline").
#[derive(Clone, Debug)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub format: ftypes::TextureFormat,
    pub color_space: vk::ColorSpaceKHR,
    pub image_count: u32,
    pub vsync: bool,
}

pub struct Swapchain {
    pub(crate) raw: vk::SwapchainKHR,
    pub(crate) functor: ash::khr::swapchain::Device,
    pub(crate) device: Arc<DeviceShared>,
    pub(crate) images: Vec<vk::Image>,
    pub(crate) views: Vec<TextureView>,
    pub(crate) config: SwapchainDesc,
    pub(crate) present_queue_family: u32,
    /// Next index handed out by `acquire_texture`'s sentinel-free path.
    pub(crate) next_surface_index: usize,
}

impl Swapchain {
    /// Waits device idle, destroys the per-image views, then destroys
    /// the `VkSwapchainKHR` itself.
    pub fn release_resources(self) {
        let _ = unsafe { self.device.raw.device_wait_idle() };
        for view in &self.views {
            unsafe { self.device.raw.destroy_image_view(view.raw, None) };
        }
        unsafe { self.functor.destroy_swapchain(self.raw, None) };
    }
}

pub struct Surface {
    pub(crate) raw: vk::SurfaceKHR,
    pub(crate) functor: ash::khr::surface::Instance,
    pub(crate) instance: Arc<InstanceShared>,
    pub(crate) swapchain: RwLock<Option<Swapchain>>,
}

/// The result of a successful `acquireNextImage` (§4.5).
pub struct AcquiredSurfaceTexture {
    pub texture: SurfaceTexture,
    pub suboptimal: bool,
}

pub struct SurfaceTexture {
    pub index: u32,
    pub wait_semaphore: vk::Semaphore,
}

impl Surface {
    /// Picks format/colourspace/present-mode, clamps image count, and
    /// builds one RenderTarget per swap image in `PRESENT` start-state
    /// (§4.5 Creation).
    pub fn configure(
        &self,
        device: Arc<DeviceShared>,
        adapter_raw: vk::PhysicalDevice,
        instance_entry: &ash::Instance,
        desc: &SwapchainDesc,
        present_queue_family: u32,
    ) -> Result<(), SurfaceError> {
        let capabilities = unsafe {
            self.functor
                .get_physical_device_surface_capabilities(adapter_raw, self.raw)
        }
        .map_err(|e| SurfaceError::Device(super::map_device_error(e)))?;

        let formats = unsafe {
            self.functor
                .get_physical_device_surface_formats(adapter_raw, self.raw)
        }
        .unwrap_or_default();

        let requested_vk_format = super::conv::map_texture_format(desc.format);
        let chosen = formats
            .iter()
            .find(|f| f.format == requested_vk_format && f.color_space == desc.color_space)
            .or_else(|| {
                formats.iter().find(|f| {
                    f.format == vk::Format::B8G8R8A8_UNORM
                        || f.format == vk::Format::R8G8B8A8_UNORM
                })
            })
            .copied()
            .unwrap_or(vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            });

        let image_count = desc
            .image_count
            .max(capabilities.min_image_count)
            .min(if capabilities.max_image_count == 0 {
                u32::MAX
            } else {
                capabilities.max_image_count
            });

        let present_modes = unsafe {
            self.functor
                .get_physical_device_surface_present_modes(adapter_raw, self.raw)
        }
        .unwrap_or_default();
        let present_mode = pick_present_mode(&present_modes, desc.vsync);

        let swapchain_fn = ash::khr::swapchain::Device::new(instance_entry, &device.raw);
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.raw)
            .min_image_count(image_count)
            .image_format(chosen.format)
            .image_color_space(chosen.color_space)
            .image_extent(vk::Extent2D { width: desc.width, height: desc.height })
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let raw = unsafe { swapchain_fn.create_swapchain(&create_info, None) }
            .map_err(|e| SurfaceError::Device(super::map_device_error(e)))?;

        let images = unsafe { swapchain_fn.get_swapchain_images(raw) }.unwrap_or_default();
        let views = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(chosen.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                let raw_view = unsafe { device.raw.create_image_view(&view_info, None) }
                    .map_err(super::map_device_error)?;
                Ok(TextureView {
                    raw: raw_view,
                    base_mip_level: 0,
                    mip_level_count: 1,
                    base_array_layer: 0,
                    array_layer_count: 1,
                })
            })
            .collect::<Result<Vec<_>, DeviceError>>()
            .map_err(SurfaceError::Device)?;

        *self.swapchain.write() = Some(Swapchain {
            raw,
            functor: swapchain_fn,
            device,
            images,
            views,
            config: SwapchainDesc {
                image_count,
                ..desc.clone()
            },
            present_queue_family,
            next_surface_index: 0,
        });

        Ok(())
    }

    pub fn unconfigure(&self) {
        if let Some(swapchain) = self.swapchain.write().take() {
            swapchain.release_resources();
        }
    }

    /// `acquireNextImage` contract (§4.5): `OUT_OF_DATE` is surfaced as
    /// an error rather than the raw `-1` sentinel the original C API
    /// uses; `SUBOPTIMAL_KHR` is success with a log note; the semaphore
    /// is marked signalled only on success.
    pub fn acquire_texture(
        &self,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        workarounds: Workarounds,
    ) -> Result<AcquiredSurfaceTexture, SurfaceError> {
        let guard = self.swapchain.read();
        let swapchain = guard.as_ref().ok_or(SurfaceError::Outdated)?;

        let effective_timeout =
            if workarounds.contains(Workarounds::ACQUIRE_NEXT_IMAGE_UINT64_MAX_IS_BLOCKING) {
                timeout_ns.min(u64::MAX - 1)
            } else {
                timeout_ns
            };

        let result = unsafe {
            swapchain.functor.acquire_next_image(
                swapchain.raw,
                effective_timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((mut index, suboptimal)) => {
                if workarounds.contains(Workarounds::INTEL_QUEUE_INDEX_OVER_0X100_IS_BROKEN)
                    && swapchain.present_queue_family > 0x100
                {
                    index &= 0xff;
                }
                if suboptimal {
                    log::debug!("acquireNextImage returned VK_SUBOPTIMAL_KHR");
                }
                Ok(AcquiredSurfaceTexture {
                    texture: SurfaceTexture { index, wait_semaphore: semaphore },
                    suboptimal,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SurfaceError::Outdated),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(SurfaceError::Lost),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(SurfaceError::Device(DeviceError::Lost)),
            Err(other) => Err(SurfaceError::Device(super::map_device_error(other))),
        }
    }

    /// No-op: discarded acquired images need no explicit release on
    /// this backend.
    pub fn discard_texture(&self, _texture: SurfaceTexture) {}
}

fn pick_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let priority = if vsync {
        [
            vk::PresentModeKHR::FIFO_RELAXED,
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ]
    } else {
        [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO_RELAXED,
            vk::PresentModeKHR::FIFO,
        ]
    };
    priority
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}
