//! Submit and present (§4.4 "Command-buffer lifecycle", §4.5
//! `queuePresent` contract).

use super::{CommandBuffer, Fence, Semaphore};
use crate::{DeviceError, SurfaceError};
use ash::vk;
use std::sync::atomic::Ordering;

impl super::Queue {
    /// Builds semaphore-wait/-signal arrays, skipping any wait semaphore
    /// not currently signalled and any signal semaphore already
    /// signalled, resets the fence immediately before submit, then
    /// submits under the per-renderer submit-mutex (§4.4 "skip any
    /// semaphore not in the expected state", §5 "queueSubmit and
    /// queuePresent serialise on a per-queue mutex"). On success, clears
    /// the signalled bit on every wait semaphore it consumed and sets it
    /// on every signal semaphore it signalled.
    pub fn submit(
        &self,
        command_buffers: &[CommandBuffer],
        wait_semaphores: &mut [(&mut Semaphore, vk::PipelineStageFlags)],
        signal_semaphores: &mut [&mut Semaphore],
        fence: Option<(&mut Fence, super::fence::FenceValue)>,
    ) -> Result<(), DeviceError> {
        let _guard = self.submit_mutex.lock();

        let raw_buffers: Vec<vk::CommandBuffer> = command_buffers.iter().map(|b| b.raw).collect();

        let mut wait_raw = Vec::with_capacity(wait_semaphores.len());
        let mut wait_masks = Vec::with_capacity(wait_semaphores.len());
        for (sem, stage) in wait_semaphores.iter() {
            if sem.is_signalled() {
                wait_raw.push(sem.raw);
                wait_masks.push(*stage);
            }
        }

        let signal_raw: Vec<vk::Semaphore> = signal_semaphores
            .iter()
            .filter(|sem| !sem.is_signalled())
            .map(|sem| sem.raw)
            .collect();

        let mut submit_info = vk::SubmitInfo::default()
            .command_buffers(&raw_buffers)
            .wait_semaphores(&wait_raw)
            .wait_dst_stage_mask(&wait_masks)
            .signal_semaphores(&signal_raw);

        let mut extra_signal;
        let mut timeline_signal;
        let mut timeline_info;
        let raw_fence = match fence {
            Some((Fence::TimelineSemaphore(sem), value)) => {
                timeline_signal = [value];
                timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
                    .signal_semaphore_values(&mut timeline_signal);
                submit_info = submit_info.push_next(&mut timeline_info);
                extra_signal = signal_raw.clone();
                extra_signal.push(*sem);
                submit_info = submit_info.signal_semaphores(&extra_signal);
                vk::Fence::null()
            }
            Some((Fence::FencePool { free, active, .. }, value)) => {
                let raw = free.pop().unwrap_or(vk::Fence::null());
                let raw = if raw == vk::Fence::null() {
                    unsafe {
                        self.device
                            .raw
                            .create_fence(&vk::FenceCreateInfo::default(), None)
                    }
                    .map_err(super::map_device_error)?
                } else {
                    unsafe { self.device.raw.reset_fences(&[raw]) }
                        .map_err(super::map_device_error)?;
                    raw
                };
                active.push((value, raw));
                raw
            }
            None => vk::Fence::null(),
        };

        profiling::scope!("vkQueueSubmit");
        let result = unsafe {
            self.device
                .raw
                .queue_submit(self.raw, &[submit_info], raw_fence)
        }
        .map_err(super::map_device_error);

        if result.is_ok() {
            for (sem, _) in wait_semaphores.iter_mut() {
                sem.clear_signalled();
            }
            for sem in signal_semaphores.iter_mut() {
                sem.mark_signalled();
            }
        }

        result
    }

    /// `queuePresent` (§4.5): waits on the given signalled semaphores
    /// under the submit-mutex, then presents on this queue.
    pub fn present(
        &self,
        swapchain_fn: &ash::khr::swapchain::Device,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, SurfaceError> {
        let _guard = self.submit_mutex.lock();

        let swapchains = [swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { swapchain_fn.queue_present(self.raw, &present_info) } {
            Ok(suboptimal) => {
                if suboptimal {
                    log::debug!("present returned VK_SUBOPTIMAL_KHR");
                }
                Ok(suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SurfaceError::Outdated),
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(SurfaceError::Lost),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(SurfaceError::Device(DeviceError::Lost)),
            Err(other) => Err(SurfaceError::Device(super::map_device_error(other))),
        }
    }

    pub fn get_timestamp_period(&self) -> f32 {
        self.device.timestamp_period
    }

    /// `waitQueueIdle` (§5 "may block until the queue drains").
    pub fn wait_idle(&self) -> Result<(), DeviceError> {
        unsafe { self.device.raw.queue_wait_idle(self.raw) }.map_err(super::map_device_error)
    }

    pub(crate) fn next_relay_index(&self) -> isize {
        self.relay_index.fetch_add(1, Ordering::Relaxed)
    }
}
