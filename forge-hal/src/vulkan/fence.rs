//! A fence carries a signalled bit observable by the host (§3 Fence).
//!
//! When `VK_KHR_timeline_semaphore` is available a single
//! monotonically increasing semaphore stands in for an unbounded set of
//! fences; otherwise a small pool of real fences is recycled.

use super::DeviceShared;
use crate::DeviceError;
use ash::vk;

pub type FenceValue = u64;

#[derive(Debug)]
pub enum Fence {
    TimelineSemaphore(vk::Semaphore),
    FencePool {
        last_completed: FenceValue,
        /// Fences currently waiting on a submitted value.
        active: Vec<(FenceValue, vk::Fence)>,
        /// Fences known to be signalled, ready to reuse.
        free: Vec<vk::Fence>,
    },
}

impl Fence {
    pub fn new_pool() -> Self {
        Self::FencePool {
            last_completed: 0,
            active: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Scans `active` for newly signalled fences, recycling them into
    /// `free` and advancing `last_completed` to the highest signalled
    /// value seen.
    pub fn check_active(&mut self, device: &DeviceShared) -> Result<FenceValue, DeviceError> {
        match *self {
            Self::TimelineSemaphore(raw) => unsafe {
                device
                    .raw
                    .get_semaphore_counter_value(raw)
                    .map_err(super::map_device_error)
            },
            Self::FencePool {
                ref mut last_completed,
                ref mut active,
                ref mut free,
            } => {
                let mut max_value = *last_completed;
                active.retain(|&(value, raw)| {
                    let signalled = unsafe { device.raw.get_fence_status(raw) }
                        == Ok(());
                    if signalled {
                        max_value = max_value.max(value);
                        free.push(raw);
                    }
                    !signalled
                });
                *last_completed = max_value;
                Ok(max_value)
            }
        }
    }

    pub fn get_latest(&self, device: &DeviceShared) -> Result<FenceValue, DeviceError> {
        match *self {
            Self::TimelineSemaphore(raw) => unsafe {
                device
                    .raw
                    .get_semaphore_counter_value(raw)
                    .map_err(super::map_device_error)
            },
            Self::FencePool { last_completed, .. } => Ok(last_completed),
        }
    }

    /// Recycles signalled fences back into `free` via `vkResetFences`
    /// (no-op for the timeline-semaphore variant).
    pub fn maintain(&mut self, device: &DeviceShared) -> Result<(), DeviceError> {
        if let Self::FencePool { free, .. } = self {
            if !free.is_empty() {
                unsafe { device.raw.reset_fences(free) }.map_err(super::map_device_error)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_starts_at_zero() {
        let fence = Fence::new_pool();
        match fence {
            Fence::FencePool { last_completed, active, free } => {
                assert_eq!(last_completed, 0);
                assert!(active.is_empty());
                assert!(free.is_empty());
            }
            _ => panic!("expected FencePool"),
        }
    }
}
