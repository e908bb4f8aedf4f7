//! GPU timestamp binding for Vulkan: a ring of command buffers and a
//! shared timestamp query pool, plus one-shot CPU/GPU tick calibration
//! (§4.12 "GPU timestamp ring", grounded on
//! `Common_3/Tools/Profiler/ProfilerVulkan.cpp`).

use crate::{PROFILE_GPU_FRAMES, PROFILE_GPU_MAX_QUERIES};
use ash::vk;
use fhal::DeviceError;
use std::sync::atomic::{AtomicU32, Ordering};

/// One slot in the command-buffer/query ring. `first_query` and
/// `query_count` mark the span of the shared query pool this frame
/// wrote into; `fence` gates reuse once the GPU has caught up.
struct GpuFrame {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    fence: vk::Fence,
    first_query: u32,
    query_count: u32,
}

/// The last slot of the shared pool is reserved for the one-shot
/// CPU/GPU calibration query, outside the `PROFILE_GPU_MAX_QUERIES`
/// span every frame rotates through (§4.12 "the `+1` is a one-shot
/// reference/calibration query").
const CALIBRATION_QUERY_INDEX: u32 = PROFILE_GPU_MAX_QUERIES as u32;

fn map_device_error(result: vk::Result) -> DeviceError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            DeviceError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => DeviceError::Lost,
        _ => DeviceError::Internal("gpu profiler vulkan call"),
    }
}

pub struct GpuProfiler {
    device: ash::Device,
    query_pool: vk::QueryPool,
    frames: Vec<GpuFrame>,
    current_frame: usize,
    next_query: AtomicU32,
    timestamp_period_ns: f32,
    /// `(cpu_ticks, gpu_ticks)` sampled once at startup so later GPU
    /// timestamps can be expressed on the CPU's tick axis.
    calibration: Option<(u64, u64)>,
}

impl GpuProfiler {
    pub fn new(
        device: &ash::Device,
        queue_family: u32,
        timestamp_period_ns: f32,
    ) -> Result<Self, DeviceError> {
        let pool_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(PROFILE_GPU_MAX_QUERIES as u32 + 1);
        let query_pool = unsafe { device.create_query_pool(&pool_info, None) }
            .map_err(map_device_error)?;

        let span = PROFILE_GPU_MAX_QUERIES as u32 / PROFILE_GPU_FRAMES as u32;
        let mut frames = Vec::with_capacity(PROFILE_GPU_FRAMES);
        for i in 0..PROFILE_GPU_FRAMES {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let pool = unsafe { device.create_command_pool(&pool_info, None) }
                .map_err(map_device_error)?;
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
                .map_err(map_device_error)?[0];
            let fence_info =
                vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            let fence = unsafe { device.create_fence(&fence_info, None) }
                .map_err(map_device_error)?;
            frames.push(GpuFrame {
                pool,
                buffer,
                fence,
                first_query: i as u32 * span,
                query_count: span,
            });
        }

        let mut profiler = Self {
            device: device.clone(),
            query_pool,
            frames,
            current_frame: 0,
            next_query: AtomicU32::new(0),
            timestamp_period_ns,
            calibration: None,
        };
        profiler.calibration = Some(profiler.calibrate(queue_family)?);
        Ok(profiler)
    }

    /// Runs a single-use command buffer that writes one timestamp,
    /// waits for it, and pairs it with the CPU tick taken immediately
    /// after submission (§4.12 "CPU↔GPU tick calibration").
    fn calibrate(&self, queue_family: u32) -> Result<(u64, u64), DeviceError> {
        let pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family);
        let pool = unsafe { self.device.create_command_pool(&pool_info, None) }
            .map_err(map_device_error)?;
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(map_device_error)?[0];

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(buffer, &begin_info).map_err(map_device_error)?;
            self.device
                .cmd_reset_query_pool(buffer, self.query_pool, CALIBRATION_QUERY_INDEX, 1);
            self.device.cmd_write_timestamp(
                buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                self.query_pool,
                CALIBRATION_QUERY_INDEX,
            );
            self.device.end_command_buffer(buffer).map_err(map_device_error)?;
        }

        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe { self.device.create_fence(&fence_info, None) }
            .map_err(map_device_error)?;
        let queue = unsafe { self.device.get_device_queue(queue_family, 0) };
        let buffers = [buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
        unsafe {
            self.device
                .queue_submit(queue, std::slice::from_ref(&submit_info), fence)
                .map_err(map_device_error)?;
            self.device
                .wait_for_fences(&[fence], true, u64::MAX)
                .map_err(map_device_error)?;
        }
        let cpu_tick = crate::thread_log::now_ticks();

        let mut gpu_tick = [0u64; 1];
        unsafe {
            self.device
                .get_query_pool_results(
                    self.query_pool,
                    CALIBRATION_QUERY_INDEX,
                    &mut gpu_tick,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )
                .map_err(map_device_error)?;
            self.device.destroy_fence(fence, None);
            self.device.destroy_command_pool(pool, None);
        }

        Ok((cpu_tick, gpu_tick[0]))
    }

    /// Begins the next ring slot: waits for its fence (recycling the
    /// command buffer from `PROFILE_GPU_FRAME_DELAY` frames ago),
    /// resets the query span it owns, and returns the command buffer
    /// to record timestamp writes into.
    pub fn begin_frame(&mut self) -> Result<vk::CommandBuffer, DeviceError> {
        self.current_frame = (self.current_frame + 1) % PROFILE_GPU_FRAMES;
        let frame = &self.frames[self.current_frame];
        unsafe {
            self.device
                .wait_for_fences(&[frame.fence], true, u64::MAX)
                .map_err(map_device_error)?;
            self.device.reset_fences(&[frame.fence]).map_err(map_device_error)?;
            self.device
                .reset_command_pool(frame.pool, vk::CommandPoolResetFlags::empty())
                .map_err(map_device_error)?;
            self.device
                .cmd_reset_query_pool(frame.buffer, self.query_pool, frame.first_query, frame.query_count);
        }
        self.next_query.store(frame.first_query, Ordering::Relaxed);
        Ok(frame.buffer)
    }

    /// Writes a GPU timestamp into the current frame's query span,
    /// returning the absolute query index for later resolution.
    pub fn write_timestamp(&self, cmd: vk::CommandBuffer) -> u32 {
        let frame = &self.frames[self.current_frame];
        let index = self.next_query.fetch_add(1, Ordering::Relaxed);
        let index = frame.first_query + (index - frame.first_query) % frame.query_count.max(1);
        unsafe {
            self.device
                .cmd_write_timestamp(cmd, vk::PipelineStageFlags::ALL_COMMANDS, self.query_pool, index)
        };
        index
    }

    /// The fence the just-recorded frame should be submitted with, so
    /// [`begin_frame`](Self::begin_frame) knows when it is safe to
    /// recycle this ring slot.
    pub fn current_fence(&self) -> vk::Fence {
        self.frames[self.current_frame].fence
    }

    /// Resolves every GPU tick in `[first, first + count)` and rebases
    /// it onto the CPU tick axis using the startup calibration sample.
    pub fn resolve(&self, first: u32, count: u32) -> Result<Vec<u64>, DeviceError> {
        let mut raw = vec![0u64; count as usize];
        unsafe {
            self.device.get_query_pool_results(
                self.query_pool,
                first,
                &mut raw,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
        .map_err(map_device_error)?;

        let (cpu_ref, gpu_ref) = self.calibration.unwrap_or((0, 0));
        Ok(raw
            .into_iter()
            .map(|gpu_tick| {
                let gpu_ns = (gpu_tick.wrapping_sub(gpu_ref)) as f64 * self.timestamp_period_ns as f64;
                cpu_ref.wrapping_add(gpu_ns as u64)
            })
            .collect())
    }
}

impl Drop for GpuProfiler {
    fn drop(&mut self) {
        unsafe {
            for frame in &self.frames {
                let _ = self.device.wait_for_fences(&[frame.fence], true, u64::MAX);
                self.device.destroy_fence(frame.fence, None);
                self.device.destroy_command_pool(frame.pool, None);
            }
            self.device.destroy_query_pool(self.query_pool, None);
        }
    }
}
