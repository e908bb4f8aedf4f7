/*! CPU/GPU instrumentation profiler for the Forge graphics runtime.

Three pieces, mirroring `original_source/Common_3/OS/Profiler`'s split
across `ProfilerBase` (token registry, per-thread log, frame flip) and
`ProfilerVulkan` (GPU timestamp ring): [`token`] interns
(group, name) pairs into a stable 64-bit token; [`thread_log`] is the
per-thread lock-free ring every `enter`/`leave`/`meta`/`label` call
writes into; [`frame`] periodically harvests those rings and rolls
per-timer tick aggregates. GPU timestamp binding lives behind the
`vulkan` feature so this crate stays backend-agnostic without it.

This crate does not serve a web UI, dump HTML, or draw an on-screen
overlay — those remain external collaborators.
*/

#![warn(trivial_casts, trivial_numeric_casts, unused_extern_crates)]

mod frame;
mod thread_log;
mod token;

#[cfg(feature = "vulkan")]
pub mod gpu_vulkan;

pub use frame::{flip, CounterFlags, FrameSnapshot, TimerSnapshot};
pub use thread_log::ScopeGuard;
pub use token::{ProfileToken, TokenType};

/// Per-thread ring buffer size in bytes (§4.12 "2 MB SPSC ring").
pub const PROFILE_PER_THREAD_BUFFER_SIZE: usize = 2048 << 10;
/// How many historical frames the display arrays retain.
pub const PROFILE_MAX_FRAME_HISTORY: usize = 512;
/// Upper bound on distinct profiler groups; also the group-mask bit width.
pub const PROFILE_MAX_GROUPS: usize = 48;
/// Upper bound on distinct timers across all groups.
pub const PROFILE_MAX_TIMERS: usize = 1024;
/// Upper bound on threads that may register a per-thread log.
pub const PROFILE_MAX_THREADS: usize = 256;
/// GPU timestamp query-pool size, shared across the ring (§4.12 "GPU
/// timestamp binding").
pub const PROFILE_GPU_MAX_QUERIES: usize = 8 << 10;
/// Frames of latency before a GPU command buffer is recycled.
pub const PROFILE_GPU_FRAME_DELAY: usize = 3;
/// Command-buffer/query-pool ring depth (`PROFILE_GPU_FRAME_DELAY + 1`).
pub const PROFILE_GPU_FRAMES: usize = PROFILE_GPU_FRAME_DELAY + 1;
/// Maximum ENTER nesting depth tracked per thread during a frame flip.
pub const PROFILE_STACK_MAX: usize = 32;
/// Maximum meta-counter slots per timer.
pub const PROFILE_META_MAX: usize = 8;
/// Maximum group/timer name length.
pub const PROFILE_NAME_MAX_LEN: usize = 64;
/// Maximum formatted label length.
pub const PROFILE_LABEL_MAX_LEN: usize = 256;
/// Roll `Accum` into the display `Aggregate` arrays every this many flips.
pub const PROFILE_DEFAULT_AGGREGATE_FLIPS: u32 = 60;

pub use token::{
    find_token, force_disable_group, force_enable_group, get_counter_token, get_group_name,
    get_label_token, get_meta_token, get_token,
};

pub use thread_log::{
    counter_add, counter_set, counter_set_limit, label, label_format, meta_update, scope,
};

/// Registers the calling thread's log and resets the global registry.
/// Idempotent: calling it twice just re-registers the current thread.
pub fn init_profiler() {
    thread_log::ensure_registered();
}

/// Unregisters the calling thread's log. Other threads' logs and the
/// accumulated aggregate tables are untouched (mirrors the original's
/// per-thread, not global, teardown).
pub fn exit_profiler() {
    thread_log::unregister_current();
}

/// Gates whether [`flip`] walks a group's log entries at all (§4.12
/// "added: Group force-enable/disable and pause").
pub fn toggle_pause(paused: bool) {
    frame::set_paused(paused);
}
