/*! The Forge's Vulkan rendering backend.

This crate is a translation layer over raw Vulkan: it owns device
lifetime, memory allocation, descriptor management, command recording,
pipeline compilation, swapchain presentation, synchronization and
GPU-query profiling hooks. It does not load assets, rasterize fonts,
draw a profiler UI, create windows, or cross-compile shaders — those
are external collaborators.

Only one backend module exists ([`vulkan`]); the [`Api`] trait exists
to keep object lifetimes and error types uniform the way a second
backend would need them to be, not because a second backend is planned
here.
*/

#![warn(trivial_casts, trivial_numeric_casts, unused_extern_crates)]

mod auxil;
pub mod vulkan;

use std::fmt::Debug;

pub use ftypes::{
    CopyExtent, CreationFlags, DescriptorType, DescriptorTypeMask, DownlevelFlags, Extent3d,
    GpuPreset, LoadAction, MemoryUsage, ResourceState, StoreAction, TextureFormat,
    UpdateFrequency, MAX_DESCRIPTOR_SETS,
};

/// Maximum simultaneously bound color render targets (§3 RenderTarget).
pub const MAX_COLOR_ATTACHMENTS: usize = 8;
/// Maximum vertex-input bindings a pipeline may declare (§4.8).
pub const MAX_VERTEX_BINDINGS: usize = 16;
/// Maximum graphics shader stages a pipeline may bind (§4.8: "up to 5").
pub const MAX_GRAPHICS_SHADER_STAGES: usize = 5;
/// `PROFILE_GPU_FRAMES` equivalent ring depth is defined in `forge-profile`;
/// this is the command-buffer ring depth a renderer keeps for its own
/// per-frame resources, independent of that constant.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// How many physical devices participate in this renderer (§4.1 Linked
/// multi-GPU).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuMode {
    Single,
    Linked,
    Unlinked,
}

/// Errors that can surface from device-level operations (§7 taxonomy:
/// "Fatal, non-recoverable" and "Device-lost").
#[derive(Clone, Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("out of host or device memory")]
    OutOfMemory,
    #[error("device lost")]
    Lost,
    #[error("an internal driver error occurred during {0}")]
    Internal(&'static str),
}

/// Errors from swapchain acquire/present (§4.5, §7: "Out-of-date swap
/// chain" is reported via a sentinel everywhere except here, where an
/// explicit error type is more idiomatic than a magic `-1`).
#[derive(Clone, Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("surface is lost")]
    Lost,
    #[error("surface is outdated, needs to be reconfigured")]
    Outdated,
    #[error("surface is occupied by another instance")]
    Other(&'static str),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors from root-signature construction (§4.6).
#[derive(Clone, Debug, thiserror::Error)]
pub enum RootSignatureError {
    #[error("resource `{name}` was declared with conflicting type/register/set across shader stages")]
    ResourceCollision { name: String },
    #[error("update frequency set index {0} exceeds MAX_DESCRIPTOR_SETS")]
    SetIndexOutOfRange(u32),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors from descriptor-set allocation and update (§4.7).
#[derive(Clone, Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor `{0}` does not exist on this root signature")]
    UnknownDescriptor(String),
    #[error("descriptor `{name}` type mismatch: bound as {expected:?}, update tried {actual:?}")]
    TypeMismatch {
        name: String,
        expected: DescriptorType,
        actual: DescriptorType,
    },
    #[error("array index {index} out of bounds (size {size}) for descriptor `{name}`")]
    ArrayIndexOutOfBounds {
        name: String,
        index: u32,
        size: u32,
    },
    #[error("root-cbv descriptor `{0}` cannot be updated through updateDescriptorSet")]
    RootCbvWrongPath(String),
    #[error("mip chain for `{name}` is partial: supplied {provided} views, binding declares {expected}")]
    PartialMipChain {
        name: String,
        provided: u32,
        expected: u32,
    },
    #[error("dynamic range {size} for `{name}` exceeds the device maximum of {max}")]
    RangeTooLarge { name: String, size: u64, max: u64 },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors from pipeline compilation (§4.8).
#[derive(Clone, Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("shader module creation failed for stage {0:?}")]
    ShaderModule(ShaderStage),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Fatal, non-recoverable init errors (§7: "returns a null renderer").
#[derive(Clone, Debug, thiserror::Error)]
pub enum InitError {
    #[error("required instance extension `{0}` is not available")]
    MissingInstanceExtension(&'static str),
    #[error("required device extension `{0}` is not available")]
    MissingDeviceExtension(&'static str),
    #[error("no adapter meets the minimum GPU preset")]
    NoSuitableAdapter,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const TESSELLATION_CONTROL = 1 << 1;
        const TESSELLATION_EVALUATION = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE = 1 << 5;
    }
}

/// The queue class a command pool/buffer and its owning queue are bound
/// to (§3 Queue: "triple (family index, queue index, type)").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// Uniform surface every (eventual) backend would implement; today only
/// [`vulkan::Api`] exists. Associated types keep object ownership and
/// error reporting uniform across the translation layer instead of
/// every module inventing its own handle shape.
pub trait Api: Clone + Sized + Debug {
    type Instance: Debug + Send + Sync;
    type Surface: Debug + Send + Sync;
    type Adapter: Debug + Send + Sync;
    type Device: Debug + Send + Sync;

    type Queue: Debug + Send + Sync;
    type CommandEncoder: Debug + Send;

    type Buffer: Debug + Send + Sync + 'static;
    type Texture: Debug + Send + Sync + 'static;
    type TextureView: Debug + Send + Sync + 'static;
    type Sampler: Debug + Send + Sync + 'static;
    type QuerySet: Debug + Send + Sync + 'static;
    type Fence: Debug + Send + Sync;

    type RootSignature: Debug + Send + Sync + 'static;
    type DescriptorSet: Debug + Send + Sync + 'static;
    type ShaderModule: Debug + Send + Sync + 'static;
    type RenderPipeline: Debug + Send + Sync + 'static;
    type ComputePipeline: Debug + Send + Sync + 'static;
    type PipelineCache: Debug + Send + Sync + 'static;
}
