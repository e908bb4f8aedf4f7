/*! Shared data types for the Forge graphics backend.

These are the plain, API-agnostic descriptors and enums that both the
`forge-hal` backend and the `forge-profile` crate exchange with
application code: texture formats, extents, resource states, descriptor
kinds, and small feature-flag bitsets. Nothing here knows about Vulkan;
the mapping to and from `ash::vk` types lives in `forge-hal`'s
`vulkan::conv` module.
*/

#![warn(trivial_casts, trivial_numeric_casts, unused_extern_crates)]

mod descriptor;
mod extent;
mod features;
mod format;
mod resource_state;

pub use descriptor::{DescriptorType, UpdateFrequency, MAX_DESCRIPTOR_SETS};
pub use extent::{CopyExtent, Extent3d};
pub use features::{DownlevelFlags, GpuPreset};
pub use format::TextureFormat;
pub use resource_state::ResourceState;

/// Memory-usage class for a buffer or texture allocation.
///
/// Mirrors the VMA-style usage classes the memory allocator glue (§4.2)
/// is built around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// Device-local memory only the GPU touches.
    GpuOnly,
    /// Host-visible memory the CPU writes and the GPU reads.
    CpuToGpu,
    /// Host-visible memory the GPU writes and the CPU reads back.
    GpuToCpu,
    /// Host-only memory, never device-local.
    CpuOnly,
}

bitflags::bitflags! {
    /// Buffer/texture creation flags (§3 Buffer, Texture).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CreationFlags: u32 {
        /// Give the resource a dedicated allocation instead of suballocating.
        const OWN_MEMORY = 1 << 0;
        /// Keep the allocation persistently mapped.
        const PERSISTENT_MAP = 1 << 1;
        /// Require host-visible memory.
        const HOST_VISIBLE = 1 << 2;
        /// Require host-coherent memory.
        const HOST_COHERENT = 1 << 3;
        /// Request a shader device address for this buffer.
        const SHADER_DEVICE_ADDRESS = 1 << 4;
        /// Texture is created 2D even if the extent would suggest otherwise.
        const FORCE_2D = 1 << 5;
        /// Texture is created 3D even if the extent would suggest otherwise.
        const FORCE_3D = 1 << 6;
        /// Attach an automatic single-sample resolve render target.
        const CREATE_RESOLVE_ATTACHMENT = 1 << 7;
        /// Texture never leaves on-tile memory (transient attachment).
        const ON_TILE = 1 << 8;
        /// The native handle was imported, not created; do not own it.
        const IMPORT_BIT = 1 << 9;
        /// VR multiview: double the effective array layer count.
        const VR_MULTIVIEW = 1 << 10;
    }
}

bitflags::bitflags! {
    /// Which side of a render-target store action to take (§4.9).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct StoreAction: u8 {
        const STORE = 1 << 0;
        const DONT_CARE = 1 << 1;
        const RESOLVE_STORE = 1 << 2;
        const RESOLVE_DONT_CARE = 1 << 3;
    }
}

/// Load action for a single render-pass attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadAction {
    DontCare,
    Load,
    Clear,
}

/// Per-attachment load/store behavior, keyed together when hashing a
/// render-pass signature (§4.9 `AttachmentKey`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentOps {
    pub load: LoadAction,
    pub store_resolve: StoreAction,
}

impl AttachmentOps {
    pub const fn all() -> Self {
        Self {
            load: LoadAction::Load,
            store_resolve: StoreAction::STORE,
        }
    }
}
