/// The four fixed update-frequency sets a root signature binds to
/// (§3 Root Signature, Glossary "Update frequency").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum UpdateFrequency {
    None = 0,
    PerFrame = 1,
    PerBatch = 2,
    PerDraw = 3,
}

/// Number of fixed update-frequency sets (0..=3).
pub const MAX_DESCRIPTOR_SETS: usize = 4;

impl UpdateFrequency {
    pub const ALL: [UpdateFrequency; MAX_DESCRIPTOR_SETS] = [
        UpdateFrequency::None,
        UpdateFrequency::PerFrame,
        UpdateFrequency::PerBatch,
        UpdateFrequency::PerDraw,
    ];

    pub fn set_index(self) -> u32 {
        self as u32
    }
}

bitflags::bitflags! {
    /// The descriptor kinds a buffer or texture may be bound as
    /// (§3 Buffer, Texture "descriptor-type bitset").
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DescriptorTypeMask: u32 {
        const UNIFORM_BUFFER            = 1 << 0;
        const STORAGE_BUFFER            = 1 << 1;
        const TEXTURE_SRV               = 1 << 2;
        const TEXTURE_UAV               = 1 << 3;
        const TYPED_BUFFER_SRV          = 1 << 4;
        const TYPED_BUFFER_UAV          = 1 << 5;
        const SAMPLER                   = 1 << 6;
        const INDEX_BUFFER              = 1 << 7;
        const VERTEX_BUFFER             = 1 << 8;
        const INDIRECT_BUFFER           = 1 << 9;
        const ACCELERATION_STRUCTURE     = 1 << 10;
        const SHADER_BINDING_TABLE       = 1 << 11;
        const ROOT_CONSTANT              = 1 << 12;
    }
}

/// A single reflected resource's translated Vulkan-agnostic descriptor
/// kind, used by the root-signature builder to assign `VkDescriptorType`
/// (§4.6 step 3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
    InputAttachment,
    AccelerationStructure,
}
