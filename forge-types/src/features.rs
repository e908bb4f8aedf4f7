bitflags::bitflags! {
    /// Capability bits surfaced on [`crate`]'s `GpuInfo` (§3).
    ///
    /// Reports what this adapter can't do relative to the full
    /// feature set, as a positive capability bitset.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DownlevelFlags: u32 {
        const RAY_TRACING = 1 << 0;
        const DYNAMIC_RENDERING = 1 << 1;
        const DESCRIPTOR_INDEXING = 1 << 2;
        const YCBCR_CONVERSION = 1 << 3;
        const FRAGMENT_SHADER_INTERLOCK = 1 << 4;
        const BUFFER_DEVICE_ADDRESS = 1 << 5;
        const DEVICE_FAULT = 1 << 6;
        const TIMELINE_SEMAPHORE = 1 << 7;
        const DRAW_INDIRECT_COUNT = 1 << 8;
        const MULTIVIEW = 1 << 9;
        const SAMPLE_LOCATIONS = 1 << 10;
        const SUBGROUP_SIZE_CONTROL = 1 << 11;
    }
}

/// Minimum-capability preset level an adapter must clear to be usable
/// (§4.1: "a GPU below the `VERYLOW` preset fails the init").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum GpuPreset {
    None = 0,
    VeryLow = 1,
    Low = 2,
    Medium = 3,
    High = 4,
    Ultra = 5,
}

impl GpuPreset {
    pub const MINIMUM: GpuPreset = GpuPreset::VeryLow;
}
