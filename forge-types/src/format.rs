/// A pixel/block format, independent of any graphics API.
///
/// Answers the handful of capability questions the backend needs
/// (planar-ness, block size, stencil presence) without pulling in a
/// full format-conversion table. The Vulkan-specific `VkFormat`
/// mapping lives in `forge-hal::vulkan::conv`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TextureFormat {
    Undefined,

    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,

    R16Float,
    Rg16Float,
    Rgba16Float,

    R32Uint,
    R32Float,
    Rg32Float,
    Rgba32Float,

    Depth16Unorm,
    Depth24Plus,
    Depth24PlusStencil8,
    Depth32Float,
    Stencil8,

    Astc4x4UnormBlock,
    Astc8x8UnormBlock,

    /// 2-plane 4:2:0 8-bit YCbCr (luma + interleaved chroma).
    Nv12,
    /// 2-plane 4:2:0 10-bit YCbCr.
    P010,
}

impl TextureFormat {
    /// Whether this format is a multi-planar YCbCr format (§4.3:
    /// "on cubemaps, add the cube-compatible flag"; multi-planar adds
    /// the format-list + MUTABLE flag).
    pub fn is_planar(self) -> bool {
        matches!(self, Self::Nv12 | Self::P010)
    }

    /// Number of image planes backing this format.
    pub fn num_planes(self) -> u32 {
        match self {
            Self::Nv12 | Self::P010 => 2,
            _ => 1,
        }
    }

    pub fn is_compressed_astc(self) -> bool {
        matches!(self, Self::Astc4x4UnormBlock | Self::Astc8x8UnormBlock)
    }

    pub fn is_compressed(self) -> bool {
        self.is_compressed_astc()
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Stencil8)
    }

    pub fn has_depth(self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm | Self::Depth24Plus | Self::Depth24PlusStencil8 | Self::Depth32Float
        )
    }

    pub fn is_depth_stencil(self) -> bool {
        self.has_depth() || self.has_stencil()
    }

    /// Bytes per block (1x1 for non-compressed formats).
    pub fn block_size(self) -> u32 {
        match self {
            Self::Undefined => 0,
            Self::R8Unorm | Self::Stencil8 => 1,
            Self::Rg8Unorm | Self::R16Float | Self::Depth16Unorm => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rg16Float
            | Self::R32Uint
            | Self::R32Float
            | Self::Depth24Plus
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float => 8,
            Self::Rgba32Float => 16,
            Self::Astc4x4UnormBlock | Self::Astc8x8UnormBlock => 16,
            // Planar formats report the luma-plane block size; plane
            // layout is handled separately via `num_planes`.
            Self::Nv12 => 1,
            Self::P010 => 2,
        }
    }

    /// Block footprint in texels (1x1 for non-compressed formats).
    pub fn block_dim(self) -> (u32, u32) {
        match self {
            Self::Astc4x4UnormBlock => (4, 4),
            Self::Astc8x8UnormBlock => (8, 8),
            _ => (1, 1),
        }
    }
}
