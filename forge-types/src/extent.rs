/// A 3D extent in texels, used for texture dimensions and copy regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
}

/// The extent of a copy/blit region; unlike [`Extent3d`] the third
/// component is always a true depth, never an array-layer count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct CopyExtent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}
