bitflags::bitflags! {
    /// Abstract resource state bitset (§4.10).
    ///
    /// Callers issue explicit barriers between these states; the
    /// backend never infers a transition on its own (Non-goal (c)).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        const UNDEFINED                     = 0;
        const COPY_SRC                      = 1 << 0;
        const COPY_DST                      = 1 << 1;
        const VERTEX_AND_CONSTANT_BUFFER     = 1 << 2;
        const INDEX_BUFFER                  = 1 << 3;
        const UNORDERED_ACCESS               = 1 << 4;
        const INDIRECT_ARGUMENT             = 1 << 5;
        const RENDER_TARGET                 = 1 << 6;
        const DEPTH_WRITE                   = 1 << 7;
        const DEPTH_READ                    = 1 << 8;
        const SHADER_RESOURCE                = 1 << 9;
        const PRESENT                       = 1 << 10;
        const SHADING_RATE_SOURCE            = 1 << 11;
        const ACCELERATION_STRUCTURE_READ     = 1 << 12;
        const ACCELERATION_STRUCTURE_WRITE    = 1 << 13;
        const COMMON                        = 1 << 14;
    }
}

impl ResourceState {
    /// True for the pair of states that make a UAV self-barrier (§4.10):
    /// a flush/invalidate that carries no layout transition.
    pub fn is_uav_self_barrier(current: Self, new: Self) -> bool {
        current == Self::UNORDERED_ACCESS && new == Self::UNORDERED_ACCESS
    }
}
