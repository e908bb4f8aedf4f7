//! Query pools: timestamps, occlusion, pipeline statistics, and
//! indirect-draw dispatch (§4.11).

use super::DeviceShared;
use crate::DeviceError;
use ash::vk;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    Timestamp,
    Occlusion,
    PipelineStatistics,
}

/// A typed query pool. Timestamp pools pack a begin/end pair at
/// `(2*i, 2*i+1)` so a single "query index" maps to two underlying
/// Vulkan queries (§4.11 "Timestamp packing").
pub struct QuerySet {
    pub(crate) raw: vk::QueryPool,
    pub(crate) kind: QueryKind,
    pub(crate) count: u32,
    pub(crate) device: Arc<DeviceShared>,
}

/// The 11 pipeline-statistics counters Vulkan exposes, minus
/// tessellation-shader invocations/primitives which this backend never
/// requests (§4.11 "pipeline-statistics subsetting": 11 flags minus
/// tessellation).
fn pipeline_statistics_flags() -> vk::QueryPipelineStatisticFlags {
    vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_VERTICES
        | vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_PRIMITIVES
        | vk::QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::GEOMETRY_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::GEOMETRY_SHADER_PRIMITIVES
        | vk::QueryPipelineStatisticFlags::CLIPPING_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::CLIPPING_PRIMITIVES
        | vk::QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS
        | vk::QueryPipelineStatisticFlags::COMPUTE_SHADER_INVOCATIONS
}

impl QuerySet {
    pub fn new(device: Arc<DeviceShared>, kind: QueryKind, count: u32) -> Result<Self, DeviceError> {
        let (ty, statistics, query_count) = match kind {
            QueryKind::Timestamp => (vk::QueryType::TIMESTAMP, vk::QueryPipelineStatisticFlags::empty(), count * 2),
            QueryKind::Occlusion => (vk::QueryType::OCCLUSION, vk::QueryPipelineStatisticFlags::empty(), count),
            QueryKind::PipelineStatistics => {
                (vk::QueryType::PIPELINE_STATISTICS, pipeline_statistics_flags(), count)
            }
        };
        let info = vk::QueryPoolCreateInfo::default()
            .query_type(ty)
            .query_count(query_count)
            .pipeline_statistics(statistics);
        let raw = unsafe { device.raw.create_query_pool(&info, None) }.map_err(super::map_device_error)?;
        Ok(Self { raw, kind, count, device })
    }

    pub fn reset(&self, cmd: vk::CommandBuffer) {
        let query_count = match self.kind {
            QueryKind::Timestamp => self.count * 2,
            _ => self.count,
        };
        unsafe { self.device.raw.cmd_reset_query_pool(cmd, self.raw, 0, query_count) };
    }

    pub fn write_timestamp_begin(&self, cmd: vk::CommandBuffer, index: u32) {
        debug_assert_eq!(self.kind, QueryKind::Timestamp);
        unsafe {
            self.device.raw.cmd_write_timestamp(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                self.raw,
                index * 2,
            )
        };
    }

    pub fn write_timestamp_end(&self, cmd: vk::CommandBuffer, index: u32) {
        debug_assert_eq!(self.kind, QueryKind::Timestamp);
        unsafe {
            self.device.raw.cmd_write_timestamp(
                cmd,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                self.raw,
                index * 2 + 1,
            )
        };
    }

    pub fn begin(&self, cmd: vk::CommandBuffer, index: u32) {
        unsafe {
            self.device
                .raw
                .cmd_begin_query(cmd, self.raw, index, vk::QueryControlFlags::empty())
        };
    }

    pub fn end(&self, cmd: vk::CommandBuffer, index: u32) {
        unsafe { self.device.raw.cmd_end_query(cmd, self.raw, index) };
    }

    /// `cmdResolveQuery` is a no-op on this backend: results are read
    /// back directly via `vkGetQueryPoolResults` instead of resolving
    /// into a buffer first (§4.11 "no-op cmdResolveQuery").
    pub fn resolve(&self, _cmd: vk::CommandBuffer, _start: u32, _count: u32) {}

    pub fn get_results(&self, first: u32, count: u32) -> Result<Vec<u64>, DeviceError> {
        let query_count = match self.kind {
            QueryKind::Timestamp => count * 2,
            _ => count,
        };
        let mut data = vec![0u64; query_count as usize];
        unsafe {
            self.device.raw.get_query_pool_results(
                self.raw,
                first,
                &mut data,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            )
        }
        .map_err(super::map_device_error)?;
        Ok(data)
    }
}

impl Drop for QuerySet {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_query_pool(self.raw, None) };
    }
}

impl std::fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySet").field("kind", &self.kind).field("count", &self.count).finish()
    }
}

/// One command-signature entry for `executeIndirect` style dispatch:
/// the byte stride between consecutive indirect-argument structures,
/// rounded up to 16 bytes unless the caller asked for a tightly packed
/// layout (§4.11 "Command signature stride rounding").
pub fn command_signature_stride(raw_stride: u32, packed: bool) -> u32 {
    if packed {
        raw_stride
    } else {
        (raw_stride + 15) & !15
    }
}

/// Chooses between the hardware `vkCmdDrawIndirectCount`
/// (KHR-promoted or AMD-extension) and a software loop of plain
/// indirect draws when neither extension is available (§4.11 "Indirect
/// draw dispatch").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndirectCountSupport {
    Khr,
    Amd,
    None,
}

pub fn choose_indirect_count_support(khr: bool, amd: bool) -> IndirectCountSupport {
    if khr {
        IndirectCountSupport::Khr
    } else if amd {
        IndirectCountSupport::Amd
    } else {
        IndirectCountSupport::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_rounds_up_to_16_unless_packed() {
        assert_eq!(command_signature_stride(20, false), 32);
        assert_eq!(command_signature_stride(20, true), 20);
        assert_eq!(command_signature_stride(16, false), 16);
    }

    #[test]
    fn indirect_count_prefers_khr_over_amd() {
        assert_eq!(choose_indirect_count_support(true, true), IndirectCountSupport::Khr);
        assert_eq!(choose_indirect_count_support(false, true), IndirectCountSupport::Amd);
        assert_eq!(choose_indirect_count_support(false, false), IndirectCountSupport::None);
    }
}
