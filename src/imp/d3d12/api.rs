// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The device binding layer.

The driver talks to the GPU through the [Platform], [Device] and [SwapChain] traits instead of
native interfaces.  Objects are named by small copyable handles, and command lists are recorded
as data ([GraphicsCommandList]) and handed to the device when executed, so a binding only has to
translate recorded commands into its native equivalent.

Names and numeric values follow the native API where one exists.
*/

use crate::bittricks::align_up;
use crate::config::FeatureLevel;
use crate::error::{E_FAIL, Error};
use crate::graphics::{Rect, WindowHandle};
use crate::shader_ir::{CompileTarget, SoftwareProgram};
use bitflags::bitflags;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};

pub(crate) use crate::FRAME_COUNT;

/// `D3D12_REQ_TEXTURE2D_U_OR_V_DIMENSION`
pub(crate) const MAX_TEXTURE_DIMENSION: usize = 16384;

/// `D3D12_TEXTURE_DATA_PITCH_ALIGNMENT`
pub(crate) const TEXTURE_DATA_PITCH_ALIGNMENT: u64 = 256;

/// `D3D12_CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT`
pub(crate) const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

macro_rules! handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub(crate) struct $name(pub(crate) u32);
        )*
    };
}

handle! {
    /// A committed resource: buffer or texture.
    ResourceId;
    DescriptorHeapId;
    FenceId;
    CommandAllocatorId;
    RootSignatureId;
    PipelineStateId;
}

bitflags! {
    /// `D3D12_RESOURCE_STATES`
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub(crate) struct ResourceStates: u32 {
        const VERTEX_AND_CONSTANT_BUFFER = 0x1;
        const INDEX_BUFFER = 0x2;
        const RENDER_TARGET = 0x4;
        const DEPTH_WRITE = 0x10;
        const NON_PIXEL_SHADER_RESOURCE = 0x40;
        const PIXEL_SHADER_RESOURCE = 0x80;
        const INDIRECT_ARGUMENT = 0x200;
        const COPY_DEST = 0x400;
        const COPY_SOURCE = 0x800;
        const GENERIC_READ = 0x1 | 0x2 | 0x40 | 0x80 | 0x200 | 0x800;
    }
}

impl ResourceStates {
    /// `D3D12_RESOURCE_STATE_PRESENT`, which is also `COMMON`.
    pub(crate) const PRESENT: Self = Self::empty();
}

bitflags! {
    /// `D3D12_COLOR_WRITE_ENABLE`
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub(crate) struct ColorWriteMask: u8 {
        const RED = 1;
        const GREEN = 2;
        const BLUE = 4;
        const ALPHA = 8;
        const ALL = 1 | 2 | 4 | 8;
    }
}

bitflags! {
    /// `D3D12_RESOURCE_FLAGS`
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub(crate) struct ResourceFlags: u32 {
        const ALLOW_RENDER_TARGET = 0x1;
        const ALLOW_DEPTH_STENCIL = 0x2;
        /// `D3D12_HEAP_FLAG_ALLOW_DISPLAY`, carried here since it's the only heap flag used.
        const ALLOW_DISPLAY = 0x100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum HeapType {
    Default,
    Upload,
    Readback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Format {
    Unknown,
    R8G8B8A8Unorm,
    B8G8R8A8Unorm,
    D24UnormS8Uint,
    R32Uint,
    R32G32Float,
    R32G32B32A32Float,
}

impl Format {
    pub(crate) fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::Unknown => 1,
            Format::R8G8B8A8Unorm
            | Format::B8G8R8A8Unorm
            | Format::D24UnormS8Uint
            | Format::R32Uint => 4,
            Format::R32G32Float => 8,
            Format::R32G32B32A32Float => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ResourceDimension {
    Buffer,
    Texture2D,
}

/// `D3D12_RESOURCE_DESC`, reduced to what 2D rendering uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ResourceDesc {
    pub(crate) dimension: ResourceDimension,
    /// Bytes for a buffer, texels for a texture.
    pub(crate) width: u64,
    pub(crate) height: u32,
    pub(crate) format: Format,
    pub(crate) flags: ResourceFlags,
}

impl ResourceDesc {
    pub(crate) fn buffer(size_in_bytes: u64) -> Self {
        ResourceDesc {
            dimension: ResourceDimension::Buffer,
            width: size_in_bytes,
            height: 1,
            format: Format::Unknown,
            flags: ResourceFlags::empty(),
        }
    }

    pub(crate) fn texture2d(width: u32, height: u32, format: Format, flags: ResourceFlags) -> Self {
        ResourceDesc {
            dimension: ResourceDimension::Texture2D,
            width: width as u64,
            height,
            format,
            flags,
        }
    }
}

/// `D3D12_PLACED_SUBRESOURCE_FOOTPRINT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PlacedFootprint {
    pub(crate) offset: u64,
    pub(crate) format: Format,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) row_pitch: u32,
}

/// `GetCopyableFootprints` for one subresource: the layout and total bytes of a buffer that can
/// hold a copy of a `desc`-shaped texture.
pub(crate) fn copyable_footprint(desc: &ResourceDesc) -> (PlacedFootprint, u64) {
    let row_size = desc.width * desc.format.bytes_per_pixel() as u64;
    let row_pitch = align_up(row_size, TEXTURE_DATA_PITCH_ALIGNMENT);
    let total = if desc.height == 0 {
        0
    } else {
        row_pitch * (desc.height as u64 - 1) + row_size
    };
    (
        PlacedFootprint {
            offset: 0,
            format: desc.format,
            width: desc.width as u32,
            height: desc.height,
            row_pitch: row_pitch as u32,
        },
        total,
    )
}

/// `D3D12_BOX` with `front = 0` and `back = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CopyBox {
    pub(crate) left: u32,
    pub(crate) top: u32,
    pub(crate) right: u32,
    pub(crate) bottom: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TextureCopyLocation {
    Subresource(ResourceId),
    PlacedFootprint(ResourceId, PlacedFootprint),
}

/// A transition barrier over all subresources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ResourceBarrier {
    pub(crate) resource: ResourceId,
    pub(crate) before: ResourceStates,
    pub(crate) after: ResourceStates,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Viewport {
    pub(crate) x: f32,
    pub(crate) y: f32,
    pub(crate) width: f32,
    pub(crate) height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct VertexBufferView {
    pub(crate) location: u64,
    pub(crate) size_in_bytes: u32,
    pub(crate) stride_in_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct IndexBufferView {
    pub(crate) location: u64,
    pub(crate) size_in_bytes: u32,
    pub(crate) format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum DescriptorHeapType {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

/// A descriptor slot, as seen by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CpuDescriptorHandle {
    pub(crate) heap: DescriptorHeapId,
    pub(crate) index: u32,
}

impl CpuDescriptorHandle {
    pub(crate) fn heap_start(heap: DescriptorHeapId) -> Self {
        CpuDescriptorHandle { heap, index: 0 }
    }

    pub(crate) fn offset(self, n: u32) -> Self {
        CpuDescriptorHandle {
            heap: self.heap,
            index: self.index + n,
        }
    }
}

/// A descriptor slot, as seen by shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct GpuDescriptorHandle {
    pub(crate) heap: DescriptorHeapId,
    pub(crate) index: u32,
}

impl GpuDescriptorHandle {
    pub(crate) fn heap_start(heap: DescriptorHeapId) -> Self {
        GpuDescriptorHandle { heap, index: 0 }
    }

    pub(crate) fn offset(self, n: u32) -> Self {
        GpuDescriptorHandle {
            heap: self.heap,
            index: self.index + n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConstantBufferViewDesc {
    pub(crate) location: u64,
    pub(crate) size_in_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Filter {
    MinMagMipPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum AddressMode {
    Wrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ComparisonFunc {
    Never,
    Less,
    NotEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SamplerDesc {
    pub(crate) filter: Filter,
    pub(crate) address_u: AddressMode,
    pub(crate) address_v: AddressMode,
    pub(crate) address_w: AddressMode,
    pub(crate) comparison: ComparisonFunc,
    pub(crate) min_lod: f32,
    pub(crate) max_lod: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum DescriptorRangeType {
    Cbv,
    Srv,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DescriptorRange {
    pub(crate) kind: DescriptorRangeType,
    pub(crate) num_descriptors: u32,
    pub(crate) base_shader_register: u32,
    pub(crate) offset_in_descriptors_from_table_start: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ShaderVisibility {
    All,
    Pixel,
}

/// A root parameter holding one descriptor table with one range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RootParameter {
    pub(crate) range: DescriptorRange,
    pub(crate) visibility: ShaderVisibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RootSignatureDesc {
    pub(crate) parameters: Vec<RootParameter>,
    pub(crate) allow_input_assembler_input_layout: bool,
}

/// `D3D12_BLEND`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BlendValue {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestAlpha,
    InvDestAlpha,
    DestColor,
    InvDestColor,
    SrcAlphaSat,
}

/// `D3D12_BLEND_OP`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BlendOp {
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RenderTargetBlendDesc {
    pub(crate) blend_enable: bool,
    pub(crate) src_blend: BlendValue,
    pub(crate) dest_blend: BlendValue,
    pub(crate) blend_op: BlendOp,
    pub(crate) src_blend_alpha: BlendValue,
    pub(crate) dest_blend_alpha: BlendValue,
    pub(crate) blend_op_alpha: BlendOp,
    pub(crate) write_mask: ColorWriteMask,
}

/// `D3D12_STENCIL_OP`.  `Incr` and `Decr` wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum StencilOp {
    Keep,
    Incr,
    Decr,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DepthStencilOpDesc {
    pub(crate) fail_op: StencilOp,
    pub(crate) depth_fail_op: StencilOp,
    pub(crate) pass_op: StencilOp,
    pub(crate) func: ComparisonFunc,
}

impl DepthStencilOpDesc {
    pub(crate) const KEEP_ALWAYS: Self = DepthStencilOpDesc {
        fail_op: StencilOp::Keep,
        depth_fail_op: StencilOp::Keep,
        pass_op: StencilOp::Keep,
        func: ComparisonFunc::Always,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DepthStencilDesc {
    pub(crate) depth_enable: bool,
    pub(crate) depth_func: ComparisonFunc,
    pub(crate) stencil_enable: bool,
    pub(crate) stencil_read_mask: u8,
    pub(crate) stencil_write_mask: u8,
    pub(crate) front_face: DepthStencilOpDesc,
    pub(crate) back_face: DepthStencilOpDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct InputElementDesc {
    pub(crate) semantic_name: &'static str,
    pub(crate) semantic_index: u32,
    pub(crate) format: Format,
    /// Byte offset within a vertex.
    pub(crate) aligned_byte_offset: u32,
}

/// Vertex and pixel stages for a pipeline.
#[derive(Debug, Clone)]
pub(crate) enum ShaderBytecode {
    Dxbc { vertex: Arc<[u8]>, pixel: Arc<[u8]> },
    /// CPU-executable stages.  The offsets locate each uniform variable in the constant buffer,
    /// in words, the way reflection data would.
    Software {
        program: Arc<dyn SoftwareProgram>,
        uniform_offsets: Arc<[usize]>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct GraphicsPipelineStateDesc {
    pub(crate) root_signature: RootSignatureId,
    pub(crate) shader: ShaderBytecode,
    pub(crate) blend: RenderTargetBlendDesc,
    pub(crate) depth_stencil: DepthStencilDesc,
    pub(crate) input_layout: Vec<InputElementDesc>,
    pub(crate) rtv_format: Format,
    pub(crate) dsv_format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PrimitiveTopology {
    TriangleList,
}

/// One recorded command-list call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ListCommand {
    ResourceBarrier(Vec<ResourceBarrier>),
    CopyTextureRegion {
        dst: TextureCopyLocation,
        dst_x: u32,
        dst_y: u32,
        src: TextureCopyLocation,
        src_box: CopyBox,
    },
    SetGraphicsRootSignature(RootSignatureId),
    SetDescriptorHeaps(Vec<DescriptorHeapId>),
    SetGraphicsRootDescriptorTable {
        parameter: u32,
        base: GpuDescriptorHandle,
    },
    SetPipelineState(PipelineStateId),
    RsSetViewport(Viewport),
    RsSetScissorRect(Rect),
    IaSetPrimitiveTopology(PrimitiveTopology),
    IaSetVertexBuffer(VertexBufferView),
    IaSetIndexBuffer(IndexBufferView),
    OmSetRenderTargets {
        rtv: CpuDescriptorHandle,
        dsv: Option<CpuDescriptorHandle>,
    },
    OmSetStencilRef(u32),
    ClearStencil {
        dsv: CpuDescriptorHandle,
        stencil: u8,
    },
    DrawIndexedInstanced {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
}

/// A command list, recorded on the CPU.
///
/// Lists are created open.  [GraphicsCommandList::close] seals one for execution and
/// [GraphicsCommandList::reset] reopens it against an allocator.
#[derive(Debug)]
pub(crate) struct GraphicsCommandList {
    commands: Vec<ListCommand>,
    allocator: CommandAllocatorId,
    open: bool,
}

fn list_error(what: &str) -> Error {
    Error::Backend {
        code: E_FAIL,
        message: what.to_string(),
    }
}

impl GraphicsCommandList {
    pub(crate) fn new(allocator: CommandAllocatorId) -> Self {
        GraphicsCommandList {
            commands: Vec::new(),
            allocator,
            open: true,
        }
    }

    pub(crate) fn close(&mut self) -> Result<(), Error> {
        if !self.open {
            return Err(list_error("ID3D12GraphicsCommandList::Close on a closed list"));
        }
        self.open = false;
        Ok(())
    }

    pub(crate) fn reset(&mut self, allocator: CommandAllocatorId) -> Result<(), Error> {
        if self.open {
            return Err(list_error("ID3D12GraphicsCommandList::Reset on an open list"));
        }
        self.commands.clear();
        self.allocator = allocator;
        self.open = true;
        Ok(())
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn allocator(&self) -> CommandAllocatorId {
        self.allocator
    }

    pub(crate) fn commands(&self) -> &[ListCommand] {
        &self.commands
    }

    fn record(&mut self, command: ListCommand) {
        debug_assert!(self.open, "recording {command:?} into a closed list");
        self.commands.push(command);
    }

    pub(crate) fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) {
        self.record(ListCommand::ResourceBarrier(barriers.to_vec()));
    }

    pub(crate) fn copy_texture_region(
        &mut self,
        dst: TextureCopyLocation,
        dst_x: u32,
        dst_y: u32,
        src: TextureCopyLocation,
        src_box: CopyBox,
    ) {
        self.record(ListCommand::CopyTextureRegion {
            dst,
            dst_x,
            dst_y,
            src,
            src_box,
        });
    }

    pub(crate) fn set_graphics_root_signature(&mut self, root_signature: RootSignatureId) {
        self.record(ListCommand::SetGraphicsRootSignature(root_signature));
    }

    pub(crate) fn set_descriptor_heaps(&mut self, heaps: &[DescriptorHeapId]) {
        self.record(ListCommand::SetDescriptorHeaps(heaps.to_vec()));
    }

    pub(crate) fn set_graphics_root_descriptor_table(
        &mut self,
        parameter: u32,
        base: GpuDescriptorHandle,
    ) {
        self.record(ListCommand::SetGraphicsRootDescriptorTable { parameter, base });
    }

    pub(crate) fn set_pipeline_state(&mut self, pipeline: PipelineStateId) {
        self.record(ListCommand::SetPipelineState(pipeline));
    }

    pub(crate) fn rs_set_viewport(&mut self, viewport: Viewport) {
        self.record(ListCommand::RsSetViewport(viewport));
    }

    pub(crate) fn rs_set_scissor_rect(&mut self, rect: Rect) {
        self.record(ListCommand::RsSetScissorRect(rect));
    }

    pub(crate) fn ia_set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.record(ListCommand::IaSetPrimitiveTopology(topology));
    }

    pub(crate) fn ia_set_vertex_buffer(&mut self, view: VertexBufferView) {
        self.record(ListCommand::IaSetVertexBuffer(view));
    }

    pub(crate) fn ia_set_index_buffer(&mut self, view: IndexBufferView) {
        self.record(ListCommand::IaSetIndexBuffer(view));
    }

    pub(crate) fn om_set_render_targets(
        &mut self,
        rtv: CpuDescriptorHandle,
        dsv: Option<CpuDescriptorHandle>,
    ) {
        self.record(ListCommand::OmSetRenderTargets { rtv, dsv });
    }

    pub(crate) fn om_set_stencil_ref(&mut self, value: u32) {
        self.record(ListCommand::OmSetStencilRef(value));
    }

    pub(crate) fn clear_stencil(&mut self, dsv: CpuDescriptorHandle, stencil: u8) {
        self.record(ListCommand::ClearStencil { dsv, stencil });
    }

    pub(crate) fn draw_indexed_instanced(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        self.record(ListCommand::DrawIndexedInstanced {
            index_count,
            instance_count,
            start_index,
            base_vertex,
            start_instance,
        });
    }
}

/// A GPU device together with its direct command queue.
pub(crate) trait Device: Send {
    /// The bytecode flavor pipelines on this device are built from.
    fn shader_target(&self) -> CompileTarget;

    fn create_command_allocator(&mut self) -> Result<CommandAllocatorId, Error>;
    fn reset_command_allocator(&mut self, allocator: CommandAllocatorId) -> Result<(), Error>;

    fn create_fence(&mut self) -> Result<FenceId, Error>;
    fn fence_completed_value(&self, fence: FenceId) -> u64;
    /// Blocks until `fence` reaches `value`.
    fn wait_for_fence(&mut self, fence: FenceId, value: u64) -> Result<(), Error>;

    /// Submits a closed list to the queue.
    fn execute_command_list(&mut self, list: &GraphicsCommandList) -> Result<(), Error>;
    /// Queues a fence signal after everything submitted so far.
    fn signal(&mut self, fence: FenceId, value: u64) -> Result<(), Error>;

    fn create_committed_resource(
        &mut self,
        heap: HeapType,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
    ) -> Result<ResourceId, Error>;
    /// Drops one reference.  The resource is destroyed with its last reference.
    fn release_resource(&mut self, resource: ResourceId);
    fn resource_desc(&self, resource: ResourceId) -> Option<ResourceDesc>;
    fn gpu_virtual_address(&self, resource: ResourceId) -> u64;
    /// Maps a CPU-visible resource for the duration of `f`.
    fn map(&mut self, resource: ResourceId, f: &mut dyn FnMut(&mut [u8])) -> Result<(), Error>;

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapType,
        num_descriptors: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapId, Error>;
    fn release_descriptor_heap(&mut self, heap: DescriptorHeapId);
    fn create_render_target_view(&mut self, resource: ResourceId, at: CpuDescriptorHandle);
    fn create_depth_stencil_view(&mut self, resource: ResourceId, at: CpuDescriptorHandle);
    fn create_constant_buffer_view(&mut self, desc: &ConstantBufferViewDesc, at: CpuDescriptorHandle);
    fn create_shader_resource_view(&mut self, resource: ResourceId, at: CpuDescriptorHandle);
    fn create_sampler(&mut self, desc: &SamplerDesc, at: CpuDescriptorHandle);

    fn create_root_signature(&mut self, desc: &RootSignatureDesc)
    -> Result<RootSignatureId, Error>;
    fn create_graphics_pipeline_state(
        &mut self,
        desc: &GraphicsPipelineStateDesc,
    ) -> Result<PipelineStateId, Error>;
    fn release_pipeline_state(&mut self, pipeline: PipelineStateId);

    // Console extensions.  Desktop devices don't have them.

    fn present_x(&mut self, _resource: ResourceId) -> Result<(), Error> {
        Err(Error::Unsupported("PresentX".to_string()))
    }
    fn suspend_x(&mut self) -> Result<(), Error> {
        Err(Error::Unsupported("SuspendX".to_string()))
    }
    fn resume_x(&mut self) -> Result<(), Error> {
        Err(Error::Unsupported("ResumeX".to_string()))
    }
    fn schedule_frame_event_x(&mut self) -> Result<(), Error> {
        Err(Error::Unsupported("ScheduleFrameEventX".to_string()))
    }
    fn wait_frame_event_x(&mut self) -> Result<(), Error> {
        Err(Error::Unsupported("WaitFrameEventX".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SwapChainDesc {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) format: Format,
    pub(crate) buffer_count: u32,
}

pub(crate) trait SwapChain: Send {
    /// Takes a reference to back buffer `index`.  Release it through the device.
    fn buffer(&mut self, index: u32) -> Result<ResourceId, Error>;
    fn current_back_buffer_index(&self) -> usize;
    /// Presents, or only tests presentability when `test`.  Returns whether the output is
    /// occluded.
    fn present(&mut self, sync_interval: u32, test: bool) -> Result<bool, Error>;
    /// Every reference taken with [SwapChain::buffer] must be released first.
    fn resize_buffers(&mut self, buffer_count: u32, width: u32, height: u32)
    -> Result<(), Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AdapterInfo {
    pub(crate) index: u32,
    pub(crate) description: String,
    pub(crate) software: bool,
}

/// App lifecycle notifications on consoles.
///
/// The notification callback sends on `suspending` and then blocks until the driver answers on
/// `suspended`.  `resume` fires when the app comes back.
#[derive(Debug)]
pub(crate) struct AppStateChannels {
    pub(crate) suspending: Receiver<()>,
    pub(crate) suspended: Sender<()>,
    pub(crate) resume: Receiver<()>,
}

/// Factory-level entry points: adapters, devices, swap chains.
pub(crate) trait Platform: Send {
    fn is_xbox(&self) -> bool {
        false
    }
    fn enable_debug_layer(&mut self) -> Result<(), Error>;
    fn warp_adapter(&mut self) -> Result<AdapterInfo, Error>;
    fn adapters(&mut self) -> Result<Vec<AdapterInfo>, Error>;
    /// `None` picks the platform's only adapter, as on consoles.
    fn create_device(
        &mut self,
        adapter: Option<&AdapterInfo>,
        feature_level: FeatureLevel,
    ) -> Result<Box<dyn Device>, Error>;
    fn create_swap_chain(
        &mut self,
        device: &mut dyn Device,
        window: WindowHandle,
        desc: &SwapChainDesc,
    ) -> Result<Box<dyn SwapChain>, Error>;
    fn register_app_state_notification(&mut self) -> Result<AppStateChannels, Error> {
        Err(Error::Unsupported(
            "app state notifications are console-only".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_pitch_is_aligned() {
        let desc = ResourceDesc::texture2d(3, 2, Format::R8G8B8A8Unorm, ResourceFlags::empty());
        let (fp, total) = copyable_footprint(&desc);
        assert_eq!(fp.row_pitch, 256);
        assert_eq!(total, 256 + 12);
        let desc = ResourceDesc::texture2d(64, 4, Format::R8G8B8A8Unorm, ResourceFlags::empty());
        let (fp, total) = copyable_footprint(&desc);
        assert_eq!(fp.row_pitch, 256);
        assert_eq!(total, 1024);
    }

    #[test]
    fn list_open_close_reset() {
        let mut list = GraphicsCommandList::new(CommandAllocatorId(1));
        list.om_set_stencil_ref(0);
        list.close().unwrap();
        assert!(list.close().is_err());
        assert_eq!(list.commands().len(), 1);
        list.reset(CommandAllocatorId(2)).unwrap();
        assert!(list.commands().is_empty());
        assert_eq!(list.allocator(), CommandAllocatorId(2));
        assert!(list.reset(CommandAllocatorId(2)).is_err());
    }

    #[test]
    fn generic_read_covers_copy_source() {
        assert!(ResourceStates::GENERIC_READ.contains(ResourceStates::COPY_SOURCE));
        assert!(ResourceStates::PRESENT.is_empty());
    }
}
