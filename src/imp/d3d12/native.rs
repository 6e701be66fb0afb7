// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The binding layer over the Direct3D 12 runtime.

Handles from [super::api] index tables of native objects.  Recorded lists are replayed into one
native command list per allocator when they are executed.
*/

use super::api::{
    AdapterInfo, BlendOp, BlendValue, CommandAllocatorId, ComparisonFunc, ConstantBufferViewDesc,
    CpuDescriptorHandle, DepthStencilOpDesc, DescriptorHeapId, DescriptorHeapType,
    DescriptorRangeType, Device, FenceId, Format, GpuDescriptorHandle, GraphicsCommandList,
    GraphicsPipelineStateDesc, HeapType, ListCommand, PipelineStateId, Platform, ResourceBarrier,
    ResourceDesc, ResourceDimension, ResourceFlags, ResourceId, ResourceStates, RootSignatureDesc,
    RootSignatureId, SamplerDesc, ShaderBytecode, ShaderVisibility, StencilOp, SwapChain,
    SwapChainDesc, TextureCopyLocation,
};
use crate::config::FeatureLevel;
use crate::error::Error;
use crate::graphics::WindowHandle;
use crate::shader_ir::{Bytecode, CompileTarget};
use raw_window_handle::RawWindowHandle;
use std::collections::HashMap;
use std::ffi::{CString, c_void};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use windows::Win32::Foundation::{HANDLE, HWND, RECT};
use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
use windows::Win32::Graphics::Direct3D::{
    D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_12_0,
    D3D_FEATURE_LEVEL_12_1, D3D_FEATURE_LEVEL_12_2, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST, ID3DBlob,
    ID3DInclude,
};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::core::{Interface, PCSTR, s};

fn adapter_info(index: u32, adapter: &IDXGIAdapter1) -> Result<AdapterInfo, Error> {
    let desc = unsafe { adapter.GetDesc1() }?;
    let len = desc
        .Description
        .iter()
        .position(|c| *c == 0)
        .unwrap_or(desc.Description.len());
    Ok(AdapterInfo {
        index,
        description: String::from_utf16_lossy(&desc.Description[..len]),
        software: (DXGI_ADAPTER_FLAG(desc.Flags as i32) & DXGI_ADAPTER_FLAG_SOFTWARE)
            != DXGI_ADAPTER_FLAG_NONE,
    })
}

fn feature_level(level: FeatureLevel) -> D3D_FEATURE_LEVEL {
    match level {
        FeatureLevel::L11_0 => D3D_FEATURE_LEVEL_11_0,
        FeatureLevel::L11_1 => D3D_FEATURE_LEVEL_11_1,
        FeatureLevel::L12_0 => D3D_FEATURE_LEVEL_12_0,
        FeatureLevel::L12_1 => D3D_FEATURE_LEVEL_12_1,
        FeatureLevel::L12_2 => D3D_FEATURE_LEVEL_12_2,
    }
}

fn format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::R32G32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
    }
}

fn states(states: ResourceStates) -> D3D12_RESOURCE_STATES {
    D3D12_RESOURCE_STATES(states.bits() as i32)
}

fn comparison(func: ComparisonFunc) -> D3D12_COMPARISON_FUNC {
    match func {
        ComparisonFunc::Never => D3D12_COMPARISON_FUNC_NEVER,
        ComparisonFunc::Less => D3D12_COMPARISON_FUNC_LESS,
        ComparisonFunc::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        ComparisonFunc::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

fn stencil_op(op: StencilOp) -> D3D12_STENCIL_OP {
    match op {
        StencilOp::Keep => D3D12_STENCIL_OP_KEEP,
        StencilOp::Incr => D3D12_STENCIL_OP_INCR,
        StencilOp::Decr => D3D12_STENCIL_OP_DECR,
        StencilOp::Invert => D3D12_STENCIL_OP_INVERT,
    }
}

fn stencil_face(desc: &DepthStencilOpDesc) -> D3D12_DEPTH_STENCILOP_DESC {
    D3D12_DEPTH_STENCILOP_DESC {
        StencilFailOp: stencil_op(desc.fail_op),
        StencilDepthFailOp: stencil_op(desc.depth_fail_op),
        StencilPassOp: stencil_op(desc.pass_op),
        StencilFunc: comparison(desc.func),
    }
}

fn blend(value: BlendValue) -> D3D12_BLEND {
    match value {
        BlendValue::Zero => D3D12_BLEND_ZERO,
        BlendValue::One => D3D12_BLEND_ONE,
        BlendValue::SrcColor => D3D12_BLEND_SRC_COLOR,
        BlendValue::InvSrcColor => D3D12_BLEND_INV_SRC_COLOR,
        BlendValue::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        BlendValue::InvSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        BlendValue::DestAlpha => D3D12_BLEND_DEST_ALPHA,
        BlendValue::InvDestAlpha => D3D12_BLEND_INV_DEST_ALPHA,
        BlendValue::DestColor => D3D12_BLEND_DEST_COLOR,
        BlendValue::InvDestColor => D3D12_BLEND_INV_DEST_COLOR,
        BlendValue::SrcAlphaSat => D3D12_BLEND_SRC_ALPHA_SAT,
    }
}

fn blend_op(op: BlendOp) -> D3D12_BLEND_OP {
    match op {
        BlendOp::Add => D3D12_BLEND_OP_ADD,
        BlendOp::Subtract => D3D12_BLEND_OP_SUBTRACT,
        BlendOp::RevSubtract => D3D12_BLEND_OP_REV_SUBTRACT,
        BlendOp::Min => D3D12_BLEND_OP_MIN,
        BlendOp::Max => D3D12_BLEND_OP_MAX,
    }
}

fn descriptor_heap_type(kind: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match kind {
        DescriptorHeapType::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorHeapType::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

/// Compiles both stages of an HLSL program with `VSMain` and `PSMain` entry points.
pub(crate) fn compile_hlsl(source: &str) -> Result<Bytecode, Error> {
    let stage = |entry: PCSTR, target: PCSTR| -> Result<Vec<u8>, Error> {
        let mut code: Option<ID3DBlob> = None;
        let mut errors: Option<ID3DBlob> = None;
        let r = unsafe {
            D3DCompile(
                source.as_ptr() as *const c_void,
                source.len(),
                PCSTR::null(),
                None,
                None::<&ID3DInclude>,
                entry,
                target,
                0,
                0,
                &mut code,
                Some(&mut errors),
            )
        };
        if let Err(e) = r {
            let log = errors
                .as_ref()
                .map(|b| String::from_utf8_lossy(blob_bytes(b)).into_owned())
                .unwrap_or_default();
            return Err(Error::Backend {
                code: e.code().0,
                message: format!("D3DCompile: {log}"),
            });
        }
        code.map(|b| blob_bytes(&b).to_vec())
            .ok_or_else(|| Error::Unsupported("D3DCompile returned no bytecode".to_string()))
    };
    Ok(Bytecode::Dxbc {
        vertex: stage(s!("VSMain"), s!("vs_5_0"))?,
        pixel: stage(s!("PSMain"), s!("ps_5_0"))?,
    })
}

struct NativeResource {
    resource: ID3D12Resource,
    desc: ResourceDesc,
    refs: u32,
}

/// Resources, shared between the device and the swap chains that hand out back buffers.
#[derive(Default)]
struct Resources {
    next: u32,
    table: HashMap<ResourceId, NativeResource>,
}

// SAFETY: D3D12 and DXGI objects are free-threaded.
unsafe impl Send for Resources {}

impl Resources {
    fn insert(&mut self, resource: ID3D12Resource, desc: ResourceDesc) -> ResourceId {
        self.next += 1;
        let id = ResourceId(self.next);
        self.table.insert(
            id,
            NativeResource {
                resource,
                desc,
                refs: 1,
            },
        );
        id
    }

    fn get(&self, id: ResourceId) -> Result<&ID3D12Resource, Error> {
        self.table
            .get(&id)
            .map(|r| &r.resource)
            .ok_or_else(|| Error::InvalidArgument(format!("resource {} does not exist", id.0)))
    }
}

/// DXGI factory-level entry points.
pub(crate) struct NativePlatform {
    debug: bool,
    factory: Option<IDXGIFactory4>,
    queue: Option<ID3D12CommandQueue>,
    resources: Arc<Mutex<Resources>>,
}

// SAFETY: D3D12 and DXGI objects are free-threaded.
unsafe impl Send for NativePlatform {}

impl NativePlatform {
    pub(crate) fn new() -> Self {
        NativePlatform {
            debug: false,
            factory: None,
            queue: None,
            resources: Arc::new(Mutex::new(Resources::default())),
        }
    }

    fn factory(&mut self) -> Result<IDXGIFactory4, Error> {
        if let Some(f) = &self.factory {
            return Ok(f.clone());
        }
        let flags = if self.debug {
            DXGI_CREATE_FACTORY_DEBUG
        } else {
            DXGI_CREATE_FACTORY_FLAGS(0)
        };
        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(flags) }?;
        self.factory = Some(factory.clone());
        Ok(factory)
    }
}

impl Platform for NativePlatform {
    fn enable_debug_layer(&mut self) -> Result<(), Error> {
        let mut debug: Option<ID3D12Debug> = None;
        unsafe { D3D12GetDebugInterface(&mut debug) }?;
        let debug = debug.ok_or_else(|| Error::Unsupported("ID3D12Debug".to_string()))?;
        unsafe { debug.EnableDebugLayer() };
        self.debug = true;
        Ok(())
    }

    fn warp_adapter(&mut self) -> Result<AdapterInfo, Error> {
        let adapter: IDXGIAdapter1 = unsafe { self.factory()?.EnumWarpAdapter() }?;
        let mut info = adapter_info(u32::MAX, &adapter)?;
        info.software = true;
        Ok(info)
    }

    fn adapters(&mut self) -> Result<Vec<AdapterInfo>, Error> {
        let factory = self.factory()?;
        let mut all = Vec::new();
        // enumeration ends with DXGI_ERROR_NOT_FOUND
        while let Ok(adapter) = unsafe { factory.EnumAdapters1(all.len() as u32) } {
            all.push(adapter_info(all.len() as u32, &adapter)?);
        }
        Ok(all)
    }

    fn create_device(
        &mut self,
        adapter: Option<&AdapterInfo>,
        level: FeatureLevel,
    ) -> Result<Box<dyn Device>, Error> {
        let factory = self.factory()?;
        let native: IDXGIAdapter1 = match adapter {
            Some(a) if a.software => unsafe { factory.EnumWarpAdapter() }?,
            Some(a) => unsafe { factory.EnumAdapters1(a.index) }?,
            None => unsafe { factory.EnumAdapters1(0) }?,
        };
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&native, feature_level(level), &mut device) }?;
        let device = device.ok_or_else(|| Error::Unsupported("D3D12CreateDevice".to_string()))?;
        let queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }?;
        self.queue = Some(queue.clone());
        Ok(Box::new(NativeDevice {
            device,
            queue,
            resources: self.resources.clone(),
            next: 0,
            allocators: HashMap::new(),
            fences: HashMap::new(),
            heaps: HashMap::new(),
            root_signatures: HashMap::new(),
            pipelines: HashMap::new(),
        }))
    }

    fn create_swap_chain(
        &mut self,
        _device: &mut dyn Device,
        window: WindowHandle,
        desc: &SwapChainDesc,
    ) -> Result<Box<dyn SwapChain>, Error> {
        let RawWindowHandle::Win32(handle) = window.0 else {
            return Err(Error::InvalidArgument(
                "swap chains need a Win32 window".to_string(),
            ));
        };
        let queue = self
            .queue
            .clone()
            .ok_or_else(|| Error::InvalidArgument("no device to present from".to_string()))?;
        let hwnd = HWND(handle.hwnd.get() as *mut c_void);
        let swap_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: format(desc.format),
            BufferCount: desc.buffer_count,
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };
        let swap_chain: IDXGISwapChain3 = unsafe {
            self.factory()?
                .CreateSwapChainForHwnd(&queue, hwnd, &swap_desc, None, None)
        }?
        .cast()?;
        Ok(Box::new(NativeSwapChain {
            swap_chain,
            resources: self.resources.clone(),
            format: desc.format,
            width: desc.width,
            height: desc.height,
        }))
    }
}

struct Allocator {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
}

struct Heap {
    heap: ID3D12DescriptorHeap,
    increment: u32,
    shader_visible: bool,
}

pub(crate) struct NativeDevice {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    resources: Arc<Mutex<Resources>>,
    next: u32,
    allocators: HashMap<CommandAllocatorId, Allocator>,
    fences: HashMap<FenceId, ID3D12Fence>,
    heaps: HashMap<DescriptorHeapId, Heap>,
    root_signatures: HashMap<RootSignatureId, ID3D12RootSignature>,
    pipelines: HashMap<PipelineStateId, ID3D12PipelineState>,
}

// SAFETY: D3D12 objects are free-threaded.
unsafe impl Send for NativeDevice {}

impl NativeDevice {
    fn handle(&mut self) -> u32 {
        self.next += 1;
        self.next
    }

    fn cpu_handle(&self, at: CpuDescriptorHandle) -> Option<D3D12_CPU_DESCRIPTOR_HANDLE> {
        let heap = self.heaps.get(&at.heap)?;
        let start = unsafe { heap.heap.GetCPUDescriptorHandleForHeapStart() };
        Some(D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + (at.index * heap.increment) as usize,
        })
    }

    fn gpu_handle(&self, at: GpuDescriptorHandle) -> Option<D3D12_GPU_DESCRIPTOR_HANDLE> {
        let heap = self.heaps.get(&at.heap).filter(|h| h.shader_visible)?;
        let start = unsafe { heap.heap.GetGPUDescriptorHandleForHeapStart() };
        Some(D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + (at.index * heap.increment) as u64,
        })
    }

    fn missing(what: &str) -> Error {
        Error::InvalidArgument(format!("{what} does not exist"))
    }

    fn copy_location(
        resources: &Resources,
        location: &TextureCopyLocation,
    ) -> Result<D3D12_TEXTURE_COPY_LOCATION, Error> {
        Ok(match location {
            TextureCopyLocation::Subresource(id) => D3D12_TEXTURE_COPY_LOCATION {
                pResource: unsafe { std::mem::transmute_copy(resources.get(*id)?) },
                Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    SubresourceIndex: 0,
                },
            },
            TextureCopyLocation::PlacedFootprint(id, footprint) => D3D12_TEXTURE_COPY_LOCATION {
                pResource: unsafe { std::mem::transmute_copy(resources.get(*id)?) },
                Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                        Offset: footprint.offset,
                        Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                            Format: format(footprint.format),
                            Width: footprint.width,
                            Height: footprint.height,
                            Depth: 1,
                            RowPitch: footprint.row_pitch,
                        },
                    },
                },
            },
        })
    }

    fn barrier(
        resources: &Resources,
        barrier: &ResourceBarrier,
    ) -> Result<D3D12_RESOURCE_BARRIER, Error> {
        Ok(D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    pResource: unsafe { std::mem::transmute_copy(resources.get(barrier.resource)?) },
                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                    StateBefore: states(barrier.before),
                    StateAfter: states(barrier.after),
                }),
            },
        })
    }

    /// Translates one recorded call onto `list`.
    fn replay(
        &self,
        resources: &Resources,
        list: &ID3D12GraphicsCommandList,
        command: &ListCommand,
    ) -> Result<(), Error> {
        match command {
            ListCommand::ResourceBarrier(barriers) => {
                let native = barriers
                    .iter()
                    .map(|b| Self::barrier(resources, b))
                    .collect::<Result<Vec<_>, _>>()?;
                unsafe { list.ResourceBarrier(&native) };
            }
            ListCommand::CopyTextureRegion {
                dst,
                dst_x,
                dst_y,
                src,
                src_box,
            } => {
                let dst = Self::copy_location(resources, dst)?;
                let src = Self::copy_location(resources, src)?;
                let src_box = D3D12_BOX {
                    left: src_box.left,
                    top: src_box.top,
                    front: 0,
                    right: src_box.right,
                    bottom: src_box.bottom,
                    back: 1,
                };
                unsafe { list.CopyTextureRegion(&dst, *dst_x, *dst_y, 0, &src, Some(&src_box)) };
            }
            ListCommand::SetGraphicsRootSignature(id) => {
                let rs = self
                    .root_signatures
                    .get(id)
                    .ok_or_else(|| Self::missing("root signature"))?;
                unsafe { list.SetGraphicsRootSignature(rs) };
            }
            ListCommand::SetDescriptorHeaps(ids) => {
                let heaps = ids
                    .iter()
                    .map(|id| {
                        self.heaps
                            .get(id)
                            .map(|h| Some(h.heap.clone()))
                            .ok_or_else(|| Self::missing("descriptor heap"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                unsafe { list.SetDescriptorHeaps(&heaps) };
            }
            ListCommand::SetGraphicsRootDescriptorTable { parameter, base } => {
                let base = self
                    .gpu_handle(*base)
                    .ok_or_else(|| Self::missing("shader-visible descriptor heap"))?;
                unsafe { list.SetGraphicsRootDescriptorTable(*parameter, base) };
            }
            ListCommand::SetPipelineState(id) => {
                let pso = self
                    .pipelines
                    .get(id)
                    .ok_or_else(|| Self::missing("pipeline state"))?;
                unsafe { list.SetPipelineState(pso) };
            }
            ListCommand::RsSetViewport(v) => unsafe {
                list.RSSetViewports(&[D3D12_VIEWPORT {
                    TopLeftX: v.x,
                    TopLeftY: v.y,
                    Width: v.width,
                    Height: v.height,
                    MinDepth: 0.0,
                    MaxDepth: 1.0,
                }])
            },
            ListCommand::RsSetScissorRect(r) => unsafe {
                list.RSSetScissorRects(&[RECT {
                    left: r.min_x,
                    top: r.min_y,
                    right: r.max_x,
                    bottom: r.max_y,
                }])
            },
            ListCommand::IaSetPrimitiveTopology(_) => unsafe {
                list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST)
            },
            ListCommand::IaSetVertexBuffer(view) => unsafe {
                list.IASetVertexBuffers(
                    0,
                    Some(&[D3D12_VERTEX_BUFFER_VIEW {
                        BufferLocation: view.location,
                        SizeInBytes: view.size_in_bytes,
                        StrideInBytes: view.stride_in_bytes,
                    }]),
                )
            },
            ListCommand::IaSetIndexBuffer(view) => {
                let view = D3D12_INDEX_BUFFER_VIEW {
                    BufferLocation: view.location,
                    SizeInBytes: view.size_in_bytes,
                    Format: format(view.format),
                };
                unsafe { list.IASetIndexBuffer(Some(&view)) };
            }
            ListCommand::OmSetRenderTargets { rtv, dsv } => {
                let rtv = self
                    .cpu_handle(*rtv)
                    .ok_or_else(|| Self::missing("render target view"))?;
                let dsv = match dsv {
                    Some(d) => Some(
                        self.cpu_handle(*d)
                            .ok_or_else(|| Self::missing("depth stencil view"))?,
                    ),
                    None => None,
                };
                unsafe {
                    list.OMSetRenderTargets(
                        1,
                        Some(&rtv),
                        false,
                        dsv.as_ref().map(|d| d as *const _),
                    )
                };
            }
            ListCommand::OmSetStencilRef(value) => unsafe { list.OMSetStencilRef(*value) },
            ListCommand::ClearStencil { dsv, stencil } => {
                let dsv = self
                    .cpu_handle(*dsv)
                    .ok_or_else(|| Self::missing("depth stencil view"))?;
                unsafe { list.ClearDepthStencilView(dsv, D3D12_CLEAR_FLAG_STENCIL, 1.0, *stencil, None) };
            }
            ListCommand::DrawIndexedInstanced {
                index_count,
                instance_count,
                start_index,
                base_vertex,
                start_instance,
            } => unsafe {
                list.DrawIndexedInstanced(
                    *index_count,
                    *instance_count,
                    *start_index,
                    *base_vertex,
                    *start_instance,
                )
            },
        }
        Ok(())
    }
}

impl Device for NativeDevice {
    fn shader_target(&self) -> CompileTarget {
        CompileTarget::Dxbc
    }

    fn create_command_allocator(&mut self) -> Result<CommandAllocatorId, Error> {
        let allocator: ID3D12CommandAllocator =
            unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }?;
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                &allocator,
                None::<&ID3D12PipelineState>,
            )
        }?;
        // reopened against the allocator each time a recording is replayed
        unsafe { list.Close() }?;
        let id = CommandAllocatorId(self.handle());
        self.allocators.insert(id, Allocator { allocator, list });
        Ok(id)
    }

    fn reset_command_allocator(&mut self, allocator: CommandAllocatorId) -> Result<(), Error> {
        let a = self
            .allocators
            .get(&allocator)
            .ok_or_else(|| Self::missing("command allocator"))?;
        unsafe { a.allocator.Reset() }?;
        Ok(())
    }

    fn create_fence(&mut self) -> Result<FenceId, Error> {
        let fence: ID3D12Fence = unsafe { self.device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }?;
        let id = FenceId(self.handle());
        self.fences.insert(id, fence);
        Ok(id)
    }

    fn fence_completed_value(&self, fence: FenceId) -> u64 {
        self.fences
            .get(&fence)
            .map(|f| unsafe { f.GetCompletedValue() })
            .unwrap_or(0)
    }

    fn wait_for_fence(&mut self, fence: FenceId, value: u64) -> Result<(), Error> {
        let f = self.fences.get(&fence).ok_or_else(|| Self::missing("fence"))?;
        if unsafe { f.GetCompletedValue() } >= value {
            return Ok(());
        }
        // a null event makes the call block until the fence is reached
        unsafe { f.SetEventOnCompletion(value, HANDLE::default()) }?;
        Ok(())
    }

    fn execute_command_list(&mut self, list: &GraphicsCommandList) -> Result<(), Error> {
        if list.is_open() {
            return Err(Error::InvalidArgument(
                "ExecuteCommandLists with an open list".to_string(),
            ));
        }
        let a = self
            .allocators
            .get(&list.allocator())
            .ok_or_else(|| Self::missing("command allocator"))?;
        let native = a.list.clone();
        unsafe { native.Reset(&a.allocator, None::<&ID3D12PipelineState>) }?;
        let replayed = {
            let resources = self.resources.lock().unwrap();
            list.commands()
                .iter()
                .try_for_each(|c| self.replay(&resources, &native, c))
        };
        // a native list must be closed before it can be reset again
        unsafe { native.Close() }?;
        replayed?;
        unsafe {
            self.queue
                .ExecuteCommandLists(&[Some(native.cast::<ID3D12CommandList>()?)])
        };
        Ok(())
    }

    fn signal(&mut self, fence: FenceId, value: u64) -> Result<(), Error> {
        let f = self.fences.get(&fence).ok_or_else(|| Self::missing("fence"))?;
        unsafe { self.queue.Signal(f, value) }?;
        Ok(())
    }

    fn create_committed_resource(
        &mut self,
        heap: HeapType,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
    ) -> Result<ResourceId, Error> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: match heap {
                HeapType::Default => D3D12_HEAP_TYPE_DEFAULT,
                HeapType::Upload => D3D12_HEAP_TYPE_UPLOAD,
                HeapType::Readback => D3D12_HEAP_TYPE_READBACK,
            },
            ..Default::default()
        };
        let heap_flags = if desc.flags.contains(ResourceFlags::ALLOW_DISPLAY) {
            D3D12_HEAP_FLAG_ALLOW_DISPLAY
        } else {
            D3D12_HEAP_FLAG_NONE
        };
        let resource_flags = D3D12_RESOURCE_FLAGS(
            (desc.flags - ResourceFlags::ALLOW_DISPLAY).bits() as i32,
        );
        let native_desc = match desc.dimension {
            ResourceDimension::Buffer => D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
                Width: desc.width,
                Height: 1,
                DepthOrArraySize: 1,
                MipLevels: 1,
                Format: DXGI_FORMAT_UNKNOWN,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
                Flags: resource_flags,
                ..Default::default()
            },
            ResourceDimension::Texture2D => D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                Width: desc.width,
                Height: desc.height,
                DepthOrArraySize: 1,
                MipLevels: 1,
                Format: format(desc.format),
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
                Flags: resource_flags,
                ..Default::default()
            },
        };
        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap_props,
                heap_flags,
                &native_desc,
                states(initial_state),
                None,
                &mut resource,
            )
        }?;
        let resource = resource.ok_or(Error::OutOfMemory("committed resource"))?;
        Ok(self.resources.lock().unwrap().insert(resource, *desc))
    }

    fn release_resource(&mut self, resource: ResourceId) {
        let mut resources = self.resources.lock().unwrap();
        match resources.table.get_mut(&resource) {
            Some(r) if r.refs > 1 => r.refs -= 1,
            Some(_) => {
                resources.table.remove(&resource);
            }
            None => logwise::warn_sync!(
                "release of unknown resource {id}",
                id = logwise::privacy::LogIt(&resource.0)
            ),
        }
    }

    fn resource_desc(&self, resource: ResourceId) -> Option<ResourceDesc> {
        self.resources
            .lock()
            .unwrap()
            .table
            .get(&resource)
            .map(|r| r.desc)
    }

    fn gpu_virtual_address(&self, resource: ResourceId) -> u64 {
        self.resources
            .lock()
            .unwrap()
            .table
            .get(&resource)
            .map(|r| unsafe { r.resource.GetGPUVirtualAddress() })
            .unwrap_or(0)
    }

    fn map(&mut self, resource: ResourceId, f: &mut dyn FnMut(&mut [u8])) -> Result<(), Error> {
        let resources = self.resources.lock().unwrap();
        let r = resources
            .table
            .get(&resource)
            .ok_or_else(|| Self::missing("resource"))?;
        if r.desc.dimension != ResourceDimension::Buffer {
            return Err(Error::InvalidArgument("only buffers can be mapped".to_string()));
        }
        let mut data: *mut c_void = std::ptr::null_mut();
        unsafe { r.resource.Map(0, None, Some(&mut data)) }?;
        // SAFETY: a mapped buffer spans its whole width until `Unmap`.
        let bytes = unsafe { std::slice::from_raw_parts_mut(data as *mut u8, r.desc.width as usize) };
        f(bytes);
        unsafe { r.resource.Unmap(0, None) };
        Ok(())
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapType,
        num_descriptors: u32,
        shader_visible: bool,
    ) -> Result<DescriptorHeapId, Error> {
        let native_kind = descriptor_heap_type(kind);
        let heap: ID3D12DescriptorHeap = unsafe {
            self.device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: native_kind,
                NumDescriptors: num_descriptors,
                Flags: if shader_visible {
                    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                } else {
                    D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                },
                NodeMask: 0,
            })
        }?;
        let increment = unsafe { self.device.GetDescriptorHandleIncrementSize(native_kind) };
        let id = DescriptorHeapId(self.handle());
        self.heaps.insert(
            id,
            Heap {
                heap,
                increment,
                shader_visible,
            },
        );
        Ok(id)
    }

    fn release_descriptor_heap(&mut self, heap: DescriptorHeapId) {
        self.heaps.remove(&heap);
    }

    fn create_render_target_view(&mut self, resource: ResourceId, at: CpuDescriptorHandle) {
        let resources = self.resources.lock().unwrap();
        if let (Ok(r), Some(at)) = (resources.get(resource), self.cpu_handle(at)) {
            unsafe { self.device.CreateRenderTargetView(r, None, at) };
        }
    }

    fn create_depth_stencil_view(&mut self, resource: ResourceId, at: CpuDescriptorHandle) {
        let resources = self.resources.lock().unwrap();
        if let (Ok(r), Some(at)) = (resources.get(resource), self.cpu_handle(at)) {
            unsafe { self.device.CreateDepthStencilView(r, None, at) };
        }
    }

    fn create_constant_buffer_view(&mut self, desc: &ConstantBufferViewDesc, at: CpuDescriptorHandle) {
        if let Some(at) = self.cpu_handle(at) {
            let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                BufferLocation: desc.location,
                SizeInBytes: desc.size_in_bytes,
            };
            unsafe { self.device.CreateConstantBufferView(Some(&desc), at) };
        }
    }

    fn create_shader_resource_view(&mut self, resource: ResourceId, at: CpuDescriptorHandle) {
        let resources = self.resources.lock().unwrap();
        if let (Ok(r), Some(at)) = (resources.get(resource), self.cpu_handle(at)) {
            unsafe { self.device.CreateShaderResourceView(r, None, at) };
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc, at: CpuDescriptorHandle) {
        if let Some(at) = self.cpu_handle(at) {
            let desc = D3D12_SAMPLER_DESC {
                Filter: D3D12_FILTER_MIN_MAG_MIP_POINT,
                AddressU: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
                AddressV: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
                AddressW: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
                ComparisonFunc: comparison(desc.comparison),
                MinLOD: desc.min_lod,
                MaxLOD: desc.max_lod,
                ..Default::default()
            };
            unsafe { self.device.CreateSampler(&desc, at) };
        }
    }

    fn create_root_signature(
        &mut self,
        desc: &RootSignatureDesc,
    ) -> Result<RootSignatureId, Error> {
        let ranges: Vec<D3D12_DESCRIPTOR_RANGE> = desc
            .parameters
            .iter()
            .map(|p| D3D12_DESCRIPTOR_RANGE {
                RangeType: match p.range.kind {
                    DescriptorRangeType::Cbv => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
                    DescriptorRangeType::Srv => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
                    DescriptorRangeType::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
                },
                NumDescriptors: p.range.num_descriptors,
                BaseShaderRegister: p.range.base_shader_register,
                RegisterSpace: 0,
                OffsetInDescriptorsFromTableStart: p.range.offset_in_descriptors_from_table_start,
            })
            .collect();
        let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
            .parameters
            .iter()
            .zip(ranges.iter())
            .map(|(p, range)| D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                        NumDescriptorRanges: 1,
                        pDescriptorRanges: range,
                    },
                },
                ShaderVisibility: match p.visibility {
                    ShaderVisibility::All => D3D12_SHADER_VISIBILITY_ALL,
                    ShaderVisibility::Pixel => D3D12_SHADER_VISIBILITY_PIXEL,
                },
            })
            .collect();
        let native = D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: parameters.len() as u32,
            pParameters: parameters.as_ptr(),
            Flags: if desc.allow_input_assembler_input_layout {
                D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
            } else {
                D3D12_ROOT_SIGNATURE_FLAG_NONE
            },
            ..Default::default()
        };
        let mut blob: Option<ID3DBlob> = None;
        let mut errors: Option<ID3DBlob> = None;
        let serialized = unsafe {
            D3D12SerializeRootSignature(
                &native,
                D3D_ROOT_SIGNATURE_VERSION_1,
                &mut blob,
                Some(&mut errors),
            )
        };
        if let Err(e) = serialized {
            let log = errors
                .as_ref()
                .map(|b| String::from_utf8_lossy(blob_bytes(b)).into_owned())
                .unwrap_or_default();
            return Err(Error::Backend {
                code: e.code().0,
                message: format!("D3D12SerializeRootSignature: {log}"),
            });
        }
        let blob = blob.ok_or_else(|| Self::missing("serialized root signature"))?;
        let rs: ID3D12RootSignature =
            unsafe { self.device.CreateRootSignature(0, blob_bytes(&blob)) }?;
        let id = RootSignatureId(self.handle());
        self.root_signatures.insert(id, rs);
        Ok(id)
    }

    fn create_graphics_pipeline_state(
        &mut self,
        desc: &GraphicsPipelineStateDesc,
    ) -> Result<PipelineStateId, Error> {
        let ShaderBytecode::Dxbc { vertex, pixel } = &desc.shader else {
            return Err(Error::Unsupported(
                "hardware devices need DXBC bytecode".to_string(),
            ));
        };
        let rs = self
            .root_signatures
            .get(&desc.root_signature)
            .ok_or_else(|| Self::missing("root signature"))?;

        let names = desc
            .input_layout
            .iter()
            .map(|e| CString::new(e.semantic_name))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
            .input_layout
            .iter()
            .zip(names.iter())
            .map(|(e, name)| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(name.as_ptr() as *const u8),
                SemanticIndex: e.semantic_index,
                Format: format(e.format),
                InputSlot: 0,
                AlignedByteOffset: e.aligned_byte_offset,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect();

        let b = &desc.blend;
        let mut render_targets = [D3D12_RENDER_TARGET_BLEND_DESC::default(); 8];
        render_targets[0] = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: b.blend_enable.into(),
            LogicOpEnable: false.into(),
            SrcBlend: blend(b.src_blend),
            DestBlend: blend(b.dest_blend),
            BlendOp: blend_op(b.blend_op),
            SrcBlendAlpha: blend(b.src_blend_alpha),
            DestBlendAlpha: blend(b.dest_blend_alpha),
            BlendOpAlpha: blend_op(b.blend_op_alpha),
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: b.write_mask.bits(),
        };
        let ds = &desc.depth_stencil;
        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        rtv_formats[0] = format(desc.rtv_format);

        let native = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            // SAFETY: borrowed for the call; the root signature outlives it.
            pRootSignature: unsafe { std::mem::transmute_copy(rs) },
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: vertex.as_ptr() as *const c_void,
                BytecodeLength: vertex.len(),
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: pixel.as_ptr() as *const c_void,
                BytecodeLength: pixel.len(),
            },
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: render_targets,
            },
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: D3D12_CULL_MODE_NONE,
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: ds.depth_enable.into(),
                DepthWriteMask: D3D12_DEPTH_WRITE_MASK_ZERO,
                DepthFunc: comparison(ds.depth_func),
                StencilEnable: ds.stencil_enable.into(),
                StencilReadMask: ds.stencil_read_mask,
                StencilWriteMask: ds.stencil_write_mask,
                FrontFace: stencil_face(&ds.front_face),
                BackFace: stencil_face(&ds.back_face),
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: elements.as_ptr(),
                NumElements: elements.len() as u32,
            },
            PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            NumRenderTargets: 1,
            RTVFormats: rtv_formats,
            DSVFormat: format(desc.dsv_format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };
        let pso: ID3D12PipelineState = unsafe { self.device.CreateGraphicsPipelineState(&native) }?;
        let id = PipelineStateId(self.handle());
        self.pipelines.insert(id, pso);
        Ok(id)
    }

    fn release_pipeline_state(&mut self, pipeline: PipelineStateId) {
        self.pipelines.remove(&pipeline);
    }
}

pub(crate) struct NativeSwapChain {
    swap_chain: IDXGISwapChain3,
    resources: Arc<Mutex<Resources>>,
    format: Format,
    width: u32,
    height: u32,
}

// SAFETY: DXGI objects are free-threaded.
unsafe impl Send for NativeSwapChain {}

impl SwapChain for NativeSwapChain {
    fn buffer(&mut self, index: u32) -> Result<ResourceId, Error> {
        let buffer: ID3D12Resource = unsafe { self.swap_chain.GetBuffer(index) }?;
        let desc = ResourceDesc::texture2d(
            self.width,
            self.height,
            self.format,
            ResourceFlags::ALLOW_RENDER_TARGET,
        );
        Ok(self.resources.lock().unwrap().insert(buffer, desc))
    }

    fn current_back_buffer_index(&self) -> usize {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() as usize }
    }

    fn present(&mut self, sync_interval: u32, test: bool) -> Result<bool, Error> {
        let flags = if test {
            DXGI_PRESENT_TEST
        } else {
            DXGI_PRESENT(0)
        };
        let hr = unsafe { self.swap_chain.Present(sync_interval, flags) };
        if hr == DXGI_STATUS_OCCLUDED {
            return Ok(true);
        }
        hr.ok()?;
        Ok(false)
    }

    fn resize_buffers(&mut self, buffer_count: u32, width: u32, height: u32) -> Result<(), Error> {
        unsafe {
            self.swap_chain.ResizeBuffers(
                buffer_count,
                width,
                height,
                DXGI_FORMAT_UNKNOWN,
                DXGI_SWAP_CHAIN_FLAG(0),
            )
        }?;
        self.width = width;
        self.height = height;
        Ok(())
    }
}
