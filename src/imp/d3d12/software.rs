// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A CPU implementation of the device binding.

Command lists execute immediately when submitted, so fences complete as soon as they are
signaled.  Resources live in host memory; GPU virtual addresses encode the resource in the high
32 bits and the byte offset in the low 32.

With the debug layer enabled, the device validates resource states the way the native debug
layer does: a transition barrier must name the state the resource is actually in, and draws and
copies must find their resources in the states they require.  Violations fail with
`DXGI_ERROR_INVALID_CALL`.

The same device can pose as a console, with `PresentX`, frame events and suspend/resume.
*/

use super::api::{
    AdapterInfo, AddressMode, AppStateChannels, CommandAllocatorId, ConstantBufferViewDesc,
    CopyBox, CpuDescriptorHandle, DescriptorHeapId, DescriptorHeapType, DescriptorRangeType,
    Device, FenceId, Format, GraphicsCommandList, GraphicsPipelineStateDesc, HeapType,
    ListCommand, MAX_TEXTURE_DIMENSION, Platform, PipelineStateId, ResourceBarrier, ResourceDesc,
    ResourceDimension, ResourceId, ResourceStates, RootSignatureDesc, RootSignatureId,
    SamplerDesc, ShaderBytecode, SwapChain, SwapChainDesc, TextureCopyLocation, Viewport,
    VertexBufferView, IndexBufferView, GpuDescriptorHandle,
};
use super::raster::{self, ColorTarget, RasterState, RasterVertex, StencilTarget};
use crate::config::FeatureLevel;
use crate::error::{DEVICE_REMOVED, DXGI_ERROR_INVALID_CALL, E_FAIL, E_INVALIDARG, Error};
use crate::graphics::{Rect, WindowHandle};
use crate::shader_ir::{CompileTarget, Constants, Sampler, Varyings};
use crate::uniforms::PROJECTION_MATRIX_INDEX;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// How DXGI names the WARP adapter.
const WARP_DESCRIPTION: &str = "Microsoft Basic Render Driver";

fn invalid_call(message: impl Into<String>) -> Error {
    Error::from_hresult(DXGI_ERROR_INVALID_CALL, message)
}

fn device_removed() -> Error {
    Error::from_hresult(DEVICE_REMOVED, "the device was removed")
}

#[derive(Debug)]
struct Resource {
    heap: HeapType,
    desc: ResourceDesc,
    data: Vec<u8>,
    state: ResourceStates,
    refs: u32,
}

impl Resource {
    fn row_pitch(&self) -> usize {
        self.desc.width as usize * self.desc.format.bytes_per_pixel() as usize
    }

    fn is_texture(&self) -> bool {
        self.desc.dimension == ResourceDimension::Texture2D
    }

    /// The texture as tightly packed RGBA8.
    fn rgba_pixels(&self) -> Vec<u8> {
        let mut pixels = self.data.clone();
        if self.desc.format == Format::B8G8R8A8Unorm {
            for px in pixels.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }
        pixels
    }
}

#[derive(Debug, Clone, Copy)]
enum Descriptor {
    Empty,
    RenderTarget(ResourceId),
    DepthStencil(ResourceId),
    ConstantBuffer(ConstantBufferViewDesc),
    ShaderResource(ResourceId),
    Sampler(AddressMode),
}

#[derive(Debug)]
struct DescriptorHeap {
    kind: DescriptorHeapType,
    descriptors: Vec<Descriptor>,
}

/// A presented image, as RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) pixels: Vec<u8>,
}

#[derive(Debug, Default)]
#[cfg_attr(not(test), allow(dead_code))]
struct Counters {
    presents: usize,
    allocator_resets: usize,
    executed_lists: usize,
    suspends: usize,
    resumes: usize,
    frame_events: usize,
}

/// Pipeline state bound while a list executes.
#[derive(Debug, Default)]
struct ExecState {
    root_signature: Option<RootSignatureId>,
    tables: Vec<Option<GpuDescriptorHandle>>,
    pipeline: Option<PipelineStateId>,
    viewport: Option<Viewport>,
    scissor: Option<Rect>,
    vertex_buffer: Option<VertexBufferView>,
    index_buffer: Option<IndexBufferView>,
    rtv: Option<CpuDescriptorHandle>,
    dsv: Option<CpuDescriptorHandle>,
    stencil_ref: u8,
}

/// A texture region addressed for copying.
#[derive(Debug, Clone, Copy)]
struct CopySpan {
    resource: ResourceId,
    offset: usize,
    row_pitch: usize,
    format: Format,
    width: u32,
    height: u32,
}

/// Everything the software device owns.  Shared by the device, its swap chains and test probes.
#[derive(Debug, Default)]
pub(crate) struct Gpu {
    next_handle: u32,
    resources: HashMap<ResourceId, Resource>,
    heaps: HashMap<DescriptorHeapId, DescriptorHeap>,
    fences: HashMap<FenceId, u64>,
    allocators: HashSet<CommandAllocatorId>,
    root_signatures: HashMap<RootSignatureId, RootSignatureDesc>,
    pipelines: HashMap<PipelineStateId, GraphicsPipelineStateDesc>,
    debug_layer: bool,
    removed: bool,
    occluded: bool,
    /// Fails the next `ExecuteCommandLists` with this HRESULT.
    fail_next_execute: Option<i32>,
    counters: Counters,
    last_frame: Option<Frame>,
}

struct TextureSampler<'a> {
    textures: [Option<&'a Resource>; crate::graphics::SHADER_SRC_IMAGE_COUNT],
}

impl Sampler for TextureSampler<'_> {
    /// Point sampling with wrap addressing.
    fn sample(&self, slot: usize, uv: [f32; 2]) -> [f32; 4] {
        let Some(Some(tex)) = self.textures.get(slot) else {
            return [0.0; 4];
        };
        let (w, h) = (tex.desc.width as i64, tex.desc.height as i64);
        if w == 0 || h == 0 {
            return [0.0; 4];
        }
        let x = ((uv[0] * w as f32).floor() as i64).rem_euclid(w) as usize;
        let y = ((uv[1] * h as f32).floor() as i64).rem_euclid(h) as usize;
        let at = y * tex.row_pitch() + x * 4;
        let px = &tex.data[at..at + 4];
        let rgba = match tex.desc.format {
            Format::B8G8R8A8Unorm => [px[2], px[1], px[0], px[3]],
            _ => [px[0], px[1], px[2], px[3]],
        };
        rgba.map(raster::from_unorm8)
    }
}

impl Gpu {
    fn handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn check_live(&self) -> Result<(), Error> {
        if self.removed {
            return Err(device_removed());
        }
        Ok(())
    }

    fn resource(&self, id: ResourceId) -> Result<&Resource, Error> {
        self.resources
            .get(&id)
            .ok_or_else(|| invalid_call(format!("resource {} does not exist", id.0)))
    }

    fn create_resource(
        &mut self,
        heap: HeapType,
        desc: &ResourceDesc,
        state: ResourceStates,
    ) -> Result<ResourceId, Error> {
        self.check_live()?;
        let len = match desc.dimension {
            ResourceDimension::Buffer => desc.width as usize,
            ResourceDimension::Texture2D => {
                if desc.width == 0
                    || desc.height == 0
                    || desc.width as usize > MAX_TEXTURE_DIMENSION
                    || desc.height as usize > MAX_TEXTURE_DIMENSION
                {
                    return Err(Error::from_hresult(
                        E_INVALIDARG,
                        format!("texture size {}x{}", desc.width, desc.height),
                    ));
                }
                desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel() as usize
            }
        };
        if self.debug_layer {
            let required = match heap {
                HeapType::Upload => Some(ResourceStates::GENERIC_READ),
                HeapType::Readback => Some(ResourceStates::COPY_DEST),
                HeapType::Default => None,
            };
            if let Some(required) = required
                && state != required
            {
                return Err(invalid_call(format!(
                    "{heap:?} heap resources must start in {required:?}, not {state:?}"
                )));
            }
        }
        let id = ResourceId(self.handle());
        self.resources.insert(
            id,
            Resource {
                heap,
                desc: *desc,
                data: vec![0; len],
                state,
                refs: 1,
            },
        );
        Ok(id)
    }

    fn add_ref(&mut self, id: ResourceId) -> Result<(), Error> {
        let r = self
            .resources
            .get_mut(&id)
            .ok_or_else(|| invalid_call(format!("resource {} does not exist", id.0)))?;
        r.refs += 1;
        Ok(())
    }

    fn release(&mut self, id: ResourceId) {
        match self.resources.get_mut(&id) {
            Some(r) if r.refs > 1 => r.refs -= 1,
            Some(_) => {
                self.resources.remove(&id);
            }
            None => logwise::warn_sync!(
                "release of unknown resource {id}",
                id = logwise::privacy::LogIt(&id.0)
            ),
        }
    }

    fn set_descriptor(&mut self, at: CpuDescriptorHandle, descriptor: Descriptor) {
        match self
            .heaps
            .get_mut(&at.heap)
            .and_then(|h| h.descriptors.get_mut(at.index as usize))
        {
            Some(slot) => *slot = descriptor,
            None => logwise::warn_sync!(
                "descriptor {index} is outside its heap",
                index = logwise::privacy::LogIt(&at.index)
            ),
        }
    }

    fn descriptor(&self, heap: DescriptorHeapId, index: u32) -> Result<Descriptor, Error> {
        self.heaps
            .get(&heap)
            .and_then(|h| h.descriptors.get(index as usize))
            .copied()
            .ok_or_else(|| invalid_call(format!("descriptor {index} does not exist")))
    }

    /// The resource and byte offset a GPU virtual address points at.
    fn resolve(&self, location: u64) -> Result<(&Resource, usize), Error> {
        let id = ResourceId((location >> 32) as u32);
        Ok((self.resource(id)?, (location & 0xffff_ffff) as usize))
    }

    fn require_state(
        &self,
        id: ResourceId,
        required: ResourceStates,
        use_: &str,
    ) -> Result<(), Error> {
        let r = self.resource(id)?;
        // PRESENT is the empty set, so it has to match exactly
        let ok = if required.is_empty() {
            r.state.is_empty()
        } else {
            r.state.contains(required)
        };
        if self.debug_layer && r.is_texture() && !ok {
            return Err(invalid_call(format!(
                "{use_} needs resource {} in {required:?}, but it is in {:?}",
                id.0, r.state
            )));
        }
        Ok(())
    }

    fn execute(&mut self, list: &GraphicsCommandList) -> Result<(), Error> {
        let mut st = ExecState::default();
        for command in list.commands() {
            match command {
                ListCommand::ResourceBarrier(barriers) => {
                    for b in barriers {
                        self.barrier(b)?;
                    }
                }
                ListCommand::CopyTextureRegion {
                    dst,
                    dst_x,
                    dst_y,
                    src,
                    src_box,
                } => self.copy_texture_region(dst, *dst_x, *dst_y, src, src_box)?,
                ListCommand::SetGraphicsRootSignature(rs) => st.root_signature = Some(*rs),
                ListCommand::SetDescriptorHeaps(heaps) => {
                    for h in heaps {
                        if !self.heaps.contains_key(h) {
                            return Err(invalid_call(format!("descriptor heap {} does not exist", h.0)));
                        }
                    }
                }
                ListCommand::SetGraphicsRootDescriptorTable { parameter, base } => {
                    let p = *parameter as usize;
                    if st.tables.len() <= p {
                        st.tables.resize(p + 1, None);
                    }
                    st.tables[p] = Some(*base);
                }
                ListCommand::SetPipelineState(p) => st.pipeline = Some(*p),
                ListCommand::RsSetViewport(v) => st.viewport = Some(*v),
                ListCommand::RsSetScissorRect(r) => st.scissor = Some(*r),
                ListCommand::IaSetPrimitiveTopology(_) => {}
                ListCommand::IaSetVertexBuffer(v) => st.vertex_buffer = Some(*v),
                ListCommand::IaSetIndexBuffer(v) => st.index_buffer = Some(*v),
                ListCommand::OmSetRenderTargets { rtv, dsv } => {
                    st.rtv = Some(*rtv);
                    st.dsv = *dsv;
                }
                ListCommand::OmSetStencilRef(v) => st.stencil_ref = *v as u8,
                ListCommand::ClearStencil { dsv, stencil } => self.clear_stencil(*dsv, *stencil)?,
                ListCommand::DrawIndexedInstanced {
                    index_count,
                    instance_count,
                    start_index,
                    base_vertex,
                    ..
                } => {
                    for _ in 0..*instance_count {
                        self.draw(&st, *index_count, *start_index, *base_vertex)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn barrier(&mut self, b: &ResourceBarrier) -> Result<(), Error> {
        let debug = self.debug_layer;
        let r = self
            .resources
            .get_mut(&b.resource)
            .ok_or_else(|| invalid_call(format!("barrier on missing resource {}", b.resource.0)))?;
        if debug && r.state != b.before {
            return Err(invalid_call(format!(
                "barrier on resource {} expects {:?}, but it is in {:?}",
                b.resource.0, b.before, r.state
            )));
        }
        r.state = b.after;
        Ok(())
    }

    fn copy_span(&self, location: &TextureCopyLocation, required: ResourceStates) -> Result<CopySpan, Error> {
        match *location {
            TextureCopyLocation::Subresource(id) => {
                self.require_state(id, required, "CopyTextureRegion")?;
                let r = self.resource(id)?;
                Ok(CopySpan {
                    resource: id,
                    offset: 0,
                    row_pitch: r.row_pitch(),
                    format: r.desc.format,
                    width: r.desc.width as u32,
                    height: r.desc.height,
                })
            }
            TextureCopyLocation::PlacedFootprint(id, fp) => {
                self.resource(id)?;
                Ok(CopySpan {
                    resource: id,
                    offset: fp.offset as usize,
                    row_pitch: fp.row_pitch as usize,
                    format: fp.format,
                    width: fp.width,
                    height: fp.height,
                })
            }
        }
    }

    fn copy_texture_region(
        &mut self,
        dst: &TextureCopyLocation,
        dst_x: u32,
        dst_y: u32,
        src: &TextureCopyLocation,
        src_box: &CopyBox,
    ) -> Result<(), Error> {
        let s = self.copy_span(src, ResourceStates::COPY_SOURCE)?;
        let d = self.copy_span(dst, ResourceStates::COPY_DEST)?;
        let w = src_box.right.saturating_sub(src_box.left);
        let h = src_box.bottom.saturating_sub(src_box.top);
        if src_box.right > s.width
            || src_box.bottom > s.height
            || dst_x + w > d.width
            || dst_y + h > d.height
        {
            return Err(invalid_call("CopyTextureRegion out of bounds"));
        }
        if s.format != d.format {
            return Err(invalid_call(format!(
                "CopyTextureRegion from {:?} to {:?}",
                s.format, d.format
            )));
        }
        let bpp = s.format.bytes_per_pixel() as usize;
        let row_len = w as usize * bpp;
        let mut rows = Vec::with_capacity(row_len * h as usize);
        {
            let src_data = &self.resource(s.resource)?.data;
            for y in 0..h as usize {
                let at = s.offset + (src_box.top as usize + y) * s.row_pitch + src_box.left as usize * bpp;
                rows.extend_from_slice(&src_data[at..at + row_len]);
            }
        }
        let dst_data = &mut self
            .resources
            .get_mut(&d.resource)
            .ok_or_else(|| invalid_call("CopyTextureRegion destination vanished"))?
            .data;
        for (y, row) in rows.chunks_exact(row_len.max(1)).enumerate().take(h as usize) {
            let at = d.offset + (dst_y as usize + y) * d.row_pitch + dst_x as usize * bpp;
            dst_data[at..at + row_len].copy_from_slice(&row[..row_len]);
        }
        Ok(())
    }

    fn clear_stencil(&mut self, dsv: CpuDescriptorHandle, value: u8) -> Result<(), Error> {
        let Descriptor::DepthStencil(id) = self.descriptor(dsv.heap, dsv.index)? else {
            return Err(invalid_call("ClearDepthStencilView without a depth-stencil view"));
        };
        self.require_state(id, ResourceStates::DEPTH_WRITE, "ClearDepthStencilView")?;
        let r = self
            .resources
            .get_mut(&id)
            .ok_or_else(|| invalid_call("depth-stencil resource vanished"))?;
        for texel in r.data.chunks_exact_mut(4) {
            texel[3] = value;
        }
        Ok(())
    }

    fn read_words(&self, location: u64, size_in_bytes: u32) -> Result<Vec<u32>, Error> {
        let (r, offset) = self.resolve(location)?;
        let end = (offset + size_in_bytes as usize).min(r.data.len());
        Ok(r.data[offset.min(end)..end]
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Runs the vertex stage for vertex `index` of `view`.
    fn fetch_vertex(
        &self,
        view: &VertexBufferView,
        index: usize,
        constants: &Constants<'_>,
        viewport: &Viewport,
    ) -> Result<RasterVertex, Error> {
        let (r, offset) = self.resolve(view.location)?;
        let stride = view.stride_in_bytes as usize;
        let at = offset + index * stride;
        if (index + 1) * stride > view.size_in_bytes as usize || at + stride > r.data.len() {
            return Err(invalid_call(format!("vertex {index} is outside the vertex buffer")));
        }
        let floats: Vec<f32> = r.data[at..at + stride]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let f = |i: usize| floats.get(i).copied().unwrap_or(0.0);
        let (x, y) = (f(0), f(1));
        let dot = |row: [f32; 4]| row[0] * x + row[1] * y + row[3];
        let mut ndc_x = dot(constants.matrix_row(PROJECTION_MATRIX_INDEX, 0));
        let mut ndc_y = dot(constants.matrix_row(PROJECTION_MATRIX_INDEX, 1));
        let w = dot(constants.matrix_row(PROJECTION_MATRIX_INDEX, 3));
        if w != 0.0 {
            ndc_x /= w;
            ndc_y /= w;
        }
        Ok(RasterVertex {
            position: [
                viewport.x + (ndc_x + 1.0) / 2.0 * viewport.width,
                viewport.y + (1.0 - ndc_y) / 2.0 * viewport.height,
            ],
            varyings: Varyings {
                texcoord: [f(2), f(3)],
                color: [f(4), f(5), f(6), f(7)],
                custom: [f(8), f(9), f(10), f(11)],
            },
        })
    }

    fn draw(
        &mut self,
        st: &ExecState,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    ) -> Result<(), Error> {
        let pso_id = st
            .pipeline
            .ok_or_else(|| invalid_call("draw without a pipeline state"))?;
        let pso = self
            .pipelines
            .get(&pso_id)
            .cloned()
            .ok_or_else(|| invalid_call("draw with a released pipeline state"))?;
        let ShaderBytecode::Software {
            program,
            uniform_offsets,
        } = &pso.shader
        else {
            return Err(Error::Unsupported(
                "the software device cannot run DXBC".to_string(),
            ));
        };
        let rs = st
            .root_signature
            .and_then(|id| self.root_signatures.get(&id))
            .cloned()
            .ok_or_else(|| invalid_call("draw without a root signature"))?;
        if rs.parameters.len() > st.tables.len() {
            return Err(invalid_call("draw with unbound descriptor tables"));
        }

        let mut words = Vec::new();
        let mut srvs: [Option<ResourceId>; crate::graphics::SHADER_SRC_IMAGE_COUNT] =
            Default::default();
        for (p, param) in rs.parameters.iter().enumerate() {
            let Some(base) = st.tables[p] else {
                return Err(invalid_call(format!("root table {p} is unbound")));
            };
            for k in 0..param.range.num_descriptors {
                let index = base.index + param.range.offset_in_descriptors_from_table_start + k;
                match (param.range.kind, self.descriptor(base.heap, index)?) {
                    (DescriptorRangeType::Cbv, Descriptor::ConstantBuffer(cbv)) => {
                        words = self.read_words(cbv.location, cbv.size_in_bytes)?;
                    }
                    (DescriptorRangeType::Srv, Descriptor::ShaderResource(id)) => {
                        let slot = (param.range.base_shader_register + k) as usize;
                        if let Some(s) = srvs.get_mut(slot) {
                            self.require_state(id, ResourceStates::PIXEL_SHADER_RESOURCE, "a draw's source")?;
                            *s = Some(id);
                        }
                    }
                    (DescriptorRangeType::Sampler, Descriptor::Sampler(AddressMode::Wrap)) => {}
                    _ => {}
                }
            }
        }

        let rtv = st.rtv.ok_or_else(|| invalid_call("draw without a render target"))?;
        let Descriptor::RenderTarget(rt_id) = self.descriptor(rtv.heap, rtv.index)? else {
            return Err(invalid_call("render target descriptor is not a render target view"));
        };
        self.require_state(rt_id, ResourceStates::RENDER_TARGET, "a draw's render target")?;
        let rt_format = self.resource(rt_id)?.desc.format;
        if self.debug_layer && rt_format != pso.rtv_format {
            return Err(invalid_call(format!(
                "pipeline expects {:?} but the render target is {rt_format:?}",
                pso.rtv_format
            )));
        }
        let ds_id = if pso.depth_stencil.stencil_enable {
            let dsv = st
                .dsv
                .ok_or_else(|| invalid_call("stencil pipeline without a depth-stencil view"))?;
            let Descriptor::DepthStencil(id) = self.descriptor(dsv.heap, dsv.index)? else {
                return Err(invalid_call("depth-stencil descriptor is not a depth-stencil view"));
            };
            self.require_state(id, ResourceStates::DEPTH_WRITE, "a draw's stencil")?;
            Some(id)
        } else {
            None
        };

        let viewport = st
            .viewport
            .ok_or_else(|| invalid_call("draw without a viewport"))?;
        let mut clip = Rect::new(
            viewport.x.floor() as i32,
            viewport.y.floor() as i32,
            (viewport.x + viewport.width).ceil() as i32,
            (viewport.y + viewport.height).ceil() as i32,
        );
        if let Some(s) = st.scissor {
            clip = Rect::new(
                clip.min_x.max(s.min_x),
                clip.min_y.max(s.min_y),
                clip.max_x.min(s.max_x),
                clip.max_y.min(s.max_y),
            );
        }

        let vb = st
            .vertex_buffer
            .ok_or_else(|| invalid_call("draw without a vertex buffer"))?;
        let ib = st
            .index_buffer
            .ok_or_else(|| invalid_call("draw without an index buffer"))?;
        let indices = self.read_words(ib.location, ib.size_in_bytes)?;
        let range = start_index as usize..(start_index + index_count) as usize;
        if range.end > indices.len() {
            return Err(invalid_call("draw reads past the index buffer"));
        }
        let constants = Constants::new(&words, uniform_offsets);
        let vertices = indices[range]
            .iter()
            .map(|i| {
                let index = (*i as i64 + base_vertex as i64).max(0) as usize;
                self.fetch_vertex(&vb, index, &constants, &viewport)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        // targets leave the map while drawing so sources can be borrowed alongside them
        let mut rt = self
            .resources
            .remove(&rt_id)
            .ok_or_else(|| invalid_call("render target vanished"))?;
        let mut ds = ds_id.and_then(|id| self.resources.remove(&id));
        {
            let sampler = TextureSampler {
                textures: srvs.map(|s| s.and_then(|id| self.resources.get(&id))),
            };
            let state = RasterState {
                clip,
                blend: &pso.blend,
                depth_stencil: &pso.depth_stencil,
                stencil_ref: st.stencil_ref,
                program: program.as_ref(),
                constants,
                sampler: &sampler,
            };
            let mut color = ColorTarget {
                width: rt.desc.width as u32,
                height: rt.desc.height,
                row_pitch: rt.row_pitch(),
                format: rt.desc.format,
                data: &mut rt.data,
            };
            let mut stencil = ds.as_mut().map(|ds| StencilTarget {
                row_pitch: ds.row_pitch(),
                data: &mut ds.data,
            });
            for tri in vertices.chunks_exact(3) {
                raster::draw_triangle(
                    &mut color,
                    stencil.as_mut(),
                    &state,
                    [&tri[0], &tri[1], &tri[2]],
                );
            }
        }
        self.resources.insert(rt_id, rt);
        if let (Some(id), Some(ds)) = (ds_id, ds) {
            self.resources.insert(id, ds);
        }
        Ok(())
    }

    fn record_frame(&mut self, id: ResourceId) -> Result<(), Error> {
        let r = self.resource(id)?;
        let frame = Frame {
            width: r.desc.width as u32,
            height: r.desc.height,
            pixels: r.rgba_pixels(),
        };
        self.last_frame = Some(frame);
        self.counters.presents += 1;
        Ok(())
    }
}

pub(crate) struct SoftwareDevice {
    gpu: Arc<Mutex<Gpu>>,
    xbox: bool,
}

impl SoftwareDevice {
    fn console_only(&self, what: &str) -> Result<(), Error> {
        if !self.xbox {
            return Err(Error::Unsupported(what.to_string()));
        }
        self.gpu.lock().unwrap().check_live()
    }
}

impl Device for SoftwareDevice {
    fn shader_target(&self) -> CompileTarget {
        CompileTarget::Software
    }

    fn create_command_allocator(&mut self) -> Result<CommandAllocatorId, Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        let id = CommandAllocatorId(gpu.handle());
        gpu.allocators.insert(id);
        Ok(id)
    }

    fn reset_command_allocator(&mut self, allocator: CommandAllocatorId) -> Result<(), Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        if !gpu.allocators.contains(&allocator) {
            return Err(invalid_call("reset of an unknown command allocator"));
        }
        gpu.counters.allocator_resets += 1;
        Ok(())
    }

    fn create_fence(&mut self) -> Result<FenceId, Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        let id = FenceId(gpu.handle());
        gpu.fences.insert(id, 0);
        Ok(id)
    }

    fn fence_completed_value(&self, fence: FenceId) -> u64 {
        let gpu = self.gpu.lock().unwrap();
        if gpu.removed {
            // a removed device reports every fence as complete
            return u64::MAX;
        }
        gpu.fences.get(&fence).copied().unwrap_or(0)
    }

    fn wait_for_fence(&mut self, fence: FenceId, value: u64) -> Result<(), Error> {
        let gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        let completed = gpu.fences.get(&fence).copied().unwrap_or(0);
        if completed < value {
            return Err(Error::from_hresult(
                E_FAIL,
                format!("fence value {value} is never signaled, completed is {completed}"),
            ));
        }
        Ok(())
    }

    fn execute_command_list(&mut self, list: &GraphicsCommandList) -> Result<(), Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        if list.is_open() {
            return Err(invalid_call("ExecuteCommandLists with an open list"));
        }
        if let Some(code) = gpu.fail_next_execute.take() {
            return Err(Error::from_hresult(code, "ExecuteCommandLists"));
        }
        gpu.counters.executed_lists += 1;
        gpu.execute(list)
    }

    fn signal(&mut self, fence: FenceId, value: u64) -> Result<(), Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        match gpu.fences.get_mut(&fence) {
            Some(v) => {
                *v = value;
                Ok(())
            }
            None => Err(invalid_call("signal of an unknown fence")),
        }
    }

    fn create_committed_resource(
        &mut self,
        heap: HeapType,
        desc: &ResourceDesc,
        initial_state: ResourceStates,
    ) -> Result<ResourceId, Error> {
        self.gpu
            .lock()
            .unwrap()
            .create_resource(heap, desc, initial_state)
    }

    fn release_resource(&mut self, resource: ResourceId) {
        self.gpu.lock().unwrap().release(resource);
    }

    fn resource_desc(&self, resource: ResourceId) -> Option<ResourceDesc> {
        self.gpu
            .lock()
            .unwrap()
            .resources
            .get(&resource)
            .map(|r| r.desc)
    }

    fn gpu_virtual_address(&self, resource: ResourceId) -> u64 {
        (resource.0 as u64) << 32
    }

    fn map(&mut self, resource: ResourceId, f: &mut dyn FnMut(&mut [u8])) -> Result<(), Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        let r = gpu
            .resources
            .get_mut(&resource)
            .ok_or_else(|| invalid_call(format!("map of missing resource {}", resource.0)))?;
        if r.heap == HeapType::Default {
            return Err(Error::from_hresult(
                E_INVALIDARG,
                "default-heap resources cannot be mapped",
            ));
        }
        f(&mut r.data);
        Ok(())
    }

    fn create_descriptor_heap(
        &mut self,
        kind: DescriptorHeapType,
        num_descriptors: u32,
        _shader_visible: bool,
    ) -> Result<DescriptorHeapId, Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        let id = DescriptorHeapId(gpu.handle());
        gpu.heaps.insert(
            id,
            DescriptorHeap {
                kind,
                descriptors: vec![Descriptor::Empty; num_descriptors as usize],
            },
        );
        Ok(id)
    }

    fn release_descriptor_heap(&mut self, heap: DescriptorHeapId) {
        self.gpu.lock().unwrap().heaps.remove(&heap);
    }

    fn create_render_target_view(&mut self, resource: ResourceId, at: CpuDescriptorHandle) {
        self.gpu
            .lock()
            .unwrap()
            .set_descriptor(at, Descriptor::RenderTarget(resource));
    }

    fn create_depth_stencil_view(&mut self, resource: ResourceId, at: CpuDescriptorHandle) {
        self.gpu
            .lock()
            .unwrap()
            .set_descriptor(at, Descriptor::DepthStencil(resource));
    }

    fn create_constant_buffer_view(&mut self, desc: &ConstantBufferViewDesc, at: CpuDescriptorHandle) {
        self.gpu
            .lock()
            .unwrap()
            .set_descriptor(at, Descriptor::ConstantBuffer(*desc));
    }

    fn create_shader_resource_view(&mut self, resource: ResourceId, at: CpuDescriptorHandle) {
        self.gpu
            .lock()
            .unwrap()
            .set_descriptor(at, Descriptor::ShaderResource(resource));
    }

    fn create_sampler(&mut self, desc: &SamplerDesc, at: CpuDescriptorHandle) {
        let mut gpu = self.gpu.lock().unwrap();
        if gpu.heaps.get(&at.heap).map(|h| h.kind) != Some(DescriptorHeapType::Sampler) {
            logwise::warn_sync!("sampler created outside a sampler heap");
        }
        gpu.set_descriptor(at, Descriptor::Sampler(desc.address_u));
    }

    fn create_root_signature(&mut self, desc: &RootSignatureDesc) -> Result<RootSignatureId, Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        let id = RootSignatureId(gpu.handle());
        gpu.root_signatures.insert(id, desc.clone());
        Ok(id)
    }

    fn create_graphics_pipeline_state(
        &mut self,
        desc: &GraphicsPipelineStateDesc,
    ) -> Result<PipelineStateId, Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        if let ShaderBytecode::Dxbc { .. } = desc.shader {
            return Err(Error::Unsupported(
                "the software device cannot run DXBC".to_string(),
            ));
        }
        if !gpu.root_signatures.contains_key(&desc.root_signature) {
            return Err(invalid_call("pipeline state with an unknown root signature"));
        }
        let id = PipelineStateId(gpu.handle());
        gpu.pipelines.insert(id, desc.clone());
        Ok(id)
    }

    fn release_pipeline_state(&mut self, pipeline: PipelineStateId) {
        self.gpu.lock().unwrap().pipelines.remove(&pipeline);
    }

    fn present_x(&mut self, resource: ResourceId) -> Result<(), Error> {
        self.console_only("PresentX")?;
        let mut gpu = self.gpu.lock().unwrap();
        gpu.require_state(resource, ResourceStates::PRESENT, "PresentX")?;
        gpu.record_frame(resource)
    }

    fn suspend_x(&mut self) -> Result<(), Error> {
        self.console_only("SuspendX")?;
        self.gpu.lock().unwrap().counters.suspends += 1;
        Ok(())
    }

    fn resume_x(&mut self) -> Result<(), Error> {
        self.console_only("ResumeX")?;
        self.gpu.lock().unwrap().counters.resumes += 1;
        Ok(())
    }

    fn schedule_frame_event_x(&mut self) -> Result<(), Error> {
        self.console_only("ScheduleFrameEventX")
    }

    fn wait_frame_event_x(&mut self) -> Result<(), Error> {
        self.console_only("WaitFrameEventX")?;
        self.gpu.lock().unwrap().counters.frame_events += 1;
        Ok(())
    }
}

/// A flip-model swap chain over host memory.
pub(crate) struct SoftwareSwapChain {
    gpu: Arc<Mutex<Gpu>>,
    buffers: Vec<ResourceId>,
    format: Format,
    current: usize,
}

impl SoftwareSwapChain {
    fn create_buffers(
        gpu: &mut Gpu,
        count: u32,
        width: u32,
        height: u32,
        format: Format,
    ) -> Result<Vec<ResourceId>, Error> {
        let desc = ResourceDesc::texture2d(
            width,
            height,
            format,
            super::api::ResourceFlags::ALLOW_RENDER_TARGET,
        );
        (0..count)
            .map(|_| gpu.create_resource(HeapType::Default, &desc, ResourceStates::PRESENT))
            .collect()
    }
}

impl SwapChain for SoftwareSwapChain {
    fn buffer(&mut self, index: u32) -> Result<ResourceId, Error> {
        let id = *self
            .buffers
            .get(index as usize)
            .ok_or_else(|| invalid_call(format!("swap chain has no buffer {index}")))?;
        self.gpu.lock().unwrap().add_ref(id)?;
        Ok(id)
    }

    fn current_back_buffer_index(&self) -> usize {
        self.current
    }

    fn present(&mut self, _sync_interval: u32, test: bool) -> Result<bool, Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        if test {
            return Ok(gpu.occluded);
        }
        let back = self.buffers[self.current];
        gpu.require_state(back, ResourceStates::PRESENT, "Present")?;
        if !gpu.occluded {
            gpu.record_frame(back)?;
        }
        self.current = (self.current + 1) % self.buffers.len();
        Ok(gpu.occluded)
    }

    fn resize_buffers(&mut self, buffer_count: u32, width: u32, height: u32) -> Result<(), Error> {
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        for id in &self.buffers {
            if gpu.resources.get(id).is_some_and(|r| r.refs > 1) {
                return Err(invalid_call(
                    "ResizeBuffers while back buffer references are outstanding",
                ));
            }
        }
        let buffers = Self::create_buffers(&mut gpu, buffer_count, width, height, self.format)?;
        for id in std::mem::replace(&mut self.buffers, buffers) {
            gpu.release(id);
        }
        self.current = 0;
        Ok(())
    }
}

impl Drop for SoftwareSwapChain {
    fn drop(&mut self) {
        let mut gpu = self.gpu.lock().unwrap();
        for id in self.buffers.drain(..) {
            gpu.release(id);
        }
    }
}

/// The other end of a console's app state channels.
#[derive(Debug)]
struct AppStateNotifier {
    suspending: Sender<()>,
    #[cfg_attr(not(test), allow(dead_code))]
    suspended: Receiver<()>,
    resume: Sender<()>,
}

pub(crate) struct SoftwarePlatform {
    gpu: Arc<Mutex<Gpu>>,
    xbox: bool,
    /// Hardware adapters and whether each can create a device.
    adapters: Vec<(AdapterInfo, bool)>,
    notifier: Arc<Mutex<Option<AppStateNotifier>>>,
}

impl SoftwarePlatform {
    /// A desktop with only the WARP adapter.
    pub(crate) fn new() -> Self {
        SoftwarePlatform {
            gpu: Arc::default(),
            xbox: false,
            adapters: Vec::new(),
            notifier: Arc::default(),
        }
    }

    /// A console: one adapter, no swap chain, and app lifecycle events.
    pub(crate) fn xbox() -> Self {
        SoftwarePlatform {
            xbox: true,
            ..Self::new()
        }
    }

    /// Adds a hardware adapter.  `supports_d3d12` decides whether device creation succeeds on it.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn with_adapter(mut self, description: &str, supports_d3d12: bool) -> Self {
        let index = self.adapters.len() as u32;
        self.adapters.push((
            AdapterInfo {
                index,
                description: description.to_string(),
                software: false,
            },
            supports_d3d12,
        ));
        self
    }

    #[cfg(test)]
    pub(crate) fn probe(&self) -> Probe {
        Probe {
            gpu: self.gpu.clone(),
            notifier: self.notifier.clone(),
        }
    }

    fn warp(&self) -> AdapterInfo {
        AdapterInfo {
            index: self.adapters.len() as u32,
            description: WARP_DESCRIPTION.to_string(),
            software: true,
        }
    }
}

impl Platform for SoftwarePlatform {
    fn is_xbox(&self) -> bool {
        self.xbox
    }

    fn enable_debug_layer(&mut self) -> Result<(), Error> {
        self.gpu.lock().unwrap().debug_layer = true;
        Ok(())
    }

    fn warp_adapter(&mut self) -> Result<AdapterInfo, Error> {
        Ok(self.warp())
    }

    fn adapters(&mut self) -> Result<Vec<AdapterInfo>, Error> {
        let mut all: Vec<AdapterInfo> = self.adapters.iter().map(|(a, _)| a.clone()).collect();
        all.push(self.warp());
        Ok(all)
    }

    fn create_device(
        &mut self,
        adapter: Option<&AdapterInfo>,
        feature_level: FeatureLevel,
    ) -> Result<Box<dyn Device>, Error> {
        if let Some(adapter) = adapter
            && !adapter.software
        {
            let supported = self
                .adapters
                .iter()
                .find(|(a, _)| a == adapter)
                .map(|(_, s)| *s)
                .unwrap_or(false);
            if !supported {
                return Err(Error::Unsupported(format!(
                    "{} cannot create a device at feature level {feature_level}",
                    adapter.description
                )));
            }
        }
        logwise::info_sync!(
            "software device at feature level {level}",
            level = feature_level.to_string()
        );
        Ok(Box::new(SoftwareDevice {
            gpu: self.gpu.clone(),
            xbox: self.xbox,
        }))
    }

    fn create_swap_chain(
        &mut self,
        _device: &mut dyn Device,
        _window: WindowHandle,
        desc: &SwapChainDesc,
    ) -> Result<Box<dyn SwapChain>, Error> {
        if self.xbox {
            return Err(Error::Unsupported(
                "consoles present render targets directly".to_string(),
            ));
        }
        let mut gpu = self.gpu.lock().unwrap();
        gpu.check_live()?;
        let buffers = SoftwareSwapChain::create_buffers(
            &mut gpu,
            desc.buffer_count,
            desc.width,
            desc.height,
            desc.format,
        )?;
        Ok(Box::new(SoftwareSwapChain {
            gpu: self.gpu.clone(),
            buffers,
            format: desc.format,
            current: 0,
        }))
    }

    fn register_app_state_notification(&mut self) -> Result<AppStateChannels, Error> {
        if !self.xbox {
            return Err(Error::Unsupported(
                "app state notifications are console-only".to_string(),
            ));
        }
        let (suspending_tx, suspending_rx) = mpsc::channel();
        let (suspended_tx, suspended_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        *self.notifier.lock().unwrap() = Some(AppStateNotifier {
            suspending: suspending_tx,
            suspended: suspended_rx,
            resume: resume_tx,
        });
        Ok(AppStateChannels {
            suspending: suspending_rx,
            suspended: suspended_tx,
            resume: resume_rx,
        })
    }
}

/// Test access to the software device's state.
#[cfg(test)]
pub(crate) struct Probe {
    gpu: Arc<Mutex<Gpu>>,
    notifier: Arc<Mutex<Option<AppStateNotifier>>>,
}

#[cfg(test)]
impl Probe {
    pub(crate) fn is_live(&self, id: ResourceId) -> bool {
        self.gpu.lock().unwrap().resources.contains_key(&id)
    }

    pub(crate) fn live_resources(&self) -> usize {
        self.gpu.lock().unwrap().resources.len()
    }

    pub(crate) fn resource_state(&self, id: ResourceId) -> Option<ResourceStates> {
        self.gpu.lock().unwrap().resources.get(&id).map(|r| r.state)
    }

    pub(crate) fn debug_layer(&self) -> bool {
        self.gpu.lock().unwrap().debug_layer
    }

    pub(crate) fn set_occluded(&self, occluded: bool) {
        self.gpu.lock().unwrap().occluded = occluded;
    }

    /// Every later device call fails with `DXGI_ERROR_DEVICE_REMOVED`.
    pub(crate) fn remove_device(&self) {
        self.gpu.lock().unwrap().removed = true;
    }

    pub(crate) fn fail_next_execute(&self, code: i32) {
        self.gpu.lock().unwrap().fail_next_execute = Some(code);
    }

    pub(crate) fn presents(&self) -> usize {
        self.gpu.lock().unwrap().counters.presents
    }

    pub(crate) fn allocator_resets(&self) -> usize {
        self.gpu.lock().unwrap().counters.allocator_resets
    }

    pub(crate) fn executed_lists(&self) -> usize {
        self.gpu.lock().unwrap().counters.executed_lists
    }

    pub(crate) fn suspends(&self) -> (usize, usize) {
        let gpu = self.gpu.lock().unwrap();
        (gpu.counters.suspends, gpu.counters.resumes)
    }

    pub(crate) fn frame_events(&self) -> usize {
        self.gpu.lock().unwrap().counters.frame_events
    }

    pub(crate) fn last_frame(&self) -> Option<Frame> {
        self.gpu.lock().unwrap().last_frame.clone()
    }

    /// Delivers a suspend notification without waiting for the acknowledgement.
    pub(crate) fn notify_suspending(&self) {
        if let Some(n) = self.notifier.lock().unwrap().as_ref() {
            _ = n.suspending.send(());
        }
    }

    pub(crate) fn notify_resume(&self) {
        if let Some(n) = self.notifier.lock().unwrap().as_ref() {
            _ = n.resume.send(());
        }
    }

    pub(crate) fn suspend_acknowledged(&self) -> bool {
        self.notifier
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|n| n.suspended.try_recv().is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::super::api::{PlacedFootprint, ResourceFlags, copyable_footprint};
    use super::*;

    fn device(debug: bool) -> (Box<dyn Device>, Probe) {
        let mut platform = SoftwarePlatform::new();
        if debug {
            platform.enable_debug_layer().unwrap();
        }
        let warp = platform.warp_adapter().unwrap();
        let device = platform
            .create_device(Some(&warp), FeatureLevel::L11_0)
            .unwrap();
        (device, platform.probe())
    }

    fn texture(device: &mut dyn Device, state: ResourceStates) -> ResourceId {
        device
            .create_committed_resource(
                HeapType::Default,
                &ResourceDesc::texture2d(4, 4, Format::R8G8B8A8Unorm, ResourceFlags::ALLOW_RENDER_TARGET),
                state,
            )
            .unwrap()
    }

    fn run(device: &mut dyn Device, record: impl FnOnce(&mut GraphicsCommandList)) -> Result<(), Error> {
        let allocator = device.create_command_allocator().unwrap();
        let mut list = GraphicsCommandList::new(allocator);
        record(&mut list);
        list.close().unwrap();
        device.execute_command_list(&list)
    }

    #[test]
    fn debug_layer_checks_barrier_before_states() {
        for debug in [false, true] {
            let (mut device, probe) = device(debug);
            let tex = texture(device.as_mut(), ResourceStates::PIXEL_SHADER_RESOURCE);
            let r = run(device.as_mut(), |list| {
                list.resource_barrier(&[ResourceBarrier {
                    resource: tex,
                    before: ResourceStates::RENDER_TARGET,
                    after: ResourceStates::COPY_DEST,
                }])
            });
            if debug {
                assert!(matches!(
                    r,
                    Err(Error::Backend { code: DXGI_ERROR_INVALID_CALL, .. })
                ));
            } else {
                r.unwrap();
                assert_eq!(probe.resource_state(tex), Some(ResourceStates::COPY_DEST));
            }
        }
    }

    #[test]
    fn default_heap_is_not_mappable() {
        let (mut device, _) = device(false);
        let tex = texture(device.as_mut(), ResourceStates::PIXEL_SHADER_RESOURCE);
        assert!(device.map(tex, &mut |_| {}).is_err());
    }

    #[test]
    fn copies_go_through_footprints() {
        let (mut device, _) = device(true);
        let tex = texture(device.as_mut(), ResourceStates::COPY_DEST);
        let desc = ResourceDesc::texture2d(2, 2, Format::R8G8B8A8Unorm, ResourceFlags::empty());
        let (footprint, total) = copyable_footprint(&desc);
        let upload = device
            .create_committed_resource(HeapType::Upload, &ResourceDesc::buffer(total), ResourceStates::GENERIC_READ)
            .unwrap();
        device
            .map(upload, &mut |data| {
                data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
                let row = footprint.row_pitch as usize;
                data[row..row + 8].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
            })
            .unwrap();
        let readback = device
            .create_committed_resource(HeapType::Readback, &ResourceDesc::buffer(total), ResourceStates::COPY_DEST)
            .unwrap();
        let whole = CopyBox {
            left: 0,
            top: 0,
            right: 2,
            bottom: 2,
        };
        run(device.as_mut(), |list| {
            list.copy_texture_region(
                TextureCopyLocation::Subresource(tex),
                1,
                1,
                TextureCopyLocation::PlacedFootprint(upload, footprint),
                whole,
            );
            list.resource_barrier(&[ResourceBarrier {
                resource: tex,
                before: ResourceStates::COPY_DEST,
                after: ResourceStates::COPY_SOURCE,
            }]);
            list.copy_texture_region(
                TextureCopyLocation::PlacedFootprint(readback, PlacedFootprint { ..footprint }),
                0,
                0,
                TextureCopyLocation::Subresource(tex),
                CopyBox {
                    left: 1,
                    top: 1,
                    right: 3,
                    bottom: 3,
                },
            );
        })
        .unwrap();
        let mut out = Vec::new();
        device.map(readback, &mut |data| out = data.to_vec()).unwrap();
        assert_eq!(&out[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        let row = footprint.row_pitch as usize;
        assert_eq!(&out[row..row + 8], &[9, 10, 11, 12, 13, 14, 15, 16]);
    }

    #[test]
    fn removed_device_reports_device_lost() {
        let (mut device, probe) = device(false);
        probe.remove_device();
        assert_eq!(device.create_fence().unwrap_err(), Error::DeviceLost);
    }

    #[test]
    fn resize_needs_every_buffer_reference_released() {
        let mut platform = SoftwarePlatform::new();
        let warp = platform.warp_adapter().unwrap();
        let mut device = platform.create_device(Some(&warp), FeatureLevel::L11_0).unwrap();
        let window = WindowHandle(raw_window_handle::RawWindowHandle::Web(
            raw_window_handle::WebWindowHandle::new(1),
        ));
        let desc = SwapChainDesc {
            width: 8,
            height: 8,
            format: Format::B8G8R8A8Unorm,
            buffer_count: 2,
        };
        let mut chain = platform
            .create_swap_chain(device.as_mut(), window, &desc)
            .unwrap();
        let b0 = chain.buffer(0).unwrap();
        assert!(chain.resize_buffers(2, 16, 16).is_err());
        device.release_resource(b0);
        chain.resize_buffers(2, 16, 16).unwrap();
        assert_eq!(
            device.resource_desc(chain.buffer(1).unwrap()).map(|d| d.width),
            Some(16)
        );
    }

    #[test]
    fn hardware_adapters_without_support_fail() {
        let mut platform = SoftwarePlatform::new().with_adapter("Old GPU", false);
        let adapters = platform.adapters().unwrap();
        assert_eq!(adapters.len(), 2);
        assert!(platform.create_device(Some(&adapters[0]), FeatureLevel::L11_0).is_err());
        assert!(platform.create_device(Some(&adapters[1]), FeatureLevel::L11_0).is_ok());
    }
}
