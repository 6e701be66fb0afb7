// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The D3D12 backend.

[Graphics12] owns one device and direct queue, two command lists (draw and copy) and
[FRAME_COUNT] slots of per-frame state: command allocators, a fence and its value, vertex and
index upload buffers, and the images and shaders disposed during that frame.

# Frames

`begin` resets the slot's allocators whenever the slot changed since the previous `begin`, then
reopens both lists.  `end` executes the copy list, then the draw list.  When presenting, it
presents, applies a pending resize and moves to the next slot, waiting on that slot's fence if
the GPU is still using it.  Objects disposed during a frame are released once the frame's slot
comes around again, so the GPU never sees a freed resource.

Copies and draws are recorded on separate lists but never overlap: a draw flushes pending copies
first, and a pixel write or read flushes pending draws first.
*/

pub(crate) mod api;
mod image;
#[cfg(windows)]
mod native;
mod pipeline;
mod raster;
mod shader;
mod software;
mod stencil;
mod swap_chain;

use crate::bittricks::next_pow2_usize;
use crate::config::{Config, FeatureLevel};
use crate::error::{E_FAIL, Error};
use crate::graphics::{
    DrawArgs, FillRule, Graphics, ImageId, PixelsArgs, PixelsArgsMut, SHADER_SRC_IMAGE_COUNT,
    ShaderId, WindowHandle,
};
use crate::shader_ir::{ShaderIr, SourceHash};
use crate::uniforms;
use api::{
    AdapterInfo, AppStateChannels, CommandAllocatorId, DescriptorHeapType, Device, FRAME_COUNT,
    FenceId, Format, GraphicsCommandList, HeapType, IndexBufferView, MAX_TEXTURE_DIMENSION,
    Platform, PrimitiveTopology, ResourceDesc, ResourceId, ResourceStates, VertexBufferView,
    Viewport,
};
use image::{FrameView, Image12};
use pipeline::{NUM_DESCRIPTORS_PER_FRAME, PipelineStates};
use shader::{BytecodeCache, Shader12};
use std::collections::HashMap;
use std::sync::Arc;
use swap_chain::SwapChainHost;

#[cfg(windows)]
pub(crate) use native::{NativePlatform, compile_hlsl};
pub(crate) use software::SoftwarePlatform;

/// Upload buffers a frame may accumulate before `end` waits for the GPU and releases them.
const RELEASE_BUFFERS_THRESHOLD: usize = 16;

/// How the backend is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Options {
    pub(crate) use_warp: bool,
    pub(crate) use_debug_layer: bool,
    pub(crate) feature_level: FeatureLevel,
    pub(crate) vertex_float_count: usize,
}

impl From<&Config> for Options {
    fn from(config: &Config) -> Self {
        Options {
            use_warp: config.use_warp,
            use_debug_layer: config.use_debug_layer,
            feature_level: config.feature_level,
            vertex_float_count: config.vertex_float_count,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SizedBuffer {
    resource: ResourceId,
    size_in_bytes: u32,
}

/// One frame's upload buffers of a kind.
///
/// Slots survive [BufferRing::reset] without `release`, so steady-state frames reuse them.
#[derive(Debug, Default)]
struct BufferRing {
    buffers: Vec<Option<SizedBuffer>>,
    used: usize,
}

impl BufferRing {
    /// Uploads `data` into the next slot, growing it to a power of two if it is too small.
    fn upload<T: Copy>(
        &mut self,
        device: &mut dyn Device,
        data: &[T],
        le_bytes: impl Fn(T) -> [u8; 4],
    ) -> Result<SizedBuffer, Error> {
        let idx = self.used;
        if idx == self.buffers.len() {
            self.buffers.push(None);
        }
        self.used += 1;

        let size = next_pow2_usize(4 * data.len()) as u32;
        if let Some(old) = self.buffers[idx]
            && old.size_in_bytes < size
        {
            device.release_resource(old.resource);
            self.buffers[idx] = None;
        }
        let (buffer, created) = match self.buffers[idx] {
            Some(buffer) => (buffer, false),
            None => {
                let resource = device.create_committed_resource(
                    HeapType::Upload,
                    &ResourceDesc::buffer(size as u64),
                    ResourceStates::GENERIC_READ,
                )?;
                let buffer = SizedBuffer {
                    resource,
                    size_in_bytes: size,
                };
                self.buffers[idx] = Some(buffer);
                (buffer, true)
            }
        };

        let mapped = device.map(buffer.resource, &mut |mapped| {
            for (dst, value) in mapped.chunks_exact_mut(4).zip(data) {
                dst.copy_from_slice(&le_bytes(*value));
            }
        });
        if let Err(e) = mapped {
            if created {
                device.release_resource(buffer.resource);
                self.buffers[idx] = None;
            }
            return Err(e);
        }
        Ok(buffer)
    }

    /// The buffer of the latest upload.
    fn current(&self) -> Option<SizedBuffer> {
        self.used.checked_sub(1).and_then(|i| self.buffers[i])
    }

    fn len(&self) -> usize {
        self.used
    }

    fn reset(&mut self, device: &mut dyn Device, release: bool) {
        if release {
            for buffer in self.buffers.drain(..).flatten() {
                device.release_resource(buffer.resource);
            }
        }
        self.used = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Draw,
    Copy,
}

pub(crate) struct Graphics12 {
    platform: Box<dyn Platform>,
    device: Box<dyn Device>,
    xbox: bool,
    adapter: Option<AdapterInfo>,

    fences: [FenceId; FRAME_COUNT],
    fence_values: [u64; FRAME_COUNT],
    draw_allocators: [CommandAllocatorId; FRAME_COUNT],
    copy_allocators: [CommandAllocatorId; FRAME_COUNT],
    draw_list: GraphicsCommandList,
    copy_list: GraphicsCommandList,
    needs_flush_draw: bool,
    needs_flush_copy: bool,

    vertices: [BufferRing; FRAME_COUNT],
    indices: [BufferRing; FRAME_COUNT],

    frame_index: usize,
    prev_begin_frame_index: usize,
    frame_started: bool,

    swap_chain: SwapChainHost,
    window: Option<WindowHandle>,

    images: HashMap<ImageId, Image12>,
    screen_image: Option<ImageId>,
    next_image_id: u32,
    disposed_images: [Vec<Image12>; FRAME_COUNT],

    shaders: HashMap<ShaderId, Shader12>,
    next_shader_id: u32,
    disposed_shaders: [Vec<Shader12>; FRAME_COUNT],
    bytecode_cache: BytecodeCache,

    pipeline_states: PipelineStates,
    tmp_uniforms: Vec<u32>,
    vsync: bool,
    app_state: Option<AppStateChannels>,
    vertex_float_count: usize,
}

/// Picks the adapter the way DXGI enumeration does: WARP when asked for, otherwise the first
/// hardware adapter that can create a device.
fn create_device(
    platform: &mut dyn Platform,
    options: &Options,
) -> Result<(Box<dyn Device>, AdapterInfo), Error> {
    if options.use_warp {
        let adapter = platform.warp_adapter()?;
        let device = platform.create_device(Some(&adapter), options.feature_level)?;
        return Ok((device, adapter));
    }
    for adapter in platform.adapters()? {
        if adapter.software {
            continue;
        }
        match platform.create_device(Some(&adapter), options.feature_level) {
            Ok(device) => return Ok((device, adapter)),
            Err(e) => {
                logwise::info_sync!(
                    "skipping adapter {name}: {err}",
                    name = adapter.description.clone(),
                    err = logwise::privacy::LogIt(&e)
                );
            }
        }
    }
    Err(Error::Unsupported("DirectX 12 is not supported".to_string()))
}

impl Graphics12 {
    pub(crate) fn new(mut platform: Box<dyn Platform>, options: Options) -> Result<Self, Error> {
        let xbox = platform.is_xbox();
        if options.use_debug_layer
            && let Err(e) = platform.enable_debug_layer()
        {
            // the debug layer is optional
            logwise::warn_sync!(
                "debug layer unavailable: {err}",
                err = logwise::privacy::LogIt(&e)
            );
        }

        let (mut device, adapter) = if xbox {
            (platform.create_device(None, options.feature_level)?, None)
        } else {
            let (device, adapter) = create_device(platform.as_mut(), &options)?;
            logwise::info_sync!(
                "using adapter {name}",
                name = adapter.description.clone()
            );
            (device, Some(adapter))
        };

        let mut draw_allocators = [CommandAllocatorId(0); FRAME_COUNT];
        let mut copy_allocators = [CommandAllocatorId(0); FRAME_COUNT];
        let mut fences = [FenceId(0); FRAME_COUNT];
        for i in 0..FRAME_COUNT {
            draw_allocators[i] = device.create_command_allocator()?;
            copy_allocators[i] = device.create_command_allocator()?;
            fences[i] = device.create_fence()?;
        }
        // lists are reset in `begin`, so they start closed
        let mut draw_list = GraphicsCommandList::new(draw_allocators[0]);
        draw_list.close()?;
        let mut copy_list = GraphicsCommandList::new(copy_allocators[0]);
        copy_list.close()?;

        let rtv_heap =
            device.create_descriptor_heap(DescriptorHeapType::Rtv, FRAME_COUNT as u32, false)?;
        let pipeline_states = PipelineStates::initialize(device.as_mut(), options.vertex_float_count)?;

        let mut g = Graphics12 {
            platform,
            device,
            xbox,
            adapter,
            fences,
            fence_values: [0; FRAME_COUNT],
            draw_allocators,
            copy_allocators,
            draw_list,
            copy_list,
            needs_flush_draw: false,
            needs_flush_copy: false,
            vertices: Default::default(),
            indices: Default::default(),
            frame_index: 0,
            prev_begin_frame_index: 0,
            frame_started: false,
            swap_chain: SwapChainHost::new(rtv_heap),
            window: None,
            images: HashMap::new(),
            screen_image: None,
            next_image_id: 0,
            disposed_images: Default::default(),
            shaders: HashMap::new(),
            next_shader_id: 0,
            disposed_shaders: Default::default(),
            bytecode_cache: BytecodeCache::default(),
            pipeline_states,
            tmp_uniforms: Vec::new(),
            vsync: true,
            app_state: None,
            vertex_float_count: options.vertex_float_count,
        };

        if xbox {
            g.device.schedule_frame_event_x()?;
            g.app_state = Some(g.platform.register_app_state_notification()?);
        } else {
            // creating an image is the first thing to fail on a broken driver
            let id = g.new_image(1, 1)?;
            g.dispose_image(id)?;
        }
        Ok(g)
    }

    fn frame_view(&self) -> FrameView {
        FrameView {
            index: self.frame_index,
            screen_target: self.swap_chain.render_target(self.frame_index),
            screen_rtv: self.swap_chain.rtv(self.frame_index),
        }
    }

    fn image_mut(&mut self, id: ImageId) -> Result<&mut Image12, Error> {
        self.images
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidArgument(format!("{id} is not a live image")))
    }

    fn wait_for_command_queue(&mut self) -> Result<(), Error> {
        let fi = self.frame_index;
        self.fence_values[fi] += 1;
        let value = self.fence_values[fi];
        self.device.signal(self.fences[fi], value)?;
        let wait = logwise::perfwarn_begin!("Graphics12::wait_for_command_queue");
        let r = self.device.wait_for_fence(self.fences[fi], value);
        drop(wait);
        r
    }

    /// Executes the list if anything was recorded on it, waits for it and reopens it.
    fn flush_command_list(&mut self, kind: ListKind) -> Result<(), Error> {
        let needs_flush = match kind {
            ListKind::Draw => &mut self.needs_flush_draw,
            ListKind::Copy => &mut self.needs_flush_copy,
        };
        if !*needs_flush {
            return Ok(());
        }
        *needs_flush = false;

        {
            let list = match kind {
                ListKind::Draw => &mut self.draw_list,
                ListKind::Copy => &mut self.copy_list,
            };
            list.close()?;
            self.device.execute_command_list(list)?;
        }
        self.wait_for_command_queue()?;

        let fi = self.frame_index;
        match kind {
            ListKind::Draw => {
                self.device.reset_command_allocator(self.draw_allocators[fi])?;
                self.draw_list.reset(self.draw_allocators[fi])?;
            }
            ListKind::Copy => {
                self.device.reset_command_allocator(self.copy_allocators[fi])?;
                self.copy_list.reset(self.copy_allocators[fi])?;
                let device = self.device.as_mut();
                for image in self.images.values_mut() {
                    image.release_uploading_staging_buffers(device);
                }
            }
        }
        Ok(())
    }

    fn move_to_next_frame(&mut self) -> Result<(), Error> {
        let fi = self.frame_index;
        self.fence_values[fi] += 1;
        self.device.signal(self.fences[fi], self.fence_values[fi])?;

        self.frame_index = match self.swap_chain.current_back_buffer_index() {
            Some(index) if !self.xbox => index,
            _ => (fi + 1) % FRAME_COUNT,
        };

        let next = self.frame_index;
        if self.device.fence_completed_value(self.fences[next]) < self.fence_values[next] {
            let wait = logwise::perfwarn_begin!("Graphics12::move_to_next_frame");
            let r = self.device.wait_for_fence(self.fences[next], self.fence_values[next]);
            drop(wait);
            r?;
        }
        Ok(())
    }

    fn release_resources(&mut self, frame_index: usize) {
        let device = self.device.as_mut();
        for mut image in self.disposed_images[frame_index].drain(..) {
            image.dispose(device);
        }
        for mut shader in self.disposed_shaders[frame_index].drain(..) {
            shader.dispose(device);
        }
    }

    fn reset_vertices_and_indices(&mut self, frame_index: usize, release: bool) {
        let device = self.device.as_mut();
        self.vertices[frame_index].reset(device, release);
        self.indices[frame_index].reset(device, release);
    }

    fn update_swap_chain(&mut self, width: u32, height: u32) -> Result<(), Error> {
        let Some(window) = self.window else {
            return Err(Error::InvalidArgument(
                "the window handle is not initialized yet".to_string(),
            ));
        };
        if self.xbox {
            if self.swap_chain.is_initialized() {
                self.swap_chain.request_resize(width, height);
            } else {
                self.swap_chain.init_xbox(self.device.as_mut(), width, height)?;
            }
            return Ok(());
        }
        if !self.swap_chain.has_swap_chain() {
            self.frame_index = self.swap_chain.init_desktop(
                self.platform.as_mut(),
                self.device.as_mut(),
                window,
                width,
                height,
            )?;
            return Ok(());
        }
        self.swap_chain.request_resize(width, height);
        Ok(())
    }

    fn resize_swap_chain(&mut self, width: u32, height: u32) -> Result<(), Error> {
        // every back buffer reference must be gone before the buffers are resized
        self.wait_for_command_queue()?;
        self.release_resources(self.frame_index);
        self.swap_chain.resize(self.device.as_mut(), width, height)
    }

    fn present(&mut self) -> Result<(), Error> {
        if self.xbox {
            if self.swap_chain.is_initialized() {
                self.swap_chain
                    .present_x(self.device.as_mut(), self.frame_index)?;
            }
            return Ok(());
        }
        if self.swap_chain.has_swap_chain() {
            self.swap_chain.present(self.vsync)?;
        }
        Ok(())
    }

    fn transition_screen_to_present(&mut self) -> Result<(), Error> {
        let Some(screen) = self.screen_image else {
            return Ok(());
        };
        let frame = self.frame_view();
        let image = self.image_mut(screen)?;
        if let Some(barrier) = image.transition(&frame, ResourceStates::PRESENT)? {
            self.draw_list.resource_barrier(&[barrier]);
        }
        Ok(())
    }

    /// Services a pending console suspend.  Blocks until the app is resumed.
    fn handle_suspend(&mut self) -> Result<(), Error> {
        let Some(app_state) = &self.app_state else {
            return Ok(());
        };
        if app_state.suspending.try_recv().is_err() {
            return Ok(());
        }
        self.device.suspend_x()?;
        logwise::info_sync!("suspended");
        _ = app_state.suspended.send(());
        let wait = logwise::perfwarn_begin!("Graphics12::handle_suspend");
        let resumed = app_state.resume.recv();
        drop(wait);
        resumed.map_err(|_| Error::Backend {
            code: E_FAIL,
            message: "app state notifications ended while suspended".to_string(),
        })?;
        self.device.resume_x()?;
        self.device.schedule_frame_event_x()?;
        logwise::info_sync!("resumed");
        Ok(())
    }
}

impl Graphics for Graphics12 {
    fn initialize(&mut self) -> Result<(), Error> {
        // everything is set up in `new`
        Ok(())
    }

    fn begin(&mut self) -> Result<(), Error> {
        if self.xbox && !self.frame_started {
            self.handle_suspend()?;
            self.device.wait_frame_event_x()?;
        }
        self.frame_started = true;

        let fi = self.frame_index;
        if self.prev_begin_frame_index != fi {
            self.device.reset_command_allocator(self.draw_allocators[fi])?;
            self.device.reset_command_allocator(self.copy_allocators[fi])?;
        }
        self.prev_begin_frame_index = fi;

        self.draw_list.reset(self.draw_allocators[fi])?;
        self.copy_list.reset(self.copy_allocators[fi])?;
        Ok(())
    }

    fn end(&mut self, present: bool) -> Result<(), Error> {
        // the draw list is closed and submitted even when the copies fail, so the next `begin`
        // can reopen both lists
        let copied = self
            .flush_command_list(ListKind::Copy)
            .and_then(|()| self.copy_list.close());
        let presentable = if present {
            self.transition_screen_to_present()
        } else {
            Ok(())
        };
        let submitted = match self.draw_list.close() {
            Ok(()) => self.device.execute_command_list(&self.draw_list),
            Err(e) => Err(e),
        };
        self.needs_flush_draw = false;
        copied.and(presentable).and(submitted)?;

        let fi = self.frame_index;
        if self.vertices[fi].len() >= RELEASE_BUFFERS_THRESHOLD {
            self.wait_for_command_queue()?;
            self.release_resources(fi);
            self.reset_vertices_and_indices(fi, true);
        }

        self.pipeline_states.reset_constant_buffers(fi);

        if present {
            self.present()?;

            if let Some((width, height)) = self.swap_chain.take_pending_resize() {
                self.resize_swap_chain(width, height)?;
                if let Some(screen) = self.screen_image {
                    self.image_mut(screen)?.set_size(width, height);
                }
            }

            self.move_to_next_frame()?;
            let fi = self.frame_index;
            self.release_resources(fi);
            self.reset_vertices_and_indices(fi, false);
            self.frame_started = false;
        }
        Ok(())
    }

    fn set_window(&mut self, window: WindowHandle) {
        self.window = Some(window);
    }

    fn set_transparent(&mut self, transparent: bool) {
        if transparent {
            logwise::warn_sync!("transparent composition is not available on this backend");
        }
    }

    fn set_vsync_enabled(&mut self, enabled: bool) {
        self.vsync = enabled;
    }

    fn set_vertices(&mut self, vertices: &[f32], indices: &[u32]) -> Result<(), Error> {
        let fi = self.frame_index;
        let device = self.device.as_mut();
        self.vertices[fi].upload(device, vertices, f32::to_le_bytes)?;
        self.indices[fi].upload(device, indices, u32::to_le_bytes)?;
        Ok(())
    }

    fn new_image(&mut self, width: u32, height: u32) -> Result<ImageId, Error> {
        self.next_image_id += 1;
        let id = ImageId(self.next_image_id);
        let image = Image12::new(self.device.as_mut(), id, width, height)?;
        self.images.insert(id, image);
        Ok(id)
    }

    fn new_screen_framebuffer_image(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<ImageId, Error> {
        // a replaced screen keeps its size until the resize lands after the next present
        let (mut image_width, mut image_height) = (width, height);
        if let Some(old) = self.screen_image.take() {
            let image = self.image_mut(old)?;
            (image_width, image_height) = image.size();
            self.dispose_image(old)?;
        }

        self.update_swap_chain(width, height)?;

        self.next_image_id += 1;
        let id = ImageId(self.next_image_id);
        self.images
            .insert(id, Image12::new_screen(id, image_width, image_height));
        self.screen_image = Some(id);
        Ok(id)
    }

    fn dispose_image(&mut self, id: ImageId) -> Result<(), Error> {
        let image = self
            .images
            .remove(&id)
            .ok_or_else(|| Error::InvalidArgument(format!("{id} is not a live image")))?;
        if self.screen_image == Some(id) {
            self.screen_image = None;
        }
        self.disposed_images[self.frame_index].push(image);
        Ok(())
    }

    fn write_pixels(&mut self, id: ImageId, args: &[PixelsArgs<'_>]) -> Result<(), Error> {
        self.flush_command_list(ListKind::Draw)?;
        let frame = self.frame_view();
        let image = self
            .images
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidArgument(format!("{id} is not a live image")))?;
        image.write_pixels(self.device.as_mut(), &mut self.copy_list, &frame, args)?;
        self.needs_flush_copy = true;
        Ok(())
    }

    fn read_pixels(&mut self, id: ImageId, args: &mut [PixelsArgsMut<'_>]) -> Result<(), Error> {
        self.flush_command_list(ListKind::Draw)?;
        let frame = self.frame_view();
        let image = self
            .images
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidArgument(format!("{id} is not a live image")))?;
        let Some(readback) =
            image.record_read_pixels(self.device.as_mut(), &mut self.copy_list, &frame, &*args)?
        else {
            return Ok(());
        };

        self.needs_flush_copy = true;
        if let Err(e) = self.flush_command_list(ListKind::Copy) {
            readback.abandon(self.device.as_mut());
            return Err(e);
        }
        readback.finish(self.device.as_mut(), args)
    }

    fn new_shader(&mut self, ir: &Arc<ShaderIr>) -> Result<ShaderId, Error> {
        self.next_shader_id += 1;
        let id = ShaderId(self.next_shader_id);
        let target = self.device.shader_target();
        let shader = Shader12::new(id, ir.clone(), &mut self.bytecode_cache, target)?;
        self.shaders.insert(id, shader);
        Ok(id)
    }

    fn dispose_shader(&mut self, id: ShaderId) -> Result<(), Error> {
        let shader = self
            .shaders
            .remove(&id)
            .ok_or_else(|| Error::InvalidArgument(format!("{id} is not a live shader")))?;
        self.disposed_shaders[self.frame_index].push(shader);
        Ok(())
    }

    fn register_precompiled_shader(
        &mut self,
        hash: SourceHash,
        vertex: &[u8],
        pixel: &[u8],
    ) -> Result<(), Error> {
        self.bytecode_cache.register_precompiled(hash, vertex, pixel)
    }

    fn draw_triangles(&mut self, args: &DrawArgs<'_>) -> Result<(), Error> {
        let fi = self.frame_index;

        let stencil = args.fill_rule != FillRule::FillAll;
        let (dst_screen, (width, height)) = {
            let dst = self
                .images
                .get(&args.dst)
                .ok_or_else(|| Error::InvalidArgument(format!("{} is not a live image", args.dst)))?;
            (dst.is_screen(), dst.internal_size())
        };
        if dst_screen && stencil {
            return Err(Error::InvalidArgument(
                "stencils are not available on the screen framebuffer".to_string(),
            ));
        }
        for src in args.srcs.iter().flatten() {
            if *src == args.dst {
                return Err(Error::InvalidArgument(format!(
                    "{src} is both source and destination"
                )));
            }
            match self.images.get(src) {
                None => {
                    return Err(Error::InvalidArgument(format!("{src} is not a live image")));
                }
                Some(image) if image.is_screen() => {
                    return Err(Error::InvalidArgument(
                        "the screen cannot be a draw source".to_string(),
                    ));
                }
                Some(_) => {}
            }
        }
        let expected = self
            .shaders
            .get(&args.shader)
            .ok_or_else(|| Error::InvalidArgument(format!("{} is not a live shader", args.shader)))?
            .ir()
            .uniform_word_count();
        if args.uniforms.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "{} takes {expected} uniform words, got {}",
                args.shader,
                args.uniforms.len()
            )));
        }
        let (Some(vb), Some(ib)) = (self.vertices[fi].current(), self.indices[fi].current()) else {
            return Err(Error::InvalidArgument("draw before set_vertices".to_string()));
        };

        self.flush_command_list(ListKind::Copy)?;

        if self.pipeline_states.constant_buffers_used(fi) + 1 > NUM_DESCRIPTORS_PER_FRAME {
            self.flush_command_list(ListKind::Draw)?;
            self.pipeline_states
                .release_constant_buffers(self.device.as_mut(), fi);
        }

        let frame = self.frame_view();
        let mut barriers = Vec::new();
        if let Some(barrier) = self
            .image_mut(args.dst)?
            .transition(&frame, ResourceStates::RENDER_TARGET)?
        {
            barriers.push(barrier);
        }
        let mut srcs: [Option<ResourceId>; SHADER_SRC_IMAGE_COUNT] = [None; SHADER_SRC_IMAGE_COUNT];
        for (slot, src) in srcs.iter_mut().zip(args.srcs.iter()) {
            let Some(src) = src else {
                continue;
            };
            let image = self.image_mut(*src)?;
            *slot = Some(image.resource(&frame)?);
            if let Some(barrier) =
                image.transition(&frame, ResourceStates::PIXEL_SHADER_RESOURCE)?
            {
                barriers.push(barrier);
            }
        }
        if !barriers.is_empty() {
            self.draw_list.resource_barrier(&barriers);
        }

        let dst = self
            .images
            .get_mut(&args.dst)
            .ok_or_else(|| Error::InvalidArgument(format!("{} is not a live image", args.dst)))?;
        dst.set_as_render_target(self.device.as_mut(), &mut self.draw_list, &frame, stencil)?;

        let shader = self
            .shaders
            .get_mut(&args.shader)
            .ok_or_else(|| Error::InvalidArgument(format!("{} is not a live shader", args.shader)))?;
        uniforms::adjust_uniforms(
            shader.ir().uniform_types(),
            shader.uniform_offsets(),
            args.uniforms,
            &mut self.tmp_uniforms,
        );

        self.needs_flush_draw = true;
        self.draw_list.rs_set_viewport(Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        });
        self.draw_list
            .ia_set_primitive_topology(PrimitiveTopology::TriangleList);
        self.draw_list.ia_set_vertex_buffer(VertexBufferView {
            location: self.device.gpu_virtual_address(vb.resource),
            size_in_bytes: vb.size_in_bytes,
            stride_in_bytes: 4 * self.vertex_float_count as u32,
        });
        self.draw_list.ia_set_index_buffer(IndexBufferView {
            location: self.device.gpu_virtual_address(ib.resource),
            size_in_bytes: ib.size_in_bytes,
            format: Format::R32Uint,
        });

        self.pipeline_states.draw_triangles(
            self.device.as_mut(),
            &mut self.draw_list,
            fi,
            dst_screen,
            srcs,
            shader,
            args.dst_regions,
            &self.tmp_uniforms,
            args.blend,
            args.index_offset,
            args.fill_rule,
        )
    }

    fn needs_clearing_screen(&self) -> bool {
        true
    }

    fn max_image_size(&self) -> usize {
        MAX_TEXTURE_DIMENSION
    }
}

impl Drop for Graphics12 {
    fn drop(&mut self) {
        if let Err(e) = self.wait_for_command_queue() {
            logwise::warn_sync!(
                "GPU did not drain before shutdown: {err}",
                err = logwise::privacy::LogIt(&e)
            );
        }
        let device = self.device.as_mut();
        for (_, mut image) in self.images.drain() {
            image.dispose(device);
        }
        for (_, mut shader) in self.shaders.drain() {
            shader.dispose(device);
        }
        for fi in 0..FRAME_COUNT {
            for mut image in self.disposed_images[fi].drain(..) {
                image.dispose(device);
            }
            for mut shader in self.disposed_shaders[fi].drain(..) {
                shader.dispose(device);
            }
            self.vertices[fi].reset(device, true);
            self.indices[fi].reset(device, true);
            self.pipeline_states.release_constant_buffers(device, fi);
        }
        self.swap_chain.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::software::Probe;
    use super::*;
    use crate::builtin::{color_program, texture_program};
    use crate::graphics::{Blend, DstRegion, Rect, VERTEX_FLOAT_COUNT};
    use crate::shader_ir::Unit;
    use crate::sys::time::{Duration, Instant};
    use crate::uniforms::PreservedInputs;

    const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

    fn options(debug: bool) -> Options {
        Options {
            use_warp: true,
            use_debug_layer: debug,
            feature_level: FeatureLevel::default(),
            vertex_float_count: VERTEX_FLOAT_COUNT,
        }
    }

    fn graphics(platform: SoftwarePlatform) -> (Graphics12, Probe) {
        let probe = platform.probe();
        let g = Graphics12::new(Box::new(platform), options(true)).unwrap();
        (g, probe)
    }

    fn window() -> WindowHandle {
        use raw_window_handle::{RawWindowHandle, Win32WindowHandle};
        use std::num::NonZeroIsize;
        WindowHandle(RawWindowHandle::Win32(Win32WindowHandle::new(
            NonZeroIsize::new(1).unwrap(),
        )))
    }

    fn preserved(dst_size: (u32, u32), src_size: Option<(u32, u32)>, region: Rect) -> Vec<u32> {
        let mut src_sizes = [None; SHADER_SRC_IMAGE_COUNT];
        src_sizes[0] = src_size;
        let mut out = Vec::new();
        uniforms::write_preserved(
            &PreservedInputs {
                dst_size,
                src_sizes,
                dst_region: region,
                src_regions: [Rect::default(); SHADER_SRC_IMAGE_COUNT],
                unit: Unit::Pixels,
            },
            &mut out,
        );
        out
    }

    fn vertex(out: &mut Vec<f32>, x: f32, y: f32, uv: [f32; 2], color: [f32; 4]) {
        out.extend_from_slice(&[x, y, uv[0], uv[1]]);
        out.extend_from_slice(&color);
    }

    /// Two triangles covering `(0,0)-(w,h)`.
    fn quad(w: f32, h: f32, uv: [f32; 2], color: [f32; 4]) -> (Vec<f32>, Vec<u32>) {
        let mut v = Vec::new();
        vertex(&mut v, 0.0, 0.0, uv, color);
        vertex(&mut v, w, 0.0, uv, color);
        vertex(&mut v, 0.0, h, uv, color);
        vertex(&mut v, w, h, uv, color);
        (v, vec![0, 1, 2, 1, 3, 2])
    }

    fn draw(
        g: &mut Graphics12,
        dst: ImageId,
        src: Option<ImageId>,
        shader: ShaderId,
        index_count: usize,
        fill_rule: FillRule,
    ) -> Result<(), Error> {
        let dst_size = g.images[&dst].internal_size();
        let src_size = src.map(|s| g.images[&s].internal_size());
        let (w, h) = g.images[&dst].size();
        let region = Rect::sized(w, h);
        let uniforms = preserved(dst_size, src_size, region);
        let mut srcs = [None; SHADER_SRC_IMAGE_COUNT];
        srcs[0] = src;
        g.draw_triangles(&DrawArgs {
            dst,
            srcs,
            shader,
            dst_regions: &[DstRegion {
                region,
                index_count,
            }],
            index_offset: 0,
            blend: Blend::default(),
            uniforms: &uniforms,
            fill_rule,
        })
    }

    fn read(g: &mut Graphics12, id: ImageId, region: Rect) -> Vec<u8> {
        let mut pixels = vec![0u8; 4 * region.width() as usize * region.height() as usize];
        g.read_pixels(
            id,
            &mut [PixelsArgsMut {
                pixels: &mut pixels,
                region,
            }],
        )
        .unwrap();
        pixels
    }

    fn pixel(g: &mut Graphics12, id: ImageId, x: i32, y: i32) -> Vec<u8> {
        read(g, id, Rect::new(x, y, x + 1, y + 1))
    }

    #[test]
    fn red_triangle() {
        let (mut g, probe) = graphics(SoftwarePlatform::new());
        assert!(probe.debug_layer());
        g.begin().unwrap();
        let img = g.new_image(4, 4).unwrap();
        let shader = g.new_shader(&color_program()).unwrap();
        let mut v = Vec::new();
        vertex(&mut v, 0.0, 0.0, [0.0; 2], RED);
        vertex(&mut v, 4.0, 0.0, [0.0; 2], RED);
        vertex(&mut v, 0.0, 4.0, [0.0; 2], RED);
        g.set_vertices(&v, &[0, 1, 2]).unwrap();
        draw(&mut g, img, None, shader, 3, FillRule::FillAll).unwrap();
        g.end(false).unwrap();

        g.begin().unwrap();
        assert_eq!(pixel(&mut g, img, 1, 1), [255, 0, 0, 255]);
        assert_eq!(pixel(&mut g, img, 3, 3), [0, 0, 0, 0]);
        g.end(false).unwrap();
    }

    #[test]
    fn written_pixels_read_back() {
        let (mut g, _probe) = graphics(SoftwarePlatform::new());
        g.begin().unwrap();
        let img = g.new_image(8, 8).unwrap();
        let a: Vec<u8> = (0..16).collect();
        let b: Vec<u8> = (100..132).collect();
        g.write_pixels(
            img,
            &[
                PixelsArgs {
                    pixels: &a,
                    region: Rect::new(0, 0, 2, 2),
                },
                PixelsArgs {
                    pixels: &b,
                    region: Rect::new(4, 6, 8, 8),
                },
            ],
        )
        .unwrap();
        let mut first = vec![0u8; 16];
        let mut second = vec![0u8; 32];
        let mut untouched = vec![1u8; 4];
        g.read_pixels(
            img,
            &mut [
                PixelsArgsMut {
                    pixels: &mut first,
                    region: Rect::new(0, 0, 2, 2),
                },
                PixelsArgsMut {
                    pixels: &mut second,
                    region: Rect::new(4, 6, 8, 8),
                },
                PixelsArgsMut {
                    pixels: &mut untouched,
                    region: Rect::new(3, 3, 4, 4),
                },
            ],
        )
        .unwrap();
        g.end(false).unwrap();
        assert_eq!(first, a);
        assert_eq!(second, b);
        assert_eq!(untouched, [0, 0, 0, 0]);
    }

    #[test]
    fn textured_draw_samples_written_source() {
        let (mut g, _probe) = graphics(SoftwarePlatform::new());
        g.begin().unwrap();
        let src = g.new_image(2, 2).unwrap();
        let dst = g.new_image(4, 4).unwrap();
        let shader = g.new_shader(&texture_program()).unwrap();
        let blue = [0u8, 0, 255, 255].repeat(4);
        g.write_pixels(
            src,
            &[PixelsArgs {
                pixels: &blue,
                region: Rect::new(0, 0, 2, 2),
            }],
        )
        .unwrap();
        let (v, i) = quad(4.0, 4.0, [0.5, 0.5], [1.0; 4]);
        g.set_vertices(&v, &i).unwrap();
        draw(&mut g, dst, Some(src), shader, 6, FillRule::FillAll).unwrap();
        assert_eq!(pixel(&mut g, dst, 1, 1), [0, 0, 255, 255]);
        g.end(false).unwrap();
    }

    fn pentagram() -> (Vec<f32>, Vec<u32>) {
        let point = |k: usize| {
            let a = std::f32::consts::TAU * k as f32 / 5.0;
            (8.0 + 7.0 * a.sin(), 8.0 - 7.0 * a.cos())
        };
        let mut v = Vec::new();
        // star order, fanned from the first point
        for k in [0, 2, 4, 1, 3] {
            let (x, y) = point(k);
            vertex(&mut v, x, y, [0.0; 2], RED);
        }
        (v, vec![0, 1, 2, 0, 2, 3, 0, 3, 4])
    }

    #[test]
    fn fill_rules_differ_at_the_pentagram_center() {
        let (mut g, _probe) = graphics(SoftwarePlatform::new());
        g.begin().unwrap();
        let shader = g.new_shader(&color_program()).unwrap();
        let (v, i) = pentagram();
        g.set_vertices(&v, &i).unwrap();
        let mut results = Vec::new();
        for rule in [FillRule::FillAll, FillRule::NonZero, FillRule::EvenOdd] {
            let img = g.new_image(16, 16).unwrap();
            draw(&mut g, img, None, shader, 9, rule).unwrap();
            results.push((pixel(&mut g, img, 8, 8), pixel(&mut g, img, 8, 3)));
        }
        g.end(false).unwrap();

        let red = vec![255, 0, 0, 255];
        let clear = vec![0, 0, 0, 0];
        assert_eq!(results[0], (red.clone(), red.clone()));
        assert_eq!(results[1], (red.clone(), red.clone()));
        assert_eq!(results[2], (clear, red));
    }

    #[test]
    fn disposed_images_outlive_their_frame() {
        let (mut g, probe) = graphics(SoftwarePlatform::new());
        g.begin().unwrap();
        let img = g.new_image(4, 4).unwrap();
        let texture = g.images[&img].texture().unwrap();
        g.dispose_image(img).unwrap();
        g.end(true).unwrap();
        assert!(probe.is_live(texture));

        g.begin().unwrap();
        g.end(true).unwrap();
        assert!(!probe.is_live(texture));
        assert!(g.dispose_image(img).is_err());
    }

    #[test]
    fn many_draws_recycle_constant_buffers() {
        let (mut g, probe) = graphics(SoftwarePlatform::new());
        g.begin().unwrap();
        let img = g.new_image(4, 4).unwrap();
        let shader = g.new_shader(&color_program()).unwrap();
        let (v, i) = quad(4.0, 4.0, [0.0; 2], RED);
        g.set_vertices(&v, &i).unwrap();
        let executed = probe.executed_lists();
        for _ in 0..NUM_DESCRIPTORS_PER_FRAME + 8 {
            draw(&mut g, img, None, shader, 6, FillRule::FillAll).unwrap();
        }
        // the overflow flushed the draw list mid-frame
        assert!(probe.executed_lists() > executed);
        assert_eq!(pixel(&mut g, img, 2, 2), [255, 0, 0, 255]);
        g.end(false).unwrap();
    }

    #[test]
    fn upload_buffers_are_released_past_the_threshold() {
        let (mut g, probe) = graphics(SoftwarePlatform::new());
        g.begin().unwrap();
        let (v, i) = quad(1.0, 1.0, [0.0; 2], RED);
        g.set_vertices(&v, &i).unwrap();
        let first = g.vertices[0].current().unwrap().resource;
        for _ in 1..RELEASE_BUFFERS_THRESHOLD {
            g.set_vertices(&v, &i).unwrap();
        }
        g.end(false).unwrap();
        assert_eq!(g.vertices[0].len(), 0);
        assert!(!probe.is_live(first));
    }

    #[test]
    fn draw_argument_validation() {
        let (mut g, _probe) = graphics(SoftwarePlatform::new());
        g.set_window(window());
        g.begin().unwrap();
        let img = g.new_image(4, 4).unwrap();
        let screen = g.new_screen_framebuffer_image(8, 8).unwrap();
        let shader = g.new_shader(&color_program()).unwrap();
        assert!(matches!(
            draw(&mut g, img, None, shader, 3, FillRule::FillAll),
            Err(Error::InvalidArgument(_))
        ));
        let (v, i) = quad(4.0, 4.0, [0.0; 2], RED);
        g.set_vertices(&v, &i).unwrap();
        assert!(draw(&mut g, img, Some(img), shader, 6, FillRule::FillAll).is_err());
        assert!(draw(&mut g, img, Some(screen), shader, 6, FillRule::FillAll).is_err());
        assert!(draw(&mut g, screen, None, shader, 6, FillRule::EvenOdd).is_err());
        let bad = g.draw_triangles(&DrawArgs {
            dst: img,
            srcs: [None; SHADER_SRC_IMAGE_COUNT],
            shader,
            dst_regions: &[],
            index_offset: 0,
            blend: Blend::default(),
            uniforms: &[0; 3],
            fill_rule: FillRule::FillAll,
        });
        assert!(matches!(bad, Err(Error::InvalidArgument(_))));
        assert!(g.read_pixels(screen, &mut []).is_err());
        g.end(false).unwrap();
    }

    #[test]
    fn screen_presents_and_resizes_after_present() {
        let (mut g, probe) = graphics(SoftwarePlatform::new());
        assert!(g.new_screen_framebuffer_image(64, 32).is_err());
        g.set_window(window());

        g.begin().unwrap();
        let screen = g.new_screen_framebuffer_image(64, 32).unwrap();
        let shader = g.new_shader(&color_program()).unwrap();
        let (v, i) = quad(64.0, 32.0, [0.0; 2], RED);
        g.set_vertices(&v, &i).unwrap();
        draw(&mut g, screen, None, shader, 6, FillRule::FillAll).unwrap();
        g.end(true).unwrap();
        assert_eq!(probe.presents(), 1);
        let frame = probe.last_frame().unwrap();
        assert_eq!((frame.width, frame.height), (64, 32));
        assert_eq!(&frame.pixels[0..4], &[255, 0, 0, 255]);

        g.begin().unwrap();
        let screen = g.new_screen_framebuffer_image(128, 64).unwrap();
        assert_eq!(g.images[&screen].size(), (64, 32));
        g.end(true).unwrap();
        assert_eq!(g.images[&screen].size(), (128, 64));

        g.begin().unwrap();
        g.end(true).unwrap();
        let frame = probe.last_frame().unwrap();
        assert_eq!((frame.width, frame.height), (128, 64));
    }

    #[test]
    fn occluded_presents_are_throttled() {
        let (mut g, probe) = graphics(SoftwarePlatform::new());
        g.set_window(window());
        g.begin().unwrap();
        g.new_screen_framebuffer_image(16, 16).unwrap();
        let start = Instant::now();
        g.end(true).unwrap();
        assert_eq!(probe.presents(), 1);

        probe.set_occluded(true);
        g.begin().unwrap();
        g.end(true).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(probe.presents(), 1);
    }

    #[test]
    fn begin_resets_allocators_only_when_the_slot_changes() {
        let (mut g, probe) = graphics(SoftwarePlatform::new());
        let resets = probe.allocator_resets();
        g.begin().unwrap();
        g.end(false).unwrap();
        g.begin().unwrap();
        g.end(true).unwrap();
        assert_eq!(probe.allocator_resets(), resets);
        g.begin().unwrap();
        g.end(false).unwrap();
        assert_eq!(probe.allocator_resets(), resets + 2);
    }

    /// Frame slot, fence values, live resources and presents after `frames` on a fresh device.
    fn after_frames(
        with_screen: bool,
        frames: &[bool],
    ) -> (usize, [u64; FRAME_COUNT], usize, usize) {
        let (mut g, probe) = graphics(SoftwarePlatform::new());
        if with_screen {
            g.set_window(window());
        }
        for (n, present) in frames.iter().enumerate() {
            g.begin().unwrap();
            if with_screen && n == 0 {
                g.new_screen_framebuffer_image(16, 16).unwrap();
            }
            g.end(*present).unwrap();
        }
        (
            g.frame_index,
            g.fence_values,
            probe.live_resources(),
            probe.presents(),
        )
    }

    #[test]
    fn an_intermediate_end_changes_nothing() {
        for with_screen in [false, true] {
            assert_eq!(
                after_frames(with_screen, &[false, true]),
                after_frames(with_screen, &[true]),
                "with_screen: {with_screen}"
            );
        }
    }

    #[test]
    fn a_failed_copy_still_submits_the_draw_list() {
        let (mut g, probe) = graphics(SoftwarePlatform::new());
        g.begin().unwrap();
        let img = g.new_image(4, 4).unwrap();
        g.write_pixels(
            img,
            &[PixelsArgs {
                pixels: &[0u8; 4],
                region: Rect::new(0, 0, 1, 1),
            }],
        )
        .unwrap();
        let executed = probe.executed_lists();
        probe.fail_next_execute(crate::error::E_FAIL);
        assert!(matches!(g.end(false), Err(Error::Backend { .. })));
        assert_eq!(probe.executed_lists(), executed + 1);

        // both lists are closed, so the next frame can reopen them
        g.begin().unwrap();
        g.end(true).unwrap();
    }

    #[test]
    fn console_suspend_and_resume() {
        let platform = SoftwarePlatform::xbox();
        let probe = platform.probe();
        let mut g = Graphics12::new(Box::new(platform), options(false)).unwrap();
        assert!(g.adapter.is_none());
        g.set_window(window());

        probe.notify_suspending();
        probe.notify_resume();
        g.begin().unwrap();
        assert!(probe.suspend_acknowledged());
        assert_eq!(probe.suspends(), (1, 1));
        assert_eq!(probe.frame_events(), 1);

        let screen = g.new_screen_framebuffer_image(16, 16).unwrap();
        let shader = g.new_shader(&color_program()).unwrap();
        let (v, i) = quad(16.0, 16.0, [0.0; 2], RED);
        g.set_vertices(&v, &i).unwrap();
        draw(&mut g, screen, None, shader, 6, FillRule::FillAll).unwrap();
        g.end(true).unwrap();
        assert_eq!(probe.presents(), 1);
        assert_eq!(g.frame_index, 1);

        // a frame in progress doesn't wait for another frame event
        g.begin().unwrap();
        g.end(false).unwrap();
        g.begin().unwrap();
        g.end(true).unwrap();
        assert_eq!(probe.frame_events(), 2);
    }

    #[test]
    fn adapter_selection() {
        let platform = SoftwarePlatform::new()
            .with_adapter("Unsupported GPU", false)
            .with_adapter("Supported GPU", true);
        let g = Graphics12::new(
            Box::new(platform),
            Options {
                use_warp: false,
                ..options(false)
            },
        )
        .unwrap();
        assert_eq!(g.adapter.as_ref().unwrap().description, "Supported GPU");

        let none = Graphics12::new(
            Box::new(SoftwarePlatform::new().with_adapter("Unsupported GPU", false)),
            Options {
                use_warp: false,
                ..options(false)
            },
        );
        assert!(matches!(none, Err(Error::Unsupported(_))));

        let warp = Graphics12::new(Box::new(SoftwarePlatform::new()), options(false)).unwrap();
        assert!(warp.adapter.as_ref().unwrap().software);
    }

    #[test]
    fn device_removal_surfaces_as_device_lost() {
        let (mut g, probe) = graphics(SoftwarePlatform::new());
        g.begin().unwrap();
        let img = g.new_image(4, 4).unwrap();
        probe.remove_device();
        let pixels = [0u8; 4];
        let r = g
            .write_pixels(
                img,
                &[PixelsArgs {
                    pixels: &pixels,
                    region: Rect::new(0, 0, 1, 1),
                }],
            )
            .and_then(|()| g.end(false));
        assert_eq!(r, Err(Error::DeviceLost));
    }

    #[test]
    fn buffer_ring_reuses_slots() {
        let (mut g, _probe) = graphics(SoftwarePlatform::new());
        let device = g.device.as_mut();
        let mut ring = BufferRing::default();
        let a = ring.upload(device, &[1u32, 2, 3], u32::to_le_bytes).unwrap();
        assert_eq!(a.size_in_bytes, 16);
        ring.reset(device, false);
        let b = ring.upload(device, &[1u32], u32::to_le_bytes).unwrap();
        assert_eq!(a.resource, b.resource);
        let c = ring.upload(device, &[0u32; 5], u32::to_le_bytes).unwrap();
        assert_eq!(c.size_in_bytes, 32);
        assert_eq!(ring.len(), 2);
        ring.reset(device, true);
        assert!(ring.current().is_none());
    }
}
