// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The command queue.

A [CommandQueue] accumulates one frame's commands together with the vertex and index arenas
its draws point into.  Consecutive draws that share pipeline state and uniforms are merged into
one command over a longer vertex span.  The vertex arena is divided into chunks of at most
`max_vertex_float_count` floats; indices are stored relative to their chunk, and a draw never
merges across a chunk boundary.

Flushing walks the commands chunk by chunk on the render thread: each chunk is uploaded with one
[Graphics::set_vertices] call, then its commands execute in order.
*/

use crate::command::{Command, DrawTrianglesCommand, Exec, ExecContext, Finalizer};
use crate::config::Config;
use crate::error::{Error, ErrorSlot};
use crate::graphics::{Blend, DstRegion, FillRule, Graphics, Rect, SHADER_SRC_IMAGE_COUNT};
use crate::image::Image;
use crate::shader::Shader;
use crate::uniforms::{self, PreservedInputs};

/// Draw commands kept for reuse across flushes.
const DRAW_POOL_CAPACITY: usize = 1024;

/// Vertex layout and upload chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexLimits {
    pub vertex_float_count: usize,
    pub max_vertex_float_count: usize,
}

impl From<&Config> for VertexLimits {
    fn from(config: &Config) -> Self {
        VertexLimits {
            vertex_float_count: config.vertex_float_count,
            max_vertex_float_count: config.max_vertex_float_count,
        }
    }
}

impl Default for VertexLimits {
    fn default() -> Self {
        VertexLimits::from(&Config::default())
    }
}

/// One draw as submitted by the image layer.
#[derive(Debug, Clone, Copy)]
pub struct DrawRequest<'a> {
    pub dst: &'a Image,
    pub srcs: [Option<&'a Image>; SHADER_SRC_IMAGE_COUNT],
    /// Interleaved vertices, `vertex_float_count` floats each.
    pub vertices: &'a [f32],
    /// Triangle list indices, local to `vertices`.
    pub indices: &'a [u32],
    pub blend: Blend,
    pub dst_region: Rect,
    pub src_regions: [Rect; SHADER_SRC_IMAGE_COUNT],
    pub shader: &'a Shader,
    /// The shader's own uniforms, unpadded.
    pub uniforms: &'a [u32],
    pub fill_rule: FillRule,
}

/// Axis-aligned bounds of some vertices' positions.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bounds {
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
}

impl Bounds {
    fn of(vertices: &[f32], stride: usize) -> Option<Bounds> {
        let mut it = vertices.chunks_exact(stride);
        let first = it.next()?;
        let mut b = Bounds {
            min_x: first[0],
            min_y: first[1],
            max_x: first[0],
            max_y: first[1],
        };
        for v in it {
            b.min_x = b.min_x.min(v[0]);
            b.min_y = b.min_y.min(v[1]);
            b.max_x = b.max_x.max(v[0]);
            b.max_y = b.max_y.max(v[1]);
        }
        Some(b)
    }

    /// Overlap with a one-pixel margin, since rasterized coverage extends past the vertices.
    fn overlaps(&self, other: &Bounds) -> bool {
        const MARGIN: f32 = 1.0;
        self.min_x < other.max_x + MARGIN
            && other.min_x < self.max_x + MARGIN
            && self.min_y < other.max_y + MARGIN
            && other.min_y < self.max_y + MARGIN
    }
}

fn same_image(a: Option<&Image>, b: Option<&Image>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.same(b),
        (None, None) => true,
        _ => false,
    }
}

pub(crate) struct CommandQueue {
    commands: Vec<Command>,
    vertices: Vec<f32>,
    indices: Vec<u32>,
    /// Floats in the current upload chunk.
    tmp_num_vertex_floats: usize,
    draw_pool: Vec<Box<DrawTrianglesCommand>>,
    /// Preserved and user uniforms of every draw, for the whole frame.
    uniform_slab: Vec<u32>,
    finalizers: Vec<Finalizer>,
    err: ErrorSlot,
    limits: VertexLimits,
}

impl CommandQueue {
    pub(crate) fn new(limits: VertexLimits) -> Self {
        CommandQueue {
            commands: Vec::new(),
            vertices: Vec::new(),
            indices: Vec::new(),
            tmp_num_vertex_floats: 0,
            draw_pool: Vec::new(),
            uniform_slab: Vec::new(),
            finalizers: Vec::new(),
            err: ErrorSlot::new(),
            limits,
        }
    }

    pub(crate) fn limits(&self) -> VertexLimits {
        self.limits
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn error(&self) -> &ErrorSlot {
        &self.err
    }

    /// Appends a non-draw command.
    pub(crate) fn push(&mut self, command: Command) {
        debug_assert!(command.as_draw().is_none());
        self.commands.push(command);
    }

    /// Registers work to run when the frame ends.
    pub(crate) fn add_finalizer(&mut self, f: Finalizer) {
        self.finalizers.push(f);
    }

    fn validate(&self, req: &DrawRequest<'_>) -> Result<(), Error> {
        let vfc = self.limits.vertex_float_count;
        if req.vertices.len() > self.limits.max_vertex_float_count {
            return Err(Error::InvalidArgument(format!(
                "{} vertex floats exceed the limit of {}",
                req.vertices.len(),
                self.limits.max_vertex_float_count
            )));
        }
        if req.vertices.len() % vfc != 0 {
            return Err(Error::InvalidArgument(format!(
                "{} vertex floats is not a multiple of {vfc}",
                req.vertices.len()
            )));
        }
        if req.indices.len() % 3 != 0 {
            return Err(Error::InvalidArgument(format!(
                "{} indices do not form a triangle list",
                req.indices.len()
            )));
        }
        let num_vertices = req.vertices.len() / vfc;
        if let Some(i) = req.indices.iter().find(|i| **i as usize >= num_vertices) {
            return Err(Error::InvalidArgument(format!(
                "index {i} is outside {num_vertices} vertices"
            )));
        }
        req.dst.ensure_live()?;
        if req.shader.is_disposed() {
            return Err(Error::InvalidArgument("shader is disposed".to_string()));
        }
        for src in req.srcs.iter().flatten() {
            src.ensure_live()?;
            if src.is_screen() {
                return Err(Error::InvalidArgument(
                    "the screen cannot be a draw source".to_string(),
                ));
            }
            if src.same(req.dst) {
                return Err(Error::InvalidArgument(
                    "an image cannot be both source and destination".to_string(),
                ));
            }
        }
        let expected = req.shader.ir().uniform_word_count() - uniforms::PRESERVED_UNIFORM_WORDS;
        if req.uniforms.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "shader {} takes {expected} uniform words, got {}",
                req.shader.name(),
                req.uniforms.len()
            )));
        }
        Ok(())
    }

    /// Appends one draw, merging it into the previous one when possible.
    pub(crate) fn enqueue_draw_triangles(&mut self, req: &DrawRequest<'_>) -> Result<(), Error> {
        self.validate(req)?;
        // nothing to rasterize; a recorded draw would reach the backend with no vertices bound
        if req.indices.is_empty() {
            return Ok(());
        }
        let vfc = self.limits.vertex_float_count;

        let mut split = false;
        if self.tmp_num_vertex_floats + req.vertices.len() > self.limits.max_vertex_float_count {
            self.tmp_num_vertex_floats = 0;
            split = true;
        }

        let vertex_start = self.vertices.len();
        self.vertices.extend_from_slice(req.vertices);
        let base = (self.tmp_num_vertex_floats / vfc) as u32;
        self.indices.extend(req.indices.iter().map(|i| i + base));
        self.tmp_num_vertex_floats += req.vertices.len();
        let vertex_range = vertex_start..self.vertices.len();

        let uniform_start = self.uniform_slab.len();
        let mut src_sizes = [None; SHADER_SRC_IMAGE_COUNT];
        for (size, src) in src_sizes.iter_mut().zip(req.srcs.iter()) {
            *size = src.map(Image::internal_size);
        }
        uniforms::write_preserved(
            &PreservedInputs {
                dst_size: req.dst.internal_size(),
                src_sizes,
                dst_region: req.dst_region,
                src_regions: req.src_regions,
                unit: req.shader.ir().unit(),
            },
            &mut self.uniform_slab,
        );
        self.uniform_slab.extend_from_slice(req.uniforms);
        req.shader
            .ir()
            .filter_uniforms(&mut self.uniform_slab[uniform_start..]);
        let uniform_range = uniform_start..self.uniform_slab.len();

        if !split && self.try_merge(req, &vertex_range, &uniform_range) {
            self.uniform_slab.truncate(uniform_start);
            return Ok(());
        }

        let mut cmd = self.draw_pool.pop().unwrap_or_default();
        cmd.dst = Some(req.dst.clone());
        for (slot, src) in cmd.srcs.iter_mut().zip(req.srcs.iter()) {
            *slot = src.cloned();
        }
        cmd.shader = Some(req.shader.clone());
        cmd.vertices = vertex_range;
        cmd.uniforms = uniform_range;
        cmd.dst_regions.push(DstRegion {
            region: req.dst_region,
            index_count: req.indices.len(),
        });
        cmd.blend = req.blend;
        cmd.fill_rule = req.fill_rule;
        cmd.vertex_float_count = vfc;
        self.commands.push(Command::DrawTriangles(cmd));
        Ok(())
    }

    fn try_merge(
        &mut self,
        req: &DrawRequest<'_>,
        vertex_range: &std::ops::Range<usize>,
        uniform_range: &std::ops::Range<usize>,
    ) -> bool {
        let vfc = self.limits.vertex_float_count;
        let Some(last) = self.commands.last_mut().and_then(Command::as_draw_mut) else {
            return false;
        };
        if !same_image(last.dst.as_ref(), Some(req.dst)) {
            return false;
        }
        if !last
            .srcs
            .iter()
            .zip(req.srcs.iter())
            .all(|(a, b)| same_image(a.as_ref(), *b))
        {
            return false;
        }
        if !last.shader.as_ref().is_some_and(|s| s.same(req.shader)) {
            return false;
        }
        if last.blend != req.blend || last.fill_rule != req.fill_rule {
            return false;
        }
        if self.uniform_slab[last.uniforms.clone()] != self.uniform_slab[uniform_range.clone()] {
            return false;
        }
        if req.fill_rule != FillRule::FillAll {
            let previous = Bounds::of(&self.vertices[last.vertices.clone()], vfc);
            let next = Bounds::of(&self.vertices[vertex_range.clone()], vfc);
            if let (Some(previous), Some(next)) = (previous, next)
                && previous.overlaps(&next)
            {
                return false;
            }
        }

        debug_assert_eq!(last.vertices.end, vertex_range.start);
        last.vertices.end = vertex_range.end;
        match last.dst_regions.last_mut() {
            Some(r) if r.region == req.dst_region => r.index_count += req.indices.len(),
            _ => last.dst_regions.push(DstRegion {
                region: req.dst_region,
                index_count: req.indices.len(),
            }),
        }
        true
    }

    /// Whether flushing this queue must block the game thread.
    pub(crate) fn needs_sync(&self, end_frame: bool, vsync: bool) -> bool {
        (end_frame && vsync) || self.commands.iter().any(Exec::needs_sync)
    }

    /// Executes every command against `graphics`.  Runs on the render thread.
    ///
    /// `end` is called whenever `begin` succeeded, even if a command failed; the first error wins
    /// and is latched.
    pub(crate) fn flush(&mut self, graphics: &mut dyn Graphics, end_frame: bool) -> Result<(), Error> {
        self.err.check()?;
        if self.commands.is_empty() && !end_frame {
            return Ok(());
        }
        logwise::trace_sync!(
            "flush {count} commands, end_frame {end_frame}",
            count = self.commands.len(),
            end_frame = logwise::privacy::LogIt(&end_frame)
        );

        let result = match graphics.begin() {
            Ok(()) => {
                let body = self.exec_commands(graphics);
                let end = graphics.end(end_frame);
                body.and(end)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            logwise::error_sync!("flush failed: {err}", err = logwise::privacy::LogIt(e));
            self.err.latch(e.clone());
        }
        self.release(end_frame);
        result
    }

    fn exec_commands(&mut self, graphics: &mut dyn Graphics) -> Result<(), Error> {
        let max = self.limits.max_vertex_float_count;
        let mut vs = &self.vertices[..];
        let mut es = &self.indices[..];
        let mut remaining = &mut self.commands[..];

        while !remaining.is_empty() {
            let mut nv = 0;
            let mut ne = 0;
            let mut nc = 0;
            for c in remaining.iter() {
                if let Some(d) = c.as_draw() {
                    if nc > 0 && nv + d.num_vertex_floats() > max {
                        break;
                    }
                    nv += d.num_vertex_floats();
                    ne += d.num_indices();
                }
                nc += 1;
            }
            if ne > 0 {
                graphics.set_vertices(&vs[..nv], &es[..ne])?;
            }
            vs = &vs[nv..];
            es = &es[ne..];

            let (prefix, rest) = remaining.split_at_mut(nc);
            let mut ctx = ExecContext {
                graphics: &mut *graphics,
                uniforms: &self.uniform_slab,
                index_offset: 0,
                finalizers: &mut self.finalizers,
            };
            for c in prefix.iter_mut() {
                logwise::trace_sync!("exec {command}", command = c.to_string());
                c.exec(&mut ctx)?;
                if let Some(d) = c.as_draw() {
                    ctx.index_offset += d.num_indices();
                }
            }
            remaining = rest;
        }
        Ok(())
    }

    fn release(&mut self, end_frame: bool) {
        for c in self.commands.drain(..) {
            if let Command::DrawTriangles(mut d) = c
                && self.draw_pool.len() < DRAW_POOL_CAPACITY
            {
                d.clear();
                self.draw_pool.push(d);
            }
        }
        self.vertices.clear();
        self.indices.clear();
        self.tmp_num_vertex_floats = 0;
        if end_frame {
            self.uniform_slab.clear();
            for f in self.finalizers.drain(..) {
                f();
            }
        }
    }

    /// Drops every pending command without executing it and runs the finalizers.
    pub(crate) fn discard(&mut self) {
        self.release(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::color_program;
    use crate::graphics::{DrawArgs, ImageId, PixelsArgs, PixelsArgsMut, ShaderId, WindowHandle};
    use crate::shader_ir::ShaderIr;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Begin,
        End(bool),
        SetVertices(Vec<f32>, Vec<u32>),
        Draw {
            index_offset: usize,
            regions: Vec<DstRegion>,
        },
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        fail_draw: Option<Error>,
    }

    impl Graphics for Recorder {
        fn initialize(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn begin(&mut self) -> Result<(), Error> {
            self.calls.push(Call::Begin);
            Ok(())
        }
        fn end(&mut self, present: bool) -> Result<(), Error> {
            self.calls.push(Call::End(present));
            Ok(())
        }
        fn set_window(&mut self, _window: WindowHandle) {}
        fn set_transparent(&mut self, _transparent: bool) {}
        fn set_vsync_enabled(&mut self, _enabled: bool) {}
        fn set_vertices(&mut self, vertices: &[f32], indices: &[u32]) -> Result<(), Error> {
            self.calls
                .push(Call::SetVertices(vertices.to_vec(), indices.to_vec()));
            Ok(())
        }
        fn new_image(&mut self, _w: u32, _h: u32) -> Result<ImageId, Error> {
            Ok(ImageId(1))
        }
        fn new_screen_framebuffer_image(&mut self, _w: u32, _h: u32) -> Result<ImageId, Error> {
            Ok(ImageId(2))
        }
        fn dispose_image(&mut self, _id: ImageId) -> Result<(), Error> {
            Ok(())
        }
        fn write_pixels(&mut self, _id: ImageId, _args: &[PixelsArgs<'_>]) -> Result<(), Error> {
            Ok(())
        }
        fn read_pixels(&mut self, _id: ImageId, _args: &mut [PixelsArgsMut<'_>]) -> Result<(), Error> {
            Ok(())
        }
        fn new_shader(&mut self, _ir: &Arc<ShaderIr>) -> Result<ShaderId, Error> {
            Ok(ShaderId(1))
        }
        fn dispose_shader(&mut self, _id: ShaderId) -> Result<(), Error> {
            Ok(())
        }
        fn draw_triangles(&mut self, args: &DrawArgs<'_>) -> Result<(), Error> {
            if let Some(e) = self.fail_draw.take() {
                return Err(e);
            }
            self.calls.push(Call::Draw {
                index_offset: args.index_offset,
                regions: args.dst_regions.to_vec(),
            });
            Ok(())
        }
        fn needs_clearing_screen(&self) -> bool {
            false
        }
        fn max_image_size(&self) -> usize {
            4096
        }
    }

    fn fixtures() -> (Image, Shader) {
        let dst = Image::new(8, 8, false);
        dst.set_driver_id(ImageId(1));
        let shader = Shader::new(color_program());
        shader.set_driver_id(ShaderId(1));
        (dst, shader)
    }

    fn triangle(x: f32, y: f32) -> Vec<f32> {
        let mut v = Vec::new();
        for (px, py) in [(x, y), (x + 1.0, y), (x, y + 1.0)] {
            v.extend_from_slice(&[px, py, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        }
        v
    }

    fn request<'a>(
        dst: &'a Image,
        shader: &'a Shader,
        vertices: &'a [f32],
        indices: &'a [u32],
        fill_rule: FillRule,
    ) -> DrawRequest<'a> {
        DrawRequest {
            dst,
            srcs: [None; SHADER_SRC_IMAGE_COUNT],
            vertices,
            indices,
            blend: Blend::SOURCE_OVER,
            dst_region: dst.bounds(),
            src_regions: [Rect::default(); SHADER_SRC_IMAGE_COUNT],
            shader,
            uniforms: &[],
            fill_rule,
        }
    }

    #[test]
    fn compatible_draws_merge() {
        let (dst, shader) = fixtures();
        let mut q = CommandQueue::new(VertexLimits::default());
        let a = triangle(0.0, 0.0);
        let b = triangle(4.0, 4.0);
        q.enqueue_draw_triangles(&request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll))
            .unwrap();
        q.enqueue_draw_triangles(&request(&dst, &shader, &b, &[0, 1, 2], FillRule::FillAll))
            .unwrap();
        assert_eq!(q.len(), 1);
        let d = q.commands[0].as_draw().unwrap();
        assert_eq!(d.num_vertices(), 6);
        assert_eq!(d.dst_regions.len(), 1);
        assert_eq!(d.dst_regions[0].index_count, 6);
        assert_eq!(q.indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn different_blend_does_not_merge() {
        let (dst, shader) = fixtures();
        let mut q = CommandQueue::new(VertexLimits::default());
        let a = triangle(0.0, 0.0);
        q.enqueue_draw_triangles(&request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll))
            .unwrap();
        let mut r = request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll);
        r.blend = Blend::COPY;
        q.enqueue_draw_triangles(&r).unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn overlapping_stencil_draws_do_not_merge() {
        let (dst, shader) = fixtures();
        let mut q = CommandQueue::new(VertexLimits::default());
        let a = triangle(0.0, 0.0);
        let near = triangle(1.5, 0.0);
        let far = triangle(5.0, 5.0);
        q.enqueue_draw_triangles(&request(&dst, &shader, &a, &[0, 1, 2], FillRule::EvenOdd))
            .unwrap();
        q.enqueue_draw_triangles(&request(&dst, &shader, &near, &[0, 1, 2], FillRule::EvenOdd))
            .unwrap();
        assert_eq!(q.len(), 2);
        q.enqueue_draw_triangles(&request(&dst, &shader, &far, &[0, 1, 2], FillRule::EvenOdd))
            .unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn new_region_appends_a_dst_region() {
        let (dst, shader) = fixtures();
        let mut q = CommandQueue::new(VertexLimits::default());
        let a = triangle(0.0, 0.0);
        q.enqueue_draw_triangles(&request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll))
            .unwrap();
        let mut r = request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll);
        r.dst_region = Rect::new(0, 0, 2, 2);
        q.enqueue_draw_triangles(&r).unwrap();
        let d = q.commands[0].as_draw().unwrap();
        assert_eq!(
            d.dst_regions,
            vec![
                DstRegion {
                    region: dst.bounds(),
                    index_count: 3
                },
                DstRegion {
                    region: Rect::new(0, 0, 2, 2),
                    index_count: 3
                }
            ]
        );
    }

    #[test]
    fn oversized_and_malformed_draws_are_rejected() {
        let (dst, shader) = fixtures();
        let mut q = CommandQueue::new(VertexLimits {
            vertex_float_count: 8,
            max_vertex_float_count: 16,
        });
        let a = triangle(0.0, 0.0);
        assert!(matches!(
            q.enqueue_draw_triangles(&request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll)),
            Err(Error::InvalidArgument(_))
        ));
        let two = &a[..16];
        assert!(
            q.enqueue_draw_triangles(&request(&dst, &shader, two, &[0, 1], FillRule::FillAll))
                .is_err()
        );
        assert!(
            q.enqueue_draw_triangles(&request(&dst, &shader, two, &[0, 1, 2], FillRule::FillAll))
                .is_err()
        );
        assert!(q.is_empty());
    }

    #[test]
    fn draws_without_indices_are_dropped() {
        let (dst, shader) = fixtures();
        let mut q = CommandQueue::new(VertexLimits::default());
        let a = triangle(0.0, 0.0);
        q.enqueue_draw_triangles(&request(&dst, &shader, &[], &[], FillRule::FillAll))
            .unwrap();
        q.enqueue_draw_triangles(&request(&dst, &shader, &a, &[], FillRule::EvenOdd))
            .unwrap();
        assert!(q.is_empty());
        assert!(q.vertices.is_empty());

        let mut g = Recorder::default();
        q.flush(&mut g, true).unwrap();
        assert_eq!(g.calls, vec![Call::Begin, Call::End(true)]);
    }

    #[test]
    fn flush_chunks_at_the_vertex_limit() {
        let (dst, shader) = fixtures();
        let mut q = CommandQueue::new(VertexLimits {
            vertex_float_count: 8,
            max_vertex_float_count: 32,
        });
        let a = triangle(0.0, 0.0);
        let b = &triangle(4.0, 4.0)[..16];
        q.enqueue_draw_triangles(&request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll))
            .unwrap();
        q.enqueue_draw_triangles(&request(&dst, &shader, b, &[0, 1, 1], FillRule::FillAll))
            .unwrap();
        assert_eq!(q.len(), 2);

        let mut g = Recorder::default();
        q.flush(&mut g, false).unwrap();
        let uploads: Vec<_> = g
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::SetVertices(v, i) => Some((v.len(), i.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(uploads, vec![(24, vec![0, 1, 2]), (16, vec![0, 1, 1])]);
        assert_eq!(g.calls.first(), Some(&Call::Begin));
        assert_eq!(g.calls.last(), Some(&Call::End(false)));
        assert!(q.is_empty());
        assert!(q.vertices.is_empty());
    }

    #[test]
    fn index_offset_accumulates_within_a_chunk() {
        let (dst, shader) = fixtures();
        let mut q = CommandQueue::new(VertexLimits::default());
        let a = triangle(0.0, 0.0);
        q.enqueue_draw_triangles(&request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll))
            .unwrap();
        let mut r = request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll);
        r.blend = Blend::COPY;
        q.enqueue_draw_triangles(&r).unwrap();
        let mut g = Recorder::default();
        q.flush(&mut g, true).unwrap();
        let offsets: Vec<usize> = g
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Draw { index_offset, .. } => Some(*index_offset),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![0, 3]);
    }

    #[test]
    fn failed_draw_still_ends_and_latches() {
        let (dst, shader) = fixtures();
        let mut q = CommandQueue::new(VertexLimits::default());
        let a = triangle(0.0, 0.0);
        q.enqueue_draw_triangles(&request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll))
            .unwrap();
        let mut g = Recorder {
            fail_draw: Some(Error::DeviceLost),
            ..Recorder::default()
        };
        assert_eq!(q.flush(&mut g, true), Err(Error::DeviceLost));
        assert_eq!(g.calls.last(), Some(&Call::End(true)));

        g.calls.clear();
        assert_eq!(q.flush(&mut g, true), Err(Error::DeviceLost));
        assert!(g.calls.is_empty());
    }

    #[test]
    fn empty_flush_without_end_frame_skips_the_backend() {
        let mut q = CommandQueue::new(VertexLimits::default());
        let mut g = Recorder::default();
        q.flush(&mut g, false).unwrap();
        assert!(g.calls.is_empty());
        q.flush(&mut g, true).unwrap();
        assert_eq!(g.calls, vec![Call::Begin, Call::End(true)]);
    }

    #[test]
    fn finalizers_run_at_frame_end_only() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let ran = Arc::new(AtomicUsize::new(0));
        let mut q = CommandQueue::new(VertexLimits::default());
        let r = ran.clone();
        q.add_finalizer(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        let mut g = Recorder::default();
        let (dst, shader) = fixtures();
        let a = triangle(0.0, 0.0);
        q.enqueue_draw_triangles(&request(&dst, &shader, &a, &[0, 1, 2], FillRule::FillAll))
            .unwrap();
        q.flush(&mut g, false).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        q.flush(&mut g, true).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
