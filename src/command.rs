// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Queued commands.

A [Command] is recorded on the game thread and executed on the render thread during a flush.
Draw commands dominate, so they are boxed and pooled by the queue.
*/

use crate::error::Error;
use crate::graphics::{
    Blend, DrawArgs, DstRegion, FillRule, Graphics, ImageId, PixelsArgs, PixelsArgsMut, Rect,
    SHADER_SRC_IMAGE_COUNT,
};
use crate::image::{Image, PendingWrite};
use crate::shader::Shader;
use std::fmt::Display;
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// Work deferred to the end of the frame.
pub(crate) type Finalizer = Box<dyn FnOnce() + Send>;

/// Borrowed queue state a command executes against.
pub(crate) struct ExecContext<'a> {
    pub(crate) graphics: &'a mut dyn Graphics,
    /// The queue's uniform slab.
    pub(crate) uniforms: &'a [u32],
    pub(crate) index_offset: usize,
    pub(crate) finalizers: &'a mut Vec<Finalizer>,
}

#[derive(Debug, Default)]
pub(crate) struct DrawTrianglesCommand {
    pub(crate) dst: Option<Image>,
    pub(crate) srcs: [Option<Image>; SHADER_SRC_IMAGE_COUNT],
    pub(crate) shader: Option<Shader>,
    /// Float range in the queue's vertex arena.
    pub(crate) vertices: Range<usize>,
    /// Word range in the queue's uniform slab.
    pub(crate) uniforms: Range<usize>,
    pub(crate) dst_regions: Vec<DstRegion>,
    pub(crate) blend: Blend,
    pub(crate) fill_rule: FillRule,
    /// Floats per vertex.
    pub(crate) vertex_float_count: usize,
}

impl DrawTrianglesCommand {
    pub(crate) fn num_vertex_floats(&self) -> usize {
        self.vertices.len()
    }

    pub(crate) fn num_vertices(&self) -> usize {
        self.vertices.len() / self.vertex_float_count
    }

    pub(crate) fn num_indices(&self) -> usize {
        self.dst_regions.iter().map(|r| r.index_count).sum()
    }

    /// Drops every reference so the box can go back to the pool.
    pub(crate) fn clear(&mut self) {
        self.dst = None;
        self.srcs = Default::default();
        self.shader = None;
        self.vertices = 0..0;
        self.uniforms = 0..0;
        self.dst_regions.clear();
        self.blend = Blend::default();
        self.fill_rule = FillRule::default();
    }

    fn exec(&self, ctx: &mut ExecContext<'_>) -> Result<(), Error> {
        let dst = self
            .dst
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("draw without destination".to_string()))?
            .driver_id()?;
        let shader = self
            .shader
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("draw without shader".to_string()))?
            .driver_id()?;
        let mut srcs: [Option<ImageId>; SHADER_SRC_IMAGE_COUNT] = [None; SHADER_SRC_IMAGE_COUNT];
        for (slot, src) in srcs.iter_mut().zip(self.srcs.iter()) {
            if let Some(src) = src {
                *slot = Some(src.driver_id()?);
            }
        }
        let args = DrawArgs {
            dst,
            srcs,
            shader,
            dst_regions: &self.dst_regions,
            index_offset: ctx.index_offset,
            blend: self.blend,
            uniforms: &ctx.uniforms[self.uniforms.clone()],
            fill_rule: self.fill_rule,
        };
        ctx.graphics.draw_triangles(&args)
    }
}

#[derive(Debug)]
pub(crate) struct WritePixelsCommand {
    pub(crate) dst: Image,
    pub(crate) writes: Vec<PendingWrite>,
}

/// Readback results, filled on the render thread and taken by the caller after a sync flush.
pub(crate) type ReadResult = Arc<Mutex<Vec<Vec<u8>>>>;

#[derive(Debug)]
pub(crate) struct ReadPixelsCommand {
    pub(crate) src: Image,
    pub(crate) regions: Vec<Rect>,
    pub(crate) result: ReadResult,
}

#[derive(Debug)]
pub(crate) enum Command {
    DrawTriangles(Box<DrawTrianglesCommand>),
    WritePixels(WritePixelsCommand),
    ReadPixels(ReadPixelsCommand),
    NewImage(Image),
    NewScreenFramebufferImage(Image),
    DisposeImage(Image),
    NewShader(Shader),
    DisposeShader(Shader),
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Command {}
}

/// Execution on the render thread.  Only [Command] implements it.
pub(crate) trait Exec: sealed::Sealed {
    fn exec(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), Error>;
    /// Whether the flush that carries this command must block the game thread.
    fn needs_sync(&self) -> bool;
}

impl Command {
    pub(crate) fn as_draw(&self) -> Option<&DrawTrianglesCommand> {
        match self {
            Command::DrawTriangles(d) => Some(d),
            _ => None,
        }
    }

    pub(crate) fn as_draw_mut(&mut self) -> Option<&mut DrawTrianglesCommand> {
        match self {
            Command::DrawTriangles(d) => Some(d),
            _ => None,
        }
    }
}

impl Exec for Command {
    fn exec(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), Error> {
        match self {
            Command::DrawTriangles(d) => d.exec(ctx),
            Command::WritePixels(w) => {
                let dst = w.dst.driver_id()?;
                let args: Vec<PixelsArgs<'_>> = w
                    .writes
                    .iter()
                    .map(|p| PixelsArgs {
                        pixels: p.pixels.as_slice(),
                        region: p.region,
                    })
                    .collect();
                let r = ctx.graphics.write_pixels(dst, &args);
                drop(args);
                // the backend has copied into staging; owners get their buffers back at frame end
                for p in std::mem::take(&mut w.writes) {
                    ctx.finalizers.push(Box::new(move || drop(p.pixels)));
                }
                r
            }
            Command::ReadPixels(r) => {
                let src = r.src.driver_id()?;
                let mut buffers: Vec<Vec<u8>> = r
                    .regions
                    .iter()
                    .map(|region| {
                        vec![0u8; region.width() as usize * region.height() as usize * 4]
                    })
                    .collect();
                let mut args: Vec<PixelsArgsMut<'_>> = buffers
                    .iter_mut()
                    .zip(r.regions.iter())
                    .map(|(pixels, region)| PixelsArgsMut {
                        pixels: pixels.as_mut_slice(),
                        region: *region,
                    })
                    .collect();
                ctx.graphics.read_pixels(src, &mut args)?;
                drop(args);
                *r.result.lock().unwrap() = buffers;
                Ok(())
            }
            Command::NewImage(image) => {
                let id = ctx.graphics.new_image(image.width(), image.height())?;
                image.set_driver_id(id);
                Ok(())
            }
            Command::NewScreenFramebufferImage(image) => {
                let id = ctx
                    .graphics
                    .new_screen_framebuffer_image(image.width(), image.height())?;
                image.set_driver_id(id);
                Ok(())
            }
            Command::DisposeImage(image) => ctx.graphics.dispose_image(image.driver_id()?),
            Command::NewShader(shader) => {
                let id = ctx.graphics.new_shader(shader.ir())?;
                shader.set_driver_id(id);
                Ok(())
            }
            Command::DisposeShader(shader) => ctx.graphics.dispose_shader(shader.driver_id()?),
        }
    }

    fn needs_sync(&self) -> bool {
        matches!(
            self,
            Command::NewImage(_)
                | Command::NewScreenFramebufferImage(_)
                | Command::NewShader(_)
                | Command::ReadPixels(_)
        )
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::DrawTriangles(d) => write!(
                f,
                "draw-triangles: vertices {}, indices {}, regions {}, fill {:?}",
                d.num_vertices(),
                d.num_indices(),
                d.dst_regions.len(),
                d.fill_rule
            ),
            Command::WritePixels(w) => write!(f, "write-pixels: {} rects", w.writes.len()),
            Command::ReadPixels(r) => write!(f, "read-pixels: {} rects", r.regions.len()),
            Command::NewImage(i) => write!(f, "new-image: {}x{}", i.width(), i.height()),
            Command::NewScreenFramebufferImage(i) => {
                write!(f, "new-screen-framebuffer-image: {}x{}", i.width(), i.height())
            }
            Command::DisposeImage(_) => write!(f, "dispose-image"),
            Command::NewShader(s) => write!(f, "new-shader: {}", s.name()),
            Command::DisposeShader(s) => write!(f, "dispose-shader: {}", s.name()),
        }
    }
}
