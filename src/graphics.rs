// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The backend contract.

A [Graphics] implementation owns a GPU device and executes the commands flushed from a
command queue, in the order it receives them.  It is only ever touched from the render thread.

Images and shaders are identified across the contract by [ImageId] and [ShaderId]; the backend
keeps the id-to-object map.
*/

pub mod blend;

use crate::error::Error;
use crate::shader_ir::{ShaderIr, SourceHash};
use std::fmt::Display;
use std::sync::Arc;

pub use blend::{Blend, BlendFactor, BlendOperation};

/// Number of source images a shader can sample.
pub const SHADER_SRC_IMAGE_COUNT: usize = 4;

/// Floats per vertex in the default layout: position, texcoord and color.
pub const VERTEX_FLOAT_COUNT: usize = 8;

/// Largest vertex count one upload chunk can address, for a given vertex layout.
pub const fn max_vertex_count(vertex_float_count: usize) -> usize {
    #[cfg(target_pointer_width = "64")]
    {
        let _ = vertex_float_count;
        u32::MAX as usize
    }
    #[cfg(not(target_pointer_width = "64"))]
    {
        i32::MAX as usize / vertex_float_count
    }
}

pub const MAX_VERTEX_COUNT: usize = max_vertex_count(VERTEX_FLOAT_COUNT);
pub const MAX_VERTEX_FLOAT_COUNT: usize = MAX_VERTEX_COUNT * VERTEX_FLOAT_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

impl Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "image#{}", self.0)
    }
}

impl Display for ShaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shader#{}", self.0)
    }
}

/// Half-open pixel rectangle, `min` inclusive and `max` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Rect {
    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Rect {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// A rect anchored at the origin.
    pub const fn sized(width: u32, height: u32) -> Self {
        Rect::new(0, 0, width as i32, height as i32)
    }

    pub const fn width(&self) -> i32 {
        self.max_x - self.min_x
    }

    pub const fn height(&self) -> i32 {
        self.max_y - self.min_y
    }

    pub const fn is_empty(&self) -> bool {
        self.min_x >= self.max_x || self.min_y >= self.max_y
    }

    /// Smallest rect containing both.  Empty rects don't contribute.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.min_x >= self.min_x
            && other.min_y >= self.min_y
            && other.max_x <= self.max_x
            && other.max_y <= self.max_y
    }
}

impl Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({},{})-({},{})",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// A scissored span of one draw: `index_count` indices clipped to `region`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DstRegion {
    pub region: Rect,
    pub index_count: usize,
}

/// Polygon coverage policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillRule {
    /// Every covered pixel is drawn, in one pass.
    #[default]
    FillAll,
    NonZero,
    EvenOdd,
}

/// RGBA8 pixels for one rect of a write.  `pixels.len()` is `4 * width * height`.
#[derive(Debug, Clone, Copy)]
pub struct PixelsArgs<'a> {
    pub pixels: &'a [u8],
    pub region: Rect,
}

/// Destination for one rect of a readback.
#[derive(Debug)]
pub struct PixelsArgsMut<'a> {
    pub pixels: &'a mut [u8],
    pub region: Rect,
}

/// A native window the screen image presents into.
#[derive(Debug, Clone, Copy)]
pub struct WindowHandle(pub raw_window_handle::RawWindowHandle);

// SAFETY: the handle is only dereferenced by the backend, on the render thread.
unsafe impl Send for WindowHandle {}

/// Everything one draw call needs once images and shaders are resolved to ids.
#[derive(Debug, Clone, Copy)]
pub struct DrawArgs<'a> {
    pub dst: ImageId,
    pub srcs: [Option<ImageId>; SHADER_SRC_IMAGE_COUNT],
    pub shader: ShaderId,
    pub dst_regions: &'a [DstRegion],
    /// First index of this draw within the indices of the last `set_vertices`.
    pub index_offset: usize,
    pub blend: Blend,
    /// Preserved and user uniforms, unpadded.
    pub uniforms: &'a [u32],
    pub fill_rule: FillRule,
}

/// A GPU backend.
///
/// Calls arrive in enqueue order, bracketed by [Graphics::begin] and [Graphics::end].
pub trait Graphics: Send {
    fn initialize(&mut self) -> Result<(), Error>;
    fn begin(&mut self) -> Result<(), Error>;
    /// Ends the frame, presenting the screen when `present`.  Pending work is submitted either way.
    fn end(&mut self, present: bool) -> Result<(), Error>;

    fn set_window(&mut self, window: WindowHandle);
    fn set_transparent(&mut self, transparent: bool);
    fn set_vsync_enabled(&mut self, enabled: bool);

    /// Uploads one chunk of vertices and indices, used by draws until the next call.
    fn set_vertices(&mut self, vertices: &[f32], indices: &[u32]) -> Result<(), Error>;

    fn new_image(&mut self, width: u32, height: u32) -> Result<ImageId, Error>;
    fn new_screen_framebuffer_image(&mut self, width: u32, height: u32)
    -> Result<ImageId, Error>;
    fn dispose_image(&mut self, id: ImageId) -> Result<(), Error>;
    fn write_pixels(&mut self, id: ImageId, args: &[PixelsArgs<'_>]) -> Result<(), Error>;
    fn read_pixels(&mut self, id: ImageId, args: &mut [PixelsArgsMut<'_>]) -> Result<(), Error>;

    fn new_shader(&mut self, ir: &Arc<ShaderIr>) -> Result<ShaderId, Error>;
    fn dispose_shader(&mut self, id: ShaderId) -> Result<(), Error>;

    /// Registers bytecode compiled ahead of time for the shader source hashing to `hash`.
    fn register_precompiled_shader(
        &mut self,
        hash: SourceHash,
        vertex: &[u8],
        pixel: &[u8],
    ) -> Result<(), Error> {
        _ = (hash, vertex, pixel);
        Err(Error::Unsupported(
            "precompiled shaders are not accepted by this backend".to_string(),
        ))
    }

    fn draw_triangles(&mut self, args: &DrawArgs<'_>) -> Result<(), Error>;

    fn needs_clearing_screen(&self) -> bool;
    fn max_image_size(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_union_skips_empty() {
        let a = Rect::new(0, 0, 2, 2);
        let empty = Rect::default();
        assert_eq!(a.union(&empty), a);
        assert_eq!(empty.union(&a), a);
        assert_eq!(a.union(&Rect::new(4, 1, 6, 3)), Rect::new(0, 0, 6, 3));
    }

    #[test]
    fn rect_overlap_is_exclusive_at_edges() {
        let a = Rect::new(0, 0, 2, 2);
        assert!(!a.overlaps(&Rect::new(2, 0, 4, 2)));
        assert!(a.overlaps(&Rect::new(1, 1, 4, 4)));
        assert!(!a.overlaps(&Rect::default()));
    }

    #[test]
    fn vertex_limits() {
        assert_eq!(
            MAX_VERTEX_FLOAT_COUNT,
            max_vertex_count(VERTEX_FLOAT_COUNT) * VERTEX_FLOAT_COUNT
        );
        #[cfg(target_pointer_width = "64")]
        assert_eq!(MAX_VERTEX_COUNT, u32::MAX as usize);
    }
}
