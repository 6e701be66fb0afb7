// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! deferred_draw is a deferred draw-call pipeline for 2D games.

It sits between a game-facing image API and a native GPU backend.  Draws, pixel uploads and
readbacks are recorded into a command queue, coalesced, and submitted to the backend once per
flush, from a dedicated render thread.

| Layer          | Types                               | Runs on       |
|----------------|-------------------------------------|---------------|
| Game-side      | [Context], [Image], [Shader]        | any thread    |
| Queue          | commands, merging, uniform packing  | game thread   |
| Backend        | [Graphics]                          | render thread |

# Batching

Consecutive draws merge into one backend draw when they share a destination, sources, shader,
blend, uniforms and fill rule, their vertices fit the current upload chunk, and (for stencil fill
rules) their bounds don't overlap.  A frame of sprites from one atlas usually costs one draw.

Vertex data of every draw in a flush is concatenated and uploaded in chunks of at most
[Config::max_vertex_float_count] floats; draws carry offsets into their chunk.

# Frames and lifetimes

[Context::flush_commands] with `end_frame` presents the screen and retires the frame.  The
backend keeps [FRAME_COUNT] frames in flight, so an image or shader disposed during a frame is
released only when the GPU is done with that frame.

# Errors

Argument errors fail fast at enqueue.  Backend errors surface from the next flush and latch: once
a flush fails, every later flush returns the same [Error] without reaching the backend.

# Backends

The D3D12 backend (feature `backend_d3d12`, on by default) drives a device through a thin binding
layer.  On Windows the layer sits on the Direct3D 12 runtime.  Elsewhere a software device
implements it on the CPU in place of WARP, so [Config::use_warp] must be set and hardware adapters
are [Error::Unsupported].

# Example

```
use deferred_draw::{builtin, Config, Context, DrawRequest, FillRule, Rect};

let config = Config { use_warp: true, ..Config::default() };
let context = Context::new(config).unwrap();
let image = context.new_image(4, 4).unwrap();
let shader = context.new_shader(builtin::color_program());

// x, y, u, v, r, g, b, a
let red = |x: f32, y: f32| [x, y, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
let vertices: Vec<f32> = [red(0.0, 0.0), red(4.0, 0.0), red(0.0, 4.0), red(4.0, 4.0)].concat();
context
    .draw_triangles(&DrawRequest {
        dst: &image,
        srcs: [None; 4],
        vertices: &vertices,
        indices: &[0, 1, 2, 1, 3, 2],
        blend: Default::default(),
        dst_region: Rect::new(0, 0, 4, 4),
        src_regions: [Rect::default(); 4],
        shader: &shader,
        uniforms: &[],
        fill_rule: FillRule::FillAll,
    })
    .unwrap();
context.flush_commands(true).unwrap();

let pixels = context.read_pixels(&image, &[Rect::new(0, 0, 1, 1)]).unwrap();
assert_eq!(pixels[0], [255, 0, 0, 255]);
```
*/

mod bittricks;
pub mod builtin;
mod command;
mod command_queue;
pub mod config;
pub mod error;
pub mod graphics;
mod image;
mod imp;
mod managed_bytes;
mod manager;
mod render_thread;
mod shader;
pub mod shader_ir;
pub mod sys;
pub mod uniforms;

logwise::declare_logging_domain!();

pub use bittricks::{INTERNAL_IMAGE_MIN, internal_image_size};
pub use command_queue::{DrawRequest, VertexLimits};
pub use config::{Config, FeatureLevel};
pub use error::Error;
pub use graphics::{
    Blend, BlendFactor, BlendOperation, DrawArgs, DstRegion, FillRule, Graphics, ImageId,
    MAX_VERTEX_COUNT, MAX_VERTEX_FLOAT_COUNT, PixelsArgs, PixelsArgsMut, Rect,
    SHADER_SRC_IMAGE_COUNT, ShaderId, VERTEX_FLOAT_COUNT, WindowHandle,
};
pub use image::{BYTES_PER_PIXEL, Image};
pub use managed_bytes::ManagedBytes;
pub use manager::Context;
pub use render_thread::ThreadMode;
pub use shader::Shader;
pub use shader_ir::ShaderIr;

/// Frames the backend keeps in flight.
pub const FRAME_COUNT: usize = 2;
