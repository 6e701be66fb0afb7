// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Triangle rasterization for the software device.

Coverage uses edge functions evaluated at pixel centers with the top-left fill rule, so two
triangles sharing an edge never both cover a pixel on it.  Each covered fragment goes through
the stencil test, the pixel program and the blend unit, in that order.
*/

use super::api::{
    BlendOp, BlendValue, ColorWriteMask, ComparisonFunc, DepthStencilDesc, DepthStencilOpDesc,
    Format, RenderTargetBlendDesc, StencilOp,
};
use crate::graphics::Rect;
use crate::shader_ir::{Constants, Sampler, SoftwareProgram, Varyings};

/// A vertex after the vertex stage, in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RasterVertex {
    pub(crate) position: [f32; 2],
    pub(crate) varyings: Varyings,
}

/// An 8-bit RGBA or BGRA surface.
pub(crate) struct ColorTarget<'a> {
    pub(crate) data: &'a mut [u8],
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) row_pitch: usize,
    pub(crate) format: Format,
}

/// A D24S8 surface.  The stencil value is the high byte of each texel.
pub(crate) struct StencilTarget<'a> {
    pub(crate) data: &'a mut [u8],
    pub(crate) row_pitch: usize,
}

impl StencilTarget<'_> {
    fn at(&mut self, x: u32, y: u32) -> &mut u8 {
        &mut self.data[y as usize * self.row_pitch + x as usize * 4 + 3]
    }
}

/// Fixed-function state for one draw.
pub(crate) struct RasterState<'a> {
    /// Viewport, scissor and target bounds, already intersected.
    pub(crate) clip: Rect,
    pub(crate) blend: &'a RenderTargetBlendDesc,
    pub(crate) depth_stencil: &'a DepthStencilDesc,
    pub(crate) stencil_ref: u8,
    pub(crate) program: &'a dyn SoftwareProgram,
    pub(crate) constants: Constants<'a>,
    pub(crate) sampler: &'a dyn Sampler,
}

fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Top and left edges of a triangle wound with positive area own their boundary pixels.
fn is_top_left(a: [f32; 2], b: [f32; 2]) -> bool {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    (dy == 0.0 && dx > 0.0) || dy < 0.0
}

fn covers(w: f32, top_left: bool) -> bool {
    w > 0.0 || (w == 0.0 && top_left)
}

fn lerp3(a: f32, b: f32, c: f32, w: [f32; 3]) -> f32 {
    a * w[0] + b * w[1] + c * w[2]
}

fn interpolate(v: [&RasterVertex; 3], w: [f32; 3]) -> Varyings {
    let (a, b, c) = (&v[0].varyings, &v[1].varyings, &v[2].varyings);
    let mut out = Varyings::default();
    for i in 0..2 {
        out.texcoord[i] = lerp3(a.texcoord[i], b.texcoord[i], c.texcoord[i], w);
    }
    for i in 0..4 {
        out.color[i] = lerp3(a.color[i], b.color[i], c.color[i], w);
        out.custom[i] = lerp3(a.custom[i], b.custom[i], c.custom[i], w);
    }
    out
}

fn compare(func: ComparisonFunc, reference: u8, value: u8) -> bool {
    match func {
        ComparisonFunc::Never => false,
        ComparisonFunc::Less => reference < value,
        ComparisonFunc::NotEqual => reference != value,
        ComparisonFunc::Always => true,
    }
}

fn apply_stencil_op(op: StencilOp, value: u8) -> u8 {
    match op {
        StencilOp::Keep => value,
        StencilOp::Incr => value.wrapping_add(1),
        StencilOp::Decr => value.wrapping_sub(1),
        StencilOp::Invert => !value,
    }
}

/// Runs the stencil test for one fragment and updates the buffer.  Returns whether it passed.
fn stencil_test(
    desc: &DepthStencilDesc,
    face: &DepthStencilOpDesc,
    reference: u8,
    value: &mut u8,
) -> bool {
    let masked = *value & desc.stencil_read_mask;
    let pass = compare(face.func, reference & desc.stencil_read_mask, masked);
    let op = if pass { face.pass_op } else { face.fail_op };
    let updated = apply_stencil_op(op, *value);
    *value = (*value & !desc.stencil_write_mask) | (updated & desc.stencil_write_mask);
    pass
}

fn factor(value: BlendValue, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    match value {
        BlendValue::Zero => [0.0; 4],
        BlendValue::One => [1.0; 4],
        BlendValue::SrcColor => src,
        BlendValue::InvSrcColor => src.map(|c| 1.0 - c),
        BlendValue::SrcAlpha => [src[3]; 4],
        BlendValue::InvSrcAlpha => [1.0 - src[3]; 4],
        BlendValue::DestAlpha => [dst[3]; 4],
        BlendValue::InvDestAlpha => [1.0 - dst[3]; 4],
        BlendValue::DestColor => dst,
        BlendValue::InvDestColor => dst.map(|c| 1.0 - c),
        BlendValue::SrcAlphaSat => {
            let f = src[3].min(1.0 - dst[3]);
            [f, f, f, 1.0]
        }
    }
}

fn blend_op(op: BlendOp, s: f32, d: f32) -> f32 {
    match op {
        BlendOp::Add => s + d,
        BlendOp::Subtract => s - d,
        BlendOp::RevSubtract => d - s,
        BlendOp::Min => s.min(d),
        BlendOp::Max => s.max(d),
    }
}

pub(crate) fn blend(desc: &RenderTargetBlendDesc, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    if !desc.blend_enable {
        return src;
    }
    let sf = factor(desc.src_blend, src, dst);
    let df = factor(desc.dest_blend, src, dst);
    let sa = factor(desc.src_blend_alpha, src, dst)[3];
    let da = factor(desc.dest_blend_alpha, src, dst)[3];
    let mut out = [0.0; 4];
    for i in 0..3 {
        out[i] = match desc.blend_op {
            BlendOp::Min | BlendOp::Max => blend_op(desc.blend_op, src[i], dst[i]),
            op => blend_op(op, src[i] * sf[i], dst[i] * df[i]),
        };
    }
    out[3] = match desc.blend_op_alpha {
        BlendOp::Min | BlendOp::Max => blend_op(desc.blend_op_alpha, src[3], dst[3]),
        op => blend_op(op, src[3] * sa, dst[3] * da),
    };
    out
}

pub(crate) fn to_unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5).floor() as u8
}

pub(crate) fn from_unorm8(v: u8) -> f32 {
    v as f32 / 255.0
}

impl ColorTarget<'_> {
    /// Channel byte offsets of red, green, blue and alpha.
    fn channels(&self) -> [usize; 4] {
        match self.format {
            Format::B8G8R8A8Unorm => [2, 1, 0, 3],
            _ => [0, 1, 2, 3],
        }
    }

    fn read(&self, x: u32, y: u32) -> [f32; 4] {
        let at = y as usize * self.row_pitch + x as usize * 4;
        self.channels().map(|c| from_unorm8(self.data[at + c]))
    }

    fn write(&mut self, x: u32, y: u32, color: [f32; 4], mask: ColorWriteMask) {
        let at = y as usize * self.row_pitch + x as usize * 4;
        let channels = self.channels();
        let bits = [
            ColorWriteMask::RED,
            ColorWriteMask::GREEN,
            ColorWriteMask::BLUE,
            ColorWriteMask::ALPHA,
        ];
        for i in 0..4 {
            if mask.contains(bits[i]) {
                self.data[at + channels[i]] = to_unorm8(color[i]);
            }
        }
    }
}

/// Rasterizes one triangle.  Stencil state is ignored when `stencil` is `None`.
pub(crate) fn draw_triangle(
    color: &mut ColorTarget<'_>,
    mut stencil: Option<&mut StencilTarget<'_>>,
    state: &RasterState<'_>,
    vertices: [&RasterVertex; 3],
) {
    let [mut a, mut b, mut c] = vertices;
    let area = edge(a.position, b.position, c.position);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    // clockwise in y-down pixel space is the front face
    let front = area > 0.0;
    if !front {
        std::mem::swap(&mut b, &mut c);
    }
    let inv_area = 1.0 / area.abs();
    let (pa, pb, pc) = (a.position, b.position, c.position);

    let clip = Rect {
        min_x: state.clip.min_x.max(0),
        min_y: state.clip.min_y.max(0),
        max_x: state.clip.max_x.min(color.width as i32),
        max_y: state.clip.max_y.min(color.height as i32),
    };
    let min_x = (pa[0].min(pb[0]).min(pc[0]).floor() as i32).max(clip.min_x);
    let min_y = (pa[1].min(pb[1]).min(pc[1]).floor() as i32).max(clip.min_y);
    let max_x = (pa[0].max(pb[0]).max(pc[0]).ceil() as i32).min(clip.max_x);
    let max_y = (pa[1].max(pb[1]).max(pc[1]).ceil() as i32).min(clip.max_y);
    if min_x >= max_x || min_y >= max_y {
        return;
    }

    let top_left = [is_top_left(pb, pc), is_top_left(pc, pa), is_top_left(pa, pb)];
    let ds = state.depth_stencil;
    let face = if front { &ds.front_face } else { &ds.back_face };
    let writes_color = !state.blend.write_mask.is_empty();

    for y in min_y..max_y {
        for x in min_x..max_x {
            let p = [x as f32 + 0.5, y as f32 + 0.5];
            let w = [edge(pb, pc, p), edge(pc, pa, p), edge(pa, pb, p)];
            if !(0..3).all(|i| covers(w[i], top_left[i])) {
                continue;
            }
            let (x, y) = (x as u32, y as u32);
            if ds.stencil_enable
                && let Some(stencil) = stencil.as_deref_mut()
                && !stencil_test(ds, face, state.stencil_ref, stencil.at(x, y))
            {
                continue;
            }
            if !writes_color {
                continue;
            }
            let weights = w.map(|w| w * inv_area);
            let varyings = interpolate([a, b, c], weights);
            let src = state
                .program
                .pixel(&state.constants, &varyings, state.sampler);
            let out = blend(state.blend, src, color.read(x, y));
            color.write(x, y, out, state.blend.write_mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct VertexColor;

    impl SoftwareProgram for VertexColor {
        fn pixel(&self, _c: &Constants<'_>, input: &Varyings, _s: &dyn Sampler) -> [f32; 4] {
            input.color
        }
    }

    struct NoTextures;

    impl Sampler for NoTextures {
        fn sample(&self, _slot: usize, _uv: [f32; 2]) -> [f32; 4] {
            [0.0; 4]
        }
    }

    fn vertex(x: f32, y: f32, color: [f32; 4]) -> RasterVertex {
        RasterVertex {
            position: [x, y],
            varyings: Varyings {
                color,
                ..Default::default()
            },
        }
    }

    fn additive() -> RenderTargetBlendDesc {
        RenderTargetBlendDesc {
            blend_enable: true,
            src_blend: BlendValue::One,
            dest_blend: BlendValue::One,
            blend_op: BlendOp::Add,
            src_blend_alpha: BlendValue::One,
            dest_blend_alpha: BlendValue::One,
            blend_op_alpha: BlendOp::Add,
            write_mask: ColorWriteMask::ALL,
        }
    }

    fn no_stencil() -> DepthStencilDesc {
        DepthStencilDesc {
            depth_enable: false,
            depth_func: ComparisonFunc::Always,
            stencil_enable: false,
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
            front_face: DepthStencilOpDesc::KEEP_ALWAYS,
            back_face: DepthStencilOpDesc::KEEP_ALWAYS,
        }
    }

    fn draw_quad(
        data: &mut [u8],
        stencil: Option<&mut StencilTarget<'_>>,
        blend: &RenderTargetBlendDesc,
        ds: &DepthStencilDesc,
        quad: [f32; 4],
        color: [f32; 4],
    ) {
        let mut target = ColorTarget {
            data,
            width: 4,
            height: 4,
            row_pitch: 16,
            format: Format::R8G8B8A8Unorm,
        };
        let [x0, y0, x1, y1] = quad;
        let v = [
            vertex(x0, y0, color),
            vertex(x1, y0, color),
            vertex(x1, y1, color),
            vertex(x0, y1, color),
        ];
        let state = RasterState {
            clip: Rect::sized(4, 4),
            blend,
            depth_stencil: ds,
            stencil_ref: 0,
            program: &VertexColor,
            constants: Constants::new(&[], &[]),
            sampler: &NoTextures,
        };
        let mut stencil = stencil;
        draw_triangle(&mut target, stencil.as_deref_mut(), &state, [&v[0], &v[1], &v[2]]);
        draw_triangle(&mut target, stencil.as_deref_mut(), &state, [&v[0], &v[2], &v[3]]);
    }

    #[test]
    fn shared_edges_cover_each_pixel_once() {
        let mut data = vec![0u8; 64];
        let quarter = [0.25, 0.25, 0.25, 0.25];
        draw_quad(&mut data, None, &additive(), &no_stencil(), [0.0, 0.0, 4.0, 4.0], quarter);
        assert!(data.iter().all(|b| *b == 64), "{data:?}");
    }

    #[test]
    fn partial_coverage_samples_centers() {
        let mut data = vec![0u8; 64];
        draw_quad(
            &mut data,
            None,
            &additive(),
            &no_stencil(),
            [1.0, 1.0, 2.6, 3.0],
            [1.0; 4],
        );
        let lit: Vec<(usize, usize)> = (0..16)
            .filter(|i| data[i * 4] != 0)
            .map(|i| (i % 4, i / 4))
            .collect();
        assert_eq!(lit, vec![(1, 1), (2, 1), (1, 2), (2, 2)]);
    }

    #[test]
    fn winding_decides_the_stencil_face() {
        let mut data = vec![0u8; 64];
        let mut stencil_data = vec![0u8; 64];
        let mut ds = no_stencil();
        ds.stencil_enable = true;
        ds.front_face.pass_op = StencilOp::Incr;
        ds.back_face.pass_op = StencilOp::Decr;
        let mut blend = additive();
        blend.write_mask = ColorWriteMask::empty();
        {
            let mut stencil = StencilTarget {
                data: &mut stencil_data,
                row_pitch: 16,
            };
            // clockwise on screen, then the same quad counter-clockwise over its left half
            draw_quad(&mut data, Some(&mut stencil), &blend, &ds, [0.0, 0.0, 4.0, 4.0], [1.0; 4]);
            draw_quad(&mut data, Some(&mut stencil), &blend, &ds, [2.0, 0.0, 0.0, 4.0], [1.0; 4]);
        }
        let values: Vec<u8> = stencil_data.chunks_exact(4).map(|t| t[3]).collect();
        assert_eq!(&values[0..4], &[0, 0, 1, 1]);
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn unorm_rounding() {
        assert_eq!(to_unorm8(0.5), 128);
        assert_eq!(to_unorm8(-1.0), 0);
        assert_eq!(to_unorm8(2.0), 255);
        assert_eq!(to_unorm8(from_unorm8(77)), 77);
    }

    #[test]
    fn source_over() {
        let desc = RenderTargetBlendDesc {
            dest_blend: BlendValue::InvSrcAlpha,
            dest_blend_alpha: BlendValue::InvSrcAlpha,
            ..additive()
        };
        let out = blend(&desc, [0.5, 0.0, 0.0, 0.5], [0.0, 0.0, 1.0, 1.0]);
        assert_eq!(out, [0.5, 0.0, 0.5, 1.0]);
    }
}
