// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Uniform packing.

Every draw's uniforms start with seven preserved variables the pipeline fills in itself:

| # | Variable | Type |
|---|---|---|
| 0 | destination internal size | vec2 |
| 1 | source internal sizes | vec2\[N\] |
| 2 | destination region origin | vec2 |
| 3 | destination region size | vec2 |
| 4 | source region origins | vec2\[N\] |
| 5 | source region sizes | vec2\[N\] |
| 6 | projection | mat4 |

Uniforms travel through the queue unpadded.  A backend with register-based constant buffers calls
[hlsl_offsets] once per shader and [adjust_uniforms] per draw.
*/

use crate::graphics::{Rect, SHADER_SRC_IMAGE_COUNT};
use crate::shader_ir::{UniformType, Unit};

pub const PRESERVED_UNIFORM_COUNT: usize = 7;
pub const PROJECTION_MATRIX_INDEX: usize = 6;
pub const PRESERVED_UNIFORM_WORDS: usize = 6 + 6 * SHADER_SRC_IMAGE_COUNT + 16;

const SIGN_BIT: u32 = 1 << 31;

pub fn preserved_uniform_types() -> Vec<UniformType> {
    let srcs = || UniformType::Array(Box::new(UniformType::Vec2), SHADER_SRC_IMAGE_COUNT);
    vec![
        UniformType::Vec2,
        srcs(),
        UniformType::Vec2,
        UniformType::Vec2,
        srcs(),
        srcs(),
        UniformType::Mat4,
    ]
}

/// What the preserved uniforms are computed from.  Sizes are internal sizes.
#[derive(Debug, Clone, Copy)]
pub struct PreservedInputs {
    pub dst_size: (u32, u32),
    pub src_sizes: [Option<(u32, u32)>; SHADER_SRC_IMAGE_COUNT],
    pub dst_region: Rect,
    pub src_regions: [Rect; SHADER_SRC_IMAGE_COUNT],
    pub unit: Unit,
}

/// Orthographic projection of `(0,0)-(w,h)` onto NDC, column-major.
pub fn projection(width: u32, height: u32) -> [f32; 16] {
    let (w, h) = (width as f32, height as f32);
    [
        2.0 / w,
        0.0,
        0.0,
        0.0,
        0.0,
        2.0 / h,
        0.0,
        0.0,
        0.0,
        0.0,
        1.0,
        0.0,
        -1.0,
        -1.0,
        0.0,
        1.0,
    ]
}

fn push_f32(out: &mut Vec<u32>, v: f32) {
    out.push(v.to_bits());
}

/// Region origin and size, normalized when the unit is texels.
fn region_words(region: &Rect, size: (u32, u32), unit: Unit) -> ([f32; 2], [f32; 2]) {
    let origin = [region.min_x as f32, region.min_y as f32];
    let extent = [region.width() as f32, region.height() as f32];
    match unit {
        Unit::Pixels => (origin, extent),
        Unit::Texels => {
            let (w, h) = (size.0 as f32, size.1 as f32);
            (
                [origin[0] / w, origin[1] / h],
                [extent[0] / w, extent[1] / h],
            )
        }
    }
}

/// Appends the preserved block to `out`.
pub fn write_preserved(inputs: &PreservedInputs, out: &mut Vec<u32>) {
    let start = out.len();
    push_f32(out, inputs.dst_size.0 as f32);
    push_f32(out, inputs.dst_size.1 as f32);

    for size in &inputs.src_sizes {
        let (w, h) = size.unwrap_or((0, 0));
        push_f32(out, w as f32);
        push_f32(out, h as f32);
    }

    let (origin, extent) = region_words(&inputs.dst_region, inputs.dst_size, inputs.unit);
    out.extend(origin.iter().map(|f| f.to_bits()));
    out.extend(extent.iter().map(|f| f.to_bits()));

    let src_regions: Vec<([f32; 2], [f32; 2])> = inputs
        .src_sizes
        .iter()
        .zip(inputs.src_regions.iter())
        .map(|(size, region)| match size {
            Some(size) => region_words(region, *size, inputs.unit),
            None => ([0.0; 2], [0.0; 2]),
        })
        .collect();
    for (origin, _) in &src_regions {
        out.extend(origin.iter().map(|f| f.to_bits()));
    }
    for (_, extent) in &src_regions {
        out.extend(extent.iter().map(|f| f.to_bits()));
    }

    out.extend(
        projection(inputs.dst_size.0, inputs.dst_size.1)
            .iter()
            .map(|f| f.to_bits()),
    );
    debug_assert_eq!(out.len() - start, PRESERVED_UNIFORM_WORDS);
}

/// Words a variable occupies in a constant buffer, trailing padding excluded.
pub fn constant_buffer_size(t: &UniformType) -> usize {
    match t {
        UniformType::Float | UniformType::Int => 1,
        UniformType::Vec2 | UniformType::IVec2 => 2,
        UniformType::Vec3 | UniformType::IVec3 => 3,
        UniformType::Vec4 | UniformType::IVec4 => 4,
        UniformType::Mat2 => 6,
        UniformType::Mat3 => 11,
        UniformType::Mat4 => 16,
        UniformType::Array(element, n) => {
            let n = *n;
            if n == 0 {
                return 0;
            }
            match element.as_ref() {
                UniformType::Float | UniformType::Int => 4 * (n - 1) + 1,
                UniformType::Vec2 | UniformType::IVec2 => 4 * (n - 1) + 2,
                UniformType::Vec3 | UniformType::IVec3 => 4 * (n - 1) + 3,
                UniformType::Vec4 | UniformType::IVec4 => 4 * n,
                UniformType::Mat2 => 8 * (n - 1) + 6,
                UniformType::Mat3 => 12 * (n - 1) + 11,
                UniformType::Mat4 => 16 * n,
                // nested arrays are flattened by the shader compiler
                nested => constant_buffer_size(nested) * n,
            }
        }
    }
}

/// Word offset of every variable under HLSL constant-buffer packing.
///
/// Arrays and matrices start a new register; other values start one only when they would
/// straddle a register boundary.
pub fn hlsl_offsets(types: &[UniformType]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(types.len());
    let mut cursor = 0usize;
    for t in types {
        let size = constant_buffer_size(t);
        if t.is_array() || t.is_matrix() || cursor % 4 + size > 4 {
            cursor = cursor.div_ceil(4) * 4;
        }
        offsets.push(cursor);
        cursor += size;
    }
    offsets
}

/// Total words a packed buffer needs.
pub fn hlsl_buffer_words(types: &[UniformType], offsets: &[usize]) -> usize {
    types
        .iter()
        .zip(offsets)
        .map(|(t, o)| o + constant_buffer_size(t))
        .max()
        .unwrap_or(0)
}

fn transpose_mat2(u: &[u32], out: &mut Vec<u32>, pad_tail: bool) {
    out.extend_from_slice(&[u[0], u[2], 0, 0, u[1], u[3]]);
    if pad_tail {
        out.extend_from_slice(&[0, 0]);
    }
}

fn transpose_mat3(u: &[u32], out: &mut Vec<u32>, pad_tail: bool) {
    out.extend_from_slice(&[u[0], u[3], u[6], 0, u[1], u[4], u[7], 0, u[2], u[5], u[8]]);
    if pad_tail {
        out.push(0);
    }
}

fn transpose_mat4(u: &[u32], out: &mut Vec<u32>) {
    for k in 0..4 {
        out.extend_from_slice(&[u[k], u[4 + k], u[8 + k], u[12 + k]]);
    }
}

/// Packs unpadded `uniforms` into `out` using `offsets` from [hlsl_offsets].
///
/// Matrices are transposed into rows.  The projection's second row is negated because NDC Y
/// points up while image rows grow downward.
pub fn adjust_uniforms(
    types: &[UniformType],
    offsets: &[usize],
    uniforms: &[u32],
    out: &mut Vec<u32>,
) {
    out.clear();
    let mut at = 0usize;
    for (i, t) in types.iter().enumerate() {
        let n = t.word_count();
        let mut value: Vec<u32> = (at..at + n)
            .map(|w| uniforms.get(w).copied().unwrap_or(0))
            .collect();
        at += n;
        if out.len() < offsets[i] {
            out.resize(offsets[i], 0);
        }
        if i == PROJECTION_MATRIX_INDEX && *t == UniformType::Mat4 {
            for w in [1, 5, 9, 13] {
                value[w] ^= SIGN_BIT;
            }
        }
        match t {
            UniformType::Mat2 => transpose_mat2(&value, out, false),
            UniformType::Mat3 => transpose_mat3(&value, out, false),
            UniformType::Mat4 => transpose_mat4(&value, out),
            UniformType::Array(element, count) => {
                let stride = element.word_count();
                for e in 0..*count {
                    let last = e + 1 == *count;
                    let v = &value[e * stride..(e + 1) * stride];
                    match element.as_ref() {
                        UniformType::Mat2 => transpose_mat2(v, out, !last),
                        UniformType::Mat3 => transpose_mat3(v, out, !last),
                        UniformType::Mat4 => transpose_mat4(v, out),
                        _ => {
                            out.extend_from_slice(v);
                            if !last && stride < 4 {
                                out.resize(out.len() + 4 - stride, 0);
                            }
                        }
                    }
                }
            }
            _ => out.extend_from_slice(&value),
        }
    }
}
