// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Built-in programs.

Both share the fixed vertex stage: the position is transformed by the preserved projection and
texcoord and color are passed through.
*/

use crate::error::Error;
use crate::shader_ir::{
    Bytecode, CompileTarget, Constants, Program, Sampler, ShaderIr, SoftwareProgram, Unit,
    Varyings,
};
use crate::uniforms::PROJECTION_MATRIX_INDEX;
use std::sync::Arc;

/// Preserved variable holding the source internal sizes.
const SRC_SIZES_INDEX: usize = 1;

const COLOR_SOURCE: &str = r#"
cbuffer Uniforms : register(b0) {
    float2 U0;
    float2 U1[4];
    float2 U2;
    float2 U3;
    float2 U4[4];
    float2 U5[4];
    float4x4 U6;
}
struct Varyings {
    float4 Position : SV_POSITION;
    float2 TexCoord : TEXCOORD0;
    float4 Color : COLOR0;
};
Varyings VSMain(float2 position : POSITION, float2 texcoord : TEXCOORD, float4 color : COLOR) {
    Varyings v;
    v.Position = mul(U6, float4(position, 0, 1));
    v.TexCoord = texcoord;
    v.Color = color;
    return v;
}
float4 PSMain(Varyings v) : SV_TARGET {
    return v.Color;
}
"#;

const TEXTURE_SOURCE: &str = r#"
cbuffer Uniforms : register(b0) {
    float2 U0;
    float2 U1[4];
    float2 U2;
    float2 U3;
    float2 U4[4];
    float2 U5[4];
    float4x4 U6;
}
Texture2D T0 : register(t0);
SamplerState S : register(s0);
struct Varyings {
    float4 Position : SV_POSITION;
    float2 TexCoord : TEXCOORD0;
    float4 Color : COLOR0;
};
Varyings VSMain(float2 position : POSITION, float2 texcoord : TEXCOORD, float4 color : COLOR) {
    Varyings v;
    v.Position = mul(U6, float4(position, 0, 1));
    v.TexCoord = texcoord;
    v.Color = color;
    return v;
}
float4 PSMain(Varyings v) : SV_TARGET {
    return T0.Sample(S, v.TexCoord / U1[0]) * v.Color;
}
"#;

#[derive(Debug)]
struct ColorProgram;

impl SoftwareProgram for ColorProgram {
    fn pixel(&self, _constants: &Constants<'_>, input: &Varyings, _sampler: &dyn Sampler) -> [f32; 4] {
        input.color
    }
}

impl Program for ColorProgram {
    fn source(&self) -> &str {
        COLOR_SOURCE
    }

    fn uses_uniform(&self, index: usize) -> bool {
        index == PROJECTION_MATRIX_INDEX
    }

    fn compile(&self, target: CompileTarget) -> Result<Bytecode, Error> {
        match target {
            CompileTarget::Software => Ok(Bytecode::Software(Arc::new(ColorProgram))),
            CompileTarget::Dxbc => crate::imp::compile_hlsl(COLOR_SOURCE),
        }
    }
}

#[derive(Debug)]
struct TextureProgram;

impl SoftwareProgram for TextureProgram {
    fn pixel(&self, constants: &Constants<'_>, input: &Varyings, sampler: &dyn Sampler) -> [f32; 4] {
        let size = constants.vec2_element(SRC_SIZES_INDEX, 0);
        if size[0] == 0.0 || size[1] == 0.0 {
            return [0.0; 4];
        }
        let uv = [input.texcoord[0] / size[0], input.texcoord[1] / size[1]];
        let texel = sampler.sample(0, uv);
        [
            texel[0] * input.color[0],
            texel[1] * input.color[1],
            texel[2] * input.color[2],
            texel[3] * input.color[3],
        ]
    }
}

impl Program for TextureProgram {
    fn source(&self) -> &str {
        TEXTURE_SOURCE
    }

    fn uses_uniform(&self, index: usize) -> bool {
        index == SRC_SIZES_INDEX || index == PROJECTION_MATRIX_INDEX
    }

    fn compile(&self, target: CompileTarget) -> Result<Bytecode, Error> {
        match target {
            CompileTarget::Software => Ok(Bytecode::Software(Arc::new(TextureProgram))),
            CompileTarget::Dxbc => crate::imp::compile_hlsl(TEXTURE_SOURCE),
        }
    }
}

/// Fills triangles with their vertex color.
pub fn color_program() -> Arc<ShaderIr> {
    Arc::new(ShaderIr::new(
        "builtin.color",
        Unit::Pixels,
        Vec::new(),
        Arc::new(ColorProgram),
    ))
}

/// Samples source 0 at the vertex texcoord, in pixels, and multiplies by the vertex color.
pub fn texture_program() -> Arc<ShaderIr> {
    Arc::new(ShaderIr::new(
        "builtin.texture",
        Unit::Pixels,
        Vec::new(),
        Arc::new(TextureProgram),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Checker;

    impl Sampler for Checker {
        fn sample(&self, _slot: usize, uv: [f32; 2]) -> [f32; 4] {
            [uv[0], uv[1], 1.0, 1.0]
        }
    }

    #[test]
    fn texture_program_normalizes_by_source_size() {
        let ir = texture_program();
        let types = ir.uniform_types();
        let offsets = crate::uniforms::hlsl_offsets(types);
        let mut words = vec![0u32; 72];
        words[4] = 32.0f32.to_bits();
        words[5] = 16.0f32.to_bits();
        let constants = Constants::new(&words, &offsets);
        let v = Varyings {
            texcoord: [8.0, 8.0],
            color: [1.0, 1.0, 1.0, 0.5],
            custom: [0.0; 4],
        };
        assert_eq!(TextureProgram.pixel(&constants, &v, &Checker), [0.25, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn builtins_read_only_what_they_need() {
        let color = color_program();
        assert!(color.program().uses_uniform(PROJECTION_MATRIX_INDEX));
        assert!(!color.program().uses_uniform(SRC_SIZES_INDEX));
        assert_ne!(color.source_hash(), texture_program().source_hash());
    }

    #[cfg(all(windows, feature = "backend_d3d12"))]
    #[test]
    fn builtins_compile_to_dxbc() {
        for ir in [color_program(), texture_program()] {
            match ir.program().compile(CompileTarget::Dxbc).unwrap() {
                Bytecode::Dxbc { vertex, pixel } => {
                    assert!(!vertex.is_empty());
                    assert!(!pixel.is_empty());
                }
                Bytecode::Software(_) => panic!("expected DXBC for {}", ir.name()),
            }
        }
    }
}
