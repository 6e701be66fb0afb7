// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The shader IR the pipeline consumes.

Authoring and compiling shaders happens elsewhere; to this crate a program is an opaque [Program]
that knows its source text, which uniforms it reads, and how to produce bytecode for a target.
[ShaderIr] adds the uniform layout: the preserved uniforms the pipeline injects, followed by the
program's own.
*/

use crate::error::Error;
use crate::uniforms;
use std::fmt::{Debug, Display};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    Mat2,
    Mat3,
    Mat4,
    Array(Box<UniformType>, usize),
}

impl UniformType {
    /// Words the value occupies before any target padding.
    pub fn word_count(&self) -> usize {
        match self {
            UniformType::Float | UniformType::Int => 1,
            UniformType::Vec2 | UniformType::IVec2 => 2,
            UniformType::Vec3 | UniformType::IVec3 => 3,
            UniformType::Vec4 | UniformType::IVec4 | UniformType::Mat2 => 4,
            UniformType::Mat3 => 9,
            UniformType::Mat4 => 16,
            UniformType::Array(t, n) => t.word_count() * n,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, UniformType::Array(..))
    }

    pub fn is_matrix(&self) -> bool {
        matches!(
            self,
            UniformType::Mat2 | UniformType::Mat3 | UniformType::Mat4
        )
    }
}

/// Coordinate unit of the preserved region uniforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Unit {
    /// Regions are normalized by the image's internal size.
    Texels,
    #[default]
    Pixels,
}

/// 128-bit FNV-1a digest of a program's trimmed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHash(pub [u8; 16]);

const FNV128_OFFSET_BASIS: u128 = 0x6c62272e07bb014262b821756295c58d;
const FNV128_PRIME: u128 = 0x0000000001000000000000000000013B;

impl SourceHash {
    pub fn of(source: &str) -> Self {
        let mut h = FNV128_OFFSET_BASIS;
        for b in source.trim().bytes() {
            h ^= b as u128;
            h = h.wrapping_mul(FNV128_PRIME);
        }
        SourceHash(h.to_be_bytes())
    }
}

impl Display for SourceHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Bytecode family a device consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileTarget {
    /// Programs run on the CPU by the software device.
    Software,
    /// DXBC/DXIL blobs for a hardware device.
    Dxbc,
}

/// Compiled vertex and pixel stages.
#[derive(Debug, Clone)]
pub enum Bytecode {
    Software(Arc<dyn SoftwareProgram>),
    Dxbc { vertex: Vec<u8>, pixel: Vec<u8> },
}

/// Interpolated vertex outputs, as seen by a pixel program.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Varyings {
    pub texcoord: [f32; 2],
    pub color: [f32; 4],
    /// First custom float-4 slot, zero when the layout has none.
    pub custom: [f32; 4],
}

/// Point sampling for the pixel stage.
pub trait Sampler {
    /// RGBA in `0..=1` at normalized `uv` of source `slot`.  Unbound slots sample transparent black.
    fn sample(&self, slot: usize, uv: [f32; 2]) -> [f32; 4];
}

/// A view of a packed constant buffer.
///
/// Reads follow the HLSL packing produced by [uniforms::adjust_uniforms]: array elements and
/// matrix rows start on 4-word registers.
#[derive(Debug, Clone, Copy)]
pub struct Constants<'a> {
    words: &'a [u32],
    offsets: &'a [usize],
}

impl<'a> Constants<'a> {
    pub fn new(words: &'a [u32], offsets: &'a [usize]) -> Self {
        Constants { words, offsets }
    }

    fn word(&self, at: usize) -> u32 {
        self.words.get(at).copied().unwrap_or(0)
    }

    pub fn float(&self, variable: usize, word: usize) -> f32 {
        f32::from_bits(self.word(self.offsets[variable] + word))
    }

    /// Element `element` of a vec2 array.
    pub fn vec2_element(&self, variable: usize, element: usize) -> [f32; 2] {
        [
            self.float(variable, element * 4),
            self.float(variable, element * 4 + 1),
        ]
    }

    /// Row `row` of a mat4, as transposed into registers.
    pub fn matrix_row(&self, variable: usize, row: usize) -> [f32; 4] {
        [
            self.float(variable, row * 4),
            self.float(variable, row * 4 + 1),
            self.float(variable, row * 4 + 2),
            self.float(variable, row * 4 + 3),
        ]
    }
}

/// A program the software device can run.
pub trait SoftwareProgram: Send + Sync + Debug {
    /// Pixel color for one fragment.
    fn pixel(&self, constants: &Constants<'_>, input: &Varyings, sampler: &dyn Sampler) -> [f32; 4];
}

/// An opaque compiled-shader source.
pub trait Program: Send + Sync + Debug {
    fn source(&self) -> &str;
    /// Whether the program reads variable `index` of the full uniform list, preserved uniforms
    /// included.
    fn uses_uniform(&self, index: usize) -> bool;
    fn compile(&self, target: CompileTarget) -> Result<Bytecode, Error>;
}

/// A shader as handed to a backend.
#[derive(Debug)]
pub struct ShaderIr {
    name: String,
    unit: Unit,
    uniform_types: Vec<UniformType>,
    program: Arc<dyn Program>,
}

impl ShaderIr {
    /// `user_uniforms` are the program's own; the preserved uniforms are prepended.
    pub fn new(
        name: impl Into<String>,
        unit: Unit,
        user_uniforms: Vec<UniformType>,
        program: Arc<dyn Program>,
    ) -> Self {
        let mut uniform_types = uniforms::preserved_uniform_types();
        uniform_types.extend(user_uniforms);
        ShaderIr {
            name: name.into(),
            unit,
            uniform_types,
            program,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    pub fn uniform_types(&self) -> &[UniformType] {
        &self.uniform_types
    }

    pub fn program(&self) -> &Arc<dyn Program> {
        &self.program
    }

    pub fn source_hash(&self) -> SourceHash {
        SourceHash::of(self.program.source())
    }

    /// Words in the unpadded uniform list.
    pub fn uniform_word_count(&self) -> usize {
        self.uniform_types.iter().map(UniformType::word_count).sum()
    }

    /// Zeroes the words of every variable the program doesn't read, so draws that differ only in
    /// unused uniforms compare equal.
    pub fn filter_uniforms(&self, uniforms: &mut [u32]) {
        let mut at = 0;
        for (i, t) in self.uniform_types.iter().enumerate() {
            let n = t.word_count();
            if at >= uniforms.len() {
                break;
            }
            let end = (at + n).min(uniforms.len());
            if !self.program.uses_uniform(i) {
                uniforms[at..end].fill(0);
            }
            at += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Reads(Vec<usize>);

    impl Program for Reads {
        fn source(&self) -> &str {
            "  float4 main() { return 0; }\n"
        }
        fn uses_uniform(&self, index: usize) -> bool {
            self.0.contains(&index)
        }
        fn compile(&self, _target: CompileTarget) -> Result<Bytecode, Error> {
            Err(Error::Unsupported("test program".to_string()))
        }
    }

    #[test]
    fn word_counts() {
        assert_eq!(UniformType::Mat3.word_count(), 9);
        assert_eq!(
            UniformType::Array(Box::new(UniformType::Vec2), 4).word_count(),
            8
        );
    }

    #[test]
    fn preserved_uniforms_are_prepended() {
        let ir = ShaderIr::new(
            "t",
            Unit::Pixels,
            vec![UniformType::Float],
            Arc::new(Reads(vec![])),
        );
        assert_eq!(ir.uniform_types().len(), uniforms::PRESERVED_UNIFORM_COUNT + 1);
        assert_eq!(ir.uniform_word_count(), uniforms::PRESERVED_UNIFORM_WORDS + 1);
    }

    #[test]
    fn unused_uniforms_are_zeroed() {
        let ir = ShaderIr::new(
            "t",
            Unit::Pixels,
            vec![UniformType::Float, UniformType::Vec2],
            Arc::new(Reads(vec![0, 7])),
        );
        let mut words: Vec<u32> = (1..=ir.uniform_word_count() as u32).collect();
        ir.filter_uniforms(&mut words);
        assert_eq!(&words[0..2], &[1, 2]);
        assert!(words[2..46].iter().all(|w| *w == 0));
        assert_eq!(words[46], 47);
        assert_eq!(&words[47..49], &[0, 0]);
    }

    #[test]
    fn source_hash_ignores_surrounding_whitespace() {
        assert_eq!(SourceHash::of("abc"), SourceHash::of("  abc\n"));
        assert_ne!(SourceHash::of("abc"), SourceHash::of("abd"));
        assert_eq!(SourceHash::of("").to_string(), "6c62272e07bb014262b821756295c58d");
    }
}
