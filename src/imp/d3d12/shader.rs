// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Driver-side shaders and the bytecode cache.
*/

use super::api::{Device, PipelineStateId, ShaderBytecode};
use super::pipeline::{PipelineKey, PipelineStates};
use super::stencil::StencilMode;
use crate::error::Error;
use crate::graphics::{Blend, ShaderId};
use crate::shader_ir::{Bytecode, CompileTarget, ShaderIr, SourceHash};
use crate::uniforms;
use std::collections::HashMap;
use std::sync::Arc;

/// Compiled stages by source hash.
///
/// Precompiled blobs take precedence over compiling, and a program compiles at most once per
/// backend.
#[derive(Debug, Default)]
pub(crate) struct BytecodeCache {
    precompiled: HashMap<SourceHash, (Arc<[u8]>, Arc<[u8]>)>,
    compiled: HashMap<SourceHash, Bytecode>,
}

impl BytecodeCache {
    pub(crate) fn register_precompiled(
        &mut self,
        hash: SourceHash,
        vertex: &[u8],
        pixel: &[u8],
    ) -> Result<(), Error> {
        if self.precompiled.contains_key(&hash) {
            return Err(Error::InvalidArgument(format!(
                "precompiled bytecode for {hash} is already registered"
            )));
        }
        self.precompiled.insert(hash, (vertex.into(), pixel.into()));
        Ok(())
    }

    /// Stages for `ir` in the form `target` consumes.
    pub(crate) fn get(
        &mut self,
        ir: &ShaderIr,
        uniform_offsets: &Arc<[usize]>,
        target: CompileTarget,
    ) -> Result<ShaderBytecode, Error> {
        let hash = ir.source_hash();
        if target == CompileTarget::Dxbc
            && let Some((vertex, pixel)) = self.precompiled.get(&hash)
        {
            return Ok(ShaderBytecode::Dxbc {
                vertex: vertex.clone(),
                pixel: pixel.clone(),
            });
        }
        let bytecode = match self.compiled.get(&hash) {
            Some(b) => b.clone(),
            None => {
                let b = ir.program().compile(target)?;
                logwise::debuginternal_sync!(
                    "compiled {name} ({hash})",
                    name = ir.name().to_string(),
                    hash = hash.to_string()
                );
                self.compiled.insert(hash, b.clone());
                b
            }
        };
        Ok(match bytecode {
            Bytecode::Dxbc { vertex, pixel } => ShaderBytecode::Dxbc {
                vertex: vertex.into(),
                pixel: pixel.into(),
            },
            Bytecode::Software(program) => ShaderBytecode::Software {
                program,
                uniform_offsets: uniform_offsets.clone(),
            },
        })
    }
}

#[derive(Debug)]
pub(crate) struct Shader12 {
    id: ShaderId,
    ir: Arc<ShaderIr>,
    uniform_offsets: Arc<[usize]>,
    bytecode: ShaderBytecode,
    pipeline_states: HashMap<PipelineKey, PipelineStateId>,
}

impl Shader12 {
    pub(crate) fn new(
        id: ShaderId,
        ir: Arc<ShaderIr>,
        cache: &mut BytecodeCache,
        target: CompileTarget,
    ) -> Result<Self, Error> {
        let uniform_offsets: Arc<[usize]> = uniforms::hlsl_offsets(ir.uniform_types()).into();
        let bytecode = cache.get(&ir, &uniform_offsets, target)?;
        Ok(Shader12 {
            id,
            ir,
            uniform_offsets,
            bytecode,
            pipeline_states: HashMap::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> ShaderId {
        self.id
    }

    pub(crate) fn ir(&self) -> &ShaderIr {
        &self.ir
    }

    pub(crate) fn uniform_offsets(&self) -> &[usize] {
        &self.uniform_offsets
    }

    /// The pipeline for one blend, stencil and target-format combination, created on first use.
    pub(crate) fn pipeline_state(
        &mut self,
        device: &mut dyn Device,
        pipelines: &mut PipelineStates,
        blend: Blend,
        stencil: StencilMode,
        screen: bool,
    ) -> Result<PipelineStateId, Error> {
        let key = PipelineKey {
            blend,
            stencil,
            screen,
        };
        if let Some(pso) = self.pipeline_states.get(&key) {
            return Ok(*pso);
        }
        let pso = pipelines.new_pipeline_state(device, self.bytecode.clone(), key)?;
        self.pipeline_states.insert(key, pso);
        Ok(pso)
    }

    pub(crate) fn dispose(&mut self, device: &mut dyn Device) {
        logwise::debuginternal_sync!(
            "disposing shader {id} with {count} pipelines",
            id = logwise::privacy::LogIt(&self.id.0),
            count = logwise::privacy::LogIt(&self.pipeline_states.len())
        );
        for (_, pso) in self.pipeline_states.drain() {
            device.release_pipeline_state(pso);
        }
    }
}
