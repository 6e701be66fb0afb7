// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Pipeline state objects, the root signature and per-frame constant buffers.

The shader-visible descriptor heap is carved into one block of five descriptors per draw: the
constant buffer, then one SRV per source image.  Each frame owns
[NUM_DESCRIPTORS_PER_FRAME] blocks, so a frame can issue that many draw calls before its
constant buffers have to be recycled.
*/

use super::api::{
    AddressMode, BlendOp, BlendValue, CONSTANT_BUFFER_ALIGNMENT, ComparisonFunc,
    ConstantBufferViewDesc, CpuDescriptorHandle, DescriptorHeapId, DescriptorHeapType,
    DescriptorRange, DescriptorRangeType, Device, FRAME_COUNT, Filter, Format,
    GpuDescriptorHandle, GraphicsCommandList, GraphicsPipelineStateDesc, HeapType,
    InputElementDesc, PipelineStateId, RenderTargetBlendDesc, ResourceDesc, ResourceId,
    ResourceStates, RootParameter, RootSignatureDesc, RootSignatureId, SamplerDesc,
    ShaderBytecode, ShaderVisibility,
};
use super::shader::Shader12;
use super::stencil::StencilMode;
use crate::bittricks::align_up;
use crate::error::Error;
use crate::graphics::{
    Blend, BlendFactor, BlendOperation, DstRegion, FillRule, SHADER_SRC_IMAGE_COUNT,
};

/// Draw calls one frame can issue before its constant buffers are recycled.
pub(crate) const NUM_DESCRIPTORS_PER_FRAME: usize = 32;

const NUM_CONSTANT_BUFFER_AND_SOURCE_TEXTURES: u32 = 1 + SHADER_SRC_IMAGE_COUNT as u32;

/// What a shader's pipeline state objects are keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub(crate) blend: Blend,
    pub(crate) stencil: StencilMode,
    pub(crate) screen: bool,
}

/// Alpha slots don't accept color factors, so those map onto their alpha counterparts.
pub(crate) fn blend_factor_to_blend12(f: BlendFactor, alpha: bool) -> BlendValue {
    match f {
        BlendFactor::Zero => BlendValue::Zero,
        BlendFactor::One => BlendValue::One,
        BlendFactor::SourceColor if alpha => BlendValue::SrcAlpha,
        BlendFactor::SourceColor => BlendValue::SrcColor,
        BlendFactor::OneMinusSourceColor if alpha => BlendValue::InvSrcAlpha,
        BlendFactor::OneMinusSourceColor => BlendValue::InvSrcColor,
        BlendFactor::SourceAlpha => BlendValue::SrcAlpha,
        BlendFactor::OneMinusSourceAlpha => BlendValue::InvSrcAlpha,
        BlendFactor::DestinationColor if alpha => BlendValue::DestAlpha,
        BlendFactor::DestinationColor => BlendValue::DestColor,
        BlendFactor::OneMinusDestinationColor if alpha => BlendValue::InvDestAlpha,
        BlendFactor::OneMinusDestinationColor => BlendValue::InvDestColor,
        BlendFactor::DestinationAlpha => BlendValue::DestAlpha,
        BlendFactor::OneMinusDestinationAlpha => BlendValue::InvDestAlpha,
        BlendFactor::SourceAlphaSaturated => BlendValue::SrcAlphaSat,
    }
}

pub(crate) fn blend_operation_to_blend_op12(o: BlendOperation) -> BlendOp {
    match o {
        BlendOperation::Add => BlendOp::Add,
        BlendOperation::Subtract => BlendOp::Subtract,
        BlendOperation::ReverseSubtract => BlendOp::RevSubtract,
        BlendOperation::Min => BlendOp::Min,
        BlendOperation::Max => BlendOp::Max,
    }
}

/// Position, texcoord and color, then one extra float-4 `COLOR` slot per four custom floats.
pub(crate) fn input_layout(vertex_float_count: usize) -> Vec<InputElementDesc> {
    let mut layout = vec![
        InputElementDesc {
            semantic_name: "POSITION",
            semantic_index: 0,
            format: Format::R32G32Float,
            aligned_byte_offset: 0,
        },
        InputElementDesc {
            semantic_name: "TEXCOORD",
            semantic_index: 0,
            format: Format::R32G32Float,
            aligned_byte_offset: 8,
        },
        InputElementDesc {
            semantic_name: "COLOR",
            semantic_index: 0,
            format: Format::R32G32B32A32Float,
            aligned_byte_offset: 16,
        },
    ];
    let extra = vertex_float_count.saturating_sub(8) / 4;
    for i in 0..extra {
        layout.push(InputElementDesc {
            semantic_name: "COLOR",
            semantic_index: i as u32 + 1,
            format: Format::R32G32B32A32Float,
            aligned_byte_offset: 32 + 16 * i as u32,
        });
    }
    layout
}

#[derive(Debug, Clone, Copy)]
struct ConstantBuffer {
    resource: ResourceId,
    size: u64,
}

#[derive(Debug)]
pub(crate) struct PipelineStates {
    root_signature: Option<RootSignatureId>,
    shader_descriptor_heap: DescriptorHeapId,
    sampler_descriptor_heap: DescriptorHeapId,
    /// Every buffer a frame has created.  Slots below `constant_buffers_used` are in flight.
    constant_buffers: [Vec<ConstantBuffer>; FRAME_COUNT],
    constant_buffers_used: [usize; FRAME_COUNT],
    vertex_float_count: usize,
}

impl PipelineStates {
    pub(crate) fn initialize(device: &mut dyn Device, vertex_float_count: usize) -> Result<Self, Error> {
        let shader_descriptor_heap = device.create_descriptor_heap(
            DescriptorHeapType::CbvSrvUav,
            FRAME_COUNT as u32 * NUM_DESCRIPTORS_PER_FRAME as u32 * NUM_CONSTANT_BUFFER_AND_SOURCE_TEXTURES,
            true,
        )?;
        let sampler_descriptor_heap =
            match device.create_descriptor_heap(DescriptorHeapType::Sampler, 1, true) {
                Ok(heap) => heap,
                Err(e) => {
                    device.release_descriptor_heap(shader_descriptor_heap);
                    return Err(e);
                }
            };
        device.create_sampler(
            &SamplerDesc {
                filter: Filter::MinMagMipPoint,
                address_u: AddressMode::Wrap,
                address_v: AddressMode::Wrap,
                address_w: AddressMode::Wrap,
                comparison: ComparisonFunc::Never,
                min_lod: -f32::MAX,
                max_lod: f32::MAX,
            },
            CpuDescriptorHandle::heap_start(sampler_descriptor_heap),
        );
        Ok(PipelineStates {
            root_signature: None,
            shader_descriptor_heap,
            sampler_descriptor_heap,
            constant_buffers: Default::default(),
            constant_buffers_used: [0; FRAME_COUNT],
            vertex_float_count,
        })
    }

    pub(crate) fn constant_buffers_used(&self, frame_index: usize) -> usize {
        self.constant_buffers_used[frame_index]
    }

    fn ensure_root_signature(&mut self, device: &mut dyn Device) -> Result<RootSignatureId, Error> {
        if let Some(rs) = self.root_signature {
            return Ok(rs);
        }
        let table = |kind, num_descriptors, offset, visibility| RootParameter {
            range: DescriptorRange {
                kind,
                num_descriptors,
                base_shader_register: 0,
                offset_in_descriptors_from_table_start: offset,
            },
            visibility,
        };
        let desc = RootSignatureDesc {
            parameters: vec![
                // b0
                table(DescriptorRangeType::Cbv, 1, 0, ShaderVisibility::All),
                // t0..
                table(
                    DescriptorRangeType::Srv,
                    SHADER_SRC_IMAGE_COUNT as u32,
                    1,
                    ShaderVisibility::Pixel,
                ),
                // s0
                table(DescriptorRangeType::Sampler, 1, 0, ShaderVisibility::Pixel),
            ],
            allow_input_assembler_input_layout: true,
        };
        let rs = device.create_root_signature(&desc)?;
        self.root_signature = Some(rs);
        Ok(rs)
    }

    pub(crate) fn new_pipeline_state(
        &mut self,
        device: &mut dyn Device,
        shader: ShaderBytecode,
        key: PipelineKey,
    ) -> Result<PipelineStateId, Error> {
        let root_signature = self.ensure_root_signature(device)?;
        let blend = key.blend;
        let desc = GraphicsPipelineStateDesc {
            root_signature,
            shader,
            blend: RenderTargetBlendDesc {
                blend_enable: true,
                src_blend: blend_factor_to_blend12(blend.factor_source_rgb, false),
                dest_blend: blend_factor_to_blend12(blend.factor_destination_rgb, false),
                blend_op: blend_operation_to_blend_op12(blend.operation_rgb),
                src_blend_alpha: blend_factor_to_blend12(blend.factor_source_alpha, true),
                dest_blend_alpha: blend_factor_to_blend12(blend.factor_destination_alpha, true),
                blend_op_alpha: blend_operation_to_blend_op12(blend.operation_alpha),
                write_mask: key.stencil.write_mask(),
            },
            depth_stencil: key.stencil.depth_stencil_desc(),
            input_layout: input_layout(self.vertex_float_count),
            rtv_format: if key.screen {
                Format::B8G8R8A8Unorm
            } else {
                Format::R8G8B8A8Unorm
            },
            dsv_format: if key.stencil.uses_stencil() {
                Format::D24UnormS8Uint
            } else {
                Format::Unknown
            },
        };
        device.create_graphics_pipeline_state(&desc)
    }

    /// Records the draws of one command.  `uniforms` are already packed for the constant buffer.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn draw_triangles(
        &mut self,
        device: &mut dyn Device,
        list: &mut GraphicsCommandList,
        frame_index: usize,
        screen: bool,
        srcs: [Option<ResourceId>; SHADER_SRC_IMAGE_COUNT],
        shader: &mut Shader12,
        dst_regions: &[DstRegion],
        uniforms: &[u32],
        blend: Blend,
        index_offset: usize,
        fill_rule: FillRule,
    ) -> Result<(), Error> {
        let idx = self.constant_buffers_used[frame_index];
        if idx >= NUM_DESCRIPTORS_PER_FRAME {
            return Err(Error::OutOfMemory("constant buffer descriptors"));
        }

        let size = align_up(4 * uniforms.len() as u64, CONSTANT_BUFFER_ALIGNMENT);
        let offset = NUM_CONSTANT_BUFFER_AND_SOURCE_TEXTURES
            * (frame_index * NUM_DESCRIPTORS_PER_FRAME + idx) as u32;
        let cpu_block = CpuDescriptorHandle::heap_start(self.shader_descriptor_heap).offset(offset);

        let reusable = self.constant_buffers[frame_index]
            .get(idx)
            .filter(|cb| cb.size >= size)
            .copied();
        let cb = match reusable {
            Some(cb) => cb,
            None => {
                let resource = device.create_committed_resource(
                    HeapType::Upload,
                    &ResourceDesc::buffer(size),
                    ResourceStates::GENERIC_READ,
                )?;
                let location = device.gpu_virtual_address(resource);
                device.create_constant_buffer_view(
                    &ConstantBufferViewDesc {
                        location,
                        size_in_bytes: size as u32,
                    },
                    cpu_block,
                );
                let cb = ConstantBuffer { resource, size };
                let buffers = &mut self.constant_buffers[frame_index];
                if let Some(old) = buffers.get_mut(idx) {
                    device.release_resource(old.resource);
                    *old = cb;
                } else {
                    buffers.push(cb);
                }
                cb
            }
        };
        self.constant_buffers_used[frame_index] = idx + 1;

        for (i, src) in srcs.iter().enumerate() {
            if let Some(src) = src {
                device.create_shader_resource_view(*src, cpu_block.offset(1 + i as u32));
            }
        }

        device.map(cb.resource, &mut |mapped| {
            for (dst, word) in mapped.chunks_exact_mut(4).zip(uniforms) {
                dst.copy_from_slice(&word.to_le_bytes());
            }
        })?;

        let rs = self.ensure_root_signature(device)?;
        list.set_graphics_root_signature(rs);
        list.set_descriptor_heaps(&[self.shader_descriptor_heap, self.sampler_descriptor_heap]);
        let gpu_block = GpuDescriptorHandle::heap_start(self.shader_descriptor_heap).offset(offset);
        list.set_graphics_root_descriptor_table(0, gpu_block);
        list.set_graphics_root_descriptor_table(1, gpu_block);
        list.set_graphics_root_descriptor_table(
            2,
            GpuDescriptorHandle::heap_start(self.sampler_descriptor_heap),
        );

        let passes = StencilMode::passes(fill_rule);
        if fill_rule == FillRule::FillAll {
            let pso = shader.pipeline_state(device, self, blend, StencilMode::NoStencil, screen)?;
            list.set_pipeline_state(pso);
        }

        let mut index_offset = index_offset as u32;
        for region in dst_regions {
            list.rs_set_scissor_rect(region.region);
            let count = region.index_count as u32;
            if fill_rule == FillRule::FillAll {
                list.draw_indexed_instanced(count, 1, index_offset, 0, 0);
            } else {
                for mode in passes {
                    let pso = shader.pipeline_state(device, self, blend, *mode, screen)?;
                    list.set_pipeline_state(pso);
                    list.draw_indexed_instanced(count, 1, index_offset, 0, 0);
                }
            }
            index_offset += count;
        }
        Ok(())
    }

    /// Makes every buffer of the frame available again.  Only once the frame's GPU work is done.
    pub(crate) fn reset_constant_buffers(&mut self, frame_index: usize) {
        self.constant_buffers_used[frame_index] = 0;
    }

    pub(crate) fn release_constant_buffers(&mut self, device: &mut dyn Device, frame_index: usize) {
        for cb in self.constant_buffers[frame_index].drain(..) {
            device.release_resource(cb.resource);
        }
        self.constant_buffers_used[frame_index] = 0;
    }
}
