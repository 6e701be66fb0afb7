// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Stencil modes for the fill rules.

`NonZero` and `EvenOdd` draw in two passes: the first only accumulates coverage into the stencil
buffer, the second draws color wherever the stencil is non-zero.  `FillAll` draws color in one
pass with the stencil disabled.
*/

use super::api::{
    ColorWriteMask, ComparisonFunc, DepthStencilDesc, DepthStencilOpDesc, StencilOp,
};
use crate::graphics::FillRule;

/// `D3D12_DEFAULT_STENCIL_READ_MASK`
const DEFAULT_STENCIL_READ_MASK: u8 = 0xff;
/// `D3D12_DEFAULT_STENCIL_WRITE_MASK`
const DEFAULT_STENCIL_WRITE_MASK: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum StencilMode {
    NoStencil,
    /// Front faces increment, back faces decrement.
    IncrementStencil,
    InvertStencil,
    /// Color pass over non-zero stencil.
    DrawWithStencil,
}

impl StencilMode {
    /// The passes a draw with `fill_rule` makes, in order.
    pub(crate) fn passes(fill_rule: FillRule) -> &'static [StencilMode] {
        match fill_rule {
            FillRule::FillAll => &[StencilMode::NoStencil],
            FillRule::NonZero => &[StencilMode::IncrementStencil, StencilMode::DrawWithStencil],
            FillRule::EvenOdd => &[StencilMode::InvertStencil, StencilMode::DrawWithStencil],
        }
    }

    pub(crate) fn uses_stencil(self) -> bool {
        self != StencilMode::NoStencil
    }

    /// Stencil-only passes write no color.
    pub(crate) fn write_mask(self) -> ColorWriteMask {
        match self {
            StencilMode::NoStencil | StencilMode::DrawWithStencil => ColorWriteMask::ALL,
            StencilMode::IncrementStencil | StencilMode::InvertStencil => ColorWriteMask::empty(),
        }
    }

    pub(crate) fn depth_stencil_desc(self) -> DepthStencilDesc {
        let mut desc = DepthStencilDesc {
            depth_enable: false,
            depth_func: ComparisonFunc::Less,
            stencil_enable: false,
            stencil_read_mask: DEFAULT_STENCIL_READ_MASK,
            stencil_write_mask: DEFAULT_STENCIL_WRITE_MASK,
            front_face: DepthStencilOpDesc::KEEP_ALWAYS,
            back_face: DepthStencilOpDesc::KEEP_ALWAYS,
        };
        match self {
            StencilMode::NoStencil => {}
            StencilMode::IncrementStencil => {
                desc.stencil_enable = true;
                desc.front_face.pass_op = StencilOp::Incr;
                desc.back_face.pass_op = StencilOp::Decr;
            }
            StencilMode::InvertStencil => {
                desc.stencil_enable = true;
                desc.front_face.pass_op = StencilOp::Invert;
                desc.back_face.pass_op = StencilOp::Invert;
            }
            StencilMode::DrawWithStencil => {
                desc.stencil_enable = true;
                desc.front_face.func = ComparisonFunc::NotEqual;
                desc.back_face.func = ComparisonFunc::NotEqual;
            }
        }
        desc
    }
}
