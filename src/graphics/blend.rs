// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Blend state shared by every backend.

/// Multiplier applied to a source or destination color before the blend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SourceColor,
    OneMinusSourceColor,
    SourceAlpha,
    OneMinusSourceAlpha,
    DestinationColor,
    OneMinusDestinationColor,
    DestinationAlpha,
    OneMinusDestinationAlpha,
    SourceAlphaSaturated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Color and alpha blend equations.  Two draws merge only if their blends are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blend {
    pub factor_source_rgb: BlendFactor,
    pub factor_source_alpha: BlendFactor,
    pub factor_destination_rgb: BlendFactor,
    pub factor_destination_alpha: BlendFactor,
    pub operation_rgb: BlendOperation,
    pub operation_alpha: BlendOperation,
}

const fn porter_duff(src: BlendFactor, dst: BlendFactor) -> Blend {
    Blend {
        factor_source_rgb: src,
        factor_source_alpha: src,
        factor_destination_rgb: dst,
        factor_destination_alpha: dst,
        operation_rgb: BlendOperation::Add,
        operation_alpha: BlendOperation::Add,
    }
}

impl Blend {
    pub const SOURCE_OVER: Blend =
        porter_duff(BlendFactor::One, BlendFactor::OneMinusSourceAlpha);
    pub const CLEAR: Blend = porter_duff(BlendFactor::Zero, BlendFactor::Zero);
    pub const COPY: Blend = porter_duff(BlendFactor::One, BlendFactor::Zero);
    pub const DESTINATION: Blend = porter_duff(BlendFactor::Zero, BlendFactor::One);
    pub const DESTINATION_OVER: Blend =
        porter_duff(BlendFactor::OneMinusDestinationAlpha, BlendFactor::One);
    pub const SOURCE_IN: Blend = porter_duff(BlendFactor::DestinationAlpha, BlendFactor::Zero);
    pub const DESTINATION_IN: Blend = porter_duff(BlendFactor::Zero, BlendFactor::SourceAlpha);
    pub const SOURCE_OUT: Blend =
        porter_duff(BlendFactor::OneMinusDestinationAlpha, BlendFactor::Zero);
    pub const DESTINATION_OUT: Blend =
        porter_duff(BlendFactor::Zero, BlendFactor::OneMinusSourceAlpha);
    pub const SOURCE_ATOP: Blend = porter_duff(
        BlendFactor::DestinationAlpha,
        BlendFactor::OneMinusSourceAlpha,
    );
    pub const DESTINATION_ATOP: Blend = porter_duff(
        BlendFactor::OneMinusDestinationAlpha,
        BlendFactor::SourceAlpha,
    );
    pub const XOR: Blend = porter_duff(
        BlendFactor::OneMinusDestinationAlpha,
        BlendFactor::OneMinusSourceAlpha,
    );
    pub const LIGHTER: Blend = porter_duff(BlendFactor::One, BlendFactor::One);
}

impl Default for Blend {
    fn default() -> Self {
        Blend::SOURCE_OVER
    }
}
