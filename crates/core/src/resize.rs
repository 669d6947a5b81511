use engine::Dimensions;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeBounds {
    pub max_width: u32,
    pub max_height: u32,
}

impl ResizeBounds {
    pub fn exceeded_by(&self, dims: Dimensions) -> bool {
        dims.width > self.max_width || dims.height > self.max_height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    pub scale: Decimal,
    /// `scale * 100`, handed to the engine.
    pub percent: Decimal,
    pub new: Dimensions,
}

/// Works out the resize for an image, or `None` when it already fits.
///
/// The fit ratios are `max / original` per axis and the *larger* one is used,
/// plus a fixed 0.01 margin. With one axis inside its bound and the other
/// outside, that ratio is above 1 and the image grows. New dimensions round
/// half-to-even from the same scale.
pub fn plan(orig: Dimensions, bounds: ResizeBounds) -> Option<ResizePlan> {
    if !bounds.exceeded_by(orig) {
        return None;
    }
    let sw = Decimal::from(bounds.max_width).checked_div(Decimal::from(orig.width))?;
    let sh = Decimal::from(bounds.max_height).checked_div(Decimal::from(orig.height))?;
    let scale = sw.max(sh) + Decimal::new(1, 2);
    Some(ResizePlan {
        scale,
        percent: scale * Decimal::ONE_HUNDRED,
        new: Dimensions::new(scaled(orig.width, scale)?, scaled(orig.height, scale)?),
    })
}

fn scaled(value: u32, scale: Decimal) -> Option<u32> {
    (Decimal::from(value) * scale)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_u32()
}
