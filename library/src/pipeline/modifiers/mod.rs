pub mod affine;
pub mod scale;

pub use affine::AffineTransformationModifier;
pub use scale::ScalePropertyModifier;
