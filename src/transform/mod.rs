//! Image transforms applied by the transform stage.

mod resize;

pub use resize::{ImageResizer, ImageTransformer, ResizeStrategy, TargetBox, Transformed};
