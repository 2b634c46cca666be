//! Text watermark compositing for still frames.

pub mod blend;
mod compositor;
pub(crate) mod font;
pub mod spec;

pub use compositor::{
    Composited, Compositor, CompositorOpts, TextBounds, WatermarkOutcome, anchor_for,
    outline_offsets,
};
pub use font::DEFAULT_FONT_ENV;
pub use spec::{MAX_WATERMARKS, Position, Rgb8, WatermarkSpec, validate_watermarks};
