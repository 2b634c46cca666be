//! Animation encoding sinks.
//!
//! Sinks consume composited frames in playback order.

/// Animated GIF output via the `image` crate.
pub mod gif;
/// Generic frame sink trait and built-in sinks.
pub mod sink;
/// Animated WebP output via the system `ffmpeg` (libwebp).
pub mod webp;

pub use self::gif::GifSink;
pub use self::sink::{FrameSink, InMemorySink, SinkConfig};
pub use self::webp::{WebpSink, WebpSinkOpts};
