#![forbid(unsafe_code)]

pub mod archive;
pub mod encode;
pub mod foundation;
pub mod job;
pub mod media;
pub mod pipeline;
pub mod sampler;
pub mod watermark;

pub use archive::{StillArchive, StillFormat, still_entry_name};
pub use encode::{FrameSink, GifSink, InMemorySink, SinkConfig, WebpSink, WebpSinkOpts};
pub use foundation::error::{ClipmarkError, ClipmarkResult};
pub use job::{AnimateJob, AnimationFormat, ExtractJob, ThumbnailSource, TrimRange, load_json};
pub use media::{
    ClipDecodeOpts, FrameReader, VideoSourceInfo, decode_frame_at, is_ffmpeg_on_path, probe_video,
};
pub use pipeline::{
    AnimateReport, ExtractReport, ThumbnailCandidate, run_animate, run_extract,
    thumbnail_candidates,
};
pub use sampler::{SamplingPolicy, sample, sample_with_margin};
pub use watermark::{
    Composited, Compositor, CompositorOpts, Position, Rgb8, TextBounds, WatermarkOutcome,
    WatermarkSpec,
};
