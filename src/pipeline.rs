//! End-to-end runs: video in, animation or still archive out.
//!
//! Every run validates its job and probes the source before any decoding starts, writes to a
//! `.partial` sibling of the requested output and only moves it into place once the encoder has
//! finished cleanly.

use std::{
    fs::File,
    io::{BufWriter, Write as _},
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use image::{
    RgbImage,
    imageops::{self, FilterType},
};

use crate::{
    archive::StillArchive,
    encode::{FrameSink, GifSink, SinkConfig, WebpSink, WebpSinkOpts},
    foundation::{
        error::{ClipmarkError, ClipmarkResult},
        fs::PartialOutput,
    },
    job::{AnimateJob, AnimationFormat, ExtractJob, ThumbnailSource},
    media::{
        ClipDecodeOpts, FrameReader, VideoSourceInfo, decode_frame_at, probe_video, scaled_height,
    },
    sampler::{DEFAULT_END_MARGIN_SEC, SamplingPolicy, sample},
    watermark::{Compositor, WatermarkSpec},
};

/// Summary of a finished [`run_animate`].
#[derive(Clone, Debug, PartialEq)]
pub struct AnimateReport {
    pub out_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames taken from the video, excluding the thumbnail.
    pub clip_frames: u64,
    pub thumbnail_frames: u32,
    /// At least one watermark fell back to the default face.
    pub used_fallback_font: bool,
}

/// Summary of a finished [`run_extract`].
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractReport {
    pub out_path: PathBuf,
    pub entries: Vec<String>,
    pub timestamps: Vec<f64>,
    pub used_fallback_font: bool,
}

/// One frame offered as a thumbnail.
#[derive(Clone, Debug)]
pub struct ThumbnailCandidate {
    pub at_sec: f64,
    pub image: RgbImage,
}

/// Resize `frame` to `width`, keeping its aspect ratio.
pub fn resize_to_width(frame: &RgbImage, width: u32) -> RgbImage {
    if frame.width() == width {
        return frame.clone();
    }
    let height = scaled_height(frame.width(), frame.height(), width);
    imageops::resize(frame, width, height, FilterType::Lanczos3)
}

/// Scale `img` to `width` and center it vertically on a black `width`×`height` frame, cropping
/// whatever does not fit.
pub fn fit_to_frame(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    let scaled = resize_to_width(img, width);
    if scaled.height() == height {
        return scaled;
    }
    let mut canvas = RgbImage::new(width, height);
    let dy = (i64::from(height) - i64::from(scaled.height())) / 2;
    imageops::overlay(&mut canvas, &scaled, 0, dy);
    canvas
}

fn composite_frame(
    compositor: &mut Compositor,
    frame: &RgbImage,
    specs: &[WatermarkSpec],
    used_fallback_font: &mut bool,
) -> ClipmarkResult<RgbImage> {
    if specs.is_empty() {
        return Ok(frame.clone());
    }
    let out = compositor.composite(frame, specs)?;
    *used_fallback_font |= out.used_fallback_font();
    Ok(out.image)
}

fn check_thumbnail_against(info: &VideoSourceInfo, thumb: &ThumbnailSource) -> ClipmarkResult<()> {
    if let ThumbnailSource::VideoFrame { at_sec } = thumb
        && *at_sec > info.duration_sec - DEFAULT_END_MARGIN_SEC
    {
        return Err(ClipmarkError::validation(format!(
            "thumbnail timestamp {at_sec}s is too close to the end of the video ({:.3}s)",
            info.duration_sec
        )));
    }
    Ok(())
}

fn load_thumbnail(info: &VideoSourceInfo, thumb: &ThumbnailSource) -> ClipmarkResult<RgbImage> {
    match thumb {
        ThumbnailSource::VideoFrame { at_sec } => decode_frame_at(info, *at_sec),
        ThumbnailSource::Image { path } => image::open(path)
            .map(|img| img.to_rgb8())
            .map_err(|e| {
                ClipmarkError::validation(format!(
                    "could not read thumbnail image '{}': {e}",
                    path.display()
                ))
            }),
    }
}

fn make_sink(job: &AnimateJob, path: &Path) -> Box<dyn FrameSink> {
    match job.format {
        AnimationFormat::Gif => Box::new(GifSink::new(path)),
        AnimationFormat::Webp => {
            let mut opts = WebpSinkOpts::new(path);
            opts.quality = job.webp_quality;
            opts.method = job.webp_method;
            Box::new(WebpSink::new(opts))
        }
    }
}

/// Convert (a trimmed section of) `video` into an animated GIF or WebP at `out`.
///
/// The optional thumbnail is shown first for `job.thumbnail_duration_sec`, then every decoded
/// frame of the clip follows with `job.watermarks` burned in.
#[tracing::instrument(skip(job), fields(format = ?job.format))]
pub fn run_animate(video: &Path, out: &Path, job: &AnimateJob) -> ClipmarkResult<AnimateReport> {
    job.validate()?;
    let info = probe_video(video)?;
    let trim = job.resolve_trim(&info)?;
    if let Some(thumb) = &job.thumbnail {
        check_thumbnail_against(&info, thumb)?;
    }

    let width = job.width;
    let height = scaled_height(info.width, info.height, width);
    let cfg = SinkConfig {
        width,
        height,
        fps: job.fps,
    };

    let partial = PartialOutput::new(out)?;
    let mut compositor = Compositor::new(job.compositor.clone());
    let mut used_fallback_font = false;

    let mut sink = make_sink(job, partial.path());
    sink.begin(cfg)?;

    let mut thumbnail_frames = 0;
    if let Some(thumb) = &job.thumbnail {
        let still = fit_to_frame(&load_thumbnail(&info, thumb)?, width, height);
        let still = if job.watermark_thumbnail {
            composite_frame(
                &mut compositor,
                &still,
                &job.watermarks,
                &mut used_fallback_font,
            )?
        } else {
            still
        };
        thumbnail_frames = job.thumbnail_frames();
        for _ in 0..thumbnail_frames {
            sink.push_frame(&still)?;
        }
        tracing::debug!(frames = thumbnail_frames, "thumbnail prepended");
    }

    let mut reader = FrameReader::spawn(
        &info,
        ClipDecodeOpts {
            start_sec: trim.start_sec,
            end_sec: trim.end_sec,
            fps: job.fps,
            width,
            height,
        },
    )?;
    while let Some(frame) = reader.next_frame()? {
        let frame = composite_frame(
            &mut compositor,
            &frame,
            &job.watermarks,
            &mut used_fallback_font,
        )?;
        sink.push_frame(&frame)?;
    }
    let clip_frames = reader.frames_read();
    drop(reader);
    if clip_frames == 0 {
        return Err(ClipmarkError::media(format!(
            "no frames decoded from '{}' between {:.3}s and {:.3}s",
            video.display(),
            trim.start_sec,
            trim.end_sec
        )));
    }

    sink.end()?;
    drop(sink);
    let out_path = partial.commit()?;

    tracing::info!(
        path = %out_path.display(),
        clip_frames,
        thumbnail_frames,
        width,
        height,
        "animation written"
    );
    if used_fallback_font {
        tracing::warn!("one or more watermark fonts failed to load; the default face was used");
    }

    Ok(AnimateReport {
        out_path,
        width,
        height,
        fps: job.fps,
        clip_frames,
        thumbnail_frames,
        used_fallback_font,
    })
}

/// Sample stills from `video` per `job.sampling`, watermark them and pack them into a ZIP at
/// `out`.
#[tracing::instrument(skip(job), fields(sampling = ?job.sampling))]
pub fn run_extract(video: &Path, out: &Path, job: &ExtractJob) -> ClipmarkResult<ExtractReport> {
    job.validate()?;
    let info = probe_video(video)?;
    let timestamps = sample(info.duration_sec, &job.sampling)?;
    if timestamps.is_empty() {
        return Err(ClipmarkError::validation(format!(
            "no frames to extract: '{}' is shorter than {DEFAULT_END_MARGIN_SEC}s",
            video.display()
        )));
    }
    let width = job.width.unwrap_or(info.width);

    let partial = PartialOutput::new(out)?;
    let file = File::create(partial.path())
        .with_context(|| format!("create '{}'", partial.path().display()))?;
    let mut archive = StillArchive::new(BufWriter::new(file), job.format)?;
    let mut compositor = Compositor::new(job.compositor.clone());
    let mut used_fallback_font = false;

    let mut entries = Vec::with_capacity(timestamps.len());
    for &t in &timestamps {
        let frame = resize_to_width(&decode_frame_at(&info, t)?, width);
        let frame = composite_frame(
            &mut compositor,
            &frame,
            &job.watermarks,
            &mut used_fallback_font,
        )?;
        let name = archive.add_frame(&frame)?;
        tracing::debug!(at_sec = t, entry = %name, "still added");
        entries.push(name);
    }

    let mut writer = archive.finish()?;
    writer
        .flush()
        .with_context(|| format!("flush '{}'", partial.path().display()))?;
    drop(writer);
    let out_path = partial.commit()?;

    tracing::info!(path = %out_path.display(), stills = entries.len(), "still archive written");
    Ok(ExtractReport {
        out_path,
        entries,
        timestamps,
        used_fallback_font,
    })
}

/// Decode `count` evenly spaced frames at source resolution for the user to pick a thumbnail
/// from.
#[tracing::instrument]
pub fn thumbnail_candidates(video: &Path, count: u32) -> ClipmarkResult<Vec<ThumbnailCandidate>> {
    let info = probe_video(video)?;
    sample(info.duration_sec, &SamplingPolicy::ByCount(count))?
        .into_iter()
        .map(|at_sec| {
            Ok(ThumbnailCandidate {
                at_sec,
                image: decode_frame_at(&info, at_sec)?,
            })
        })
        .collect()
}
