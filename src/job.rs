//! Run configuration for the animate and extract pipelines.
//!
//! Jobs are plain serde structs, built fresh for one run and validated before any decoding
//! starts.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    archive::StillFormat,
    foundation::error::{ClipmarkError, ClipmarkResult},
    media::VideoSourceInfo,
    sampler::SamplingPolicy,
    watermark::{CompositorOpts, WatermarkSpec, validate_watermarks},
};

pub const MIN_WIDTH: u32 = 100;
pub const MAX_WIDTH: u32 = 1280;
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 30;

/// Animated output encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationFormat {
    #[default]
    Gif,
    Webp,
}

/// Section of the source video to keep, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrimRange {
    pub start_sec: f64,
    pub end_sec: f64,
}

impl TrimRange {
    pub fn validate(&self) -> ClipmarkResult<()> {
        if !(self.start_sec.is_finite() && self.end_sec.is_finite()) {
            return Err(ClipmarkError::validation("trim bounds must be finite"));
        }
        if self.start_sec < 0.0 {
            return Err(ClipmarkError::validation(format!(
                "trim start must be >= 0, got {}",
                self.start_sec
            )));
        }
        if self.start_sec >= self.end_sec {
            return Err(ClipmarkError::validation(format!(
                "trim start ({}) must be before trim end ({})",
                self.start_sec, self.end_sec
            )));
        }
        Ok(())
    }

    /// Fit the range to a clip of `duration_sec`; the end is clamped to the clip end.
    pub fn resolve(&self, duration_sec: f64) -> ClipmarkResult<TrimRange> {
        self.validate()?;
        if self.start_sec >= duration_sec {
            return Err(ClipmarkError::validation(format!(
                "trim start ({}) is past the end of the video ({duration_sec:.3}s)",
                self.start_sec
            )));
        }
        let end_sec = if self.end_sec > duration_sec {
            tracing::info!(
                requested = self.end_sec,
                duration_sec,
                "trim end clamped to video duration"
            );
            duration_sec
        } else {
            self.end_sec
        };
        Ok(TrimRange {
            start_sec: self.start_sec,
            end_sec,
        })
    }

    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

/// Still image prepended to an animation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum ThumbnailSource {
    /// Frame of the source video at a confirmed timestamp.
    VideoFrame { at_sec: f64 },
    /// Separate image file.
    Image { path: PathBuf },
}

impl ThumbnailSource {
    pub fn validate(&self) -> ClipmarkResult<()> {
        match self {
            Self::VideoFrame { at_sec } if !at_sec.is_finite() || *at_sec < 0.0 => {
                Err(ClipmarkError::validation(format!(
                    "thumbnail timestamp must be finite and >= 0, got {at_sec}"
                )))
            }
            Self::Image { path } if !path.is_file() => Err(ClipmarkError::validation(format!(
                "thumbnail image '{}' does not exist",
                path.display()
            ))),
            _ => Ok(()),
        }
    }
}

fn check_width(width: u32) -> ClipmarkResult<()> {
    if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
        return Err(ClipmarkError::validation(format!(
            "width must be {MIN_WIDTH}..={MAX_WIDTH} px, got {width}"
        )));
    }
    Ok(())
}

/// Video → animated GIF/WebP.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnimateJob {
    pub format: AnimationFormat,
    /// Output width; height follows the source aspect ratio.
    pub width: u32,
    pub fps: u32,
    pub trim: Option<TrimRange>,
    /// Drawn in order over every video frame.
    pub watermarks: Vec<WatermarkSpec>,
    pub thumbnail: Option<ThumbnailSource>,
    /// How long the thumbnail is shown before the clip starts.
    pub thumbnail_duration_sec: f64,
    /// Also burn the watermarks into the thumbnail.
    pub watermark_thumbnail: bool,
    /// WebP only: libwebp quality `0..=100`.
    pub webp_quality: u8,
    /// WebP only: libwebp compression method `0..=6`.
    pub webp_method: u8,
    pub compositor: CompositorOpts,
}

impl Default for AnimateJob {
    fn default() -> Self {
        Self {
            format: AnimationFormat::Gif,
            width: 300,
            fps: 10,
            trim: None,
            watermarks: Vec::new(),
            thumbnail: None,
            thumbnail_duration_sec: 0.1,
            watermark_thumbnail: false,
            webp_quality: 75,
            webp_method: 4,
            compositor: CompositorOpts::default(),
        }
    }
}

impl AnimateJob {
    /// Checks that do not need the video.
    pub fn validate(&self) -> ClipmarkResult<()> {
        check_width(self.width)?;
        if !(MIN_FPS..=MAX_FPS).contains(&self.fps) {
            return Err(ClipmarkError::validation(format!(
                "fps must be {MIN_FPS}..={MAX_FPS}, got {}",
                self.fps
            )));
        }
        if let Some(trim) = &self.trim {
            trim.validate()?;
        }
        validate_watermarks(&self.watermarks)?;
        if let Some(thumb) = &self.thumbnail {
            thumb.validate()?;
            if !self.thumbnail_duration_sec.is_finite() || self.thumbnail_duration_sec <= 0.0 {
                return Err(ClipmarkError::validation(
                    "thumbnail_duration_sec must be finite and > 0",
                ));
            }
        }
        if self.webp_quality > 100 {
            return Err(ClipmarkError::validation(format!(
                "webp_quality must be 0..=100, got {}",
                self.webp_quality
            )));
        }
        if self.webp_method > 6 {
            return Err(ClipmarkError::validation(format!(
                "webp_method must be 0..=6, got {}",
                self.webp_method
            )));
        }
        self.compositor.validate()
    }

    /// The trimmed section of `info` this job renders.
    pub fn resolve_trim(&self, info: &VideoSourceInfo) -> ClipmarkResult<TrimRange> {
        match &self.trim {
            Some(trim) => trim.resolve(info.duration_sec),
            None => Ok(TrimRange {
                start_sec: 0.0,
                end_sec: info.duration_sec,
            }),
        }
    }

    /// Number of output frames the thumbnail occupies.
    pub fn thumbnail_frames(&self) -> u32 {
        let frames = (self.thumbnail_duration_sec * f64::from(self.fps)).round();
        if frames.is_finite() && frames >= 1.0 {
            frames as u32
        } else {
            1
        }
    }
}

/// Video → ZIP of watermarked stills.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractJob {
    pub sampling: SamplingPolicy,
    /// Output width; `None` keeps the source width.
    pub width: Option<u32>,
    pub format: StillFormat,
    pub watermarks: Vec<WatermarkSpec>,
    pub compositor: CompositorOpts,
}

impl Default for ExtractJob {
    fn default() -> Self {
        Self {
            sampling: SamplingPolicy::ByCount(10),
            width: None,
            format: StillFormat::default(),
            watermarks: Vec::new(),
            compositor: CompositorOpts::default(),
        }
    }
}

impl ExtractJob {
    pub fn validate(&self) -> ClipmarkResult<()> {
        self.sampling.validate()?;
        if let Some(width) = self.width {
            check_width(width)?;
        }
        self.format.validate()?;
        validate_watermarks(&self.watermarks)?;
        self.compositor.validate()
    }
}

/// Read a JSON job file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> ClipmarkResult<T> {
    let f = File::open(path).with_context(|| format!("open job '{}'", path.display()))?;
    let r = BufReader::new(f);
    serde_json::from_reader(r).map_err(|e| {
        ClipmarkError::validation(format!("invalid job file '{}': {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(duration_sec: f64) -> VideoSourceInfo {
        VideoSourceInfo {
            source_path: PathBuf::from("clip.mp4"),
            width: 640,
            height: 360,
            fps_num: 30,
            fps_den: 1,
            duration_sec,
        }
    }

    #[test]
    fn defaults_are_valid() {
        AnimateJob::default().validate().unwrap();
        ExtractJob::default().validate().unwrap();
    }

    #[test]
    fn animate_rejects_out_of_range_settings() {
        let bad = |job: AnimateJob| assert!(job.validate().unwrap_err().is_input_error());
        bad(AnimateJob {
            width: 99,
            ..AnimateJob::default()
        });
        bad(AnimateJob {
            width: 1281,
            ..AnimateJob::default()
        });
        bad(AnimateJob {
            fps: 0,
            ..AnimateJob::default()
        });
        bad(AnimateJob {
            fps: 31,
            ..AnimateJob::default()
        });
        bad(AnimateJob {
            trim: Some(TrimRange {
                start_sec: 2.0,
                end_sec: 2.0,
            }),
            ..AnimateJob::default()
        });
        bad(AnimateJob {
            watermarks: vec![WatermarkSpec::new("x"); 4],
            ..AnimateJob::default()
        });
        bad(AnimateJob {
            thumbnail: Some(ThumbnailSource::VideoFrame { at_sec: -1.0 }),
            ..AnimateJob::default()
        });
        bad(AnimateJob {
            thumbnail: Some(ThumbnailSource::Image {
                path: PathBuf::from("no/such/thumb.png"),
            }),
            ..AnimateJob::default()
        });
        bad(AnimateJob {
            webp_method: 9,
            ..AnimateJob::default()
        });
    }

    #[test]
    fn extract_rejects_bad_sampling_and_quality() {
        let job = ExtractJob {
            sampling: SamplingPolicy::ByCount(1),
            ..ExtractJob::default()
        };
        assert!(job.validate().is_err());
        let job = ExtractJob {
            sampling: SamplingPolicy::ByInterval(0.0),
            ..ExtractJob::default()
        };
        assert!(job.validate().is_err());
        let job = ExtractJob {
            format: StillFormat::Jpeg { quality: 101 },
            ..ExtractJob::default()
        };
        assert!(job.validate().is_err());
    }

    #[test]
    fn trim_resolution_against_duration() {
        let job = AnimateJob::default();
        let full = job.resolve_trim(&info(5.0)).unwrap();
        assert_eq!((full.start_sec, full.end_sec), (0.0, 5.0));

        let job = AnimateJob {
            trim: Some(TrimRange {
                start_sec: 1.0,
                end_sec: 9.0,
            }),
            ..AnimateJob::default()
        };
        let clamped = job.resolve_trim(&info(5.0)).unwrap();
        assert_eq!((clamped.start_sec, clamped.end_sec), (1.0, 5.0));
        assert_eq!(clamped.duration_sec(), 4.0);

        let job = AnimateJob {
            trim: Some(TrimRange {
                start_sec: 6.0,
                end_sec: 9.0,
            }),
            ..AnimateJob::default()
        };
        assert!(job.resolve_trim(&info(5.0)).is_err());
    }

    #[test]
    fn thumbnail_frame_count_rounds_up_to_one() {
        assert_eq!(AnimateJob::default().thumbnail_frames(), 1);
        let job = AnimateJob {
            fps: 30,
            thumbnail_duration_sec: 0.5,
            ..AnimateJob::default()
        };
        assert_eq!(job.thumbnail_frames(), 15);
    }

    #[test]
    fn job_json_round_trips_through_defaults() {
        let job: AnimateJob = serde_json::from_str(
            r##"{
                "format": "webp",
                "width": 480,
                "trim": {"start_sec": 0.5, "end_sec": 3.0},
                "watermarks": [{"text": "Sample", "color": "#FFFFFF", "opacity": 80}],
                "thumbnail": {"kind": "video-frame", "at_sec": 1.25}
            }"##,
        )
        .unwrap();
        assert_eq!(job.format, AnimationFormat::Webp);
        assert_eq!(job.width, 480);
        assert_eq!(job.fps, 10);
        assert_eq!(job.watermarks.len(), 1);
        assert_eq!(
            job.thumbnail,
            Some(ThumbnailSource::VideoFrame { at_sec: 1.25 })
        );

        let job: ExtractJob =
            serde_json::from_str(r#"{"sampling": {"by-interval": 1.0}, "format": "png"}"#).unwrap();
        assert_eq!(job.sampling, SamplingPolicy::ByInterval(1.0));
        assert_eq!(job.format, StillFormat::Png);

        assert!(serde_json::from_str::<AnimateJob>(r#"{"colour": 1}"#).is_err());
    }
}
