//! Video probing and frame decoding through the system `ffprobe`/`ffmpeg` binaries.

use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
};

use image::RgbImage;

use crate::foundation::error::{ClipmarkError, ClipmarkResult};

#[derive(Clone, Debug, PartialEq)]
pub struct VideoSourceInfo {
    pub source_path: PathBuf,
    /// Display width (after applying rotation metadata).
    pub width: u32,
    /// Display height (after applying rotation metadata).
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub duration_sec: f64,
}

impl VideoSourceInfo {
    pub fn source_fps(&self) -> f64 {
        if self.fps_den == 0 {
            0.0
        } else {
            f64::from(self.fps_num) / f64::from(self.fps_den)
        }
    }
}

/// Return `true` when `tool -version` can be run from `PATH`.
pub fn is_tool_on_path(tool: &str) -> bool {
    Command::new(tool)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn is_ffmpeg_on_path() -> bool {
    is_tool_on_path("ffmpeg")
}

/// Height that keeps the aspect ratio of `src` when scaled to `target_width`.
pub fn scaled_height(src_width: u32, src_height: u32, target_width: u32) -> u32 {
    if src_width == 0 {
        return src_height.max(1);
    }
    let h = (f64::from(src_height) * f64::from(target_width) / f64::from(src_width)).round();
    (h as u32).max(1)
}

/// Read stream geometry, frame rate and duration with `ffprobe`.
///
/// A missing, unreadable or stream-less file is an input error.
pub fn probe_video(source_path: &Path) -> ClipmarkResult<VideoSourceInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeSideData {
        rotation: Option<f64>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeTags {
        rotate: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        r_frame_rate: Option<String>,
        duration: Option<String>,
        #[serde(default)]
        side_data_list: Vec<ProbeSideData>,
        tags: Option<ProbeTags>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        #[serde(default)]
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    if !source_path.is_file() {
        return Err(ClipmarkError::validation(format!(
            "video file '{}' does not exist",
            source_path.display()
        )));
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| ClipmarkError::media(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(ClipmarkError::validation(format!(
            "could not read video '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| ClipmarkError::media(format!("ffprobe json parse failed: {e}")))?;
    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| {
            ClipmarkError::validation(format!(
                "'{}' has no video stream",
                source_path.display()
            ))
        })?;
    let coded_width = video_stream
        .width
        .ok_or_else(|| ClipmarkError::media("missing video width from ffprobe"))?;
    let coded_height = video_stream
        .height
        .ok_or_else(|| ClipmarkError::media("missing video height from ffprobe"))?;

    let rotation = video_stream
        .side_data_list
        .iter()
        .find_map(|sd| sd.rotation)
        .or_else(|| {
            video_stream
                .tags
                .as_ref()
                .and_then(|t| t.rotate.as_deref())
                .and_then(|r| r.parse::<f64>().ok())
        })
        .unwrap_or(0.0);
    let (width, height) = if is_quarter_turn(rotation) {
        (coded_height, coded_width)
    } else {
        (coded_width, coded_height)
    };

    let (fps_num, fps_den) = parse_ff_ratio(video_stream.r_frame_rate.as_deref().unwrap_or("0/1"))
        .ok_or_else(|| ClipmarkError::media("invalid video r_frame_rate"))?;
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video_stream.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| {
            ClipmarkError::validation(format!(
                "could not determine the duration of '{}'",
                source_path.display()
            ))
        })?;

    tracing::debug!(
        path = %source_path.display(),
        width,
        height,
        fps = f64::from(fps_num) / f64::from(fps_den.max(1)),
        duration_sec,
        "probed video"
    );

    Ok(VideoSourceInfo {
        source_path: source_path.to_path_buf(),
        width,
        height,
        fps_num,
        fps_den,
        duration_sec,
    })
}

/// Decode the frame shown at `time_sec`, at source resolution.
pub fn decode_frame_at(source: &VideoSourceInfo, time_sec: f64) -> ClipmarkResult<RgbImage> {
    if !time_sec.is_finite() || time_sec < 0.0 {
        return Err(ClipmarkError::validation(format!(
            "frame timestamp must be finite and >= 0, got {time_sec}"
        )));
    }

    let out = Command::new("ffmpeg")
        .args(["-v", "error", "-ss", &format!("{time_sec:.6}")])
        .arg("-i")
        .arg(&source.source_path)
        .args([
            "-an", "-frames:v", "1", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1",
        ])
        .output()
        .map_err(|e| {
            ClipmarkError::media(format!("failed to run ffmpeg for frame decode: {e}"))
        })?;

    if !out.status.success() {
        return Err(ClipmarkError::media(format!(
            "ffmpeg frame decode failed for '{}' at {time_sec:.3}s: {}",
            source.source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let expected_len = frame_len(source.width, source.height)?;
    if out.stdout.is_empty() {
        return Err(ClipmarkError::media(format!(
            "ffmpeg returned no video frame for '{}' at {time_sec:.3}s",
            source.source_path.display()
        )));
    }
    if out.stdout.len() < expected_len {
        return Err(ClipmarkError::media(format!(
            "decoded frame has invalid size: got {} bytes, expected {expected_len}",
            out.stdout.len()
        )));
    }

    let mut data = out.stdout;
    data.truncate(expected_len);
    RgbImage::from_raw(source.width, source.height, data)
        .ok_or_else(|| ClipmarkError::media("decoded frame buffer does not match dimensions"))
}

/// Parameters for streaming a trimmed, resampled and resized section of a video.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipDecodeOpts {
    pub start_sec: f64,
    pub end_sec: f64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// Streams RGB8 frames out of a running `ffmpeg` process.
///
/// The child process is killed and reaped when the reader is dropped before the stream ends.
pub struct FrameReader {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    width: u32,
    height: u32,
    frame_len: usize,
    frames_read: u64,
}

impl FrameReader {
    pub fn spawn(source: &VideoSourceInfo, opts: ClipDecodeOpts) -> ClipmarkResult<Self> {
        if opts.fps == 0 {
            return Err(ClipmarkError::validation("decode fps must be non-zero"));
        }
        if !(opts.start_sec.is_finite() && opts.end_sec.is_finite())
            || opts.start_sec < 0.0
            || opts.end_sec <= opts.start_sec
        {
            return Err(ClipmarkError::validation(format!(
                "decode range must satisfy 0 <= start < end, got {}..{}",
                opts.start_sec, opts.end_sec
            )));
        }
        let frame_len = frame_len(opts.width, opts.height)?;

        let filter = format!(
            "fps={},scale={}:{}:flags=lanczos",
            opts.fps, opts.width, opts.height
        );
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .args([
                "-v",
                "error",
                "-ss",
                &format!("{:.6}", opts.start_sec),
                "-t",
                &format!("{:.6}", opts.end_sec - opts.start_sec),
                "-i",
            ])
            .arg(&source.source_path)
            .args([
                "-an", "-vf", &filter, "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1",
            ]);

        let mut child = cmd.spawn().map_err(|e| {
            ClipmarkError::media(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClipmarkError::media("failed to open ffmpeg stdout (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClipmarkError::media("failed to open ffmpeg stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        Ok(Self {
            child: Some(child),
            stdout: Some(stdout),
            stderr_drain: Some(stderr_drain),
            width: opts.width,
            height: opts.height,
            frame_len,
            frames_read: 0,
        })
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Next decoded frame, or `None` once the stream has ended cleanly.
    pub fn next_frame(&mut self) -> ClipmarkResult<Option<RgbImage>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = stdout.read(&mut buf[filled..]).map_err(|e| {
                ClipmarkError::media(format!("failed to read frame from ffmpeg: {e}"))
            })?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            self.finish_stream()?;
            return Ok(None);
        }
        if filled < buf.len() {
            return Err(ClipmarkError::media(format!(
                "ffmpeg stream ended mid-frame ({filled} of {} bytes)",
                buf.len()
            )));
        }

        self.frames_read += 1;
        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| ClipmarkError::media("decoded frame buffer does not match dimensions"))
    }

    fn finish_stream(&mut self) -> ClipmarkResult<()> {
        drop(self.stdout.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().map_err(|e| {
            ClipmarkError::media(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ClipmarkError::media("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| ClipmarkError::media(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };
        if !status.success() {
            return Err(ClipmarkError::media(format!(
                "ffmpeg decode exited with status {}: {}",
                status,
                String::from_utf8_lossy(&stderr_bytes).trim()
            )));
        }
        Ok(())
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        drop(self.stdout.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.stderr_drain.take() {
            let _ = handle.join();
        }
    }
}

fn frame_len(width: u32, height: u32) -> ClipmarkResult<usize> {
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| ClipmarkError::validation("frame buffer size overflow"))?;
    if len == 0 {
        return Err(ClipmarkError::validation(
            "frame size is zero (invalid dimensions)",
        ));
    }
    Ok(len)
}

fn is_quarter_turn(rotation_deg: f64) -> bool {
    let r = rotation_deg.rem_euclid(360.0).round() as i64;
    r == 90 || r == 270
}

fn parse_ff_ratio(s: &str) -> Option<(u32, u32)> {
    let mut parts = s.split('/');
    let a = parts.next()?.parse::<u32>().ok()?;
    let b = parts.next()?.parse::<u32>().ok()?;
    if b == 0 {
        return None;
    }
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_parsing() {
        assert_eq!(parse_ff_ratio("30000/1001"), Some((30000, 1001)));
        assert_eq!(parse_ff_ratio("25/1"), Some((25, 1)));
        assert_eq!(parse_ff_ratio("25/0"), None);
        assert_eq!(parse_ff_ratio("abc"), None);
    }

    #[test]
    fn scaled_height_keeps_aspect() {
        assert_eq!(scaled_height(1920, 1080, 300), 169);
        assert_eq!(scaled_height(640, 480, 320), 240);
        assert_eq!(scaled_height(1000, 1, 100), 1);
    }

    #[test]
    fn quarter_turns_swap_axes() {
        assert!(is_quarter_turn(90.0));
        assert!(is_quarter_turn(-90.0));
        assert!(is_quarter_turn(270.0));
        assert!(!is_quarter_turn(180.0));
        assert!(!is_quarter_turn(0.0));
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let err = probe_video(Path::new("no/such/clip.mp4")).unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn zero_sized_frames_are_rejected() {
        assert!(frame_len(0, 10).is_err());
        assert_eq!(frame_len(2, 2).unwrap(), 12);
    }
}
