use std::{
    io::{Read, Write as _},
    path::PathBuf,
    process::{Child, ChildStdin, Command, Stdio},
};

use image::RgbImage;

use crate::{
    encode::sink::{FrameSink, SinkConfig},
    foundation::{
        error::{ClipmarkError, ClipmarkResult},
        fs::ensure_parent_dir,
    },
    media::is_ffmpeg_on_path,
};

/// Options for [`WebpSink`] output.
#[derive(Clone, Debug, PartialEq)]
pub struct WebpSinkOpts {
    pub out_path: PathBuf,
    /// libwebp quality, `0..=100`.
    pub quality: u8,
    /// libwebp compression method, `0..=6` (higher is slower and smaller).
    pub method: u8,
    /// Loop count; `0` loops forever.
    pub loop_count: u16,
}

impl WebpSinkOpts {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            quality: 75,
            method: 4,
            loop_count: 0,
        }
    }

    pub fn validate(&self) -> ClipmarkResult<()> {
        if self.quality > 100 {
            return Err(ClipmarkError::validation(format!(
                "webp quality must be 0..=100, got {}",
                self.quality
            )));
        }
        if self.method > 6 {
            return Err(ClipmarkError::validation(format!(
                "webp method must be 0..=6, got {}",
                self.method
            )));
        }
        Ok(())
    }
}

/// Sink that spawns the system `ffmpeg` and streams raw RGB8 frames to libwebp.
pub struct WebpSink {
    opts: WebpSinkOpts,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
    cfg: Option<SinkConfig>,
    frames: u64,
}

impl WebpSink {
    pub fn new(opts: WebpSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            cfg: None,
            frames: 0,
        }
    }

    fn ffmpeg_args(&self, cfg: SinkConfig) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "-s",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.push(format!("{}x{}", cfg.width, cfg.height));
        // For rawvideo input, `-r` before `-i` sets the input frame rate.
        args.extend(["-r".to_string(), cfg.fps.to_string()]);
        args.extend(
            ["-i", "pipe:0", "-an", "-c:v", "libwebp", "-lossless", "0"]
                .into_iter()
                .map(String::from),
        );
        args.extend([
            "-quality".to_string(),
            self.opts.quality.to_string(),
            "-compression_level".to_string(),
            self.opts.method.to_string(),
            "-loop".to_string(),
            self.opts.loop_count.to_string(),
            "-f".to_string(),
            "webp".to_string(),
        ]);
        args
    }

    /// Wait for ffmpeg and turn a failed exit into an error carrying its stderr.
    fn reap(&mut self) -> ClipmarkResult<()> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| ClipmarkError::encode("webp sink not started"))?;

        let status = child.wait().map_err(|e| {
            ClipmarkError::encode(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;
        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ClipmarkError::encode("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| ClipmarkError::encode(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(ClipmarkError::encode(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl FrameSink for WebpSink {
    fn begin(&mut self, cfg: SinkConfig) -> ClipmarkResult<()> {
        cfg.validate()?;
        self.opts.validate()?;
        ensure_parent_dir(&self.opts.out_path)?;

        if !is_ffmpeg_on_path() {
            return Err(ClipmarkError::encode(
                "ffmpeg is required for WebP encoding, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .args(self.ffmpeg_args(cfg))
            .arg(&self.opts.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            ClipmarkError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClipmarkError::encode("failed to open ffmpeg stdin (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClipmarkError::encode("failed to open ffmpeg stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.frames = 0;
        Ok(())
    }

    fn push_frame(&mut self, frame: &RgbImage) -> ClipmarkResult<()> {
        let cfg = self
            .cfg
            .ok_or_else(|| ClipmarkError::encode("webp sink not started"))?;
        cfg.check_frame(frame)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ClipmarkError::encode("webp sink is already finalized"));
        };
        if let Err(e) = stdin.write_all(frame.as_raw()) {
            // ffmpeg usually died first; its stderr says why.
            self.reap()?;
            return Err(ClipmarkError::encode(format!(
                "failed to write frame to ffmpeg stdin: {e}"
            )));
        }
        self.frames += 1;
        Ok(())
    }

    fn end(&mut self) -> ClipmarkResult<()> {
        if self.frames == 0 {
            return Err(ClipmarkError::encode("webp sink received no frames"));
        }
        self.reap()?;
        self.cfg = None;
        tracing::debug!(path = %self.opts.out_path.display(), frames = self.frames, "webp written");
        Ok(())
    }
}

impl Drop for WebpSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.stderr_drain.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opts_validation() {
        let mut opts = WebpSinkOpts::new("out.webp");
        assert!(opts.validate().is_ok());
        opts.quality = 101;
        assert!(opts.validate().is_err());
        opts.quality = 80;
        opts.method = 7;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn ffmpeg_args_carry_geometry_and_tuning() {
        let mut opts = WebpSinkOpts::new("out.webp");
        opts.quality = 60;
        opts.method = 6;
        let sink = WebpSink::new(opts);
        let args = sink.ffmpeg_args(SinkConfig {
            width: 320,
            height: 180,
            fps: 12,
        });
        let joined = args.join(" ");
        assert!(joined.contains("-s 320x180"));
        assert!(joined.contains("-r 12 -i pipe:0"));
        assert!(joined.contains("-c:v libwebp"));
        assert!(joined.contains("-quality 60"));
        assert!(joined.contains("-compression_level 6"));
        assert!(joined.contains("-loop 0"));
    }
}
