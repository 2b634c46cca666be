use image::RgbImage;

use crate::foundation::error::{ClipmarkError, ClipmarkResult};

/// Configuration provided to a [`FrameSink`] before the first frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    /// Playback rate of the pushed frames.
    pub fps: u32,
}

impl SinkConfig {
    pub fn validate(&self) -> ClipmarkResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ClipmarkError::validation(
                "sink width/height must be non-zero",
            ));
        }
        if self.fps == 0 {
            return Err(ClipmarkError::validation("sink fps must be non-zero"));
        }
        Ok(())
    }

    pub(crate) fn check_frame(&self, frame: &RgbImage) -> ClipmarkResult<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(ClipmarkError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        Ok(())
    }
}

/// Sink contract for consuming frames in playback order.
pub trait FrameSink {
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> ClipmarkResult<()>;
    /// Push the next frame.
    fn push_frame(&mut self, frame: &RgbImage) -> ClipmarkResult<()>;
    /// Called once after the last frame is pushed; output is complete when this returns `Ok`.
    fn end(&mut self) -> ClipmarkResult<()>;
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: Vec<RgbImage>,
    ended: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg
    }

    pub fn frames(&self) -> &[RgbImage] {
        &self.frames
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> ClipmarkResult<()> {
        cfg.validate()?;
        self.cfg = Some(cfg);
        self.frames.clear();
        self.ended = false;
        Ok(())
    }

    fn push_frame(&mut self, frame: &RgbImage) -> ClipmarkResult<()> {
        let cfg = self
            .cfg
            .ok_or_else(|| ClipmarkError::encode("in-memory sink not started"))?;
        cfg.check_frame(frame)?;
        self.frames.push(frame.clone());
        Ok(())
    }

    fn end(&mut self) -> ClipmarkResult<()> {
        self.ended = true;
        Ok(())
    }
}
