use std::{
    cell::RefCell,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use anyhow::Context as _;
use image::{
    Delay, Frame, RgbImage,
    codecs::gif::{GifEncoder, Repeat},
};

use crate::{
    encode::sink::{FrameSink, SinkConfig},
    foundation::{
        error::{ClipmarkError, ClipmarkResult},
        fs::ensure_parent_dir,
    },
};

/// Palette quantization speed passed to the GIF encoder (1 = best, 30 = fastest).
const GIF_QUANT_SPEED: i32 = 10;

/// Buffered output file shared with the encoder.
///
/// The encoder writes its trailer on drop and never hands its writer back, so the sink keeps a
/// second handle to flush and sync the file once the encoder is gone.
#[derive(Clone)]
struct SharedFile(Rc<RefCell<BufWriter<File>>>);

impl Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.borrow_mut().flush()
    }
}

/// Streams frames into an infinitely looping animated GIF.
pub struct GifSink {
    out_path: PathBuf,
    file: Option<SharedFile>,
    encoder: Option<GifEncoder<SharedFile>>,
    cfg: Option<SinkConfig>,
    frames: u64,
}

impl GifSink {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            file: None,
            encoder: None,
            cfg: None,
            frames: 0,
        }
    }

    pub fn out_path(&self) -> &Path {
        &self.out_path
    }
}

/// Per-frame delay for `fps`, in the millisecond ratio the GIF container stores.
pub(crate) fn frame_delay(fps: u32) -> Delay {
    Delay::from_numer_denom_ms(1000, fps.max(1))
}

impl FrameSink for GifSink {
    fn begin(&mut self, cfg: SinkConfig) -> ClipmarkResult<()> {
        cfg.validate()?;
        if cfg.width > u32::from(u16::MAX) || cfg.height > u32::from(u16::MAX) {
            return Err(ClipmarkError::validation(
                "gif width/height must fit in 16 bits",
            ));
        }
        ensure_parent_dir(&self.out_path)?;

        let file = File::create(&self.out_path)
            .with_context(|| format!("create gif '{}'", self.out_path.display()))?;
        let file = SharedFile(Rc::new(RefCell::new(BufWriter::new(file))));
        let mut encoder = GifEncoder::new_with_speed(file.clone(), GIF_QUANT_SPEED);
        encoder.set_repeat(Repeat::Infinite)?;

        self.file = Some(file);
        self.encoder = Some(encoder);
        self.cfg = Some(cfg);
        self.frames = 0;
        Ok(())
    }

    fn push_frame(&mut self, frame: &RgbImage) -> ClipmarkResult<()> {
        let cfg = self
            .cfg
            .ok_or_else(|| ClipmarkError::encode("gif sink not started"))?;
        cfg.check_frame(frame)?;
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| ClipmarkError::encode("gif sink is already finalized"))?;

        let rgba = image::DynamicImage::ImageRgb8(frame.clone()).into_rgba8();
        encoder.encode_frame(Frame::from_parts(rgba, 0, 0, frame_delay(cfg.fps)))?;
        self.frames += 1;
        Ok(())
    }

    fn end(&mut self) -> ClipmarkResult<()> {
        if self.frames == 0 {
            return Err(ClipmarkError::encode("gif sink received no frames"));
        }
        let file = self
            .file
            .take()
            .ok_or_else(|| ClipmarkError::encode("gif sink not started"))?;
        // Trailer goes into the shared buffer here; write errors surface on the flush below.
        drop(self.encoder.take());
        self.cfg = None;

        let mut writer = file.0.borrow_mut();
        writer
            .flush()
            .with_context(|| format!("flush gif '{}'", self.out_path.display()))?;
        writer
            .get_ref()
            .sync_all()
            .with_context(|| format!("sync gif '{}'", self.out_path.display()))?;
        tracing::debug!(path = %self.out_path.display(), frames = self.frames, "gif written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::AnimationDecoder as _;

    use super::*;

    #[test]
    fn writes_decodable_looping_gif() {
        let path = std::env::temp_dir().join(format!(
            "clipmark_gif_{}_{}.gif",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));

        let mut sink = GifSink::new(&path);
        sink.begin(SinkConfig {
            width: 8,
            height: 6,
            fps: 10,
        })
        .unwrap();
        for shade in [0u8, 128, 255] {
            sink.push_frame(&RgbImage::from_pixel(8, 6, image::Rgb([shade, 0, 0])))
                .unwrap();
        }
        assert!(sink.push_frame(&RgbImage::new(4, 4)).is_err());
        sink.end().unwrap();

        let file = std::io::BufReader::new(File::open(&path).unwrap());
        let decoder = image::codecs::gif::GifDecoder::new(file).unwrap();
        let frames = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].buffer().dimensions(), (8, 6));
        let (num, den) = frames[0].delay().numer_denom_ms();
        assert_eq!(num / den, 100);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn end_without_frames_is_an_error() {
        let path = std::env::temp_dir().join(format!("clipmark_gif_empty_{}.gif", std::process::id()));
        let mut sink = GifSink::new(&path);
        sink.begin(SinkConfig {
            width: 2,
            height: 2,
            fps: 5,
        })
        .unwrap();
        assert!(sink.end().is_err());
        std::fs::remove_file(&path).ok();
    }

    #[cfg(unix)]
    #[test]
    fn end_reports_write_failure() {
        let dev_full = Path::new("/dev/full");
        if !dev_full.exists() {
            return;
        }
        let mut sink = GifSink::new(dev_full);
        sink.begin(SinkConfig {
            width: 8,
            height: 8,
            fps: 10,
        })
        .unwrap();
        // Small enough to stay inside the write buffer until `end`.
        let _ = sink.push_frame(&RgbImage::from_pixel(8, 8, image::Rgb([40, 80, 120])));
        assert!(sink.end().is_err());
    }
}
