//! ZIP packaging of extracted stills.

use std::io::{Seek, Write};

use image::{ExtendedColorType, ImageEncoder as _, RgbImage};
use serde::{Deserialize, Serialize};

use crate::foundation::error::{ClipmarkError, ClipmarkResult};

/// Image encoding for extracted stills.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StillFormat {
    /// Lossy JPEG; `quality` in `10..=100`.
    Jpeg { quality: u8 },
    /// Lossless PNG.
    Png,
}

impl Default for StillFormat {
    fn default() -> Self {
        Self::Jpeg { quality: 90 }
    }
}

impl StillFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg { .. } => "jpg",
            Self::Png => "png",
        }
    }

    pub fn validate(self) -> ClipmarkResult<()> {
        match self {
            Self::Jpeg { quality } if !(10..=100).contains(&quality) => {
                Err(ClipmarkError::validation(format!(
                    "jpeg quality must be 10..=100, got {quality}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Encode one frame into `out`, replacing its contents.
    pub fn encode(self, frame: &RgbImage, out: &mut Vec<u8>) -> ClipmarkResult<()> {
        out.clear();
        let (w, h) = frame.dimensions();
        match self {
            Self::Jpeg { quality } => {
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut *out, quality)
                    .write_image(frame.as_raw(), w, h, ExtendedColorType::Rgb8)?;
            }
            Self::Png => {
                image::codecs::png::PngEncoder::new(&mut *out).write_image(
                    frame.as_raw(),
                    w,
                    h,
                    ExtendedColorType::Rgb8,
                )?;
            }
        }
        Ok(())
    }
}

/// Entry name for the `index`-th still (1-based).
pub fn still_entry_name(index: u32, format: StillFormat) -> String {
    format!("frame_{index:04}.{}", format.extension())
}

/// Writes sequentially numbered stills into a ZIP archive.
pub struct StillArchive<W: Write + Seek> {
    zip: zip::ZipWriter<W>,
    format: StillFormat,
    written: u32,
    scratch: Vec<u8>,
}

impl<W: Write + Seek> StillArchive<W> {
    pub fn new(writer: W, format: StillFormat) -> ClipmarkResult<Self> {
        format.validate()?;
        Ok(Self {
            zip: zip::ZipWriter::new(writer),
            format,
            written: 0,
            scratch: Vec::new(),
        })
    }

    pub fn len(&self) -> u32 {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Encode `frame` and append it as the next numbered entry. Returns the entry name.
    pub fn add_frame(&mut self, frame: &RgbImage) -> ClipmarkResult<String> {
        self.format.encode(frame, &mut self.scratch)?;

        let name = still_entry_name(self.written + 1, self.format);
        // Stills are already compressed; storing avoids wasted work.
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        self.zip.start_file(name.as_str(), options)?;
        self.zip
            .write_all(&self.scratch)
            .map_err(|e| ClipmarkError::encode(format!("write zip entry '{name}': {e}")))?;

        self.written += 1;
        Ok(name)
    }

    /// Write the central directory and return the underlying writer.
    pub fn finish(mut self) -> ClipmarkResult<W> {
        if self.written == 0 {
            return Err(ClipmarkError::encode("no frames to extract"));
        }
        Ok(self.zip.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read as _};

    use super::*;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| image::Rgb([(x * 10) as u8, (y * 10) as u8, 77]))
    }

    #[test]
    fn entries_are_numbered_sequentially() {
        let mut archive =
            StillArchive::new(Cursor::new(Vec::new()), StillFormat::Jpeg { quality: 80 }).unwrap();
        for _ in 0..3 {
            archive.add_frame(&gradient(16, 8)).unwrap();
        }
        assert_eq!(archive.len(), 3);
        let bytes = archive.finish().unwrap().into_inner();

        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["frame_0001.jpg", "frame_0002.jpg", "frame_0003.jpg"]
        );
    }

    #[test]
    fn png_entries_reload_pixel_identical() {
        let src = gradient(9, 7);
        let mut archive = StillArchive::new(Cursor::new(Vec::new()), StillFormat::Png).unwrap();
        archive.add_frame(&src).unwrap();
        let bytes = archive.finish().unwrap().into_inner();

        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = zip.by_name("frame_0001.png").unwrap();
        let mut png = Vec::new();
        entry.read_to_end(&mut png).unwrap();
        let reloaded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(reloaded, src);
    }

    #[test]
    fn quality_bounds_and_empty_archive() {
        assert!(StillFormat::Jpeg { quality: 9 }.validate().is_err());
        assert!(StillFormat::Jpeg { quality: 100 }.validate().is_ok());
        assert!(
            StillArchive::new(Cursor::new(Vec::new()), StillFormat::Jpeg { quality: 5 }).is_err()
        );

        let archive = StillArchive::new(Cursor::new(Vec::new()), StillFormat::Png).unwrap();
        assert!(archive.finish().is_err());
    }

    #[test]
    fn format_json_shape() {
        let f: StillFormat = serde_json::from_str(r#"{"jpeg":{"quality":55}}"#).unwrap();
        assert_eq!(f, StillFormat::Jpeg { quality: 55 });
        let f: StillFormat = serde_json::from_str(r#""png""#).unwrap();
        assert_eq!(f, StillFormat::Png);
    }
}
