use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::foundation::error::{ClipmarkError, ClipmarkResult};

/// Maximum number of watermarks a single run may burn in.
pub const MAX_WATERMARKS: usize = 3;

/// Where a watermark is anchored on the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    #[default]
    BottomRight,
    BottomLeft,
    TopLeft,
    TopRight,
    Center,
}

/// Straight (non-premultiplied) RGB8 color.
///
/// Deserializes from `"#RRGGBB"` or `[r, g, b]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const WHITE: Self = Self::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn parse_hex(s: &str) -> ClipmarkResult<Self> {
        let s = s.trim();
        let s = s.strip_prefix('#').unwrap_or(s);
        if s.len() != 6 || !s.is_ascii() {
            return Err(ClipmarkError::validation(format!(
                "hex color must be #RRGGBB, got \"{s}\""
            )));
        }

        let byte = |pair: &str| {
            u8::from_str_radix(pair, 16)
                .map_err(|_| ClipmarkError::validation(format!("invalid hex byte \"{pair}\"")))
        };
        Ok(Self::new(byte(&s[0..2])?, byte(&s[2..4])?, byte(&s[4..6])?))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl Default for Rgb8 {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Serialize for Rgb8 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgb8 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Hex(String),
            Arr([u8; 3]),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Hex(s) => Self::parse_hex(&s).map_err(serde::de::Error::custom),
            Repr::Arr([r, g, b]) => Ok(Self::new(r, g, b)),
        }
    }
}

/// One configured text overlay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatermarkSpec {
    /// Text to draw. Empty text disables the watermark.
    pub text: String,
    pub position: Position,
    pub color: Rgb8,
    /// Opacity in percent, `0..=100`.
    pub opacity: u8,
    /// Font size in pixels.
    pub font_size: u32,
    /// Draw a black outline behind the glyphs.
    pub outline: bool,
    /// Font file (TrueType/OpenType). `None` uses the default face.
    pub font: Option<PathBuf>,
}

impl Default for WatermarkSpec {
    fn default() -> Self {
        Self {
            text: String::new(),
            position: Position::BottomRight,
            color: Rgb8::WHITE,
            opacity: 80,
            font_size: 30,
            outline: false,
            font: None,
        }
    }
}

impl WatermarkSpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn color(mut self, color: Rgb8) -> Self {
        self.color = color;
        self
    }

    pub fn opacity(mut self, opacity: u8) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn font_size(mut self, font_size: u32) -> Self {
        self.font_size = font_size;
        self
    }

    pub fn outline(mut self, outline: bool) -> Self {
        self.outline = outline;
        self
    }

    pub fn font(mut self, font: impl Into<PathBuf>) -> Self {
        self.font = Some(font.into());
        self
    }

    /// Whether this spec draws anything at all.
    pub fn is_active(&self) -> bool {
        !self.text.is_empty()
    }

    /// Check user-supplied values before any decoding starts.
    ///
    /// A font file that is missing or not a TrueType/OpenType file is rejected here; a font file
    /// that exists but fails to parse is handled later by falling back to the default face.
    pub fn validate(&self) -> ClipmarkResult<()> {
        if self.opacity > 100 {
            return Err(ClipmarkError::validation(format!(
                "watermark opacity must be 0..=100, got {}",
                self.opacity
            )));
        }
        if self.font_size == 0 {
            return Err(ClipmarkError::validation(
                "watermark font_size must be > 0",
            ));
        }
        if let Some(font) = &self.font {
            let ext = font
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            if !matches!(ext.as_deref(), Some("ttf" | "otf" | "ttc")) {
                return Err(ClipmarkError::validation(format!(
                    "unsupported font file '{}' (expected .ttf, .otf or .ttc)",
                    font.display()
                )));
            }
            if !font.is_file() {
                return Err(ClipmarkError::validation(format!(
                    "font file '{}' does not exist",
                    font.display()
                )));
            }
        }
        Ok(())
    }
}

/// Validate an ordered watermark list as a whole.
pub fn validate_watermarks(specs: &[WatermarkSpec]) -> ClipmarkResult<()> {
    if specs.len() > MAX_WATERMARKS {
        return Err(ClipmarkError::validation(format!(
            "at most {MAX_WATERMARKS} watermarks are supported, got {}",
            specs.len()
        )));
    }
    for (i, spec) in specs.iter().enumerate() {
        spec.validate().map_err(|e| match e {
            ClipmarkError::Validation(msg) => {
                ClipmarkError::validation(format!("watermark #{}: {msg}", i + 1))
            }
            other => other,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_color_parses_with_and_without_hash() {
        assert_eq!(Rgb8::parse_hex("#FF8000").unwrap(), Rgb8::new(255, 128, 0));
        assert_eq!(Rgb8::parse_hex("00ff00").unwrap(), Rgb8::new(0, 255, 0));
        assert!(Rgb8::parse_hex("#FFF").is_err());
        assert!(Rgb8::parse_hex("#GG0000").is_err());
    }

    #[test]
    fn spec_deserializes_from_json() {
        let spec: WatermarkSpec = serde_json::from_str(
            r##"{"text":"Sample","position":"top-left","color":"#102030","opacity":50,"outline":true}"##,
        )
        .unwrap();
        assert_eq!(spec.text, "Sample");
        assert_eq!(spec.position, Position::TopLeft);
        assert_eq!(spec.color, Rgb8::new(0x10, 0x20, 0x30));
        assert_eq!(spec.opacity, 50);
        assert!(spec.outline);
        assert_eq!(spec.font_size, 30);
        assert!(spec.font.is_none());

        let arr: WatermarkSpec =
            serde_json::from_str(r#"{"text":"x","color":[1,2,3]}"#).unwrap();
        assert_eq!(arr.color, Rgb8::new(1, 2, 3));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(WatermarkSpec::new("x").opacity(101).validate().is_err());
        assert!(WatermarkSpec::new("x").font_size(0).validate().is_err());
        assert!(WatermarkSpec::new("x").font("font.woff2").validate().is_err());
        assert!(
            WatermarkSpec::new("x")
                .font("definitely/missing/font.ttf")
                .validate()
                .is_err()
        );
        assert!(WatermarkSpec::new("x").validate().is_ok());
        // Inactive specs still get their numbers checked.
        assert!(WatermarkSpec::new("").opacity(200).validate().is_err());
    }

    #[test]
    fn list_validation_caps_count() {
        let specs = vec![WatermarkSpec::new("a"); 4];
        let err = validate_watermarks(&specs).unwrap_err();
        assert!(err.to_string().contains("at most 3"));
        assert!(validate_watermarks(&specs[..3]).is_ok());

        let bad = vec![WatermarkSpec::new("a"), WatermarkSpec::new("b").opacity(150)];
        let err = validate_watermarks(&bad).unwrap_err();
        assert!(err.to_string().contains("watermark #2"));
    }
}
