use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::foundation::error::{ClipmarkError, ClipmarkResult};

/// Environment variable naming a font file to use as the default face.
pub const DEFAULT_FONT_ENV: &str = "CLIPMARK_DEFAULT_FONT";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// RGBA8 brush color used by Parley text layout.
pub(crate) struct TextBrushRgba8 {
    pub(crate) r: u8,
    pub(crate) g: u8,
    pub(crate) b: u8,
    pub(crate) a: u8,
}

/// A font that has been registered with the layout engine and is ready to rasterize.
#[derive(Clone)]
pub(crate) struct LoadedFont {
    pub(crate) family: String,
    pub(crate) data: vello_cpu::peniko::FontData,
}

impl std::fmt::Debug for LoadedFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedFont")
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum FontKey {
    Default,
    File(PathBuf),
}

/// Font chosen for one watermark.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedFont {
    pub(crate) key: FontKey,
    pub(crate) font: LoadedFont,
    pub(crate) size_px: f32,
    /// The requested font could not be loaded and the default face was substituted.
    pub(crate) fallback: bool,
}

/// Stateful helper for building Parley text layouts from registered fonts.
pub(crate) struct TextLayoutEngine {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrushRgba8>,
}

impl Default for TextLayoutEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TextLayoutEngine {
    pub(crate) fn new() -> Self {
        Self {
            font_ctx: parley::FontContext::default(),
            layout_ctx: parley::LayoutContext::new(),
        }
    }

    /// Register raw font bytes and return the font ready for layout and rasterization.
    ///
    /// `face_index` selects the face inside a collection; `preferred_family` picks among the
    /// registered families when the file carries several.
    pub(crate) fn register(
        &mut self,
        font_bytes: Vec<u8>,
        face_index: u32,
        preferred_family: Option<&str>,
    ) -> ClipmarkResult<LoadedFont> {
        let families = self.font_ctx.collection.register_fonts(
            parley::fontique::Blob::from(font_bytes.clone()),
            None,
        );
        if families.is_empty() {
            return Err(ClipmarkError::validation(
                "no font families registered from font bytes",
            ));
        }

        let mut names = Vec::with_capacity(families.len());
        for (id, _) in &families {
            if let Some(name) = self.font_ctx.collection.family_name(*id) {
                names.push(name.to_string());
            }
        }
        let family = preferred_family
            .and_then(|want| names.iter().find(|n| n.as_str() == want))
            .or_else(|| names.first())
            .cloned()
            .ok_or_else(|| ClipmarkError::validation("registered font family has no name"))?;

        Ok(LoadedFont {
            family,
            data: vello_cpu::peniko::FontData::new(
                vello_cpu::peniko::Blob::from(font_bytes),
                face_index,
            ),
        })
    }

    /// Shape and lay out a single line of plain text.
    pub(crate) fn layout_plain(
        &mut self,
        text: &str,
        font: &LoadedFont,
        size_px: f32,
        brush: TextBrushRgba8,
    ) -> ClipmarkResult<parley::Layout<TextBrushRgba8>> {
        if !size_px.is_finite() || size_px <= 0.0 {
            return Err(ClipmarkError::validation(
                "text size_px must be finite and > 0",
            ));
        }

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(font.family.clone())),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<TextBrushRgba8> = builder.build(text);
        layout.break_all_lines(None);
        layout.align(
            None,
            parley::Alignment::Start,
            parley::AlignmentOptions::default(),
        );
        Ok(layout)
    }
}

/// Resolves watermark font references, caching every load attempt for the lifetime of a run.
///
/// Load failures never surface as errors: a user font that cannot be read or parsed is replaced by
/// the default face at `fallback_size_px`, and the substitution is reported on the resolved font.
pub(crate) struct FontLibrary {
    engine: TextLayoutEngine,
    loaded: HashMap<FontKey, Option<LoadedFont>>,
    default_font_path: Option<PathBuf>,
    fallback_size_px: f32,
}

impl FontLibrary {
    pub(crate) fn new(default_font_path: Option<PathBuf>, fallback_size_px: f32) -> Self {
        Self {
            engine: TextLayoutEngine::new(),
            loaded: HashMap::new(),
            default_font_path,
            fallback_size_px,
        }
    }

    pub(crate) fn engine_mut(&mut self) -> &mut TextLayoutEngine {
        &mut self.engine
    }

    /// Pick the font for a watermark. `None` means no usable face exists at all.
    pub(crate) fn resolve(&mut self, font: Option<&Path>, size_px: f32) -> Option<ResolvedFont> {
        if let Some(path) = font {
            let key = FontKey::File(path.to_path_buf());
            if let Some(loaded) = self.load(&key) {
                return Some(ResolvedFont {
                    key,
                    font: loaded,
                    size_px,
                    fallback: false,
                });
            }
            return self.load(&FontKey::Default).map(|loaded| ResolvedFont {
                key: FontKey::Default,
                font: loaded,
                size_px: self.fallback_size_px,
                fallback: true,
            });
        }

        self.load(&FontKey::Default).map(|loaded| ResolvedFont {
            key: FontKey::Default,
            font: loaded,
            size_px,
            fallback: false,
        })
    }

    fn load(&mut self, key: &FontKey) -> Option<LoadedFont> {
        if let Some(cached) = self.loaded.get(key) {
            return cached.clone();
        }

        let result = match key {
            FontKey::File(path) => load_font_file(&mut self.engine, path),
            FontKey::Default => self.load_default_face(),
        };
        let loaded = match result {
            Ok(font) => {
                tracing::debug!(?key, family = %font.family, "font loaded");
                Some(font)
            }
            Err(e) => {
                tracing::warn!(?key, error = %e, "font unavailable");
                None
            }
        };
        self.loaded.insert(key.clone(), loaded.clone());
        loaded
    }

    fn load_default_face(&mut self) -> ClipmarkResult<LoadedFont> {
        let configured = self
            .default_font_path
            .clone()
            .or_else(|| std::env::var_os(DEFAULT_FONT_ENV).map(PathBuf::from));
        if let Some(path) = configured {
            return load_font_file(&mut self.engine, &path);
        }

        let (bytes, index, family) = system_sans_serif_face().ok_or_else(|| {
            ClipmarkError::validation("no system sans-serif font found for the default face")
        })?;
        self.engine.register(bytes, index, family.as_deref())
    }
}

fn load_font_file(engine: &mut TextLayoutEngine, path: &Path) -> ClipmarkResult<LoadedFont> {
    use anyhow::Context as _;
    let bytes =
        std::fs::read(path).with_context(|| format!("read font '{}'", path.display()))?;
    engine.register(bytes, 0, None)
}

/// Look up a sans-serif face through `fontdb`, falling back to any installed face.
fn system_sans_serif_face() -> Option<(Vec<u8>, u32, Option<String>)> {
    use usvg::fontdb;

    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    let id = db
        .query(&fontdb::Query {
            families: &[fontdb::Family::SansSerif],
            ..fontdb::Query::default()
        })
        .or_else(|| db.faces().next().map(|face| face.id))?;

    let family = db
        .face(id)
        .and_then(|face| face.families.first())
        .map(|(name, _)| name.clone());
    db.with_face_data(id, |data, index| (data.to_vec(), index, family))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_do_not_register() {
        let mut engine = TextLayoutEngine::new();
        assert!(engine.register(b"not a font".to_vec(), 0, None).is_err());
    }

    #[test]
    fn unreadable_font_file_falls_back_to_default_face() {
        let dir = std::env::temp_dir().join(format!("clipmark_font_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bogus = dir.join("broken.ttf");
        std::fs::write(&bogus, b"definitely not truetype").unwrap();

        let mut lib = FontLibrary::new(None, 16.0);
        let Some(resolved) = lib.resolve(Some(&bogus), 48.0) else {
            // No default face on this machine; nothing left to observe.
            return;
        };
        assert!(resolved.fallback);
        assert_eq!(resolved.key, FontKey::Default);
        assert_eq!(resolved.size_px, 16.0);
    }

    #[test]
    fn absent_font_uses_default_face_at_requested_size() {
        let mut lib = FontLibrary::new(None, 16.0);
        let Some(resolved) = lib.resolve(None, 40.0) else {
            return;
        };
        assert!(!resolved.fallback);
        assert_eq!(resolved.size_px, 40.0);
    }

    #[test]
    fn layout_rejects_non_positive_size() {
        let mut lib = FontLibrary::new(None, 16.0);
        let Some(resolved) = lib.resolve(None, 12.0) else {
            return;
        };
        let Err(err) =
            lib.engine_mut()
                .layout_plain("x", &resolved.font, 0.0, TextBrushRgba8::default())
        else {
            panic!("zero size should be rejected");
        };
        assert!(err.to_string().contains("size_px"));
    }
}
