use std::{collections::HashMap, path::PathBuf};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::{
    foundation::{
        error::{ClipmarkError, ClipmarkResult},
        math::percent_to_alpha,
    },
    watermark::{
        blend::over_rgb_in_place,
        font::{FontKey, FontLibrary, LoadedFont, ResolvedFont, TextBrushRgba8},
        spec::{Position, Rgb8, WatermarkSpec},
    },
};

/// Tunables for watermark placement and font fallback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositorOpts {
    /// Distance from the frame edge for corner positions, in pixels.
    pub margin_px: u32,
    /// Outline thickness; the outline is drawn at every offset within this radius.
    pub outline_radius_px: u32,
    /// Size used with the default face when a requested font fails to load.
    pub fallback_font_size_px: f32,
    /// Font file used as the default face. When unset, `CLIPMARK_DEFAULT_FONT` and then the
    /// system sans-serif face are tried.
    pub default_font: Option<PathBuf>,
}

impl Default for CompositorOpts {
    fn default() -> Self {
        Self {
            margin_px: 20,
            outline_radius_px: 2,
            fallback_font_size_px: 16.0,
            default_font: None,
        }
    }
}

impl CompositorOpts {
    pub fn validate(&self) -> ClipmarkResult<()> {
        if !self.fallback_font_size_px.is_finite() || self.fallback_font_size_px <= 0.0 {
            return Err(ClipmarkError::validation(
                "fallback_font_size_px must be finite and > 0",
            ));
        }
        if self.outline_radius_px > 16 {
            return Err(ClipmarkError::validation(
                "outline_radius_px must be <= 16",
            ));
        }
        Ok(())
    }
}

/// Pixel rectangle covered by a drawn watermark's glyph ink (without outline), clipped to the
/// frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What happened to one watermark spec during a composite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatermarkOutcome {
    Drawn {
        bounds: TextBounds,
        /// The requested font failed to load and the default face was used instead.
        used_fallback_font: bool,
    },
    SkippedEmptyText,
    SkippedNoFont,
}

/// Result of [`Compositor::composite`].
#[derive(Clone, Debug)]
pub struct Composited {
    pub image: RgbImage,
    /// One entry per input spec, in input order.
    pub outcomes: Vec<WatermarkOutcome>,
}

impl Composited {
    pub fn used_fallback_font(&self) -> bool {
        self.outcomes.iter().any(|o| {
            matches!(
                o,
                WatermarkOutcome::Drawn {
                    used_fallback_font: true,
                    ..
                }
            )
        })
    }
}

/// Anchor the top-left corner of a `text` sized box on a `canvas` sized frame.
///
/// The result is clamped so the box stays on the canvas; a box larger than the canvas is pinned
/// to the origin on that axis.
pub fn anchor_for(
    position: Position,
    canvas: (u32, u32),
    text: (u32, u32),
    margin: u32,
) -> (u32, u32) {
    let (w, h) = (i64::from(canvas.0), i64::from(canvas.1));
    let (tw, th) = (i64::from(text.0), i64::from(text.1));
    let m = i64::from(margin);

    let (x, y) = match position {
        Position::BottomRight => (w - tw - m, h - th - m),
        Position::BottomLeft => (m, h - th - m),
        Position::TopLeft => (m, m),
        Position::TopRight => (w - tw - m, m),
        Position::Center => ((w - tw).div_euclid(2), (h - th).div_euclid(2)),
    };

    let x = x.clamp(0, (w - tw).max(0));
    let y = y.clamp(0, (h - th).max(0));
    (x as u32, y as u32)
}

/// Offsets at which the outline copies of the text are drawn, excluding the origin.
pub fn outline_offsets(radius: u32) -> Vec<(i32, i32)> {
    let r = radius as i32;
    let mut out = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
    for dy in -r..=r {
        for dx in -r..=r {
            if (dx, dy) != (0, 0) {
                out.push((dx, dy));
            }
        }
    }
    out
}

struct ShapedRun {
    font_size: f32,
    glyphs: Vec<vello_cpu::Glyph>,
}

struct ShapedText {
    runs: Vec<ShapedRun>,
    width: u32,
    height: u32,
    /// Rendered glyph coverage relative to the layout origin; `None` when nothing is inked.
    ink: Option<InkBox>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct InkBox {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ShapeKey {
    text: String,
    font: FontKey,
    size_bits: u32,
}

/// Burns ordered watermark specs into still frames.
///
/// A compositor is meant to live for one run: fonts and shaped text are cached across frames, so
/// compositing every frame of a clip loads each font once.
pub struct Compositor {
    opts: CompositorOpts,
    fonts: FontLibrary,
    shaped: HashMap<ShapeKey, ShapedText>,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(CompositorOpts::default())
    }
}

impl Compositor {
    pub fn new(opts: CompositorOpts) -> Self {
        let fonts = FontLibrary::new(opts.default_font.clone(), opts.fallback_font_size_px);
        Self {
            opts,
            fonts,
            shaped: HashMap::new(),
        }
    }

    /// Draw `specs` over a copy of `base`, in order.
    ///
    /// Specs whose text is empty or renders no ink, or for which no font face can be found at
    /// all, are skipped and reported in [`Composited::outcomes`]. The only error is a frame too
    /// large to rasterize.
    pub fn composite(
        &mut self,
        base: &RgbImage,
        specs: &[WatermarkSpec],
    ) -> ClipmarkResult<Composited> {
        let mut image = base.clone();
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            outcomes.push(self.draw_one(&mut image, spec)?);
        }
        Ok(Composited { image, outcomes })
    }

    fn draw_one(
        &mut self,
        image: &mut RgbImage,
        spec: &WatermarkSpec,
    ) -> ClipmarkResult<WatermarkOutcome> {
        if !spec.is_active() {
            return Ok(WatermarkOutcome::SkippedEmptyText);
        }

        let Some(resolved) = self.fonts.resolve(spec.font.as_deref(), spec.font_size as f32)
        else {
            tracing::debug!(text = %spec.text, "no font face available; watermark skipped");
            return Ok(WatermarkOutcome::SkippedNoFont);
        };

        let (w, h) = image.dimensions();
        let w16 = u16::try_from(w)
            .map_err(|_| ClipmarkError::validation("frame width exceeds 65535 px"))?;
        let h16 = u16::try_from(h)
            .map_err(|_| ClipmarkError::validation("frame height exceeds 65535 px"))?;

        let margin = self.opts.margin_px;
        let outline_radius = self.opts.outline_radius_px;
        let shaped = match shape_cached(&mut self.fonts, &mut self.shaped, &spec.text, &resolved) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(text = %spec.text, error = %e, "text shaping failed; watermark skipped");
                return Ok(WatermarkOutcome::SkippedNoFont);
            }
        };

        let Some(ink) = shaped.ink else {
            return Ok(WatermarkOutcome::SkippedEmptyText);
        };
        let (x, y) = anchor_for(spec.position, (w, h), (ink.width, ink.height), margin);
        let bounds = TextBounds {
            x,
            y,
            width: ink.width.min(w - x),
            height: ink.height.min(h - y),
        };
        // Layout origin that puts the ink box's corner on the anchor.
        let origin = (x as i32 - ink.x, y as i32 - ink.y);

        let alpha = percent_to_alpha(spec.opacity);
        if alpha > 0 && w > 0 && h > 0 {
            let offsets = if spec.outline {
                outline_offsets(outline_radius)
            } else {
                Vec::new()
            };
            let layer = rasterize_text(
                shaped,
                &resolved.font,
                (w16, h16),
                origin,
                spec.color,
                alpha,
                &offsets,
            );
            over_rgb_in_place(&mut **image, layer.data_as_u8_slice())?;
        }

        Ok(WatermarkOutcome::Drawn {
            bounds,
            used_fallback_font: resolved.fallback,
        })
    }
}

fn shape_cached<'a>(
    fonts: &mut FontLibrary,
    cache: &'a mut HashMap<ShapeKey, ShapedText>,
    text: &str,
    resolved: &ResolvedFont,
) -> ClipmarkResult<&'a ShapedText> {
    let key = ShapeKey {
        text: text.to_string(),
        font: resolved.key.clone(),
        size_bits: resolved.size_px.to_bits(),
    };
    if !cache.contains_key(&key) {
        let layout = fonts.engine_mut().layout_plain(
            text,
            &resolved.font,
            resolved.size_px,
            TextBrushRgba8::default(),
        )?;
        let mut shaped = shape_layout(&layout);
        shaped.ink = measure_ink(&shaped, &resolved.font, resolved.size_px);
        cache.insert(key.clone(), shaped);
    }
    cache
        .get(&key)
        .ok_or_else(|| ClipmarkError::validation("shaped text cache miss"))
}

fn shape_layout(layout: &parley::Layout<TextBrushRgba8>) -> ShapedText {
    let mut runs = Vec::new();
    for line in layout.lines() {
        for item in line.items() {
            let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                continue;
            };

            let mut pen_x = run.offset();
            let baseline = run.baseline();
            let glyphs = run
                .glyphs()
                .map(|g| {
                    let glyph = vello_cpu::Glyph {
                        id: g.id,
                        x: pen_x + g.x,
                        y: baseline - g.y,
                    };
                    pen_x += g.advance;
                    glyph
                })
                .collect();
            runs.push(ShapedRun {
                font_size: run.run().font_size(),
                glyphs,
            });
        }
    }

    ShapedText {
        runs,
        width: layout.width().ceil().max(0.0) as u32,
        height: layout.height().ceil().max(0.0) as u32,
        ink: None,
    }
}

/// Rasterize the fill alone on a padded scratch canvas and return the bounding box of every
/// covered pixel, relative to the layout origin.
fn measure_ink(shaped: &ShapedText, font: &LoadedFont, size_px: f32) -> Option<InkBox> {
    let pad = (size_px.ceil() as u32).max(4);
    let cw = u16::try_from(shaped.width.saturating_add(2 * pad)).unwrap_or(u16::MAX);
    let ch = u16::try_from(shaped.height.saturating_add(2 * pad)).unwrap_or(u16::MAX);
    let pad = pad as i32;
    let layer = rasterize_text(
        shaped,
        font,
        (cw, ch),
        (pad, pad),
        Rgb8::new(255, 255, 255),
        255,
        &[],
    );

    let width = usize::from(cw);
    let mut found: Option<(usize, usize, usize, usize)> = None;
    for (i, px) in layer.data_as_u8_slice().chunks_exact(4).enumerate() {
        if px[3] == 0 {
            continue;
        }
        let (x, y) = (i % width, i / width);
        found = Some(match found {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    let (x0, y0, x1, y1) = found?;
    Some(InkBox {
        x: x0 as i32 - pad,
        y: y0 as i32 - pad,
        width: (x1 - x0 + 1) as u32,
        height: (y1 - y0 + 1) as u32,
    })
}

/// Rasterize the outline passes and the main text into a transparent premultiplied layer.
///
/// Every pass is drawn opaque inside one opacity layer, so overlapping outline copies do not
/// accumulate and the whole watermark ends up at exactly `alpha`.
fn rasterize_text(
    shaped: &ShapedText,
    font: &LoadedFont,
    size: (u16, u16),
    origin: (i32, i32),
    color: Rgb8,
    alpha: u8,
    outline_offsets: &[(i32, i32)],
) -> vello_cpu::Pixmap {
    let mut ctx = vello_cpu::RenderContext::new(size.0, size.1);
    let opacity = f32::from(alpha) / 255.0;
    if alpha < 255 {
        ctx.push_opacity_layer(opacity);
    }

    let (ox, oy) = (f64::from(origin.0), f64::from(origin.1));
    let black = vello_cpu::peniko::Color::from_rgba8(0, 0, 0, 255);
    for &(dx, dy) in outline_offsets {
        draw_runs(
            &mut ctx,
            shaped,
            font,
            (ox + f64::from(dx), oy + f64::from(dy)),
            black,
        );
    }
    draw_runs(
        &mut ctx,
        shaped,
        font,
        (ox, oy),
        vello_cpu::peniko::Color::from_rgba8(color.r, color.g, color.b, 255),
    );

    if alpha < 255 {
        ctx.pop_layer();
    }
    ctx.flush();

    let mut pixmap = vello_cpu::Pixmap::new(size.0, size.1);
    ctx.render_to_pixmap(&mut pixmap);
    pixmap
}

fn draw_runs(
    ctx: &mut vello_cpu::RenderContext,
    shaped: &ShapedText,
    font: &LoadedFont,
    at: (f64, f64),
    paint: vello_cpu::peniko::Color,
) {
    ctx.set_transform(vello_cpu::kurbo::Affine::translate(at));
    ctx.set_paint(paint);
    for run in &shaped.runs {
        let glyphs = run.glyphs.iter().map(|g| vello_cpu::Glyph {
            id: g.id,
            x: g.x,
            y: g.y,
        });
        ctx.glyph_run(&font.data)
            .font_size(run.font_size)
            .fill_glyphs(glyphs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_follow_margin_rules() {
        let canvas = (200, 100);
        let text = (40, 10);
        assert_eq!(anchor_for(Position::BottomRight, canvas, text, 20), (140, 70));
        assert_eq!(anchor_for(Position::BottomLeft, canvas, text, 20), (20, 70));
        assert_eq!(anchor_for(Position::TopLeft, canvas, text, 20), (20, 20));
        assert_eq!(anchor_for(Position::TopRight, canvas, text, 20), (140, 20));
        assert_eq!(anchor_for(Position::Center, canvas, text, 20), (80, 45));
    }

    #[test]
    fn anchors_clamp_oversized_text_to_canvas() {
        let canvas = (100, 50);
        for pos in [
            Position::BottomRight,
            Position::BottomLeft,
            Position::TopLeft,
            Position::TopRight,
            Position::Center,
        ] {
            let (x, y) = anchor_for(pos, canvas, (300, 80), 20);
            assert_eq!((x, y), (0, 0), "{pos:?}");

            let (x, y) = anchor_for(pos, canvas, (90, 45), 20);
            assert!(x + 90 <= 100 && y + 45 <= 50, "{pos:?} -> ({x}, {y})");
        }
    }

    #[test]
    fn outline_offsets_cover_radius_without_origin() {
        let offs = outline_offsets(2);
        assert_eq!(offs.len(), 24);
        assert!(!offs.contains(&(0, 0)));
        assert!(offs.contains(&(-2, -2)) && offs.contains(&(2, 2)));
        assert!(outline_offsets(0).is_empty());
    }

    #[test]
    fn opts_validation() {
        assert!(CompositorOpts::default().validate().is_ok());
        let bad = CompositorOpts {
            fallback_font_size_px: 0.0,
            ..CompositorOpts::default()
        };
        assert!(bad.validate().is_err());
    }
}
