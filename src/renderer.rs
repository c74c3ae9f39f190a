use std::collections::HashMap;
use std::path::Path;

use ab_glyph::{point, Font, FontVec, Glyph, PxScale, PxScaleFont, ScaleFont};
use rand::Rng;
use tiny_skia::{
    Color, FillRule, Paint, PathBuilder, Pixmap, PremultipliedColorU8, Rect, Stroke, Transform,
};

use crate::error::{Error, Result};
use crate::stimulus::{Stimulus, StimulusKind};

/// Rasterises stimuli onto a `tiny_skia` canvas.
///
/// Stimulus positions are centre-origin with y pointing up; the canvas is
/// top-left origin with y pointing down.
pub struct StimulusRenderer<R: Rng> {
    width: u32,
    height: u32,
    center_x: f32,
    center_y: f32,
    font: Option<FontVec>,
    glyph_cache: HashMap<GlyphCacheKey, CachedGlyph>,
    rng: R,
    warned_no_font: bool,
}

#[derive(Clone)]
struct CachedGlyph {
    bitmap: Vec<u8>,
    width: u32,
    height: u32,
    bearing_x: i32,
    bearing_y: i32,
}

#[derive(Hash, Eq, PartialEq, Clone, Copy)]
struct GlyphCacheKey {
    glyph_id: u16,
    scale_bits: u32,
}

const SYSTEM_FONTS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "C:\\Windows\\Fonts\\consola.ttf",
];

fn color(rgb: [u8; 3], opacity: f32) -> Color {
    Color::from_rgba8(rgb[0], rgb[1], rgb[2], (opacity.clamp(0.0, 1.0) * 255.0) as u8)
}

fn paint(c: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(c);
    paint.anti_alias = true;
    paint
}

impl<R: Rng> StimulusRenderer<R> {
    pub fn new(width: u32, height: u32, font: Option<FontVec>, rng: R) -> Self {
        Self {
            width,
            height,
            center_x: width as f32 / 2.0,
            center_y: height as f32 / 2.0,
            font,
            glyph_cache: HashMap::with_capacity(64),
            rng,
            warned_no_font: false,
        }
    }

    pub fn load_font(path: &Path) -> Result<FontVec> {
        let bytes = std::fs::read(path).map_err(|e| Error::Font {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        FontVec::try_from_vec(bytes).map_err(|e| Error::Font {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Loads the configured font, or the first well-known system font found.
    pub fn discover_font(configured: Option<&Path>) -> Result<Option<FontVec>> {
        if let Some(path) = configured {
            return Self::load_font(path).map(Some);
        }
        for candidate in SYSTEM_FONTS {
            let path = Path::new(candidate);
            if path.is_file() {
                match Self::load_font(path) {
                    Ok(font) => {
                        log::debug!("Using font {candidate}");
                        return Ok(Some(font));
                    }
                    Err(e) => log::debug!("Skipping font: {e}"),
                }
            }
        }
        log::info!("No font found; drawing fixation and probe as vector glyphs");
        Ok(None)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.center_x = width as f32 / 2.0;
        self.center_y = height as f32 / 2.0;
    }

    fn to_screen(&self, pos: (f32, f32)) -> (f32, f32) {
        (self.center_x + pos.0, self.center_y - pos.1)
    }

    /// Clears to black, then draws `stimuli` back to front.
    pub fn render_frame(&mut self, pixmap: &mut Pixmap, stimuli: &[&Stimulus]) -> Result<()> {
        pixmap.fill(Color::BLACK);

        for stim in stimuli {
            if stim.opacity <= 0.0 {
                continue;
            }
            let (x, y) = self.to_screen(stim.pos);
            match &stim.kind {
                StimulusKind::Rect {
                    width,
                    height,
                    color: c,
                } => self.draw_rectangle(pixmap, x, y, *width, *height, color(*c, stim.opacity))?,
                StimulusKind::DynamicMask { size, grain } => {
                    self.draw_mask(pixmap, x, y, *size, *grain, stim.opacity)?
                }
                StimulusKind::Text {
                    content,
                    height,
                    color: c,
                } => self.draw_text(pixmap, content, x, y, *height, color(*c, stim.opacity))?,
                StimulusKind::Circle { radius, color: c } => {
                    self.draw_circle(pixmap, x, y, *radius, color(*c, stim.opacity))?
                }
            }
        }

        Ok(())
    }

    fn draw_rectangle(
        &self,
        pixmap: &mut Pixmap,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        c: Color,
    ) -> Result<()> {
        let rect = Rect::from_xywh(x - width / 2.0, y - height / 2.0, width, height)
            .ok_or_else(|| Error::Display(format!("invalid rect {width}x{height}")))?;
        pixmap.fill_rect(rect, &paint(c), Transform::identity(), None);
        Ok(())
    }

    fn draw_circle(&self, pixmap: &mut Pixmap, x: f32, y: f32, radius: f32, c: Color) -> Result<()> {
        let path = PathBuilder::from_circle(x, y, radius)
            .ok_or_else(|| Error::Display(format!("invalid circle radius {radius}")))?;
        pixmap.fill_path(&path, &paint(c), FillRule::Winding, Transform::identity(), None);
        Ok(())
    }

    /// Fresh random grey cells on every call.
    fn draw_mask(
        &mut self,
        pixmap: &mut Pixmap,
        x: f32,
        y: f32,
        size: f32,
        grain: f32,
        opacity: f32,
    ) -> Result<()> {
        let cells = (size / grain).ceil() as u32;
        let left = x - size / 2.0;
        let top = y - size / 2.0;
        let mut p = paint(Color::BLACK);
        p.anti_alias = false;

        for row in 0..cells {
            for col in 0..cells {
                let cx = left + col as f32 * grain;
                let cy = top + row as f32 * grain;
                let w = grain.min(left + size - cx);
                let h = grain.min(top + size - cy);
                let Some(rect) = Rect::from_xywh(cx, cy, w, h) else {
                    continue;
                };
                let grey: u8 = self.rng.random();
                p.set_color(color([grey, grey, grey], opacity));
                pixmap.fill_rect(rect, &p, Transform::identity(), None);
            }
        }
        Ok(())
    }

    /// Draws `text` centred on `(x, y)`.
    fn draw_text(
        &mut self,
        pixmap: &mut Pixmap,
        text: &str,
        x: f32,
        y: f32,
        size: f32,
        c: Color,
    ) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if self.font.is_none() {
            return self.draw_fallback_text(pixmap, text, x, y, size, c);
        }
        let Some(font) = &self.font else {
            return Ok(());
        };

        let w = pixmap.width();
        let h = pixmap.height();
        let scale = PxScale::from(size);

        // Stage 1: layout and find cache misses
        let (glyphs_to_draw, misses) = {
            let scaled_font = font.as_scaled(scale);
            let mut advance = 0.0;
            let mut prev = None;
            for ch in text.chars() {
                let gid = font.glyph_id(ch);
                if let Some(prev_gid) = prev {
                    advance += scaled_font.kern(prev_gid, gid);
                }
                advance += scaled_font.h_advance(gid);
                prev = Some(gid);
            }

            let mut pen_x = x - advance / 2.0;
            let baseline_y = y + (scaled_font.ascent() + scaled_font.descent()) / 2.0;
            let mut prev = None;
            let mut glyphs = Vec::with_capacity(text.len());
            let mut misses = Vec::new();

            for ch in text.chars() {
                let gid = font.glyph_id(ch);
                if let Some(prev_gid) = prev {
                    pen_x += scaled_font.kern(prev_gid, gid);
                }
                let key = GlyphCacheKey {
                    glyph_id: gid.0,
                    scale_bits: size.to_bits(),
                };
                if !self.glyph_cache.contains_key(&key) {
                    misses.push((gid, key));
                }
                glyphs.push((
                    Glyph {
                        id: gid,
                        scale,
                        position: point(pen_x, baseline_y),
                    },
                    key,
                ));
                pen_x += scaled_font.h_advance(gid);
                prev = Some(gid);
            }

            (glyphs, misses)
        };

        // Stage 2: fill cache for misses
        if !misses.is_empty() {
            let scaled_font = font.as_scaled(scale);
            for (gid, key) in misses {
                let g = Glyph {
                    id: gid,
                    scale,
                    position: point(0.0, 0.0),
                };
                Self::cache_glyph_impl(&mut self.glyph_cache, &scaled_font, g, key);
            }
        }

        // Stage 3: blit cached glyphs
        let pixels = pixmap.pixels_mut();
        for (glyph, key) in glyphs_to_draw {
            if let Some(cached) = self.glyph_cache.get(&key) {
                blit_cached_glyph(pixels, w, h, &glyph, cached, c);
            }
        }

        Ok(())
    }

    fn cache_glyph_impl(
        cache: &mut HashMap<GlyphCacheKey, CachedGlyph>,
        scaled_font: &PxScaleFont<&FontVec>,
        glyph: Glyph,
        key: GlyphCacheKey,
    ) {
        if let Some(outlined) = scaled_font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            let w = bounds.width().ceil() as u32;
            let h = bounds.height().ceil() as u32;
            if w == 0 || h == 0 {
                return;
            }
            let mut bitmap = vec![0u8; (w * h) as usize];
            outlined.draw(|x, y, cov| {
                if let Some(px) = bitmap.get_mut((y * w + x) as usize) {
                    *px = (cov * 255.0) as u8;
                }
            });
            cache.insert(
                key,
                CachedGlyph {
                    bitmap,
                    width: w,
                    height: h,
                    bearing_x: bounds.min.x.floor() as i32,
                    bearing_y: bounds.min.y.floor() as i32,
                },
            );
        }
    }

    /// Vector stand-ins for the fixation cross and the probe when no font
    /// could be loaded.
    fn draw_fallback_text(
        &mut self,
        pixmap: &mut Pixmap,
        text: &str,
        x: f32,
        y: f32,
        size: f32,
        c: Color,
    ) -> Result<()> {
        let stroke = Stroke {
            width: (size * 0.09).max(1.0),
            ..Default::default()
        };
        let p = paint(c);
        let half = size * 0.3;

        let mut path = PathBuilder::new();
        match text {
            "+" => {
                path.move_to(x - half, y);
                path.line_to(x + half, y);
                path.move_to(x, y - half);
                path.line_to(x, y + half);
            }
            "?" => {
                path.move_to(x - 0.22 * size, y - 0.22 * size);
                path.cubic_to(
                    x - 0.22 * size,
                    y - 0.5 * size,
                    x + 0.25 * size,
                    y - 0.5 * size,
                    x + 0.25 * size,
                    y - 0.22 * size,
                );
                path.cubic_to(
                    x + 0.25 * size,
                    y - 0.05 * size,
                    x,
                    y - 0.05 * size,
                    x,
                    y + 0.12 * size,
                );
                if let Some(dot) = PathBuilder::from_circle(x, y + 0.32 * size, 0.06 * size) {
                    pixmap.fill_path(&dot, &p, FillRule::Winding, Transform::identity(), None);
                }
            }
            _ => {
                if !self.warned_no_font {
                    log::warn!("No font loaded; text '{text}' is not drawn");
                    self.warned_no_font = true;
                }
                return Ok(());
            }
        }

        let path = path
            .finish()
            .ok_or_else(|| Error::Display(format!("empty fallback path for '{text}'")))?;
        pixmap.stroke_path(&path, &p, &stroke, Transform::identity(), None);
        Ok(())
    }
}

/// Alpha-blends a cached coverage bitmap in premultiplied space.
fn blit_cached_glyph(
    pixels: &mut [PremultipliedColorU8],
    w: u32,
    h: u32,
    glyph: &Glyph,
    cached: &CachedGlyph,
    c: Color,
) {
    let glyph_x = glyph.position.x as i32 + cached.bearing_x;
    let glyph_y = glyph.position.y as i32 + cached.bearing_y;
    let (wi, hi) = (w as i32, h as i32);
    let (cr, cg, cb, ca) = (c.red(), c.green(), c.blue(), c.alpha());

    for gy in 0..cached.height as i32 {
        let py = glyph_y + gy;
        if py < 0 || py >= hi {
            continue;
        }
        let src_row_start = (gy as u32 * cached.width) as usize;
        let dst_row_start = (py as u32 * w) as usize;

        for gx in 0..cached.width as i32 {
            let px = glyph_x + gx;
            if px < 0 || px >= wi {
                continue;
            }
            let coverage = cached.bitmap[src_row_start + gx as usize];
            if coverage == 0 {
                continue;
            }

            let alpha = ca * coverage as f32 / 255.0;
            let dst_idx = dst_row_start + px as usize;
            let dst = pixels[dst_idx];
            let inv = 1.0 - alpha;
            let out_a = ((alpha + dst.alpha() as f32 / 255.0 * inv) * 255.0) as u8;
            let blend = |src: f32, dst: u8| ((src * alpha * 255.0 + dst as f32 * inv) as u8).min(out_a);

            if let Some(out) = PremultipliedColorU8::from_rgba(
                blend(cr, dst.red()),
                blend(cg, dst.green()),
                blend(cb, dst.blue()),
                out_a,
            ) {
                pixels[dst_idx] = out;
            }
        }
    }
}
