//! Glyph outlines for text records
//!
//! Text is drawn from TrueType/OpenType outlines read with ttf-parser. The
//! default provider looks for font files in the usual system and package
//! directories; callers can supply their own [`GlyphOutlineProvider`].

use crate::error::{ConvertError, ConvertResult};
use crate::geometry::PathOp;
use crate::record::LogFont;
use crate::types::PointF;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use ttf_parser::{name_id, Face, GlyphId, OutlineBuilder};

/// Font request derived from a LOGFONT
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontDescriptor {
    pub family: String,
    pub weight: i32,
    pub italic: bool,
}

impl FontDescriptor {
    pub fn new(family: impl Into<String>, weight: i32, italic: bool) -> Self {
        Self {
            family: family.into(),
            weight,
            italic,
        }
    }

    pub fn from_log_font(font: &LogFont) -> Self {
        Self::new(font.face_name.clone(), font.weight, font.italic)
    }

    pub fn is_bold(&self) -> bool {
        self.weight >= 600
    }
}

/// One glyph in em units, y pointing up, origin on the baseline
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphOutline {
    pub ops: Vec<PathOp>,
    pub advance: f64,
}

/// Vertical metrics in em units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FontMetrics {
    pub ascent: f64,
    /// Positive distance below the baseline
    pub descent: f64,
    pub avg_char_width: f64,
    pub underline_position: f64,
    pub underline_thickness: f64,
    pub strikeout_position: f64,
    pub strikeout_thickness: f64,
}

impl Default for FontMetrics {
    fn default() -> Self {
        Self {
            ascent: 0.9,
            descent: 0.2,
            avg_char_width: 0.5,
            underline_position: -0.1,
            underline_thickness: 0.05,
            strikeout_position: 0.3,
            strikeout_thickness: 0.05,
        }
    }
}

/// Source of glyph outlines for text rendering
pub trait GlyphOutlineProvider: Send + Sync {
    fn outline(&self, font: &FontDescriptor, ch: char) -> Option<GlyphOutline>;

    /// Glyph by font-specific index (ETO_GLYPH_INDEX)
    fn outline_by_index(&self, _font: &FontDescriptor, _glyph: u16) -> Option<GlyphOutline> {
        None
    }

    fn metrics(&self, font: &FontDescriptor) -> FontMetrics;
}

/// Load a TTF/OTF/TTC file and check that it parses
pub fn load_font_file(path: impl AsRef<Path>) -> ConvertResult<Vec<u8>> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    Face::parse(&data, 0).map_err(|e| ConvertError::Config(format!("invalid font file {}: {}", path.display(), e)))?;
    Ok(data)
}

struct FaceEntry {
    family: String,
    bold: bool,
    italic: bool,
    index: u32,
    path: Option<PathBuf>,
    data: OnceLock<Option<Arc<Vec<u8>>>>,
}

impl FaceEntry {
    fn data(&self) -> Option<&Arc<Vec<u8>>> {
        self.data
            .get_or_init(|| {
                let path = self.path.as_ref()?;
                match fs::read(path) {
                    Ok(data) => Some(Arc::new(data)),
                    Err(e) => {
                        log::warn!("Failed to read font {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .as_ref()
    }

    fn with_face<T>(&self, f: impl FnOnce(&Face<'_>) -> Option<T>) -> Option<T> {
        let data = self.data()?;
        let face = Face::parse(data.as_slice(), self.index).ok()?;
        f(&face)
    }
}

/// Glyph provider backed by TrueType fonts found on disk or supplied in memory
pub struct TtfGlyphProvider {
    faces: Vec<FaceEntry>,
    resolved: Mutex<HashMap<(String, bool, bool), Option<usize>>>,
}

impl std::fmt::Debug for TtfGlyphProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtfGlyphProvider")
            .field("faces", &self.faces.len())
            .finish()
    }
}

impl TtfGlyphProvider {
    fn empty() -> Self {
        Self {
            faces: Vec::new(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Scan the platform font directories
    pub fn discover() -> Self {
        let mut provider = Self::empty();
        for dir in font_dirs() {
            provider.scan_dir(&dir, 0);
        }
        log::info!("Discovered {} font faces", provider.faces.len());
        provider
    }

    /// Provider over one font file's bytes
    pub fn from_font_data(data: Vec<u8>) -> ConvertResult<Self> {
        let mut provider = Self::empty();
        provider.add_font_data(data)?;
        Ok(provider)
    }

    /// Add every face of an in-memory font file
    pub fn add_font_data(&mut self, data: Vec<u8>) -> ConvertResult<()> {
        let data = Arc::new(data);
        let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
        let before = self.faces.len();
        for index in 0..count {
            if let Some((family, bold, italic)) = describe(&data, index) {
                let cell = OnceLock::new();
                let _ = cell.set(Some(Arc::clone(&data)));
                self.faces.push(FaceEntry {
                    family,
                    bold,
                    italic,
                    index,
                    path: None,
                    data: cell,
                });
            }
        }
        if self.faces.len() == before {
            return Err(ConvertError::Config("font data contains no usable face".to_string()));
        }
        self.clear_cache();
        Ok(())
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    fn clear_cache(&self) {
        if let Ok(mut cache) = self.resolved.lock() {
            cache.clear();
        }
    }

    fn scan_dir(&mut self, dir: &Path, depth: usize) {
        if depth > 4 {
            return;
        }
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.scan_dir(&path, depth + 1);
                continue;
            }
            let is_font = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc"))
                .unwrap_or(false);
            if !is_font {
                continue;
            }
            let Ok(data) = fs::read(&path) else {
                continue;
            };
            let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
            for index in 0..count {
                if let Some((family, bold, italic)) = describe(&data, index) {
                    self.faces.push(FaceEntry {
                        family,
                        bold,
                        italic,
                        index,
                        path: Some(path.clone()),
                        data: OnceLock::new(),
                    });
                }
            }
        }
    }

    /// Index of the face used for `font`
    fn resolve(&self, font: &FontDescriptor) -> Option<usize> {
        let key = (font.family.to_lowercase(), font.is_bold(), font.italic);
        if let Ok(cache) = self.resolved.lock() {
            if let Some(hit) = cache.get(&key) {
                return *hit;
            }
        }
        let found = self.best_face(&key.0, key.1, key.2);
        if found.is_none() {
            log::debug!("No font face for {:?}", font);
        }
        if let Ok(mut cache) = self.resolved.lock() {
            cache.insert(key, found);
        }
        found
    }

    fn best_face(&self, family: &str, bold: bool, italic: bool) -> Option<usize> {
        let score = |f: &FaceEntry| (f.bold == bold) as u8 * 2 + (f.italic == italic) as u8;
        let pick = |name: &str| {
            self.faces
                .iter()
                .enumerate()
                .filter(|(_, f)| f.family == name)
                .max_by_key(|(_, f)| score(f))
                .map(|(i, _)| i)
        };
        pick(family)
            .or_else(|| substitutes(family).iter().find_map(|name| pick(name)))
            .or_else(|| {
                self.faces
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, f)| score(f))
                    .map(|(i, _)| i)
            })
    }

    /// Faces to try for a character, best match first
    fn candidates(&self, font: &FontDescriptor) -> Vec<usize> {
        let mut order = Vec::new();
        if let Some(first) = self.resolve(font) {
            order.push(first);
        }
        for name in substitutes(&font.family.to_lowercase()) {
            if let Some(i) = self.faces.iter().position(|f| f.family == *name) {
                if !order.contains(&i) {
                    order.push(i);
                }
            }
        }
        order
    }
}

impl GlyphOutlineProvider for TtfGlyphProvider {
    fn outline(&self, font: &FontDescriptor, ch: char) -> Option<GlyphOutline> {
        self.candidates(font).into_iter().find_map(|i| {
            self.faces[i].with_face(|face| {
                let glyph = face.glyph_index(ch)?;
                Some(glyph_outline(face, glyph))
            })
        })
    }

    fn outline_by_index(&self, font: &FontDescriptor, glyph: u16) -> Option<GlyphOutline> {
        let i = self.resolve(font)?;
        self.faces[i].with_face(|face| {
            if glyph >= face.number_of_glyphs() {
                return None;
            }
            Some(glyph_outline(face, GlyphId(glyph)))
        })
    }

    fn metrics(&self, font: &FontDescriptor) -> FontMetrics {
        self.resolve(font)
            .and_then(|i| self.faces[i].with_face(|face| Some(face_metrics(face))))
            .unwrap_or_default()
    }
}

fn describe(data: &[u8], index: u32) -> Option<(String, bool, bool)> {
    let face = Face::parse(data, index).ok()?;
    let family = face
        .names()
        .into_iter()
        .filter(|n| n.name_id == name_id::FAMILY || n.name_id == name_id::TYPOGRAPHIC_FAMILY)
        .find_map(|n| n.to_string())?;
    Some((family.to_lowercase(), face.is_bold(), face.is_italic()))
}

fn face_metrics(face: &Face<'_>) -> FontMetrics {
    let upem = face.units_per_em() as f64;
    if upem <= 0.0 {
        return FontMetrics::default();
    }
    let defaults = FontMetrics::default();
    let underline = face.underline_metrics();
    let strikeout = face.strikeout_metrics();
    FontMetrics {
        ascent: face.ascender() as f64 / upem,
        descent: -(face.descender() as f64) / upem,
        avg_char_width: face
            .tables()
            .os2
            .map(|os2| os2.average_char_width() as f64 / upem)
            .filter(|w| *w > 0.0)
            .unwrap_or(defaults.avg_char_width),
        underline_position: underline.map_or(defaults.underline_position, |m| m.position as f64 / upem),
        underline_thickness: underline.map_or(defaults.underline_thickness, |m| m.thickness as f64 / upem),
        strikeout_position: strikeout.map_or(defaults.strikeout_position, |m| m.position as f64 / upem),
        strikeout_thickness: strikeout.map_or(defaults.strikeout_thickness, |m| m.thickness as f64 / upem),
    }
}

fn glyph_outline(face: &Face<'_>, glyph: GlyphId) -> GlyphOutline {
    let scale = 1.0 / face.units_per_em().max(1) as f64;
    let mut builder = EmBuilder {
        scale,
        ops: Vec::new(),
        last: PointF::default(),
    };
    // Blank glyphs (space) have no outline but still advance
    let _ = face.outline_glyph(glyph, &mut builder);
    GlyphOutline {
        ops: builder.ops,
        advance: face.glyph_hor_advance(glyph).unwrap_or(0) as f64 * scale,
    }
}

struct EmBuilder {
    scale: f64,
    ops: Vec<PathOp>,
    last: PointF,
}

impl EmBuilder {
    fn point(&self, x: f32, y: f32) -> PointF {
        PointF::new(x as f64 * self.scale, y as f64 * self.scale)
    }
}

impl OutlineBuilder for EmBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.last = self.point(x, y);
        self.ops.push(PathOp::MoveTo(self.last));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.last = self.point(x, y);
        self.ops.push(PathOp::LineTo(self.last));
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let q = self.point(x1, y1);
        let p = self.point(x, y);
        let l = self.last;
        let c1 = PointF::new(l.x + 2.0 / 3.0 * (q.x - l.x), l.y + 2.0 / 3.0 * (q.y - l.y));
        let c2 = PointF::new(p.x + 2.0 / 3.0 * (q.x - p.x), p.y + 2.0 / 3.0 * (q.y - p.y));
        self.ops.push(PathOp::CubicTo(c1, c2, p));
        self.last = p;
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (a, b, p) = (self.point(x1, y1), self.point(x2, y2), self.point(x, y));
        self.ops.push(PathOp::CubicTo(a, b, p));
        self.last = p;
    }

    fn close(&mut self) {
        self.ops.push(PathOp::Close);
    }
}

/// Metric-compatible stand-ins for common Windows faces
fn substitutes(family: &str) -> &'static [&'static str] {
    const SANS: &[&str] = &[
        "arial",
        "liberation sans",
        "arimo",
        "dejavu sans",
        "helvetica",
        "freesans",
        "noto sans",
    ];
    const SERIF: &[&str] = &[
        "times new roman",
        "liberation serif",
        "tinos",
        "dejavu serif",
        "times",
        "freeserif",
        "noto serif",
    ];
    const MONO: &[&str] = &[
        "courier new",
        "liberation mono",
        "cousine",
        "dejavu sans mono",
        "courier",
        "freemono",
        "noto sans mono",
    ];
    if ["courier", "mono", "consolas", "console", "fixed"]
        .iter()
        .any(|k| family.contains(k))
    {
        MONO
    } else if !family.contains("sans")
        && ["times", "serif", "georgia", "cambria", "garamond", "roman", "book"]
            .iter()
            .any(|k| family.contains(k))
    {
        SERIF
    } else {
        SANS
    }
}

/// Directories searched by [`TtfGlyphProvider::discover`]
pub fn font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(extra) = std::env::var("EMF_FONT_DIR") {
        dirs.extend(std::env::split_paths(&extra));
    }

    #[cfg(target_os = "windows")]
    {
        match std::env::var("WINDIR") {
            Ok(windir) => dirs.push(PathBuf::from(windir).join("Fonts")),
            Err(_) => dirs.push(PathBuf::from("C:\\Windows\\Fonts")),
        }
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            dirs.push(PathBuf::from(local).join("Microsoft").join("Windows").join("Fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library").join("Fonts"));
        }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(&home).join(".fonts"));
            dirs.push(PathBuf::from(home).join(".local").join("share").join("fonts"));
        }
    }

    // Fonts bundled next to the application (development checkouts)
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = Some(cwd.as_path());
        for _ in 0..3 {
            let Some(d) = dir else { break };
            let assets = d.join("assets").join("fonts");
            if assets.is_dir() {
                dirs.push(assets);
                break;
            }
            dir = d.parent();
        }
    }

    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_log_font() {
        let font = LogFont {
            height: -20,
            width: 0,
            escapement: 0,
            orientation: 0,
            weight: 700,
            italic: true,
            underline: false,
            strike_out: false,
            charset: 0,
            face_name: "Tahoma".to_string(),
        };
        let d = FontDescriptor::from_log_font(&font);
        assert_eq!(d.family, "Tahoma");
        assert!(d.is_bold());
        assert!(d.italic);
    }

    #[test]
    fn test_substitutes() {
        assert_eq!(substitutes("courier new")[1], "liberation mono");
        assert_eq!(substitutes("times new roman")[1], "liberation serif");
        assert_eq!(substitutes("segoe ui")[0], "arial");
        assert_eq!(substitutes("dejavu sans")[0], "arial");
    }

    #[test]
    fn test_invalid_font_data() {
        assert!(TtfGlyphProvider::from_font_data(vec![0u8; 64]).is_err());
    }

    #[test]
    fn test_empty_provider_uses_default_metrics() {
        let provider = TtfGlyphProvider::empty();
        let font = FontDescriptor::new("Arial", 400, false);
        assert_eq!(provider.metrics(&font), FontMetrics::default());
        assert!(provider.outline(&font, 'A').is_none());
    }

    #[test]
    fn test_quadratic_raised_to_cubic() {
        let mut b = EmBuilder {
            scale: 0.5,
            ops: Vec::new(),
            last: PointF::default(),
        };
        b.move_to(0.0, 0.0);
        b.quad_to(3.0, 3.0, 6.0, 0.0);
        let PathOp::CubicTo(c1, c2, end) = b.ops[1] else {
            panic!("expected a cubic, got {:?}", b.ops[1]);
        };
        assert!((c1.x - 1.0).abs() < 1e-9 && (c1.y - 1.0).abs() < 1e-9);
        assert!((c2.x - 2.0).abs() < 1e-9 && (c2.y - 1.0).abs() < 1e-9);
        assert_eq!(end, PointF::new(3.0, 0.0));
    }
}
