//! Clip region as a coverage mask in output pixels

use crate::emf_records::{RGN_AND, RGN_COPY, RGN_DIFF, RGN_OR, RGN_XOR};
use tiny_skia::{FillRule, Mask, Path, PathBuilder, Rect, Transform};

/// Current clip of a graphics state.
///
/// `None` masks mean "everything". The meta region (SetMetaRgn) is kept
/// separately and always intersected with the clip.
#[derive(Debug, Clone)]
pub struct ClipRegion {
    width: u32,
    height: u32,
    clip: Option<Mask>,
    meta: Option<Mask>,
    effective: Option<Mask>,
}

impl ClipRegion {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            clip: None,
            meta: None,
            effective: None,
        }
    }

    /// Mask to paint through, `None` when nothing is clipped
    pub fn mask(&self) -> Option<&Mask> {
        self.effective.as_ref()
    }

    pub fn is_unclipped(&self) -> bool {
        self.effective.is_none()
    }

    /// Coverage of pixel (x, y); 255 when unclipped
    pub fn coverage(&self, x: u32, y: u32) -> u8 {
        match &self.effective {
            Some(mask) if x < self.width && y < self.height => mask.data()[(y * self.width + x) as usize],
            Some(_) => 0,
            None => 255,
        }
    }

    /// Drop the clip, keeping the meta region
    pub fn reset(&mut self) {
        self.clip = None;
        self.refresh();
    }

    /// Combine a pixel-space path into the clip with one of the RGN_* modes
    pub fn combine_path(&mut self, path: &Path, fill_rule: FillRule, mode: u32) -> bool {
        let mut mask = match Mask::new(self.width, self.height) {
            Some(mask) => mask,
            None => return false,
        };
        mask.fill_path(path, fill_rule, false, Transform::identity());
        self.combine_mask(&mask, mode);
        true
    }

    /// Combine a list of pixel-space rectangles (a region) into the clip
    pub fn combine_rects(&mut self, rects: &[Rect], mode: u32) -> bool {
        let mut pb = PathBuilder::new();
        for rect in rects {
            pb.push_rect(*rect);
        }
        match pb.finish() {
            Some(path) => self.combine_path(&path, FillRule::Winding, mode),
            None => {
                // An empty region: AND and COPY clip everything away
                match mode {
                    RGN_AND | RGN_COPY => match Mask::new(self.width, self.height) {
                        Some(empty) => {
                            self.combine_mask(&empty, RGN_COPY);
                            true
                        }
                        None => false,
                    },
                    _ => true,
                }
            }
        }
    }

    fn combine_mask(&mut self, other: &Mask, mode: u32) {
        let combined = match (self.clip.take(), mode) {
            (_, RGN_COPY) => Some(other.clone()),
            (None, RGN_AND) => Some(other.clone()),
            (None, RGN_OR) => None,
            (None, RGN_XOR) | (None, RGN_DIFF) => {
                let mut inverted = other.clone();
                for v in inverted.data_mut() {
                    *v = 255 - *v;
                }
                Some(inverted)
            }
            (Some(mut current), op) => {
                let op: fn(u32, u32) -> u32 = match op {
                    RGN_AND => |a, b| (a * b + 127) / 255,
                    RGN_OR => |a, b| a + b - (a * b + 127) / 255,
                    RGN_XOR => |a, b| (a + b).saturating_sub(2 * ((a * b + 127) / 255)),
                    RGN_DIFF => |a, b| (a * (255 - b) + 127) / 255,
                    _ => |a, _| a,
                };
                for (a, &b) in current.data_mut().iter_mut().zip(other.data()) {
                    *a = op(*a as u32, b as u32).min(255) as u8;
                }
                Some(current)
            }
            (None, _) => None,
        };
        self.clip = combined;
        self.refresh();
    }

    /// Shift the clip by whole pixels
    pub fn offset(&mut self, dx: i32, dy: i32) {
        let Some(clip) = self.clip.as_mut() else {
            return;
        };
        if dx == 0 && dy == 0 {
            return;
        }
        let (w, h) = (self.width as i64, self.height as i64);
        let source = clip.data().to_vec();
        let data = clip.data_mut();
        for y in 0..h {
            for x in 0..w {
                let (sx, sy) = (x - dx as i64, y - dy as i64);
                data[(y * w + x) as usize] = if sx >= 0 && sy >= 0 && sx < w && sy < h {
                    source[(sy * w + sx) as usize]
                } else {
                    0
                };
            }
        }
        self.refresh();
    }

    /// SetMetaRgn: the current clip becomes the meta region and the clip resets
    pub fn set_meta(&mut self) {
        self.meta = self.effective.take();
        self.clip = None;
        self.refresh();
    }

    fn refresh(&mut self) {
        self.effective = match (&self.meta, &self.clip) {
            (None, None) => None,
            (Some(m), None) => Some(m.clone()),
            (None, Some(c)) => Some(c.clone()),
            (Some(m), Some(c)) => {
                let mut out = c.clone();
                for (a, &b) in out.data_mut().iter_mut().zip(m.data()) {
                    *a = ((*a as u32 * b as u32 + 127) / 255) as u8;
                }
                Some(out)
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(l: f32, t: f32, r: f32, b: f32) -> Rect {
        Rect::from_ltrb(l, t, r, b).unwrap()
    }

    #[test]
    fn test_unclipped_by_default() {
        let clip = ClipRegion::new(10, 10);
        assert!(clip.is_unclipped());
        assert_eq!(clip.coverage(3, 3), 255);
    }

    #[test]
    fn test_intersect_then_exclude() {
        let mut clip = ClipRegion::new(20, 20);
        clip.combine_rects(&[rect(5.0, 5.0, 15.0, 15.0)], RGN_AND);
        assert_eq!(clip.coverage(4, 4), 0);
        assert_eq!(clip.coverage(5, 5), 255);
        assert_eq!(clip.coverage(14, 14), 255);
        assert_eq!(clip.coverage(15, 15), 0);

        clip.combine_rects(&[rect(10.0, 10.0, 20.0, 20.0)], RGN_DIFF);
        assert_eq!(clip.coverage(9, 9), 255);
        assert_eq!(clip.coverage(12, 12), 0);
    }

    #[test]
    fn test_or_and_xor() {
        let mut clip = ClipRegion::new(20, 20);
        clip.combine_rects(&[rect(0.0, 0.0, 5.0, 5.0)], RGN_COPY);
        clip.combine_rects(&[rect(10.0, 10.0, 15.0, 15.0)], RGN_OR);
        assert_eq!(clip.coverage(2, 2), 255);
        assert_eq!(clip.coverage(12, 12), 255);
        assert_eq!(clip.coverage(7, 7), 0);

        clip.combine_rects(&[rect(0.0, 0.0, 20.0, 20.0)], RGN_XOR);
        assert_eq!(clip.coverage(2, 2), 0);
        assert_eq!(clip.coverage(7, 7), 255);
    }

    #[test]
    fn test_offset_and_reset() {
        let mut clip = ClipRegion::new(20, 20);
        clip.combine_rects(&[rect(0.0, 0.0, 5.0, 5.0)], RGN_AND);
        clip.offset(10, 0);
        assert_eq!(clip.coverage(2, 2), 0);
        assert_eq!(clip.coverage(12, 2), 255);
        clip.reset();
        assert!(clip.is_unclipped());
    }

    #[test]
    fn test_meta_region_survives_reset() {
        let mut clip = ClipRegion::new(20, 20);
        clip.combine_rects(&[rect(0.0, 0.0, 10.0, 10.0)], RGN_AND);
        clip.set_meta();
        clip.reset();
        assert_eq!(clip.coverage(15, 15), 0);
        clip.combine_rects(&[rect(5.0, 5.0, 20.0, 20.0)], RGN_COPY);
        assert_eq!(clip.coverage(7, 7), 255);
        assert_eq!(clip.coverage(2, 2), 0);
        assert_eq!(clip.coverage(15, 15), 0);
    }
}
