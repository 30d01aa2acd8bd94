//! Page geometry: units, paper formats, DPI boxes and stamp anchoring.
//!
//! PDF user space is measured in points (1/72 inch) with the origin at the
//! bottom-left corner. Stamp layout is expressed the way people lay out paper:
//! millimetres from the top-left corner, where a *negative* coordinate counts
//! back from the right or bottom edge. [`PageGeometry::to_pdf_point`] does the
//! conversion at draw time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const POINTS_PER_INCH: f32 = 72.0;
pub const MM_PER_INCH: f32 = 25.4;

/// Margins of the layout box used for anchor positions, in millimetres.
const MARGIN_LEFT: f32 = 10.0;
const MARGIN_RIGHT: f32 = 10.0;
const MARGIN_TOP: f32 = 10.0;
const MARGIN_BOTTOM: f32 = 20.0;

/// Convert PDF points to millimetres.
pub fn pt_to_mm(pt: f32) -> f32 {
    pt * MM_PER_INCH / POINTS_PER_INCH
}

/// Convert millimetres to PDF points.
pub fn mm_to_pt(mm: f32) -> f32 {
    mm * POINTS_PER_INCH / MM_PER_INCH
}

/// DPI values with a dedicated A4 pixel box.
pub const SUPPORTED_DPI: [u32; 4] = [72, 96, 150, 300];

/// DPI used when the caller asks for a value outside [`SUPPORTED_DPI`].
pub const FALLBACK_DPI: u32 = 150;

/// Pixel box approximating an A4 page at the given DPI.
///
/// Unknown DPI values fall back to the 150 DPI box.
pub fn dpi_pixel_box(dpi: u32) -> (u32, u32) {
    match dpi {
        72 => (595, 842),
        96 => (794, 1123),
        150 => (1240, 1754),
        300 => (2480, 3508),
        _ => (1240, 1754),
    }
}

/// Normalise a requested DPI to one that has a pixel box.
pub fn effective_dpi(dpi: u32) -> u32 {
    if SUPPORTED_DPI.contains(&dpi) {
        dpi
    } else {
        FALLBACK_DPI
    }
}

// ── Paper formats ─────────────────────────────────────────────────────────

/// Named paper sizes accepted for generated stamps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFormat {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
    /// Explicit size in millimetres.
    Custom { width_mm: f32, height_mm: f32 },
}

impl PageFormat {
    /// Width and height in millimetres (portrait).
    pub fn size_mm(&self) -> (f32, f32) {
        match self {
            PageFormat::A3 => (297.0, 420.0),
            PageFormat::A4 => (210.0, 297.0),
            PageFormat::A5 => (148.0, 210.0),
            PageFormat::Letter => (215.9, 279.4),
            PageFormat::Legal => (215.9, 355.6),
            PageFormat::Custom {
                width_mm,
                height_mm,
            } => (*width_mm, *height_mm),
        }
    }

    pub fn geometry(&self) -> PageGeometry {
        let (w, h) = self.size_mm();
        PageGeometry::from_mm(w, h)
    }
}

impl FromStr for PageFormat {
    type Err = String;

    /// Parses `a3`, `a4`, `a5`, `letter`, `legal` or `<w>x<h>` in millimetres.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "a3" => Ok(PageFormat::A3),
            "a4" => Ok(PageFormat::A4),
            "a5" => Ok(PageFormat::A5),
            "letter" => Ok(PageFormat::Letter),
            "legal" => Ok(PageFormat::Legal),
            other => {
                let (w, h) = other
                    .split_once('x')
                    .ok_or_else(|| format!("unknown page format '{other}'"))?;
                let width_mm: f32 = w.trim().parse().map_err(|_| format!("bad width '{w}'"))?;
                let height_mm: f32 = h.trim().parse().map_err(|_| format!("bad height '{h}'"))?;
                if width_mm <= 0.0 || height_mm <= 0.0 {
                    return Err(format!("page size must be positive, got {other}"));
                }
                Ok(PageFormat::Custom {
                    width_mm,
                    height_mm,
                })
            }
        }
    }
}

/// Physical size of one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width_mm: f32,
    pub height_mm: f32,
}

impl PageGeometry {
    pub fn from_mm(width_mm: f32, height_mm: f32) -> Self {
        Self {
            width_mm,
            height_mm,
        }
    }

    /// Build from a media box size in PDF points.
    pub fn from_points(width_pt: f32, height_pt: f32) -> Self {
        Self::from_mm(pt_to_mm(width_pt), pt_to_mm(height_pt))
    }

    pub fn width_pt(&self) -> f32 {
        mm_to_pt(self.width_mm)
    }

    pub fn height_pt(&self) -> f32 {
        mm_to_pt(self.height_mm)
    }

    /// Effective (inside-margins) page width in millimetres.
    pub fn epw(&self) -> f32 {
        self.width_mm - MARGIN_LEFT - MARGIN_RIGHT
    }

    /// Effective (inside-margins) page height in millimetres.
    pub fn eph(&self) -> f32 {
        self.height_mm - MARGIN_TOP - MARGIN_BOTTOM
    }

    /// Hashable key identifying pages of the same size (1/100 pt precision).
    pub fn cache_key(&self) -> (i64, i64) {
        (
            (self.width_pt() * 100.0).round() as i64,
            (self.height_pt() * 100.0).round() as i64,
        )
    }

    /// Convert a layout point (mm from top-left, negatives from the far
    /// edges) into PDF user space (pt from bottom-left).
    pub fn to_pdf_point(&self, p: Point) -> (f32, f32) {
        let x_mm = if p.x < 0 {
            self.width_mm + p.x as f32
        } else {
            p.x as f32
        };
        let y_mm = if p.y < 0 {
            self.height_mm + p.y as f32
        } else {
            p.y as f32
        };
        (mm_to_pt(x_mm), self.height_pt() - mm_to_pt(y_mm))
    }
}

// ── Layout primitives ─────────────────────────────────────────────────────

/// A layout point in whole millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::ops::Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl FromStr for Point {
    type Err = String;

    /// Parses `"x,y"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected 'x,y', got '{s}'"))?;
        let x = x.trim().parse().map_err(|_| format!("bad x '{x}'"))?;
        let y = y.trim().parse().map_err(|_| format!("bad y '{y}'"))?;
        Ok(Point::new(x, y))
    }
}

/// RGB colour, 0–255 per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);
    pub const RED: Color = Color::new(255, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Channels as PDF colour components in `0.0..=1.0`.
    pub fn components(&self) -> [f32; 3] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        ]
    }
}

impl FromStr for Color {
    type Err = String;

    /// Parses `#rrggbb` or `r,g,b`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 {
                return Err(format!("expected #rrggbb, got '{s}'"));
            }
            let channel = |i: usize| {
                u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| format!("bad hex colour '{s}'"))
            };
            return Ok(Color::new(channel(0)?, channel(2)?, channel(4)?));
        }
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 3 {
            return Err(format!("expected 'r,g,b' or '#rrggbb', got '{s}'"));
        }
        let mut rgb = [0u8; 3];
        for (slot, part) in rgb.iter_mut().zip(parts) {
            *slot = part
                .trim()
                .parse()
                .map_err(|_| format!("bad colour channel '{part}'"))?;
        }
        Ok(Color::new(rgb[0], rgb[1], rgb[2]))
    }
}

/// Named stamp anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Anchor {
    #[default]
    #[serde(rename = "tl")]
    TopLeft,
    #[serde(rename = "tr")]
    TopRight,
    #[serde(rename = "bl")]
    BottomLeft,
    #[serde(rename = "br")]
    BottomRight,
    #[serde(rename = "t")]
    Top,
    #[serde(rename = "b")]
    Bottom,
    #[serde(rename = "l")]
    Left,
    #[serde(rename = "r")]
    Right,
    #[serde(rename = "c")]
    Center,
}

impl Anchor {
    pub const ALL: [Anchor; 9] = [
        Anchor::TopLeft,
        Anchor::TopRight,
        Anchor::BottomLeft,
        Anchor::BottomRight,
        Anchor::Top,
        Anchor::Bottom,
        Anchor::Left,
        Anchor::Right,
        Anchor::Center,
    ];

    /// Short code (`tl`, `tr`, …).
    pub fn code(&self) -> &'static str {
        match self {
            Anchor::TopLeft => "tl",
            Anchor::TopRight => "tr",
            Anchor::BottomLeft => "bl",
            Anchor::BottomRight => "br",
            Anchor::Top => "t",
            Anchor::Bottom => "b",
            Anchor::Left => "l",
            Anchor::Right => "r",
            Anchor::Center => "c",
        }
    }

    /// Upper-case name (`TOP_LEFT`, …).
    pub fn name(&self) -> &'static str {
        match self {
            Anchor::TopLeft => "TOP_LEFT",
            Anchor::TopRight => "TOP_RIGHT",
            Anchor::BottomLeft => "BOTTOM_LEFT",
            Anchor::BottomRight => "BOTTOM_RIGHT",
            Anchor::Top => "TOP",
            Anchor::Bottom => "BOTTOM",
            Anchor::Left => "LEFT",
            Anchor::Right => "RIGHT",
            Anchor::Center => "CENTER",
        }
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Anchor {
    type Err = String;

    /// Accepts either the upper-case name or the short code, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Anchor::ALL
            .into_iter()
            .find(|a| {
                a.name().eq_ignore_ascii_case(needle) || a.code().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| format!("unknown position '{s}'"))
    }
}

/// Resolve where a stamp starts on a page.
///
/// An explicit `position` wins over the anchor; `offset` is always added.
/// Returned coordinates follow the layout convention of this module.
pub fn get_position(
    page: &PageGeometry,
    position: Option<Point>,
    anchor: Anchor,
    offset: Point,
) -> Point {
    let half_w = (page.epw() / 2.0) as i32;
    let half_h = (page.eph() / 2.0) as i32;
    let base = position.unwrap_or(match anchor {
        Anchor::TopLeft => Point::new(10, 10),
        Anchor::TopRight => Point::new(-15, 10),
        Anchor::BottomLeft => Point::new(10, -10),
        Anchor::BottomRight => Point::new(-15, -10),
        Anchor::Top => Point::new(half_w, 10),
        Anchor::Bottom => Point::new(half_w, -10),
        Anchor::Left => Point::new(10, half_h),
        Anchor::Right => Point::new(-15, half_h),
        Anchor::Center => Point::new(half_w, half_h),
    });
    base + offset
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a4() -> PageGeometry {
        PageFormat::A4.geometry()
    }

    #[test]
    fn unit_conversion_round_trips() {
        assert!((pt_to_mm(72.0) - 25.4).abs() < 1e-4);
        assert!((mm_to_pt(210.0) - 595.2756).abs() < 1e-3);
    }

    #[test]
    fn top_right_is_negative_x_positive_y() {
        let p = get_position(&a4(), None, Anchor::TopRight, Point::default());
        assert_eq!(p, Point::new(-15, 10));
        assert!(p.x < 0 && p.y > 0);
    }

    #[test]
    fn offset_shifts_exactly() {
        for anchor in Anchor::ALL {
            let base = get_position(&a4(), None, anchor, Point::default());
            let moved = get_position(&a4(), None, anchor, Point::new(7, -3));
            assert_eq!(moved, Point::new(base.x + 7, base.y - 3), "{anchor}");
        }
    }

    #[test]
    fn explicit_position_replaces_anchor() {
        let p = get_position(&a4(), Some(Point::new(50, 60)), Anchor::Center, Point::new(1, 1));
        assert_eq!(p, Point::new(51, 61));
    }

    #[test]
    fn centred_axes_use_half_effective_size() {
        let p = get_position(&a4(), None, Anchor::Center, Point::default());
        assert_eq!(p, Point::new(95, 133));
        let t = get_position(&a4(), None, Anchor::Top, Point::default());
        assert_eq!(t, Point::new(95, 10));
    }

    #[test]
    fn negative_layout_points_count_from_far_edges() {
        let page = PageGeometry::from_points(600.0, 800.0);
        let (x, y) = page.to_pdf_point(Point::new(0, 0));
        assert!(x.abs() < 1e-3 && (y - 800.0).abs() < 1e-3);
        let (x, y) = page.to_pdf_point(Point::new(-10, -10));
        assert!((x - (600.0 - mm_to_pt(10.0))).abs() < 1e-2);
        assert!((y - mm_to_pt(10.0)).abs() < 1e-2);
    }

    #[test]
    fn anchor_parses_names_and_codes() {
        assert_eq!("TOP_RIGHT".parse::<Anchor>().unwrap(), Anchor::TopRight);
        assert_eq!("br".parse::<Anchor>().unwrap(), Anchor::BottomRight);
        assert_eq!("center".parse::<Anchor>().unwrap(), Anchor::Center);
        assert!("middle".parse::<Anchor>().is_err());
    }

    #[test]
    fn dpi_lookup_and_fallback() {
        assert_eq!(dpi_pixel_box(72), (595, 842));
        assert_eq!(dpi_pixel_box(300), (2480, 3508));
        assert_eq!(dpi_pixel_box(123), dpi_pixel_box(150));
        assert_eq!(effective_dpi(96), 96);
        assert_eq!(effective_dpi(200), FALLBACK_DPI);
    }

    #[test]
    fn page_format_parsing() {
        assert_eq!("Letter".parse::<PageFormat>().unwrap(), PageFormat::Letter);
        assert_eq!(
            "100x50".parse::<PageFormat>().unwrap(),
            PageFormat::Custom {
                width_mm: 100.0,
                height_mm: 50.0
            }
        );
        assert!("b5".parse::<PageFormat>().is_err());
    }

    #[test]
    fn colour_parsing() {
        assert_eq!("#ff8000".parse::<Color>().unwrap(), Color::new(255, 128, 0));
        assert_eq!("0, 0, 255".parse::<Color>().unwrap(), Color::new(0, 0, 255));
        assert!("#fff".parse::<Color>().is_err());
    }
}
