//! Stamp engine: overlay text, an image or another PDF onto document pages.
//!
//! A [`StampSpec`] renders itself into a one-page overlay document sized to
//! the target page ([`StampSpec::render`]). The overlay's first page is then
//! imported into the target as a Form XObject and drawn either after the
//! existing page content (`over = true`) or before it. Overlays are rendered
//! once per distinct page size within a document.

use crate::document::ResolvedDocument;
use crate::error::{AssemblyError, DocstampError, FetchError, StampError};
use crate::geometry::{get_position, mm_to_pt, Anchor, Color, PageFormat, PageGeometry, Point};
use crate::output::{generated_name, materialize, plan_outputs, OutputSpec, ResultDescriptor};
use crate::pdf;
use crate::pipeline::fetch::{classify, Fetcher, SourceKind};
use image::DynamicImage;
use lopdf::content::Operation;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Horizontal padding between a text cell's edge and its text, in mm.
const CELL_MARGIN_MM: f32 = 1.0;

/// Where stamp content (an image or an overlay PDF) comes from.
#[derive(Clone)]
pub enum StampSource {
    Path(PathBuf),
    Bytes(Arc<[u8]>),
    /// Fetched through the pipeline's [`Fetcher`] right before stamping.
    Url(String),
}

impl std::fmt::Debug for StampSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StampSource::Path(p) => write!(f, "Path({})", p.display()),
            StampSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            StampSource::Url(u) => write!(f, "Url({u})"),
        }
    }
}

impl StampSource {
    /// `http(s)://` strings are URLs, everything else a local path.
    pub fn parse(s: &str) -> Self {
        match classify(s) {
            SourceKind::Http(url) => StampSource::Url(url),
            SourceKind::Local(path) => StampSource::Path(path),
            SourceKind::Unsupported { .. } => StampSource::Url(s.to_string()),
        }
    }

    /// Load the content through `fetcher`, returning an in-memory source.
    pub async fn fetch(&self, fetcher: &Fetcher) -> Result<StampSource, FetchError> {
        Ok(match self {
            StampSource::Bytes(b) => StampSource::Bytes(Arc::clone(b)),
            StampSource::Path(p) => StampSource::Bytes(fetcher.fetch_path(p).await?.content),
            StampSource::Url(u) => StampSource::Bytes(fetcher.fetch(u).await?.content),
        })
    }

    fn bytes(&self) -> Result<Arc<[u8]>, StampError> {
        match self {
            StampSource::Bytes(b) => Ok(Arc::clone(b)),
            StampSource::Path(p) => std::fs::read(p)
                .map(Arc::from)
                .map_err(|e| StampError::Render(format!("cannot read {}: {e}", p.display()))),
            StampSource::Url(u) => Err(StampError::Render(format!("{u} has not been fetched"))),
        }
    }
}

/// Layout shared by generated (text and image) stamps.
#[derive(Debug, Clone, PartialEq)]
pub struct StampLayout {
    /// Page size used by [`StampSpec::to_pdf`] and for pages without a
    /// usable media box.
    pub page_format: PageFormat,
    pub opacity: f32,
    pub border: bool,
    pub border_width: u32,
    pub background: bool,
    pub background_color: Color,
    pub position_name: Anchor,
    /// Explicit top-left corner in mm; replaces the anchor point.
    pub position: Option<Point>,
    pub position_offset: Point,
}

impl Default for StampLayout {
    fn default() -> Self {
        Self {
            page_format: PageFormat::A4,
            opacity: 1.0,
            border: false,
            border_width: 1,
            background: false,
            background_color: Color::WHITE,
            position_name: Anchor::TopLeft,
            position: None,
            position_offset: Point::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextStamp {
    pub text: String,
    /// Standard-14 font family or name, e.g. `Helvetica`, `Times-Bold`.
    pub font: String,
    /// Font size in points.
    pub size: f32,
    pub color: Color,
    pub over: bool,
    pub layout: StampLayout,
}

impl TextStamp {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font: "Helvetica".into(),
            size: 16.0,
            color: Color::RED,
            over: false,
            layout: StampLayout::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageStamp {
    pub image: StampSource,
    /// Counter-clockwise rotation in degrees.
    pub angle: i32,
    /// Points per image pixel.
    pub scale: f32,
    pub over: bool,
    pub layout: StampLayout,
}

impl ImageStamp {
    pub fn new(image: StampSource) -> Self {
        Self {
            image,
            angle: 0,
            scale: 1.0,
            over: false,
            layout: StampLayout::default(),
        }
    }
}

/// An existing PDF whose first page is used verbatim.
#[derive(Debug, Clone)]
pub struct PdfStamp {
    pub stamp: StampSource,
    pub over: bool,
}

#[derive(Debug, Clone)]
pub enum StampSpec {
    Text(TextStamp),
    Image(ImageStamp),
    Pdf(PdfStamp),
}

impl StampSpec {
    /// Draw over (`true`) or under the existing page content.
    pub fn over(&self) -> bool {
        match self {
            StampSpec::Text(t) => t.over,
            StampSpec::Image(i) => i.over,
            StampSpec::Pdf(p) => p.over,
        }
    }

    fn layout(&self) -> Option<&StampLayout> {
        match self {
            StampSpec::Text(t) => Some(&t.layout),
            StampSpec::Image(i) => Some(&i.layout),
            StampSpec::Pdf(_) => None,
        }
    }

    /// Reject stamps that have nothing to draw or cannot be sized.
    pub fn validate(&self) -> Result<(), StampError> {
        match self {
            StampSpec::Text(t) if t.text.trim().is_empty() => {
                Err(StampError::MissingStampContent("text stamp has no text".into()))
            }
            StampSpec::Text(t) if !t.size.is_finite() || t.size <= 0.0 => {
                Err(StampError::InvalidParameter(format!(
                    "text size must be positive, got {}",
                    t.size
                )))
            }
            StampSpec::Image(i) if !i.scale.is_finite() || i.scale <= 0.0 => {
                Err(StampError::InvalidParameter(format!(
                    "image scale must be positive, got {}",
                    i.scale
                )))
            }
            _ => Ok(()),
        }
    }

    /// A copy with every external source loaded into memory.
    pub async fn fetch_sources(&self, fetcher: &Fetcher) -> Result<StampSpec, FetchError> {
        Ok(match self {
            StampSpec::Text(t) => StampSpec::Text(t.clone()),
            StampSpec::Image(i) => StampSpec::Image(ImageStamp {
                image: i.image.fetch(fetcher).await?,
                ..i.clone()
            }),
            StampSpec::Pdf(p) => StampSpec::Pdf(PdfStamp {
                stamp: p.stamp.fetch(fetcher).await?,
                over: p.over,
            }),
        })
    }

    /// Render a one-page overlay for a page of the given size.
    pub fn render(&self, page: &PageGeometry) -> Result<Document, StampError> {
        match self {
            StampSpec::Text(t) => render_text(t, page),
            StampSpec::Image(i) => {
                let bytes = i.image.bytes()?;
                let image = image::load_from_memory(&bytes)
                    .map_err(|e| StampError::Render(format!("cannot decode stamp image: {e}")))?;
                render_image(i, &image, page)
            }
            StampSpec::Pdf(p) => {
                let bytes = p.stamp.bytes()?;
                pdf::load(&bytes, "stamp").map_err(|e| StampError::Render(e.to_string()))
            }
        }
    }

    /// Render the stamp on its own, on the layout's page format.
    pub fn to_pdf(&self) -> Result<Vec<u8>, StampError> {
        let page = self
            .layout()
            .map(|l| l.page_format.geometry())
            .unwrap_or_else(|| PageFormat::A4.geometry());
        let mut doc = self.render(&page)?;
        pdf::save(&mut doc, "stamp").map_err(|e| StampError::Render(e.to_string()))
    }

    fn cache_key(&self, page: &PageGeometry) -> (i64, i64) {
        match self {
            StampSpec::Pdf(_) => (0, 0),
            _ => page.cache_key(),
        }
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Align {
    Start,
    Center,
    End,
}

/// How a box of the given size sits on its anchor point.
fn alignment(anchor: Anchor) -> (Align, Align) {
    match anchor {
        Anchor::TopLeft => (Align::Start, Align::Start),
        Anchor::TopRight => (Align::End, Align::Start),
        Anchor::BottomLeft => (Align::Start, Align::End),
        Anchor::BottomRight => (Align::End, Align::End),
        Anchor::Top => (Align::Center, Align::Start),
        Anchor::Bottom => (Align::Center, Align::End),
        Anchor::Left => (Align::Start, Align::Center),
        Anchor::Right => (Align::End, Align::Center),
        Anchor::Center => (Align::Center, Align::Center),
    }
}

/// Lower-left corner, in points, of a `w` x `h` box placed per `layout`.
///
/// An explicit position is the box's top-left corner. Anchor positions pin
/// the box's matching edge, so right and bottom anchors keep the box inside
/// the page.
fn place_box(layout: &StampLayout, page: &PageGeometry, w: f32, h: f32) -> (f32, f32) {
    let point = get_position(page, layout.position, layout.position_name, layout.position_offset);
    let (px, py) = page.to_pdf_point(point);
    let (ha, va) = if layout.position.is_some() {
        (Align::Start, Align::Start)
    } else {
        alignment(layout.position_name)
    };
    let x = match ha {
        Align::Start => px,
        Align::Center => px - w / 2.0,
        Align::End => px - w,
    };
    let y = match va {
        Align::Start => py - h,
        Align::Center => py - h / 2.0,
        Align::End => py,
    };
    (x, y)
}

fn rgb_operands(color: Color) -> Vec<Object> {
    color.components().iter().map(|&c| c.into()).collect()
}

fn rect_operands(x: f32, y: f32, w: f32, h: f32) -> Vec<Object> {
    vec![x.into(), y.into(), w.into(), h.into()]
}

/// Opacity graphics state, background and border shared by generated stamps.
fn decorations(
    layout: &StampLayout,
    resources: &mut Dictionary,
    (x, y, w, h): (f32, f32, f32, f32),
) -> Vec<Operation> {
    let mut ops = Vec::new();
    let opacity = layout.opacity.clamp(0.0, 1.0);
    if opacity < 1.0 {
        resources.set(
            "ExtGState",
            dictionary! {
                "GS0" => dictionary! { "Type" => "ExtGState", "ca" => opacity, "CA" => opacity },
            },
        );
        ops.push(Operation::new("gs", vec!["GS0".into()]));
    }
    if layout.background {
        ops.push(Operation::new("rg", rgb_operands(layout.background_color)));
        ops.push(Operation::new("re", rect_operands(x, y, w, h)));
        ops.push(Operation::new("f", vec![]));
    }
    if layout.border {
        ops.push(Operation::new("RG", rgb_operands(Color::BLACK)));
        ops.push(Operation::new("w", vec![(layout.border_width as f32).into()]));
        ops.push(Operation::new("re", rect_operands(x, y, w, h)));
        ops.push(Operation::new("S", vec![]));
    }
    ops
}

/// Map a font name onto one of the standard 14 PDF fonts.
pub fn standard_font(name: &str) -> Option<&'static str> {
    let key: String = name
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .collect();
    Some(match key.as_str() {
        "helvetica" | "arial" | "sans" | "sansserif" => "Helvetica",
        "helveticabold" | "arialbold" => "Helvetica-Bold",
        "helveticaoblique" | "helveticaitalic" | "arialitalic" => "Helvetica-Oblique",
        "helveticaboldoblique" | "helveticabolditalic" | "arialbolditalic" => {
            "Helvetica-BoldOblique"
        }
        "times" | "timesroman" | "serif" => "Times-Roman",
        "timesbold" => "Times-Bold",
        "timesitalic" => "Times-Italic",
        "timesbolditalic" => "Times-BoldItalic",
        "courier" | "mono" | "monospace" => "Courier",
        "courierbold" => "Courier-Bold",
        "courieroblique" | "courieritalic" => "Courier-Oblique",
        "courierboldoblique" | "courierbolditalic" => "Courier-BoldOblique",
        "symbol" => "Symbol",
        "zapfdingbats" => "ZapfDingbats",
        _ => return None,
    })
}

/// Average glyph advance as a fraction of the font size.
fn average_advance(base_font: &str) -> f32 {
    if base_font.starts_with("Courier") {
        0.6
    } else if base_font.starts_with("Times") {
        0.45
    } else if base_font.contains("Bold") {
        0.55
    } else {
        0.5
    }
}

fn render_text(stamp: &TextStamp, page: &PageGeometry) -> Result<Document, StampError> {
    if stamp.text.trim().is_empty() {
        return Err(StampError::MissingStampContent("text stamp has no text".into()));
    }
    let base_font = standard_font(&stamp.font).unwrap_or_else(|| {
        warn!("Unknown font '{}', using Helvetica", stamp.font);
        "Helvetica"
    });

    let margin = mm_to_pt(CELL_MARGIN_MM);
    let text_w = stamp.text.chars().count() as f32 * stamp.size * average_advance(base_font);
    let (w, h) = (text_w + 2.0 * margin, stamp.size * 1.25);
    let (x, y) = place_box(&stamp.layout, page, w, h);

    let mut doc = Document::with_version("1.5");
    let mut font = dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
    };
    if !matches!(base_font, "Symbol" | "ZapfDingbats") {
        font.set("Encoding", "WinAnsiEncoding");
    }
    let font_id = doc.add_object(font);
    let mut resources = dictionary! { "Font" => dictionary! { "F1" => font_id } };

    let mut ops = vec![Operation::new("q", vec![])];
    ops.extend(decorations(&stamp.layout, &mut resources, (x, y, w, h)));
    let baseline = y + h / 2.0 - 0.3 * stamp.size;
    ops.extend([
        Operation::new("rg", rgb_operands(stamp.color)),
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), stamp.size.into()]),
        Operation::new("Td", vec![(x + margin).into(), baseline.into()]),
        Operation::new(
            "Tj",
            vec![Object::String(pdf::win_ansi_bytes(&stamp.text), lopdf::StringFormat::Literal)],
        ),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]);

    let content = pdf::encode_operations(ops).map_err(|e| StampError::Render(e.to_string()))?;
    pdf::single_page_document(&mut doc, page.width_pt(), page.height_pt(), resources, content);
    Ok(doc)
}

fn render_image(
    stamp: &ImageStamp,
    image: &DynamicImage,
    page: &PageGeometry,
) -> Result<Document, StampError> {
    let w = image.width() as f32 * stamp.scale;
    let h = image.height() as f32 * stamp.scale;
    let (x, y) = place_box(&stamp.layout, page, w, h);

    let mut doc = Document::with_version("1.5");
    let image_id = pdf::add_image(&mut doc, image).map_err(|e| StampError::Render(e.to_string()))?;
    let mut resources = dictionary! { "XObject" => dictionary! { "Im0" => image_id } };

    let mut ops = vec![Operation::new("q", vec![])];
    ops.extend(decorations(&stamp.layout, &mut resources, (x, y, w, h)));
    ops.push(Operation::new("cm", rotated_image_matrix(x, y, w, h, stamp.angle)));
    ops.push(Operation::new("Do", vec!["Im0".into()]));
    ops.push(Operation::new("Q", vec![]));

    let content = pdf::encode_operations(ops).map_err(|e| StampError::Render(e.to_string()))?;
    pdf::single_page_document(&mut doc, page.width_pt(), page.height_pt(), resources, content);
    Ok(doc)
}

/// `cm` operands mapping the unit square onto the `w` x `h` box at `(x, y)`,
/// rotated by `angle` degrees counter-clockwise around the box centre.
fn rotated_image_matrix(x: f32, y: f32, w: f32, h: f32, angle: i32) -> Vec<Object> {
    let theta = (angle as f32).to_radians();
    let (sin, cos) = theta.sin_cos();
    let (cx, cy) = (x + w / 2.0, y + h / 2.0);
    let e = cx - (w / 2.0) * cos + (h / 2.0) * sin;
    let f = cy - (w / 2.0) * sin - (h / 2.0) * cos;
    vec![
        (w * cos).into(),
        (w * sin).into(),
        (-h * sin).into(),
        (h * cos).into(),
        e.into(),
        f.into(),
    ]
}

// ── Compositing ───────────────────────────────────────────────────────────

/// Stamp the pages of one serialised document.
///
/// `pages` holds 0-based page indices; `None` stamps every page.
pub fn stamp_document(
    bytes: &[u8],
    filename: &str,
    spec: &StampSpec,
    pages: Option<&BTreeSet<usize>>,
) -> Result<Vec<u8>, DocstampError> {
    let mut doc = pdf::load(bytes, filename)?;
    let mut forms: HashMap<(i64, i64), ObjectId> = HashMap::new();
    let mut stamped = 0usize;

    for (index, (_, page_id)) in doc.get_pages().into_iter().enumerate() {
        if pages.is_some_and(|filter| !filter.contains(&index)) {
            continue;
        }
        let (mut geometry, (llx, lly)) = pdf::page_geometry(&doc, page_id);
        if !(geometry.width_mm > 0.0 && geometry.height_mm > 0.0) {
            geometry = spec
                .layout()
                .map(|l| l.page_format.geometry())
                .unwrap_or_else(|| PageFormat::A4.geometry());
        }

        let key = spec.cache_key(&geometry);
        let form_id = match forms.get(&key) {
            Some(&id) => id,
            None => {
                let overlay = spec.render(&geometry)?;
                let id = pdf::import_page_as_form(&mut doc, overlay).map_err(StampError::Render)?;
                debug!("{}: rendered overlay for {:?}", filename, key);
                forms.insert(key, id);
                id
            }
        };

        let name = format!("DocStamp{}", form_id.0);
        let draw = format!("q 1 0 0 1 {llx} {lly} cm /{name} Do Q\n").into_bytes();
        let (prefix, suffix) = if spec.over() {
            (b"q\n".to_vec(), [b"Q\n".as_slice(), &draw].concat())
        } else {
            (draw, Vec::new())
        };
        pdf::add_page_xobject(&mut doc, page_id, &name, form_id)
            .and_then(|_| pdf::wrap_page_content(&mut doc, page_id, prefix, suffix))
            .map_err(|e| AssemblyError::InvalidPdf {
                filename: filename.to_string(),
                detail: e.to_string(),
            })?;
        stamped += 1;
    }

    info!("{}: stamped {} pages", filename, stamped);
    Ok(pdf::save(&mut doc, filename)?)
}

/// Stamp every document and write one result per document.
///
/// `pages`, when given, holds one 0-based page filter per document.
/// `base_name` defaults to `stamped_<uuid>.pdf`.
pub fn stamp_all(
    docs: &[ResolvedDocument],
    spec: &StampSpec,
    outputs: Vec<OutputSpec>,
    pages: Option<&[BTreeSet<usize>]>,
    base_name: Option<&str>,
) -> Result<Vec<ResultDescriptor>, DocstampError> {
    if let Some(filters) = pages {
        if filters.len() != docs.len() {
            return Err(StampError::InvalidPageFilterLength {
                documents: docs.len(),
                filters: filters.len(),
            }
            .into());
        }
    }
    spec.validate()?;

    let base = base_name
        .map(str::to_string)
        .unwrap_or_else(|| generated_name("stamped"));
    let plan = plan_outputs(docs.len(), outputs, &base)?;

    docs.iter()
        .zip(plan)
        .enumerate()
        .map(|(i, (doc, (output, name)))| -> Result<ResultDescriptor, DocstampError> {
            let bytes = doc.pdf_source.bytes().map_err(|e| AssemblyError::InvalidPdf {
                filename: doc.filename.clone(),
                detail: e.to_string(),
            })?;
            let filter = pages.map(|p| &p[i]);
            let stamped = stamp_document(&bytes, &doc.filename, spec, filter)?;
            Ok(materialize(&stamped, output, name)?)
        })
        .collect()
}
