//! Normalisation: make every fetched input PDF-compatible.
//!
//! PDFs pass through untouched. Anything `image` can decode becomes a
//! one-page PDF. Everything else is kept as-is with `normalized = false`
//! and left for the PDF engine to reject.
//!
//! Runs synchronously; callers on the async side wrap it in
//! `spawn_blocking` since decoding and deflating large scans is CPU-bound.

use crate::document::{PdfSource, RawFile, ResolvedDocument};
use crate::geometry::{dpi_pixel_box, effective_dpi};
use crate::pdf;
use image::DynamicImage;
use lopdf::content::Operation;
use lopdf::{dictionary, Document};
use std::sync::Arc;
use tracing::{debug, warn};

/// A4 in PDF points.
pub const A4_WIDTH_PT: f32 = 595.28;
pub const A4_HEIGHT_PT: f32 = 841.89;

/// `true` when the bytes (or failing that, the name) say PDF.
pub fn is_pdf(filename: &str, content: &[u8]) -> bool {
    content.starts_with(b"%PDF") || filename.to_ascii_lowercase().ends_with(".pdf")
}

/// Normalise one fetched file.
pub fn normalize(raw: RawFile, dpi: u32, scale: f32) -> ResolvedDocument {
    if is_pdf(&raw.filename, &raw.content) {
        debug!("{}: already a PDF", raw.filename);
        return passthrough(raw, true);
    }

    match image::load_from_memory(&raw.content) {
        Ok(img) => {
            let img = Arc::new(img);
            match image_to_pdf(&img, dpi, scale) {
                Ok(bytes) => ResolvedDocument {
                    filename: raw.filename,
                    source: raw.source,
                    original_content: Some(raw.content),
                    path: raw.path,
                    decoded_image: Some(img),
                    pdf_source: PdfSource::Bytes(bytes.into()),
                    scale,
                    rotation_degrees: 0,
                    normalized: true,
                },
                Err(e) => {
                    warn!("{}: image conversion failed, passing through: {}", raw.filename, e);
                    passthrough(raw, false)
                }
            }
        }
        Err(e) => {
            warn!("{}: not a PDF and not a decodable image ({}), passing through", raw.filename, e);
            passthrough(raw, false)
        }
    }
}

/// Normalise an image the caller already decoded.
pub fn normalize_image(
    filename: String,
    image: Arc<DynamicImage>,
    dpi: u32,
    scale: f32,
) -> Result<ResolvedDocument, String> {
    let bytes = image_to_pdf(&image, dpi, scale)?;
    Ok(ResolvedDocument {
        filename,
        source: None,
        original_content: None,
        path: None,
        decoded_image: Some(image),
        pdf_source: PdfSource::Bytes(bytes.into()),
        scale,
        rotation_degrees: 0,
        normalized: true,
    })
}

fn passthrough(raw: RawFile, normalized: bool) -> ResolvedDocument {
    ResolvedDocument {
        filename: raw.filename,
        source: raw.source,
        original_content: Some(Arc::clone(&raw.content)),
        path: raw.path,
        decoded_image: None,
        pdf_source: PdfSource::Bytes(raw.content),
        scale: 1.0,
        rotation_degrees: 0,
        normalized,
    }
}

/// Render `img` as a one-page PDF.
///
/// With `scale == 1.0` the image is contained in the A4 pixel box for `dpi`:
/// scaled up or down by `min(box_w / w, box_h / h)` with its aspect ratio
/// kept, drawn at `72 / dpi` points per pixel and centred on an A4 page.
/// Oversized images are also resampled down so the embedded stream stays
/// small. Any other scale sizes the page to exactly `pixels * scale` points.
pub fn image_to_pdf(img: &DynamicImage, dpi: u32, scale: f32) -> Result<Vec<u8>, String> {
    if img.width() == 0 || img.height() == 0 {
        return Err("image has zero size".into());
    }

    let (fitted, page_w, page_h, draw_w, draw_h) = if (scale - 1.0).abs() > f32::EPSILON {
        let w = img.width() as f32 * scale;
        let h = img.height() as f32 * scale;
        (None, w, h, w, h)
    } else {
        let dpi = effective_dpi(dpi);
        let (box_w, box_h) = dpi_pixel_box(dpi);
        let k = fit_factor(img.width(), img.height(), box_w, box_h);
        let fitted = (k < 1.0).then(|| img.thumbnail(box_w, box_h));
        let pt_per_px = 72.0 / dpi as f32;
        (
            fitted,
            A4_WIDTH_PT,
            A4_HEIGHT_PT,
            img.width() as f32 * k * pt_per_px,
            img.height() as f32 * k * pt_per_px,
        )
    };
    let source = fitted.as_ref().unwrap_or(img);

    let mut doc = Document::with_version("1.5");
    let image_id = pdf::add_image(&mut doc, source).map_err(|e| e.to_string())?;
    let x = (page_w - draw_w) / 2.0;
    let y = (page_h - draw_h) / 2.0;
    let content = pdf::encode_operations(vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                draw_w.into(),
                0.into(),
                0.into(),
                draw_h.into(),
                x.into(),
                y.into(),
            ],
        ),
        Operation::new("Do", vec!["Im0".into()]),
        Operation::new("Q", vec![]),
    ])
    .map_err(|e| e.to_string())?;

    pdf::single_page_document(
        &mut doc,
        page_w,
        page_h,
        dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
        content,
    );
    pdf::save(&mut doc, "<image>").map_err(|e| e.to_string())
}

/// Factor that contains a `w` x `h` image in a `box_w` x `box_h` box.
fn fit_factor(w: u32, h: u32, box_w: u32, box_h: u32) -> f32 {
    (box_w as f32 / w as f32).min(box_h as f32 / h as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([200, 10, 10])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn raw(name: &str, content: Vec<u8>) -> RawFile {
        RawFile {
            filename: name.into(),
            source: None,
            path: None,
            content: content.into(),
        }
    }

    fn first_page_size(bytes: &[u8]) -> (f32, f32) {
        let doc = pdf::load(bytes, "t").unwrap();
        let (_, page) = doc.get_pages().into_iter().next().unwrap();
        let [llx, lly, urx, ury] = pdf::media_box(&doc, page);
        (urx - llx, ury - lly)
    }

    /// Width and height of the image placement matrix on the first page.
    fn drawn_size(bytes: &[u8]) -> (f32, f32) {
        let doc = pdf::load(bytes, "t").unwrap();
        let (_, page) = doc.get_pages().into_iter().next().unwrap();
        let content =
            lopdf::content::Content::decode(&doc.get_page_content(page).unwrap()).unwrap();
        let cm = content
            .operations
            .iter()
            .find(|op| op.operator == "cm")
            .expect("image placement");
        (
            cm.operands[0].as_float().unwrap(),
            cm.operands[3].as_float().unwrap(),
        )
    }

    #[test]
    fn pdf_passes_through_unchanged() {
        let bytes = pdf::testutil::sample_pdf(1, 100.0, 100.0, "p");
        let doc = normalize(raw("a.pdf", bytes.clone()), 150, 1.0);
        assert!(doc.normalized);
        assert!(doc.decoded_image.is_none());
        assert_eq!(&*doc.pdf_source.bytes().unwrap(), bytes.as_slice());
    }

    #[test]
    fn image_becomes_a4_page() {
        let doc = normalize(raw("scan.png", png_bytes(300, 200)), 150, 1.0);
        assert!(doc.normalized);
        assert!(doc.decoded_image.is_some());
        let (w, h) = first_page_size(&doc.pdf_source.bytes().unwrap());
        assert!((w - A4_WIDTH_PT).abs() < 0.01, "width {w}");
        assert!((h - A4_HEIGHT_PT).abs() < 0.01, "height {h}");
    }

    #[test]
    fn small_image_is_enlarged_to_fill_the_page_width() {
        // 100x50 at 150 DPI: the A4 box is 1240 px wide, so the width binds.
        let doc = normalize(raw("small.png", png_bytes(100, 50)), 150, 1.0);
        let (w, h) = drawn_size(&doc.pdf_source.bytes().unwrap());
        assert!((w - 1240.0 * 72.0 / 150.0).abs() < 0.5, "width {w}");
        assert!((w / h - 2.0).abs() < 0.01, "aspect {}", w / h);
    }

    #[test]
    fn tall_image_is_contained_by_the_page_height() {
        let doc = normalize(raw("tall.png", png_bytes(50, 400)), 150, 1.0);
        let (w, h) = drawn_size(&doc.pdf_source.bytes().unwrap());
        let (_, box_h) = dpi_pixel_box(150);
        assert!((h - box_h as f32 * 72.0 / 150.0).abs() < 0.5, "height {h}");
        assert!(h <= A4_HEIGHT_PT + 0.1);
        assert!((h / w - 8.0).abs() < 0.01);
    }

    #[test]
    fn large_image_is_shrunk_into_the_page() {
        let doc = normalize(raw("big.png", png_bytes(4000, 1000)), 150, 1.0);
        let (w, h) = drawn_size(&doc.pdf_source.bytes().unwrap());
        assert!(w <= A4_WIDTH_PT + 0.01, "width {w}");
        assert!((w / h - 4.0).abs() < 0.05);
    }

    #[test]
    fn explicit_scale_draws_image_over_whole_page() {
        let doc = normalize(raw("scan.png", png_bytes(100, 50)), 150, 2.0);
        let (w, h) = drawn_size(&doc.pdf_source.bytes().unwrap());
        assert!((w - 200.0).abs() < 0.01);
        assert!((h - 100.0).abs() < 0.01);
    }

    #[test]
    fn explicit_scale_sizes_page_to_pixels() {
        let doc = normalize(raw("scan.png", png_bytes(100, 50)), 150, 2.0);
        let (w, h) = first_page_size(&doc.pdf_source.bytes().unwrap());
        assert!((w - 200.0).abs() < 0.01);
        assert!((h - 100.0).abs() < 0.01);
        assert_eq!(doc.scale, 2.0);
    }

    #[test]
    fn undecodable_input_is_passed_through_unnormalized() {
        let doc = normalize(raw("notes.txt", b"hello".to_vec()), 150, 1.0);
        assert!(!doc.normalized);
        assert_eq!(&*doc.pdf_source.bytes().unwrap(), b"hello");
    }

    #[test]
    fn pdf_detection_uses_magic_or_extension() {
        assert!(is_pdf("x.bin", b"%PDF-1.7"));
        assert!(is_pdf("X.PDF", b""));
        assert!(!is_pdf("x.png", b"\x89PNG"));
    }
}
