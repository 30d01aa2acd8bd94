//! Low-level PDF object helpers on top of `lopdf`.
//!
//! The merge and stamp stages never touch raw object ids directly; they go
//! through the functions here to import one document's objects into another,
//! look up inherited page attributes, and splice content streams.

use crate::error::AssemblyError;
use crate::geometry::PageGeometry;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;

/// US Letter, used when a page has no media box anywhere in its ancestry.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Parent-chain walks stop here so a cyclic page tree cannot hang us.
const MAX_TREE_DEPTH: usize = 32;

/// Parse `bytes` into a document.
pub fn load(bytes: &[u8], filename: &str) -> Result<Document, AssemblyError> {
    Document::load_mem(bytes).map_err(|e| AssemblyError::InvalidPdf {
        filename: filename.to_string(),
        detail: e.to_string(),
    })
}

/// Drop unreachable objects, compress streams and serialise.
pub fn save(doc: &mut Document, target: &str) -> Result<Vec<u8>, AssemblyError> {
    doc.prune_objects();
    doc.compress();
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| AssemblyError::WriteFailure {
            target: target.to_string(),
            detail: e.to_string(),
        })?;
    Ok(buffer)
}

/// Number of pages in a serialised document.
pub fn page_count(bytes: &[u8]) -> Result<usize, AssemblyError> {
    Ok(load(bytes, "<buffer>")?.get_pages().len())
}

/// Recursively shift every reference inside `obj` by `offset`.
pub fn remap_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(arr) => {
            Object::Array(arr.into_iter().map(|o| remap_refs(o, offset)).collect())
        }
        Object::Dictionary(dict) => Object::Dictionary(remap_dict(dict, offset)),
        Object::Stream(mut stream) => {
            stream.dict = remap_dict(stream.dict, offset);
            Object::Stream(stream)
        }
        other => other,
    }
}

fn remap_dict(mut dict: Dictionary, offset: u32) -> Dictionary {
    for (_, value) in dict.iter_mut() {
        let taken = std::mem::replace(value, Object::Null);
        *value = remap_refs(taken, offset);
    }
    dict
}

/// Move every object of `source` into `dest` under fresh ids.
///
/// Returns the id offset applied; an id `(n, g)` of `source` is
/// `(n + offset, g)` in `dest` afterwards.
pub fn import_objects(dest: &mut Document, source: Document) -> u32 {
    import_objects_where(dest, source, |_| true)
}

/// Like [`import_objects`], skipping objects for which `keep` is false.
pub fn import_objects_where(
    dest: &mut Document,
    source: Document,
    keep: impl Fn(&Object) -> bool,
) -> u32 {
    let offset = dest.max_id;
    for (id, object) in source.objects {
        if keep(&object) {
            dest.objects
                .insert((id.0 + offset, id.1), remap_refs(object, offset));
        }
    }
    dest.max_id = dest.max_id.max(source.max_id + offset);
    offset
}

/// Follow references until a direct object is reached.
pub fn resolve<'a>(doc: &'a Document, mut obj: &'a Object) -> &'a Object {
    for _ in 0..MAX_TREE_DEPTH {
        match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(target) => obj = target,
                Err(_) => return obj,
            },
            _ => return obj,
        }
    }
    obj
}

/// `/Type` of a dictionary or stream object.
pub fn type_name(obj: &Object) -> Option<&[u8]> {
    let dict = match obj {
        Object::Dictionary(d) => d,
        Object::Stream(s) => &s.dict,
        _ => return None,
    };
    match dict.get(b"Type") {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        _ => None,
    }
}

/// Look up a page attribute, walking up `/Parent` for inheritable keys.
pub fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = Some(page_id);
    for _ in 0..MAX_TREE_DEPTH {
        let dict = doc.get_dictionary(current?).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        current = match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => Some(*parent),
            _ => None,
        };
    }
    None
}

/// Numeric value of an integer or real object.
pub fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// `[llx, lly, urx, ury]` of a page, inherited and normalised.
pub fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let Some(obj) = inherited_attribute(doc, page_id, b"MediaBox") else {
        return DEFAULT_MEDIA_BOX;
    };
    let Object::Array(items) = resolve(doc, &obj) else {
        return DEFAULT_MEDIA_BOX;
    };
    let values: Vec<f32> = items
        .iter()
        .filter_map(|o| number(resolve(doc, o)))
        .collect();
    match values.as_slice() {
        &[a, b, c, d] => [a.min(c), b.min(d), a.max(c), b.max(d)],
        _ => DEFAULT_MEDIA_BOX,
    }
}

/// Page size plus the lower-left corner of its media box.
pub fn page_geometry(doc: &Document, page_id: ObjectId) -> (PageGeometry, (f32, f32)) {
    let [llx, lly, urx, ury] = media_box(doc, page_id);
    (PageGeometry::from_points(urx - llx, ury - lly), (llx, lly))
}

/// Wrap a list of operations into an encoded content stream.
pub fn encode_operations(operations: Vec<Operation>) -> Result<Vec<u8>, lopdf::Error> {
    Content { operations }.encode()
}

/// A one-page document of the given size.
pub fn single_page_document(
    doc: &mut Document,
    width_pt: f32,
    height_pt: f32,
    resources: Dictionary,
    content: Vec<u8>,
) -> ObjectId {
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
        "Resources" => resources,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    page_id
}

/// Embed `image` as an RGB image XObject, with an `/SMask` when it carries
/// an alpha channel.
pub fn add_image(doc: &mut Document, image: &DynamicImage) -> Result<ObjectId, std::io::Error> {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let rgb = image.to_rgb8();

    let smask_id = if image.color().has_alpha() {
        let alpha: Vec<u8> = image.to_rgba8().pixels().map(|p| p[3]).collect();
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        )
        .with_compression(false);
        Some(doc.add_object(stream))
    } else {
        None
    };

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width,
        "Height" => height,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };
    if let Some(id) = smask_id {
        dict.set("SMask", id);
    }
    let stream = Stream::new(dict, deflate(rgb.as_raw())?).with_compression(false);
    Ok(doc.add_object(stream))
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Import the first page of `overlay` into `dest` as a Form XObject.
///
/// The form's bounding box is the overlay's media box, so drawing it with
/// an identity matrix reproduces the overlay page at the origin.
pub fn import_page_as_form(dest: &mut Document, overlay: Document) -> Result<ObjectId, String> {
    let (_, page_id) = overlay
        .get_pages()
        .into_iter()
        .next()
        .ok_or_else(|| "overlay document has no pages".to_string())?;

    let bbox = media_box(&overlay, page_id);
    let content = overlay
        .get_page_content(page_id)
        .map_err(|e| format!("cannot read overlay content: {e}"))?;
    let resources = inherited_attribute(&overlay, page_id, b"Resources")
        .unwrap_or_else(|| Object::Dictionary(Dictionary::new()));

    let offset = import_objects(dest, overlay);
    let form = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => bbox.iter().map(|&v| v.into()).collect::<Vec<Object>>(),
            "Resources" => remap_refs(resources, offset),
        },
        content,
    );
    Ok(dest.add_object(form))
}

/// Register `xobject` under `/Resources/XObject/<name>` of a page.
///
/// Inherited or shared resource dictionaries are copied onto the page so
/// that other pages are unaffected.
pub fn add_page_xobject(
    doc: &mut Document,
    page_id: ObjectId,
    name: &str,
    xobject: ObjectId,
) -> lopdf::Result<()> {
    let mut resources = inherited_attribute(doc, page_id, b"Resources")
        .and_then(|obj| resolve(doc, &obj).as_dict().ok().cloned())
        .unwrap_or_else(Dictionary::new);
    let mut xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|obj| resolve(doc, obj).as_dict().ok().cloned())
        .unwrap_or_else(Dictionary::new);
    xobjects.set(name.as_bytes().to_vec(), xobject);
    resources.set("XObject", xobjects);
    doc.get_dictionary_mut(page_id)?.set("Resources", resources);
    Ok(())
}

/// Surround the existing content of a page with two extra streams.
pub fn wrap_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    prefix: Vec<u8>,
    suffix: Vec<u8>,
) -> lopdf::Result<()> {
    let existing: Vec<Object> = match doc.get_dictionary(page_id)?.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let mut contents = Vec::with_capacity(existing.len() + 2);
    if !prefix.is_empty() {
        contents.push(doc.add_object(Stream::new(Dictionary::new(), prefix)).into());
    }
    contents.extend(existing);
    if !suffix.is_empty() {
        contents.push(doc.add_object(Stream::new(Dictionary::new(), suffix)).into());
    }
    doc.get_dictionary_mut(page_id)?.set("Contents", contents);
    Ok(())
}

/// A PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
pub fn text_string(s: &str) -> Object {
    if s.is_ascii() {
        Object::string_literal(s)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in s.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, else PDFDocEncoding as Latin-1).
pub fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Encode text for a standard-14 font with `WinAnsiEncoding`.
///
/// ASCII and U+00A0..U+00FF map one-to-one, the CP1252 punctuation block
/// lands in 0x80..0x9F, and anything else (C1 controls included) becomes `?`.
pub fn win_ansi_bytes(s: &str) -> Vec<u8> {
    s.chars().map(win_ansi_byte).collect()
}

fn win_ansi_byte(c: char) -> u8 {
    match u32::from(c) {
        code @ (0x00..=0x7F | 0xA0..=0xFF) => code as u8,
        _ => CP1252_HIGH
            .iter()
            .position(|&mapped| mapped == Some(c))
            .map_or(b'?', |i| 0x80 + i as u8),
    }
}

/// Characters at 0x80..0x9F in WinAnsiEncoding; `None` marks unused codes.
#[rustfmt::skip]
const CP1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None,              Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None,              Some('\u{017D}'), None,
    None,              Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None,              Some('\u{017E}'), Some('\u{0178}'),
];

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Build a document with `pages` pages of the given size, each showing
    /// `"<label> <n>"`.
    pub fn sample_pdf(pages: usize, width_pt: f32, height_pt: f32, label: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let mut kids = Vec::new();
        for n in 1..=pages {
            let content = encode_operations(vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 50.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("{label} {n}"))]),
                Operation::new("ET", vec![]),
            ])
            .unwrap();
            let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
                "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }
}
