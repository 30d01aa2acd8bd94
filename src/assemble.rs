//! Document assembly: concatenate resolved documents into one PDF.
//!
//! Every source is parsed on its own, has its objects shifted past the ids
//! already used by the output, and has its pages re-parented under a single
//! fresh page tree. Source catalogs, page trees and outlines are dropped;
//! a new outline (one entry per source) is built when names are supplied.

use crate::document::ResolvedDocument;
use crate::error::AssemblyError;
use crate::pdf;
use lopdf::{dictionary, Document, Object, ObjectId};
use std::collections::HashSet;
use tracing::{debug, info};

/// Inheritable page attributes copied onto each page before its ancestors
/// are discarded.
const INHERITED_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Merge `docs` in order.
///
/// With `outline_names` of the same length as `docs`, one top-level outline
/// entry per source points at its first page. Any other length produces no
/// outline.
pub fn merge(
    docs: &[ResolvedDocument],
    outline_names: Option<&[String]>,
) -> Result<Vec<u8>, AssemblyError> {
    if docs.is_empty() {
        return Err(AssemblyError::Empty);
    }
    let names = match outline_names {
        Some(names) if names.len() == docs.len() => Some(names),
        Some(names) => {
            debug!(
                "Outline has {} names for {} documents; merging without outline",
                names.len(),
                docs.len()
            );
            None
        }
        None => None,
    };

    let mut out = Document::with_version("1.5");
    let pages_id = out.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    let mut outline_entries: Vec<(String, ObjectId)> = Vec::new();
    let mut form = FormFields::default();

    for (index, doc) in docs.iter().enumerate() {
        let bytes = doc
            .pdf_source
            .bytes()
            .map_err(|e| AssemblyError::InvalidPdf {
                filename: doc.filename.clone(),
                detail: e.to_string(),
            })?;
        let mut source = pdf::load(&bytes, &doc.filename)?;

        let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();
        flatten_inherited(&mut source, &page_ids);
        let (field_ids, default_resources) = form_fields(&source);

        let offset = pdf::import_objects_where(&mut out, source, |obj| {
            !matches!(
                pdf::type_name(obj),
                Some(b"Catalog") | Some(b"Pages") | Some(b"Outlines")
            )
        });
        let shift = |id: ObjectId| (id.0 + offset, id.1);

        for &page in &page_ids {
            if let Ok(dict) = out.get_dictionary_mut(shift(page)) {
                dict.set("Parent", pages_id);
            }
            kids.push(shift(page).into());
        }

        match (names, page_ids.first()) {
            (Some(names), Some(&first)) => {
                outline_entries.push((names[index].clone(), shift(first)))
            }
            (Some(_), None) => debug!("{} has no pages; no outline entry", doc.filename),
            _ => {}
        }

        form.append(&mut out, field_ids.into_iter().map(shift).collect(), index);
        if form.default_resources.is_none() {
            form.default_resources = default_resources.map(|dr| pdf::remap_refs(dr, offset));
        }
        debug!("Appended {} ({} pages)", doc.filename, page_ids.len());
    }

    let page_count = kids.len();
    out.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if let Some(outlines_id) = build_outline(&mut out, &outline_entries) {
        catalog.set("Outlines", outlines_id);
        catalog.set("PageMode", "UseOutlines");
    }
    if !form.fields.is_empty() {
        let mut acroform = dictionary! {
            "Fields" => form.fields.iter().map(|&id| id.into()).collect::<Vec<Object>>(),
            "NeedAppearances" => true,
        };
        if let Some(dr) = form.default_resources.take() {
            acroform.set("DR", dr);
        }
        catalog.set("AcroForm", acroform);
    }
    let catalog_id = out.add_object(catalog);
    out.trailer.set("Root", catalog_id);

    info!(
        "Merged {} documents into {} pages ({} outline entries)",
        docs.len(),
        page_count,
        outline_entries.len()
    );
    pdf::save(&mut out, "merged document")
}

/// Copy inheritable attributes from ancestors onto each page.
fn flatten_inherited(doc: &mut Document, page_ids: &[ObjectId]) {
    for &page in page_ids {
        for key in INHERITED_KEYS {
            let has_own = doc
                .get_dictionary(page)
                .map(|d| d.has(key))
                .unwrap_or(true);
            if has_own {
                continue;
            }
            if let Some(value) = pdf::inherited_attribute(doc, page, key) {
                if let Ok(dict) = doc.get_dictionary_mut(page) {
                    dict.set(key.to_vec(), value);
                }
            }
        }
    }
}

/// Top-level form field references and default resources of a document.
fn form_fields(doc: &Document) -> (Vec<ObjectId>, Option<Object>) {
    let Ok(catalog) = doc.catalog() else {
        return (Vec::new(), None);
    };
    let Some(acroform) = catalog
        .get(b"AcroForm")
        .ok()
        .and_then(|obj| pdf::resolve(doc, obj).as_dict().ok())
    else {
        return (Vec::new(), None);
    };
    let fields = match acroform.get(b"Fields").map(|obj| pdf::resolve(doc, obj)) {
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_reference().ok())
            .collect(),
        _ => Vec::new(),
    };
    (fields, acroform.get(b"DR").ok().cloned())
}

/// Form fields collected across sources, with collision renaming.
#[derive(Default)]
struct FormFields {
    fields: Vec<ObjectId>,
    names: HashSet<String>,
    default_resources: Option<Object>,
}

impl FormFields {
    /// Add the top-level fields of source `index`. A field whose name is
    /// already taken is renamed to `<name>_<index>`.
    fn append(&mut self, doc: &mut Document, fields: Vec<ObjectId>, index: usize) {
        for id in fields {
            let Ok(dict) = doc.get_dictionary_mut(id) else {
                continue;
            };
            let name = match dict.get(b"T") {
                Ok(Object::String(bytes, _)) => Some(pdf::decode_text_string(bytes)),
                _ => None,
            };
            if let Some(name) = name {
                let name = if self.names.contains(&name) {
                    let renamed = format!("{name}_{index}");
                    debug!("Form field '{}' already present; renamed to '{}'", name, renamed);
                    dict.set("T", pdf::text_string(&renamed));
                    renamed
                } else {
                    name
                };
                self.names.insert(name);
            }
            self.fields.push(id);
        }
    }
}

/// Build a flat outline; returns the `/Outlines` dictionary id.
fn build_outline(doc: &mut Document, entries: &[(String, ObjectId)]) -> Option<ObjectId> {
    if entries.is_empty() {
        return None;
    }
    let outlines_id = doc.new_object_id();
    let item_ids: Vec<ObjectId> = entries.iter().map(|_| doc.new_object_id()).collect();

    for (i, (title, page)) in entries.iter().enumerate() {
        let mut item = dictionary! {
            "Title" => pdf::text_string(title),
            "Parent" => outlines_id,
            "Dest" => vec![Object::Reference(*page), "Fit".into()],
        };
        if i > 0 {
            item.set("Prev", item_ids[i - 1]);
        }
        if let Some(&next) = item_ids.get(i + 1) {
            item.set("Next", next);
        }
        doc.objects.insert(item_ids[i], Object::Dictionary(item));
    }

    doc.objects.insert(
        outlines_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => item_ids[0],
            "Last" => item_ids[item_ids.len() - 1],
            "Count" => item_ids.len() as i64,
        }),
    );
    Some(outlines_id)
}
