//! Export reconciliation: annotations back into a flattened PDF.
//!
//! Split sub-box values are regrouped into their parent field's full
//! value, native field values are rewritten and locked, and everything
//! without a PDF-level backing (erasers, overlays, free text,
//! signatures) is painted directly into the page content streams. The
//! in-memory annotation model is never touched, so a failed export can
//! always be retried.

use std::collections::{BTreeMap, BTreeSet};

use log::warn;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use crate::acroform::{FF_READ_ONLY, field_ids_by_name};
use crate::annot::{Annotation, AnnotationKind, AnnotationModel, Color, FieldKind};
use crate::document::{FormDocument, resolve};
use crate::error::{FillError, Result};
use crate::signature::decode_for_embedding;

/// Resource name of the font used for painted text.
const OVERLAY_FONT: &str = "FsHelv";

/// Produces new PDF bytes from the original bytes plus the annotation
/// model snapshot.
///
/// Per-field write failures are logged and skipped so a renamed or
/// vanished field never loses the rest of the export; only document
/// load and final serialization are terminal.
pub fn export(pdf_bytes: &[u8], model: &AnnotationModel) -> Result<Vec<u8>> {
    let mut doc = FormDocument::load(pdf_bytes)?;
    let field_ids = field_ids_by_name(&doc);
    let page_ids: Vec<ObjectId> = doc.page_ids().to_vec();
    let page_heights: BTreeMap<u32, f64> = (1..=page_ids.len() as u32)
        .filter_map(|n| doc.page_height(n).ok().map(|h| (n, h)))
        .collect();

    let inner = doc.inner_mut();
    let mut wrote_fields = false;

    // 1. Regroup split sub-boxes and write each parent field once.
    for (group_id, value) in group_values(model) {
        match field_ids.get(&group_id) {
            Some(&field_id) => {
                if let Err(msg) = write_text_value(inner, field_id, &value, true) {
                    warn!("could not update grouped field {group_id:?}: {msg}");
                } else {
                    wrote_fields = true;
                }
            }
            None => warn!("grouped field {group_id:?} not found in form"),
        }
    }

    // 2. Ungrouped native fields.
    for ann in model.iter() {
        let Some(form) = ann.as_form_field() else {
            continue;
        };
        if !form.is_native || form.group.is_some() {
            continue;
        }
        let Some(&field_id) = field_ids.get(&form.name) else {
            warn!("field {:?} not found in form, skipped", form.name);
            continue;
        };
        let result = match form.kind {
            FieldKind::Checkbox | FieldKind::Radio => {
                write_checkbox_value(inner, field_id, form.checked)
            }
            _ => write_text_value(inner, field_id, &form.value, true),
        };
        match result {
            Ok(()) => wrote_fields = true,
            Err(msg) => warn!("could not update field {:?}: {msg}", form.name),
        }
    }

    if wrote_fields {
        set_need_appearances(inner);
    }

    // 3. Paint everything that has no PDF-level field backing.
    paint_overlays(inner, model, &page_ids, &page_heights)?;

    let mut out = Vec::new();
    inner
        .save_to(&mut out)
        .map_err(|e| FillError::Export(e.to_string()))?;
    Ok(out)
}

/// Reassembles one value per group: sub-box texts ordered by group
/// index, missing indices contributing empty strings.
fn group_values(model: &AnnotationModel) -> BTreeMap<String, String> {
    let mut groups: BTreeMap<String, BTreeMap<usize, String>> = BTreeMap::new();
    for ann in model.iter() {
        let Some(form) = ann.as_form_field() else {
            continue;
        };
        let Some(slot) = &form.group else { continue };
        groups
            .entry(slot.id.clone())
            .or_default()
            .insert(slot.index, form.value.clone());
    }
    groups
        .into_iter()
        .map(|(id, parts)| (id, parts.into_values().collect::<String>()))
        .collect()
}

fn field_dict_mut<'a>(
    doc: &'a mut Document,
    field_id: ObjectId,
) -> std::result::Result<&'a mut Dictionary, String> {
    doc.get_object_mut(field_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| format!("field dictionary missing: {e}"))
}

/// Writes a text value into a field and optionally locks it.
fn write_text_value(
    doc: &mut Document,
    field_id: ObjectId,
    value: &str,
    read_only: bool,
) -> std::result::Result<(), String> {
    let dict = field_dict_mut(doc, field_id)?;
    dict.set(
        "V",
        Object::String(value.as_bytes().to_vec(), lopdf::StringFormat::Literal),
    );
    // Stale appearance streams would show the old value.
    dict.remove(b"AP");
    if read_only {
        let flags = dict.get(b"Ff").and_then(|o| o.as_i64()).unwrap_or(0);
        dict.set("Ff", Object::Integer(flags | FF_READ_ONLY));
    }
    Ok(())
}

/// Writes a checkbox state, resolving the widget's on-state name from
/// its normal appearance dictionary.
fn write_checkbox_value(
    doc: &mut Document,
    field_id: ObjectId,
    checked: bool,
) -> std::result::Result<(), String> {
    let on_state = checkbox_on_state(doc, field_id);
    let state = if checked { on_state } else { "Off".to_string() };
    let dict = field_dict_mut(doc, field_id)?;
    dict.set("V", Object::Name(state.clone().into_bytes()));
    dict.set("AS", Object::Name(state.into_bytes()));
    Ok(())
}

/// First key of `/AP /N` that is not `Off`, defaulting to `Yes`.
fn checkbox_on_state(doc: &Document, field_id: ObjectId) -> String {
    let state = doc
        .get_object(field_id)
        .and_then(|o| o.as_dict())
        .ok()
        .and_then(|dict| dict.get(b"AP").ok().map(|ap| resolve(doc, ap)))
        .and_then(|ap| ap.as_dict().ok())
        .and_then(|ap| ap.get(b"N").ok().map(|n| resolve(doc, n)))
        .and_then(|n| n.as_dict().ok())
        .and_then(|n| {
            n.iter()
                .map(|(key, _)| String::from_utf8_lossy(key).into_owned())
                .find(|key| key != "Off")
        });
    state.unwrap_or_else(|| "Yes".to_string())
}

/// Flags the interactive form so viewers regenerate field appearances.
fn set_need_appearances(doc: &mut Document) {
    let acroform_ref = doc
        .catalog()
        .ok()
        .and_then(|cat| cat.get(b"AcroForm").ok())
        .and_then(|o| o.as_reference().ok());

    match acroform_ref {
        Some(id) => {
            if let Ok(dict) = doc.get_object_mut(id).and_then(|o| o.as_dict_mut()) {
                dict.set("NeedAppearances", Object::Boolean(true));
            }
        }
        None => {
            // Inline AcroForm dictionary on the catalog.
            let catalog_id = doc
                .trailer
                .get(b"Root")
                .and_then(|o| o.as_reference())
                .ok();
            if let Some(catalog_id) = catalog_id {
                if let Ok(catalog) = doc.get_object_mut(catalog_id).and_then(|o| o.as_dict_mut()) {
                    if let Ok(Object::Dictionary(acro)) = catalog.get_mut(b"AcroForm") {
                        acro.set("NeedAppearances", Object::Boolean(true));
                    }
                }
            }
        }
    }
}

/// Paints erasers, overlays, free text and signatures into per-page
/// content streams appended after the original content.
fn paint_overlays(
    doc: &mut Document,
    model: &AnnotationModel,
    page_ids: &[ObjectId],
    page_heights: &BTreeMap<u32, f64>,
) -> Result<()> {
    let mut page_ops: BTreeMap<u32, String> = BTreeMap::new();
    let mut text_pages: BTreeSet<u32> = BTreeSet::new();
    let mut sig_count = 0usize;

    for ann in model.iter() {
        let page_index = ann.page_number.saturating_sub(1) as usize;
        let (Some(&page_id), Some(&page_height)) = (
            page_ids.get(page_index),
            page_heights.get(&ann.page_number),
        ) else {
            warn!("page {} not found for annotation {:?}", ann.page_number, ann.id);
            continue;
        };

        let rect = ann.rect;
        // Stored geometry is top-left anchored; flip back to PDF space.
        let pdf_y = page_height - rect.y - rect.height;
        let ops = page_ops.entry(ann.page_number).or_default();

        match &ann.kind {
            AnnotationKind::FormField(form) if form.is_native => {
                // Already written as a form value above.
            }
            AnnotationKind::EraserPatch => {
                ops.push_str(&white_rect(rect.x, pdf_y, rect.width, rect.height));
            }
            AnnotationKind::FormField(form) => {
                // Synthesized editable overlay: cover the original glyph,
                // then draw the replacement text.
                ops.push_str(&white_rect(rect.x, pdf_y, rect.width, rect.height));
                if !form.value.is_empty() {
                    ops.push_str(&show_text(
                        &form.value,
                        rect.x,
                        pdf_y + form.font_size,
                        form.font_size,
                        form.color,
                    ));
                    text_pages.insert(ann.page_number);
                }
            }
            AnnotationKind::FreeText {
                text,
                font_size,
                color,
            } => {
                if !text.is_empty() {
                    ops.push_str(&show_text(
                        text,
                        rect.x + 4.0,
                        pdf_y + font_size + 4.0,
                        *font_size,
                        *color,
                    ));
                    text_pages.insert(ann.page_number);
                }
            }
            AnnotationKind::SignatureImage { data_uri } => match decode_for_embedding(data_uri) {
                Ok(img) => {
                    let name = format!("FsIm{sig_count}");
                    sig_count += 1;
                    embed_signature(doc, page_id, &name, &img)?;
                    ops.push_str(&format!(
                        "q {:.2} 0 0 {:.2} {:.2} {:.2} cm /{} Do Q\n",
                        rect.width, rect.height, rect.x, pdf_y, name
                    ));
                }
                Err(e) => warn!("signature {:?} could not be embedded: {e}", ann.id),
            },
        }
    }

    let font_id = if text_pages.is_empty() {
        None
    } else {
        Some(doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        }))
    };

    for (page_number, ops) in page_ops {
        if ops.is_empty() {
            continue;
        }
        let page_id = page_ids[page_number as usize - 1];
        if text_pages.contains(&page_number) {
            if let Some(font_id) = font_id {
                ensure_page_resource(doc, page_id, b"Font", OVERLAY_FONT, font_id)
                    .map_err(FillError::Export)?;
            }
        }
        doc.add_page_contents(page_id, ops.into_bytes())
            .map_err(|e| FillError::Export(format!("content append failed: {e}")))?;
    }
    Ok(())
}

fn white_rect(x: f64, y: f64, w: f64, h: f64) -> String {
    format!("q 1 1 1 rg {x:.2} {y:.2} {w:.2} {h:.2} re f Q\n")
}

fn show_text(text: &str, x: f64, baseline: f64, size: f64, color: Color) -> String {
    format!(
        "BT /{} {:.2} Tf {:.3} {:.3} {:.3} rg {:.2} {:.2} Td ({}) Tj ET\n",
        OVERLAY_FONT,
        size,
        color.r,
        color.g,
        color.b,
        x,
        baseline,
        escape_text(text)
    )
}

/// Escapes the delimiters of a PDF literal string.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Adds a signature as an RGB image XObject with an alpha soft mask and
/// registers it in the page's resources.
fn embed_signature(
    doc: &mut Document,
    page_id: ObjectId,
    name: &str,
    img: &crate::signature::DecodedImage,
) -> Result<()> {
    let smask = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => img.width as i64,
            "Height" => img.height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        img.alpha.clone(),
    );
    let smask_id = doc.add_object(smask);

    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => img.width as i64,
            "Height" => img.height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "SMask" => smask_id,
        },
        img.rgb.clone(),
    );
    let image_id = doc.add_object(image);

    ensure_page_resource(doc, page_id, b"XObject", name, image_id).map_err(FillError::Export)
}

/// Registers `name => target` under the given sub-dictionary
/// (`/Font` or `/XObject`) of a page's resources, materializing the
/// dictionaries as needed. Indirect resource dictionaries are followed;
/// an indirect sub-dictionary is replaced by an inline one.
fn ensure_page_resource(
    doc: &mut Document,
    page_id: ObjectId,
    category: &[u8],
    name: &str,
    target: ObjectId,
) -> std::result::Result<(), String> {
    let mut resources = {
        let page_dict = doc
            .get_object_mut(page_id)
            .and_then(|o| o.as_dict_mut())
            .map_err(|_| "page dictionary missing".to_string())?;
        page_dict
            .remove(b"Resources")
            .unwrap_or_else(|| Object::Dictionary(dictionary! {}))
    };

    match &mut resources {
        Object::Reference(id) => {
            let res_dict = doc
                .get_object_mut(*id)
                .and_then(|o| o.as_dict_mut())
                .map_err(|_| "resources dictionary missing".to_string())?;
            set_in_category(res_dict, category, name, target)?;
        }
        Object::Dictionary(dict) => {
            set_in_category(dict, category, name, target)?;
        }
        _ => return Err("resources entry is not a dictionary".to_string()),
    }

    let page_dict = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|_| "page dictionary missing".to_string())?;
    page_dict.set("Resources", resources);
    Ok(())
}

fn set_in_category(
    res_dict: &mut Dictionary,
    category: &[u8],
    name: &str,
    target: ObjectId,
) -> std::result::Result<(), String> {
    let owned = res_dict
        .remove(category)
        .unwrap_or_else(|| Object::Dictionary(dictionary! {}));
    let sanitized = match owned {
        Object::Dictionary(dict) => Object::Dictionary(dict),
        // An indirect sub-dictionary would need cross-object surgery;
        // shadowing it inline keeps the original object untouched.
        Object::Reference(_) => Object::Dictionary(dictionary! {}),
        _ => return Err("resource sub-dictionary has invalid type".to_string()),
    };
    res_dict.set(category.to_vec(), sanitized);
    match res_dict.get_mut(category) {
        Ok(Object::Dictionary(dict)) => {
            dict.set(name, target);
            Ok(())
        }
        _ => Err("resource sub-dictionary has invalid type".to_string()),
    }
}

/// Default output filename: `<basename>-edited.<ext>`.
pub fn default_export_filename(original: &str) -> String {
    match original.rsplit_once('.') {
        Some((base, ext)) => format!("{base}-edited.{ext}"),
        None => format!("{original}-edited"),
    }
}

/// True when an annotation will be painted (rather than written as a
/// form value) at export time. Exposed for host-side previews.
pub fn is_painted(annotation: &Annotation) -> bool {
    match &annotation.kind {
        AnnotationKind::FormField(form) => !form.is_native,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annot::{FieldAnnotation, GroupSlot};
    use crate::geom::Rect;

    fn grouped(id: &str, group: &str, index: usize, value: &str) -> Annotation {
        Annotation {
            id: id.to_string(),
            rect: Rect::new(0.0, 0.0, 20.0, 20.0),
            page_number: 1,
            kind: AnnotationKind::FormField(FieldAnnotation {
                name: format!("{group}_digit{index}"),
                is_native: true,
                kind: FieldKind::Text,
                value: value.to_string(),
                checked: false,
                group: Some(GroupSlot {
                    id: group.to_string(),
                    index,
                }),
                font_size: 12.0,
                color: Color::BLACK,
            }),
        }
    }

    #[test]
    fn group_values_concatenate_in_index_order() {
        let mut model = AnnotationModel::new();
        // Inserted out of order; index order must win.
        model.insert(grouped("b", "f", 1, "2"));
        model.insert(grouped("a", "f", 0, "1"));
        model.insert(grouped("c", "f", 2, "3"));
        let values = group_values(&model);
        assert_eq!(values.get("f").map(String::as_str), Some("123"));
    }

    #[test]
    fn group_gap_contributes_empty_string() {
        let mut model = AnnotationModel::new();
        model.insert(grouped("a", "f", 0, "7"));
        model.insert(grouped("c", "f", 2, "9"));
        let values = group_values(&model);
        assert_eq!(values.get("f").map(String::as_str), Some("79"));
    }

    #[test]
    fn escapes_string_delimiters() {
        assert_eq!(escape_text(r"a(b)c\d"), r"a\(b\)c\\d");
    }

    #[test]
    fn default_filename_inserts_edited_suffix() {
        assert_eq!(default_export_filename("form.pdf"), "form-edited.pdf");
        assert_eq!(default_export_filename("tax.2024.pdf"), "tax.2024-edited.pdf");
        assert_eq!(default_export_filename("noext"), "noext-edited");
    }
}
