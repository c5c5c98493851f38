//! Native form-field discovery (the field geometry resolver).
//!
//! Walks the document's `/AcroForm` field tree and produces one
//! [`RawFormField`] per terminal field that has a resolvable widget
//! rectangle. Page ownership is resolved through a tiered fallback
//! because a widget's `/P` entry is optional and not always trustworthy.
//! A per-page `/Annots` widget scan is available as a separate pass for
//! documents whose AcroForm is missing or empty.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::annot::FieldKind;
use crate::document::{
    FormDocument, decode_text_string, object_to_f64, rect_from_array, resolve,
};
use crate::geom::Rect;

/// Field flag: read-only.
pub const FF_READ_ONLY: i64 = 1;
/// Field flag: button is a radio group (bit 16).
const FF_RADIO: i64 = 1 << 15;
/// Field flag: button is a pushbutton (bit 17).
const FF_PUSHBUTTON: i64 = 1 << 16;
/// Field flag: choice is a combo box (bit 18).
const FF_COMBO: i64 = 1 << 17;

/// One native PDF form field as discovered at load time.
///
/// Immutable after extraction; the mutable counterpart is the
/// [`Annotation`](crate::annot::Annotation) the splitter derives from it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFormField {
    /// Fully-qualified name (dotted `/T` chain), unique in the form.
    pub name: String,
    /// Current text value (`/V`); for buttons the on-state name.
    pub value: String,
    /// Current boolean state for checkbox-like fields.
    pub checked: bool,
    pub kind: FieldKind,
    /// Widget rectangle in PDF user space.
    pub rect: Rect,
    /// 1-based page number, always resolved (defaults to 1 on failure).
    pub page_number: u32,
    /// True when the page number is the documented page-1 fallback
    /// rather than a positive identification.
    pub page_degraded: bool,
}

/// Extracts every AcroForm field that has a widget rectangle.
///
/// Individual field failures are logged and skipped; one broken field
/// never aborts the batch.
pub fn acroform_fields(doc: &FormDocument) -> Vec<RawFormField> {
    let inner = doc.inner();
    let field_refs = match acroform_field_refs(inner) {
        Some(refs) => refs,
        None => return Vec::new(),
    };

    let mut out = Vec::new();
    let mut visited = HashSet::new();
    for id in field_refs {
        walk_field(doc, id, None, None, &mut visited, &mut out);
    }
    debug!("acroform walk: {} field(s) extracted", out.len());
    out
}

/// Fallback pass: scans every page's `/Annots` for widget annotations.
///
/// Used when the AcroForm walk finds nothing; page ownership is direct
/// here, so no identity fallback is needed.
pub fn widget_fields(doc: &FormDocument) -> Vec<RawFormField> {
    let inner = doc.inner();
    let mut out = Vec::new();

    for (index, &page_id) in doc.page_ids().iter().enumerate() {
        let page_number = index as u32 + 1;
        for (annot_id, dict) in page_annotations(inner, page_id) {
            let subtype = dict
                .get(b"Subtype")
                .ok()
                .and_then(|o| name_of(resolve(inner, o)));
            if subtype.as_deref() != Some("Widget") {
                continue;
            }
            let Some(ft) = field_type(inner, &dict) else {
                continue;
            };
            let Some(rect) = widget_rect(inner, &dict) else {
                continue;
            };
            let name = field_partial_name(inner, &dict)
                .unwrap_or_else(|| format!("field-{}", annot_id.0));
            let kind = classify(ft.as_str(), field_flags(inner, &dict));
            let (value, checked) = field_value(inner, &dict, kind);
            out.push(RawFormField {
                name,
                value,
                checked,
                kind,
                rect,
                page_number,
                page_degraded: false,
            });
        }
    }
    debug!("widget scan: {} field(s) extracted", out.len());
    out
}

/// Maps fully-qualified field names to the object ids of their terminal
/// field dictionaries. Used by the export reconciler to write values.
pub(crate) fn field_ids_by_name(doc: &FormDocument) -> HashMap<String, ObjectId> {
    let inner = doc.inner();
    let mut map = HashMap::new();
    let Some(refs) = acroform_field_refs(inner) else {
        return map;
    };
    let mut visited = HashSet::new();
    let mut stack: Vec<(ObjectId, Option<String>)> =
        refs.into_iter().map(|id| (id, None)).collect();

    while let Some((id, parent)) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Ok(dict) = inner.get_object(id).and_then(|o| o.as_dict()) else {
            continue;
        };
        let full_name = qualified_name(inner, dict, parent.as_deref());
        let child_fields = child_field_refs(inner, dict);
        if child_fields.is_empty() {
            if let Some(name) = full_name {
                map.insert(name, id);
            }
        } else {
            for child in child_fields {
                stack.push((child, full_name.clone()));
            }
        }
    }
    map
}

fn acroform_field_refs(doc: &Document) -> Option<Vec<ObjectId>> {
    let catalog = doc.catalog().ok()?;
    let acroform = resolve(doc, catalog.get(b"AcroForm").ok()?);
    let fields = resolve(doc, acroform.as_dict().ok()?.get(b"Fields").ok()?);
    let arr = fields.as_array().ok()?;
    Some(arr.iter().filter_map(|o| o.as_reference().ok()).collect())
}

fn walk_field(
    doc: &FormDocument,
    id: ObjectId,
    parent_name: Option<&str>,
    parent_ft: Option<String>,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<RawFormField>,
) {
    if !visited.insert(id) {
        return;
    }
    let inner = doc.inner();
    let Ok(dict) = inner.get_object(id).and_then(|o| o.as_dict()) else {
        return;
    };
    let dict = dict.clone();
    let full_name = qualified_name(inner, &dict, parent_name);
    let ft = field_type(inner, &dict).or(parent_ft);

    let child_fields = child_field_refs(inner, &dict);
    if !child_fields.is_empty() {
        for child in child_fields {
            walk_field(doc, child, full_name.as_deref(), ft.clone(), visited, out);
        }
        return;
    }

    // Terminal field: isolate extraction so one failure never aborts
    // the rest of the batch.
    let Some(name) = full_name else {
        debug!("skipping unnamed field object {}", id.0);
        return;
    };
    match extract_terminal(doc, id, &dict, &name, ft.as_deref()) {
        Ok(Some(field)) => out.push(field),
        Ok(None) => debug!("field {name:?}: no widget rectangle, dropped"),
        Err(msg) => warn!("field {name:?}: extraction failed: {msg}"),
    }
}

/// Child entries of `/Kids` that are themselves fields (carry `/T`).
/// Kids without `/T` are widget annotations of the parent field.
fn child_field_refs(doc: &Document, dict: &Dictionary) -> Vec<ObjectId> {
    let Some(kids) = dict
        .get(b"Kids")
        .ok()
        .map(|k| resolve(doc, k))
        .and_then(|k| k.as_array().ok())
    else {
        return Vec::new();
    };
    kids.iter()
        .filter_map(|k| k.as_reference().ok())
        .filter(|&kid_id| {
            doc.get_object(kid_id)
                .and_then(|o| o.as_dict())
                .map(|d| d.has(b"T"))
                .unwrap_or(false)
        })
        .collect()
}

fn extract_terminal(
    doc: &FormDocument,
    field_id: ObjectId,
    dict: &Dictionary,
    name: &str,
    ft: Option<&str>,
) -> Result<Option<RawFormField>, String> {
    let inner = doc.inner();
    let kind = classify(ft.unwrap_or(""), field_flags(inner, dict));
    let (value, checked) = field_value(inner, dict, kind);

    // The field dictionary is usually the widget itself (merged form);
    // otherwise the first kid carries the rectangle.
    let (widget_id, widget_dict) = first_widget(inner, field_id, dict);
    let Some(rect) = widget_rect(inner, &widget_dict) else {
        return Ok(None);
    };

    let (page_number, page_degraded) = resolve_page(doc, widget_id, &widget_dict, name);

    Ok(Some(RawFormField {
        name: name.to_string(),
        value,
        checked,
        kind,
        rect,
        page_number,
        page_degraded,
    }))
}

fn first_widget(doc: &Document, field_id: ObjectId, dict: &Dictionary) -> (ObjectId, Dictionary) {
    if dict.has(b"Rect") {
        return (field_id, dict.clone());
    }
    if let Some(kids) = dict
        .get(b"Kids")
        .ok()
        .map(|k| resolve(doc, k))
        .and_then(|k| k.as_array().ok())
    {
        for kid in kids {
            if let Ok(kid_id) = kid.as_reference() {
                if let Ok(kid_dict) = doc.get_object(kid_id).and_then(|o| o.as_dict()) {
                    if kid_dict.has(b"Rect") {
                        return (kid_id, kid_dict.clone());
                    }
                }
            }
        }
    }
    (field_id, dict.clone())
}

fn widget_rect(doc: &Document, dict: &Dictionary) -> Option<Rect> {
    let rect_obj = resolve(doc, dict.get(b"Rect").ok()?);
    rect_from_array(doc, rect_obj.as_array().ok()?)
}

/// Resolves which 1-based page a widget belongs to.
///
/// Tiers, in order: `/P` reference identity against the page list; a
/// linear scan of every page's `/Annots` for the widget's id; structural
/// comparison of the `/P` target against each page dictionary; page 1.
fn resolve_page(
    doc: &FormDocument,
    widget_id: ObjectId,
    widget: &Dictionary,
    name: &str,
) -> (u32, bool) {
    let inner = doc.inner();
    let page_ids = doc.page_ids();

    // (a) /P reference identity.
    if let Some(p_ref) = widget.get(b"P").ok().and_then(|p| p.as_reference().ok()) {
        if let Some(idx) = page_ids.iter().position(|&id| id == p_ref) {
            return (idx as u32 + 1, false);
        }
    }

    // (b) which page's /Annots array mentions this widget?
    for (idx, &page_id) in page_ids.iter().enumerate() {
        let mentioned = page_annotations(inner, page_id)
            .iter()
            .any(|(annot_id, _)| *annot_id == widget_id);
        if mentioned {
            return (idx as u32 + 1, false);
        }
    }

    // (c) structural comparison of the /P target against each page node.
    if let Ok(p_obj) = widget.get(b"P") {
        if let Ok(p_dict) = resolve(inner, p_obj).as_dict() {
            for (idx, &page_id) in page_ids.iter().enumerate() {
                if let Ok(page_dict) = inner.get_object(page_id).and_then(|o| o.as_dict()) {
                    if same_page_dict(p_dict, page_dict) {
                        return (idx as u32 + 1, false);
                    }
                }
            }
        }
    }

    // (d) heuristic fallback, not a guess at correctness.
    warn!("field {name:?}: could not determine page, defaulting to page 1");
    (1, true)
}

/// Structural page-dictionary comparison used when reference identity
/// fails: two page nodes are considered the same when they point at the
/// same content stream, or failing that share MediaBox and /Annots shape.
fn same_page_dict(a: &Dictionary, b: &Dictionary) -> bool {
    let contents = |d: &Dictionary| d.get(b"Contents").ok().and_then(|o| o.as_reference().ok());
    if let (Some(ca), Some(cb)) = (contents(a), contents(b)) {
        return ca == cb;
    }
    let media = |d: &Dictionary| -> Option<Vec<i64>> {
        d.get(b"MediaBox")
            .ok()
            .and_then(|o| o.as_array().ok())
            .map(|arr| {
                arr.iter()
                    .filter_map(object_to_f64)
                    .map(|v| v.round() as i64)
                    .collect()
            })
    };
    let annots_len = |d: &Dictionary| {
        d.get(b"Annots")
            .ok()
            .and_then(|o| o.as_array().ok())
            .map(|a| a.len())
    };
    media(a).is_some() && media(a) == media(b) && annots_len(a) == annots_len(b)
}

/// Resolved `/Annots` entries of a page: (object id, dictionary).
/// Inline (non-reference) annotation dictionaries have no id and are
/// reported with a null id.
fn page_annotations(doc: &Document, page_id: ObjectId) -> Vec<(ObjectId, Dictionary)> {
    let Some(annots) = doc
        .get_object(page_id)
        .and_then(|o| o.as_dict())
        .ok()
        .and_then(|d| d.get(b"Annots").ok())
        .map(|a| resolve(doc, a))
        .and_then(|a| a.as_array().ok())
    else {
        return Vec::new();
    };
    annots
        .iter()
        .filter_map(|entry| match entry {
            Object::Reference(id) => doc
                .get_object(*id)
                .and_then(|o| o.as_dict())
                .ok()
                .map(|d| (*id, d.clone())),
            Object::Dictionary(d) => Some(((0, 0), d.clone())),
            _ => None,
        })
        .collect()
}

fn qualified_name(doc: &Document, dict: &Dictionary, parent: Option<&str>) -> Option<String> {
    let own = field_partial_name(doc, dict);
    match (parent, own) {
        (Some(p), Some(t)) => Some(format!("{p}.{t}")),
        (Some(p), None) => Some(p.to_string()),
        (None, Some(t)) => Some(t),
        (None, None) => None,
    }
}

fn field_partial_name(doc: &Document, dict: &Dictionary) -> Option<String> {
    match resolve(doc, dict.get(b"T").ok()?) {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        Object::Name(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn field_type(doc: &Document, dict: &Dictionary) -> Option<String> {
    name_of(resolve(doc, dict.get(b"FT").ok()?))
}

fn field_flags(doc: &Document, dict: &Dictionary) -> i64 {
    dict.get(b"Ff")
        .ok()
        .map(|o| resolve(doc, o))
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(0)
}

fn name_of(obj: &Object) -> Option<String> {
    match obj {
        Object::Name(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn classify(ft: &str, flags: i64) -> FieldKind {
    match ft {
        "Tx" => FieldKind::Text,
        "Btn" if flags & FF_PUSHBUTTON != 0 => FieldKind::Unknown,
        "Btn" if flags & FF_RADIO != 0 => FieldKind::Radio,
        "Btn" => FieldKind::Checkbox,
        "Ch" if flags & FF_COMBO != 0 => FieldKind::Dropdown,
        "Ch" => FieldKind::Dropdown,
        _ => FieldKind::Unknown,
    }
}

/// Reads a field's current value and boolean state from `/V` (with an
/// `/AS` fallback for buttons that carry no value yet).
fn field_value(doc: &Document, dict: &Dictionary, kind: FieldKind) -> (String, bool) {
    let v = dict.get(b"V").ok().map(|o| resolve(doc, o));
    match kind {
        FieldKind::Checkbox | FieldKind::Radio => {
            let state = match v {
                Some(Object::Name(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
                _ => dict
                    .get(b"AS")
                    .ok()
                    .map(|o| resolve(doc, o))
                    .and_then(name_of)
                    .unwrap_or_else(|| "Off".to_string()),
            };
            let checked = state != "Off";
            (state, checked)
        }
        _ => {
            let text = match v {
                Some(Object::String(bytes, _)) => decode_text_string(bytes),
                Some(Object::Name(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
                Some(Object::Integer(i)) => i.to_string(),
                Some(Object::Real(f)) => f.to_string(),
                _ => String::new(),
            };
            (text, false)
        }
    }
}
