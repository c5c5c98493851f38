//! The annotation model: every editable unit placed on the document.
//!
//! Annotations are the mutable counterpart of the immutable
//! [`RawFormField`](crate::acroform::RawFormField) descriptors. Geometry is
//! stored in PDF user-space units with a top-left (canvas-orientation)
//! anchor so it survives zoom and render-scale changes; only the export
//! reconciler converts back to the PDF's bottom-left origin.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::geom::Rect;

/// Minimum annotation width after an interactive resize, in PDF units.
pub const MIN_WIDTH: f64 = 50.0;

/// Minimum annotation height after an interactive resize, in PDF units.
pub const MIN_HEIGHT: f64 = 30.0;

/// An RGB color with components in 0.0–1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    /// Parses a `#rrggbb` hex string; anything unparseable is black.
    pub fn from_hex(hex: &str) -> Color {
        let hex = hex.trim_start_matches('#');
        if hex.len() >= 6 {
            let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(0) as f64 / 255.0;
            let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(0) as f64 / 255.0;
            let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(0) as f64 / 255.0;
            Color { r, g, b }
        } else {
            Color::BLACK
        }
    }
}

/// Native form-field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Checkbox,
    Radio,
    Dropdown,
    Unknown,
}

impl FieldKind {
    /// Unknown or blank field types render as editable text inputs.
    pub fn normalized(self) -> FieldKind {
        match self {
            FieldKind::Unknown => FieldKind::Text,
            other => other,
        }
    }
}

/// Membership of a split-field group.
///
/// `id` is the parent field's fully-qualified name; `index` is the
/// 0-based left-to-right position of this sub-box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSlot {
    pub id: String,
    pub index: usize,
}

/// State carried by a form-field annotation (native or synthesized).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAnnotation {
    /// Fully-qualified field name; for split sub-boxes a derived name.
    pub name: String,
    /// True when backed by a real PDF form field; false for an
    /// editable-text overlay with no PDF-level backing.
    pub is_native: bool,
    pub kind: FieldKind,
    /// Current text value (checkbox annotations keep a display glyph here).
    pub value: String,
    pub checked: bool,
    pub group: Option<GroupSlot>,
    pub font_size: f64,
    pub color: Color,
}

/// What an annotation is, as a closed tagged union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnnotationKind {
    FreeText {
        text: String,
        font_size: f64,
        color: Color,
    },
    SignatureImage {
        /// PNG data URI, background already removed.
        data_uri: String,
    },
    EraserPatch,
    FormField(FieldAnnotation),
}

/// One editable unit placed on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Unique, stable for the annotation's lifetime.
    pub id: String,
    /// PDF user-space units, top-left anchored.
    pub rect: Rect,
    /// 1-based page number.
    pub page_number: u32,
    pub kind: AnnotationKind,
}

impl Annotation {
    /// Group membership, when this is one sub-box of a split field.
    pub fn group(&self) -> Option<&GroupSlot> {
        match &self.kind {
            AnnotationKind::FormField(f) => f.group.as_ref(),
            _ => None,
        }
    }

    pub fn as_form_field(&self) -> Option<&FieldAnnotation> {
        match &self.kind {
            AnnotationKind::FormField(f) => Some(f),
            _ => None,
        }
    }

    fn as_form_field_mut(&mut self) -> Option<&mut FieldAnnotation> {
        match &mut self.kind {
            AnnotationKind::FormField(f) => Some(f),
            _ => None,
        }
    }
}

/// Display glyph for a checkbox annotation.
pub fn checkbox_glyph(checked: bool) -> &'static str {
    if checked { "\u{2611}" } else { "\u{2610}" }
}

/// Insertion-ordered collection of annotations, keyed by id.
///
/// No operation reorders or deduplicates; iteration order is insertion
/// order, which keeps re-renders deterministic. Removing a group member
/// never renumbers the survivors — gaps export as empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationModel {
    entries: IndexMap<String, Annotation>,
}

impl AnnotationModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_annotations(annotations: Vec<Annotation>) -> Self {
        let mut model = Self::new();
        for ann in annotations {
            model.insert(ann);
        }
        model
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Annotation> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.entries.values()
    }

    /// Annotations on a single page, in insertion order.
    pub fn on_page(&self, page_number: u32) -> impl Iterator<Item = &Annotation> {
        self.entries
            .values()
            .filter(move |a| a.page_number == page_number)
    }

    /// Inserts an annotation; an existing id is overwritten in place.
    pub fn insert(&mut self, annotation: Annotation) {
        self.entries.insert(annotation.id.clone(), annotation);
    }

    /// Applies a partial in-place update to one annotation.
    ///
    /// Returns false when the id is unknown.
    pub fn patch<F: FnOnce(&mut Annotation)>(&mut self, id: &str, f: F) -> bool {
        match self.entries.get_mut(id) {
            Some(ann) => {
                f(ann);
                true
            }
            None => false,
        }
    }

    /// Removes an annotation, preserving the order of the rest.
    pub fn remove(&mut self, id: &str) -> Option<Annotation> {
        self.entries.shift_remove(id)
    }

    /// Replaces the whole model (re-extraction semantics: never merge).
    pub fn replace_all(&mut self, annotations: Vec<Annotation>) {
        self.entries.clear();
        for ann in annotations {
            self.insert(ann);
        }
    }

    /// Sets the text value of a form-field or free-text annotation.
    pub fn set_value(&mut self, id: &str, value: &str) -> bool {
        self.patch(id, |ann| match &mut ann.kind {
            AnnotationKind::FormField(f) => f.value = value.to_string(),
            AnnotationKind::FreeText { text, .. } => *text = value.to_string(),
            _ => {}
        })
    }

    /// Toggles a checkbox annotation, keeping its display glyph in sync.
    pub fn set_checked(&mut self, id: &str, checked: bool) -> bool {
        self.patch(id, |ann| {
            if let Some(f) = ann.as_form_field_mut() {
                f.checked = checked;
                if f.kind == FieldKind::Checkbox {
                    f.value = checkbox_glyph(checked).to_string();
                }
            }
        })
    }

    /// Moves an annotation to a new top-left position (PDF units).
    pub fn move_to(&mut self, id: &str, x: f64, y: f64) -> bool {
        self.patch(id, |ann| {
            ann.rect.x = x;
            ann.rect.y = y;
        })
    }

    /// Resizes an annotation, clamping to the interactive minimum.
    pub fn resize(&mut self, id: &str, width: f64, height: f64) -> bool {
        self.patch(id, |ann| {
            ann.rect.width = width.max(MIN_WIDTH);
            ann.rect.height = height.max(MIN_HEIGHT);
        })
    }
}
