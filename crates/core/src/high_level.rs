//! High-level form extraction and export API.
//!
//! Provides the main public entry points:
//! - `extract_annotations()` - discover form fields and build the
//!   initial annotation model
//! - `export_pdf()` - reconcile an annotation model back into PDF bytes
//! - `extract_text_items()` - scan page text for "make editable" mode

use std::collections::BTreeMap;

use log::debug;

use crate::acroform::{RawFormField, acroform_fields, widget_fields};
use crate::annot::{Annotation, AnnotationKind, AnnotationModel, Color, FieldAnnotation, FieldKind};
use crate::content::{TextItem, text_items_on_page};
use crate::document::FormDocument;
use crate::error::Result;
use crate::export;
use crate::split::{
    BUILTIN_TEMPLATES, Conversion, SplitDecision, SplitParams, TemplateConfig, convert_fields,
    effective_config,
};

/// Options for field extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Splitter thresholds.
    pub split_params: SplitParams,

    /// Explicit field-name → box-count overrides. Takes precedence over
    /// any matched template entry.
    pub config: BTreeMap<String, usize>,

    /// Additional form templates, consulted before the built-in ones.
    pub templates: Vec<TemplateConfig>,

    /// Whether the built-in template table (IRS W-9) is consulted.
    pub use_builtin_templates: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            split_params: SplitParams::default(),
            config: BTreeMap::new(),
            templates: Vec::new(),
            use_builtin_templates: true,
        }
    }
}

/// Result of one extraction pass.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The initial annotation population, ready for the UI.
    pub annotations: AnnotationModel,
    /// The raw field descriptors the annotations were derived from.
    pub fields: Vec<RawFormField>,
    /// Per-field record of how each split decision was made.
    pub decisions: Vec<SplitDecision>,
}

/// Discovers form fields in a PDF and converts them into annotations.
///
/// When the AcroForm walk yields nothing, a widget-annotation scan of
/// every page runs before giving up. Re-running on unchanged bytes
/// produces an equal annotation set (ids included — generation is
/// deterministic). The result always *replaces* any previous model;
/// merging re-extractions would leave stale duplicates behind.
pub fn extract_annotations(pdf_data: &[u8], options: &ExtractOptions) -> Result<Extraction> {
    let doc = FormDocument::load(pdf_data)?;

    let mut fields = acroform_fields(&doc);
    if fields.is_empty() {
        debug!("no AcroForm fields found, trying widget annotation scan");
        fields = widget_fields(&doc);
    }

    let mut templates = options.templates.clone();
    if options.use_builtin_templates {
        templates.extend(BUILTIN_TEMPLATES.iter().cloned());
    }
    let config = effective_config(&fields, &templates, &options.config);

    let Conversion {
        annotations,
        decisions,
    } = convert_fields(&doc, &fields, &config, &options.split_params);

    Ok(Extraction {
        annotations: AnnotationModel::from_annotations(annotations),
        fields,
        decisions,
    })
}

/// Reconciles the annotation model into new PDF bytes.
///
/// The model is read as a snapshot and never mutated, so the caller can
/// retry after a failed attempt.
pub fn export_pdf(pdf_data: &[u8], model: &AnnotationModel) -> Result<Vec<u8>> {
    export::export(pdf_data, model)
}

/// Default output filename for a source file name (`form.pdf` →
/// `form-edited.pdf`).
pub fn default_export_filename(original: &str) -> String {
    export::default_export_filename(original)
}

/// Extracts positioned text items from every page.
pub fn extract_text_items(pdf_data: &[u8]) -> Result<Vec<TextItem>> {
    let doc = FormDocument::load(pdf_data)?;
    let mut items = Vec::new();
    for page in 1..=doc.page_count() as u32 {
        items.extend(text_items_on_page(&doc, page));
    }
    Ok(items)
}

/// Converts extracted text items into synthesized editable overlays
/// (no PDF-level field backing; export covers the original glyphs and
/// redraws the replacement text).
pub fn text_items_to_annotations(items: &[TextItem]) -> Vec<Annotation> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| Annotation {
            id: format!("text-{i}"),
            rect: crate::geom::Rect::new(item.x, item.y, item.width, item.height),
            page_number: item.page_number,
            kind: AnnotationKind::FormField(FieldAnnotation {
                name: format!("text-{i}"),
                is_native: false,
                kind: FieldKind::Text,
                value: item.text.clone(),
                checked: false,
                group: None,
                // Slightly smaller than the source text so the redraw fits.
                font_size: (item.font_size * 0.8).max(8.0),
                color: Color::BLACK,
            }),
        })
        .collect()
}
