//! Field splitting: one box, or N aligned digit boxes.
//!
//! Wide text fields on government forms are often a single logical field
//! rendered as hand-drawn comb boxes (SSN: 3+2+4). The splitter decides,
//! per text field, how many annotations to emit and where. Decision
//! order, first match wins:
//!
//! 1. configured split — a known template or explicit config entry names
//!    the box count; boxes are evenly subdivided.
//! 2. visual detection — rectangle glyphs drawn inside the field rect are
//!    used verbatim, capturing the authored box spacing.
//! 3. single box over the whole field rect.
//!
//! Visual detection is a best-effort heuristic behind configuration,
//! never the primary mechanism; every decision is surfaced in a
//! [`SplitDecision`] so diagnostics can tell heuristic from configured.

use std::collections::BTreeMap;

use itertools::Itertools;
use log::debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::acroform::RawFormField;
use crate::annot::{
    Annotation, AnnotationKind, Color, FieldAnnotation, FieldKind, GroupSlot, checkbox_glyph,
};
use crate::content::{GlyphRect, rectangles_on_page};
use crate::document::FormDocument;
use crate::geom::{Rect, display_nudge, pdf_to_canvas};

/// Tunable thresholds for the splitter.
///
/// The defaults match the behavior this engine was calibrated against;
/// none of them is a fundamental constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitParams {
    /// A text field is "wide" (a split candidate) when
    /// `width > height * wide_ratio`.
    pub wide_ratio: f64,
    /// Lower bound (exclusive) on a detected box's width and height.
    pub min_box_size: f64,
    /// Upper bound (exclusive) on a detected box's width and height.
    pub max_box_size: f64,
    /// Slack allowed when testing glyph containment in the field rect.
    pub containment_tolerance: f64,
    /// Fraction of each sub-box's width removed as a visible gap.
    pub gap_ratio: f64,
}

impl Default for SplitParams {
    fn default() -> Self {
        Self {
            wide_ratio: 1.5,
            min_box_size: 5.0,
            max_box_size: 50.0,
            containment_tolerance: 5.0,
            gap_ratio: 0.05,
        }
    }
}

/// Field-name → box-count table for one recognized form template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Template identifier, e.g. `"FW9"`.
    pub name: String,
    /// A field name containing all markers identifies the template.
    pub markers: Vec<String>,
    /// Exact field name → number of boxes.
    pub fields: BTreeMap<String, usize>,
}

/// Built-in templates: IRS W-9 SSN (3+2+4) and EIN (2+7) comb fields.
pub static BUILTIN_TEMPLATES: Lazy<Vec<TemplateConfig>> = Lazy::new(|| {
    vec![TemplateConfig {
        name: "FW9".to_string(),
        markers: vec!["topmostSubform".to_string(), "Page1".to_string()],
        fields: BTreeMap::from([
            ("topmostSubform[0].Page1[0].f1_11[0]".to_string(), 3),
            ("topmostSubform[0].Page1[0].f1_12[0]".to_string(), 2),
            ("topmostSubform[0].Page1[0].f1_13[0]".to_string(), 4),
            ("topmostSubform[0].Page1[0].f1_14[0]".to_string(), 2),
            ("topmostSubform[0].Page1[0].f1_15[0]".to_string(), 7),
        ]),
    }]
});

/// How a field's split decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Box count came from a template or explicit config entry.
    Configured,
    /// Boxes came from rectangle glyphs found in the page content.
    Detected,
    /// No split: one annotation covering the field rect.
    Single,
}

/// Per-field diagnostic record of the split decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitDecision {
    pub field: String,
    pub mode: SplitMode,
    pub boxes: usize,
}

/// Result of converting raw fields into annotations.
#[derive(Debug, Clone, Default)]
pub struct Conversion {
    pub annotations: Vec<Annotation>,
    pub decisions: Vec<SplitDecision>,
}

/// Finds the first template whose markers all occur in some field name.
pub fn detect_template<'a>(
    fields: &[RawFormField],
    templates: &'a [TemplateConfig],
) -> Option<&'a TemplateConfig> {
    templates.iter().find(|tpl| {
        fields
            .iter()
            .any(|f| tpl.markers.iter().all(|m| f.name.contains(m)))
    })
}

/// Builds the effective field-name → box-count table: the detected
/// template's entries with explicit user entries layered on top.
pub fn effective_config(
    fields: &[RawFormField],
    templates: &[TemplateConfig],
    user: &BTreeMap<String, usize>,
) -> BTreeMap<String, usize> {
    let mut config = match detect_template(fields, templates) {
        Some(tpl) => {
            debug!("detected form template {:?}", tpl.name);
            tpl.fields.clone()
        }
        None => BTreeMap::new(),
    };
    for (name, count) in user {
        config.insert(name.clone(), *count);
    }
    config
}

/// Converts raw fields into the initial annotation population.
///
/// Glyph rectangles are fetched lazily and cached per page for the
/// duration of this pass only.
pub fn convert_fields(
    doc: &FormDocument,
    fields: &[RawFormField],
    config: &BTreeMap<String, usize>,
    params: &SplitParams,
) -> Conversion {
    let mut glyph_cache: BTreeMap<u32, Vec<GlyphRect>> = BTreeMap::new();
    let page_count = doc.page_count() as u32;
    convert_fields_with(
        fields,
        config,
        params,
        |page| {
            if page >= 1 && page <= page_count {
                doc.page_height(page).ok()
            } else {
                None
            }
        },
        |page| {
            glyph_cache
                .entry(page)
                .or_insert_with(|| rectangles_on_page(doc, page))
                .clone()
        },
    )
}

/// Conversion core, parameterized over page lookups so it can run
/// without a loaded document.
pub(crate) fn convert_fields_with(
    fields: &[RawFormField],
    config: &BTreeMap<String, usize>,
    params: &SplitParams,
    page_height_of: impl Fn(u32) -> Option<f64>,
    mut glyphs_for: impl FnMut(u32) -> Vec<GlyphRect>,
) -> Conversion {
    let mut out = Conversion::default();

    for field in fields {
        let Some(page_height) = page_height_of(field.page_number) else {
            log::warn!(
                "page {} not found for field {:?}",
                field.page_number,
                field.name
            );
            continue;
        };

        let kind = field.kind.normalized();
        if kind == FieldKind::Text {
            convert_text_field(field, page_height, config, params, &mut glyphs_for, &mut out);
        } else {
            out.annotations.push(single_annotation(field, page_height));
            out.decisions.push(SplitDecision {
                field: field.name.clone(),
                mode: SplitMode::Single,
                boxes: 1,
            });
        }
    }
    out
}

fn convert_text_field(
    field: &RawFormField,
    page_height: f64,
    config: &BTreeMap<String, usize>,
    params: &SplitParams,
    glyphs_for: &mut impl FnMut(u32) -> Vec<GlyphRect>,
    out: &mut Conversion,
) {
    let rect = field.rect;

    // 1. A configured field never runs visual detection, even when the
    //    entry asks for no split at all.
    if let Some(&count) = config.get(&field.name) {
        if count >= 2 {
            out.annotations
                .extend(even_boxes(field, page_height, count, params.gap_ratio));
            out.decisions.push(SplitDecision {
                field: field.name.clone(),
                mode: SplitMode::Configured,
                boxes: count,
            });
        } else {
            out.annotations.push(single_annotation(field, page_height));
            out.decisions.push(SplitDecision {
                field: field.name.clone(),
                mode: SplitMode::Single,
                boxes: 1,
            });
        }
        return;
    }

    // 2. Visual detection, only for wide fields.
    if rect.width > rect.height * params.wide_ratio {
        let glyphs = glyphs_for(field.page_number);
        let boxes: Vec<Rect> = glyphs
            .iter()
            .map(|g| g.rect)
            .filter(|b| {
                rect.contains(b, params.containment_tolerance)
                    && b.width > params.min_box_size
                    && b.width < params.max_box_size
                    && b.height > params.min_box_size
                    && b.height < params.max_box_size
            })
            .sorted_by(|a, b| a.x.total_cmp(&b.x))
            .collect();

        if boxes.len() >= 2 {
            debug!(
                "field {:?}: using {} detected glyph boxes",
                field.name,
                boxes.len()
            );
            for (i, vbox) in boxes.iter().enumerate() {
                out.annotations
                    .push(detected_box(field, page_height, *vbox, i));
            }
            out.decisions.push(SplitDecision {
                field: field.name.clone(),
                mode: SplitMode::Detected,
                boxes: boxes.len(),
            });
            return;
        }
    }

    // 3. Single full-width annotation.
    out.annotations.push(single_annotation(field, page_height));
    out.decisions.push(SplitDecision {
        field: field.name.clone(),
        mode: SplitMode::Single,
        boxes: 1,
    });
}

/// Canvas-space top-left Y for a field rect, with the single-line nudge.
fn display_y(rect: &Rect, page_height: f64) -> f64 {
    let (_, canvas_y) = pdf_to_canvas(rect.x, rect.y, rect.height, page_height);
    canvas_y + display_nudge(rect)
}

/// Evenly-subdivided sub-boxes for a configured split.
fn even_boxes(field: &RawFormField, page_height: f64, count: usize, gap_ratio: f64) -> Vec<Annotation> {
    let rect = field.rect;
    let canvas_y = display_y(&rect, page_height);
    let box_width = rect.width / count as f64;
    let actual_width = box_width - box_width * gap_ratio;

    (0..count)
        .map(|i| {
            let x = rect.x + i as f64 * box_width;
            Annotation {
                id: format!("formfield-{}-box{}", field.name, i),
                rect: Rect::new(x, canvas_y, actual_width, rect.height),
                page_number: field.page_number,
                kind: AnnotationKind::FormField(FieldAnnotation {
                    name: format!("{}_digit{}", field.name, i),
                    is_native: true,
                    kind: FieldKind::Text,
                    value: String::new(),
                    checked: false,
                    group: Some(GroupSlot {
                        id: field.name.clone(),
                        index: i,
                    }),
                    font_size: (rect.height * 0.7).min(12.0),
                    color: Color::BLACK,
                }),
            }
        })
        .collect()
}

/// A sub-box using a detected glyph rectangle's authored geometry.
fn detected_box(field: &RawFormField, page_height: f64, vbox: Rect, index: usize) -> Annotation {
    let canvas_y = display_y(&vbox, page_height);
    Annotation {
        id: format!("formfield-{}-box{}", field.name, index),
        rect: Rect::new(vbox.x, canvas_y, vbox.width, vbox.height),
        page_number: field.page_number,
        kind: AnnotationKind::FormField(FieldAnnotation {
            name: format!("{}_digit{}", field.name, index),
            is_native: true,
            kind: FieldKind::Text,
            value: String::new(),
            checked: false,
            group: Some(GroupSlot {
                id: field.name.clone(),
                index,
            }),
            font_size: (vbox.height * 0.7).min(12.0),
            color: Color::BLACK,
        }),
    }
}

/// One annotation covering the whole field rect.
fn single_annotation(field: &RawFormField, page_height: f64) -> Annotation {
    let rect = field.rect;
    let kind = field.kind.normalized();
    let canvas_y = display_y(&rect, page_height);
    let is_checkbox = kind == FieldKind::Checkbox;

    let (value, font_size) = if is_checkbox {
        (
            checkbox_glyph(field.checked).to_string(),
            (rect.height * 0.8).min(16.0),
        )
    } else {
        (field.value.clone(), (rect.height * 0.7).min(12.0))
    };

    Annotation {
        id: format!("formfield-{}", field.name),
        rect: Rect::new(rect.x, canvas_y, rect.width, rect.height),
        page_number: field.page_number,
        kind: AnnotationKind::FormField(FieldAnnotation {
            name: field.name.clone(),
            is_native: true,
            kind,
            value,
            checked: is_checkbox && field.checked,
            group: None,
            font_size,
            color: Color::BLACK,
        }),
    }
}

/// Splits an existing text annotation into `count` boxes on user
/// request, replacing it in the model. Returns false when the target is
/// missing, not a text field, or `count < 2`.
pub fn split_annotation(
    model: &mut crate::annot::AnnotationModel,
    id: &str,
    count: usize,
    params: &SplitParams,
) -> bool {
    if count < 2 {
        return false;
    }
    let Some(ann) = model.get(id).cloned() else {
        return false;
    };
    let Some(form) = ann.as_form_field() else {
        return false;
    };
    if form.kind != FieldKind::Text {
        return false;
    }

    let box_width = ann.rect.width / count as f64;
    let actual_width = box_width - box_width * params.gap_ratio;
    let parent_name = form.name.clone();
    let template = form.clone();

    model.remove(id);
    for i in 0..count {
        model.insert(Annotation {
            id: format!("{id}-split{i}"),
            rect: Rect::new(
                ann.rect.x + i as f64 * box_width,
                ann.rect.y,
                actual_width,
                ann.rect.height,
            ),
            page_number: ann.page_number,
            kind: AnnotationKind::FormField(FieldAnnotation {
                name: format!("{parent_name}_{i}"),
                value: String::new(),
                group: Some(GroupSlot {
                    id: parent_name.clone(),
                    index: i,
                }),
                ..template.clone()
            }),
        });
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_field(name: &str, rect: Rect) -> RawFormField {
        RawFormField {
            name: name.to_string(),
            value: String::new(),
            checked: false,
            kind: FieldKind::Text,
            rect,
            page_number: 1,
            page_degraded: false,
        }
    }

    fn convert(
        fields: &[RawFormField],
        config: &BTreeMap<String, usize>,
        glyphs: Vec<GlyphRect>,
    ) -> Conversion {
        convert_fields_with(
            fields,
            config,
            &SplitParams::default(),
            |_| Some(792.0),
            move |_| glyphs.clone(),
        )
    }

    #[test]
    fn configured_split_produces_exact_geometry() {
        // width 90 over 3 boxes: 30 each, minus the 5% gap = 28.5.
        let fields = [text_field("ssn", Rect::new(100.0, 700.0, 90.0, 20.0))];
        let config = BTreeMap::from([("ssn".to_string(), 3usize)]);
        let result = convert(&fields, &config, Vec::new());

        assert_eq!(result.annotations.len(), 3);
        for (i, ann) in result.annotations.iter().enumerate() {
            assert!((ann.rect.width - 28.5).abs() < 1e-9);
            assert!((ann.rect.x - (100.0 + 30.0 * i as f64)).abs() < 1e-9);
            let group = ann.group().expect("sub-box must be grouped");
            assert_eq!(group.id, "ssn");
            assert_eq!(group.index, i);
        }
        assert_eq!(result.decisions[0].mode, SplitMode::Configured);
    }

    #[test]
    fn wide_field_without_config_or_glyphs_stays_single() {
        let fields = [text_field("notes", Rect::new(50.0, 600.0, 300.0, 20.0))];
        let result = convert(&fields, &BTreeMap::new(), Vec::new());

        assert_eq!(result.annotations.len(), 1);
        assert_eq!(result.annotations[0].rect.width, 300.0);
        assert_eq!(result.decisions[0].mode, SplitMode::Single);
    }

    #[test]
    fn detected_glyph_boxes_use_authored_geometry() {
        let field_rect = Rect::new(100.0, 700.0, 120.0, 18.0);
        let glyphs = vec![
            // Out of order on purpose: output must be sorted left-to-right.
            GlyphRect {
                rect: Rect::new(145.0, 701.0, 16.0, 16.0),
                page_number: 1,
            },
            GlyphRect {
                rect: Rect::new(103.0, 701.0, 16.0, 16.0),
                page_number: 1,
            },
            GlyphRect {
                rect: Rect::new(124.0, 701.0, 16.0, 16.0),
                page_number: 1,
            },
            // Too large: filtered.
            GlyphRect {
                rect: Rect::new(100.0, 700.0, 120.0, 18.0),
                page_number: 1,
            },
            // Outside the field: filtered.
            GlyphRect {
                rect: Rect::new(400.0, 701.0, 16.0, 16.0),
                page_number: 1,
            },
        ];
        let fields = [text_field("zip", field_rect)];
        let result = convert(&fields, &BTreeMap::new(), glyphs);

        assert_eq!(result.annotations.len(), 3);
        let xs: Vec<f64> = result.annotations.iter().map(|a| a.rect.x).collect();
        assert_eq!(xs, [103.0, 124.0, 145.0]);
        assert_eq!(result.decisions[0].mode, SplitMode::Detected);
        for (i, ann) in result.annotations.iter().enumerate() {
            assert_eq!(ann.group().unwrap().index, i);
            assert_eq!(ann.group().unwrap().id, "zip");
        }
    }

    #[test]
    fn configured_split_suppresses_visual_detection() {
        let field_rect = Rect::new(100.0, 700.0, 90.0, 20.0);
        let glyphs = vec![
            GlyphRect {
                rect: Rect::new(101.0, 701.0, 10.0, 10.0),
                page_number: 1,
            },
            GlyphRect {
                rect: Rect::new(121.0, 701.0, 10.0, 10.0),
                page_number: 1,
            },
        ];
        let fields = [text_field("ssn", field_rect)];
        let config = BTreeMap::from([("ssn".to_string(), 3usize)]);
        let result = convert(&fields, &config, glyphs);

        assert_eq!(result.annotations.len(), 3);
        assert_eq!(result.decisions[0].mode, SplitMode::Configured);
    }

    #[test]
    fn config_entry_below_two_boxes_also_disables_detection() {
        let glyphs = vec![
            GlyphRect {
                rect: Rect::new(101.0, 701.0, 10.0, 10.0),
                page_number: 1,
            },
            GlyphRect {
                rect: Rect::new(121.0, 701.0, 10.0, 10.0),
                page_number: 1,
            },
        ];
        let fields = [text_field("plain", Rect::new(100.0, 700.0, 90.0, 20.0))];
        let config = BTreeMap::from([("plain".to_string(), 1usize)]);
        let result = convert(&fields, &config, glyphs);

        assert_eq!(result.annotations.len(), 1);
        assert_eq!(result.decisions[0].mode, SplitMode::Single);
    }

    #[test]
    fn narrow_text_field_is_never_split() {
        // width 12 <= height 10 * 1.5: not a split candidate.
        let fields = [text_field("digit", Rect::new(10.0, 10.0, 12.0, 10.0))];
        let result = convert(&fields, &BTreeMap::new(), Vec::new());
        assert_eq!(result.annotations.len(), 1);
    }

    #[test]
    fn checkbox_field_gets_glyph_and_checked_state() {
        let fields = [RawFormField {
            name: "agree".to_string(),
            value: "Yes".to_string(),
            checked: true,
            kind: FieldKind::Checkbox,
            rect: Rect::new(10.0, 10.0, 14.0, 14.0),
            page_number: 1,
            page_degraded: false,
        }];
        let result = convert(&fields, &BTreeMap::new(), Vec::new());
        let form = result.annotations[0].as_form_field().unwrap();
        assert!(form.checked);
        assert_eq!(form.value, checkbox_glyph(true));
    }

    #[test]
    fn unknown_kind_normalizes_to_text() {
        let fields = [RawFormField {
            name: "mystery".to_string(),
            value: String::new(),
            checked: false,
            kind: FieldKind::Unknown,
            rect: Rect::new(10.0, 10.0, 80.0, 60.0),
            page_number: 1,
            page_degraded: false,
        }];
        let result = convert(&fields, &BTreeMap::new(), Vec::new());
        let form = result.annotations[0].as_form_field().unwrap();
        assert_eq!(form.kind, FieldKind::Text);
    }

    #[test]
    fn w9_template_detected_from_field_names() {
        let fields = [text_field(
            "topmostSubform[0].Page1[0].f1_11[0]",
            Rect::new(0.0, 0.0, 90.0, 20.0),
        )];
        let tpl = detect_template(&fields, &BUILTIN_TEMPLATES).expect("template");
        assert_eq!(tpl.name, "FW9");
        let config = effective_config(&fields, &BUILTIN_TEMPLATES, &BTreeMap::new());
        assert_eq!(config.get("topmostSubform[0].Page1[0].f1_11[0]"), Some(&3));
    }

    #[test]
    fn user_config_overrides_template_entry() {
        let fields = [text_field(
            "topmostSubform[0].Page1[0].f1_11[0]",
            Rect::new(0.0, 0.0, 90.0, 20.0),
        )];
        let user = BTreeMap::from([("topmostSubform[0].Page1[0].f1_11[0]".to_string(), 9usize)]);
        let config = effective_config(&fields, &BUILTIN_TEMPLATES, &user);
        assert_eq!(config.get("topmostSubform[0].Page1[0].f1_11[0]"), Some(&9));
    }

    #[test]
    fn manual_split_replaces_annotation_with_grouped_boxes() {
        let mut model = crate::annot::AnnotationModel::new();
        let fields = [text_field("acct", Rect::new(0.0, 0.0, 100.0, 20.0))];
        let conversion = convert(&fields, &BTreeMap::new(), Vec::new());
        for ann in conversion.annotations {
            model.insert(ann);
        }
        let id = model.iter().next().unwrap().id.clone();

        assert!(split_annotation(&mut model, &id, 4, &SplitParams::default()));
        assert_eq!(model.len(), 4);
        let indices: Vec<usize> = model.iter().map(|a| a.group().unwrap().index).collect();
        assert_eq!(indices, [0, 1, 2, 3]);
    }

    #[test]
    fn manual_split_rejects_non_text_targets() {
        let mut model = crate::annot::AnnotationModel::new();
        model.insert(Annotation {
            id: "sig".to_string(),
            rect: Rect::new(0.0, 0.0, 100.0, 40.0),
            page_number: 1,
            kind: AnnotationKind::SignatureImage {
                data_uri: String::new(),
            },
        });
        assert!(!split_annotation(
            &mut model,
            "sig",
            2,
            &SplitParams::default()
        ));
    }
}
