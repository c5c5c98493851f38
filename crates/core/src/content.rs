//! Content-stream scanning: rectangle glyphs and text items.
//!
//! Walks a page's drawing-operation stream. The rectangle scan records
//! every `re` (rectangle path) operation as a candidate hand-drawn box;
//! no stroke/fill distinction is made, so the output is noisy by design —
//! decorative boxes and table borders are indistinguishable here and the
//! field splitter does the filtering. The text scan drives "make
//! editable" mode: it captures strings shown by `Tj`/`'`/`"`/`TJ`
//! together with the text-matrix position and font size.

use log::debug;
use lopdf::Object;
use lopdf::content::Content;

use crate::document::{FormDocument, decode_text_string, object_to_f64};
use crate::geom::{Rect, pdf_to_canvas};

/// A candidate hand-drawn box found in a page's vector content.
///
/// Ephemeral: computed on demand and cached per page only for the
/// duration of one conversion pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphRect {
    /// PDF user-space geometry, exactly as authored.
    pub rect: Rect,
    /// 1-based page number.
    pub page_number: u32,
}

/// A piece of text found in a page's content stream.
///
/// `x`/`y` are canvas-space (top-left origin) PDF units; `width` is an
/// estimate (no font metrics are consulted).
#[derive(Debug, Clone, PartialEq)]
pub struct TextItem {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub font_size: f64,
    pub page_number: u32,
}

/// Scans one page for rectangle-paint operations.
///
/// Pure read; an unobtainable operator stream yields an empty list and
/// the caller falls back to config/heuristic splitting.
pub fn rectangles_on_page(doc: &FormDocument, page_number: u32) -> Vec<GlyphRect> {
    let ops = match page_operations(doc, page_number) {
        Some(ops) => ops,
        None => return Vec::new(),
    };
    rectangles_from_ops(&ops)
        .into_iter()
        .map(|rect| GlyphRect { rect, page_number })
        .collect()
}

/// Scans one page for shown text, for conversion into editable overlays.
pub fn text_items_on_page(doc: &FormDocument, page_number: u32) -> Vec<TextItem> {
    let page_height = match doc.page_height(page_number) {
        Ok(h) => h,
        Err(_) => return Vec::new(),
    };
    let ops = match page_operations(doc, page_number) {
        Some(ops) => ops,
        None => return Vec::new(),
    };
    text_items_from_ops(&ops, page_height, page_number)
}

fn page_operations(doc: &FormDocument, page_number: u32) -> Option<Content> {
    let bytes = match doc.content_bytes(page_number) {
        Ok(b) => b,
        Err(e) => {
            debug!("page {page_number}: content stream unavailable: {e}");
            return None;
        }
    };
    match Content::decode(&bytes) {
        Ok(content) => Some(content),
        Err(e) => {
            debug!("page {page_number}: content stream decode failed: {e}");
            None
        }
    }
}

fn rectangles_from_ops(content: &Content) -> Vec<Rect> {
    let mut rects = Vec::new();
    for op in &content.operations {
        if op.operator != "re" || op.operands.len() < 4 {
            continue;
        }
        let nums: Vec<f64> = op.operands[..4]
            .iter()
            .filter_map(object_to_f64)
            .collect();
        if let [x, y, w, h] = nums[..] {
            rects.push(Rect::new(x, y, w, h));
        }
    }
    rects
}

/// Minimal text-object state: enough of the Tm/Td/TL machinery to place
/// strings for overlay purposes. The CTM is not tracked — form text in
/// the documents this targets is laid out in unscaled page space.
struct TextState {
    font_size: f64,
    leading: f64,
    /// Text line matrix (a, b, c, d, e, f).
    line: [f64; 6],
}

impl TextState {
    fn new() -> Self {
        Self {
            font_size: 0.0,
            leading: 0.0,
            line: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        }
    }

    fn translate(&mut self, tx: f64, ty: f64) {
        let [a, b, c, d, e, f] = self.line;
        self.line = [a, b, c, d, tx * a + ty * c + e, tx * b + ty * d + f];
    }

    /// Effective glyph size under the current text matrix.
    fn effective_size(&self) -> f64 {
        let [a, b, ..] = self.line;
        self.font_size * (a * a + b * b).sqrt()
    }
}

fn text_items_from_ops(content: &Content, page_height: f64, page_number: u32) -> Vec<TextItem> {
    let mut items = Vec::new();
    let mut state = TextState::new();

    for op in &content.operations {
        match op.operator.as_str() {
            "BT" => state = TextState::new(),
            "Tf" => {
                if let Some(size) = op.operands.last().and_then(object_to_f64) {
                    state.font_size = size;
                }
            }
            "TL" => {
                if let Some(l) = op.operands.first().and_then(object_to_f64) {
                    state.leading = l;
                }
            }
            "Td" => {
                if let (Some(tx), Some(ty)) = operand_pair(&op.operands) {
                    state.translate(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = operand_pair(&op.operands) {
                    state.leading = -ty;
                    state.translate(tx, ty);
                }
            }
            "Tm" => {
                if op.operands.len() >= 6 {
                    let mut m = [0.0f64; 6];
                    for (slot, obj) in m.iter_mut().zip(&op.operands) {
                        *slot = object_to_f64(obj).unwrap_or(0.0);
                    }
                    state.line = m;
                }
            }
            "T*" => {
                let leading = state.leading;
                state.translate(0.0, -leading);
            }
            "Tj" | "'" => {
                if op.operator == "'" {
                    let leading = state.leading;
                    state.translate(0.0, -leading);
                }
                if let Some(text) = op.operands.first().and_then(string_operand) {
                    push_item(&mut items, &state, text, page_height, page_number);
                }
            }
            "\"" => {
                let leading = state.leading;
                state.translate(0.0, -leading);
                if let Some(text) = op.operands.get(2).and_then(string_operand) {
                    push_item(&mut items, &state, text, page_height, page_number);
                }
            }
            "TJ" => {
                if let Some(Object::Array(parts)) = op.operands.first() {
                    let text: String = parts.iter().filter_map(string_operand).collect();
                    push_item(&mut items, &state, text, page_height, page_number);
                }
            }
            _ => {}
        }
    }
    items
}

fn operand_pair(operands: &[Object]) -> (Option<f64>, Option<f64>) {
    (
        operands.first().and_then(object_to_f64),
        operands.get(1).and_then(object_to_f64),
    )
}

fn string_operand(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}

fn push_item(
    items: &mut Vec<TextItem>,
    state: &TextState,
    text: String,
    page_height: f64,
    page_number: u32,
) {
    if text.trim().is_empty() {
        return;
    }
    let size = state.effective_size();
    let height = size;
    // Width estimate: roughly half an em per character.
    let width = text.chars().count() as f64 * size * 0.5;
    let (x, y) = pdf_to_canvas(state.line[4], state.line[5], height, page_height);
    items.push(TextItem {
        text,
        x,
        y,
        width,
        height,
        font_size: size,
        page_number,
    });
}
